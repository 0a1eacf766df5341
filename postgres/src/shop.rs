use crate::{PostgresStore, database_error};
use flashsale_core::repository::ShopRepository;
use flashsale_core::{Result, Shop, ShopId};
use sqlx::Row;

impl ShopRepository for PostgresStore {
    async fn find_shop(&self, id: ShopId) -> Result<Option<Shop>> {
        let row = sqlx::query("SELECT id, name, area, address, score FROM tb_shop WHERE id = $1")
            .bind(id.get())
            .fetch_optional(self.pool())
            .await
            .map_err(database_error)?;

        Ok(row.map(|row| Shop {
            id: ShopId(row.get("id")),
            name: row.get("name"),
            area: row.get("area"),
            address: row.get("address"),
            score: row.get("score"),
        }))
    }

    async fn update_shop(&self, shop: &Shop) -> Result<bool> {
        let result = sqlx::query(
            r"
            UPDATE tb_shop
            SET name = $2, area = $3, address = $4, score = $5, update_time = now()
            WHERE id = $1
            ",
        )
        .bind(shop.id.get())
        .bind(&shop.name)
        .bind(&shop.area)
        .bind(&shop.address)
        .bind(shop.score)
        .execute(self.pool())
        .await
        .map_err(database_error)?;

        Ok(result.rows_affected() > 0)
    }
}

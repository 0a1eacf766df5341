use crate::{PostgresStore, database_error, is_unique_violation};
use flashsale_core::repository::{VoucherOrderRepository, VoucherRepository};
use flashsale_core::{CommitOutcome, Result, SeckillVoucher, UserId, VoucherId, VoucherOrder};
use sqlx::Row;

impl VoucherRepository for PostgresStore {
    async fn find_seckill_voucher(&self, id: VoucherId) -> Result<Option<SeckillVoucher>> {
        let row = sqlx::query(
            "SELECT voucher_id, stock, begin_time, end_time FROM tb_seckill_voucher WHERE voucher_id = $1",
        )
        .bind(id.get())
        .fetch_optional(self.pool())
        .await
        .map_err(database_error)?;

        Ok(row.map(|row| SeckillVoucher {
            voucher_id: VoucherId(row.get("voucher_id")),
            stock: row.get("stock"),
            begin_time: row.get("begin_time"),
            end_time: row.get("end_time"),
        }))
    }

    async fn save_seckill_voucher(&self, voucher: &SeckillVoucher) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO tb_seckill_voucher (voucher_id, stock, begin_time, end_time)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (voucher_id) DO UPDATE
            SET stock = EXCLUDED.stock,
                begin_time = EXCLUDED.begin_time,
                end_time = EXCLUDED.end_time,
                update_time = now()
            ",
        )
        .bind(voucher.voucher_id.get())
        .bind(voucher.stock)
        .bind(voucher.begin_time)
        .bind(voucher.end_time)
        .execute(self.pool())
        .await
        .map_err(database_error)?;

        tracing::info!(voucher_id = %voucher.voucher_id, stock = voucher.stock, "Seckill voucher saved");
        Ok(())
    }
}

impl VoucherOrderRepository for PostgresStore {
    async fn create_voucher_order(&self, order: &VoucherOrder) -> Result<CommitOutcome> {
        let mut tx = self.pool().begin().await.map_err(database_error)?;

        let existing: i64 = sqlx::query(
            "SELECT COUNT(*) AS n FROM tb_voucher_order WHERE user_id = $1 AND voucher_id = $2",
        )
        .bind(order.user_id.get())
        .bind(order.voucher_id.get())
        .fetch_one(&mut *tx)
        .await
        .map_err(database_error)?
        .get("n");

        if existing > 0 {
            tx.rollback().await.map_err(database_error)?;
            return Ok(CommitOutcome::DuplicateOrder);
        }

        let decremented = sqlx::query(
            r"
            UPDATE tb_seckill_voucher
            SET stock = stock - 1, update_time = now()
            WHERE voucher_id = $1 AND stock > 0
            ",
        )
        .bind(order.voucher_id.get())
        .execute(&mut *tx)
        .await
        .map_err(database_error)?
        .rows_affected();

        if decremented == 0 {
            tx.rollback().await.map_err(database_error)?;
            return Ok(CommitOutcome::OutOfStock);
        }

        let inserted = sqlx::query(
            "INSERT INTO tb_voucher_order (id, user_id, voucher_id, create_time) VALUES ($1, $2, $3, $4)",
        )
        .bind(order.id.get())
        .bind(order.user_id.get())
        .bind(order.voucher_id.get())
        .bind(order.created_at)
        .execute(&mut *tx)
        .await;

        match inserted {
            Ok(_) => {}
            Err(e) if is_unique_violation(&e) => {
                tx.rollback().await.map_err(database_error)?;
                metrics::counter!("order_commit_unique_violations_total").increment(1);
                tracing::warn!(order_id = %order.id, "Order insert hit uniqueness constraint");
                return Ok(CommitOutcome::DuplicateOrder);
            }
            // Dropping `tx` rolls back the decrement.
            Err(e) => return Err(database_error(e)),
        }

        tx.commit().await.map_err(database_error)?;
        Ok(CommitOutcome::Committed)
    }

    async fn count_orders(&self, user_id: UserId, voucher_id: VoucherId) -> Result<i64> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS n FROM tb_voucher_order WHERE user_id = $1 AND voucher_id = $2",
        )
        .bind(user_id.get())
        .bind(voucher_id.get())
        .fetch_one(self.pool())
        .await
        .map_err(database_error)?;

        Ok(row.get("n"))
    }
}

use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;

use crate::db_types::ProductLockOutcome;

pub async fn upsert_product(
    instance_id: &str,
    product_id: &str,
    description: &str,
    total_stock: i64,
    conn: &mut SqliteConnection,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
            INSERT INTO products (instance_id, product_id, description, total_stock)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (instance_id, product_id)
            DO UPDATE SET description = excluded.description, total_stock = excluded.total_stock
        "#,
    )
    .bind(instance_id)
    .bind(product_id)
    .bind(description)
    .bind(total_stock)
    .execute(conn)
    .await?;
    Ok(())
}

/// Attempt to reserve stock. Runs inside the caller's transaction so the availability check and the lock insert
/// are atomic.
pub async fn lock_product(
    instance_id: &str,
    product_id: &str,
    lock_uuid: &str,
    quantity: i64,
    expires_at: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<ProductLockOutcome, sqlx::Error> {
    let stock: Option<(i64,)> =
        sqlx::query_as("SELECT total_stock FROM products WHERE instance_id = $1 AND product_id = $2")
            .bind(instance_id)
            .bind(product_id)
            .fetch_optional(&mut *conn)
            .await?;
    let total_stock = match stock {
        Some((s,)) => s,
        None => return Ok(ProductLockOutcome::UnknownProduct),
    };
    // Expired locks no longer count; drop them while we are here.
    sqlx::query("DELETE FROM product_locks WHERE instance_id = $1 AND product_id = $2 AND expires_at <= $3")
        .bind(instance_id)
        .bind(product_id)
        .bind(Utc::now())
        .execute(&mut *conn)
        .await?;
    // Re-locking under the same UUID replaces the old reservation, so it is excluded from the held total.
    let (held,): (i64,) = sqlx::query_as(
        r#"
            SELECT COALESCE(SUM(quantity), 0) FROM product_locks
            WHERE instance_id = $1 AND product_id = $2 AND lock_uuid != $3
        "#,
    )
    .bind(instance_id)
    .bind(product_id)
    .bind(lock_uuid)
    .fetch_one(&mut *conn)
    .await?;
    if quantity > total_stock - held {
        return Ok(ProductLockOutcome::InsufficientStock);
    }
    sqlx::query(
        r#"
            INSERT INTO product_locks (instance_id, product_id, lock_uuid, quantity, expires_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (instance_id, product_id, lock_uuid)
            DO UPDATE SET quantity = excluded.quantity, expires_at = excluded.expires_at
        "#,
    )
    .bind(instance_id)
    .bind(product_id)
    .bind(lock_uuid)
    .bind(quantity)
    .bind(expires_at)
    .execute(conn)
    .await?;
    Ok(ProductLockOutcome::Applied)
}

use sqlx::SqliteConnection;

use crate::db_types::WireFeeEntry;

/// Insert one fee entry, tolerating duplicates. Returns `false` when the entry already existed.
pub async fn store_wire_fee(
    master_pub: &str,
    entry: &WireFeeEntry,
    conn: &mut SqliteConnection,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
            INSERT INTO wire_fees (exchange_pub, method, wire_fee, closing_fee, start_date, end_date, master_sig)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (exchange_pub, method, start_date) DO NOTHING
        "#,
    )
    .bind(master_pub)
    .bind(&entry.method)
    .bind(&entry.wire_fee)
    .bind(&entry.closing_fee)
    .bind(entry.start_date)
    .bind(entry.end_date)
    .bind(&entry.master_sig)
    .execute(conn)
    .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn fetch_wire_fees(
    master_pub: &str,
    method: &str,
    conn: &mut SqliteConnection,
) -> Result<Vec<WireFeeEntry>, sqlx::Error> {
    sqlx::query_as(
        r#"
            SELECT method, wire_fee, closing_fee, start_date, end_date, master_sig
            FROM wire_fees
            WHERE exchange_pub = $1 AND method = $2
            ORDER BY start_date ASC
        "#,
    )
    .bind(master_pub)
    .bind(method)
    .fetch_all(conn)
    .await
}

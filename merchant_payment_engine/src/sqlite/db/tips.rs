use chrono::{DateTime, Utc};
use mpg_common::Amount;
use sqlx::SqliteConnection;

use crate::db_types::{NewTipAuthorization, PickupId, Tip, TipId};

pub async fn fetch_tip_by_id(tip_id: &TipId, conn: &mut SqliteConnection) -> Result<Option<Tip>, sqlx::Error> {
    sqlx::query_as("SELECT * FROM tips WHERE tip_id = $1").bind(tip_id.as_str()).fetch_optional(conn).await
}

pub async fn insert_tip(
    instance_id: &str,
    tip_id: &TipId,
    auth: &NewTipAuthorization,
    picked_up: &Amount,
    reserve_priv: &str,
    exchange_url: &str,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
            INSERT INTO tips (
                tip_id,
                instance_id,
                exchange_url,
                reserve_priv,
                justification,
                next_url,
                extra,
                amount,
                picked_up,
                created_at,
                expires_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
        "#,
    )
    .bind(tip_id.as_str())
    .bind(instance_id)
    .bind(exchange_url)
    .bind(reserve_priv)
    .bind(&auth.justification)
    .bind(&auth.next_url)
    .bind(auth.extra.to_string())
    .bind(&auth.amount)
    .bind(picked_up)
    .bind(created_at)
    .bind(expires_at)
    .execute(conn)
    .await?;
    Ok(())
}

/// Returns the recorded total of a prior pickup with this id, if any.
pub async fn fetch_pickup(
    tip_id: &TipId,
    pickup_id: &PickupId,
    conn: &mut SqliteConnection,
) -> Result<Option<Amount>, sqlx::Error> {
    let total: Option<(Amount,)> = sqlx::query_as("SELECT total FROM tip_pickups WHERE tip_id = $1 AND pickup_id = $2")
        .bind(tip_id.as_str())
        .bind(pickup_id.as_str())
        .fetch_optional(conn)
        .await?;
    Ok(total.map(|t| t.0))
}

pub async fn record_pickup(
    tip_id: &TipId,
    pickup_id: &PickupId,
    total: &Amount,
    new_picked_up: &Amount,
    conn: &mut SqliteConnection,
) -> Result<(), sqlx::Error> {
    sqlx::query("INSERT INTO tip_pickups (tip_id, pickup_id, total, created_at) VALUES ($1, $2, $3, $4)")
        .bind(tip_id.as_str())
        .bind(pickup_id.as_str())
        .bind(total)
        .bind(Utc::now())
        .execute(&mut *conn)
        .await?;
    sqlx::query("UPDATE tips SET picked_up = $1 WHERE tip_id = $2")
        .bind(new_picked_up)
        .bind(tip_id.as_str())
        .execute(conn)
        .await?;
    Ok(())
}

use chrono::Utc;
use log::debug;
use sqlx::{QueryBuilder, Sqlite, SqliteConnection};

use crate::db_types::{NewOrder, OrderFilter, OrderSummary, YesNoAll};

pub async fn fetch_order(
    instance_id: &str,
    order_id: &str,
    conn: &mut SqliteConnection,
) -> Result<Option<OrderSummary>, sqlx::Error> {
    sqlx::query_as(
        r#"
            SELECT row_id, order_id, summary, total, paid, refunded, wired, created_at
            FROM orders WHERE instance_id = $1 AND order_id = $2
        "#,
    )
    .bind(instance_id)
    .bind(order_id)
    .fetch_optional(conn)
    .await
}

/// Insert the order, returning `false` in the second slot when it already existed.
pub async fn idempotent_insert(
    instance_id: &str,
    order: &NewOrder,
    conn: &mut SqliteConnection,
) -> Result<(OrderSummary, bool), sqlx::Error> {
    if let Some(existing) = fetch_order(instance_id, &order.order_id, &mut *conn).await? {
        return Ok((existing, false));
    }
    let created_at = order.created_at.unwrap_or_else(Utc::now);
    let summary: OrderSummary = sqlx::query_as(
        r#"
            INSERT INTO orders (instance_id, order_id, summary, total, created_at)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING row_id, order_id, summary, total, paid, refunded, wired, created_at
        "#,
    )
    .bind(instance_id)
    .bind(&order.order_id)
    .bind(&order.summary)
    .bind(&order.total)
    .bind(created_at)
    .fetch_one(conn)
    .await?;
    debug!("📝️ Order [{}] inserted with row id {}", summary.order_id, summary.row_id);
    Ok((summary, true))
}

pub async fn mark_paid(
    instance_id: &str,
    order_id: &str,
    conn: &mut SqliteConnection,
) -> Result<Option<OrderSummary>, sqlx::Error> {
    sqlx::query_as(
        r#"
            UPDATE orders SET paid = TRUE
            WHERE instance_id = $1 AND order_id = $2
            RETURNING row_id, order_id, summary, total, paid, refunded, wired, created_at
        "#,
    )
    .bind(instance_id)
    .bind(order_id)
    .fetch_optional(conn)
    .await
}

pub async fn mark_refunded(
    instance_id: &str,
    order_id: &str,
    conn: &mut SqliteConnection,
) -> Result<Option<OrderSummary>, sqlx::Error> {
    sqlx::query_as(
        r#"
            UPDATE orders SET refunded = TRUE
            WHERE instance_id = $1 AND order_id = $2
            RETURNING row_id, order_id, summary, total, paid, refunded, wired, created_at
        "#,
    )
    .bind(instance_id)
    .bind(order_id)
    .fetch_optional(conn)
    .await
}

fn push_flag(qb: &mut QueryBuilder<'_, Sqlite>, column: &str, value: YesNoAll) {
    match value {
        YesNoAll::Yes => {
            qb.push(" AND ").push(column).push(" = TRUE");
        },
        YesNoAll::No => {
            qb.push(" AND ").push(column).push(" = FALSE");
        },
        YesNoAll::All => {},
    }
}

pub async fn search(
    instance_id: &str,
    filter: &OrderFilter,
    conn: &mut SqliteConnection,
) -> Result<Vec<OrderSummary>, sqlx::Error> {
    let mut qb: QueryBuilder<'_, Sqlite> = QueryBuilder::new(
        "SELECT row_id, order_id, summary, total, paid, refunded, wired, created_at FROM orders WHERE instance_id = ",
    );
    qb.push_bind(instance_id);
    push_flag(&mut qb, "paid", filter.paid);
    push_flag(&mut qb, "refunded", filter.refunded);
    push_flag(&mut qb, "wired", filter.wired);
    let start = filter.start.unwrap_or(if filter.delta >= 0 { 0 } else { i64::MAX });
    if filter.delta >= 0 {
        qb.push(" AND row_id > ").push_bind(start);
        if let Some(date) = filter.date {
            qb.push(" AND created_at >= ").push_bind(date);
        }
        qb.push(" ORDER BY row_id ASC LIMIT ").push_bind(filter.delta);
    } else {
        qb.push(" AND row_id < ").push_bind(start);
        if let Some(date) = filter.date {
            qb.push(" AND created_at <= ").push_bind(date);
        }
        qb.push(" ORDER BY row_id DESC LIMIT ").push_bind(filter.delta.unsigned_abs() as i64);
    }
    qb.build_query_as().fetch_all(conn).await
}

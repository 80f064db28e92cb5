use sqlx::{FromRow, SqliteConnection};

use crate::db_types::{InstanceAccountRow, InstanceRow};

#[derive(FromRow)]
struct BareInstance {
    id: String,
    name: String,
    merchant_priv: String,
    tip_exchange: Option<String>,
    tip_reserve_priv: Option<String>,
}

pub async fn fetch_instances(active_only: bool, conn: &mut SqliteConnection) -> Result<Vec<InstanceRow>, sqlx::Error> {
    let bare: Vec<BareInstance> = sqlx::query_as(
        "SELECT id, name, merchant_priv, tip_exchange, tip_reserve_priv FROM instances ORDER BY id ASC",
    )
    .fetch_all(&mut *conn)
    .await?;
    let mut result = Vec::with_capacity(bare.len());
    for inst in bare {
        let accounts = fetch_accounts(&inst.id, active_only, &mut *conn).await?;
        result.push(InstanceRow {
            id: inst.id,
            name: inst.name,
            merchant_priv: inst.merchant_priv,
            tip_exchange: inst.tip_exchange,
            tip_reserve_priv: inst.tip_reserve_priv,
            accounts,
        });
    }
    Ok(result)
}

async fn fetch_accounts(
    instance_id: &str,
    active_only: bool,
    conn: &mut SqliteConnection,
) -> Result<Vec<InstanceAccountRow>, sqlx::Error> {
    // Active accounts first, then stable order within each group.
    let mut sql = String::from(
        "SELECT payto_uri, method, salt, h_wire, active FROM instance_accounts WHERE instance_id = $1",
    );
    if active_only {
        sql.push_str(" AND active = TRUE");
    }
    sql.push_str(" ORDER BY active DESC, payto_uri ASC");
    sqlx::query_as(&sql).bind(instance_id).fetch_all(conn).await
}

/// Returns `false` without writing anything when the instance id is already taken.
pub async fn insert_instance(instance: &InstanceRow, conn: &mut SqliteConnection) -> Result<bool, sqlx::Error> {
    let inserted = sqlx::query(
        r#"
            INSERT INTO instances (id, name, merchant_priv, tip_exchange, tip_reserve_priv)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (id) DO NOTHING
        "#,
    )
    .bind(&instance.id)
    .bind(&instance.name)
    .bind(&instance.merchant_priv)
    .bind(&instance.tip_exchange)
    .bind(&instance.tip_reserve_priv)
    .execute(&mut *conn)
    .await?;
    if inserted.rows_affected() == 0 {
        return Ok(false);
    }
    for account in &instance.accounts {
        sqlx::query(
            r#"
                INSERT INTO instance_accounts (instance_id, payto_uri, method, salt, h_wire, active)
                VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(&instance.id)
        .bind(&account.payto_uri)
        .bind(&account.method)
        .bind(&account.salt)
        .bind(&account.h_wire)
        .bind(account.active)
        .execute(&mut *conn)
        .await?;
    }
    Ok(true)
}

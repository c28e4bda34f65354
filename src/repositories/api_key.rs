use deadpool_postgres::Pool;
use tokio_postgres::Row;

use crate::{
    error::{AppError, Result},
    models::api_key::{ApiKey, ServiceKind},
};

fn row_to_api_key(row: &Row) -> Result<ApiKey> {
    let service: String = row
        .try_get("service")
        .map_err(|_| AppError::MissingData("service".to_string()))?;
    Ok(ApiKey {
        id: row.try_get("id").map_err(|_| AppError::MissingData("id".to_string()))?,
        service: service.parse()?,
        key_name: row.try_get("key_name").map_err(|_| AppError::MissingData("key_name".to_string()))?,
        encrypted_key: row.try_get("encrypted_key").map_err(|_| AppError::MissingData("encrypted_key".to_string()))?,
        is_active: row.try_get("is_active").map_err(|_| AppError::MissingData("is_active".to_string()))?,
        is_default: row.try_get("is_default").map_err(|_| AppError::MissingData("is_default".to_string()))?,
        last_used: row.try_get("last_used").map_err(|_| AppError::MissingData("last_used".to_string()))?,
        created_at: row.try_get("created_at").map_err(|_| AppError::MissingData("created_at".to_string()))?,
    })
}

/// Lists every credential, for the admin view.
pub async fn list_all(pool: &Pool) -> Result<Vec<ApiKey>> {
    let client = pool.get().await?;
    let rows = client
        .query(
            "SELECT * FROM api_keys ORDER BY service, created_at",
            &[],
        )
        .await?;
    rows.iter().map(row_to_api_key).collect()
}

/// Lists active credentials for one service in rotation order: the default
/// key first, then insertion order.
pub async fn list_active(pool: &Pool, service: ServiceKind) -> Result<Vec<ApiKey>> {
    let client = pool.get().await?;
    let rows = client
        .query(
            r#"
            SELECT *
            FROM api_keys
            WHERE service = $1 AND is_active = true
            ORDER BY is_default DESC, created_at ASC, id ASC
            "#,
            &[&service.as_str()],
        )
        .await?;
    rows.iter().map(row_to_api_key).collect()
}

/// Creates a credential, or replaces the ciphertext of an existing
/// `(service, key_name)` pair and re-activates it.
pub async fn upsert(
    pool: &Pool,
    service: ServiceKind,
    key_name: &str,
    encrypted_key: &str,
) -> Result<ApiKey> {
    let client = pool.get().await?;
    let row = client
        .query_one(
            r#"
            INSERT INTO api_keys (service, key_name, encrypted_key)
            VALUES ($1, $2, $3)
            ON CONFLICT (service, key_name)
            DO UPDATE SET encrypted_key = EXCLUDED.encrypted_key, is_active = true
            RETURNING *
            "#,
            &[&service.as_str(), &key_name, &encrypted_key],
        )
        .await?;
    row_to_api_key(&row)
}

/// Updates the activation / default flags of a credential. Promoting a key
/// to default demotes its siblings in the same service.
pub async fn set_flags(
    pool: &Pool,
    id: i32,
    is_active: Option<bool>,
    is_default: Option<bool>,
) -> Result<ApiKey> {
    let mut client = pool.get().await?;
    let transaction = client.transaction().await?;

    if is_default == Some(true) {
        transaction
            .execute(
                r#"
                UPDATE api_keys
                SET is_default = false
                WHERE service = (SELECT service FROM api_keys WHERE id = $1)
                "#,
                &[&id],
            )
            .await?;
    }

    let row = transaction
        .query_opt(
            r#"
            UPDATE api_keys
            SET
                is_active = COALESCE($2, is_active),
                is_default = COALESCE($3, is_default)
            WHERE id = $1
            RETURNING *
            "#,
            &[&id, &is_active, &is_default],
        )
        .await?
        .ok_or(AppError::NotFound)?;

    let key = row_to_api_key(&row)?;
    transaction.commit().await?;
    Ok(key)
}

/// Hard-deletes a credential.
pub async fn delete(pool: &Pool, id: i32) -> Result<()> {
    let client = pool.get().await?;
    let deleted = client.execute("DELETE FROM api_keys WHERE id = $1", &[&id]).await?;
    if deleted == 0 {
        return Err(AppError::NotFound);
    }
    Ok(())
}

/// Stamps a credential as used. Best-effort bookkeeping.
pub async fn touch_last_used(pool: &Pool, id: i32) -> Result<()> {
    let client = pool.get().await?;
    client
        .execute("UPDATE api_keys SET last_used = NOW() WHERE id = $1", &[&id])
        .await?;
    Ok(())
}

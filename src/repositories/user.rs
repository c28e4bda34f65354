use deadpool_postgres::Pool;
use tokio_postgres::Row;
use uuid::Uuid;
use crate::{
    error::{AppError, Result},
    models::user::{Role, User},
};

/// A helper function to map a `tokio_postgres::Row` to a `User`.
fn row_to_user(row: &Row) -> Result<User> {
    Ok(User {
        id: row.try_get("id").map_err(|_| AppError::MissingData("id".to_string()))?,
        email: row.try_get("email").map_err(|_| AppError::MissingData("email".to_string()))?,
        name: row.try_get("name").map_err(|_| AppError::MissingData("name".to_string()))?,
        password: row.try_get("password").map_err(|_| AppError::MissingData("password".to_string()))?,
        role: row.try_get("role").map_err(|_| AppError::MissingData("role".to_string()))?,
        is_creator: row.try_get("is_creator").map_err(|_| AppError::MissingData("is_creator".to_string()))?,
        daily_message_limit: row.try_get("daily_message_limit").map_err(|_| AppError::MissingData("daily_message_limit".to_string()))?,
        messages_used_today: row.try_get("messages_used_today").map_err(|_| AppError::MissingData("messages_used_today".to_string()))?,
        last_message_date: row.try_get("last_message_date").map_err(|_| AppError::MissingData("last_message_date".to_string()))?,
        created_at: row.try_get("created_at").map_err(|_| AppError::MissingData("created_at".to_string()))?,
        updated_at: row.try_get("updated_at").map_err(|_| AppError::MissingData("updated_at".to_string()))?,
        is_active: row.try_get("is_active").map_err(|_| AppError::MissingData("is_active".to_string()))?,
    })
}

/// Creates a new user in the database.
pub async fn create_user(
    pool: &Pool,
    id: Uuid,
    email: &str,
    name: &str,
    password_hash: &str,
    role: Role,
    is_creator: bool,
) -> Result<User> {
    let client = pool.get().await?;
    let row = client
        .query_one(
            r#"
            INSERT INTO users (id, email, name, password, role, is_creator)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING *
            "#,
            &[&id, &email, &name, &password_hash, &role, &is_creator],
        )
        .await?;
    row_to_user(&row)
}

/// Finds an active user by their email address.
pub async fn find_by_email(pool: &Pool, email: &str) -> Result<Option<User>> {
    let client = pool.get().await?;
    let row = client
        .query_opt(
            r#"
            SELECT *
            FROM users
            WHERE email = $1 AND is_active = true
            "#,
            &[&email],
        )
        .await?;
    row.map(|r| row_to_user(&r)).transpose()
}

/// Finds a user by their ID.
pub async fn find_by_id(pool: &Pool, user_id: &Uuid) -> Result<Option<User>> {
    let client = pool.get().await?;
    let row = client
        .query_opt(
            r#"
            SELECT *
            FROM users
            WHERE id = $1
            "#,
            &[user_id],
        )
        .await?;
    row.map(|r| row_to_user(&r)).transpose()
}

/// Counts all users. Used to promote the first registration to creator.
pub async fn count_users(pool: &Pool) -> Result<i64> {
    let client = pool.get().await?;
    let row = client.query_one("SELECT COUNT(*) AS total FROM users", &[]).await?;
    row.try_get("total").map_err(|_| AppError::MissingData("total".to_string()))
}

/// Lists all users, newest first.
pub async fn list_users(pool: &Pool) -> Result<Vec<User>> {
    let client = pool.get().await?;
    let rows = client
        .query("SELECT * FROM users ORDER BY created_at DESC", &[])
        .await?;
    rows.iter().map(row_to_user).collect()
}

/// Updates a user's role and daily message limit.
pub async fn update_role_and_limit(
    pool: &Pool,
    user_id: &Uuid,
    role: Option<Role>,
    daily_message_limit: Option<i32>,
) -> Result<User> {
    let client = pool.get().await?;
    let row = client
        .query_opt(
            r#"
            UPDATE users
            SET
                role = COALESCE($2, role),
                is_creator = CASE WHEN $2 = 'creator'::user_role THEN true ELSE is_creator END,
                daily_message_limit = COALESCE($3, daily_message_limit),
                updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
            &[user_id, &role, &daily_message_limit],
        )
        .await?
        .ok_or(AppError::NotFound)?;
    row_to_user(&row)
}

use deadpool_postgres::Pool;
use uuid::Uuid;

use crate::{
    error::{AppError, Result},
    models::identity::Identity,
    models::preference::ModelPreference,
};

fn identity_columns(identity: &Identity) -> (Option<Uuid>, Option<Uuid>) {
    match identity {
        Identity::User(user) => (Some(user.id), None),
        Identity::Anonymous(session_id) => (None, Some(*session_id)),
    }
}

/// Fetches an identity's model preference, if any.
pub async fn find(pool: &Pool, identity: &Identity) -> Result<Option<ModelPreference>> {
    let client = pool.get().await?;
    let row = match identity {
        Identity::User(user) => {
            client
                .query_opt(
                    "SELECT preferred_model FROM model_preferences WHERE user_id = $1",
                    &[&user.id],
                )
                .await?
        }
        Identity::Anonymous(session_id) => {
            client
                .query_opt(
                    "SELECT preferred_model FROM model_preferences WHERE session_id = $1",
                    &[session_id],
                )
                .await?
        }
    };

    row.map(|r| {
        Ok(ModelPreference {
            preferred_model: r
                .try_get("preferred_model")
                .map_err(|_| AppError::MissingData("preferred_model".to_string()))?,
        })
    })
    .transpose()
}

/// Upserts an identity's model preference.
pub async fn set(pool: &Pool, identity: &Identity, preferred_model: &str) -> Result<()> {
    let (user_id, session_id) = identity_columns(identity);
    let client = pool.get().await?;

    match identity {
        Identity::User(_) => {
            client
                .execute(
                    r#"
                    INSERT INTO model_preferences (user_id, session_id, preferred_model)
                    VALUES ($1, $2, $3)
                    ON CONFLICT (user_id) WHERE user_id IS NOT NULL
                    DO UPDATE SET preferred_model = EXCLUDED.preferred_model, updated_at = NOW()
                    "#,
                    &[&user_id, &session_id, &preferred_model],
                )
                .await?;
        }
        Identity::Anonymous(_) => {
            client
                .execute(
                    r#"
                    INSERT INTO model_preferences (user_id, session_id, preferred_model)
                    VALUES ($1, $2, $3)
                    ON CONFLICT (session_id) WHERE session_id IS NOT NULL
                    DO UPDATE SET preferred_model = EXCLUDED.preferred_model, updated_at = NOW()
                    "#,
                    &[&user_id, &session_id, &preferred_model],
                )
                .await?;
        }
    }

    Ok(())
}

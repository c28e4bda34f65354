use chrono::{NaiveDate, Utc};
use deadpool_postgres::Pool;
use serde::{Serialize, Serializer};
use std::time::Duration;

use crate::{
    error::{AppError, Result},
    models::identity::Identity,
    models::user::{Role, User},
    services::cache::{self, CacheStore},
};

/// Messages an anonymous session may send inside one counter window.
pub const ANONYMOUS_MESSAGE_LIMIT: i64 = 10;
/// Lifetime of an anonymous quota counter. After it lapses the count is
/// treated as 0 again; a deliberate soft limit, not an exact quota.
pub const ANONYMOUS_COUNTER_TTL: Duration = Duration::from_secs(300);

/// What to do when the counter store is unreachable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuotaPolicy {
    /// Reject the request with an infrastructure error (default).
    FailClosed,
    /// Admit the request and log the outage.
    FailOpen,
}

/// The identity's remaining daily budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Remaining {
    Unlimited,
    Count(i64),
}

// Clients receive -1 for unlimited, matching the original wire format.
impl Serialize for Remaining {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Remaining::Unlimited => serializer.serialize_i64(-1),
            Remaining::Count(n) => serializer.serialize_i64(*n),
        }
    }
}

/// The outcome of an admission attempt.
#[derive(Debug, Clone)]
pub enum Admission {
    Admitted { remaining: Remaining },
    Denied { reason: &'static str },
}

const USER_DENIED_REASON: &str = "Daily message limit reached";
const ANONYMOUS_DENIED_REASON: &str = "Message limit reached. Please sign in to continue.";

/// Per-identity daily/rolling message admission.
///
/// Admission is a single atomic check-and-increment: a conditional UPDATE
/// for authenticated identities, a Redis INCR for anonymous ones. The slot
/// is consumed at admission and never refunded, so a degraded dispatch
/// still counts.
#[derive(Clone)]
pub struct QuotaTracker {
    db: Pool,
    cache: CacheStore,
    policy: QuotaPolicy,
}

impl QuotaTracker {
    pub fn new(db: Pool, cache: CacheStore, policy: QuotaPolicy) -> Self {
        Self { db, cache, policy }
    }

    /// Atomically admits one message and consumes a quota slot.
    pub async fn try_acquire(&self, identity: &Identity) -> Result<Admission> {
        match identity {
            Identity::User(user) => match self.acquire_user(user).await {
                Ok(admission) => Ok(admission),
                Err(e) => on_store_error(self.policy, e),
            },
            Identity::Anonymous(session_id) => {
                let key = cache::anon_quota_key(session_id);
                match self.cache.incr(&key, ANONYMOUS_COUNTER_TTL).await {
                    Ok(count) if count > ANONYMOUS_MESSAGE_LIMIT => Ok(Admission::Denied {
                        reason: ANONYMOUS_DENIED_REASON,
                    }),
                    Ok(count) => Ok(Admission::Admitted {
                        remaining: Remaining::Count(ANONYMOUS_MESSAGE_LIMIT - count),
                    }),
                    Err(e) => on_store_error(self.policy, e),
                }
            }
        }
    }

    /// Read-only admission check. Subject to races by construction; use
    /// `try_acquire` for the authoritative gate.
    pub async fn can_send(&self, identity: &Identity) -> Result<bool> {
        match self.remaining(identity).await {
            Ok(Remaining::Unlimited) => Ok(true),
            Ok(Remaining::Count(n)) => Ok(n > 0),
            Err(e) => match on_store_error(self.policy, e)? {
                Admission::Admitted { .. } => Ok(true),
                Admission::Denied { .. } => Ok(false),
            },
        }
    }

    /// The identity's remaining budget, without consuming anything.
    pub async fn remaining(&self, identity: &Identity) -> Result<Remaining> {
        match identity {
            Identity::User(user) => {
                let client = self.db.get().await?;
                let row = client
                    .query_opt(
                        r#"
                        SELECT role, is_creator, daily_message_limit,
                               messages_used_today, last_message_date
                        FROM users
                        WHERE id = $1
                        "#,
                        &[&user.id],
                    )
                    .await?
                    .ok_or(AppError::NotFound)?;

                let role: Role = row.try_get("role").map_err(|_| AppError::MissingData("role".to_string()))?;
                let is_creator: bool = row.try_get("is_creator").map_err(|_| AppError::MissingData("is_creator".to_string()))?;
                let limit: i32 = row.try_get("daily_message_limit").map_err(|_| AppError::MissingData("daily_message_limit".to_string()))?;
                let used: i32 = row.try_get("messages_used_today").map_err(|_| AppError::MissingData("messages_used_today".to_string()))?;
                let last_date: NaiveDate = row.try_get("last_message_date").map_err(|_| AppError::MissingData("last_message_date".to_string()))?;

                Ok(user_remaining(role, is_creator, limit, used, last_date, today()))
            }
            Identity::Anonymous(session_id) => {
                let key = cache::anon_quota_key(session_id);
                let used = self.cache.get::<i64>(&key).await.unwrap_or(0);
                Ok(Remaining::Count((ANONYMOUS_MESSAGE_LIMIT - used).max(0)))
            }
        }
    }

    async fn acquire_user(&self, user: &User) -> Result<Admission> {
        let client = self.db.get().await?;
        let today = today();

        if user.is_quota_exempt() {
            // usage is still recorded, the answer is always yes
            client
                .execute(
                    r#"
                    UPDATE users
                    SET messages_used_today = CASE
                            WHEN last_message_date = $2 THEN messages_used_today + 1
                            ELSE 1
                        END,
                        last_message_date = $2
                    WHERE id = $1
                    "#,
                    &[&user.id, &today],
                )
                .await?;
            return Ok(Admission::Admitted {
                remaining: Remaining::Unlimited,
            });
        }

        // One conditional UPDATE: the day rollover and the limit check happen
        // under the same row lock, so two racing requests cannot both take
        // the final slot.
        let row = client
            .query_opt(
                r#"
                UPDATE users
                SET messages_used_today = CASE
                        WHEN last_message_date = $2 THEN messages_used_today + 1
                        ELSE 1
                    END,
                    last_message_date = $2
                WHERE id = $1
                  AND (last_message_date <> $2 OR messages_used_today < daily_message_limit)
                RETURNING daily_message_limit - messages_used_today AS remaining
                "#,
                &[&user.id, &today],
            )
            .await?;

        match row {
            Some(row) => {
                let remaining: i32 = row
                    .try_get("remaining")
                    .map_err(|_| AppError::MissingData("remaining".to_string()))?;
                Ok(Admission::Admitted {
                    remaining: Remaining::Count(remaining.max(0) as i64),
                })
            }
            None => Ok(Admission::Denied {
                reason: USER_DENIED_REASON,
            }),
        }
    }
}

/// The calendar date quotas roll over on. UTC is the fixed reference
/// timezone.
fn today() -> NaiveDate {
    Utc::now().date_naive()
}

/// Pure remaining-budget computation for an authenticated identity.
fn user_remaining(
    role: Role,
    is_creator: bool,
    limit: i32,
    used: i32,
    last_date: NaiveDate,
    today: NaiveDate,
) -> Remaining {
    if is_creator || role.is_quota_exempt() {
        return Remaining::Unlimited;
    }
    if last_date != today {
        // day rolled over; the stored counter is stale until the next send
        return Remaining::Count(limit as i64);
    }
    Remaining::Count(((limit - used) as i64).max(0))
}

/// Applies the configured policy to a counter-store failure.
fn on_store_error(policy: QuotaPolicy, error: AppError) -> Result<Admission> {
    match policy {
        QuotaPolicy::FailOpen => {
            tracing::warn!("⚠️  Quota store unreachable, admitting (fail-open): {}", error);
            Ok(Admission::Admitted {
                remaining: Remaining::Unlimited,
            })
        }
        QuotaPolicy::FailClosed => Err(error),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    #[test]
    fn remaining_decreases_with_usage_within_a_day() {
        let today = date("2025-06-01");
        let r0 = user_remaining(Role::Basic, false, 50, 0, today, today);
        let r10 = user_remaining(Role::Basic, false, 50, 10, today, today);
        let r50 = user_remaining(Role::Basic, false, 50, 50, today, today);
        assert_eq!(r0, Remaining::Count(50));
        assert_eq!(r10, Remaining::Count(40));
        assert_eq!(r50, Remaining::Count(0));
    }

    #[test]
    fn remaining_never_goes_negative() {
        let today = date("2025-06-01");
        assert_eq!(
            user_remaining(Role::Basic, false, 50, 60, today, today),
            Remaining::Count(0)
        );
    }

    #[test]
    fn day_rollover_resets_to_full_limit() {
        let yesterday = date("2025-05-31");
        let today = date("2025-06-01");
        assert_eq!(
            user_remaining(Role::Basic, false, 50, 50, yesterday, today),
            Remaining::Count(50)
        );
    }

    #[test]
    fn privileged_roles_are_always_unlimited() {
        let today = date("2025-06-01");
        assert_eq!(
            user_remaining(Role::Vip, false, 50, 9999, today, today),
            Remaining::Unlimited
        );
        assert_eq!(
            user_remaining(Role::Creator, false, 50, 9999, today, today),
            Remaining::Unlimited
        );
        // the is_creator flag alone is enough
        assert_eq!(
            user_remaining(Role::Basic, true, 50, 9999, today, today),
            Remaining::Unlimited
        );
    }

    #[test]
    fn store_failure_fails_closed_by_default() {
        let err = AppError::Internal("store down".to_string());
        assert!(on_store_error(QuotaPolicy::FailClosed, err).is_err());
    }

    #[test]
    fn store_failure_admits_when_fail_open() {
        let err = AppError::Internal("store down".to_string());
        match on_store_error(QuotaPolicy::FailOpen, err).unwrap() {
            Admission::Admitted { .. } => {}
            Admission::Denied { .. } => panic!("fail-open must admit"),
        }
    }

    #[test]
    fn remaining_serializes_unlimited_as_minus_one() {
        assert_eq!(sonic_rs::to_string(&Remaining::Unlimited).unwrap(), "-1");
        assert_eq!(sonic_rs::to_string(&Remaining::Count(7)).unwrap(), "7");
    }
}

use chrono::{DateTime, NaiveDate, Utc};
use postgres_types::{FromSql, ToSql};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A user's role, which decides their daily message policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ToSql, FromSql, Serialize, Deserialize)]
#[postgres(name = "user_role")]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[postgres(name = "basic")]
    Basic,
    #[postgres(name = "premium")]
    Premium,
    #[postgres(name = "vip")]
    Vip,
    #[postgres(name = "creator")]
    Creator,
}

impl Role {
    /// Roles exempt from the daily message limit.
    pub fn is_quota_exempt(&self) -> bool {
        matches!(self, Role::Vip | Role::Creator)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Basic => "basic",
            Role::Premium => "premium",
            Role::Vip => "vip",
            Role::Creator => "creator",
        }
    }
}

impl std::str::FromStr for Role {
    type Err = ();

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "basic" => Ok(Role::Basic),
            "premium" => Ok(Role::Premium),
            "vip" => Ok(Role::Vip),
            "creator" => Ok(Role::Creator),
            _ => Err(()),
        }
    }
}

/// Represents a user in the system.
#[derive(Clone, Debug)]
pub struct User {
    /// The unique identifier for the user.
    pub id: Uuid,
    /// The user's email address.
    pub email: String,
    /// The user's display name.
    pub name: String,
    /// The user's hashed password.
    pub password: String,
    /// The user's role.
    pub role: Role,
    /// Whether the user holds creator privileges.
    pub is_creator: bool,
    /// The user's daily message budget.
    pub daily_message_limit: i32,
    /// Messages sent on `last_message_date`.
    pub messages_used_today: i32,
    /// The calendar date (UTC) the usage counter refers to.
    pub last_message_date: NaiveDate,
    /// The timestamp when the user was created.
    pub created_at: DateTime<Utc>,
    /// The timestamp when the user was last updated.
    pub updated_at: DateTime<Utc>,
    /// Whether the user is active.
    pub is_active: bool,
}

impl User {
    /// Whether this user is exempt from quota admission.
    pub fn is_quota_exempt(&self) -> bool {
        self.is_creator || self.role.is_quota_exempt()
    }
}

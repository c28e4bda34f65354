use uuid::Uuid;

use crate::models::user::User;

/// The unit of quota and message ownership: either an authenticated user or
/// an anonymous browser session. Exactly one variant is resolved per
/// request, with authentication taking precedence.
#[derive(Debug, Clone)]
pub enum Identity {
    User(User),
    Anonymous(Uuid),
}

impl Identity {
    /// A stable cache-key scope for this identity.
    pub fn cache_scope(&self) -> String {
        match self {
            Identity::User(user) => format!("user:{}", user.id),
            Identity::Anonymous(session_id) => format!("anon:{}", session_id),
        }
    }

    pub fn user(&self) -> Option<&User> {
        match self {
            Identity::User(user) => Some(user),
            Identity::Anonymous(_) => None,
        }
    }
}

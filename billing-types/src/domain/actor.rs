//! The caller on whose behalf a use-case runs.

use serde::{Deserialize, Serialize};

use super::ids::UserId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    Member,
    /// Platform staff allowed to settle disputed escrows.
    Arbitrator,
}

/// Authenticated identity handed over by the auth layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub user_id: UserId,
    pub role: Role,
}

impl Actor {
    pub fn member(user_id: UserId) -> Self {
        Self {
            user_id,
            role: Role::Member,
        }
    }

    pub fn arbitrator(user_id: UserId) -> Self {
        Self {
            user_id,
            role: Role::Arbitrator,
        }
    }
}

//! Domain events and the outbox rows that carry them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::ids::{ContractId, PaymentId, UserId, WalletId};
use super::money::Money;
use crate::error::DomainError;

/// Events that cross aggregate boundaries.
///
/// Consumers must be idempotent: the outbox delivers at least once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum DomainEvent {
    #[serde(rename = "user.registered")]
    UserRegistered { user_id: UserId },

    #[serde(rename = "contract.created")]
    ContractCreated {
        contract_id: ContractId,
        creator_id: UserId,
        freelancer_id: UserId,
        /// Minor units, like every amount between services. Only the
        /// client-facing `CreateEscrowRequest` takes major units.
        amount: Money,
    },

    #[serde(rename = "payment.succeeded")]
    PaymentSucceeded {
        payment_id: PaymentId,
        wallet_id: WalletId,
        amount: Money,
    },
}

impl DomainEvent {
    pub fn name(&self) -> &'static str {
        match self {
            DomainEvent::UserRegistered { .. } => "user.registered",
            DomainEvent::ContractCreated { .. } => "contract.created",
            DomainEvent::PaymentSucceeded { .. } => "payment.succeeded",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutboxStatus {
    #[default]
    Pending,
    Completed,
    Failed,
}

impl AsRef<str> for OutboxStatus {
    fn as_ref(&self) -> &str {
        match self {
            Self::Pending => "PENDING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
        }
    }
}

impl std::fmt::Display for OutboxStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_ref())
    }
}

impl std::str::FromStr for OutboxStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(Self::Pending),
            "COMPLETED" => Ok(Self::Completed),
            "FAILED" => Ok(Self::Failed),
            other => Err(DomainError::Validation(format!(
                "Unknown outbox status: {}",
                other
            ))),
        }
    }
}

/// A persisted event waiting for (or done with) dispatch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboxEvent {
    pub id: Uuid,
    pub event_type: String,
    pub payload: serde_json::Value,
    pub status: OutboxStatus,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub attempts: i32,
    pub last_error: Option<String>,
}

impl OutboxEvent {
    pub fn new(event: &DomainEvent) -> Result<Self, DomainError> {
        let payload = serde_json::to_value(event)
            .map_err(|e| DomainError::Validation(format!("Unserializable event: {}", e)))?;
        Ok(Self {
            id: Uuid::new_v4(),
            event_type: event.name().to_string(),
            payload,
            status: OutboxStatus::Pending,
            created_at: Utc::now(),
            processed_at: None,
            attempts: 0,
            last_error: None,
        })
    }

    /// Decodes the payload back into the event it was built from.
    pub fn decode(&self) -> Result<DomainEvent, DomainError> {
        serde_json::from_value(self.payload.clone())
            .map_err(|e| DomainError::Validation(format!("Malformed {} event: {}", self.event_type, e)))
    }
}

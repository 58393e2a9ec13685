//! Payment domain model.

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};

use super::ids::{PaymentId, WalletId};
use super::money::{Currency, Money};
use crate::error::DomainError;

/// Lifecycle of a provider-initiated payment.
///
/// `Pending` is the only non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    Pending,
    Success,
    Failed,
}

impl PaymentStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, PaymentStatus::Pending)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "PENDING",
            PaymentStatus::Success => "SUCCESS",
            PaymentStatus::Failed => "FAILED",
        }
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for PaymentStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(PaymentStatus::Pending),
            "SUCCESS" => Ok(PaymentStatus::Success),
            "FAILED" => Ok(PaymentStatus::Failed),
            other => Err(DomainError::Validation(format!(
                "Unknown payment status: {}",
                other
            ))),
        }
    }
}

/// Result of asking a payment to move to a new status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// The status changed and must be persisted.
    Applied,
    /// The payment was already terminal; nothing to write.
    Unchanged,
}

/// Generates a system reference: `<prefix>-` followed by 32 lowercase hex chars.
pub fn generate_reference(prefix: &str) -> String {
    let mut bytes = [0u8; 16];
    rand::rng().fill(&mut bytes);
    format!("{}-{}", prefix, hex::encode(bytes))
}

/// One attempt to move money into a wallet through the payment provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Payment {
    pub id: PaymentId,
    pub wallet_id: WalletId,
    pub amount: Money,
    pub currency: Currency,
    pub email: String,
    /// Generated here; stable key for client polling.
    pub system_reference: String,
    /// Assigned by the provider once it accepted the initialization.
    pub provider_reference: Option<String>,
    pub authorization_url: Option<String>,
    pub status: PaymentStatus,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Payment {
    /// Builds a pending payment with a fresh system reference.
    pub fn new(
        wallet_id: WalletId,
        amount: Money,
        currency: Currency,
        email: String,
    ) -> Result<Self, DomainError> {
        if amount.is_zero() {
            return Err(DomainError::ZeroAmount);
        }
        if email.trim().is_empty() || !email.contains('@') {
            return Err(DomainError::Validation("A valid email is required".into()));
        }
        let now = Utc::now();
        Ok(Self {
            id: PaymentId::new(),
            wallet_id,
            amount,
            currency,
            email,
            system_reference: generate_reference("PAY"),
            provider_reference: None,
            authorization_url: None,
            status: PaymentStatus::Pending,
            version: 0,
            created_at: now,
            updated_at: now,
        })
    }

    /// Records the provider's handle for this payment.
    pub fn attach_provider(&mut self, reference: String, authorization_url: String) {
        self.provider_reference = Some(reference);
        self.authorization_url = Some(authorization_url);
        self.updated_at = Utc::now();
    }

    /// Moves a pending payment to `status`.
    ///
    /// Terminal payments never change: the call is a no-op reported as
    /// [`Transition::Unchanged`] so replayed webhooks stay harmless.
    pub fn transition(&mut self, status: PaymentStatus) -> Transition {
        if self.status.is_terminal() || status == self.status {
            return Transition::Unchanged;
        }
        self.status = status;
        self.updated_at = Utc::now();
        Transition::Applied
    }
}

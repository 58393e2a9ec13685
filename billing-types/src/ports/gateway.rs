//! Payment provider port.
//!
//! Everything the core needs from the provider: taking money in, checking
//! it arrived, authenticating webhooks, and sending money out.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{AccountNumber, BankCode, Currency, Money};

/// Error type for provider operations.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("Provider unavailable: {0}")]
    Unavailable(String),

    #[error("Provider timed out")]
    Timeout,

    #[error("Provider rejected the request: {0}")]
    Rejected(String),

    #[error("Unexpected provider response: {0}")]
    InvalidResponse(String),
}

impl GatewayError {
    /// The request may have been carried out even though no usable answer
    /// came back.
    pub fn outcome_unknown(&self) -> bool {
        matches!(self, GatewayError::Timeout | GatewayError::InvalidResponse(_))
    }
}

#[derive(Debug, Clone)]
pub struct ChargeRequest {
    pub amount: Money,
    pub currency: Currency,
    pub email: String,
    /// Our system reference, echoed back by the provider.
    pub reference: String,
    pub callback_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentAuthorization {
    pub authorization_url: String,
    pub access_code: Option<String>,
    pub reference: String,
}

/// Payment status as reported by the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderPaymentStatus {
    Success,
    Failed,
    Pending,
}

impl ProviderPaymentStatus {
    /// Maps a raw provider status string.
    ///
    /// Anything that is neither settled nor definitively lost stays pending.
    pub fn from_provider(status: &str) -> Self {
        match status {
            "success" => Self::Success,
            "failed" | "reversed" | "abandoned" => Self::Failed,
            _ => Self::Pending,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentVerification {
    pub status: ProviderPaymentStatus,
    pub amount: Money,
    pub currency: String,
    pub paid_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct TransferRecipientRequest {
    pub name: String,
    pub account_number: AccountNumber,
    pub bank_code: BankCode,
    pub currency: Currency,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferRecipient {
    pub recipient_code: String,
    pub verified_account_name: String,
    pub account_number: String,
}

#[derive(Debug, Clone)]
pub struct TransferRequest {
    pub amount: Money,
    pub recipient_code: String,
    pub reference: String,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferReceipt {
    pub transfer_code: String,
    pub status: String,
}

/// Port trait for the payment provider.
#[async_trait::async_trait]
pub trait PaymentGateway: Send + Sync + 'static {
    async fn initialize_payment(
        &self,
        req: ChargeRequest,
    ) -> Result<PaymentAuthorization, GatewayError>;

    async fn verify_payment(
        &self,
        provider_reference: &str,
    ) -> Result<PaymentVerification, GatewayError>;

    /// Checks a webhook signature against the exact bytes received.
    fn verify_signature(&self, raw_body: &[u8], signature: &str) -> bool;

    /// Resolves and registers a bank destination with the provider.
    async fn get_transfer_recipient(
        &self,
        req: TransferRecipientRequest,
    ) -> Result<TransferRecipient, GatewayError>;

    /// Sends money to a previously resolved recipient.
    async fn initiate_transfer(&self, req: TransferRequest)
    -> Result<TransferReceipt, GatewayError>;
}

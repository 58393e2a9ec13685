//! Paystack adapter for the [`PaymentGateway`] port.
//!
//! Every Paystack response is wrapped in `{ status, message, data }`; amounts
//! travel in minor units (kobo for NGN).

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use billing_types::Money;
use billing_types::ports::{
    ChargeRequest, GatewayError, PaymentAuthorization, PaymentGateway, PaymentVerification,
    ProviderPaymentStatus, TransferReceipt, TransferRecipient, TransferRecipientRequest,
    TransferRequest,
};

use crate::security;

pub const DEFAULT_BASE_URL: &str = "https://api.paystack.co";

/// Connection settings for the Paystack API.
#[derive(Debug, Clone)]
pub struct PaystackConfig {
    pub secret_key: String,
    pub base_url: String,
    pub timeout: Duration,
}

impl PaystackConfig {
    pub fn new(secret_key: impl Into<String>) -> Self {
        Self {
            secret_key: secret_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout: Duration::from_secs(15),
        }
    }
}

/// Paystack REST client.
pub struct PaystackGateway {
    base_url: String,
    secret_key: String,
    http: Client,
}

impl PaystackGateway {
    pub fn new(config: PaystackConfig) -> Result<Self, GatewayError> {
        let http = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| GatewayError::Unavailable(e.to_string()))?;

        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            secret_key: config.secret_key,
            http,
        })
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, GatewayError> {
        let resp = self
            .http
            .get(format!("{}{}", self.base_url, path))
            .bearer_auth(&self.secret_key)
            .send()
            .await
            .map_err(transport_error)?;
        self.handle_response(resp).await
    }

    async fn post<T: DeserializeOwned, B: Serialize>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, GatewayError> {
        let resp = self
            .http
            .post(format!("{}{}", self.base_url, path))
            .bearer_auth(&self.secret_key)
            .json(body)
            .send()
            .await
            .map_err(transport_error)?;
        self.handle_response(resp).await
    }

    async fn handle_response<T: DeserializeOwned>(
        &self,
        resp: reqwest::Response,
    ) -> Result<T, GatewayError> {
        let status = resp.status();
        let body = resp.text().await.map_err(transport_error)?;

        if !status.is_success() {
            let message = serde_json::from_str::<serde_json::Value>(&body)
                .ok()
                .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(String::from))
                .unwrap_or(body);
            return Err(if status.is_server_error() {
                GatewayError::Unavailable(format!("HTTP {}: {}", status.as_u16(), message))
            } else {
                GatewayError::Rejected(message)
            });
        }

        let envelope: Envelope<T> = serde_json::from_str(&body)
            .map_err(|e| GatewayError::InvalidResponse(e.to_string()))?;
        if !envelope.status {
            return Err(GatewayError::Rejected(envelope.message));
        }
        envelope
            .data
            .ok_or_else(|| GatewayError::InvalidResponse("missing data".into()))
    }
}

fn transport_error(err: reqwest::Error) -> GatewayError {
    if err.is_timeout() {
        GatewayError::Timeout
    } else {
        GatewayError::Unavailable(err.to_string())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Wire types
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct Envelope<T> {
    status: bool,
    #[serde(default)]
    message: String,
    data: Option<T>,
}

#[derive(Serialize)]
struct InitializeBody<'a> {
    email: &'a str,
    amount: i64,
    currency: &'a str,
    reference: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    callback_url: Option<&'a str>,
}

#[derive(Deserialize)]
struct InitializeData {
    authorization_url: String,
    access_code: Option<String>,
    reference: String,
}

#[derive(Deserialize)]
struct VerifyData {
    status: String,
    amount: i64,
    currency: String,
    paid_at: Option<DateTime<Utc>>,
}

#[derive(Serialize)]
struct RecipientBody<'a> {
    #[serde(rename = "type")]
    kind: &'a str,
    name: &'a str,
    account_number: &'a str,
    bank_code: &'a str,
    currency: &'a str,
}

#[derive(Deserialize)]
struct RecipientData {
    recipient_code: String,
    #[serde(default)]
    name: String,
    details: Option<RecipientDetails>,
}

#[derive(Deserialize)]
struct RecipientDetails {
    account_number: Option<String>,
    account_name: Option<String>,
}

#[derive(Serialize)]
struct TransferBody<'a> {
    source: &'a str,
    amount: i64,
    recipient: &'a str,
    reference: &'a str,
    reason: &'a str,
}

#[derive(Deserialize)]
struct TransferData {
    transfer_code: String,
    status: String,
}

#[async_trait]
impl PaymentGateway for PaystackGateway {
    #[tracing::instrument(skip(self, req), fields(reference = %req.reference))]
    async fn initialize_payment(
        &self,
        req: ChargeRequest,
    ) -> Result<PaymentAuthorization, GatewayError> {
        let body = InitializeBody {
            email: &req.email,
            amount: req.amount.minor(),
            currency: req.currency.code(),
            reference: &req.reference,
            callback_url: req.callback_url.as_deref(),
        };
        let data: InitializeData = self.post("/transaction/initialize", &body).await?;

        Ok(PaymentAuthorization {
            authorization_url: data.authorization_url,
            access_code: data.access_code,
            reference: data.reference,
        })
    }

    #[tracing::instrument(skip(self))]
    async fn verify_payment(
        &self,
        provider_reference: &str,
    ) -> Result<PaymentVerification, GatewayError> {
        let data: VerifyData = self
            .get(&format!("/transaction/verify/{}", provider_reference))
            .await?;

        Ok(PaymentVerification {
            status: ProviderPaymentStatus::from_provider(&data.status),
            amount: Money::from_minor(data.amount)
                .map_err(|e| GatewayError::InvalidResponse(e.to_string()))?,
            currency: data.currency,
            paid_at: data.paid_at,
        })
    }

    fn verify_signature(&self, raw_body: &[u8], signature: &str) -> bool {
        security::verify_signature(raw_body, signature, &self.secret_key)
    }

    #[tracing::instrument(skip(self, req), fields(bank_code = %req.bank_code))]
    async fn get_transfer_recipient(
        &self,
        req: TransferRecipientRequest,
    ) -> Result<TransferRecipient, GatewayError> {
        let body = RecipientBody {
            kind: "nuban",
            name: &req.name,
            account_number: req.account_number.as_str(),
            bank_code: req.bank_code.as_str(),
            currency: req.currency.code(),
        };
        let data: RecipientData = self.post("/transferrecipient", &body).await?;

        let (account_number, account_name) = match data.details {
            Some(details) => (details.account_number, details.account_name),
            None => (None, None),
        };
        Ok(TransferRecipient {
            recipient_code: data.recipient_code,
            verified_account_name: account_name
                .filter(|n| !n.is_empty())
                .unwrap_or(data.name),
            account_number: account_number.unwrap_or_else(|| req.account_number.to_string()),
        })
    }

    #[tracing::instrument(skip(self, req), fields(reference = %req.reference))]
    async fn initiate_transfer(&self, req: TransferRequest) -> Result<TransferReceipt, GatewayError> {
        let body = TransferBody {
            source: "balance",
            amount: req.amount.minor(),
            recipient: &req.recipient_code,
            reference: &req.reference,
            reason: &req.reason,
        };
        let data: TransferData = self.post("/transfer", &body).await?;

        Ok(TransferReceipt {
            transfer_code: data.transfer_code,
            status: data.status,
        })
    }
}

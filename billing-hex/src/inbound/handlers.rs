//! HTTP request handlers.

use std::sync::Arc;

use axum::{
    Json,
    body::Bytes,
    extract::{FromRequestParts, Path, State},
    http::{HeaderMap, StatusCode, request::Parts},
    response::{IntoResponse, Response},
};

use billing_types::{
    Actor, AppError, CreateEscrowRequest, CreateWalletRequest, DomainEvent, ErrorKind, EscrowId,
    FundEscrowRequest, InitializePaymentRequest, PaymentGateway, RegisterPayoutAccountRequest,
    Role, SettleEscrowRequest, UnitOfWork, UserId, WithdrawalRequest,
};

use crate::BillingService;

pub const SIGNATURE_HEADER: &str = "x-paystack-signature";
pub const USER_ID_HEADER: &str = "x-user-id";
pub const USER_ROLE_HEADER: &str = "x-user-role";

/// Application state shared across handlers.
pub struct AppState<U: UnitOfWork, G: PaymentGateway> {
    pub service: Arc<BillingService<U, G>>,
}

/// Wrapper to implement IntoResponse for AppError (orphan rule workaround).
#[derive(Debug)]
pub struct ApiError(pub AppError);

impl From<AppError> for ApiError {
    fn from(err: AppError) -> Self {
        ApiError(err)
    }
}

fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::Validation => StatusCode::BAD_REQUEST,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::Forbidden => StatusCode::FORBIDDEN,
        ErrorKind::Conflict | ErrorKind::Concurrency => StatusCode::CONFLICT,
        ErrorKind::Unauthorized => StatusCode::UNAUTHORIZED,
        ErrorKind::ExternalGateway => StatusCode::BAD_GATEWAY,
        ErrorKind::System => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let kind = self.0.kind();
        let status = status_for(kind);

        let message = match kind {
            ErrorKind::System => {
                tracing::error!("Internal error: {}", self.0);
                "Internal server error".to_string()
            }
            _ => self.0.to_string(),
        };

        let mut body = serde_json::json!({
            "error": message,
            "kind": kind,
            "code": status.as_u16()
        });
        if let AppError::Concurrency(conflict) = &self.0 {
            body["retryable"] = serde_json::Value::Bool(true);
            body["conflict"] = serde_json::json!(conflict);
        }

        (status, Json(body)).into_response()
    }
}

/// Caller identity forwarded by the upstream auth layer.
#[derive(Debug, Clone, Copy)]
pub struct Caller(pub Actor);

impl<S: Send + Sync> FromRequestParts<S> for Caller {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let user_id = parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| {
                AppError::Unauthenticated(format!("Missing {} header", USER_ID_HEADER))
            })?
            .parse::<UserId>()
            .map_err(|_| {
                AppError::Unauthenticated(format!("Invalid {} header", USER_ID_HEADER))
            })?;

        let role = match parts
            .headers
            .get(USER_ROLE_HEADER)
            .and_then(|v| v.to_str().ok())
        {
            Some(role) if role.eq_ignore_ascii_case("arbitrator") => Role::Arbitrator,
            _ => Role::Member,
        };

        Ok(Caller(Actor { user_id, role }))
    }
}

fn parse_path_id<T: std::str::FromStr>(raw: &str, what: &str) -> Result<T, ApiError> {
    raw.parse()
        .map_err(|_| AppError::Validation(format!("Invalid {} ID", what)).into())
}

/// Health check endpoint.
pub async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "healthy" }))
}

// ─────────────────────────────────────────────────────────────────────────────
// Wallets
// ─────────────────────────────────────────────────────────────────────────────

#[tracing::instrument(skip(state))]
pub async fn create_wallet<U: UnitOfWork, G: PaymentGateway>(
    State(state): State<Arc<AppState<U, G>>>,
    Json(req): Json<CreateWalletRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let wallet = state.service.create_wallet(req.user_id).await?;
    Ok((StatusCode::CREATED, Json(wallet)))
}

#[tracing::instrument(skip(state))]
pub async fn get_wallet<U: UnitOfWork, G: PaymentGateway>(
    State(state): State<Arc<AppState<U, G>>>,
    Path(user_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id: UserId = parse_path_id(&user_id, "user")?;
    let wallet = state.service.get_wallet(user_id).await?;
    Ok(Json(wallet))
}

// ─────────────────────────────────────────────────────────────────────────────
// Payments
// ─────────────────────────────────────────────────────────────────────────────

#[tracing::instrument(skip(state, req), fields(wallet_id = %req.wallet_id, amount = req.amount))]
pub async fn initialize_payment<U: UnitOfWork, G: PaymentGateway>(
    State(state): State<Arc<AppState<U, G>>>,
    Json(req): Json<InitializePaymentRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let response = state.service.initialize_payment(req).await?;
    Ok((StatusCode::CREATED, Json(response)))
}

#[tracing::instrument(skip(state))]
pub async fn verify_payment<U: UnitOfWork, G: PaymentGateway>(
    State(state): State<Arc<AppState<U, G>>>,
    Path(reference): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let status = state.service.verify_payment_status(&reference).await?;
    Ok(Json(status))
}

/// Provider webhook. The body is taken as raw bytes so the signature is
/// checked against exactly what was sent.
#[tracing::instrument(skip(state, headers, body))]
pub async fn paystack_webhook<U: UnitOfWork, G: PaymentGateway>(
    State(state): State<Arc<AppState<U, G>>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok());

    let outcome = state
        .service
        .handle_provider_webhook(&body, signature)
        .await?;
    Ok(Json(outcome))
}

// ─────────────────────────────────────────────────────────────────────────────
// Escrow
// ─────────────────────────────────────────────────────────────────────────────

#[tracing::instrument(skip(state, req), fields(contract_id = %req.contract_id))]
pub async fn create_escrow<U: UnitOfWork, G: PaymentGateway>(
    State(state): State<Arc<AppState<U, G>>>,
    Json(req): Json<CreateEscrowRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let escrow = state.service.create_escrow(req).await?;
    Ok((StatusCode::CREATED, Json(escrow)))
}

#[tracing::instrument(skip(state), fields(escrow_id = %id))]
pub async fn get_escrow<U: UnitOfWork, G: PaymentGateway>(
    State(state): State<Arc<AppState<U, G>>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let escrow_id: EscrowId = parse_path_id(&id, "escrow")?;
    let details = state.service.get_escrow(escrow_id).await?;
    Ok(Json(details))
}

#[tracing::instrument(skip(state, req), fields(escrow_id = %id, caller = %caller.0.user_id))]
pub async fn fund_escrow<U: UnitOfWork, G: PaymentGateway>(
    State(state): State<Arc<AppState<U, G>>>,
    caller: Caller,
    Path(id): Path<String>,
    Json(req): Json<FundEscrowRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let escrow_id: EscrowId = parse_path_id(&id, "escrow")?;
    let movement = state
        .service
        .fund_escrow(escrow_id, caller.0.user_id, req)
        .await?;
    Ok(Json(movement))
}

/// An empty body settles the whole balance.
fn settle_body(body: &Bytes) -> Result<SettleEscrowRequest, ApiError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(SettleEscrowRequest::default());
    }
    serde_json::from_slice(body)
        .map_err(|e| AppError::Validation(format!("Invalid request body: {}", e)).into())
}

#[tracing::instrument(skip(state, body), fields(escrow_id = %id, caller = %caller.0.user_id))]
pub async fn release_escrow<U: UnitOfWork, G: PaymentGateway>(
    State(state): State<Arc<AppState<U, G>>>,
    caller: Caller,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    let escrow_id: EscrowId = parse_path_id(&id, "escrow")?;
    let req = settle_body(&body)?;
    let movement = state.service.release_escrow(escrow_id, caller.0, req).await?;
    Ok(Json(movement))
}

#[tracing::instrument(skip(state, body), fields(escrow_id = %id, caller = %caller.0.user_id))]
pub async fn refund_escrow<U: UnitOfWork, G: PaymentGateway>(
    State(state): State<Arc<AppState<U, G>>>,
    caller: Caller,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    let escrow_id: EscrowId = parse_path_id(&id, "escrow")?;
    let req = settle_body(&body)?;
    let movement = state.service.refund_escrow(escrow_id, caller.0, req).await?;
    Ok(Json(movement))
}

// ─────────────────────────────────────────────────────────────────────────────
// Payouts
// ─────────────────────────────────────────────────────────────────────────────

#[tracing::instrument(skip(state, req), fields(caller = %caller.0.user_id))]
pub async fn register_payout_account<U: UnitOfWork, G: PaymentGateway>(
    State(state): State<Arc<AppState<U, G>>>,
    caller: Caller,
    Json(req): Json<RegisterPayoutAccountRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let account = state
        .service
        .register_payout_account(caller.0.user_id, req)
        .await?;
    Ok((StatusCode::CREATED, Json(account)))
}

#[tracing::instrument(skip(state, req), fields(caller = %caller.0.user_id, amount = req.amount))]
pub async fn request_withdrawal<U: UnitOfWork, G: PaymentGateway>(
    State(state): State<Arc<AppState<U, G>>>,
    caller: Caller,
    Json(req): Json<WithdrawalRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let response = state
        .service
        .request_withdrawal(caller.0.user_id, req)
        .await?;
    Ok((StatusCode::CREATED, Json(response)))
}

// ─────────────────────────────────────────────────────────────────────────────
// Integration events
// ─────────────────────────────────────────────────────────────────────────────

/// Accepts an event from another bounded context into the outbox.
#[tracing::instrument(skip(state, event), fields(event_type = event.name()))]
pub async fn publish_event<U: UnitOfWork, G: PaymentGateway>(
    State(state): State<Arc<AppState<U, G>>>,
    Json(event): Json<DomainEvent>,
) -> Result<impl IntoResponse, ApiError> {
    let row = state.service.publish_event(event).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(serde_json::json!({
            "id": row.id,
            "event_type": row.event_type,
            "status": row.status,
        })),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    async fn caller_from(headers: &[(&str, &str)]) -> Result<Caller, ApiError> {
        let mut builder = Request::builder().uri("/");
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        let (mut parts, _) = builder.body(()).unwrap().into_parts();
        Caller::from_request_parts(&mut parts, &()).await
    }

    #[tokio::test]
    async fn test_caller_defaults_to_member() {
        let user = UserId::new();
        let id = user.to_string();
        let caller = caller_from(&[(USER_ID_HEADER, id.as_str())]).await.unwrap();
        assert_eq!(caller.0, Actor::member(user));
    }

    #[tokio::test]
    async fn test_caller_arbitrator_role() {
        let id = UserId::new().to_string();
        let caller = caller_from(&[
            (USER_ID_HEADER, id.as_str()),
            (USER_ROLE_HEADER, "Arbitrator"),
        ])
        .await
        .unwrap();
        assert_eq!(caller.0.role, Role::Arbitrator);
    }

    #[tokio::test]
    async fn test_missing_caller_is_unauthorized() {
        let err = caller_from(&[]).await.unwrap_err();
        assert_eq!(err.0.kind(), ErrorKind::Unauthorized);

        let err = caller_from(&[(USER_ID_HEADER, "not-a-uuid")]).await.unwrap_err();
        assert_eq!(err.0.kind(), ErrorKind::Unauthorized);
    }

    #[test]
    fn test_empty_settle_body_means_whole_balance() {
        assert!(settle_body(&Bytes::new()).unwrap().amount.is_none());
        let req = settle_body(&Bytes::from_static(br#"{"amount": 12.5}"#)).unwrap();
        assert_eq!(req.amount, Some(12.5));
        assert!(settle_body(&Bytes::from_static(b"{oops")).is_err());
    }

    #[test]
    fn test_error_kinds_map_to_status() {
        assert_eq!(status_for(ErrorKind::Concurrency), StatusCode::CONFLICT);
        assert_eq!(status_for(ErrorKind::ExternalGateway), StatusCode::BAD_GATEWAY);
        assert_eq!(status_for(ErrorKind::Unauthorized), StatusCode::UNAUTHORIZED);
    }
}

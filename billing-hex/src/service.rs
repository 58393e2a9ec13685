//! Billing Application Service
//!
//! Orchestrates domain operations through the unit-of-work and gateway ports.
//! Contains NO infrastructure logic - pure business orchestration.
//!
//! Every multi-aggregate write happens inside one [`Scope`]; returning early
//! with `?` drops the scope and rolls the whole unit back.

use billing_types::ports::{
    ChargeRequest, EscrowRepository, OutboxRepository, PaymentRepository,
    PayoutAccountRepository, ProviderPaymentStatus, TransferRecipientRequest, TransferRequest,
    WalletRepository, WithdrawalRepository,
};
use billing_types::{
    AccountNumber, Actor, AppError, BankCode, ConcurrencyKind, ContractId, CreateEscrowRequest,
    Currency, DomainEvent, EscrowAccount, EscrowDetails, EscrowId, EscrowMovement, EscrowStatus,
    EscrowTransaction, FundEscrowRequest,
    InitializePaymentRequest, InitializePaymentResponse, Money, OutboxEvent, OutboxStatus,
    Payment, PaymentGateway, PaymentId, PaymentStatus, PaymentStatusResponse, PayoutAccount,
    RegisterPayoutAccountRequest, Scope, SettleEscrowRequest, Transition, UnitOfWork,
    UserId, Wallet, WebhookOutcome, Withdrawal, WithdrawalRequest, WithdrawalResponse,
};
use serde::Deserialize;
use tracing::{error, info, warn};

/// Service-wide settings.
#[derive(Debug, Clone, Default)]
pub struct ServiceConfig {
    /// Where the provider sends the payer after checkout, unless the
    /// request names its own.
    pub callback_url: Option<String>,
    /// Currency used when registering payout recipients.
    pub payout_currency: Currency,
}

/// Application service for wallet, payment, escrow and payout operations.
///
/// Generic over `U: UnitOfWork` and `G: PaymentGateway` - both adapters are
/// injected at compile time.
pub struct BillingService<U: UnitOfWork, G: PaymentGateway> {
    uow: U,
    gateway: G,
    config: ServiceConfig,
}

/// Paystack webhook body; only the fields the payment flow needs.
#[derive(Debug, Deserialize)]
struct ProviderWebhook {
    event: String,
    data: ProviderWebhookData,
}

#[derive(Debug, Deserialize)]
struct ProviderWebhookData {
    reference: String,
    #[serde(default)]
    status: Option<String>,
    /// Minor units actually charged.
    #[serde(default)]
    amount: Option<i64>,
    #[serde(default)]
    currency: Option<String>,
}

/// Attempts at putting a refused payout back before giving up.
const RESTORE_ATTEMPTS: usize = 3;

fn settled_status(status: ProviderPaymentStatus) -> Option<PaymentStatus> {
    match status {
        ProviderPaymentStatus::Success => Some(PaymentStatus::Success),
        ProviderPaymentStatus::Failed => Some(PaymentStatus::Failed),
        ProviderPaymentStatus::Pending => None,
    }
}

/// A provider success only counts when it charged what the payment asked for.
fn confirmed_status(
    payment: &Payment,
    status: PaymentStatus,
    paid: Money,
    currency: &str,
) -> PaymentStatus {
    let matches = paid == payment.amount && currency.eq_ignore_ascii_case(payment.currency.code());
    if status == PaymentStatus::Success && !matches {
        warn!(
            system_reference = %payment.system_reference,
            expected = payment.amount.minor(),
            paid = paid.minor(),
            currency,
            "Provider charge does not match the payment"
        );
        return PaymentStatus::Failed;
    }
    status
}

impl<U: UnitOfWork, G: PaymentGateway> BillingService<U, G> {
    /// Creates a new billing service with the given adapters.
    pub fn new(uow: U, gateway: G, config: ServiceConfig) -> Self {
        Self {
            uow,
            gateway,
            config,
        }
    }

    /// Returns a reference to the unit-of-work factory.
    pub fn uow(&self) -> &U {
        &self.uow
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Wallets
    // ─────────────────────────────────────────────────────────────────────────────

    /// Opens a wallet for a user, or returns the one they already have.
    #[tracing::instrument(skip(self))]
    pub async fn create_wallet(&self, user_id: UserId) -> Result<Wallet, AppError> {
        let opened = async {
            let mut scope = self.uow.begin().await?;
            let wallet = ensure_wallet(&mut scope, user_id).await?;
            scope.commit().await?;
            Ok::<_, AppError>(wallet)
        }
        .await;

        match opened {
            // a concurrent registration won, at insert or at commit
            Err(e @ (AppError::Conflict(_) | AppError::Concurrency(_))) => {
                let mut scope = self.uow.begin().await?;
                scope.find_wallet_by_user(user_id).await?.ok_or(e)
            }
            other => other,
        }
    }

    #[tracing::instrument(skip(self))]
    pub async fn get_wallet(&self, user_id: UserId) -> Result<Wallet, AppError> {
        let mut scope = self.uow.begin().await?;
        scope
            .find_wallet_by_user(user_id)
            .await?
            .ok_or_else(|| AppError::WalletNotFound(format!("user {}", user_id)))
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Payments
    // ─────────────────────────────────────────────────────────────────────────────

    /// Starts a provider checkout that will fund a wallet.
    ///
    /// The payment row is written only after the provider accepted the
    /// initialization, so a failing provider leaves nothing behind.
    #[tracing::instrument(skip(self, req), fields(wallet_id = %req.wallet_id, amount = req.amount))]
    pub async fn initialize_payment(
        &self,
        req: InitializePaymentRequest,
    ) -> Result<InitializePaymentResponse, AppError> {
        let amount = Money::from_major(req.amount)?;
        let mut payment = Payment::new(req.wallet_id, amount, req.currency, req.email)?;

        {
            let mut scope = self.uow.begin().await?;
            scope
                .find_wallet(req.wallet_id)
                .await?
                .ok_or_else(|| AppError::WalletNotFound(req.wallet_id.to_string()))?;
        }

        let authorization = self
            .gateway
            .initialize_payment(ChargeRequest {
                amount: payment.amount,
                currency: payment.currency,
                email: payment.email.clone(),
                reference: payment.system_reference.clone(),
                callback_url: req.callback_url.or_else(|| self.config.callback_url.clone()),
            })
            .await
            .inspect_err(|e| warn!("Payment initialization rejected: {}", e))?;

        payment.attach_provider(authorization.reference, authorization.authorization_url);

        let mut scope = self.uow.begin().await?;
        scope.insert_payment(&payment).await?;
        scope.commit().await?;

        info!(
            system_reference = %payment.system_reference,
            "Payment initialized"
        );

        Ok(InitializePaymentResponse {
            payment_id: payment.id,
            system_reference: payment.system_reference,
            provider_reference: payment.provider_reference.unwrap_or_default(),
            authorization_url: payment.authorization_url.unwrap_or_default(),
        })
    }

    /// Reports a payment's status, asking the provider only while it is pending.
    #[tracing::instrument(skip(self))]
    pub async fn verify_payment_status(
        &self,
        system_reference: &str,
    ) -> Result<PaymentStatusResponse, AppError> {
        let payment = {
            let mut scope = self.uow.begin().await?;
            scope
                .find_payment_by_system_reference(system_reference)
                .await?
                .ok_or_else(|| AppError::PaymentNotFound(system_reference.to_string()))?
        };

        if payment.status.is_terminal() {
            return Ok(status_response(&payment));
        }

        let provider_reference = payment
            .provider_reference
            .clone()
            .ok_or_else(|| AppError::ReferenceNotFound(system_reference.to_string()))?;

        let verification = self.gateway.verify_payment(&provider_reference).await?;

        let payment = match settled_status(verification.status) {
            Some(status) => {
                let status = confirmed_status(
                    &payment,
                    status,
                    verification.amount,
                    &verification.currency,
                );
                self.settle_payment(payment.id, status).await?.0
            }
            None => payment,
        };

        Ok(status_response(&payment))
    }

    /// Applies a provider webhook.
    ///
    /// The signature is checked against `raw_body` exactly as received;
    /// a missing or wrong signature is rejected before anything is parsed.
    /// A success must carry the charged amount and currency, and settles
    /// the payment as FAILED when they differ from what was initialized.
    #[tracing::instrument(skip(self, raw_body, signature), fields(body_len = raw_body.len()))]
    pub async fn handle_provider_webhook(
        &self,
        raw_body: &[u8],
        signature: Option<&str>,
    ) -> Result<WebhookOutcome, AppError> {
        let authentic = signature.is_some_and(|sig| self.gateway.verify_signature(raw_body, sig));
        if !authentic {
            warn!("Rejected webhook with invalid signature");
            return Err(AppError::UnauthorizedWebhook);
        }

        let webhook: ProviderWebhook = serde_json::from_slice(raw_body)
            .map_err(|e| AppError::Validation(format!("Malformed webhook payload: {}", e)))?;

        if !webhook.event.starts_with("charge.") {
            info!(event = %webhook.event, "Ignoring non-charge webhook");
            return Ok(WebhookOutcome::Ignored);
        }

        let payment = {
            let mut scope = self.uow.begin().await?;
            scope
                .find_payment_by_provider_reference(&webhook.data.reference)
                .await?
                .ok_or_else(|| AppError::ReferenceNotFound(webhook.data.reference.clone()))?
        };

        let provider_status = if webhook.event == "charge.success" {
            ProviderPaymentStatus::Success
        } else {
            webhook
                .data
                .status
                .as_deref()
                .map(ProviderPaymentStatus::from_provider)
                .unwrap_or(ProviderPaymentStatus::Pending)
        };

        let Some(status) = settled_status(provider_status) else {
            return Ok(WebhookOutcome::Ignored);
        };

        let status = match (status, webhook.data.amount, webhook.data.currency.as_deref()) {
            (PaymentStatus::Success, Some(paid), Some(currency)) => {
                confirmed_status(&payment, status, Money::from_minor(paid)?, currency)
            }
            (PaymentStatus::Success, _, _) => {
                return Err(AppError::Validation(
                    "Successful charge webhook must carry amount and currency".into(),
                ));
            }
            (other, _, _) => other,
        };

        let (payment, transition) = self.settle_payment(payment.id, status).await?;
        Ok(match transition {
            Transition::Applied => WebhookOutcome::Applied {
                system_reference: payment.system_reference,
                status: payment.status,
            },
            Transition::Unchanged => WebhookOutcome::AlreadySettled {
                system_reference: payment.system_reference,
            },
        })
    }

    /// Moves a payment to a terminal status in its own unit of work.
    ///
    /// A success also queues `payment.succeeded`, which is what credits the
    /// wallet. An already-terminal payment is returned untouched.
    async fn settle_payment(
        &self,
        payment_id: PaymentId,
        status: PaymentStatus,
    ) -> Result<(Payment, Transition), AppError> {
        let mut scope = self.uow.begin().await?;
        let mut payment = scope
            .find_payment(payment_id)
            .await?
            .ok_or_else(|| AppError::PaymentNotFound(payment_id.to_string()))?;

        if payment.transition(status) == Transition::Unchanged {
            return Ok((payment, Transition::Unchanged));
        }

        scope.update_payment(&mut payment).await?;
        if payment.status == PaymentStatus::Success {
            let event = OutboxEvent::new(&DomainEvent::PaymentSucceeded {
                payment_id: payment.id,
                wallet_id: payment.wallet_id,
                amount: payment.amount,
            })?;
            scope.insert_event(&event).await?;
        }
        scope.commit().await?;

        info!(
            system_reference = %payment.system_reference,
            status = %payment.status,
            "Payment settled"
        );
        Ok((payment, Transition::Applied))
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Escrow
    // ─────────────────────────────────────────────────────────────────────────────

    /// Opens the escrow for a contract, or returns the existing one.
    #[tracing::instrument(skip(self, req), fields(contract_id = %req.contract_id))]
    pub async fn create_escrow(&self, req: CreateEscrowRequest) -> Result<EscrowAccount, AppError> {
        let amount = Money::from_major(req.amount)?;

        let opened = async {
            let mut scope = self.uow.begin().await?;
            let escrow = ensure_escrow(
                &mut scope,
                req.contract_id,
                req.creator_id,
                req.freelancer_id,
                amount,
            )
            .await?;
            scope.commit().await?;
            Ok::<_, AppError>(escrow)
        }
        .await;

        match opened {
            Err(e @ (AppError::Conflict(_) | AppError::Concurrency(_))) => {
                let mut scope = self.uow.begin().await?;
                scope.find_escrow_by_contract(req.contract_id).await?.ok_or(e)
            }
            other => other,
        }
    }

    /// Loads an escrow with its ledger, oldest line first.
    #[tracing::instrument(skip(self))]
    pub async fn get_escrow(&self, escrow_id: EscrowId) -> Result<EscrowDetails, AppError> {
        let mut scope = self.uow.begin().await?;
        let escrow = scope
            .find_escrow(escrow_id)
            .await?
            .ok_or_else(|| AppError::EscrowNotFound(escrow_id.to_string()))?;
        let transactions = scope.list_escrow_transactions(escrow_id).await?;
        Ok(EscrowDetails {
            escrow,
            transactions,
        })
    }

    /// Moves money from the creator's wallet into the escrow.
    ///
    /// Wallet debit, escrow credit and the FUND ledger line commit together.
    #[tracing::instrument(skip(self, req), fields(amount = req.amount))]
    pub async fn fund_escrow(
        &self,
        escrow_id: EscrowId,
        funding_user: UserId,
        req: FundEscrowRequest,
    ) -> Result<EscrowMovement, AppError> {
        let amount = Money::from_major(req.amount)?;

        let mut scope = self.uow.begin().await?;
        let mut escrow = scope
            .find_escrow(escrow_id)
            .await?
            .ok_or_else(|| AppError::EscrowNotFound(escrow_id.to_string()))?;

        if !escrow.can_fund(funding_user) {
            return Err(AppError::Forbidden(
                "Only the contract creator can fund this escrow".into(),
            ));
        }

        let mut wallet = scope
            .find_wallet_by_user(escrow.creator_id)
            .await?
            .ok_or_else(|| AppError::WalletNotFound(format!("user {}", escrow.creator_id)))?;

        let mut entry = escrow.fund(amount)?;
        wallet.debit(amount)?;
        entry.complete()?;

        scope.update_wallet(&mut wallet).await?;
        scope.update_escrow(&mut escrow).await?;
        scope.insert_escrow_transaction(&entry).await?;
        scope.commit().await?;

        info!(
            escrow_id = %escrow.id,
            balance = escrow.balance.minor(),
            status = escrow.status.as_str(),
            "Escrow funded"
        );

        Ok(EscrowMovement {
            escrow,
            transaction: entry,
        })
    }

    /// Pays escrowed money out to the freelancer's verified bank account.
    ///
    /// The payout is claimed before the provider is called: the escrow
    /// decrement and a PENDING RELEASE line commit first, so a concurrent
    /// release fails on the escrow version and never reaches the gateway.
    /// The line then settles as SUCCESS. A refused transfer settles it as
    /// FAILED and puts the amount back; a transfer with an unknown outcome
    /// stays PENDING under its reference for reconciliation.
    #[tracing::instrument(skip(self, actor, req), fields(actor = %actor.user_id))]
    pub async fn release_escrow(
        &self,
        escrow_id: EscrowId,
        actor: Actor,
        req: SettleEscrowRequest,
    ) -> Result<EscrowMovement, AppError> {
        let amount = req.amount.map(Money::from_major).transpose()?;

        let mut scope = self.uow.begin().await?;
        let mut escrow = scope
            .find_escrow(escrow_id)
            .await?
            .ok_or_else(|| AppError::EscrowNotFound(escrow_id.to_string()))?;

        if !escrow.can_release(&actor) {
            return Err(AppError::Forbidden(
                "Only the contract creator or an arbitrator can release this escrow".into(),
            ));
        }

        let payout = scope
            .find_payout_account_by_user(escrow.freelancer_id)
            .await?
            .ok_or_else(|| AppError::PayoutAccountNotFound(escrow.freelancer_id.to_string()))?;

        let status_before = escrow.status;
        let mut entry = escrow.release(amount)?;
        scope.update_escrow(&mut escrow).await?;
        scope.insert_escrow_transaction(&entry).await?;
        scope.commit().await?;

        let transfer = self
            .gateway
            .initiate_transfer(TransferRequest {
                amount: entry.amount,
                recipient_code: payout.recipient_code.clone(),
                reference: entry.reference.clone(),
                reason: format!("Escrow release for contract {}", escrow.contract_id),
            })
            .await;

        let receipt = match transfer {
            Ok(receipt) => receipt,
            Err(e) if e.outcome_unknown() => {
                error!(
                    escrow_id = %escrow.id,
                    reference = %entry.reference,
                    "Payout outcome unknown, claim left pending: {}",
                    e
                );
                return Err(e.into());
            }
            Err(e) => {
                warn!(escrow_id = %escrow.id, "Escrow payout refused: {}", e);
                if let Err(restore) = self.restore_release(&escrow, &entry, status_before).await {
                    error!(
                        escrow_id = %escrow.id,
                        reference = %entry.reference,
                        "Refused payout could not be put back: {}",
                        restore
                    );
                }
                return Err(e.into());
            }
        };

        entry.complete()?;
        let recorded = async {
            let mut scope = self.uow.begin().await?;
            scope.settle_escrow_transaction(&entry).await?;
            scope.commit().await
        }
        .await;
        if let Err(e) = recorded {
            error!(
                escrow_id = %escrow.id,
                transfer_code = %receipt.transfer_code,
                "Payout sent but its ledger line is still pending: {}",
                e
            );
            return Err(e.into());
        }

        info!(
            escrow_id = %escrow.id,
            amount = entry.amount.minor(),
            transfer_code = %receipt.transfer_code,
            "Escrow released"
        );

        Ok(EscrowMovement {
            escrow,
            transaction: entry,
        })
    }

    /// Undoes a release claim whose transfer the provider refused.
    ///
    /// The escrow gets its pre-claim status back unless something else
    /// moved it in between, in which case money has left and it is
    /// `SETTLING`.
    async fn restore_release(
        &self,
        claimed: &EscrowAccount,
        entry: &EscrowTransaction,
        status_before: EscrowStatus,
    ) -> Result<(), AppError> {
        let mut failed = entry.clone();
        failed.fail()?;

        for _ in 0..RESTORE_ATTEMPTS {
            let attempt = async {
                let mut scope = self.uow.begin().await?;
                let mut escrow = scope
                    .find_escrow(claimed.id)
                    .await?
                    .ok_or_else(|| AppError::EscrowNotFound(claimed.id.to_string()))?;
                let status = if escrow.version == claimed.version {
                    status_before
                } else {
                    EscrowStatus::Settling
                };
                escrow.restore(entry.amount, status)?;
                scope.update_escrow(&mut escrow).await?;
                scope.settle_escrow_transaction(&failed).await?;
                scope.commit().await?;
                Ok::<_, AppError>(())
            }
            .await;

            match attempt {
                Err(AppError::Concurrency(_)) => continue,
                other => return other,
            }
        }
        Err(AppError::Concurrency(ConcurrencyKind::EscrowModified))
    }

    /// Returns escrowed money to the creator's wallet.
    #[tracing::instrument(skip(self, actor, req), fields(actor = %actor.user_id))]
    pub async fn refund_escrow(
        &self,
        escrow_id: EscrowId,
        actor: Actor,
        req: SettleEscrowRequest,
    ) -> Result<EscrowMovement, AppError> {
        let amount = req.amount.map(Money::from_major).transpose()?;

        let mut scope = self.uow.begin().await?;
        let mut escrow = scope
            .find_escrow(escrow_id)
            .await?
            .ok_or_else(|| AppError::EscrowNotFound(escrow_id.to_string()))?;

        if !escrow.can_refund(&actor) {
            return Err(AppError::Forbidden(
                "Only the freelancer or an arbitrator can refund this escrow".into(),
            ));
        }

        let mut wallet = scope
            .find_wallet_by_user(escrow.creator_id)
            .await?
            .ok_or_else(|| AppError::WalletNotFound(format!("user {}", escrow.creator_id)))?;

        let mut entry = escrow.refund(amount)?;
        wallet.credit(entry.amount)?;
        entry.complete()?;

        scope.update_wallet(&mut wallet).await?;
        scope.update_escrow(&mut escrow).await?;
        scope.insert_escrow_transaction(&entry).await?;
        scope.commit().await?;

        info!(
            escrow_id = %escrow.id,
            amount = entry.amount.minor(),
            "Escrow refunded"
        );

        Ok(EscrowMovement {
            escrow,
            transaction: entry,
        })
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Payouts
    // ─────────────────────────────────────────────────────────────────────────────

    /// Verifies a bank destination with the provider and stores it once.
    #[tracing::instrument(skip(self, req), fields(bank_code = %req.bank_code))]
    pub async fn register_payout_account(
        &self,
        user_id: UserId,
        req: RegisterPayoutAccountRequest,
    ) -> Result<PayoutAccount, AppError> {
        let account_number = AccountNumber::parse(&req.account_number)?;
        let bank_code = BankCode::parse(&req.bank_code)?;
        let account_name = non_empty_name(&req.account_name)?;

        {
            let mut scope = self.uow.begin().await?;
            if scope.find_payout_account_by_user(user_id).await?.is_some() {
                return Err(AppError::Conflict(format!(
                    "User {} already has a payout account",
                    user_id
                )));
            }
        }

        let recipient = self
            .gateway
            .get_transfer_recipient(TransferRecipientRequest {
                name: account_name,
                account_number: account_number.clone(),
                bank_code: bank_code.clone(),
                currency: self.config.payout_currency,
            })
            .await?;

        let account = PayoutAccount::verified(
            user_id,
            recipient.verified_account_name,
            account_number,
            bank_code,
            recipient.recipient_code,
        );

        let mut scope = self.uow.begin().await?;
        scope.insert_payout_account(&account).await?;
        scope.commit().await?;

        info!(user_id = %user_id, "Payout account registered");
        Ok(account)
    }

    /// Debits a wallet toward a provider-verified bank account.
    ///
    /// The recipient is re-verified on every request. The verified account is
    /// kept as the user's payout account when they do not have one yet.
    #[tracing::instrument(skip(self, req), fields(amount = req.amount, bank_code = %req.bank_code))]
    pub async fn request_withdrawal(
        &self,
        user_id: UserId,
        req: WithdrawalRequest,
    ) -> Result<WithdrawalResponse, AppError> {
        let amount = Money::from_major(req.amount)?;
        if amount.is_zero() {
            return Err(AppError::Validation(
                "Withdrawal amount must be greater than zero".into(),
            ));
        }
        let account_number = AccountNumber::parse(&req.account_number)?;
        let bank_code = BankCode::parse(&req.bank_code)?;
        let account_name = non_empty_name(&req.account_name)?;

        {
            let mut scope = self.uow.begin().await?;
            let wallet = scope
                .find_wallet_by_user(user_id)
                .await?
                .ok_or_else(|| AppError::WalletNotFound(format!("user {}", user_id)))?;
            if wallet.balance < amount {
                return Err(AppError::InsufficientFunds {
                    available: wallet.balance.minor(),
                    requested: amount.minor(),
                });
            }
        }

        let recipient = self
            .gateway
            .get_transfer_recipient(TransferRecipientRequest {
                name: account_name,
                account_number: account_number.clone(),
                bank_code: bank_code.clone(),
                currency: self.config.payout_currency,
            })
            .await?;

        let mut scope = self.uow.begin().await?;
        let mut wallet = scope
            .find_wallet_by_user(user_id)
            .await?
            .ok_or_else(|| AppError::WalletNotFound(format!("user {}", user_id)))?;

        wallet.debit(amount)?;
        scope.update_wallet(&mut wallet).await?;

        let withdrawal = Withdrawal::pending(
            user_id,
            wallet.id,
            amount,
            recipient.recipient_code.clone(),
            account_number.clone(),
            bank_code.clone(),
        );
        scope.insert_withdrawal(&withdrawal).await?;

        if scope.find_payout_account_by_user(user_id).await?.is_none() {
            let account = PayoutAccount::verified(
                user_id,
                recipient.verified_account_name,
                account_number,
                bank_code,
                recipient.recipient_code,
            );
            scope.insert_payout_account(&account).await?;
        }
        scope.commit().await?;

        info!(
            reference = %withdrawal.reference,
            new_balance = wallet.balance.minor(),
            "Withdrawal requested"
        );

        Ok(WithdrawalResponse {
            withdrawal_id: withdrawal.id,
            reference: withdrawal.reference,
            amount: withdrawal.amount.minor(),
            new_balance: wallet.balance.minor(),
            status: withdrawal.status,
        })
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Outbox
    // ─────────────────────────────────────────────────────────────────────────────

    /// Queues an integration event for the dispatcher.
    #[tracing::instrument(skip(self, event), fields(event_type = event.name()))]
    pub async fn publish_event(&self, event: DomainEvent) -> Result<OutboxEvent, AppError> {
        let row = OutboxEvent::new(&event)?;
        let mut scope = self.uow.begin().await?;
        scope.insert_event(&row).await?;
        scope.commit().await?;
        Ok(row)
    }

    /// Oldest pending events, at most `limit`.
    pub async fn pending_events(&self, limit: i64) -> Result<Vec<OutboxEvent>, AppError> {
        let mut scope = self.uow.begin().await?;
        Ok(scope.pending_events(limit).await?)
    }

    /// Applies one outbox event and marks it completed in the same unit of
    /// work, so a handled event is never applied twice.
    #[tracing::instrument(skip(self, row), fields(event_id = %row.id, event_type = %row.event_type))]
    pub async fn handle_event(&self, row: &OutboxEvent) -> Result<(), AppError> {
        let event = row.decode()?;
        let mut scope = self.uow.begin().await?;

        match event {
            DomainEvent::UserRegistered { user_id } => {
                ensure_wallet(&mut scope, user_id).await?;
            }
            DomainEvent::ContractCreated {
                contract_id,
                creator_id,
                freelancer_id,
                amount,
            } => {
                ensure_escrow(&mut scope, contract_id, creator_id, freelancer_id, amount).await?;
            }
            DomainEvent::PaymentSucceeded {
                payment_id,
                wallet_id,
                amount,
            } => {
                let mut wallet = scope
                    .find_wallet(wallet_id)
                    .await?
                    .ok_or_else(|| AppError::WalletNotFound(wallet_id.to_string()))?;
                wallet.credit(amount)?;
                scope.update_wallet(&mut wallet).await?;
                info!(
                    payment_id = %payment_id,
                    balance = wallet.balance.minor(),
                    "Wallet credited"
                );
            }
        }

        scope
            .mark_event(row.id, OutboxStatus::Completed, None)
            .await?;
        scope.commit().await?;
        Ok(())
    }

    /// Records a failed dispatch attempt; the event gives up after
    /// `max_attempts`.
    pub async fn record_event_failure(
        &self,
        row: &OutboxEvent,
        reason: &str,
        max_attempts: i32,
    ) -> Result<OutboxStatus, AppError> {
        let status = if row.attempts + 1 >= max_attempts {
            OutboxStatus::Failed
        } else {
            OutboxStatus::Pending
        };

        let mut scope = self.uow.begin().await?;
        scope
            .mark_event(row.id, status, Some(reason.to_string()))
            .await?;
        scope.commit().await?;
        Ok(status)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────────────────────────

async fn ensure_wallet<S: Scope>(scope: &mut S, user_id: UserId) -> Result<Wallet, AppError> {
    if let Some(existing) = scope.find_wallet_by_user(user_id).await? {
        return Ok(existing);
    }
    let wallet = Wallet::new(user_id);
    scope.insert_wallet(&wallet).await?;
    info!(user_id = %user_id, wallet_id = %wallet.id, "Wallet created");
    Ok(wallet)
}

async fn ensure_escrow<S: Scope>(
    scope: &mut S,
    contract_id: ContractId,
    creator_id: UserId,
    freelancer_id: UserId,
    amount: Money,
) -> Result<EscrowAccount, AppError> {
    if let Some(existing) = scope.find_escrow_by_contract(contract_id).await? {
        return Ok(existing);
    }
    let escrow = EscrowAccount::new(contract_id, creator_id, freelancer_id, amount)?;
    scope.insert_escrow(&escrow).await?;
    info!(contract_id = %contract_id, escrow_id = %escrow.id, "Escrow created");
    Ok(escrow)
}

fn non_empty_name(name: &str) -> Result<String, AppError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(AppError::Validation("Account name is required".into()));
    }
    Ok(name.to_string())
}

fn status_response(payment: &Payment) -> PaymentStatusResponse {
    PaymentStatusResponse {
        system_reference: payment.system_reference.clone(),
        status: payment.status,
        amount: payment.amount.minor(),
    }
}

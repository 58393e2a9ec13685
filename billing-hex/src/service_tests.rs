//! BillingService unit tests.

#[cfg(test)]
pub(crate) mod tests {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;

    use billing_repo::MemoryStore;
    use billing_repo::security::sign_payload;
    use billing_types::ports::{
        ChargeRequest, GatewayError, PaymentAuthorization, PaymentVerification,
        ProviderPaymentStatus, TransferReceipt, TransferRecipient, TransferRecipientRequest,
        TransferRequest,
    };
    use billing_types::{
        Actor, AppError, ConcurrencyKind, ContractId, CreateEscrowRequest, Currency, DomainEvent,
        EscrowId, EscrowStatus, EscrowTransactionStatus, EscrowTransactionType, FundEscrowRequest, InitializePaymentRequest, Money,
        OutboxStatus, PaymentGateway, PaymentStatus, RegisterPayoutAccountRequest,
        SettleEscrowRequest, UserId, WalletId, WebhookOutcome, WithdrawalRequest, ledger_balance,
    };

    use crate::{BillingService, DispatcherConfig, DrainReport, OutboxDispatcher, ServiceConfig};

    pub const WEBHOOK_SECRET: &str = "sk_test_webhook_secret";

    #[derive(Default)]
    struct Script {
        verify_status: Mutex<Option<ProviderPaymentStatus>>,
        /// What each checkout asked for, by provider reference.
        charges: Mutex<HashMap<String, (Money, Currency)>>,
        paid: Mutex<Option<(Money, String)>>,
        fail_initialize: AtomicBool,
        fail_transfer: AtomicBool,
        time_out_transfer: AtomicBool,
        transfers: Mutex<Vec<TransferRequest>>,
        recipient_lookups: Mutex<u32>,
    }

    /// Provider fake whose answers each test can steer.
    #[derive(Clone, Default)]
    pub struct ScriptedGateway {
        script: Arc<Script>,
    }

    impl ScriptedGateway {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn set_verify_status(&self, status: ProviderPaymentStatus) {
            *self.script.verify_status.lock().unwrap() = Some(status);
        }

        /// Reports `amount` in `currency` as charged, whatever the checkout asked for.
        pub fn set_paid(&self, amount: Money, currency: &str) {
            *self.script.paid.lock().unwrap() = Some((amount, currency.to_string()));
        }

        pub fn fail_initialize(&self, fail: bool) {
            self.script.fail_initialize.store(fail, Ordering::SeqCst);
        }

        pub fn fail_transfer(&self, fail: bool) {
            self.script.fail_transfer.store(fail, Ordering::SeqCst);
        }

        pub fn time_out_transfer(&self, time_out: bool) {
            self.script.time_out_transfer.store(time_out, Ordering::SeqCst);
        }

        pub fn transfers(&self) -> Vec<TransferRequest> {
            self.script.transfers.lock().unwrap().clone()
        }

        pub fn recipient_lookups(&self) -> u32 {
            *self.script.recipient_lookups.lock().unwrap()
        }
    }

    #[async_trait]
    impl PaymentGateway for ScriptedGateway {
        async fn initialize_payment(
            &self,
            req: ChargeRequest,
        ) -> Result<PaymentAuthorization, GatewayError> {
            if self.script.fail_initialize.load(Ordering::SeqCst) {
                return Err(GatewayError::Unavailable("provider down".into()));
            }
            let reference = format!("PSK_{}", req.reference);
            self.script
                .charges
                .lock()
                .unwrap()
                .insert(reference.clone(), (req.amount, req.currency));
            Ok(PaymentAuthorization {
                authorization_url: format!("https://checkout.test/{}", req.reference),
                access_code: Some("access".into()),
                reference,
            })
        }

        async fn verify_payment(
            &self,
            provider_reference: &str,
        ) -> Result<PaymentVerification, GatewayError> {
            let status = self
                .script
                .verify_status
                .lock()
                .unwrap()
                .unwrap_or(ProviderPaymentStatus::Success);
            let charged = self
                .script
                .charges
                .lock()
                .unwrap()
                .get(provider_reference)
                .map(|(amount, currency)| (*amount, currency.code().to_string()));
            let (amount, currency) = self
                .script
                .paid
                .lock()
                .unwrap()
                .clone()
                .or(charged)
                .ok_or_else(|| GatewayError::Rejected("Transaction reference not found".into()))?;
            Ok(PaymentVerification {
                status,
                amount,
                currency,
                paid_at: None,
            })
        }

        fn verify_signature(&self, raw_body: &[u8], signature: &str) -> bool {
            billing_repo::security::verify_signature(raw_body, signature, WEBHOOK_SECRET)
        }

        async fn get_transfer_recipient(
            &self,
            req: TransferRecipientRequest,
        ) -> Result<TransferRecipient, GatewayError> {
            tokio::task::yield_now().await;
            *self.script.recipient_lookups.lock().unwrap() += 1;
            Ok(TransferRecipient {
                recipient_code: format!("RCP_{}", req.account_number.as_str()),
                verified_account_name: req.name.to_uppercase(),
                account_number: req.account_number.as_str().to_string(),
            })
        }

        async fn initiate_transfer(
            &self,
            req: TransferRequest,
        ) -> Result<TransferReceipt, GatewayError> {
            // network round-trip
            tokio::task::yield_now().await;
            if self.script.fail_transfer.load(Ordering::SeqCst) {
                return Err(GatewayError::Rejected("insufficient balance".into()));
            }
            if self.script.time_out_transfer.load(Ordering::SeqCst) {
                return Err(GatewayError::Timeout);
            }
            let receipt = TransferReceipt {
                transfer_code: format!("TRF_{}", req.reference),
                status: "pending".into(),
            };
            self.script.transfers.lock().unwrap().push(req);
            Ok(receipt)
        }
    }

    type TestService = BillingService<MemoryStore, ScriptedGateway>;

    struct Harness {
        service: Arc<TestService>,
        store: MemoryStore,
        gateway: ScriptedGateway,
    }

    impl Harness {
        fn new() -> Self {
            let store = MemoryStore::new();
            let gateway = ScriptedGateway::new();
            let service = Arc::new(BillingService::new(
                store.clone(),
                gateway.clone(),
                ServiceConfig::default(),
            ));
            Self {
                service,
                store,
                gateway,
            }
        }

        fn dispatcher(&self, max_attempts: i32) -> OutboxDispatcher<MemoryStore, ScriptedGateway> {
            OutboxDispatcher::new(
                self.service.clone(),
                DispatcherConfig {
                    max_attempts,
                    ..DispatcherConfig::default()
                },
            )
        }

        async fn drain(&self) -> DrainReport {
            self.dispatcher(5).drain_once().await.unwrap()
        }

        /// Wallet for `user_id` holding `major` after a successful checkout.
        async fn funded_wallet(&self, user_id: UserId, major: f64) -> WalletId {
            let wallet = self.service.create_wallet(user_id).await.unwrap();
            let init = self
                .service
                .initialize_payment(payment_request(wallet.id, major))
                .await
                .unwrap();
            self.service
                .verify_payment_status(&init.system_reference)
                .await
                .unwrap();
            self.drain().await;
            wallet.id
        }

        async fn escrow(&self, creator: UserId, freelancer: UserId, major: f64) -> EscrowId {
            self.service
                .create_escrow(CreateEscrowRequest {
                    contract_id: ContractId::new(),
                    creator_id: creator,
                    freelancer_id: freelancer,
                    amount: major,
                })
                .await
                .unwrap()
                .id
        }

        async fn payout_account(&self, user_id: UserId) {
            self.service
                .register_payout_account(user_id, payout_request())
                .await
                .unwrap();
        }
    }

    fn payment_request(wallet_id: WalletId, amount: f64) -> InitializePaymentRequest {
        InitializePaymentRequest {
            wallet_id,
            email: "payer@example.com".into(),
            amount,
            currency: Currency::NGN,
            callback_url: None,
        }
    }

    fn payout_request() -> RegisterPayoutAccountRequest {
        RegisterPayoutAccountRequest {
            account_name: "Ada Obi".into(),
            account_number: "0123456789".into(),
            bank_code: "058".into(),
        }
    }

    fn withdrawal_request(amount: f64) -> WithdrawalRequest {
        WithdrawalRequest {
            amount,
            account_name: "Ada Obi".into(),
            account_number: "0123456789".into(),
            bank_code: "058".into(),
        }
    }

    /// Charge event body reporting `amount` minor units of NGN.
    fn charge_webhook(event: &str, provider_reference: &str, amount: i64) -> Vec<u8> {
        serde_json::json!({
            "event": event,
            "data": {
                "reference": provider_reference,
                "status": "success",
                "amount": amount,
                "currency": "NGN"
            }
        })
        .to_string()
        .into_bytes()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Wallets
    // ─────────────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_create_wallet_is_idempotent() {
        let h = Harness::new();
        let user = UserId::new();

        let first = h.service.create_wallet(user).await.unwrap();
        let second = h.service.create_wallet(user).await.unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(second.balance, Money::ZERO);
    }

    #[tokio::test]
    async fn test_racing_registrations_share_one_wallet() {
        let h = Harness::new();
        let user = UserId::new();

        let (a, b) = tokio::join!(h.service.create_wallet(user), h.service.create_wallet(user));
        assert_eq!(a.unwrap().id, b.unwrap().id);
    }

    #[cfg(feature = "sqlite")]
    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_racing_registrations_on_sqlite_file() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}", dir.path().join("billing.db").display());
        let store = billing_repo::SqliteStore::new(&url).await.unwrap();
        let service = Arc::new(BillingService::new(
            store,
            ScriptedGateway::new(),
            ServiceConfig::default(),
        ));

        for _ in 0..5 {
            let user = UserId::new();
            let (a, b) = tokio::join!(service.create_wallet(user), service.create_wallet(user));
            assert_eq!(a.unwrap().id, b.unwrap().id);
        }
    }

    #[tokio::test]
    async fn test_get_wallet_not_found() {
        let h = Harness::new();
        let result = h.service.get_wallet(UserId::new()).await;
        assert!(matches!(result, Err(AppError::WalletNotFound(_))));
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Payments
    // ─────────────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_payment_to_release_scenario() {
        let h = Harness::new();
        let creator = UserId::new();
        let freelancer = UserId::new();

        let wallet = h.service.create_wallet(creator).await.unwrap();
        let init = h
            .service
            .initialize_payment(payment_request(wallet.id, 500.0))
            .await
            .unwrap();
        assert!(init.authorization_url.contains(&init.system_reference));

        let status = h
            .service
            .verify_payment_status(&init.system_reference)
            .await
            .unwrap();
        assert_eq!(status.status, PaymentStatus::Success);
        assert_eq!(status.amount, 50000);

        // the credit only lands once the outbox is drained
        assert_eq!(h.service.get_wallet(creator).await.unwrap().balance, Money::ZERO);
        let report = h.drain().await;
        assert_eq!(report.completed, 1);
        assert_eq!(
            h.service.get_wallet(creator).await.unwrap().balance.minor(),
            50000
        );

        let escrow_id = h.escrow(creator, freelancer, 300.0).await;
        h.payout_account(freelancer).await;

        let funded = h
            .service
            .fund_escrow(escrow_id, creator, FundEscrowRequest { amount: 300.0 })
            .await
            .unwrap();
        assert_eq!(funded.escrow.status, EscrowStatus::Funded);
        assert_eq!(funded.escrow.balance.minor(), 30000);
        assert_eq!(
            h.service.get_wallet(creator).await.unwrap().balance.minor(),
            20000
        );

        let released = h
            .service
            .release_escrow(escrow_id, Actor::member(creator), SettleEscrowRequest::default())
            .await
            .unwrap();
        assert_eq!(released.escrow.status, EscrowStatus::Released);
        assert_eq!(released.escrow.balance, Money::ZERO);
        assert_eq!(released.transaction.amount.minor(), 30000);

        let details = h.service.get_escrow(escrow_id).await.unwrap();
        let releases: Vec<_> = details
            .transactions
            .iter()
            .filter(|t| t.transaction_type == EscrowTransactionType::Release)
            .collect();
        assert_eq!(releases.len(), 1);
        assert_eq!(releases[0].amount.minor(), 30000);
        assert_eq!(ledger_balance(&details.transactions), 0);

        let transfers = h.gateway.transfers();
        assert_eq!(transfers.len(), 1);
        assert_eq!(transfers[0].recipient_code, "RCP_0123456789");
        assert_eq!(transfers[0].reference, releases[0].reference);
    }

    #[tokio::test]
    async fn test_initialize_payment_gateway_failure_persists_nothing() {
        let h = Harness::new();
        let wallet = h.service.create_wallet(UserId::new()).await.unwrap();
        h.gateway.fail_initialize(true);

        let result = h
            .service
            .initialize_payment(payment_request(wallet.id, 100.0))
            .await;

        assert!(matches!(result, Err(AppError::ExternalGateway(_))));
        assert!(h.store.outbox_events().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_initialize_payment_unknown_wallet() {
        let h = Harness::new();
        let result = h
            .service
            .initialize_payment(payment_request(WalletId::new(), 100.0))
            .await;
        assert!(matches!(result, Err(AppError::WalletNotFound(_))));
    }

    #[tokio::test]
    async fn test_initialize_payment_rejects_zero_amount() {
        let h = Harness::new();
        let wallet = h.service.create_wallet(UserId::new()).await.unwrap();
        let result = h
            .service
            .initialize_payment(payment_request(wallet.id, 0.0))
            .await;
        assert!(matches!(result, Err(AppError::Validation(_))));
    }

    #[tokio::test]
    async fn test_verify_pending_payment_stays_pending() {
        let h = Harness::new();
        let wallet = h.service.create_wallet(UserId::new()).await.unwrap();
        let init = h
            .service
            .initialize_payment(payment_request(wallet.id, 10.0))
            .await
            .unwrap();
        h.gateway.set_verify_status(ProviderPaymentStatus::Pending);

        let status = h
            .service
            .verify_payment_status(&init.system_reference)
            .await
            .unwrap();

        assert_eq!(status.status, PaymentStatus::Pending);
        assert!(h.store.outbox_events().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_verify_unknown_reference() {
        let h = Harness::new();
        let result = h.service.verify_payment_status("PAY_missing").await;
        assert!(matches!(result, Err(AppError::PaymentNotFound(_))));
    }

    #[tokio::test]
    async fn test_failed_payment_is_not_reopened() {
        let h = Harness::new();
        let wallet = h.service.create_wallet(UserId::new()).await.unwrap();
        let init = h
            .service
            .initialize_payment(payment_request(wallet.id, 10.0))
            .await
            .unwrap();

        h.gateway.set_verify_status(ProviderPaymentStatus::Failed);
        h.service
            .verify_payment_status(&init.system_reference)
            .await
            .unwrap();

        h.gateway.set_verify_status(ProviderPaymentStatus::Success);
        let status = h
            .service
            .verify_payment_status(&init.system_reference)
            .await
            .unwrap();

        assert_eq!(status.status, PaymentStatus::Failed);
        assert!(h.store.outbox_events().unwrap().is_empty());
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Webhooks
    // ─────────────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_webhook_replay_is_idempotent() {
        let h = Harness::new();
        let wallet = h.service.create_wallet(UserId::new()).await.unwrap();
        let init = h
            .service
            .initialize_payment(payment_request(wallet.id, 250.0))
            .await
            .unwrap();

        let body = charge_webhook("charge.success", &init.provider_reference, 25000);
        let signature = sign_payload(&body, WEBHOOK_SECRET);

        let first = h
            .service
            .handle_provider_webhook(&body, Some(&signature))
            .await
            .unwrap();
        assert_eq!(
            first,
            WebhookOutcome::Applied {
                system_reference: init.system_reference.clone(),
                status: PaymentStatus::Success,
            }
        );

        let second = h
            .service
            .handle_provider_webhook(&body, Some(&signature))
            .await
            .unwrap();
        assert_eq!(
            second,
            WebhookOutcome::AlreadySettled {
                system_reference: init.system_reference.clone(),
            }
        );

        assert_eq!(h.store.outbox_events().unwrap().len(), 1);
        h.drain().await;
        h.drain().await;
        assert_eq!(
            h.service.get_wallet(wallet.user_id).await.unwrap().balance.minor(),
            25000
        );
    }

    #[tokio::test]
    async fn test_webhook_bad_signature_changes_nothing() {
        let h = Harness::new();
        let wallet = h.service.create_wallet(UserId::new()).await.unwrap();
        let init = h
            .service
            .initialize_payment(payment_request(wallet.id, 250.0))
            .await
            .unwrap();
        let body = charge_webhook("charge.success", &init.provider_reference, 25000);

        let wrong = h
            .service
            .handle_provider_webhook(&body, Some(&sign_payload(&body, "other-secret")))
            .await;
        assert!(matches!(wrong, Err(AppError::UnauthorizedWebhook)));

        let missing = h.service.handle_provider_webhook(&body, None).await;
        assert!(matches!(missing, Err(AppError::UnauthorizedWebhook)));

        h.gateway.set_verify_status(ProviderPaymentStatus::Pending);
        let status = h
            .service
            .verify_payment_status(&init.system_reference)
            .await
            .unwrap();
        assert_eq!(status.status, PaymentStatus::Pending);
    }

    #[tokio::test]
    async fn test_webhook_signature_covers_raw_bytes() {
        let h = Harness::new();
        let wallet = h.service.create_wallet(UserId::new()).await.unwrap();
        let init = h
            .service
            .initialize_payment(payment_request(wallet.id, 1.0))
            .await
            .unwrap();
        let body = charge_webhook("charge.success", &init.provider_reference, 100);
        let signature = sign_payload(&body, WEBHOOK_SECRET);

        // same JSON, different bytes
        let mut reformatted = body.clone();
        reformatted.push(b' ');

        let result = h
            .service
            .handle_provider_webhook(&reformatted, Some(&signature))
            .await;
        assert!(matches!(result, Err(AppError::UnauthorizedWebhook)));
    }

    #[tokio::test]
    async fn test_webhook_unknown_reference() {
        let h = Harness::new();
        let body = charge_webhook("charge.success", "PSK_unknown", 100);
        let signature = sign_payload(&body, WEBHOOK_SECRET);

        let result = h
            .service
            .handle_provider_webhook(&body, Some(&signature))
            .await;
        assert!(matches!(result, Err(AppError::ReferenceNotFound(_))));
    }

    #[tokio::test]
    async fn test_webhook_ignores_other_events() {
        let h = Harness::new();
        let body = charge_webhook("transfer.success", "TRF_1", 100);
        let signature = sign_payload(&body, WEBHOOK_SECRET);

        let outcome = h
            .service
            .handle_provider_webhook(&body, Some(&signature))
            .await
            .unwrap();
        assert_eq!(outcome, WebhookOutcome::Ignored);
    }

    #[tokio::test]
    async fn test_verify_underpaid_charge_fails_payment() {
        let h = Harness::new();
        let wallet = h.service.create_wallet(UserId::new()).await.unwrap();
        let init = h
            .service
            .initialize_payment(payment_request(wallet.id, 250.0))
            .await
            .unwrap();

        h.gateway.set_paid(Money::from_minor(100).unwrap(), "NGN");
        let status = h
            .service
            .verify_payment_status(&init.system_reference)
            .await
            .unwrap();

        assert_eq!(status.status, PaymentStatus::Failed);
        assert!(h.store.outbox_events().unwrap().is_empty());
        assert_eq!(h.service.get_wallet(wallet.user_id).await.unwrap().balance, Money::ZERO);
    }

    #[tokio::test]
    async fn test_verify_wrong_currency_fails_payment() {
        let h = Harness::new();
        let wallet = h.service.create_wallet(UserId::new()).await.unwrap();
        let init = h
            .service
            .initialize_payment(payment_request(wallet.id, 250.0))
            .await
            .unwrap();

        h.gateway.set_paid(Money::from_minor(25000).unwrap(), "USD");
        let status = h
            .service
            .verify_payment_status(&init.system_reference)
            .await
            .unwrap();

        assert_eq!(status.status, PaymentStatus::Failed);
        assert!(h.store.outbox_events().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_webhook_amount_mismatch_fails_payment() {
        let h = Harness::new();
        let wallet = h.service.create_wallet(UserId::new()).await.unwrap();
        let init = h
            .service
            .initialize_payment(payment_request(wallet.id, 250.0))
            .await
            .unwrap();

        let body = charge_webhook("charge.success", &init.provider_reference, 100);
        let outcome = h
            .service
            .handle_provider_webhook(&body, Some(&sign_payload(&body, WEBHOOK_SECRET)))
            .await
            .unwrap();

        assert_eq!(
            outcome,
            WebhookOutcome::Applied {
                system_reference: init.system_reference.clone(),
                status: PaymentStatus::Failed,
            }
        );
        assert!(h.store.outbox_events().unwrap().is_empty());

        // a later correct report cannot reopen it
        let body = charge_webhook("charge.success", &init.provider_reference, 25000);
        let replay = h
            .service
            .handle_provider_webhook(&body, Some(&sign_payload(&body, WEBHOOK_SECRET)))
            .await
            .unwrap();
        assert!(matches!(replay, WebhookOutcome::AlreadySettled { .. }));
    }

    #[tokio::test]
    async fn test_webhook_success_without_amount_rejected() {
        let h = Harness::new();
        let wallet = h.service.create_wallet(UserId::new()).await.unwrap();
        let init = h
            .service
            .initialize_payment(payment_request(wallet.id, 250.0))
            .await
            .unwrap();

        let body = serde_json::json!({
            "event": "charge.success",
            "data": { "reference": init.provider_reference }
        })
        .to_string()
        .into_bytes();
        let result = h
            .service
            .handle_provider_webhook(&body, Some(&sign_payload(&body, WEBHOOK_SECRET)))
            .await;
        assert!(matches!(result, Err(AppError::Validation(_))));

        h.gateway.set_verify_status(ProviderPaymentStatus::Pending);
        let status = h
            .service
            .verify_payment_status(&init.system_reference)
            .await
            .unwrap();
        assert_eq!(status.status, PaymentStatus::Pending);
    }

    #[tokio::test]
    async fn test_webhook_malformed_payload() {
        let h = Harness::new();
        let body = b"not json".to_vec();
        let signature = sign_payload(&body, WEBHOOK_SECRET);

        let result = h
            .service
            .handle_provider_webhook(&body, Some(&signature))
            .await;
        assert!(matches!(result, Err(AppError::Validation(_))));
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Escrow
    // ─────────────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_create_escrow_is_idempotent_per_contract() {
        let h = Harness::new();
        let req = CreateEscrowRequest {
            contract_id: ContractId::new(),
            creator_id: UserId::new(),
            freelancer_id: UserId::new(),
            amount: 100.0,
        };

        let first = h.service.create_escrow(req.clone()).await.unwrap();
        let second = h.service.create_escrow(req).await.unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(first.status, EscrowStatus::AwaitingFunding);
        assert_eq!(first.expected_amount.minor(), 10000);
    }

    #[tokio::test]
    async fn test_overfunding_is_rejected() {
        let h = Harness::new();
        let creator = UserId::new();
        h.funded_wallet(creator, 20000.0).await;
        let escrow_id = h.escrow(creator, UserId::new(), 10000.0).await;

        let first = h
            .service
            .fund_escrow(escrow_id, creator, FundEscrowRequest { amount: 6000.0 })
            .await
            .unwrap();
        assert_eq!(first.escrow.status, EscrowStatus::PartiallyFunded);

        let second = h
            .service
            .fund_escrow(escrow_id, creator, FundEscrowRequest { amount: 6000.0 })
            .await;
        assert!(matches!(second, Err(AppError::EscrowOverfunded { .. })));

        let details = h.service.get_escrow(escrow_id).await.unwrap();
        assert_eq!(details.escrow.balance.minor(), 600_000);
        assert_eq!(details.transactions.len(), 1);
        assert_eq!(
            h.service.get_wallet(creator).await.unwrap().balance.minor(),
            1_400_000
        );
    }

    #[tokio::test]
    async fn test_fund_escrow_insufficient_wallet_rolls_back() {
        let h = Harness::new();
        let creator = UserId::new();
        h.funded_wallet(creator, 50.0).await;
        let escrow_id = h.escrow(creator, UserId::new(), 100.0).await;

        let result = h
            .service
            .fund_escrow(escrow_id, creator, FundEscrowRequest { amount: 100.0 })
            .await;
        assert!(matches!(result, Err(AppError::InsufficientFunds { .. })));

        let details = h.service.get_escrow(escrow_id).await.unwrap();
        assert_eq!(details.escrow.balance, Money::ZERO);
        assert_eq!(details.escrow.status, EscrowStatus::AwaitingFunding);
        assert!(details.transactions.is_empty());
    }

    #[tokio::test]
    async fn test_only_creator_can_fund() {
        let h = Harness::new();
        let creator = UserId::new();
        let freelancer = UserId::new();
        h.funded_wallet(creator, 100.0).await;
        let escrow_id = h.escrow(creator, freelancer, 100.0).await;

        let result = h
            .service
            .fund_escrow(escrow_id, freelancer, FundEscrowRequest { amount: 10.0 })
            .await;
        assert!(matches!(result, Err(AppError::Forbidden(_))));
    }

    #[tokio::test]
    async fn test_release_and_refund_permissions() {
        let h = Harness::new();
        let creator = UserId::new();
        let freelancer = UserId::new();
        h.funded_wallet(creator, 100.0).await;
        h.payout_account(freelancer).await;
        let escrow_id = h.escrow(creator, freelancer, 100.0).await;
        h.service
            .fund_escrow(escrow_id, creator, FundEscrowRequest { amount: 100.0 })
            .await
            .unwrap();

        let by_freelancer = h
            .service
            .release_escrow(escrow_id, Actor::member(freelancer), SettleEscrowRequest::default())
            .await;
        assert!(matches!(by_freelancer, Err(AppError::Forbidden(_))));

        let by_creator = h
            .service
            .refund_escrow(escrow_id, Actor::member(creator), SettleEscrowRequest::default())
            .await;
        assert!(matches!(by_creator, Err(AppError::Forbidden(_))));

        let by_stranger = h
            .service
            .release_escrow(escrow_id, Actor::member(UserId::new()), SettleEscrowRequest::default())
            .await;
        assert!(matches!(by_stranger, Err(AppError::Forbidden(_))));

        let by_arbitrator = h
            .service
            .release_escrow(
                escrow_id,
                Actor::arbitrator(UserId::new()),
                SettleEscrowRequest { amount: Some(40.0) },
            )
            .await
            .unwrap();
        assert_eq!(by_arbitrator.escrow.status, EscrowStatus::Settling);
        assert_eq!(by_arbitrator.escrow.balance.minor(), 6000);
    }

    #[tokio::test]
    async fn test_refused_release_is_put_back() {
        let h = Harness::new();
        let creator = UserId::new();
        let freelancer = UserId::new();
        h.funded_wallet(creator, 100.0).await;
        h.payout_account(freelancer).await;
        let escrow_id = h.escrow(creator, freelancer, 100.0).await;
        h.service
            .fund_escrow(escrow_id, creator, FundEscrowRequest { amount: 100.0 })
            .await
            .unwrap();

        h.gateway.fail_transfer(true);
        let result = h
            .service
            .release_escrow(escrow_id, Actor::member(creator), SettleEscrowRequest::default())
            .await;
        assert!(matches!(result, Err(AppError::ExternalGateway(_))));

        let details = h.service.get_escrow(escrow_id).await.unwrap();
        assert_eq!(details.escrow.balance.minor(), 10000);
        assert_eq!(details.escrow.status, EscrowStatus::Funded);
        assert_eq!(details.transactions.len(), 2);
        assert_eq!(details.transactions[1].transaction_type, EscrowTransactionType::Release);
        assert_eq!(details.transactions[1].status, EscrowTransactionStatus::Failed);
        assert_eq!(ledger_balance(&details.transactions), 10000);
        assert!(h.gateway.transfers().is_empty());

        // the same release goes through once the provider recovers
        h.gateway.fail_transfer(false);
        let released = h
            .service
            .release_escrow(escrow_id, Actor::member(creator), SettleEscrowRequest::default())
            .await
            .unwrap();
        assert_eq!(released.escrow.status, EscrowStatus::Released);
        assert_eq!(released.transaction.status, EscrowTransactionStatus::Success);
        assert_eq!(h.gateway.transfers().len(), 1);
    }

    /// Funded escrow of `major` with the freelancer's payout account on file.
    async fn funded_escrow(h: &Harness, creator: UserId, freelancer: UserId, major: f64) -> EscrowId {
        h.funded_wallet(creator, major).await;
        h.payout_account(freelancer).await;
        let escrow_id = h.escrow(creator, freelancer, major).await;
        h.service
            .fund_escrow(escrow_id, creator, FundEscrowRequest { amount: major })
            .await
            .unwrap();
        escrow_id
    }

    #[tokio::test]
    async fn test_concurrent_releases_pay_out_once() {
        let h = Harness::new();
        let creator = UserId::new();
        let escrow_id = funded_escrow(&h, creator, UserId::new(), 100.0).await;

        let (a, b) = tokio::join!(
            h.service.release_escrow(
                escrow_id,
                Actor::member(creator),
                SettleEscrowRequest::default()
            ),
            h.service.release_escrow(
                escrow_id,
                Actor::member(creator),
                SettleEscrowRequest::default()
            ),
        );

        let (won, lost) = if a.is_ok() { (a, b) } else { (b, a) };
        assert_eq!(won.unwrap().transaction.amount.minor(), 10000);
        assert!(matches!(
            lost,
            Err(AppError::Concurrency(ConcurrencyKind::EscrowModified))
        ));

        assert_eq!(h.gateway.transfers().len(), 1);
        let details = h.service.get_escrow(escrow_id).await.unwrap();
        let releases: Vec<_> = details
            .transactions
            .iter()
            .filter(|t| t.transaction_type == EscrowTransactionType::Release)
            .collect();
        assert_eq!(releases.len(), 1);
        assert_eq!(releases[0].status, EscrowTransactionStatus::Success);
        assert_eq!(details.escrow.balance, Money::ZERO);
        assert_eq!(ledger_balance(&details.transactions), 0);
    }

    #[tokio::test]
    async fn test_release_with_unknown_outcome_stays_claimed() {
        let h = Harness::new();
        let creator = UserId::new();
        let escrow_id = funded_escrow(&h, creator, UserId::new(), 100.0).await;

        h.gateway.time_out_transfer(true);
        let result = h
            .service
            .release_escrow(escrow_id, Actor::member(creator), SettleEscrowRequest::default())
            .await;
        assert!(matches!(result, Err(AppError::ExternalGateway(_))));

        let details = h.service.get_escrow(escrow_id).await.unwrap();
        assert_eq!(details.escrow.balance, Money::ZERO);
        assert_eq!(details.transactions[1].status, EscrowTransactionStatus::Pending);
        assert_eq!(ledger_balance(&details.transactions), 0);

        // the claimed money cannot be paid out a second time
        h.gateway.time_out_transfer(false);
        let retry = h
            .service
            .release_escrow(escrow_id, Actor::member(creator), SettleEscrowRequest::default())
            .await;
        assert!(matches!(retry, Err(AppError::Conflict(_))));
        assert!(h.gateway.transfers().is_empty());
    }

    #[tokio::test]
    async fn test_release_requires_payout_account() {
        let h = Harness::new();
        let creator = UserId::new();
        h.funded_wallet(creator, 100.0).await;
        let escrow_id = h.escrow(creator, UserId::new(), 100.0).await;
        h.service
            .fund_escrow(escrow_id, creator, FundEscrowRequest { amount: 100.0 })
            .await
            .unwrap();

        let result = h
            .service
            .release_escrow(escrow_id, Actor::member(creator), SettleEscrowRequest::default())
            .await;
        assert!(matches!(result, Err(AppError::PayoutAccountNotFound(_))));
        assert!(h.gateway.transfers().is_empty());
    }

    #[tokio::test]
    async fn test_refund_returns_money_to_creator() {
        let h = Harness::new();
        let creator = UserId::new();
        let freelancer = UserId::new();
        h.funded_wallet(creator, 100.0).await;
        let escrow_id = h.escrow(creator, freelancer, 100.0).await;
        h.service
            .fund_escrow(escrow_id, creator, FundEscrowRequest { amount: 80.0 })
            .await
            .unwrap();

        let refunded = h
            .service
            .refund_escrow(escrow_id, Actor::member(freelancer), SettleEscrowRequest::default())
            .await
            .unwrap();

        assert_eq!(refunded.escrow.status, EscrowStatus::Refunded);
        assert_eq!(refunded.transaction.amount.minor(), 8000);
        assert_eq!(
            h.service.get_wallet(creator).await.unwrap().balance.minor(),
            10000
        );

        let lines = h.store.escrow_transactions(escrow_id).unwrap();
        assert_eq!(lines.len(), 2);
        assert_eq!(ledger_balance(&lines), 0);
    }

    #[tokio::test]
    async fn test_release_more_than_balance() {
        let h = Harness::new();
        let creator = UserId::new();
        let freelancer = UserId::new();
        h.funded_wallet(creator, 100.0).await;
        h.payout_account(freelancer).await;
        let escrow_id = h.escrow(creator, freelancer, 100.0).await;
        h.service
            .fund_escrow(escrow_id, creator, FundEscrowRequest { amount: 50.0 })
            .await
            .unwrap();

        let result = h
            .service
            .release_escrow(
                escrow_id,
                Actor::member(creator),
                SettleEscrowRequest { amount: Some(60.0) },
            )
            .await;
        assert!(matches!(result, Err(AppError::InsufficientFunds { .. })));
        assert!(h.gateway.transfers().is_empty());
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Payouts
    // ─────────────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_register_payout_account_once() {
        let h = Harness::new();
        let user = UserId::new();

        let account = h
            .service
            .register_payout_account(user, payout_request())
            .await
            .unwrap();
        assert_eq!(account.account_name, "ADA OBI");
        assert_eq!(account.recipient_code, "RCP_0123456789");

        let again = h.service.register_payout_account(user, payout_request()).await;
        assert!(matches!(again, Err(AppError::Conflict(_))));
        assert_eq!(h.gateway.recipient_lookups(), 1);
    }

    #[tokio::test]
    async fn test_register_payout_account_validates_input() {
        let h = Harness::new();
        let mut req = payout_request();
        req.account_number = "12345".into();

        let result = h.service.register_payout_account(UserId::new(), req).await;
        assert!(matches!(result, Err(AppError::Validation(_))));
        assert_eq!(h.gateway.recipient_lookups(), 0);
    }

    #[tokio::test]
    async fn test_withdrawal_debits_wallet_and_keeps_payout_account() {
        let h = Harness::new();
        let user = UserId::new();
        h.funded_wallet(user, 1000.0).await;

        let first = h
            .service
            .request_withdrawal(user, withdrawal_request(250.0))
            .await
            .unwrap();
        assert_eq!(first.amount, 25000);
        assert_eq!(first.new_balance, 75000);
        assert_eq!(first.status, PaymentStatus::Pending);

        let second = h
            .service
            .request_withdrawal(user, withdrawal_request(100.0))
            .await
            .unwrap();
        assert_eq!(second.new_balance, 65000);
        assert_ne!(first.reference, second.reference);
        assert_eq!(h.gateway.recipient_lookups(), 2);

        // a payout account was stored by the first withdrawal
        let again = h.service.register_payout_account(user, payout_request()).await;
        assert!(matches!(again, Err(AppError::Conflict(_))));
    }

    #[tokio::test]
    async fn test_withdrawal_insufficient_funds() {
        let h = Harness::new();
        let user = UserId::new();
        h.funded_wallet(user, 10.0).await;

        let result = h
            .service
            .request_withdrawal(user, withdrawal_request(20.0))
            .await;
        assert!(matches!(
            result,
            Err(AppError::InsufficientFunds {
                available: 1000,
                requested: 2000
            })
        ));
        assert_eq!(h.gateway.recipient_lookups(), 0);
        assert_eq!(h.service.get_wallet(user).await.unwrap().balance.minor(), 1000);
    }

    #[tokio::test]
    async fn test_withdrawal_rejects_zero() {
        let h = Harness::new();
        let user = UserId::new();
        h.service.create_wallet(user).await.unwrap();

        let result = h.service.request_withdrawal(user, withdrawal_request(0.0)).await;
        assert!(matches!(result, Err(AppError::Validation(_))));
    }

    #[tokio::test]
    async fn test_concurrent_withdrawals_one_wins() {
        let h = Harness::new();
        let user = UserId::new();
        h.funded_wallet(user, 100.0).await;

        let (a, b) = tokio::join!(
            h.service.request_withdrawal(user, withdrawal_request(60.0)),
            h.service.request_withdrawal(user, withdrawal_request(60.0)),
        );

        let (won, lost) = if a.is_ok() { (a, b) } else { (b, a) };
        assert_eq!(won.unwrap().new_balance, 4000);
        assert!(matches!(
            lost,
            Err(AppError::Concurrency(ConcurrencyKind::WalletModified))
        ));
        assert_eq!(h.service.get_wallet(user).await.unwrap().balance.minor(), 4000);
    }

    #[tokio::test]
    async fn test_concurrent_funding_from_one_wallet() {
        let h = Harness::new();
        let creator = UserId::new();
        h.funded_wallet(creator, 100.0).await;
        let first = h.escrow(creator, UserId::new(), 50.0).await;
        let second = h.escrow(creator, UserId::new(), 50.0).await;

        let (a, b) = tokio::join!(
            h.service
                .fund_escrow(first, creator, FundEscrowRequest { amount: 50.0 }),
            h.service
                .fund_escrow(second, creator, FundEscrowRequest { amount: 50.0 }),
        );

        let results = [&a, &b];
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(results.iter().any(|r| matches!(
            r,
            Err(AppError::Concurrency(ConcurrencyKind::WalletModified))
        )));

        // only the winning escrow moved, and the wallet paid once
        assert_eq!(h.service.get_wallet(creator).await.unwrap().balance.minor(), 5000);
        let balances: i64 = [first, second]
            .into_iter()
            .map(|id| h.store.escrow_transactions(id).unwrap())
            .map(|ledger| ledger_balance(&ledger))
            .sum();
        assert_eq!(balances, 5000);
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Outbox
    // ─────────────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_published_events_create_wallet_and_escrow() {
        let h = Harness::new();
        let creator = UserId::new();
        let contract_id = ContractId::new();

        h.service
            .publish_event(DomainEvent::UserRegistered { user_id: creator })
            .await
            .unwrap();
        h.service
            .publish_event(DomainEvent::ContractCreated {
                contract_id,
                creator_id: creator,
                freelancer_id: UserId::new(),
                amount: Money::from_minor(50000).unwrap(),
            })
            .await
            .unwrap();

        let report = h.drain().await;
        assert_eq!(report.completed, 2);
        assert!(h.service.get_wallet(creator).await.is_ok());

        // redelivery creates nothing new
        h.service
            .publish_event(DomainEvent::UserRegistered { user_id: creator })
            .await
            .unwrap();
        assert_eq!(h.drain().await.completed, 1);

        let events = h.store.outbox_events().unwrap();
        assert!(events.iter().all(|e| e.status == OutboxStatus::Completed));
    }

    #[tokio::test]
    async fn test_failing_event_retries_then_fails() {
        let h = Harness::new();
        h.service
            .publish_event(DomainEvent::PaymentSucceeded {
                payment_id: billing_types::PaymentId::new(),
                wallet_id: WalletId::new(),
                amount: Money::from_minor(100).unwrap(),
            })
            .await
            .unwrap();

        let dispatcher = h.dispatcher(2);

        let first = dispatcher.drain_once().await.unwrap();
        assert_eq!(first.retrying, 1);
        let events = h.store.outbox_events().unwrap();
        assert_eq!(events[0].status, OutboxStatus::Pending);
        assert_eq!(events[0].attempts, 1);
        assert!(events[0].last_error.is_some());

        let second = dispatcher.drain_once().await.unwrap();
        assert_eq!(second.failed, 1);
        let events = h.store.outbox_events().unwrap();
        assert_eq!(events[0].status, OutboxStatus::Failed);
        assert_eq!(events[0].attempts, 2);

        assert_eq!(dispatcher.drain_once().await.unwrap(), DrainReport::default());
    }

    #[tokio::test]
    async fn test_handled_event_is_not_applied_twice() {
        let h = Harness::new();
        let user = UserId::new();
        let wallet = h.service.create_wallet(user).await.unwrap();
        let row = h
            .service
            .publish_event(DomainEvent::PaymentSucceeded {
                payment_id: billing_types::PaymentId::new(),
                wallet_id: wallet.id,
                amount: Money::from_minor(500).unwrap(),
            })
            .await
            .unwrap();

        h.service.handle_event(&row).await.unwrap();
        let again = h.service.handle_event(&row).await;
        assert!(matches!(
            again,
            Err(AppError::Concurrency(billing_types::ConcurrencyKind::EventModified))
        ));
        assert_eq!(h.service.get_wallet(user).await.unwrap().balance.minor(), 500);
    }
}

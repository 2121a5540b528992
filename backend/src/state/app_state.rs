//! Application state shared across handlers

use axum::extract::FromRef;
use sqlx::PgPool;
use std::sync::Arc;

use crate::admin::AdminService;
use crate::auth::{AuthService, IdentityProvider};
use crate::catalog::CatalogService;
use crate::config::{Config, Environment};
use crate::cotista::CotistaService;
use crate::documents::{DocumentService, UploadPipeline};
use crate::lifecycle::{LifecycleManager, Sweeper};
use crate::payment::{PaymentGateway, PaymentService, WebhookProcessor};
use crate::reservation::ReservationService;
use crate::storage::ObjectStore;
use crate::store::ReservationStore;
use crate::voucher::VoucherService;
use crate::websocket::WsState;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub db_pool: PgPool,
    pub store: Arc<dyn ReservationStore>,
    pub auth_service: Arc<AuthService>,
    pub identity: Arc<dyn IdentityProvider>,
    pub lifecycle: LifecycleManager,
    pub reservations: ReservationService,
    pub payments: PaymentService,
    pub webhooks: Arc<WebhookProcessor>,
    pub documents: DocumentService,
    pub vouchers: VoucherService,
    pub catalog: CatalogService,
    pub cotistas: CotistaService,
    pub admin: AdminService,
    pub ws_state: WsState,
}

impl AppState {
    /// Wires every service from its collaborators. The pool backs the
    /// catalogue and back-office queries; `store` backs the reservation
    /// lifecycle.
    pub fn build(
        config: Config,
        db_pool: PgPool,
        store: Arc<dyn ReservationStore>,
        gateway: Arc<dyn PaymentGateway>,
        object_store: Arc<dyn ObjectStore>,
        identity: Arc<dyn IdentityProvider>,
    ) -> Self {
        let ws_state = WsState::new();
        let lifecycle = LifecycleManager::new(store.clone(), ws_state.clone());
        let uploads = UploadPipeline::new(object_store);

        let vouchers = VoucherService::new(
            store.clone(),
            lifecycle.clone(),
            uploads.clone(),
            config.voucher_deadline_hours,
            config.max_document_size_mb,
        );
        let documents = DocumentService::new(
            store.clone(),
            lifecycle.clone(),
            uploads,
            vouchers.clone(),
            config.max_document_size_mb,
        );
        let payments = PaymentService::new(
            store.clone(),
            lifecycle.clone(),
            gateway,
            config.public_app_url.clone(),
        );
        let webhooks = Arc::new(WebhookProcessor::new(
            store.clone(),
            lifecycle.clone(),
            config.stripe_webhook_secret.clone(),
            config.webhook_tolerance_seconds,
        ));
        let auth_service = Arc::new(AuthService::new(
            db_pool.clone(),
            config.jwt_secret.clone(),
            config.jwt_access_token_ttl_seconds,
            config.jwt_refresh_token_ttl_days,
            config.owner_open_id.clone(),
        ));

        Self {
            reservations: ReservationService::new(
                store.clone(),
                lifecycle.clone(),
                config.payment_currency.clone(),
            ),
            catalog: CatalogService::new(db_pool.clone()),
            cotistas: CotistaService::new(db_pool.clone(), store.clone()),
            admin: AdminService::new(db_pool.clone(), store.clone(), lifecycle.clone()),
            config: Arc::new(config),
            db_pool,
            store,
            auth_service,
            identity,
            lifecycle,
            payments,
            webhooks,
            documents,
            vouchers,
            ws_state,
        }
    }

    /// Background worker over the same store and services
    pub fn sweeper(&self) -> Sweeper {
        Sweeper::new(
            self.store.clone(),
            self.lifecycle.clone(),
            self.vouchers.clone(),
        )
    }
}

impl FromRef<AppState> for WsState {
    fn from_ref(app_state: &AppState) -> Self {
        app_state.ws_state.clone()
    }
}

impl FromRef<AppState> for Arc<AuthService> {
    fn from_ref(app_state: &AppState) -> Self {
        app_state.auth_service.clone()
    }
}

impl FromRef<AppState> for Arc<dyn ReservationStore> {
    fn from_ref(app_state: &AppState) -> Self {
        app_state.store.clone()
    }
}

impl FromRef<AppState> for Environment {
    fn from_ref(app_state: &AppState) -> Self {
        app_state.config.environment
    }
}

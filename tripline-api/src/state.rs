use std::sync::Arc;
use tripline_core::payment::PaymentGateway;
use tripline_order::{
    BookingStore, CheckoutService, LinkSettings, Materializer, PaymentRecords, RefundPolicyConfig,
    RefundPolicyEngine, SeatLedger,
};

#[derive(Clone)]
pub struct AuthConfig {
    pub secret: String,
}

#[derive(Clone)]
pub struct AppState {
    pub materializer: Arc<Materializer>,
    pub payments: Arc<PaymentRecords>,
    pub policy: Arc<RefundPolicyEngine>,
    pub seats: Arc<SeatLedger>,
    pub checkout: Arc<CheckoutService>,
    pub auth: AuthConfig,
}

impl AppState {
    pub fn new(
        store: Arc<dyn BookingStore>,
        gateway: Arc<dyn PaymentGateway>,
        links: LinkSettings,
        refund_policy: RefundPolicyConfig,
        auth: AuthConfig,
    ) -> Self {
        let materializer = Arc::new(Materializer::new(store.clone()));
        let payments = Arc::new(PaymentRecords::new(store.clone()));
        let checkout = Arc::new(CheckoutService::new(
            store.clone(),
            materializer.clone(),
            payments.clone(),
            gateway,
            links,
        ));

        Self {
            materializer,
            payments,
            policy: Arc::new(RefundPolicyEngine::new(store.clone(), refund_policy)),
            seats: Arc::new(SeatLedger::new(store)),
            checkout,
            auth,
        }
    }
}

pub mod checkout;
pub mod error;
pub mod materializer;
pub mod memory;
pub mod models;
pub mod payments;
pub mod policy;
pub mod repository;
pub mod seats;

#[cfg(test)]
mod testing;

pub use checkout::{CheckoutService, LinkSettings, WebhookOutcome};
pub use error::{OrderError, OrderResult};
pub use materializer::Materializer;
pub use memory::InMemoryStore;
pub use models::*;
pub use payments::{PaymentRecords, PendingRefundRequest, RefundOutcome, RefundRequest, RefundScope};
pub use policy::{RefundPolicy, RefundPolicyConfig, RefundPolicyEngine};
pub use repository::{BookingStore, StoreError, StoreResult, StoreTx};
pub use seats::SeatLedger;

//! Services module for payment-engine.

pub mod bus;
pub mod consistency;
pub mod ids;
pub mod metrics;
pub mod payments;
pub mod portal;
pub mod reconciler;
pub mod repository;
pub mod store;
pub mod views;

pub use bus::{BusEvent, NotificationBus, Subscription, Topic};
pub use consistency::{AuditReport, ConsistencyValidator, ValidationReport, Violation};
pub use ids::{IdGenerator, RandomIdGenerator};
pub use metrics::{get_metrics, init_metrics};
pub use payments::{CorrectPayment, PaymentReceipt, PaymentRecordingService, RecordPayment};
pub use portal::PortalService;
pub use reconciler::{ReconcileOutcome, Reconciler};
pub use repository::{ClientRepository, InvoiceRepository, PortalLinkRepository};
pub use store::{FileStore, InMemoryStore, KeyValueStore, PersistentStore};
pub use views::{ClientBalance, LiveSummary, PaymentSummary};

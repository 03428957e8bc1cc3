pub mod callback;
pub mod metrics;
pub mod notifications;
pub mod payment_request;
pub mod signature;
pub mod store;

pub use callback::{CallbackAck, CallbackOutcome, CallbackProcessor, CallbackResult};
pub use metrics::{get_metrics, init_metrics, PaymentMetrics};
pub use notifications::{NotificationDispatcher, Notifier};
pub use payment_request::{PaymentRequestBuilder, RedirectPayload};
pub use signature::{CallbackSignatureScheme, SignatureEngine};
pub use store::{JsonFilePersistence, MemoryPersistence, OrderPersistence, OrderStore};

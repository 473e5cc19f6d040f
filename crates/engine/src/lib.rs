//! Orchestration layer: ties the domain model and repositories together into
//! the ingestion, lifecycle, delivery, and scheduling paths.

pub mod crm;
pub mod delivery;
pub mod inbound;
pub mod ingest;
pub mod lifecycle;
pub mod respond;
pub mod scheduler;

pub use crm::{
    CrmClient, CrmContact, CrmSyncDispatcher, HttpCrmClient, NewCrmRecord, NoopCrmClient,
    SyncFailure,
};
pub use delivery::{
    DeliveryError, DeliveryReport, HttpTransport, MessageDeliveryPipeline, NoopTransport,
    OutboundTransport, SendOptions, SendReceipt,
};
pub use inbound::{InboundError, InboundOutcome, InboundProcessor};
pub use ingest::{IngestError, IngestOutcome, TriggerIngestor};
pub use lifecycle::{ConversationLifecycleManager, LifecycleError};
pub use respond::{GeneratedReply, ResponseGenerator, ScriptedResponder};
pub use scheduler::{DrainReport, QueueScheduler, SchedulerError};

//! 外部协作方端口：存储、出站传输、时钟；以及内存实现

pub mod clock;
pub mod in_memory;
pub mod store;
pub mod transport;

pub use clock::{Clock, FixedClock, SystemClock};
pub use in_memory::{InMemoryStore, RecordingTransport};
pub use store::{
    AdminMetrics, AlertChannel, AlertDelivery, AlertRecord, AlertSeverity, AnswerOutcome,
    AnswerRecord, DeliveryStatus, EmailDeliveryLog, Entitlements, MemoryEntry, SessionStart, Store,
    StoreError,
};
pub use transport::{
    EmailReceipt, EmailRequest, MessageReceipt, OutboundMessage, Transport, TransportError,
};

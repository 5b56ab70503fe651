pub mod backend;
pub mod errors;
pub mod ids;
pub mod listeners;
pub mod messages;
pub mod mock;
pub mod retry;

pub use backend::{event_channel, Backend, BackendEvent, BackendStatus, EventSender, StatusRecord};
pub use errors::{BackendError, BridgeError};
pub use listeners::ListenerSet;
pub use messages::{CanonicalMessage, MediaRef, MessageKind, RawMessage};
pub use retry::RetryPolicy;

pub mod bridge;
pub mod command;
pub mod correlator;
pub mod dispatcher;
pub mod event_bridge;
pub mod file_guard;
pub mod media;
pub mod rpc;
pub mod transport;

pub use bridge::Bridge;
pub use command::Command;
pub use dispatcher::Dispatcher;
pub use media::{MediaConfig, MediaInfo, MediaLinks, MediaServerHandle};
pub use transport::{SessionHandler, SessionState, TransportConfig, TransportSession};

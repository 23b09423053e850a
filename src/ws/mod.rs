//! WebSocket transport
//!
//! Connection configuration, lifecycle types and the connector seam used by
//! the feed connection.

mod connector;
mod types;

pub use connector::{Connector, TungsteniteConnector, WsStream};
pub use types::{ConnectionEvent, ConnectionState, WsConfig, WsError, MIN_HEARTBEAT_INTERVAL};

//! Transport seam for opening WebSocket streams

use super::types::{WsConfig, WsError};
use async_trait::async_trait;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::{connect_async_with_config, MaybeTlsStream, WebSocketStream};

/// Stream type produced by a successful handshake
pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Opens a WebSocket stream
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, config: &WsConfig) -> Result<WsStream, WsError>;
}

/// Default connector backed by tokio-tungstenite
#[derive(Debug, Default, Clone)]
pub struct TungsteniteConnector;

#[async_trait]
impl Connector for TungsteniteConnector {
    async fn connect(&self, config: &WsConfig) -> Result<WsStream, WsError> {
        let mut ws_config = WebSocketConfig::default();
        ws_config.max_message_size = Some(config.max_message_size);
        ws_config.max_frame_size = Some(config.max_message_size);

        let (stream, _response) = connect_async_with_config(&config.url, Some(ws_config), false)
            .await
            .map_err(|e| WsError::ConnectionFailed(e.to_string()))?;
        Ok(stream)
    }
}

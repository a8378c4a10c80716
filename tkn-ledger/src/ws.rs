//! Websocket client for the node's confirmation feed.

use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;
use tokio::net::TcpStream;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

use crate::address::Address;
use crate::error::LedgerError;
use crate::types::{string_encoded, Block, BlockHash};

/// One confirmed block, as delivered on the `confirmation` topic.
#[derive(Clone, Debug, Deserialize)]
pub struct Confirmation {
    pub account: Address,
    pub hash: BlockHash,
    #[serde(default, with = "crate::types::string_encoded_opt")]
    pub amount: u128,
    pub block: Block,
    /// Confirmation time in milliseconds since the Unix epoch.
    #[serde(skip)]
    pub time_ms: u64,
}

#[derive(Deserialize)]
struct Envelope {
    #[serde(default)]
    topic: String,
    #[serde(default, with = "string_encoded")]
    time: u64,
    message: Option<serde_json::Value>,
}

/// A subscribed confirmation stream.
pub struct ConfirmationStream {
    socket: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl ConfirmationStream {
    /// Connect to `url` and subscribe to the confirmation topic.
    pub async fn connect(url: &str) -> Result<Self, LedgerError> {
        let (mut socket, _) = connect_async(url).await?;
        let subscribe = json!({ "action": "subscribe", "topic": "confirmation" });
        socket.send(Message::Text(subscribe.to_string())).await?;
        Ok(Self { socket })
    }

    /// The next confirmation, or `None` once the stream closes. Frames on
    /// other topics (subscription acks, keepalives) are skipped.
    pub async fn next(&mut self) -> Result<Option<Confirmation>, LedgerError> {
        while let Some(frame) = self.socket.next().await {
            let text = match frame? {
                Message::Text(text) => text,
                Message::Close(_) => return Ok(None),
                _ => continue,
            };
            let envelope: Envelope = match serde_json::from_str(&text) {
                Ok(envelope) => envelope,
                Err(_) => continue,
            };
            if envelope.topic != "confirmation" {
                continue;
            }
            let Some(message) = envelope.message else {
                continue;
            };
            match serde_json::from_value::<Confirmation>(message) {
                Ok(mut confirmation) => {
                    confirmation.time_ms = envelope.time;
                    return Ok(Some(confirmation));
                }
                Err(_) => continue,
            }
        }
        Ok(None)
    }
}

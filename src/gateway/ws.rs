//! WebSocket gateway connector

use super::connection::{GatewayConnector, GatewayLink, LinkEvent};
use crate::error::{Error, Result};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};

/// Connects to the gateway over WebSocket
#[derive(Debug, Clone, Copy, Default)]
pub struct WsConnector;

#[async_trait]
impl GatewayConnector for WsConnector {
    async fn connect(&self, url: &str) -> Result<GatewayLink> {
        let (stream, _) = connect_async(url)
            .await
            .map_err(|e| Error::Gateway(format!("Failed to connect to {}: {}", url, e)))?;

        tracing::debug!(url, "Gateway WebSocket connected");

        let (mut sink, mut source) = stream.split();
        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<String>();
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            while let Some(frame) = outbound_rx.recv().await {
                if let Err(e) = sink.send(Message::Text(frame)).await {
                    tracing::warn!("Gateway write failed: {}", e);
                    break;
                }
            }
            let _ = sink.close().await;
        });

        tokio::spawn(async move {
            while let Some(msg) = source.next().await {
                match msg {
                    Ok(Message::Text(text)) => {
                        let _ = event_tx.send(LinkEvent::Frame(text));
                    }
                    Ok(Message::Binary(data)) => match String::from_utf8(data) {
                        Ok(text) => {
                            let _ = event_tx.send(LinkEvent::Frame(text));
                        }
                        Err(_) => {
                            let _ = event_tx
                                .send(LinkEvent::Error("non-UTF-8 binary frame".to_string()));
                        }
                    },
                    Ok(Message::Close(_)) => break,
                    // ping/pong are answered by tungstenite
                    Ok(_) => {}
                    Err(e) => {
                        let _ = event_tx.send(LinkEvent::Error(e.to_string()));
                        break;
                    }
                }
            }
            let _ = event_tx.send(LinkEvent::Closed);
        });

        Ok(GatewayLink {
            outbound: outbound_tx,
            events: event_rx,
        })
    }
}

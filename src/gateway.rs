use crate::message::OutboundMessage;
use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use bytes::Bytes;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Failed to receive message: {0}")]
    Receive(String),
    #[error("Failed to send message: {0}")]
    Send(String),
    #[error("Failed to serialize message: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// What the client pushed next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Incoming {
    /// One encoded still image.
    Frame(Bytes),
    /// A data message that cannot carry a frame.
    Unexpected(&'static str),
    /// Protocol-level traffic with no payload for the session.
    Ignored,
    Disconnected,
}

/// Receive/send/close primitives of one accepted client connection.
#[async_trait]
pub trait Connection: Send {
    async fn receive(&mut self) -> Result<Incoming, TransportError>;

    async fn send(&mut self, message: &OutboundMessage) -> Result<(), TransportError>;

    async fn close(&mut self) -> Result<(), TransportError>;
}

pub struct WsConnection {
    socket: WebSocket,
}

impl WsConnection {
    pub fn new(socket: WebSocket) -> Self {
        Self { socket }
    }
}

#[async_trait]
impl Connection for WsConnection {
    async fn receive(&mut self) -> Result<Incoming, TransportError> {
        match self.socket.recv().await {
            None => Ok(Incoming::Disconnected),
            Some(Err(e)) => Err(TransportError::Receive(e.to_string())),
            Some(Ok(message)) => Ok(classify(message)),
        }
    }

    async fn send(&mut self, message: &OutboundMessage) -> Result<(), TransportError> {
        let json = message.to_json()?;
        self.socket
            .send(Message::Text(json.into()))
            .await
            .map_err(|e| TransportError::Send(e.to_string()))
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.socket
            .send(Message::Close(None))
            .await
            .map_err(|e| TransportError::Send(e.to_string()))
    }
}

fn classify(message: Message) -> Incoming {
    match message {
        Message::Binary(bytes) => Incoming::Frame(bytes),
        Message::Text(_) => Incoming::Unexpected("text"),
        Message::Ping(_) | Message::Pong(_) => Incoming::Ignored,
        Message::Close(_) => Incoming::Disconnected,
    }
}

//! WebSocket adapter
//!
//! Wraps an upgraded axum WebSocket as the framed client stream the relay
//! operates on. The upgrade handshake itself happens in the web layer.

use crate::proxy::ClientMessage;
use axum::extract::ws::{Message, WebSocket};
use futures::{Sink, Stream};
use std::pin::Pin;
use std::task::{Context, Poll};
use virtgate_common::{Error, Result};

pub struct WsClientStream {
    inner: WebSocket,
}

impl WsClientStream {
    pub fn new(socket: WebSocket) -> Self {
        Self { inner: socket }
    }
}

fn from_ws(msg: Message) -> ClientMessage {
    match msg {
        Message::Binary(data) => ClientMessage::Binary(data),
        Message::Text(text) => ClientMessage::Text(text),
        Message::Ping(data) => ClientMessage::Ping(data),
        Message::Pong(data) => ClientMessage::Pong(data),
        Message::Close(_) => ClientMessage::Close,
    }
}

fn to_ws(msg: ClientMessage) -> Message {
    match msg {
        ClientMessage::Binary(data) => Message::Binary(data),
        ClientMessage::Text(text) => Message::Text(text),
        ClientMessage::Ping(data) => Message::Ping(data),
        ClientMessage::Pong(data) => Message::Pong(data),
        ClientMessage::Close => Message::Close(None),
    }
}

fn map_err(e: axum::Error) -> Error {
    Error::ClientStream(e.to_string())
}

impl Stream for WsClientStream {
    type Item = Result<ClientMessage>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        match Pin::new(&mut self.inner).poll_next(cx) {
            Poll::Ready(Some(Ok(msg))) => Poll::Ready(Some(Ok(from_ws(msg)))),
            Poll::Ready(Some(Err(e))) => Poll::Ready(Some(Err(map_err(e)))),
            Poll::Ready(None) => Poll::Ready(None),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Sink<ClientMessage> for WsClientStream {
    type Error = Error;

    fn poll_ready(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<()>> {
        Pin::new(&mut self.inner).poll_ready(cx).map_err(map_err)
    }

    fn start_send(mut self: Pin<&mut Self>, msg: ClientMessage) -> Result<()> {
        Pin::new(&mut self.inner)
            .start_send(to_ws(msg))
            .map_err(map_err)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx).map_err(map_err)
    }

    fn poll_close(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<()>> {
        Pin::new(&mut self.inner).poll_close(cx).map_err(map_err)
    }
}

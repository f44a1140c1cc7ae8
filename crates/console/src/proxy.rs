//! Duplex byte-stream relay between a framed client and a console backend
//!
//! The client side is any framed duplex stream (in production an upgraded
//! WebSocket, see [`crate::ws`]); the backend side is a raw TCP connection
//! to the VM's VNC/SPICE server. No RFB/SPICE wire semantics here, pure
//! byte relay with frame/stream translation.

use crate::allowlist::HostAllowlist;
use crate::config::ConsoleProxyConfig;
use crate::registry::{ConnectionRegistry, ProxyConnection};
use crate::token::TokenRegistry;
use futures::stream::{SplitSink, SplitStream};
use futures::{Sink, SinkExt, Stream, StreamExt};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex as AsyncMutex;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};
use virtgate_common::{Error, Result};

/// A frame on the client side of the relay
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientMessage {
    Binary(Vec<u8>),
    Text(String),
    Ping(Vec<u8>),
    Pong(Vec<u8>),
    Close,
}

/// Framed duplex client stream the relay operates on.
///
/// Blanket-implemented for anything that is a `Stream` + `Sink` of
/// [`ClientMessage`], which keeps the relay independent of the transport
/// that produced the stream.
pub trait ClientStream:
    Stream<Item = Result<ClientMessage>> + Sink<ClientMessage, Error = Error> + Send + Unpin
{
}

impl<T> ClientStream for T where
    T: Stream<Item = Result<ClientMessage>> + Sink<ClientMessage, Error = Error> + Send + Unpin
{
}

type SharedSink<S> = Arc<AsyncMutex<SplitSink<S, ClientMessage>>>;
type FirstError = Arc<Mutex<Option<Error>>>;

/// Validates tokens, admits sessions, and relays bytes until a terminal
/// event
pub struct StreamProxy {
    tokens: Arc<TokenRegistry>,
    registry: Arc<ConnectionRegistry>,
    allowlist: HostAllowlist,
    config: ConsoleProxyConfig,
}

impl StreamProxy {
    pub fn new(
        tokens: Arc<TokenRegistry>,
        registry: Arc<ConnectionRegistry>,
        config: ConsoleProxyConfig,
    ) -> Self {
        let allowlist = HostAllowlist::new(config.allowed_hosts.clone());
        Self {
            tokens,
            registry,
            allowlist,
            config,
        }
    }

    /// Run one relay session to completion.
    ///
    /// Consumes the token, admits the connection, dials the backend, then
    /// relays until close, error, cancellation, or idle eviction. Returns
    /// only after every subtask has exited and the session is fully torn
    /// down.
    pub async fn handle_session<S>(&self, client: S, token_value: &str) -> Result<()>
    where
        S: ClientStream + 'static,
    {
        // Validation is consumption; a failure here burns nothing
        let token = self.tokens.validate(token_value).map_err(|e| {
            debug!(error = %e, "rejected console session");
            e
        })?;

        let conn = ProxyConnection::new(
            &token.vm_name,
            &token.vm_uuid,
            token.endpoint.console_type,
        );
        self.registry.admit(&conn)?;

        if !self.allowlist.allows(&token.endpoint.host) {
            self.registry.remove(conn.id());
            warn!(host = %token.endpoint.host, vm = %token.vm_name, "backend host not allowlisted");
            return Err(Error::Unauthorized(token.endpoint.host.clone()));
        }

        let addr = token.endpoint.addr();
        let backend =
            match timeout(self.config.connect_timeout, TcpStream::connect(addr.as_str())).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                // The admitted slot must not leak on a failed dial
                self.registry.remove(conn.id());
                return Err(Error::ConnectionFailed {
                    addr,
                    reason: e.to_string(),
                });
            }
            Err(_) => {
                self.registry.remove(conn.id());
                return Err(Error::ConnectionFailed {
                    addr,
                    reason: format!("connect timeout after {:?}", self.config.connect_timeout),
                });
            }
        };

        info!(
            id = %conn.id(),
            vm = %conn.vm_name(),
            console_type = %conn.console_type(),
            backend = %addr,
            "console session established"
        );

        let result = self.relay(conn.clone(), client, backend).await;
        self.registry.remove(conn.id());

        let (sent, recv) = conn.bytes();
        match &result {
            Ok(()) => debug!(id = %conn.id(), sent, recv, "console session closed"),
            Err(e) => debug!(id = %conn.id(), sent, recv, error = %e, "console session failed"),
        }
        result
    }

    /// Active phase: three subtasks sharing the connection's cancellation
    /// token, joined as a barrier, then exactly-once teardown.
    async fn relay<S>(
        &self,
        conn: Arc<ProxyConnection>,
        client: S,
        backend: TcpStream,
    ) -> Result<()>
    where
        S: ClientStream + 'static,
    {
        let (backend_read, backend_write) = backend.into_split();
        let (sink, stream) = client.split();
        let sink: SharedSink<S> = Arc::new(AsyncMutex::new(sink));
        let first_err: FirstError = Arc::new(Mutex::new(None));
        let cancel = conn.cancel_token();

        let keepalive = tokio::spawn(keepalive_loop(
            sink.clone(),
            cancel.clone(),
            self.config.keepalive_interval,
        ));
        let client_task = tokio::spawn(client_to_backend(
            stream,
            backend_write,
            conn.clone(),
            cancel.clone(),
            first_err.clone(),
        ));
        let backend_task = tokio::spawn(backend_to_client(
            backend_read,
            sink.clone(),
            conn.clone(),
            cancel.clone(),
            first_err.clone(),
            self.config.idle_timeout,
            self.config.buffer_size,
        ));

        // Barrier: whichever subtask fails first cancels the rest; nothing
        // is torn down until all three have exited
        let _ = tokio::join!(keepalive, client_task, backend_task);

        {
            let mut sink = sink.lock().await;
            let _ = sink.send(ClientMessage::Close).await;
            let _ = sink.close().await;
        }
        conn.close();

        let err = first_err.lock().take();
        match err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

fn record_first(first_err: &FirstError, err: Error) {
    let mut slot = first_err.lock();
    if slot.is_none() {
        *slot = Some(err);
    }
}

/// Periodic client-protocol ping. A failed ping means the client is gone;
/// the session is cancelled without surfacing an error.
async fn keepalive_loop<S>(sink: SharedSink<S>, cancel: CancellationToken, interval: Duration)
where
    S: ClientStream,
{
    let mut ticker = tokio::time::interval(interval);
    // The first tick completes immediately
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = ticker.tick() => {
                let result = sink.lock().await.send(ClientMessage::Ping(Vec::new())).await;
                if let Err(e) = result {
                    debug!(error = %e, "keepalive ping failed, assuming client gone");
                    cancel.cancel();
                    return;
                }
            }
        }
    }
}

/// Client frames to backend bytes. Only binary payloads are forwarded;
/// pongs refresh activity, everything else is ignored.
async fn client_to_backend<S>(
    mut stream: SplitStream<S>,
    mut backend_write: OwnedWriteHalf,
    conn: Arc<ProxyConnection>,
    cancel: CancellationToken,
    first_err: FirstError,
) where
    S: ClientStream,
{
    loop {
        let msg = tokio::select! {
            _ = cancel.cancelled() => return,
            msg = stream.next() => msg,
        };

        match msg {
            Some(Ok(ClientMessage::Binary(data))) => {
                trace!(id = %conn.id(), n = data.len(), "client -> backend");
                if let Err(e) = backend_write.write_all(&data).await {
                    record_first(&first_err, Error::Io(e));
                    cancel.cancel();
                    return;
                }
                conn.add_sent(data.len() as u64);
            }
            Some(Ok(ClientMessage::Pong(_))) => conn.touch(),
            Some(Ok(ClientMessage::Close)) | None => {
                debug!(id = %conn.id(), "client closed stream");
                let _ = backend_write.shutdown().await;
                cancel.cancel();
                return;
            }
            // Text and ping frames are not part of the relayed byte stream
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                record_first(&first_err, e);
                cancel.cancel();
                return;
            }
        }
    }
}

/// Backend bytes to client binary frames. The read deadline doubles as
/// idle detection: a deadline expiry is a clean close, not an error.
async fn backend_to_client<S>(
    mut backend_read: OwnedReadHalf,
    sink: SharedSink<S>,
    conn: Arc<ProxyConnection>,
    cancel: CancellationToken,
    first_err: FirstError,
    idle_timeout: Duration,
    buffer_size: usize,
) where
    S: ClientStream,
{
    let mut buffer = vec![0u8; buffer_size];

    loop {
        let read = tokio::select! {
            _ = cancel.cancelled() => return,
            read = timeout(idle_timeout, backend_read.read(&mut buffer)) => read,
        };

        match read {
            Err(_) => {
                debug!(id = %conn.id(), "idle timeout on backend read, closing");
                cancel.cancel();
                return;
            }
            Ok(Ok(0)) => {
                debug!(id = %conn.id(), "backend closed connection");
                cancel.cancel();
                return;
            }
            Ok(Ok(n)) => {
                trace!(id = %conn.id(), n, "backend -> client");
                let result = sink
                    .lock()
                    .await
                    .send(ClientMessage::Binary(buffer[..n].to_vec()))
                    .await;
                if let Err(e) = result {
                    record_first(&first_err, e);
                    cancel.cancel();
                    return;
                }
                conn.add_recv(n as u64);
            }
            Ok(Err(e)) => {
                record_first(&first_err, Error::Io(e));
                cancel.cancel();
                return;
            }
        }
    }
}

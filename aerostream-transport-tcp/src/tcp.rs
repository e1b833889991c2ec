//! TCP transport stream for AeroStream
//!
//! [`NetworkStream`] opens a TCP connection, optionally negotiates TLS on top
//! of it, and then receives in the background: every chunk read from the
//! socket is appended to an internal buffer and announced to the delegate.
//! The delegate drains the buffer with [`WsStream::read`] whenever it likes,
//! so one drain may cover several chunks.

use crate::connection::Connection;
use aerostream_core::buffer::ReadBuffer;
use aerostream_core::config::{SecuritySettings, StreamConfig};
use aerostream_core::error::TimeoutError;
use aerostream_core::transport::{ConnectTarget, Endpoint, StreamDelegate, TrustInfo, WsStream};
use aerostream_core::{Error, Result};
use async_trait::async_trait;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

type Writer = Arc<tokio::sync::Mutex<WriteHalf<Connection>>>;

/// Resources held between a successful connect and cleanup
struct Active {
    writer: Writer,
    receiver: JoinHandle<()>,
    trust: TrustInfo,
    peer_addr: SocketAddr,
}

struct ReceiveState {
    buffer: ReadBuffer,
    // Bumped on every cleanup; receive loops of older connections go quiet.
    generation: u64,
}

struct Shared {
    active: Mutex<Option<Active>>,
    receive: Mutex<ReceiveState>,
    delegate: Mutex<Option<Weak<dyn StreamDelegate>>>,
    connecting: tokio::sync::Mutex<()>,
}

impl Shared {
    fn lock_active(&self) -> MutexGuard<'_, Option<Active>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_receive(&self) -> MutexGuard<'_, ReceiveState> {
        self.receive.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn delegate(&self) -> Option<Arc<dyn StreamDelegate>> {
        self.delegate
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .and_then(Weak::upgrade)
    }

    /// Delegate to notify for `generation`, captured while the receive lock
    /// is held so a completed cleanup is always observed.
    fn delegate_for(&self, generation: u64) -> Option<Arc<dyn StreamDelegate>> {
        let receive = self.lock_receive();
        if receive.generation != generation {
            return None;
        }
        self.delegate()
    }

    /// Returns false once the connection that produced the chunk is gone.
    fn append(&self, generation: u64, chunk: &[u8]) -> bool {
        let mut receive = self.lock_receive();
        if receive.generation != generation {
            return false;
        }
        receive.buffer.append(chunk);
        true
    }

    fn notify_new_bytes(&self, generation: u64) {
        if let Some(delegate) = self.delegate_for(generation) {
            delegate.new_bytes_available();
        }
    }

    fn notify_stopped(&self, generation: u64, error: Option<&Error>) {
        if let Some(delegate) = self.delegate_for(generation) {
            delegate.stream_did_error(error);
        }
    }
}

/// TCP implementation of [`WsStream`]
pub struct NetworkStream {
    shared: Arc<Shared>,
    config: StreamConfig,
}

impl NetworkStream {
    /// Create an unconnected stream with default configuration
    pub fn new() -> Self {
        Self::build(StreamConfig::default())
    }

    /// Create an unconnected stream with a custom configuration
    pub fn with_config(config: StreamConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::build(config))
    }

    fn build(config: StreamConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                active: Mutex::new(None),
                receive: Mutex::new(ReceiveState {
                    buffer: ReadBuffer::new(),
                    generation: 0,
                }),
                delegate: Mutex::new(None),
                connecting: tokio::sync::Mutex::new(()),
            }),
            config,
        }
    }

    /// Stream configuration
    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    /// Whether a connection is held
    pub fn is_connected(&self) -> bool {
        self.shared.lock_active().is_some()
    }

    /// Address of the connected peer
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.shared.lock_active().as_ref().map(|a| a.peer_addr)
    }

    /// Connect using the configured default timeout
    pub async fn connect_default(
        &self,
        target: &ConnectTarget,
        security: &SecuritySettings,
    ) -> Result<()> {
        self.connect(target, self.config.default_connect_timeout, security)
            .await
    }
}

impl Default for NetworkStream {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for NetworkStream {
    fn drop(&mut self) {
        self.cleanup();
    }
}

impl std::fmt::Debug for NetworkStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetworkStream")
            .field("peer_addr", &self.peer_addr())
            .field("buffered", &self.shared.lock_receive().buffer.len())
            .field("config", &self.config)
            .finish()
    }
}

async fn open(
    endpoint: &Endpoint,
    security: &SecuritySettings,
    nodelay: bool,
) -> Result<(Connection, TrustInfo, SocketAddr)> {
    let tcp = TcpStream::connect((endpoint.host.as_str(), endpoint.port)).await?;
    tcp.set_nodelay(nodelay)?;
    let peer_addr = tcp.peer_addr()?;

    if !security.use_tls {
        return Ok((Connection::Plain(tcp), TrustInfo::default(), peer_addr));
    }

    let (connection, trust) = secure(tcp, &endpoint.host, security).await?;
    Ok((connection, trust, peer_addr))
}

#[cfg(feature = "tls")]
async fn secure(
    tcp: TcpStream,
    host: &str,
    security: &SecuritySettings,
) -> Result<(Connection, TrustInfo)> {
    let (tls, trust) = aerostream_transport_tls::negotiate(tcp, host, security).await?;
    Ok((Connection::Tls(Box::new(tls)), trust))
}

#[cfg(not(feature = "tls"))]
async fn secure(
    _tcp: TcpStream,
    _host: &str,
    _security: &SecuritySettings,
) -> Result<(Connection, TrustInfo)> {
    Err(aerostream_core::error::TlsError::Unsupported.into())
}

async fn receive_loop(
    shared: Arc<Shared>,
    mut reader: ReadHalf<Connection>,
    generation: u64,
    chunk_size: usize,
) {
    let mut chunk = vec![0u8; chunk_size];
    loop {
        match reader.read(&mut chunk).await {
            Ok(0) => {
                debug!("peer closed the connection");
                shared.notify_stopped(generation, None);
                return;
            }
            Ok(n) => {
                if !shared.append(generation, &chunk[..n]) {
                    return;
                }
                trace!(bytes = n, "received chunk");

                #[cfg(feature = "metrics")]
                metrics::counter!("aerostream_bytes_received_total").increment(n as u64);

                shared.notify_new_bytes(generation);
            }
            Err(e) => {
                warn!(error = %e, "receive failed");
                shared.notify_stopped(generation, Some(&Error::Io(e)));
                return;
            }
        }
    }
}

#[async_trait]
impl WsStream for NetworkStream {
    async fn connect(
        &self,
        target: &ConnectTarget,
        timeout: Duration,
        security: &SecuritySettings,
    ) -> Result<()> {
        let endpoint = target.validate()?;
        let _connecting = self.shared.connecting.lock().await;

        if self.is_connected() {
            warn!("connect called on a live stream; releasing the previous connection");
            self.cleanup();
        }
        // A cleanup racing this connect bumps the generation and wins.
        let generation = self.shared.lock_receive().generation;

        debug!(
            host = %endpoint.host,
            port = endpoint.port,
            tls = security.use_tls,
            "connecting"
        );
        let opened = tokio::time::timeout(timeout, open(&endpoint, security, self.config.nodelay))
            .await
            .map_err(|_| TimeoutError::Connect { timeout })
            .map_err(Error::from)
            .and_then(|result| result);

        let (connection, trust, peer_addr) = match opened {
            Ok(opened) => opened,
            Err(e) => {
                warn!(host = %endpoint.host, port = endpoint.port, error = %e, "connect failed");
                return Err(e);
            }
        };

        {
            let receive = self.shared.lock_receive();
            if receive.generation != generation {
                debug!(%peer_addr, "stream cleaned up while connecting; dropping connection");
                return Err(Error::NoConnection);
            }

            let (reader, writer) = tokio::io::split(connection);
            let receiver = tokio::spawn(receive_loop(
                self.shared.clone(),
                reader,
                generation,
                self.config.max_read_chunk,
            ));

            *self.shared.lock_active() = Some(Active {
                writer: Arc::new(tokio::sync::Mutex::new(writer)),
                receiver,
                trust,
                peer_addr,
            });
        }

        #[cfg(feature = "metrics")]
        metrics::counter!("aerostream_connections_opened_total").increment(1);

        debug!(%peer_addr, "connected");
        Ok(())
    }

    async fn write(
        &self,
        data: &[u8],
        is_cancelled: &(dyn Fn() -> bool + Send + Sync),
    ) -> Result<()> {
        let writer = self
            .shared
            .lock_active()
            .as_ref()
            .map(|active| active.writer.clone())
            .ok_or(Error::NoConnection)?;

        if is_cancelled() {
            trace!(bytes = data.len(), "write skipped after cancellation");
            return Ok(());
        }

        let mut writer = writer.lock().await;
        writer.write_all(data).await?;
        writer.flush().await?;
        trace!(bytes = data.len(), "sent");

        #[cfg(feature = "metrics")]
        metrics::counter!("aerostream_bytes_sent_total").increment(data.len() as u64);

        Ok(())
    }

    fn read(&self) -> Option<bytes::Bytes> {
        self.shared.lock_receive().buffer.drain()
    }

    fn cleanup(&self) {
        // Lock order is receive, then active.
        let active = {
            let mut receive = self.shared.lock_receive();
            receive.generation += 1;
            receive.buffer.clear();
            self.shared.lock_active().take()
        };

        if let Some(active) = active {
            active.receiver.abort();
            debug!(peer_addr = %active.peer_addr, "connection released");
        }
    }

    fn trust_info(&self) -> TrustInfo {
        self.shared
            .lock_active()
            .as_ref()
            .map(|active| active.trust.clone())
            .unwrap_or_default()
    }

    fn set_delegate(&self, delegate: Weak<dyn StreamDelegate>) {
        *self
            .shared
            .delegate
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(delegate);
    }
}

//! TCP transport for ring communication
//!
//! Every remote call is a bounded request/response exchange over a
//! pooled connection: connect (or reuse), write one frame, read one
//! frame. Timeouts are first-class errors; nothing blocks indefinitely
//! and nothing is retried automatically.

use crate::error::{Result, RingError};
use crate::protocol::{
    decode_request, decode_response, encode_request, encode_response, frame_length, frame_message,
    RingRequest, RingResponse, MAX_MESSAGE_SIZE,
};
use dashmap::DashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Mutex};
use tokio::time::timeout;
use tracing::{debug, error, info};

/// Maximum idle connections kept per remote address
const POOL_SIZE_PER_ADDR: usize = 2;

/// Client side of the ring transport
#[derive(Debug, Clone)]
pub struct RingClient {
    /// Connection establishment timeout
    connect_timeout: Duration,

    /// Full round-trip timeout per call
    call_timeout: Duration,

    /// Idle connections keyed by remote address
    pool: Arc<DashMap<SocketAddr, ConnectionPool>>,
}

impl RingClient {
    /// Create a new client with the given timeouts
    pub fn new(connect_timeout: Duration, call_timeout: Duration) -> Self {
        Self {
            connect_timeout,
            call_timeout,
            pool: Arc::new(DashMap::new()),
        }
    }

    /// Send one request and wait for the response
    pub async fn call(&self, addr: SocketAddr, request: &RingRequest) -> Result<RingResponse> {
        let mut stream = self.checkout(addr).await?;

        let result = self.exchange(&mut stream, request).await;
        match result {
            Ok(response) => {
                self.checkin(addr, stream);
                Ok(response)
            }
            // A failed exchange leaves the stream in an unknown framing
            // state; drop it instead of pooling it.
            Err(e) => Err(e),
        }
    }

    /// Verify `addr` accepts connections, without sending anything
    pub async fn probe(&self, addr: SocketAddr) -> Result<()> {
        let stream = self.connect(addr).await?;
        self.checkin(addr, stream);
        Ok(())
    }

    async fn exchange(
        &self,
        stream: &mut TcpStream,
        request: &RingRequest,
    ) -> Result<RingResponse> {
        let bytes = encode_request(request)?;
        let framed = frame_message(&bytes);

        timeout(self.call_timeout, stream.write_all(&framed))
            .await
            .map_err(|_| RingError::Timeout)?
            .map_err(RingError::Io)?;

        let mut length_buf = [0u8; 4];
        timeout(self.call_timeout, stream.read_exact(&mut length_buf))
            .await
            .map_err(|_| RingError::Timeout)?
            .map_err(RingError::Io)?;

        let length = frame_length(&length_buf);
        if length > MAX_MESSAGE_SIZE {
            return Err(RingError::MessageTooLarge {
                size: length,
                max: MAX_MESSAGE_SIZE,
            });
        }

        let mut body = vec![0u8; length];
        timeout(self.call_timeout, stream.read_exact(&mut body))
            .await
            .map_err(|_| RingError::Timeout)?
            .map_err(RingError::Io)?;

        decode_response(&body)
    }

    /// Get a pooled connection or open a new one
    async fn checkout(&self, addr: SocketAddr) -> Result<TcpStream> {
        if let Some(pool) = self.pool.get(&addr) {
            if let Some(stream) = pool.get().await {
                return Ok(stream);
            }
        }
        self.connect(addr).await
    }

    async fn connect(&self, addr: SocketAddr) -> Result<TcpStream> {
        let stream = timeout(self.connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| RingError::Timeout)?
            .map_err(|_| RingError::Unreachable { addr })?;
        let _ = stream.set_nodelay(true);
        Ok(stream)
    }

    fn checkin(&self, addr: SocketAddr, stream: TcpStream) {
        let pool = self.pool.clone();
        tokio::spawn(async move {
            pool.entry(addr)
                .or_insert_with(|| ConnectionPool::new(POOL_SIZE_PER_ADDR))
                .put(stream)
                .await;
        });
    }
}

/// Simple connection pool
#[derive(Debug)]
struct ConnectionPool {
    connections: Mutex<Vec<TcpStream>>,
    max_size: usize,
}

impl ConnectionPool {
    fn new(max_size: usize) -> Self {
        Self {
            connections: Mutex::new(Vec::with_capacity(max_size)),
            max_size,
        }
    }

    async fn get(&self) -> Option<TcpStream> {
        self.connections.lock().await.pop()
    }

    async fn put(&self, stream: TcpStream) {
        let mut conns = self.connections.lock().await;
        if conns.len() < self.max_size {
            conns.push(stream);
        }
        // Drop stream if pool is full
    }
}

/// Handle to a running server task
pub struct ServerHandle {
    /// Address the listener actually bound (useful with port 0)
    pub local_addr: SocketAddr,
    shutdown_tx: mpsc::Sender<()>,
}

impl ServerHandle {
    /// Stop accepting connections
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(()).await;
    }
}

/// Bind `addr` and serve inbound requests, dispatching each decoded
/// request to `handler` and writing back the framed response.
///
/// Connections are handled concurrently; requests on one connection are
/// handled in order.
pub async fn serve<H, F>(addr: SocketAddr, call_timeout: Duration, handler: H) -> Result<ServerHandle>
where
    H: Fn(RingRequest) -> F + Clone + Send + Sync + 'static,
    F: Future<Output = RingResponse> + Send,
{
    let listener = TcpListener::bind(addr).await.map_err(RingError::Io)?;
    let local_addr = listener.local_addr().map_err(RingError::Io)?;

    info!(addr = %local_addr, "listening");

    let (shutdown_tx, mut shutdown_rx) = mpsc::channel(1);

    tokio::spawn(async move {
        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, peer)) => {
                            debug!(peer = %peer, "accepted connection");
                            let handler = handler.clone();
                            tokio::spawn(async move {
                                if let Err(e) =
                                    handle_connection(stream, call_timeout, handler).await
                                {
                                    debug!(peer = %peer, error = %e, "connection error");
                                }
                            });
                        }
                        Err(e) => {
                            error!(error = %e, "accept error");
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!(addr = %local_addr, "server shutting down");
                    break;
                }
            }
        }
    });

    Ok(ServerHandle {
        local_addr,
        shutdown_tx,
    })
}

/// Handle one inbound connection: a sequence of framed request/response
/// exchanges until the remote side closes
async fn handle_connection<H, F>(
    mut stream: TcpStream,
    call_timeout: Duration,
    handler: H,
) -> Result<()>
where
    H: Fn(RingRequest) -> F,
    F: Future<Output = RingResponse>,
{
    let _ = stream.set_nodelay(true);
    let mut length_buf = [0u8; 4];

    loop {
        // Read frame length; block indefinitely between requests so
        // pooled connections stay open, but bound the body read below.
        match stream.read_exact(&mut length_buf).await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                return Ok(()); // Clean close
            }
            Err(e) => return Err(RingError::Io(e)),
        }

        let length = frame_length(&length_buf);
        if length > MAX_MESSAGE_SIZE {
            return Err(RingError::MessageTooLarge {
                size: length,
                max: MAX_MESSAGE_SIZE,
            });
        }

        let mut body = vec![0u8; length];
        timeout(call_timeout, stream.read_exact(&mut body))
            .await
            .map_err(|_| RingError::Timeout)?
            .map_err(RingError::Io)?;

        let response = match decode_request(&body) {
            Ok(request) => handler(request).await,
            Err(e) => e.to_response(),
        };

        let response_bytes = encode_response(&response)?;
        let framed = frame_message(&response_bytes);

        timeout(call_timeout, stream.write_all(&framed))
            .await
            .map_err(|_| RingError::Timeout)?
            .map_err(RingError::Io)?;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ErrorCode;

    async fn echo_server() -> ServerHandle {
        serve(
            "127.0.0.1:0".parse().unwrap(),
            Duration::from_secs(1),
            |request| async move {
                match request {
                    RingRequest::Election { .. } => RingResponse::Ack,
                    _ => RingResponse::error(ErrorCode::InvalidRequest, "unexpected request"),
                }
            },
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_call_roundtrip() {
        let server = echo_server().await;
        let client = RingClient::new(Duration::from_secs(1), Duration::from_secs(1));

        let response = client
            .call(
                server.local_addr,
                &RingRequest::Election {
                    candidate: 11,
                    origin: 5,
                },
            )
            .await
            .unwrap();
        assert_eq!(response, RingResponse::Ack);

        // Second call reuses the pooled connection
        let response = client
            .call(
                server.local_addr,
                &RingRequest::Election {
                    candidate: 11,
                    origin: 5,
                },
            )
            .await
            .unwrap();
        assert_eq!(response, RingResponse::Ack);

        server.shutdown().await;
    }

    #[tokio::test]
    async fn test_handler_error_response() {
        let server = echo_server().await;
        let client = RingClient::new(Duration::from_secs(1), Duration::from_secs(1));

        let response = client
            .call(server.local_addr, &RingRequest::Leader { winner: 3 })
            .await
            .unwrap();
        assert!(matches!(
            response,
            RingResponse::Error {
                code: ErrorCode::InvalidRequest,
                ..
            }
        ));

        server.shutdown().await;
    }

    #[tokio::test]
    async fn test_unreachable_peer() {
        let client = RingClient::new(Duration::from_millis(200), Duration::from_millis(200));

        // Nothing listens here
        let err = client
            .probe("127.0.0.1:1".parse().unwrap())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            RingError::Unreachable { .. } | RingError::Timeout
        ));
    }
}

//! TCP server for the target side.
//!
//! One driver connection is serviced at a time. Within a connection each
//! request is answered before the next frame is read. A second driver
//! waits in the listen backlog until the current one goes away.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use axpilot_core::error::ApiError;
use axpilot_core::protocol::{self, Command, Request, Response, MAX_FRAME_SIZE};
use axpilot_core::session::Session;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Notify;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::daemon::framing::{read_frame, Frame};

/// The target server that services driver connections.
pub struct TargetServer {
    listener: TcpListener,
    session: Arc<Mutex<Session>>,
    /// Shutdown signal, checked between connections and between requests.
    shutdown: Arc<Notify>,
}

impl TargetServer {
    /// Bind a listener on `addr` (`host:port`).
    pub async fn bind(addr: &str, session: Session) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("Failed to bind {}", addr))?;
        Ok(Self {
            listener,
            session: Arc::new(Mutex::new(session)),
            shutdown: Arc::new(Notify::new()),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener
            .local_addr()
            .context("Failed to read listener address")
    }

    /// Shared handle to the session, mainly for inspection in tests.
    pub fn session(&self) -> Arc<Mutex<Session>> {
        self.session.clone()
    }

    /// Handle that stops [`TargetServer::run`] when notified.
    pub fn shutdown_handle(&self) -> Arc<Notify> {
        self.shutdown.clone()
    }

    /// Accept and service connections until shutdown is signaled.
    pub async fn run(&self) -> Result<()> {
        info!(addr = ?self.listener.local_addr().ok(), "Target server listening");
        loop {
            let (stream, peer) = tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok(pair) => pair,
                    Err(e) => {
                        error!("Accept error: {}", e);
                        continue;
                    }
                },
                _ = self.shutdown.notified() => {
                    info!("Shutdown signal received");
                    break;
                }
            };

            let span = info_span!("connection", id = %Uuid::new_v4(), %peer);
            let end = async {
                info!("Driver connected");
                let end = tokio::select! {
                    result = handle_connection(stream, self.session.clone()) => match result {
                        Ok(end) => end,
                        Err(e) => {
                            warn!("Connection closed with error: {:#}", e);
                            ConnectionEnd::Closed
                        }
                    },
                    _ = self.shutdown.notified() => ConnectionEnd::Shutdown,
                };
                info!(?end, "Driver gone");
                clear_cache(&self.session);
                end
            }
            .instrument(span)
            .await;

            if end == ConnectionEnd::Shutdown {
                info!("Shutdown signal received");
                break;
            }
        }
        Ok(())
    }
}

/// Why a connection stopped being serviced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnectionEnd {
    /// Driver sent `disconnect`.
    Disconnected,
    /// Stream closed or failed.
    Closed,
    Shutdown,
}

fn clear_cache(session: &Mutex<Session>) {
    match session.lock() {
        Ok(mut session) => session.clear_cache(),
        Err(poisoned) => poisoned.into_inner().clear_cache(),
    }
}

/// Service one driver until it disconnects or closes the stream.
async fn handle_connection(
    mut stream: TcpStream,
    session: Arc<Mutex<Session>>,
) -> Result<ConnectionEnd> {
    loop {
        let payload = match read_frame(&mut stream, MAX_FRAME_SIZE).await? {
            Frame::Eof => return Ok(ConnectionEnd::Closed),
            Frame::Oversized(size) => {
                warn!(size, "Discarded oversized frame");
                let response = Response::error(ApiError::frame_too_large(size, MAX_FRAME_SIZE));
                send_response(&mut stream, &response).await?;
                continue;
            }
            Frame::Message(payload) => payload,
        };

        let request: Request = match protocol::decode(&payload) {
            Ok(request) => request,
            Err(e) => {
                debug!(error = %e, "Rejected request");
                send_response(&mut stream, &Response::error(e.into())).await?;
                continue;
            }
        };

        let kind = request.command.kind();
        let disconnect = matches!(request.command, Command::Disconnect {});
        debug!(kind, "Handling request");

        let response = dispatch(&session, request).await;
        send_response(&mut stream, &response).await?;

        if disconnect {
            return Ok(ConnectionEnd::Disconnected);
        }
    }
}

/// Write one response frame. A response that cannot be framed, usually one
/// over the size limit, is replaced by an error response so the driver
/// always gets an answer.
async fn send_response(stream: &mut TcpStream, response: &Response) -> Result<()> {
    let frame = match protocol::encode_frame(response) {
        Ok(frame) => frame,
        Err(e) => {
            warn!(error = %e, "Response could not be framed");
            protocol::encode_frame(&Response::error(e.into()))
                .context("Failed to encode error response")?
        }
    };
    stream.write_all(&frame).await.context("Failed to write frame")?;
    stream.flush().await.context("Failed to flush")?;
    Ok(())
}

/// Run a request on the blocking pool; input injection and settle delays
/// must not stall the runtime.
async fn dispatch(session: &Arc<Mutex<Session>>, request: Request) -> Response {
    let session = session.clone();
    let handled = tokio::task::spawn_blocking(move || match session.lock() {
        Ok(mut session) => session.handle(request),
        Err(poisoned) => poisoned.into_inner().handle(request),
    })
    .await;

    match handled {
        Ok(response) => response,
        Err(e) => {
            error!("Request handler failed: {}", e);
            Response::error(ApiError::internal(format!("Request handler failed: {}", e)))
        }
    }
}

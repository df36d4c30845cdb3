//! Async TCP server using Tokio.
//!
//! Accepts connections, frames HTTP/1.1 requests out of the byte stream, and
//! hands each one to the [`Router`]. Connections are persistent unless the
//! client asks otherwise.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, warn};

use crate::http::{Request, RequestError, Response, StatusCode};
use crate::router::Router;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to bind to {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
}

/// Largest request (head plus body) we will buffer (8 MiB).
const MAX_REQUEST_SIZE: usize = 8 * 1024 * 1024;

const INITIAL_BUF_SIZE: usize = 4096;

/// The relay's HTTP/1.1 listener.
///
/// # Examples
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use deskrelay::{app, config::{Config, Settings}, server::Server};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let config = Config::load("config.json")?;
///     let state = Arc::new(app::AppState::new(&config, &Settings::default())?);
///     let server = Server::bind("127.0.0.1:8080").await?;
///     server.run(app::router(state)).await?;
///     Ok(())
/// }
/// ```
pub struct Server {
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl Server {
    /// Binds to `addr` (for example `"0.0.0.0:8080"`; port `0` picks a free one).
    ///
    /// # Errors
    ///
    /// [`ServerError::Bind`] if the address cannot be bound.
    pub async fn bind(addr: impl AsRef<str>) -> Result<Self, ServerError> {
        let addr = addr.as_ref();
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::Bind {
                addr: addr.to_owned(),
                source: e,
            })?;
        let local_addr = listener.local_addr()?;
        Ok(Self {
            listener,
            local_addr,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Serves `router` until the process is terminated.
    pub async fn run(self, router: Router) -> Result<(), ServerError> {
        self.run_until(router, std::future::pending()).await
    }

    /// Serves `router` until `shutdown` resolves.
    ///
    /// Stops accepting new connections once `shutdown` completes; connections
    /// already in flight finish on their own tasks.
    pub async fn run_until<S>(self, router: Router, shutdown: S) -> Result<(), ServerError>
    where
        S: Future<Output = ()>,
    {
        let router = Arc::new(router);
        info!(address = %self.local_addr, "deskrelay listening");

        tokio::pin!(shutdown);
        loop {
            let (stream, peer_addr) = tokio::select! {
                () = &mut shutdown => {
                    info!("shutdown requested, no longer accepting connections");
                    return Ok(());
                }
                accepted = self.listener.accept() => match accepted {
                    Ok(pair) => pair,
                    Err(e) => {
                        error!(error = %e, "failed to accept connection");
                        continue;
                    }
                },
            };

            debug!(peer = %peer_addr, "connection accepted");
            let router = Arc::clone(&router);

            tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, peer_addr, router).await {
                    warn!(peer = %peer_addr, error = %e, "connection closed with error");
                }
            });
        }
    }
}

/// Serves one connection, one request per loop iteration, until the peer
/// closes it or either side asks for `Connection: close`.
async fn handle_connection(
    mut stream: TcpStream,
    peer_addr: SocketAddr,
    router: Arc<Router>,
) -> Result<(), std::io::Error> {
    let mut buf = BytesMut::with_capacity(INITIAL_BUF_SIZE);
    let mut continue_sent = false;

    loop {
        // A previous iteration may have left a complete pipelined request behind.
        let (mut request, body, total) = match frame(&buf) {
            Frame::Ready {
                request,
                body,
                total,
            } => (request, body, total),
            Frame::Reject(response) => {
                return reject(&mut stream, peer_addr, response).await;
            }
            pending => {
                let wants_continue = matches!(pending, Frame::AwaitBody { expect_continue: true });
                if wants_continue && !continue_sent {
                    stream.write_all(CONTINUE).await?;
                    stream.flush().await?;
                    continue_sent = true;
                }
                if stream.read_buf(&mut buf).await? == 0 {
                    debug!(peer = %peer_addr, "connection closed by peer");
                    return Ok(());
                }
                if buf.len() > MAX_REQUEST_SIZE {
                    return reject(&mut stream, peer_addr, too_large()).await;
                }
                continue;
            }
        };
        continue_sent = false;

        let raw = buf.split_to(total).freeze();
        request.set_body(match body {
            Body::Span { start, end } => raw.slice(start..end),
            Body::Decoded(bytes) => bytes,
        });
        let keep_alive = request.is_keep_alive();

        debug!(
            peer = %peer_addr,
            method = %request.method(),
            path = %request.path(),
            "dispatching request"
        );

        let response = router.route(request).await.keep_alive(keep_alive);
        stream.write_all(&response.into_bytes()).await?;
        stream.flush().await?;

        if !keep_alive {
            debug!(peer = %peer_addr, "Connection: close, shutting down");
            return Ok(());
        }
    }
}

const CONTINUE: &[u8] = b"HTTP/1.1 100 Continue\r\n\r\n";

enum Frame {
    /// A whole request is buffered; `total` bytes of the buffer belong to it.
    Ready {
        request: Request,
        body: Body,
        total: usize,
    },
    /// The head is parsed but the body has not fully arrived.
    AwaitBody { expect_continue: bool },
    /// The head itself is incomplete.
    NeedMore,
    /// The request can never be served; answer and drop the connection.
    Reject(Response),
}

enum Body {
    /// `Content-Length` body, taken from the buffer as is.
    Span { start: usize, end: usize },
    /// Chunked body, reassembled.
    Decoded(Bytes),
}

fn frame(buf: &[u8]) -> Frame {
    if buf.is_empty() {
        return Frame::NeedMore;
    }

    let (request, body_offset) = match Request::parse(buf) {
        Ok(pair) => pair,
        Err(RequestError::Incomplete) => return Frame::NeedMore,
        Err(e) => return Frame::Reject(bad_request(&e)),
    };

    let chunked = match request.is_chunked() {
        Ok(chunked) => chunked,
        Err(e @ RequestError::UnsupportedTransferEncoding { .. }) => {
            return Frame::Reject(Response::text(
                StatusCode::NotImplemented,
                format!("Not Implemented: {e}"),
            ));
        }
        Err(e) => return Frame::Reject(bad_request(&e)),
    };

    if chunked {
        return match decode_chunked(&buf[body_offset..]) {
            Ok(Some((body, used))) => Frame::Ready {
                request,
                body: Body::Decoded(body),
                total: body_offset + used,
            },
            Ok(None) => Frame::AwaitBody {
                expect_continue: request.expects_continue(),
            },
            Err(response) => Frame::Reject(response),
        };
    }

    let content_length = match request.content_length() {
        Ok(n) => n,
        Err(e) => return Frame::Reject(bad_request(&e)),
    };

    let total = body_offset.saturating_add(content_length);
    if total > MAX_REQUEST_SIZE {
        return Frame::Reject(too_large());
    }
    if buf.len() < total {
        return Frame::AwaitBody {
            expect_continue: request.expects_continue(),
        };
    }

    Frame::Ready {
        request,
        body: Body::Span {
            start: body_offset,
            end: total,
        },
        total,
    }
}

/// Reassembles a chunked body from `buf`, which starts right after the head.
///
/// Returns the body and the number of bytes consumed (trailers included), or
/// `None` while the terminating chunk has not arrived.
fn decode_chunked(buf: &[u8]) -> Result<Option<(Bytes, usize)>, Response> {
    let mut body = BytesMut::new();
    let mut pos = 0;

    loop {
        let (line_len, size) = match httparse::parse_chunk_size(&buf[pos..]) {
            Ok(httparse::Status::Complete(pair)) => pair,
            Ok(httparse::Status::Partial) => return Ok(None),
            Err(_) => return Err(bad_request(&RequestError::InvalidChunk)),
        };
        pos += line_len;

        let size = match usize::try_from(size) {
            Ok(n) if body.len().saturating_add(n) <= MAX_REQUEST_SIZE => n,
            _ => return Err(too_large()),
        };

        if size == 0 {
            // Trailer fields, if any, end with an empty line.
            loop {
                let Some(len) = buf[pos..].windows(2).position(|w| w == b"\r\n") else {
                    return Ok(None);
                };
                pos += len + 2;
                if len == 0 {
                    return Ok(Some((body.freeze(), pos)));
                }
            }
        }

        let end = pos + size;
        if buf.len() < end + 2 {
            return Ok(None);
        }
        if &buf[end..end + 2] != b"\r\n" {
            return Err(bad_request(&RequestError::InvalidChunk));
        }
        body.extend_from_slice(&buf[pos..end]);
        pos = end + 2;
    }
}

fn bad_request(e: &RequestError) -> Response {
    Response::text(StatusCode::BadRequest, format!("Bad Request: {e}"))
}

fn too_large() -> Response {
    Response::text(StatusCode::PayloadTooLarge, "Request entity too large")
}

async fn reject(
    stream: &mut TcpStream,
    peer_addr: SocketAddr,
    response: Response,
) -> Result<(), std::io::Error> {
    warn!(peer = %peer_addr, status = response.status().as_u16(), "rejecting request");
    stream
        .write_all(&response.keep_alive(false).into_bytes())
        .await?;
    stream.flush().await
}

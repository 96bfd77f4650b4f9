//! In-memory, full-duplex connection pair.
//!
//! # Responsibilities
//! - Carry bytes between two endpoints in write order
//! - Park readers until data arrives or the stream ends
//! - Report closed-pipe errors for use after close
//!
//! # Design Decisions
//! - One `Pipe` owns both queues and both closed flags; each `Endpoint` holds an
//!   `Arc<Pipe>` plus its role, so there is no reference cycle between the ends
//! - Queues are unbounded, writes never wait
//! - The lock is per pipe; unrelated pairs never contend
//! - Closing one side gives the peer end-of-stream after it drains; closing is
//!   not propagated further, each owner closes its own end

use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll, Waker};
use std::time::Instant;

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

use crate::config::HarnessConfig;
use crate::net::connection::{ConnectionId, Role};
use crate::observability::LogHook;

/// Error carried inside `io::ErrorKind::BrokenPipe` errors from an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum PipeError {
    #[error("io: read/write on closed pipe")]
    Closed,
}

impl From<PipeError> for io::Error {
    fn from(err: PipeError) -> Self {
        io::Error::new(io::ErrorKind::BrokenPipe, err)
    }
}

/// Whether an IO error came from using a closed endpoint.
pub fn is_closed_pipe(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::BrokenPipe
        && err
            .get_ref()
            .and_then(|inner| inner.downcast_ref::<PipeError>())
            .is_some()
}

/// One direction's worth of state, owned by the receiving side.
#[derive(Default)]
struct Side {
    /// Bytes written by the peer, not yet read here.
    incoming: BytesMut,
    /// This side has been closed.
    closed: bool,
    /// Reader parked on an empty `incoming`.
    read_waker: Option<Waker>,
}

struct Pipe {
    id: ConnectionId,
    sides: Mutex<[Side; 2]>,
}

impl Pipe {
    fn lock(&self) -> MutexGuard<'_, [Side; 2]> {
        // Every critical section leaves the state consistent, so a poisoned
        // lock is still usable.
        self.sides.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Create a linked client/server pair with default addresses and no log hook.
pub fn pair() -> (Endpoint, Endpoint) {
    pair_with(&HarnessConfig::default(), None)
}

/// Create a linked client/server pair.
///
/// Returns `(client, server)`. Bytes written to one are read from the other.
pub fn pair_with(config: &HarnessConfig, log: Option<LogHook>) -> (Endpoint, Endpoint) {
    let pipe = Arc::new(Pipe {
        id: ConnectionId::new(),
        sides: Mutex::new(Default::default()),
    });
    let client_addr = config.endpoints.client_addr;
    let server_addr = config.endpoints.server_addr;
    let trace_payloads = config.logging.trace_payloads;

    tracing::trace!(connection_id = %pipe.id, "Pipe created");

    let client = Endpoint {
        pipe: Arc::clone(&pipe),
        role: Role::Client,
        local_addr: client_addr,
        peer_addr: server_addr,
        log: log.clone(),
        trace_payloads,
    };
    let server = Endpoint {
        pipe,
        role: Role::Server,
        local_addr: server_addr,
        peer_addr: client_addr,
        log,
        trace_payloads,
    };
    (client, server)
}

/// One end of an in-memory duplex pipe.
///
/// Implements [`AsyncRead`] and [`AsyncWrite`], so anything that runs over a
/// `TcpStream` (hyper, tokio-tungstenite) runs over an endpoint. Dropping an
/// endpoint closes it.
pub struct Endpoint {
    pipe: Arc<Pipe>,
    role: Role,
    local_addr: SocketAddr,
    peer_addr: SocketAddr,
    log: Option<LogHook>,
    trace_payloads: bool,
}

impl Endpoint {
    /// Identifier shared by both ends of this pipe.
    pub fn id(&self) -> ConnectionId {
        self.pipe.id
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// Placeholder address of this end.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Placeholder address of the other end.
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Accepted for API parity with sockets; this transport never times out.
    pub fn set_deadline(&self, _deadline: Option<Instant>) -> io::Result<()> {
        Ok(())
    }

    /// Accepted for API parity with sockets; this transport never times out.
    pub fn set_read_deadline(&self, _deadline: Option<Instant>) -> io::Result<()> {
        Ok(())
    }

    /// Accepted for API parity with sockets; this transport never times out.
    pub fn set_write_deadline(&self, _deadline: Option<Instant>) -> io::Result<()> {
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.pipe.lock()[self.role.index()].closed
    }

    pub fn peer_closed(&self) -> bool {
        self.pipe.lock()[self.role.peer().index()].closed
    }

    /// Number of bytes queued for this end and not yet read.
    pub fn buffered(&self) -> usize {
        self.pipe.lock()[self.role.index()].incoming.len()
    }

    /// Close this end.
    ///
    /// Idempotent. A reader parked on the peer wakes and sees end-of-stream
    /// once it drains; a reader parked on this end wakes with a closed-pipe
    /// error.
    pub fn close(&self) {
        let (own, peer) = {
            let mut sides = self.pipe.lock();
            let me = self.role.index();
            if sides[me].closed {
                return;
            }
            sides[me].closed = true;
            let own = sides[me].read_waker.take();
            let peer = sides[self.role.peer().index()].read_waker.take();
            (own, peer)
        };
        if let Some(waker) = own {
            waker.wake();
        }
        if let Some(waker) = peer {
            waker.wake();
        }

        tracing::trace!(connection_id = %self.pipe.id, role = %self.role, "Endpoint closed");
        self.emit(format_args!("close"));
    }

    /// Push bytes back in front of this end's unread data.
    ///
    /// The next read returns `data` before anything already queued.
    pub fn unread(&self, data: &[u8]) {
        if data.is_empty() {
            return;
        }
        let waker = {
            let mut sides = self.pipe.lock();
            let side = &mut sides[self.role.index()];
            let rest = std::mem::take(&mut side.incoming);
            side.incoming.reserve(data.len() + rest.len());
            side.incoming.extend_from_slice(data);
            side.incoming.extend_from_slice(&rest);
            side.read_waker.take()
        };
        if let Some(waker) = waker {
            waker.wake();
        }
    }

    fn emit(&self, args: std::fmt::Arguments<'_>) {
        if let Some(log) = &self.log {
            log.log(&format!("{} {}: {}", self.pipe.id, self.role, args));
        }
    }
}

impl AsyncRead for Endpoint {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if buf.remaining() == 0 {
            return Poll::Ready(Ok(()));
        }

        let mut sides = this.pipe.lock();
        let peer_closed = sides[this.role.peer().index()].closed;
        let side = &mut sides[this.role.index()];

        if side.closed {
            return Poll::Ready(Err(PipeError::Closed.into()));
        }

        if !side.incoming.is_empty() {
            let n = buf.remaining().min(side.incoming.len());
            let chunk = side.incoming.split_to(n);
            drop(sides);
            buf.put_slice(&chunk);
            tracing::trace!(connection_id = %this.pipe.id, role = %this.role, bytes = n, "Read");
            return Poll::Ready(Ok(()));
        }

        if peer_closed {
            drop(sides);
            this.emit(format_args!("read: end of stream"));
            return Poll::Ready(Ok(()));
        }

        let stale = side
            .read_waker
            .as_ref()
            .map_or(true, |waker| !waker.will_wake(cx.waker()));
        if stale {
            side.read_waker = Some(cx.waker().clone());
        }
        Poll::Pending
    }
}

impl AsyncWrite for Endpoint {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        let waker = {
            let mut sides = this.pipe.lock();
            let peer = this.role.peer().index();
            if sides[this.role.index()].closed || sides[peer].closed {
                drop(sides);
                this.emit(format_args!("write: closed pipe"));
                return Poll::Ready(Err(PipeError::Closed.into()));
            }
            sides[peer].incoming.extend_from_slice(buf);
            sides[peer].read_waker.take()
        };
        if let Some(waker) = waker {
            waker.wake();
        }

        tracing::trace!(connection_id = %this.pipe.id, role = %this.role, bytes = buf.len(), "Write");
        if this.trace_payloads {
            this.emit(format_args!("write {} bytes: {}", buf.len(), buf.escape_ascii()));
        } else {
            this.emit(format_args!("write {} bytes", buf.len()));
        }
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.close();
        Poll::Ready(Ok(()))
    }
}

impl Drop for Endpoint {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Endpoint")
            .field("id", &self.pipe.id)
            .field("role", &self.role)
            .field("local_addr", &self.local_addr)
            .field("peer_addr", &self.peer_addr)
            .finish()
    }
}

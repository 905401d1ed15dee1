use std::{
    fmt,
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use futures_util::{SinkExt, StreamExt};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    select,
    sync::Mutex,
    time::timeout,
};
use tokio_util::{
    codec::{FramedRead, FramedWrite},
    sync::CancellationToken,
};
use tracing::{debug, warn};

use crate::{
    codec::ServerCodec,
    error::{DecodeError, ProtocolViolation, TransportError},
    message::{Inbound, Outbound},
    protocol::Protocol,
};

pub type ConnectionId = u64;

type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Write side of one connection.
///
/// Replies from the connection's own handler and broadcasts from other
/// handlers share this lock, so frames never interleave on the wire.
pub struct Outbox {
    writer: Mutex<Option<FramedWrite<BoxedWriter, ServerCodec>>>,
    write_timeout: Duration,
    closed: AtomicBool,
}

impl Outbox {
    pub fn new<W>(writer: W, write_timeout: Duration) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let writer: BoxedWriter = Box::new(writer);
        Self {
            writer: Mutex::new(Some(FramedWrite::new(writer, ServerCodec::default()))),
            write_timeout,
            closed: AtomicBool::new(false),
        }
    }

    /// Writes and flushes one frame, waiting at most the write timeout,
    /// including the wait for the lock.
    pub async fn send(&self, frame: Outbound) -> Result<(), TransportError> {
        let write = async {
            let mut writer = self.writer.lock().await;
            let writer = writer.as_mut().ok_or(TransportError::Closed)?;
            writer.send(frame).await
        };
        timeout(self.write_timeout, write)
            .await
            .map_err(|_| TransportError::WriteTimeout(self.write_timeout))?
    }

    /// Flushes and shuts down the write half. Later sends fail with
    /// [`TransportError::Closed`].
    pub async fn close(&self) {
        self.closed.store(true, Ordering::Release);
        let Ok(mut writer) = timeout(self.write_timeout, self.writer.lock()).await else {
            warn!("outbox busy past write timeout; leaving it to the pending writer");
            return;
        };
        if let Some(mut writer) = writer.take() {
            match timeout(self.write_timeout, writer.close()).await {
                Ok(Err(err)) => debug!(error = %err, "failed to shut down write half"),
                Err(_) => debug!("write half did not shut down within timeout"),
                Ok(Ok(())) => {}
            }
        }
    }

    /// Whether [`Outbox::close`] has been called.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

/// Cheap, cloneable reference to a connection, stored in sessions.
#[derive(Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    peer: Option<SocketAddr>,
    outbox: Arc<Outbox>,
}

impl ConnectionHandle {
    pub fn new(id: ConnectionId, peer: Option<SocketAddr>, outbox: Outbox) -> Self {
        Self {
            id,
            peer,
            outbox: Arc::new(outbox),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub async fn send(&self, frame: Outbound) -> Result<(), TransportError> {
        self.outbox.send(frame).await
    }

    pub async fn close(&self) {
        self.outbox.close().await;
    }

    pub fn is_closed(&self) -> bool {
        self.outbox.is_closed()
    }
}

impl fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("id", &self.id)
            .field("peer", &self.peer)
            .finish_non_exhaustive()
    }
}

type ReadResult = Option<Result<Result<Inbound, DecodeError>, TransportError>>;

/// Drives one connection until the peer closes it, reading fails, or
/// `shutdown` is cancelled.
///
/// On exit every session bound to the connection is released and the outbox
/// is closed.
pub async fn handle_connection<R>(
    reader: R,
    connection: ConnectionHandle,
    protocol: Arc<Protocol>,
    max_frame_len: usize,
    shutdown: CancellationToken,
) where
    R: AsyncRead + Unpin,
{
    debug!(peer = ?connection.peer, "connection opened");
    let mut frames = FramedRead::new(reader, ServerCodec::new(max_frame_len));

    loop {
        select! {
            biased;
            _ = shutdown.cancelled() => {
                debug!("shutdown requested; closing connection");
                break;
            }
            next = frames.next() => {
                if !handle_read(next, &connection, &protocol).await {
                    break;
                }
            }
        }
    }

    protocol.disconnect(&connection, !shutdown.is_cancelled()).await;
    connection.close().await;
    debug!("connection closed");
}

/// Returns `false` once the connection should stop reading.
async fn handle_read(
    next: ReadResult,
    connection: &ConnectionHandle,
    protocol: &Protocol,
) -> bool {
    match next {
        None => {
            debug!("peer closed the stream");
            false
        }
        Some(Err(err)) => {
            warn!(error = %err, "failed to read from connection");
            false
        }
        Some(Ok(Err(err))) => {
            warn!(error = %err, "dropping undecodable frame");
            reply(
                connection,
                Outbound::rejection("", ProtocolViolation::MalformedFrame),
            )
            .await;
            true
        }
        Some(Ok(Ok(frame))) => {
            debug!(?frame, "received frame");
            if let Some(answer) = protocol.handle(connection, frame).await {
                reply(connection, answer).await;
            }
            true
        }
    }
}

async fn reply(connection: &ConnectionHandle, frame: Outbound) {
    if let Err(err) = connection.send(frame).await {
        warn!(error = %err, "failed to write reply");
    }
}

//! Per-connection I/O: one reader loop and one writer task.
//!
//! The reader accumulates bytes in a `BytesMut`, peels complete frames off
//! the front with the codec, and hands each packet to the [`Session`].  The
//! writer drains the session's outbound queue to the socket.  Keeping the two
//! apart means a subscriber that is slow to read never stalls its own
//! reader, and a publisher never waits on anybody's socket.
//!
//! # Why accumulate bytes?
//!
//! TCP is a byte stream: one `read` may return half a frame or three frames.
//! A partial frame is not an error.  The decoder reports
//! `InsufficientData` without consuming anything and the loop reads more.

use std::fmt;
use std::io;

use bytes::{Buf, Bytes, BytesMut};
use lanmq_core::protocol::decode_packet_limited;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{sleep_until, timeout_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::application::session::{Session, SessionError, SessionFlow};

const READ_CHUNK: usize = 4096;

/// Why a connection ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEnd {
    /// The client sent DISCONNECT.
    ClientDisconnected,
    /// The client closed its end of the socket.
    PeerClosed,
    /// The idle timeout passed without the client's input being read.
    IdleTimeout,
    /// The client sent something the broker cannot accept.
    ProtocolViolation(String),
    /// A read or write on the socket failed.
    Transport(String),
    /// The broker asked the session to stop.
    Cancelled,
}

impl SessionEnd {
    /// Whether frames already queued for the client should still be written.
    ///
    /// A client that disconnected or whose socket failed gets nothing more.
    fn flushes_outbound(&self) -> bool {
        matches!(
            self,
            SessionEnd::Cancelled | SessionEnd::IdleTimeout | SessionEnd::ProtocolViolation(_)
        )
    }
}

impl fmt::Display for SessionEnd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionEnd::ClientDisconnected => f.write_str("client disconnected"),
            SessionEnd::PeerClosed => f.write_str("peer closed connection"),
            SessionEnd::IdleTimeout => f.write_str("idle timeout"),
            SessionEnd::ProtocolViolation(reason) => write!(f, "protocol violation: {reason}"),
            SessionEnd::Transport(reason) => write!(f, "transport error: {reason}"),
            SessionEnd::Cancelled => f.write_str("cancelled"),
        }
    }
}

impl From<SessionError> for SessionEnd {
    fn from(e: SessionError) -> Self {
        match e {
            SessionError::Closed => SessionEnd::Cancelled,
            SessionError::OutboundClosed => SessionEnd::Transport(e.to_string()),
            other => SessionEnd::ProtocolViolation(other.to_string()),
        }
    }
}

/// Instruction from the reader to the writer once reading has stopped.
#[derive(Debug, Clone, Copy)]
enum WriterStop {
    /// Write whatever is already queued, then shut the socket down.
    Flush,
    /// Stop immediately.
    Abandon,
}

// ── Public API ────────────────────────────────────────────────────────────────

/// Serves one client connection until it ends, then tears the session down.
///
/// Generic over the stream so tests can drive it with `tokio::io::duplex`.
/// Teardown (registry purge) always runs before this returns, whatever the
/// reason the connection ended.
pub async fn serve_connection<S>(
    stream: S,
    mut session: Session,
    outbound_rx: mpsc::Receiver<Bytes>,
) -> SessionEnd
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let grace = session.config().shutdown_grace;
    let cancel = session.handle().cancel_token().clone();
    let (read_half, write_half) = tokio::io::split(stream);

    let (stop_tx, stop_rx) = oneshot::channel();
    let mut writer = tokio::spawn(run_writer(write_half, outbound_rx, stop_rx, cancel));

    let mut end = run_reader(read_half, &mut session).await;
    session.close();

    let stop = if end.flushes_outbound() {
        WriterStop::Flush
    } else {
        WriterStop::Abandon
    };
    // The writer may already have exited on a write error.
    let _ = stop_tx.send(stop);

    match tokio::time::timeout(grace, &mut writer).await {
        Ok(Ok(Ok(()))) => {}
        Ok(Ok(Err(e))) => {
            debug!(session_id = %session.handle().id(), "writer stopped: {e}");
            if end == SessionEnd::Cancelled {
                end = SessionEnd::Transport(e.to_string());
            }
        }
        Ok(Err(join_err)) => {
            warn!(session_id = %session.handle().id(), "writer task failed: {join_err}");
        }
        Err(_) => {
            warn!(
                session_id = %session.handle().id(),
                "outbound queue not flushed within {grace:?}; dropping connection"
            );
            writer.abort();
        }
    }

    end
}

// ── Reader ────────────────────────────────────────────────────────────────────

async fn run_reader<R>(mut reader: R, session: &mut Session) -> SessionEnd
where
    R: AsyncRead + Unpin,
{
    let cancel = session.handle().cancel_token().clone();
    let limit = session.config().max_remaining_length;
    let mut recv_buf = BytesMut::with_capacity(READ_CHUNK);

    loop {
        // Process every complete frame already buffered.
        loop {
            let (packet, consumed) = match decode_packet_limited(&recv_buf, limit) {
                Ok(decoded) => decoded,
                Err(e) if e.is_incomplete() => break,
                Err(e) => return SessionEnd::ProtocolViolation(e.to_string()),
            };
            recv_buf.advance(consumed);

            // A reply can wait on a full outbound queue when the client stops
            // reading; the idle deadline still applies while it waits.
            let deadline = session.idle_deadline();
            let flow = tokio::select! {
                biased;
                _ = cancel.cancelled() => return SessionEnd::Cancelled,
                _ = sleep_until(deadline) => return SessionEnd::IdleTimeout,
                flow = session.handle_packet(packet) => flow,
            };
            match flow {
                Ok(SessionFlow::Continue) => {}
                Ok(SessionFlow::Disconnect) => return SessionEnd::ClientDisconnected,
                Err(e) => return e.into(),
            }
        }

        recv_buf.reserve(READ_CHUNK);
        let deadline = session.idle_deadline();
        let read = tokio::select! {
            biased;
            _ = cancel.cancelled() => return SessionEnd::Cancelled,
            read = timeout_at(deadline, reader.read_buf(&mut recv_buf)) => read,
        };

        match read {
            Err(_elapsed) => return SessionEnd::IdleTimeout,
            Ok(Ok(0)) => return SessionEnd::PeerClosed,
            Ok(Ok(_)) => session.touch(),
            Ok(Err(e)) => return SessionEnd::Transport(e.to_string()),
        }
    }
}

// ── Writer ────────────────────────────────────────────────────────────────────

async fn run_writer<W>(
    mut writer: W,
    mut outbound_rx: mpsc::Receiver<Bytes>,
    mut stop_rx: oneshot::Receiver<WriterStop>,
    cancel: CancellationToken,
) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let result = write_until_stopped(&mut writer, &mut outbound_rx, &mut stop_rx).await;
    if result.is_err() {
        // Wake the reader so the session is torn down promptly.
        cancel.cancel();
    }
    result
}

async fn write_until_stopped<W>(
    writer: &mut W,
    outbound_rx: &mut mpsc::Receiver<Bytes>,
    stop_rx: &mut oneshot::Receiver<WriterStop>,
) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let stop = loop {
        tokio::select! {
            biased;
            stop = &mut *stop_rx => break stop.unwrap_or(WriterStop::Abandon),
            frame = outbound_rx.recv() => match frame {
                Some(frame) => writer.write_all(&frame).await?,
                None => break WriterStop::Flush,
            },
        }
    };

    if let WriterStop::Flush = stop {
        outbound_rx.close();
        while let Some(frame) = outbound_rx.recv().await {
            writer.write_all(&frame).await?;
        }
        writer.flush().await?;
        writer.shutdown().await?;
    }
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────

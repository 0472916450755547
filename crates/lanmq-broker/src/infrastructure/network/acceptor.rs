//! Connection acceptor: the listening socket and the accept loop.
//!
//! One task per accepted client, tracked in a `JoinSet` so shutdown can wait
//! for them.  The loop never blocks on a client: it registers the session,
//! spawns the connection task and goes straight back to `accept()`.
//!
//! # Shutdown
//!
//! When the broker's root token is cancelled the loop stops accepting and
//! closes the listener, every session is told to stop, and the acceptor
//! waits up to `shutdown_grace` for the connection tasks to finish flushing.
//! Whatever is still running after that is aborted.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use bytes::Bytes;
use thiserror::Error;
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::application::{Broker, Session};
use crate::domain::BrokerConfig;
use crate::infrastructure::network::connection::{serve_connection, SessionEnd};
use crate::infrastructure::network::local_addr::detect_lan_ip;

/// `ENFILE`: the system-wide open file table is full.
#[cfg(unix)]
const ENFILE: i32 = 23;
/// `EMFILE`: this process has hit its descriptor limit.
#[cfg(unix)]
const EMFILE: i32 = 24;

/// Errors raised by the listening socket.
#[derive(Debug, Error)]
pub enum NetworkError {
    /// The listener could not be created or bound.
    #[error("failed to bind listener on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    /// `accept()` failed in a way that retrying will not fix.
    #[error("accept failed: {0}")]
    Accept(#[source] io::Error),
}

// ── Acceptor ──────────────────────────────────────────────────────────────────

/// A bound listener plus the broker every accepted connection joins.
pub struct Acceptor {
    listener: TcpListener,
    broker: Arc<Broker>,
}

impl Acceptor {
    /// Binds the listening socket described by the broker's configuration.
    ///
    /// `SO_REUSEADDR` is set so a restarted broker can rebind while old
    /// connections linger in `TIME_WAIT`.
    ///
    /// # Errors
    ///
    /// Returns [`NetworkError::Bind`] if the socket cannot be created, bound
    /// or put into listening mode (port in use, missing permission).
    pub fn bind(broker: Arc<Broker>) -> Result<Self, NetworkError> {
        let config = broker.config();
        let addr = config.bind_addr;
        let bind_err = |source| NetworkError::Bind { addr, source };

        let socket = if addr.is_ipv4() {
            TcpSocket::new_v4()
        } else {
            TcpSocket::new_v6()
        }
        .map_err(bind_err)?;
        socket.set_reuseaddr(true).map_err(bind_err)?;
        socket.bind(addr).map_err(bind_err)?;
        let listener = socket.listen(config.listen_backlog).map_err(bind_err)?;

        Ok(Self { listener, broker })
    }

    /// The address actually bound.  Differs from the configured one when the
    /// configured port was 0.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accepts connections until the broker's shutdown token is cancelled,
    /// then drains the sessions.
    ///
    /// Transient accept failures (a peer resetting before `accept()` returns,
    /// descriptor exhaustion) are logged and retried after
    /// `accept_retry_delay`.
    ///
    /// # Errors
    ///
    /// Returns [`NetworkError::Accept`] when the listener itself fails.  The
    /// sessions are shut down first, exactly as for a requested shutdown.
    pub async fn run(self) -> Result<(), NetworkError> {
        let Acceptor { listener, broker } = self;
        let shutdown = broker.shutdown_token().clone();
        let retry_delay = broker.config().accept_retry_delay;
        let grace = broker.config().shutdown_grace;
        let mut sessions: JoinSet<()> = JoinSet::new();

        let result = loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => {
                    info!("shutdown requested; no longer accepting connections");
                    break Ok(());
                }

                Some(joined) = sessions.join_next(), if !sessions.is_empty() => {
                    if let Err(e) = joined {
                        warn!("connection task failed: {e}");
                    }
                }

                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        spawn_connection(&broker, &mut sessions, stream, peer);
                    }
                    Err(e) if is_transient(&e) => {
                        warn!("accept failed: {e}; retrying in {retry_delay:?}");
                        tokio::select! {
                            _ = shutdown.cancelled() => break Ok(()),
                            _ = sleep(retry_delay) => {}
                        }
                    }
                    Err(e) => {
                        error!("listener failed: {e}");
                        break Err(NetworkError::Accept(e));
                    }
                },
            }
        };

        drop(listener);
        drain_sessions(&broker, sessions, grace).await;
        result
    }
}

fn spawn_connection(
    broker: &Arc<Broker>,
    sessions: &mut JoinSet<()>,
    stream: TcpStream,
    peer: SocketAddr,
) {
    // Control messages are tiny; do not let Nagle hold them back.
    if let Err(e) = stream.set_nodelay(true) {
        debug!(%peer, "cannot set TCP_NODELAY: {e}");
    }

    let (handle, outbound_rx) = broker.open_session(peer);
    info!(
        session_id = %handle.id(),
        %peer,
        live = broker.session_count(),
        "connection accepted"
    );

    let session = Session::new(Arc::clone(broker), handle);
    sessions.spawn(handle_connection(stream, session, outbound_rx));
}

/// Entry point of each connection task: serves it and logs how it ended.
async fn handle_connection(
    stream: TcpStream,
    session: Session,
    outbound_rx: mpsc::Receiver<Bytes>,
) {
    let handle = Arc::clone(session.handle());
    let end = serve_connection(stream, session, outbound_rx).await;

    let client_id = handle.client_id().unwrap_or("-");
    match end {
        SessionEnd::ProtocolViolation(_) | SessionEnd::Transport(_) => warn!(
            session_id = %handle.id(),
            client_id,
            peer = %handle.peer_addr(),
            "connection ended: {end}"
        ),
        _ => debug!(
            session_id = %handle.id(),
            client_id,
            peer = %handle.peer_addr(),
            "connection ended: {end}"
        ),
    }
}

async fn drain_sessions(broker: &Broker, mut sessions: JoinSet<()>, grace: Duration) {
    broker.broadcast_shutdown();

    let wait_all = async {
        while sessions.join_next().await.is_some() {}
    };
    if timeout(grace, wait_all).await.is_err() {
        warn!(
            remaining = sessions.len(),
            "sessions did not finish within {grace:?}; aborting"
        );
        sessions.abort_all();
    }
}

/// Whether an `accept()` error concerns a single connection attempt or a
/// passing resource shortage rather than the listener itself.
fn is_transient(e: &io::Error) -> bool {
    use io::ErrorKind::*;

    if matches!(
        e.kind(),
        ConnectionAborted | ConnectionReset | ConnectionRefused | Interrupted | WouldBlock | TimedOut
    ) {
        return true;
    }

    #[cfg(unix)]
    {
        matches!(e.raw_os_error(), Some(ENFILE) | Some(EMFILE))
    }
    #[cfg(not(unix))]
    {
        false
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

/// Validates `config`, binds the listener and runs the broker until
/// `shutdown` is cancelled.
///
/// # Errors
///
/// Returns an error if the configuration is invalid, the listener cannot be
/// bound, or the listener fails while running.
pub async fn run_broker(config: BrokerConfig, shutdown: CancellationToken) -> anyhow::Result<()> {
    config
        .validate()
        .map_err(anyhow::Error::msg)
        .context("invalid broker configuration")?;

    let broker = Arc::new(Broker::new(config, shutdown));
    let acceptor = Acceptor::bind(Arc::clone(&broker))?;
    let local = acceptor
        .local_addr()
        .context("cannot read the listener's local address")?;

    info!(
        listen = %local,
        "broker listening; LAN clients connect to {}:{}",
        detect_lan_ip(),
        local.port()
    );

    acceptor.run().await?;
    info!("broker stopped");
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────

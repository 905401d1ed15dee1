use std::{future::Future, io, net::SocketAddr, sync::Arc, time::Duration};

use tokio::{
    net::{TcpListener, TcpStream},
    select,
    task::{JoinError, JoinSet},
    time::timeout,
};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span, warn};

use crate::{
    config::ServerConfig,
    connection::{ConnectionHandle, ConnectionId, Outbox, handle_connection},
    error::{ServerError, TransportError},
    protocol::Protocol,
    registry::SessionRegistry,
};

/// Binds `config.listen` and relays until Ctrl-C, then drains connections.
pub async fn serve(config: ServerConfig) -> Result<(), ServerError> {
    let server = Server::bind(config).await?;
    let addr = server.local_addr().map_err(TransportError::Io)?;
    info!("chat relay listening on {}", addr);
    server.run_until_ctrl_c().await
}

/// Requests a running [`Server`] to stop accepting and drain its handlers.
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    token: CancellationToken,
}

impl ShutdownHandle {
    pub fn shutdown(&self) {
        self.token.cancel();
    }

    pub fn is_shutdown(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// Accept loop and shutdown coordinator.
pub struct Server {
    listener: TcpListener,
    config: ServerConfig,
    protocol: Arc<Protocol>,
    shutdown: CancellationToken,
}

impl Server {
    pub async fn bind(config: ServerConfig) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(config.listen)
            .await
            .map_err(|source| TransportError::Bind {
                addr: config.listen,
                source,
            })?;
        Ok(Self::new(listener, config))
    }

    /// Wraps an already bound listener; `config.listen` is ignored.
    pub fn new(listener: TcpListener, config: ServerConfig) -> Self {
        let registry = Arc::new(SessionRegistry::new());
        let protocol = Arc::new(Protocol::new(registry, config.broadcast_scope));
        Self {
            listener,
            config,
            protocol,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn registry(&self) -> Arc<SessionRegistry> {
        Arc::clone(self.protocol.registry())
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            token: self.shutdown.clone(),
        }
    }

    /// Runs until [`ShutdownHandle::shutdown`] is called.
    pub async fn run(self) -> Result<(), ServerError> {
        self.run_until(std::future::pending()).await
    }

    pub async fn run_until_ctrl_c(self) -> Result<(), ServerError> {
        self.run_until(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(error = ?err, "failed to install ctrl-c handler");
                std::future::pending::<()>().await;
            }
            info!("received ctrl-c; chat relay closing");
        })
        .await
    }

    /// Accepts connections until `signal` resolves or shutdown is requested,
    /// then closes the listener and waits up to the configured shutdown
    /// timeout for every handler to finish.
    pub async fn run_until<F>(self, signal: F) -> Result<(), ServerError>
    where
        F: Future<Output = ()> + Send,
    {
        let Server {
            listener,
            config,
            protocol,
            shutdown,
        } = self;
        tokio::pin!(signal);

        let mut handlers = JoinSet::new();
        let mut next_id: ConnectionId = 1;

        loop {
            select! {
                _ = &mut signal => break,
                _ = shutdown.cancelled() => break,
                Some(finished) = handlers.join_next(), if !handlers.is_empty() => {
                    log_handler_exit(finished);
                }
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        spawn_handler(
                            &mut handlers,
                            stream,
                            peer,
                            next_id,
                            &config,
                            &protocol,
                            &shutdown,
                        );
                        next_id += 1;
                    }
                    Err(err) => warn!(error = ?err, "failed to accept connection"),
                },
            }
        }

        drop(listener);
        shutdown.cancel();
        drain(&mut handlers, config.shutdown_timeout).await
    }
}

fn spawn_handler(
    handlers: &mut JoinSet<()>,
    stream: TcpStream,
    peer: SocketAddr,
    id: ConnectionId,
    config: &ServerConfig,
    protocol: &Arc<Protocol>,
    shutdown: &CancellationToken,
) {
    let (reader, writer) = stream.into_split();
    let outbox = Outbox::new(writer, config.write_timeout);
    let connection = ConnectionHandle::new(id, Some(peer), outbox);
    let span = info_span!("connection", id, %peer);
    handlers.spawn(
        handle_connection(
            reader,
            connection,
            Arc::clone(protocol),
            config.max_frame_len,
            shutdown.child_token(),
        )
        .instrument(span),
    );
}

/// Waits for every handler, giving up after `limit`. Handlers still running
/// at that point are aborted.
async fn drain(handlers: &mut JoinSet<()>, limit: Duration) -> Result<(), ServerError> {
    info!(open = handlers.len(), "draining connection handlers");
    let all_finished = async {
        while let Some(finished) = handlers.join_next().await {
            log_handler_exit(finished);
        }
    };

    let drained = timeout(limit, all_finished).await;
    if drained.is_err() {
        let remaining = handlers.len();
        warn!(remaining, ?limit, "connection handlers did not finish in time");
        handlers.abort_all();
        return Err(ServerError::ShutdownTimeout {
            timeout: limit,
            remaining,
        });
    }

    info!("chat relay stopped");
    Ok(())
}

fn log_handler_exit(result: Result<(), JoinError>) {
    match result {
        Ok(()) => debug!("connection handler finished"),
        Err(err) if err.is_panic() => warn!(error = ?err, "connection handler panicked"),
        Err(err) => debug!(error = ?err, "connection handler cancelled"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn drain_succeeds_when_handlers_finish() {
        let mut handlers = JoinSet::new();
        for delay in [5, 10, 20] {
            handlers.spawn(tokio::time::sleep(Duration::from_millis(delay)));
        }

        drain(&mut handlers, Duration::from_secs(1))
            .await
            .expect("handlers finish well within the limit");
        assert!(handlers.is_empty());
    }

    #[tokio::test]
    async fn drain_reports_stalled_handlers() {
        let mut handlers = JoinSet::new();
        handlers.spawn(async {});
        handlers.spawn(tokio::time::sleep(Duration::from_secs(60)));

        let started = tokio::time::Instant::now();
        let err = drain(&mut handlers, Duration::from_millis(100))
            .await
            .expect_err("stalled handler must time out");
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(matches!(
            err,
            ServerError::ShutdownTimeout { remaining: 1, .. }
        ));
    }

    #[tokio::test]
    async fn shutdown_handle_stops_the_accept_loop() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let server = Server::new(listener, ServerConfig::default());
        let handle = server.shutdown_handle();
        let running = tokio::spawn(server.run());

        handle.shutdown();
        let result = tokio::time::timeout(Duration::from_secs(1), running)
            .await
            .expect("server should stop promptly")
            .expect("server task");
        assert!(result.is_ok());
        assert!(handle.is_shutdown());
    }
}

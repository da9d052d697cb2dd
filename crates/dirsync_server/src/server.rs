//! TCP listener and accept loop.

use crate::auth::Authenticator;
use crate::config::ServerConfig;
use crate::connection::Connection;
use crate::error::{ServerError, ServerResult};
use crate::handler::ServerContext;
use bytes::BytesMut;
use dirsync_journal::DirectoryRegistry;
use dirsync_protocol::{Keyword, Reply, Status};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::Instrument;

/// The sync server.
pub struct SyncServer {
    listener: TcpListener,
    context: ServerContext,
}

impl SyncServer {
    /// Validates `config`, creates the root directory and binds the listener.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Config`] for an invalid configuration and
    /// [`ServerError::Io`] if the root cannot be created or the address
    /// cannot be bound.
    pub async fn bind(config: ServerConfig) -> ServerResult<Self> {
        config.validate()?;
        std::fs::create_dir_all(&config.root)?;
        let listener = TcpListener::bind(config.bind_addr).await?;
        tracing::info!(
            addr = %listener.local_addr()?,
            root = %config.root.display(),
            "sync server listening"
        );
        Ok(Self {
            listener,
            context: ServerContext::new(config),
        })
    }

    /// Installs an authenticator.
    #[must_use]
    pub fn with_authenticator(mut self, authenticator: Arc<dyn Authenticator>) -> Self {
        self.context = self.context.with_authenticator(authenticator);
        self
    }

    /// Returns the bound address.
    pub fn local_addr(&self) -> ServerResult<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Returns the directory registry.
    #[must_use]
    pub fn registry(&self) -> &DirectoryRegistry {
        self.context.registry()
    }

    /// Serves until the process is stopped.
    pub async fn run(self) -> ServerResult<()> {
        self.run_until(std::future::pending()).await
    }

    /// Serves until `shutdown` resolves, then closes every connection.
    ///
    /// # Errors
    ///
    /// Returns an error only if accepting fails.
    pub async fn run_until(self, shutdown: impl Future<Output = ()>) -> ServerResult<()> {
        let Self { listener, context } = self;
        let max_connections = context.config().max_connections;
        let context = Arc::new(context);
        let permits = Arc::new(Semaphore::new(max_connections));
        let mut connections = JoinSet::new();

        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    let (stream, peer) = accepted?;
                    let Ok(permit) = Arc::clone(&permits).try_acquire_owned() else {
                        tracing::warn!(%peer, max_connections, "connection limit reached");
                        connections.spawn(reject(stream));
                        continue;
                    };
                    let context = Arc::clone(&context);
                    let span = tracing::info_span!("connection", %peer);
                    connections.spawn(
                        async move {
                            tracing::info!("connection opened");
                            serve(stream, peer, context).await;
                            tracing::info!("connection closed");
                            drop(permit);
                        }
                        .instrument(span),
                    );
                }
                Some(joined) = connections.join_next(), if !connections.is_empty() => {
                    if let Err(err) = joined {
                        if err.is_panic() {
                            tracing::error!(error = %err, "connection task panicked");
                        }
                    }
                }
                () = &mut shutdown => {
                    tracing::info!(active = connections.len(), "shutdown requested");
                    break;
                }
            }
        }

        connections.shutdown().await;
        tracing::info!("sync server stopped");
        Ok(())
    }
}

async fn serve(stream: TcpStream, peer: SocketAddr, context: Arc<ServerContext>) {
    if let Err(err) = stream.set_nodelay(true) {
        tracing::debug!(error = %err, "set_nodelay failed");
    }
    let (reader, writer) = stream.into_split();
    match Connection::new(reader, writer, context, Some(peer)).run().await {
        Ok(()) => {}
        Err(ServerError::Io(err)) => tracing::debug!(error = %err, "connection ended"),
        Err(err) => tracing::warn!(error = %err, "connection ended"),
    }
}

async fn reject(mut stream: TcpStream) {
    let mut buf = BytesMut::new();
    Reply::new(None, Keyword::Error, Status::Unavailable, "too many connections").encode(&mut buf);
    let _ = stream.write_all(&buf).await;
    let _ = stream.shutdown().await;
}

//! Serve command implementation.

use dirsync_journal::JournalConfig;
use dirsync_server::{AllowList, ServerConfig, SyncServer};
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;

/// Arguments of `dirsync serve`.
#[derive(Debug)]
pub struct ServeOptions {
    /// Root directory.
    pub root: PathBuf,
    /// Listen address.
    pub bind: SocketAddr,
    /// Patches per segment.
    pub max_segment_patches: u64,
    /// Connection limit.
    pub max_connections: usize,
    /// Whether appends are synced.
    pub sync: bool,
    /// Peers allowed to subscribe and write; empty allows everyone.
    pub allow: Vec<IpAddr>,
}

impl ServeOptions {
    fn config(&self) -> ServerConfig {
        let journal = JournalConfig::new()
            .max_segment_patches(self.max_segment_patches)
            .sync_on_append(self.sync);
        let config = ServerConfig::new(self.bind, self.root.clone())
            .with_journal(journal)
            .with_max_connections(self.max_connections);
        if self.allow.is_empty() {
            config
        } else {
            config.with_auth()
        }
    }
}

/// Runs the server until Ctrl-C.
pub fn run(options: ServeOptions) -> Result<(), Box<dyn std::error::Error>> {
    let config = options.config();
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async {
        let mut server = SyncServer::bind(config).await?;
        if !options.allow.is_empty() {
            server = server.with_authenticator(Arc::new(AllowList::new(options.allow.clone())));
        }
        server
            .run_until(async {
                if let Err(err) = tokio::signal::ctrl_c().await {
                    tracing::error!(error = %err, "cannot listen for Ctrl-C");
                    std::future::pending::<()>().await;
                }
            })
            .await
    })?;
    Ok(())
}

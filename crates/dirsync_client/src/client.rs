//! The client connection.

use crate::applier::PatchApplier;
use crate::config::ClientConfig;
use crate::error::{ClientError, ClientResult};
use crate::reconcile::{LocalVersion, Reconciler};
use bytes::BytesMut;
use dirsync_codec::{Action, Record};
use dirsync_journal::{Directory, DirectoryRegistry, Version};
use dirsync_protocol::{
    Command, PatchMessage, ProtocolError, Reply, ServerMessage, ServerMessageDecoder,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{oneshot, Notify};
use tokio::task::JoinHandle;
use tracing::Instrument;

struct ReplicaState {
    reconciler: Reconciler,
    applier: PatchApplier,
    stopped: Option<String>,
}

impl ReplicaState {
    /// Buffers `patch` and applies what it can; returns the number applied.
    fn receive(&mut self, name: &str, patch: PatchMessage) -> usize {
        if self.stopped.is_some() {
            return 0;
        }
        match self.applier.receive(patch) {
            Ok(()) => self.drain(name),
            Err(err) => {
                self.stop(name, &err);
                0
            }
        }
    }

    fn drain(&mut self, name: &str) -> usize {
        if self.stopped.is_some() {
            return 0;
        }
        match self.applier.drain(&mut self.reconciler) {
            Ok(applied) => applied,
            Err(err) => {
                self.stop(name, &err);
                0
            }
        }
    }

    fn stop(&mut self, name: &str, err: &ClientError) {
        tracing::error!(directory = name, error = %err, "replica stopped applying patches");
        self.stopped = Some(err.to_string());
        self.applier.clear();
    }
}

struct Replica {
    name: String,
    directory: Arc<Directory>,
    state: Mutex<ReplicaState>,
}

struct Shared {
    config: ClientConfig,
    registry: DirectoryRegistry,
    sequence: Arc<AtomicU64>,
    replicas: Mutex<HashMap<String, Arc<Replica>>>,
    waiters: Mutex<HashMap<u64, oneshot::Sender<Reply>>>,
    applied: Notify,
    closed: AtomicBool,
}

impl Shared {
    fn next_seq(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::Relaxed)
    }

    fn replica(&self, name: &str) -> ClientResult<Arc<Replica>> {
        if let Some(replica) = self.replicas.lock().get(name) {
            return Ok(Arc::clone(replica));
        }
        let directory = self.registry.open(name, true)?;
        let mut replicas = self.replicas.lock();
        let replica = replicas.entry(name.to_string()).or_insert_with(|| {
            let applier =
                PatchApplier::new(name, Arc::clone(&directory), self.config.max_buffered);
            Arc::new(Replica {
                name: name.to_string(),
                directory,
                state: Mutex::new(ReplicaState {
                    reconciler: Reconciler::with_sequence(Arc::clone(&self.sequence)),
                    applier,
                    stopped: None,
                }),
            })
        });
        Ok(Arc::clone(replica))
    }

    fn route_reply(&self, reply: Reply) {
        let waiter = reply.seq.and_then(|seq| self.waiters.lock().remove(&seq));
        match waiter {
            Some(waiter) => {
                let _ = waiter.send(reply);
            }
            None => tracing::warn!(
                keyword = %reply.keyword,
                status = %reply.status,
                text = %reply.text,
                "unsolicited reply"
            ),
        }
    }

    fn deliver(&self, patch: PatchMessage) {
        let replica = self.replicas.lock().get(&patch.directory).cloned();
        let Some(replica) = replica else {
            tracing::debug!(directory = %patch.directory, "patch for unknown replica");
            return;
        };
        let applied = replica.state.lock().receive(&replica.name, patch);
        if applied > 0 {
            self.applied.notify_waiters();
        }
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
        // Dropping the senders fails every waiting request.
        self.waiters.lock().clear();
        self.applied.notify_waiters();
    }
}

/// A connection to a sync server that keeps local replicas of the
/// directories it subscribes to.
///
/// Writes are speculative: [`put`](Self::put) and [`remove`](Self::remove)
/// hold a placeholder until the server answers, and the replica only
/// advances through pushed patches, so every replica version equals the
/// server's version of the same patch.
pub struct SyncClient {
    shared: Arc<Shared>,
    writer: tokio::sync::Mutex<OwnedWriteHalf>,
    reader: Option<JoinHandle<()>>,
}

impl SyncClient {
    /// Connects to `config.server_addr`.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Config`] for an invalid configuration and
    /// [`ClientError::Io`] if the connection fails.
    pub async fn connect(config: ClientConfig) -> ClientResult<Self> {
        config.validate()?;
        std::fs::create_dir_all(&config.replica_root)?;
        let stream = TcpStream::connect(config.server_addr.as_str()).await?;
        stream.set_nodelay(true)?;
        let peer = stream.peer_addr()?;
        let (read, write) = stream.into_split();

        let registry = DirectoryRegistry::new(config.replica_root.clone(), config.journal.clone());
        let shared = Arc::new(Shared {
            config,
            registry,
            sequence: Arc::new(AtomicU64::new(1)),
            replicas: Mutex::new(HashMap::new()),
            waiters: Mutex::new(HashMap::new()),
            applied: Notify::new(),
            closed: AtomicBool::new(false),
        });
        let span = tracing::info_span!("sync_client", server = %peer);
        let reader = tokio::spawn(read_loop(Arc::clone(&shared), read).instrument(span));
        tracing::info!(server = %peer, "connected");

        Ok(Self {
            shared,
            writer: tokio::sync::Mutex::new(write),
            reader: Some(reader),
        })
    }

    /// Returns true once the server closed the connection.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    /// Subscribes to `directory`, asking for every patch after the local
    /// replica's last version. Returns that version.
    ///
    /// Subscribing again resumes a replica that stopped on a desync.
    pub async fn subscribe(&self, directory: &str) -> ClientResult<Version> {
        let replica = self.shared.replica(directory)?;
        let last = {
            let mut state = replica.state.lock();
            if state.stopped.take().is_some() {
                state.applier.clear();
            }
            replica.directory.last_version()
        };

        let seq = self.shared.next_seq();
        let command = Command::Subscribe {
            seq: Some(seq),
            directory: directory.to_string(),
            last_version: last.as_u64(),
        };
        let reply = self.request(seq, &command).await?;
        if !reply.status.is_success() {
            return Err(rejected(reply));
        }
        tracing::info!(directory, from = %last, status = %reply.status, "subscribed");
        Ok(last)
    }

    /// Stops the pushes for `directory`.
    pub async fn unsubscribe(&self, directory: &str) -> ClientResult<()> {
        let seq = self.shared.next_seq();
        let command = Command::Unsubscribe {
            seq: Some(seq),
            directory: directory.to_string(),
        };
        let reply = self.request(seq, &command).await?;
        if !reply.status.is_success() {
            return Err(rejected(reply));
        }
        tracing::info!(directory, "unsubscribed");
        Ok(())
    }

    /// Adds `record` to `directory` and returns the version the server
    /// assigned.
    pub async fn put(&self, directory: &str, record: Record) -> ClientResult<Version> {
        self.write(directory, Action::Add, record).await
    }

    /// Removes the record matching `record` from `directory`.
    pub async fn remove(&self, directory: &str, record: Record) -> ClientResult<Version> {
        self.write(directory, Action::Remove, record).await
    }

    /// Returns the local replica of `directory`.
    pub fn replica(&self, directory: &str) -> ClientResult<Arc<Directory>> {
        Ok(Arc::clone(&self.shared.replica(directory)?.directory))
    }

    /// Writes to `directory` not yet replaced by their patch.
    pub fn speculative(&self, directory: &str) -> ClientResult<Vec<(LocalVersion, Action, Record)>> {
        let replica = self.shared.replica(directory)?;
        let state = replica.state.lock();
        Ok(state
            .reconciler
            .speculative_records()
            .map(|(local, action, record)| (local, action, record.clone()))
            .collect())
    }

    /// Waits until the replica of `directory` reaches `version`.
    ///
    /// # Errors
    ///
    /// [`ClientError::Timeout`] if `timeout` passes first,
    /// [`ClientError::ReplicaStopped`] if the replica stopped and
    /// [`ClientError::ConnectionClosed`] if the server went away.
    pub async fn wait_for_version(
        &self,
        directory: &str,
        version: Version,
        timeout: Duration,
    ) -> ClientResult<()> {
        let replica = self.shared.replica(directory)?;
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let notified = self.shared.applied.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if replica.directory.last_version() >= version {
                return Ok(());
            }
            let stopped = replica.state.lock().stopped.clone();
            if let Some(reason) = stopped {
                return Err(ClientError::ReplicaStopped {
                    directory: directory.to_string(),
                    reason,
                });
            }
            if self.is_closed() {
                return Err(ClientError::ConnectionClosed);
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Err(ClientError::Timeout);
            }
        }
    }

    /// Closes the connection and releases the replicas.
    pub async fn close(mut self) {
        let _ = self.writer.lock().await.shutdown().await;
        if let Some(reader) = self.reader.take() {
            reader.abort();
            let _ = reader.await;
        }
        self.shared.close();
    }

    async fn write(&self, directory: &str, action: Action, record: Record) -> ClientResult<Version> {
        let replica = self.shared.replica(directory)?;
        let (seq, local) = replica
            .state
            .lock()
            .reconciler
            .begin_write(action, record.clone());
        let command = match action {
            Action::Add => Command::Put {
                seq: Some(seq),
                directory: directory.to_string(),
                record,
            },
            Action::Remove => Command::Remove {
                seq: Some(seq),
                directory: directory.to_string(),
                record,
            },
        };
        let outcome = self.request(seq, &command).await;

        let (result, applied) = {
            let mut state = replica.state.lock();
            let result = match outcome {
                Ok(reply) if reply.status.is_success() => match reply.version() {
                    Some(central) => {
                        state.reconciler.confirm(seq, central);
                        Ok(Version::new(central))
                    }
                    None => {
                        state.reconciler.reject(seq);
                        Err(ClientError::Protocol(ProtocolError::malformed(format!(
                            "reply to {} carries no version: {:?}",
                            reply.keyword, reply.text
                        ))))
                    }
                },
                Ok(reply) => {
                    state.reconciler.reject(seq);
                    Err(rejected(reply))
                }
                Err(err) => {
                    state.reconciler.reject(seq);
                    Err(err)
                }
            };
            (result, state.drain(&replica.name))
        };
        if applied > 0 {
            self.shared.applied.notify_waiters();
        }
        tracing::debug!(directory, seq, local = %local, action = %action, ok = result.is_ok(), "write finished");
        result
    }

    async fn request(&self, seq: u64, command: &Command) -> ClientResult<Reply> {
        let mut buf = BytesMut::new();
        command.encode(&mut buf)?;

        let (tx, rx) = oneshot::channel();
        self.shared.waiters.lock().insert(seq, tx);
        if self.is_closed() {
            self.shared.waiters.lock().remove(&seq);
            return Err(ClientError::ConnectionClosed);
        }

        let sent = async {
            let mut writer = self.writer.lock().await;
            writer.write_all(&buf).await?;
            writer.flush().await
        }
        .await;
        if let Err(err) = sent {
            self.shared.waiters.lock().remove(&seq);
            return Err(err.into());
        }

        match tokio::time::timeout(self.shared.config.request_timeout, rx).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_)) => Err(ClientError::ConnectionClosed),
            Err(_) => {
                self.shared.waiters.lock().remove(&seq);
                Err(ClientError::Timeout)
            }
        }
    }
}

impl Drop for SyncClient {
    fn drop(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }
}

fn rejected(reply: Reply) -> ClientError {
    ClientError::Rejected {
        status: reply.status,
        message: reply.text,
    }
}

/// Reads one line into `line`, giving up once it exceeds `limit` bytes.
/// Returns false at end of stream.
async fn read_line_bounded<R: AsyncBufRead + Unpin>(
    reader: &mut R,
    line: &mut Vec<u8>,
    limit: usize,
) -> ClientResult<bool> {
    let read = reader.take(limit as u64 + 1).read_until(b'\n', line).await?;
    if read == 0 {
        return Ok(false);
    }
    if line.len() > limit {
        return Err(ProtocolError::malformed(format!("server line exceeds {limit} bytes")).into());
    }
    Ok(true)
}

async fn read_loop(shared: Arc<Shared>, read: OwnedReadHalf) {
    let mut lines = BufReader::new(read);
    let mut decoder = ServerMessageDecoder::new(shared.config.record_limits);
    let limit = shared.config.record_limits.max_record_bytes;
    let mut line = Vec::new();
    loop {
        line.clear();
        match read_line_bounded(&mut lines, &mut line, limit).await {
            Ok(false) => {
                tracing::info!("server closed the connection");
                break;
            }
            Ok(true) => {}
            Err(err) => {
                tracing::warn!(error = %err, "read failed");
                break;
            }
        }
        let Ok(text) = std::str::from_utf8(&line) else {
            tracing::warn!("server sent a line that is not valid UTF-8");
            break;
        };
        match decoder.push_line(text) {
            Ok(Some(ServerMessage::Reply(reply))) => shared.route_reply(reply),
            Ok(Some(ServerMessage::Patch(patch))) => shared.deliver(patch),
            Ok(None) => {}
            Err(err) => tracing::warn!(error = %err, "undecodable server message"),
        }
    }
    shared.close();
}

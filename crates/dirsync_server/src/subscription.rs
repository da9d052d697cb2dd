//! Subscriptions and the push engine.
//!
//! Each subscription owns one tokio task that streams patches to its
//! connection:
//!
//! ```text
//!   CatchingUp --(cursor == last)--> Idle --(append / reset)--> CatchingUp
//!        \                             /
//!         +------(cancel / write error)------> Closed
//! ```
//!
//! The cursor is the last version sent. It only moves while the
//! connection's writer lock is held, so a reset reply and the patches that
//! follow it are never interleaved with patches from before the reset.

use bytes::BytesMut;
use dirsync_journal::{ChangeListener, Directory, DirectoryId, ListenerId, Version};
use dirsync_protocol::PatchMessage;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Notify;
use tokio::task::JoinHandle;

/// How long [`Subscription::cancel`] lets a push task finish a write before
/// aborting it.
pub const CANCEL_GRACE: Duration = Duration::from_secs(1);

/// Write half of a connection, shared by replies and push tasks.
pub type SharedWriter = Arc<tokio::sync::Mutex<Box<dyn AsyncWrite + Send + Unpin>>>;

/// Push task state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    /// Sending patches the subscriber has not seen.
    CatchingUp,
    /// Waiting for the next append.
    Idle,
    /// Finished; terminal.
    Closed,
}

struct Shared {
    directory: Arc<Directory>,
    name: String,
    cursor: AtomicU64,
    closed: AtomicBool,
    /// Set while a patch is partially written.
    writing: AtomicBool,
    wake: Notify,
    state: Mutex<SubscriptionState>,
}

impl Shared {
    fn set_state(&self, state: SubscriptionState) {
        *self.state.lock() = state;
    }

    fn clamp(&self, version: u64) -> u64 {
        version.min(self.directory.last_version().as_u64())
    }
}

/// Wakes the push task; holds a weak reference so the directory's listener
/// list does not keep the subscription alive.
struct Waker(Weak<Shared>);

impl ChangeListener for Waker {
    fn on_append(&self, _directory: DirectoryId, _version: Version) {
        if let Some(shared) = self.0.upgrade() {
            shared.wake.notify_one();
        }
    }

    fn on_close(&self, _directory: DirectoryId) {
        if let Some(shared) = self.0.upgrade() {
            shared.wake.notify_one();
        }
    }
}

/// One connection's subscription to one directory.
pub struct Subscription {
    shared: Arc<Shared>,
    listener: Option<ListenerId>,
    task: Option<JoinHandle<()>>,
}

impl Subscription {
    /// Starts pushing patches after `from` (clamped to the last version).
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(directory: Arc<Directory>, name: impl Into<String>, from: u64, writer: SharedWriter) -> Self {
        let start = from.min(directory.last_version().as_u64());
        let initial = if start < directory.last_version().as_u64() {
            SubscriptionState::CatchingUp
        } else {
            SubscriptionState::Idle
        };
        let shared = Arc::new(Shared {
            directory,
            name: name.into(),
            cursor: AtomicU64::new(start),
            closed: AtomicBool::new(false),
            writing: AtomicBool::new(false),
            wake: Notify::new(),
            state: Mutex::new(initial),
        });
        let listener = shared
            .directory
            .add_listener(Arc::new(Waker(Arc::downgrade(&shared))));
        let task = tokio::spawn(push_loop(Arc::clone(&shared), writer));

        tracing::debug!(directory = %shared.name, from = start, "subscription started");
        Self {
            shared,
            listener: Some(listener),
            task: Some(task),
        }
    }

    /// Returns the directory being pushed.
    #[must_use]
    pub fn directory(&self) -> &Arc<Directory> {
        &self.shared.directory
    }

    /// Returns the last version sent.
    #[must_use]
    pub fn cursor(&self) -> u64 {
        self.shared.cursor.load(Ordering::Acquire)
    }

    /// Returns the push task state.
    #[must_use]
    pub fn state(&self) -> SubscriptionState {
        *self.shared.state.lock()
    }

    /// Moves the cursor back (or forward) to `version`, clamped to the last
    /// committed version, and wakes the task. Returns the new cursor.
    ///
    /// Callers hold the connection's writer lock so the reset is ordered
    /// with respect to patches already written.
    pub fn reset(&self, version: u64) -> u64 {
        let cursor = self.shared.clamp(version);
        self.shared.cursor.store(cursor, Ordering::Release);
        self.shared.wake.notify_one();
        tracing::debug!(directory = %self.shared.name, cursor, "subscription reset");
        cursor
    }

    /// Stops the push task and waits for it to finish.
    ///
    /// A task still blocked on a write after [`CANCEL_GRACE`] (a peer that
    /// stopped reading) is aborted. No patch is written after this returns.
    /// Returns false when the abort cut a patch short, leaving the
    /// connection's output stream unusable.
    pub async fn cancel(mut self) -> bool {
        self.shared.closed.store(true, Ordering::Release);
        self.shared.wake.notify_one();
        if let Some(mut task) = self.task.take() {
            let joined = match tokio::time::timeout(CANCEL_GRACE, &mut task).await {
                Ok(joined) => joined,
                Err(_) => {
                    tracing::warn!(directory = %self.shared.name, "push task stuck writing, aborting");
                    task.abort();
                    task.await
                }
            };
            if let Err(err) = joined {
                if !err.is_cancelled() {
                    tracing::warn!(directory = %self.shared.name, error = %err, "push task panicked");
                }
            }
        }
        self.release_listener();
        tracing::debug!(directory = %self.shared.name, "subscription cancelled");
        !self.shared.writing.load(Ordering::Acquire)
    }

    fn release_listener(&mut self) {
        if let Some(id) = self.listener.take() {
            self.shared.directory.remove_listener(id);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            self.shared.closed.store(true, Ordering::Release);
            task.abort();
        }
        self.release_listener();
    }
}

async fn push_loop(shared: Arc<Shared>, writer: SharedWriter) {
    let mut buf = BytesMut::new();
    loop {
        if shared.closed.load(Ordering::Acquire) {
            break;
        }
        if shared.directory.is_closed() {
            tracing::info!(directory = %shared.name, "directory closed, ending subscription");
            break;
        }
        let cursor = shared.cursor.load(Ordering::Acquire);
        let last = shared.directory.last_version().as_u64();
        if cursor >= last {
            shared.set_state(SubscriptionState::Idle);
            // A notification sent since the check is stored as a permit,
            // so this returns at once in that case.
            shared.wake.notified().await;
            continue;
        }
        shared.set_state(SubscriptionState::CatchingUp);

        let next = cursor + 1;
        let patch = match shared.directory.read(Version::new(next)) {
            Ok(patch) => patch,
            Err(err) => {
                tracing::warn!(directory = %shared.name, version = next, error = %err, "push read failed");
                break;
            }
        };
        buf.clear();
        let message = PatchMessage::new(shared.name.clone(), next, patch.action, patch.record);
        if let Err(err) = message.encode(&mut buf) {
            tracing::warn!(directory = %shared.name, version = next, error = %err, "push encode failed");
            break;
        }

        let mut out = writer.lock().await;
        if shared.closed.load(Ordering::Acquire) {
            break;
        }
        if shared.cursor.load(Ordering::Acquire) != cursor {
            // Reset while we were reading; start over from the new cursor.
            continue;
        }
        shared.writing.store(true, Ordering::Release);
        let written = async {
            out.write_all(&buf).await?;
            out.flush().await
        }
        .await;
        shared.writing.store(false, Ordering::Release);
        if let Err(err) = written {
            tracing::warn!(directory = %shared.name, version = next, error = %err, "push write failed, ending subscription");
            break;
        }
        shared.cursor.store(next, Ordering::Release);
        drop(out);
        tracing::debug!(directory = %shared.name, version = next, "pushed patch");
    }
    shared.set_state(SubscriptionState::Closed);
}

#[cfg(test)]
mod tests {
    use super::*;
    use dirsync_codec::{Action, Record};
    use dirsync_journal::JournalConfig;
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio::io::{AsyncBufReadExt, BufReader, DuplexStream};

    fn directory(tmp: &TempDir) -> Arc<Directory> {
        let config = JournalConfig::new()
            .create_if_missing(true)
            .sync_on_append(false);
        Arc::new(Directory::open(&tmp.path().join("d"), &config).unwrap())
    }

    fn record(n: u64) -> Record {
        Record::new().with_field("descr", format!("m{n}"))
    }

    fn pipe() -> (SharedWriter, BufReader<DuplexStream>) {
        pipe_with_capacity(64 * 1024)
    }

    fn pipe_with_capacity(capacity: usize) -> (SharedWriter, BufReader<DuplexStream>) {
        let (ours, theirs) = tokio::io::duplex(capacity);
        let writer: Box<dyn AsyncWrite + Send + Unpin> = Box::new(ours);
        (
            Arc::new(tokio::sync::Mutex::new(writer)),
            BufReader::new(theirs),
        )
    }

    async fn next_header(reader: &mut BufReader<DuplexStream>) -> String {
        loop {
            let mut line = String::new();
            tokio::time::timeout(Duration::from_secs(5), reader.read_line(&mut line))
                .await
                .expect("timed out waiting for a patch")
                .unwrap();
            if line.starts_with("PATCH") {
                return line.trim_end().to_string();
            }
        }
    }

    #[tokio::test]
    async fn catches_up_then_follows_appends() {
        let tmp = TempDir::new().unwrap();
        let dir = directory(&tmp);
        for n in 0..3 {
            dir.append(Action::Add, &record(n)).unwrap();
        }

        let (writer, mut reader) = pipe();
        let sub = Subscription::start(Arc::clone(&dir), "d", 0, writer);

        assert_eq!(next_header(&mut reader).await, "PATCH d 0 1 +");
        assert_eq!(next_header(&mut reader).await, "PATCH d 1 2 +");
        assert_eq!(next_header(&mut reader).await, "PATCH d 2 3 +");

        dir.append(Action::Remove, &record(0)).unwrap();
        assert_eq!(next_header(&mut reader).await, "PATCH d 3 4 -");
        assert_eq!(sub.cursor(), 4);

        sub.cancel().await;
        assert_eq!(dir.listener_count(), 0);
    }

    async fn assert_quiet(reader: &mut BufReader<DuplexStream>) {
        let mut line = String::new();
        let read = tokio::time::timeout(Duration::from_millis(200), reader.read_line(&mut line)).await;
        assert!(read.is_err(), "unexpected output: {line:?}");
    }

    #[tokio::test]
    async fn idle_append_yields_exactly_one_patch() {
        let tmp = TempDir::new().unwrap();
        let dir = directory(&tmp);
        dir.append(Action::Add, &record(0)).unwrap();

        let (writer, mut reader) = pipe();
        let sub = Subscription::start(Arc::clone(&dir), "d", 0, writer);
        assert_eq!(next_header(&mut reader).await, "PATCH d 0 1 +");
        let mut body = String::new();
        reader.read_line(&mut body).await.unwrap();
        reader.read_line(&mut body).await.unwrap();
        assert_quiet(&mut reader).await;

        dir.append(Action::Add, &record(1)).unwrap();
        assert_eq!(next_header(&mut reader).await, "PATCH d 1 2 +");
        body.clear();
        reader.read_line(&mut body).await.unwrap();
        reader.read_line(&mut body).await.unwrap();
        assert_eq!(body, "descr: m1\n\n");
        assert_quiet(&mut reader).await;
        assert_eq!(sub.state(), SubscriptionState::Idle);
        sub.cancel().await;
    }

    #[tokio::test]
    async fn cancel_does_not_wait_on_a_stalled_peer() {
        let tmp = TempDir::new().unwrap();
        let dir = directory(&tmp);
        for n in 0..200 {
            dir.append(Action::Add, &record(n)).unwrap();
        }

        let (writer, _reader) = pipe_with_capacity(256);
        let sub = Subscription::start(Arc::clone(&dir), "d", 0, writer);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(sub.state(), SubscriptionState::CatchingUp);

        let intact = tokio::time::timeout(CANCEL_GRACE * 5, sub.cancel())
            .await
            .expect("cancel hung on a stalled peer");
        assert!(!intact);
        assert_eq!(dir.listener_count(), 0);
    }

    #[tokio::test]
    async fn closing_directory_ends_subscription() {
        let tmp = TempDir::new().unwrap();
        let dir = directory(&tmp);
        let (writer, _reader) = pipe();
        let sub = Subscription::start(Arc::clone(&dir), "d", 0, writer);

        dir.close();
        for _ in 0..100 {
            if sub.state() == SubscriptionState::Closed {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(sub.state(), SubscriptionState::Closed);
        assert!(sub.cancel().await);
        assert_eq!(dir.listener_count(), 0);
    }

    #[tokio::test]
    async fn requested_version_is_clamped() {
        let tmp = TempDir::new().unwrap();
        let dir = directory(&tmp);
        dir.append(Action::Add, &record(0)).unwrap();

        let (writer, mut reader) = pipe();
        let sub = Subscription::start(Arc::clone(&dir), "d", 99, writer);
        assert_eq!(sub.cursor(), 1);

        dir.append(Action::Add, &record(1)).unwrap();
        assert_eq!(next_header(&mut reader).await, "PATCH d 1 2 +");
        sub.cancel().await;
    }

    #[tokio::test]
    async fn reset_replays_from_new_cursor() {
        let tmp = TempDir::new().unwrap();
        let dir = directory(&tmp);
        for n in 0..2 {
            dir.append(Action::Add, &record(n)).unwrap();
        }

        let (writer, mut reader) = pipe();
        let sub = Subscription::start(Arc::clone(&dir), "d", 0, Arc::clone(&writer));
        assert_eq!(next_header(&mut reader).await, "PATCH d 0 1 +");
        assert_eq!(next_header(&mut reader).await, "PATCH d 1 2 +");

        {
            let _guard = writer.lock().await;
            assert_eq!(sub.reset(1), 1);
        }
        assert_eq!(next_header(&mut reader).await, "PATCH d 1 2 +");
        sub.cancel().await;
    }

    #[tokio::test]
    async fn write_failure_closes_subscription() {
        let tmp = TempDir::new().unwrap();
        let dir = directory(&tmp);
        dir.append(Action::Add, &record(0)).unwrap();

        let (writer, reader) = pipe();
        drop(reader);
        let sub = Subscription::start(Arc::clone(&dir), "d", 0, writer);

        for _ in 0..100 {
            if sub.state() == SubscriptionState::Closed {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(sub.state(), SubscriptionState::Closed);
        sub.cancel().await;
    }

    #[tokio::test]
    async fn drop_releases_listener() {
        let tmp = TempDir::new().unwrap();
        let dir = directory(&tmp);
        let (writer, _reader) = pipe();
        let sub = Subscription::start(Arc::clone(&dir), "d", 0, writer);
        assert_eq!(dir.listener_count(), 1);
        drop(sub);
        assert_eq!(dir.listener_count(), 0);
    }
}

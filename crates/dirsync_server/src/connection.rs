//! One client connection.

use crate::error::{ServerError, ServerResult};
use crate::handler::ServerContext;
use crate::subscription::{SharedWriter, Subscription, SubscriptionState};
use bytes::BytesMut;
use dirsync_codec::Record;
use dirsync_journal::DirectoryId;
use dirsync_protocol::{Command, CommandDecoder, Keyword, Reply, Status};
use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};

enum LineRead {
    Line,
    Eof,
    TooLong,
}

/// Reads one `\n`-terminated line into `line`, refusing to buffer more than
/// `limit` bytes.
async fn read_line_bounded<R: AsyncBufRead + Unpin>(
    reader: &mut R,
    line: &mut Vec<u8>,
    limit: usize,
) -> io::Result<LineRead> {
    loop {
        let (consumed, done) = {
            let available = reader.fill_buf().await?;
            if available.is_empty() {
                return Ok(if line.is_empty() {
                    LineRead::Eof
                } else {
                    LineRead::Line
                });
            }
            let (end, done) = match available.iter().position(|&b| b == b'\n') {
                Some(i) => (i + 1, true),
                None => (available.len(), false),
            };
            if line.len() + end > limit {
                return Ok(LineRead::TooLong);
            }
            line.extend_from_slice(&available[..end]);
            (end, done)
        };
        reader.consume(consumed);
        if done {
            return Ok(LineRead::Line);
        }
    }
}

/// A client connection: decodes commands, dispatches them and owns the
/// connection's subscriptions.
pub struct Connection<R> {
    reader: BufReader<R>,
    writer: SharedWriter,
    context: Arc<ServerContext>,
    decoder: CommandDecoder,
    subscriptions: HashMap<DirectoryId, Subscription>,
    authenticated: bool,
}

impl<R: AsyncRead + Unpin + Send> Connection<R> {
    /// Wraps the two halves of a stream.
    pub fn new<W>(reader: R, writer: W, context: Arc<ServerContext>, peer: Option<SocketAddr>) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let writer: Box<dyn AsyncWrite + Send + Unpin> = Box::new(writer);
        let authenticated = context.is_authenticated(peer);
        Self {
            reader: BufReader::new(reader),
            writer: Arc::new(tokio::sync::Mutex::new(writer)),
            decoder: CommandDecoder::new(context.config().record_limits),
            context,
            subscriptions: HashMap::new(),
            authenticated,
        }
    }

    /// Serves commands until the peer disconnects, then cancels every
    /// subscription.
    ///
    /// # Errors
    ///
    /// I/O errors and over-long lines end the connection.
    pub async fn run(mut self) -> ServerResult<()> {
        let result = self.serve().await;
        for (_, subscription) in self.subscriptions.drain() {
            subscription.cancel().await;
        }
        result
    }

    async fn serve(&mut self) -> ServerResult<()> {
        let limit = self.context.config().max_line_bytes;
        let mut line = Vec::new();
        loop {
            line.clear();
            match read_line_bounded(&mut self.reader, &mut line, limit).await? {
                LineRead::Eof => return Ok(()),
                LineRead::TooLong => {
                    let err = ServerError::LineTooLong { limit };
                    self.send(&Reply::new(None, Keyword::Error, err.status(), err.to_string()))
                        .await?;
                    return Err(err);
                }
                LineRead::Line => {}
            }

            match self.decoder.push_bytes(&line) {
                Ok(Some(command)) => self.dispatch(command).await?,
                Ok(None) => {}
                Err(err) => {
                    tracing::debug!(error = %err, "rejected command");
                    self.send(&err.to_reply()).await?;
                }
            }
        }
    }

    async fn dispatch(&mut self, command: Command) -> ServerResult<()> {
        let seq = command.seq();
        let keyword = command.keyword();
        if !self.authenticated && keyword != Keyword::Unsub {
            return self.send_error(seq, keyword, &ServerError::Unauthenticated).await;
        }

        let result = match command {
            Command::Subscribe {
                seq,
                directory,
                last_version,
            } => return self.subscribe(seq, directory, last_version).await,
            Command::Unsubscribe { directory, .. } => {
                return self.unsubscribe(seq, &directory).await
            }
            Command::Put {
                directory, record, ..
            } => self.mutate(&directory, &record, true),
            Command::Remove {
                directory, record, ..
            } => self.mutate(&directory, &record, false),
        };

        match result {
            Ok(text) => self.send(&Reply::ok(seq, keyword, text)).await,
            Err(err) => self.send_error(seq, keyword, &err).await,
        }
    }

    fn mutate(&self, directory: &str, record: &Record, add: bool) -> ServerResult<String> {
        let version = if add {
            self.context.put(directory, record)?
        } else {
            self.context.remove(directory, record)?
        };
        Ok(version.to_string())
    }

    /// Subscribes, or resets an existing subscription, replying before the
    /// first patch can be written.
    async fn subscribe(&mut self, seq: Option<u64>, name: String, from: u64) -> ServerResult<()> {
        let directory = match self.context.open(&name, self.context.config().create_missing) {
            Ok(directory) => directory,
            Err(err) => return self.send_error(seq, Keyword::Sub, &err).await,
        };
        let id = directory.id();

        if let Some(existing) = self.subscriptions.remove(&id) {
            if existing.state() == SubscriptionState::Closed || existing.directory().is_closed() {
                if !existing.cancel().await {
                    return Err(ServerError::StreamTorn);
                }
            } else {
                self.subscriptions.insert(id, existing);
            }
        }

        let writer = Arc::clone(&self.writer);
        let mut out = writer.lock().await;
        let reply = match self.subscriptions.get(&id) {
            Some(existing) => {
                let cursor = existing.reset(from);
                Reply::new(seq, Keyword::Sub, Status::Reset, cursor.to_string())
            }
            None => {
                let subscription =
                    Subscription::start(directory, name.clone(), from, Arc::clone(&self.writer));
                let cursor = subscription.cursor();
                self.subscriptions.insert(id, subscription);
                tracing::info!(directory = %name, from = cursor, "subscribed");
                Reply::ok(seq, Keyword::Sub, cursor.to_string())
            }
        };
        let mut buf = BytesMut::new();
        reply.encode(&mut buf);
        out.write_all(&buf).await?;
        out.flush().await?;
        Ok(())
    }

    /// Cancels a subscription. Ends the connection when the push task had
    /// to be aborted halfway through a patch.
    async fn unsubscribe(&mut self, seq: Option<u64>, name: &str) -> ServerResult<()> {
        let subscription = self
            .context
            .open(name, false)
            .ok()
            .and_then(|directory| self.subscriptions.remove(&directory.id()));
        let Some(subscription) = subscription else {
            let err = ServerError::NotSubscribed(name.to_string());
            return self.send_error(seq, Keyword::Unsub, &err).await;
        };
        if !subscription.cancel().await {
            tracing::warn!(directory = name, "patch cut short by unsubscribe, closing connection");
            return Err(ServerError::StreamTorn);
        }
        tracing::info!(directory = name, "unsubscribed");
        self.send(&Reply::ok(seq, Keyword::Unsub, "ok")).await
    }

    async fn send_error(
        &self,
        seq: Option<u64>,
        keyword: Keyword,
        err: &ServerError,
    ) -> ServerResult<()> {
        if err.is_server_error() {
            tracing::warn!(keyword = %keyword, error = %err, "command failed");
        } else {
            tracing::debug!(keyword = %keyword, error = %err, "command refused");
        }
        self.send(&Reply::new(seq, keyword, err.status(), err.to_string()))
            .await
    }

    async fn send(&self, reply: &Reply) -> ServerResult<()> {
        let mut buf = BytesMut::new();
        reply.encode(&mut buf);
        let mut out = self.writer.lock().await;
        out.write_all(&buf).await?;
        out.flush().await?;
        Ok(())
    }
}

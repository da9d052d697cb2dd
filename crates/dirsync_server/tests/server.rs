//! Server scenarios over real TCP connections.

use dirsync_journal::JournalConfig;
use dirsync_server::{ServerConfig, SyncServer};
use std::net::SocketAddr;
use std::time::Duration;
use tempfile::TempDir;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

struct Running {
    addr: SocketAddr,
    stop: Option<oneshot::Sender<()>>,
    task: JoinHandle<dirsync_server::ServerResult<()>>,
    _root: TempDir,
}

impl Running {
    async fn start(configure: impl FnOnce(ServerConfig) -> ServerConfig) -> Self {
        let root = TempDir::new().unwrap();
        let config = ServerConfig::new("127.0.0.1:0".parse().unwrap(), root.path())
            .with_journal(JournalConfig::new().sync_on_append(false));
        let server = SyncServer::bind(configure(config)).await.unwrap();
        let addr = server.local_addr().unwrap();
        let (stop, stopped) = oneshot::channel();
        let task = tokio::spawn(server.run_until(async {
            let _ = stopped.await;
        }));
        Self {
            addr,
            stop: Some(stop),
            task,
            _root: root,
        }
    }

    async fn stop(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        self.task.await.unwrap().unwrap();
    }
}

struct Client {
    lines: BufReader<OwnedReadHalf>,
    out: OwnedWriteHalf,
}

impl Client {
    async fn connect(addr: SocketAddr) -> Self {
        let (read, write) = TcpStream::connect(addr).await.unwrap().into_split();
        Self {
            lines: BufReader::new(read),
            out: write,
        }
    }

    async fn send(&mut self, text: &str) {
        self.out.write_all(text.as_bytes()).await.unwrap();
    }

    /// Next line, or `None` at end of stream.
    async fn line(&mut self) -> Option<String> {
        let mut line = String::new();
        let n = tokio::time::timeout(Duration::from_secs(5), self.lines.read_line(&mut line))
            .await
            .expect("timed out")
            .unwrap();
        (n > 0).then(|| line.trim_end().to_string())
    }

    async fn expect(&mut self, want: &str) {
        assert_eq!(self.line().await.as_deref(), Some(want));
    }

    /// Reads a patch header and its body.
    async fn patch(&mut self) -> (String, Vec<String>) {
        let header = self.line().await.unwrap();
        let mut body = Vec::new();
        loop {
            let line = self.line().await.unwrap();
            if line.is_empty() {
                return (header, body);
            }
            body.push(line);
        }
    }
}

#[tokio::test]
async fn appends_are_pushed_to_subscribers() {
    let server = Running::start(|c| c).await;
    let mut writer = Client::connect(server.addr).await;
    let mut reader = Client::connect(server.addr).await;

    writer.send("1 PUT d\nfilename: a.eml\n\n").await;
    writer.expect("1 PUT 200 1").await;

    reader.send("7 SUB d 0\n").await;
    reader.expect("7 SUB 200 0").await;
    let (header, body) = reader.patch().await;
    assert_eq!(header, "PATCH d 0 1 +");
    assert_eq!(body, ["filename: a.eml"]);

    writer.send("2 PUT d\nfilename: b.eml\n\n").await;
    writer.expect("2 PUT 200 2").await;
    let (header, body) = reader.patch().await;
    assert_eq!(header, "PATCH d 1 2 +");
    assert_eq!(body, ["filename: b.eml"]);

    server.stop().await;
}

#[tokio::test]
async fn remove_pushes_a_tombstone() {
    let server = Running::start(|c| c).await;
    let mut client = Client::connect(server.addr).await;

    client.send("PUT d\nfilename: a.eml\nsize: 10\n\n").await;
    client.expect("PUT 200 1").await;
    client.send("REM d\nfilename: a.eml\n\n").await;
    client.expect("REM 200 2").await;
    client.send("REM d\nfilename: a.eml\n\n").await;
    assert!(client.line().await.unwrap().starts_with("REM 404"));

    client.send("SUB d\n").await;
    client.expect("SUB 200 0").await;
    // The removed add now reads back as a tombstone for the same record.
    let (first, first_body) = client.patch().await;
    assert_eq!(first, "PATCH d 0 1 -");
    let (second, second_body) = client.patch().await;
    assert_eq!(second, "PATCH d 1 2 -");
    assert_eq!(first_body, second_body);
    assert_eq!(second_body.len(), 1);
    assert!(second_body[0].starts_with("tombstone: "));

    server.stop().await;
}

#[tokio::test]
async fn protocol_errors_are_answered() {
    let server = Running::start(|c| c).await;
    let mut client = Client::connect(server.addr).await;

    client.send("3 HELLO\n").await;
    assert!(client.line().await.unwrap().starts_with("3 ERROR 400"));

    client.send("4 UNSUB d\n").await;
    assert!(client.line().await.unwrap().starts_with("4 UNSUB 501"));

    client.send("5 SUB ../etc\n").await;
    assert!(client.line().await.unwrap().starts_with("5 SUB 400"));

    client.send("6 PUT d\nfilename: ok\n\n").await;
    client.expect("6 PUT 200 1").await;

    server.stop().await;
}

#[tokio::test]
async fn oversized_records_are_refused() {
    let server = Running::start(|c| {
        c.with_record_limits(dirsync_codec::RecordLimits::default().max_record_bytes(32))
    })
    .await;
    let mut client = Client::connect(server.addr).await;

    let big = "x".repeat(64);
    client.send(&format!("1 PUT d\ndescr: {big}\n\n")).await;
    assert!(client.line().await.unwrap().starts_with("1 PUT 413"));
    client.send("2 PUT d\nfilename: a\n\n").await;
    client.expect("2 PUT 200 1").await;

    server.stop().await;
}

#[tokio::test]
async fn connection_limit_rejects_with_503() {
    let server = Running::start(|c| c.with_max_connections(1)).await;
    let mut first = Client::connect(server.addr).await;
    first.send("PUT d\nfilename: a\n\n").await;
    first.expect("PUT 200 1").await;

    let mut second = Client::connect(server.addr).await;
    assert!(second.line().await.unwrap().starts_with("ERROR 503"));
    assert_eq!(second.line().await, None);

    server.stop().await;
}

#[tokio::test]
async fn every_subscriber_receives_each_patch() {
    let server = Running::start(|c| c).await;
    let mut subscribers = Vec::new();
    for _ in 0..3 {
        let mut client = Client::connect(server.addr).await;
        client.send("SUB d\n").await;
        client.expect("SUB 200 0").await;
        subscribers.push(client);
    }

    let mut writer = Client::connect(server.addr).await;
    for n in 1..=3 {
        writer.send(&format!("PUT d\nfilename: m{n}\n\n")).await;
        writer.expect(&format!("PUT 200 {n}")).await;
    }

    for client in &mut subscribers {
        for n in 1..=3 {
            let (header, body) = client.patch().await;
            assert_eq!(header, format!("PATCH d {} {n} +", n - 1));
            assert_eq!(body, [format!("filename: m{n}")]);
        }
    }

    server.stop().await;
}

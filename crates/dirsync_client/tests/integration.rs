//! Client and server together over TCP.

use dirsync_client::{ClientConfig, ClientError, SyncClient};
use dirsync_codec::{Action, Record, RecordLimits, LOCAL_ID_FIELD};
use dirsync_journal::{JournalConfig, Version};
use dirsync_protocol::Status;
use dirsync_server::{ServerConfig, SyncServer};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

const WAIT: Duration = Duration::from_secs(5);

struct Server {
    addr: SocketAddr,
    stop: oneshot::Sender<()>,
    task: JoinHandle<dirsync_server::ServerResult<()>>,
    _root: TempDir,
}

impl Server {
    async fn start() -> Self {
        let root = TempDir::new().unwrap();
        let config = ServerConfig::new("127.0.0.1:0".parse().unwrap(), root.path())
            .with_journal(JournalConfig::new().sync_on_append(false));
        let server = SyncServer::bind(config).await.unwrap();
        let addr = server.local_addr().unwrap();
        let (stop, stopped) = oneshot::channel();
        let task = tokio::spawn(server.run_until(async {
            let _ = stopped.await;
        }));
        Self {
            addr,
            stop,
            task,
            _root: root,
        }
    }

    async fn client(&self, replicas: &Path) -> SyncClient {
        let config = ClientConfig::new(self.addr.to_string(), replicas)
            .with_request_timeout(WAIT)
            .with_journal(JournalConfig::new().sync_on_append(false));
        SyncClient::connect(config).await.unwrap()
    }

    async fn shutdown(self) {
        let _ = self.stop.send(());
        self.task.await.unwrap().unwrap();
    }
}

fn mail(name: &str, descr: &str) -> Record {
    Record::new()
        .with_field("filename", name)
        .with_field("type", "mail")
        .with_field("descr", descr)
}

#[tokio::test]
async fn subscriber_receives_other_clients_writes() {
    let server = Server::start().await;
    let (a_dir, b_dir) = (TempDir::new().unwrap(), TempDir::new().unwrap());
    let a = server.client(a_dir.path()).await;
    let b = server.client(b_dir.path()).await;

    assert_eq!(a.put("d", mail("1.eml", "hi")).await.unwrap(), Version::new(1));
    assert_eq!(b.subscribe("d").await.unwrap(), Version::ZERO);
    b.wait_for_version("d", Version::new(1), WAIT).await.unwrap();

    assert_eq!(a.put("d", mail("2.eml", "again")).await.unwrap(), Version::new(2));
    b.wait_for_version("d", Version::new(2), WAIT).await.unwrap();

    let replica = b.replica("d").unwrap();
    let second = replica.read(Version::new(2)).unwrap();
    assert_eq!(second.action, Action::Add);
    assert_eq!(second.record, mail("2.eml", "again"));

    a.close().await;
    b.close().await;
    server.shutdown().await;
}

#[tokio::test]
async fn own_write_is_folded_in_once() {
    let server = Server::start().await;
    let dir = TempDir::new().unwrap();
    let client = server.client(dir.path()).await;
    client.subscribe("d").await.unwrap();

    let version = client.put("d", mail("1.eml", "mine")).await.unwrap();
    client.wait_for_version("d", version, WAIT).await.unwrap();

    let replica = client.replica("d").unwrap();
    assert_eq!(replica.last_version(), Version::new(1));
    let stored = replica.read(version).unwrap().record;
    assert!(stored.field(LOCAL_ID_FIELD).is_some());
    assert_eq!(stored.filename(), Some("1.eml"));
    assert!(client.speculative("d").unwrap().is_empty());

    client.close().await;
    server.shutdown().await;
}

#[tokio::test]
async fn remote_remove_marks_local_copy() {
    let server = Server::start().await;
    let dir = TempDir::new().unwrap();
    let client = server.client(dir.path()).await;
    client.subscribe("d").await.unwrap();

    client.put("d", mail("1.eml", "bye")).await.unwrap();
    let removed = client
        .remove("d", Record::new().with_field("filename", "1.eml"))
        .await
        .unwrap();
    assert_eq!(removed, Version::new(2));
    client.wait_for_version("d", removed, WAIT).await.unwrap();

    let replica = client.replica("d").unwrap();
    assert!(replica.find_live(|_| true).unwrap().is_none());
    let patch = replica.read(removed).unwrap();
    assert_eq!(
        patch.record.tombstone_digest(),
        Some(mail("1.eml", "bye").digest())
    );

    client.close().await;
    server.shutdown().await;
}

#[tokio::test]
async fn rejected_write_leaves_no_speculative_record() {
    let server = Server::start().await;
    let dir = TempDir::new().unwrap();
    let client = server.client(dir.path()).await;
    client.put("d", mail("1.eml", "x")).await.unwrap();

    let err = client
        .remove("d", Record::new().with_field("filename", "nope.eml"))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ClientError::Rejected {
            status: Status::NotFound,
            ..
        }
    ));
    // Without a subscription the confirmed put stays speculative; the
    // rejected remove is gone.
    let speculative = client.speculative("d").unwrap();
    assert_eq!(speculative.len(), 1);
    assert_eq!(speculative[0].1, Action::Add);

    let err = client.unsubscribe("d").await.unwrap_err();
    assert!(matches!(
        err,
        ClientError::Rejected {
            status: Status::NotSubscribed,
            ..
        }
    ));

    client.close().await;
    server.shutdown().await;
}

#[tokio::test]
async fn resubscribe_resumes_from_replica() {
    let server = Server::start().await;
    let (replicas, writer_dir) = (TempDir::new().unwrap(), TempDir::new().unwrap());
    let writer = server.client(writer_dir.path()).await;
    for n in 1..=2 {
        writer.put("d", mail(&format!("{n}.eml"), "x")).await.unwrap();
    }

    let first = server.client(replicas.path()).await;
    first.subscribe("d").await.unwrap();
    first
        .wait_for_version("d", Version::new(2), WAIT)
        .await
        .unwrap();
    first.close().await;

    writer.put("d", mail("3.eml", "x")).await.unwrap();

    let second = server.client(replicas.path()).await;
    assert_eq!(second.subscribe("d").await.unwrap(), Version::new(2));
    second
        .wait_for_version("d", Version::new(3), WAIT)
        .await
        .unwrap();
    let third = second.replica("d").unwrap().read(Version::new(3)).unwrap();
    assert_eq!(third.record.filename(), Some("3.eml"));

    second.close().await;
    writer.close().await;
    server.shutdown().await;
}

#[tokio::test]
async fn wait_times_out_without_patches() {
    let server = Server::start().await;
    let dir = TempDir::new().unwrap();
    let client = server.client(dir.path()).await;
    client.subscribe("d").await.unwrap();

    let err = client
        .wait_for_version("d", Version::new(1), Duration::from_millis(100))
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::Timeout));

    client.close().await;
    server.shutdown().await;
}

#[tokio::test]
async fn overlong_server_line_closes_the_connection() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let peer = tokio::spawn(async move {
        use tokio::io::AsyncWriteExt;
        let (mut socket, _) = listener.accept().await.unwrap();
        // No newline and no EOF: only the length bound can end the read.
        socket.write_all(&[b'x'; 4096]).await.unwrap();
        socket.flush().await.unwrap();
        tokio::time::sleep(WAIT).await;
        socket
    });

    let dir = TempDir::new().unwrap();
    let config = ClientConfig::new(addr.to_string(), dir.path())
        .with_request_timeout(WAIT)
        .with_record_limits(RecordLimits::default().max_record_bytes(64))
        .with_journal(JournalConfig::new().sync_on_append(false));
    let client = SyncClient::connect(config).await.unwrap();

    tokio::time::timeout(WAIT, async {
        while !client.is_closed() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("client kept buffering an unterminated line");

    let err = client.subscribe("d").await.unwrap_err();
    assert!(matches!(err, ClientError::ConnectionClosed));

    client.close().await;
    peer.abort();
}

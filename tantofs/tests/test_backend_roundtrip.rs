mod common;

use common::{TestServer, closed_port};
use tantofs::cadapter::{ConnectionPool, KvConnector, RespClient, TcpConnector, WireError};
use tantofs::meta::FileKind;
use tantofs::store::ObjectStore;
use tantofs::vfs::{Caller, FsError, TantoFs};

const FILE_MODE: u32 = libc::S_IFREG as u32 | 0o644;

async fn mount_over(server: &TestServer) -> TantoFs<TcpConnector> {
    let connector = TcpConnector::new(Some(server.host()), Some(server.port()));
    TantoFs::new(ConnectionPool::new(connector)).await.unwrap()
}

#[tokio::test]
async fn file_lifecycle_over_tcp() {
    let server = TestServer::start().await;
    let fs = mount_over(&server).await;
    assert!(server.backend.contains_key("/@fobj"));

    fs.mknod(Caller::new(1, 1), "/a", FILE_MODE, 0).await.unwrap();
    let data: Vec<u8> = (0..6000u32).map(|i| (i * 7 % 256) as u8).collect();
    assert_eq!(fs.write("/a", &data, 0).await.unwrap(), 6000);
    assert_eq!(fs.getattr("/a").await.unwrap().size, 8192);

    let mut buf = vec![0u8; 8192];
    assert_eq!(fs.read("/a", &mut buf, 0).await.unwrap(), 8192);
    assert_eq!(&buf[..6000], &data[..]);
    assert!(buf[6000..].iter().all(|&b| b == 0));

    fs.unlink("/a").await.unwrap();
    assert!(matches!(fs.getattr("/a").await, Err(FsError::NotFound)));
    for key in ["/a@fobj", "/a@data::0", "/a@data::1"] {
        assert!(!server.backend.contains_key(key), "{key} left behind");
    }

    // sequential callbacks reuse one pooled connection
    assert_eq!(server.accepted(), 1);
}

#[tokio::test]
async fn directories_over_tcp() {
    let server = TestServer::start().await;
    let fs = mount_over(&server).await;

    fs.mkdir(Caller::default(), "/d", 0o755).await.unwrap();
    let f = fs.mknod(Caller::default(), "/d/f", FILE_MODE, 0).await.unwrap();

    let listing = fs.readdir("/d").await.unwrap();
    assert_eq!(listing.len(), 1);
    assert_eq!(listing[0].name, "f");
    assert_eq!(listing[0].kind(), FileKind::File);
    assert_eq!(u64::from(listing[0].seqno), f.ino);

    assert!(matches!(fs.rmdir("/d").await, Err(FsError::NotEmpty)));
    fs.unlink("/d/f").await.unwrap();
    fs.rmdir("/d").await.unwrap();
    assert!(fs.readdir("/").await.unwrap().is_empty());
}

#[tokio::test]
async fn keys_listing_over_tcp() {
    let server = TestServer::start().await;
    let fs = mount_over(&server).await;
    fs.mknod(Caller::default(), "/k", FILE_MODE, 0).await.unwrap();
    fs.write("/k", b"x", 0).await.unwrap();

    let mut conn = fs.pool().get().await.unwrap();
    let mut store = ObjectStore::new(&mut *conn);
    let mut keys = store.list_keys("/k@*").await.unwrap();
    keys.sort();
    assert_eq!(keys, vec!["/k@data::0".to_string(), "/k@fobj".to_string()]);
    assert!(store.list_keys("no-such-*").await.unwrap().is_empty());
}

#[tokio::test]
async fn raw_client_against_server() {
    let server = TestServer::start().await;
    let host = server.host();
    let mut client = RespClient::connect(Some(host.as_str()), Some(server.port())).await.unwrap();

    client.set(b"k", b"hello world").await.unwrap();
    let mut dst = [0u8; 5];
    assert_eq!(client.get(b"k", &mut dst).await.unwrap(), 5);
    assert_eq!(&dst, b"hello");

    // the drained tail must not leak into the next reply
    assert!(matches!(client.get(b"missing", &mut dst).await, Err(WireError::NotFound)));
    client.del(b"k").await.unwrap();
    client.del(b"k").await.unwrap();
    assert!(!client.is_broken());
}

#[tokio::test]
async fn unreachable_backend_is_an_io_error() {
    let port = closed_port().await;
    let connector = TcpConnector::new(Some("127.0.0.1".to_string()), Some(port));
    assert!(matches!(connector.connect().await, Err(WireError::Connect { .. })));

    let err = match TantoFs::new(ConnectionPool::new(connector)).await {
        Ok(_) => panic!("mounted without a backend"),
        Err(e) => e,
    };
    assert_eq!(err.errno(), libc::EIO);
}

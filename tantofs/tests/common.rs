use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tantofs::cadapter::{KvConnection, KvConnector, MemoryConnector};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

/// A tiny RESP server on a random local port, storing into a shared
/// in-memory map. Replies like Redis does, including `:n` for DEL.
pub struct TestServer {
    pub addr: SocketAddr,
    pub backend: MemoryConnector,
    accepted: Arc<AtomicUsize>,
}

#[allow(dead_code)]
impl TestServer {
    pub async fn start() -> TestServer {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let backend = MemoryConnector::new();
        let accepted = Arc::new(AtomicUsize::new(0));

        let (b, a) = (backend.clone(), Arc::clone(&accepted));
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                a.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(serve(stream, b.clone()));
            }
        });
        TestServer {
            addr,
            backend,
            accepted,
        }
    }

    pub fn host(&self) -> String {
        self.addr.ip().to_string()
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Connections accepted so far.
    pub fn accepted(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }
}

async fn serve(stream: TcpStream, backend: MemoryConnector) {
    let mut conn = backend.connect().await.unwrap();
    let (rd, mut wr) = stream.into_split();
    let mut rd = BufReader::new(rd);
    loop {
        let Some(args) = read_command(&mut rd).await else {
            return;
        };
        let reply = execute(&mut conn, &backend, &args).await;
        if wr.write_all(&reply).await.is_err() {
            return;
        }
    }
}

async fn read_line<R: AsyncBufReadExt + Unpin>(rd: &mut R) -> Option<String> {
    let mut line = String::new();
    if rd.read_line(&mut line).await.ok()? == 0 {
        return None;
    }
    Some(line.trim_end_matches("\r\n").to_string())
}

async fn read_command<R: AsyncBufReadExt + Unpin>(rd: &mut R) -> Option<Vec<Vec<u8>>> {
    let header = read_line(rd).await?;
    let count: usize = header.strip_prefix('*')?.parse().ok()?;
    let mut args = Vec::with_capacity(count);
    for _ in 0..count {
        let len: usize = read_line(rd).await?.strip_prefix('$')?.parse().ok()?;
        let mut arg = vec![0u8; len + 2];
        rd.read_exact(&mut arg).await.ok()?;
        arg.truncate(len);
        args.push(arg);
    }
    Some(args)
}

fn bulk(out: &mut Vec<u8>, value: &[u8]) {
    out.extend_from_slice(format!("${}\r\n", value.len()).as_bytes());
    out.extend_from_slice(value);
    out.extend_from_slice(b"\r\n");
}

async fn execute<K: KvConnection>(conn: &mut K, backend: &MemoryConnector, args: &[Vec<u8>]) -> Vec<u8> {
    let mut out = Vec::new();
    let cmd = args.first().map(|c| c.to_ascii_uppercase()).unwrap_or_default();
    match (cmd.as_slice(), args.len()) {
        (b"GET", 2) => match backend.value(&String::from_utf8_lossy(&args[1])) {
            Some(v) => bulk(&mut out, &v),
            None => out.extend_from_slice(b"$-1\r\n"),
        },
        (b"SET", 3) => {
            conn.set(&args[1], &args[2]).await.unwrap();
            out.extend_from_slice(b"+OK\r\n");
        }
        (b"DEL", 2) => {
            let existed = backend.contains_key(&String::from_utf8_lossy(&args[1]));
            conn.del(&args[1]).await.unwrap();
            out.extend_from_slice(if existed { b":1\r\n" } else { b":0\r\n" });
        }
        (b"KEYS", 2) => {
            let keys = conn.keys(&args[1], usize::MAX).await.unwrap();
            out.extend_from_slice(format!("*{}\r\n", keys.len()).as_bytes());
            for (key, _) in keys {
                bulk(&mut out, &key);
            }
        }
        _ => out.extend_from_slice(b"-ERR unknown command\r\n"),
    }
    out
}

/// A local port with nothing listening on it.
#[allow(dead_code)]
pub async fn closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

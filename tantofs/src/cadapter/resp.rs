//! Minimal Redis (RESP2) client: GET / SET / DEL / KEYS over one stream.
//!
//! Requests are framed as arrays of bulk strings and written in one go.
//! Replies are decoded straight out of a [`ReadBuffer`], copying bulk values
//! into caller-provided slices. Whatever does not fit is drained from the
//! stream so the next command starts on a reply boundary.

use super::buffer::ReadBuffer;
use super::{KvConnection, KvConnector, WireError, WireResult};
use async_trait::async_trait;
use bytes::{BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, trace};

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 6379;

const SEP: &[u8; 2] = b"\r\n";
const STATUS_OK: &[u8] = b"OK";
// Status and error lines are short; anything longer is not a reply we understand.
const MAX_LINE: usize = 512;
// Longest run of digits accepted for a length or count token.
const MAX_DIGITS: usize = 19;
const PREALLOC_KEYS: usize = 1024;

/// Build one request frame: `*<n>\r\n` followed by `$<len>\r\n<arg>\r\n` per argument.
pub fn encode_command(args: &[&[u8]]) -> BytesMut {
    let body: usize = args.iter().map(|a| a.len() + 16).sum();
    let mut frame = BytesMut::with_capacity(body + 16);
    frame.put_u8(b'*');
    frame.put_slice(args.len().to_string().as_bytes());
    frame.put_slice(SEP);
    for arg in args {
        frame.put_u8(b'$');
        frame.put_slice(arg.len().to_string().as_bytes());
        frame.put_slice(SEP);
        frame.put_slice(arg);
        frame.put_slice(SEP);
    }
    frame
}

/// Wire client owning one stream. Not shareable: commands on one client are
/// strictly sequential.
pub struct RespClient<S = TcpStream> {
    stream: S,
    rbuf: ReadBuffer,
    broken: bool,
}

impl RespClient<TcpStream> {
    /// Open a TCP connection, falling back to `127.0.0.1:6379` for unset parts.
    pub async fn connect(host: Option<&str>, port: Option<u16>) -> WireResult<Self> {
        let addr = format!(
            "{}:{}",
            host.unwrap_or(DEFAULT_HOST),
            port.unwrap_or(DEFAULT_PORT)
        );
        let stream = TcpStream::connect(&addr)
            .await
            .map_err(|source| WireError::Connect {
                addr: addr.clone(),
                source,
            })?;
        debug!(%addr, "connected to backend");
        Ok(Self::new(stream))
    }
}

impl<S> RespClient<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            rbuf: ReadBuffer::new(),
            broken: false,
        }
    }

    pub fn is_broken(&self) -> bool {
        self.broken
    }

    pub fn into_inner(self) -> S {
        self.stream
    }

    pub async fn get(&mut self, key: &[u8], dst: &mut [u8]) -> WireResult<usize> {
        let res = self.get_inner(key, dst).await;
        self.track(res)
    }

    pub async fn set(&mut self, key: &[u8], value: &[u8]) -> WireResult<()> {
        let res = self.set_inner(key, value).await;
        self.track(res)
    }

    pub async fn del(&mut self, key: &[u8]) -> WireResult<()> {
        let res = self.del_inner(key).await;
        self.track(res)
    }

    pub async fn keys(&mut self, pattern: &[u8], capacity: usize) -> WireResult<Vec<(Bytes, usize)>> {
        let res = self.keys_inner(pattern, capacity).await;
        self.track(res)
    }

    fn track<T>(&mut self, res: WireResult<T>) -> WireResult<T> {
        if let Err(e) = &res {
            if e.is_fatal() {
                self.broken = true;
            }
        }
        res
    }

    async fn send(&mut self, args: &[&[u8]]) -> WireResult<()> {
        if self.broken {
            return Err(WireError::Protocol(
                "connection is out of sync after an earlier failure".into(),
            ));
        }
        let frame = encode_command(args);
        trace!(cmd = %String::from_utf8_lossy(args[0]), len = frame.len(), "send");
        self.stream.write_all(&frame).await?;
        self.stream.flush().await?;
        Ok(())
    }

    async fn get_inner(&mut self, key: &[u8], dst: &mut [u8]) -> WireResult<usize> {
        self.send(&[b"GET", key]).await?;
        match self.read_byte().await? {
            b'$' => match self.read_bulk_into(dst).await? {
                Some((copied, _len)) => Ok(copied),
                None => Err(WireError::NotFound),
            },
            b'-' => Err(WireError::Backend(self.read_line().await?)),
            other => Err(unexpected(other, "bulk reply")),
        }
    }

    async fn set_inner(&mut self, key: &[u8], value: &[u8]) -> WireResult<()> {
        self.send(&[b"SET", key, value]).await?;
        self.read_status(false).await
    }

    async fn del_inner(&mut self, key: &[u8]) -> WireResult<()> {
        self.send(&[b"DEL", key]).await?;
        self.read_status(true).await
    }

    async fn keys_inner(&mut self, pattern: &[u8], capacity: usize) -> WireResult<Vec<(Bytes, usize)>> {
        self.send(&[b"KEYS", pattern]).await?;
        let count = match self.read_byte().await? {
            b'*' => {
                let n = self.read_int().await?;
                self.read_sep().await?;
                n
            }
            b'-' => return Err(WireError::Backend(self.read_line().await?)),
            other => return Err(unexpected(other, "multi-bulk reply")),
        };
        if count <= 0 {
            return Ok(Vec::new());
        }

        // The count is untrusted; elements are pulled one at a time anyway.
        let mut out = Vec::with_capacity(usize::try_from(count).map_or(0, |n| n.min(PREALLOC_KEYS)));
        let mut slot = vec![0u8; capacity];
        for _ in 0..count {
            match self.read_byte().await? {
                b'$' => {}
                b'*' => {
                    return Err(WireError::Protocol(
                        "nested arrays are not supported".into(),
                    ));
                }
                other => return Err(unexpected(other, "bulk element")),
            }
            let Some((copied, len)) = self.read_bulk_into(&mut slot).await? else {
                return Err(WireError::Protocol("null element in KEYS reply".into()));
            };
            out.push((Bytes::copy_from_slice(&slot[..copied]), len));
        }
        trace!(count = out.len(), "keys decoded");
        Ok(out)
    }

    /// Status reply after SET or DEL. `+OK` is success; DEL may also answer
    /// with an integer (number of removed keys).
    async fn read_status(&mut self, allow_integer: bool) -> WireResult<()> {
        match self.read_byte().await? {
            b'+' => {
                let line = self.read_line().await?;
                if line.as_bytes() == STATUS_OK {
                    Ok(())
                } else {
                    Err(WireError::Backend(line))
                }
            }
            b':' if allow_integer => {
                self.read_int().await?;
                self.read_sep().await
            }
            b'-' => Err(WireError::Backend(self.read_line().await?)),
            other => Err(unexpected(other, "status reply")),
        }
    }

    /// Decode the body of a bulk reply whose `$` marker was already consumed.
    /// Returns `None` for the null bulk, otherwise `(copied, advertised_len)`.
    async fn read_bulk_into(&mut self, dst: &mut [u8]) -> WireResult<Option<(usize, usize)>> {
        let len = self.read_int().await?;
        self.read_sep().await?;
        if len == -1 {
            return Ok(None);
        }
        if len < 0 {
            return Err(WireError::Protocol(format!("invalid bulk length {len}")));
        }
        let len = len as usize;

        let want = len.min(dst.len());
        let mut copied = 0;
        while copied < want {
            self.rbuf.fill(&mut self.stream).await?;
            copied += self.rbuf.consume_into(&mut dst[copied..want]);
        }

        let mut left = len - copied;
        while left > 0 {
            self.rbuf.fill(&mut self.stream).await?;
            left -= self.rbuf.consume(left).len();
        }

        self.read_sep().await?;
        Ok(Some((copied, len)))
    }

    async fn read_byte(&mut self) -> WireResult<u8> {
        self.rbuf.fill(&mut self.stream).await?;
        Ok(self.rbuf.consume(1)[0])
    }

    /// Optional `-` then ASCII digits, stopping at (and not consuming) the
    /// first non-digit.
    async fn read_int(&mut self) -> WireResult<i64> {
        self.rbuf.fill(&mut self.stream).await?;
        let negative = self.rbuf.peek(1) == b"-";
        if negative {
            self.rbuf.consume(1);
        }

        let mut val: i64 = 0;
        let mut digits = 0;
        loop {
            self.rbuf.fill(&mut self.stream).await?;
            let c = self.rbuf.peek(1)[0];
            if !c.is_ascii_digit() {
                break;
            }
            if digits == MAX_DIGITS {
                return Err(WireError::Protocol("length token too long".into()));
            }
            val = val
                .checked_mul(10)
                .and_then(|v| v.checked_add(i64::from(c - b'0')))
                .ok_or_else(|| WireError::Protocol("length out of range".into()))?;
            digits += 1;
            self.rbuf.consume(1);
        }
        if digits == 0 {
            return Err(WireError::Protocol("expected a decimal length".into()));
        }
        Ok(if negative { -val } else { val })
    }

    async fn read_sep(&mut self) -> WireResult<()> {
        for &expected in SEP {
            let c = self.read_byte().await?;
            if c != expected {
                return Err(WireError::Protocol(format!(
                    "expected CRLF separator, found byte {c:#04x}"
                )));
            }
        }
        Ok(())
    }

    /// Read a status or error line up to CRLF (marker already consumed).
    async fn read_line(&mut self) -> WireResult<String> {
        let mut line = Vec::new();
        loop {
            let c = self.read_byte().await?;
            if c == b'\r' {
                if self.read_byte().await? != b'\n' {
                    return Err(WireError::Protocol("bare CR in status line".into()));
                }
                break;
            }
            if line.len() == MAX_LINE {
                return Err(WireError::Protocol("status line too long".into()));
            }
            line.push(c);
        }
        Ok(String::from_utf8_lossy(&line).into_owned())
    }
}

fn unexpected(marker: u8, wanted: &str) -> WireError {
    WireError::Protocol(format!(
        "unexpected reply marker {:?} while waiting for {wanted}",
        marker as char
    ))
}

#[async_trait]
impl<S> KvConnection for RespClient<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn get(&mut self, key: &[u8], dst: &mut [u8]) -> WireResult<usize> {
        RespClient::get(self, key, dst).await
    }

    async fn set(&mut self, key: &[u8], value: &[u8]) -> WireResult<()> {
        RespClient::set(self, key, value).await
    }

    async fn del(&mut self, key: &[u8]) -> WireResult<()> {
        RespClient::del(self, key).await
    }

    async fn keys(&mut self, pattern: &[u8], capacity: usize) -> WireResult<Vec<(Bytes, usize)>> {
        RespClient::keys(self, pattern, capacity).await
    }

    fn is_broken(&self) -> bool {
        self.broken
    }
}

/// Opens a fresh TCP connection per pool miss.
#[derive(Clone, Debug)]
pub struct TcpConnector {
    host: Option<String>,
    port: Option<u16>,
}

impl TcpConnector {
    pub fn new(host: Option<String>, port: Option<u16>) -> Self {
        Self { host, port }
    }
}

impl Default for TcpConnector {
    fn default() -> Self {
        Self::new(None, None)
    }
}

#[async_trait]
impl KvConnector for TcpConnector {
    type Connection = RespClient<TcpStream>;

    async fn connect(&self) -> WireResult<Self::Connection> {
        RespClient::connect(self.host.as_deref(), self.port).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, DuplexStream, duplex};

    /// Spawn a scripted peer: for each step, read exactly the expected request
    /// bytes, then write the canned reply.
    fn scripted_peer(mut peer: DuplexStream, steps: Vec<(Vec<u8>, Vec<u8>)>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            for (request, reply) in steps {
                let mut got = vec![0u8; request.len()];
                peer.read_exact(&mut got).await.unwrap();
                assert_eq!(
                    String::from_utf8_lossy(&got),
                    String::from_utf8_lossy(&request)
                );
                peer.write_all(&reply).await.unwrap();
                peer.flush().await.unwrap();
            }
        })
    }

    fn client_pair(max_buf: usize) -> (RespClient<DuplexStream>, DuplexStream) {
        let (a, b) = duplex(max_buf);
        (RespClient::new(a), b)
    }

    #[test]
    fn frames_are_byte_exact() {
        assert_eq!(
            &encode_command(&[b"GET", b"/a@fobj"])[..],
            b"*2\r\n$3\r\nGET\r\n$7\r\n/a@fobj\r\n"
        );
        assert_eq!(
            &encode_command(&[b"SET", b"k", b"v1"])[..],
            b"*3\r\n$3\r\nSET\r\n$1\r\nk\r\n$2\r\nv1\r\n"
        );
        assert_eq!(
            &encode_command(&[b"DEL", b"k"])[..],
            b"*2\r\n$3\r\nDEL\r\n$1\r\nk\r\n"
        );
        assert_eq!(
            &encode_command(&[b"KEYS", b"/*"])[..],
            b"*2\r\n$4\r\nKEYS\r\n$2\r\n/*\r\n"
        );
    }

    #[tokio::test]
    async fn get_reassembles_value_split_across_reads() {
        // a one-byte pipe forces every read to return a single byte
        let (mut client, peer) = client_pair(1);
        let server = scripted_peer(
            peer,
            vec![(
                encode_command(&[b"GET", b"k"]).to_vec(),
                b"$11\r\nhello world\r\n".to_vec(),
            )],
        );

        let mut dst = [0u8; 32];
        let n = client.get(b"k", &mut dst).await.unwrap();
        assert_eq!(&dst[..n], b"hello world");
        server.await.unwrap();
    }

    #[tokio::test]
    async fn short_destination_drains_rest_of_value() {
        let (mut client, peer) = client_pair(7);
        let server = scripted_peer(
            peer,
            vec![
                (
                    encode_command(&[b"GET", b"big"]).to_vec(),
                    b"$10\r\n0123456789\r\n".to_vec(),
                ),
                (
                    encode_command(&[b"GET", b"small"]).to_vec(),
                    b"$3\r\nabc\r\n".to_vec(),
                ),
            ],
        );

        let mut dst = [0u8; 4];
        assert_eq!(client.get(b"big", &mut dst).await.unwrap(), 4);
        assert_eq!(&dst, b"0123");

        let mut dst = [0u8; 8];
        let n = client.get(b"small", &mut dst).await.unwrap();
        assert_eq!(&dst[..n], b"abc");
        assert!(!client.is_broken());
        server.await.unwrap();
    }

    #[tokio::test]
    async fn null_bulk_is_not_found_and_keeps_connection() {
        let (mut client, peer) = client_pair(64);
        let server = scripted_peer(
            peer,
            vec![
                (encode_command(&[b"GET", b"nope"]).to_vec(), b"$-1\r\n".to_vec()),
                (encode_command(&[b"SET", b"k", b"v"]).to_vec(), b"+OK\r\n".to_vec()),
            ],
        );

        let mut dst = [0u8; 8];
        let err = client.get(b"nope", &mut dst).await.unwrap_err();
        assert!(matches!(err, WireError::NotFound));
        assert!(!client.is_broken());
        client.set(b"k", b"v").await.unwrap();
        server.await.unwrap();
    }

    #[tokio::test]
    async fn status_other_than_ok_is_backend_error() {
        let (mut client, peer) = client_pair(64);
        let server = scripted_peer(
            peer,
            vec![
                (encode_command(&[b"SET", b"k", b"v"]).to_vec(), b"+QUEUED\r\n".to_vec()),
                (
                    encode_command(&[b"SET", b"k", b"v"]).to_vec(),
                    b"-ERR wrong number of arguments\r\n".to_vec(),
                ),
            ],
        );

        let err = client.set(b"k", b"v").await.unwrap_err();
        assert!(matches!(err, WireError::Backend(ref s) if s == "QUEUED"));
        let err = client.set(b"k", b"v").await.unwrap_err();
        assert!(matches!(err, WireError::Backend(ref s) if s.starts_with("ERR")));
        assert!(!client.is_broken());
        server.await.unwrap();
    }

    #[tokio::test]
    async fn del_accepts_ok_and_integer_replies() {
        let (mut client, peer) = client_pair(64);
        let server = scripted_peer(
            peer,
            vec![
                (encode_command(&[b"DEL", b"a"]).to_vec(), b":1\r\n".to_vec()),
                (encode_command(&[b"DEL", b"b"]).to_vec(), b":0\r\n".to_vec()),
                (encode_command(&[b"DEL", b"c"]).to_vec(), b"+OK\r\n".to_vec()),
            ],
        );

        client.del(b"a").await.unwrap();
        client.del(b"b").await.unwrap();
        client.del(b"c").await.unwrap();
        server.await.unwrap();
    }

    #[tokio::test]
    async fn keys_decodes_multi_bulk_with_truncation() {
        let (mut client, peer) = client_pair(3);
        let server = scripted_peer(
            peer,
            vec![
                (
                    encode_command(&[b"KEYS", b"*@fobj"]).to_vec(),
                    b"*3\r\n$7\r\n/a@fobj\r\n$12\r\n/long@fobj12\r\n$5\r\n/@obj\r\n".to_vec(),
                ),
                (encode_command(&[b"KEYS", b"none*"]).to_vec(), b"*0\r\n".to_vec()),
                (encode_command(&[b"GET", b"x"]).to_vec(), b"$1\r\nx\r\n".to_vec()),
            ],
        );

        let keys = client.keys(b"*@fobj", 8).await.unwrap();
        assert_eq!(keys.len(), 3);
        assert_eq!(&keys[0].0[..], b"/a@fobj");
        assert_eq!(keys[0].1, 7);
        assert_eq!(&keys[1].0[..], b"/long@fo");
        assert_eq!(keys[1].1, 12);
        assert_eq!(&keys[2].0[..], b"/@obj");

        assert!(client.keys(b"none*", 8).await.unwrap().is_empty());

        let mut dst = [0u8; 1];
        assert_eq!(client.get(b"x", &mut dst).await.unwrap(), 1);
        server.await.unwrap();
    }

    #[tokio::test]
    async fn nested_array_is_protocol_error() {
        let (mut client, peer) = client_pair(64);
        let server = scripted_peer(
            peer,
            vec![(
                encode_command(&[b"KEYS", b"*"]).to_vec(),
                b"*1\r\n*1\r\n$1\r\na\r\n".to_vec(),
            )],
        );

        let err = client.keys(b"*", 16).await.unwrap_err();
        assert!(matches!(err, WireError::Protocol(_)));
        assert!(client.is_broken());
        server.await.unwrap();
    }

    #[tokio::test]
    async fn framing_violation_breaks_client() {
        let (mut client, peer) = client_pair(64);
        let server = scripted_peer(
            peer,
            vec![(
                encode_command(&[b"GET", b"k"]).to_vec(),
                b"$3\r\nabcXY".to_vec(),
            )],
        );

        let mut dst = [0u8; 8];
        let err = client.get(b"k", &mut dst).await.unwrap_err();
        assert!(matches!(err, WireError::Protocol(_)));
        assert!(client.is_broken());

        // no further command goes out on a desynchronized stream
        let err = client.get(b"k", &mut dst).await.unwrap_err();
        assert!(matches!(err, WireError::Protocol(_)));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn oversized_length_is_protocol_error() {
        let (mut client, peer) = client_pair(64);
        let server = scripted_peer(
            peer,
            vec![(
                encode_command(&[b"GET", b"k"]).to_vec(),
                b"$9999999999999999999\r\n".to_vec(),
            )],
        );

        let mut dst = [0u8; 8];
        let err = client.get(b"k", &mut dst).await.unwrap_err();
        assert!(matches!(err, WireError::Protocol(ref msg) if msg.contains("out of range")));
        assert!(client.is_broken());
        server.await.unwrap();
    }

    #[tokio::test]
    async fn huge_keys_count_ends_at_eof() {
        let (mut client, peer) = client_pair(64);
        let server = scripted_peer(
            peer,
            vec![(
                encode_command(&[b"KEYS", b"*"]).to_vec(),
                b"*999999999999999999\r\n$1\r\na\r\n".to_vec(),
            )],
        );

        let err = client.keys(b"*", 16).await.unwrap_err();
        assert!(matches!(err, WireError::Io(_)));
        assert!(client.is_broken());
        server.await.unwrap();
    }

    #[tokio::test]
    async fn closed_peer_is_io_error() {
        let (mut client, peer) = client_pair(64);
        drop(peer);
        let mut dst = [0u8; 8];
        let err = client.get(b"k", &mut dst).await.unwrap_err();
        assert!(matches!(err, WireError::Io(_)));
        assert!(client.is_broken());
    }
}

//! Best-effort HTTP detection on freshly accepted connections.
//!
//! Bytes are only peeked, never consumed, so the capture and the upstream see
//! the full request. Anything that does not look like an HTTP/1.x request
//! head yields `None` and the connection is handled as opaque TCP.

use std::time::Duration;

use log::trace;
use tokio::net::TcpStream;

use crate::data_capture::context::HttpRequestMeta;

const PEEK_LIMIT: usize = 8 * 1024;
const PEEK_RETRY: Duration = Duration::from_millis(10);
const MAX_METHOD_LEN: usize = 16;

/// Parses a request line and `Host` header out of a (possibly incomplete)
/// request head.
pub fn parse_http_head(head: &[u8]) -> Option<HttpRequestMeta> {
    let text = String::from_utf8_lossy(head);
    let mut lines = text.split("\r\n");

    let request_line = lines.next()?;
    let mut parts = request_line.split(' ');
    let method = parts.next()?;
    let target = parts.next()?;
    let version = parts.next()?;
    if parts.next().is_some()
        || method.is_empty()
        || !method.bytes().all(|b| b.is_ascii_uppercase())
        || target.is_empty()
        || target.chars().any(char::is_control)
        || !version.starts_with("HTTP/1.")
    {
        return None;
    }

    let host_header = lines
        .take_while(|line| !line.is_empty())
        .filter_map(|line| line.split_once(':'))
        .find(|(name, _)| name.trim().eq_ignore_ascii_case("host"))
        .map(|(_, value)| value.trim().to_string())
        .filter(|host| !host.is_empty() && !host.chars().any(char::is_control));

    let (scheme, host, path) = if let Some((scheme, rest)) = target.split_once("://") {
        let (host, path) = match rest.find('/') {
            Some(i) => (&rest[..i], &rest[i..]),
            None => (rest, "/"),
        };
        (scheme.to_ascii_lowercase(), host.to_string(), path.to_string())
    } else if method == "CONNECT" {
        ("https".to_string(), target.to_string(), "/".to_string())
    } else {
        ("http".to_string(), host_header?, target.to_string())
    };

    Some(HttpRequestMeta {
        method: method.to_string(),
        scheme,
        host,
        path,
    })
}

fn head_complete(head: &[u8]) -> bool {
    head.windows(4).any(|w| w == b"\r\n\r\n")
}

/// Whether `prefix` can still grow into an HTTP request line: an uppercase
/// method token followed by a space.
fn could_be_request_line(prefix: &[u8]) -> bool {
    let method = prefix
        .iter()
        .position(|b| *b == b' ')
        .map_or(prefix, |end| &prefix[..end]);
    method.len() <= MAX_METHOD_LEN
        && method.iter().all(u8::is_ascii_uppercase)
        && !(method.is_empty() && !prefix.is_empty())
}

/// Peeks at the client's first bytes for at most `wait` and tries to read an
/// HTTP request head from them.
pub async fn sniff_http_request(stream: &TcpStream, wait: Duration) -> Option<HttpRequestMeta> {
    let mut buf = vec![0u8; PEEK_LIMIT];
    let mut seen = 0usize;

    let _ = tokio::time::timeout(wait, async {
        loop {
            match stream.peek(&mut buf).await {
                Ok(0) | Err(_) => return,
                Ok(n) => {
                    seen = n;
                    if n == buf.len()
                        || head_complete(&buf[..n])
                        || !could_be_request_line(&buf[..n])
                    {
                        return;
                    }
                }
            }
            tokio::time::sleep(PEEK_RETRY).await;
        }
    })
    .await;

    trace!("peeked {} byte(s) for protocol detection", seen);
    parse_http_head(&buf[..seen])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_capture::context::{ConnVar, ConnectionContext, HTTP_REQUEST_VAR, UPSTREAM_ADDR_VAR};
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpListener;

    #[test]
    fn origin_form_uses_host_header() {
        let meta = parse_http_head(b"GET /x?y=1 HTTP/1.1\r\nAccept: */*\r\nhost: a.example\r\n\r\n").unwrap();
        assert_eq!(meta.method, "GET");
        assert_eq!(meta.target_uri(), "http://a.example/x?y=1");
    }

    #[test]
    fn absolute_form_wins_over_host() {
        let meta = parse_http_head(b"GET http://b.example:8080/p HTTP/1.1\r\nHost: a\r\n\r\n").unwrap();
        assert_eq!(meta.target_uri(), "http://b.example:8080/p");

        let bare = parse_http_head(b"GET http://b.example HTTP/1.0\r\n\r\n").unwrap();
        assert_eq!(bare.target_uri(), "http://b.example/");
    }

    #[test]
    fn connect_targets_authority() {
        let meta = parse_http_head(b"CONNECT a.example:443 HTTP/1.1\r\n\r\n").unwrap();
        assert_eq!(meta.target_uri(), "https://a.example:443/");
    }

    #[test]
    fn incomplete_head_with_host_is_enough() {
        let meta = parse_http_head(b"POST /upload HTTP/1.1\r\nHost: a\r\nContent-Le").unwrap();
        assert_eq!(meta.target_uri(), "http://a/upload");
    }

    #[test]
    fn non_http_is_rejected() {
        assert!(parse_http_head(b"SSH-2.0-OpenSSH_9.6\r\n").is_none());
        assert!(parse_http_head(b"\x16\x03\x01\x02\x00").is_none());
        assert!(parse_http_head(b"GET /x HTTP/1.1\r\n\r\n").is_none());
        assert!(parse_http_head(b"").is_none());
    }

    #[test]
    fn control_characters_in_target_or_host_are_rejected() {
        assert!(parse_http_head(b"GET /a\nb HTTP/1.1\r\nHost: a\r\n\r\n").is_none());
        assert!(parse_http_head(b"GET /a HTTP/1.1\r\nHost: a\x0bb\r\n\r\n").is_none());

        let mut ctx = ConnectionContext::default();
        ctx.set_var(UPSTREAM_ADDR_VAR, ConnVar::Text("10.0.0.2:80".into()));
        if let Some(meta) = parse_http_head(b"GET /a\nb HTTP/1.1\r\nHost: a\r\n\r\n") {
            ctx.set_var(HTTP_REQUEST_VAR, ConnVar::HttpRequest(meta));
        }
        assert_eq!(ctx.target_uri(), "tcp://10.0.0.2:80");
    }

    #[test]
    fn request_line_prefixes() {
        assert!(could_be_request_line(b""));
        assert!(could_be_request_line(b"GE"));
        assert!(could_be_request_line(b"GET /x"));
        assert!(!could_be_request_line(b"\x16\x03\x01"));
        assert!(!could_be_request_line(b"SSH-2.0"));
        assert!(!could_be_request_line(b" GET"));
        assert!(!could_be_request_line(b"ABCDEFGHIJKLMNOPQ"));
    }

    #[tokio::test]
    async fn non_http_client_is_not_held_for_the_full_timeout() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let mut client = TcpStream::connect(addr).await.unwrap();
        let (server, _) = listener.accept().await.unwrap();

        client.write_all(b"\x16\x03\x01\x02\x00\x01\x00").await.unwrap();
        let sniffed = tokio::time::timeout(
            Duration::from_secs(2),
            sniff_http_request(&server, Duration::from_secs(30)),
        )
        .await
        .expect("sniffing should stop on the first non-HTTP bytes");
        assert!(sniffed.is_none());
    }

    #[tokio::test]
    async fn sniffing_leaves_bytes_unread() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let mut client = TcpStream::connect(addr).await.unwrap();
        let (server, _) = listener.accept().await.unwrap();

        client.write_all(b"GET / HTTP/1.1\r\nHost: a\r\n\r\n").await.unwrap();
        let meta = sniff_http_request(&server, Duration::from_secs(2)).await.unwrap();
        assert_eq!(meta.target_uri(), "http://a/");

        let mut buf = [0u8; 64];
        let n = server.peek(&mut buf).await.unwrap();
        assert!(buf[..n].starts_with(b"GET / HTTP/1.1"));
    }

    #[tokio::test]
    async fn silent_client_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let _client = TcpStream::connect(addr).await.unwrap();
        let (server, _) = listener.accept().await.unwrap();

        assert!(sniff_http_request(&server, Duration::from_millis(50)).await.is_none());
    }
}

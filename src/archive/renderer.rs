//! WARC/1.0 serialization of an [`Archive`].
//!
//! The output is three blocks (warcinfo, request, response), each made of a
//! version line, `Name: value` header lines, a blank line, the raw payload and
//! the `\r\n\r\n` record separator:
//!
//! ```text
//! WARC/1.0
//! WARC-Type: request
//! WARC-Record-ID: <urn:uuid:...>
//! WARC-Date: 2024-03-01T12:00:00Z
//! WARC-Warcinfo-ID: <urn:uuid:...>
//! WARC-Target-URI: http://example.com/x
//! WARC-IP-Address: 10.0.0.1
//! Content-Type: application/http;msgtype=request
//! Content-Length: 20
//!
//! GET /x HTTP/1.1 ...
//! ```
//!
//! Rendering is lazy: [`WarcRenderer::segments`] yields one piece at a time and
//! payloads are borrowed from the archive rather than copied.

use std::borrow::Cow;
use std::fmt::Write as _;

use log::trace;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use uuid::Uuid;

use super::identity::format_timestamp;
use super::types::{Archive, MessageRecord};
use crate::data_capture::types::Direction;
use crate::error_handling::types::RenderError;

pub const WARC_VERSION_LINE: &str = "WARC/1.0\r\n";
pub const RECORD_SEPARATOR: &[u8] = b"\r\n\r\n";

#[derive(Debug, Default, Clone, Copy)]
pub struct WarcRenderer;

impl WarcRenderer {
    pub fn new() -> Self {
        Self
    }

    /// Validates the archive's free-form fields and returns the single-pass
    /// sequence of rendered segments.
    ///
    /// Errors
    /// - [`RenderError::InvalidHeaderValue`] if the target URI or source
    ///   identity would break header framing.
    pub fn segments<'a>(&self, archive: &'a Archive) -> Result<RenderedSegments<'a>, RenderError> {
        check_header_value("WARC-Target-URI", &archive.target_uri)?;
        check_header_value("WARC-IP-Address", &archive.source_identity)?;
        Ok(RenderedSegments { archive, stage: 0 })
    }

    /// Streams the rendered archive into `out`, returning the byte count.
    pub async fn render<W>(&self, archive: &Archive, out: &mut W) -> Result<u64, RenderError>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        let mut written = 0u64;
        for segment in self.segments(archive)? {
            out.write_all(&segment).await?;
            written += segment.len() as u64;
        }
        out.flush().await?;
        trace!("[{}] rendered {} WARC bytes", archive.info.id, written);
        Ok(written)
    }

    /// Renders into an owned buffer.
    pub fn render_to_vec(&self, archive: &Archive) -> Result<Vec<u8>, RenderError> {
        let mut out = Vec::with_capacity(archive.total_bytes() + 1024);
        for segment in self.segments(archive)? {
            out.extend_from_slice(&segment);
        }
        Ok(out)
    }
}

/// Rendered pieces of one archive, in output order. Not restartable.
pub struct RenderedSegments<'a> {
    archive: &'a Archive,
    stage: u8,
}

impl<'a> Iterator for RenderedSegments<'a> {
    type Item = Cow<'a, [u8]>;

    fn next(&mut self) -> Option<Self::Item> {
        let archive = self.archive;
        let segment = match self.stage {
            0 => Cow::Owned(info_header(archive).into_bytes()),
            2 => Cow::Owned(message_header(archive, Direction::Request).into_bytes()),
            3 => Cow::Borrowed(archive.request.content.as_slice()),
            5 => Cow::Owned(message_header(archive, Direction::Response).into_bytes()),
            6 => Cow::Borrowed(archive.response.content.as_slice()),
            1 | 4 | 7 => Cow::Borrowed(RECORD_SEPARATOR),
            _ => return None,
        };
        self.stage += 1;
        Some(segment)
    }
}

fn check_header_value(field: &'static str, value: &str) -> Result<(), RenderError> {
    if value.contains(['\r', '\n']) {
        return Err(RenderError::InvalidHeaderValue {
            field,
            value: value.to_string(),
        });
    }
    Ok(())
}

fn record_id(id: Uuid) -> String {
    format!("<urn:uuid:{}>", id)
}

fn push_field(header: &mut String, name: &str, value: &str) {
    let _ = write!(header, "{}: {}\r\n", name, value);
}

fn info_header(archive: &Archive) -> String {
    let mut header = String::with_capacity(256);
    header.push_str(WARC_VERSION_LINE);
    push_field(&mut header, "WARC-Type", "warcinfo");
    push_field(&mut header, "WARC-Record-ID", &record_id(archive.info.id));
    push_field(&mut header, "WARC-Date", &format_timestamp(&archive.info.timestamp));
    push_field(&mut header, "Content-Type", "application/warc-fields");
    push_field(&mut header, "Content-Length", "0");
    header.push_str("\r\n");
    header
}

fn message_header(archive: &Archive, direction: Direction) -> String {
    let (record, warc_type): (&MessageRecord, &str) = match direction {
        Direction::Request => (&archive.request, "request"),
        Direction::Response => (&archive.response, "response"),
    };

    let mut header = String::with_capacity(512);
    header.push_str(WARC_VERSION_LINE);
    push_field(&mut header, "WARC-Type", warc_type);
    push_field(&mut header, "WARC-Record-ID", &record_id(record.id));
    push_field(&mut header, "WARC-Date", &format_timestamp(&record.timestamp));
    push_field(&mut header, "WARC-Warcinfo-ID", &record_id(archive.info.id));
    if direction == Direction::Response {
        push_field(&mut header, "WARC-Concurrent-To", &record_id(archive.request.id));
    }
    if !archive.target_uri.is_empty() {
        push_field(&mut header, "WARC-Target-URI", &archive.target_uri);
    }
    if !archive.source_identity.is_empty() {
        push_field(&mut header, "WARC-IP-Address", &archive.source_identity);
    }
    push_field(
        &mut header,
        "Content-Type",
        &format!("application/http;msgtype={}", warc_type),
    );
    push_field(&mut header, "Content-Length", &record.content_length().to_string());
    header.push_str("\r\n");
    header
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::types::InfoRecord;
    use chrono::{TimeZone, Utc};

    fn fixed_archive(request: &[u8], response: &[u8], target_uri: &str) -> Archive {
        let t0 = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let t1 = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 2).unwrap();
        Archive {
            info: InfoRecord {
                id: Uuid::from_u128(1),
                timestamp: t0,
            },
            request: MessageRecord {
                id: Uuid::from_u128(2),
                timestamp: t0,
                content: request.to_vec(),
            },
            response: MessageRecord {
                id: Uuid::from_u128(3),
                timestamp: t1,
                content: response.to_vec(),
            },
            target_uri: target_uri.to_string(),
            source_identity: "10.0.0.1".to_string(),
        }
    }

    #[test]
    fn renders_exact_layout() {
        let archive = fixed_archive(b"GET / HTTP/1.1\r\n\r\n", b"HTTP/1.1 204 No Content\r\n\r\n", "http://a/");
        let out = WarcRenderer::new().render_to_vec(&archive).unwrap();

        let expected = concat!(
            "WARC/1.0\r\n",
            "WARC-Type: warcinfo\r\n",
            "WARC-Record-ID: <urn:uuid:00000000-0000-0000-0000-000000000001>\r\n",
            "WARC-Date: 2024-03-01T12:00:00Z\r\n",
            "Content-Type: application/warc-fields\r\n",
            "Content-Length: 0\r\n",
            "\r\n",
            "\r\n\r\n",
            "WARC/1.0\r\n",
            "WARC-Type: request\r\n",
            "WARC-Record-ID: <urn:uuid:00000000-0000-0000-0000-000000000002>\r\n",
            "WARC-Date: 2024-03-01T12:00:00Z\r\n",
            "WARC-Warcinfo-ID: <urn:uuid:00000000-0000-0000-0000-000000000001>\r\n",
            "WARC-Target-URI: http://a/\r\n",
            "WARC-IP-Address: 10.0.0.1\r\n",
            "Content-Type: application/http;msgtype=request\r\n",
            "Content-Length: 18\r\n",
            "\r\n",
            "GET / HTTP/1.1\r\n\r\n",
            "\r\n\r\n",
            "WARC/1.0\r\n",
            "WARC-Type: response\r\n",
            "WARC-Record-ID: <urn:uuid:00000000-0000-0000-0000-000000000003>\r\n",
            "WARC-Date: 2024-03-01T12:00:02Z\r\n",
            "WARC-Warcinfo-ID: <urn:uuid:00000000-0000-0000-0000-000000000001>\r\n",
            "WARC-Concurrent-To: <urn:uuid:00000000-0000-0000-0000-000000000002>\r\n",
            "WARC-Target-URI: http://a/\r\n",
            "WARC-IP-Address: 10.0.0.1\r\n",
            "Content-Type: application/http;msgtype=response\r\n",
            "Content-Length: 27\r\n",
            "\r\n",
            "HTTP/1.1 204 No Content\r\n\r\n",
            "\r\n\r\n",
        );
        assert_eq!(String::from_utf8(out).unwrap(), expected);
    }

    #[test]
    fn empty_target_uri_omits_header() {
        let archive = fixed_archive(b"abc", b"", "");
        let out = WarcRenderer::new().render_to_vec(&archive).unwrap();
        let text = String::from_utf8_lossy(&out);
        assert!(!text.contains("WARC-Target-URI"));
        assert!(text.contains("Content-Length: 3\r\n"));
        assert!(text.contains("Content-Length: 0\r\n\r\n\r\n\r\n"));
    }

    #[test]
    fn empty_source_identity_omits_header() {
        let mut archive = fixed_archive(b"abc", b"def", "http://a/");
        archive.source_identity.clear();
        let out = WarcRenderer::new().render_to_vec(&archive).unwrap();
        let text = String::from_utf8_lossy(&out);
        assert!(!text.contains("WARC-IP-Address"));
        assert!(text.contains("WARC-Target-URI: http://a/\r\nContent-Type: application/http;msgtype=request\r\n"));
    }

    #[test]
    fn newline_in_target_uri_is_a_render_error() {
        let archive = fixed_archive(b"", b"", "http://a/\r\nWARC-Type: evil");
        let err = WarcRenderer::new().render_to_vec(&archive).unwrap_err();
        assert!(matches!(
            err,
            RenderError::InvalidHeaderValue { field: "WARC-Target-URI", .. }
        ));
    }

    #[test]
    fn binary_payloads_are_borrowed_verbatim() {
        let payload: Vec<u8> = (0..=255u8).collect();
        let archive = fixed_archive(&payload, b"\x00\xff", "");
        let segments: Vec<_> = WarcRenderer::new().segments(&archive).unwrap().collect();
        assert_eq!(segments.len(), 8);
        assert!(matches!(segments[3], Cow::Borrowed(_)));
        assert_eq!(segments[3].as_ref(), payload.as_slice());
        assert_eq!(segments[6].as_ref(), b"\x00\xff");
    }

    #[tokio::test]
    async fn streamed_render_matches_buffered_render() {
        let archive = fixed_archive(b"hello", b"world", "tcp://127.0.0.1:80");
        let renderer = WarcRenderer::new();
        let (mut writer, mut reader) = tokio::io::duplex(16);

        let consumer = tokio::spawn(async move {
            let mut out = Vec::new();
            tokio::io::AsyncReadExt::read_to_end(&mut reader, &mut out).await.map(|_| out)
        });
        let written = renderer.render(&archive, &mut writer).await.unwrap();
        drop(writer);

        let streamed = consumer.await.unwrap().unwrap();
        assert_eq!(written as usize, streamed.len());
        assert_eq!(streamed, renderer.render_to_vec(&archive).unwrap());
    }
}

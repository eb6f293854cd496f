//! Parser for archives produced by [`WarcRenderer`](super::renderer::WarcRenderer)
//! and other WARC/1.0 writers using CRLF framing.

use serde::Serialize;

use crate::error_handling::types::ParseError;

use super::renderer::RECORD_SEPARATOR;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WarcRecord {
    pub version: String,
    pub headers: Vec<(String, String)>,
    pub content: Vec<u8>,
}

impl WarcRecord {
    /// Case-insensitive header lookup; first occurrence wins.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn warc_type(&self) -> Option<&str> {
        self.header("WARC-Type")
    }

    pub fn record_id(&self) -> Option<&str> {
        self.header("WARC-Record-ID")
    }

    pub fn content_length(&self) -> usize {
        self.content.len()
    }

    pub fn summary(&self) -> RecordSummary {
        let field = |name: &str| self.header(name).map(str::to_string);
        RecordSummary {
            warc_type: field("WARC-Type"),
            record_id: field("WARC-Record-ID"),
            date: field("WARC-Date"),
            target_uri: field("WARC-Target-URI"),
            content_type: field("Content-Type"),
            content_length: self.content_length(),
        }
    }
}

/// Header fields of a record without its payload, as printed by `inspect`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecordSummary {
    pub warc_type: Option<String>,
    pub record_id: Option<String>,
    pub date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_uri: Option<String>,
    pub content_type: Option<String>,
    pub content_length: usize,
}

fn find_crlf(input: &[u8], from: usize) -> Option<usize> {
    input[from..]
        .windows(2)
        .position(|w| w == b"\r\n")
        .map(|i| from + i)
}

/// Parses every record in `input`, honouring each record's `Content-Length`.
pub fn parse_records(input: &[u8]) -> Result<Vec<WarcRecord>, ParseError> {
    let mut records = Vec::new();
    let mut pos = 0usize;

    while pos < input.len() {
        let record_start = pos;

        let eol = find_crlf(input, pos).ok_or(ParseError::Truncated(record_start))?;
        let version = String::from_utf8_lossy(&input[pos..eol]).into_owned();
        if !version.starts_with("WARC/") {
            return Err(ParseError::MissingVersionLine(record_start));
        }
        pos = eol + 2;

        let mut headers = Vec::new();
        loop {
            let eol = find_crlf(input, pos).ok_or(ParseError::Truncated(record_start))?;
            if eol == pos {
                pos += 2;
                break;
            }
            let line = String::from_utf8_lossy(&input[pos..eol]).into_owned();
            let (name, value) = line
                .split_once(':')
                .ok_or_else(|| ParseError::MalformedHeader(line.clone()))?;
            headers.push((name.trim().to_string(), value.trim().to_string()));
            pos = eol + 2;
        }

        let length = headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case("Content-Length"))
            .map(|(_, v)| v)
            .ok_or(ParseError::MissingContentLength(record_start))?;
        let length: usize = length
            .parse()
            .map_err(|_| ParseError::InvalidContentLength(length.clone()))?;

        let end = pos
            .checked_add(length)
            .filter(|end| *end <= input.len())
            .ok_or(ParseError::Truncated(record_start))?;
        let content = input[pos..end].to_vec();
        pos = end;

        if !input[pos..].starts_with(RECORD_SEPARATOR) {
            return Err(ParseError::MissingSeparator(pos));
        }
        pos += RECORD_SEPARATOR.len();

        records.push(WarcRecord {
            version,
            headers,
            content,
        });
    }

    Ok(records)
}

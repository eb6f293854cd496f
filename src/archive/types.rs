//! In-memory representation of one connection capture.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::identity::IdentityProvider;
use crate::data_capture::types::CapturedMessage;

/// Suffix appended to the info record id to form the storage key.
pub const WARC_KEY_SUFFIX: &str = ".warc";

/// The warcinfo section. Carries no payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InfoRecord {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
}

/// A request or response section holding the raw captured bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageRecord {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub content: Vec<u8>,
}

impl MessageRecord {
    pub fn content_length(&self) -> usize {
        self.content.len()
    }
}

/// A complete capture: info, request and response records plus the
/// connection metadata rendered alongside them.
///
/// Only built from two sealed [`CapturedMessage`]s, so an `Archive` never
/// describes a partially drained connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Archive {
    pub info: InfoRecord,
    pub request: MessageRecord,
    pub response: MessageRecord,
    pub target_uri: String,
    pub source_identity: String,
}

impl Archive {
    /// Builds an archive from both sealed directions. Every record receives a
    /// fresh identifier; the info record reuses the request timestamp.
    pub fn from_capture(
        request: CapturedMessage,
        response: CapturedMessage,
        target_uri: impl Into<String>,
        source_identity: impl Into<String>,
        identity: &dyn IdentityProvider,
    ) -> Self {
        let info = InfoRecord {
            id: identity.new_id(),
            timestamp: request.timestamp,
        };
        let request = MessageRecord {
            id: identity.new_id(),
            timestamp: request.timestamp,
            content: request.content,
        };
        let response = MessageRecord {
            id: identity.new_id(),
            timestamp: response.timestamp,
            content: response.content,
        };
        Self {
            info,
            request,
            response,
            target_uri: target_uri.into(),
            source_identity: source_identity.into(),
        }
    }

    /// Key under which this archive is stored; unique per capture.
    pub fn storage_key(&self) -> String {
        format!("{}{}", self.info.id, WARC_KEY_SUFFIX)
    }

    pub fn total_bytes(&self) -> usize {
        self.request.content_length() + self.response.content_length()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::identity::SystemIdentity;
    use chrono::Duration;

    #[test]
    fn records_get_distinct_ids_and_request_timestamp_on_info() {
        let t0 = Utc::now();
        let t1 = t0 + Duration::seconds(3);
        let archive = Archive::from_capture(
            CapturedMessage::new(t0, b"ping".to_vec()),
            CapturedMessage::new(t1, Vec::new()),
            "http://a/x",
            "node-1",
            &SystemIdentity,
        );

        assert_ne!(archive.info.id, archive.request.id);
        assert_ne!(archive.request.id, archive.response.id);
        assert_ne!(archive.info.id, archive.response.id);
        assert_eq!(archive.info.timestamp, t0);
        assert_eq!(archive.request.timestamp, t0);
        assert_eq!(archive.response.timestamp, t1);
        assert_eq!(archive.request.content_length(), 4);
        assert_eq!(archive.response.content_length(), 0);
        assert_eq!(archive.total_bytes(), 4);
    }

    #[test]
    fn identical_payloads_yield_distinct_keys() {
        let now = Utc::now();
        let build = || {
            Archive::from_capture(
                CapturedMessage::new(now, b"same".to_vec()),
                CapturedMessage::new(now, b"same".to_vec()),
                "",
                "node-1",
                &SystemIdentity,
            )
        };
        let a = build();
        let b = build();
        assert_ne!(a.storage_key(), b.storage_key());
        assert!(a.storage_key().ends_with(".warc"));
        assert!(a.storage_key().starts_with(&a.info.id.to_string()));
    }
}

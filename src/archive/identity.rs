use chrono::{DateTime, SecondsFormat, Utc};
use uuid::Uuid;

/// Source of capture timestamps and record identifiers.
pub trait IdentityProvider: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
    fn new_id(&self) -> Uuid;
}

/// Wall clock and random v4 UUIDs.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemIdentity;

impl IdentityProvider for SystemIdentity {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn new_id(&self) -> Uuid {
        Uuid::new_v4()
    }
}

/// RFC3339 with whole seconds and a `Z` suffix, e.g. `2024-03-01T12:00:00Z`.
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn timestamps_render_as_rfc3339_seconds() {
        let ts = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 5).unwrap();
        assert_eq!(format_timestamp(&ts), "2024-03-01T12:00:05Z");
    }

    #[test]
    fn system_ids_are_v4_and_distinct() {
        let ids = SystemIdentity;
        let a = ids.new_id();
        let b = ids.new_id();
        assert_ne!(a, b);
        assert_eq!(a.get_version_num(), 4);
    }
}

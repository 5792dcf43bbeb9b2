// Payload validation: dashboard identity extraction and the uniqueness
// invariants. Pure functions, no I/O.

use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;
use uuid::Uuid;

use crate::error::SyncError;
use crate::types::{DashboardMeta, UidIndex};

/// Maximum length Grafana accepts for a dashboard uid.
const MAX_UID_CHARS: usize = 40;

fn uid_pattern() -> &'static Regex {
    static UID: OnceLock<Regex> = OnceLock::new();
    UID.get_or_init(|| Regex::new(r"^[A-Za-z0-9_-]*$").expect("uid pattern is valid"))
}

fn title_pattern() -> &'static Regex {
    static TITLE: OnceLock<Regex> = OnceLock::new();
    TITLE.get_or_init(|| {
        Regex::new(r#"^[\w\s!£$%^&*+=#@:;,.'"~?(){}\[\]<>/-]*$"#)
            .expect("title pattern is valid")
    })
}

/// Extract the embedded dashboard identity `(uid, title)` from a raw
/// payload.
///
/// The payload is opaque to the file store; only these two fields are
/// interpreted, per the [Grafana dashboard JSON model]. A `uid`/`title`
/// field of a non-string type is treated as absent.
///
/// [Grafana dashboard JSON model]: https://grafana.com/docs/grafana/latest/dashboards/json-model/
pub fn extract_dashboard_meta(payload: &str) -> Result<DashboardMeta, SyncError> {
    let value: Value = serde_json::from_str(payload).map_err(|_| SyncError::InvalidJson)?;

    let uid = value
        .get("uid")
        .and_then(Value::as_str)
        .ok_or(SyncError::MissingUid)?;
    if uid.chars().count() > MAX_UID_CHARS {
        return Err(SyncError::UidTooLong);
    }
    if !uid_pattern().is_match(uid) {
        return Err(SyncError::UidBadChars);
    }

    let title = value
        .get("title")
        .and_then(Value::as_str)
        .ok_or(SyncError::MissingTitle)?;
    if !title_pattern().is_match(title) {
        return Err(SyncError::TitleBadChars);
    }

    Ok(DashboardMeta { uid: uid.to_string(), title: title.to_string() })
}

/// Fail when any live resource other than `owner` declares the same
/// embedded uid.
pub fn check_uid_unique(uid: &str, owner: &Uuid, index: &UidIndex) -> Result<(), SyncError> {
    if index.has_other_owner(uid, owner) {
        return Err(SyncError::DuplicateUid);
    }
    Ok(())
}

/// Guard against a dashboard title that exactly matches the resource's
/// `dir` value. Historical policy, preserved verbatim.
pub fn check_title_not_dir(title: &str, dir: &str) -> Result<(), SyncError> {
    if title == dir {
        return Err(SyncError::TitleMatchesDir);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn extracts_uid_and_title() {
        let meta =
            extract_dashboard_meta(r#"{"uid":"abc","title":"Dash One"}"#).unwrap();
        assert_eq!(meta.uid, "abc");
        assert_eq!(meta.title, "Dash One");
    }

    #[test]
    fn rejects_malformed_json() {
        let err = extract_dashboard_meta("{not json").unwrap_err();
        assert!(matches!(err, SyncError::InvalidJson));
    }

    #[test]
    fn rejects_missing_uid() {
        let err = extract_dashboard_meta(r#"{"title":"abc"}"#).unwrap_err();
        assert_eq!(err.code(), "invalid_json_no_uid");
    }

    #[test]
    fn non_string_uid_counts_as_missing() {
        let err = extract_dashboard_meta(r#"{"uid":7,"title":"abc"}"#).unwrap_err();
        assert_eq!(err.code(), "invalid_json_no_uid");
    }

    #[test]
    fn rejects_uid_over_40_chars() {
        let payload = format!(r#"{{"uid":"{}","title":"t"}}"#, "a".repeat(41));
        let err = extract_dashboard_meta(&payload).unwrap_err();
        assert!(matches!(err, SyncError::UidTooLong));
    }

    #[test]
    fn accepts_uid_of_exactly_40_chars() {
        let payload = format!(r#"{{"uid":"{}","title":"t"}}"#, "a".repeat(40));
        assert!(extract_dashboard_meta(&payload).is_ok());
    }

    #[test]
    fn rejects_uid_with_unexpected_characters() {
        for uid in ["a b", "a.b", "ümlaut", "a/b", "a!b"] {
            let payload = format!(r#"{{"uid":"{uid}","title":"t"}}"#);
            let err = extract_dashboard_meta(&payload).unwrap_err();
            assert!(matches!(err, SyncError::UidBadChars), "uid {uid:?}");
        }
    }

    #[test]
    fn rejects_missing_title() {
        let err = extract_dashboard_meta(r#"{"uid":"abc"}"#).unwrap_err();
        assert!(matches!(err, SyncError::MissingTitle));
    }

    #[test]
    fn accepts_title_punctuation_allowlist() {
        let title = r#"CPU & Memory (prod) [v2] <beta> 'quoted' "double" 50%!"#;
        let payload = serde_json::json!({ "uid": "abc", "title": title }).to_string();
        assert!(extract_dashboard_meta(&payload).is_ok());
    }

    #[test]
    fn rejects_title_with_unexpected_characters() {
        let payload = serde_json::json!({ "uid": "abc", "title": "bad|pipe" }).to_string();
        let err = extract_dashboard_meta(&payload).unwrap_err();
        assert!(matches!(err, SyncError::TitleBadChars));
    }

    #[test]
    fn uid_uniqueness_allows_sole_owner() {
        let owner = Uuid::new_v4();
        let mut index = UidIndex::new();
        index.insert("abc", owner);
        assert!(check_uid_unique("abc", &owner, &index).is_ok());
    }

    #[test]
    fn uid_uniqueness_rejects_second_owner() {
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();
        let mut index = UidIndex::new();
        index.insert("abc", first);
        index.insert("abc", second);

        let err = check_uid_unique("abc", &second, &index).unwrap_err();
        assert_eq!(err.code(), "duplicate_dashboard_uid");
    }

    #[test]
    fn unknown_uid_is_unique() {
        let index = UidIndex::new();
        assert!(check_uid_unique("abc", &Uuid::new_v4(), &index).is_ok());
    }

    #[test]
    fn title_matching_dir_is_rejected() {
        let err = check_title_not_dir("team-a", "team-a").unwrap_err();
        assert_eq!(err.code(), "json_title_matches_dir_name");
        assert!(check_title_not_dir("Team A", "team-a").is_ok());
    }

    proptest! {
        // Extraction is a pure function: same payload, same outcome.
        #[test]
        fn extraction_is_deterministic(payload in ".{0,200}") {
            let first = extract_dashboard_meta(&payload);
            let second = extract_dashboard_meta(&payload);
            match (first, second) {
                (Ok(a), Ok(b)) => prop_assert_eq!(a, b),
                (Err(a), Err(b)) => prop_assert_eq!(a.code(), b.code()),
                _ => prop_assert!(false, "non-deterministic outcome"),
            }
        }

        // Any uid within charset and length limits passes the uid checks.
        #[test]
        fn valid_uids_are_accepted(uid in "[A-Za-z0-9_-]{1,40}") {
            let payload = serde_json::json!({ "uid": uid, "title": "t" }).to_string();
            prop_assert!(extract_dashboard_meta(&payload).is_ok());
        }
    }
}

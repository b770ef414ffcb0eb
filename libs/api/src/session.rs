//! Session identifier grammar and helpers.
//!
//! A session id matches `^[A-Za-z0-9_]{3,64}$`. Auto-generated ids take the
//! form `GAME_YYYYMMDD_HHMMSS` from the synced clock.

use chrono::{DateTime, Utc};

pub const AUTO_PREFIX: &str = "GAME";
pub const TEST_PREFIX: &str = "TEST";

pub fn is_valid(id: &str) -> bool {
    (3..=64).contains(&id.len())
        && id.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

pub fn generate(now: DateTime<Utc>) -> String {
    format!("{}_{}", AUTO_PREFIX, now.format("%Y%m%d_%H%M%S"))
}

pub fn generate_test(now: DateTime<Utc>) -> String {
    format!("{}_{}", TEST_PREFIX, now.format("%Y%m%d_%H%M%S"))
}

pub fn recording_id(session_id: &str, node_id: &str) -> String {
    format!("{}_{}", session_id, node_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn validates_grammar() {
        assert!(is_valid("GAME_20240315_140000"));
        assert!(is_valid("abc"));
        assert!(is_valid("A_1"));
        assert!(!is_valid("ab"));
        assert!(!is_valid("with space"));
        assert!(!is_valid("dash-not-allowed"));
        assert!(!is_valid(&"x".repeat(65)));
        assert!(is_valid(&"x".repeat(64)));
    }

    #[test]
    fn generated_ids_are_valid() {
        let t = Utc.with_ymd_and_hms(2024, 3, 15, 14, 0, 0).unwrap();
        assert_eq!(generate(t), "GAME_20240315_140000");
        assert!(is_valid(&generate(t)));
        assert!(is_valid(&generate_test(t)));
    }

    #[test]
    fn recording_id_joins_session_and_node() {
        assert_eq!(recording_id("GAME_20240315_140000", "CAM_L"), "GAME_20240315_140000_CAM_L");
    }
}

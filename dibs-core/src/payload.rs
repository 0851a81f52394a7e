//! `<module-name>@<timestamp>` payload codec.
//!
//! The timestamp is wall-clock nanoseconds, made strictly increasing within
//! one process. It exists for log correlation only: clocks of different
//! processes are not synchronized and the bus gives no cross-channel order.

use std::sync::atomic::{AtomicI64, Ordering};

use chrono::Utc;

use crate::error::CoreError;
use crate::types::ModuleName;

const SEPARATOR: char = '@';

static LAST_TIMESTAMP: AtomicI64 = AtomicI64::new(0);

/// A decoded bus payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventPayload {
    pub module: ModuleName,
    pub timestamp: i64,
}

/// Current wall-clock time in nanoseconds, never equal to or lower than a
/// value previously returned in this process.
pub fn timestamp_nanos() -> i64 {
    let wall = Utc::now().timestamp_nanos_opt().unwrap_or(i64::MAX);
    let mut last = LAST_TIMESTAMP.load(Ordering::Relaxed);
    loop {
        let next = wall.max(last.saturating_add(1));
        match LAST_TIMESTAMP.compare_exchange_weak(last, next, Ordering::AcqRel, Ordering::Relaxed)
        {
            Ok(_) => return next,
            Err(observed) => last = observed,
        }
    }
}

/// Stamp `module` with the current time.
pub fn encode(module: &ModuleName) -> String {
    encode_at(module, timestamp_nanos())
}

pub fn encode_at(module: &ModuleName, timestamp: i64) -> String {
    format!("{module}{SEPARATOR}{timestamp}")
}

/// Split a payload back into module name and timestamp.
pub fn decode(payload: &str) -> Result<EventPayload, CoreError> {
    let malformed = |reason| CoreError::MalformedPayload {
        payload: payload.to_owned(),
        reason,
    };

    let (name, timestamp) = payload
        .rsplit_once(SEPARATOR)
        .ok_or_else(|| malformed("missing '@' separator"))?;
    let timestamp = timestamp
        .parse::<i64>()
        .map_err(|_| malformed("timestamp is not an integer"))?;
    let module = ModuleName::parse(name).map_err(|_| malformed("invalid module name"))?;

    Ok(EventPayload { module, timestamp })
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case("services/api")]
    #[case("github.com/pojntfx/dibs")]
    #[case("single")]
    #[case("dotted.name.with-dashes_and_underscores")]
    fn names_survive_encode_decode(#[case] raw: &str) {
        let name = ModuleName::parse(raw).expect("valid name");
        let decoded = decode(&encode(&name)).expect("decode");
        assert_eq!(decoded.module, name);
    }

    #[test]
    fn decode_without_separator_is_malformed() {
        let err = decode("services/api").unwrap_err();
        assert!(matches!(err, CoreError::MalformedPayload { .. }), "got: {err}");
    }

    #[test]
    fn decode_non_numeric_timestamp_is_malformed() {
        let err = decode("services/api@yesterday").unwrap_err();
        assert!(matches!(err, CoreError::MalformedPayload { .. }), "got: {err}");
    }

    #[test]
    fn decode_does_not_trim_the_name() {
        let err = decode("  services/api@1").unwrap_err();
        assert!(matches!(err, CoreError::MalformedPayload { .. }), "got: {err}");
    }

    #[test]
    fn decode_keeps_exact_timestamp() {
        let decoded = decode("services/api@1700000000000000001").expect("decode");
        assert_eq!(decoded.module.as_str(), "services/api");
        assert_eq!(decoded.timestamp, 1_700_000_000_000_000_001);
    }

    #[test]
    fn timestamps_strictly_increase() {
        let stamps: Vec<i64> = (0..1000).map(|_| timestamp_nanos()).collect();
        assert!(stamps.windows(2).all(|w| w[0] < w[1]));
    }
}

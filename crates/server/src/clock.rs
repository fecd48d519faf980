#![forbid(unsafe_code)]

use serde_json::Value;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tt_core::clock::Clock;

pub(crate) fn now_rfc3339() -> Value {
    Value::String(
        OffsetDateTime::now_utc()
            .format(&Rfc3339)
            .unwrap_or_else(|_| "1970-01-01T00:00:00Z".to_string()),
    )
}

pub(crate) fn now_ms_i64() -> i64 {
    let nanos = OffsetDateTime::now_utc().unix_timestamp_nanos();
    let ms = nanos / 1_000_000i128;
    if ms <= 0 {
        0
    } else if ms >= i64::MAX as i128 {
        i64::MAX
    } else {
        ms as i64
    }
}

/// Wall clock for the tree cache.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        now_ms_i64()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_clock_is_past_2020() {
        assert!(SystemClock.now_ms() > 1_577_836_800_000);
        let stamp = now_rfc3339();
        assert!(stamp.as_str().is_some_and(|s| s.ends_with('Z')));
    }
}

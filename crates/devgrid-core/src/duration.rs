//! Human-readable duration strings used throughout `devgrid.toml`.

use std::time::Duration;

/// Parse a duration string like `"500ms"`, `"5s"`, `"2m"` or `"1h"`.
///
/// A bare number is read as seconds. Returns `None` for anything else,
/// including values too large to represent.
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if let Some(ms) = s.strip_suffix("ms") {
        return ms.trim().parse::<u64>().ok().map(Duration::from_millis);
    }
    if let Some(secs) = s.strip_suffix('s') {
        return secs.trim().parse::<u64>().ok().map(Duration::from_secs);
    }
    if let Some(mins) = s.strip_suffix('m') {
        return scaled_secs(mins, 60);
    }
    if let Some(hours) = s.strip_suffix('h') {
        return scaled_secs(hours, 3600);
    }
    s.parse::<u64>().ok().map(Duration::from_secs)
}

fn scaled_secs(value: &str, unit: u64) -> Option<Duration> {
    let n = value.trim().parse::<u64>().ok()?;
    n.checked_mul(unit).map(Duration::from_secs)
}

/// Parse a named duration field, failing with a message that names the field.
pub fn require_duration(field: &str, value: &str) -> anyhow::Result<Duration> {
    parse_duration(value)
        .ok_or_else(|| anyhow::anyhow!("invalid duration for `{field}`: {value:?}"))
}

/// Like [`require_duration`], but zero is rejected too.
pub fn require_nonzero_duration(field: &str, value: &str) -> anyhow::Result<Duration> {
    let duration = require_duration(field, value)?;
    if duration.is_zero() {
        anyhow::bail!("`{field}` must be greater than zero");
    }
    Ok(duration)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_units() {
        assert_eq!(parse_duration("500ms"), Some(Duration::from_millis(500)));
        assert_eq!(parse_duration("5s"), Some(Duration::from_secs(5)));
        assert_eq!(parse_duration("2m"), Some(Duration::from_secs(120)));
        assert_eq!(parse_duration("1h"), Some(Duration::from_secs(3600)));
    }

    #[test]
    fn bare_number_is_seconds() {
        assert_eq!(parse_duration("10"), Some(Duration::from_secs(10)));
        assert_eq!(parse_duration(" 3s "), Some(Duration::from_secs(3)));
    }

    #[test]
    fn rejects_garbage() {
        assert_eq!(parse_duration("soon"), None);
        assert_eq!(parse_duration(""), None);
        assert_eq!(parse_duration("-1s"), None);
    }

    #[test]
    fn oversized_values_are_rejected() {
        assert_eq!(parse_duration("307445734561825861m"), None);
        assert_eq!(parse_duration("5124095576030432h"), None);
        assert_eq!(parse_duration("99999999999999999999s"), None);
        assert_eq!(
            parse_duration("18446744073709551615s"),
            Some(Duration::from_secs(u64::MAX))
        );
    }

    #[test]
    fn nonzero_rejects_zero() {
        let err = require_nonzero_duration("polling.membership.interval", "0s").unwrap_err();
        assert!(err.to_string().contains("greater than zero"));
        assert!(require_nonzero_duration("polling.membership.interval", "0ms").is_err());
        assert_eq!(
            require_nonzero_duration("polling.membership.interval", "1ms").unwrap(),
            Duration::from_millis(1)
        );
    }

    #[test]
    fn require_names_the_field() {
        let err = require_duration("polling.membership.timeout", "forever").unwrap_err();
        assert!(err.to_string().contains("polling.membership.timeout"));
    }
}

//! Direct-to-float parsing for the depth hot path.
//!
//! Venue depth frames carry prices and quantities as decimal strings; every
//! inbound message crosses these functions, so they go through `fast-float`
//! rather than the stdlib grisu path.

/// Parse a decimal price/qty string, returning 0.0 on malformed input.
/// Callers gate on positivity afterwards, so 0.0 is a safe sentinel.
#[inline]
pub fn parse_f64(s: &str) -> f64 {
    fast_float::parse(s).unwrap_or(0.0)
}

/// Parse a base-10 integer string (timestamps, sequence ids), 0 on failure.
#[inline]
pub fn parse_i64(s: &str) -> i64 {
    s.parse::<i64>().unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_typical_venue_strings() {
        assert!((parse_f64("50000.10") - 50_000.10).abs() < 1e-9);
        assert!((parse_f64("0.00012345") - 0.00012345).abs() < 1e-15);
        assert_eq!(parse_f64("not-a-number"), 0.0);
        assert_eq!(parse_i64("1700000000000"), 1_700_000_000_000);
        assert_eq!(parse_i64("12.5"), 0);
    }
}

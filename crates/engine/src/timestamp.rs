//! `MM:SS.mmm` timestamps as marked in the player.

use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Error returned when a timestamp does not match `MM:SS.mmm`
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid timestamp '{0}', expected MM:SS.mmm")]
pub struct TimestampError(pub String);

/// A point in the source timeline with millisecond precision
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Timestamp {
    millis: u64,
}

impl Timestamp {
    pub const ZERO: Timestamp = Timestamp { millis: 0 };

    pub fn from_millis(millis: u64) -> Self {
        Self { millis }
    }

    pub fn as_millis(&self) -> u64 {
        self.millis
    }

    pub fn as_secs_f64(&self) -> f64 {
        self.millis as f64 / 1000.0
    }

    /// Parse `MM:SS.mmm` into milliseconds.
    ///
    /// Minutes and seconds are plain digit groups; the subsecond group holds
    /// one to three digits and is read as a decimal fraction, so `00:01.5`
    /// is 1500 ms.
    pub fn parse(text: &str) -> Result<Self, TimestampError> {
        let invalid = || TimestampError(text.to_string());

        let (minutes, rest) = text.trim().split_once(':').ok_or_else(invalid)?;
        let (seconds, fraction) = rest.split_once('.').ok_or_else(invalid)?;

        if !is_digits(minutes) || !is_digits(seconds) || !is_digits(fraction) {
            return Err(invalid());
        }
        if fraction.len() > 3 {
            return Err(invalid());
        }

        let minutes: u64 = minutes.parse().map_err(|_| invalid())?;
        let seconds: u64 = seconds.parse().map_err(|_| invalid())?;
        // Decimal fraction, right-padded: ".5" is 500 ms, not 5 ms
        let subsecond: u64 = format!("{:0<3}", fraction).parse().map_err(|_| invalid())?;

        minutes
            .checked_mul(60_000)
            .and_then(|m| seconds.checked_mul(1000).and_then(|s| m.checked_add(s)))
            .and_then(|ms| ms.checked_add(subsecond))
            .map(Self::from_millis)
            .ok_or_else(invalid)
    }

    /// Multiply the offset by a playback multiplier, rounding to the nearest millisecond
    pub fn scaled(&self, multiplier: f64) -> Self {
        Self::from_millis((self.millis as f64 * multiplier).round() as u64)
    }

    /// Render for the encoder's `-ss`/`-to` flags.
    ///
    /// Offsets of an hour or more become `H:MM:SS.mmm` so the minutes field never exceeds 59.
    pub fn encoder_arg(&self) -> String {
        let (minutes, seconds, millis) = self.parts();
        if minutes >= 60 {
            format!(
                "{}:{:02}:{:02}.{:03}",
                minutes / 60,
                minutes % 60,
                seconds,
                millis
            )
        } else {
            self.to_string()
        }
    }

    fn parts(&self) -> (u64, u64, u64) {
        let total_secs = self.millis / 1000;
        (total_secs / 60, total_secs % 60, self.millis % 1000)
    }
}

fn is_digits(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (minutes, seconds, millis) = self.parts();
        write!(f, "{:02}:{:02}.{:03}", minutes, seconds, millis)
    }
}

impl FromStr for Timestamp {
    type Err = TimestampError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(200))]

        #[test]
        fn prop_canonical_round_trip(minutes in 0u64..100, seconds in 0u64..60, millis in 0u64..1000) {
            let text = format!("{:02}:{:02}.{:03}", minutes, seconds, millis);
            let parsed = Timestamp::parse(&text).expect("canonical form should parse");

            prop_assert_eq!(parsed.as_millis(), minutes * 60_000 + seconds * 1000 + millis);
            prop_assert_eq!(parsed.to_string(), text);
        }

        #[test]
        fn prop_rejects_missing_separator(a in 0u64..100, b in 0u64..100) {
            let text = format!("{}{}", a, b);
            prop_assert!(Timestamp::parse(&text).is_err());
        }
    }

    #[test]
    fn test_parse_basic() {
        assert_eq!(Timestamp::parse("01:30.250").unwrap().as_millis(), 90_250);
        assert_eq!(Timestamp::parse("00:00.000").unwrap(), Timestamp::ZERO);
        assert_eq!(Timestamp::parse("125:00.000").unwrap().as_millis(), 7_500_000);
    }

    #[test]
    fn test_parse_short_fraction_is_decimal() {
        assert_eq!(Timestamp::parse("00:01.5").unwrap().as_millis(), 1500);
        assert_eq!(Timestamp::parse("00:01.05").unwrap().as_millis(), 1050);
    }

    #[test]
    fn test_parse_rejects_malformed() {
        for bad in ["", "1:2", "01:02", "01:02.", ":02.000", "aa:02.000", "01:02.0001", "01:-2.000", "01:02:03.000"] {
            assert!(Timestamp::parse(bad).is_err(), "'{}' should be rejected", bad);
        }
    }

    #[test]
    fn test_scaled_rounds() {
        let ts = Timestamp::parse("00:10.001").unwrap();
        assert_eq!(ts.scaled(2.0).as_millis(), 20_002);
        assert_eq!(ts.scaled(0.5).as_millis(), 5_001); // 5000.5 rounds up
        assert_eq!(ts.scaled(1.0), ts);
    }

    #[test]
    fn test_encoder_arg_switches_to_hours() {
        assert_eq!(Timestamp::parse("59:59.999").unwrap().encoder_arg(), "59:59.999");
        assert_eq!(Timestamp::parse("61:02.003").unwrap().encoder_arg(), "1:01:02.003");
        assert_eq!(Timestamp::parse("125:00.000").unwrap().encoder_arg(), "2:05:00.000");
    }
}

//! Timeouts expressed as whole seconds plus a millisecond component

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::error::FatalError;

/// A wait bound of `secs` seconds plus `millis` milliseconds (`millis < 1000`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Timeout {
    secs: u32,
    millis: u16,
}

impl Timeout {
    pub const ZERO: Timeout = Timeout { secs: 0, millis: 0 };

    /// Build a timeout; a millisecond component of 1000 or more is rejected
    pub fn new(secs: u32, millis: u16) -> Result<Self, FatalError> {
        if millis >= 1000 {
            return Err(FatalError::InvalidArgument(format!(
                "millisecond component {millis} is not below 1000"
            )));
        }
        Ok(Self { secs, millis })
    }

    pub const fn from_secs(secs: u32) -> Self {
        Self { secs, millis: 0 }
    }

    /// Split a millisecond count into seconds and milliseconds, saturating
    pub fn from_millis(total: u64) -> Self {
        let secs = u32::try_from(total / 1000).unwrap_or(u32::MAX);
        Self {
            secs,
            millis: (total % 1000) as u16,
        }
    }

    pub fn secs(&self) -> u32 {
        self.secs
    }

    pub fn millis(&self) -> u16 {
        self.millis
    }

    pub fn is_zero(&self) -> bool {
        self.secs == 0 && self.millis == 0
    }

    pub fn as_duration(&self) -> Duration {
        Duration::from_secs(u64::from(self.secs)) + Duration::from_millis(u64::from(self.millis))
    }

    /// Total milliseconds clamped to what `poll(2)` accepts
    pub fn as_poll_millis(&self) -> i32 {
        let total = u64::from(self.secs) * 1000 + u64::from(self.millis);
        i32::try_from(total).unwrap_or(i32::MAX)
    }
}

impl From<Timeout> for Duration {
    fn from(timeout: Timeout) -> Self {
        timeout.as_duration()
    }
}

impl fmt::Display for Timeout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:03}s", self.secs, self.millis)
    }
}

/// Error returned when a timeout string cannot be parsed
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid timeout '{0}': expected e.g. 500ms, 2s or 1.5")]
pub struct ParseTimeoutError(String);

impl FromStr for Timeout {
    type Err = ParseTimeoutError;

    /// Accepts `"<n>ms"`, `"<n>s"` and plain decimal seconds such as `"1.25"`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let err = || ParseTimeoutError(s.to_string());

        if let Some(ms) = s.strip_suffix("ms") {
            let total = ms.trim().parse::<u64>().map_err(|_| err())?;
            return Ok(Timeout::from_millis(total));
        }

        let secs_str = s.strip_suffix('s').unwrap_or(s).trim();
        let (whole, frac) = match secs_str.split_once('.') {
            Some((whole, frac)) => (whole, frac),
            None => (secs_str, ""),
        };
        if frac.len() > 3 || !frac.bytes().all(|b| b.is_ascii_digit()) {
            return Err(err());
        }
        let secs = whole.parse::<u32>().map_err(|_| err())?;
        let millis = if frac.is_empty() {
            0
        } else {
            // "5" -> 500, "25" -> 250
            let padded = format!("{frac:0<3}");
            padded.parse::<u16>().map_err(|_| err())?
        };
        Timeout::new(secs, millis).map_err(|_| err())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_millis_overflow() {
        assert!(Timeout::new(1, 999).is_ok());
        assert!(matches!(
            Timeout::new(1, 1000),
            Err(FatalError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_from_millis_splits() {
        let t = Timeout::from_millis(2_250);
        assert_eq!(t.secs(), 2);
        assert_eq!(t.millis(), 250);
        assert_eq!(t.as_duration(), Duration::from_millis(2_250));
        assert_eq!(t.to_string(), "2.250s");
    }

    #[test]
    fn test_poll_millis_clamps() {
        assert_eq!(Timeout::from_secs(u32::MAX).as_poll_millis(), i32::MAX);
        assert_eq!(Timeout::from_millis(1_500).as_poll_millis(), 1_500);
    }

    #[test]
    fn test_parse() {
        assert_eq!("500ms".parse::<Timeout>().unwrap(), Timeout::from_millis(500));
        assert_eq!("2s".parse::<Timeout>().unwrap(), Timeout::from_secs(2));
        assert_eq!("1.5".parse::<Timeout>().unwrap(), Timeout::from_millis(1_500));
        assert_eq!("0.05s".parse::<Timeout>().unwrap(), Timeout::from_millis(50));
        assert!("abc".parse::<Timeout>().is_err());
        assert!("1.2345".parse::<Timeout>().is_err());
        assert!("-1".parse::<Timeout>().is_err());
    }
}

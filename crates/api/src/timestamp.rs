/// Cortex timestamp.
///
/// Internally i64 milliseconds from unix epoch.
// Everything the hub puts on the wire (join times, benchmark start and
// completion, KV expiry deadlines) is expressed in whole milliseconds,
// so the internal representation matches and no conversion layer is
// needed at the protocol boundary.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    serde::Serialize,
    serde::Deserialize,
)]
#[serde(transparent)]
pub struct Timestamp(i64);

impl Timestamp {
    /// Construct a new timestamp of "now".
    pub fn now() -> Self {
        std::time::SystemTime::now().into()
    }

    /// Construct a timestamp from i64 milliseconds since unix epoch.
    pub fn from_millis(millis: i64) -> Self {
        Self(millis)
    }

    /// Get the i64 milliseconds since unix epoch.
    pub fn as_millis(&self) -> i64 {
        self.0
    }

    /// The duration from now until this timestamp.
    /// Returns a zero duration if the timestamp is in the past.
    pub fn duration_until(&self) -> std::time::Duration {
        let now = Timestamp::now();
        if self.0 <= now.0 {
            std::time::Duration::ZERO
        } else {
            std::time::Duration::from_millis((self.0 - now.0) as u64)
        }
    }
}

impl std::ops::Add<std::time::Duration> for Timestamp {
    type Output = Timestamp;

    fn add(self, rhs: std::time::Duration) -> Self::Output {
        Timestamp(self.0 + rhs.as_millis() as i64)
    }
}

impl std::ops::AddAssign<std::time::Duration> for Timestamp {
    fn add_assign(&mut self, rhs: std::time::Duration) {
        self.0 += rhs.as_millis() as i64;
    }
}

impl std::ops::Sub for Timestamp {
    type Output = Result<std::time::Duration, ()>;

    fn sub(self, rhs: Self) -> Self::Output {
        if self.0 < rhs.0 {
            Err(())
        } else {
            Ok(std::time::Duration::from_millis((self.0 - rhs.0) as u64))
        }
    }
}

impl From<std::time::SystemTime> for Timestamp {
    fn from(t: std::time::SystemTime) -> Self {
        Self(
            t.duration_since(std::time::SystemTime::UNIX_EPOCH)
                .expect("invalid system time")
                .as_millis() as i64,
        )
    }
}

impl From<Timestamp> for std::time::SystemTime {
    fn from(t: Timestamp) -> Self {
        std::time::SystemTime::UNIX_EPOCH
            + std::time::Duration::from_millis(t.0 as u64)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn millis_round_trip() {
        let t = Timestamp::from_millis(1_234_567);
        assert_eq!(1_234_567, t.as_millis());
        let s: std::time::SystemTime = t.into();
        assert_eq!(t, Timestamp::from(s));
    }

    #[test]
    fn add_duration() {
        let t = Timestamp::from_millis(1000);
        assert_eq!(
            Timestamp::from_millis(3500),
            t + std::time::Duration::from_millis(2500),
        );
    }

    #[test]
    fn sub_ordering() {
        let a = Timestamp::from_millis(5000);
        let b = Timestamp::from_millis(2000);
        assert_eq!(Ok(std::time::Duration::from_secs(3)), a - b);
        assert_eq!(Err(()), b - a);
    }

    #[test]
    fn duration_until_past_is_zero() {
        let t = Timestamp::from_millis(0);
        assert_eq!(std::time::Duration::ZERO, t.duration_until());
    }
}

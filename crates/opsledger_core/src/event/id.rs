//! Event identifier.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::{Builder, Uuid};

/// Largest in-millisecond counter value that fits the 12-bit `rand_a`
/// field of a UUIDv7.
const MAX_COUNTER: u16 = 0x0fff;

/// Unique identifier for an event.
///
/// Event IDs are UUIDv7 values that are:
/// - Time-derived (the top 48 bits are the emit millisecond)
/// - Strictly increasing within one process
/// - Collision-free across devices with high probability
/// - Never reused
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(Uuid);

impl EventId {
    /// Creates an event ID from raw bytes.
    #[inline]
    #[must_use]
    pub const fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(Uuid::from_bytes(bytes))
    }

    /// Creates an event ID from a UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the raw bytes.
    #[inline]
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }

    /// Converts to a UUID.
    #[must_use]
    pub const fn to_uuid(&self) -> Uuid {
        self.0
    }

    /// Returns the millisecond the ID was minted in.
    #[must_use]
    pub fn millis(&self) -> u64 {
        let b = self.0.as_bytes();
        b[..6]
            .iter()
            .fold(0u64, |acc, byte| (acc << 8) | u64::from(*byte))
    }
}

impl fmt::Debug for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EventId({})", self.0)
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for EventId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

impl From<Uuid> for EventId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl From<EventId> for Uuid {
    fn from(id: EventId) -> Self {
        id.0
    }
}

/// Mints strictly increasing [`EventId`]s.
///
/// The caller supplies the current millisecond. If it does not advance
/// (several emits in one millisecond, or a wall clock stepping backwards)
/// the generator keeps the last millisecond and bumps a 12-bit counter;
/// when the counter is exhausted the millisecond is advanced artificially.
#[derive(Debug, Default)]
pub struct EventIdGenerator {
    /// (millisecond, counter) of the last ID handed out.
    last: Mutex<Option<(u64, u16)>>,
}

impl EventIdGenerator {
    /// Creates a new generator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a generator whose IDs all sort after `last`, e.g. the newest
    /// event restored from a previous session.
    #[must_use]
    pub fn starting_after(last: EventId) -> Self {
        Self {
            last: Mutex::new(Some((last.millis(), MAX_COUNTER))),
        }
    }

    /// Returns the next ID for an event emitted at `now_millis`.
    pub fn next_id(&self, now_millis: u64) -> EventId {
        let mut last = self.last.lock();
        let (millis, counter) = match *last {
            Some((last_ms, counter)) if now_millis <= last_ms => {
                if counter < MAX_COUNTER {
                    (last_ms, counter + 1)
                } else {
                    (last_ms + 1, 0)
                }
            }
            _ => (now_millis, 0),
        };
        *last = Some((millis, counter));
        drop(last);

        let entropy = Uuid::new_v4().into_bytes();
        let mut random = [0u8; 10];
        random[0] = ((counter >> 8) as u8) & 0x0f;
        random[1] = (counter & 0xff) as u8;
        random[2..].copy_from_slice(&entropy[8..]);

        EventId(Builder::from_unix_timestamp_millis(millis, &random).into_uuid())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_unique() {
        let gen = EventIdGenerator::new();
        let id1 = gen.next_id(1_700_000_000_000);
        let id2 = gen.next_id(1_700_000_000_000);
        assert_ne!(id1, id2);
    }

    #[test]
    fn ids_increase_within_one_millisecond() {
        let gen = EventIdGenerator::new();
        let ids: Vec<_> = (0..100).map(|_| gen.next_id(42)).collect();
        assert!(ids.windows(2).all(|w| w[0] < w[1]));
        assert!(ids.iter().all(|id| id.millis() == 42));
    }

    #[test]
    fn ids_increase_when_clock_steps_back() {
        let gen = EventIdGenerator::new();
        let a = gen.next_id(5_000);
        let b = gen.next_id(4_000);
        assert!(a < b);
        assert_eq!(b.millis(), 5_000);
    }

    #[test]
    fn counter_overflow_advances_millisecond() {
        let gen = EventIdGenerator::new();
        let mut prev = gen.next_id(10);
        for _ in 0..=MAX_COUNTER {
            let next = gen.next_id(10);
            assert!(prev < next);
            prev = next;
        }
        assert_eq!(prev.millis(), 11);
    }

    #[test]
    fn resumed_generator_sorts_after_restored_id() {
        let restored = EventIdGenerator::new().next_id(9_000);
        let gen = EventIdGenerator::starting_after(restored);
        let next = gen.next_id(8_000);
        assert!(next > restored);
        assert_eq!(next.millis(), 9_001);
    }

    #[test]
    fn ids_are_version_7() {
        let id = EventIdGenerator::new().next_id(1);
        assert_eq!(id.to_uuid().get_version_num(), 7);
    }

    #[test]
    fn parse_display_roundtrip() {
        let id = EventIdGenerator::new().next_id(1_700_000_000_000);
        let parsed: EventId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);
        assert!("not-a-uuid".parse::<EventId>().is_err());
    }
}

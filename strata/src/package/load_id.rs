//! Load identifiers: strictly increasing package ids of the form
//! `{unix_seconds}.{sequence}`.
//!
//! The timestamp prefix keeps packages sortable by creation time; the
//! sequence suffix disambiguates packages created within the same second.
//! A process-wide high-water mark guarantees strict monotonicity even when
//! the wall clock stalls or steps backwards.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;

const SEQ_BITS: u32 = 20;
const SEQ_MASK: u64 = (1 << SEQ_BITS) - 1;

/// Issues strictly increasing load ids.
#[derive(Debug, Default)]
pub struct LoadIdGenerator {
    // Packed (seconds << SEQ_BITS) | sequence of the last issued id.
    last: AtomicU64,
}

impl LoadIdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the next load id, greater than every id issued before it.
    pub fn next_id(&self) -> String {
        loop {
            let now = Utc::now().timestamp().max(0) as u64;
            let prev = self.last.load(Ordering::Acquire);
            let prev_secs = prev >> SEQ_BITS;
            let prev_seq = prev & SEQ_MASK;

            let candidate = if now > prev_secs {
                now << SEQ_BITS | 1
            } else {
                // Clock did not advance; bump the sequence instead.
                prev_secs << SEQ_BITS | (prev_seq + 1)
            };

            if self
                .last
                .compare_exchange(prev, candidate, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return format!("{}.{}", candidate >> SEQ_BITS, candidate & SEQ_MASK);
            }
        }
    }
}

/// Parses a load id into its `(seconds, sequence)` components.
///
/// Returns `None` for strings that are not well-formed load ids, letting
/// directory listings skip foreign entries.
pub fn parse_load_id(id: &str) -> Option<(u64, u64)> {
    let (secs, seq) = id.split_once('.')?;
    Some((secs.parse().ok()?, seq.parse().ok()?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_strictly_increasing() {
        let generator = LoadIdGenerator::new();
        let mut previous = None;
        for _ in 0..1000 {
            let id = parse_load_id(&generator.next_id()).unwrap();
            if let Some(previous) = previous {
                assert!(id > previous);
            }
            previous = Some(id);
        }
    }

    #[test]
    fn ids_parse_back_into_components() {
        let generator = LoadIdGenerator::new();
        let id = generator.next_id();
        let (secs, seq) = parse_load_id(&id).unwrap();
        assert!(secs > 0);
        assert!(seq >= 1);
        assert_eq!(id, format!("{secs}.{seq}"));
    }

    #[test]
    fn malformed_ids_are_rejected() {
        assert_eq!(parse_load_id("not-a-load-id"), None);
        assert_eq!(parse_load_id("170.0.1"), None);
        assert_eq!(parse_load_id("1700000000"), None);
    }
}

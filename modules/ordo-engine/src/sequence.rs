//! Monotonic 64-bit sequence counters.

use crate::error::ConfigError;

/// Reserved floor. Generated sequences are always strictly above it.
pub const MIN_RESERVED_SEQUENCE: i64 = 0;

/// Sentinel meaning "no sequence yet".
pub const NIL_SEQUENCE: i64 = MIN_RESERVED_SEQUENCE;

/// Per-source counter with a catch-up ratchet for replay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequenceGenerator {
    sequence: i64,
}

impl SequenceGenerator {
    pub fn new(initial: i64) -> Result<Self, ConfigError> {
        if initial < MIN_RESERVED_SEQUENCE {
            return Err(ConfigError::SequenceBelowMinimum {
                initial,
                minimum: MIN_RESERVED_SEQUENCE,
            });
        }
        Ok(Self { sequence: initial })
    }

    pub fn sequence(&self) -> i64 {
        self.sequence
    }

    pub fn next_sequence(&mut self) -> i64 {
        self.sequence += 1;
        self.sequence
    }

    /// Raise the current value to `min_sequence` if it is lower.
    ///
    /// Returns `true` when the value changed or already equals
    /// `min_sequence`; `false` when `min_sequence` is below the current value.
    pub fn next_sequence_min(&mut self, min_sequence: i64) -> bool {
        if min_sequence > self.sequence {
            self.sequence = min_sequence;
            return true;
        }
        self.sequence == min_sequence
    }
}

impl Default for SequenceGenerator {
    fn default() -> Self {
        Self {
            sequence: MIN_RESERVED_SEQUENCE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_generated_sequence_is_above_the_reserved_minimum() {
        let mut generator = SequenceGenerator::default();
        assert_eq!(generator.next_sequence(), MIN_RESERVED_SEQUENCE + 1);
        assert_eq!(generator.next_sequence(), MIN_RESERVED_SEQUENCE + 2);
    }

    #[test]
    fn ratchet_never_moves_backwards() {
        let mut generator = SequenceGenerator::new(5).unwrap();

        assert!(!generator.next_sequence_min(3));
        assert_eq!(generator.sequence(), 5);

        assert!(generator.next_sequence_min(5));
        assert_eq!(generator.sequence(), 5);

        assert!(generator.next_sequence_min(8));
        assert_eq!(generator.sequence(), 8);
        assert_eq!(generator.next_sequence(), 9);
    }

    #[test]
    fn initial_value_below_minimum_is_a_configuration_error() {
        assert!(matches!(
            SequenceGenerator::new(-1),
            Err(ConfigError::SequenceBelowMinimum { initial: -1, .. })
        ));
    }
}

/*!
Anti-replay window for received records.

One window exists per epoch. It tracks the highest sequence number
authenticated so far and a bitmap of the 64 sequence numbers below it.
Records are checked before decryption and marked only after they
authenticate, so forged records cannot advance the window.
*/

use crate::core::constants::defaults::REPLAY_WINDOW_SIZE;

/// Sliding replay window over 48-bit sequence numbers
#[derive(Debug, Clone, Default)]
pub struct ReplayWindow {
    highest: Option<u64>,
    /// Bit i set means `highest - i` has been seen
    bitmap: u64,
}

impl ReplayWindow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Highest sequence number accepted so far
    pub fn highest(&self) -> Option<u64> {
        self.highest
    }

    /// Whether `sequence` would be accepted (not yet seen and inside the window)
    pub fn check(&self, sequence: u64) -> bool {
        let Some(highest) = self.highest else {
            return true;
        };
        if sequence > highest {
            return true;
        }
        let offset = highest - sequence;
        if offset >= REPLAY_WINDOW_SIZE {
            return false;
        }
        self.bitmap & (1u64 << offset) == 0
    }

    /// Record `sequence` as seen
    pub fn mark(&mut self, sequence: u64) {
        match self.highest {
            None => {
                self.highest = Some(sequence);
                self.bitmap = 1;
            }
            Some(highest) if sequence > highest => {
                let shift = sequence - highest;
                self.bitmap = if shift >= REPLAY_WINDOW_SIZE { 0 } else { self.bitmap << shift };
                self.bitmap |= 1;
                self.highest = Some(sequence);
            }
            Some(highest) => {
                let offset = highest - sequence;
                if offset < REPLAY_WINDOW_SIZE {
                    self.bitmap |= 1u64 << offset;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_duplicates() {
        let mut window = ReplayWindow::new();
        assert!(window.check(0));
        window.mark(0);
        assert!(!window.check(0));

        window.mark(5);
        assert!(window.check(3));
        assert!(!window.check(5));
        window.mark(3);
        assert!(!window.check(3));
        assert!(window.check(4));
    }

    #[test]
    fn test_rejects_records_older_than_window() {
        let mut window = ReplayWindow::new();
        window.mark(100);
        assert!(window.check(100 - REPLAY_WINDOW_SIZE + 1));
        assert!(!window.check(100 - REPLAY_WINDOW_SIZE));
        assert!(!window.check(0));
    }

    #[test]
    fn test_large_jump_clears_bitmap() {
        let mut window = ReplayWindow::new();
        for seq in 0..10 {
            window.mark(seq);
        }
        window.mark(1_000);
        assert_eq!(window.highest(), Some(1_000));
        assert!(window.check(999));
        assert!(!window.check(9));
    }
}

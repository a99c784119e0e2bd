//! Interleaved Weighted Round Robin (WRR)
//!
//! Each target gets a share of traffic proportional to its weight, and
//! selections are spread across the cycle instead of being sent in bursts.
//! The scheduler walks the target list repeatedly while lowering a threshold
//! (`current`) from the maximum weight down to the gcd of all weights; a target
//! is selected whenever its weight reaches the threshold.
//!
//! With weights `a=1, b=4` one cycle is `[b, b, b, a, b]`.

use parking_lot::Mutex;

use crate::domain::assignment::WeightAssignment;
use crate::error::Result;

/// Position of the scheduler within its cycle.
#[derive(Debug, Clone, Copy)]
struct Cursor {
    /// Index of the last selected target, `-1` before the first selection.
    last: isize,
    /// Current weight threshold, always within `[0, max_weight]`.
    current: i64,
}

/// Weighted round-robin scheduler over a fixed set of targets.
///
/// The target list is immutable; only the cursor changes, guarded by a lock
/// owned by this instance, so concurrent callers for the same function get a
/// consistent sequence while other functions are unaffected.
#[derive(Debug)]
pub struct WeightedRoundRobin {
    targets: Vec<String>,
    weights: Vec<u32>,
    max_weight: i64,
    step: i64,
    cursor: Mutex<Cursor>,
}

impl WeightedRoundRobin {
    /// Creates a scheduler that starts at the beginning of its cycle.
    pub fn new(assignment: &WeightAssignment) -> Result<Self> {
        Self::with_last(assignment, -1)
    }

    /// Creates a scheduler whose cursor continues from `last`.
    ///
    /// A negative `last` starts a fresh cycle. Positions beyond the new target
    /// list are folded into range, which keeps the next selection identical to
    /// what the previous list length would have produced.
    pub fn with_last(assignment: &WeightAssignment, last: isize) -> Result<Self> {
        assignment.validate()?;

        let n = assignment.len() as isize;
        let last = if last < 0 { -1 } else { last.rem_euclid(n) };

        let max_weight = assignment.weights.iter().copied().max().unwrap_or(1);
        let step = gcd(&assignment.weights).unwrap_or(1);

        Ok(Self {
            targets: assignment.ips.clone(),
            weights: assignment.weights.clone(),
            max_weight: i64::from(max_weight),
            step: i64::from(step),
            cursor: Mutex::new(Cursor { last, current: 0 }),
        })
    }

    /// Creates a scheduler for `assignment` that inherits the cursor of `previous`.
    pub fn resume(assignment: &WeightAssignment, previous: Option<&Self>) -> Result<Self> {
        let last = previous.map_or(-1, Self::last_index);
        Self::with_last(assignment, last)
    }

    /// Selects the next target.
    pub fn next(&self) -> &str {
        let n = self.targets.len() as isize;
        let mut cursor = self.cursor.lock();

        loop {
            cursor.last = (cursor.last + 1) % n;
            if cursor.last == 0 {
                cursor.current -= self.step;
                if cursor.current <= 0 {
                    cursor.current = self.max_weight;
                }
            }

            let idx = cursor.last as usize;
            if i64::from(self.weights[idx]) >= cursor.current {
                return &self.targets[idx];
            }
        }
    }

    /// Index of the last selected target, `-1` if nothing was selected yet.
    pub fn last_index(&self) -> isize {
        self.cursor.lock().last
    }

    /// Targets in scheduling order.
    pub fn targets(&self) -> &[String] {
        &self.targets
    }

    /// Sum of all weights, the length of a window in which every target
    /// appears exactly `weight` times.
    pub fn total_weight(&self) -> u64 {
        self.weights.iter().map(|w| u64::from(*w)).sum()
    }
}

/// Greatest common divisor of all weights, `None` for an empty list.
pub fn gcd(weights: &[u32]) -> Option<u32> {
    fn pair(mut a: u32, mut b: u32) -> u32 {
        while b != 0 {
            (a, b) = (b, a % b);
        }
        a
    }

    weights.iter().copied().reduce(pair)
}

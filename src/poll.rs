//! Bounded busy-wait on a status predicate.

/// Result of [`poll_until`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, defmt::Format)]
pub enum PollOutcome {
    /// The predicate returned `true`.
    Ready {
        /// Countdown left when the predicate became true.
        remaining: u32,
    },
    /// The countdown reached zero before the predicate returned `true`.
    TimedOut,
}

/// Busy-polls `ready` until it returns `true` or `budget` iterations have passed.
///
/// Each iteration samples the predicate and, if it is still false, decrements the
/// countdown. The predicate is sampled one final time once the countdown is
/// exhausted, so a predicate that never becomes true is called `budget + 1`
/// times. The budget is an iteration count, it is not calibrated to wall-clock
/// time.
#[inline]
pub fn poll_until(budget: u32, mut ready: impl FnMut() -> bool) -> PollOutcome {
    let mut countdown = budget;
    while !ready() {
        if countdown == 0 {
            return PollOutcome::TimedOut;
        }
        countdown -= 1;
    }
    PollOutcome::Ready {
        remaining: countdown,
    }
}

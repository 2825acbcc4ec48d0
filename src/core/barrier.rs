//! Counting barrier over build-target completions
//!
//! `signal_one` returns true on exactly the call that brings the count up
//! to the configured target count, once per configuration epoch. Extra
//! signals keep counting but never fire again until `configure` starts a
//! new epoch.

use parking_lot::Mutex;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BarrierSnapshot {
    pub expected: usize,
    pub completed: usize,
    pub fired: bool,
    pub epoch: u64,
}

/// Thread-safe; the read-increment-compare sequence runs under one lock.
#[derive(Debug, Default)]
pub struct BuildCompletionBarrier {
    state: Mutex<BarrierSnapshot>,
}

impl BuildCompletionBarrier {
    /// A barrier already configured for `expected` targets (epoch 1).
    pub fn new(expected: usize) -> Self {
        let barrier = Self::default();
        barrier.configure(expected);
        barrier
    }

    /// Starts a new epoch. Returns its number.
    ///
    /// `expected == 0` means nothing will ever be waited for, so the epoch never fires.
    pub fn configure(&self, expected: usize) -> u64 {
        let mut state = self.state.lock();
        *state = BarrierSnapshot {
            expected,
            completed: 0,
            fired: false,
            epoch: state.epoch + 1,
        };
        debug!("Barrier epoch {} expects {} targets", state.epoch, expected);
        state.epoch
    }

    /// Counts one completion; true only on the firing call.
    pub fn signal_one(&self) -> bool {
        let mut state = self.state.lock();
        Self::count(&mut state)
    }

    /// Like `signal_one`, but ignores signals stamped with an older epoch.
    pub fn signal_epoch(&self, epoch: u64) -> bool {
        let mut state = self.state.lock();
        if epoch != state.epoch {
            debug!(
                "Ignoring completion from epoch {} (current epoch {})",
                epoch, state.epoch
            );
            return false;
        }
        Self::count(&mut state)
    }

    fn count(state: &mut BarrierSnapshot) -> bool {
        state.completed = state.completed.saturating_add(1);
        if !state.fired && state.completed == state.expected {
            state.fired = true;
            return true;
        }
        false
    }

    pub fn snapshot(&self) -> BarrierSnapshot {
        *self.state.lock()
    }

    pub fn epoch(&self) -> u64 {
        self.state.lock().epoch
    }

    pub fn has_fired(&self) -> bool {
        self.state.lock().fired
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_fires_on_exactly_the_nth_call() {
        for n in 1..=8 {
            let barrier = BuildCompletionBarrier::new(n);
            let results: Vec<bool> = (0..n + 3).map(|_| barrier.signal_one()).collect();
            let fired_at: Vec<usize> = results
                .iter()
                .enumerate()
                .filter(|(_, fired)| **fired)
                .map(|(index, _)| index + 1)
                .collect();
            assert_eq!(fired_at, vec![n], "n = {n}");
            assert_eq!(barrier.snapshot().completed, n + 3);
        }
    }

    #[test]
    fn test_two_target_scenario() {
        let barrier = BuildCompletionBarrier::new(2);
        assert!(!barrier.signal_one());
        assert!(barrier.signal_one());
        assert!(!barrier.signal_one());
        assert!(!barrier.signal_one());
        assert!(barrier.has_fired());
    }

    #[test]
    fn test_reconfigure_discards_overshoot() {
        let barrier = BuildCompletionBarrier::new(1);
        assert!(barrier.signal_one());
        assert!(!barrier.signal_one());
        assert!(!barrier.signal_one());

        let epoch = barrier.configure(3);
        assert_eq!(epoch, 2);
        assert_eq!(
            barrier.snapshot(),
            BarrierSnapshot {
                expected: 3,
                completed: 0,
                fired: false,
                epoch: 2
            }
        );
        assert!(!barrier.signal_one());
        assert!(!barrier.signal_one());
        assert!(barrier.signal_one());
    }

    #[test]
    fn test_stale_epoch_signals_are_ignored() {
        let barrier = BuildCompletionBarrier::new(2);
        let old = barrier.epoch();
        let new = barrier.configure(2);

        assert!(!barrier.signal_epoch(old));
        assert!(!barrier.signal_epoch(old));
        assert_eq!(barrier.snapshot().completed, 0);

        assert!(!barrier.signal_epoch(new));
        assert!(barrier.signal_epoch(new));
    }

    #[test]
    fn test_zero_targets_never_fire() {
        let barrier = BuildCompletionBarrier::new(0);
        assert!((0..5).all(|_| !barrier.signal_one()));
    }

    #[test]
    fn test_concurrent_signals_fire_once() {
        let barrier = Arc::new(BuildCompletionBarrier::new(64));
        let fired = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let barrier = barrier.clone();
                let fired = fired.clone();
                std::thread::spawn(move || {
                    for _ in 0..16 {
                        if barrier.signal_one() {
                            fired.fetch_add(1, Ordering::SeqCst);
                        }
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(barrier.snapshot().completed, 128);
    }
}

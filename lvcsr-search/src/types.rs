//! Shared scalar types and score helpers

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Log-domain score (acoustic log likelihood plus weighted LM log probability)
pub type LogProb = f32;

/// Index of a dictionary word
pub type WordId = usize;

/// Index of an emitting HMM state in the acoustic model
pub type StateId = usize;

/// Index of a lexicon tree node
pub type NodeId = usize;

/// Score of an impossible path.
///
/// Far below any real path sum, and small enough in magnitude that adding a
/// handful of them never leaves the finite `f32` range.
pub const LOG_ZERO: LogProb = -1.0e10;

/// True when `score` is (or derives from) [`LOG_ZERO`].
///
/// A path that started at `LOG_ZERO` and picked up a few real scores is
/// still impossible, so the test uses half the sentinel as threshold.
#[inline]
pub fn is_log_zero(score: LogProb) -> bool {
    score <= LOG_ZERO * 0.5
}

/// Add two scores, keeping `LOG_ZERO` absorbing.
#[inline]
pub fn add_scores(a: LogProb, b: LogProb) -> LogProb {
    if is_log_zero(a) || is_log_zero(b) {
        LOG_ZERO
    } else {
        a + b
    }
}

/// External "stop now" signal shared between a caller and a running search.
///
/// Pass 1 checks it between frames, Pass 2 between hypothesis pops.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request termination at the next check point
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Clear a previous request so the flag can be reused for the next utterance
    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_zero_absorbs() {
        assert!(is_log_zero(LOG_ZERO));
        assert!(is_log_zero(LOG_ZERO + 1000.0));
        assert!(!is_log_zero(-5000.0));
        assert_eq!(add_scores(LOG_ZERO, 3.0), LOG_ZERO);
        assert_eq!(add_scores(-1.0, -2.0), -3.0);
    }

    #[test]
    fn test_cancel_flag_shared() {
        let flag = CancelFlag::new();
        let other = flag.clone();
        assert!(!other.is_cancelled());
        flag.cancel();
        assert!(other.is_cancelled());
        other.reset();
        assert!(!flag.is_cancelled());
    }
}

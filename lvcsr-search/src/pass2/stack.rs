//! Bounded, score-ordered hypothesis stack

use super::hypothesis::HypId;
use crate::types::LogProb;

#[derive(Debug, Clone, Copy)]
struct Entry {
    score: LogProb,
    id: HypId,
}

/// Best-first stack of at most `capacity` hypotheses.
///
/// Entries are kept in ascending score order so the best is popped from the
/// end. A new entry goes below entries of equal score, which makes equal
/// scores pop in insertion order.
#[derive(Debug)]
pub struct HypothesisStack {
    entries: Vec<Entry>,
    capacity: usize,
}

/// What happened to a pushed hypothesis
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Push {
    /// Stored; nothing was evicted
    Stored,
    /// Stored; the given worst entry was evicted and must be released
    Evicted(HypId),
    /// Not stored: the stack is full of better hypotheses
    Rejected,
}

impl HypothesisStack {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity + 1),
            capacity: capacity.max(1),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// True when a hypothesis with `score` would be stored
    pub fn accepts(&self, score: LogProb) -> bool {
        self.entries.len() < self.capacity
            || self.entries.first().is_some_and(|worst| score > worst.score)
    }

    pub fn push(&mut self, id: HypId, score: LogProb) -> Push {
        if !self.accepts(score) {
            return Push::Rejected;
        }
        let pos = self.entries.partition_point(|e| e.score < score);
        self.entries.insert(pos, Entry { score, id });
        if self.entries.len() > self.capacity {
            Push::Evicted(self.entries.remove(0).id)
        } else {
            Push::Stored
        }
    }

    /// Remove and return the best hypothesis
    pub fn pop(&mut self) -> Option<HypId> {
        self.entries.pop().map(|e| e.id)
    }

    /// Remove everything, returning the ids to release
    pub fn drain(&mut self) -> impl Iterator<Item = HypId> + '_ {
        self.entries.drain(..).map(|e| e.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pops_best_first() {
        let mut stack = HypothesisStack::new(10);
        stack.push(1, -5.0);
        stack.push(2, -1.0);
        stack.push(3, -3.0);
        assert_eq!(stack.pop(), Some(2));
        assert_eq!(stack.pop(), Some(3));
        assert_eq!(stack.pop(), Some(1));
        assert_eq!(stack.pop(), None);
    }

    #[test]
    fn test_equal_scores_pop_in_insertion_order() {
        let mut stack = HypothesisStack::new(10);
        stack.push(1, -2.0);
        stack.push(2, -2.0);
        stack.push(3, -2.0);
        assert_eq!(stack.pop(), Some(1));
        assert_eq!(stack.pop(), Some(2));
        assert_eq!(stack.pop(), Some(3));
    }

    #[test]
    fn test_full_stack_evicts_worst_only_for_better() {
        let mut stack = HypothesisStack::new(2);
        assert_eq!(stack.push(1, -1.0), Push::Stored);
        assert_eq!(stack.push(2, -4.0), Push::Stored);
        assert_eq!(stack.push(3, -4.0), Push::Rejected);
        assert_eq!(stack.push(4, -5.0), Push::Rejected);
        assert_eq!(stack.push(5, -2.0), Push::Evicted(2));
        assert_eq!(stack.len(), 2);
        assert_eq!(stack.drain().collect::<Vec<_>>(), vec![5, 1]);
        assert!(stack.is_empty());
    }
}

//! Partial sentence hypotheses and their arena

use crate::hmm::PhoneContext;
use crate::lm::LmState;
use crate::trellis::AtomId;
use crate::types::{LogProb, WordId, LOG_ZERO};

/// Index of a hypothesis in a [`HypothesisPool`]
pub type HypId = usize;

/// A sentence suffix growing backward in time
#[derive(Debug, Clone)]
pub struct Hypothesis {
    /// Words, latest in time first; the last entry is the newest word
    pub words: Vec<WordId>,

    /// Backward score per frame. Before the newest word is scanned this is
    /// the entry score of the suffix one frame later (exit and LM included);
    /// after the scan it is the score starting at the newest word's first
    /// state.
    pub g: Vec<LogProb>,

    /// Continuation score leaving the first phone of the earliest scanned
    /// word, without that phone's exit probability
    pub g_prev: Vec<LogProb>,

    /// Head phone of the earliest scanned word, left context unknown
    pub last_ph: Option<PhoneContext>,

    /// Weighted LM score of the newest word
    pub lscore: LogProb,
    pub total_lscore: LogProb,

    /// Frame the newest word is estimated to end at
    pub bestt: i32,
    /// Frame before the newest word's estimated start
    pub estimated_next_t: i32,
    /// Trellis atom the estimate was taken from
    pub tre: Option<AtomId>,

    pub lm_state: LmState,

    /// Exact suffix score plus the Pass 1 estimate of the prefix
    pub score: LogProb,

    /// Complete sentence waiting to be popped as a result
    pub endflag: bool,

    /// Per-word confidence, aligned with `words`
    pub confidence: Vec<f32>,
}

impl Hypothesis {
    fn empty(frames: usize) -> Self {
        Self {
            words: Vec::new(),
            g: vec![LOG_ZERO; frames],
            g_prev: vec![LOG_ZERO; frames],
            last_ph: None,
            lscore: 0.0,
            total_lscore: 0.0,
            bestt: -1,
            estimated_next_t: -1,
            tre: None,
            lm_state: LmState::Free,
            score: LOG_ZERO,
            endflag: false,
            confidence: Vec::new(),
        }
    }

    /// Reinitialize in place for `frames` frames, keeping buffers
    fn clear(&mut self, frames: usize) {
        self.words.clear();
        self.g.clear();
        self.g.resize(frames, LOG_ZERO);
        self.g_prev.clear();
        self.g_prev.resize(frames, LOG_ZERO);
        self.last_ph = None;
        self.lscore = 0.0;
        self.total_lscore = 0.0;
        self.bestt = -1;
        self.estimated_next_t = -1;
        self.tre = None;
        self.lm_state = LmState::Free;
        self.score = LOG_ZERO;
        self.endflag = false;
        self.confidence.clear();
    }

    /// Newest (earliest in time) word
    pub fn newest_word(&self) -> Option<WordId> {
        self.words.last().copied()
    }

    /// Words in time order. This is also the LM history of an expansion:
    /// the words following a new word, nearest first.
    pub fn time_order(&self) -> Vec<WordId> {
        self.words.iter().rev().copied().collect()
    }
}

/// Arena of hypotheses with a free list.
///
/// Ids stay valid until released. Released slots are reused, so a search
/// with many pops does not allocate per hypothesis.
#[derive(Debug, Default)]
pub struct HypothesisPool {
    slots: Vec<Hypothesis>,
    free: Vec<HypId>,
    frames: usize,
}

impl HypothesisPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Release everything and size new hypotheses for `frames` frames
    pub fn reset(&mut self, frames: usize) {
        self.frames = frames;
        self.free.clear();
        self.free.extend((0..self.slots.len()).rev());
    }

    /// A fresh hypothesis
    pub fn alloc(&mut self) -> HypId {
        match self.free.pop() {
            Some(id) => {
                self.slots[id].clear(self.frames);
                id
            }
            None => {
                self.slots.push(Hypothesis::empty(self.frames));
                self.slots.len() - 1
            }
        }
    }

    /// A copy of `src`
    pub fn duplicate(&mut self, src: HypId) -> HypId {
        let id = self.alloc();
        if id != src {
            let (a, b) = if id < src {
                let (lo, hi) = self.slots.split_at_mut(src);
                (&mut lo[id], &hi[0])
            } else {
                let (lo, hi) = self.slots.split_at_mut(id);
                (&mut hi[0], &lo[src])
            };
            a.clone_from(b);
        }
        id
    }

    /// `a` for reading and `b` for writing, which must differ
    pub fn pair_mut(&mut self, a: HypId, b: HypId) -> (&Hypothesis, &mut Hypothesis) {
        assert_ne!(a, b, "hypothesis {a} paired with itself");
        if a < b {
            let (lo, hi) = self.slots.split_at_mut(b);
            (&lo[a], &mut hi[0])
        } else {
            let (lo, hi) = self.slots.split_at_mut(a);
            (&hi[0], &mut lo[b])
        }
    }

    pub fn release(&mut self, id: HypId) {
        debug_assert!(!self.free.contains(&id), "hypothesis {id} released twice");
        self.free.push(id);
    }

    pub fn get(&self, id: HypId) -> &Hypothesis {
        &self.slots[id]
    }

    pub fn get_mut(&mut self, id: HypId) -> &mut Hypothesis {
        &mut self.slots[id]
    }

    /// Number of hypotheses currently allocated
    pub fn live(&self) -> usize {
        self.slots.len() - self.free.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alloc_reuses_released_slots() {
        let mut pool = HypothesisPool::new();
        pool.reset(4);
        let a = pool.alloc();
        pool.get_mut(a).words.push(3);
        pool.get_mut(a).g[2] = -1.0;
        pool.release(a);

        let b = pool.alloc();
        assert_eq!(a, b);
        assert!(pool.get(b).words.is_empty());
        assert_eq!(pool.get(b).g, vec![LOG_ZERO; 4]);
        assert_eq!(pool.live(), 1);
    }

    #[test]
    fn test_duplicate_copies_content() {
        let mut pool = HypothesisPool::new();
        pool.reset(3);
        let a = pool.alloc();
        {
            let h = pool.get_mut(a);
            h.words = vec![1, 2];
            h.score = -7.5;
            h.endflag = true;
        }
        let b = pool.duplicate(a);
        assert_ne!(a, b);
        assert_eq!(pool.get(b).words, vec![1, 2]);
        assert_eq!(pool.get(b).score, -7.5);
        assert!(pool.get(b).endflag);

        // copy into a lower slot than the source
        pool.release(a);
        let c = pool.duplicate(b);
        assert_eq!(c, a);
        assert_eq!(pool.get(c).words, vec![1, 2]);
    }

    #[test]
    fn test_word_orders() {
        let mut pool = HypothesisPool::new();
        pool.reset(1);
        let a = pool.alloc();
        pool.get_mut(a).words = vec![5, 6, 7];
        let h = pool.get(a);
        assert_eq!(h.newest_word(), Some(7));
        assert_eq!(h.time_order(), vec![7, 6, 5]);
    }

    #[test]
    fn test_reset_frees_all() {
        let mut pool = HypothesisPool::new();
        pool.reset(2);
        pool.alloc();
        pool.alloc();
        pool.reset(5);
        assert_eq!(pool.live(), 0);
        let id = pool.alloc();
        assert_eq!(pool.get(id).g.len(), 5);
    }
}

//! Word trellis: word-end hypotheses that survived the Pass 1 beam
//!
//! Atoms are appended in end-frame order during Pass 1 and chained to the
//! atom their word was entered from. [`WordTrellis::finalize`] builds the
//! per-frame index (sorted by word id, best first within a word) that Pass 2
//! uses for binary-search lookups.

use crate::types::{LogProb, WordId};

/// Index of an atom in the trellis arena
pub type AtomId = usize;

/// One word hypothesis ending at a frame
#[derive(Debug, Clone, PartialEq)]
pub struct TrellisAtom {
    pub word: WordId,
    /// Pass 1 path score at the word end, end-frame output included
    pub backscore: LogProb,
    /// Output probability of the word-end state at `end`
    pub tail_score: LogProb,
    /// Weighted LM score Pass 1 gave this word
    pub lscore: LogProb,
    pub begin: usize,
    pub end: usize,
    /// Atom of the previous word (None at utterance start)
    pub last: Option<AtomId>,
}

impl TrellisAtom {
    /// Pass 1 score of everything before the word end, without the word's
    /// own end-frame output and LM score; Pass 2 adds its exact versions
    #[inline]
    pub fn connection_score(&self) -> LogProb {
        self.backscore - self.tail_score - self.lscore
    }
}

#[derive(Debug, Clone, Default)]
pub struct WordTrellis {
    atoms: Vec<TrellisAtom>,
    by_frame: Vec<Vec<AtomId>>,
    frames: usize,
    finalized: bool,
}

impl WordTrellis {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop all atoms, keeping allocations for the next utterance
    pub fn reset(&mut self) {
        self.atoms.clear();
        self.by_frame.iter_mut().for_each(Vec::clear);
        self.frames = 0;
        self.finalized = false;
    }

    /// Append an atom and return its id
    pub fn store(&mut self, atom: TrellisAtom) -> AtomId {
        self.frames = self.frames.max(atom.end + 1);
        self.finalized = false;
        self.atoms.push(atom);
        self.atoms.len() - 1
    }

    /// Make the trellis cover at least `frames` frames
    pub fn set_frame_count(&mut self, frames: usize) {
        if frames > self.frames {
            self.frames = frames;
            self.finalized = false;
        }
    }

    /// Drop atoms ending at or after `frames` and cover exactly `frames`.
    /// Atoms are stored in end-frame order, so this only cuts the tail.
    pub fn truncate(&mut self, frames: usize) {
        let keep = self.atoms.partition_point(|a| a.end < frames);
        self.atoms.truncate(keep);
        self.frames = frames;
        self.finalized = false;
    }

    /// Build the per-frame lookup index. Calling it again rebuilds the same
    /// index from the atom arena.
    pub fn finalize(&mut self) {
        self.by_frame.resize_with(self.frames, Vec::new);
        self.by_frame.iter_mut().for_each(Vec::clear);

        for (id, atom) in self.atoms.iter().enumerate() {
            self.by_frame[atom.end].push(id);
        }
        let atoms = &self.atoms;
        for ids in &mut self.by_frame {
            ids.sort_by(|&a, &b| {
                atoms[a]
                    .word
                    .cmp(&atoms[b].word)
                    .then(atoms[b].backscore.total_cmp(&atoms[a].backscore))
                    .then(a.cmp(&b))
            });
        }
        self.finalized = true;
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    pub fn len(&self) -> usize {
        self.atoms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.atoms.is_empty()
    }

    pub fn frame_count(&self) -> usize {
        self.frames
    }

    pub fn atom(&self, id: AtomId) -> &TrellisAtom {
        &self.atoms[id]
    }

    pub fn atoms(&self) -> &[TrellisAtom] {
        &self.atoms
    }

    /// Best atom of `word` ending at `frame` (after finalize)
    pub fn lookup(&self, frame: usize, word: WordId) -> Option<AtomId> {
        let ids = self.by_frame.get(frame)?;
        let pos = ids.partition_point(|&id| self.atoms[id].word < word);
        ids.get(pos).copied().filter(|&id| self.atoms[id].word == word)
    }

    /// Atoms ending at `frame`, sorted by word id (after finalize)
    pub fn atoms_ending_at(&self, frame: usize) -> &[AtomId] {
        self.by_frame.get(frame).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Best-scoring atom ending at `frame` (after finalize)
    pub fn best_ending_at(&self, frame: usize) -> Option<AtomId> {
        self.atoms_ending_at(frame)
            .iter()
            .copied()
            .fold(None, |best: Option<AtomId>, id| match best {
                Some(b) if self.atoms[b].backscore >= self.atoms[id].backscore => Some(b),
                _ => Some(id),
            })
    }

    /// Atom ids from the utterance start to `id`, in time order
    pub fn chain(&self, id: AtomId) -> Vec<AtomId> {
        let mut ids = vec![id];
        let mut cur = self.atoms[id].last;
        while let Some(prev) = cur {
            ids.push(prev);
            cur = self.atoms[prev].last;
        }
        ids.reverse();
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn atom(word: WordId, begin: usize, end: usize, score: LogProb, last: Option<AtomId>) -> TrellisAtom {
        TrellisAtom {
            word,
            backscore: score,
            tail_score: -1.0,
            lscore: -0.5,
            begin,
            end,
            last,
        }
    }

    fn sample() -> WordTrellis {
        let mut trellis = WordTrellis::new();
        let a = trellis.store(atom(2, 0, 3, -10.0, None));
        trellis.store(atom(0, 0, 3, -12.0, None));
        trellis.store(atom(1, 4, 6, -20.0, Some(a)));
        trellis.store(atom(1, 4, 6, -18.0, Some(a)));
        trellis.set_frame_count(8);
        trellis
    }

    #[test]
    fn test_lookup_after_finalize() {
        let mut trellis = sample();
        trellis.finalize();
        assert_eq!(trellis.frame_count(), 8);
        assert_eq!(trellis.lookup(3, 2), Some(0));
        assert_eq!(trellis.lookup(3, 0), Some(1));
        assert_eq!(trellis.lookup(3, 1), None);
        assert_eq!(trellis.lookup(7, 1), None);
        assert_eq!(trellis.lookup(42, 1), None);
        // best of the two word-1 atoms at frame 6
        assert_eq!(trellis.lookup(6, 1), Some(3));
        assert_eq!(trellis.atoms_ending_at(3), &[1, 0]);
        assert_eq!(trellis.best_ending_at(3), Some(0));
    }

    #[test]
    fn test_finalize_is_idempotent() {
        let mut trellis = sample();
        trellis.finalize();
        let first: Vec<_> = (0..8).map(|t| trellis.atoms_ending_at(t).to_vec()).collect();
        trellis.finalize();
        let second: Vec<_> = (0..8).map(|t| trellis.atoms_ending_at(t).to_vec()).collect();
        assert_eq!(first, second);
        assert!(trellis.is_finalized());
    }

    #[test]
    fn test_truncate_cuts_late_atoms() {
        let mut trellis = sample();
        trellis.truncate(5);
        trellis.finalize();
        assert_eq!(trellis.len(), 2);
        assert_eq!(trellis.frame_count(), 5);
        assert_eq!(trellis.lookup(6, 1), None);
        assert_eq!(trellis.lookup(3, 0), Some(1));
    }

    #[test]
    fn test_chain_and_reset() {
        let mut trellis = sample();
        assert_eq!(trellis.chain(3), vec![0, 3]);
        assert_eq!(trellis.atom(3).connection_score(), -18.0 + 1.0 + 0.5);
        trellis.reset();
        assert!(trellis.is_empty());
        trellis.finalize();
        assert_eq!(trellis.atoms_ending_at(3), &[] as &[AtomId]);
    }
}

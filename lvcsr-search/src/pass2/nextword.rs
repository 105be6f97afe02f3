//! Next-word candidates taken from the word trellis

use std::collections::HashSet;

use crate::config::Pass2Config;
use crate::lm::{LanguageModel, LmState};
use crate::trellis::{AtomId, WordTrellis};
use crate::types::{is_log_zero, LogProb, WordId, LOG_ZERO};
use crate::vocab::Vocabulary;

use super::hypothesis::Hypothesis;

/// A word that may be placed before a hypothesis
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Candidate {
    pub word: WordId,
    /// Trellis atom the word was found at (nearest to the frontier)
    pub atom: AtomId,
    /// Weighted LM score
    pub lscore: LogProb,
    pub state: LmState,
    /// The LM lets a short pause sit between this word and the hypothesis
    pub pause: bool,
}

/// Scales raw LM scores the way Pass 2 uses them
#[derive(Debug, Clone, Copy)]
pub struct LmWeights {
    pub weight: f32,
    pub penalty: f32,
    pub transparent_penalty: f32,
}

impl LmWeights {
    pub fn from_config(config: &Pass2Config) -> Self {
        Self {
            weight: config.lm_weight,
            penalty: config.lm_penalty,
            transparent_penalty: config.transparent_penalty,
        }
    }

    pub fn apply(&self, raw: LogProb) -> LogProb {
        if is_log_zero(raw) {
            LOG_ZERO
        } else {
            self.weight * raw + self.penalty
        }
    }
}

/// Collects candidates around a hypothesis' estimated frontier.
///
/// Frames `tm, tm-1, .. tm-range` are looked at first, then
/// `tm+1 .. tm+range-1`, never at or beyond the hypothesis' own end frame.
/// A word is taken from the first frame it appears at.
pub struct NextWords<'a> {
    pub trellis: &'a WordTrellis,
    pub lm: &'a dyn LanguageModel,
    pub vocab: &'a Vocabulary,
    pub weights: LmWeights,
    pub range: usize,
}

impl NextWords<'_> {
    /// Frames to look at around `hyp`'s frontier, nearest first
    fn frames_around(&self, hyp: &Hypothesis) -> impl Iterator<Item = usize> {
        let tm = hyp.estimated_next_t;
        let frames = self.trellis.frame_count() as i32;
        let t_end = hyp.bestt;
        let range = self.range as i32;

        let before = (tm - range..=tm).rev().filter(|&t| t >= 0);
        let after = tm + 1..tm + range;
        before
            .chain(after)
            .filter(move |&t| tm >= 0 && t < frames && t < t_end)
            .map(|t| t as usize)
    }

    /// Atom of `word` nearest to `hyp`'s frontier
    pub fn locate(&self, word: WordId, hyp: &Hypothesis) -> Option<AtomId> {
        self.frames_around(hyp)
            .find_map(|t| self.trellis.lookup(t, word))
            .filter(|&id| Some(id) != hyp.tre)
    }

    pub fn collect(&self, hyp: &Hypothesis, out: &mut Vec<Candidate>) {
        out.clear();
        let following = hyp.time_order();
        let newest_transparent = hyp.newest_word().is_some_and(|w| self.vocab.is_transparent(w));
        let mut seen = HashSet::new();

        for t in self.frames_around(hyp) {
            for &id in self.trellis.atoms_ending_at(t) {
                let word = self.trellis.atom(id).word;
                if Some(id) == hyp.tre || !seen.insert(word) {
                    continue;
                }
                let Some((raw, state)) = self.lm.backward_score(word, &following, hyp.lm_state) else {
                    continue;
                };
                let mut lscore = self.weights.apply(raw);
                if is_log_zero(lscore) {
                    continue;
                }
                if newest_transparent && self.vocab.is_transparent(word) {
                    lscore += self.weights.transparent_penalty;
                }
                out.push(Candidate {
                    word,
                    atom: id,
                    lscore,
                    state,
                    pause: self.lm.pause_between(word, hyp.lm_state),
                });
            }
        }
    }

    /// Sentence-final words: the LM's fixed set, or the words ending near
    /// the last frame
    pub fn first(&self, anchor: Option<WordId>, out: &mut Vec<Candidate>) {
        out.clear();
        let frames = self.trellis.frame_count();
        if frames == 0 {
            return;
        }
        let state = self.lm.initial_state();

        let words: Vec<(WordId, Option<AtomId>)> = match (anchor, self.lm.first_words()) {
            (Some(w), _) => vec![(w, None)],
            (None, Some(words)) => words.into_iter().map(|w| (w, None)).collect(),
            (None, None) => {
                let mut seen = HashSet::new();
                let lowest = frames.saturating_sub(self.range + 1);
                (lowest..frames)
                    .rev()
                    .flat_map(|t| self.trellis.atoms_ending_at(t).iter().copied())
                    .map(|id| (self.trellis.atom(id).word, Some(id)))
                    .filter(|(w, _)| seen.insert(*w))
                    .collect()
            }
        };

        for (word, atom) in words {
            let Some(atom) = atom.or_else(|| self.latest_atom(word)) else {
                continue;
            };
            let Some((raw, next_state)) = self.lm.backward_score(word, &[], state) else {
                continue;
            };
            let lscore = self.weights.apply(raw);
            if is_log_zero(lscore) {
                continue;
            }
            out.push(Candidate {
                word,
                atom,
                lscore,
                state: next_state,
                pause: false,
            });
        }
    }

    /// The atom of `word` ending latest
    fn latest_atom(&self, word: WordId) -> Option<AtomId> {
        (0..self.trellis.frame_count())
            .rev()
            .find_map(|t| self.trellis.lookup(t, word))
    }
}

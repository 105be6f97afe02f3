//! Language model interface consumed by both passes
//!
//! Pass 1 asks for forward scores (`P(word | previous word)`) to factor LM
//! scores into the lexicon tree. Pass 2 builds sentences backward in time,
//! so it asks for the score of a word placed *before* the words already in
//! a hypothesis, together with the grammar state reached.
//!
//! Scores returned here are raw log probabilities. The search applies LM
//! weight and insertion penalty itself.

use crate::types::{LogProb, WordId};

/// Position of a partial sentence in the language model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum LmState {
    /// Statistical LM: the history is the word sequence itself
    #[default]
    Free,
    /// State of a (reversed) finite-state grammar
    Grammar(usize),
}

/// A language model usable by the two-pass search
pub trait LanguageModel: Send + Sync {
    /// Short description for logs
    fn describe(&self) -> String;

    /// Words allowed at the beginning of a sentence (Pass 1 initial tokens)
    fn start_words(&self) -> Vec<WordId>;

    /// Forward log probability of `word` following `context`
    /// (`None` at sentence start); `LOG_ZERO` when the pair is not allowed
    fn forward_score(&self, context: Option<WordId>, word: WordId) -> LogProb;

    /// Upper bound of `forward_score(_, word)` over all contexts
    fn unigram_bound(&self, word: WordId) -> LogProb;

    /// Whether `word` may end a sentence (Pass 1 result selection)
    fn can_end(&self, word: WordId) -> bool;

    /// Fixed set of sentence-final words Pass 2 starts from, or `None` to
    /// start from whatever the trellis holds at the last frames
    fn first_words(&self) -> Option<Vec<WordId>>;

    /// State of an empty hypothesis
    fn initial_state(&self) -> LmState {
        LmState::Free
    }

    /// Log probability of placing `word` right before `following`
    /// (nearest word first) in state `state`, with the state reached.
    /// `None` when the grammar or model forbids the expansion.
    fn backward_score(
        &self,
        word: WordId,
        following: &[WordId],
        state: LmState,
    ) -> Option<(LogProb, LmState)>;

    /// Whether a hypothesis whose earliest word is `sequence.last()` can be
    /// a complete sentence
    fn is_acceptable(&self, sequence: &[WordId], state: LmState) -> bool;

    /// Short-pause word that may be placed right before a hypothesis in
    /// `state`. Pass 2 never expands such a word on its own; it scores the
    /// pause and lets the words behind it follow with or without it.
    fn pause_word(&self, _state: LmState) -> Option<WordId> {
        None
    }

    /// Whether `word`, placed before a hypothesis in `state`, may be
    /// separated from it by the short pause of [`LanguageModel::pause_word`]
    fn pause_between(&self, _word: WordId, _state: LmState) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::UnigramLm;

    #[test]
    fn test_default_methods() {
        let lm = UnigramLm::new(vec![-0.3, -0.5]);
        assert_eq!(lm.initial_state(), LmState::Free);
        assert_eq!(lm.pause_word(LmState::Free), None);
        assert!(!lm.pause_between(0, LmState::Free));
        assert_eq!(lm.backward_score(1, &[0], LmState::Free), Some((-0.5, LmState::Free)));
    }
}

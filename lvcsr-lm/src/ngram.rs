//! Word N-gram model for both search passes
//!
//! Pass 1 reads the forward (left-to-right) table with one word of
//! context. Pass 2 grows sentences from the end, so it reads a backward
//! (right-to-left) table with up to two following words of context. When
//! no backward table is given, the forward table is used symmetrically:
//! placing a word before a hypothesis adds the forward probabilities that
//! this word completes, so a finished sentence carries its exact forward
//! probability.
//!
//! Transparent words (fillers) never serve as context; they are skipped
//! when the context is collected.

use lvcsr_search::{LanguageModel, LmState, LogProb, Vocabulary, WordId};
use tracing::{debug, warn};

use crate::arpa::NgramTable;
use crate::error::{LmError, Result};

/// Names of the sentence boundary words
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentenceMarkers {
    /// Sentence-initial silence, the only word Pass 1 starts with
    pub head: String,
    /// Sentence-final silence, the only word Pass 2 starts from
    pub tail: String,
    /// Entry unknown dictionary words map to, if the model has it
    pub unknown: String,
}

impl Default for SentenceMarkers {
    fn default() -> Self {
        Self {
            head: "<s>".to_string(),
            tail: "</s>".to_string(),
            unknown: "<unk>".to_string(),
        }
    }
}

pub struct NgramModel {
    forward: NgramTable,
    backward: Option<NgramTable>,
    /// Forward table id of each dictionary word
    lr_ids: Vec<u32>,
    /// Backward table id of each dictionary word
    rl_ids: Vec<u32>,
    transparent: Vec<bool>,
    head: Option<WordId>,
    tail: Option<WordId>,
}

impl NgramModel {
    /// Bind N-gram tables to a dictionary
    pub fn new(
        forward: NgramTable,
        backward: Option<NgramTable>,
        vocab: &Vocabulary,
        markers: &SentenceMarkers,
    ) -> Result<Self> {
        if forward.order() < 2 {
            warn!("Forward N-gram has no bigrams; Pass 1 runs on unigrams");
        }
        let lr_ids = bind(&forward, vocab, markers)?;
        let rl_ids = match &backward {
            Some(table) => bind(table, vocab, markers)?,
            None => Vec::new(),
        };

        let head = vocab.id_of(&markers.head);
        let tail = vocab.id_of(&markers.tail);
        if head.is_none() || tail.is_none() {
            warn!(
                "Dictionary lacks {} or {}; sentences may start and end with any word",
                markers.head, markers.tail
            );
        }

        Ok(Self {
            forward,
            backward,
            lr_ids,
            rl_ids,
            transparent: vocab.words().map(|(_, w)| w.transparent).collect(),
            head,
            tail,
        })
    }

    /// Model from a forward table only
    pub fn symmetric(forward: NgramTable, vocab: &Vocabulary, markers: &SentenceMarkers) -> Result<Self> {
        Self::new(forward, None, vocab, markers)
    }

    pub fn has_backward_table(&self) -> bool {
        self.backward.is_some()
    }

    /// Nearest non-transparent words of `following`, at most two
    fn context(&self, following: &[WordId]) -> Vec<WordId> {
        following
            .iter()
            .copied()
            .filter(|&w| !self.transparent[w])
            .take(2)
            .collect()
    }

    /// Forward probabilities completed by placing `word` before `following`
    fn completed_forward(&self, word: WordId, following: &[WordId]) -> LogProb {
        if self.transparent[word] {
            return 0.0;
        }
        let mut sum = 0.0;
        for &f in following {
            sum += self.forward.prob(&[self.lr_ids[word]], self.lr_ids[f]);
            if !self.transparent[f] {
                break;
            }
        }
        sum
    }
}

/// Table id of every dictionary word
fn bind(table: &NgramTable, vocab: &Vocabulary, markers: &SentenceMarkers) -> Result<Vec<u32>> {
    let unknown = table.id(&markers.unknown);
    let mut mapped_unknown = 0;
    let ids = vocab
        .words()
        .map(|(_, word)| match (table.id(&word.name), unknown) {
            (Some(id), _) => Ok(id),
            (None, Some(unk)) => {
                mapped_unknown += 1;
                Ok(unk)
            }
            (None, None) => Err(LmError::UnknownWord(word.name.clone())),
        })
        .collect::<Result<Vec<u32>>>()?;
    if mapped_unknown > 0 {
        debug!("{} dictionary words mapped to {}", mapped_unknown, markers.unknown);
    }
    Ok(ids)
}

impl LanguageModel for NgramModel {
    fn describe(&self) -> String {
        format!(
            "{}-gram over {} entries{}",
            self.forward.order(),
            self.forward.len(),
            if self.backward.is_some() {
                " with backward table"
            } else {
                ""
            }
        )
    }

    fn start_words(&self) -> Vec<WordId> {
        match self.head {
            Some(head) => vec![head],
            None => (0..self.lr_ids.len())
                .filter(|&w| Some(w) != self.tail)
                .collect(),
        }
    }

    fn forward_score(&self, context: Option<WordId>, word: WordId) -> LogProb {
        match context {
            Some(c) => self.forward.prob(&[self.lr_ids[c]], self.lr_ids[word]),
            None => self.forward.prob(&[], self.lr_ids[word]),
        }
    }

    fn unigram_bound(&self, word: WordId) -> LogProb {
        self.forward.bigram_bound(self.lr_ids[word])
    }

    fn can_end(&self, word: WordId) -> bool {
        self.tail.map_or(true, |t| t == word)
    }

    fn first_words(&self) -> Option<Vec<WordId>> {
        self.tail.map(|t| vec![t])
    }

    fn backward_score(
        &self,
        word: WordId,
        following: &[WordId],
        state: LmState,
    ) -> Option<(LogProb, LmState)> {
        // nothing precedes the sentence start, and the end word only ends
        if following.first().is_some_and(|&f| Some(f) == self.head) {
            return None;
        }
        if Some(word) == self.tail {
            return following.is_empty().then_some((0.0, state));
        }

        let score = match &self.backward {
            Some(table) => {
                let ctx: Vec<u32> = self
                    .context(following)
                    .iter()
                    .rev()
                    .map(|&w| self.rl_ids[w])
                    .collect();
                table.prob(&ctx, self.rl_ids[word])
            }
            None => self.completed_forward(word, following),
        };
        Some((score, state))
    }

    fn is_acceptable(&self, sequence: &[WordId], _state: LmState) -> bool {
        match self.head {
            Some(head) => sequence.last() == Some(&head),
            None => !sequence.is_empty(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use lvcsr_search::WordEntry;

    const LR: &str = "\
\\data\\
ngram 1=6
ngram 2=5

\\1-grams:
-1.0 <s> -0.5
-0.7 </s>
-0.6 yes -0.3
-0.8 no -0.2
-2.0 um
-1.9 <unk>

\\2-grams:
-0.2 <s> yes
-0.4 <s> no
-0.3 yes </s>
-0.3 no </s>
-0.9 yes no

\\end\\
";

    const RL: &str = "\
\\data\\
ngram 1=6
ngram 2=3
ngram 3=1

\\1-grams:
-1.0 <s>
-0.7 </s> -0.4
-0.6 yes -0.2
-0.8 no
-2.0 um
-1.9 <unk>

\\2-grams:
-0.1 </s> yes -0.3
-0.2 </s> no
-0.5 yes <s>

\\3-grams:
-0.05 </s> yes <s>

\\end\\
";

    fn vocab() -> Vocabulary {
        Vocabulary::new(vec![
            WordEntry::new("<s>", &["sil"]),
            WordEntry::new("</s>", &["sil"]),
            WordEntry::new("yes", &["y", "e", "s"]),
            WordEntry::new("no", &["n", "o"]),
            WordEntry::new("um", &["a", "m"]).transparent(),
            WordEntry::new("perhaps", &["p"]),
        ])
        .unwrap()
    }

    const HEAD: WordId = 0;
    const TAIL: WordId = 1;
    const YES: WordId = 2;
    const NO: WordId = 3;
    const UM: WordId = 4;

    fn model(backward: bool) -> NgramModel {
        let rl = backward.then(|| NgramTable::parse(RL).unwrap());
        NgramModel::new(NgramTable::parse(LR).unwrap(), rl, &vocab(), &SentenceMarkers::default()).unwrap()
    }

    #[test]
    fn test_sentence_boundaries() {
        let lm = model(true);
        assert_eq!(lm.start_words(), vec![HEAD]);
        assert_eq!(lm.first_words(), Some(vec![TAIL]));
        assert!(lm.can_end(TAIL));
        assert!(!lm.can_end(YES));
        assert!(lm.is_acceptable(&[TAIL, YES, HEAD], LmState::Free));
        assert!(!lm.is_acceptable(&[TAIL, YES], LmState::Free));
    }

    #[test]
    fn test_forward_scores() {
        let lm = model(false);
        assert_relative_eq!(lm.forward_score(Some(HEAD), YES), -0.2);
        assert_relative_eq!(lm.forward_score(Some(NO), YES), -0.2 - 0.6);
        assert_relative_eq!(lm.forward_score(None, NO), -0.8);
        assert!(lm.unigram_bound(YES) >= -0.2);
    }

    #[test]
    fn test_unknown_word_maps_to_unk() {
        let lm = model(false);
        assert_relative_eq!(lm.forward_score(None, 5), -1.9);

        let no_unk = LR.replace("ngram 1=6", "ngram 1=5").replace("-1.9 <unk>\n", "");
        let err = NgramModel::symmetric(
            NgramTable::parse(&no_unk).unwrap(),
            &vocab(),
            &SentenceMarkers::default(),
        );
        assert!(matches!(err, Err(LmError::UnknownWord(w)) if w == "perhaps"));
    }

    #[test]
    fn test_backward_table_uses_following_words() {
        let lm = model(true);
        let free = LmState::Free;
        // sentence end enters with no LM score
        assert_eq!(lm.backward_score(TAIL, &[], free), Some((0.0, free)));
        // P(yes | </s>)
        assert_relative_eq!(lm.backward_score(YES, &[TAIL], free).unwrap().0, -0.1);
        // trigram P(<s> | yes </s>)
        assert_relative_eq!(lm.backward_score(HEAD, &[YES, TAIL], free).unwrap().0, -0.05);
        // the filler is skipped as context
        assert_relative_eq!(lm.backward_score(HEAD, &[UM, YES, TAIL], free).unwrap().0, -0.05);
    }

    #[test]
    fn test_expansion_limits() {
        let lm = model(true);
        let free = LmState::Free;
        assert_eq!(lm.backward_score(YES, &[HEAD, TAIL], free), None);
        assert_eq!(lm.backward_score(TAIL, &[YES, TAIL], free), None);
    }

    #[test]
    fn test_symmetric_model_recovers_forward_probability() {
        let lm = model(false);
        let free = LmState::Free;
        // <s> yes um </s>, built backward
        let placed = [TAIL, UM, YES, HEAD];
        let mut total = 0.0;
        let mut following: Vec<WordId> = Vec::new();
        for &w in &placed {
            total += lm.backward_score(w, &following, free).unwrap().0;
            following.insert(0, w);
        }
        let expected = lm.forward_score(Some(HEAD), YES)
            + lm.forward_score(Some(YES), UM)
            + lm.forward_score(Some(YES), TAIL);
        assert_relative_eq!(total, expected, epsilon = 1e-6);
    }
}

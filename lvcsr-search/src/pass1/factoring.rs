//! LM factoring on lexicon tree branches
//!
//! A token entering a branch node gets the best LM score of the words still
//! reachable from it; the word-end node finally carries the exact score.

use std::collections::HashMap;

use crate::config::{FactoringMode, Pass1Config};
use crate::lexicon::LexiconTree;
use crate::lm::LanguageModel;
use crate::types::{is_log_zero, LogProb, NodeId, WordId, LOG_ZERO};

#[derive(Debug)]
pub struct Factoring {
    mode: FactoringMode,
    weight: f32,
    penalty: f32,
    /// (factoring id, context) → weighted maximum
    cache: HashMap<(usize, Option<WordId>), LogProb>,
    /// Unigram mode: weighted static bound of every factoring list
    bounds: Vec<LogProb>,
}

impl Factoring {
    pub fn new(tree: &LexiconTree, lm: &dyn LanguageModel, config: &Pass1Config) -> Self {
        let mut factoring = Self {
            mode: config.factoring,
            weight: config.lm_weight,
            penalty: config.lm_penalty,
            cache: HashMap::new(),
            bounds: Vec::new(),
        };
        if factoring.mode == FactoringMode::Unigram {
            let mut bounds = vec![LOG_ZERO; tree.factoring_count()];
            for node in 0..tree.len() {
                if let (Some(id), Some(words)) = (tree.factoring_id(node), tree.factoring(node)) {
                    bounds[id] = words
                        .iter()
                        .map(|&w| factoring.weighted(lm.unigram_bound(w)))
                        .fold(LOG_ZERO, LogProb::max);
                }
            }
            factoring.bounds = bounds;
        }
        factoring
    }

    #[inline]
    fn weighted(&self, raw: LogProb) -> LogProb {
        if is_log_zero(raw) {
            LOG_ZERO
        } else {
            self.weight * raw + self.penalty
        }
    }

    /// Forget cached context scores (between utterances)
    pub fn clear(&mut self) {
        self.cache.clear();
    }

    /// True when the node's score depends on the context word
    pub fn is_context_dependent(&self, tree: &LexiconTree, node: NodeId) -> bool {
        match self.mode {
            FactoringMode::Bigram => true,
            FactoringMode::Unigram => tree.factoring(node).is_some_and(|w| w.len() == 1),
        }
    }

    /// Weighted factoring score of a factoring node after `context`.
    /// Nodes without a factoring list score 0.
    pub fn score(
        &mut self,
        tree: &LexiconTree,
        lm: &dyn LanguageModel,
        node: NodeId,
        context: Option<WordId>,
    ) -> LogProb {
        let (Some(id), Some(words)) = (tree.factoring_id(node), tree.factoring(node)) else {
            return 0.0;
        };

        if self.mode == FactoringMode::Unigram && words.len() > 1 {
            return self.bounds[id];
        }

        if let Some(&cached) = self.cache.get(&(id, context)) {
            return cached;
        }
        let best = words
            .iter()
            .map(|&w| self.weighted(lm.forward_score(context, w)))
            .fold(LOG_ZERO, LogProb::max);
        self.cache.insert((id, context), best);
        best
    }
}

//! Read-only model bundle shared by every search

use std::fmt;
use std::sync::Arc;

use tracing::info;

use crate::error::{Result, SearchError};
use crate::hmm::HmmSet;
use crate::lexicon::LexiconTree;
use crate::lm::LanguageModel;
use crate::vocab::Vocabulary;

/// Acoustic model, dictionary, lexicon tree and language model.
///
/// Built once; both passes only read it, so one instance can serve many
/// concurrent searches.
pub struct SearchModel {
    pub hmms: HmmSet,
    pub vocab: Vocabulary,
    pub tree: LexiconTree,
    pub lm: Arc<dyn LanguageModel>,
}

impl SearchModel {
    /// Build the lexicon tree and check that every phone resolves
    pub fn new(hmms: HmmSet, vocab: Vocabulary, lm: Arc<dyn LanguageModel>) -> Result<Self> {
        if hmms.is_empty() {
            return Err(SearchError::invalid_model("acoustic model has no HMMs"));
        }
        let tree = LexiconTree::build(&vocab, &hmms)?;

        info!(
            "Search model ready: {} HMMs, {} words, {} tree nodes, LM {}",
            hmms.len(),
            vocab.len(),
            tree.len(),
            lm.describe()
        );

        Ok(Self { hmms, vocab, tree, lm })
    }

    /// The language model as a trait object
    pub fn lm(&self) -> &dyn LanguageModel {
        self.lm.as_ref()
    }
}

impl fmt::Debug for SearchModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SearchModel")
            .field("hmms", &self.hmms.len())
            .field("words", &self.vocab.len())
            .field("tree_nodes", &self.tree.len())
            .field("lm", &self.lm.describe())
            .finish()
    }
}

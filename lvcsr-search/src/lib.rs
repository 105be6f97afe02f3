//! Two-pass large-vocabulary search engine
//!
//! The engine decodes one utterance from precomputed acoustic scores:
//!
//! 1. **Pass 1** runs a frame-synchronous beam search over a tree-structured
//!    lexicon with LM factoring and writes every surviving word end into a
//!    [`WordTrellis`].
//! 2. **Pass 2** runs a best-first stack decoder backward in time. Each
//!    hypothesis is scored exactly (cross-word triphones, full LM) and its
//!    unexplored prefix is estimated from the trellis, so the first complete
//!    sentences popped are the best ones.
//!
//! Feature extraction and acoustic likelihood computation live outside:
//! the search asks an [`AcousticScorer`] for state output probabilities.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use lvcsr_search::{
//!     CancelFlag, LanguageModel, NullSink, ScoreTable, SearchConfig, SearchModel, Searcher,
//! };
//!
//! # fn load() -> lvcsr_search::Result<(lvcsr_search::HmmSet, lvcsr_search::Vocabulary, Arc<dyn LanguageModel>)> { unimplemented!() }
//! let (hmms, vocab, lm) = load()?;
//! let model = SearchModel::new(hmms, vocab, lm)?;
//! let config = SearchConfig::default().nbest(3);
//!
//! let scores = ScoreTable::new(model.hmms.state_count());
//! let mut searcher = Searcher::new(&model, &config)?;
//! let results = searcher.decode(&scores, &CancelFlag::new(), &mut NullSink)?;
//! for sentence in &results[0].sentences {
//!     println!("{}", model.vocab.outputs(&sentence.words).join(" "));
//! }
//! # Ok::<(), lvcsr_search::SearchError>(())
//! ```

pub mod acoustic;
pub mod config;
pub mod error;
pub mod hmm;
pub mod lexicon;
pub mod lm;
pub mod model;
pub mod pass1;
pub mod pass2;
pub mod result;
pub mod search;
pub mod trellis;
pub mod types;
pub mod vocab;

pub use acoustic::{AcousticScorer, FrameWindow, ScoreTable};
pub use config::{
    ConfidenceConfig, ConfidenceMode, CrossWordMode, FactoringMode, Pass1Config, Pass2Config,
    SearchConfig, SegmentationConfig, TokenMode,
};
pub use error::{Result, SearchError};
pub use hmm::{HmmDefinition, HmmSet, OutputRef, PhoneContext, PhoneModel};
pub use lexicon::LexiconTree;
pub use lm::{LanguageModel, LmState};
pub use model::SearchModel;
pub use pass1::{Pass1, Pass1Outcome, SegmentStart};
pub use pass2::{Pass2, Pass2Outcome};
pub use result::{
    CollectingSink, NullSink, Pass1Result, Pass1Status, ResultSink, SearchStatus, SegmentResult,
    Sentence, Termination, TracingSink,
};
pub use search::Searcher;
pub use trellis::{AtomId, TrellisAtom, WordTrellis};
pub use types::{is_log_zero, CancelFlag, LogProb, NodeId, StateId, WordId, LOG_ZERO};
pub use vocab::{Vocabulary, Word, WordEntry};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

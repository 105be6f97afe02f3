//! Language models for the lvcsr two-pass search
//!
//! Two kinds of model plug into [`lvcsr_search::LanguageModel`]:
//!
//! - [`NgramModel`]: ARPA word N-grams. Pass 1 reads a forward bigram,
//!   Pass 2 a backward trigram (or the forward table used symmetrically).
//! - [`Grammar`]: a reversed finite-state automaton over word categories,
//!   with short-pause categories stepped over during Pass 2.
//!
//! ## Quick Start
//!
//! ```no_run
//! use lvcsr_lm::{NgramModel, NgramTable, SentenceMarkers};
//! # fn vocab() -> lvcsr_search::Vocabulary { unimplemented!() }
//!
//! let vocab = vocab();
//! let forward = NgramTable::load("lm/forward.arpa")?;
//! let backward = NgramTable::load("lm/backward.arpa")?;
//! let lm = NgramModel::new(forward, Some(backward), &vocab, &SentenceMarkers::default())?;
//! # Ok::<(), lvcsr_lm::LmError>(())
//! ```

pub mod arpa;
pub mod error;
pub mod grammar;
pub mod ngram;

pub use arpa::NgramTable;
pub use error::{LmError, Result};
pub use grammar::{CategoryId, DfaState, Grammar};
pub use ngram::{NgramModel, SentenceMarkers};

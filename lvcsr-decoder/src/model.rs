//! Model bundle and acoustic score loading
//!
//! A bundle is one JSON file naming everything the search needs:
//!
//! ```json
//! {
//!   "hmms": [{ "name": "a", "states": [0, 1], "transitions": [[null, 0.0, null, null], ...] }],
//!   "aliases": { "k-a+t": "a" },
//!   "dictionary": [{ "name": "cat", "phones": ["k", "a", "t"] }],
//!   "pause_phones": ["sil", "sp"],
//!   "lm": { "type": "ngram", "forward": "lm/fwd.arpa", "backward": "lm/bwd.arpa" }
//! }
//! ```
//!
//! Relative LM paths are resolved against the bundle's directory.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use lvcsr_lm::{Grammar, NgramModel, NgramTable, SentenceMarkers};
use lvcsr_search::{
    HmmDefinition, HmmSet, LanguageModel, LogProb, ScoreTable, SearchModel, Vocabulary, WordEntry,
};
use serde::{Deserialize, Serialize};
use tracing::info;

/// Language model referenced by a bundle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum LmSource {
    Ngram {
        /// Left-to-right ARPA file used by Pass 1
        forward: PathBuf,
        /// Right-to-left ARPA file used by Pass 2
        #[serde(default)]
        backward: Option<PathBuf>,
        #[serde(default = "default_head")]
        head: String,
        #[serde(default = "default_tail")]
        tail: String,
        #[serde(default = "default_unknown")]
        unknown: String,
    },
    Grammar {
        dfa: PathBuf,
        categories: PathBuf,
    },
}

fn default_head() -> String {
    SentenceMarkers::default().head
}

fn default_tail() -> String {
    SentenceMarkers::default().tail
}

fn default_unknown() -> String {
    SentenceMarkers::default().unknown
}

/// Serialized model bundle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelBundle {
    pub hmms: Vec<HmmDefinition>,

    /// Logical phone name → physical HMM name
    #[serde(default)]
    pub aliases: HashMap<String, String>,

    pub dictionary: Vec<WordEntry>,

    /// Phones whose single-phone words count as pauses
    #[serde(default)]
    pub pause_phones: Vec<String>,

    pub lm: LmSource,
}

impl ModelBundle {
    /// Read a bundle file
    pub fn read<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read model bundle {}", path.display()))?;
        serde_json::from_str(&text)
            .with_context(|| format!("Failed to parse model bundle {}", path.display()))
    }

    /// Build the search model; relative LM paths start at `base_dir`
    pub fn build(self, base_dir: &Path) -> Result<SearchModel> {
        let hmms = HmmSet::new(self.hmms, &self.aliases).context("Invalid acoustic model")?;
        let vocab = Vocabulary::new(self.dictionary)
            .context("Invalid dictionary")?
            .with_pause_phones(&self.pause_phones);

        let resolve = |p: &Path| -> PathBuf {
            if p.is_absolute() {
                p.to_path_buf()
            } else {
                base_dir.join(p)
            }
        };

        let lm: Arc<dyn LanguageModel> = match &self.lm {
            LmSource::Ngram {
                forward,
                backward,
                head,
                tail,
                unknown,
            } => {
                let markers = SentenceMarkers {
                    head: head.clone(),
                    tail: tail.clone(),
                    unknown: unknown.clone(),
                };
                let forward = resolve(forward);
                let fwd = NgramTable::load(&forward)
                    .with_context(|| format!("Failed to load N-gram {}", forward.display()))?;
                let bwd = match backward {
                    Some(path) => {
                        let path = resolve(path);
                        Some(
                            NgramTable::load(&path)
                                .with_context(|| format!("Failed to load N-gram {}", path.display()))?,
                        )
                    }
                    None => None,
                };
                Arc::new(NgramModel::new(fwd, bwd, &vocab, &markers)?)
            }
            LmSource::Grammar { dfa, categories } => {
                let (dfa, categories) = (resolve(dfa), resolve(categories));
                let grammar = Grammar::load(&dfa, &categories, &vocab)
                    .with_context(|| format!("Failed to load grammar {}", dfa.display()))?;
                Arc::new(grammar)
            }
        };

        info!("📚 Language model: {}", lm.describe());
        Ok(SearchModel::new(hmms, vocab, lm)?)
    }
}

/// Load and build the bundle at `path`
pub fn load_model<P: AsRef<Path>>(path: P) -> Result<SearchModel> {
    let path = path.as_ref();
    let bundle = ModelBundle::read(path)?;
    let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
    bundle
        .build(base_dir)
        .with_context(|| format!("Failed to build model from {}", path.display()))
}

/// Acoustic scores precomputed for one utterance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreFile {
    /// Log output probability per frame and HMM state
    pub frames: Vec<Vec<LogProb>>,
}

/// Parse one utterance of scores and check it against the model
pub fn parse_scores(text: &str, model: &SearchModel) -> Result<ScoreTable> {
    let file: ScoreFile = serde_json::from_str(text).context("Failed to parse score matrix")?;
    to_table(file.frames, model)
}

/// Read one utterance of scores from a JSON file
pub fn load_scores<P: AsRef<Path>>(path: P, model: &SearchModel) -> Result<ScoreTable> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read scores {}", path.display()))?;
    parse_scores(&text, model).with_context(|| format!("Bad score file {}", path.display()))
}

fn to_table(rows: Vec<Vec<LogProb>>, model: &SearchModel) -> Result<ScoreTable> {
    let states = model.hmms.state_count();
    if let Some((t, row)) = rows.iter().enumerate().find(|(_, r)| r.len() != states) {
        bail!(
            "frame {} has {} scores, the acoustic model has {} states",
            t,
            row.len(),
            states
        );
    }
    let mut table = ScoreTable::new(states);
    for row in &rows {
        table.push_frame(row)?;
    }
    Ok(table)
}

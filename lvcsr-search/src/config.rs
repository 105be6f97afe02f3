//! Search configuration
//!
//! All knobs of both passes. Serializable so the decoder application can
//! embed it in its TOML configuration file.

use serde::{Deserialize, Serialize};

use crate::error::{Result, SearchError};

/// LM factoring granularity used on tree branch nodes during Pass 1
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FactoringMode {
    /// Exact bigram maximum over the branch's words, cached per (branch, context)
    Bigram,
    /// Static unigram upper bound on shared branches, exact bigram at leaves only
    Unigram,
}

/// How many tokens a lexicon tree node may hold during Pass 1
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenMode {
    /// One token per node
    OneBest,
    /// One token per (node, previous word), capped by `word_pair_limit`
    WordPair,
}

/// When the cross-word triphone context is resolved in Pass 2
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CrossWordMode {
    /// Re-scan the boundary phone when a hypothesis is popped
    Backscan,
    /// Re-scan the boundary phone when a hypothesis is generated
    Nextscan,
}

/// Word confidence computation in Pass 2
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfidenceMode {
    Off,
    /// Local posterior among sibling hypotheses of each expansion
    Search,
    /// Global posterior over the final N-best list
    Nbest,
}

/// First pass (frame-synchronous beam search) settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Pass1Config {
    /// Number of tokens kept per frame (trellis beam width)
    pub beam_width: usize,

    /// Language model weight
    pub lm_weight: f32,

    /// Word insertion penalty
    pub lm_penalty: f32,

    pub factoring: FactoringMode,

    pub token_mode: TokenMode,

    /// Maximum contexts per node in word-pair mode
    pub word_pair_limit: usize,

    /// Send the partial best path to the result sink every N frames (0 = never)
    pub progress_interval: usize,
}

impl Default for Pass1Config {
    fn default() -> Self {
        Self {
            beam_width: 400,
            lm_weight: 8.0,
            lm_penalty: -2.0,
            factoring: FactoringMode::Bigram,
            token_mode: TokenMode::OneBest,
            word_pair_limit: 3,
            progress_interval: 0,
        }
    }
}

/// Second pass (best-first stack decoding) settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Pass2Config {
    /// Maximum number of hypotheses held in the stack
    pub stack_size: usize,

    /// Number of sentences to find
    pub nbest: usize,

    /// Maximum number of hypothesis pops before giving up
    pub max_expansions: usize,

    /// Language model weight
    pub lm_weight: f32,

    /// Word insertion penalty
    pub lm_penalty: f32,

    /// Extra penalty when a transparent word follows another transparent word
    pub transparent_penalty: f32,

    /// Word envelope: pops allowed per hypothesis length
    pub envelope_width: usize,

    /// Score envelope margin (None disables score envelope pruning)
    pub scan_beam: Option<f32>,

    /// Frames around the frontier searched for next-word candidates
    pub lookup_range: usize,

    /// A hypothesis may end the sentence when its next frame is at most this
    pub accept_margin: i32,

    pub crossword: CrossWordMode,
}

impl Default for Pass2Config {
    fn default() -> Self {
        Self {
            stack_size: 500,
            nbest: 1,
            max_expansions: 2000,
            lm_weight: 8.0,
            lm_penalty: -2.0,
            transparent_penalty: 0.0,
            envelope_width: 30,
            scan_beam: Some(80.0),
            lookup_range: 5,
            accept_margin: 5,
            crossword: CrossWordMode::Backscan,
        }
    }
}

/// Short-pause segmentation of long input
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmentationConfig {
    pub enabled: bool,

    /// Minimum run of pause frames that ends a segment
    pub min_pause_frames: usize,
}

impl Default for SegmentationConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            min_pause_frames: 10,
        }
    }
}

/// Word confidence scoring
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfidenceConfig {
    pub mode: ConfidenceMode,

    /// Scaling exponent applied to score differences before normalisation
    pub alpha: f32,
}

impl Default for ConfidenceConfig {
    fn default() -> Self {
        Self {
            mode: ConfidenceMode::Off,
            alpha: 0.05,
        }
    }
}

/// Complete search configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Shortest input the engine accepts, in frames
    pub min_frames: usize,

    pub pass1: Pass1Config,
    pub pass2: Pass2Config,
    pub segmentation: SegmentationConfig,
    pub confidence: ConfidenceConfig,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            min_frames: 2,
            pass1: Pass1Config::default(),
            pass2: Pass2Config::default(),
            segmentation: SegmentationConfig::default(),
            confidence: ConfidenceConfig::default(),
        }
    }
}

impl SearchConfig {
    /// Set the Pass 1 beam width
    pub fn beam_width(mut self, width: usize) -> Self {
        self.pass1.beam_width = width;
        self
    }

    /// Set LM weight and penalty for both passes
    pub fn lm_weights(mut self, weight: f32, penalty: f32) -> Self {
        self.pass1.lm_weight = weight;
        self.pass1.lm_penalty = penalty;
        self.pass2.lm_weight = weight;
        self.pass2.lm_penalty = penalty;
        self
    }

    /// Set the number of sentences Pass 2 should find
    pub fn nbest(mut self, n: usize) -> Self {
        self.pass2.nbest = n;
        self
    }

    /// Set the Pass 2 stack size
    pub fn stack_size(mut self, size: usize) -> Self {
        self.pass2.stack_size = size;
        self
    }

    /// Select the cross-word resolution algorithm
    pub fn crossword(mut self, mode: CrossWordMode) -> Self {
        self.pass2.crossword = mode;
        self
    }

    /// Enable short-pause segmentation with the given minimum pause length
    pub fn segmentation(mut self, min_pause_frames: usize) -> Self {
        self.segmentation.enabled = true;
        self.segmentation.min_pause_frames = min_pause_frames;
        self
    }

    /// Enable confidence scoring
    pub fn confidence(mut self, mode: ConfidenceMode, alpha: f32) -> Self {
        self.confidence.mode = mode;
        self.confidence.alpha = alpha;
        self
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.pass1.beam_width == 0 {
            return Err(SearchError::config("pass1.beam_width must be positive"));
        }

        if self.pass1.token_mode == TokenMode::WordPair && self.pass1.word_pair_limit == 0 {
            return Err(SearchError::config("pass1.word_pair_limit must be positive"));
        }

        if self.pass2.stack_size == 0 {
            return Err(SearchError::config("pass2.stack_size must be positive"));
        }

        if self.pass2.nbest == 0 {
            return Err(SearchError::config("pass2.nbest must be positive"));
        }

        if self.pass2.max_expansions == 0 {
            return Err(SearchError::config("pass2.max_expansions must be positive"));
        }

        if self.pass2.envelope_width == 0 {
            return Err(SearchError::config("pass2.envelope_width must be positive"));
        }

        if let Some(margin) = self.pass2.scan_beam {
            if margin <= 0.0 {
                return Err(SearchError::config("pass2.scan_beam must be positive"));
            }
        }

        if self.segmentation.enabled && self.segmentation.min_pause_frames == 0 {
            return Err(SearchError::config(
                "segmentation.min_pause_frames must be positive",
            ));
        }

        if self.confidence.mode != ConfidenceMode::Off && self.confidence.alpha <= 0.0 {
            return Err(SearchError::config("confidence.alpha must be positive"));
        }

        if self.min_frames == 0 {
            return Err(SearchError::config("min_frames must be positive"));
        }

        Ok(())
    }
}

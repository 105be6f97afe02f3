//! Decoding session over a loaded model

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use lvcsr_search::{
    AcousticScorer, CancelFlag, ResultSink, SearchConfig, SearchModel, Searcher, SegmentResult,
};
use tracing::{debug, info};

use crate::config::DecoderConfig;
use crate::model::load_model;

/// Shared model plus search parameters; decodes any number of utterances
pub struct Decoder {
    model: Arc<SearchModel>,
    config: SearchConfig,
    cancel: CancelFlag,
}

impl Decoder {
    pub fn new(model: Arc<SearchModel>, config: SearchConfig) -> Result<Self> {
        config.validate().context("Invalid search configuration")?;
        Ok(Self {
            model,
            config,
            cancel: CancelFlag::new(),
        })
    }

    /// Load the model bundle named by `config`
    pub fn from_config(config: &DecoderConfig) -> Result<Self> {
        info!("📦 Loading model bundle {}", config.model_path);
        let model = load_model(Path::new(&config.model_path))?;
        Self::new(Arc::new(model), config.search.clone())
    }

    pub fn model(&self) -> &SearchModel {
        &self.model
    }

    pub fn config(&self) -> &SearchConfig {
        &self.config
    }

    /// Flag that stops the running search; results decoded so far are kept
    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    /// Search context over this decoder's model, for incremental input
    pub fn searcher(&self) -> Result<Searcher<'_>> {
        Ok(Searcher::new(&self.model, &self.config)?)
    }

    /// Decode one complete utterance, Pass 1 then Pass 2 for every segment
    pub fn decode<S: AcousticScorer + ?Sized>(
        &self,
        scores: &S,
        sink: &mut dyn ResultSink,
    ) -> Result<Vec<SegmentResult>> {
        let mut searcher = self.searcher()?;
        let results = searcher.decode(scores, &self.cancel, sink);
        // a request made while this run was going has been served
        self.cancel.reset();
        let results = results.context("Decoding failed")?;
        debug!(
            "Decoded {} frames into {} segment(s)",
            scores.frame_count(),
            results.len()
        );
        Ok(results)
    }
}

//! Pass 2 pruning envelopes
//!
//! The word envelope bounds how many hypotheses of each length may be
//! expanded; once a length is full, shorter hypotheses are no longer
//! expanded. The score envelope keeps the best backward score seen at each
//! frame and prunes scan states falling too far below it.

use crate::types::{LogProb, LOG_ZERO};

#[derive(Debug, Clone)]
pub struct WordEnvelope {
    width: usize,
    counts: Vec<usize>,
    max_filled: usize,
}

impl WordEnvelope {
    pub fn new(width: usize) -> Self {
        Self {
            width,
            counts: Vec::new(),
            max_filled: 0,
        }
    }

    pub fn reset(&mut self) {
        self.counts.clear();
        self.max_filled = 0;
    }

    /// Count an expansion of a hypothesis of `len` words.
    /// Returns false when the hypothesis must be dropped.
    pub fn admit(&mut self, len: usize) -> bool {
        if len <= self.max_filled {
            return false;
        }
        if self.counts.len() <= len {
            self.counts.resize(len + 1, 0);
        }
        self.counts[len] += 1;
        if self.counts[len] > self.width {
            self.max_filled = self.max_filled.max(len);
        }
        true
    }
}

#[derive(Debug, Clone)]
pub struct ScoreEnvelope {
    beam: Option<LogProb>,
    frame_max: Vec<LogProb>,
}

impl ScoreEnvelope {
    pub fn new(beam: Option<LogProb>) -> Self {
        Self {
            beam,
            frame_max: Vec::new(),
        }
    }

    pub fn reset(&mut self, frames: usize) {
        self.frame_max.clear();
        self.frame_max.resize(frames, LOG_ZERO);
    }

    pub fn is_enabled(&self) -> bool {
        self.beam.is_some()
    }

    /// Scores at or below this are pruned at frame `t`
    #[inline]
    pub fn threshold(&self, t: usize) -> LogProb {
        match self.beam {
            Some(beam) => self.frame_max[t] - beam,
            None => LOG_ZERO,
        }
    }

    /// Raise the envelope with a scanned backward score
    pub fn update(&mut self, g: &[LogProb]) {
        if self.beam.is_none() {
            return;
        }
        for (max, &score) in self.frame_max.iter_mut().zip(g) {
            if *max < score {
                *max = score;
            }
        }
    }
}

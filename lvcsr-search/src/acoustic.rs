//! Acoustic score provider interface
//!
//! The search never looks at feature vectors. It asks an [`AcousticScorer`]
//! for the output log probability of an HMM state at a frame, and expects
//! the same answer every time it asks.

use crate::error::{Result, SearchError};
use crate::types::{LogProb, StateId};

/// Per-frame state output probabilities for one utterance.
///
/// Implementations bind the input parameters themselves, so `outprob` only
/// takes the frame index and the state.
pub trait AcousticScorer: Send + Sync {
    /// Number of frames currently available
    fn frame_count(&self) -> usize;

    /// Output log probability of `state` at `frame`
    fn outprob(&self, frame: usize, state: StateId) -> LogProb;
}

/// Dense frames × states table of precomputed output probabilities.
///
/// Frames can be appended one at a time, which is how the streaming
/// decoder feeds Pass 1.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoreTable {
    state_count: usize,
    scores: Vec<LogProb>,
}

impl ScoreTable {
    /// Create an empty table for `state_count` states
    pub fn new(state_count: usize) -> Self {
        Self {
            state_count,
            scores: Vec::new(),
        }
    }

    /// Build a table from per-frame rows
    pub fn from_rows(rows: Vec<Vec<LogProb>>) -> Result<Self> {
        let state_count = rows.first().map(|r| r.len()).unwrap_or(0);
        let mut table = Self::new(state_count);
        for row in &rows {
            table.push_frame(row)?;
        }
        Ok(table)
    }

    /// Append one frame of scores
    pub fn push_frame(&mut self, row: &[LogProb]) -> Result<()> {
        if row.len() != self.state_count {
            return Err(SearchError::input_mismatch(format!(
                "frame {} has {} scores, expected {}",
                self.frame_count(),
                row.len(),
                self.state_count
            )));
        }
        self.scores.extend_from_slice(row);
        Ok(())
    }

    pub fn state_count(&self) -> usize {
        self.state_count
    }

    /// Scores of one frame
    pub fn row(&self, frame: usize) -> &[LogProb] {
        let start = frame * self.state_count;
        &self.scores[start..start + self.state_count]
    }

    /// Drop all frames, keeping the allocation
    pub fn clear(&mut self) {
        self.scores.clear();
    }
}

impl AcousticScorer for ScoreTable {
    fn frame_count(&self) -> usize {
        if self.state_count == 0 {
            0
        } else {
            self.scores.len() / self.state_count
        }
    }

    fn outprob(&self, frame: usize, state: StateId) -> LogProb {
        self.scores[frame * self.state_count + state]
    }
}

/// A window of frames of another scorer, re-indexed from zero.
///
/// Used to run both passes on one short-pause segment of a longer input.
pub struct FrameWindow<'a, S: AcousticScorer + ?Sized> {
    inner: &'a S,
    offset: usize,
    len: usize,
}

impl<'a, S: AcousticScorer + ?Sized> FrameWindow<'a, S> {
    /// Frames `offset .. offset + len` of `inner`, clipped to what `inner` has
    pub fn new(inner: &'a S, offset: usize, len: usize) -> Self {
        let available = inner.frame_count().saturating_sub(offset);
        Self {
            inner,
            offset,
            len: len.min(available),
        }
    }

    /// Frames from `offset` to the current end of `inner`
    pub fn from_offset(inner: &'a S, offset: usize) -> Self {
        let len = inner.frame_count().saturating_sub(offset);
        Self { inner, offset, len }
    }

    pub fn offset(&self) -> usize {
        self.offset
    }
}

impl<S: AcousticScorer + ?Sized> AcousticScorer for FrameWindow<'_, S> {
    fn frame_count(&self) -> usize {
        self.len
    }

    fn outprob(&self, frame: usize, state: StateId) -> LogProb {
        self.inner.outprob(self.offset + frame, state)
    }
}

//! Search outcomes and the result sink interface

use tracing::info;

use crate::types::{LogProb, WordId};
use crate::vocab::Vocabulary;

/// How Pass 1 stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pass1Status {
    /// All input frames were processed
    Completed,
    /// A long pause ended the segment; the next segment resumes at `resume_frame`
    Segmented { resume_frame: usize },
    /// External cancellation; the trellis covers frames before `frame`
    Cancelled { frame: usize },
    /// No token survived at `frame`; the trellis covers frames before it
    Failed { frame: usize },
}

impl Pass1Status {
    /// True when the trellis does not reach the end of the available input
    pub fn is_truncated(&self) -> bool {
        !matches!(self, Pass1Status::Completed)
    }
}

/// Best path found by Pass 1
#[derive(Debug, Clone, PartialEq)]
pub struct Pass1Result {
    pub words: Vec<WordId>,
    pub score: LogProb,
    /// Weighted LM part of `score`
    pub lm_score: LogProb,
    /// Last frame covered by the path
    pub end_frame: usize,
}

/// Quality of the final answer for an utterance or segment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchStatus {
    /// Pass 2 found at least one sentence
    Clean,
    /// Pass 2 found nothing; the Pass 1 best path is reported
    Fallback,
    /// Neither pass produced a result
    Nothing,
}

/// Why Pass 2 stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// Requested number of sentences found
    Found,
    /// Expansion budget exceeded
    Overflow,
    /// Stack ran empty
    Exhausted,
    Cancelled,
}

/// A complete sentence hypothesis
#[derive(Debug, Clone, PartialEq)]
pub struct Sentence {
    /// Words in time order
    pub words: Vec<WordId>,
    pub score: LogProb,
    pub am_score: LogProb,
    pub lm_score: LogProb,
    /// Per-word confidence, aligned with `words`
    pub confidence: Option<Vec<f32>>,
}

/// Everything known about one decoded utterance or segment
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentResult {
    pub index: usize,
    /// First input frame of the segment
    pub start_frame: usize,
    /// Number of frames the segment covers
    pub frames: usize,
    pub pass1_status: Pass1Status,
    pub pass1: Option<Pass1Result>,
    pub status: SearchStatus,
    pub termination: Option<Termination>,
    /// Sorted best first; for `Fallback` the single Pass 1 path
    pub sentences: Vec<Sentence>,
}

impl SegmentResult {
    pub fn best(&self) -> Option<&Sentence> {
        self.sentences.first()
    }
}

/// Receiver of progressive and final results
pub trait ResultSink {
    /// Partial best path during Pass 1
    fn pass1_progress(&mut self, _frame: usize, _words: &[WordId], _score: LogProb) {}

    /// Pass 1 finished for a segment
    fn pass1_result(&mut self, _status: Pass1Status, _result: Option<&Pass1Result>) {}

    /// Final result of a segment
    fn segment(&mut self, result: &SegmentResult);
}

/// Sink that discards everything
#[derive(Debug, Default)]
pub struct NullSink;

impl ResultSink for NullSink {
    fn segment(&mut self, _result: &SegmentResult) {}
}

/// Sink that keeps everything it receives, for tests and batch callers
#[derive(Debug, Default, Clone)]
pub struct CollectingSink {
    pub progress: Vec<(usize, Vec<WordId>, LogProb)>,
    pub pass1: Vec<(Pass1Status, Option<Pass1Result>)>,
    pub segments: Vec<SegmentResult>,
}

impl ResultSink for CollectingSink {
    fn pass1_progress(&mut self, frame: usize, words: &[WordId], score: LogProb) {
        self.progress.push((frame, words.to_vec(), score));
    }

    fn pass1_result(&mut self, status: Pass1Status, result: Option<&Pass1Result>) {
        self.pass1.push((status, result.cloned()));
    }

    fn segment(&mut self, result: &SegmentResult) {
        self.segments.push(result.clone());
    }
}

/// Sink that reports results through `tracing`
pub struct TracingSink<'a> {
    vocab: &'a Vocabulary,
}

impl<'a> TracingSink<'a> {
    pub fn new(vocab: &'a Vocabulary) -> Self {
        Self { vocab }
    }
}

impl ResultSink for TracingSink<'_> {
    fn pass1_progress(&mut self, frame: usize, words: &[WordId], score: LogProb) {
        info!("pass1 [{}] {} ({:.2})", frame, self.vocab.outputs(words).join(" "), score);
    }

    fn pass1_result(&mut self, status: Pass1Status, result: Option<&Pass1Result>) {
        match result {
            Some(r) => info!(
                "pass1 {:?}: {} (score {:.2}, lm {:.2})",
                status,
                self.vocab.outputs(&r.words).join(" "),
                r.score,
                r.lm_score
            ),
            None => info!("pass1 {:?}: no result", status),
        }
    }

    fn segment(&mut self, result: &SegmentResult) {
        for (rank, sentence) in result.sentences.iter().enumerate() {
            info!(
                "segment {} #{} [{:?}]: {} (score {:.2}, AM {:.2}, LM {:.2})",
                result.index,
                rank + 1,
                result.status,
                self.vocab.outputs(&sentence.words).join(" "),
                sentence.score,
                sentence.am_score,
                sentence.lm_score
            );
        }
        if result.sentences.is_empty() {
            info!("segment {}: nothing recognized", result.index);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncation_flags() {
        assert!(!Pass1Status::Completed.is_truncated());
        assert!(Pass1Status::Cancelled { frame: 3 }.is_truncated());
        assert!(Pass1Status::Segmented { resume_frame: 9 }.is_truncated());
    }

    #[test]
    fn test_collecting_sink() {
        let mut sink = CollectingSink::default();
        sink.pass1_progress(4, &[1, 2], -3.0);
        let result = SegmentResult {
            index: 0,
            start_frame: 0,
            frames: 10,
            pass1_status: Pass1Status::Completed,
            pass1: None,
            status: SearchStatus::Nothing,
            termination: None,
            sentences: vec![],
        };
        sink.segment(&result);
        assert_eq!(sink.progress, vec![(4, vec![1, 2], -3.0)]);
        assert!(sink.segments[0].best().is_none());
    }
}

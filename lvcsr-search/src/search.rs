//! Utterance-level driver: Pass 1, Pass 2 and short-pause segmentation
//!
//! A [`Searcher`] owns both passes and can be fed a growing scorer: call
//! [`Searcher::advance`] whenever new frames arrived and
//! [`Searcher::finish`] at end of input. [`Searcher::decode`] does all of
//! it at once, so batch and streaming input go through the same steps.

use tracing::{debug, info, warn};

use crate::acoustic::{AcousticScorer, FrameWindow};
use crate::config::SearchConfig;
use crate::error::{Result, SearchError};
use crate::model::SearchModel;
use crate::pass1::{Pass1, SegmentStart};
use crate::pass2::{Anchors, Pass2};
use crate::result::{Pass1Result, Pass1Status, ResultSink, SearchStatus, SegmentResult, Sentence};
use crate::types::CancelFlag;

/// Where the input currently stands
#[derive(Debug, Clone, Copy, Default)]
struct Cursor {
    /// First input frame of the current segment
    offset: usize,
    start: SegmentStart,
    index: usize,
    /// Pass 1 has set up its initial tokens for this segment
    begun: bool,
    /// No more segments will be started
    done: bool,
}

pub struct Searcher<'a> {
    model: &'a SearchModel,
    config: &'a SearchConfig,
    pass1: Pass1<'a>,
    pass2: Pass2<'a>,
    cursor: Cursor,
    results: Vec<SegmentResult>,
}

impl<'a> Searcher<'a> {
    pub fn new(model: &'a SearchModel, config: &'a SearchConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            model,
            config,
            pass1: Pass1::new(model, config),
            pass2: Pass2::new(model, config),
            cursor: Cursor::default(),
            results: Vec::new(),
        })
    }

    /// Forget the previous utterance
    pub fn reset(&mut self) {
        self.pass1.reset();
        self.cursor = Cursor::default();
        self.results.clear();
    }

    /// Decode every frame of `scorer` as one utterance
    pub fn decode<S: AcousticScorer + ?Sized>(
        &mut self,
        scorer: &S,
        cancel: &CancelFlag,
        sink: &mut dyn ResultSink,
    ) -> Result<Vec<SegmentResult>> {
        self.check_length(scorer.frame_count())?;
        self.reset();
        self.advance(scorer, cancel, sink)?;
        self.finish(scorer, cancel, sink)
    }

    /// Run Pass 1 over the frames of `scorer` not seen yet. Segments closed
    /// by a pause are decoded by Pass 2 right away.
    pub fn advance<S: AcousticScorer + ?Sized>(
        &mut self,
        scorer: &S,
        cancel: &CancelFlag,
        sink: &mut dyn ResultSink,
    ) -> Result<()> {
        while !self.cursor.done {
            let window = FrameWindow::from_offset(scorer, self.cursor.offset);
            if !self.cursor.begun {
                if window.frame_count() == 0 {
                    return Ok(());
                }
                self.cursor.begun = true;
                if let Some(status) = self.pass1.begin(&window, self.cursor.start) {
                    self.close_segment(scorer, status, cancel, sink)?;
                }
                continue;
            }

            let mut closed = false;
            while self.pass1.frames_processed() < window.frame_count() {
                if cancel.is_cancelled() {
                    let frame = self.pass1.frames_processed();
                    debug!("Pass 1 cancelled at frame {}", self.cursor.offset + frame);
                    self.close_segment(scorer, Pass1Status::Cancelled { frame }, cancel, sink)?;
                    closed = true;
                    break;
                }
                if let Some(status) = self.pass1.step(&window, sink) {
                    self.close_segment(scorer, status, cancel, sink)?;
                    closed = true;
                    break;
                }
            }
            if !closed {
                return Ok(());
            }
        }
        Ok(())
    }

    /// End of input: decode what is left and return every segment
    pub fn finish<S: AcousticScorer + ?Sized>(
        &mut self,
        scorer: &S,
        cancel: &CancelFlag,
        sink: &mut dyn ResultSink,
    ) -> Result<Vec<SegmentResult>> {
        // a cancelled utterance keeps whatever it decoded, however short
        if !self.cursor.done && !cancel.is_cancelled() {
            self.check_length(scorer.frame_count())?;
        }
        self.advance(scorer, cancel, sink)?;
        if self.cursor.begun && !self.cursor.done {
            let status = if cancel.is_cancelled() {
                Pass1Status::Cancelled {
                    frame: self.pass1.frames_processed(),
                }
            } else {
                Pass1Status::Completed
            };
            self.close_segment(scorer, status, cancel, sink)?;
        }
        self.cursor.done = true;
        Ok(std::mem::take(&mut self.results))
    }

    fn check_length(&self, frames: usize) -> Result<()> {
        if frames < self.config.min_frames {
            return Err(SearchError::InputTooShort {
                frames,
                minimum: self.config.min_frames,
            });
        }
        Ok(())
    }

    /// Finalize Pass 1 for the current segment, run Pass 2 on its trellis
    /// and move the cursor to the next segment
    fn close_segment<S: AcousticScorer + ?Sized>(
        &mut self,
        scorer: &S,
        status: Pass1Status,
        cancel: &CancelFlag,
        sink: &mut dyn ResultSink,
    ) -> Result<()> {
        let offset = self.cursor.offset;
        let window = FrameWindow::from_offset(scorer, offset);
        let outcome = self.pass1.finish(&window, status);
        sink.pass1_result(status, outcome.best.as_ref());

        let frames = self.pass1.trellis().frame_count();
        let segmented = matches!(status, Pass1Status::Segmented { .. });
        let anchors = match &outcome.best {
            Some(best) if self.config.segmentation.enabled => Anchors {
                last_word: if segmented { best.words.last().copied() } else { None },
                first_word: self.cursor.start.resume_word.and(best.words.first().copied()),
            },
            _ => Anchors::default(),
        };

        let segment_scores = FrameWindow::new(scorer, offset, frames);
        let pass2 = self
            .pass2
            .run(&segment_scores, self.pass1.trellis(), anchors, cancel)?;

        let (search_status, sentences) = if !pass2.sentences.is_empty() {
            (SearchStatus::Clean, pass2.sentences)
        } else if let Some(best) = &outcome.best {
            warn!(
                "Pass 2 found no sentence ({:?}), using the Pass 1 result",
                pass2.termination
            );
            (SearchStatus::Fallback, vec![fallback_sentence(best)])
        } else {
            warn!("Segment {} produced no result", self.cursor.index);
            (SearchStatus::Nothing, Vec::new())
        };

        let result = SegmentResult {
            index: self.cursor.index,
            start_frame: offset,
            frames,
            pass1_status: status,
            pass1: outcome.best,
            status: search_status,
            termination: Some(pass2.termination),
            sentences,
        };
        sink.segment(&result);
        self.results.push(result);

        match (status, outcome.next) {
            (Pass1Status::Segmented { resume_frame }, next) => {
                let resume = offset + resume_frame.max(1);
                info!(
                    "Segment {} closed at frame {}, resuming at {}",
                    self.cursor.index,
                    offset + frames,
                    resume
                );
                self.cursor = Cursor {
                    offset: resume,
                    start: next.unwrap_or_default(),
                    index: self.cursor.index + 1,
                    begun: false,
                    done: false,
                };
            }
            _ => self.cursor.done = true,
        }
        Ok(())
    }

    pub fn model(&self) -> &SearchModel {
        self.model
    }
}

fn fallback_sentence(best: &Pass1Result) -> Sentence {
    Sentence {
        words: best.words.clone(),
        score: best.score,
        am_score: best.score - best.lm_score,
        lm_score: best.lm_score,
        confidence: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acoustic::ScoreTable;
    use crate::result::{CollectingSink, NullSink};
    use crate::testing::{toy_model, toy_scores};

    #[test]
    fn test_decode_toy_utterance() {
        let model = toy_model();
        let config = SearchConfig::default().lm_weights(1.0, 0.0);
        let mut searcher = Searcher::new(&model, &config).unwrap();
        let mut sink = CollectingSink::default();
        let results = searcher.decode(&toy_scores(), &CancelFlag::new(), &mut sink).unwrap();

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].status, SearchStatus::Clean);
        assert_eq!(results[0].frames, 10);
        assert_eq!(model.vocab.outputs(&results[0].best().unwrap().words), vec!["yes"]);
        assert_eq!(sink.segments, results);
        assert_eq!(sink.pass1.len(), 1);
    }

    #[test]
    fn test_short_input_is_rejected() {
        let model = toy_model();
        let mut config = SearchConfig::default();
        config.min_frames = 20;
        let mut searcher = Searcher::new(&model, &config).unwrap();
        let err = searcher
            .decode(&toy_scores(), &CancelFlag::new(), &mut NullSink)
            .unwrap_err();
        assert!(matches!(err, SearchError::InputTooShort { frames: 10, minimum: 20 }));
    }

    #[test]
    fn test_incremental_matches_batch() {
        let model = toy_model();
        let config = SearchConfig::default().lm_weights(1.0, 0.0);
        let all = toy_scores();
        let mut searcher = Searcher::new(&model, &config).unwrap();
        let batch = searcher.decode(&all, &CancelFlag::new(), &mut NullSink).unwrap();

        searcher.reset();
        let mut growing = ScoreTable::new(all.state_count());
        let cancel = CancelFlag::new();
        for t in 0..all.frame_count() {
            growing.push_frame(all.row(t)).unwrap();
            searcher.advance(&growing, &cancel, &mut NullSink).unwrap();
        }
        let streamed = searcher.finish(&growing, &cancel, &mut NullSink).unwrap();
        assert_eq!(streamed, batch);
    }

    #[test]
    fn test_tiny_stack_falls_back_or_succeeds() {
        let model = toy_model();
        let mut config = SearchConfig::default().lm_weights(1.0, 0.0).stack_size(1);
        config.pass2.max_expansions = 1;
        let mut searcher = Searcher::new(&model, &config).unwrap();
        let results = searcher.decode(&toy_scores(), &CancelFlag::new(), &mut NullSink).unwrap();

        assert_eq!(results[0].status, SearchStatus::Fallback);
        let best = results[0].best().unwrap();
        let pass1 = results[0].pass1.as_ref().unwrap();
        assert_eq!(best.words, pass1.words);
        assert_eq!(best.score, pass1.score);
        assert_eq!(best.lm_score, pass1.lm_score);
        assert_eq!(model.vocab.outputs(&best.words), vec!["yes"]);
        assert!(best.confidence.is_none());
    }

    #[test]
    fn test_cancelled_stream_below_minimum_keeps_its_result() {
        let model = toy_model();
        let mut config = SearchConfig::default().lm_weights(1.0, 0.0);
        config.min_frames = 20;
        let all = toy_scores();
        let mut searcher = Searcher::new(&model, &config).unwrap();

        let mut growing = ScoreTable::new(all.state_count());
        let cancel = CancelFlag::new();
        for t in 0..2 {
            growing.push_frame(all.row(t)).unwrap();
            searcher.advance(&growing, &cancel, &mut NullSink).unwrap();
        }
        cancel.cancel();
        growing.push_frame(all.row(2)).unwrap();
        searcher.advance(&growing, &cancel, &mut NullSink).unwrap();
        let results = searcher.finish(&growing, &cancel, &mut NullSink).unwrap();

        assert_eq!(results.len(), 1);
        assert!(matches!(results[0].pass1_status, Pass1Status::Cancelled { .. }));
        assert!(results[0].frames <= 3);
    }
}

//! First pass: frame-synchronous beam search over the lexicon tree
//!
//! Produces the word trellis and a best path. Tokens live on tree nodes;
//! when a token leaves a word-end node the word end is stored as a trellis
//! atom and the token re-enters the tree at every root with the LM score
//! factored in. Cross-word phone context is ignored here (word boundary
//! phones use pseudo models); Pass 2 handles it exactly.
//!
//! The engine can be driven in one call ([`Pass1::run`]) or frame by frame
//! ([`Pass1::begin`], [`Pass1::step`], [`Pass1::finish`]) for streaming input.

mod factoring;
mod segment;
mod token;

pub use factoring::Factoring;
pub use segment::{PauseDetector, SegmentBreak};
pub use token::{Token, TokenSpace};

use tracing::{debug, trace, warn};

use crate::acoustic::AcousticScorer;
use crate::config::{FactoringMode, SearchConfig};
use crate::model::SearchModel;
use crate::result::{Pass1Result, Pass1Status, ResultSink};
use crate::trellis::{AtomId, TrellisAtom, WordTrellis};
use crate::types::{is_log_zero, CancelFlag, LogProb, WordId};

/// How a segment starts: fresh, or resumed after a short-pause break
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SegmentStart {
    /// Only this word may begin the segment (the pause word of the break)
    pub resume_word: Option<WordId>,
    /// LM context carried over from the previous segment
    pub context: Option<WordId>,
}

/// Result of one Pass 1 run
#[derive(Debug, Clone, PartialEq)]
pub struct Pass1Outcome {
    pub status: Pass1Status,
    pub best: Option<Pass1Result>,
    /// Start of the next segment after a segmentation break
    pub next: Option<SegmentStart>,
}

/// A word end seen at the previous frame, waiting to re-enter the tree
#[derive(Debug, Clone, Copy)]
struct WordExit {
    score: LogProb,
    atom: AtomId,
    context: Option<WordId>,
    word: WordId,
}

pub struct Pass1<'a> {
    model: &'a SearchModel,
    config: &'a SearchConfig,
    tokens: TokenSpace,
    trellis: WordTrellis,
    factoring: Factoring,
    pause: Option<PauseDetector>,
    start: SegmentStart,
    /// Frames processed so far
    frame: usize,
    seg_break: Option<SegmentBreak>,
    exits: Vec<WordExit>,
}

impl<'a> Pass1<'a> {
    pub fn new(model: &'a SearchModel, config: &'a SearchConfig) -> Self {
        let p1 = &config.pass1;
        let pause = config
            .segmentation
            .enabled
            .then(|| PauseDetector::new(config.segmentation.min_pause_frames));
        Self {
            model,
            config,
            tokens: TokenSpace::new(model.tree.len(), p1.beam_width, p1.token_mode, p1.word_pair_limit),
            trellis: WordTrellis::new(),
            factoring: Factoring::new(&model.tree, model.lm(), p1),
            pause,
            start: SegmentStart::default(),
            frame: 0,
            seg_break: None,
            exits: Vec::new(),
        }
    }

    /// Forget the previous utterance or segment, keeping allocations
    pub fn reset(&mut self) {
        self.tokens.clear();
        self.trellis.reset();
        self.factoring.clear();
        if let Some(pause) = &mut self.pause {
            pause.reset();
        }
        self.start = SegmentStart::default();
        self.frame = 0;
        self.seg_break = None;
        self.exits.clear();
    }

    /// Number of frames processed so far
    pub fn frames_processed(&self) -> usize {
        self.frame
    }

    /// The word trellis (finalized once [`Pass1::finish`] returned)
    pub fn trellis(&self) -> &WordTrellis {
        &self.trellis
    }

    /// Run the whole pass over every frame of `scorer`
    pub fn run<S: AcousticScorer + ?Sized>(
        &mut self,
        scorer: &S,
        start: SegmentStart,
        cancel: &CancelFlag,
        sink: &mut dyn ResultSink,
    ) -> Pass1Outcome {
        self.reset();
        if let Some(status) = self.begin(scorer, start) {
            return self.finish(scorer, status);
        }
        while self.frame < scorer.frame_count() {
            if cancel.is_cancelled() {
                debug!("Pass 1 cancelled at frame {}", self.frame);
                return self.finish(scorer, Pass1Status::Cancelled { frame: self.frame });
            }
            if let Some(status) = self.step(scorer, sink) {
                return self.finish(scorer, status);
            }
        }
        self.finish(scorer, Pass1Status::Completed)
    }

    /// Set up the initial tokens on frame 0.
    /// Returns a status when the search cannot go on.
    pub fn begin<S: AcousticScorer + ?Sized>(&mut self, scorer: &S, start: SegmentStart) -> Option<Pass1Status> {
        self.reset();
        self.start = start;
        if scorer.frame_count() == 0 {
            return Some(Pass1Status::Failed { frame: 0 });
        }

        let model = self.model;
        let lm = model.lm();
        let words = match start.resume_word {
            Some(w) => vec![w],
            None => lm.start_words(),
        };

        for w in words {
            let node = model.tree.start_node(w);
            let mut lscore = self.factoring.score(&model.tree, lm, node, start.context);
            if is_log_zero(lscore) {
                if start.resume_word.is_none() {
                    continue;
                }
                // the pause word always restarts a resumed segment
                lscore = self.config.pass1.lm_penalty;
            }
            let score = lscore + model.hmms.score(scorer, 0, model.tree.output(node));
            self.tokens
                .propagate(Token::new(node, score, None, start.context, lscore, None));
        }

        self.frame = 1;
        if self.tokens.prune(self.config.pass1.beam_width) == 0 {
            warn!("Pass 1: no initial token survived");
            return Some(Pass1Status::Failed { frame: 0 });
        }
        None
    }

    /// Process the next frame. Returns a status when the pass must stop
    /// before the end of input.
    pub fn step<S: AcousticScorer + ?Sized>(&mut self, scorer: &S, sink: &mut dyn ResultSink) -> Option<Pass1Status> {
        let t = self.frame;
        let model = self.model;
        let tree = &model.tree;
        let lm = model.lm();

        self.tokens.swap();

        // word ends of the previous frame become trellis atoms
        self.exits.clear();
        let mut best_atom: Option<AtomId> = None;
        for i in 0..self.tokens.previous().len() {
            let tk = self.tokens.previous()[i];
            let Some(word) = tree.word_end_of(tk.node) else {
                continue;
            };
            let id = self.store_atom(scorer, &tk, word, t - 1);
            if best_atom.map_or(true, |b| self.trellis.atom(b).backscore < tk.score) {
                best_atom = Some(id);
            }
            let context = if model.vocab.is_transparent(word) {
                tk.last_cword
            } else {
                Some(word)
            };
            self.exits.push(WordExit {
                score: tk.score + tree.wordend_exit(word),
                atom: id,
                context,
                word,
            });
        }

        if let Some(pause) = &mut self.pause {
            let best_word = best_atom.map(|id| self.trellis.atom(id).word);
            let is_pause = best_word.map_or(true, |w| model.vocab.is_silence(w));
            if let Some(brk) = pause.observe(t - 1, best_word, is_pause) {
                debug!(
                    "Pause of frames {}..{} ends the segment",
                    brk.pause_start, brk.end
                );
                self.seg_break = Some(brk);
                return Some(Pass1Status::Segmented {
                    resume_frame: brk.pause_start,
                });
            }
        }

        // transitions inside the tree
        for i in 0..self.tokens.previous().len() {
            let tk = self.tokens.previous()[i];
            for &(next, a) in tree.arcs(tk.node) {
                let mut cand = tk;
                cand.node = next;
                cand.score = tk.score + a;
                if next != tk.node && tree.factoring_id(next).is_some() {
                    let l = self.factoring.score(tree, lm, next, tk.last_cword);
                    if is_log_zero(l) {
                        continue;
                    }
                    cand.score += l - tk.last_lscore;
                    cand.last_lscore = l;
                }
                self.tokens.propagate(cand);
            }
        }

        // cross-word transitions into the roots
        let unigram = self.config.pass1.factoring == FactoringMode::Unigram;
        let mut best_exit: Option<WordExit> = None;
        for e in 0..self.exits.len() {
            let exit = self.exits[e];
            if unigram && best_exit.map_or(true, |b| b.score < exit.score) {
                best_exit = Some(exit);
            }
            for &root in tree.roots() {
                if unigram && !self.factoring.is_context_dependent(tree, root) {
                    continue;
                }
                self.enter_root(root, &exit);
            }
        }
        if let Some(exit) = best_exit {
            for &root in tree.roots() {
                if !self.factoring.is_context_dependent(tree, root) {
                    self.enter_root(root, &exit);
                }
            }
        }

        for tk in self.tokens.current_mut() {
            tk.score += model.hmms.score(scorer, t, tree.output(tk.node));
        }

        self.frame = t + 1;
        let survivors = self.tokens.prune(self.config.pass1.beam_width);
        trace!("frame {}: {} tokens, {} word ends", t, survivors, self.exits.len());
        if survivors == 0 {
            warn!("Pass 1: search failed at frame {}", t);
            return Some(Pass1Status::Failed { frame: t });
        }

        let interval = self.config.pass1.progress_interval;
        if interval > 0 && t % interval == 0 {
            if let Some(best) = self.tokens.best() {
                let words: Vec<WordId> = best
                    .last_tre
                    .map(|id| {
                        self.trellis
                            .chain(id)
                            .into_iter()
                            .map(|a| self.trellis.atom(a).word)
                            .collect()
                    })
                    .unwrap_or_default();
                sink.pass1_progress(t, &words, best.score);
            }
        }
        None
    }

    fn enter_root(&mut self, root: usize, exit: &WordExit) {
        let model = self.model;
        let l = self
            .factoring
            .score(&model.tree, model.lm(), root, exit.context);
        if is_log_zero(l) {
            return;
        }
        self.tokens.propagate(Token::new(
            root,
            exit.score + l,
            Some(exit.atom),
            exit.context,
            l,
            Some(exit.word),
        ));
    }

    fn store_atom<S: AcousticScorer + ?Sized>(&mut self, scorer: &S, tk: &Token, word: WordId, end: usize) -> AtomId {
        let model = self.model;
        let begin = tk.last_tre.map_or(0, |id| self.trellis.atom(id).end + 1);
        self.trellis.store(TrellisAtom {
            word,
            backscore: tk.score,
            tail_score: model.hmms.score(scorer, end, model.tree.output(tk.node)),
            lscore: tk.last_lscore,
            begin,
            end,
            last: tk.last_tre,
        })
    }

    /// Close the trellis and extract the best path
    pub fn finish<S: AcousticScorer + ?Sized>(&mut self, scorer: &S, status: Pass1Status) -> Pass1Outcome {
        match status {
            Pass1Status::Segmented { .. } => {
                if let Some(brk) = self.seg_break {
                    self.trellis.truncate(brk.end);
                }
            }
            Pass1Status::Failed { frame } => self.trellis.set_frame_count(frame),
            Pass1Status::Completed | Pass1Status::Cancelled { .. } => {
                let last = self.frame.saturating_sub(1);
                for i in 0..self.tokens.current().len() {
                    let tk = self.tokens.current()[i];
                    if let Some(word) = self.model.tree.word_end_of(tk.node) {
                        self.store_atom(scorer, &tk, word, last);
                    }
                }
                self.trellis.set_frame_count(self.frame);
            }
        }
        self.trellis.finalize();

        let best = self.best_path();
        debug!(
            "Pass 1 {:?}: {} atoms over {} frames",
            status,
            self.trellis.len(),
            self.trellis.frame_count()
        );

        let next = match (status, self.seg_break) {
            (Pass1Status::Segmented { .. }, Some(brk)) => Some(SegmentStart {
                resume_word: brk.resume_word,
                context: best
                    .as_ref()
                    .and_then(|b| self.last_context_word(&b.words))
                    .or(self.start.context),
            }),
            _ => None,
        };

        Pass1Outcome { status, best, next }
    }

    /// Best path ending at the latest frame that has word ends, preferring
    /// words that may end a sentence
    fn best_path(&self) -> Option<Pass1Result> {
        let lm = self.model.lm();
        let trellis = &self.trellis;
        let better = |best: Option<AtomId>, id: AtomId| match best {
            Some(b) if trellis.atom(b).backscore >= trellis.atom(id).backscore => Some(b),
            _ => Some(id),
        };

        for t in (0..trellis.frame_count()).rev() {
            let ids = trellis.atoms_ending_at(t);
            if ids.is_empty() {
                continue;
            }
            let pick = ids
                .iter()
                .copied()
                .filter(|&id| lm.can_end(trellis.atom(id).word))
                .fold(None, better)
                .or_else(|| ids.iter().copied().fold(None, better))?;

            let chain = trellis.chain(pick);
            let atom = trellis.atom(pick);
            return Some(Pass1Result {
                words: chain.iter().map(|&id| trellis.atom(id).word).collect(),
                score: atom.backscore,
                lm_score: chain.iter().map(|&id| trellis.atom(id).lscore).sum(),
                end_frame: t,
            });
        }
        None
    }

    fn last_context_word(&self, words: &[WordId]) -> Option<WordId> {
        let vocab = &self.model.vocab;
        words
            .iter()
            .rev()
            .copied()
            .find(|&w| !vocab.is_silence(w) && !vocab.is_transparent(w))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TokenMode;
    use crate::result::{CollectingSink, NullSink};
    use crate::testing::{toy_model, toy_scores};

    #[test]
    fn test_toy_best_path() {
        let model = toy_model();
        let config = SearchConfig::default().lm_weights(1.0, 0.0);
        let scores = toy_scores();
        let mut pass1 = Pass1::new(&model, &config);
        let outcome = pass1.run(&scores, SegmentStart::default(), &CancelFlag::new(), &mut NullSink);

        assert_eq!(outcome.status, Pass1Status::Completed);
        let best = outcome.best.unwrap();
        assert_eq!(model.vocab.outputs(&best.words), vec!["yes"]);
        assert_eq!(best.end_frame, 9);
        assert!((best.lm_score - -0.3).abs() < 1e-5);
        assert!(pass1.trellis().is_finalized());
        assert_eq!(pass1.trellis().frame_count(), 10);
    }

    #[test]
    fn test_atoms_are_consistent() {
        let model = toy_model();
        let config = SearchConfig::default().lm_weights(1.0, 0.0);
        let scores = toy_scores();
        let mut pass1 = Pass1::new(&model, &config);
        pass1.run(&scores, SegmentStart::default(), &CancelFlag::new(), &mut NullSink);

        let trellis = pass1.trellis();
        assert!(!trellis.is_empty());
        for atom in trellis.atoms() {
            assert!(atom.begin <= atom.end);
            assert!(atom.end < trellis.frame_count());
            if let Some(prev) = atom.last {
                assert_eq!(trellis.atom(prev).end + 1, atom.begin);
            } else {
                assert_eq!(atom.begin, 0);
            }
        }
    }

    #[test]
    fn test_beam_width_one_still_finds_path() {
        let model = toy_model();
        let config = SearchConfig::default().lm_weights(1.0, 0.0).beam_width(1);
        let mut pass1 = Pass1::new(&model, &config);
        let outcome = pass1.run(&toy_scores(), SegmentStart::default(), &CancelFlag::new(), &mut NullSink);
        assert_eq!(model.vocab.outputs(&outcome.best.unwrap().words), vec!["yes"]);
    }

    #[test]
    fn test_cancel_before_start() {
        let model = toy_model();
        let config = SearchConfig::default();
        let cancel = CancelFlag::new();
        cancel.cancel();
        let mut pass1 = Pass1::new(&model, &config);
        let outcome = pass1.run(&toy_scores(), SegmentStart::default(), &cancel, &mut NullSink);
        assert_eq!(outcome.status, Pass1Status::Cancelled { frame: 1 });
        assert_eq!(pass1.trellis().frame_count(), 1);
    }

    #[test]
    fn test_progress_reports() {
        let model = toy_model();
        let mut config = SearchConfig::default();
        config.pass1.progress_interval = 4;
        let mut sink = CollectingSink::default();
        let mut pass1 = Pass1::new(&model, &config);
        pass1.run(&toy_scores(), SegmentStart::default(), &CancelFlag::new(), &mut sink);
        let frames: Vec<usize> = sink.progress.iter().map(|p| p.0).collect();
        assert_eq!(frames, vec![4, 8]);
    }

    #[test]
    fn test_word_pair_mode_runs() {
        let model = toy_model();
        let mut config = SearchConfig::default().lm_weights(1.0, 0.0);
        config.pass1.token_mode = TokenMode::WordPair;
        config.pass1.factoring = FactoringMode::Unigram;
        let mut pass1 = Pass1::new(&model, &config);
        let outcome = pass1.run(&toy_scores(), SegmentStart::default(), &CancelFlag::new(), &mut NullSink);
        assert_eq!(model.vocab.outputs(&outcome.best.unwrap().words), vec!["yes"]);
    }
}

//! Second pass: best-first stack decoding backward in time
//!
//! Hypotheses grow from the end of the utterance toward its beginning.
//! The score of a hypothesis is its exact backward score (cross-word
//! context, full LM) plus the Pass 1 forward score of the remaining prefix
//! read from the word trellis. The trellis score is an optimistic estimate
//! (Pass 1 used LM factoring and pseudo boundary phones), so complete
//! sentences come off the stack best first.

mod confidence;
mod envelope;
mod hypothesis;
mod nextword;
mod scan;
mod stack;

pub use confidence::{nbest_confidence, posteriors};
pub use envelope::{ScoreEnvelope, WordEnvelope};
pub use hypothesis::{HypId, Hypothesis, HypothesisPool};
pub use nextword::{Candidate, LmWeights, NextWords};
pub use scan::Scanner;
pub use stack::{HypothesisStack, Push};

use std::collections::{HashMap, HashSet};

use tracing::{debug, trace};

use crate::acoustic::AcousticScorer;
use crate::config::{ConfidenceMode, CrossWordMode, SearchConfig};
use crate::error::Result;
use crate::model::SearchModel;
use crate::result::{Sentence, Termination};
use crate::trellis::WordTrellis;
use crate::types::{add_scores, is_log_zero, CancelFlag, LogProb, WordId, LOG_ZERO};

/// Words that pin a segment's sentence ends
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Anchors {
    /// Word every sentence must end with (start of the backward search)
    pub last_word: Option<WordId>,
    /// Word every sentence must begin with
    pub first_word: Option<WordId>,
}

/// Result of one Pass 2 run
#[derive(Debug, Clone, PartialEq)]
pub struct Pass2Outcome {
    pub termination: Termination,
    /// Sorted best first
    pub sentences: Vec<Sentence>,
    /// Hypotheses popped and expanded
    pub pops: usize,
    /// Hypotheses generated
    pub generated: usize,
}

pub struct Pass2<'a> {
    model: &'a SearchModel,
    config: &'a SearchConfig,
    pool: HypothesisPool,
    stack: HypothesisStack,
    word_envelope: WordEnvelope,
    score_envelope: ScoreEnvelope,
    scanner: Scanner,
    candidates: Vec<Candidate>,
    behind_pause: Vec<Candidate>,
    local: Vec<HypId>,
    rescored: HashMap<(HypId, String), Vec<LogProb>>,
    frames: usize,
}

impl<'a> Pass2<'a> {
    pub fn new(model: &'a SearchModel, config: &'a SearchConfig) -> Self {
        let p2 = &config.pass2;
        Self {
            model,
            config,
            pool: HypothesisPool::new(),
            stack: HypothesisStack::new(p2.stack_size),
            word_envelope: WordEnvelope::new(p2.envelope_width),
            score_envelope: ScoreEnvelope::new(p2.scan_beam),
            scanner: Scanner::new(),
            candidates: Vec::new(),
            behind_pause: Vec::new(),
            local: Vec::new(),
            rescored: HashMap::new(),
            frames: 0,
        }
    }

    fn context_dependent(&self) -> bool {
        self.model.hmms.is_context_dependent()
    }

    fn backscan(&self) -> bool {
        self.context_dependent() && self.config.pass2.crossword == CrossWordMode::Backscan
    }

    fn next_words<'t>(&self, trellis: &'t WordTrellis) -> NextWords<'t>
    where
        'a: 't,
    {
        NextWords {
            trellis,
            lm: self.model.lm(),
            vocab: &self.model.vocab,
            weights: LmWeights::from_config(&self.config.pass2),
            range: self.config.pass2.lookup_range,
        }
    }

    /// Search the N best sentences over `trellis` (finalized by Pass 1)
    pub fn run<S: AcousticScorer + ?Sized>(
        &mut self,
        scorer: &S,
        trellis: &WordTrellis,
        anchors: Anchors,
        cancel: &CancelFlag,
    ) -> Result<Pass2Outcome> {
        let frames = trellis.frame_count();
        self.frames = frames;
        self.pool.reset(frames);
        self.stack.drain().for_each(drop);
        self.word_envelope.reset();
        self.score_envelope.reset(frames);

        let mut outcome = Pass2Outcome {
            termination: Termination::Exhausted,
            sentences: Vec::new(),
            pops: 0,
            generated: 0,
        };
        if frames == 0 {
            return Ok(outcome);
        }

        // initial hypotheses
        let mut first = std::mem::take(&mut self.candidates);
        self.next_words(trellis).first(anchors.last_word, &mut first);
        self.local.clear();
        for cand in &first {
            let id = self.start_hypothesis(scorer, trellis, cand)?;
            if is_log_zero(self.pool.get(id).score) {
                self.pool.release(id);
                continue;
            }
            self.local.push(id);
        }
        self.candidates = first;
        outcome.generated += self.local.len();
        self.push_local();
        debug!("Pass 2: {} initial hypotheses", self.stack.len());

        let nbest = self.config.pass2.nbest;
        let mut found: Vec<HypId> = Vec::new();
        let mut last_score: Option<LogProb> = None;

        loop {
            if cancel.is_cancelled() {
                outcome.termination = Termination::Cancelled;
                break;
            }
            let Some(id) = self.stack.pop() else {
                outcome.termination = Termination::Exhausted;
                break;
            };
            let (score, len, endflag) = {
                let h = self.pool.get(id);
                (h.score, h.words.len(), h.endflag)
            };
            if is_log_zero(score) || !self.word_envelope.admit(len) {
                self.pool.release(id);
                continue;
            }
            outcome.pops += 1;

            if endflag {
                if last_score == Some(score) {
                    self.pool.release(id);
                    continue;
                }
                last_score = Some(score);
                trace!("sentence {} found, score {:.3}", found.len() + 1, score);
                found.push(id);
                if found.len() >= nbest {
                    outcome.termination = Termination::Found;
                    break;
                }
                continue;
            }

            if outcome.pops >= self.config.pass2.max_expansions {
                debug!("Pass 2: expansion limit of {} reached", outcome.pops);
                self.pool.release(id);
                outcome.termination = Termination::Overflow;
                break;
            }

            self.scan(scorer, id)?;
            self.score_envelope.update(&self.pool.get(id).g);

            if self.acceptable(id, anchors) {
                let end = self.pool.duplicate(id);
                let h = self.pool.get_mut(end);
                h.endflag = true;
                h.score = h.g[0];
                if !is_log_zero(h.score) {
                    self.push(end);
                } else {
                    self.pool.release(end);
                }
            }

            let mut cands = std::mem::take(&mut self.candidates);
            let mut behind = std::mem::take(&mut self.behind_pause);
            self.next_words(trellis).collect(self.pool.get(id), &mut cands);
            self.rescored.clear();
            self.local.clear();

            let noise = match self.model.lm().pause_word(self.pool.get(id).lm_state) {
                Some(pause) => self.pause_extended(scorer, trellis, id, pause)?,
                None => None,
            };
            behind.clear();
            if let Some(noise) = noise {
                self.next_words(trellis).collect(self.pool.get(noise), &mut behind);
            }

            // without cross-word context the noise hypothesis also carries
            // the direct route, so pausable words grow from it alone
            let merged = !self.context_dependent();
            let mut via_noise = HashSet::new();
            if let Some(noise) = noise {
                for cand in behind.iter().filter(|c| c.pause) {
                    via_noise.insert(cand.word);
                    self.grow(scorer, trellis, noise, cand)?;
                }
            }
            for cand in &cands {
                let parent = match noise {
                    Some(noise) if merged && cand.pause => {
                        if via_noise.contains(&cand.word) {
                            continue;
                        }
                        noise
                    }
                    _ => id,
                };
                self.grow(scorer, trellis, parent, cand)?;
            }
            if let Some(noise) = noise {
                self.pool.release(noise);
            }
            self.candidates = cands;
            self.behind_pause = behind;
            outcome.generated += self.local.len();
            self.push_local();
            self.pool.release(id);
        }

        outcome.sentences = self.sentences(&found);
        let leftover: Vec<HypId> = self.stack.drain().collect();
        for id in leftover.into_iter().chain(found) {
            self.pool.release(id);
        }

        debug!(
            "Pass 2 {:?}: {} sentences, {} pops, {} generated",
            outcome.termination,
            outcome.sentences.len(),
            outcome.pops,
            outcome.generated
        );
        Ok(outcome)
    }

    fn push(&mut self, id: HypId) {
        let score = self.pool.get(id).score;
        match self.stack.push(id, score) {
            Push::Stored => {}
            Push::Evicted(worst) => self.pool.release(worst),
            Push::Rejected => self.pool.release(id),
        }
    }

    /// Push the hypotheses generated by one expansion, scoring the local
    /// confidence of their newest word first
    fn push_local(&mut self) {
        let local = std::mem::take(&mut self.local);
        if self.config.confidence.mode == ConfidenceMode::Search {
            let scores: Vec<LogProb> = local.iter().map(|&id| self.pool.get(id).score).collect();
            let post = posteriors(&scores, self.config.confidence.alpha);
            for (&id, p) in local.iter().zip(post) {
                if let Some(cm) = self.pool.get_mut(id).confidence.last_mut() {
                    *cm = p;
                }
            }
        }
        for &id in &local {
            self.push(id);
        }
        self.local = local;
        self.local.clear();
    }

    fn acceptable(&self, id: HypId, anchors: Anchors) -> bool {
        let h = self.pool.get(id);
        if h.estimated_next_t > self.config.pass2.accept_margin {
            return false;
        }
        if let Some(first) = anchors.first_word {
            if h.newest_word() != Some(first) {
                return false;
            }
        }
        self.model.lm().is_acceptable(&h.words, h.lm_state)
    }

    fn scan<S: AcousticScorer + ?Sized>(&mut self, scorer: &S, id: HypId) -> Result<()> {
        let backscan = self.backscan();
        let model = self.model;
        let h = self.pool.get_mut(id);
        let Some(w) = h.newest_word() else {
            return Ok(());
        };
        self.scanner.scan(
            &model.hmms,
            scorer,
            model.vocab.word(w),
            h,
            backscan,
            &self.score_envelope,
        )
    }

    /// Hypothesis made of the single sentence-final word `cand`
    fn start_hypothesis<S: AcousticScorer + ?Sized>(
        &mut self,
        scorer: &S,
        trellis: &WordTrellis,
        cand: &Candidate,
    ) -> Result<HypId> {
        let model = self.model;
        let last = self.frames - 1;
        let word = model.vocab.word(cand.word);
        let tail = self.scanner.tail_model(&model.hmms, word, None)?;
        let tail_out = tail.outputs.last().cloned();

        let id = self.pool.alloc();
        let h = self.pool.get_mut(id);
        h.words.push(cand.word);
        h.confidence.push(1.0);
        h.lm_state = cand.state;
        h.lscore = cand.lscore;
        h.total_lscore = cand.lscore;
        h.g[last] = cand.lscore;

        let atom = trellis.atom(cand.atom);
        if let Some(out) = tail_out {
            h.score = cand.lscore
                + model.hmms.score(scorer, last, &out)
                + atom.connection_score();
        }
        h.bestt = last as i32;
        h.estimated_next_t = atom.begin as i32 - 1;
        h.tre = Some(cand.atom);
        Ok(id)
    }

    /// Expand `from` by `cand`, keeping the result if it scored
    fn grow<S: AcousticScorer + ?Sized>(
        &mut self,
        scorer: &S,
        trellis: &WordTrellis,
        from: HypId,
        cand: &Candidate,
    ) -> Result<()> {
        let new = self.expand(scorer, trellis, from, cand)?;
        if is_log_zero(self.pool.get(new).score) {
            self.pool.release(new);
        } else {
            self.local.push(new);
        }
        Ok(())
    }

    /// `from` with the short pause `pause` scanned before it.
    ///
    /// The result keeps `from`'s words and LM scores, but its frontier and
    /// backward scores are those of the pause. Without cross-word context
    /// its scores are the better of pausing and not pausing at each frame.
    /// None when the pause is not in the trellis near `from`'s frontier.
    fn pause_extended<S: AcousticScorer + ?Sized>(
        &mut self,
        scorer: &S,
        trellis: &WordTrellis,
        from: HypId,
        pause: WordId,
    ) -> Result<Option<HypId>> {
        let Some(atom) = self.next_words(trellis).locate(pause, self.pool.get(from)) else {
            return Ok(None);
        };
        let cand = Candidate {
            word: pause,
            atom,
            lscore: LmWeights::from_config(&self.config.pass2).apply(0.0),
            state: self.pool.get(from).lm_state,
            pause: false,
        };
        let noise = self.expand(scorer, trellis, from, &cand)?;
        if is_log_zero(self.pool.get(noise).score) {
            self.pool.release(noise);
            return Ok(None);
        }
        self.scan(scorer, noise)?;

        let merged = !self.context_dependent();
        let (parent, h) = self.pool.pair_mut(from, noise);
        if merged {
            for (g, &direct) in h.g.iter_mut().zip(&parent.g) {
                *g = g.max(direct);
            }
        }
        h.words.pop();
        h.confidence.pop();
        h.lscore = parent.lscore;
        h.total_lscore = parent.total_lscore;
        trace!("pause before {:?} reaches frame {}", parent.newest_word(), h.estimated_next_t);
        Ok(Some(noise))
    }

    /// New hypothesis: `cand` placed before the scanned hypothesis `from`
    fn expand<S: AcousticScorer + ?Sized>(
        &mut self,
        scorer: &S,
        trellis: &WordTrellis,
        from: HypId,
        cand: &Candidate,
    ) -> Result<HypId> {
        let model = self.model;
        let frames = self.frames;
        let word = model.vocab.word(cand.word);
        let ccd = self.context_dependent();
        let nextscan = ccd && self.config.pass2.crossword == CrossWordMode::Nextscan;

        let follower = if ccd { self.pool.get(from).last_ph.clone() } else { None };
        let right = follower.as_ref().map(|p| p.center.as_str());
        let tail = self.scanner.tail_model(&model.hmms, word, right)?;
        let a_value = model.hmms.transitions(&tail).exit_prob();
        let tail_out = tail.outputs.last().cloned();

        // suffix score at the boundary, with the follower's head fixed now
        // when resolving at expansion time
        let corrected = match (&follower, nextscan) {
            (Some(head), true) => {
                let key = (from, word.tail_phone().to_string());
                if !self.rescored.contains_key(&key) {
                    let mut buf = Vec::new();
                    self.scanner.rescore_head(
                        &model.hmms,
                        scorer,
                        head,
                        word.tail_phone(),
                        &self.pool.get(from).g_prev,
                        &mut buf,
                    )?;
                    self.rescored.insert(key.clone(), buf);
                }
                Some(key)
            }
            _ => None,
        };

        let id = self.pool.alloc();
        let (parent, child) = self.pool.pair_mut(from, id);
        let base: &[LogProb] = match &corrected {
            Some(key) => self.rescored.get(key).map(Vec::as_slice).unwrap_or(&parent.g),
            None => &parent.g,
        };

        child.words.extend_from_slice(&parent.words);
        child.words.push(cand.word);
        child.confidence.extend_from_slice(&parent.confidence);
        child.confidence.push(1.0);
        child.lm_state = cand.state;
        child.lscore = cand.lscore;
        child.total_lscore = parent.total_lscore + cand.lscore;
        child.last_ph = follower;
        if ccd && !nextscan {
            child.g_prev.copy_from_slice(&parent.g_prev);
        }
        for t in 0..frames - 1 {
            child.g[t] = add_scores(base[t + 1], a_value + cand.lscore);
        }
        child.g[frames - 1] = LOG_ZERO;

        // best connection frame around the candidate's trellis position
        let Some(tail_out) = tail_out else {
            return Ok(id);
        };
        let consider = |t: usize, child: &mut Hypothesis| -> bool {
            let Some(atom_id) = trellis.lookup(t, cand.word) else {
                return false;
            };
            let atom = trellis.atom(atom_id);
            let total = child.g[t] + model.hmms.score(scorer, t, &tail_out) + atom.connection_score();
            if !is_log_zero(child.g[t]) && total > child.score {
                child.score = total;
                child.bestt = t as i32;
                child.estimated_next_t = atom.begin as i32 - 1;
                child.tre = Some(atom_id);
            }
            true
        };

        let anchor_end = trellis.atom(cand.atom).end;
        for t in (0..=anchor_end).rev() {
            if !consider(t, child) {
                break;
            }
        }
        for t in anchor_end + 1..frames.saturating_sub(1) {
            if !consider(t, child) {
                break;
            }
        }
        Ok(id)
    }

    /// Convert found hypotheses into sentences, best first
    fn sentences(&self, found: &[HypId]) -> Vec<Sentence> {
        let mut sentences: Vec<Sentence> = found
            .iter()
            .map(|&id| {
                let h = self.pool.get(id);
                let confidence = match self.config.confidence.mode {
                    ConfidenceMode::Search => Some(h.confidence.iter().rev().copied().collect()),
                    _ => None,
                };
                Sentence {
                    words: h.time_order(),
                    score: h.score,
                    am_score: h.score - h.total_lscore,
                    lm_score: h.total_lscore,
                    confidence,
                }
            })
            .collect();
        sentences.sort_by(|a, b| b.score.total_cmp(&a.score));

        if self.config.confidence.mode == ConfidenceMode::Nbest {
            let input: Vec<(&[WordId], LogProb)> = sentences
                .iter()
                .map(|s| (s.words.as_slice(), s.score))
                .collect();
            let cms = nbest_confidence(&input, self.config.confidence.alpha);
            for (sentence, cm) in sentences.iter_mut().zip(cms) {
                sentence.confidence = Some(cm);
            }
        }
        sentences
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pass1::{Pass1, SegmentStart};
    use crate::result::NullSink;
    use crate::testing::{toy_model, toy_scores};
    use approx::assert_relative_eq;

    fn trellis_for(model: &SearchModel, config: &SearchConfig) -> WordTrellis {
        let mut pass1 = Pass1::new(model, config);
        pass1.run(&toy_scores(), SegmentStart::default(), &CancelFlag::new(), &mut NullSink);
        pass1.trellis().clone()
    }

    #[test]
    fn test_toy_sentence_score() {
        let model = toy_model();
        let config = SearchConfig::default().lm_weights(1.0, 0.0);
        let trellis = trellis_for(&model, &config);

        let mut pass2 = Pass2::new(&model, &config);
        let outcome = pass2
            .run(&toy_scores(), &trellis, Anchors::default(), &CancelFlag::new())
            .unwrap();

        assert_eq!(outcome.termination, Termination::Found);
        let best = &outcome.sentences[0];
        assert_eq!(model.vocab.outputs(&best.words), vec!["yes"]);
        // ten frames of "y" at -1, nine self loops at 0.5
        let expected = -0.3 - 10.0 + 9.0 * 0.5f32.ln();
        assert_relative_eq!(best.score, expected, epsilon = 1e-4);
        assert_relative_eq!(best.lm_score, -0.3, epsilon = 1e-6);
        assert_relative_eq!(best.am_score + best.lm_score, best.score, epsilon = 1e-4);
        assert!(best.confidence.is_none());
    }

    #[test]
    fn test_nbest_sorted_with_confidence() {
        let model = toy_model();
        let config = SearchConfig::default()
            .lm_weights(1.0, 0.0)
            .nbest(3)
            .confidence(ConfidenceMode::Search, 0.05);
        let trellis = trellis_for(&model, &config);

        let mut pass2 = Pass2::new(&model, &config);
        let outcome = pass2
            .run(&toy_scores(), &trellis, Anchors::default(), &CancelFlag::new())
            .unwrap();

        assert!(!outcome.sentences.is_empty());
        assert_eq!(model.vocab.outputs(&outcome.sentences[0].words), vec!["yes"]);
        for pair in outcome.sentences.windows(2) {
            assert!(pair[0].score > pair[1].score);
        }
        for sentence in &outcome.sentences {
            let cm = sentence.confidence.as_ref().unwrap();
            assert_eq!(cm.len(), sentence.words.len());
            assert!(cm.iter().all(|&c| c > 0.0 && c <= 1.0 + 1e-6));
        }
    }

    #[test]
    fn test_expansion_limit_overflows() {
        let model = toy_model();
        let mut config = SearchConfig::default().lm_weights(1.0, 0.0);
        config.pass2.max_expansions = 1;
        let trellis = trellis_for(&model, &config);

        let mut pass2 = Pass2::new(&model, &config);
        let outcome = pass2
            .run(&toy_scores(), &trellis, Anchors::default(), &CancelFlag::new())
            .unwrap();
        assert_eq!(outcome.termination, Termination::Overflow);
        assert!(outcome.sentences.is_empty());
    }

    #[test]
    fn test_cancelled_search_returns_nothing() {
        let model = toy_model();
        let config = SearchConfig::default();
        let trellis = trellis_for(&model, &config);
        let cancel = CancelFlag::new();
        cancel.cancel();

        let mut pass2 = Pass2::new(&model, &config);
        let outcome = pass2.run(&toy_scores(), &trellis, Anchors::default(), &cancel).unwrap();
        assert_eq!(outcome.termination, Termination::Cancelled);
        assert_eq!(outcome.pops, 0);
    }

    #[test]
    fn test_anchor_restricts_sentence_end() {
        let model = toy_model();
        let config = SearchConfig::default().lm_weights(1.0, 0.0);
        let trellis = trellis_for(&model, &config);
        let no = model.vocab.require("no").unwrap();

        let mut pass2 = Pass2::new(&model, &config);
        let outcome = pass2
            .run(
                &toy_scores(),
                &trellis,
                Anchors {
                    last_word: Some(no),
                    first_word: None,
                },
                &CancelFlag::new(),
            )
            .unwrap();
        for sentence in &outcome.sentences {
            assert_eq!(sentence.words.last(), Some(&no));
        }
    }
}

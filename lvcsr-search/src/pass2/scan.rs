//! Backward Viterbi over the newest word of a hypothesis
//!
//! The newest word's phones are laid out as a state chain and scored from
//! the latest possible frame back to frame 0. With context-dependent models
//! and backscan, the first phone of the following word is appended to the
//! chain and re-resolved with its real left context, so the cross-word
//! triphone at the boundary is exact.

use std::collections::HashMap;

use crate::acoustic::AcousticScorer;
use crate::error::Result;
use crate::hmm::{HmmSet, OutputRef, PhoneContext, PhoneModel};
use crate::lexicon::phone_context;
use crate::types::{add_scores, is_log_zero, LogProb, LOG_ZERO};
use crate::vocab::Word;

use super::envelope::ScoreEnvelope;
use super::hypothesis::Hypothesis;

/// Emitting states of one or more phones, chained
#[derive(Debug, Default)]
struct StateChain {
    outputs: Vec<OutputRef>,
    arcs: Vec<Vec<(usize, LogProb)>>,
    /// First state of each phone
    starts: Vec<usize>,
}

impl StateChain {
    fn clear(&mut self) {
        self.outputs.clear();
        self.arcs.clear();
        self.starts.clear();
    }

    /// Append a phone, linked from the current last state with `link`
    fn push_phone(&mut self, hmms: &HmmSet, model: &PhoneModel, link: LogProb) {
        let trans = hmms.transitions(model);
        let first = self.outputs.len();
        if let Some(last) = first.checked_sub(1) {
            self.arcs[last].push((first, link));
        }
        for (i, output) in model.outputs.iter().enumerate() {
            self.outputs.push(output.clone());
            self.arcs
                .push(trans.emitting_arcs(i).map(|(j, p)| (first + j, p)).collect());
        }
        self.starts.push(first);
    }

    fn len(&self) -> usize {
        self.outputs.len()
    }
}

/// Reusable scan workspace with a cache of resolved phone models
#[derive(Debug, Default)]
pub struct Scanner {
    cache: HashMap<PhoneContext, PhoneModel>,
    chain: StateChain,
    prev: Vec<LogProb>,
    cur: Vec<LogProb>,
    init: Vec<LogProb>,
}

/// Where the continuation score of the first phone is read
#[derive(Debug, Clone, Copy)]
enum Store {
    /// `state` at the next frame, plus `extra`
    State { state: usize, extra: LogProb },
    /// Entry score of the follower minus the tail exit
    Entry { exit: LogProb },
}

impl Scanner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve a phone in context, cached
    pub fn model(&mut self, hmms: &HmmSet, ctx: &PhoneContext) -> Result<PhoneModel> {
        if let Some(model) = self.cache.get(ctx) {
            return Ok(model.clone());
        }
        let model = hmms.resolve(ctx)?;
        self.cache.insert(ctx.clone(), model.clone());
        Ok(model)
    }

    /// Tail phone of `word` followed by a word starting with `right`
    pub fn tail_model(&mut self, hmms: &HmmSet, word: &Word, right: Option<&str>) -> Result<PhoneModel> {
        let last = word.phones.len() - 1;
        self.model(hmms, &phone_context(word, last, None, right))
    }

    fn word_models(&mut self, hmms: &HmmSet, word: &Word, right: Option<&str>) -> Result<Vec<PhoneModel>> {
        (0..word.phones.len())
            .map(|i| self.model(hmms, &phone_context(word, i, None, right)))
            .collect()
    }

    /// Scan the newest word of `hyp`, which must hold entry scores in `g`
    /// (and the follower's continuation in `g_prev` for backscan).
    ///
    /// On return `g` holds the score at the word's first state, `g_prev`
    /// the continuation of its first phone and `last_ph` its head phone.
    #[allow(clippy::too_many_arguments)]
    pub fn scan<S: AcousticScorer + ?Sized>(
        &mut self,
        hmms: &HmmSet,
        scorer: &S,
        word: &Word,
        hyp: &mut Hypothesis,
        backscan: bool,
        envelope: &ScoreEnvelope,
    ) -> Result<()> {
        let frames = hyp.g.len();
        let follower = hyp.last_ph.clone();
        let right = follower.as_ref().map(|p| p.center.clone());
        let models = self.word_models(hmms, word, right.as_deref())?;
        let tail_exit = hmms.transitions(&models[models.len() - 1]).exit_prob();

        self.chain.clear();
        for (i, model) in models.iter().enumerate() {
            let link = if i == 0 {
                0.0
            } else {
                hmms.transitions(&models[i - 1]).exit_prob() + hmms.transitions(model).entry_prob()
            };
            self.chain.push_phone(hmms, model, link);
        }

        self.init.clear();
        let store = match (&follower, backscan) {
            (Some(ctx), true) => {
                let fixed = self.model(hmms, &ctx.with_left(Some(word.tail_phone())))?;
                let fixed_exit = hmms.transitions(&fixed).exit_prob();
                self.chain.push_phone(hmms, &fixed, tail_exit + hyp.lscore);
                self.init
                    .extend(hyp.g_prev.iter().map(|&c| add_scores(c, fixed_exit)));
                if models.len() > 1 {
                    Store::State {
                        state: self.chain.starts[1],
                        extra: hmms.transitions(&models[1]).entry_prob(),
                    }
                } else {
                    Store::State {
                        state: self.chain.starts[1],
                        extra: hyp.lscore,
                    }
                }
            }
            _ => {
                self.init.extend_from_slice(&hyp.g);
                if models.len() > 1 {
                    Store::State {
                        state: self.chain.starts[1],
                        extra: hmms.transitions(&models[1]).entry_prob(),
                    }
                } else {
                    Store::Entry { exit: tail_exit }
                }
            }
        };

        self.viterbi(
            hmms,
            scorer,
            frames,
            envelope,
            hyp.estimated_next_t,
            store,
            &mut hyp.g,
            &mut hyp.g_prev,
        );

        let head_right = if word.phones.len() > 1 {
            Some(word.phones[1].as_str())
        } else {
            right.as_deref()
        };
        hyp.last_ph = Some(PhoneContext::new(None, word.head_phone(), head_right));
        Ok(())
    }

    /// Score of the follower's first state with its left context fixed to
    /// `left`, from the follower's continuation `g_prev`. Used when the
    /// boundary is resolved at expansion time.
    pub fn rescore_head<S: AcousticScorer + ?Sized>(
        &mut self,
        hmms: &HmmSet,
        scorer: &S,
        head: &PhoneContext,
        left: &str,
        g_prev: &[LogProb],
        out: &mut Vec<LogProb>,
    ) -> Result<()> {
        let fixed = self.model(hmms, &head.with_left(Some(left)))?;
        let exit = hmms.transitions(&fixed).exit_prob();

        self.chain.clear();
        self.chain.push_phone(hmms, &fixed, 0.0);
        self.init.clear();
        self.init.extend(g_prev.iter().map(|&c| add_scores(c, exit)));

        let frames = g_prev.len();
        out.clear();
        out.resize(frames, LOG_ZERO);
        let mut unused = vec![LOG_ZERO; frames];
        self.viterbi(
            hmms,
            scorer,
            frames,
            &ScoreEnvelope::new(None),
            -1,
            Store::Entry { exit: 0.0 },
            out,
            &mut unused,
        );
        Ok(())
    }

    /// Backward Viterbi over the current chain. `init[t]` feeds the last
    /// state at frame `t`.
    #[allow(clippy::too_many_arguments)]
    fn viterbi<S: AcousticScorer + ?Sized>(
        &mut self,
        hmms: &HmmSet,
        scorer: &S,
        frames: usize,
        envelope: &ScoreEnvelope,
        stop_before: i32,
        store: Store,
        g: &mut [LogProb],
        g_prev: &mut [LogProb],
    ) {
        g.fill(LOG_ZERO);
        g_prev.fill(LOG_ZERO);

        let start = (0..frames)
            .rev()
            .find(|&t| !is_log_zero(self.init[t]) && self.init[t] > envelope.threshold(t));
        let Some(start) = start else {
            return;
        };

        let n = self.chain.len();
        let last = n - 1;
        self.prev.clear();
        self.prev.resize(n, LOG_ZERO);
        self.cur.clear();
        self.cur.resize(n, LOG_ZERO);

        for t in (0..=start).rev() {
            let threshold = envelope.threshold(t);
            let mut alive = false;
            for i in 0..n {
                let mut best = LOG_ZERO;
                for &(j, a) in &self.chain.arcs[i] {
                    let s = self.prev[j] + a;
                    if s > best {
                        best = s;
                    }
                }
                if i == last && self.init[t] > best {
                    best = self.init[t];
                }
                self.cur[i] = if is_log_zero(best) || best <= threshold {
                    LOG_ZERO
                } else {
                    alive = true;
                    best + hmms.score(scorer, t, &self.chain.outputs[i])
                };
            }

            g[t] = self.cur[0];
            g_prev[t] = match store {
                Store::State { state, extra } => add_scores(self.prev[state], extra),
                Store::Entry { exit } => add_scores(self.init[t], -exit),
            };
            std::mem::swap(&mut self.prev, &mut self.cur);

            if !alive && (t as i32) < stop_before {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acoustic::ScoreTable;
    use crate::hmm::tests::ltr;
    use crate::testing::mono_hmms;
    use crate::vocab::{Vocabulary, WordEntry};
    use approx::assert_relative_eq;

    fn hyp(frames: usize) -> Hypothesis {
        let mut pool = super::super::hypothesis::HypothesisPool::new();
        pool.reset(frames);
        let id = pool.alloc();
        pool.get(id).clone()
    }

    #[test]
    fn test_single_state_word_scan() {
        let hmms = mono_hmms(&["a"]);
        let vocab = Vocabulary::new(vec![WordEntry::new("a", &["a"])]).unwrap();
        let scores = ScoreTable::from_rows(vec![vec![-1.0]; 3]).unwrap();
        let mut h = hyp(3);
        h.words = vec![0];
        h.g[2] = -0.5;

        let mut scanner = Scanner::new();
        scanner
            .scan(&hmms, &scores, vocab.word(0), &mut h, false, &ScoreEnvelope::new(None))
            .unwrap();

        let half = 0.5f32.ln();
        assert_relative_eq!(h.g[2], -1.5);
        assert_relative_eq!(h.g[1], -2.5 + half);
        assert_relative_eq!(h.g[0], -3.5 + 2.0 * half);
        // single phone without follower: continuation is the entry minus the exit
        assert_relative_eq!(h.g_prev[2], -0.5 - half);
        assert_eq!(h.last_ph.as_ref().unwrap().to_string(), "*-a+*");
    }

    #[test]
    fn test_envelope_prunes_scan() {
        let hmms = mono_hmms(&["a"]);
        let vocab = Vocabulary::new(vec![WordEntry::new("a", &["a"])]).unwrap();
        let scores = ScoreTable::from_rows(vec![vec![-1.0]; 3]).unwrap();
        let mut envelope = ScoreEnvelope::new(Some(1.0));
        envelope.reset(3);
        envelope.update(&[0.0, 0.0, 0.0]);

        let mut h = hyp(3);
        h.words = vec![0];
        h.g[2] = -0.5;
        let mut scanner = Scanner::new();
        scanner
            .scan(&hmms, &scores, vocab.word(0), &mut h, false, &envelope)
            .unwrap();
        // entry at frame 2 survives (-0.5 > -1), everything earlier is cut
        assert_relative_eq!(h.g[2], -1.5);
        assert!(is_log_zero(h.g[1]));
        assert!(is_log_zero(h.g[0]));
    }

    #[test]
    fn test_two_phone_word_uses_inner_link() {
        let hmms = HmmSet::new(vec![ltr("a", &[0]), ltr("b", &[1])], &HashMap::new()).unwrap();
        let vocab = Vocabulary::new(vec![WordEntry::new("ab", &["a", "b"])]).unwrap();
        let scores = ScoreTable::from_rows(vec![vec![-1.0, -2.0]; 2]).unwrap();
        let mut h = hyp(2);
        h.words = vec![0];
        h.g[1] = 0.0;

        let mut scanner = Scanner::new();
        scanner
            .scan(&hmms, &scores, vocab.word(0), &mut h, false, &ScoreEnvelope::new(None))
            .unwrap();
        let half = 0.5f32.ln();
        // a at 0, b at 1
        assert_relative_eq!(h.g[0], -1.0 + half + 0.0 + -2.0);
        assert!(is_log_zero(h.g[1]));
        // continuation of phone "a" at frame 0 is entering "b" at frame 1
        assert_relative_eq!(h.g_prev[0], -2.0);
        assert_eq!(h.last_ph.as_ref().unwrap().to_string(), "*-a+b");
    }
}

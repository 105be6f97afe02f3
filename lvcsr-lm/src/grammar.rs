//! Finite-state grammar over word categories
//!
//! The automaton is stored reversed: state 0 is where the backward search
//! starts (sentence end) and accepting states are reached once the
//! sentence-initial word has been placed. Arcs are labelled with word
//! categories. A category made only of pause words is a short pause: Pass 2
//! steps over it instead of expanding the pause word itself.
//!
//! Pass 1 cannot follow grammar states in a shared lexicon tree, so it uses
//! the category-pair, begin and end tables derived from the automaton.

use std::fs;
use std::path::Path;

use lvcsr_search::{LanguageModel, LmState, LogProb, Vocabulary, WordId, LOG_ZERO};
use tracing::debug;

use crate::error::{LmError, Result};

/// Category index
pub type CategoryId = usize;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DfaState {
    /// (category, next state)
    pub arcs: Vec<(CategoryId, usize)>,
    pub accept: bool,
}

#[derive(Debug, Clone)]
pub struct Grammar {
    states: Vec<DfaState>,
    categories: Vec<Vec<WordId>>,
    category_of: Vec<Option<CategoryId>>,
    pause: Vec<bool>,
    /// `pairs[a][b]`: category `b` may follow `a` in time
    pairs: Vec<Vec<bool>>,
    begin: Vec<bool>,
    end: Vec<bool>,
}

impl Grammar {
    /// Build from automaton states and the words of each category
    pub fn new(states: Vec<DfaState>, categories: Vec<Vec<WordId>>, vocab: &Vocabulary) -> Result<Self> {
        if states.is_empty() {
            return Err(LmError::invalid_model("grammar has no states"));
        }
        for (s, state) in states.iter().enumerate() {
            for &(c, next) in &state.arcs {
                if c >= categories.len() || next >= states.len() {
                    return Err(LmError::invalid_model(format!(
                        "state {s}: arc ({c}, {next}) out of range"
                    )));
                }
            }
        }

        let mut category_of = vec![None; vocab.len()];
        for (c, words) in categories.iter().enumerate() {
            for &w in words {
                if w >= vocab.len() {
                    return Err(LmError::invalid_model(format!("category {c}: word {w} out of range")));
                }
                if category_of[w].replace(c).is_some() {
                    return Err(LmError::invalid_model(format!(
                        "word {} belongs to two categories",
                        vocab.word(w).name
                    )));
                }
            }
        }
        let pause: Vec<bool> = categories
            .iter()
            .map(|words| !words.is_empty() && words.iter().all(|&w| vocab.is_silence(w)))
            .collect();

        let mut grammar = Self {
            states,
            categories,
            category_of,
            pause,
            pairs: Vec::new(),
            begin: Vec::new(),
            end: Vec::new(),
        };
        grammar.derive_tables();
        debug!(
            "Grammar: {} states, {} categories, {} pause categories",
            grammar.states.len(),
            grammar.categories.len(),
            grammar.pause.iter().filter(|&&p| p).count()
        );
        Ok(grammar)
    }

    /// Parse the automaton (`state category next flags [reserved]` per line,
    /// category -1 for a flags-only line, flag bit 0 = accepting) and the
    /// category table (`category word...` per line, `#` comments)
    pub fn parse(dfa: &str, categories: &str, vocab: &Vocabulary) -> Result<Self> {
        let mut states: Vec<DfaState> = Vec::new();
        for (i, line) in dfa.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let fields: Vec<i64> = line
                .split_whitespace()
                .map(|f| f.parse::<i64>())
                .collect::<std::result::Result<_, _>>()
                .map_err(|_| LmError::parse(i + 1, format!("bad grammar line {line}")))?;
            let [state, category, next, flags, ..] = fields[..] else {
                return Err(LmError::parse(i + 1, "expected 'state category next flags'"));
            };
            if state < 0 {
                return Err(LmError::parse(i + 1, "negative state"));
            }
            let grow = |states: &mut Vec<DfaState>, s: i64| {
                if states.len() <= s as usize {
                    states.resize(s as usize + 1, DfaState::default());
                }
            };
            grow(&mut states, state);
            if flags & 1 != 0 {
                states[state as usize].accept = true;
            }
            if category >= 0 {
                if next < 0 {
                    return Err(LmError::parse(i + 1, "arc without target state"));
                }
                grow(&mut states, next);
                states[state as usize]
                    .arcs
                    .push((category as CategoryId, next as usize));
            }
        }

        let mut table: Vec<Vec<WordId>> = Vec::new();
        for (i, line) in categories.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let mut fields = line.split_whitespace();
            let c: usize = fields
                .next()
                .and_then(|f| f.parse().ok())
                .ok_or_else(|| LmError::parse(i + 1, "expected a category number"))?;
            if table.len() <= c {
                table.resize(c + 1, Vec::new());
            }
            for name in fields {
                if vocab.id_of(name).is_none() {
                    return Err(LmError::UnknownWord(name.to_string()));
                }
                // every pronunciation variant of the name joins the category
                table[c].extend(
                    vocab
                        .words()
                        .filter(|(_, word)| word.name == name)
                        .map(|(id, _)| id),
                );
            }
        }

        Self::new(states, table, vocab)
    }

    /// Read the automaton and category files
    pub fn load<P: AsRef<Path>, Q: AsRef<Path>>(dfa: P, categories: Q, vocab: &Vocabulary) -> Result<Self> {
        let dfa = fs::read_to_string(dfa)?;
        let categories = fs::read_to_string(categories)?;
        Self::parse(&dfa, &categories, vocab)
    }

    pub fn state_count(&self) -> usize {
        self.states.len()
    }

    pub fn category_of(&self, word: WordId) -> Option<CategoryId> {
        self.category_of.get(word).copied().flatten()
    }

    pub fn is_pause_category(&self, category: CategoryId) -> bool {
        self.pause[category]
    }

    /// Whether category `next` may directly follow `prev` in time
    pub fn can_follow(&self, prev: CategoryId, next: CategoryId) -> bool {
        self.pairs[prev][next]
    }

    /// Arcs leaving `state`, with short pauses stepped over. Direct arcs
    /// come first.
    fn arcs_through_pause(&self, state: usize) -> impl Iterator<Item = (CategoryId, usize)> + '_ {
        let arcs = &self.states[state].arcs;
        let direct = arcs.iter().copied().filter(move |&(c, _)| !self.pause[c]);
        let skipped = arcs
            .iter()
            .filter(move |&&(c, _)| self.pause[c])
            .flat_map(move |&(_, next)| {
                self.states[next]
                    .arcs
                    .iter()
                    .copied()
                    .filter(move |&(c, _)| !self.pause[c])
            });
        direct.chain(skipped)
    }

    /// State reached by placing a word of `category` before state `state`
    fn step(&self, state: usize, category: CategoryId) -> Option<usize> {
        if self.pause[category] {
            return None;
        }
        self.arcs_through_pause(state)
            .find(|&(c, _)| c == category)
            .map(|(_, next)| next)
    }

    fn state_index(state: LmState) -> usize {
        match state {
            LmState::Grammar(s) => s,
            LmState::Free => 0,
        }
    }

    fn derive_tables(&mut self) {
        let n = self.categories.len();
        let mut pairs = vec![vec![false; n]; n];
        let mut begin = vec![false; n];
        let mut end = vec![false; n];

        for state in &self.states {
            for &(later, next) in &state.arcs {
                // categories placed after `later` in the reversed automaton
                // precede it in time
                for &(earlier, after) in &self.states[next].arcs {
                    pairs[earlier][later] = true;
                    if self.pause[earlier] {
                        for &(before_pause, _) in &self.states[after].arcs {
                            pairs[before_pause][later] = true;
                        }
                    }
                }
                if self.states[next].accept {
                    begin[later] = true;
                }
            }
        }

        for &(c, next) in &self.states[0].arcs {
            end[c] = true;
            if self.pause[c] {
                for &(c2, _) in &self.states[next].arcs {
                    end[c2] = true;
                }
            }
        }
        // a pause right after the sentence start
        for state in &self.states {
            for &(c, next) in &state.arcs {
                let pause_then_start = self.states[next]
                    .arcs
                    .iter()
                    .any(|&(p, after)| self.pause[p] && self.states[after].accept);
                if pause_then_start {
                    begin[c] = true;
                }
            }
        }

        self.pairs = pairs;
        self.begin = begin;
        self.end = end;
    }

    fn words_of<'a>(&'a self, flags: &'a [bool]) -> impl Iterator<Item = WordId> + 'a {
        flags
            .iter()
            .enumerate()
            .filter(|(_, &on)| on)
            .flat_map(move |(c, _)| self.categories[c].iter().copied())
    }
}

impl LanguageModel for Grammar {
    fn describe(&self) -> String {
        format!(
            "grammar ({} states, {} categories)",
            self.states.len(),
            self.categories.len()
        )
    }

    fn start_words(&self) -> Vec<WordId> {
        self.words_of(&self.begin).collect()
    }

    fn forward_score(&self, context: Option<WordId>, word: WordId) -> LogProb {
        let Some(cat) = self.category_of(word) else {
            return LOG_ZERO;
        };
        let allowed = match context.map(|c| self.category_of(c)) {
            None => self.begin[cat],
            Some(Some(prev)) => self.pairs[prev][cat],
            Some(None) => false,
        };
        if allowed {
            0.0
        } else {
            LOG_ZERO
        }
    }

    fn unigram_bound(&self, word: WordId) -> LogProb {
        match self.category_of(word) {
            Some(_) => 0.0,
            None => LOG_ZERO,
        }
    }

    fn can_end(&self, word: WordId) -> bool {
        self.category_of(word).is_some_and(|c| self.end[c])
    }

    fn first_words(&self) -> Option<Vec<WordId>> {
        let mut words: Vec<WordId> = self
            .arcs_through_pause(0)
            .flat_map(|(c, _)| self.categories[c].iter().copied())
            .collect();
        words.sort_unstable();
        words.dedup();
        Some(words)
    }

    fn initial_state(&self) -> LmState {
        LmState::Grammar(0)
    }

    fn backward_score(
        &self,
        word: WordId,
        _following: &[WordId],
        state: LmState,
    ) -> Option<(LogProb, LmState)> {
        let cat = self.category_of(word)?;
        self.step(Self::state_index(state), cat)
            .map(|next| (0.0, LmState::Grammar(next)))
    }

    fn is_acceptable(&self, _sequence: &[WordId], state: LmState) -> bool {
        match state {
            LmState::Grammar(s) => self.states.get(s).is_some_and(|st| st.accept),
            LmState::Free => false,
        }
    }

    fn pause_word(&self, state: LmState) -> Option<WordId> {
        self.states
            .get(Self::state_index(state))?
            .arcs
            .iter()
            .find(|&&(c, _)| self.pause[c])
            .and_then(|&(c, _)| self.categories[c].first().copied())
    }

    fn pause_between(&self, word: WordId, state: LmState) -> bool {
        let s = Self::state_index(state);
        let Some(cat) = self.category_of(word) else {
            return false;
        };
        let Some(target) = self.step(s, cat) else {
            return false;
        };
        self.states[s]
            .arcs
            .iter()
            .any(|&(c, mid)| self.pause[c] && self.states[mid].arcs.contains(&(cat, target)))
    }
}

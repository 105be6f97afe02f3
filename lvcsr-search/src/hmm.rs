//! Phone HMM set and context-dependent phone resolution
//!
//! Physical HMMs are addressed by logical names in the usual HTK style:
//! `c` (monophone), `l-c` / `c+r` (biphones) and `l-c+r` (triphones).
//! When a neighbouring phone is not known yet (word boundaries in Pass 1),
//! resolution returns a *pseudo* phone whose per-state output is the set of
//! all candidate states, scored by their maximum.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::acoustic::AcousticScorer;
use crate::error::{Result, SearchError};
use crate::types::{LogProb, StateId, LOG_ZERO};

/// Serialized form of one physical phone HMM
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HmmDefinition {
    /// Physical name (also registered as a logical name)
    pub name: String,

    /// Emitting state ids, in topology order
    pub states: Vec<StateId>,

    /// (n+2)×(n+2) log transition matrix including the non-emitting entry
    /// (row 0) and exit (column n+1) states; `null` marks a missing arc
    pub transitions: Vec<Vec<Option<LogProb>>>,
}

/// Log transition matrix of one phone HMM, HTK layout
#[derive(Debug, Clone, PartialEq)]
pub struct TransitionMatrix {
    size: usize,
    a: Vec<LogProb>,
}

impl TransitionMatrix {
    fn from_rows(rows: &[Vec<Option<LogProb>>]) -> Option<Self> {
        let size = rows.len();
        if rows.iter().any(|r| r.len() != size) {
            return None;
        }
        let a = rows
            .iter()
            .flat_map(|r| r.iter().map(|v| v.unwrap_or(LOG_ZERO)))
            .collect();
        Some(Self { size, a })
    }

    /// Transition log probability from `from` to `to` (matrix indices)
    pub fn get(&self, from: usize, to: usize) -> LogProb {
        self.a[from * self.size + to]
    }

    /// Number of emitting states
    pub fn emitting(&self) -> usize {
        self.size - 2
    }

    /// Probability of entering the first emitting state
    pub fn entry_prob(&self) -> LogProb {
        self.get(0, 1)
    }

    /// Probability of leaving the last emitting state
    pub fn exit_prob(&self) -> LogProb {
        self.get(self.size - 2, self.size - 1)
    }

    /// Arcs between emitting states leaving emitting state `i` (0-based),
    /// as (target emitting index, log prob)
    pub fn emitting_arcs(&self, i: usize) -> impl Iterator<Item = (usize, LogProb)> + '_ {
        let n = self.emitting();
        (0..n).filter_map(move |j| {
            let p = self.get(i + 1, j + 1);
            (p > LOG_ZERO).then_some((j, p))
        })
    }
}

/// One physical phone HMM
#[derive(Debug, Clone, PartialEq)]
pub struct PhoneHmm {
    pub name: String,
    pub states: Vec<StateId>,
    pub trans: TransitionMatrix,
}

/// State output reference of a lexicon node or scan state
#[derive(Debug, Clone, PartialEq)]
pub enum OutputRef {
    State(StateId),
    /// Pseudo state: maximum over a set of candidate states
    Set(Arc<[StateId]>),
}

/// Identity of a resolved phone model, used for prefix sharing
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ModelKey {
    Physical(usize),
    Pseudo(String),
}

/// A phone model after context resolution
#[derive(Debug, Clone, PartialEq)]
pub struct PhoneModel {
    /// Logical name that resolved to this model
    pub name: String,
    pub key: ModelKey,
    /// Output reference of each emitting state
    pub outputs: Vec<OutputRef>,
    /// Physical HMM whose transitions this model uses
    pub hmm: usize,
    pub pseudo: bool,
}

/// A phone with (possibly unknown) left and right neighbours
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PhoneContext {
    pub left: Option<String>,
    pub center: String,
    pub right: Option<String>,
}

impl PhoneContext {
    pub fn new(left: Option<&str>, center: &str, right: Option<&str>) -> Self {
        Self {
            left: left.map(str::to_string),
            center: center.to_string(),
            right: right.map(str::to_string),
        }
    }

    /// Same phone with a different left neighbour
    pub fn with_left(&self, left: Option<&str>) -> Self {
        Self {
            left: left.map(str::to_string),
            ..self.clone()
        }
    }

    /// Same phone with a different right neighbour
    pub fn with_right(&self, right: Option<&str>) -> Self {
        Self {
            right: right.map(str::to_string),
            ..self.clone()
        }
    }
}

impl fmt::Display for PhoneContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}-{}+{}",
            self.left.as_deref().unwrap_or("*"),
            self.center,
            self.right.as_deref().unwrap_or("*")
        )
    }
}

/// Split a logical name into (left, center, right)
fn parse_logical(name: &str) -> (Option<&str>, &str, Option<&str>) {
    let (left, rest) = match name.split_once('-') {
        Some((l, r)) => (Some(l), r),
        None => (None, name),
    };
    let (center, right) = match rest.split_once('+') {
        Some((c, r)) => (c, Some(r)),
        None => (rest, None),
    };
    (left, center, right)
}

/// Logical name with unknown sides omitted
fn compose_name(left: Option<&str>, center: &str, right: Option<&str>) -> String {
    let mut name = String::new();
    if let Some(l) = left {
        name.push_str(l);
        name.push('-');
    }
    name.push_str(center);
    if let Some(r) = right {
        name.push('+');
        name.push_str(r);
    }
    name
}

/// Values a neighbour can take: the known phone, or every phone some model
/// names on that side plus `None` for any other
fn context_sides<'a>(known: Option<&'a str>, named: impl Iterator<Item = &'a str>) -> Vec<Option<&'a str>> {
    if known.is_some() {
        return vec![known];
    }
    let mut sides: Vec<Option<&str>> = named.map(Some).collect();
    sides.sort_unstable();
    sides.dedup();
    sides.push(None);
    sides
}

#[derive(Debug, Clone)]
struct ContextEntry {
    left: Option<String>,
    right: Option<String>,
    hmm: usize,
}

/// The acoustic model: physical HMMs plus the logical name table
#[derive(Debug, Clone)]
pub struct HmmSet {
    hmms: Vec<PhoneHmm>,
    logical: HashMap<String, usize>,
    by_center: HashMap<String, Vec<ContextEntry>>,
    state_count: usize,
    context_dependent: bool,
}

impl HmmSet {
    /// Build the set from HMM definitions and logical→physical aliases
    pub fn new(definitions: Vec<HmmDefinition>, aliases: &HashMap<String, String>) -> Result<Self> {
        let mut hmms = Vec::with_capacity(definitions.len());
        let mut logical = HashMap::new();

        for def in definitions {
            let trans = TransitionMatrix::from_rows(&def.transitions).ok_or_else(|| {
                SearchError::invalid_model(format!("{}: transition matrix is not square", def.name))
            })?;
            if trans.size != def.states.len() + 2 {
                return Err(SearchError::invalid_model(format!(
                    "{}: {} states but a {}x{} transition matrix",
                    def.name,
                    def.states.len(),
                    trans.size,
                    trans.size
                )));
            }
            if def.states.is_empty() {
                return Err(SearchError::invalid_model(format!("{}: no emitting states", def.name)));
            }
            check_topology(&def.name, &trans)?;

            if logical.insert(def.name.clone(), hmms.len()).is_some() {
                return Err(SearchError::invalid_model(format!("duplicate HMM {}", def.name)));
            }
            hmms.push(PhoneHmm {
                name: def.name,
                states: def.states,
                trans,
            });
        }

        for (alias, target) in aliases {
            let idx = *logical.get(target).ok_or_else(|| {
                SearchError::invalid_model(format!("alias {alias} points to unknown HMM {target}"))
            })?;
            logical.entry(alias.clone()).or_insert(idx);
        }

        let mut by_center: HashMap<String, Vec<ContextEntry>> = HashMap::new();
        let mut context_dependent = false;
        let mut names: Vec<&String> = logical.keys().collect();
        names.sort();
        for name in names {
            let (left, center, right) = parse_logical(name);
            context_dependent |= left.is_some() || right.is_some();
            by_center.entry(center.to_string()).or_default().push(ContextEntry {
                left: left.map(str::to_string),
                right: right.map(str::to_string),
                hmm: logical[name],
            });
        }

        let state_count = hmms
            .iter()
            .flat_map(|h| h.states.iter())
            .max()
            .map(|s| s + 1)
            .unwrap_or(0);

        Ok(Self {
            hmms,
            logical,
            by_center,
            state_count,
            context_dependent,
        })
    }

    pub fn len(&self) -> usize {
        self.hmms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hmms.is_empty()
    }

    /// Number of distinct state ids the acoustic scorer must provide
    pub fn state_count(&self) -> usize {
        self.state_count
    }

    /// True when any logical name carries phone context
    pub fn is_context_dependent(&self) -> bool {
        self.context_dependent
    }

    pub fn hmm(&self, idx: usize) -> &PhoneHmm {
        &self.hmms[idx]
    }

    /// Physical HMM index of a logical name
    pub fn lookup(&self, logical: &str) -> Option<usize> {
        self.logical.get(logical).copied()
    }

    /// True when some logical name has `phone` as its center
    pub fn has_phone(&self, phone: &str) -> bool {
        self.by_center.contains_key(phone)
    }

    /// Transition matrix of a resolved model
    pub fn transitions(&self, model: &PhoneModel) -> &TransitionMatrix {
        &self.hmms[model.hmm].trans
    }

    /// Resolve a phone in context to a model.
    ///
    /// With both neighbours known the lookup falls back `l-c+r`, `l-c`,
    /// `c+r`, `c`; no match is a [`SearchError::MissingTriphone`]. With an
    /// unknown neighbour the result is a pseudo phone over every model that
    /// lookup can end at for some neighbour, so its score bounds the real one.
    pub fn resolve(&self, ctx: &PhoneContext) -> Result<PhoneModel> {
        let center = ctx.center.as_str();
        if !self.has_phone(center) {
            return Err(SearchError::UnknownPhone(center.to_string()));
        }
        let left = ctx.left.as_deref();
        let right = ctx.right.as_deref();

        if !self.context_dependent {
            return self.physical(center).ok_or_else(|| SearchError::missing_triphone(ctx.to_string()));
        }

        let model = if left.is_some() && right.is_some() {
            self.fallback(left, center, right).and_then(|name| self.physical(&name))
        } else {
            self.pseudo(left, center, right)
        };
        model.ok_or_else(|| SearchError::missing_triphone(ctx.to_string()))
    }

    /// First of `l-c+r`, `l-c`, `c+r`, `c` that exists. A `None` side stands
    /// for a neighbour no model of `c` names on that side.
    fn fallback(&self, left: Option<&str>, center: &str, right: Option<&str>) -> Option<String> {
        let mut names = Vec::with_capacity(4);
        if left.is_some() && right.is_some() {
            names.push(compose_name(left, center, right));
        }
        if left.is_some() {
            names.push(compose_name(left, center, None));
        }
        if right.is_some() {
            names.push(compose_name(None, center, right));
        }
        names.push(center.to_string());
        names.into_iter().find(|name| self.logical.contains_key(name))
    }

    fn physical(&self, name: &str) -> Option<PhoneModel> {
        let idx = self.lookup(name)?;
        let hmm = &self.hmms[idx];
        Some(PhoneModel {
            name: name.to_string(),
            key: ModelKey::Physical(idx),
            outputs: hmm.states.iter().map(|&s| OutputRef::State(s)).collect(),
            hmm: idx,
            pseudo: false,
        })
    }

    /// Pseudo phone over the models `center` resolves to for any value of
    /// the unknown sides
    fn pseudo(&self, left: Option<&str>, center: &str, right: Option<&str>) -> Option<PhoneModel> {
        let entries = self.by_center.get(center)?;
        let lefts = context_sides(left, entries.iter().filter_map(|e| e.left.as_deref()));
        let rights = context_sides(right, entries.iter().filter_map(|e| e.right.as_deref()));

        let members: BTreeSet<usize> = lefts
            .iter()
            .flat_map(|&l| rights.iter().map(move |&r| (l, r)))
            .filter_map(|(l, r)| self.fallback(l, center, r))
            .filter_map(|name| self.lookup(&name))
            .collect();
        let first = *members.iter().next()?;
        let width = self.hmms[first].states.len();
        let members: Vec<usize> = members
            .into_iter()
            .filter(|&m| self.hmms[m].states.len() == width)
            .collect();

        let name = PhoneContext::new(left, center, right).to_string();
        if members.len() == 1 {
            let mut model = self.physical(&self.hmms[first].name)?;
            model.name = name;
            return Some(model);
        }

        let outputs = (0..width)
            .map(|pos| {
                let states: BTreeSet<StateId> =
                    members.iter().map(|&m| self.hmms[m].states[pos]).collect();
                if states.len() == 1 {
                    OutputRef::State(states.into_iter().next().unwrap_or_default())
                } else {
                    OutputRef::Set(states.into_iter().collect::<Vec<_>>().into())
                }
            })
            .collect();

        Some(PhoneModel {
            key: ModelKey::Pseudo(name.clone()),
            name,
            outputs,
            hmm: first,
            pseudo: true,
        })
    }

    /// Output log probability of a state reference
    #[inline]
    pub fn score<S: AcousticScorer + ?Sized>(&self, scorer: &S, frame: usize, output: &OutputRef) -> LogProb {
        match output {
            OutputRef::State(s) => scorer.outprob(frame, *s),
            OutputRef::Set(states) => states
                .iter()
                .map(|&s| scorer.outprob(frame, s))
                .fold(LOG_ZERO, LogProb::max),
        }
    }
}

/// Phone HMMs must enter at the first emitting state and leave from the last.
fn check_topology(name: &str, trans: &TransitionMatrix) -> Result<()> {
    let n = trans.emitting();
    for j in 2..=n + 1 {
        if trans.get(0, j) > LOG_ZERO {
            return Err(SearchError::invalid_model(format!(
                "{name}: entry state may only lead to the first emitting state"
            )));
        }
    }
    for i in 1..n {
        if trans.get(i, n + 1) > LOG_ZERO {
            return Err(SearchError::invalid_model(format!(
                "{name}: only the last emitting state may lead to the exit state"
            )));
        }
    }
    if trans.exit_prob() <= LOG_ZERO {
        return Err(SearchError::invalid_model(format!("{name}: no exit transition")));
    }
    Ok(())
}

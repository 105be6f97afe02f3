//! Tree-structured lexicon (static search automaton)
//!
//! Every dictionary word is a path of HMM states from its start node to its
//! word-end node. Words share leading phones when the resolved phone models
//! are identical; the last phone of a word is never shared, so each word has
//! its own word-end node. Branch nodes carry the list of words still
//! reachable from them, which Pass 1 uses for LM factoring.
//!
//! The tree is built once and only read during search. Node ids out of range
//! panic: they can only come from a bug, never from input.

use std::collections::HashMap;

use tracing::debug;

use crate::error::Result;
use crate::hmm::{HmmSet, ModelKey, OutputRef, PhoneContext, PhoneModel};
use crate::types::{LogProb, NodeId, WordId};
use crate::vocab::{Vocabulary, Word};

/// One HMM state position in the tree
#[derive(Debug, Clone, PartialEq)]
pub struct TreeNode {
    pub output: OutputRef,
    /// Outgoing arcs (target, log transition probability), self loop included
    pub arcs: Vec<(NodeId, LogProb)>,
    pub word_end: Option<WordId>,
    factoring: Option<usize>,
}

/// Context of phone `index` of `word` given the neighbouring words' boundary
/// phones (`None` when unknown).
pub fn phone_context(word: &Word, index: usize, left: Option<&str>, right: Option<&str>) -> PhoneContext {
    let last = word.phones.len() - 1;
    let l = if index == 0 { left } else { Some(word.phones[index - 1].as_str()) };
    let r = if index == last { right } else { Some(word.phones[index + 1].as_str()) };
    PhoneContext::new(l, &word.phones[index], r)
}

/// Resolve all phones of `word` with the given cross-word neighbours
pub fn word_models(
    hmms: &HmmSet,
    word: &Word,
    left: Option<&str>,
    right: Option<&str>,
) -> Result<Vec<PhoneModel>> {
    (0..word.phones.len())
        .map(|i| hmms.resolve(&phone_context(word, i, left, right)))
        .collect()
}

/// A phone instance while building
struct Slot {
    first: NodeId,
    last: NodeId,
    exit: LogProb,
    parent: Option<usize>,
    words: Vec<WordId>,
}

#[derive(Debug, Clone)]
pub struct LexiconTree {
    nodes: Vec<TreeNode>,
    word_start: Vec<NodeId>,
    word_end: Vec<NodeId>,
    wordend_a: Vec<LogProb>,
    roots: Vec<NodeId>,
    successors: Vec<Vec<WordId>>,
}

impl LexiconTree {
    /// Build the tree for all words of `vocab`
    pub fn build(vocab: &Vocabulary, hmms: &HmmSet) -> Result<Self> {
        let mut nodes: Vec<TreeNode> = Vec::new();
        let mut slots: Vec<Slot> = Vec::new();
        let mut shared: HashMap<(Option<usize>, ModelKey), usize> = HashMap::new();
        let mut word_start = Vec::with_capacity(vocab.len());
        let mut word_end = Vec::with_capacity(vocab.len());
        let mut wordend_a = Vec::with_capacity(vocab.len());

        for (w, word) in vocab.words() {
            let models = word_models(hmms, word, None, None)?;
            let last = models.len() - 1;
            let mut parent: Option<usize> = None;

            for (i, model) in models.iter().enumerate() {
                let key = (parent, model.key.clone());
                let reuse = if i < last { shared.get(&key).copied() } else { None };

                let slot_id = match reuse {
                    Some(id) => id,
                    None => {
                        let id = Self::add_slot(&mut nodes, &mut slots, hmms, model, parent);
                        if i < last {
                            shared.insert(key, id);
                        }
                        id
                    }
                };
                slots[slot_id].words.push(w);
                if i == 0 {
                    word_start.push(slots[slot_id].first);
                }
                parent = Some(slot_id);
            }

            // parent is the word's last slot here
            let end_slot = &slots[parent.unwrap_or_default()];
            nodes[end_slot.last].word_end = Some(w);
            word_end.push(end_slot.last);
            wordend_a.push(end_slot.exit);
        }

        let mut successors = Vec::new();
        let mut roots = Vec::new();
        for slot_id in 0..slots.len() {
            let branch = match slots[slot_id].parent {
                None => {
                    roots.push(slots[slot_id].first);
                    true
                }
                Some(p) => slots[p].words != slots[slot_id].words,
            };
            if branch {
                let mut words = slots[slot_id].words.clone();
                words.sort_unstable();
                words.dedup();
                nodes[slots[slot_id].first].factoring = Some(successors.len());
                successors.push(words);
            }
        }
        roots.sort_unstable();

        debug!(
            "Lexicon tree: {} words, {} nodes, {} roots, {} factoring nodes",
            vocab.len(),
            nodes.len(),
            roots.len(),
            successors.len()
        );

        Ok(Self {
            nodes,
            word_start,
            word_end,
            wordend_a,
            roots,
            successors,
        })
    }

    fn add_slot(
        nodes: &mut Vec<TreeNode>,
        slots: &mut Vec<Slot>,
        hmms: &HmmSet,
        model: &PhoneModel,
        parent: Option<usize>,
    ) -> usize {
        let trans = hmms.transitions(model);
        let first = nodes.len();
        for (i, output) in model.outputs.iter().enumerate() {
            let arcs = trans
                .emitting_arcs(i)
                .map(|(j, p)| (first + j, p))
                .collect();
            nodes.push(TreeNode {
                output: output.clone(),
                arcs,
                word_end: None,
                factoring: None,
            });
        }
        let last = nodes.len() - 1;

        if let Some(p) = parent {
            let from = slots[p].last;
            let prob = slots[p].exit + trans.entry_prob();
            nodes[from].arcs.push((first, prob));
        }

        slots.push(Slot {
            first,
            last,
            exit: trans.exit_prob(),
            parent,
            words: Vec::new(),
        });
        slots.len() - 1
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Number of words in the tree
    pub fn word_count(&self) -> usize {
        self.word_start.len()
    }

    pub fn node(&self, node: NodeId) -> &TreeNode {
        &self.nodes[node]
    }

    /// Outgoing arcs of `node`
    #[inline]
    pub fn arcs(&self, node: NodeId) -> &[(NodeId, LogProb)] {
        &self.nodes[node].arcs
    }

    #[inline]
    pub fn output(&self, node: NodeId) -> &OutputRef {
        &self.nodes[node].output
    }

    /// Word ending at `node`, if it is a word-end node
    #[inline]
    pub fn word_end_of(&self, node: NodeId) -> Option<WordId> {
        self.nodes[node].word_end
    }

    /// Start node of every word, as (node, word)
    pub fn word_start_nodes(&self) -> Vec<(NodeId, WordId)> {
        self.word_start.iter().enumerate().map(|(w, &n)| (n, w)).collect()
    }

    pub fn start_node(&self, word: WordId) -> NodeId {
        self.word_start[word]
    }

    pub fn end_node(&self, word: WordId) -> NodeId {
        self.word_end[word]
    }

    /// Transition probability out of the word-end node
    pub fn wordend_exit(&self, word: WordId) -> LogProb {
        self.wordend_a[word]
    }

    /// Distinct word-start nodes, ascending
    pub fn roots(&self) -> &[NodeId] {
        &self.roots
    }

    /// Words still reachable from a factoring node (None for other nodes)
    #[inline]
    pub fn factoring(&self, node: NodeId) -> Option<&[WordId]> {
        self.nodes[node].factoring.map(|i| self.successors[i].as_slice())
    }

    /// Index of the factoring list of `node`, for per-branch caches
    #[inline]
    pub fn factoring_id(&self, node: NodeId) -> Option<usize> {
        self.nodes[node].factoring
    }

    pub fn factoring_count(&self) -> usize {
        self.successors.len()
    }
}

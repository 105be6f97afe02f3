//! Double-buffered token space for the frame-synchronous Viterbi pass

use crate::config::TokenMode;
use crate::trellis::AtomId;
use crate::types::{is_log_zero, LogProb, NodeId, WordId};

const NO_TOKEN: u32 = u32::MAX;

/// A partial path anchored at one lexicon tree node
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Token {
    pub node: NodeId,
    pub score: LogProb,
    /// Trellis atom of the last completed word
    pub last_tre: Option<AtomId>,
    /// LM context word (last non-transparent word)
    pub last_cword: Option<WordId>,
    /// Factoring score currently included in `score`
    pub last_lscore: LogProb,
    /// Word of `last_tre`, distinguishes tokens in word-pair mode
    pub pair_key: Option<WordId>,
    next_same_node: u32,
}

impl Token {
    pub fn new(
        node: NodeId,
        score: LogProb,
        last_tre: Option<AtomId>,
        last_cword: Option<WordId>,
        last_lscore: LogProb,
        pair_key: Option<WordId>,
    ) -> Self {
        Self {
            node,
            score,
            last_tre,
            last_cword,
            last_lscore,
            pair_key,
            next_same_node: NO_TOKEN,
        }
    }
}

/// Tokens of the previous frame (read) and of the frame being computed (write).
///
/// The write side keeps a node → token index so each node holds at most
/// one token (or `limit` tokens with distinct previous words in word-pair
/// mode). Buffers are reused across frames and utterances.
#[derive(Debug)]
pub struct TokenSpace {
    prev: Vec<Token>,
    next: Vec<Token>,
    head: Vec<u32>,
    mode: TokenMode,
    pair_limit: usize,
    rank: Vec<usize>,
    keep: Vec<bool>,
}

impl TokenSpace {
    /// Token space for a tree of `node_count` nodes, sized for `beam_width`
    pub fn new(node_count: usize, beam_width: usize, mode: TokenMode, pair_limit: usize) -> Self {
        let estimate = beam_width.saturating_mul(2).min(node_count.max(1) * pair_limit.max(1));
        Self {
            prev: Vec::with_capacity(estimate),
            next: Vec::with_capacity(estimate),
            head: vec![NO_TOKEN; node_count],
            mode,
            pair_limit: pair_limit.max(1),
            rank: Vec::new(),
            keep: Vec::new(),
        }
    }

    /// Empty both buffers
    pub fn clear(&mut self) {
        self.clear_index();
        self.next.clear();
        self.prev.clear();
    }

    /// Make the computed frame the previous one and start an empty frame
    pub fn swap(&mut self) {
        self.clear_index();
        std::mem::swap(&mut self.prev, &mut self.next);
        self.next.clear();
    }

    fn clear_index(&mut self) {
        for tk in &self.next {
            self.head[tk.node] = NO_TOKEN;
        }
    }

    /// Tokens surviving from the previous frame
    pub fn previous(&self) -> &[Token] {
        &self.prev
    }

    /// Tokens of the frame being computed
    pub fn current(&self) -> &[Token] {
        &self.next
    }

    pub fn current_mut(&mut self) -> &mut [Token] {
        &mut self.next
    }

    /// Offer a candidate token; it replaces a worse token of the same
    /// node (and previous word in word-pair mode). On equal scores the
    /// token registered first stays.
    pub fn propagate(&mut self, cand: Token) {
        let node = cand.node;
        let first = self.head[node];

        if first == NO_TOKEN {
            self.head[node] = self.push(cand, NO_TOKEN);
            return;
        }

        match self.mode {
            TokenMode::OneBest => {
                let idx = first as usize;
                if cand.score > self.next[idx].score {
                    self.replace(idx, cand);
                }
            }
            TokenMode::WordPair => {
                let mut count = 0;
                let mut worst = first as usize;
                let mut cur = first;
                while cur != NO_TOKEN {
                    let idx = cur as usize;
                    if self.next[idx].pair_key == cand.pair_key {
                        if cand.score > self.next[idx].score {
                            self.replace(idx, cand);
                        }
                        return;
                    }
                    if self.next[idx].score < self.next[worst].score {
                        worst = idx;
                    }
                    count += 1;
                    cur = self.next[idx].next_same_node;
                }
                if count < self.pair_limit {
                    self.head[node] = self.push(cand, first);
                } else if cand.score > self.next[worst].score {
                    self.replace(worst, cand);
                }
            }
        }
    }

    fn push(&mut self, mut cand: Token, link: u32) -> u32 {
        cand.next_same_node = link;
        self.next.push(cand);
        (self.next.len() - 1) as u32
    }

    fn replace(&mut self, idx: usize, mut cand: Token) {
        cand.next_same_node = self.next[idx].next_same_node;
        self.next[idx] = cand;
    }

    /// Keep the `width` best tokens of the current frame and drop impossible
    /// ones. Ties are broken in favour of the earlier token; survivors keep
    /// their registration order. Returns the number of survivors.
    pub fn prune(&mut self, width: usize) -> usize {
        self.clear_index();

        let n = self.next.len();
        if n > width {
            self.rank.clear();
            self.rank.extend(0..n);
            let tokens = &self.next;
            self.rank.select_nth_unstable_by(width - 1, |&a, &b| {
                tokens[b].score.total_cmp(&tokens[a].score).then(a.cmp(&b))
            });
            self.keep.clear();
            self.keep.resize(n, false);
            for &i in &self.rank[..width] {
                self.keep[i] = true;
            }
            let mut i = 0;
            let keep = &self.keep;
            self.next.retain(|_| {
                let k = keep[i];
                i += 1;
                k
            });
        }
        self.next.retain(|tk| !is_log_zero(tk.score));

        // rebuild the node index for the surviving tokens
        for (i, tk) in self.next.iter_mut().enumerate() {
            tk.next_same_node = NO_TOKEN;
            let slot = &mut self.head[tk.node];
            if *slot != NO_TOKEN {
                tk.next_same_node = *slot;
            }
            *slot = i as u32;
        }
        self.next.len()
    }

    /// Best token of the current frame (earliest on ties)
    pub fn best(&self) -> Option<&Token> {
        self.next
            .iter()
            .fold(None, |best: Option<&Token>, tk| match best {
                Some(b) if b.score >= tk.score => Some(b),
                _ => Some(tk),
            })
    }
}

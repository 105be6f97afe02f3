//! Word confidence from score posteriors
//!
//! Both methods turn a set of scores into posteriors with
//! `10^(alpha * (score - best))`, normalised over the set.

use std::collections::{HashMap, HashSet};

use crate::types::{LogProb, WordId};

/// Posterior of every score in `scores` (best first or not)
pub fn posteriors(scores: &[LogProb], alpha: f32) -> Vec<f32> {
    let Some(best) = scores.iter().copied().reduce(LogProb::max) else {
        return Vec::new();
    };
    let weights: Vec<f32> = scores
        .iter()
        .map(|&s| 10f32.powf(alpha * (s - best)))
        .collect();
    let sum: f32 = weights.iter().sum();
    weights.into_iter().map(|w| w / sum).collect()
}

/// Word confidence over an N-best list: each word gets the summed posterior
/// of every sentence containing the same word id, counting a sentence once
/// however often the word occurs in it.
pub fn nbest_confidence(sentences: &[(&[WordId], LogProb)], alpha: f32) -> Vec<Vec<f32>> {
    let scores: Vec<LogProb> = sentences.iter().map(|(_, s)| *s).collect();
    let post = posteriors(&scores, alpha);

    let mut per_word: HashMap<WordId, f32> = HashMap::new();
    for ((words, _), p) in sentences.iter().zip(&post) {
        let distinct: HashSet<WordId> = words.iter().copied().collect();
        for w in distinct {
            *per_word.entry(w).or_insert(0.0) += p;
        }
    }

    sentences
        .iter()
        .map(|(words, _)| words.iter().map(|w| per_word[w]).collect())
        .collect()
}

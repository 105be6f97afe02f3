//! Properties of the two-pass search on small hand-built models

use std::collections::HashMap;
use std::sync::Arc;

use approx::assert_relative_eq;
use lvcsr_search::{
    CancelFlag, CrossWordMode, HmmDefinition, HmmSet, LanguageModel, LmState, LogProb, NullSink,
    Pass1, Pass1Status, PhoneContext, ScoreTable, SearchConfig, SearchModel, SearchStatus, Searcher,
    SegmentStart, StateId, Vocabulary, WordEntry, WordId,
};

/// Context-free LM, one score per word
struct Unigram(Vec<LogProb>);

impl LanguageModel for Unigram {
    fn describe(&self) -> String {
        "unigram".to_string()
    }

    fn start_words(&self) -> Vec<WordId> {
        (0..self.0.len()).collect()
    }

    fn forward_score(&self, _context: Option<WordId>, word: WordId) -> LogProb {
        self.0[word]
    }

    fn unigram_bound(&self, word: WordId) -> LogProb {
        self.0[word]
    }

    fn can_end(&self, _word: WordId) -> bool {
        true
    }

    fn first_words(&self) -> Option<Vec<WordId>> {
        None
    }

    fn backward_score(&self, word: WordId, _following: &[WordId], state: LmState) -> Option<(LogProb, LmState)> {
        Some((self.0[word], state))
    }

    fn is_acceptable(&self, _sequence: &[WordId], _state: LmState) -> bool {
        true
    }
}

/// Left-to-right HMM, 0.5 self loop and forward probability
fn ltr(name: &str, states: &[StateId]) -> HmmDefinition {
    let n = states.len();
    let half = 0.5f32.ln();
    let mut rows = vec![vec![None; n + 2]; n + 2];
    rows[0][1] = Some(0.0);
    for i in 1..=n {
        rows[i][i] = Some(half);
        rows[i][i + 1] = Some(half);
    }
    HmmDefinition {
        name: name.to_string(),
        states: states.to_vec(),
        transitions: rows,
    }
}

fn lcg_rows(frames: usize, states: usize, mut seed: u64) -> ScoreTable {
    let rows = (0..frames)
        .map(|_| {
            (0..states)
                .map(|_| {
                    seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
                    -1.0 - ((seed >> 33) % 500) as f32 / 100.0
                })
                .collect()
        })
        .collect();
    ScoreTable::from_rows(rows).unwrap()
}

const TRIPHONE_LM: [LogProb; 3] = [-0.4, -0.6, -0.9];

/// Two phones with a few cross-word triphones
fn triphone_model() -> SearchModel {
    let defs = vec![
        ltr("a", &[0, 1]),
        ltr("b", &[2, 3]),
        ltr("b-a+b", &[4, 5]),
        ltr("a-b+a", &[6, 7]),
        ltr("a-b", &[8, 9]),
        ltr("b-a", &[10, 11]),
    ];
    let hmms = HmmSet::new(defs, &HashMap::new()).unwrap();
    let vocab = Vocabulary::new(vec![
        WordEntry::new("ab", &["a", "b"]),
        WordEntry::new("ba", &["b", "a"]),
        WordEntry::new("a", &["a"]),
    ])
    .unwrap();
    SearchModel::new(hmms, vocab, Arc::new(Unigram(TRIPHONE_LM.to_vec()))).unwrap()
}

/// Best score of `words` over all `frames`, every phone resolved with its
/// neighbours across word boundaries (unknown at the sentence ends). Each
/// frame stays in its state or moves on by one, always at 0.5.
fn exact_score(model: &SearchModel, scores: &ScoreTable, frames: usize, words: &[WordId]) -> LogProb {
    let phones: Vec<&str> = words
        .iter()
        .flat_map(|&w| model.vocab.word(w).phones.iter().map(String::as_str))
        .collect();
    let mut outputs = Vec::new();
    for (i, &center) in phones.iter().enumerate() {
        let left = i.checked_sub(1).map(|j| phones[j]);
        let right = phones.get(i + 1).copied();
        let phone = model.hmms.resolve(&PhoneContext::new(left, center, right)).unwrap();
        outputs.extend(phone.outputs);
    }
    if outputs.len() > frames {
        return f32::NEG_INFINITY;
    }

    let mut best = vec![f32::NEG_INFINITY; outputs.len()];
    best[0] = model.hmms.score(scores, 0, &outputs[0]);
    for t in 1..frames {
        for s in (0..outputs.len()).rev() {
            let from = if s > 0 { best[s].max(best[s - 1]) } else { best[s] };
            best[s] = from + model.hmms.score(scores, t, &outputs[s]);
        }
    }
    let lm: LogProb = words.iter().map(|&w| TRIPHONE_LM[w]).sum();
    best[outputs.len() - 1] + lm + (frames - 1) as f32 * 0.5f32.ln()
}

fn exhaustive_config() -> SearchConfig {
    let mut config = SearchConfig::default().lm_weights(1.0, 0.0).beam_width(100_000);
    config.pass2.scan_beam = None;
    config.pass2.envelope_width = 100_000;
    config.pass2.stack_size = 100_000;
    config.pass2.max_expansions = 1_000_000;
    config
}

#[test]
fn test_backscan_and_nextscan_agree() {
    let model = triphone_model();
    assert!(model.hmms.is_context_dependent());
    let scores = lcg_rows(24, model.hmms.state_count(), 3);

    let backscan = exhaustive_config().crossword(CrossWordMode::Backscan);
    let nextscan = exhaustive_config().crossword(CrossWordMode::Nextscan);

    let a = Searcher::new(&model, &backscan)
        .unwrap()
        .decode(&scores, &CancelFlag::new(), &mut NullSink)
        .unwrap();
    let b = Searcher::new(&model, &nextscan)
        .unwrap()
        .decode(&scores, &CancelFlag::new(), &mut NullSink)
        .unwrap();

    assert_eq!(a[0].status, SearchStatus::Clean);
    assert_eq!(b[0].status, SearchStatus::Clean);
    let (a, b) = (a[0].best().unwrap(), b[0].best().unwrap());
    assert_eq!(a.words, b.words);
    assert_relative_eq!(a.score, b.score, epsilon = 1e-3);
}

#[test]
fn test_best_sentence_matches_enumeration_over_all_sentences() {
    let model = triphone_model();
    // every word has at least two states, so no sentence is longer than six
    let frames = 12;

    for seed in [3, 13] {
        let scores = lcg_rows(frames, model.hmms.state_count(), seed);

        let mut sentences: Vec<Vec<WordId>> = vec![Vec::new()];
        let mut best: Option<(LogProb, Vec<WordId>)> = None;
        for _ in 0..frames / 2 {
            sentences = sentences
                .iter()
                .flat_map(|s| {
                    (0..model.vocab.len()).map(move |w| {
                        let mut longer = s.clone();
                        longer.push(w);
                        longer
                    })
                })
                .collect();
            for words in &sentences {
                let score = exact_score(&model, &scores, frames, words);
                if best.as_ref().map_or(true, |(b, _)| score > *b) {
                    best = Some((score, words.clone()));
                }
            }
        }
        let (best_score, best_words) = best.unwrap();

        for mode in [CrossWordMode::Backscan, CrossWordMode::Nextscan] {
            let config = exhaustive_config().crossword(mode).nbest(5);
            let results = Searcher::new(&model, &config)
                .unwrap()
                .decode(&scores, &CancelFlag::new(), &mut NullSink)
                .unwrap();
            assert_eq!(results[0].status, SearchStatus::Clean, "seed {seed} {mode:?}");

            let sentence = results[0].best().unwrap();
            assert_eq!(sentence.words, best_words, "seed {seed} {mode:?}");
            assert_relative_eq!(sentence.score, best_score, epsilon = 1e-3);
            for other in &results[0].sentences {
                let exact = exact_score(&model, &scores, frames, &other.words);
                assert!(other.score <= exact + 1e-3, "seed {seed} {mode:?}: {:?}", other.words);
            }
        }
    }
}

#[test]
fn test_wider_beam_never_scores_worse() {
    let model = triphone_model();
    let scores = lcg_rows(30, model.hmms.state_count(), 17);

    let narrow = SearchConfig::default().beam_width(2);
    let wide = SearchConfig::default().beam_width(100_000);
    let run = |config: &SearchConfig| {
        let mut pass1 = Pass1::new(&model, config);
        pass1
            .run(&scores, SegmentStart::default(), &CancelFlag::new(), &mut NullSink)
            .best
            .map(|b| b.score)
    };

    let wide_score = run(&wide).unwrap();
    if let Some(narrow_score) = run(&narrow) {
        assert!(wide_score >= narrow_score - 1e-3);
    }
}

/// Monophone words of one state each: every frame either loops (0.5) or
/// crosses into the next word (exit 0.5 plus LM), so a sentence scores
/// `sum(outputs) + sum(lm) + (T - 1) ln 0.5`.
#[test]
fn test_first_sentence_is_the_exhaustive_optimum() {
    let defs = vec![ltr("y", &[0]), ltr("n", &[1]), ltr("m", &[2])];
    let hmms = HmmSet::new(defs, &HashMap::new()).unwrap();
    let vocab = Vocabulary::new(vec![
        WordEntry::new("yes", &["y"]),
        WordEntry::new("no", &["n"]),
        WordEntry::new("maybe", &["m"]),
    ])
    .unwrap();
    let lm = vec![-0.3, -0.5, -1.2];
    let model = SearchModel::new(hmms, vocab, Arc::new(Unigram(lm.clone()))).unwrap();

    let rows = vec![
        vec![-1.0, -3.0, -4.0],
        vec![-1.0, -3.0, -4.0],
        vec![-4.0, -1.0, -3.0],
        vec![-4.0, -1.0, -3.0],
        vec![-3.0, -4.0, -1.0],
        vec![-1.0, -4.0, -3.0],
    ];
    let frames = rows.len();
    let scores = ScoreTable::from_rows(rows.clone()).unwrap();

    let mut best = f32::NEG_INFINITY;
    for code in 0..3usize.pow(frames as u32) {
        let labels: Vec<usize> = (0..frames).map(|t| code / 3usize.pow(t as u32) % 3).collect();
        let mut total = (frames as f32 - 1.0) * 0.5f32.ln();
        for (t, &w) in labels.iter().enumerate() {
            total += rows[t][w];
            if t == 0 || labels[t - 1] != w {
                total += lm[w];
            }
        }
        best = best.max(total);
    }

    let config = exhaustive_config();
    let results = Searcher::new(&model, &config)
        .unwrap()
        .decode(&scores, &CancelFlag::new(), &mut NullSink)
        .unwrap();
    let sentence = results[0].best().unwrap();
    assert_relative_eq!(sentence.score, best, epsilon = 1e-3);
    assert_eq!(model.vocab.outputs(&sentence.words), vec!["yes", "no", "maybe", "yes"]);
}

fn pause_model() -> SearchModel {
    let defs = vec![ltr("y", &[0]), ltr("n", &[1]), ltr("sil", &[2])];
    let hmms = HmmSet::new(defs, &HashMap::new()).unwrap();
    let vocab = Vocabulary::new(vec![
        WordEntry::new("yes", &["y"]),
        WordEntry::new("no", &["n"]),
        WordEntry::new("<sil>", &["sil"]),
    ])
    .unwrap()
    .with_pause_phones(&["sil"]);
    SearchModel::new(hmms, vocab, Arc::new(Unigram(vec![-0.3, -0.3, -0.1]))).unwrap()
}

/// silence, "yes", a long pause, "no", a short pause
fn pause_scores() -> ScoreTable {
    let frame = |state: usize| {
        let mut row = vec![-5.0; 3];
        row[state] = -1.0;
        row
    };
    let mut rows = Vec::new();
    rows.extend((0..10).map(|_| frame(2)));
    rows.extend((0..10).map(|_| frame(0)));
    rows.extend((0..15).map(|_| frame(2)));
    rows.extend((0..10).map(|_| frame(1)));
    rows.extend((0..5).map(|_| frame(2)));
    ScoreTable::from_rows(rows).unwrap()
}

#[test]
fn test_long_pause_splits_into_two_segments() {
    let model = pause_model();
    let config = SearchConfig::default().lm_weights(1.0, 0.0).segmentation(10);
    let results = Searcher::new(&model, &config)
        .unwrap()
        .decode(&pause_scores(), &CancelFlag::new(), &mut NullSink)
        .unwrap();

    assert_eq!(results.len(), 2);
    assert_eq!(results[0].start_frame, 0);
    assert_eq!(results[0].frames, 35);
    assert_eq!(results[1].start_frame, 20);
    assert_eq!(results[1].frames, 30);

    let first = model.vocab.outputs(&results[0].best().unwrap().words);
    let second = model.vocab.outputs(&results[1].best().unwrap().words);
    assert!(first.contains(&"yes".to_string()) && !first.contains(&"no".to_string()));
    assert!(second.contains(&"no".to_string()) && !second.contains(&"yes".to_string()));
    assert_eq!(second.first().map(String::as_str), Some("<sil>"));
}

#[test]
fn test_segment_carries_lm_context() {
    let model = pause_model();
    let config = SearchConfig::default().lm_weights(1.0, 0.0).segmentation(10);
    let mut pass1 = Pass1::new(&model, &config);
    let outcome = pass1.run(&pause_scores(), SegmentStart::default(), &CancelFlag::new(), &mut NullSink);

    assert_eq!(outcome.status, Pass1Status::Segmented { resume_frame: 20 });
    let next = outcome.next.unwrap();
    assert_eq!(next.context, model.vocab.id_of("yes"));
    assert_eq!(next.resume_word, model.vocab.id_of("<sil>"));
}

/// "yes" / "no" / "maybe" with one single-state phone each, ten frames of "yes"
#[test]
fn test_toy_utterance_at_narrow_and_wide_beam() {
    let defs = vec![ltr("y", &[0]), ltr("n", &[1]), ltr("m", &[2])];
    let hmms = HmmSet::new(defs, &HashMap::new()).unwrap();
    let vocab = Vocabulary::new(vec![
        WordEntry::new("yes", &["y"]),
        WordEntry::new("no", &["n"]),
        WordEntry::new("maybe", &["m"]),
    ])
    .unwrap();
    let model = SearchModel::new(hmms, vocab, Arc::new(Unigram(vec![-0.3, -0.5, -1.2]))).unwrap();
    let scores = ScoreTable::from_rows(vec![vec![-1.0, -5.0, -5.0]; 10]).unwrap();
    // one LM score, ten outputs, nine self loops
    let expected = -0.3 - 10.0 + 9.0 * 0.5f32.ln();

    for beam in [1, 100] {
        let config = SearchConfig::default().lm_weights(1.0, 0.0).beam_width(beam);
        let results = Searcher::new(&model, &config)
            .unwrap()
            .decode(&scores, &CancelFlag::new(), &mut NullSink)
            .unwrap();
        let best = results[0].best().unwrap();
        assert_eq!(model.vocab.outputs(&best.words), vec!["yes"], "beam {beam}");
        assert_relative_eq!(best.score, expected, epsilon = 1e-3);
    }
}

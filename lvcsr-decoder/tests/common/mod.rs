//! Toy model bundles shared by the integration tests

#![allow(dead_code)]

use std::path::{Path, PathBuf};

use tempfile::TempDir;

/// Phones of the toy model; phone `i` emits HMM state `i`
pub const PHONES: [&str; 3] = ["sil", "y", "n"];

pub const ARPA: &str = "\
\\data\\
ngram 1=4
ngram 2=6

\\1-grams:
-1.0 <s> -0.3
-0.7 </s>
-0.5 yes -0.2
-0.6 no -0.2

\\2-grams:
-0.1 <s> yes
-0.5 <s> no
-0.2 yes </s>
-0.2 no </s>
-0.6 yes no
-0.6 no yes

\\end\\
";

fn hmm_json(name: &str, state: usize) -> String {
    let half = 0.5f32.ln();
    format!(
        r#"{{ "name": "{name}", "states": [{state}], "transitions": [[null, 0.0, null], [null, {half}, {half}], [null, null, null]] }}"#
    )
}

/// Write an N-gram bundle into a fresh directory; returns (dir, bundle path)
pub fn ngram_bundle() -> (TempDir, PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("lm.arpa"), ARPA).unwrap();

    let hmms: Vec<String> = PHONES.iter().enumerate().map(|(i, p)| hmm_json(p, i)).collect();
    let bundle = format!(
        r#"{{
            "hmms": [{}],
            "dictionary": [
                {{ "name": "<s>", "phones": ["sil"] }},
                {{ "name": "</s>", "phones": ["sil"] }},
                {{ "name": "yes", "phones": ["y"] }},
                {{ "name": "no", "phones": ["n"] }}
            ],
            "pause_phones": ["sil"],
            "lm": {{ "type": "ngram", "forward": "lm.arpa" }}
        }}"#,
        hmms.join(", ")
    );
    let path = dir.path().join("bundle.json");
    std::fs::write(&path, bundle).unwrap();
    (dir, path)
}

/// One frame where `state` scores -1 and every other state -6
pub fn frame(state: usize) -> Vec<f32> {
    let mut row = vec![-6.0; PHONES.len()];
    row[state] = -1.0;
    row
}

/// Frames of silence, `word_state` and silence again
pub fn utterance(word_state: usize) -> Vec<Vec<f32>> {
    let mut rows = Vec::new();
    rows.extend((0..4).map(|_| frame(0)));
    rows.extend((0..6).map(|_| frame(word_state)));
    rows.extend((0..4).map(|_| frame(0)));
    rows
}

/// Write `rows` as a score file next to the bundle
pub fn write_scores(dir: &Path, name: &str, rows: &[Vec<f32>]) -> PathBuf {
    let path = dir.join(name);
    let text = serde_json::json!({ "frames": rows }).to_string();
    std::fs::write(&path, text).unwrap();
    path
}

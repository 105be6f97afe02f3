//! ARPA-format N-gram tables
//!
//! Reads `\data\` / `\N-grams:` text files up to trigrams. Scores stay in
//! log10 as written in the file; the search scales them with its LM weight.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use tracing::{debug, warn};

use crate::error::{LmError, Result};

/// Highest order kept in memory
const MAX_ORDER: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq)]
struct Entry {
    prob: f32,
    backoff: f32,
}

/// N-gram probabilities with Katz backoff
#[derive(Debug, Clone, Default)]
pub struct NgramTable {
    order: usize,
    words: Vec<String>,
    index: HashMap<String, u32>,
    unigrams: Vec<Entry>,
    bigrams: HashMap<(u32, u32), Entry>,
    trigrams: HashMap<(u32, u32, u32), f32>,
    /// Best bigram score of each word over all contexts
    bounds: Vec<f32>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Section {
    Preamble,
    Data,
    Grams(usize),
    End,
}

impl NgramTable {
    /// Read an ARPA file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)?;
        let table = Self::from_reader(BufReader::new(file))?;
        debug!(
            "Loaded {}-gram {} ({} words)",
            table.order,
            path.display(),
            table.len()
        );
        Ok(table)
    }

    /// Parse ARPA text held in memory
    pub fn parse(text: &str) -> Result<Self> {
        Self::from_reader(text.as_bytes())
    }

    pub fn from_reader<R: BufRead>(reader: R) -> Result<Self> {
        let mut table = Self::default();
        let mut counts: Vec<usize> = Vec::new();
        let mut seen: Vec<usize> = Vec::new();
        let mut section = Section::Preamble;

        for (i, line) in reader.lines().enumerate() {
            let line = line?;
            let lineno = i + 1;
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            if line == "\\data\\" {
                section = Section::Data;
                continue;
            }
            if line == "\\end\\" {
                section = Section::End;
                break;
            }
            if let Some(n) = line
                .strip_prefix('\\')
                .and_then(|s| s.strip_suffix("-grams:"))
            {
                let n: usize = n
                    .parse()
                    .map_err(|_| LmError::parse(lineno, format!("bad section header {line}")))?;
                if n == 0 || n > counts.len() {
                    return Err(LmError::parse(lineno, format!("section {n}-grams not announced in \\data\\")));
                }
                section = Section::Grams(n);
                continue;
            }

            match section {
                Section::Preamble => {}
                Section::Data => {
                    let (n, count) = parse_count(line)
                        .ok_or_else(|| LmError::parse(lineno, format!("expected 'ngram N=count', got {line}")))?;
                    if n != counts.len() + 1 {
                        return Err(LmError::parse(lineno, "n-gram counts out of order"));
                    }
                    counts.push(count);
                    seen.push(0);
                }
                Section::Grams(n) => {
                    seen[n - 1] += 1;
                    if n > MAX_ORDER {
                        continue;
                    }
                    table.add_line(n, counts.len(), line, lineno)?;
                }
                Section::End => break,
            }
        }

        if section != Section::End {
            return Err(LmError::invalid_model("missing \\end\\ marker"));
        }
        if counts.is_empty() || table.unigrams.is_empty() {
            return Err(LmError::invalid_model("no unigrams"));
        }
        for (n, (&want, &got)) in counts.iter().zip(&seen).enumerate() {
            if want != got {
                return Err(LmError::invalid_model(format!(
                    "{}-gram count is {want} but {got} entries were read",
                    n + 1
                )));
            }
        }
        if counts.len() > MAX_ORDER {
            warn!("Ignoring n-grams above order {}", MAX_ORDER);
        }
        table.order = counts.len().min(MAX_ORDER);
        table.compute_bounds();
        Ok(table)
    }

    fn add_line(&mut self, n: usize, max_order: usize, line: &str, lineno: usize) -> Result<()> {
        let fields: Vec<&str> = line.split_whitespace().collect();
        let expect = if n < max_order { n + 1..=n + 2 } else { n + 1..=n + 1 };
        if !expect.contains(&fields.len()) {
            return Err(LmError::parse(
                lineno,
                format!("{n}-gram entry has {} fields", fields.len()),
            ));
        }
        let number = |s: &str| {
            s.parse::<f32>()
                .map_err(|_| LmError::parse(lineno, format!("bad number {s}")))
        };
        let prob = number(fields[0])?;
        let backoff = match fields.get(n + 1) {
            Some(s) => number(s)?,
            None => 0.0,
        };

        if n == 1 {
            let word = fields[1];
            if self.index.contains_key(word) {
                return Err(LmError::parse(lineno, format!("duplicate unigram {word}")));
            }
            self.index.insert(word.to_string(), self.words.len() as u32);
            self.words.push(word.to_string());
            self.unigrams.push(Entry { prob, backoff });
            return Ok(());
        }

        let ids = fields[1..=n]
            .iter()
            .map(|w| {
                self.id(w)
                    .ok_or_else(|| LmError::parse(lineno, format!("{w} has no unigram")))
            })
            .collect::<Result<Vec<u32>>>()?;
        match ids[..] {
            [a, b] => {
                self.bigrams.insert((a, b), Entry { prob, backoff });
            }
            [a, b, c] => {
                self.trigrams.insert((a, b, c), prob);
            }
            _ => {}
        }
        Ok(())
    }

    fn compute_bounds(&mut self) {
        let max_backoff = self
            .unigrams
            .iter()
            .map(|e| e.backoff)
            .fold(f32::NEG_INFINITY, f32::max);
        self.bounds = self
            .unigrams
            .iter()
            .map(|e| {
                if self.order >= 2 {
                    e.prob + max_backoff
                } else {
                    e.prob
                }
            })
            .collect();
        for (&(_, b), entry) in &self.bigrams {
            let bound = &mut self.bounds[b as usize];
            if entry.prob > *bound {
                *bound = entry.prob;
            }
        }
    }

    /// Highest order used in lookups
    pub fn order(&self) -> usize {
        self.order
    }

    /// Number of words
    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    pub fn id(&self, word: &str) -> Option<u32> {
        self.index.get(word).copied()
    }

    pub fn word(&self, id: u32) -> &str {
        &self.words[id as usize]
    }

    /// log10 P(word | context), context oldest first. Only the last
    /// `order - 1` context words are used.
    pub fn prob(&self, context: &[u32], word: u32) -> f32 {
        match *context {
            [.., a, b] if self.order >= 3 => {
                if let Some(&p) = self.trigrams.get(&(a, b, word)) {
                    return p;
                }
                let backoff = self.bigrams.get(&(a, b)).map_or(0.0, |e| e.backoff);
                backoff + self.prob(&[b], word)
            }
            [.., b] if self.order >= 2 => match self.bigrams.get(&(b, word)) {
                Some(e) => e.prob,
                None => self.unigrams[b as usize].backoff + self.unigrams[word as usize].prob,
            },
            _ => self.unigrams[word as usize].prob,
        }
    }

    /// Upper bound of `prob(&[c], word)` over every single-word context `c`
    pub fn bigram_bound(&self, word: u32) -> f32 {
        self.bounds[word as usize]
    }
}

fn parse_count(line: &str) -> Option<(usize, usize)> {
    let rest = line.strip_prefix("ngram")?.trim();
    let (n, count) = rest.split_once('=')?;
    Some((n.trim().parse().ok()?, count.trim().parse().ok()?))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use approx::assert_relative_eq;

    pub(crate) const SMALL: &str = "\
\\data\\
ngram 1=5
ngram 2=5
ngram 3=1

\\1-grams:
-1.0 <s> -0.5
-0.7 </s>
-0.6 yes -0.3
-0.8 no -0.2
-1.5 maybe

\\2-grams:
-0.2 <s> yes -0.1
-0.4 <s> no
-0.3 yes </s>
-0.3 no </s>
-0.9 yes no

\\3-grams:
-0.05 <s> yes </s>

\\end\\
";

    #[test]
    fn test_parse_counts_and_words() {
        let table = NgramTable::parse(SMALL).unwrap();
        assert_eq!(table.order(), 3);
        assert_eq!(table.len(), 5);
        assert_eq!(table.word(table.id("maybe").unwrap()), "maybe");
        assert!(table.id("perhaps").is_none());
    }

    #[test]
    fn test_backoff_lookup() {
        let table = NgramTable::parse(SMALL).unwrap();
        let id = |w| table.id(w).unwrap();
        // explicit entries
        assert_relative_eq!(table.prob(&[], id("yes")), -0.6);
        assert_relative_eq!(table.prob(&[id("<s>")], id("yes")), -0.2);
        assert_relative_eq!(table.prob(&[id("<s>"), id("yes")], id("</s>")), -0.05);
        // bigram backoff: bo(no) + p(maybe)
        assert_relative_eq!(table.prob(&[id("no")], id("maybe")), -0.2 - 1.5);
        // trigram backoff: bo(<s> yes) + p(no | yes)
        assert_relative_eq!(table.prob(&[id("<s>"), id("yes")], id("no")), -0.1 - 0.9);
        // missing bigram context has zero backoff
        assert_relative_eq!(table.prob(&[id("no"), id("yes")], id("</s>")), -0.3);
    }

    #[test]
    fn test_bigram_bound_covers_all_contexts() {
        let table = NgramTable::parse(SMALL).unwrap();
        for w in 0..table.len() as u32 {
            for c in 0..table.len() as u32 {
                assert!(table.prob(&[c], w) <= table.bigram_bound(w) + 1e-6);
            }
        }
    }

    #[test]
    fn test_rejects_bad_input() {
        assert!(NgramTable::parse("\\data\\\nngram 1=1\n\\1-grams:\n-1.0 a\n").is_err());
        let wrong_count = "\\data\\\nngram 1=2\n\\1-grams:\n-1.0 a\n\\end\\\n";
        assert!(matches!(
            NgramTable::parse(wrong_count),
            Err(LmError::InvalidModel(_))
        ));
        let unknown = "\\data\\\nngram 1=1\nngram 2=1\n\\1-grams:\n-1.0 a\n\\2-grams:\n-1.0 a b\n\\end\\\n";
        assert!(matches!(NgramTable::parse(unknown), Err(LmError::Parse { line: 7, .. })));
    }
}

//! Pronunciation dictionary

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SearchError};
use crate::types::WordId;

/// Serialized dictionary entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WordEntry {
    /// Name used by the language model
    pub name: String,

    /// Text reported in results (defaults to `name`)
    #[serde(default)]
    pub output: Option<String>,

    /// Base phone sequence
    pub phones: Vec<String>,

    /// Transparent words (fillers) do not become LM context
    #[serde(default)]
    pub transparent: bool,
}

impl WordEntry {
    pub fn new(name: &str, phones: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            output: None,
            phones: phones.iter().map(|p| p.to_string()).collect(),
            transparent: false,
        }
    }

    pub fn transparent(mut self) -> Self {
        self.transparent = true;
        self
    }
}

/// Dictionary word
#[derive(Debug, Clone, PartialEq)]
pub struct Word {
    pub name: String,
    pub output: String,
    pub phones: Vec<String>,
    pub transparent: bool,
    /// Single pause phone word, used by short-pause segmentation
    pub silence: bool,
}

impl Word {
    pub fn head_phone(&self) -> &str {
        &self.phones[0]
    }

    pub fn tail_phone(&self) -> &str {
        &self.phones[self.phones.len() - 1]
    }
}

/// All dictionary words, indexed by [`WordId`]
#[derive(Debug, Clone, Default)]
pub struct Vocabulary {
    words: Vec<Word>,
    index: HashMap<String, WordId>,
}

impl Vocabulary {
    pub fn new(entries: Vec<WordEntry>) -> Result<Self> {
        let mut vocab = Self::default();
        for entry in entries {
            if entry.phones.is_empty() {
                return Err(SearchError::invalid_model(format!(
                    "word {} has no phones",
                    entry.name
                )));
            }
            let id = vocab.words.len();
            // Pronunciation variants share a name; lookups return the first.
            vocab.index.entry(entry.name.clone()).or_insert(id);
            vocab.words.push(Word {
                output: entry.output.unwrap_or_else(|| entry.name.clone()),
                name: entry.name,
                phones: entry.phones,
                transparent: entry.transparent,
                silence: false,
            });
        }
        if vocab.words.is_empty() {
            return Err(SearchError::invalid_model("empty dictionary"));
        }
        Ok(vocab)
    }

    /// Mark single-phone words made of one of `phones` as silence words
    pub fn with_pause_phones<S: AsRef<str>>(mut self, phones: &[S]) -> Self {
        for word in &mut self.words {
            word.silence =
                word.phones.len() == 1 && phones.iter().any(|p| p.as_ref() == word.phones[0]);
        }
        self
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    pub fn word(&self, id: WordId) -> &Word {
        &self.words[id]
    }

    pub fn words(&self) -> impl Iterator<Item = (WordId, &Word)> {
        self.words.iter().enumerate()
    }

    pub fn id_of(&self, name: &str) -> Option<WordId> {
        self.index.get(name).copied()
    }

    /// Like [`Vocabulary::id_of`], as an error when missing
    pub fn require(&self, name: &str) -> Result<WordId> {
        self.id_of(name)
            .ok_or_else(|| SearchError::UnknownWord(name.to_string()))
    }

    pub fn is_transparent(&self, id: WordId) -> bool {
        self.words[id].transparent
    }

    pub fn is_silence(&self, id: WordId) -> bool {
        self.words[id].silence
    }

    /// Output strings of a word sequence
    pub fn outputs(&self, ids: &[WordId]) -> Vec<String> {
        ids.iter().map(|&w| self.words[w].output.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_and_variants() {
        let vocab = Vocabulary::new(vec![
            WordEntry::new("yes", &["y", "e", "s"]),
            WordEntry::new("yes", &["y", "a", "s"]),
            WordEntry::new("sil", &["sil"]).transparent(),
        ])
        .unwrap()
        .with_pause_phones(&["sil", "sp"]);

        assert_eq!(vocab.len(), 3);
        assert_eq!(vocab.id_of("yes"), Some(0));
        assert_eq!(vocab.word(1).tail_phone(), "s");
        assert!(vocab.is_silence(2));
        assert!(vocab.is_transparent(2));
        assert!(!vocab.is_silence(0));
        assert_eq!(vocab.outputs(&[1, 2]), vec!["yes", "sil"]);
    }

    #[test]
    fn test_rejects_empty_pronunciation() {
        let err = Vocabulary::new(vec![WordEntry::new("x", &[])]).unwrap_err();
        assert!(err.to_string().contains("no phones"));
        assert!(Vocabulary::new(vec![]).is_err());
    }

    #[test]
    fn test_require_unknown_word() {
        let vocab = Vocabulary::new(vec![WordEntry::new("a", &["a"])]).unwrap();
        assert!(matches!(vocab.require("b"), Err(SearchError::UnknownWord(_))));
    }
}

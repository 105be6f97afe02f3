//! Result formatting
//!
//! Text output prints one line per sentence; JSON output prints one object
//! per segment (JSON lines), so a consumer can read results as segments
//! close during streaming.

use std::io::Write;

use clap::ValueEnum;
use lvcsr_search::{
    LogProb, Pass1Result, Pass1Status, ResultSink, SearchStatus, SegmentResult, Termination,
    Vocabulary, WordId,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

/// One sentence with word strings instead of ids
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SentenceRecord {
    pub words: Vec<String>,
    pub score: LogProb,
    pub am_score: LogProb,
    pub lm_score: LogProb,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<Vec<f32>>,
}

/// Serialized form of a [`SegmentResult`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentRecord {
    pub segment: usize,
    pub start_frame: usize,
    pub frames: usize,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub termination: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pass1: Option<Vec<String>>,
    pub sentences: Vec<SentenceRecord>,
}

impl SegmentRecord {
    pub fn new(result: &SegmentResult, vocab: &Vocabulary) -> Self {
        Self {
            segment: result.index,
            start_frame: result.start_frame,
            frames: result.frames,
            status: status_name(result.status).to_string(),
            termination: result.termination.map(|t| termination_name(t).to_string()),
            pass1: result.pass1.as_ref().map(|p| vocab.outputs(&p.words)),
            sentences: result
                .sentences
                .iter()
                .map(|s| SentenceRecord {
                    words: vocab.outputs(&s.words),
                    score: s.score,
                    am_score: s.am_score,
                    lm_score: s.lm_score,
                    confidence: s.confidence.clone(),
                })
                .collect(),
        }
    }
}

fn status_name(status: SearchStatus) -> &'static str {
    match status {
        SearchStatus::Clean => "clean",
        SearchStatus::Fallback => "fallback",
        SearchStatus::Nothing => "nothing",
    }
}

fn termination_name(termination: Termination) -> &'static str {
    match termination {
        Termination::Found => "found",
        Termination::Overflow => "overflow",
        Termination::Exhausted => "exhausted",
        Termination::Cancelled => "cancelled",
    }
}

/// Render one segment in `format`, without a trailing newline
pub fn format_segment(result: &SegmentResult, vocab: &Vocabulary, format: OutputFormat) -> String {
    let record = SegmentRecord::new(result, vocab);
    match format {
        OutputFormat::Json => serde_json::to_string(&record).unwrap_or_else(|e| {
            error!("Failed to serialize segment {}: {}", record.segment, e);
            String::new()
        }),
        OutputFormat::Text => {
            let mut lines = Vec::new();
            if let Some(pass1) = &record.pass1 {
                lines.push(format!("pass1_best: {}", pass1.join(" ")));
            }
            for (rank, sentence) in record.sentences.iter().enumerate() {
                lines.push(format!("sentence{}: {}", rank + 1, sentence.words.join(" ")));
                lines.push(format!(
                    "score{}: {:.3} (AM {:.3}, LM {:.3})",
                    rank + 1,
                    sentence.score,
                    sentence.am_score,
                    sentence.lm_score
                ));
                if let Some(cm) = &sentence.confidence {
                    let values: Vec<String> = cm.iter().map(|c| format!("{:.3}", c)).collect();
                    lines.push(format!("cmscore{}: {}", rank + 1, values.join(" ")));
                }
            }
            if record.sentences.is_empty() {
                lines.push("<search failed>".to_string());
            }
            format!(
                "segment {} [{}+{}] {}\n{}",
                record.segment,
                record.start_frame,
                record.frames,
                record.status,
                lines.join("\n")
            )
        }
    }
}

/// Sink that writes each segment as soon as it closes
pub struct OutputSink<'a, W: Write> {
    vocab: &'a Vocabulary,
    format: OutputFormat,
    writer: W,
    error: Option<std::io::Error>,
}

impl<'a, W: Write> OutputSink<'a, W> {
    pub fn new(vocab: &'a Vocabulary, format: OutputFormat, writer: W) -> Self {
        Self {
            vocab,
            format,
            writer,
            error: None,
        }
    }

    /// First write error, if any
    pub fn finish(mut self) -> std::io::Result<W> {
        if let Some(e) = self.error.take() {
            return Err(e);
        }
        self.writer.flush()?;
        Ok(self.writer)
    }
}

impl<W: Write> ResultSink for OutputSink<'_, W> {
    fn pass1_progress(&mut self, frame: usize, words: &[WordId], score: LogProb) {
        debug!("pass1 [{}] {} ({:.2})", frame, self.vocab.outputs(words).join(" "), score);
    }

    fn pass1_result(&mut self, status: Pass1Status, result: Option<&Pass1Result>) {
        if let Some(r) = result {
            debug!("pass1 {:?}: {}", status, self.vocab.outputs(&r.words).join(" "));
        }
    }

    fn segment(&mut self, result: &SegmentResult) {
        if self.error.is_some() {
            return;
        }
        let text = format_segment(result, self.vocab, self.format);
        if let Err(e) = writeln!(self.writer, "{}", text).and_then(|_| self.writer.flush()) {
            error!("Failed to write result: {}", e);
            self.error = Some(e);
        }
    }
}

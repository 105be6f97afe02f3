//! lvcsr decoder application
//!
//! Loads a model bundle, decodes precomputed acoustic scores in batch or
//! streaming mode and formats the results. The binary in `main.rs` is a
//! thin CLI over these modules.

pub mod config;
pub mod model;
pub mod output;
pub mod session;
pub mod stream;
pub mod version;

pub use config::DecoderConfig;
pub use model::{load_model, load_scores, parse_scores, LmSource, ModelBundle, ScoreFile};
pub use output::{format_segment, OutputFormat, OutputSink, SegmentRecord, SentenceRecord};
pub use session::Decoder;
pub use stream::FrameSender;

//! Streaming input: frames arrive over a channel while the search runs
//!
//! The search itself is synchronous, so it runs on a blocking worker that
//! pulls frames from a `tokio::sync::mpsc` channel and advances Pass 1
//! after every frame. Segments closed by a pause are finished (Pass 2)
//! right away and handed to the sink; the rest is finished when the sender
//! side is dropped. Results are identical to decoding the whole input at
//! once.

use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use lvcsr_search::{AcousticScorer, CancelFlag, LogProb, ResultSink, ScoreTable, SegmentResult};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::session::Decoder;

/// Sending side of a running stream
pub struct FrameSender {
    tx: mpsc::Sender<Vec<LogProb>>,
}

impl FrameSender {
    /// Queue one frame of state scores; waits while the buffer is full
    pub async fn send(&self, frame: Vec<LogProb>) -> Result<()> {
        self.tx
            .send(frame)
            .await
            .map_err(|_| anyhow!("Decoder stopped before end of input"))
    }
}

/// Start decoding frames sent through the returned [`FrameSender`].
///
/// `make_sink` builds the result sink on the worker thread. Drop the
/// sender to mark the end of input; the handle then yields every segment.
pub fn spawn<F>(
    decoder: Arc<Decoder>,
    buffer: usize,
    make_sink: F,
) -> (FrameSender, JoinHandle<Result<Vec<SegmentResult>>>)
where
    F: FnOnce(&Decoder) -> Box<dyn ResultSink + '_> + Send + 'static,
{
    let (tx, rx) = mpsc::channel(buffer.max(1));
    let handle = tokio::task::spawn_blocking(move || run(&decoder, rx, make_sink));
    (FrameSender { tx }, handle)
}

fn run<F>(decoder: &Decoder, mut rx: mpsc::Receiver<Vec<LogProb>>, make_sink: F) -> Result<Vec<SegmentResult>>
where
    F: FnOnce(&Decoder) -> Box<dyn ResultSink + '_>,
{
    let cancel = decoder.cancel_flag();
    let results = decode_stream(decoder, &mut rx, make_sink, &cancel);
    // a request made while the stream ran has been served
    cancel.reset();
    results
}

fn decode_stream<F>(
    decoder: &Decoder,
    rx: &mut mpsc::Receiver<Vec<LogProb>>,
    make_sink: F,
    cancel: &CancelFlag,
) -> Result<Vec<SegmentResult>>
where
    F: FnOnce(&Decoder) -> Box<dyn ResultSink + '_>,
{
    let mut sink = make_sink(decoder);
    let mut scores = ScoreTable::new(decoder.model().hmms.state_count());
    let mut searcher = decoder.searcher()?;

    info!("🎧 Stream started");
    while let Some(frame) = rx.blocking_recv() {
        scores
            .push_frame(&frame)
            .with_context(|| format!("Bad frame {}", scores.frame_count()))?;
        searcher
            .advance(&scores, cancel, sink.as_mut())
            .context("Decoding failed")?;
        if cancel.is_cancelled() {
            debug!("Stream cancelled");
            break;
        }
    }

    let results = searcher
        .finish(&scores, cancel, sink.as_mut())
        .context("Decoding failed")?;
    info!(
        "✓ Stream ended after {} frames, {} segment(s)",
        scores.frame_count(),
        results.len()
    );
    Ok(results)
}

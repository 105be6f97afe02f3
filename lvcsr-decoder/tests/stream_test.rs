//! Streaming input gives the same answer as batch input

mod common;

use std::sync::Arc;

use lvcsr_decoder::{load_model, stream, Decoder};
use lvcsr_search::{NullSink, Pass1Status, ResultSink, ScoreTable, SearchConfig};

async fn stream_rows(decoder: Arc<Decoder>, rows: &[Vec<f32>]) -> Vec<lvcsr_search::SegmentResult> {
    let (sender, handle) = stream::spawn(decoder, 4, |_| Box::new(NullSink) as Box<dyn ResultSink>);
    for row in rows {
        sender.send(row.clone()).await.unwrap();
    }
    drop(sender);
    handle.await.unwrap().unwrap()
}

#[tokio::test]
async fn test_stream_matches_batch() {
    let (_dir, bundle) = common::ngram_bundle();
    let decoder = Arc::new(Decoder::new(Arc::new(load_model(&bundle).unwrap()), SearchConfig::default()).unwrap());

    let mut rows = common::utterance(1);
    rows.extend(common::utterance(2));
    let batch = decoder
        .decode(&ScoreTable::from_rows(rows.clone()).unwrap(), &mut NullSink)
        .unwrap();
    let streamed = stream_rows(decoder, &rows).await;

    assert_eq!(streamed.len(), batch.len());
    for (s, b) in streamed.iter().zip(&batch) {
        assert_eq!(s.sentences, b.sentences);
        assert_eq!(s.status, b.status);
    }
}

#[tokio::test]
async fn test_stream_matches_batch_with_segmentation() {
    let (_dir, bundle) = common::ngram_bundle();
    let config = SearchConfig::default().lm_weights(1.0, 0.0).segmentation(3);
    let decoder = Arc::new(Decoder::new(Arc::new(load_model(&bundle).unwrap()), config).unwrap());

    let mut rows = common::utterance(1);
    rows.extend((0..6).map(|_| common::frame(0)));
    rows.extend(common::utterance(2));
    let batch = decoder
        .decode(&ScoreTable::from_rows(rows.clone()).unwrap(), &mut NullSink)
        .unwrap();
    let streamed = stream_rows(decoder, &rows).await;

    assert_eq!(streamed, batch);
}

#[tokio::test]
async fn test_bad_frame_stops_the_stream() {
    let (_dir, bundle) = common::ngram_bundle();
    let decoder = Arc::new(Decoder::new(Arc::new(load_model(&bundle).unwrap()), SearchConfig::default()).unwrap());

    let (sender, handle) = stream::spawn(decoder, 4, |_| Box::new(NullSink) as Box<dyn ResultSink>);
    // wrong number of states
    let _ = sender.send(vec![-1.0]).await;
    drop(sender);
    assert!(handle.await.unwrap().is_err());
}

#[tokio::test]
async fn test_cancelled_stream_keeps_a_short_result() {
    let (_dir, bundle) = common::ngram_bundle();
    let mut config = SearchConfig::default();
    config.min_frames = 50;
    let decoder = Arc::new(Decoder::new(Arc::new(load_model(&bundle).unwrap()), config).unwrap());
    let cancel = decoder.cancel_flag();
    cancel.cancel();

    let (sender, handle) = stream::spawn(decoder.clone(), 4, |_| Box::new(NullSink) as Box<dyn ResultSink>);
    for row in common::utterance(1).into_iter().take(3) {
        // the worker may already have stopped reading
        let _ = sender.send(row).await;
    }
    drop(sender);
    let results = handle.await.unwrap().unwrap();

    assert_eq!(results.len(), 1);
    assert!(matches!(results[0].pass1_status, Pass1Status::Cancelled { .. }));
    assert!(!cancel.is_cancelled());
}

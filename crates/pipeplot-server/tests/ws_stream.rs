//! End-to-end tests over a real WebSocket connection.

use futures_util::StreamExt;
use pipeplot_core::{
    Broadcaster, DisplayOptions, LineReader, Metadata, PipelineConfig, ReadMode, ReadOutcome,
    Record, Sample, SampleSource,
};
use pipeplot_server::{acquire_listener, router, AppState};
use pipeplot_wire::{Frame, Payload};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::BufReader;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

/// Source driven by the test, one outcome per message.
struct ChannelSource {
    rx: mpsc::Receiver<ReadOutcome>,
}

impl SampleSource for ChannelSource {
    async fn next_record(&mut self) -> ReadOutcome {
        self.rx.recv().await.unwrap_or(ReadOutcome::EndOfInput)
    }
}

fn test_config() -> PipelineConfig {
    PipelineConfig {
        window_size: 100,
        x_index: Some(0),
        flush_interval: Duration::from_millis(20),
        ..PipelineConfig::default()
    }
}

async fn serve(broadcaster: Arc<Broadcaster>, config: &PipelineConfig) -> SocketAddr {
    let state = AppState {
        broadcaster,
        metadata: Arc::new(Metadata::new(
            config,
            DisplayOptions {
                columns: config.columns.clone(),
                ..DisplayOptions::default()
            },
        )),
        flush_interval: config.flush_interval,
        batch_capacity: config.capacity(),
    };

    let (listener, addr) = acquire_listener("127.0.0.1", 0).await.unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router(state)).await.unwrap();
    });
    addr
}

/// Reads binary messages until the socket closes, decoding each frame.
async fn read_frames(addr: SocketAddr) -> Vec<Frame> {
    let (mut socket, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/ws2"))
        .await
        .unwrap();

    let mut frames = Vec::new();
    loop {
        let next = tokio::time::timeout(Duration::from_secs(5), socket.next())
            .await
            .expect("stream stalled");
        match next {
            Some(Ok(Message::Binary(bytes))) => frames.push(Frame::decode(&bytes).unwrap()),
            Some(Ok(Message::Close(_))) | None => return frames,
            Some(Ok(_)) => {}
            Some(Err(e)) => panic!("socket error: {e}"),
        }
    }
}

#[tokio::test]
async fn test_full_stream_metadata_data_end() {
    let config = test_config();
    let broadcaster = Arc::new(Broadcaster::new(&config));

    let reader = LineReader::new(
        BufReader::new(&b"1 2\n3 4\n"[..]),
        ReadMode::Relaxed,
        Some(0),
        1,
        false,
    );
    broadcaster.start(reader, None).unwrap().await.unwrap();

    let addr = serve(Arc::clone(&broadcaster), &config).await;
    let frames = read_frames(addr).await;

    // Exactly: METADATA, one DATA batch with the whole history, STREAM_END.
    assert_eq!(frames.len(), 3);
    match &frames[0].payload {
        Payload::Metadata(m) => assert_eq!(m.options.columns, vec!["y"]),
        other => panic!("expected metadata first, got {other:?}"),
    }
    match &frames[1].payload {
        Payload::Data(batch) => {
            assert_eq!(batch.series_id, 0);
            assert_eq!(batch.xs, vec![1.0, 3.0]);
            assert_eq!(batch.ys, vec![2.0, 4.0]);
        }
        other => panic!("expected data second, got {other:?}"),
    }
    match &frames[2].payload {
        Payload::StreamEnd(end) => {
            assert!(!end.error);
            assert!(end.msg.is_empty());
        }
        other => panic!("expected stream end last, got {other:?}"),
    }
}

#[tokio::test]
async fn test_live_samples_and_series_break() {
    let config = test_config();
    let broadcaster = Arc::new(Broadcaster::new(&config));
    let (tx, rx) = mpsc::channel(64);
    broadcaster.start(ChannelSource { rx }, None).unwrap();

    let addr = serve(Arc::clone(&broadcaster), &config).await;

    let feeder = tokio::spawn(async move {
        let sample =
            |x: f64, y: f64| ReadOutcome::Parsed(Record::Sample(Sample::new(x, vec![y])));
        tx.send(sample(1.0, 10.0)).await.unwrap();
        tx.send(sample(2.0, 20.0)).await.unwrap();
        // Give the session time to interval-flush the first segment.
        tokio::time::sleep(Duration::from_millis(100)).await;
        tx.send(ReadOutcome::Parsed(Record::Break)).await.unwrap();
        tx.send(sample(3.0, 30.0)).await.unwrap();
        // Closing the channel ends the input cleanly.
    });

    let frames = read_frames(addr).await;
    feeder.await.unwrap();

    match &frames[0].payload {
        Payload::Metadata(_) => {}
        other => panic!("expected metadata first, got {other:?}"),
    }

    // Concatenate the data frames: the xs must arrive in order with the
    // break sentinel strictly between the two segments.
    let mut xs = Vec::new();
    let mut break_positions = Vec::new();
    for frame in &frames[1..frames.len() - 1] {
        match &frame.payload {
            Payload::Data(batch) if batch.is_empty() => break_positions.push(xs.len()),
            Payload::Data(batch) => xs.extend_from_slice(&batch.xs),
            other => panic!("expected data, got {other:?}"),
        }
    }
    assert_eq!(xs, vec![1.0, 2.0, 3.0]);
    assert_eq!(break_positions, vec![2]);

    match &frames[frames.len() - 1].payload {
        Payload::StreamEnd(end) => assert!(!end.error),
        other => panic!("expected stream end last, got {other:?}"),
    }
}

#[tokio::test]
async fn test_error_termination_reaches_client() {
    let config = test_config();
    let broadcaster = Arc::new(Broadcaster::new(&config));
    let (tx, rx) = mpsc::channel(64);
    broadcaster.start(ChannelSource { rx }, None).unwrap();

    let addr = serve(Arc::clone(&broadcaster), &config).await;

    tx.send(ReadOutcome::Parsed(Record::Sample(Sample::new(1.0, vec![5.0]))))
        .await
        .unwrap();
    tx.send(ReadOutcome::Fatal(pipeplot_core::ReadError::Io(
        std::io::Error::other("stream source vanished"),
    )))
    .await
    .unwrap();

    let frames = read_frames(addr).await;
    match &frames[frames.len() - 1].payload {
        Payload::StreamEnd(end) => {
            assert!(end.error);
            assert!(end.msg.contains("stream source vanished"));
        }
        other => panic!("expected stream end last, got {other:?}"),
    }

    // The sample dispatched before the failure arrived as data.
    let data_points: usize = frames
        .iter()
        .filter_map(|f| match &f.payload {
            Payload::Data(batch) => Some(batch.len()),
            _ => None,
        })
        .sum();
    assert_eq!(data_points, 1);
}

#[tokio::test]
async fn test_two_clients_see_the_same_stream() {
    let config = test_config();
    let broadcaster = Arc::new(Broadcaster::new(&config));
    let (tx, rx) = mpsc::channel(64);
    broadcaster.start(ChannelSource { rx }, None).unwrap();

    let addr = serve(Arc::clone(&broadcaster), &config).await;

    let a = tokio::spawn(read_frames(addr));
    let b = tokio::spawn(read_frames(addr));
    // Wait until both sessions are attached before any data flows.
    while broadcaster.subscriber_count() < 2 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    for i in 0..5 {
        tx.send(ReadOutcome::Parsed(Record::Sample(Sample::new(
            f64::from(i),
            vec![f64::from(i) * 2.0],
        ))))
        .await
        .unwrap();
    }
    drop(tx);

    for frames in [a.await.unwrap(), b.await.unwrap()] {
        let xs: Vec<f64> = frames
            .iter()
            .filter_map(|f| match &f.payload {
                Payload::Data(batch) => Some(batch.xs.clone()),
                _ => None,
            })
            .flatten()
            .collect();
        assert_eq!(xs, vec![0.0, 1.0, 2.0, 3.0, 4.0]);
    }
}

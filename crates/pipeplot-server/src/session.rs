//! Per-client WebSocket session.
//!
//! One task per connection. The session sends the one-time METADATA frame,
//! attaches to the broadcaster, and then translates queue items into framed
//! DATA batches until the terminal item, a client disconnect, or a forced
//! drop for falling behind. Whatever the exit path, it detaches before
//! returning so the broadcaster never holds a dead queue.

use crate::app::AppState;
use crate::series::SeriesBuffers;
use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use pipeplot_core::{Record, StreamItem, Subscriber};
use pipeplot_wire::{DataBatch, Frame, FrameError};
use thiserror::Error;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, warn};

/// Why a session ended, beyond a clean close.
#[derive(Debug, Error)]
pub enum SessionError {
    /// A frame failed to encode; the connection cannot continue.
    #[error("frame encoding failed: {0}")]
    Frame(#[from] FrameError),
    /// The socket failed mid-write or mid-read.
    #[error("websocket transport failed: {0}")]
    Socket(#[from] axum::Error),
}

/// Entry point used by the `/ws2` upgrade handler.
pub async fn serve_socket(socket: WebSocket, state: AppState) {
    let (sender, receiver) = socket.split();
    let mut subscriber = state.broadcaster.attach();
    let id = subscriber.id();
    debug!(session = id, "session opened");

    let result = run(sender, receiver, &state, &mut subscriber).await;
    // Detach on every exit path; after this no send lands on our queue.
    state.broadcaster.detach(id);

    match result {
        Ok(()) => debug!(session = id, "session closed"),
        Err(e) => warn!(session = id, error = %e, "session ended on error"),
    }
}

async fn send_frame(
    sender: &mut SplitSink<WebSocket, Message>,
    frame: &Frame,
) -> Result<(), SessionError> {
    let bytes = frame.encode()?;
    sender.send(Message::Binary(bytes)).await?;
    Ok(())
}

async fn run(
    mut sender: SplitSink<WebSocket, Message>,
    mut receiver: SplitStream<WebSocket>,
    state: &AppState,
    subscriber: &mut Subscriber,
) -> Result<(), SessionError> {
    // OPENING: metadata goes out exactly once, before any data frame.
    send_frame(&mut sender, &Frame::metadata((*state.metadata).clone())).await?;

    let mut buffers = SeriesBuffers::new(
        state.metadata.options.columns.len(),
        state.batch_capacity,
        state.flush_interval,
    );

    let mut ticker = tokio::time::interval(state.flush_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    // STREAMING
    loop {
        tokio::select! {
            item = subscriber.next_item() => match item {
                Some(StreamItem::Record(Record::Sample(sample))) => {
                    for batch in buffers.push(&sample, Instant::now()) {
                        send_frame(&mut sender, &Frame::data(batch)).await?;
                    }
                }
                Some(StreamItem::Record(Record::Break)) => {
                    // Everything buffered belongs before the gap.
                    let now = Instant::now();
                    for batch in buffers.flush_all(now) {
                        send_frame(&mut sender, &Frame::data(batch)).await?;
                    }
                    for series_id in 0..buffers.series_count() as u32 {
                        send_frame(&mut sender, &Frame::data(DataBatch::series_break(series_id)))
                            .await?;
                    }
                }
                Some(StreamItem::Terminal(terminal)) => {
                    let now = Instant::now();
                    for batch in buffers.flush_all(now) {
                        send_frame(&mut sender, &Frame::data(batch)).await?;
                    }
                    send_frame(&mut sender, &Frame::stream_end(&terminal)).await?;
                    // Normal close; failure here is moot, the stream is done.
                    let _ = sender.send(Message::Close(None)).await;
                    return Ok(());
                }
                None => {
                    // Dropped by the dispatcher for falling behind. The view
                    // is no longer loss-free, so no STREAM_END is faked.
                    warn!("dropped as slow consumer, closing");
                    let _ = sender.send(Message::Close(None)).await;
                    return Ok(());
                }
            },

            _ = ticker.tick() => {
                for batch in buffers.take_due(Instant::now()) {
                    send_frame(&mut sender, &Frame::data(batch)).await?;
                }
            }

            inbound = receiver.next() => match inbound {
                Some(Ok(Message::Close(_))) | None => return Ok(()),
                // This protocol is one-way; inbound payloads are ignored
                // (axum answers pings itself).
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(e.into()),
            },
        }
    }
}

//! Stream Multiplexer: one ordered frame stream per run.
//!
//! The orchestrator and the run's side-channel write into the same
//! channel, so frames arrive here in the order they happened: an
//! annotation appended by a Step's completion hook lands after that Step's
//! `step-finish` and before the next `step-start`, without any racing
//! between sources.
//!
//! The multiplexer forwards them into a bounded channel for the consumer
//! and enforces the terminal contract:
//! - `finish` is held back until every producer has hung up, so side-channel
//!   frames still in flight are flushed first
//! - `error` is forwarded immediately and ends the stream
//! - a source that ends with neither gets a synthesized `error` frame
//!
//! Orchestrator frames are credit-bounded: a [`FrameSender`] holds at most
//! `buffer` frames that have not yet reached the consumer channel, so a
//! consumer that stops reading stalls the run at its next frame. Side-channel
//! appends are synchronous and take no credit.

use std::sync::Arc;

use tokio::sync::{Semaphore, mpsc};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, warn};

use toolweave_core::StreamFrame;

/// The consumer side of a run's frames.
pub type FrameStream = ReceiverStream<StreamFrame>;

/// Frame kind written when the source ends without a terminal frame.
pub const STREAM_ERROR_KIND: &str = "StreamError";

pub struct Multiplexer {
    buffer: usize,
}

impl Multiplexer {
    pub fn new(buffer: usize) -> Self {
        Self {
            buffer: buffer.max(1),
        }
    }

    /// Start forwarding in a background task.
    ///
    /// The stream ends once every clone of the sender, including the one
    /// handed to a side-channel, has been dropped.
    pub fn spawn(self) -> (FrameSender, FrameStream) {
        let (tx, source) = mpsc::unbounded_channel();
        let (sink, rx) = mpsc::channel(self.buffer);
        let credit = Arc::new(Semaphore::new(self.buffer));

        let returned = credit.clone();
        tokio::spawn(async move {
            pump(source, sink, &returned).await;
            // Wakes any sender still waiting on a consumer that is gone.
            returned.close();
        });

        (FrameSender { tx, credit }, ReceiverStream::new(rx))
    }
}

/// Write end for orchestrator frames.
#[derive(Clone)]
pub struct FrameSender {
    tx: mpsc::UnboundedSender<StreamFrame>,
    credit: Arc<Semaphore>,
}

impl FrameSender {
    /// Send one frame, waiting while the consumer is `buffer` frames behind.
    ///
    /// Returns `false` once the multiplexer has stopped.
    pub async fn send(&self, frame: StreamFrame) -> bool {
        debug_assert!(!frame.is_side_channel());
        match self.credit.acquire().await {
            // Given back by the pump once the frame is in the consumer channel.
            Ok(permit) => permit.forget(),
            Err(_) => return false,
        }
        self.tx.send(frame).is_ok()
    }

    /// An uncredited sender for [`StreamData::attach`](toolweave_core::StreamData::attach).
    pub fn side_channel(&self) -> mpsc::UnboundedSender<StreamFrame> {
        self.tx.clone()
    }
}

async fn pump(
    mut source: mpsc::UnboundedReceiver<StreamFrame>,
    sink: mpsc::Sender<StreamFrame>,
    credit: &Semaphore,
) {
    let mut held_finish: Option<StreamFrame> = None;
    let mut forwarded = 0usize;

    while let Some(frame) = source.recv().await {
        match frame {
            StreamFrame::Finish { .. } => {
                held_finish = Some(frame);
            }
            StreamFrame::Error { .. } => {
                debug!(forwarded, "Forwarding terminal error frame");
                let _ = sink.send(frame).await;
                return;
            }
            frame => {
                let credited = !frame.is_side_channel();
                if held_finish.is_some() && credited {
                    warn!(frame_type = frame.frame_type(), "Frame arrived after finish");
                }
                if sink.send(frame).await.is_err() {
                    debug!(forwarded, "Frame consumer dropped, stopping multiplexer");
                    return;
                }
                if credited {
                    credit.add_permits(1);
                }
                forwarded += 1;
            }
        }
    }

    let terminal = held_finish.unwrap_or_else(|| {
        warn!(forwarded, "Frame source ended without a terminal frame");
        StreamFrame::Error {
            kind: STREAM_ERROR_KIND.into(),
            message: "frame stream ended unexpectedly".into(),
            step: None,
        }
    });
    debug!(forwarded, frame_type = terminal.frame_type(), "Flushing terminal frame");
    let _ = sink.send(terminal).await;
}

//! The side-channel: an append-only, ordered log of out-of-band data.
//!
//! Tool executors and completion hooks append to it concurrently. Each
//! append records the event and forwards it to the attached run stream
//! under a single lock, so the log order and the wire order are the same
//! order. The log is only ever emptied by an explicit [`StreamData::reset`].

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, warn};

use crate::frame::StreamFrame;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "kebab-case")]
pub enum SideChannelEvent {
    Data(Value),
    Annotation(Value),
}

impl SideChannelEvent {
    pub fn to_frame(&self) -> StreamFrame {
        match self {
            Self::Data(value) => StreamFrame::Data {
                value: value.clone(),
            },
            Self::Annotation(value) => StreamFrame::MessageAnnotation {
                value: value.clone(),
            },
        }
    }
}

#[derive(Debug, Default)]
struct Inner {
    log: Vec<SideChannelEvent>,
    /// How many log entries have reached a sink.
    forwarded: usize,
    sink: Option<UnboundedSender<StreamFrame>>,
    closed: bool,
}

/// Shared handle to a run's side-channel. Clones refer to the same log.
#[derive(Debug, Clone, Default)]
pub struct StreamData {
    inner: Arc<Mutex<Inner>>,
}

impl StreamData {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append a `data` event. Returns `false` once the channel is closed.
    pub fn append(&self, value: Value) -> bool {
        self.push(SideChannelEvent::Data(value))
    }

    /// Append a `message-annotation` event. Returns `false` once closed.
    pub fn append_message_annotation(&self, value: Value) -> bool {
        self.push(SideChannelEvent::Annotation(value))
    }

    fn push(&self, event: SideChannelEvent) -> bool {
        let mut inner = self.lock();
        if inner.closed {
            warn!("Side-channel is closed, dropping event");
            return false;
        }
        let frame = event.to_frame();
        inner.log.push(event);
        Self::forward(&mut inner, frame);
        true
    }

    fn forward(inner: &mut Inner, frame: StreamFrame) {
        let Some(sink) = &inner.sink else {
            return;
        };
        if sink.send(frame).is_ok() {
            inner.forwarded = inner.log.len();
        } else {
            debug!("Side-channel consumer went away, detaching");
            inner.sink = None;
        }
    }

    /// Route appends into a run's frame stream.
    ///
    /// Entries appended while detached are forwarded first, in order.
    pub fn attach(&self, sink: UnboundedSender<StreamFrame>) {
        let mut inner = self.lock();
        if inner.closed {
            return;
        }
        let pending: Vec<StreamFrame> = inner.log[inner.forwarded..]
            .iter()
            .map(SideChannelEvent::to_frame)
            .collect();
        for frame in pending {
            if sink.send(frame).is_err() {
                return;
            }
            inner.forwarded += 1;
        }
        inner.sink = Some(sink);
    }

    /// Stop accepting appends and release the run's stream.
    pub fn close(&self) {
        let mut inner = self.lock();
        inner.closed = true;
        inner.sink = None;
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Forget everything. Meant for reuse between runs.
    pub fn reset(&self) {
        let mut inner = self.lock();
        inner.log.clear();
        inner.forwarded = 0;
        inner.sink = None;
        inner.closed = false;
    }

    /// A snapshot of the log, in append order.
    pub fn events(&self) -> Vec<SideChannelEvent> {
        self.lock().log.clone()
    }

    pub fn len(&self) -> usize {
        self.lock().log.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().log.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::sync::mpsc;

    #[test]
    fn appends_are_logged_in_order() {
        let data = StreamData::new();
        data.append(json!(1));
        data.append_message_annotation(json!({"step": 0}));
        data.append(json!(2));

        assert_eq!(
            data.events(),
            vec![
                SideChannelEvent::Data(json!(1)),
                SideChannelEvent::Annotation(json!({"step": 0})),
                SideChannelEvent::Data(json!(2)),
            ]
        );
    }

    #[test]
    fn attach_replays_backlog_then_streams() {
        let data = StreamData::new();
        data.append(json!("early"));

        let (tx, mut rx) = mpsc::unbounded_channel();
        data.attach(tx);
        data.append(json!("late"));

        assert_eq!(rx.try_recv().unwrap(), StreamFrame::Data { value: json!("early") });
        assert_eq!(rx.try_recv().unwrap(), StreamFrame::Data { value: json!("late") });
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn close_rejects_appends_and_releases_sink() {
        let data = StreamData::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        data.attach(tx);

        data.close();
        assert!(!data.append(json!("too late")));
        assert!(data.is_closed());
        // The only sender was held by the side-channel.
        assert!(matches!(
            rx.try_recv(),
            Err(mpsc::error::TryRecvError::Disconnected)
        ));
    }

    #[test]
    fn reset_clears_log_and_reopens() {
        let data = StreamData::new();
        data.append(json!(1));
        data.close();
        data.reset();

        assert!(data.is_empty());
        assert!(!data.is_closed());
        assert!(data.append(json!(2)));
        assert_eq!(data.len(), 1);
    }

    #[tokio::test]
    async fn concurrent_appends_keep_log_and_wire_order_identical() {
        let data = StreamData::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        data.attach(tx);

        let mut handles = Vec::new();
        for worker in 0..8 {
            let data = data.clone();
            handles.push(tokio::spawn(async move {
                for i in 0..25 {
                    data.append(json!({"worker": worker, "i": i}));
                    tokio::task::yield_now().await;
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        data.close();

        let mut wire = Vec::new();
        while let Some(frame) = rx.recv().await {
            wire.push(frame);
        }
        let logged: Vec<StreamFrame> = data.events().iter().map(SideChannelEvent::to_frame).collect();
        assert_eq!(wire.len(), 200);
        assert_eq!(wire, logged);
    }
}

//! Buffered subscription streams.
//!
//! A stream decouples the producer side (the forwarding task bridging raw
//! transport indications) from the consumer side (the indication monitor).
//! Writes land in a bounded FIFO guarded by a mutex and condition variable;
//! a dedicated drain thread moves buffered indications into a rendezvous
//! channel that readers block on. The fast receive path therefore never
//! blocks on slow decoding, memory stays bounded, and overload surfaces as
//! an explicit `Unavailable` error instead of silent drops.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread;

use crossbeam_channel::{bounded, Receiver, Sender};
use tracing::debug;

use crate::ctx::CancelToken;
use crate::error::{KpmResult, StreamError};
use crate::indication::Indication;
use crate::model::{ChannelId, NodeId};

/// Broker-internal stream identifier, allocated monotonically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamId(pub u64);

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifying metadata carried by both halves of a stream.
#[derive(Debug, Clone)]
pub struct StreamInfo {
    pub stream_id: StreamId,
    pub channel_id: ChannelId,
    pub node_id: NodeId,
    pub subscription_name: String,
}

#[derive(Debug)]
struct Buffer {
    queue: VecDeque<Indication>,
    closed: bool,
}

#[derive(Debug)]
struct Shared {
    buffer: Mutex<Buffer>,
    available: Condvar,
    capacity: usize,
}

fn lock_buffer(shared: &Shared) -> MutexGuard<'_, Buffer> {
    match shared.buffer.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Write half of a stream. Thread-safe for many concurrent producers.
#[derive(Debug, Clone)]
pub struct StreamWriter {
    shared: Arc<Shared>,
    info: StreamInfo,
}

impl StreamWriter {
    /// Appends an indication to the stream buffer and wakes the drain task.
    ///
    /// Non-blocking: if the buffer is at capacity an `Unavailable` error is
    /// returned and the caller decides whether to drop or propagate. Sending
    /// on a closed stream returns `Closed`.
    pub fn send(&self, indication: Indication) -> KpmResult<()> {
        let mut buffer = lock_buffer(&self.shared);
        if buffer.closed {
            return Err(StreamError::Closed.into());
        }
        if buffer.queue.len() >= self.shared.capacity {
            return Err(StreamError::Unavailable {
                capacity: self.shared.capacity,
            }
            .into());
        }
        buffer.queue.push_back(indication);
        self.shared.available.notify_one();
        Ok(())
    }

    /// Marks the stream closed. Buffered indications are still drained to
    /// readers before end-of-stream is signaled.
    pub fn close(&self) {
        let mut buffer = lock_buffer(&self.shared);
        buffer.closed = true;
        self.shared.available.notify_all();
    }

    /// Stream metadata.
    #[must_use]
    pub fn info(&self) -> &StreamInfo {
        &self.info
    }
}

/// Read half of a stream.
///
/// Cloning yields a competing consumer: each indication is delivered to
/// exactly one reader, in FIFO order for a single reader but unordered
/// across concurrent readers.
#[derive(Debug, Clone)]
pub struct StreamReader {
    rx: Receiver<Indication>,
    info: StreamInfo,
}

impl StreamReader {
    /// Blocks until an indication is available, the token is canceled, or
    /// the stream is closed with an empty buffer.
    pub fn recv(&self, ctx: &CancelToken) -> KpmResult<Indication> {
        crossbeam_channel::select! {
            recv(self.rx) -> msg => msg.map_err(|_| StreamError::Closed.into()),
            recv(ctx.done()) -> msg => match msg {
                Err(_) => Err(StreamError::Canceled.into()),
                Ok(never) => match never {},
            },
        }
    }

    /// Stream metadata.
    #[must_use]
    pub fn info(&self) -> &StreamInfo {
        &self.info
    }
}

/// Dequeues the next buffered indication, blocking until one is available.
/// Returns None once the stream is closed and the buffer is empty.
fn next(shared: &Shared) -> Option<Indication> {
    let mut buffer = lock_buffer(shared);
    loop {
        if let Some(indication) = buffer.queue.pop_front() {
            return Some(indication);
        }
        if buffer.closed {
            return None;
        }
        buffer = match shared.available.wait(buffer) {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
    }
}

fn drain(shared: Arc<Shared>, tx: Sender<Indication>, info: StreamInfo) {
    while let Some(indication) = next(&shared) {
        if tx.send(indication).is_err() {
            // All readers dropped; remaining buffered items are discarded.
            debug!(target: "broker", stream_id = %info.stream_id, "all readers gone, stopping drain");
            return;
        }
    }
    debug!(target: "broker", stream_id = %info.stream_id, "stream drained, signaling end-of-stream");
    // Dropping tx closes the read channel: readers see end-of-stream.
}

/// Creates a buffered stream and starts its drain thread.
pub(crate) fn new_buffered_stream(info: StreamInfo, capacity: usize) -> (StreamWriter, StreamReader) {
    let shared = Arc::new(Shared {
        buffer: Mutex::new(Buffer {
            queue: VecDeque::new(),
            closed: false,
        }),
        available: Condvar::new(),
        capacity: capacity.max(1),
    });

    // Rendezvous channel: the drain thread holds at most one indication in
    // flight, so buffering is accounted for entirely by the FIFO.
    let (tx, rx) = bounded::<Indication>(0);

    let writer = StreamWriter {
        shared: Arc::clone(&shared),
        info: info.clone(),
    };
    let reader = StreamReader {
        rx,
        info: info.clone(),
    };

    let thread_info = info.clone();
    let _ = thread::Builder::new()
        .name(format!("kpmon-stream-{}", info.stream_id))
        .spawn(move || drain(shared, tx, thread_info));

    (writer, reader)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_info() -> StreamInfo {
        StreamInfo {
            stream_id: StreamId(1),
            channel_id: ChannelId::from("chan-1"),
            node_id: NodeId::from("gnb-1"),
            subscription_name: "kpmon-gnb-1".to_string(),
        }
    }

    fn test_indication(tag: u8) -> Indication {
        Indication {
            header: vec![tag],
            payload: vec![tag, tag],
        }
    }

    #[test]
    fn send_then_recv_preserves_fifo_order_for_single_reader() {
        let (writer, reader) = new_buffered_stream(test_info(), 16);
        let ctx = CancelToken::background();

        for tag in 0..5u8 {
            writer.send(test_indication(tag)).unwrap();
        }

        for tag in 0..5u8 {
            let ind = reader.recv(&ctx).unwrap();
            assert_eq!(ind.header, vec![tag]);
        }
    }

    #[test]
    fn send_fails_with_unavailable_at_capacity() {
        let (writer, _reader) = new_buffered_stream(test_info(), 3);

        // No reader is consuming, so the drain thread takes at most one item
        // off the buffer. Fill well past capacity to hit the limit.
        let mut unavailable = 0;
        for tag in 0..10u8 {
            match writer.send(test_indication(tag)) {
                Ok(()) => {}
                Err(err) => {
                    assert!(matches!(
                        err,
                        crate::error::KpmError::Stream(StreamError::Unavailable { capacity: 3 })
                    ));
                    unavailable += 1;
                }
            }
        }
        assert!(unavailable > 0);
    }

    #[test]
    fn close_flushes_buffered_items_then_signals_end_of_stream() {
        let (writer, reader) = new_buffered_stream(test_info(), 16);
        let ctx = CancelToken::background();

        for tag in 0..4u8 {
            writer.send(test_indication(tag)).unwrap();
        }
        writer.close();

        let mut received = 0;
        loop {
            match reader.recv(&ctx) {
                Ok(_) => received += 1,
                Err(err) => {
                    assert!(err.is_closed());
                    break;
                }
            }
        }
        assert_eq!(received, 4);
    }

    #[test]
    fn send_after_close_fails() {
        let (writer, _reader) = new_buffered_stream(test_info(), 16);
        writer.close();
        let err = writer.send(test_indication(0)).unwrap_err();
        assert!(err.is_closed());
    }

    #[test]
    fn recv_returns_canceled_when_token_fires() {
        let (_writer, reader) = new_buffered_stream(test_info(), 16);
        let (handle, ctx) = crate::ctx::cancel_pair();

        let waiter = std::thread::spawn(move || reader.recv(&ctx));
        std::thread::sleep(std::time::Duration::from_millis(20));
        handle.cancel();

        let err = waiter.join().unwrap().unwrap_err();
        assert!(err.is_canceled());
    }

    #[test]
    fn competing_consumers_split_items_exactly_once() {
        let (writer, reader) = new_buffered_stream(test_info(), 128);
        let ctx = CancelToken::background();
        let total = 50u8;

        for tag in 0..total {
            writer.send(test_indication(tag)).unwrap();
        }
        writer.close();

        let mut handles = Vec::new();
        for _ in 0..2 {
            let reader = reader.clone();
            let ctx = ctx.clone();
            handles.push(std::thread::spawn(move || {
                let mut seen = Vec::new();
                while let Ok(ind) = reader.recv(&ctx) {
                    seen.push(ind.header[0]);
                }
                seen
            }));
        }
        drop(reader);

        let mut all: Vec<u8> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        all.sort_unstable();
        let expected: Vec<u8> = (0..total).collect();
        assert_eq!(all, expected);
    }
}

//! Subscription stream broker.
//!
//! The broker maps a subscription channel id to a buffered [`Stream`] and is
//! the unit of backpressure and lifecycle for one subscription's data path:
//! indications from the southbound transport are written into a stream and
//! propagated to the indication monitor reading from it.
//!
//! [`Stream`]: stream::StreamReader

pub mod stream;

use std::collections::HashMap;
use std::sync::RwLock;

use tracing::info;

use crate::error::{KpmResult, StreamError};
use crate::model::{ChannelId, NodeId};

pub use stream::{StreamId, StreamInfo, StreamReader, StreamWriter};

/// Default per-stream buffer capacity.
pub const BUFFER_MAX_SIZE: usize = 10_000;

#[derive(Debug, Clone)]
struct StreamHandles {
    reader: StreamReader,
    writer: StreamWriter,
}

#[derive(Debug, Default)]
struct State {
    subs: HashMap<ChannelId, StreamHandles>,
    streams: HashMap<StreamId, StreamHandles>,
    next_stream_id: u64,
}

/// Subscription stream broker.
#[derive(Debug)]
pub struct StreamBroker {
    state: RwLock<State>,
    capacity: usize,
}

impl Default for StreamBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamBroker {
    /// Creates a broker with the default per-stream buffer capacity.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(BUFFER_MAX_SIZE)
    }

    /// Creates a broker with a custom per-stream buffer capacity.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            state: RwLock::new(State::default()),
            capacity: capacity.max(1),
        }
    }

    /// Opens a stream for a subscription channel.
    ///
    /// Idempotent per channel id: if a stream already exists for the channel
    /// the existing reader is returned, otherwise a new stream is allocated
    /// with a fresh monotonically increasing stream id and its drain thread
    /// is started.
    pub fn open_stream(
        &self,
        node_id: NodeId,
        channel_id: ChannelId,
        subscription_name: impl Into<String>,
    ) -> StreamReader {
        {
            let state = self.state.read().unwrap_or_else(std::sync::PoisonError::into_inner);
            if let Some(handles) = state.subs.get(&channel_id) {
                return handles.reader.clone();
            }
        }

        let mut state = self.state.write().unwrap_or_else(std::sync::PoisonError::into_inner);
        // Re-check under the write lock: another caller may have raced us.
        if let Some(handles) = state.subs.get(&channel_id) {
            return handles.reader.clone();
        }

        state.next_stream_id += 1;
        let stream_id = StreamId(state.next_stream_id);
        let info = StreamInfo {
            stream_id,
            channel_id: channel_id.clone(),
            node_id,
            subscription_name: subscription_name.into(),
        };
        let (writer, reader) = stream::new_buffered_stream(info, self.capacity);
        let handles = StreamHandles {
            reader: reader.clone(),
            writer,
        };
        state.subs.insert(channel_id.clone(), handles.clone());
        state.streams.insert(stream_id, handles);

        info!(target: "broker", %stream_id, channel_id = %channel_id, "opened new stream for subscription channel");
        reader
    }

    /// Closes the stream for a subscription channel and removes it from the
    /// broker's index.
    ///
    /// Close is graceful: indications already buffered are still delivered to
    /// readers before end-of-stream. Subsequent `send` calls fail. Safe to
    /// call concurrently with `send`/`recv`.
    pub fn close_stream(&self, channel_id: &ChannelId) -> KpmResult<StreamInfo> {
        let mut state = self.state.write().unwrap_or_else(std::sync::PoisonError::into_inner);
        let handles = state.subs.remove(channel_id).ok_or_else(|| StreamError::NotFound {
            id: channel_id.to_string(),
        })?;
        state.streams.remove(&handles.writer.info().stream_id);
        drop(state);

        handles.writer.close();
        let info = handles.writer.info().clone();
        info!(target: "broker", stream_id = %info.stream_id, channel_id = %channel_id, "closed stream");
        Ok(info)
    }

    /// Gets the write half of a stream by its stream id.
    pub fn get_writer(&self, id: StreamId) -> KpmResult<StreamWriter> {
        let state = self.state.read().unwrap_or_else(std::sync::PoisonError::into_inner);
        state
            .streams
            .get(&id)
            .map(|handles| handles.writer.clone())
            .ok_or_else(|| StreamError::NotFound { id: id.to_string() }.into())
    }

    /// All currently open subscription channel ids.
    #[must_use]
    pub fn channel_ids(&self) -> Vec<ChannelId> {
        let state = self.state.read().unwrap_or_else(std::sync::PoisonError::into_inner);
        state.subs.keys().cloned().collect()
    }

    /// Closes every open stream and clears the index. Returns the metadata
    /// of the closed streams.
    pub fn close_all(&self) -> Vec<StreamInfo> {
        let mut state = self.state.write().unwrap_or_else(std::sync::PoisonError::into_inner);
        let handles: Vec<StreamHandles> = state.subs.drain().map(|(_, h)| h).collect();
        state.streams.clear();
        drop(state);

        handles
            .into_iter()
            .map(|h| {
                h.writer.close();
                h.writer.info().clone()
            })
            .collect()
    }
}

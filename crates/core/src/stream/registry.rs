use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use super::bus::StreamBus;
use super::frame::{Frame, MediaHead};

/// Maps (channel, stream-id) to a live stream source.
///
/// This is the interface the serving stack consumes from the encoder
/// pipeline. Implementations must be internally synchronized: the RTSP
/// event loop and producer threads call in concurrently.
pub trait StreamRegistry: Send + Sync {
    /// Bus for the stream, creating it on first use.
    fn get_stream(&self, channel: u32, stream_id: u32) -> Option<Arc<StreamBus>>;

    /// Codec description of the stream, `None` if the channel does not exist.
    fn get_stream_head(&self, channel: u32, stream_id: u32) -> Option<MediaHead>;

    /// Ask the encoder for an immediate key frame.
    fn request_i_frame(&self, channel: u32, stream_id: u32);

    /// Drop the bus entry once its last consumer has gone.
    fn del_stream(&self, channel: u32, stream_id: u32);
}

struct Channel {
    head: MediaHead,
    bus: Option<Arc<StreamBus>>,
    key_frame_requested: bool,
}

/// In-process [`StreamRegistry`] fed directly by the producer.
///
/// Channels are declared up front with [`add_channel`](Self::add_channel);
/// buses are created lazily by [`get_stream`](StreamRegistry::get_stream)
/// and released by [`del_stream`](StreamRegistry::del_stream).
#[derive(Default)]
pub struct LocalStreamRegistry {
    channels: Mutex<HashMap<(u32, u32), Channel>>,
}

impl LocalStreamRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a channel and its media head. Replaces any previous head.
    pub fn add_channel(&self, channel: u32, stream_id: u32, head: MediaHead) {
        let mut channels = self.channels.lock();
        match channels.get_mut(&(channel, stream_id)) {
            Some(existing) => existing.head = head,
            None => {
                channels.insert(
                    (channel, stream_id),
                    Channel {
                        head,
                        bus: None,
                        key_frame_requested: false,
                    },
                );
            }
        }
        tracing::info!(channel, stream_id, "stream channel registered");
    }

    /// Broadcast a frame to the channel's current bus. Returns `false` when no
    /// bus is active (nobody has asked for the stream).
    pub fn publish(&self, channel: u32, stream_id: u32, frame: &Frame) -> bool {
        let bus = self
            .channels
            .lock()
            .get(&(channel, stream_id))
            .and_then(|c| c.bus.clone());
        match bus {
            Some(bus) => {
                bus.broadcast(frame);
                true
            }
            None => false,
        }
    }

    /// Returns and clears a pending key frame request.
    pub fn take_i_frame_request(&self, channel: u32, stream_id: u32) -> bool {
        self.channels
            .lock()
            .get_mut(&(channel, stream_id))
            .map(|c| std::mem::take(&mut c.key_frame_requested))
            .unwrap_or(false)
    }

    /// Whether a bus is currently active for the stream.
    pub fn is_active(&self, channel: u32, stream_id: u32) -> bool {
        self.channels
            .lock()
            .get(&(channel, stream_id))
            .is_some_and(|c| c.bus.is_some())
    }
}

impl StreamRegistry for LocalStreamRegistry {
    fn get_stream(&self, channel: u32, stream_id: u32) -> Option<Arc<StreamBus>> {
        let mut channels = self.channels.lock();
        let entry = channels.get_mut(&(channel, stream_id))?;
        let bus = entry
            .bus
            .get_or_insert_with(|| Arc::new(StreamBus::new(channel, stream_id)));
        Some(bus.clone())
    }

    fn get_stream_head(&self, channel: u32, stream_id: u32) -> Option<MediaHead> {
        self.channels
            .lock()
            .get(&(channel, stream_id))
            .map(|c| c.head.clone())
    }

    fn request_i_frame(&self, channel: u32, stream_id: u32) {
        if let Some(c) = self.channels.lock().get_mut(&(channel, stream_id)) {
            c.key_frame_requested = true;
            tracing::debug!(channel, stream_id, "key frame requested");
        }
    }

    fn del_stream(&self, channel: u32, stream_id: u32) {
        if let Some(c) = self.channels.lock().get_mut(&(channel, stream_id)) {
            if c.bus.take().is_some() {
                tracing::debug!(channel, stream_id, "stream bus released");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::frame::{VideoCodec, VideoInfo};

    fn head() -> MediaHead {
        MediaHead {
            video: Some(VideoInfo::new(VideoCodec::H264, 1920, 1080, 25)),
            audio: None,
        }
    }

    #[test]
    fn unknown_channel_has_no_stream() {
        let registry = LocalStreamRegistry::new();
        assert!(registry.get_stream(3, 0).is_none());
        assert!(registry.get_stream_head(3, 0).is_none());
    }

    #[test]
    fn bus_is_created_once_and_released() {
        let registry = LocalStreamRegistry::new();
        registry.add_channel(0, 0, head());
        assert!(!registry.is_active(0, 0));

        let a = registry.get_stream(0, 0).unwrap();
        let b = registry.get_stream(0, 0).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert!(registry.is_active(0, 0));

        registry.del_stream(0, 0);
        assert!(!registry.is_active(0, 0));
        let c = registry.get_stream(0, 0).unwrap();
        assert!(!Arc::ptr_eq(&a, &c));
    }

    #[test]
    fn key_frame_request_is_latched_until_taken() {
        let registry = LocalStreamRegistry::new();
        registry.add_channel(1, 0, head());
        assert!(!registry.take_i_frame_request(1, 0));
        registry.request_i_frame(1, 0);
        assert!(registry.take_i_frame_request(1, 0));
        assert!(!registry.take_i_frame_request(1, 0));
    }

    #[test]
    fn publish_without_consumers_is_dropped() {
        let registry = LocalStreamRegistry::new();
        registry.add_channel(0, 0, head());
        let frame = Frame::single(crate::stream::FrameKind::VideoP, 0, vec![0u8, 0, 0, 1, 0x41]);
        assert!(!registry.publish(0, 0, &frame));
        registry.get_stream(0, 0);
        assert!(registry.publish(0, 0, &frame));
    }
}

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use super::client::Connector;
use super::session::{PushConfig, RtmpPushSession};
use crate::error::{Error, Result};
use crate::media::nal::unit_nals;
use crate::stream::{Frame, FrameObserver, StreamBus};

/// Identity of one push session: source stream plus destination.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionKey {
    pub channel: u32,
    pub stream_id: u32,
    pub url: String,
}

impl SessionKey {
    pub fn new(channel: u32, stream_id: u32, url: impl Into<String>) -> Self {
        Self {
            channel,
            stream_id,
            url: url.into(),
        }
    }

    fn matches_stream(&self, channel: u32, stream_id: u32) -> bool {
        self.channel == channel && self.stream_id == stream_id
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{} -> {}", self.channel, self.stream_id, self.url)
    }
}

/// Owner of every live [`RtmpPushSession`].
///
/// Never holds two sessions with equal keys. Sessions whose input fails
/// during dispatch are evicted and closed. Closing (which joins the push
/// thread) always happens after the registry lock is released.
pub struct SessionRegistry {
    sessions: Mutex<Vec<Arc<RtmpPushSession>>>,
    connector: Arc<dyn Connector>,
    config: PushConfig,
}

impl SessionRegistry {
    pub fn new(connector: Arc<dyn Connector>, config: PushConfig) -> Self {
        Self {
            sessions: Mutex::new(Vec::new()),
            connector,
            config,
        }
    }

    /// Start a push session. Fails with [`Error::SessionExists`] when a
    /// session with the same key is live.
    pub fn create(&self, key: SessionKey) -> Result<()> {
        let mut sessions = self.sessions.lock();
        if sessions.iter().any(|s| *s.key() == key) {
            tracing::debug!(session = %key, "push session already exists");
            return Err(Error::SessionExists);
        }
        let session = RtmpPushSession::start(key, self.connector.clone(), self.config.clone())?;
        sessions.push(Arc::new(session));
        Ok(())
    }

    /// Stop and remove every session with this key. Returns how many were
    /// removed.
    pub fn delete(&self, key: &SessionKey) -> usize {
        let removed = self.take_where(|s| s.key() == key);
        let count = removed.len();
        close_all(removed);
        count
    }

    /// Stop and remove every session.
    pub fn clear(&self) {
        let removed = std::mem::take(&mut *self.sessions.lock());
        close_all(removed);
    }

    pub fn contains(&self, key: &SessionKey) -> bool {
        self.sessions.lock().iter().any(|s| s.key() == key)
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.lock().is_empty()
    }

    /// Deliver one Annex B NAL unit to every session of (channel,
    /// stream-id). Returns how many accepted it.
    pub fn dispatch(&self, channel: u32, stream_id: u32, nalu: &[u8], timestamp_ms: u64) -> usize {
        self.dispatch_with(channel, stream_id, |s| s.input_one_nalu(nalu, timestamp_ms))
    }

    fn dispatch_with<F>(&self, channel: u32, stream_id: u32, mut input: F) -> usize
    where
        F: FnMut(&RtmpPushSession) -> bool,
    {
        let targets: Vec<Arc<RtmpPushSession>> = self
            .sessions
            .lock()
            .iter()
            .filter(|s| s.key().matches_stream(channel, stream_id))
            .cloned()
            .collect();

        let mut delivered = 0;
        let mut failed = Vec::new();
        for session in targets {
            if input(&session) {
                delivered += 1;
            } else {
                failed.push(session);
            }
        }

        if !failed.is_empty() {
            let evicted = self.take_where(|s| failed.iter().any(|f| Arc::ptr_eq(f, s)));
            for session in &evicted {
                tracing::warn!(session = %session.key(), "evicting RTMP push session");
            }
            drop(failed);
            close_all(evicted);
        }
        delivered
    }

    fn take_where<F>(&self, mut pred: F) -> Vec<Arc<RtmpPushSession>>
    where
        F: FnMut(&Arc<RtmpPushSession>) -> bool,
    {
        let mut sessions = self.sessions.lock();
        let mut taken = Vec::new();
        let mut idx = 0;
        while idx < sessions.len() {
            if pred(&sessions[idx]) {
                taken.push(sessions.remove(idx));
            } else {
                idx += 1;
            }
        }
        taken
    }
}

fn close_all(sessions: Vec<Arc<RtmpPushSession>>) {
    for session in sessions {
        session.close();
    }
}

impl FrameObserver for SessionRegistry {
    fn on_frame(&self, source: &StreamBus, frame: &Frame) {
        if !frame.kind.is_nal_video() {
            return;
        }
        for unit in &frame.units {
            for nal in unit_nals(&unit.data) {
                self.dispatch_with(source.channel(), source.stream_id(), |s| {
                    s.input_nal(nal, unit.timestamp_ms)
                });
            }
        }
    }
}

impl Drop for SessionRegistry {
    fn drop(&mut self) {
        self.clear();
    }
}

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use super::client::{Connector, RtmpUrl, VideoPublisher};
use super::flv;
use super::registry::SessionKey;
use crate::error::Result;
use crate::media::nal::start_code_len;
use crate::ring::{RecordHeader, RingStreamBuffer};

/// Largest SPS or PPS the session caches.
pub const PARAMETER_SET_CAPACITY: usize = 256;

const NAL_SLICE: u8 = 1;
const NAL_IDR: u8 = 5;
const NAL_SPS: u8 = 7;
const NAL_PPS: u8 = 8;

const RECORD_INTER: u8 = 0;
const RECORD_KEY: u8 = 1;

/// Tuning of one push session.
#[derive(Debug, Clone)]
pub struct PushConfig {
    /// Ring buffer size between the producer and the push thread.
    pub ring_capacity: usize,
    /// TCP connect and command-reply timeout.
    pub connect_timeout: Duration,
    /// Longest the push thread sleeps before rechecking the buffer.
    pub poll_interval: Duration,
    /// Outgoing RTMP chunk size.
    pub chunk_size: u32,
}

impl Default for PushConfig {
    fn default() -> Self {
        Self {
            ring_capacity: 1024 * 1024,
            connect_timeout: Duration::from_secs(5),
            poll_interval: Duration::from_millis(10),
            chunk_size: 4096,
        }
    }
}

struct ParameterSet {
    data: [u8; PARAMETER_SET_CAPACITY],
    len: usize,
}

impl ParameterSet {
    fn new() -> Self {
        Self {
            data: [0u8; PARAMETER_SET_CAPACITY],
            len: 0,
        }
    }

    fn store(&mut self, nal: &[u8]) -> bool {
        if nal.len() > PARAMETER_SET_CAPACITY {
            return false;
        }
        self.data[..nal.len()].copy_from_slice(nal);
        self.len = nal.len();
        true
    }

    fn get(&self) -> Option<&[u8]> {
        (self.len > 0).then(|| &self.data[..self.len])
    }
}

/// State shared by the producer and the push thread, under one lock.
struct PushBuffer {
    ring: RingStreamBuffer,
    sps: ParameterSet,
    pps: ParameterSet,
}

struct Shared {
    buffer: Mutex<PushBuffer>,
    ready: Condvar,
    running: AtomicBool,
    failed: AtomicBool,
}

/// One live push of an H.264 stream to an RTMP URL.
///
/// [`input_one_nalu`](Self::input_one_nalu) only stages data; a dedicated
/// thread owns the connection and drains the ring buffer. The data lock and
/// the lifecycle lock are separate so [`close`](Self::close) can join the
/// thread while the producer keeps calling in.
pub struct RtmpPushSession {
    key: SessionKey,
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl RtmpPushSession {
    /// Start the push thread. The connection is opened on that thread; a
    /// failure there marks the session failed.
    pub fn start(
        key: SessionKey,
        connector: Arc<dyn Connector>,
        config: PushConfig,
    ) -> Result<Self> {
        let url = RtmpUrl::parse(&key.url)?;
        let shared = Arc::new(Shared {
            buffer: Mutex::new(PushBuffer {
                ring: RingStreamBuffer::with_capacity(config.ring_capacity),
                sps: ParameterSet::new(),
                pps: ParameterSet::new(),
            }),
            ready: Condvar::new(),
            running: AtomicBool::new(true),
            failed: AtomicBool::new(false),
        });

        let worker = {
            let shared = shared.clone();
            let label = key.to_string();
            thread::Builder::new()
                .name("rtmp-push".to_string())
                .spawn(move || push_loop(&shared, connector.as_ref(), &url, &config, &label))?
        };

        tracing::info!(session = %key, "RTMP push session started");
        Ok(Self {
            key,
            shared,
            worker: Mutex::new(Some(worker)),
        })
    }

    pub fn key(&self) -> &SessionKey {
        &self.key
    }

    /// Whether the push thread gave up (connect or send failure).
    pub fn is_failed(&self) -> bool {
        self.shared.failed.load(Ordering::SeqCst)
    }

    /// Stage one Annex B NAL unit (start code included).
    ///
    /// SPS and PPS are cached for the next key frame; IDR and non-IDR slices
    /// are queued. Other NAL types are accepted and dropped. Returns `false`
    /// when the input is malformed, a parameter set exceeds the cache, the
    /// ring buffer is full, or the session has failed.
    pub fn input_one_nalu(&self, data: &[u8], timestamp_ms: u64) -> bool {
        let Some(sc) = start_code_len(data) else {
            tracing::warn!(session = %self.key, "NAL unit without start code");
            return false;
        };
        self.input_nal(&data[sc..], timestamp_ms)
    }

    /// Same as [`input_one_nalu`](Self::input_one_nalu) for a NAL unit whose
    /// start code is already stripped.
    pub(crate) fn input_nal(&self, nal: &[u8], timestamp_ms: u64) -> bool {
        if self.is_failed() {
            return false;
        }
        let Some(&first) = nal.first() else {
            return false;
        };
        let nal_type = first & 0x1F;

        let mut buffer = self.shared.buffer.lock();
        let accepted = match nal_type {
            NAL_SPS => buffer.sps.store(nal),
            NAL_PPS => buffer.pps.store(nal),
            NAL_IDR | NAL_SLICE => {
                let kind = if nal_type == NAL_IDR {
                    RECORD_KEY
                } else {
                    RECORD_INTER
                };
                let pushed = buffer
                    .ring
                    .push(RecordHeader::new(nal.len(), timestamp_ms, kind), nal);
                if pushed {
                    self.shared.ready.notify_one();
                }
                pushed
            }
            _ => true,
        };
        drop(buffer);

        if !accepted {
            tracing::warn!(
                session = %self.key,
                nal_type,
                len = nal.len(),
                "push buffer rejected NAL unit"
            );
        }
        accepted
    }

    /// Stop the push thread and wait for it. Idempotent.
    pub fn close(&self) {
        let mut worker = self.worker.lock();
        let Some(handle) = worker.take() else {
            return;
        };
        self.shared.running.store(false, Ordering::SeqCst);
        self.shared.ready.notify_all();
        if handle.join().is_err() {
            tracing::error!(session = %self.key, "RTMP push thread panicked");
        }
        tracing::info!(session = %self.key, "RTMP push session closed");
    }
}

impl Drop for RtmpPushSession {
    fn drop(&mut self) {
        self.close();
    }
}

/// Next record to send, with the sequence header when it is a key frame.
struct Pending {
    header: RecordHeader,
    sequence_header: Option<Vec<u8>>,
}

fn next_record(shared: &Shared, poll_interval: Duration, payload: &mut Vec<u8>) -> Option<Pending> {
    let mut buffer = shared.buffer.lock();
    if buffer.ring.is_empty() {
        shared.ready.wait_for(&mut buffer, poll_interval);
    }
    if !shared.running.load(Ordering::SeqCst) {
        return None;
    }
    let header = buffer.ring.pop_record(payload)?;
    let sequence_header = if header.kind == RECORD_KEY {
        match (buffer.sps.get(), buffer.pps.get()) {
            (Some(sps), Some(pps)) => match flv::avc_sequence_header(sps, pps) {
                Ok(tag) => Some(tag),
                Err(e) => {
                    tracing::debug!(error = %e, "unusable parameter sets");
                    None
                }
            },
            _ => None,
        }
    } else {
        None
    };
    Some(Pending {
        header,
        sequence_header,
    })
}

fn push_loop(
    shared: &Shared,
    connector: &dyn Connector,
    url: &RtmpUrl,
    config: &PushConfig,
    label: &str,
) {
    let mut publisher = match connector.connect(url, config) {
        Ok(p) => p,
        Err(e) => {
            tracing::error!(session = label, error = %e, "RTMP connect failed");
            shared.failed.store(true, Ordering::SeqCst);
            return;
        }
    };

    let mut payload = Vec::new();
    let mut key_sent = false;
    let mut base_timestamp: Option<u64> = None;

    while shared.running.load(Ordering::SeqCst) {
        let Some(pending) = next_record(shared, config.poll_interval, &mut payload) else {
            continue;
        };
        let key_frame = pending.header.kind == RECORD_KEY;
        if !key_frame && !key_sent {
            tracing::trace!(session = label, "dropping frame before first key frame");
            continue;
        }
        if key_frame && pending.sequence_header.is_none() {
            tracing::debug!(session = label, "key frame skipped, no SPS/PPS yet");
            continue;
        }

        let base = *base_timestamp.get_or_insert(pending.header.timestamp);
        let timestamp = pending.header.timestamp.saturating_sub(base) as u32;

        if let Err(e) = send_record(publisher.as_mut(), &pending, timestamp, &payload) {
            tracing::warn!(session = label, error = %e, "RTMP send failed");
            shared.failed.store(true, Ordering::SeqCst);
            break;
        }
        key_sent |= key_frame;
    }

    publisher.close();
    tracing::debug!(session = label, "RTMP push thread exited");
}

/// Sequence header first when present, then the NAL unit tag.
fn send_record(
    publisher: &mut dyn VideoPublisher,
    pending: &Pending,
    timestamp: u32,
    nal: &[u8],
) -> Result<()> {
    if let Some(tag) = &pending.sequence_header {
        publisher.send_video(timestamp, &[tag.as_slice()])?;
    }
    let header = flv::nalu_header(pending.header.kind == RECORD_KEY, nal.len())?;
    publisher.send_video(timestamp, &[&header, nal])
}

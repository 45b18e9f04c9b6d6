//! Annex B file replay standing in for a live encoder.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use bytes::{BufMut, Bytes, BytesMut};
use camstream::media::nal::extract_nal_units;
use camstream::stream::{Frame, FrameKind, LocalStreamRegistry, MediaHead, VideoCodec, VideoInfo};
use camstream::{Error, Result};

const START_CODE: [u8; 4] = [0, 0, 0, 1];

const NAL_SLICE: u8 = 1;
const NAL_IDR: u8 = 5;
const NAL_SPS: u8 = 7;
const NAL_PPS: u8 = 8;

/// One access unit: parameter sets and SEI grouped with the slice that
/// follows them. Every unit keeps a 4-byte start code.
struct AccessUnit {
    key: bool,
    nals: Vec<Bytes>,
}

pub struct AnnexBSource {
    units: Vec<AccessUnit>,
    sps: Option<Bytes>,
    pps: Option<Bytes>,
}

impl AnnexBSource {
    pub fn open(path: &Path) -> Result<Self> {
        let data = std::fs::read(path)?;
        let source = Self::parse(&data);
        if source.units.is_empty() {
            return Err(Error::Protocol(format!(
                "{} holds no H.264 slices",
                path.display()
            )));
        }
        tracing::info!(
            path = %path.display(),
            access_units = source.units.len(),
            key_frames = source.units.iter().filter(|u| u.key).count(),
            "loaded Annex B stream"
        );
        Ok(source)
    }

    fn parse(data: &[u8]) -> Self {
        let mut units = Vec::new();
        let mut pending = Vec::new();
        let mut sps = None;
        let mut pps = None;

        for nal in extract_nal_units(data) {
            let nal_type = nal[0] & 0x1F;
            match nal_type {
                NAL_SPS if sps.is_none() => sps = Some(Bytes::copy_from_slice(nal)),
                NAL_PPS if pps.is_none() => pps = Some(Bytes::copy_from_slice(nal)),
                _ => {}
            }

            let mut unit = BytesMut::with_capacity(START_CODE.len() + nal.len());
            unit.put_slice(&START_CODE);
            unit.put_slice(nal);
            pending.push(unit.freeze());

            if nal_type == NAL_SLICE || nal_type == NAL_IDR {
                units.push(AccessUnit {
                    key: nal_type == NAL_IDR,
                    nals: std::mem::take(&mut pending),
                });
            }
        }
        if !pending.is_empty() {
            tracing::debug!(nals = pending.len(), "trailing NAL units without a slice dropped");
        }

        Self { units, sps, pps }
    }

    /// Media head advertised for the replayed channel.
    pub fn media_head(&self, fps: u32) -> MediaHead {
        let mut video = VideoInfo::new(VideoCodec::H264, 0, 0, fps);
        if let (Some(sps), Some(pps)) = (&self.sps, &self.pps) {
            video.parameter_sets = vec![sps.clone(), pps.clone()];
        }
        MediaHead {
            video: Some(video),
            audio: None,
        }
    }

    fn next_key_after(&self, idx: usize) -> Option<usize> {
        (idx..self.units.len())
            .chain(0..idx)
            .find(|&i| self.units[i].key)
    }

    /// Publish one access unit per frame interval until `running` clears.
    /// Loops back to the start at end of file.
    pub fn replay(
        &self,
        registry: &LocalStreamRegistry,
        channel: u32,
        stream_id: u32,
        fps: u32,
        running: &AtomicBool,
    ) {
        let interval = Duration::from_millis(1000 / u64::from(fps.max(1)));
        let started = Instant::now();
        let mut next_due = started;
        let mut idx = 0;

        while running.load(Ordering::SeqCst) {
            if registry.take_i_frame_request(channel, stream_id) {
                if let Some(key) = self.next_key_after(idx) {
                    tracing::debug!(from = idx, to = key, "jumping to key frame on request");
                    idx = key;
                }
            }

            let unit = &self.units[idx];
            let timestamp_ms = started.elapsed().as_millis() as u64;
            let kind = if unit.key {
                FrameKind::VideoI
            } else {
                FrameKind::VideoP
            };
            let mut frame = Frame::new(kind, timestamp_ms);
            for nal in &unit.nals {
                frame.push_unit(nal.clone(), timestamp_ms);
            }
            if registry.publish(channel, stream_id, &frame) {
                tracing::trace!(idx, timestamp_ms, key = unit.key, "published access unit");
            }

            idx = (idx + 1) % self.units.len();
            if idx == 0 {
                tracing::debug!("end of file, looping");
            }

            next_due += interval;
            let now = Instant::now();
            if next_due > now {
                thread::sleep(next_due - now);
            } else {
                next_due = now;
            }
        }
    }
}

/// Run [`AnnexBSource::replay`] on its own thread.
pub fn spawn_replay(
    source: AnnexBSource,
    registry: Arc<LocalStreamRegistry>,
    fps: u32,
    running: Arc<AtomicBool>,
) -> Result<thread::JoinHandle<()>> {
    let handle = thread::Builder::new()
        .name("replay".to_string())
        .spawn(move || source.replay(&registry, 0, 0, fps, &running))?;
    Ok(handle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn groups_parameter_sets_with_the_next_slice() {
        let stream = [
            0, 0, 0, 1, 0x67, 0x42, 0xC0, 0x1E, //
            0, 0, 0, 1, 0x68, 0xCE, 0x3C, 0x80, //
            0, 0, 1, 0x06, 0x05, //
            0, 0, 0, 1, 0x65, 0x88, 0x84, //
            0, 0, 0, 1, 0x41, 0x9A, //
            0, 0, 0, 1, 0x41, 0x9B, //
            0, 0, 0, 1, 0x67, 0x42,
        ];
        let source = AnnexBSource::parse(&stream);

        assert_eq!(source.units.len(), 3);
        assert!(source.units[0].key);
        assert_eq!(source.units[0].nals.len(), 4);
        assert!(source.units[0].nals.iter().all(|n| n.starts_with(&START_CODE)));
        assert!(!source.units[1].key);
        assert_eq!(source.units[1].nals.len(), 1);

        assert_eq!(source.sps.as_deref(), Some(&[0x67, 0x42, 0xC0, 0x1E][..]));
        let head = source.media_head(25);
        assert_eq!(head.video.map(|v| v.parameter_sets.len()), Some(2));
    }

    #[test]
    fn key_frame_search_wraps() {
        let stream = [
            0, 0, 0, 1, 0x65, 0x88, //
            0, 0, 0, 1, 0x41, 0x9A, //
            0, 0, 0, 1, 0x41, 0x9B,
        ];
        let source = AnnexBSource::parse(&stream);
        assert_eq!(source.next_key_after(1), Some(0));
        assert_eq!(source.next_key_after(0), Some(0));
    }
}

use base64::prelude::{BASE64_STANDARD, Engine as _};

use super::rtp::{RTP_HEADER_LEN, RtpSerializer, media_timestamp};
use super::{MAX_PACKET_LEN, Packetizer, nal, send_packet};
use crate::error::Result;
use crate::stream::Frame;
use crate::transport::RtpTransport;

const CLOCK_RATE: u32 = 90_000;
const NAL_TYPE_SPS: u8 = 7;
const NAL_TYPE_PPS: u8 = 8;
const NAL_TYPE_FU_A: u8 = 28;

/// H.264 RTP packetizer (RFC 6184).
///
/// Converts H.264 Annex B frames into RTP packets. Supports two
/// packetization modes from RFC 6184:
///
/// - **Single NAL Unit** (§5.6): NALs whose payload fits within
///   `max_packet_len - 12` are sent as-is in a single RTP packet with the
///   marker bit set.
///
/// - **FU-A Fragmentation** (§5.8): larger NALs are split across multiple
///   RTP packets. Each fragment carries a 2-byte FU header before the NAL
///   payload:
///
///   ```text
///   FU indicator:  [F|NRI|Type=28]     (1 byte)
///   FU header:     [S|E|R|NAL_Type]    (1 byte)
///   Fragment data: [...]               (up to max_packet_len - 14 bytes)
///   ```
///
///   - **S** (start): set on the first fragment only
///   - **E** (end): set on the last fragment only, together with the marker
///   - **NAL_Type**: the original NAL unit type from the first byte
///
/// All packets of one frame share one RTP timestamp (`timestamp_ms * 90`).
///
/// ## SDP attributes (RFC 6184 §8.1)
///
/// - `a=rtpmap:96 H264/90000`
/// - `a=fmtp:96 packetization-mode=1[;profile-level-id=..][;sprop-parameter-sets=..]`
///
/// SPS/PPS come from the stream's media head when available, otherwise they
/// are captured from the first frame that contains them.
#[derive(Debug)]
pub struct H264Packetizer {
    serializer: RtpSerializer,
    max_packet_len: usize,
    sps: Option<Vec<u8>>,
    pps: Option<Vec<u8>>,
}

impl H264Packetizer {
    /// Create with explicit payload type, SSRC and initial sequence number.
    pub fn new(pt: u8, ssrc: u32, initial_sequence: u16) -> Self {
        Self::with_serializer(RtpSerializer::new(pt, ssrc, initial_sequence))
    }

    /// Create with random SSRC and sequence seed (RFC 3550 §8.1).
    pub fn with_random_seed(pt: u8) -> Self {
        Self::with_serializer(RtpSerializer::with_random_seed(pt))
    }

    fn with_serializer(serializer: RtpSerializer) -> Self {
        Self {
            serializer,
            max_packet_len: MAX_PACKET_LEN,
            sps: None,
            pps: None,
        }
    }

    /// Upper bound on a whole packet, header included.
    pub fn set_max_packet_len(&mut self, len: usize) {
        self.max_packet_len = len.max(RTP_HEADER_LEN + 4);
    }

    /// Parameter sets without start codes, as advertised in SDP.
    pub fn set_parameter_sets(&mut self, sps: &[u8], pps: &[u8]) {
        self.sps = Some(sps.to_vec());
        self.pps = Some(pps.to_vec());
    }

    /// Derive profile-level-id from SPS NAL (RFC 6184 §8.1): bytes 1–3 are
    /// profile_idc, constraint flags and level_idc.
    fn profile_level_id(&self) -> Option<String> {
        let sps = self.sps.as_deref()?;
        if sps.len() < 4 {
            return None;
        }
        Some(format!("{:02x}{:02x}{:02x}", sps[1], sps[2], sps[3]))
    }

    fn sprop_parameter_sets(&self) -> Option<String> {
        let sps = self.sps.as_deref()?;
        let pps = self.pps.as_deref()?;
        Some(format!(
            "{},{}",
            BASE64_STANDARD.encode(sps),
            BASE64_STANDARD.encode(pps)
        ))
    }

    fn capture_parameter_set(&mut self, nal: &[u8]) {
        let Some(&header) = nal.first() else { return };
        match header & 0x1f {
            NAL_TYPE_SPS if self.sps.is_none() => {
                self.sps = Some(nal.to_vec());
                tracing::debug!(len = nal.len(), "H.264 SPS captured from bitstream");
            }
            NAL_TYPE_PPS if self.pps.is_none() => {
                self.pps = Some(nal.to_vec());
                tracing::debug!(len = nal.len(), "H.264 PPS captured from bitstream");
            }
            _ => {}
        }
    }

    /// Send one NAL unit as a single packet or a run of FU-A fragments.
    fn send_nal(
        &mut self,
        nal: &[u8],
        timestamp: u32,
        transport: &mut dyn RtpTransport,
    ) -> Result<()> {
        let max_payload = self.max_packet_len - RTP_HEADER_LEN;

        if nal.len() <= max_payload {
            let mut packet = self.serializer.start_packet(true, timestamp);
            packet.push_span(nal)?;
            return send_packet(transport, &packet);
        }

        let nal_header = nal[0];
        let nal_type = nal_header & 0x1f;
        let fu_indicator = (nal_header & 0xe0) | NAL_TYPE_FU_A;
        let payload = &nal[1..];
        let max_fragment = max_payload - 2;
        let fragments = payload.len().div_ceil(max_fragment);

        for (i, chunk) in payload.chunks(max_fragment).enumerate() {
            let first = i == 0;
            let last = i + 1 == fragments;
            let fu_header = ((first as u8) << 7) | ((last as u8) << 6) | nal_type;

            let mut packet = self.serializer.start_packet(last, timestamp);
            packet.put_header(|w| {
                w.put_u8(fu_indicator)?;
                w.put_u8(fu_header)
            })?;
            packet.push_span(chunk)?;
            send_packet(transport, &packet)?;
        }

        tracing::trace!(
            nal_type,
            nal_size = nal.len(),
            fragments,
            "FU-A fragmented NAL unit"
        );
        Ok(())
    }
}

impl Packetizer for H264Packetizer {
    fn serialize(&mut self, frame: &Frame, transport: &mut dyn RtpTransport) -> bool {
        if !frame.kind.is_nal_video() {
            return false;
        }
        let timestamp = media_timestamp(frame.timestamp_ms, CLOCK_RATE);

        for unit in &frame.units {
            for nal in nal::unit_nals(&unit.data) {
                self.capture_parameter_set(nal);
                if let Err(e) = self.send_nal(nal, timestamp, transport) {
                    tracing::debug!(error = %e, "H.264 frame dropped");
                    return false;
                }
            }
        }

        tracing::trace!(
            frame_bytes = frame.byte_len(),
            seq = self.serializer.sequence(),
            ts = timestamp,
            "frame packetized"
        );
        true
    }

    fn codec_name(&self) -> &'static str {
        "H264"
    }

    /// 90 kHz clock rate per RFC 6184 §8.1.
    fn clock_rate(&self) -> u32 {
        CLOCK_RATE
    }

    fn payload_type(&self) -> u8 {
        self.serializer.payload_type()
    }

    /// `a=rtpmap` must precede `a=fmtp`, which references its payload type.
    fn sdp_attributes(&self) -> Vec<String> {
        let pt = self.payload_type();
        let mut fmtp = format!("a=fmtp:{pt} packetization-mode=1");
        if let Some(pl) = self.profile_level_id() {
            fmtp.push_str(&format!(";profile-level-id={pl}"));
        }
        if let Some(sprop) = self.sprop_parameter_sets() {
            fmtp.push_str(&format!(";sprop-parameter-sets={sprop}"));
        }
        vec![
            format!("a=rtpmap:{pt} {}/{}", self.codec_name(), self.clock_rate()),
            fmtp,
        ]
    }

    fn next_sequence(&self) -> u16 {
        self.serializer.sequence()
    }

    fn next_rtp_timestamp(&self) -> u32 {
        self.serializer.last_timestamp()
    }
}

//! H.265 (HEVC) RTP packetizer: RFC 7798.
//!
//! Differences from H.264 (RFC 6184):
//!
//! - **2-byte NAL unit header**; the NAL type is in bits 1..6 of the first
//!   byte:
//!
//!   ```text
//!   +---------------+---------------+
//!   |F|   Type    |  LayerId  | TID |
//!   +---------------+---------------+
//!   ```
//!
//! - **Fragmentation Unit** (§4.4.3): the 2-byte payload header copies F,
//!   LayerId and TID from the NAL header with Type=49, followed by a 1-byte
//!   FU header:
//!
//!   ```text
//!   +---------------+---------------+---------------+
//!   |F|   Type(49)  |  LayerId  | TID |S|E|  FuType |
//!   +---------------+---------------+---------------+
//!   ```
//!
//! - **SDP attributes** (§7.1):
//!   ```text
//!   a=rtpmap:96 H265/90000
//!   a=fmtp:96 sprop-vps=...;sprop-sps=...;sprop-pps=...
//!   ```

use base64::prelude::{BASE64_STANDARD, Engine as _};

use super::rtp::{RTP_HEADER_LEN, RtpSerializer, media_timestamp};
use super::{MAX_PACKET_LEN, Packetizer, nal, send_packet};
use crate::error::Result;
use crate::stream::Frame;
use crate::transport::RtpTransport;

const CLOCK_RATE: u32 = 90_000;
const NAL_TYPE_VPS: u8 = 32;
const NAL_TYPE_SPS: u8 = 33;
const NAL_TYPE_PPS: u8 = 34;
const NAL_TYPE_FU: u8 = 49;

const NAL_HEADER_LEN: usize = 2;
const FU_HEADER_LEN: usize = 1;

fn nal_type(header: u8) -> u8 {
    (header >> 1) & 0x3f
}

#[derive(Debug)]
pub struct H265Packetizer {
    serializer: RtpSerializer,
    max_packet_len: usize,
    vps: Option<Vec<u8>>,
    sps: Option<Vec<u8>>,
    pps: Option<Vec<u8>>,
}

impl H265Packetizer {
    pub fn new(pt: u8, ssrc: u32, initial_sequence: u16) -> Self {
        Self::with_serializer(RtpSerializer::new(pt, ssrc, initial_sequence))
    }

    pub fn with_random_seed(pt: u8) -> Self {
        Self::with_serializer(RtpSerializer::with_random_seed(pt))
    }

    fn with_serializer(serializer: RtpSerializer) -> Self {
        Self {
            serializer,
            max_packet_len: MAX_PACKET_LEN,
            vps: None,
            sps: None,
            pps: None,
        }
    }

    pub fn set_max_packet_len(&mut self, len: usize) {
        self.max_packet_len = len.max(RTP_HEADER_LEN + NAL_HEADER_LEN + FU_HEADER_LEN + 1);
    }

    pub fn set_parameter_sets(&mut self, vps: &[u8], sps: &[u8], pps: &[u8]) {
        self.vps = Some(vps.to_vec());
        self.sps = Some(sps.to_vec());
        self.pps = Some(pps.to_vec());
    }

    fn capture_parameter_set(&mut self, nal: &[u8]) {
        let Some(&header) = nal.first() else { return };
        let slot = match nal_type(header) {
            NAL_TYPE_VPS => &mut self.vps,
            NAL_TYPE_SPS => &mut self.sps,
            NAL_TYPE_PPS => &mut self.pps,
            _ => return,
        };
        if slot.is_none() {
            *slot = Some(nal.to_vec());
            tracing::debug!(
                nal_type = nal_type(header),
                len = nal.len(),
                "H.265 parameter set captured from bitstream"
            );
        }
    }

    fn send_nal(
        &mut self,
        nal: &[u8],
        timestamp: u32,
        transport: &mut dyn RtpTransport,
    ) -> Result<()> {
        let max_payload = self.max_packet_len - RTP_HEADER_LEN;

        // Too short to carry a NAL header: nothing to fragment.
        if nal.len() <= max_payload || nal.len() <= NAL_HEADER_LEN {
            let mut packet = self.serializer.start_packet(true, timestamp);
            packet.push_span(nal)?;
            return send_packet(transport, &packet);
        }

        let fu_type = nal_type(nal[0]);
        let payload_header = [(nal[0] & 0x81) | (NAL_TYPE_FU << 1), nal[1]];
        let payload = &nal[NAL_HEADER_LEN..];
        let max_fragment = max_payload - NAL_HEADER_LEN - FU_HEADER_LEN;
        let fragments = payload.len().div_ceil(max_fragment);

        for (i, chunk) in payload.chunks(max_fragment).enumerate() {
            let first = i == 0;
            let last = i + 1 == fragments;
            let fu_header = ((first as u8) << 7) | ((last as u8) << 6) | fu_type;

            let mut packet = self.serializer.start_packet(last, timestamp);
            packet.put_header(|w| {
                w.put_slice(&payload_header)?;
                w.put_u8(fu_header)
            })?;
            packet.push_span(chunk)?;
            send_packet(transport, &packet)?;
        }

        tracing::trace!(
            nal_type = fu_type,
            nal_size = nal.len(),
            fragments,
            "FU fragmented NAL unit"
        );
        Ok(())
    }
}

impl Packetizer for H265Packetizer {
    fn serialize(&mut self, frame: &Frame, transport: &mut dyn RtpTransport) -> bool {
        if !frame.kind.is_nal_video() {
            return false;
        }
        let timestamp = media_timestamp(frame.timestamp_ms, CLOCK_RATE);

        for unit in &frame.units {
            for nal in nal::unit_nals(&unit.data) {
                self.capture_parameter_set(nal);
                if let Err(e) = self.send_nal(nal, timestamp, transport) {
                    tracing::debug!(error = %e, "H.265 frame dropped");
                    return false;
                }
            }
        }
        true
    }

    fn codec_name(&self) -> &'static str {
        "H265"
    }

    fn clock_rate(&self) -> u32 {
        CLOCK_RATE
    }

    fn payload_type(&self) -> u8 {
        self.serializer.payload_type()
    }

    fn sdp_attributes(&self) -> Vec<String> {
        let pt = self.payload_type();
        let mut attrs = vec![format!(
            "a=rtpmap:{pt} {}/{}",
            self.codec_name(),
            self.clock_rate()
        )];

        let sprops: Vec<String> = [
            ("sprop-vps", &self.vps),
            ("sprop-sps", &self.sps),
            ("sprop-pps", &self.pps),
        ]
        .into_iter()
        .filter_map(|(name, set)| {
            set.as_deref()
                .map(|set| format!("{name}={}", BASE64_STANDARD.encode(set)))
        })
        .collect();
        if !sprops.is_empty() {
            attrs.push(format!("a=fmtp:{pt} {}", sprops.join(";")));
        }
        attrs
    }

    fn next_sequence(&self) -> u16 {
        self.serializer.sequence()
    }

    fn next_rtp_timestamp(&self) -> u32 {
        self.serializer.last_timestamp()
    }
}

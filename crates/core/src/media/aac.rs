//! AAC RTP packetizer: RFC 3640 (`mode=AAC-hbr`).
//!
//! Each access unit travels in its own packet behind a 4-byte AU header
//! section:
//!
//! ```text
//! +--------------------------------+-------------------------+-----+
//! | AU-headers-length = 16 (bits)  | AU-size (13) | index (3)| AU  |
//! +--------------------------------+-------------------------+-----+
//! ```
//!
//! The RTP clock runs at the sample rate. Encoders that emit ADTS framing
//! have the 7-byte (9 with CRC) header stripped first when configured.

use super::rtp::{RTP_HEADER_LEN, RtpSerializer, media_timestamp};
use super::{MAX_PACKET_LEN, Packetizer, send_packet};
use crate::error::{Error, Result};
use crate::stream::{Frame, FrameKind};
use crate::transport::RtpTransport;

const AU_HEADER_SECTION_LEN: usize = 4;
const AU_SIZE_LIMIT: usize = (1 << 13) - 1;
const ADTS_HEADER_LEN: usize = 7;
const ADTS_CRC_LEN: usize = 2;

/// Sampling frequencies indexed by `samplingFrequencyIndex` (ISO 14496-3).
const SAMPLE_RATES: [u32; 13] = [
    96000, 88200, 64000, 48000, 44100, 32000, 24000, 22050, 16000, 12000, 11025, 8000, 7350,
];

/// AAC-LC `AudioSpecificConfig` as the hex string used by `config=`.
fn audio_specific_config(sample_rate: u32, channels: u8) -> Result<String> {
    let index = SAMPLE_RATES
        .iter()
        .position(|&r| r == sample_rate)
        .ok_or_else(|| Error::UnsupportedCodec(format!("AAC at {sample_rate} Hz")))?;
    if channels == 0 || channels > 7 {
        return Err(Error::UnsupportedCodec(format!("AAC with {channels} channels")));
    }
    let config = (2u16 << 11) | ((index as u16) << 7) | ((channels as u16) << 3);
    Ok(format!("{config:04X}"))
}

/// Length of the ADTS header at the start of `data`, if one is present.
fn adts_header_len(data: &[u8]) -> Option<usize> {
    if data.len() < ADTS_HEADER_LEN || data[0] != 0xFF || data[1] & 0xF0 != 0xF0 {
        return None;
    }
    let protection_absent = data[1] & 0x01 != 0;
    Some(if protection_absent {
        ADTS_HEADER_LEN
    } else {
        ADTS_HEADER_LEN + ADTS_CRC_LEN
    })
}

#[derive(Debug)]
pub struct AacPacketizer {
    serializer: RtpSerializer,
    sample_rate: u32,
    channels: u8,
    config: String,
    max_packet_len: usize,
    strip_adts: bool,
}

impl AacPacketizer {
    pub fn new(pt: u8, ssrc: u32, initial_sequence: u16, sample_rate: u32, channels: u8) -> Result<Self> {
        Self::with_serializer(RtpSerializer::new(pt, ssrc, initial_sequence), sample_rate, channels)
    }

    pub fn with_random_seed(pt: u8, sample_rate: u32, channels: u8) -> Result<Self> {
        Self::with_serializer(RtpSerializer::with_random_seed(pt), sample_rate, channels)
    }

    fn with_serializer(serializer: RtpSerializer, sample_rate: u32, channels: u8) -> Result<Self> {
        let config = audio_specific_config(sample_rate, channels)?;
        Ok(Self {
            serializer,
            sample_rate,
            channels,
            config,
            max_packet_len: MAX_PACKET_LEN,
            strip_adts: true,
        })
    }

    pub fn set_max_packet_len(&mut self, len: usize) {
        self.max_packet_len = len.max(RTP_HEADER_LEN + AU_HEADER_SECTION_LEN + 1);
    }

    pub fn set_strip_adts(&mut self, strip: bool) {
        self.strip_adts = strip;
    }

    fn send_access_unit(
        &mut self,
        data: &[u8],
        timestamp: u32,
        transport: &mut dyn RtpTransport,
    ) -> Result<()> {
        let au = match adts_header_len(data) {
            Some(skip) if self.strip_adts => &data[skip.min(data.len())..],
            _ => data,
        };
        let max_au = (self.max_packet_len - RTP_HEADER_LEN - AU_HEADER_SECTION_LEN).min(AU_SIZE_LIMIT);
        if au.is_empty() || au.len() > max_au {
            return Err(Error::BufferOverflow {
                needed: au.len(),
                remaining: max_au,
            });
        }

        let mut packet = self.serializer.start_packet(true, timestamp);
        packet.put_header(|w| {
            w.put_u16(16)?;
            w.put_u16((au.len() as u16) << 3)
        })?;
        packet.push_span(au)?;
        send_packet(transport, &packet)
    }
}

impl Packetizer for AacPacketizer {
    fn serialize(&mut self, frame: &Frame, transport: &mut dyn RtpTransport) -> bool {
        if frame.kind != FrameKind::Audio {
            return false;
        }
        for unit in &frame.units {
            let timestamp = media_timestamp(unit.timestamp_ms, self.sample_rate);
            if let Err(e) = self.send_access_unit(&unit.data, timestamp, transport) {
                tracing::debug!(error = %e, "AAC access unit dropped");
                return false;
            }
        }
        true
    }

    fn codec_name(&self) -> &'static str {
        "MPEG4-GENERIC"
    }

    fn clock_rate(&self) -> u32 {
        self.sample_rate
    }

    fn payload_type(&self) -> u8 {
        self.serializer.payload_type()
    }

    fn sdp_attributes(&self) -> Vec<String> {
        let pt = self.payload_type();
        vec![
            format!(
                "a=rtpmap:{pt} {}/{}/{}",
                self.codec_name(),
                self.sample_rate,
                self.channels
            ),
            format!(
                "a=fmtp:{pt} streamtype=5;profile-level-id=1;mode=AAC-hbr;sizelength=13;indexlength=3;indexdeltalength=3;config={}",
                self.config
            ),
        ]
    }

    fn next_sequence(&self) -> u16 {
        self.serializer.sequence()
    }

    fn next_rtp_timestamp(&self) -> u32 {
        self.serializer.last_timestamp()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::testing::{RecordingTransport, marker, ts};

    fn adts(payload: &[u8]) -> Vec<u8> {
        let mut frame = vec![0xFF, 0xF1, 0x4C, 0x80, 0x00, 0x00, 0xFC];
        frame.extend_from_slice(payload);
        frame
    }

    #[test]
    fn config_string() {
        assert_eq!(audio_specific_config(48000, 2).unwrap(), "1190");
        assert_eq!(audio_specific_config(44100, 2).unwrap(), "1210");
        assert_eq!(audio_specific_config(16000, 1).unwrap(), "1408");
        assert!(audio_specific_config(12345, 2).is_err());
    }

    #[test]
    fn au_header_and_adts_strip() {
        let mut p = AacPacketizer::new(97, 1, 0, 48000, 2).unwrap();
        let mut t = RecordingTransport::default();
        let au = [0x21u8, 0x10, 0x05];
        assert!(p.serialize(&Frame::single(FrameKind::Audio, 1000, adts(&au)), &mut t));

        let pkt = &t.packets[0];
        assert!(marker(pkt));
        assert_eq!(ts(pkt), 48000);
        assert_eq!(&pkt[12..14], &[0x00, 0x10]);
        assert_eq!(u16::from_be_bytes([pkt[14], pkt[15]]), (au.len() as u16) << 3);
        assert_eq!(&pkt[16..], &au);
    }

    #[test]
    fn adts_kept_when_not_configured() {
        let mut p = AacPacketizer::new(97, 1, 0, 48000, 2).unwrap();
        p.set_strip_adts(false);
        let mut t = RecordingTransport::default();
        let data = adts(&[1, 2, 3]);
        p.serialize(&Frame::single(FrameKind::Audio, 0, data.clone()), &mut t);
        assert_eq!(&t.packets[0][16..], &data[..]);
    }

    #[test]
    fn oversize_access_unit_rejected() {
        let mut p = AacPacketizer::new(97, 1, 0, 48000, 2).unwrap();
        let mut t = RecordingTransport::default();
        let frame = Frame::single(FrameKind::Audio, 0, vec![0x11u8; MAX_PACKET_LEN]);
        assert!(!p.serialize(&frame, &mut t));
        assert!(t.packets.is_empty());
    }

    #[test]
    fn video_frame_is_ignored() {
        let mut p = AacPacketizer::new(97, 1, 0, 48000, 2).unwrap();
        let mut t = RecordingTransport::default();
        assert!(!p.serialize(&Frame::single(FrameKind::VideoI, 0, vec![0u8, 0, 0, 1, 0x65]), &mut t));
    }

    #[test]
    fn sdp_lines() {
        let p = AacPacketizer::new(97, 1, 0, 44100, 2).unwrap();
        let attrs = p.sdp_attributes();
        assert_eq!(attrs[0], "a=rtpmap:97 MPEG4-GENERIC/44100/2");
        assert!(attrs[1].starts_with("a=fmtp:97 streamtype=5;profile-level-id=1;mode=AAC-hbr;"));
        assert!(attrs[1].ends_with("config=1210"));
    }
}

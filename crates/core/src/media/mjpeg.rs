//! MJPEG RTP packetizer: RFC 2435.
//!
//! Each baseline JPEG is parsed for the few parameters the receiver needs to
//! rebuild its headers, and only the entropy-coded scan data is sent:
//!
//! - **SOF0**: width, height and chroma subsampling (type 0 = 4:2:2,
//!   type 1 = 4:2:0).
//! - **DQT**: 8-bit quantization tables, sent inline (Q = 255).
//! - **DRI**: restart interval; when non-zero the type gains +64 and every
//!   packet carries a restart marker header.
//! - **SOS**: scan data runs from the end of this segment up to EOI.
//!
//! Every packet starts with the 8-byte main header:
//!
//! ```text
//! | type-specific | fragment offset (24) | type | Q | width/8 | height/8 |
//! ```
//!
//! followed by the restart header (`ri (16) | F=1 L=1 count=0x3FFF`) when
//! needed, and on the first fragment by the quantization table header
//! (`MBZ | precision | length (16) | tables`).

use super::rtp::{RTP_HEADER_LEN, RtpSerializer, media_timestamp};
use super::{MAX_PACKET_LEN, Packetizer, send_packet};
use crate::error::{Error, Result};
use crate::stream::{Frame, FrameKind};
use crate::transport::RtpTransport;

pub const MJPEG_PAYLOAD_TYPE: u8 = 26;
const CLOCK_RATE: u32 = 90_000;

const MAIN_HEADER_LEN: usize = 8;
const RESTART_HEADER_LEN: usize = 4;
const QTABLE_HEADER_LEN: usize = 4;
const QTABLE_LEN: usize = 64;
/// Q values >= 128 signal tables carried in-band.
const Q_INLINE_TABLES: u8 = 255;
const TYPE_RESTART_FLAG: u8 = 64;

const SOI: u8 = 0xD8;
const EOI: u8 = 0xD9;
const SOF0: u8 = 0xC0;
const DQT: u8 = 0xDB;
const DRI: u8 = 0xDD;
const SOS: u8 = 0xDA;

/// Fields of one baseline JPEG needed for RFC 2435.
#[derive(Debug)]
pub struct JpegImage<'a> {
    pub width: u16,
    pub height: u16,
    /// RFC 2435 type without the restart flag.
    pub kind: u8,
    pub restart_interval: u16,
    pub qtables: Vec<&'a [u8]>,
    pub scan: &'a [u8],
}

fn malformed(what: &str) -> Error {
    Error::UnsupportedCodec(format!("JPEG: {what}"))
}

fn read_u16(data: &[u8], at: usize) -> Result<u16> {
    data.get(at..at + 2)
        .map(|b| u16::from_be_bytes([b[0], b[1]]))
        .ok_or_else(|| malformed("truncated segment"))
}

impl<'a> JpegImage<'a> {
    pub fn parse(data: &'a [u8]) -> Result<Self> {
        if data.len() < 4 || data[0] != 0xFF || data[1] != SOI {
            return Err(malformed("missing SOI"));
        }

        let mut size = None;
        let mut kind = None;
        let mut restart_interval = 0;
        let mut qtables = Vec::new();
        let mut pos = 2;

        loop {
            // Fill bytes between segments are legal.
            while data.get(pos) == Some(&0xFF) && data.get(pos + 1) == Some(&0xFF) {
                pos += 1;
            }
            if data.get(pos) != Some(&0xFF) {
                return Err(malformed("expected marker"));
            }
            let marker = *data.get(pos + 1).ok_or_else(|| malformed("truncated marker"))?;
            let seg_len = read_u16(data, pos + 2)? as usize;
            let body_start = pos + 4;
            let body_end = pos + 2 + seg_len;
            if seg_len < 2 || body_end > data.len() {
                return Err(malformed("segment exceeds image"));
            }
            let body = &data[body_start..body_end];

            match marker {
                DQT => {
                    let mut rest = body;
                    while let Some((&pq_tq, tail)) = rest.split_first() {
                        let precision = pq_tq >> 4;
                        let table_len = if precision == 0 { QTABLE_LEN } else { 2 * QTABLE_LEN };
                        if tail.len() < table_len {
                            return Err(malformed("short DQT"));
                        }
                        if precision != 0 {
                            return Err(malformed("16-bit quantization tables"));
                        }
                        if qtables.len() < 2 {
                            qtables.push(&tail[..table_len]);
                        }
                        rest = &tail[table_len..];
                    }
                }
                SOF0 => {
                    if body.len() < 6 {
                        return Err(malformed("short SOF0"));
                    }
                    let height = read_u16(body, 1)?;
                    let width = read_u16(body, 3)?;
                    let components = body[5] as usize;
                    if body.len() < 6 + components * 3 || components == 0 {
                        return Err(malformed("short SOF0 components"));
                    }
                    kind = Some(match body[7] {
                        0x21 => 0,
                        0x22 => 1,
                        s => return Err(malformed(&format!("sampling factor {s:#04x}"))),
                    });
                    size = Some((width, height));
                }
                DRI => restart_interval = read_u16(body, 0)?,
                SOS => {
                    let scan = &data[body_end..];
                    let scan = match scan {
                        [head @ .., 0xFF, EOI] => head,
                        other => other,
                    };
                    let (width, height) = size.ok_or_else(|| malformed("SOS before SOF0"))?;
                    let kind = kind.ok_or_else(|| malformed("SOS before SOF0"))?;
                    if qtables.is_empty() {
                        return Err(malformed("no quantization tables"));
                    }
                    if width == 0 || height == 0 || width > 2040 || height > 2040 {
                        return Err(malformed("dimensions out of range"));
                    }
                    return Ok(Self {
                        width,
                        height,
                        kind,
                        restart_interval,
                        qtables,
                        scan,
                    });
                }
                0xC1..=0xCF if marker != 0xC4 && marker != 0xC8 && marker != 0xCC => {
                    return Err(malformed("not a baseline JPEG"));
                }
                _ => {}
            }
            pos = body_end;
        }
    }

    fn qtable_bytes(&self) -> usize {
        self.qtables.iter().map(|t| t.len()).sum()
    }
}

#[derive(Debug)]
pub struct MjpegPacketizer {
    serializer: RtpSerializer,
    max_packet_len: usize,
}

impl MjpegPacketizer {
    pub fn new(ssrc: u32, initial_sequence: u16) -> Self {
        Self {
            serializer: RtpSerializer::new(MJPEG_PAYLOAD_TYPE, ssrc, initial_sequence),
            max_packet_len: MAX_PACKET_LEN,
        }
    }

    pub fn with_random_seed() -> Self {
        Self {
            serializer: RtpSerializer::with_random_seed(MJPEG_PAYLOAD_TYPE),
            max_packet_len: MAX_PACKET_LEN,
        }
    }

    pub fn set_max_packet_len(&mut self, len: usize) {
        let floor = RTP_HEADER_LEN
            + MAIN_HEADER_LEN
            + RESTART_HEADER_LEN
            + QTABLE_HEADER_LEN
            + 2 * QTABLE_LEN
            + 1;
        self.max_packet_len = len.max(floor);
    }

    fn send_image(
        &mut self,
        image: &JpegImage<'_>,
        timestamp: u32,
        transport: &mut dyn RtpTransport,
    ) -> Result<()> {
        let restart = image.restart_interval != 0;
        let kind = if restart {
            image.kind | TYPE_RESTART_FLAG
        } else {
            image.kind
        };
        let width = (image.width.div_ceil(8)) as u8;
        let height = (image.height.div_ceil(8)) as u8;
        let qtable_len = image.qtable_bytes();

        let mut offset = 0usize;
        let mut fragments = 0usize;
        loop {
            let first = offset == 0;
            let mut overhead = RTP_HEADER_LEN + MAIN_HEADER_LEN;
            if restart {
                overhead += RESTART_HEADER_LEN;
            }
            if first {
                overhead += QTABLE_HEADER_LEN + qtable_len;
            }
            let room = self.max_packet_len - overhead;
            let end = (offset + room).min(image.scan.len());
            let last = end == image.scan.len();

            let mut packet = self.serializer.start_packet(last, timestamp);
            packet.put_header(|w| {
                w.put_u8(0)?;
                w.put_u24(offset as u32)?;
                w.put_u8(kind)?;
                w.put_u8(Q_INLINE_TABLES)?;
                w.put_u8(width)?;
                w.put_u8(height)?;
                if restart {
                    w.put_u16(image.restart_interval)?;
                    w.put_u16(0xFFFF)?;
                }
                if first {
                    w.put_u8(0)?;
                    w.put_u8(0)?;
                    w.put_u16(qtable_len as u16)?;
                }
                Ok(())
            })?;
            if first {
                for table in &image.qtables {
                    packet.push_span(table)?;
                }
            }
            packet.push_span(&image.scan[offset..end])?;
            send_packet(transport, &packet)?;

            fragments += 1;
            offset = end;
            if last {
                break;
            }
        }

        tracing::trace!(
            width = image.width,
            height = image.height,
            scan_bytes = image.scan.len(),
            fragments,
            "JPEG frame packetized"
        );
        Ok(())
    }
}

impl Packetizer for MjpegPacketizer {
    fn serialize(&mut self, frame: &Frame, transport: &mut dyn RtpTransport) -> bool {
        if frame.kind != FrameKind::Mjpeg {
            return false;
        }
        let timestamp = media_timestamp(frame.timestamp_ms, CLOCK_RATE);
        for unit in &frame.units {
            let result = JpegImage::parse(&unit.data)
                .and_then(|image| self.send_image(&image, timestamp, transport));
            if let Err(e) = result {
                tracing::debug!(error = %e, "JPEG frame dropped");
                return false;
            }
        }
        true
    }

    fn codec_name(&self) -> &'static str {
        "JPEG"
    }

    fn clock_rate(&self) -> u32 {
        CLOCK_RATE
    }

    fn payload_type(&self) -> u8 {
        MJPEG_PAYLOAD_TYPE
    }

    fn sdp_attributes(&self) -> Vec<String> {
        vec![format!("a=rtpmap:{MJPEG_PAYLOAD_TYPE} JPEG/{CLOCK_RATE}")]
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
    use crate::media::testing::{RecordingTransport, marker, seq, ts};

    fn segment(marker: u8, body: &[u8]) -> Vec<u8> {
        let mut out = vec![0xFF, marker];
        out.extend_from_slice(&((body.len() + 2) as u16).to_be_bytes());
        out.extend_from_slice(body);
        out
    }

    /// Minimal 4:2:0 JPEG with two tables and the given scan length.
    fn jpeg(width: u16, height: u16, restart: u16, scan_len: usize) -> Vec<u8> {
        let mut out = vec![0xFF, SOI];
        let mut dqt = vec![0x00];
        dqt.extend([1u8; 64]);
        dqt.push(0x01);
        dqt.extend([2u8; 64]);
        out.extend(segment(DQT, &dqt));

        let mut sof = vec![8];
        sof.extend(height.to_be_bytes());
        sof.extend(width.to_be_bytes());
        sof.extend([3, 1, 0x22, 0, 2, 0x11, 1, 3, 0x11, 1]);
        out.extend(segment(SOF0, &sof));
        if restart != 0 {
            out.extend(segment(DRI, &restart.to_be_bytes()));
        }
        out.extend(segment(0xC4, &[0x00, 0x01]));
        out.extend(segment(SOS, &[3, 1, 0x00, 2, 0x11, 3, 0x11, 0, 63, 0]));
        out.extend((0..scan_len).map(|i| (i % 251) as u8));
        out.extend([0xFF, EOI]);
        out
    }

    #[test]
    fn parse_extracts_parameters() {
        let data = jpeg(640, 480, 0, 100);
        let image = JpegImage::parse(&data).unwrap();
        assert_eq!((image.width, image.height), (640, 480));
        assert_eq!(image.kind, 1);
        assert_eq!(image.restart_interval, 0);
        assert_eq!(image.qtables.len(), 2);
        assert_eq!(image.qtables[1], &[2u8; 64][..]);
        assert_eq!(image.scan.len(), 100);
    }

    #[test]
    fn parse_rejects_non_jpeg() {
        assert!(JpegImage::parse(&[0, 0, 0, 1, 0x65]).is_err());
        let mut progressive = jpeg(64, 64, 0, 10);
        // Turn SOF0 into SOF2.
        let at = progressive
            .windows(2)
            .position(|w| w == [0xFF, SOF0])
            .unwrap();
        progressive[at + 1] = 0xC2;
        assert!(JpegImage::parse(&progressive).is_err());
    }

    #[test]
    fn fragments_carry_offsets_and_tables_once() {
        let mut p = MjpegPacketizer::new(9, 500);
        let mut t = RecordingTransport::default();
        let data = jpeg(640, 480, 0, 3000);
        assert!(p.serialize(&Frame::single(FrameKind::Mjpeg, 40, data), &mut t));
        assert!(t.packets.len() > 2);

        let mut expected_offset = 0u32;
        let mut scan = Vec::new();
        for (i, pkt) in t.packets.iter().enumerate() {
            assert!(pkt.len() <= MAX_PACKET_LEN);
            assert_eq!(pkt[1] & 0x7f, 26);
            assert_eq!(seq(pkt), 500 + i as u16);
            assert_eq!(ts(pkt), 3600);
            assert_eq!(marker(pkt), i + 1 == t.packets.len());

            let h = &pkt[12..20];
            let offset = u32::from_be_bytes([0, h[1], h[2], h[3]]);
            assert_eq!(offset, expected_offset);
            assert_eq!(h[4], 1, "type");
            assert_eq!(h[5], 255, "Q");
            assert_eq!(h[6], 80, "width / 8");
            assert_eq!(h[7], 60, "height / 8");

            let body = if i == 0 {
                assert_eq!(&pkt[20..24], &[0, 0, 0, 128]);
                assert_eq!(&pkt[24..88], &[1u8; 64][..]);
                &pkt[152..]
            } else {
                &pkt[20..]
            };
            expected_offset += body.len() as u32;
            scan.extend_from_slice(body);
        }
        assert_eq!(scan.len(), 3000);
    }

    #[test]
    fn restart_interval_adds_header() {
        let mut p = MjpegPacketizer::new(9, 0);
        let mut t = RecordingTransport::default();
        p.serialize(&Frame::single(FrameKind::Mjpeg, 0, jpeg(320, 240, 40, 50)), &mut t);
        let pkt = &t.packets[0];
        assert_eq!(pkt[16], 1 | 64);
        assert_eq!(&pkt[20..24], &[0, 40, 0xFF, 0xFF]);
        assert_eq!(&pkt[24..28], &[0, 0, 0, 128]);
    }

    #[test]
    fn h264_frame_is_ignored() {
        let mut p = MjpegPacketizer::new(9, 0);
        let mut t = RecordingTransport::default();
        assert!(!p.serialize(&Frame::single(FrameKind::VideoI, 0, vec![0u8, 0, 0, 1, 0x65]), &mut t));
        assert_eq!(p.sdp_attributes(), vec!["a=rtpmap:26 JPEG/90000".to_string()]);
    }
}

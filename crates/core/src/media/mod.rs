//! Media codecs and RTP packetization.
//!
//! This module provides the [`Packetizer`] trait and codec-specific
//! implementations that turn one encoded [`Frame`] into one or more RTP
//! packets handed to an [`RtpTransport`].
//!
//! ## RTP overview (RFC 3550)
//!
//! Every RTP packet carries a 12-byte fixed header built by
//! [`rtp::RtpSerializer`]:
//!
//! - **Sequence number** (16-bit, wrapping, random start): once per packet.
//! - **Timestamp** (32-bit): media clock; constant across the fragments of
//!   one frame.
//! - **SSRC** (32-bit): randomly chosen per packetizer.
//! - **Marker bit**: set on the packet that completes a NAL unit / frame.
//!
//! ## Supported codecs
//!
//! | Codec | Module | RFC | Payload type | Clock |
//! |-------|--------|-----|--------------|-------|
//! | H.264 | [`h264`] | [RFC 6184](https://tools.ietf.org/html/rfc6184) | 96 | 90 kHz |
//! | H.265 | [`h265`] | [RFC 7798](https://tools.ietf.org/html/rfc7798) | 96 | 90 kHz |
//! | MJPEG | [`mjpeg`] | [RFC 2435](https://tools.ietf.org/html/rfc2435) | 26 | 90 kHz |
//! | AAC   | [`aac`] | [RFC 3640](https://tools.ietf.org/html/rfc3640) | 97 | sample rate |
//! | PCMU  | [`pcmu`] | [RFC 3551](https://tools.ietf.org/html/rfc3551) | 0 | 8 kHz |

pub mod aac;
pub mod h264;
pub mod h265;
pub mod mjpeg;
pub mod nal;
pub mod pcmu;
pub mod rtp;

use crate::error::{Error, Result};
use crate::stream::{AudioCodec, AudioInfo, Frame, VideoCodec, VideoInfo};
use crate::transport::RtpTransport;
use rtp::RtpPacket;

/// Default upper bound on a whole RTP packet (header included).
pub const MAX_PACKET_LEN: usize = 1400;

/// Dynamic payload type used for H.264/H.265 video.
pub const VIDEO_PAYLOAD_TYPE: u8 = 96;
/// Dynamic payload type used for AAC audio.
pub const AAC_PAYLOAD_TYPE: u8 = 97;

/// Codec-specific RTP packetizer.
///
/// One instance serves one stream direction: its sequence number, SSRC and
/// timestamp mapping are never reset while the session lives.
pub trait Packetizer: Send {
    /// Packetize `frame` and send every resulting packet on `transport`.
    ///
    /// Returns `false` when the frame kind does not belong to this codec (an
    /// audio packetizer ignores video frames), when the frame is malformed,
    /// or when the transport refused a packet.
    fn serialize(&mut self, frame: &Frame, transport: &mut dyn RtpTransport) -> bool;

    /// Codec name for the SDP `a=rtpmap` attribute (e.g. `"H264"`).
    fn codec_name(&self) -> &'static str;

    /// RTP clock rate in Hz.
    fn clock_rate(&self) -> u32;

    /// RTP payload type number (RFC 3551).
    fn payload_type(&self) -> u8;

    /// SDP media-level attribute lines (`a=rtpmap`, then `a=fmtp` if any).
    /// The `a=control` line is added by the SDP builder.
    fn sdp_attributes(&self) -> Vec<String>;

    /// Sequence number of the next packet (for `RTP-Info`).
    fn next_sequence(&self) -> u16;

    /// RTP timestamp of the most recent packet (for `RTP-Info`).
    fn next_rtp_timestamp(&self) -> u32;
}

/// Build the packetizer matching a video track.
pub fn video_packetizer(info: &VideoInfo, max_packet_len: usize) -> Box<dyn Packetizer> {
    match info.codec {
        VideoCodec::H264 => {
            let mut p = h264::H264Packetizer::with_random_seed(VIDEO_PAYLOAD_TYPE);
            p.set_max_packet_len(max_packet_len);
            if let [sps, pps, ..] = info.parameter_sets.as_slice() {
                p.set_parameter_sets(sps, pps);
            }
            Box::new(p)
        }
        VideoCodec::H265 => {
            let mut p = h265::H265Packetizer::with_random_seed(VIDEO_PAYLOAD_TYPE);
            p.set_max_packet_len(max_packet_len);
            if let [vps, sps, pps, ..] = info.parameter_sets.as_slice() {
                p.set_parameter_sets(vps, sps, pps);
            }
            Box::new(p)
        }
        VideoCodec::Mjpeg => {
            let mut p = mjpeg::MjpegPacketizer::with_random_seed();
            p.set_max_packet_len(max_packet_len);
            Box::new(p)
        }
    }
}

/// Build the packetizer matching an audio track.
pub fn audio_packetizer(
    info: &AudioInfo,
    max_packet_len: usize,
    strip_adts: bool,
) -> Result<Box<dyn Packetizer>> {
    match info.codec {
        AudioCodec::Aac => {
            let mut p =
                aac::AacPacketizer::with_random_seed(AAC_PAYLOAD_TYPE, info.sample_rate, info.channels)?;
            p.set_max_packet_len(max_packet_len);
            p.set_strip_adts(strip_adts);
            Ok(Box::new(p))
        }
        AudioCodec::Pcmu => {
            if info.sample_rate != pcmu::PCMU_CLOCK_RATE {
                return Err(Error::UnsupportedCodec(format!(
                    "PCMU at {} Hz",
                    info.sample_rate
                )));
            }
            let mut p = pcmu::PcmuPacketizer::with_random_seed();
            p.set_max_packet_len(max_packet_len);
            Ok(Box::new(p))
        }
    }
}

/// Hand a finished packet to the transport.
pub(crate) fn send_packet(transport: &mut dyn RtpTransport, packet: &RtpPacket<'_>) -> Result<()> {
    transport.send_rtp(packet).map_err(|e| {
        tracing::trace!(error = %e, seq = packet.sequence(), "RTP send failed");
        Error::Io(e)
    })
}

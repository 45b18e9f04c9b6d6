//! FLV video tag payloads for H.264 over RTMP.
//!
//! ```text
//! byte 0     frame type (1 = key, 2 = inter) << 4 | codec id (7 = AVC)
//! byte 1     AVC packet type (0 = sequence header, 1 = NALU)
//! bytes 2-4  composition time, always 0
//! ```
//!
//! A NALU tag continues with the 4-byte big-endian NAL length and the NAL
//! unit itself. A sequence header continues with an
//! AVCDecoderConfigurationRecord built from the cached SPS and PPS.

use crate::error::{Error, Result};
use crate::writer::ByteWriter;

const CODEC_AVC: u8 = 7;
const FRAME_KEY: u8 = 1;
const FRAME_INTER: u8 = 2;
const AVC_SEQUENCE_HEADER: u8 = 0;
const AVC_NALU: u8 = 1;

/// Length of the tag prefix that precedes a NAL unit.
pub const NALU_HEADER_LEN: usize = 9;

/// Tag prefix for one NAL unit of `nalu_len` bytes.
pub fn nalu_header(key_frame: bool, nalu_len: usize) -> Result<[u8; NALU_HEADER_LEN]> {
    let len = u32::try_from(nalu_len).map_err(|_| Error::BufferOverflow {
        needed: nalu_len,
        remaining: u32::MAX as usize,
    })?;
    let frame_type = if key_frame { FRAME_KEY } else { FRAME_INTER };

    let mut out = [0u8; NALU_HEADER_LEN];
    let mut w = ByteWriter::new(&mut out);
    w.put_u8((frame_type << 4) | CODEC_AVC)?;
    w.put_u8(AVC_NALU)?;
    w.put_u24(0)?;
    w.put_u32(len)?;
    Ok(out)
}

/// Sequence header tag: AVCDecoderConfigurationRecord with one SPS and one
/// PPS, both without start codes.
pub fn avc_sequence_header(sps: &[u8], pps: &[u8]) -> Result<Vec<u8>> {
    if sps.len() < 4 {
        return Err(Error::Protocol("SPS too short for a configuration record".to_string()));
    }
    let sps_len = u16::try_from(sps.len()).map_err(|_| Error::Protocol("SPS too long".into()))?;
    let pps_len = u16::try_from(pps.len()).map_err(|_| Error::Protocol("PPS too long".into()))?;

    let mut out = vec![0u8; 5 + 11 + sps.len() + pps.len()];
    let mut w = ByteWriter::new(&mut out);
    w.put_u8((FRAME_KEY << 4) | CODEC_AVC)?;
    w.put_u8(AVC_SEQUENCE_HEADER)?;
    w.put_u24(0)?;

    w.put_u8(1)?; // configurationVersion
    w.put_u8(sps[1])?; // AVCProfileIndication
    w.put_u8(sps[2])?; // profile_compatibility
    w.put_u8(sps[3])?; // AVCLevelIndication
    w.put_u8(0xFF)?; // 4-byte NAL lengths
    w.put_u8(0xE1)?; // one SPS
    w.put_u16(sps_len)?;
    w.put_slice(sps)?;
    w.put_u8(1)?; // one PPS
    w.put_u16(pps_len)?;
    w.put_slice(pps)?;
    let written = w.position();
    out.truncate(written);
    Ok(out)
}

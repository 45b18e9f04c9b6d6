use std::io;
use std::net::{Shutdown, TcpStream};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use super::{RtcpTimer, RtcpWatch, RtpTransport, write_all_nonblocking};
use crate::media::rtp::RtpPacket;

/// Interleave channel pair for the video track.
pub const VIDEO_CHANNELS: (u8, u8) = (0, 1);
/// Interleave channel pair for the audio track.
pub const AUDIO_CHANNELS: (u8, u8) = (2, 3);

const INTERLEAVED_HEADER_LEN: usize = 4;
const SEND_TIMEOUT: Duration = Duration::from_secs(2);

/// Append one `$`-framed record to `out`.
pub fn write_interleaved(out: &mut Vec<u8>, channel: u8, payload_len: u16) {
    out.push(b'$');
    out.push(channel);
    out.extend_from_slice(&payload_len.to_be_bytes());
}

/// RTP over the RTSP control connection (RFC 2326 §10.12).
///
/// Shares the connection's writer with the RTSP session so responses and
/// media never interleave mid-record.
///
/// A failed or timed-out write may leave a partial record on the wire, so
/// the first failure shuts the connection down. The session's read side then
/// sees the close and the server evicts it.
pub struct InterleavedTransport {
    writer: Arc<Mutex<TcpStream>>,
    rtp_channel: u8,
    rtcp_channel: u8,
    buf: Vec<u8>,
    timer: Arc<RtcpTimer>,
    closed: bool,
}

impl InterleavedTransport {
    pub fn new(writer: Arc<Mutex<TcpStream>>, channels: (u8, u8), rtcp_timeout_secs: u32) -> Self {
        Self {
            writer,
            rtp_channel: channels.0,
            rtcp_channel: channels.1,
            buf: Vec::with_capacity(2048),
            timer: Arc::new(RtcpTimer::new(rtcp_timeout_secs)),
            closed: false,
        }
    }

    pub fn channels(&self) -> (u8, u8) {
        (self.rtp_channel, self.rtcp_channel)
    }
}

impl RtpTransport for InterleavedTransport {
    fn send_rtp(&mut self, packet: &RtpPacket<'_>) -> io::Result<()> {
        if self.closed {
            return Err(io::ErrorKind::NotConnected.into());
        }
        let len = u16::try_from(packet.len())
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "RTP packet too large"))?;

        self.buf.clear();
        self.buf.reserve(INTERLEAVED_HEADER_LEN + packet.len());
        write_interleaved(&mut self.buf, self.rtp_channel, len);
        packet.write_to(&mut self.buf);

        let mut stream = self.writer.lock();
        if let Err(e) = write_all_nonblocking(&mut stream, &self.buf, SEND_TIMEOUT) {
            tracing::warn!(channel = self.rtp_channel, error = %e, "interleaved send failed, closing connection");
            let _ = stream.shutdown(Shutdown::Both);
            self.closed = true;
            return Err(e);
        }
        drop(stream);

        self.timer.reset();
        Ok(())
    }

    fn rtcp_watch(&self) -> RtcpWatch {
        RtcpWatch::new(self.timer.clone())
    }

    fn is_closed(&self) -> bool {
        self.closed
    }
}

/// Strip leading `$`-framed records a client sent on the control connection
/// (interleaved RTCP receiver reports). Returns the number of bytes consumed
/// and whether any record was complete.
pub fn skip_interleaved(buf: &[u8]) -> (usize, bool) {
    let mut consumed = 0;
    let mut any = false;
    while buf.len() - consumed >= INTERLEAVED_HEADER_LEN && buf[consumed] == b'$' {
        let len = u16::from_be_bytes([buf[consumed + 2], buf[consumed + 3]]) as usize;
        let total = INTERLEAVED_HEADER_LEN + len;
        if buf.len() - consumed < total {
            break;
        }
        consumed += total;
        any = true;
    }
    (consumed, any)
}

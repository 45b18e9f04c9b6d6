use parking_lot::Mutex;

use crate::media::Packetizer;
use crate::protocol::uri::Track;
use crate::stream::{Frame, FrameObserver, StreamBus};
use crate::transport::{RtcpWatch, RtpTransport};

struct HandlerState {
    packetizer: Box<dyn Packetizer>,
    transport: Box<dyn RtpTransport>,
    started: bool,
}

/// One negotiated track of an RTSP session.
///
/// Registered on the stream's [`StreamBus`] at SETUP; frames are dropped
/// until PLAY starts it. Frames run through the packetizer and straight out
/// on the transport on the producer's thread. Once the transport reports
/// itself closed the handler stops for good.
///
/// The RTCP countdown is kept outside the send lock so the server's tick
/// never waits on a slow client.
pub struct MediaHandler {
    track: Track,
    session_id: String,
    rtcp: RtcpWatch,
    state: Mutex<HandlerState>,
}

impl MediaHandler {
    pub fn new(
        track: Track,
        session_id: &str,
        packetizer: Box<dyn Packetizer>,
        transport: Box<dyn RtpTransport>,
    ) -> Self {
        Self {
            track,
            session_id: session_id.to_string(),
            rtcp: transport.rtcp_watch(),
            state: Mutex::new(HandlerState {
                packetizer,
                transport,
                started: false,
            }),
        }
    }

    pub fn track(&self) -> Track {
        self.track
    }

    pub fn start(&self) {
        let mut state = self.state.lock();
        if state.transport.is_closed() {
            return;
        }
        state.started = true;
        tracing::debug!(session_id = %self.session_id, track = ?self.track, "media handler started");
    }

    pub fn stop(&self) {
        self.state.lock().started = false;
    }

    pub fn is_started(&self) -> bool {
        self.state.lock().started
    }

    /// One-second tick; returns the remaining RTCP countdown.
    pub fn tick(&self) -> u32 {
        self.rtcp.tick()
    }

    /// `(seq, rtptime)` for the `RTP-Info` header.
    pub fn rtp_info(&self) -> (u16, u32) {
        let state = self.state.lock();
        (
            state.packetizer.next_sequence(),
            state.packetizer.next_rtp_timestamp(),
        )
    }
}

impl FrameObserver for MediaHandler {
    fn on_frame(&self, _source: &StreamBus, frame: &Frame) {
        let mut state = self.state.lock();
        if !state.started {
            return;
        }
        let HandlerState {
            packetizer,
            transport,
            ..
        } = &mut *state;
        packetizer.serialize(frame, transport.as_mut());
        if transport.is_closed() {
            state.started = false;
            tracing::warn!(session_id = %self.session_id, track = ?self.track, "transport lost, media stopped");
        }
    }
}

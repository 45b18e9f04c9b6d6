use std::net::IpAddr;
use std::sync::Arc;

use super::transport::TransportHeader;
use super::{MediaHandler, RtspSession, SessionState};
use crate::error::Error;
use crate::media::{Packetizer, audio_packetizer, video_packetizer};
use crate::protocol::sdp::{self, SdpOrigin, SdpTrack};
use crate::protocol::uri::{self, Track};
use crate::protocol::{RtspRequest, RtspResponse};
use crate::stream::FrameObserver;
use crate::transport::tcp::{AUDIO_CHANNELS, VIDEO_CHANNELS};
use crate::transport::{InterleavedTransport, RtpTransport, UdpTransport};

const PUBLIC_METHODS: &str =
    "OPTIONS, DESCRIBE, SETUP, PLAY, TEARDOWN, GET_PARAMETER, SET_PARAMETER";

impl RtspSession {
    /// Dispatch one request. Always echoes the request's CSeq.
    pub(super) fn handle(&mut self, request: &RtspRequest) -> RtspResponse {
        let cseq = request.cseq().unwrap_or("0").to_string();
        self.last_cseq = Some(cseq.clone());

        tracing::debug!(
            session_id = %self.id,
            method = %request.method,
            uri = %request.uri,
            %cseq,
            state = ?self.state,
            "request"
        );

        let response = match request.method.as_str() {
            "OPTIONS" => RtspResponse::ok().add_header("Public", PUBLIC_METHODS),
            "DESCRIBE" => self.handle_describe(request),
            "SETUP" => self.handle_setup(request),
            "PLAY" => self.handle_play(request),
            "TEARDOWN" => self.handle_teardown(request),
            "GET_PARAMETER" | "SET_PARAMETER" => self.keepalive(),
            _ => {
                tracing::warn!(method = %request.method, %cseq, "unsupported RTSP method");
                RtspResponse::method_not_allowed().add_header("Allow", PUBLIC_METHODS)
            }
        };

        response.for_request(Some(cseq.as_str()))
    }

    fn session_header(&self) -> String {
        format!("{};timeout={}", self.id, self.ctx.config.session_timeout_secs)
    }

    fn keepalive(&self) -> RtspResponse {
        let response = RtspResponse::ok();
        if self.state == SessionState::Setup || self.state == SessionState::Playing {
            response.add_header("Session", &self.session_header())
        } else {
            response
        }
    }

    /// A `Session` header that names another session is answered with 454.
    fn session_mismatch(&self, request: &RtspRequest) -> Option<RtspResponse> {
        match request.session_id() {
            Some(id) if id != self.id => {
                tracing::warn!(session_id = %self.id, requested = id, "unknown session");
                Some(RtspResponse::session_not_found())
            }
            _ => None,
        }
    }

    fn wrong_state(&self, method: &str) -> RtspResponse {
        let e = Error::InvalidState {
            method: method.to_string(),
            state: self.state,
        };
        tracing::warn!(session_id = %self.id, error = %e, "rejected");
        RtspResponse::method_not_valid_in_state()
    }

    /// Address advertised in SDP: configured public host, else the host the
    /// client used, else our end of the connection.
    fn sdp_address(&self, request_uri: &str) -> String {
        if let Some(host) = &self.ctx.config.public_host {
            return host.clone();
        }
        if let Some(host) = uri::host(request_uri) {
            return host.to_string();
        }
        match self.stream.local_addr() {
            Ok(addr) => addr.ip().to_string(),
            Err(_) => self.peer.ip().to_string(),
        }
    }

    fn handle_describe(&mut self, request: &RtspRequest) -> RtspResponse {
        if !matches!(self.state, SessionState::Idle | SessionState::Described) {
            return self.wrong_state("DESCRIBE");
        }

        let Some(channel) = uri::channel(&request.uri) else {
            tracing::warn!(uri = %request.uri, "DESCRIBE for invalid stream URI");
            return RtspResponse::bad_request();
        };
        let Some(head) = self.ctx.registry.get_stream_head(channel, self.stream_id) else {
            tracing::warn!(channel, stream_id = self.stream_id, "DESCRIBE for unknown channel");
            return RtspResponse::bad_request();
        };
        let Some(video_info) = head.video.as_ref() else {
            tracing::warn!(channel, "stream has no video track");
            return RtspResponse::bad_request();
        };

        let config = &self.ctx.config;
        let video = video_packetizer(video_info, config.max_packet_len);
        let audio = match head.audio.as_ref() {
            Some(info) => match audio_packetizer(info, config.max_packet_len, config.aac_strip_adts)
            {
                Ok(p) => Some(p),
                Err(e) => {
                    tracing::warn!(channel, error = %e, "audio track not offered");
                    return RtspResponse::bad_request();
                }
            },
            None => None,
        };

        let base = uri::base(&request.uri).to_string();
        let address = self.sdp_address(&request.uri);
        let origin = SdpOrigin {
            username: &config.sdp_username,
            session_id: &config.sdp_session_id,
            session_version: &config.sdp_session_version,
            session_name: &config.sdp_session_name,
            address: &address,
        };
        let mut tracks = vec![SdpTrack {
            track: Track::Video,
            packetizer: video.as_ref(),
        }];
        if let Some(audio) = audio.as_deref() {
            tracks.push(SdpTrack {
                track: Track::Audio,
                packetizer: audio,
            });
        }
        let body = sdp::generate_sdp(&origin, &base, &tracks);

        self.channel = Some(channel);
        self.offered_video = Some(video);
        self.offered_audio = audio;
        self.transition(SessionState::Described);

        RtspResponse::ok()
            .add_header("Content-Type", "application/sdp")
            .add_header("Content-Base", &format!("{base}/"))
            .with_body(body)
    }

    fn handle_setup(&mut self, request: &RtspRequest) -> RtspResponse {
        if !matches!(self.state, SessionState::Described | SessionState::Setup) {
            return self.wrong_state("SETUP");
        }
        if let Some(response) = self.session_mismatch(request) {
            return response;
        }
        let Some(channel) = self.channel else {
            return self.wrong_state("SETUP");
        };
        if uri::channel(&request.uri).is_some_and(|c| c != channel) {
            tracing::warn!(uri = %request.uri, channel, "SETUP for a different stream");
            return RtspResponse::bad_request();
        }

        let track = uri::track(&request.uri).unwrap_or(Track::Video);
        let offered = match track {
            Track::Video => self.offered_video.is_some(),
            Track::Audio => self.offered_audio.is_some(),
        };
        if !offered {
            tracing::warn!(session_id = %self.id, ?track, "SETUP for a track not offered");
            return RtspResponse::bad_request();
        }

        let Some(header) = request.get_header("Transport") else {
            tracing::warn!(session_id = %self.id, "SETUP missing Transport header");
            return RtspResponse::bad_request();
        };
        let Some(requested) = TransportHeader::parse(header) else {
            tracing::warn!(session_id = %self.id, transport = header, "unsupported transport");
            return RtspResponse::unsupported_transport();
        };

        let rtcp_timeout = self.ctx.config.rtcp_timeout_secs;
        let (transport, transport_reply): (Box<dyn RtpTransport>, String) = match requested {
            TransportHeader::Udp {
                client_rtp_port,
                client_rtcp_port,
            } => {
                let bound = self.ctx.ports.allocate().and_then(|ports| {
                    UdpTransport::bind(
                        ports,
                        self.peer_ip(),
                        (client_rtp_port, client_rtcp_port),
                        rtcp_timeout,
                    )
                });
                match bound {
                    Ok(udp) => {
                        let (server_rtp, server_rtcp) = udp.server_ports();
                        let reply = format!(
                            "RTP/AVP;unicast;client_port={client_rtp_port}-{client_rtcp_port};server_port={server_rtp}-{server_rtcp}"
                        );
                        (Box::new(udp) as Box<dyn RtpTransport>, reply)
                    }
                    Err(e) => {
                        tracing::error!(session_id = %self.id, error = %e, "UDP transport setup failed");
                        return RtspResponse::internal_error();
                    }
                }
            }
            TransportHeader::Interleaved => {
                let channels = match track {
                    Track::Video => VIDEO_CHANNELS,
                    Track::Audio => AUDIO_CHANNELS,
                };
                let reply = format!("RTP/AVP/TCP;unicast;interleaved={}-{}", channels.0, channels.1);
                let interleaved =
                    InterleavedTransport::new(self.writer.clone(), channels, rtcp_timeout);
                (Box::new(interleaved) as Box<dyn RtpTransport>, reply)
            }
        };

        let packetizer: Option<Box<dyn Packetizer>> = match track {
            Track::Video => self.offered_video.take(),
            Track::Audio => self.offered_audio.take(),
        };
        let Some(packetizer) = packetizer else {
            return RtspResponse::bad_request();
        };

        // Acquired last so a failed SETUP never leaves a stream started.
        let Some(bus) = self
            .bus
            .clone()
            .or_else(|| self.ctx.registry.get_stream(channel, self.stream_id))
        else {
            tracing::warn!(channel, "stream source vanished");
            match track {
                Track::Video => self.offered_video = Some(packetizer),
                Track::Audio => self.offered_audio = Some(packetizer),
            }
            return RtspResponse::bad_request();
        };

        let handler = Arc::new(MediaHandler::new(track, &self.id, packetizer, transport));
        bus.register(handler.clone() as Arc<dyn FrameObserver>);
        match track {
            Track::Video => self.video = Some(handler),
            Track::Audio => self.audio = Some(handler),
        }
        self.bus = Some(bus);

        tracing::info!(
            session_id = %self.id,
            ?track,
            transport = %transport_reply,
            "track set up"
        );
        self.transition(SessionState::Setup);

        RtspResponse::ok()
            .add_header("Transport", &transport_reply)
            .add_header("Session", &self.session_header())
    }

    fn handle_play(&mut self, request: &RtspRequest) -> RtspResponse {
        if self.state != SessionState::Setup {
            return self.wrong_state("PLAY");
        }
        if let Some(response) = self.session_mismatch(request) {
            return response;
        }

        let base = uri::base(&request.uri);
        let mut rtp_info = Vec::new();
        for handler in self.handlers() {
            handler.start();
            let (seq, rtptime) = handler.rtp_info();
            rtp_info.push(format!(
                "url={base}/{};seq={seq};rtptime={rtptime}",
                handler.track().control()
            ));
        }
        let rtp_info = rtp_info.join(",");

        if let Some(channel) = self.channel {
            self.ctx.registry.request_i_frame(channel, self.stream_id);
        }
        self.transition(SessionState::Playing);

        RtspResponse::ok()
            .add_header("Session", &self.session_header())
            .add_header("Range", "npt=0.000-")
            .add_header("RTP-Info", &rtp_info)
    }

    fn handle_teardown(&mut self, request: &RtspRequest) -> RtspResponse {
        if let Some(response) = self.session_mismatch(request) {
            return response;
        }
        let session = self.session_header();
        self.release_media();
        self.transition(SessionState::Closed);
        RtspResponse::ok().add_header("Session", &session)
    }

    fn transition(&mut self, next: SessionState) {
        if self.state != next {
            tracing::debug!(
                session_id = %self.id,
                from = ?self.state,
                to = ?next,
                "state transition"
            );
            self.state = next;
        }
    }

    fn peer_ip(&self) -> IpAddr {
        self.peer.ip()
    }
}

//! Integration tests: a live server on loopback driven by a plain TCP client.

use std::io::{BufRead, BufReader, Read, Write};
use std::net::{TcpStream, UdpSocket};
use std::sync::Arc;
use std::time::{Duration, Instant};

use camstream::stream::{AudioCodec, AudioInfo, VideoCodec, VideoInfo};
use camstream::{Frame, FrameKind, LocalStreamRegistry, MediaHead, Server, ServerConfig};

const SPS: [u8; 8] = [0, 0, 0, 1, 0x67, 0x42, 0xC0, 0x1E];
const PPS: [u8; 8] = [0, 0, 0, 1, 0x68, 0xCE, 0x3C, 0x80];
const IDR: [u8; 8] = [0, 0, 0, 1, 0x65, 0x88, 0x84, 0x21];

struct Response {
    status: u16,
    headers: Vec<(String, String)>,
    body: String,
}

impl Response {
    fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    fn session_id(&self) -> String {
        let value = self.header("Session").expect("Session header");
        value.split(';').next().unwrap_or("").trim().to_string()
    }
}

struct Client {
    reader: BufReader<TcpStream>,
    writer: TcpStream,
    cseq: u32,
    base: String,
}

impl Client {
    fn connect(server: &Server) -> Self {
        let addr = server.local_addr().expect("server address");
        let stream = TcpStream::connect_timeout(&addr, Duration::from_secs(2)).expect("connect");
        stream.set_read_timeout(Some(Duration::from_secs(3))).unwrap();
        stream.set_write_timeout(Some(Duration::from_secs(2))).unwrap();
        Self {
            reader: BufReader::new(stream.try_clone().unwrap()),
            writer: stream,
            cseq: 0,
            base: format!("rtsp://{addr}/stream1"),
        }
    }

    fn request(&mut self, method: &str, uri: &str, extra: &[(&str, &str)]) -> Response {
        self.request_with_body(method, uri, extra, "")
    }

    fn request_with_body(
        &mut self,
        method: &str,
        uri: &str,
        extra: &[(&str, &str)],
        body: &str,
    ) -> Response {
        self.cseq += 1;
        let mut request = format!("{method} {uri} RTSP/1.0\r\nCSeq: {}\r\n", self.cseq);
        for (name, value) in extra {
            request.push_str(&format!("{name}: {value}\r\n"));
        }
        if !body.is_empty() {
            request.push_str(&format!("Content-Length: {}\r\n", body.len()));
        }
        request.push_str("\r\n");
        request.push_str(body);
        self.writer.write_all(request.as_bytes()).unwrap();

        let response = self.read_response();
        assert_eq!(
            response.header("CSeq"),
            Some(self.cseq.to_string().as_str()),
            "CSeq must be echoed"
        );
        response
    }

    fn read_response(&mut self) -> Response {
        let mut status_line = String::new();
        self.reader.read_line(&mut status_line).unwrap();
        assert!(status_line.starts_with("RTSP/1.0 "), "bad status line: {status_line:?}");
        let status = status_line[9..12].parse().unwrap();

        let mut headers = Vec::new();
        loop {
            let mut line = String::new();
            self.reader.read_line(&mut line).unwrap();
            let line = line.trim_end();
            if line.is_empty() {
                break;
            }
            let (name, value) = line.split_once(':').unwrap();
            headers.push((name.trim().to_string(), value.trim().to_string()));
        }

        let mut response = Response {
            status,
            headers,
            body: String::new(),
        };
        if let Some(len) = response.header("Content-Length").and_then(|v| v.parse().ok()) {
            let mut body = vec![0u8; len];
            self.reader.read_exact(&mut body).unwrap();
            response.body = String::from_utf8(body).unwrap();
        }
        response
    }

    fn describe(&mut self) -> Response {
        let base = self.base.clone();
        self.request("DESCRIBE", &base, &[("Accept", "application/sdp")])
    }

    fn setup(&mut self, track: &str, transport: &str) -> Response {
        let uri = format!("{}/{track}", self.base);
        self.request("SETUP", &uri, &[("Transport", transport)])
    }

    fn play(&mut self, session: &str) -> Response {
        let base = self.base.clone();
        self.request("PLAY", &base, &[("Session", session)])
    }

    /// Next `$`-framed record: (channel, payload).
    fn read_interleaved(&mut self) -> (u8, Vec<u8>) {
        let mut header = [0u8; 4];
        self.reader.read_exact(&mut header).unwrap();
        assert_eq!(header[0], b'$');
        let len = u16::from_be_bytes([header[2], header[3]]) as usize;
        let mut payload = vec![0u8; len];
        self.reader.read_exact(&mut payload).unwrap();
        (header[1], payload)
    }
}

fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(20));
    }
    false
}

/// Server RTCP port from a `server_port=a-b` Transport reply.
fn server_rtcp_port(transport: &str) -> u16 {
    let range = transport
        .split(';')
        .find_map(|p| p.strip_prefix("server_port="))
        .expect("server_port");
    range.split('-').nth(1).unwrap().parse().unwrap()
}

fn h264_head() -> MediaHead {
    MediaHead {
        video: Some(VideoInfo::new(VideoCodec::H264, 1280, 720, 25)),
        audio: None,
    }
}

fn start(head: MediaHead, config: ServerConfig) -> (Server, Arc<LocalStreamRegistry>) {
    let registry = Arc::new(LocalStreamRegistry::new());
    registry.add_channel(0, 0, head);
    let mut server = Server::with_config("127.0.0.1:0", registry.clone(), config);
    server.start().expect("server start");
    (server, registry)
}

fn key_frame() -> Frame {
    let mut frame = Frame::new(FrameKind::VideoI, 0);
    frame.push_unit(SPS.to_vec(), 0);
    frame.push_unit(PPS.to_vec(), 0);
    frame.push_unit(IDR.to_vec(), 0);
    frame
}

#[test]
fn options_lists_public_methods() {
    let (mut server, _registry) = start(h264_head(), ServerConfig::default());
    let mut client = Client::connect(&server);

    let base = client.base.clone();
    let response = client.request("OPTIONS", &base, &[]);
    assert_eq!(response.status, 200);
    let public = response.header("Public").unwrap();
    for method in ["DESCRIBE", "SETUP", "PLAY", "TEARDOWN", "GET_PARAMETER"] {
        assert!(public.contains(method), "{method} missing from {public}");
    }
    assert_eq!(response.headers[1].0, "CSeq");

    server.stop().unwrap();
}

#[test]
fn describe_advertises_video_and_audio() {
    let head = MediaHead {
        video: Some(VideoInfo::new(VideoCodec::H264, 1280, 720, 25)),
        audio: Some(AudioInfo {
            codec: AudioCodec::Aac,
            sample_rate: 48000,
            channels: 2,
        }),
    };
    let (mut server, _registry) = start(head, ServerConfig::default());
    let mut client = Client::connect(&server);

    let response = client.describe();
    assert_eq!(response.status, 200);
    assert_eq!(response.header("Content-Type"), Some("application/sdp"));

    let sdp = &response.body;
    assert!(sdp.starts_with("v=0\r\n"));
    assert_eq!(sdp.matches("m=video 0 RTP/AVP 96").count(), 1);
    assert_eq!(sdp.matches("m=audio 0 RTP/AVP 97").count(), 1);
    assert!(sdp.contains("a=rtpmap:96 H264/90000"));
    assert!(sdp.contains("packetization-mode=1"));
    assert!(sdp.contains("MPEG4-GENERIC/48000/2"));
    assert!(sdp.contains(&format!("a=control:{}/video", client.base)));
    assert!(sdp.contains(&format!("a=control:{}/audio", client.base)));

    server.stop().unwrap();
}

#[test]
fn describe_unknown_channel_is_bad_request() {
    let (mut server, _registry) = start(h264_head(), ServerConfig::default());
    let mut client = Client::connect(&server);

    let addr = server.local_addr().unwrap();
    let response = client.request("DESCRIBE", &format!("rtsp://{addr}/stream9"), &[]);
    assert_eq!(response.status, 400);

    server.stop().unwrap();
}

#[test]
fn methods_out_of_order_are_rejected() {
    let (mut server, _registry) = start(h264_head(), ServerConfig::default());
    let mut client = Client::connect(&server);

    let base = client.base.clone();
    assert_eq!(client.request("PLAY", &base, &[]).status, 455);
    assert_eq!(
        client
            .setup("video", "RTP/AVP/TCP;unicast;interleaved=0-1")
            .status,
        455
    );
    assert_eq!(client.request("RECORD", &base, &[]).status, 405);

    // The session survives rejected requests.
    assert_eq!(client.describe().status, 200);
    let setup = client.setup("video", "RTP/AVP/TCP;unicast;interleaved=0-1");
    assert_eq!(setup.status, 200);
    assert_eq!(client.play("not-this-session").status, 454);

    server.stop().unwrap();
}

#[test]
fn unsupported_transport_is_rejected() {
    let (mut server, _registry) = start(h264_head(), ServerConfig::default());
    let mut client = Client::connect(&server);

    assert_eq!(client.describe().status, 200);
    assert_eq!(client.setup("video", "RAW/RAW/UDP;multicast").status, 461);

    server.stop().unwrap();
}

#[test]
fn interleaved_playback_delivers_rtp() {
    let (mut server, registry) = start(h264_head(), ServerConfig::default());
    let mut client = Client::connect(&server);

    assert_eq!(client.describe().status, 200);
    let setup = client.setup("video", "RTP/AVP/TCP;unicast;interleaved=0-1");
    assert_eq!(setup.status, 200);
    assert_eq!(
        setup.header("Transport"),
        Some("RTP/AVP/TCP;unicast;interleaved=0-1")
    );
    let session = setup.session_id();
    assert!(setup.header("Session").unwrap().contains(";timeout=60"));

    let play = client.play(&session);
    assert_eq!(play.status, 200);
    assert_eq!(play.header("Range"), Some("npt=0.000-"));
    assert!(play.header("RTP-Info").unwrap().contains("/video;seq="));
    assert!(registry.take_i_frame_request(0, 0));

    assert!(registry.publish(0, 0, &key_frame()));
    let mut markers = 0;
    let mut last_seq = None;
    for _ in 0..3 {
        let (channel, rtp) = client.read_interleaved();
        assert_eq!(channel, 0);
        assert_eq!(rtp[0] >> 6, 2);
        assert_eq!(rtp[1] & 0x7F, 96);
        if rtp[1] & 0x80 != 0 {
            markers += 1;
        }
        let seq = u16::from_be_bytes([rtp[2], rtp[3]]);
        if let Some(prev) = last_seq {
            assert_eq!(seq, u16::wrapping_add(prev, 1));
        }
        last_seq = Some(seq);
    }
    assert!(markers >= 1);

    let base = client.base.clone();
    let teardown = client.request("TEARDOWN", &base, &[("Session", &session)]);
    assert_eq!(teardown.status, 200);

    let mut rest = Vec::new();
    let _ = client.reader.read_to_end(&mut rest);
    server.stop().unwrap();
}

#[test]
fn udp_playback_delivers_rtp() {
    let (mut server, registry) = start(h264_head(), ServerConfig::default());
    let mut client = Client::connect(&server);

    let rtp = UdpSocket::bind("127.0.0.1:0").unwrap();
    rtp.set_read_timeout(Some(Duration::from_secs(3))).unwrap();
    let port = rtp.local_addr().unwrap().port();

    assert_eq!(client.describe().status, 200);
    let setup = client.setup(
        "video",
        &format!("RTP/AVP;unicast;client_port={}-{}", port, port + 1),
    );
    assert_eq!(setup.status, 200);
    let transport = setup.header("Transport").unwrap();
    assert!(transport.contains(&format!("client_port={}-{}", port, port + 1)));
    assert!(transport.contains("server_port="));

    let session = setup.session_id();
    assert_eq!(client.play(&session).status, 200);
    assert!(registry.publish(0, 0, &key_frame()));

    let mut buf = [0u8; 2048];
    let (len, _) = rtp.recv_from(&mut buf).unwrap();
    assert!(len > 12);
    assert_eq!(buf[0] >> 6, 2);
    assert_eq!(buf[1] & 0x7F, 96);

    server.stop().unwrap();
}

#[test]
fn idle_sessions_time_out() {
    let config = ServerConfig {
        session_timeout_secs: 1,
        rtcp_timeout_secs: 1,
        ..ServerConfig::default()
    };
    let (mut server, _registry) = start(h264_head(), config);
    let mut client = Client::connect(&server);
    assert_eq!(client.describe().status, 200);

    let deadline = Instant::now() + Duration::from_secs(5);
    while server.session_count() > 0 && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(50));
    }
    assert_eq!(server.session_count(), 0);

    let mut buf = [0u8; 16];
    assert_eq!(client.reader.read(&mut buf).unwrap_or(0), 0);

    server.stop().unwrap();
}

#[test]
fn keepalive_methods_echo_cseq() {
    let (mut server, _registry) = start(h264_head(), ServerConfig::default());
    let mut client = Client::connect(&server);
    let base = client.base.clone();

    let get = client.request("GET_PARAMETER", &base, &[]);
    assert_eq!(get.status, 200);
    assert!(get.header("Session").is_none());

    assert_eq!(client.describe().status, 200);
    let setup = client.setup("video", "RTP/AVP/TCP;unicast;interleaved=0-1");
    let session = setup.session_id();

    let get = client.request("GET_PARAMETER", &base, &[("Session", &session)]);
    assert_eq!(get.status, 200);
    assert_eq!(get.session_id(), session);
    assert_eq!(get.headers[1].0, "CSeq");

    let set = client.request_with_body(
        "SET_PARAMETER",
        &base,
        &[("Session", &session), ("Content-Type", "text/parameters")],
        "barparam: barstuff\r\n",
    );
    assert_eq!(set.status, 200);
    assert_eq!(set.session_id(), session);

    // The body was consumed, so the connection stays in step.
    let base = client.base.clone();
    assert_eq!(client.request("OPTIONS", &base, &[]).status, 200);

    server.stop().unwrap();
}

#[test]
fn malformed_request_is_answered_with_its_cseq() {
    let (mut server, _registry) = start(h264_head(), ServerConfig::default());
    let mut client = Client::connect(&server);

    let raw = format!("DESCRIBE {} RTSP/1.0\r\nCSeq: 5\r\nnot a header\r\n\r\n", client.base);
    client.writer.write_all(raw.as_bytes()).unwrap();
    let response = client.read_response();
    assert_eq!(response.status, 400);
    assert_eq!(response.headers[1], ("CSeq".to_string(), "5".to_string()));

    client.cseq = 5;
    assert_eq!(client.describe().status, 200);

    server.stop().unwrap();
}

#[test]
fn oversized_content_length_drops_only_that_client() {
    let (mut server, _registry) = start(h264_head(), ServerConfig::default());
    let mut client = Client::connect(&server);

    let raw = format!(
        "SET_PARAMETER {} RTSP/1.0\r\nCSeq: 1\r\nContent-Length: {}\r\n\r\nab",
        client.base,
        u64::MAX
    );
    client.writer.write_all(raw.as_bytes()).unwrap();
    let response = client.read_response();
    assert_eq!(response.status, 400);
    assert_eq!(response.header("CSeq"), Some("1"));

    let mut rest = Vec::new();
    let _ = client.reader.read_to_end(&mut rest);
    assert!(wait_until(|| server.session_count() == 0));

    let mut other = Client::connect(&server);
    let base = other.base.clone();
    assert_eq!(other.request("OPTIONS", &base, &[]).status, 200);
    assert!(server.is_running());

    server.stop().unwrap();
}

#[test]
fn teardown_releases_the_stream_after_last_viewer() {
    let (mut server, registry) = start(h264_head(), ServerConfig::default());
    let mut first = Client::connect(&server);
    let mut second = Client::connect(&server);

    let mut sessions = Vec::new();
    for client in [&mut first, &mut second] {
        assert_eq!(client.describe().status, 200);
        let setup = client.setup("video", "RTP/AVP/TCP;unicast;interleaved=0-1");
        assert_eq!(setup.status, 200);
        let session = setup.session_id();
        assert_eq!(client.play(&session).status, 200);
        sessions.push(session);
    }
    assert!(registry.is_active(0, 0));

    let base = first.base.clone();
    let teardown = first.request("TEARDOWN", &base, &[("Session", &sessions[0])]);
    assert_eq!(teardown.status, 200);
    assert!(registry.is_active(0, 0), "second viewer still attached");

    let base = second.base.clone();
    let teardown = second.request("TEARDOWN", &base, &[("Session", &sessions[1])]);
    assert_eq!(teardown.status, 200);
    assert!(!registry.is_active(0, 0));
    assert!(!registry.publish(0, 0, &key_frame()));

    server.stop().unwrap();
}

#[test]
fn rtcp_keeps_udp_session_alive_past_rtsp_timeout() {
    let config = ServerConfig {
        session_timeout_secs: 1,
        rtcp_timeout_secs: 2,
        ..ServerConfig::default()
    };
    let (mut server, _registry) = start(h264_head(), config);
    let mut client = Client::connect(&server);

    let rtp = UdpSocket::bind("127.0.0.1:0").unwrap();
    let port = rtp.local_addr().unwrap().port();
    assert_eq!(client.describe().status, 200);
    let setup = client.setup(
        "video",
        &format!("RTP/AVP;unicast;client_port={}-{}", port, port + 1),
    );
    assert_eq!(setup.status, 200);
    let rtcp_port = server_rtcp_port(setup.header("Transport").unwrap());
    let session = setup.session_id();
    assert_eq!(client.play(&session).status, 200);

    let receiver_report = [0x80u8, 201, 0, 1, 0, 0, 0, 1];
    let until = Instant::now() + Duration::from_secs(3);
    while Instant::now() < until {
        rtp.send_to(&receiver_report, ("127.0.0.1", rtcp_port)).unwrap();
        std::thread::sleep(Duration::from_millis(250));
        assert_eq!(server.session_count(), 1, "RTCP traffic keeps the session");
    }

    assert!(wait_until(|| server.session_count() == 0));
    server.stop().unwrap();
}

#[test]
fn failed_udp_setup_leaves_the_stream_idle() {
    let _held = [
        UdpSocket::bind("0.0.0.0:25401").unwrap(),
        UdpSocket::bind("0.0.0.0:25403").unwrap(),
    ];
    let config = ServerConfig {
        port_base: 25400,
        port_upper: 25402,
        ..ServerConfig::default()
    };
    let (mut server, registry) = start(h264_head(), config);
    let mut client = Client::connect(&server);

    assert_eq!(client.describe().status, 200);
    let setup = client.setup("video", "RTP/AVP;unicast;client_port=9000-9001");
    assert_eq!(setup.status, 500);
    assert!(!registry.is_active(0, 0));

    // The offered track is still available for another transport.
    let setup = client.setup("video", "RTP/AVP/TCP;unicast;interleaved=0-1");
    assert_eq!(setup.status, 200);
    assert!(registry.is_active(0, 0));

    server.stop().unwrap();
}

#[test]
fn start_and_stop_lifecycle() {
    let registry = Arc::new(LocalStreamRegistry::new());
    let mut server = Server::new("127.0.0.1:0", registry);
    assert!(server.stop().is_err());
    server.start().unwrap();
    assert!(server.is_running());
    assert!(server.start().is_err());
    server.stop().unwrap();
    assert!(!server.is_running());
}

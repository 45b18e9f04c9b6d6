//! RTMP push against an in-test loopback ingest endpoint.

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::Arc;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use bytes::BytesMut;
use camstream::rtmp::amf::{AmfValue, Command, encode_command};
use camstream::rtmp::chunk::{ChunkDecoder, ChunkEncoder, RtmpMessage};
use camstream::rtmp::handshake::server_handshake;
use camstream::rtmp::{
    CSID_COMMAND, MSG_COMMAND_AMF0, MSG_SET_CHUNK_SIZE, MSG_VIDEO, PushConfig, RtmpConnector,
    SessionKey, SessionRegistry,
};
use camstream::Error;

/// What the fake ingest server observed.
#[derive(Debug)]
enum Seen {
    Command(String),
    Video(RtmpMessage),
}

struct Ingest {
    stream: TcpStream,
    decoder: ChunkDecoder,
    encoder: ChunkEncoder,
    buf: BytesMut,
}

impl Ingest {
    fn read_message(&mut self) -> Option<RtmpMessage> {
        let mut chunk = [0u8; 4096];
        loop {
            if let Some(msg) = self.decoder.decode(&mut self.buf).unwrap() {
                return Some(msg);
            }
            match self.stream.read(&mut chunk) {
                Ok(0) | Err(_) => return None,
                Ok(n) => self.buf.extend_from_slice(&chunk[..n]),
            }
        }
    }

    fn reply(&mut self, stream_id: u32, name: &str, tx: f64, args: &[AmfValue]) {
        let body = encode_command(name, tx, args);
        let mut out = BytesMut::new();
        self.encoder
            .encode(CSID_COMMAND, 0, MSG_COMMAND_AMF0, stream_id, &body, &mut out);
        self.stream.write_all(&out).unwrap();
    }
}

fn status(code: &str) -> AmfValue {
    AmfValue::Object(vec![
        ("level".into(), "status".into()),
        ("code".into(), code.into()),
    ])
}

/// Accept one publisher and forward what it sends. `publish_code` is the
/// `onStatus` code answered to `publish`.
fn spawn_ingest(publish_code: &'static str) -> (u16, mpsc::Receiver<Seen>) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let (tx, rx) = mpsc::channel();

    thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        stream
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        server_handshake(&mut stream).unwrap();

        let mut ingest = Ingest {
            stream,
            decoder: ChunkDecoder::new(),
            encoder: ChunkEncoder::new(),
            buf: BytesMut::new(),
        };
        while let Some(msg) = ingest.read_message() {
            match msg.message_type {
                MSG_SET_CHUNK_SIZE => {
                    let p = &msg.payload;
                    let size = u32::from_be_bytes([p[0], p[1], p[2], p[3]]);
                    ingest.decoder.set_chunk_size(size);
                }
                MSG_COMMAND_AMF0 => {
                    let cmd = Command::decode(&msg.payload).unwrap();
                    match cmd.name.as_str() {
                        "connect" => ingest.reply(
                            0,
                            "_result",
                            cmd.transaction_id,
                            &[
                                AmfValue::Object(vec![("fmsVer".into(), "FMS/3,0,1,123".into())]),
                                status("NetConnection.Connect.Success"),
                            ],
                        ),
                        "createStream" => ingest.reply(
                            0,
                            "_result",
                            cmd.transaction_id,
                            &[AmfValue::Null, AmfValue::Number(1.0)],
                        ),
                        "publish" => {
                            assert_eq!(msg.stream_id, 1);
                            ingest.reply(1, "onStatus", 0.0, &[AmfValue::Null, status(publish_code)]);
                        }
                        _ => {}
                    }
                    if tx.send(Seen::Command(cmd.name)).is_err() {
                        return;
                    }
                }
                MSG_VIDEO => {
                    if tx.send(Seen::Video(msg)).is_err() {
                        return;
                    }
                }
                _ => {}
            }
        }
    });
    (port, rx)
}

fn next_video(rx: &mpsc::Receiver<Seen>) -> RtmpMessage {
    loop {
        match rx.recv_timeout(Duration::from_secs(5)).expect("video message") {
            Seen::Video(msg) => return msg,
            Seen::Command(_) => continue,
        }
    }
}

#[test]
fn publishes_sequence_header_before_key_frames() {
    let (port, rx) = spawn_ingest("NetStream.Publish.Start");
    let registry = SessionRegistry::new(Arc::new(RtmpConnector), PushConfig::default());
    let key = SessionKey::new(0, 0, format!("rtmp://127.0.0.1:{port}/live/cam"));
    registry.create(key.clone()).unwrap();

    // An inter frame before any key frame is never sent.
    assert_eq!(registry.dispatch(0, 0, &[0, 0, 0, 1, 0x41, 0x9A, 0x01], 0), 1);
    assert_eq!(registry.dispatch(0, 0, &[0, 0, 0, 1, 0x67, 0x42, 0xC0, 0x1E], 1000), 1);
    assert_eq!(registry.dispatch(0, 0, &[0, 0, 0, 1, 0x68, 0xCE, 0x3C, 0x80], 1000), 1);
    assert_eq!(registry.dispatch(0, 0, &[0, 0, 0, 1, 0x65, 0x88, 0x84], 1000), 1);
    assert_eq!(registry.dispatch(0, 0, &[0, 0, 0, 1, 0x41, 0x9B], 1040), 1);

    let seq = next_video(&rx);
    assert_eq!(seq.stream_id, 1);
    assert_eq!(&seq.payload[..5], &[0x17, 0x00, 0, 0, 0]);
    assert_eq!(&seq.payload[5..9], &[0x01, 0x42, 0xC0, 0x1E]);

    let idr = next_video(&rx);
    assert_eq!(idr.timestamp, 0);
    assert_eq!(
        &idr.payload[..],
        &[0x17, 0x01, 0, 0, 0, 0, 0, 0, 3, 0x65, 0x88, 0x84]
    );

    let inter = next_video(&rx);
    assert_eq!(inter.timestamp, 40);
    assert_eq!(&inter.payload[..2], &[0x27, 0x01]);
    assert_eq!(&inter.payload[9..], &[0x41, 0x9B]);

    assert_eq!(registry.delete(&key), 1);
    assert!(registry.is_empty());
}

#[test]
fn rejected_publish_evicts_the_session() {
    let (port, _rx) = spawn_ingest("NetStream.Publish.BadName");
    let registry = SessionRegistry::new(Arc::new(RtmpConnector), PushConfig::default());
    registry
        .create(SessionKey::new(0, 0, format!("rtmp://127.0.0.1:{port}/live/cam")))
        .unwrap();

    let sps = [0, 0, 0, 1, 0x67, 0x42, 0xC0, 0x1E];
    let mut evicted = false;
    for _ in 0..200 {
        registry.dispatch(0, 0, &sps, 0);
        if registry.is_empty() {
            evicted = true;
            break;
        }
        thread::sleep(Duration::from_millis(25));
    }
    assert!(evicted);
}

#[test]
fn duplicate_push_session_is_refused() {
    let (port, _rx) = spawn_ingest("NetStream.Publish.Start");
    let registry = SessionRegistry::new(Arc::new(RtmpConnector), PushConfig::default());
    let key = SessionKey::new(0, 0, format!("rtmp://127.0.0.1:{port}/live/cam"));
    registry.create(key.clone()).unwrap();
    assert!(matches!(registry.create(key), Err(Error::SessionExists)));
    assert_eq!(registry.len(), 1);
}

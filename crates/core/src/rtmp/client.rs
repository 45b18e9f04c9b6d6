//! Blocking RTMP publisher client.

use std::io::{Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};

use bytes::BytesMut;

use super::amf::{AmfValue, Command, encode_command};
use super::chunk::{ChunkDecoder, ChunkEncoder, RtmpMessage};
use super::handshake::client_handshake;
use super::session::PushConfig;
use super::{
    CSID_COMMAND, CSID_PROTOCOL_CONTROL, CSID_VIDEO, MSG_COMMAND_AMF0, MSG_SET_CHUNK_SIZE,
    MSG_SET_PEER_BANDWIDTH, MSG_USER_CONTROL, MSG_WINDOW_ACK_SIZE,
    MSG_VIDEO, RTMP_PORT,
};
use crate::error::{Error, Result};

const READ_CHUNK: usize = 4096;
const PUBLISH_START: &str = "NetStream.Publish.Start";

const TX_CONNECT: f64 = 1.0;
const TX_RELEASE_STREAM: f64 = 2.0;
const TX_FC_PUBLISH: f64 = 3.0;
const TX_CREATE_STREAM: f64 = 4.0;

/// Parsed `rtmp://host[:port]/app[/instance]/stream` URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtmpUrl {
    pub host: String,
    pub port: u16,
    /// Application path, everything between the authority and the last
    /// path segment.
    pub app: String,
    /// Stream key, the last path segment (query string included).
    pub stream: String,
}

impl RtmpUrl {
    pub fn parse(url: &str) -> Result<Self> {
        let invalid = || Error::InvalidUrl(url.to_string());
        let rest = url.strip_prefix("rtmp://").ok_or_else(invalid)?;
        let (authority, path) = rest.split_once('/').ok_or_else(invalid)?;
        let (app, stream) = path.rsplit_once('/').ok_or_else(invalid)?;
        if authority.is_empty() || app.is_empty() || stream.is_empty() {
            return Err(invalid());
        }

        let (host, port) = match authority.strip_prefix('[') {
            Some(bracketed) => {
                let (host, after) = bracketed.split_once(']').ok_or_else(invalid)?;
                let port = match after.strip_prefix(':') {
                    Some(port) => port.parse().map_err(|_| invalid())?,
                    None if after.is_empty() => RTMP_PORT,
                    None => return Err(invalid()),
                };
                (host, port)
            }
            None => match authority.split_once(':') {
                Some((host, port)) => (host, port.parse().map_err(|_| invalid())?),
                None => (authority, RTMP_PORT),
            },
        };
        if host.is_empty() {
            return Err(invalid());
        }

        Ok(Self {
            host: host.to_string(),
            port,
            app: app.to_string(),
            stream: stream.to_string(),
        })
    }

    /// `tcUrl` sent in `connect`: the URL without the stream key.
    pub fn tc_url(&self) -> String {
        if self.host.contains(':') {
            format!("rtmp://[{}]:{}/{}", self.host, self.port, self.app)
        } else {
            format!("rtmp://{}:{}/{}", self.host, self.port, self.app)
        }
    }
}

impl std::fmt::Display for RtmpUrl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.tc_url(), self.stream)
    }
}

/// Outgoing side of a published stream.
pub trait VideoPublisher: Send {
    /// Send one video message; the payload is the concatenation of `parts`.
    fn send_video(&mut self, timestamp: u32, parts: &[&[u8]]) -> Result<()>;

    fn close(&mut self) {}
}

/// Opens publishers. The push sessions reach the network only through this.
pub trait Connector: Send + Sync {
    fn connect(&self, url: &RtmpUrl, config: &PushConfig) -> Result<Box<dyn VideoPublisher>>;
}

/// [`Connector`] that opens real RTMP connections.
#[derive(Debug, Default, Clone, Copy)]
pub struct RtmpConnector;

impl Connector for RtmpConnector {
    fn connect(&self, url: &RtmpUrl, config: &PushConfig) -> Result<Box<dyn VideoPublisher>> {
        Ok(Box::new(RtmpClient::publish(url, config)?))
    }
}

/// A publishing RTMP connection.
pub struct RtmpClient {
    stream: TcpStream,
    encoder: ChunkEncoder,
    decoder: ChunkDecoder,
    read_buf: BytesMut,
    write_buf: BytesMut,
    payload: Vec<u8>,
    stream_id: u32,
}

impl RtmpClient {
    /// Connect, handshake and run the publish sequence. Returns once the
    /// server has answered `NetStream.Publish.Start`.
    pub fn publish(url: &RtmpUrl, config: &PushConfig) -> Result<Self> {
        let addrs = (url.host.as_str(), url.port).to_socket_addrs()?;
        let mut last_err = None;
        let mut stream = None;
        for addr in addrs {
            match TcpStream::connect_timeout(&addr, config.connect_timeout) {
                Ok(s) => {
                    stream = Some(s);
                    break;
                }
                Err(e) => last_err = Some(e),
            }
        }
        let stream = match (stream, last_err) {
            (Some(s), _) => s,
            (None, Some(e)) => return Err(e.into()),
            (None, None) => return Err(Error::InvalidUrl(url.to_string())),
        };
        stream.set_nodelay(true)?;
        stream.set_read_timeout(Some(config.connect_timeout))?;
        stream.set_write_timeout(Some(config.connect_timeout))?;

        let mut client = Self {
            stream,
            encoder: ChunkEncoder::new(),
            decoder: ChunkDecoder::new(),
            read_buf: BytesMut::with_capacity(READ_CHUNK),
            write_buf: BytesMut::with_capacity(READ_CHUNK),
            payload: Vec::new(),
            stream_id: 0,
        };

        client_handshake(&mut client.stream)?;
        tracing::debug!(%url, "RTMP handshake complete");

        client.set_chunk_size(config.chunk_size)?;
        client.connect_app(url)?;
        client.create_stream(url)?;
        client.start_publish(url)?;

        tracing::info!(%url, stream_id = client.stream_id, "RTMP publish started");
        Ok(client)
    }

    pub fn stream_id(&self) -> u32 {
        self.stream_id
    }

    fn send(
        &mut self,
        csid: u32,
        message_type: u8,
        stream_id: u32,
        timestamp: u32,
        payload: &[u8],
    ) -> Result<()> {
        self.write_buf.clear();
        self.encoder
            .encode(csid, timestamp, message_type, stream_id, payload, &mut self.write_buf);
        self.stream.write_all(&self.write_buf)?;
        Ok(())
    }

    fn send_command(&mut self, stream_id: u32, name: &str, tx: f64, args: &[AmfValue]) -> Result<()> {
        let body = encode_command(name, tx, args);
        tracing::trace!(command = name, transaction_id = tx, "RTMP command");
        self.send(CSID_COMMAND, MSG_COMMAND_AMF0, stream_id, 0, &body)
    }

    fn set_chunk_size(&mut self, size: u32) -> Result<()> {
        let size = size & 0x7FFF_FFFF;
        self.send(CSID_PROTOCOL_CONTROL, MSG_SET_CHUNK_SIZE, 0, 0, &size.to_be_bytes())?;
        self.encoder.set_chunk_size(size);
        Ok(())
    }

    fn read_message(&mut self) -> Result<RtmpMessage> {
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            if let Some(msg) = self.decoder.decode(&mut self.read_buf)? {
                match msg.message_type {
                    MSG_SET_CHUNK_SIZE if msg.payload.len() >= 4 => {
                        let p = &msg.payload;
                        let size = u32::from_be_bytes([p[0], p[1], p[2], p[3]]) & 0x7FFF_FFFF;
                        self.decoder.set_chunk_size(size);
                        tracing::debug!(size, "peer chunk size");
                    }
                    MSG_WINDOW_ACK_SIZE | MSG_SET_PEER_BANDWIDTH | MSG_USER_CONTROL => {
                        tracing::trace!(message_type = msg.message_type, "protocol control ignored");
                    }
                    _ => {}
                }
                return Ok(msg);
            }
            let n = match self.stream.read(&mut chunk) {
                Ok(0) => return Err(Error::ConnectionClosed),
                Ok(n) => n,
                Err(e)
                    if matches!(
                        e.kind(),
                        std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
                    ) =>
                {
                    return Err(Error::Timeout);
                }
                Err(e) => return Err(e.into()),
            };
            self.read_buf.extend_from_slice(&chunk[..n]);
        }
    }

    /// Read until a command satisfying `accept` arrives. `_error` replies
    /// and failing `onStatus` codes abort.
    fn wait_for<F>(&mut self, what: &str, mut accept: F) -> Result<Command>
    where
        F: FnMut(&Command) -> bool,
    {
        loop {
            let msg = self.read_message()?;
            if msg.message_type != MSG_COMMAND_AMF0 {
                continue;
            }
            let cmd = Command::decode(&msg.payload)?;
            if accept(&cmd) {
                return Ok(cmd);
            }
            let failed = cmd.name == "_error"
                || (cmd.name == "onStatus"
                    && cmd
                        .status_code()
                        .is_some_and(|c| c.contains("Failed") || c.contains("Error") || c.contains("BadName")));
            if failed {
                let reason = cmd.status_code().unwrap_or(cmd.name.as_str()).to_string();
                return Err(Error::Rejected(format!("{what}: {reason}")));
            }
        }
    }

    fn connect_app(&mut self, url: &RtmpUrl) -> Result<()> {
        let object = AmfValue::Object(vec![
            ("app".into(), url.app.as_str().into()),
            ("type".into(), "nonprivate".into()),
            ("flashVer".into(), "FMLE/3.0 (compatible; camstream)".into()),
            ("tcUrl".into(), url.tc_url().as_str().into()),
        ]);
        self.send_command(0, "connect", TX_CONNECT, &[object])?;
        self.wait_for("connect", |c| c.name == "_result" && c.transaction_id == TX_CONNECT)?;
        Ok(())
    }

    fn create_stream(&mut self, url: &RtmpUrl) -> Result<()> {
        let key = AmfValue::from(url.stream.as_str());
        self.send_command(0, "releaseStream", TX_RELEASE_STREAM, &[AmfValue::Null, key.clone()])?;
        self.send_command(0, "FCPublish", TX_FC_PUBLISH, &[AmfValue::Null, key])?;
        self.send_command(0, "createStream", TX_CREATE_STREAM, &[AmfValue::Null])?;

        let result = self.wait_for("createStream", |c| {
            c.name == "_result" && c.transaction_id == TX_CREATE_STREAM
        })?;
        let id = result
            .args
            .iter()
            .find_map(AmfValue::as_number)
            .ok_or_else(|| Error::Rejected("createStream: no stream id".to_string()))?;
        self.stream_id = id as u32;
        Ok(())
    }

    fn start_publish(&mut self, url: &RtmpUrl) -> Result<()> {
        let args = [
            AmfValue::Null,
            AmfValue::from(url.stream.as_str()),
            AmfValue::from("live"),
        ];
        self.send_command(self.stream_id, "publish", 0.0, &args)?;
        self.wait_for("publish", |c| {
            c.name == "onStatus" && c.status_code() == Some(PUBLISH_START)
        })?;
        Ok(())
    }
}

impl VideoPublisher for RtmpClient {
    fn send_video(&mut self, timestamp: u32, parts: &[&[u8]]) -> Result<()> {
        let mut payload = std::mem::take(&mut self.payload);
        payload.clear();
        for part in parts {
            payload.extend_from_slice(part);
        }
        let result = self.send(CSID_VIDEO, MSG_VIDEO, self.stream_id, timestamp, &payload);
        self.payload = payload;
        result
    }

    fn close(&mut self) {
        let stream_id = self.stream_id;
        if stream_id != 0 {
            let args = [AmfValue::Null, AmfValue::Number(f64::from(stream_id))];
            let _ = self.send_command(0, "deleteStream", 0.0, &args);
        }
        let _ = self.stream.shutdown(Shutdown::Both);
    }
}

//! RTMP push pipeline.
//!
//! Encoded H.264 NAL units are pushed to a remote RTMP endpoint (a media
//! server ingest URL) by one background thread per destination:
//!
//! ```text
//! StreamBus ──► SessionRegistry::dispatch ──► RtmpPushSession::input_one_nalu
//!                                                  │ (ring buffer + condvar)
//!                                                  ▼
//!                                         push thread ──► RtmpClient
//!                                   (AVC sequence header + FLV video tags)
//! ```
//!
//! The wire side is the plain RTMP publisher flow: simple handshake,
//! `connect`, `releaseStream`, `FCPublish`, `createStream`, `publish`, then
//! video messages on the created stream.

pub mod amf;
pub mod chunk;
pub mod client;
pub mod flv;
pub mod handshake;
pub mod registry;
pub mod session;

pub use client::{Connector, RtmpClient, RtmpConnector, RtmpUrl, VideoPublisher};
pub use registry::{SessionKey, SessionRegistry};
pub use session::{PushConfig, RtmpPushSession};

/// Default RTMP port.
pub const RTMP_PORT: u16 = 1935;

/// Chunk size every peer starts with.
pub const DEFAULT_CHUNK_SIZE: u32 = 128;

/// Largest chunk size accepted from a peer.
pub const MAX_CHUNK_SIZE: u32 = 0xFF_FFFF;

/// Largest reassembled message accepted from a peer.
pub const MAX_MESSAGE_SIZE: u32 = 16 * 1024 * 1024;

pub const CSID_PROTOCOL_CONTROL: u32 = 2;
pub const CSID_COMMAND: u32 = 3;
pub const CSID_VIDEO: u32 = 6;

pub const MSG_SET_CHUNK_SIZE: u8 = 1;
pub const MSG_USER_CONTROL: u8 = 4;
pub const MSG_WINDOW_ACK_SIZE: u8 = 5;
pub const MSG_SET_PEER_BANDWIDTH: u8 = 6;
pub const MSG_VIDEO: u8 = 9;
pub const MSG_COMMAND_AMF0: u8 = 20;

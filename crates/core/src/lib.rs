//! Serving stack for network cameras.
//!
//! The encoder pipeline publishes [`Frame`]s on a per-stream [`StreamBus`].
//! Two kinds of consumer subscribe to those buses:
//!
//! - [`Server`]: an RTSP server that packetizes frames into RTP for every
//!   playing client, over UDP or TCP interleaved.
//! - [`rtmp::SessionRegistry`]: RTMP push sessions that forward H.264 to a
//!   remote ingest server.

pub mod error;
pub mod media;
pub mod protocol;
pub mod ring;
pub mod rtmp;
pub mod server;
pub mod session;
pub mod stream;
pub mod transport;
pub mod writer;

pub use error::{Error, Result};
pub use media::Packetizer;
pub use rtmp::{PushConfig, SessionKey, SessionRegistry};
pub use server::{Server, ServerConfig};
pub use stream::{
    Frame, FrameKind, FrameObserver, LocalStreamRegistry, MediaHead, StreamBus, StreamRegistry,
};

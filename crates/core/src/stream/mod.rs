//! Encoder-facing side of the stack: frames, per-stream observer buses and
//! the registry that maps (channel, stream-id) to a live source.
//!
//! ```text
//! encoder ──► StreamBus::broadcast ──► FrameObserver::on_frame
//!                                        ├─ RTSP media handler (packetize + send)
//!                                        └─ RTMP session registry (ring buffer)
//! ```

pub mod bus;
pub mod frame;
pub mod registry;

pub use bus::{FrameObserver, StreamBus};
pub use frame::{
    AudioCodec, AudioInfo, Frame, FrameKind, FrameUnit, MediaHead, VideoCodec, VideoInfo,
};
pub use registry::{LocalStreamRegistry, StreamRegistry};

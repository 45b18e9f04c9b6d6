use bytes::Bytes;

/// Classification of an encoded media unit as produced by the encoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    /// Video key frame (IDR), usually preceded by parameter sets.
    VideoI,
    VideoP,
    VideoB,
    Audio,
    /// A bare NAL unit slice that is not a complete picture.
    NaluSlice,
    /// A complete baseline JPEG image.
    Mjpeg,
}

impl FrameKind {
    /// True for frames carrying H.264/H.265 NAL units.
    pub fn is_nal_video(self) -> bool {
        matches!(
            self,
            Self::VideoI | Self::VideoP | Self::VideoB | Self::NaluSlice
        )
    }
}

/// One sub-unit of a frame (a NAL unit for H.264/H.265, an access unit for
/// audio). NAL units keep their Annex-B start code.
#[derive(Debug, Clone)]
pub struct FrameUnit {
    pub data: Bytes,
    pub timestamp_ms: u64,
}

/// An encoded media unit. Immutable once produced; consumers copy what they
/// need out of it.
#[derive(Debug, Clone)]
pub struct Frame {
    pub kind: FrameKind,
    pub timestamp_ms: u64,
    pub units: Vec<FrameUnit>,
}

impl Frame {
    pub fn new(kind: FrameKind, timestamp_ms: u64) -> Self {
        Self {
            kind,
            timestamp_ms,
            units: Vec::new(),
        }
    }

    /// Frame made of a single unit stamped with the frame timestamp.
    pub fn single(kind: FrameKind, timestamp_ms: u64, data: impl Into<Bytes>) -> Self {
        let mut frame = Self::new(kind, timestamp_ms);
        frame.push_unit(data, timestamp_ms);
        frame
    }

    pub fn push_unit(&mut self, data: impl Into<Bytes>, timestamp_ms: u64) {
        self.units.push(FrameUnit {
            data: data.into(),
            timestamp_ms,
        });
    }

    pub fn byte_len(&self) -> usize {
        self.units.iter().map(|u| u.data.len()).sum()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoCodec {
    H264,
    H265,
    Mjpeg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioCodec {
    Aac,
    /// G.711 µ-law.
    Pcmu,
}

/// Video track description reported by the stream source.
#[derive(Debug, Clone)]
pub struct VideoInfo {
    pub codec: VideoCodec,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    /// Parameter sets without start codes, when the encoder has them up front
    /// (`[sps, pps]` for H.264, `[vps, sps, pps]` for H.265).
    pub parameter_sets: Vec<Bytes>,
}

impl VideoInfo {
    pub fn new(codec: VideoCodec, width: u32, height: u32, fps: u32) -> Self {
        Self {
            codec,
            width,
            height,
            fps,
            parameter_sets: Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AudioInfo {
    pub codec: AudioCodec,
    pub sample_rate: u32,
    pub channels: u8,
}

/// Media head of one (channel, stream-id): what DESCRIBE advertises.
#[derive(Debug, Clone, Default)]
pub struct MediaHead {
    pub video: Option<VideoInfo>,
    pub audio: Option<AudioInfo>,
}

//! Start descriptor: the schema announced once per subscription and
//! reused to interpret every subsequent packet.

use bytes::Bytes;

/// Elementary stream kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Audio,
    Video,
    Subtitle,
    Data,
}

/// Compressed-format identifier. `Unknown` on a session's target codec
/// field means "passthrough this stream kind".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CodecTag {
    Unknown,
    Mpeg2Video,
    H264,
    Mpeg2Audio,
    Ac3,
    Eac3,
    Aac,
    Mp2,
    DvbSub,
    DvbTeletext,
    Vp8,
    Vorbis,
}

impl CodecTag {
    #[must_use]
    pub const fn kind(&self) -> StreamKind {
        match self {
            Self::Mpeg2Video | Self::H264 | Self::Vp8 => StreamKind::Video,
            Self::Mpeg2Audio | Self::Ac3 | Self::Eac3 | Self::Aac | Self::Mp2 | Self::Vorbis => {
                StreamKind::Audio
            }
            Self::DvbSub => StreamKind::Subtitle,
            Self::DvbTeletext | Self::Unknown => StreamKind::Data,
        }
    }
}

/// One elementary stream inside a start descriptor.
#[derive(Debug, Clone)]
pub struct ComponentDescriptor {
    /// Stable index assigned by the source; frozen for the lifetime of
    /// the subscription.
    pub index: u16,
    pub kind: StreamKind,
    pub codec: CodecTag,
    pub width: u16,
    pub height: u16,
    pub aspect_num: u16,
    pub aspect_den: u16,
    pub sri: u8,
    pub channels: u16,
    /// ISO 639-2 3-letter language code.
    pub language: [u8; 3],
    pub pid: u16,
    pub composition_id: u16,
    pub ancillary_id: u16,
    pub disabled: bool,
    pub extradata: Option<Bytes>,
}

impl ComponentDescriptor {
    /// Builds a minimal component descriptor for the given index/kind/codec,
    /// defaulting every other field. Tests and the session's passthrough
    /// re-stamping path build on top of this.
    pub fn new(index: u16, kind: StreamKind, codec: CodecTag) -> Self {
        Self {
            index,
            kind,
            codec,
            width: 0,
            height: 0,
            aspect_num: 1,
            aspect_den: 1,
            sri: 0,
            channels: 0,
            language: *b"und",
            pid: 0,
            composition_id: 0,
            ancillary_id: 0,
            disabled: false,
            extradata: None,
        }
    }
}

/// Ordered component list announced at subscription start, plus the
/// transport-level fields a subscription carries alongside it.
#[derive(Debug, Clone, Default)]
pub struct StartDescriptor {
    pub components: Vec<ComponentDescriptor>,
    pub pcr_pid: u16,
    /// Opaque copy of the source's info blob; the core never interprets
    /// it, only carries it through to the mux.
    pub source_info: Option<Bytes>,
}

impl StartDescriptor {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Finds a component by its stable source index.
    #[must_use]
    pub fn find(&self, index: u16) -> Option<&ComponentDescriptor> {
        self.components.iter().find(|c| c.index == index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codec_tag_kind_mapping() {
        assert_eq!(CodecTag::H264.kind(), StreamKind::Video);
        assert_eq!(CodecTag::Aac.kind(), StreamKind::Audio);
        assert_eq!(CodecTag::DvbSub.kind(), StreamKind::Subtitle);
        assert_eq!(CodecTag::Unknown.kind(), StreamKind::Data);
    }

    #[test]
    fn find_returns_matching_index() {
        let mut desc = StartDescriptor::new();
        desc.components.push(ComponentDescriptor::new(17, StreamKind::Video, CodecTag::H264));
        desc.components.push(ComponentDescriptor::new(18, StreamKind::Audio, CodecTag::Aac));

        assert_eq!(desc.find(18).unwrap().codec, CodecTag::Aac);
        assert!(desc.find(99).is_none());
    }
}

//! Container mux: writes packets from a start descriptor's components
//! into one of three container formats, enforcing each container's
//! codec support matrix and rescaling timestamps as needed.

use std::io::Write;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;

use crate::descriptor::{CodecTag, ComponentDescriptor, StartDescriptor};
use crate::error::MuxError;
use crate::packet::Packet;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerKind {
    Mpegts,
    Matroska,
    Webm,
}

impl ContainerKind {
    /// Whether this container accepts the given codec.
    #[must_use]
    pub fn supports(&self, codec: CodecTag) -> bool {
        match self {
            Self::Matroska => true,
            Self::Mpegts => matches!(
                codec,
                CodecTag::Mpeg2Video
                    | CodecTag::Mpeg2Audio
                    | CodecTag::H264
                    | CodecTag::Ac3
                    | CodecTag::Eac3
                    | CodecTag::Aac
                    | CodecTag::DvbSub
                    | CodecTag::DvbTeletext
            ),
            Self::Webm => matches!(codec, CodecTag::Vp8 | CodecTag::Vorbis),
        }
    }

    /// Whether streams in this container carry a global-header flag on
    /// their encoder-side stream descriptor.
    #[must_use]
    fn wants_global_header(&self) -> bool {
        matches!(self, Self::Matroska | Self::Webm)
    }

    /// MPEG-TS passes source timestamps through unchanged; every other
    /// container rescales to a 1ms timebase.
    #[must_use]
    fn rescales_timestamps(&self) -> bool {
        !matches!(self, Self::Mpegts)
    }
}

/// One container-level stream allocated for a supported, non-disabled
/// component.
#[derive(Debug, Clone)]
pub struct MuxStream {
    pub stream_id: u16,
    pub codec: CodecTag,
    pub extradata: Option<Bytes>,
    pub sample_rate: u32,
    pub channels: u16,
    pub width: u16,
    pub height: u16,
    pub aspect_num: u16,
    pub aspect_den: u16,
    pub global_header: bool,
}

impl MuxStream {
    fn from_component(component: &ComponentDescriptor, container: ContainerKind) -> Self {
        Self {
            stream_id: component.index,
            codec: component.codec,
            extradata: component.extradata.clone(),
            sample_rate: crate::transcoder::codec::sri_to_sample_rate(component.sri),
            channels: component.channels,
            width: component.width,
            height: component.height,
            aspect_num: component.aspect_num,
            aspect_den: component.aspect_den,
            global_header: container.wants_global_header(),
        }
    }

    /// Some muxers derive an audio component's codec ID lazily on the
    /// first packet when the source descriptor's sample format was
    /// ambiguous. This descriptor model always carries a concrete
    /// `CodecTag`, so this never triggers here; kept as a named no-op
    /// seam for a future descriptor model that allows an ambiguous codec.
    fn resolve_codec(&mut self, _first_packet: &Packet) {}
}

/// Writes muxed container output to a writable sink (a file, in
/// production; any [`std::io::Write`] implementor in tests).
pub struct ContainerMux<W: Write> {
    container: ContainerKind,
    streams: Vec<MuxStream>,
    writer: W,
    error_count: AtomicU64,
}

impl<W: Write> ContainerMux<W> {
    /// Builds a mux for the given container over the given start
    /// descriptor, allocating one [`MuxStream`] per supported,
    /// non-disabled component.
    pub fn new(writer: W, start: &StartDescriptor, container: ContainerKind) -> Self {
        let mut streams = Vec::new();
        for component in &start.components {
            if component.disabled {
                continue;
            }
            if !container.supports(component.codec) {
                let err = MuxError::UnsupportedCodec { codec: component.codec, container };
                log::debug!("mux: dropping component {}: {err}", component.index);
                continue;
            }
            streams.push(MuxStream::from_component(component, container));
        }

        Self {
            container,
            streams,
            writer,
            error_count: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn error_count(&self) -> u64 {
        self.error_count.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn stream(&self, component_index: u16) -> Option<&MuxStream> {
        self.streams.iter().find(|s| s.stream_id == component_index)
    }

    /// Writes one packet, rescaling timestamps per the container's
    /// convention and setting the keyframe flag from the frame type.
    /// Returns the resolved keyframe flag for callers that need it
    /// (e.g. a segmenting writer deciding split points).
    pub fn write_packet(&mut self, packet: &Packet) -> Result<bool, MuxError> {
        let stream_idx = self
            .streams
            .iter()
            .position(|s| s.stream_id == packet.component_index)
            .ok_or(MuxError::UnknownComponent(packet.component_index))?;
        self.streams[stream_idx].resolve_codec(packet);

        let (pts, dts, duration) = if self.container.rescales_timestamps() {
            // 90kHz source clock -> 1ms timebase.
            (packet.pts / 90, packet.dts / 90, packet.duration / 90)
        } else {
            (packet.pts, packet.dts, packet.duration)
        };
        let keyframe = packet.frame_type.is_keyframe();

        let mut buf = Vec::with_capacity(packet.payload.len() + 24);
        buf.extend_from_slice(&pts.to_be_bytes());
        buf.extend_from_slice(&dts.to_be_bytes());
        buf.extend_from_slice(&duration.to_be_bytes());
        buf.push(u8::from(keyframe));
        buf.extend_from_slice(&packet.payload);

        match self.writer.write(&buf) {
            Ok(written) if written == buf.len() => Ok(keyframe),
            Ok(written) => {
                self.error_count.fetch_add(1, Ordering::Relaxed);
                Err(MuxError::ShortWrite { written, requested: buf.len() })
            }
            Err(err) => {
                self.error_count.fetch_add(1, Ordering::Relaxed);
                log::warn!("mux write failed: {err}");
                Err(MuxError::ShortWrite { written: 0, requested: buf.len() })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{ComponentDescriptor, StreamKind};
    use crate::packet::FrameType;

    fn descriptor_with(components: Vec<ComponentDescriptor>) -> StartDescriptor {
        let mut desc = StartDescriptor::new();
        desc.components = components;
        desc
    }

    #[test]
    fn mpegts_drops_unsupported_codec() {
        let desc = descriptor_with(vec![
            ComponentDescriptor::new(1, StreamKind::Video, CodecTag::H264),
            ComponentDescriptor::new(2, StreamKind::Video, CodecTag::Vp8),
        ]);
        let mux = ContainerMux::new(Vec::new(), &desc, ContainerKind::Mpegts);
        assert!(mux.stream(1).is_some());
        assert!(mux.stream(2).is_none());
    }

    #[test]
    fn webm_accepts_only_vp8_and_vorbis() {
        let desc = descriptor_with(vec![
            ComponentDescriptor::new(1, StreamKind::Video, CodecTag::Vp8),
            ComponentDescriptor::new(2, StreamKind::Audio, CodecTag::Aac),
        ]);
        let mux = ContainerMux::new(Vec::new(), &desc, ContainerKind::Webm);
        assert!(mux.stream(1).is_some());
        assert!(mux.stream(2).is_none());
    }

    #[test]
    fn disabled_component_gets_no_stream() {
        let mut component = ComponentDescriptor::new(1, StreamKind::Video, CodecTag::H264);
        component.disabled = true;
        let desc = descriptor_with(vec![component]);
        let mux = ContainerMux::new(Vec::new(), &desc, ContainerKind::Mpegts);
        assert!(mux.stream(1).is_none());
    }

    #[test]
    fn mpegts_passes_timestamps_through_unchanged() {
        let desc = descriptor_with(vec![ComponentDescriptor::new(1, StreamKind::Video, CodecTag::H264)]);
        let mut mux = ContainerMux::new(Vec::new(), &desc, ContainerKind::Mpegts);
        let mut pkt = Packet::new(1, Bytes::from_static(b"data"));
        pkt.pts = 900_000;
        pkt.frame_type = FrameType::I;
        let keyframe = mux.write_packet(&pkt).unwrap();
        assert!(keyframe);
    }

    #[test]
    fn matroska_rescales_timestamps_to_millis() {
        let desc = descriptor_with(vec![ComponentDescriptor::new(1, StreamKind::Video, CodecTag::H264)]);
        let mut mux = ContainerMux::new(Vec::new(), &desc, ContainerKind::Matroska);
        let mut pkt = Packet::new(1, Bytes::from_static(b"data"));
        pkt.pts = 900_000; // 90kHz units -> 10_000ms
        mux.write_packet(&pkt).unwrap();
        // no direct getter for the rescaled value; exercised via no panic
        // and the short-write counter staying at zero.
        assert_eq!(mux.error_count(), 0);
    }

    #[test]
    fn unknown_component_errors() {
        let desc = descriptor_with(vec![]);
        let mut mux = ContainerMux::new(Vec::new(), &desc, ContainerKind::Mpegts);
        let pkt = Packet::new(99, Bytes::new());
        assert!(matches!(mux.write_packet(&pkt), Err(MuxError::UnknownComponent(99))));
    }

    struct FlakyWriter;
    impl Write for FlakyWriter {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            Ok(buf.len().min(1))
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn short_write_increments_error_counter() {
        let desc = descriptor_with(vec![ComponentDescriptor::new(1, StreamKind::Video, CodecTag::H264)]);
        let mut mux = ContainerMux::new(FlakyWriter, &desc, ContainerKind::Mpegts);
        let pkt = Packet::new(1, Bytes::from_static(b"data"));
        assert!(mux.write_packet(&pkt).is_err());
        assert_eq!(mux.error_count(), 1);
    }
}

//! Transcoder session: the sink that sits between a subscription's
//! source and its mux, claiming at most one audio and one video
//! component for transcoding and forwarding everything else as
//! passthrough.

use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::bus::{Sink, StreamMessage};
use crate::descriptor::{CodecTag, ComponentDescriptor, StartDescriptor, StreamKind};
use crate::packet::Packet;
use crate::transcoder::lane::Lane;
use crate::transcoder::rate_controller::PidController;

/// Hard cap on passthrough streams carried through a single session,
/// matching the fixed-size component table the original C plumbing
/// allocates.
pub const MAX_PASSTHROUGH_STREAMS: usize = 31;

/// What a session should transcode to. `CodecTag::Unknown` on either
/// field means "passthrough this stream kind entirely".
#[derive(Debug, Clone, Copy)]
pub struct TranscodeTarget {
    pub audio_codec: CodecTag,
    pub video_codec: CodecTag,
    /// Output height cap; width is derived to preserve the source
    /// aspect ratio.
    pub max_height: u16,
    /// Whether this session's video lane should track a PID-controlled
    /// quality dial. Passthrough-only and audio-only sessions never
    /// need one.
    pub rate_controlled: bool,
}

struct BoundLane {
    source_index: u16,
    lane: Arc<Lane>,
}

struct SessionState {
    passthrough: Vec<(u16, u16)>, // (source_index, target_index)
    audio: Option<BoundLane>,
    video: Option<BoundLane>,
    rate_controller: Option<Arc<PidController>>,
}

/// Sits downstream of one subscription's source, upstream of its mux.
/// Implements [`Sink`] so it can be wired directly into a subscription
/// the same way any other stage of the pipeline is.
pub struct TranscoderSession {
    target: TranscodeTarget,
    downstream: Arc<dyn Sink>,
    state: Mutex<Option<SessionState>>,
    next_target_index: AtomicU16,
}

impl TranscoderSession {
    #[must_use]
    pub fn new(target: TranscodeTarget, downstream: Arc<dyn Sink>) -> Arc<Self> {
        Arc::new(Self {
            target,
            downstream,
            state: Mutex::new(None),
            next_target_index: AtomicU16::new(1),
        })
    }

    fn alloc_target_index(&self) -> u16 {
        self.next_target_index.fetch_add(1, Ordering::Relaxed)
    }

    /// Computes the even-dimensioned, aspect-preserving output
    /// resolution for a source picture geometry under this session's
    /// `max_height` cap.
    fn output_resolution(&self, source_width: u16, source_height: u16) -> (u16, u16) {
        fn even_ceil(n: u32) -> u16 {
            (if n % 2 == 0 { n } else { n + 1 }) as u16
        }

        if self.target.max_height == 0 || source_height <= self.target.max_height {
            return (even_ceil(source_width as u32), even_ceil(source_height as u32));
        }

        let out_h = self.target.max_height.min(source_height);
        let out_w = (source_width as u32 * out_h as u32).div_ceil(source_height as u32);
        (even_ceil(out_w), even_ceil(out_h as u32))
    }

    fn on_start(&self, start: &StartDescriptor) -> StartDescriptor {
        let mut new_descriptor = StartDescriptor::new();
        new_descriptor.pcr_pid = start.pcr_pid;
        new_descriptor.source_info = start.source_info.clone();

        let mut passthrough = Vec::new();
        let mut audio_source: Option<&ComponentDescriptor> = None;
        let mut video_source: Option<&ComponentDescriptor> = None;

        for component in &start.components {
            let claims_audio = self.target.audio_codec != CodecTag::Unknown
                && component.kind == StreamKind::Audio
                && audio_source.is_none();
            let claims_video = self.target.video_codec != CodecTag::Unknown
                && component.kind == StreamKind::Video
                && video_source.is_none();

            if claims_audio {
                audio_source = Some(component);
            } else if claims_video {
                video_source = Some(component);
            } else {
                passthrough.push(component);
            }
        }

        if passthrough.len() > MAX_PASSTHROUGH_STREAMS {
            log::warn!(
                "session dropping {} passthrough component(s) past the {} cap",
                passthrough.len() - MAX_PASSTHROUGH_STREAMS,
                MAX_PASSTHROUGH_STREAMS
            );
            passthrough.truncate(MAX_PASSTHROUGH_STREAMS);
        }

        // Allocation order: passthroughs first, then the audio lane,
        // then the video lane.
        let mut passthrough_map = Vec::with_capacity(passthrough.len());
        for component in &passthrough {
            let target_index = self.alloc_target_index();
            let mut out = ComponentDescriptor::new(target_index, component.kind, component.codec);
            out.width = component.width;
            out.height = component.height;
            out.aspect_num = component.aspect_num;
            out.aspect_den = component.aspect_den;
            out.sri = component.sri;
            out.channels = component.channels;
            out.language = component.language;
            out.extradata = component.extradata.clone();
            new_descriptor.components.push(out);
            passthrough_map.push((component.index, target_index));
        }

        let mut audio_lane = None;
        if let Some(component) = audio_source {
            let target_index = self.alloc_target_index();
            let out = ComponentDescriptor::new(target_index, StreamKind::Audio, self.target.audio_codec);
            new_descriptor.components.push(out);
            let lane = Lane::new_audio(
                component.index,
                target_index,
                component.codec,
                self.target.audio_codec,
                self.downstream.clone(),
            );
            audio_lane = Some(BoundLane { source_index: component.index, lane });
        }

        let mut rate_controller = None;
        let mut video_lane = None;
        if let Some(component) = video_source {
            let target_index = self.alloc_target_index();
            let (out_w, out_h) = self.output_resolution(component.width, component.height);
            let mut out = ComponentDescriptor::new(target_index, StreamKind::Video, self.target.video_codec);
            out.width = out_w;
            out.height = out_h;
            out.aspect_num = component.aspect_num;
            out.aspect_den = component.aspect_den;
            new_descriptor.components.push(out);

            let rc = if self.target.rate_controlled {
                let controller = Arc::new(PidController::new(Arc::new(crate::utils::SystemClock)));
                rate_controller = Some(controller.clone());
                Some(controller)
            } else {
                None
            };

            let lane = Lane::new_video(
                component.index,
                target_index,
                component.codec,
                self.target.video_codec,
                component.width,
                component.height,
                out_w,
                out_h,
                rc,
                self.downstream.clone(),
            );
            video_lane = Some(BoundLane { source_index: component.index, lane });
        }

        *self.state.lock() = Some(SessionState {
            passthrough: passthrough_map,
            audio: audio_lane,
            video: video_lane,
            rate_controller,
        });

        new_descriptor
    }

    fn on_stop(&self) {
        if let Some(state) = self.state.lock().take() {
            if let Some(bound) = state.audio {
                bound.lane.teardown();
            }
            if let Some(bound) = state.video {
                bound.lane.teardown();
            }
        }
    }

    fn route_packet(&self, packet: Packet) {
        let state = self.state.lock();
        let Some(state) = state.as_ref() else {
            return;
        };

        if let Some(bound) = &state.audio {
            if bound.source_index == packet.component_index {
                bound.lane.push(packet);
                return;
            }
        }
        if let Some(bound) = &state.video {
            if bound.source_index == packet.component_index {
                bound.lane.push(packet);
                return;
            }
        }
        if let Some((_, target)) = state
            .passthrough
            .iter()
            .find(|(source, _)| *source == packet.component_index)
        {
            self.downstream.accept(StreamMessage::Packet(packet.restamp(*target)));
        }
    }

    /// Reports an observed client network speed to this session's
    /// video rate controller, if it has one.
    pub fn set_network_speed(&self, speed_pct: f64) {
        if let Some(state) = self.state.lock().as_ref() {
            if let Some(rc) = &state.rate_controller {
                rc.set_network_speed(speed_pct);
            }
        }
    }
}

impl Sink for TranscoderSession {
    fn accept(&self, msg: StreamMessage) {
        match msg {
            StreamMessage::Start(start) => {
                let rewritten = self.on_start(&start);
                self.downstream.accept(StreamMessage::Start(Arc::new(rewritten)));
            }
            StreamMessage::Packet(packet) => self.route_packet(packet),
            StreamMessage::Stop => {
                self.on_stop();
                self.downstream.accept(StreamMessage::Stop);
            }
            StreamMessage::Exit => {
                self.on_stop();
                self.downstream.accept(StreamMessage::Exit);
            }
            StreamMessage::Speed(pct) => {
                self.set_network_speed(pct as f64);
                self.downstream.accept(StreamMessage::Speed(pct));
            }
            other => self.downstream.accept(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::test_support::RecordingSink;
    use bytes::Bytes;
    use std::time::Duration;

    fn source_descriptor() -> StartDescriptor {
        let mut desc = StartDescriptor::new();
        desc.components.push(ComponentDescriptor::new(1, StreamKind::Video, CodecTag::Mpeg2Video));
        desc.components.push(ComponentDescriptor::new(2, StreamKind::Audio, CodecTag::Ac3));
        desc.components.push(ComponentDescriptor::new(3, StreamKind::Subtitle, CodecTag::DvbSub));
        desc.components[0].width = 1280;
        desc.components[0].height = 720;
        desc.components[0].aspect_num = 16;
        desc.components[0].aspect_den = 9;
        desc
    }

    #[test]
    fn output_resolution_scales_height_cap_and_preserves_aspect() {
        let recorder = Arc::new(RecordingSink::default());
        let session = TranscoderSession::new(
            TranscodeTarget {
                audio_codec: CodecTag::Mp2,
                video_codec: CodecTag::H264,
                max_height: 360,
                rate_controlled: false,
            },
            recorder.clone(),
        );

        session.accept(StreamMessage::Start(Arc::new(source_descriptor())));
        session.accept(StreamMessage::Stop);

        let received = recorder.received.lock();
        let StreamMessage::Start(start) = &received[0] else {
            panic!("expected Start first");
        };
        let video = start.components.iter().find(|c| c.kind == StreamKind::Video).unwrap();
        assert_eq!((video.width, video.height), (640, 360));
    }

    #[test]
    fn passthrough_only_session_never_opens_lanes() {
        let recorder = Arc::new(RecordingSink::default());
        let session = TranscoderSession::new(
            TranscodeTarget {
                audio_codec: CodecTag::Unknown,
                video_codec: CodecTag::Unknown,
                max_height: 0,
                rate_controlled: false,
            },
            recorder.clone(),
        );

        session.accept(StreamMessage::Start(Arc::new(source_descriptor())));
        let mut pkt = Packet::new(1, Bytes::from_static(b"video-data"));
        pkt.pts = 42;
        session.accept(StreamMessage::Packet(pkt));

        std::thread::sleep(Duration::from_millis(30));
        session.accept(StreamMessage::Stop);

        let received = recorder.received.lock();
        let forwarded = received.iter().any(|m| matches!(m, StreamMessage::Packet(p) if p.pts == 42));
        assert!(forwarded, "passthrough packet should forward unmodified");
    }

    #[test]
    fn passthrough_cap_truncates_excess_components() {
        let recorder = Arc::new(RecordingSink::default());
        let session = TranscoderSession::new(
            TranscodeTarget {
                audio_codec: CodecTag::Unknown,
                video_codec: CodecTag::Unknown,
                max_height: 0,
                rate_controlled: false,
            },
            recorder.clone(),
        );

        let mut desc = StartDescriptor::new();
        for i in 0..40u16 {
            desc.components.push(ComponentDescriptor::new(i, StreamKind::Data, CodecTag::DvbTeletext));
        }
        session.accept(StreamMessage::Start(Arc::new(desc)));

        let received = recorder.received.lock();
        let StreamMessage::Start(start) = &received[0] else {
            panic!("expected Start");
        };
        assert_eq!(start.components.len(), MAX_PASSTHROUGH_STREAMS);
    }

    #[test]
    fn stop_tears_down_bound_lanes() {
        let recorder = Arc::new(RecordingSink::default());
        let session = TranscoderSession::new(
            TranscodeTarget {
                audio_codec: CodecTag::Mp2,
                video_codec: CodecTag::Unknown,
                max_height: 0,
                rate_controlled: false,
            },
            recorder.clone(),
        );
        session.accept(StreamMessage::Start(Arc::new(source_descriptor())));
        session.accept(StreamMessage::Stop);

        let mut pkt = Packet::new(2, Bytes::from(vec![1u8; 4096]));
        pkt.channels = 2;
        session.accept(StreamMessage::Packet(pkt));
        std::thread::sleep(Duration::from_millis(30));

        // No lane bound after Stop, so nothing downstream beyond Start/Stop.
        let received = recorder.received.lock();
        assert!(received.iter().all(|m| !matches!(m, StreamMessage::Packet(_))));
    }
}

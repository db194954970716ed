//! Per-stream transcoding lane.
//!
//! Each lane owns a bounded producer queue and a single dedicated
//! consumer thread. Producers (the session, on the subscription
//! thread) enqueue and signal; the consumer dequeues, runs the
//! decode/encode pipeline, and delivers results to the session's
//! downstream sink. Teardown clears the source index to 0 under the
//! queue lock and broadcasts the condition — the consumer observes the
//! zero index and exits.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::{Condvar, Mutex};

use crate::bus::{Sink, StreamMessage};
use crate::descriptor::CodecTag;
use crate::packet::{Packet, PacketPool};
use crate::transcoder::codec::{
    self, AudioDecoder, AudioEncoder, Scaler, VideoDecoder, VideoEncoder,
};
use crate::transcoder::rate_controller::PidController;

/// Bound on the lane's producer queue. 256 packets is comfortably more
/// than one GOP of either stream kind at typical broadcast bitrates, so
/// normal playback never presses against it.
const QUEUE_CAPACITY: usize = 256;

/// Wait timeout on the consumer's condition variable: a bounded wait
/// lets the loop periodically re-check for teardown without a
/// dedicated wakeup on every tick.
const CONSUMER_WAIT: Duration = Duration::from_secs(1);

enum LaneRuntime {
    Audio(AudioRuntime),
    Video(VideoRuntime),
}

struct AudioRuntime {
    decoder: Box<dyn AudioDecoder>,
    encoder: Option<Box<dyn AudioEncoder>>,
    decode_buf: VecDeque<u8>,
    /// Recycles the per-frame encode scratch buffer instead of
    /// allocating one on every drain of `decode_buf`.
    chunk_pool: PacketPool,
    target_codec: CodecTag,
    channels: u16,
    header_sent: bool,
}

struct VideoRuntime {
    decoder: Box<dyn VideoDecoder>,
    encoder: Option<Box<dyn VideoEncoder>>,
    scaler: Box<dyn Scaler>,
    target_codec: CodecTag,
    output_width: u16,
    output_height: u16,
    rate_controller: Option<Arc<PidController>>,
    header_sent: bool,
}

/// Shared state for one audio or video lane.
pub struct Lane {
    /// `0` means unbound/torn down.
    source_index: AtomicU32,
    target_component_index: u16,
    queue: Mutex<VecDeque<Packet>>,
    not_empty: Condvar,
    /// Set once an `EncoderInit` failure occurs; all further packets
    /// of this lane's kind are dropped silently until teardown.
    encoder_failed: AtomicBool,
    runtime: Mutex<LaneRuntime>,
    downstream: Arc<dyn Sink>,
    consumer: Mutex<Option<JoinHandle<()>>>,
}

impl Lane {
    pub fn new_audio(
        source_index: u16,
        target_component_index: u16,
        source_codec: CodecTag,
        target_codec: CodecTag,
        downstream: Arc<dyn Sink>,
    ) -> Arc<Self> {
        let runtime = LaneRuntime::Audio(AudioRuntime {
            decoder: codec::open_audio_decoder(source_codec),
            encoder: None,
            decode_buf: VecDeque::new(),
            chunk_pool: PacketPool::new(4096),
            target_codec,
            channels: 0,
            header_sent: false,
        });
        Self::spawn(source_index, target_component_index, runtime, downstream)
    }

    pub fn new_video(
        source_index: u16,
        target_component_index: u16,
        source_codec: CodecTag,
        target_codec: CodecTag,
        source_width: u16,
        source_height: u16,
        output_width: u16,
        output_height: u16,
        rate_controller: Option<Arc<PidController>>,
        downstream: Arc<dyn Sink>,
    ) -> Arc<Self> {
        let runtime = LaneRuntime::Video(VideoRuntime {
            decoder: codec::open_video_decoder(source_codec, source_width, source_height),
            encoder: None,
            scaler: codec::open_scaler(),
            target_codec,
            output_width,
            output_height,
            rate_controller,
            header_sent: false,
        });
        Self::spawn(source_index, target_component_index, runtime, downstream)
    }

    fn spawn(
        source_index: u16,
        target_component_index: u16,
        runtime: LaneRuntime,
        downstream: Arc<dyn Sink>,
    ) -> Arc<Self> {
        let lane = Arc::new(Self {
            source_index: AtomicU32::new(source_index as u32),
            target_component_index,
            queue: Mutex::new(VecDeque::with_capacity(QUEUE_CAPACITY.min(32))),
            not_empty: Condvar::new(),
            encoder_failed: AtomicBool::new(false),
            runtime: Mutex::new(runtime),
            downstream,
            consumer: Mutex::new(None),
        });

        let worker = Arc::clone(&lane);
        let handle = std::thread::Builder::new()
            .name("transcoder-lane".into())
            .spawn(move || worker.run())
            .expect("failed to spawn lane consumer thread");
        *lane.consumer.lock() = Some(handle);

        lane
    }

    #[must_use]
    pub fn source_index(&self) -> u16 {
        self.source_index.load(Ordering::Acquire) as u16
    }

    /// Enqueues a packet for this lane. Dropped silently if the lane
    /// has already been torn down or the queue is saturated; no
    /// failures propagate across the sink boundary.
    pub fn push(&self, packet: Packet) {
        if self.source_index() == 0 {
            return;
        }
        let mut queue = self.queue.lock();
        if queue.len() >= QUEUE_CAPACITY {
            log::warn!("lane queue full, dropping packet for component {}", packet.component_index);
            return;
        }
        queue.push_back(packet);
        self.not_empty.notify_one();
    }

    /// Tears the lane down: clears the source index and wakes the
    /// consumer, then joins it so no output escapes after this call
    /// returns.
    pub fn teardown(&self) {
        {
            let _queue = self.queue.lock();
            self.source_index.store(0, Ordering::Release);
            self.not_empty.notify_all();
        }
        if let Some(handle) = self.consumer.lock().take() {
            let _ = handle.join();
        }
    }

    fn next_packet(&self) -> Option<Packet> {
        let mut queue = self.queue.lock();
        loop {
            if self.source_index.load(Ordering::Acquire) == 0 {
                return None;
            }
            if let Some(packet) = queue.pop_front() {
                return Some(packet);
            }
            self.not_empty.wait_for(&mut queue, CONSUMER_WAIT);
        }
    }

    fn run(self: Arc<Self>) {
        while let Some(packet) = self.next_packet() {
            self.process(packet);
        }
    }

    fn process(&self, packet: Packet) {
        if self.encoder_failed.load(Ordering::Acquire) {
            return;
        }
        let mut runtime = self.runtime.lock();
        let result = match &mut *runtime {
            LaneRuntime::Audio(rt) => self.process_audio(rt, packet),
            LaneRuntime::Video(rt) => self.process_video(rt, packet),
        };
        if let Err(failed) = result {
            if failed {
                self.encoder_failed.store(true, Ordering::Release);
            }
        }
    }

    /// Returns `Err(true)` if this failure should permanently disable
    /// the lane (an `EncoderInit` failure); `Err(false)` for a
    /// transient, packet-local failure that leaves the lane open.
    fn process_audio(&self, rt: &mut AudioRuntime, packet: Packet) -> Result<(), bool> {
        let pcm = match rt.decoder.decode(&packet.payload) {
            Ok(pcm) => pcm,
            Err(err) => {
                log::warn!("audio decode failed on component {}: {err}", packet.component_index);
                return Err(false);
            }
        };

        const MAX_DECODE_BUF: usize = 1 << 20;
        if rt.decode_buf.len() + pcm.len() > MAX_DECODE_BUF {
            log::warn!("audio decode buffer overflow on component {}", packet.component_index);
            return Err(false);
        }
        rt.decode_buf.extend(pcm);

        if rt.encoder.is_none() {
            let channels = packet.channels.min(2).max(1);
            let sample_rate = codec::sri_to_sample_rate(packet.sri);
            match codec::open_audio_encoder(rt.target_codec, channels, sample_rate) {
                Ok(enc) => {
                    rt.channels = channels;
                    rt.encoder = Some(enc);
                }
                Err(err) => {
                    log::error!("audio encoder init failed: {err}");
                    return Err(true);
                }
            }
        }

        let encoder = rt.encoder.as_mut().expect("encoder just opened");
        let frame_bytes = encoder.frame_size() * rt.channels as usize * 2;
        let mut encoded = Vec::new();
        while rt.decode_buf.len() >= frame_bytes {
            let mut chunk = rt.chunk_pool.acquire();
            chunk.extend(rt.decode_buf.drain(..frame_bytes));
            let result = encoder.encode(&chunk);
            rt.chunk_pool.release(chunk);
            match result {
                Ok(bytes) => encoded.extend(bytes),
                Err(err) => log::warn!("audio encode failed: {err}"),
            }
        }

        if encoded.is_empty() {
            return Ok(());
        }

        let mut out = Packet::new(self.target_component_index, Bytes::from(encoded));
        out.pts = packet.pts;
        out.dts = packet.dts;
        out.duration = packet.duration;
        out.channels = rt.channels;
        out.commercial = packet.commercial;
        if !rt.header_sent {
            if let Some(extradata) = encoder.extradata() {
                out.header = Some(extradata);
                rt.header_sent = true;
            }
        }
        self.downstream.accept(StreamMessage::Packet(out));
        Ok(())
    }

    fn process_video(&self, rt: &mut VideoRuntime, packet: Packet) -> Result<(), bool> {
        let picture = match rt.decoder.decode(&packet.payload) {
            Ok(Some(pic)) => pic,
            Ok(None) => return Ok(()),
            Err(err) => {
                log::warn!("video decode failed on component {}: {err}", packet.component_index);
                return Err(false);
            }
        };

        if rt.encoder.is_none() {
            match codec::open_video_encoder(rt.target_codec, rt.output_width, rt.output_height) {
                Ok(enc) => rt.encoder = Some(enc),
                Err(err) => {
                    log::error!("video encoder init failed: {err}");
                    return Err(true);
                }
            }
        }

        let scaled = match rt.scaler.scale(&picture, rt.output_width, rt.output_height) {
            Ok(pic) => pic,
            Err(err) => {
                log::warn!("scaler failed on component {}: {err}", packet.component_index);
                return Err(false);
            }
        };

        // quality() is read but not fed into the test encoder profile
        // directly — a real backend would apply it as the live CRF/CQP
        // dial on this call.
        if let Some(rc) = &rt.rate_controller {
            let _quality = rc.quality();
        }

        let encoder = rt.encoder.as_mut().expect("encoder just opened");
        let encoded = match encoder.encode(&scaled) {
            Ok(enc) => enc,
            Err(err) => {
                log::warn!("video encode failed on component {}: {err}", packet.component_index);
                return Err(false);
            }
        };

        let mut out = Packet::new(self.target_component_index, Bytes::from(encoded.data));
        out.pts = encoded.pts.unwrap_or(picture.reordered_pts);
        out.dts = packet.dts;
        out.duration = packet.duration;
        out.frame_type = encoded.frame_type;
        out.aspect_num = packet.aspect_num;
        out.aspect_den = packet.aspect_den;
        if !rt.header_sent {
            if let Some(extradata) = encoder.extradata() {
                out.header = Some(extradata);
                rt.header_sent = true;
            }
        }
        self.downstream.accept(StreamMessage::Packet(out));
        Ok(())
    }
}

impl Drop for Lane {
    fn drop(&mut self) {
        self.source_index.store(0, Ordering::Release);
        self.not_empty.notify_all();
        if let Some(handle) = self.consumer.lock().take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::test_support::RecordingSink;
    use crate::packet::FrameType;
    use std::time::Duration as StdDuration;

    fn drain(recorder: &Arc<RecordingSink>, expect_at_least: usize) -> Vec<StreamMessage> {
        for _ in 0..50 {
            if recorder.received.lock().len() >= expect_at_least {
                break;
            }
            std::thread::sleep(StdDuration::from_millis(20));
        }
        recorder.received.lock().clone()
    }

    #[test]
    fn audio_lane_emits_packet_once_buffer_has_a_full_frame() {
        let recorder = Arc::new(RecordingSink::default());
        let lane = Lane::new_audio(3, 0, CodecTag::Aac, CodecTag::Mpeg2Audio, recorder.clone());

        // frame_size=1024 samples, 2 channels, 2 bytes/sample = 4096 bytes/frame.
        let mut pkt = Packet::new(3, Bytes::from(vec![7u8; 4096]));
        pkt.channels = 2;
        pkt.sri = 3; // 48kHz
        lane.push(pkt);

        let received = drain(&recorder, 1);
        lane.teardown();

        assert_eq!(received.len(), 1);
        match &received[0] {
            StreamMessage::Packet(p) => {
                assert_eq!(p.component_index, 0);
                assert_eq!(p.channels, 2);
                assert!(p.header.is_some(), "first emission carries extradata");
            }
            other => panic!("expected Packet, got {other:?}"),
        }
    }

    #[test]
    fn audio_lane_leaves_residual_in_decode_buffer() {
        let recorder = Arc::new(RecordingSink::default());
        let lane = Lane::new_audio(3, 0, CodecTag::Aac, CodecTag::Mpeg2Audio, recorder.clone());

        // 5000 bytes: one full 4096-byte frame plus 904-byte residual.
        let mut pkt = Packet::new(3, Bytes::from(vec![1u8; 5000]));
        pkt.channels = 2;
        pkt.sri = 3;
        lane.push(pkt);

        let received = drain(&recorder, 1);
        lane.teardown();
        assert_eq!(received.len(), 1);
        if let StreamMessage::Packet(p) = &received[0] {
            // Encoded bytes never exceed what was decoded.
            assert!(p.payload.len() <= 5000);
        }
    }

    #[test]
    fn video_lane_emits_keyframe_flag_on_i_frame() {
        let recorder = Arc::new(RecordingSink::default());
        let lane = Lane::new_video(
            1,
            0,
            CodecTag::Mpeg2Video,
            CodecTag::H264,
            1280,
            720,
            640,
            360,
            None,
            recorder.clone(),
        );

        // payload[0] % 3 == 0 -> I frame in the test decoder.
        let pkt = Packet::new(1, Bytes::from_static(&[0u8, 1, 2, 3]));
        lane.push(pkt);

        let received = drain(&recorder, 1);
        lane.teardown();
        assert_eq!(received.len(), 1);
        if let StreamMessage::Packet(p) = &received[0] {
            assert_eq!(p.frame_type, FrameType::I);
            assert!(p.frame_type.is_keyframe());
        }
    }

    #[test]
    fn no_output_after_teardown() {
        let recorder = Arc::new(RecordingSink::default());
        let lane = Lane::new_audio(3, 0, CodecTag::Aac, CodecTag::Mpeg2Audio, recorder.clone());
        lane.teardown();

        let mut pkt = Packet::new(3, Bytes::from(vec![1u8; 4096]));
        pkt.channels = 2;
        lane.push(pkt);

        std::thread::sleep(StdDuration::from_millis(50));
        assert!(recorder.received.lock().is_empty());
    }

    #[test]
    fn encoder_init_failure_disables_lane_silently() {
        let recorder = Arc::new(RecordingSink::default());
        // CodecTag::H264 has no audio encoder profile -> EncoderInit error.
        let lane = Lane::new_audio(3, 0, CodecTag::Aac, CodecTag::H264, recorder.clone());

        let mut pkt = Packet::new(3, Bytes::from(vec![1u8; 4096]));
        pkt.channels = 2;
        lane.push(pkt);
        std::thread::sleep(StdDuration::from_millis(50));

        // Lane stays alive (no panic) but produces nothing, ever.
        let mut pkt2 = Packet::new(3, Bytes::from(vec![1u8; 4096]));
        pkt2.channels = 2;
        lane.push(pkt2);
        std::thread::sleep(StdDuration::from_millis(50));

        lane.teardown();
        assert!(recorder.received.lock().is_empty());
    }
}

//! Codec boundary: the interface between the transcoder lanes and an
//! external codec library.
//!
//! The actual compressed-bitstream encode/decode delegates to an
//! external codec library and is out of scope here. The traits below
//! are that boundary. A production build links an `ffmpeg`-family
//! crate behind them; this crate ships [`TestAudioCodec`]/
//! [`TestVideoCodec`] deterministic stand-ins so the lane orchestration
//! logic (buffer accounting, frame pacing, backpressure, error
//! handling) can be built and tested without a real codec dependency.

use bytes::Bytes;

use crate::descriptor::CodecTag;
use crate::error::TranscodeError;
use crate::packet::FrameType;

/// One decoded video frame, pre-scale.
#[derive(Debug, Clone)]
pub struct Picture {
    pub width: u16,
    pub height: u16,
    pub frame_type: FrameType,
    /// Decoder-reordered presentation timestamp, used as a fallback
    /// when the encoder doesn't report one of its own.
    pub reordered_pts: i64,
    pub data: Bytes,
}

/// One encoded video access unit.
pub struct EncodedVideo {
    pub data: Vec<u8>,
    pub frame_type: FrameType,
    /// The encoder's own coded-frame PTS, when it reports one.
    pub pts: Option<i64>,
}

pub trait AudioDecoder: Send {
    /// Decodes one compressed packet into PCM bytes appended to the
    /// lane's decode buffer. Returns an empty vec if the packet
    /// produced no samples (e.g. a header-only packet).
    fn decode(&mut self, payload: &[u8]) -> Result<Vec<u8>, TranscodeError>;
}

pub trait AudioEncoder: Send {
    /// Number of samples (per channel) the encoder consumes per frame.
    fn frame_size(&self) -> usize;
    /// Encodes exactly one frame's worth of PCM bytes
    /// (`frame_size * channels * bytes_per_sample`).
    fn encode(&mut self, pcm_frame: &[u8]) -> Result<Vec<u8>, TranscodeError>;
    /// Out-of-band codec extradata, available once the encoder is open.
    fn extradata(&self) -> Option<Bytes>;
}

pub trait VideoDecoder: Send {
    /// Decodes one compressed packet. Returns `Ok(None)` if no picture
    /// was produced yet; the caller should return and wait for the
    /// next packet rather than treating this as an error.
    fn decode(&mut self, payload: &[u8]) -> Result<Option<Picture>, TranscodeError>;
}

pub trait VideoEncoder: Send {
    fn encode(&mut self, picture: &Picture) -> Result<EncodedVideo, TranscodeError>;
    fn extradata(&self) -> Option<Bytes>;
}

pub trait Scaler: Send {
    fn scale(&mut self, picture: &Picture, width: u16, height: u16) -> Result<Picture, TranscodeError>;
}

/// Standard MPEG/AAC sample-rate table, indexed by sampling rate index.
const SAMPLE_RATES: [u32; 13] = [
    96000, 88200, 64000, 48000, 44100, 32000, 24000, 22050, 16000, 12000, 11025, 8000, 7350,
];

#[must_use]
pub fn sri_to_sample_rate(sri: u8) -> u32 {
    SAMPLE_RATES.get(sri as usize).copied().unwrap_or(48000)
}

/// Per-codec video encoder settings. Not
/// interpreted further by `core` — a real codec backend would feed
/// these into its encoder init call. Kept here so the settings a
/// production build needs are visible at the same seam the lane opens
/// its encoder.
#[derive(Debug, Clone)]
pub struct VideoEncoderProfile {
    pub codec: CodecTag,
    pub width: u16,
    pub height: u16,
    pub global_header: bool,
    pub gop_size: u32,
    pub bitrate: u64,
    pub max_rate: u64,
    pub vbv_buffer: u64,
    pub b_frames: u32,
    pub qmin: u32,
}

impl VideoEncoderProfile {
    #[must_use]
    pub fn for_codec(codec: CodecTag, width: u16, height: u16) -> Option<Self> {
        let wh = width as u64 * height as u64;
        match codec {
            CodecTag::Mpeg2Video => Some(Self {
                codec,
                width,
                height,
                global_header: true,
                gop_size: 0,
                bitrate: 0,
                max_rate: 0,
                vbv_buffer: 0,
                b_frames: 0,
                qmin: 1,
            }),
            CodecTag::H264 => {
                let bitrate = 2 * wh;
                let vbv_buffer = 2 * wh;
                Some(Self {
                    codec,
                    width,
                    height,
                    global_header: true,
                    gop_size: 250,
                    bitrate,
                    max_rate: 2 * vbv_buffer,
                    vbv_buffer,
                    b_frames: 16,
                    qmin: 0,
                })
            }
            _ => None,
        }
    }
}

/// Opens a decoder for the given source codec. The test stand-in never
/// fails to open; real backends can fail here too, surfaced the same
/// way as [`TranscodeError::EncoderInit`] on the encode side. Source
/// decoders are assumed available whenever the source announced the
/// codec.
#[must_use]
pub fn open_audio_decoder(_source: CodecTag) -> Box<dyn AudioDecoder> {
    Box::new(TestAudioDecoder)
}

#[must_use]
pub fn open_video_decoder(_source: CodecTag, width: u16, height: u16) -> Box<dyn VideoDecoder> {
    Box::new(TestVideoDecoder { width, height })
}

/// Opens an encoder for the given target codec, channel count and
/// sample rate. Fails with [`TranscodeError::EncoderInit`] for targets
/// with no known audio profile.
pub fn open_audio_encoder(
    target: CodecTag,
    channels: u16,
    sample_rate: u32,
) -> Result<Box<dyn AudioEncoder>, TranscodeError> {
    match target {
        CodecTag::Mp2 | CodecTag::Aac | CodecTag::Mpeg2Audio => Ok(Box::new(TestAudioEncoder {
            channels,
            sample_rate,
            frame_size: 1024,
            extradata: Some(Bytes::from_static(b"test-audio-extradata")),
        })),
        other => Err(TranscodeError::EncoderInit {
            target: other,
            reason: "no audio encoder profile for target codec".into(),
        }),
    }
}

pub fn open_video_encoder(
    target: CodecTag,
    width: u16,
    height: u16,
) -> Result<Box<dyn VideoEncoder>, TranscodeError> {
    match VideoEncoderProfile::for_codec(target, width, height) {
        Some(profile) => Ok(Box::new(TestVideoEncoder {
            profile,
            extradata: Some(Bytes::from_static(b"test-video-extradata")),
        })),
        None => Err(TranscodeError::EncoderInit {
            target,
            reason: "no video encoder profile for target codec".into(),
        }),
    }
}

#[must_use]
pub fn open_scaler() -> Box<dyn Scaler> {
    Box::new(TestScaler)
}

// ─────────────────────────────────────────────────────────────────────────────
// Deterministic test doubles standing in for the external codec library
// ─────────────────────────────────────────────────────────────────────────────

struct TestAudioDecoder;

impl AudioDecoder for TestAudioDecoder {
    fn decode(&mut self, payload: &[u8]) -> Result<Vec<u8>, TranscodeError> {
        if payload.is_empty() {
            return Err(TranscodeError::TransientDecode {
                component: 0,
                reason: "empty payload".into(),
            });
        }
        // Stand-in decode: treat the compressed payload's bytes as PCM
        // 1:1. A real backend would actually decompress here.
        Ok(payload.to_vec())
    }
}

struct TestAudioEncoder {
    channels: u16,
    #[allow(dead_code)]
    sample_rate: u32,
    frame_size: usize,
    extradata: Option<Bytes>,
}

impl AudioEncoder for TestAudioEncoder {
    fn frame_size(&self) -> usize {
        self.frame_size
    }

    fn encode(&mut self, pcm_frame: &[u8]) -> Result<Vec<u8>, TranscodeError> {
        debug_assert_eq!(pcm_frame.len(), self.frame_size * self.channels as usize * 2);
        // Stand-in encode: identity transform. Real backends compress
        // here; the byte-accounting invariant only requires encoded
        // bytes to come from consumed PCM, which holds regardless of
        // compression ratio.
        Ok(pcm_frame.to_vec())
    }

    fn extradata(&self) -> Option<Bytes> {
        self.extradata.clone()
    }
}

struct TestVideoDecoder {
    width: u16,
    height: u16,
}

impl VideoDecoder for TestVideoDecoder {
    fn decode(&mut self, payload: &[u8]) -> Result<Option<Picture>, TranscodeError> {
        if payload.is_empty() {
            return Err(TranscodeError::TransientDecode {
                component: 0,
                reason: "empty payload".into(),
            });
        }
        let frame_type = match payload[0] % 3 {
            0 => FrameType::I,
            1 => FrameType::P,
            _ => FrameType::B,
        };
        Ok(Some(Picture {
            width: self.width,
            height: self.height,
            frame_type,
            reordered_pts: 0,
            data: Bytes::copy_from_slice(payload),
        }))
    }
}

struct TestVideoEncoder {
    profile: VideoEncoderProfile,
    extradata: Option<Bytes>,
}

impl VideoEncoder for TestVideoEncoder {
    fn encode(&mut self, picture: &Picture) -> Result<EncodedVideo, TranscodeError> {
        if picture.width != self.profile.width || picture.height != self.profile.height {
            return Err(TranscodeError::ScalerFailed {
                component: 0,
                reason: "picture geometry does not match encoder profile".into(),
            });
        }
        Ok(EncodedVideo {
            data: picture.data.to_vec(),
            frame_type: picture.frame_type,
            pts: None,
        })
    }

    fn extradata(&self) -> Option<Bytes> {
        self.extradata.clone()
    }
}

struct TestScaler;

impl Scaler for TestScaler {
    fn scale(&mut self, picture: &Picture, width: u16, height: u16) -> Result<Picture, TranscodeError> {
        Ok(Picture {
            width,
            height,
            frame_type: picture.frame_type,
            reordered_pts: picture.reordered_pts,
            data: picture.data.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn h264_profile_bitrate_is_twice_area() {
        let profile = VideoEncoderProfile::for_codec(CodecTag::H264, 640, 360).unwrap();
        assert_eq!(profile.bitrate, 2 * 640 * 360);
        assert_eq!(profile.max_rate, 2 * profile.vbv_buffer);
    }

    #[test]
    fn unknown_target_has_no_video_profile() {
        assert!(VideoEncoderProfile::for_codec(CodecTag::Aac, 640, 360).is_none());
    }

    #[test]
    fn open_audio_encoder_rejects_unsupported_target() {
        let result = open_audio_encoder(CodecTag::H264, 2, 48000);
        assert!(matches!(result, Err(TranscodeError::EncoderInit { .. })));
    }

    #[test]
    fn sri_table_falls_back_for_out_of_range() {
        assert_eq!(sri_to_sample_rate(3), 48000);
        assert_eq!(sri_to_sample_rate(99), 48000);
    }
}

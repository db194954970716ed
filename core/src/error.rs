//! Centralized error types for the relaycast core library.
//!
//! Structured per-subsystem errors via `thiserror`. None of these cross
//! a [`crate::bus::Sink`] boundary — every sink's `accept` is total; an
//! error here is logged and handled locally (dropped packet, reset
//! lane, incremented counter) at the point it occurs.

use thiserror::Error;

/// Errors a transcoder lane can hit while decoding, encoding, or
/// scaling a packet.
#[derive(Debug, Error)]
pub enum TranscodeError {
    /// A decoder failure on a single packet. The lane stays open and
    /// the packet is dropped.
    #[error("decode failed for component {component}: {reason}")]
    TransientDecode { component: u16, reason: String },

    /// The decode scratch buffer has no room for more PCM/picture data.
    /// Treated identically to `TransientDecode`.
    #[error("decode buffer overflow for component {component}")]
    BufferOverflow { component: u16 },

    /// Opening the target encoder failed. The lane's target codec is
    /// reset to `CodecTag::Unknown` and all further packets of that
    /// kind are dropped until teardown.
    #[error("encoder init failed for target {target:?}: {reason}")]
    EncoderInit {
        target: crate::descriptor::CodecTag,
        reason: String,
    },

    /// The scaler failed to produce an output frame; the frame is
    /// dropped.
    #[error("scaler failed for component {component}: {reason}")]
    ScalerFailed { component: u16, reason: String },
}

/// Errors surfaced by the container mux.
#[derive(Debug, Error)]
pub enum MuxError {
    /// A component's codec tag is not in the container's support
    /// matrix; no stream is allocated for it.
    #[error("codec {codec:?} unsupported by container {container:?}")]
    UnsupportedCodec {
        codec: crate::descriptor::CodecTag,
        container: crate::mux::ContainerKind,
    },

    /// A packet referenced a component index with no matching stream.
    #[error("no mux stream for component {0}")]
    UnknownComponent(u16),

    /// A short or failed write to the output file descriptor. The
    /// mux's error counter is incremented and the mux keeps running.
    #[error("write failed: wrote {written} of {requested} bytes")]
    ShortWrite { written: usize, requested: usize },
}

/// Errors from the EPG scrape worker.
#[derive(Debug, Error)]
pub enum ScrapeError {
    /// The external program exited with a non-zero status.
    #[error("scraper exited with status {0}")]
    NonZeroExit(i32),

    /// The external program's stdout did not parse as a JSON object.
    #[error("scraper output did not parse as JSON: {0}")]
    UnparseableOutput(#[from] serde_json::Error),

    /// Spawning the external program failed outright (missing
    /// executable, permission denied, etc).
    #[error("failed to spawn scraper process: {0}")]
    SpawnFailed(#[from] std::io::Error),

    /// The feature is disabled or the broadcast is already in progress
    /// or completed; enqueue was refused.
    #[error("enqueue refused: {0}")]
    EnqueueRefused(&'static str),
}

/// Errors from the settings/property-reflection layer.
#[derive(Debug, Error)]
pub enum SettingsError {
    /// The persistent store had no value for the requested key.
    #[error("no settings found for key {0}")]
    NotFound(String),

    /// A stored value failed to parse against the expected shape. This
    /// is ignored at the call site and the field keeps its previous
    /// value; the error exists so callers *can* log it.
    #[error("failed to parse settings for key {key}: {reason}")]
    ParseError { key: String, reason: String },

    /// The underlying store (filesystem, etc) failed.
    #[error("settings store I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encoder_init_error_carries_target_codec() {
        let err = TranscodeError::EncoderInit {
            target: crate::descriptor::CodecTag::H264,
            reason: "no such codec".into(),
        };
        assert!(err.to_string().contains("H264"));
    }

    #[test]
    fn unsupported_codec_names_both_codec_and_container() {
        let err = MuxError::UnsupportedCodec {
            codec: crate::descriptor::CodecTag::Vp8,
            container: crate::mux::ContainerKind::Mpegts,
        };
        let message = err.to_string();
        assert!(message.contains("Vp8"));
        assert!(message.contains("Mpegts"));
    }

    #[test]
    fn short_write_reports_both_lengths() {
        let err = MuxError::ShortWrite {
            written: 10,
            requested: 20,
        };
        assert_eq!(err.to_string(), "write failed: wrote 10 of 20 bytes");
    }
}

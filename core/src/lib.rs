//! relaycast-core — a streaming transcoder pipeline library.
//!
//! Built around one idea: a [`bus::Sink`] accepts a [`bus::StreamMessage`]
//! and either forwards it, transforms it, or consumes it, without ever
//! panicking or returning an error across that boundary. A
//! [`transcoder::TranscoderSession`] sits between a subscription's
//! source and its [`mux::ContainerMux`], claiming at most one audio and
//! one video component for transcoding through a dedicated
//! [`transcoder::Lane`] and forwarding everything else untouched.
//!
//! # Modules
//!
//! - [`bus`]: the streaming message sink abstraction
//! - [`packet`]: the immutable, refcounted packet model
//! - [`descriptor`]: stream/component/start-descriptor types
//! - [`transcoder`]: session, lanes, rate controller, codec boundary
//! - [`mux`]: container muxing (MPEG-TS/Matroska/WebM)
//! - [`epg`]: the in-memory EPG model and its external scrape worker
//! - [`settings`]: property reflection and persistent config storage
//! - [`config`]: the top-level application config record
//! - [`error`]: per-subsystem structured errors

pub mod bus;
pub mod config;
pub mod descriptor;
pub mod epg;
pub mod error;
pub mod mux;
pub mod packet;
pub mod settings;
pub mod transcoder;
pub mod utils;

pub use bus::{Sink, StreamMessage};
pub use config::Config;
pub use descriptor::{CodecTag, ComponentDescriptor, StartDescriptor, StreamKind};
pub use error::{MuxError, ScrapeError, SettingsError, TranscodeError};
pub use packet::{FrameType, Packet};
pub use transcoder::{TranscodeTarget, TranscoderSession};

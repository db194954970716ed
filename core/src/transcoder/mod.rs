//! Transcoder pipeline: claims at most one audio and one video
//! component per subscription, runs each through a dedicated lane, and
//! forwards everything else as passthrough.

pub mod codec;
pub mod lane;
pub mod rate_controller;
pub mod session;

pub use lane::Lane;
pub use rate_controller::{PidController, LAMBDA_MAX};
pub use session::{TranscodeTarget, TranscoderSession, MAX_PASSTHROUGH_STREAMS};

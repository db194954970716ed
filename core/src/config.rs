//! Top-level configuration record: one plain struct holding every
//! subsystem's defaults, loadable from YAML by `server`.

use serde::{Deserialize, Serialize};

use crate::descriptor::CodecTag;
use crate::epg::scrape::ScrapeConfig;
use crate::mux::ContainerKind;

fn default_max_height() -> u16 {
    0
}

/// Serializable mirror of [`CodecTag`] for config files; `core`'s own
/// wire/runtime type stays `Copy` and field-free of serde derives so
/// it isn't forced to support every possible external representation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CodecConfig {
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

impl From<CodecConfig> for CodecTag {
    fn from(value: CodecConfig) -> Self {
        match value {
            CodecConfig::Unknown => CodecTag::Unknown,
            CodecConfig::Mpeg2Video => CodecTag::Mpeg2Video,
            CodecConfig::H264 => CodecTag::H264,
            CodecConfig::Mpeg2Audio => CodecTag::Mpeg2Audio,
            CodecConfig::Ac3 => CodecTag::Ac3,
            CodecConfig::Eac3 => CodecTag::Eac3,
            CodecConfig::Aac => CodecTag::Aac,
            CodecConfig::Mp2 => CodecTag::Mp2,
            CodecConfig::DvbSub => CodecTag::DvbSub,
            CodecConfig::DvbTeletext => CodecTag::DvbTeletext,
            CodecConfig::Vp8 => CodecTag::Vp8,
            CodecConfig::Vorbis => CodecTag::Vorbis,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerConfig {
    Mpegts,
    Matroska,
    Webm,
}

impl From<ContainerConfig> for ContainerKind {
    fn from(value: ContainerConfig) -> Self {
        match value {
            ContainerConfig::Mpegts => ContainerKind::Mpegts,
            ContainerConfig::Matroska => ContainerKind::Matroska,
            ContainerConfig::Webm => ContainerKind::Webm,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscoderConfig {
    pub audio_codec: CodecConfig,
    pub video_codec: CodecConfig,
    #[serde(default = "default_max_height")]
    pub max_height: u16,
    #[serde(default)]
    pub rate_controlled: bool,
}

impl Default for TranscoderConfig {
    fn default() -> Self {
        Self {
            audio_codec: CodecConfig::Unknown,
            video_codec: CodecConfig::Unknown,
            max_height: default_max_height(),
            rate_controlled: false,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScrapeConfigFile {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub exec: Option<String>,
}

impl From<ScrapeConfigFile> for ScrapeConfig {
    fn from(value: ScrapeConfigFile) -> Self {
        ScrapeConfig { enabled: value.enabled, exec: value.exec }
    }
}

/// The full application config, as loaded from `server`'s `--config`
/// YAML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub transcoder: TranscoderConfig,
    pub container: ContainerConfig,
    #[serde(default)]
    pub scrape: ScrapeConfigFile,
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
}

fn default_data_dir() -> String {
    "./data".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            transcoder: TranscoderConfig::default(),
            container: ContainerConfig::Mpegts,
            scrape: ScrapeConfigFile::default(),
            data_dir: default_data_dir(),
        }
    }
}

impl Config {
    /// Parses a config from YAML text (`server`'s `--config` flag).
    pub fn from_yaml(text: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(text)
    }
}

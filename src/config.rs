//! Validated, frozen configuration records.
//!
//! Invalid values fail with `EINVAL` at construction time; once built,
//! a configuration never changes.

use serde::Deserialize;

use crate::errno::{ErrnoKind, FsError, FsResult};
use crate::fspath;

/// Text encodings accepted by the filesystem façade.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum Encoding {
    #[default]
    Utf8,
    Ascii,
    Base64,
    Hex,
    /// Raw single-byte encoding; `binary` is the historical alias.
    Latin1,
}

impl Encoding {
    /// Parse an encoding label. Accepts the aliases `utf-8` and
    /// `binary`.
    pub fn parse(label: &str) -> FsResult<Self> {
        match label {
            "utf8" | "utf-8" => Ok(Encoding::Utf8),
            "ascii" => Ok(Encoding::Ascii),
            "base64" => Ok(Encoding::Base64),
            "hex" => Ok(Encoding::Hex),
            "binary" | "latin1" => Ok(Encoding::Latin1),
            _ => Err(FsError::new(ErrnoKind::Einval).syscall("open").path(label)),
        }
    }
}

/// Builder-side options for [`FsConfig`].
#[derive(Debug, Clone)]
pub struct FsOptions {
    pub root_path: String,
    pub read_only: bool,
    pub encoding: String,
    pub mode: i64,
    pub flags: i64,
    pub recursive: bool,
}

impl Default for FsOptions {
    fn default() -> Self {
        Self {
            root_path: "/".to_string(),
            read_only: false,
            encoding: "utf8".to_string(),
            mode: 0o666,
            flags: 0,
            recursive: false,
        }
    }
}

/// Frozen filesystem configuration.
#[derive(Debug, Clone)]
pub struct FsConfig {
    root_path: String,
    read_only: bool,
    encoding: Encoding,
    mode: u32,
    flags: u32,
    recursive: bool,
}

impl FsConfig {
    /// Validate options and freeze them into a configuration.
    pub fn new(options: FsOptions) -> FsResult<Self> {
        let encoding = Encoding::parse(&options.encoding)?;
        if !(0..=0o7777).contains(&options.mode) {
            return Err(FsError::new(ErrnoKind::Einval)
                .syscall("open")
                .path(format!("mode {:o}", options.mode)));
        }
        if options.flags < 0 {
            return Err(FsError::new(ErrnoKind::Einval)
                .syscall("open")
                .path(format!("flags {}", options.flags)));
        }
        Ok(Self {
            root_path: fspath::normalize(&options.root_path),
            read_only: options.read_only,
            encoding,
            mode: options.mode as u32,
            flags: options.flags as u32,
            recursive: options.recursive,
        })
    }

    pub fn root_path(&self) -> &str {
        &self.root_path
    }

    pub fn read_only(&self) -> bool {
        self.read_only
    }

    pub fn encoding(&self) -> Encoding {
        self.encoding
    }

    pub fn mode(&self) -> u32 {
        self.mode
    }

    pub fn flags(&self) -> u32 {
        self.flags
    }

    pub fn recursive(&self) -> bool {
        self.recursive
    }
}

impl Default for FsConfig {
    fn default() -> Self {
        Self::new(FsOptions::default()).unwrap_or(Self {
            root_path: "/".to_string(),
            read_only: false,
            encoding: Encoding::Utf8,
            mode: 0o666,
            flags: 0,
            recursive: false,
        })
    }
}

/// Tier-manager settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TierConfig {
    /// Master switch; a disabled manager reads but never promotes.
    pub enabled: bool,
    /// Access count at which a cold page becomes a promotion candidate.
    pub access_threshold: u64,
    /// Capacity of the warm tier, in pages.
    pub max_hot_pages: usize,
}

impl Default for TierConfig {
    fn default() -> Self {
        Self { enabled: true, access_threshold: 3, max_hot_pages: 256 }
    }
}

impl TierConfig {
    /// Load from a TOML document.
    pub fn from_toml(text: &str) -> FsResult<Self> {
        toml::from_str(text)
            .map_err(|err| FsError::new(ErrnoKind::Einval).syscall("config").path(err.to_string()))
    }
}

/// Hash algorithms supported by the content-addressable store.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    #[default]
    Sha1,
    Sha256,
}

/// Content-addressable store settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CasConfig {
    /// Storage root the object paths hang off.
    pub base: String,
    /// Directory-fanout prefix length, 1..=8.
    pub prefix_len: usize,
    pub algorithm: HashAlgorithm,
    /// Expected item count for sizing the existence bloom filter.
    pub expected_items: usize,
    /// Target bloom false-positive rate.
    pub false_positive_rate: f64,
    /// TTL of the positive existence cache, in seconds.
    pub positive_ttl_secs: u64,
    /// Capacity of the positive existence cache.
    pub positive_max_entries: u64,
    /// Enable the decompressed-object LRU cache.
    pub object_cache: bool,
    pub object_cache_max_entries: usize,
    pub object_cache_max_bytes: usize,
}

impl Default for CasConfig {
    fn default() -> Self {
        Self {
            base: "objects".to_string(),
            prefix_len: 2,
            algorithm: HashAlgorithm::Sha1,
            expected_items: 100_000,
            false_positive_rate: 0.01,
            positive_ttl_secs: 60,
            positive_max_entries: 10_000,
            object_cache: false,
            object_cache_max_entries: 1024,
            object_cache_max_bytes: 64 * 1024 * 1024,
        }
    }
}

impl CasConfig {
    /// Validate the fanout prefix length.
    pub fn validate(&self) -> FsResult<()> {
        if !(1..=8).contains(&self.prefix_len) {
            return Err(FsError::new(ErrnoKind::Einval)
                .syscall("config")
                .path(format!("prefix_len {}", self.prefix_len)));
        }
        Ok(())
    }

    /// Load from a TOML document.
    pub fn from_toml(text: &str) -> FsResult<Self> {
        let config: Self = toml::from_str(text)
            .map_err(|err| FsError::new(ErrnoKind::Einval).syscall("config").path(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encoding_aliases() {
        assert_eq!(Encoding::parse("utf-8").unwrap(), Encoding::Utf8);
        assert_eq!(Encoding::parse("binary").unwrap(), Encoding::Latin1);
        assert!(Encoding::parse("utf16").is_err());
    }

    #[test]
    fn config_rejects_out_of_range_mode() {
        let options = FsOptions { mode: 0o10000, ..Default::default() };
        let err = FsConfig::new(options).expect_err("mode out of range");
        assert_eq!(err.kind(), ErrnoKind::Einval);
    }

    #[test]
    fn config_normalizes_root() {
        let options = FsOptions { root_path: "srv//data/".to_string(), ..Default::default() };
        let config = FsConfig::new(options).expect("valid config");
        assert_eq!(config.root_path(), "/srv/data");
    }

    #[test]
    fn tier_config_from_toml() {
        let config = TierConfig::from_toml("access_threshold = 5\nmax_hot_pages = 32\n")
            .expect("parse toml");
        assert!(config.enabled);
        assert_eq!(config.access_threshold, 5);
        assert_eq!(config.max_hot_pages, 32);
    }

    #[test]
    fn cas_config_validates_prefix_len() {
        let config = CasConfig { prefix_len: 9, ..Default::default() };
        assert!(config.validate().is_err());
        let config = CasConfig { prefix_len: 1, ..Default::default() };
        assert!(config.validate().is_ok());
    }
}

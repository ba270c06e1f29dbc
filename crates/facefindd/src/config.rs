use facefind_core::{MatchConfig, Price, Pricing, UnresolvedPolicy};
use facefind_store::DEFAULT_RETAINED_FINISHED;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Which message bus the daemon registers on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BusKind {
    System,
    Session,
}

impl BusKind {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "system" => Some(BusKind::System),
            "session" => Some(BusKind::Session),
            _ => None,
        }
    }
}

/// Default price schedule in currency units (e.g. 9.99).
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct PricingConfig {
    pub social: f64,
    pub print: f64,
    pub original: f64,
    pub remix_credit: f64,
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            social: 0.99,
            print: 9.99,
            original: 19.99,
            remix_credit: 1.00,
        }
    }
}

impl PricingConfig {
    pub fn to_pricing(self) -> Pricing {
        Pricing {
            social: to_cents(self.social),
            print: to_cents(self.print),
            original: to_cents(self.original),
            remix_credit: to_cents(self.remix_credit),
        }
    }
}

fn to_cents(amount: f64) -> Price {
    Price((amount.max(0.0) * 100.0).round() as u64)
}

/// Daemon configuration: defaults, then a TOML file, then `FACEFIND_*` env vars.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// V4L2 device path, or an image file to serve as a still camera.
    pub camera_device: String,
    /// Frames discarded after opening the camera (auto-exposure settling).
    pub warmup_frames: usize,
    pub db_path: PathBuf,
    /// Root directory for uploaded photo bytes.
    pub storage_root: PathBuf,
    pub bus: BusKind,
    /// Euclidean distance below which a photo matches.
    pub match_threshold: f32,
    pub descriptor_len: usize,
    /// `include` or `exclude` photos whose descriptor is not computed yet.
    pub unresolved_policy: UnresolvedPolicy,
    pub pricing: PricingConfig,
    /// Bus name of the external embedding extractor.
    pub extractor_service: String,
    /// Finished upload entries kept for `UploadStatus`.
    pub upload_history: usize,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = xdg_dir("XDG_DATA_HOME", ".local/share").join("facefind");
        Self {
            camera_device: "/dev/video0".to_string(),
            warmup_frames: 4,
            db_path: data_dir.join("gallery.db"),
            storage_root: data_dir.join("objects"),
            bus: BusKind::System,
            match_threshold: 0.6,
            descriptor_len: 128,
            unresolved_policy: UnresolvedPolicy::Include,
            pricing: PricingConfig::default(),
            extractor_service: "org.facefind.Extractor1".to_string(),
            upload_history: DEFAULT_RETAINED_FINISHED,
        }
    }
}

impl Config {
    /// Load all three layers from the real environment.
    pub fn load() -> Result<Self, ConfigError> {
        let path = std::env::var("FACEFIND_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| xdg_dir("XDG_CONFIG_HOME", ".config").join("facefind/config.toml"));

        let mut config = if path.exists() {
            tracing::info!(path = %path.display(), "loading config file");
            Self::from_file(&path)?
        } else {
            Self::default()
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Override fields from `FACEFIND_*` variables. Unparseable values are ignored.
    pub fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(v) = var("FACEFIND_CAMERA_DEVICE") {
            self.camera_device = v;
        }
        if let Some(v) = var("FACEFIND_DB_PATH") {
            self.db_path = PathBuf::from(v);
        }
        if let Some(v) = var("FACEFIND_STORAGE_ROOT") {
            self.storage_root = PathBuf::from(v);
        }
        if let Some(v) = var("FACEFIND_EXTRACTOR_SERVICE") {
            self.extractor_service = v;
        }
        parse_into(&var, "FACEFIND_WARMUP_FRAMES", &mut self.warmup_frames);
        parse_into(&var, "FACEFIND_MATCH_THRESHOLD", &mut self.match_threshold);
        parse_into(&var, "FACEFIND_DESCRIPTOR_LEN", &mut self.descriptor_len);
        parse_into(&var, "FACEFIND_UPLOAD_HISTORY", &mut self.upload_history);
        parse_into(&var, "FACEFIND_PRICE_SOCIAL", &mut self.pricing.social);
        parse_into(&var, "FACEFIND_PRICE_PRINT", &mut self.pricing.print);
        parse_into(&var, "FACEFIND_PRICE_ORIGINAL", &mut self.pricing.original);
        parse_into(&var, "FACEFIND_PRICE_REMIX_CREDIT", &mut self.pricing.remix_credit);

        if let Some(bus) = var("FACEFIND_BUS").and_then(|v| BusKind::parse(&v)) {
            self.bus = bus;
        }
        if let Some(policy) = var("FACEFIND_UNRESOLVED_POLICY").and_then(|v| UnresolvedPolicy::parse(&v)) {
            self.unresolved_policy = policy;
        }
    }

    pub fn match_config(&self) -> MatchConfig {
        MatchConfig {
            threshold: self.match_threshold,
            descriptor_len: self.descriptor_len,
            unresolved: self.unresolved_policy,
        }
    }

    pub fn default_pricing(&self) -> Pricing {
        self.pricing.to_pricing()
    }
}

fn parse_into<T: std::str::FromStr>(var: &impl Fn(&str) -> Option<String>, key: &str, slot: &mut T) {
    let Some(raw) = var(key) else { return };
    match raw.parse() {
        Ok(v) => *slot = v,
        Err(_) => tracing::warn!(key, value = %raw, "ignoring unparseable config value"),
    }
}

fn xdg_dir(var: &str, fallback: &str) -> PathBuf {
    std::env::var(var).map(PathBuf::from).unwrap_or_else(|_| {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
        PathBuf::from(home).join(fallback)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.match_config(), MatchConfig::default());
        assert_eq!(config.default_pricing(), Pricing::default());
        assert_eq!(config.bus, BusKind::System);
    }

    #[test]
    fn test_file_layer_keeps_unset_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
camera_device = "/srv/kiosk/selfie.jpg"
bus = "session"
unresolved_policy = "exclude"

[pricing]
print = 12.5
"#,
        )
        .unwrap();

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.camera_device, "/srv/kiosk/selfie.jpg");
        assert_eq!(config.bus, BusKind::Session);
        assert_eq!(config.unresolved_policy, UnresolvedPolicy::Exclude);
        assert_eq!(config.default_pricing().print, Price(1250));
        assert_eq!(config.default_pricing().social, Price(99));
        assert_eq!(config.match_threshold, 0.6);
    }

    #[test]
    fn test_bad_file_is_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "match_threshold = \"close\"").unwrap();
        assert!(matches!(Config::from_file(&path), Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn test_env_overrides_file() {
        let env: HashMap<&str, &str> = [
            ("FACEFIND_MATCH_THRESHOLD", "0.45"),
            ("FACEFIND_DESCRIPTOR_LEN", "512"),
            ("FACEFIND_BUS", "session"),
            ("FACEFIND_UNRESOLVED_POLICY", "exclude"),
            ("FACEFIND_PRICE_ORIGINAL", "25"),
            ("FACEFIND_UPLOAD_HISTORY", "32"),
            ("FACEFIND_WARMUP_FRAMES", "lots"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config.apply_env(|k| env.get(k).map(|v| v.to_string()));

        let m = config.match_config();
        assert_eq!(m.threshold, 0.45);
        assert_eq!(m.descriptor_len, 512);
        assert_eq!(m.unresolved, UnresolvedPolicy::Exclude);
        assert_eq!(config.bus, BusKind::Session);
        assert_eq!(config.default_pricing().original, Price(2500));
        assert_eq!(config.upload_history, 32);
        // Unparseable values leave the previous layer in place.
        assert_eq!(config.warmup_frames, 4);
    }
}

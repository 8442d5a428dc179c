//! Configuration module for the semantic document index.
//!
//! This module provides a layered configuration system that supports:
//! - Default values
//! - TOML configuration file (`.semdex/settings.toml`)
//! - Environment variable overrides
//! - CLI argument overrides
//!
//! # Environment Variables
//!
//! Environment variables must be prefixed with `SEMDEX_` and use double
//! underscores to separate nested levels:
//! - `SEMDEX_INDEX__NPROBE=16` sets `index.nprobe`
//! - `SEMDEX_INGEST__REBUILD_EVERY=0` sets `ingest.rebuild_every`
//! - `SEMDEX_DEBUG=true` sets `debug`

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::SemdexError;
use crate::vector::{DEFAULT_REBUILD_EVERY, VECTOR_DIMENSION_384};

/// Name of the per-workspace configuration directory.
pub const CONFIG_DIR: &str = ".semdex";

/// The only supported distance metric: squared Euclidean.
pub const DISTANCE_METRIC_L2: &str = "l2";

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct Settings {
    /// Version of the configuration schema
    #[serde(default = "default_version")]
    pub version: u32,

    /// Directory holding the record log (relative to the workspace root)
    #[serde(default = "default_data_path")]
    pub data_path: PathBuf,

    /// Global debug logging
    #[serde(default = "default_false")]
    pub debug: bool,

    #[serde(default)]
    pub index: IndexConfig,

    #[serde(default)]
    pub ingest: IngestConfig,

    #[serde(default)]
    pub embedding: EmbeddingConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct IndexConfig {
    /// Vector dimension; must match the embedding model
    #[serde(default = "default_dimension")]
    pub dimension: usize,

    /// Number of clusters per generation
    #[serde(default = "default_nlist")]
    pub nlist: usize,

    /// Clusters scanned per query
    #[serde(default = "default_nprobe")]
    pub nprobe: usize,

    /// Lloyd iteration cap per build
    #[serde(default = "default_max_build_iterations")]
    pub max_build_iterations: usize,

    /// Fraction of changed assignments treated as converged
    #[serde(default = "default_convergence_threshold")]
    pub convergence_threshold: f32,

    /// Larger snapshots train centroids on a sample of this size
    #[serde(default = "default_training_sample_size")]
    pub training_sample_size: usize,

    /// Seed for sampling and centroid initialization
    #[serde(default = "default_seed")]
    pub seed: u64,

    /// Only "l2" (squared Euclidean) is supported
    #[serde(default = "default_distance_metric")]
    pub distance_metric: String,

    /// Scan documents added since the last build exhaustively
    #[serde(default = "default_false")]
    pub search_pending: bool,

    /// Threads used by index builds
    #[serde(default = "default_parallel_threads")]
    pub parallel_threads: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct IngestConfig {
    /// Successful inserts between background rebuilds; 0 disables them
    #[serde(default = "default_rebuild_every")]
    pub rebuild_every: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct EmbeddingConfig {
    /// Model to use for embeddings
    #[serde(default = "default_embedding_model")]
    pub model: String,

    /// Where downloaded models are cached
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,

    /// Show a progress bar while the model downloads
    #[serde(default = "default_true")]
    pub show_download_progress: bool,
}

fn default_version() -> u32 {
    1
}
fn default_data_path() -> PathBuf {
    PathBuf::from(".semdex/data")
}
fn default_true() -> bool {
    true
}
fn default_false() -> bool {
    false
}
fn default_dimension() -> usize {
    VECTOR_DIMENSION_384
}
fn default_nlist() -> usize {
    128
}
fn default_nprobe() -> usize {
    10
}
fn default_max_build_iterations() -> usize {
    20
}
fn default_convergence_threshold() -> f32 {
    0.001
}
fn default_training_sample_size() -> usize {
    16_384
}
fn default_seed() -> u64 {
    42
}
fn default_distance_metric() -> String {
    DISTANCE_METRIC_L2.to_string()
}
fn default_parallel_threads() -> usize {
    num_cpus::get()
}
fn default_rebuild_every() -> usize {
    DEFAULT_REBUILD_EVERY
}
fn default_embedding_model() -> String {
    "AllMiniLML6V2".to_string()
}
fn default_cache_dir() -> PathBuf {
    PathBuf::from(".semdex/models")
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            version: default_version(),
            data_path: default_data_path(),
            debug: false,
            index: IndexConfig::default(),
            ingest: IngestConfig::default(),
            embedding: EmbeddingConfig::default(),
        }
    }
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            dimension: default_dimension(),
            nlist: default_nlist(),
            nprobe: default_nprobe(),
            max_build_iterations: default_max_build_iterations(),
            convergence_threshold: default_convergence_threshold(),
            training_sample_size: default_training_sample_size(),
            seed: default_seed(),
            distance_metric: default_distance_metric(),
            search_pending: false,
            parallel_threads: default_parallel_threads(),
        }
    }
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            rebuild_every: default_rebuild_every(),
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: default_embedding_model(),
            cache_dir: default_cache_dir(),
            show_download_progress: true,
        }
    }
}

impl Settings {
    /// Load configuration from all sources
    pub fn load() -> Result<Self, Box<figment::Error>> {
        // Try to find the workspace root by looking for .semdex directory
        let config_path = Self::find_workspace_config()
            .unwrap_or_else(|| PathBuf::from(CONFIG_DIR).join("settings.toml"));
        Self::load_from(config_path)
    }

    /// Load configuration from a specific file, still honoring `SEMDEX_` variables
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, Box<figment::Error>> {
        Figment::new()
            .merge(Serialized::defaults(Settings::default()))
            .merge(Toml::file(path))
            // Double underscore separates nested levels; single underscores
            // stay inside field names.
            .merge(Env::prefixed("SEMDEX_").map(|key| {
                key.as_str().to_lowercase().replace("__", ".").into()
            }))
            .extract()
            .map_err(Box::new)
    }

    /// Find the workspace config by looking for a .semdex directory
    /// from the current directory up to the root
    fn find_workspace_config() -> Option<PathBuf> {
        Self::workspace_root().map(|root| root.join(CONFIG_DIR).join("settings.toml"))
    }

    /// Get the workspace root directory (where .semdex is located)
    pub fn workspace_root() -> Option<PathBuf> {
        let current = std::env::current_dir().ok()?;

        current
            .ancestors()
            .find(|ancestor| ancestor.join(CONFIG_DIR).is_dir())
            .map(Path::to_path_buf)
    }

    /// Resolves a configured path against the workspace root when relative.
    #[must_use]
    pub fn resolve_path(path: &Path) -> PathBuf {
        if path.is_absolute() {
            return path.to_path_buf();
        }
        match Self::workspace_root() {
            Some(root) => root.join(path),
            None => path.to_path_buf(),
        }
    }

    /// Rejects settings the index cannot run with.
    pub fn validate(&self) -> Result<(), SemdexError> {
        let invalid = |field: &'static str, reason: String| {
            Err(SemdexError::InvalidConfig { field, reason })
        };

        if self.index.dimension == 0 {
            return invalid("index.dimension", "must be greater than zero".to_string());
        }
        if self.index.nlist == 0 {
            return invalid("index.nlist", "must be greater than zero".to_string());
        }
        if self.index.nprobe == 0 {
            return invalid("index.nprobe", "must be greater than zero".to_string());
        }
        if self.index.max_build_iterations == 0 {
            return invalid(
                "index.max_build_iterations",
                "must be greater than zero".to_string(),
            );
        }
        if !(0.0..=1.0).contains(&self.index.convergence_threshold) {
            return invalid(
                "index.convergence_threshold",
                format!("{} is outside 0.0..=1.0", self.index.convergence_threshold),
            );
        }
        if self.index.training_sample_size == 0 {
            return invalid(
                "index.training_sample_size",
                "must be greater than zero".to_string(),
            );
        }
        if self.index.distance_metric != DISTANCE_METRIC_L2 {
            return invalid(
                "index.distance_metric",
                format!(
                    "'{}' is not supported; only \"{DISTANCE_METRIC_L2}\" (squared Euclidean) is available",
                    self.index.distance_metric
                ),
            );
        }
        Ok(())
    }

    /// Save current configuration to file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), Box<dyn std::error::Error>> {
        let parent = path.as_ref().parent().ok_or("Invalid path")?;
        std::fs::create_dir_all(parent)?;

        let toml_string = toml::to_string_pretty(self)?;
        std::fs::write(path, toml_string)?;

        Ok(())
    }

    /// Create a default settings file with helpful comments
    pub fn init_config_file(force: bool) -> Result<PathBuf, Box<dyn std::error::Error>> {
        Self::init_config_file_in(Path::new("."), force)
    }

    /// Like [`init_config_file`](Self::init_config_file), rooted at `root`
    pub fn init_config_file_in(
        root: &Path,
        force: bool,
    ) -> Result<PathBuf, Box<dyn std::error::Error>> {
        let config_path = root.join(CONFIG_DIR).join("settings.toml");

        if !force && config_path.exists() {
            return Err("Configuration file already exists. Use --force to overwrite".into());
        }

        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let template = format!(
            r#"# semdex configuration file

# Version of the configuration schema
version = 1

# Directory holding the record log (relative to the workspace root)
data_path = ".semdex/data"

# Global debug logging
debug = false

[index]
# Vector dimension; must match the embedding model
dimension = {VECTOR_DIMENSION_384}

# Number of clusters per index generation
nlist = 128

# Clusters scanned per query (higher = better recall, slower queries)
nprobe = 10

# Lloyd iteration cap and convergence threshold for index builds
max_build_iterations = 20
convergence_threshold = 0.001

# Larger collections train centroids on a sample of this size
training_sample_size = 16384

# Seed for sampling and centroid initialization
seed = 42

# Only "l2" (squared Euclidean) is supported
distance_metric = "l2"

# Also scan documents added since the last build (exhaustively)
search_pending = false

# Threads used by index builds (defaults to CPU count)
# parallel_threads = {}

[ingest]
# Successful inserts between background rebuilds; 0 disables them
rebuild_every = {DEFAULT_REBUILD_EVERY}

[embedding]
# Model to use for embeddings: AllMiniLML6V2, AllMiniLML12V2, BGESmallENV15
model = "AllMiniLML6V2"

# Where downloaded models are cached
cache_dir = ".semdex/models"

show_download_progress = true
"#,
            num_cpus::get()
        );

        std::fs::write(&config_path, template)?;
        Ok(config_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert_eq!(settings.version, 1);
        assert_eq!(settings.data_path, PathBuf::from(".semdex/data"));
        assert_eq!(settings.index.dimension, 384);
        assert_eq!(settings.index.nlist, 128);
        assert_eq!(settings.index.nprobe, 10);
        assert_eq!(settings.index.max_build_iterations, 20);
        assert_eq!(settings.index.distance_metric, "l2");
        assert!(!settings.index.search_pending);
        assert!(settings.index.parallel_threads > 0);
        assert_eq!(settings.ingest.rebuild_every, 1000);
        assert_eq!(settings.embedding.model, "AllMiniLML6V2");
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_load_from_toml() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("settings.toml");

        let toml_content = r#"
version = 2
debug = true

[index]
nlist = 64
search_pending = true

[ingest]
rebuild_every = 0
"#;

        fs::write(&config_path, toml_content).unwrap();

        let settings = Settings::load_from(&config_path).unwrap();
        assert_eq!(settings.version, 2);
        assert!(settings.debug);
        assert_eq!(settings.index.nlist, 64);
        assert!(settings.index.search_pending);
        assert_eq!(settings.ingest.rebuild_every, 0);
        // Untouched values keep their defaults
        assert_eq!(settings.index.max_build_iterations, 20);
        assert_eq!(settings.embedding.model, "AllMiniLML6V2");
    }

    #[test]
    fn test_ingest_section_only_holds_rebuild_policy() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("settings.toml");
        Settings::default().save(&config_path).unwrap();

        let written = fs::read_to_string(&config_path).unwrap();
        assert!(written.contains("rebuild_every"));
        assert!(!written.contains("max_title_bytes"));

        // Files written before the byte limits became constants still load.
        fs::write(&config_path, "[ingest]\nrebuild_every = 5\nmax_title_bytes = 9\n").unwrap();
        let settings = Settings::load_from(&config_path).unwrap();
        assert_eq!(settings.ingest.rebuild_every, 5);
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let settings = Settings::load_from(temp_dir.path().join("absent.toml")).unwrap();
        assert_eq!(settings.index.nlist, 128);
    }

    #[test]
    fn test_save_settings() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("nested").join("settings.toml");

        let mut settings = Settings::default();
        settings.index.parallel_threads = 2;
        settings.embedding.show_download_progress = false;

        settings.save(&config_path).unwrap();

        let loaded = Settings::load_from(&config_path).unwrap();
        assert_eq!(loaded.index.parallel_threads, 2);
        assert!(!loaded.embedding.show_download_progress);
    }

    #[test]
    fn test_env_overrides_file() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("settings.toml");
        fs::write(&config_path, "debug = false\n[index]\ntraining_sample_size = 100\n").unwrap();

        // Other tests in this module never expect `debug = false` from a loaded file.
        unsafe {
            std::env::set_var("SEMDEX_DEBUG", "true");
        }
        let settings = Settings::load_from(&config_path);
        unsafe {
            std::env::remove_var("SEMDEX_DEBUG");
        }

        let settings = settings.unwrap();
        // Environment variable should override config file
        assert!(settings.debug);
        // Config file value should be used when no env var
        assert_eq!(settings.index.training_sample_size, 100);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut settings = Settings::default();
        settings.index.distance_metric = "cosine".to_string();
        assert!(matches!(
            settings.validate(),
            Err(SemdexError::InvalidConfig {
                field: "index.distance_metric",
                ..
            })
        ));

        let mut settings = Settings::default();
        settings.index.nprobe = 0;
        assert!(settings.validate().is_err());

        let mut settings = Settings::default();
        settings.index.nlist = 0;
        assert!(settings.validate().is_err());

        let mut settings = Settings::default();
        settings.index.convergence_threshold = 1.5;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_init_config_file_template_parses() {
        let temp_dir = TempDir::new().unwrap();
        let path = Settings::init_config_file_in(temp_dir.path(), false).unwrap();

        let loaded = Settings::load_from(&path).unwrap();
        let defaults = Settings::default();
        assert_eq!(loaded.index, defaults.index);
        assert_eq!(loaded.ingest, defaults.ingest);
        assert_eq!(loaded.embedding, defaults.embedding);

        assert!(Settings::init_config_file_in(temp_dir.path(), false).is_err());
        assert!(Settings::init_config_file_in(temp_dir.path(), true).is_ok());
    }
}

//! Runtime configuration types.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::error::RuntimeError;

/// Output format for collector statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatsFormat {
    /// One `[GC] ...` line on stderr
    #[default]
    Human,
    /// A JSON object on stdout
    Json,
}

/// Runtime configuration for the heap and collector.
///
/// Sizes are in live-block units (estimated bytes) unless noted otherwise.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Live-block estimate that triggers the first collection
    pub initial_threshold: usize,
    /// Intern tables never shrink below this bucket count
    pub string_table_floor: usize,
    /// Initial bucket count of the intern tables (rounded up to a power of two)
    pub initial_string_table_size: usize,
    /// Scratch buffer shrinks once its size exceeds twice this
    pub buffer_floor: usize,
    /// Maximum number of stack slots above the top cleared per collection
    pub stack_clear_cap: usize,
    /// Initial stack size of a new thread (slots)
    pub initial_stack: usize,
    /// Hard stack limit per thread (slots)
    pub max_stack: usize,
    /// Maximum number of external reference slots
    pub ref_capacity: usize,
    /// Hard limit on the live-block estimate (None = unlimited)
    pub heap_limit: Option<usize>,
    /// Whether `check_gc` may start a collection (default: true)
    pub gc_enabled: bool,
    /// Print collector statistics after a run
    pub gc_stats: bool,
    pub stats_format: StatsFormat,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            initial_threshold: 64 * 1024,
            string_table_floor: 4,
            initial_string_table_size: 32,
            buffer_floor: 256,
            stack_clear_cap: 250,
            initial_stack: 64,
            max_stack: 1_000_000,
            ref_capacity: 65_536,
            heap_limit: None,
            gc_enabled: true,
            gc_stats: false,
            stats_format: StatsFormat::Human,
        }
    }
}

impl RuntimeConfig {
    /// Load a configuration file (TOML). Missing keys take their defaults.
    pub fn load(path: &Path) -> Result<Self, RuntimeError> {
        let content = fs::read_to_string(path).map_err(|e| {
            RuntimeError::Config(format!("failed to read {}: {}", path.display(), e))
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, RuntimeError> {
        let config: RuntimeConfig = toml::from_str(content)
            .map_err(|e| RuntimeError::Config(format!("failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String, RuntimeError> {
        toml::to_string(self)
            .map_err(|e| RuntimeError::Config(format!("failed to serialize config: {}", e)))
    }

    /// Reject settings the heap cannot operate with.
    pub fn validate(&self) -> Result<(), RuntimeError> {
        if self.string_table_floor == 0 {
            return Err(RuntimeError::Config(
                "string_table_floor must be at least 1".to_string(),
            ));
        }
        if self.initial_stack == 0 || self.initial_stack > self.max_stack {
            return Err(RuntimeError::Config(format!(
                "initial_stack must be between 1 and max_stack ({})",
                self.max_stack
            )));
        }
        if self.ref_capacity > i32::MAX as usize {
            return Err(RuntimeError::Config(
                "ref_capacity does not fit a reference id".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_validate() {
        assert!(RuntimeConfig::default().validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = RuntimeConfig::from_toml("buffer_floor = 64\ngc_stats = true\n").unwrap();
        assert_eq!(config.buffer_floor, 64);
        assert!(config.gc_stats);
        assert_eq!(config.string_table_floor, 4);
        assert_eq!(config.heap_limit, None);
    }

    #[test]
    fn test_stats_format_lowercase() {
        let config = RuntimeConfig::from_toml("stats_format = \"json\"").unwrap();
        assert_eq!(config.stats_format, StatsFormat::Json);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let err = RuntimeConfig::from_toml("string_table_floor = 0").unwrap_err();
        assert!(matches!(err, RuntimeError::Config(_)));

        let err = RuntimeConfig::from_toml("initial_stack = 10\nmax_stack = 5").unwrap_err();
        assert!(err.to_string().contains("initial_stack"));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "initial_threshold = 1024").unwrap();
        writeln!(file, "heap_limit = 4096").unwrap();

        let config = RuntimeConfig::load(file.path()).unwrap();
        assert_eq!(config.initial_threshold, 1024);
        assert_eq!(config.heap_limit, Some(4096));
    }

    #[test]
    fn test_load_missing_file() {
        let err = RuntimeConfig::load(Path::new("/nonexistent/reclaim.toml")).unwrap_err();
        assert!(err.to_string().contains("failed to read"));
    }

    #[test]
    fn test_toml_roundtrip_of_defaults() {
        let text = RuntimeConfig::default().to_toml().unwrap();
        assert_eq!(RuntimeConfig::from_toml(&text).unwrap(), RuntimeConfig::default());
    }
}

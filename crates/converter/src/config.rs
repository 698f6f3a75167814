// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Conversion configuration loaded from TOML files or constructed programmatically.
//!
//! # TOML Format
//! ```toml
//! input_names = ["image"]
//! output_names = ["logits"]
//! log_level = "warning"
//! max_batch_size = 8
//! fp16_mode = true
//! max_workspace_size = "64M"
//! int8_mode = false
//! int8_calib_algorithm = "entropy2"
//! ```

use crate::ConvertError;
use network_ir::{CalibrationAlgorithm, Severity};
use std::fmt;
use std::path::Path;

/// Options for [`crate::convert`].
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct ConversionConfig {
    /// Names for the network inputs; defaults to `input_<i>`.
    pub input_names: Option<Vec<String>>,
    /// Names for the network outputs; defaults to `output_<i>`.
    pub output_names: Option<Vec<String>>,
    /// Builder verbosity: `"error"`, `"warning"`, `"info"`, `"verbose"`, ...
    pub log_level: String,
    pub max_batch_size: usize,
    pub fp16_mode: bool,
    /// Workspace ceiling (human-readable, e.g. `"32M"`).
    pub max_workspace_size: String,
    pub strict_type_constraints: bool,
    /// Keep the traced network on the compiled module for inspection.
    pub keep_network: bool,
    pub int8_mode: bool,
    pub int8_calib_algorithm: CalibrationAlgorithm,
    pub int8_calib_batch_size: usize,
    /// INT8 with ranges taken from the network instead of a calibration run.
    pub qat_mode: bool,
    /// Round-trip the traced network through the graph exchange format
    /// before building.
    pub use_exchange_format: bool,
}

impl Default for ConversionConfig {
    fn default() -> Self {
        Self {
            input_names: None,
            output_names: None,
            log_level: "error".to_string(),
            max_batch_size: 1,
            fp16_mode: false,
            max_workspace_size: "32M".to_string(),
            strict_type_constraints: false,
            keep_network: true,
            int8_mode: false,
            int8_calib_algorithm: CalibrationAlgorithm::Entropy2,
            int8_calib_batch_size: 1,
            qat_mode: false,
            use_exchange_format: false,
        }
    }
}

impl ConversionConfig {
    /// Loads configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, ConvertError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConvertError::Config(format!("cannot read config '{}': {e}", path.display())))?;
        Self::from_toml(&content)
    }

    /// Parses configuration from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self, ConvertError> {
        toml::from_str(toml_str).map_err(|e| ConvertError::Config(format!("TOML parse error: {e}")))
    }

    /// Serialises configuration to TOML.
    pub fn to_toml(&self) -> Result<String, ConvertError> {
        toml::to_string_pretty(self).map_err(|e| ConvertError::Config(format!("TOML serialise error: {e}")))
    }

    /// Parses the workspace string into a [`WorkspaceSize`].
    pub fn workspace_size(&self) -> Result<WorkspaceSize, ConvertError> {
        WorkspaceSize::parse(&self.max_workspace_size)
    }

    /// Maps `log_level` onto the builder's severity scale.
    pub fn severity(&self) -> Result<Severity, ConvertError> {
        match self.log_level.to_lowercase().as_str() {
            "internal_error" => Ok(Severity::InternalError),
            "error" => Ok(Severity::Error),
            "warning" | "warn" => Ok(Severity::Warning),
            "info" => Ok(Severity::Info),
            "verbose" | "debug" | "trace" => Ok(Severity::Verbose),
            other => Err(ConvertError::Config(format!(
                "unknown log level '{other}'; expected 'error', 'warning', 'info' or 'verbose'"
            ))),
        }
    }

    /// Input names, filling in `input_<i>` when none were given.
    pub fn resolve_input_names(&self, count: usize) -> Result<Vec<String>, ConvertError> {
        resolve_names(self.input_names.as_deref(), "input", count)
    }

    /// Output names, filling in `output_<i>` when none were given.
    pub fn resolve_output_names(&self, count: usize) -> Result<Vec<String>, ConvertError> {
        resolve_names(self.output_names.as_deref(), "output", count)
    }

    /// Checks option combinations that can never build.
    pub fn validate(&self) -> Result<(), ConvertError> {
        if self.max_batch_size == 0 {
            return Err(ConvertError::Config("max_batch_size must be at least 1".into()));
        }
        if self.int8_mode && !self.qat_mode && self.int8_calib_batch_size == 0 {
            return Err(ConvertError::Config("int8_calib_batch_size must be at least 1".into()));
        }
        self.workspace_size()?;
        self.severity()?;
        Ok(())
    }
}

fn resolve_names(
    given: Option<&[String]>,
    prefix: &str,
    count: usize,
) -> Result<Vec<String>, ConvertError> {
    match given {
        Some(names) if names.len() == count => Ok(names.to_vec()),
        Some(names) => Err(ConvertError::Config(format!(
            "{} {prefix} names given for {count} {prefix}s",
            names.len()
        ))),
        None => Ok((0..count).map(|i| format!("{prefix}_{i}")).collect()),
    }
}

/// An upper bound on builder scratch memory.
///
/// # Parsing
/// - `"32M"` or `"32MB"` → 32 × 1024² bytes
/// - `"1G"` or `"1GB"` → 1 × 1024³ bytes
/// - `"512K"` or `"512KB"` → 512 × 1024 bytes
/// - `"33554432"` → raw byte count
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkspaceSize {
    bytes: usize,
}

impl WorkspaceSize {
    pub fn from_bytes(bytes: usize) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> usize {
        self.bytes
    }

    /// Parses a human-readable size. Case-insensitive.
    pub fn parse(s: &str) -> Result<Self, ConvertError> {
        let s = s.trim();
        let upper = s.to_uppercase();
        let (num_str, multiplier) = if let Some(n) = upper.strip_suffix("GB").or_else(|| upper.strip_suffix('G')) {
            (n, 1usize << 30)
        } else if let Some(n) = upper.strip_suffix("MB").or_else(|| upper.strip_suffix('M')) {
            (n, 1 << 20)
        } else if let Some(n) = upper.strip_suffix("KB").or_else(|| upper.strip_suffix('K')) {
            (n, 1 << 10)
        } else if let Some(n) = upper.strip_suffix('B') {
            (n, 1)
        } else {
            (upper.as_str(), 1)
        };

        let value: usize = num_str.trim().parse().map_err(|_| {
            ConvertError::Config(format!(
                "invalid workspace size '{s}': expected a number with an optional K, M or G suffix"
            ))
        })?;
        let bytes = value
            .checked_mul(multiplier)
            .ok_or_else(|| ConvertError::Config(format!("workspace size overflow: '{s}'")))?;
        if bytes == 0 {
            return Err(ConvertError::Config("workspace size must be non-zero".into()));
        }
        Ok(Self { bytes })
    }
}

impl fmt::Display for WorkspaceSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const GB: usize = 1 << 30;
        const MB: usize = 1 << 20;
        const KB: usize = 1 << 10;
        match self.bytes {
            b if b >= GB && b % GB == 0 => write!(f, "{} GB", b / GB),
            b if b >= MB && b % MB == 0 => write!(f, "{} MB", b / MB),
            b if b >= KB && b % KB == 0 => write!(f, "{} KB", b / KB),
            b => write!(f, "{b} B"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default() {
        let c = ConversionConfig::default();
        assert_eq!(c.max_batch_size, 1);
        assert_eq!(c.workspace_size().unwrap().as_bytes(), 1 << 25);
        assert_eq!(c.severity().unwrap(), Severity::Error);
        assert_eq!(c.int8_calib_algorithm, CalibrationAlgorithm::Entropy2);
        assert!(c.keep_network);
        assert!(c.validate().is_ok());
    }

    #[test]
    fn test_parse_workspace() {
        assert_eq!(WorkspaceSize::parse("32M").unwrap().as_bytes(), 1 << 25);
        assert_eq!(WorkspaceSize::parse("1gb").unwrap().as_bytes(), 1 << 30);
        assert_eq!(WorkspaceSize::parse(" 4K ").unwrap().as_bytes(), 4096);
        assert_eq!(WorkspaceSize::parse("100").unwrap().as_bytes(), 100);
        assert!(WorkspaceSize::parse("").is_err());
        assert!(WorkspaceSize::parse("lots").is_err());
        assert!(WorkspaceSize::parse("0M").is_err());
    }

    #[test]
    fn test_display() {
        assert_eq!(WorkspaceSize::from_bytes(1 << 25).to_string(), "32 MB");
        assert_eq!(WorkspaceSize::from_bytes(100).to_string(), "100 B");
    }

    #[test]
    fn test_from_toml() {
        let toml = r#"
input_names = ["image"]
log_level = "warning"
max_batch_size = 4
fp16_mode = true
int8_calib_algorithm = "min_max"
"#;
        let c = ConversionConfig::from_toml(toml).unwrap();
        assert_eq!(c.input_names, Some(vec!["image".to_string()]));
        assert_eq!(c.severity().unwrap(), Severity::Warning);
        assert_eq!(c.max_batch_size, 4);
        assert!(c.fp16_mode);
        assert_eq!(c.int8_calib_algorithm, CalibrationAlgorithm::MinMax);
        // Unset keys keep their defaults.
        assert_eq!(c.max_workspace_size, "32M");
    }

    #[test]
    fn test_to_toml_roundtrip() {
        let c = ConversionConfig {
            output_names: Some(vec!["y".into()]),
            int8_mode: true,
            ..Default::default()
        };
        let back = ConversionConfig::from_toml(&c.to_toml().unwrap()).unwrap();
        assert_eq!(back, c);
    }

    #[test]
    fn test_resolve_names() {
        let c = ConversionConfig::default();
        assert_eq!(c.resolve_input_names(2).unwrap(), vec!["input_0", "input_1"]);
        let c = ConversionConfig {
            output_names: Some(vec!["a".into()]),
            ..Default::default()
        };
        assert!(c.resolve_output_names(2).is_err());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let c = ConversionConfig {
            log_level: "chatty".into(),
            ..Default::default()
        };
        assert!(c.validate().is_err());
        let c = ConversionConfig {
            max_batch_size: 0,
            ..Default::default()
        };
        assert!(c.validate().is_err());
    }
}

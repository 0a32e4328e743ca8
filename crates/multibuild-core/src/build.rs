//! Build-domain types: output variants, build configuration, and
//! per-variant results.

use crate::BuildId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// An output variant of a build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VariantKind {
    /// Universal module, consumable from both module systems and the browser.
    Umd,
    /// Pure ES module.
    Esm,
    /// CommonJS module.
    Cjs,
}

impl VariantKind {
    /// All known variants, in default generation order.
    pub const ALL: [VariantKind; 3] = [VariantKind::Umd, VariantKind::Esm, VariantKind::Cjs];

    /// Scheduling priority. The universal variant ranks above the pure
    /// module-system variants, reflecting typical consumption order.
    pub fn priority(self) -> u8 {
        match self {
            VariantKind::Umd => 2,
            VariantKind::Esm | VariantKind::Cjs => 1,
        }
    }

    /// Output subdirectory name for this variant.
    pub fn dir_name(self) -> &'static str {
        match self {
            VariantKind::Umd => "umd",
            VariantKind::Esm => "esm",
            VariantKind::Cjs => "cjs",
        }
    }

    /// Output file extension for this variant.
    pub fn extension(self) -> &'static str {
        match self {
            VariantKind::Umd => "js",
            VariantKind::Esm => "mjs",
            VariantKind::Cjs => "cjs",
        }
    }

    pub fn as_str(self) -> &'static str {
        self.dir_name()
    }
}

impl fmt::Display for VariantKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Build configuration, as consumed by the host build function.
///
/// The scheduler never interprets the contents beyond variant fan-out;
/// everything else is passed through opaquely.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildConfig {
    /// Package/bundle name, substituted into the file pattern.
    pub name: String,

    /// Entry point of the build.
    pub entry: PathBuf,

    /// Root output directory. Specialized copies get a per-variant
    /// subdirectory under it.
    pub out_dir: PathBuf,

    /// Enabled output variants. Order is preserved as the tie-break for
    /// equal-priority scheduling.
    pub variants: Vec<VariantKind>,

    /// File-naming pattern; `[name]`, `[format]`, and `[ext]` are
    /// substituted per variant.
    pub file_pattern: String,

    /// Module format of a specialized copy. `None` on the root config.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<VariantKind>,

    /// Emit sourcemaps. Opaque to the engine.
    pub sourcemap: bool,

    /// Minify output. Opaque to the engine.
    pub minify: bool,
}

impl BuildConfig {
    /// Create a config with the default file pattern and no variants
    /// enabled.
    pub fn new(name: impl Into<String>, entry: impl Into<PathBuf>, out_dir: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            entry: entry.into(),
            out_dir: out_dir.into(),
            variants: Vec::new(),
            file_pattern: "[name].[format].[ext]".to_string(),
            format: None,
            sourcemap: false,
            minify: false,
        }
    }

    /// Builder method to enable an output variant.
    pub fn with_variant(mut self, variant: VariantKind) -> Self {
        if !self.variants.contains(&variant) {
            self.variants.push(variant);
        }
        self
    }

    /// Produce the deep, independent copy of this configuration
    /// specialized for one variant: distinct output location, module
    /// format, and resolved file name.
    pub fn specialize(&self, variant: VariantKind) -> BuildConfig {
        let mut config = self.clone();
        config.format = Some(variant);
        config.out_dir = self.out_dir.join(variant.dir_name());
        config.variants = vec![variant];
        config
    }

    /// Resolve the output file name for a specialized config. Falls back
    /// to `esm` conventions when no format is set.
    pub fn output_file(&self) -> String {
        let format = self.format.unwrap_or(VariantKind::Esm);
        self.file_pattern
            .replace("[name]", &self.name)
            .replace("[format]", format.dir_name())
            .replace("[ext]", format.extension())
    }
}

/// One scheduler-level unit of work: build a single variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildTask {
    /// Unique build task identifier.
    pub id: BuildId,

    /// Variant this task produces.
    pub variant: VariantKind,

    /// Variant-specialized configuration (a deep copy, never shared).
    pub config: BuildConfig,

    /// Scheduling priority; higher runs earlier.
    pub priority: u8,

    /// When the task was generated.
    pub created_at: DateTime<Utc>,
}

impl BuildTask {
    /// Create a build task for a variant with its specialized config.
    pub fn new(variant: VariantKind, config: BuildConfig) -> Self {
        Self {
            id: BuildId::generate(),
            variant,
            config,
            priority: variant.priority(),
            created_at: Utc::now(),
        }
    }
}

/// Successful per-variant build result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariantResult {
    /// Variant this result belongs to.
    pub variant: VariantKind,

    /// Opaque result payload from the host build function.
    pub output: Value,

    /// Measured wall-clock duration of the build.
    pub duration: Duration,

    /// Index of the execution unit that ran the build, when it was
    /// dispatched through the pool.
    pub unit: Option<usize>,
}

/// Structured per-variant failure entry. Produced instead of letting a
/// variant's error abort its siblings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[error("variant '{variant}' failed: {error}")]
pub struct BuildFailure {
    /// Variant whose build failed.
    pub variant: VariantKind,

    /// Error text from the host build function or the pool.
    pub error: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_ranks_umd_first() {
        assert!(VariantKind::Umd.priority() > VariantKind::Esm.priority());
        assert_eq!(VariantKind::Esm.priority(), VariantKind::Cjs.priority());
    }

    #[test]
    fn test_specialize_is_independent() {
        let root = BuildConfig::new("mylib", "src/index.ts", "dist")
            .with_variant(VariantKind::Esm)
            .with_variant(VariantKind::Cjs);

        let esm = root.specialize(VariantKind::Esm);
        let cjs = root.specialize(VariantKind::Cjs);

        assert_eq!(esm.format, Some(VariantKind::Esm));
        assert_eq!(esm.out_dir, PathBuf::from("dist/esm"));
        assert_eq!(cjs.out_dir, PathBuf::from("dist/cjs"));
        assert_ne!(esm, cjs);
        // Root config is untouched.
        assert_eq!(root.format, None);
        assert_eq!(root.out_dir, PathBuf::from("dist"));
    }

    #[test]
    fn test_output_file_pattern() {
        let config = BuildConfig::new("mylib", "src/index.ts", "dist");
        assert_eq!(config.specialize(VariantKind::Esm).output_file(), "mylib.esm.mjs");
        assert_eq!(config.specialize(VariantKind::Umd).output_file(), "mylib.umd.js");
        assert_eq!(config.specialize(VariantKind::Cjs).output_file(), "mylib.cjs.cjs");
    }

    #[test]
    fn test_with_variant_dedupes() {
        let config = BuildConfig::new("mylib", "src/index.ts", "dist")
            .with_variant(VariantKind::Esm)
            .with_variant(VariantKind::Esm);
        assert_eq!(config.variants.len(), 1);
    }
}

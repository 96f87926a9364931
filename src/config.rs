//! Engine configuration.
//!
//! Resolved once at startup (defaults or command line flags) and shared
//! through `ExecutionContext` as an `Arc<EngineConfig>`.

use anyhow::{bail, Result};
use std::fmt;
use std::str::FromStr;

/// Default upper bound on rows evaluated per call into a filter routine.
pub const DEFAULT_MAX_FRAME_ROWS: usize = 1 << 20;

/// Administrative selector for the filter execution path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum JitMode {
    /// Vectorized when the platform supports it, otherwise the best available path
    #[default]
    Auto,
    /// Always run the vectorized routine when one could be built
    ForceVectorized,
    /// Always run the scalar interpreter
    ForceScalar,
    /// Run the compiled routine without its SIMD loop
    CompiledScalar,
}

impl JitMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            JitMode::Auto => "auto",
            JitMode::ForceVectorized => "vectorized",
            JitMode::ForceScalar => "scalar",
            JitMode::CompiledScalar => "compiled-scalar",
        }
    }

    pub fn all() -> [JitMode; 4] {
        [
            JitMode::Auto,
            JitMode::ForceVectorized,
            JitMode::ForceScalar,
            JitMode::CompiledScalar,
        ]
    }
}

impl fmt::Display for JitMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JitMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "auto" => Ok(JitMode::Auto),
            "vectorized" | "simd" => Ok(JitMode::ForceVectorized),
            "scalar" => Ok(JitMode::ForceScalar),
            "compiled-scalar" => Ok(JitMode::CompiledScalar),
            other => Err(format!(
                "unknown jit mode '{}', expected auto, vectorized, scalar or compiled-scalar",
                other
            )),
        }
    }
}

/// Engine-wide settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Default path selector; an execution context may override it
    pub jit_mode: JitMode,
    /// When false no native code is generated and every filter is interpreted
    pub jit_enabled: bool,
    /// Share compiled routines between factories built for the same filter
    pub cache_compiled_filters: bool,
    /// Frames larger than this are evaluated in slices of at most this many rows
    pub max_frame_rows: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            jit_mode: JitMode::Auto,
            jit_enabled: true,
            cache_compiled_filters: true,
            max_frame_rows: DEFAULT_MAX_FRAME_ROWS,
        }
    }
}

impl EngineConfig {
    pub fn with_jit_mode(mut self, jit_mode: JitMode) -> Self {
        self.jit_mode = jit_mode;
        self
    }

    pub fn with_jit_enabled(mut self, jit_enabled: bool) -> Self {
        self.jit_enabled = jit_enabled;
        self
    }

    pub fn with_cache(mut self, cache_compiled_filters: bool) -> Self {
        self.cache_compiled_filters = cache_compiled_filters;
        self
    }

    pub fn with_max_frame_rows(mut self, max_frame_rows: usize) -> Self {
        self.max_frame_rows = max_frame_rows;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_frame_rows == 0 {
            bail!("max_frame_rows must be positive");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.jit_mode, JitMode::Auto);
        assert!(config.jit_enabled);
        assert!(config.cache_compiled_filters);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builders() {
        let config = EngineConfig::default()
            .with_jit_mode(JitMode::ForceScalar)
            .with_jit_enabled(false)
            .with_cache(false)
            .with_max_frame_rows(0);
        assert_eq!(config.jit_mode, JitMode::ForceScalar);
        assert!(!config.jit_enabled);
        assert!(!config.cache_compiled_filters);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_jit_mode_parse() {
        assert_eq!("auto".parse::<JitMode>(), Ok(JitMode::Auto));
        assert_eq!("Vectorized".parse::<JitMode>(), Ok(JitMode::ForceVectorized));
        assert_eq!("scalar".parse::<JitMode>(), Ok(JitMode::ForceScalar));
        assert_eq!(
            "compiled-scalar".parse::<JitMode>(),
            Ok(JitMode::CompiledScalar)
        );
        assert!("fast".parse::<JitMode>().is_err());

        for mode in JitMode::all() {
            assert_eq!(mode.to_string().parse::<JitMode>(), Ok(mode));
        }
    }
}

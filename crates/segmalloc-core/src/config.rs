//! Heap configuration.
//!
//! Settings can be built directly or read from the environment:
//! - `SEGMALLOC_MODE`: `strict` (default) or `hardened`. Strict trusts the
//!   caller contract; hardened checks request sizes and freed pointers and
//!   reports violations instead of corrupting the free lists.
//! - `SEGMALLOC_COALESCE`: `adjacent` (default) or `off`. `off` reproduces
//!   the plain split-only behaviour where freed neighbours never merge.
//! - `SEGMALLOC_RELEASE_EMPTY`: `1`/`true` returns pages that become entirely
//!   free to the page source.
//! - `SEGMALLOC_LOG`: `1`/`true` records lifecycle log entries.

/// How much the heap checks its callers.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SafetyLevel {
    /// Contract violations are undefined behaviour; no checks on the hot path.
    #[default]
    Strict,
    /// Sizes and freed pointers are validated and rejected with an error.
    Hardened,
}

impl SafetyLevel {
    /// Parse from string (case-insensitive). Unknown values fall back to
    /// strict.
    #[must_use]
    pub fn from_str_loose(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "hardened" | "checked" | "debug" => Self::Hardened,
            _ => Self::Strict,
        }
    }

    #[must_use]
    pub const fn checks_enabled(self) -> bool {
        matches!(self, Self::Hardened)
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Strict => "strict",
            Self::Hardened => "hardened",
        }
    }
}

/// Whether freed blocks merge with free physical neighbours.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CoalescePolicy {
    /// Freed blocks are filed as-is.
    Off,
    /// Freed blocks absorb free blocks directly before and after them.
    #[default]
    Adjacent,
}

impl CoalescePolicy {
    /// Parse from string (case-insensitive). Unknown values fall back to
    /// adjacent coalescing.
    #[must_use]
    pub fn from_str_loose(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "off" | "none" | "0" | "false" | "disabled" => Self::Off,
            _ => Self::Adjacent,
        }
    }

    #[must_use]
    pub const fn enabled(self) -> bool {
        matches!(self, Self::Adjacent)
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Off => "off",
            Self::Adjacent => "adjacent",
        }
    }
}

/// Knobs for one heap instance.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct HeapConfig {
    pub safety: SafetyLevel,
    pub coalesce: CoalescePolicy,
    /// Return a page to the source once a single free block spans it.
    pub release_empty_pages: bool,
    /// Record lifecycle log entries.
    pub lifecycle_logging: bool,
}

impl HeapConfig {
    /// Builds a config from `SEGMALLOC_*` environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a config from an arbitrary key lookup.
    pub fn from_lookup(mut lookup: impl FnMut(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            safety: lookup("SEGMALLOC_MODE")
                .map(|v| SafetyLevel::from_str_loose(&v))
                .unwrap_or(defaults.safety),
            coalesce: lookup("SEGMALLOC_COALESCE")
                .map(|v| CoalescePolicy::from_str_loose(&v))
                .unwrap_or(defaults.coalesce),
            release_empty_pages: lookup("SEGMALLOC_RELEASE_EMPTY")
                .map(|v| parse_flag(&v))
                .unwrap_or(defaults.release_empty_pages),
            lifecycle_logging: lookup("SEGMALLOC_LOG")
                .map(|v| parse_flag(&v))
                .unwrap_or(defaults.lifecycle_logging),
        }
    }

    #[must_use]
    pub fn with_safety(mut self, safety: SafetyLevel) -> Self {
        self.safety = safety;
        self
    }

    #[must_use]
    pub fn with_coalesce(mut self, coalesce: CoalescePolicy) -> Self {
        self.coalesce = coalesce;
        self
    }

    #[must_use]
    pub fn with_release_empty_pages(mut self, release: bool) -> Self {
        self.release_empty_pages = release;
        self
    }

    #[must_use]
    pub fn with_lifecycle_logging(mut self, enabled: bool) -> Self {
        self.lifecycle_logging = enabled;
        self
    }
}

fn parse_flag(raw: &str) -> bool {
    matches!(
        raw.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn parse_safety_levels() {
        assert_eq!(SafetyLevel::from_str_loose("strict"), SafetyLevel::Strict);
        assert_eq!(SafetyLevel::from_str_loose("STRICT"), SafetyLevel::Strict);
        assert_eq!(
            SafetyLevel::from_str_loose("hardened"),
            SafetyLevel::Hardened
        );
        assert_eq!(
            SafetyLevel::from_str_loose(" Checked "),
            SafetyLevel::Hardened
        );
        assert_eq!(SafetyLevel::from_str_loose("bogus"), SafetyLevel::Strict);
    }

    #[test]
    fn parse_coalesce_policy() {
        assert_eq!(CoalescePolicy::from_str_loose("off"), CoalescePolicy::Off);
        assert_eq!(CoalescePolicy::from_str_loose("NONE"), CoalescePolicy::Off);
        assert_eq!(
            CoalescePolicy::from_str_loose("adjacent"),
            CoalescePolicy::Adjacent
        );
        assert_eq!(
            CoalescePolicy::from_str_loose("bogus"),
            CoalescePolicy::Adjacent
        );
    }

    #[test]
    fn default_is_strict_and_coalescing() {
        let config = HeapConfig::default();
        assert_eq!(config.safety, SafetyLevel::Strict);
        assert_eq!(config.coalesce, CoalescePolicy::Adjacent);
        assert!(!config.release_empty_pages);
        assert!(!config.lifecycle_logging);
    }

    #[test]
    fn checks_only_in_hardened() {
        assert!(!SafetyLevel::Strict.checks_enabled());
        assert!(SafetyLevel::Hardened.checks_enabled());
    }

    #[test]
    fn lookup_overrides_defaults() {
        let env: HashMap<&str, &str> = [
            ("SEGMALLOC_MODE", "hardened"),
            ("SEGMALLOC_COALESCE", "off"),
            ("SEGMALLOC_RELEASE_EMPTY", "yes"),
            ("SEGMALLOC_LOG", "0"),
        ]
        .into_iter()
        .collect();
        let config = HeapConfig::from_lookup(|key| env.get(key).map(|v| v.to_string()));
        assert_eq!(
            config,
            HeapConfig {
                safety: SafetyLevel::Hardened,
                coalesce: CoalescePolicy::Off,
                release_empty_pages: true,
                lifecycle_logging: false,
            }
        );
    }

    #[test]
    fn empty_lookup_gives_defaults() {
        assert_eq!(HeapConfig::from_lookup(|_| None), HeapConfig::default());
    }
}

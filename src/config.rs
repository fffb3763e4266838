use std::env;

pub const ENV_SCAN_LINES: &str = "DWSCAN_SCAN_LINES";
pub const ENV_VERIFY: &str = "DWSCAN_VERIFY";

/// Switches for the optional stages of an analysis.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AnalysisOptions {
    /// Walk `.debug_line` for tables no compilation unit points at.
    pub scan_unreferenced_line_tables: bool,
    /// Check that the compressed trees reproduce every per-file set.
    pub verify_compression: bool,
}

impl Default for AnalysisOptions {
    fn default() -> Self {
        Self {
            scan_unreferenced_line_tables: true,
            verify_compression: true,
        }
    }
}

impl AnalysisOptions {
    /// Defaults, overridden by `DWSCAN_SCAN_LINES` and `DWSCAN_VERIFY`.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            scan_unreferenced_line_tables: lookup(ENV_SCAN_LINES)
                .map_or(defaults.scan_unreferenced_line_tables, |v| is_enabled(&v)),
            verify_compression: lookup(ENV_VERIFY).map_or(defaults.verify_compression, |v| is_enabled(&v)),
        }
    }
}

fn is_enabled(value: &str) -> bool {
    !matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "0" | "false" | "no" | "off"
    )
}

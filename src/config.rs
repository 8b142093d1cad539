// Copyright (c) 2025 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

use std::fs;
use std::path::Path;

use serde::Deserialize;

use crate::error::ConfigError;

/// Parameters governing binarization and candidate filtering. The defaults
/// are the instrument's stock settings.
///
/// When loaded from TOML every field is optional and unrecognized keys are
/// ignored, so a settings file shared with other instrument modules can be
/// passed in as-is.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct ContourConfig {
    /// Selects adaptive (local mean) thresholding instead of the fixed
    /// `threshold_value`.
    pub adaptive: bool,

    /// Pixels at or above this value are foreground when `adaptive` is false.
    pub threshold_value: i32,

    /// Side of the square neighborhood used for the local mean. See
    /// [ContourConfig::effective_blocksize()].
    pub adaptive_blocksize: i32,

    /// Bias subtracted from the local mean: a pixel is foreground when it is
    /// at least `local_mean - adaptive_shift`. Negative values demand that
    /// the pixel be brighter than its neighborhood.
    ///
    /// The instrument's earlier software used the opposite sign (foreground
    /// when at least `local_mean + shift`). Settings carried over from it
    /// must have this value negated; with the stock 3.0 left as-is, nearly
    /// every background pixel becomes foreground in adaptive mode.
    pub adaptive_shift: f64,

    /// Boundary curves with fewer vertices than this are skipped.
    pub contour_min_size: i32,

    /// Inclusive area window, in square pixels of the boundary polygon.
    pub contour_min_area: i32,
    pub contour_max_area: i32,

    /// Value of pi used by the roundness metric. Only deployments needing
    /// parity with an instrument that shipped a rounded constant should
    /// change this.
    pub roundness_pi: f64,
}

impl Default for ContourConfig {
    fn default() -> Self {
        ContourConfig{adaptive: false,
                      threshold_value: 1,
                      adaptive_blocksize: 3,
                      adaptive_shift: 3.0,
                      contour_min_size: 1,
                      contour_min_area: 0,
                      contour_max_area: 3,
                      roundness_pi: std::f64::consts::PI}
    }
}

impl ContourConfig {
    /// The blocksize actually used: the configured value coerced to an odd
    /// integer no smaller than 3.
    pub fn effective_blocksize(&self) -> u32 {
        let mut block = self.adaptive_blocksize.max(3) as u32;
        if block % 2 == 0 {
            block += 1;
        }
        block
    }

    pub fn from_toml_str(text: &str) -> Result<ContourConfig, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    pub fn from_file(path: &Path) -> Result<ContourConfig, ConfigError> {
        let text = fs::read_to_string(path)?;
        ContourConfig::from_toml_str(&text)
    }
}

// mod tests.

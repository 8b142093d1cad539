// Copyright (c) 2025 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

use thiserror::Error;

/// Failures that abort processing of a single frame. Candidate rejection
/// during filtering is normal operation and never shows up here.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum HitError {
    /// The frame is not HxW or HxWx3, or its data length disagrees with its
    /// shape.
    #[error("invalid frame shape {shape:?} for {data_len} samples; \
             expected HxW or HxWx3")]
    InvalidFrameShape { shape: Vec<usize>, data_len: usize },

    /// The caller's accumulator was sized for a different frame. Values are
    /// (width, height).
    #[error("accumulator is {actual:?} but frame is {expected:?} (WxH)")]
    AccumulatorShapeMismatch { expected: (u32, u32), actual: (u32, u32) },
}

/// Failures loading a [crate::config::ContourConfig] from a file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("could not parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

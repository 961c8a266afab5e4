use crate::error::{InputError, io_err};
use serde::Deserialize;
use std::path::Path;

/// Coordinate reference of raw graph and point input.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
pub enum InputCrs {
    /// Longitude/latitude degrees (EPSG:4326). Reprojected to a metric plane.
    #[default]
    Geographic,
    /// Already planar and metric; used as-is.
    Projected,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct NkdvConfig {
    /// Kernel bandwidth in metres.
    pub bandwidth: f64,
    /// Target lixel length in metres.
    pub lixel_length: f64,
    /// Density method selector, passed to the engine untouched.
    pub method: u32,
    /// Kernel type selector, passed to the engine untouched.
    pub kernel_type: u32,
    /// Intersections closer than this (metres) are merged into one node.
    pub consolidation_tolerance: f64,
    pub input_crs: InputCrs,
}

impl Default for NkdvConfig {
    fn default() -> Self {
        Self {
            bandwidth: 500.0,
            lixel_length: 20.0,
            method: 3,
            kernel_type: 2,
            consolidation_tolerance: 0.5,
            input_crs: InputCrs::Geographic,
        }
    }
}

impl NkdvConfig {
    pub fn from_ron_file(path: &Path) -> Result<Self, InputError> {
        let text = std::fs::read_to_string(path).map_err(|e| io_err!(InputError, path, e))?;
        ron::from_str(&text).map_err(|source| InputError::Config {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn validate(&self) -> Result<(), InputError> {
        if !self.bandwidth.is_finite() || self.bandwidth <= 0.0 {
            return Err(InputError::InvalidConfig(format!(
                "bandwidth must be a positive distance, got {}",
                self.bandwidth
            )));
        }
        if !self.lixel_length.is_finite() || self.lixel_length <= 0.0 {
            return Err(InputError::InvalidConfig(format!(
                "lixel length must be a positive distance, got {}",
                self.lixel_length
            )));
        }
        if !self.consolidation_tolerance.is_finite() || self.consolidation_tolerance < 0.0 {
            return Err(InputError::InvalidConfig(format!(
                "consolidation tolerance must be non-negative, got {}",
                self.consolidation_tolerance
            )));
        }
        Ok(())
    }
}

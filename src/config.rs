//! Simulation configuration
//!
//! A plain value object handed to the solver on every initialize and tick.
//! Loaded from TOML by hosts that keep their settings on disk.

use std::path::Path;

use glam::{Vec3, Vec4};
use serde::{Deserialize, Serialize};

/// Physical and numerical parameters of the fire solver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FireSimulationConfig {
    /// World units covered by one velocity cell before snapping.
    pub cell_size: f32,
    /// Upper bound for the dominant velocity axis.
    pub max_resolution: i32,
    /// Fluid cells per velocity cell along each axis.
    pub fluid_resolution_scale: i32,
    pub num_pressure_iterations: i32,

    // Fluid advection
    pub fluid_dissipation: Vec4,
    pub fluid_decay: Vec4,

    // Velocity advection & buoyancy
    pub dissipation: Vec3,
    pub buoyancy: f32,
    pub density_weight: f32,
    pub ambient_temperature: f32,
    /// Direction buoyancy pushes hot gas towards.
    pub up: Vec3,

    // Extinguishment
    pub reaction_amount: f32,
    pub vapor_cooling: f32,
    pub vapor_extinguish: f32,
    pub reaction_extinguish: f32,
    pub temperature_distribution: Vec3,

    // Turbulence
    pub vorticity_strength: f32,
}

impl Default for FireSimulationConfig {
    fn default() -> Self {
        Self {
            cell_size: 10.0,
            max_resolution: 128,
            fluid_resolution_scale: 2,
            num_pressure_iterations: 8,
            fluid_dissipation: Vec4::new(0.001, 0.0, 0.03, 0.03),
            fluid_decay: Vec4::new(0.0, 0.2, 0.0, 0.0),
            dissipation: Vec3::splat(0.02),
            buoyancy: 1.0,
            density_weight: 0.1,
            ambient_temperature: 20.0,
            up: Vec3::Z,
            reaction_amount: 0.2,
            vapor_cooling: 50.0,
            vapor_extinguish: 0.1,
            reaction_extinguish: 0.15,
            temperature_distribution: Vec3::ZERO,
            vorticity_strength: 12.0,
        }
    }
}

/// The subset of the configuration that decides grid sizes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResolutionKey {
    pub cell_size: f32,
    pub max_resolution: u32,
    pub fluid_resolution_scale: u32,
}

impl FireSimulationConfig {
    /// Parse a configuration from TOML text. Missing keys keep their defaults.
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let config = Self::from_toml_str(&source)?;
        log::info!("Loaded fire simulation config from {}", path.display());
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Reject parameters the solver cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.cell_size.is_finite() && self.cell_size > 0.0) {
            return Err(ConfigError::InvalidCellSize(self.cell_size));
        }
        if self.max_resolution <= 0 {
            return Err(ConfigError::InvalidMaxResolution(self.max_resolution));
        }
        if self.fluid_resolution_scale < 1 {
            return Err(ConfigError::InvalidFluidScale(self.fluid_resolution_scale));
        }
        if self.num_pressure_iterations < 0 {
            return Err(ConfigError::NegativePressureIterations(self.num_pressure_iterations));
        }

        let vectors = [
            ("fluid_dissipation", self.fluid_dissipation.is_finite()),
            ("fluid_decay", self.fluid_decay.is_finite()),
            ("dissipation", self.dissipation.is_finite()),
            ("up", self.up.is_finite()),
            ("temperature_distribution", self.temperature_distribution.is_finite()),
        ];
        let scalars = [
            ("buoyancy", self.buoyancy),
            ("density_weight", self.density_weight),
            ("ambient_temperature", self.ambient_temperature),
            ("reaction_amount", self.reaction_amount),
            ("vapor_cooling", self.vapor_cooling),
            ("vapor_extinguish", self.vapor_extinguish),
            ("reaction_extinguish", self.reaction_extinguish),
            ("vorticity_strength", self.vorticity_strength),
        ];
        for (field, finite) in vectors {
            if !finite {
                return Err(ConfigError::NonFinite { field });
            }
        }
        for (field, value) in scalars {
            if !value.is_finite() {
                return Err(ConfigError::NonFinite { field });
            }
        }

        Ok(())
    }

    /// Pressure iteration count as an unsigned loop bound.
    pub fn pressure_iterations(&self) -> u32 {
        self.num_pressure_iterations.max(0) as u32
    }

    pub fn resolution_key(&self) -> ResolutionKey {
        ResolutionKey {
            cell_size: self.cell_size,
            max_resolution: self.max_resolution.max(1) as u32,
            fluid_resolution_scale: self.fluid_resolution_scale.max(1) as u32,
        }
    }
}

/// Validate a physical volume extent.
pub fn validate_extent(extent: Vec3) -> Result<(), ConfigError> {
    for (axis, value) in ['x', 'y', 'z'].into_iter().zip(extent.to_array()) {
        if !(value.is_finite() && value > 0.0) {
            return Err(ConfigError::InvalidExtent { axis, value });
        }
    }
    Ok(())
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Cell size must be positive and finite, got {0}")]
    InvalidCellSize(f32),

    #[error("Max resolution must be positive, got {0}")]
    InvalidMaxResolution(i32),

    #[error("Fluid resolution scale must be at least 1, got {0}")]
    InvalidFluidScale(i32),

    #[error("Pressure iteration count must not be negative, got {0}")]
    NegativePressureIterations(i32),

    #[error("Volume extent along {axis} must be positive and finite, got {value}")]
    InvalidExtent { axis: char, value: f32 },

    #[error("Config field {field} is not finite")]
    NonFinite { field: &'static str },

    #[error("Failed to read config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config_is_valid() {
        let config = FireSimulationConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.pressure_iterations(), 8);
        assert_eq!(config.up, Vec3::Z);
    }

    #[test]
    fn test_rejects_bad_parameters() {
        let mut config = FireSimulationConfig::default();
        config.cell_size = 0.0;
        assert!(matches!(config.validate(), Err(ConfigError::InvalidCellSize(_))));

        let mut config = FireSimulationConfig::default();
        config.num_pressure_iterations = -1;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::NegativePressureIterations(-1))
        ));

        let mut config = FireSimulationConfig::default();
        config.fluid_resolution_scale = 0;
        assert!(matches!(config.validate(), Err(ConfigError::InvalidFluidScale(0))));

        let mut config = FireSimulationConfig::default();
        config.buoyancy = f32::NAN;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::NonFinite { field: "buoyancy" })
        ));
    }

    #[test]
    fn test_extent_validation() {
        assert!(validate_extent(Vec3::new(100.0, 50.0, 10.0)).is_ok());
        assert!(matches!(
            validate_extent(Vec3::new(100.0, 0.0, 10.0)),
            Err(ConfigError::InvalidExtent { axis: 'y', .. })
        ));
        assert!(validate_extent(Vec3::new(f32::INFINITY, 1.0, 1.0)).is_err());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = FireSimulationConfig::from_toml_str(
            "cell_size = 5.0\nnum_pressure_iterations = 20\nup = [0.0, 1.0, 0.0]\n",
        )
        .unwrap();

        assert_eq!(config.cell_size, 5.0);
        assert_eq!(config.num_pressure_iterations, 20);
        assert_eq!(config.up, Vec3::Y);
        assert_eq!(config.vorticity_strength, 12.0);
    }

    #[test]
    fn test_toml_rejects_negative_iterations() {
        let result = FireSimulationConfig::from_toml_str("num_pressure_iterations = -3\n");
        assert!(matches!(result, Err(ConfigError::NegativePressureIterations(-3))));
    }

    #[test]
    fn test_load_from_file() {
        let mut config = FireSimulationConfig::default();
        config.vorticity_strength = 4.0;
        config.fluid_decay = Vec4::new(0.0, 0.5, 0.0, 0.0);

        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(config.to_toml_string().unwrap().as_bytes()).unwrap();

        let loaded = FireSimulationConfig::load(file.path()).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_load_missing_file() {
        let result = FireSimulationConfig::load("/definitely/not/here.toml");
        assert!(matches!(result, Err(ConfigError::Io { .. })));
    }
}

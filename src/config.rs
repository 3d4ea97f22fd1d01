use std::env;

use serde::{Deserialize, Serialize};

use crate::{align::MAX_ALIGN, block::Link, error::ConfigError};

pub const CAPACITY_VAR: &str = "FIXALLOC_CAPACITY";
pub const ALIGNMENT_VAR: &str = "FIXALLOC_ALIGNMENT";

/// Largest alignment the facade will hand out.
pub const MAX_ALIGNMENT: usize = 4096;

/// Settings for an [`AllocatorFacade`](crate::AllocatorFacade).
///
/// Read once at startup, either from TOML:
///
/// ```toml
/// capacity = 1048576
/// alignment = 16
/// ```
///
/// or from `FIXALLOC_CAPACITY` / `FIXALLOC_ALIGNMENT`, which override
/// whatever was loaded before.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AllocatorConfig {
  /// Size of the fixed buffer in bytes.
  pub capacity: usize,
  /// Alignment of every pointer returned by the facade.
  pub alignment: usize,
}

impl Default for AllocatorConfig {
  fn default() -> Self {
    Self {
      capacity: 1024 * 1024,
      alignment: MAX_ALIGN,
    }
  }
}

impl AllocatorConfig {
  pub fn with_capacity(capacity: usize) -> Self {
    Self {
      capacity,
      ..Self::default()
    }
  }

  pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
    let config: Self = toml::from_str(source)?;
    config.validate()?;
    Ok(config)
  }

  /// Applies `FIXALLOC_*` environment overrides.
  pub fn with_env_overrides(self) -> Result<Self, ConfigError> {
    self.with_overrides(|name| env::var(name).ok())
  }

  fn with_overrides(
    mut self,
    lookup: impl Fn(&'static str) -> Option<String>,
  ) -> Result<Self, ConfigError> {
    if let Some(value) = lookup(CAPACITY_VAR) {
      self.capacity = parse_var(CAPACITY_VAR, value)?;
    }
    if let Some(value) = lookup(ALIGNMENT_VAR) {
      self.alignment = parse_var(ALIGNMENT_VAR, value)?;
    }

    self.validate()?;
    Ok(self)
  }

  pub fn validate(&self) -> Result<(), ConfigError> {
    if self.capacity == 0 || self.capacity > Link::MAX_OFFSET {
      return Err(ConfigError::InvalidCapacity(self.capacity));
    }
    if !self.alignment.is_power_of_two() || self.alignment > MAX_ALIGNMENT {
      return Err(ConfigError::InvalidAlignment(self.alignment));
    }
    Ok(())
  }
}

fn parse_var(
  name: &'static str,
  value: String,
) -> Result<usize, ConfigError> {
  value
    .trim()
    .parse()
    .map_err(|_| ConfigError::Env { name, value })
}

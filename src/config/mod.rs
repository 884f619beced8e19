//! Layered configuration
//!
//! Three layers, merged in order (later wins):
//! 1. Built-in defaults
//! 2. User config file (`--config`, `$SLOTQ_CONFIG`, or
//!    `~/.config/slotq/config.toml`)
//! 3. CLI flags

mod defaults;
mod effective;
mod merge;
mod settings;

pub use defaults::BuiltinDefaults;
pub use effective::{
    locate_config, ConfigError, ConfigOrigin, ConfigSource, EffectiveConfig, CONFIG_ENV,
};
pub use merge::{deep_merge, merge_layers};
pub use settings::{AdapterSettings, Settings};

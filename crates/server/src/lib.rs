//! Host wiring for the c-VEP speller session: settings, the console host,
//! the stimulus launcher and session record persistence.

pub mod app;
pub mod config;
pub mod host;
pub mod launcher;
pub mod recording;

pub use app::{Backends, SpellerApp};
pub use config::{load_settings, load_settings_from, ConfigError, Settings};

//! Application setup: configuration, logging and wiring

pub mod config;
pub mod loader;
pub mod logging;
pub mod wiring;

pub use config::AppConfig;
pub use loader::load_config;
pub use wiring::{ado_client, load_catalog, open_memory, App};

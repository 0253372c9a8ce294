pub mod adapters;
pub mod api;
pub mod config;
pub mod core;
pub mod db;
pub mod domain;
pub mod geo;
pub mod utils;

pub use crate::config::Settings;
pub use crate::core::{ImportEngine, LayerService, ShapefilePipeline, StorageCleanup};
pub use utils::error::{AppError, Result};

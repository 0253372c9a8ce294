pub mod cleanup;
pub mod import;
pub mod layers;

pub use cleanup::StorageCleanup;
pub use import::{ImportEngine, ImportReport, ShapefilePipeline};
pub use layers::LayerService;

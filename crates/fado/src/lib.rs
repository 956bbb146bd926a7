pub mod api;
pub mod color;
pub mod config;
pub mod easing;
pub mod engine;
pub mod error;
pub mod fade;
pub mod integrations;
pub mod storage;

pub use config::Config;
pub use config::LogLevel;
pub use engine::Engine;
pub use engine::EngineSettings;
pub use error::Error;
pub use error::Result;
pub use error::StorageError;

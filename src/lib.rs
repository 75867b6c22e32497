pub mod assemble;
pub mod command;
pub mod commands;
pub mod config;
pub mod engine;
pub mod orchestrator;
pub mod planner;
pub mod pool;
pub mod probe;
pub mod progress;
pub mod settings;

pub use orchestrator::{ConversionFailed, FailureCause, Orchestrator};
pub use settings::{ConversionResult, ConversionSettings, MediaAsset};

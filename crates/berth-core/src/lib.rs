//! Core types and configuration for the berth agent

pub mod config;
pub mod constants;
pub mod error;
pub mod naming;
pub mod types;

pub use config::{Config, EngineDialect, MongoConfig, RegistryConfig, ResourceLimits};
pub use error::{Error, Result};
pub use types::{
    AppRef, AppStatusResponse, CleanupRequest, CleanupResponse, DeleteRequest, DeleteResponse,
    DeployRequest, DeployResponse, ImageCleanup, StepOutcome, StopRequest, StopResponse,
};

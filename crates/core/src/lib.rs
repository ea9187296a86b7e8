pub mod config;
pub mod dispatch;
pub mod item;
pub mod metrics;
pub mod orchestrator;
pub mod store;
pub mod testing;
pub mod tracker;

pub use config::{
    load_config, load_config_from_str, validate_config, Config, ConfigError, SanitizedConfig,
};
pub use item::{
    ConversionItem, ConversionOptions, ItemKind, ItemStatus, RawItem, ValidationError,
};
pub use orchestrator::{
    AggregateState, ConversionOrchestrator, OrchestratorError, OverallStatus, TrackedItem,
};
pub use store::{ContentKind, ConversionResult, DownloadArtifact, ResultStore};
pub use tracker::{Job, JobEvent, JobStatus, JobTracker, RealtimeChannel, WsChannel};

use thiserror::Error;

pub mod config;
pub mod diagnostics;
pub mod gifts;
pub mod host;
pub mod lifecycle;
pub mod patch;
pub mod records;
pub mod rules;
pub mod sim;

pub use config::{validate, Configuration, Settings, Validated};
pub use diagnostics::{Diagnostic, DiagnosticsSink, LogSink, MemorySink, Severity};
pub use gifts::{resolve_gift_list, ItemIdResolver, ItemNameTable, NumericResolver, ResolveError};
pub use host::{FunctionHandle, HostError, HostRewriter, RecordDirectory, RecordHandle};
pub use lifecycle::{LifecycleCoordinator, LifecycleError, LifecyclePhase, LifecycleSummary};
pub use patch::{apply_patches, PatchReport};
pub use records::{mutate_records, MutationReport, RecordOutcome};
pub use rules::{BehaviorDescriptor, FieldOverride, OverrideRule, OverrideRuleSet, Phase, QualifiedName};
pub use sim::{GiftTable, HostSnapshot, SimulatedHost};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Error)]
pub enum ArchGiftsError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("configuration error: {0}")]
    Config(String),
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
}

pub type Result<T> = std::result::Result<T, ArchGiftsError>;

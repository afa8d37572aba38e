// ddcsync-core: Monitor/feature synchronization engine between ddcsync-api
// and consumers (CLI, desktop UIs).

pub mod catalog;
pub mod command;
pub mod config;
pub mod connector;
pub mod convert;
pub mod engine;
pub mod error;
pub mod model;
pub mod store;
pub mod stream;
pub mod writer;

// ── Primary re-exports ──────────────────────────────────────────────
pub use command::{Command, CommandResult};
pub use config::{BackendPreference, EngineConfig};
pub use connector::{BackendKind, ServiceConnector, ServiceInfo};
pub use engine::Engine;
pub use error::CoreError;
pub use store::{RefreshKind, StateStore, StoreEvent, StoreHandle};
pub use stream::{MonitorSnapshot, MonitorStream};
pub use writer::WriteCoordinator;

pub use model::{
    Edid, FeatureCategory, FeatureDefinition, FeatureKind, FeatureValue, MonitorDescriptor,
    MonitorState,
};

// Wire-level types consumers commonly need alongside the engine.
pub use ddcsync_api::{BackendEvent, BusConfig, BusKind, CliConfig, SimulatedBackend};

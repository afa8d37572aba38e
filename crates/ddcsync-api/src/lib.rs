// ddcsync-api: Async clients for DDC/CI monitor control backends
// (ddcutil-service over D-Bus, the ddcutil command line, and a simulated backend)

pub mod bus;
pub mod cli;
pub mod error;
pub mod events;
pub mod flags;
pub mod methods;
pub mod reply;
pub mod simulated;
pub mod types;

pub use bus::{BusClient, BusConfig, BusKind};
pub use cli::{CliClient, CliConfig};
pub use error::Error;
pub use events::{BackendEvent, EventStreamHandle};
pub use flags::CallFlags;
pub use methods::{ListMethod, MethodCandidate, ReadMethod, WriteMethod};
pub use reply::Reply;
pub use simulated::SimulatedBackend;
pub use types::{DisplayAddress, DisplayRecord, FeatureMetadata, Reading, WireFeature};

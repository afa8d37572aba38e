// ── Domain model ──
//
// Canonical types consumers work with. Backend wire shapes are converted
// into these in `crate::convert`.

mod feature;
mod identity;
mod monitor;

pub use feature::{FeatureCategory, FeatureDefinition, FeatureKind, FeatureValue};
pub(crate) use feature::midpoint;
pub use identity::Edid;
pub use monitor::{MonitorDescriptor, MonitorState};

// ── Method-name candidates ──
//
// Backend builds disagree on method names. Each verb has an ordered list
// of candidates; `ddcsync-core` probes them and keeps the first that answers.

use std::fmt::Debug;

use strum::{EnumIter, IntoEnumIterator, IntoStaticStr};

/// A verb whose on-wire method name must be discovered by probing.
pub trait MethodCandidate: Copy + Debug + Send + Sync + 'static {
    /// Human-readable verb name for logs and errors.
    const VERB: &'static str;

    /// Candidates in priority order.
    fn candidates() -> Vec<Self>;

    /// On-wire method name.
    fn method_name(self) -> &'static str;
}

/// Read a single feature value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, IntoStaticStr)]
pub enum ReadMethod {
    GetVcp,
    GetVcpFeature,
    GetVcpValue,
    GetFeature,
    Get,
}

/// Write a single feature value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, IntoStaticStr)]
pub enum WriteMethod {
    SetVcpWithContext,
    SetVcp,
    SetVcpFeature,
    SetVcpValue,
    SetFeature,
    Set,
}

impl WriteMethod {
    /// Whether this variant carries the client context string on the wire.
    pub fn takes_context(self) -> bool {
        matches!(self, Self::SetVcpWithContext)
    }
}

/// Enumerate the features a display supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, IntoStaticStr)]
pub enum ListMethod {
    GetCapabilitiesMetadata,
    ListVcpFeatures,
    ListFeatures,
    EnumerateFeatures,
}

impl MethodCandidate for ReadMethod {
    const VERB: &'static str = "read-value";

    fn candidates() -> Vec<Self> {
        Self::iter().collect()
    }

    fn method_name(self) -> &'static str {
        self.into()
    }
}

impl MethodCandidate for WriteMethod {
    const VERB: &'static str = "write-value";

    fn candidates() -> Vec<Self> {
        Self::iter().collect()
    }

    fn method_name(self) -> &'static str {
        self.into()
    }
}

impl MethodCandidate for ListMethod {
    const VERB: &'static str = "list-features";

    fn candidates() -> Vec<Self> {
        Self::iter().collect()
    }

    fn method_name(self) -> &'static str {
        self.into()
    }
}

// ── Monitor identity ──
//
// The EDID string is the only stable identity a monitor has. Display
// numbers are reassigned on every detection and never used alone.

use std::borrow::Borrow;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Opaque per-monitor identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Edid(String);

impl Edid {
    pub fn new(edid: impl Into<String>) -> Self {
        Self(edid.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 12 characters, for compact display.
    pub fn short(&self) -> &str {
        self.0
            .char_indices()
            .nth(12)
            .map_or(self.0.as_str(), |(i, _)| &self.0[..i])
    }
}

impl fmt::Display for Edid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for Edid {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for Edid {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

impl Borrow<str> for Edid {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for Edid {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_truncates_long_edids() {
        let edid = Edid::new("00ffffffffffff0010ac");
        assert_eq!(edid.short(), "00ffffffffff");
        assert_eq!(Edid::new("abc").short(), "abc");
    }

    #[test]
    fn serializes_as_plain_string() {
        let json = serde_json::to_string(&Edid::new("x1")).unwrap();
        assert_eq!(json, "\"x1\"");
    }
}

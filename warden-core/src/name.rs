use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::CoreError;

/// Name under which the VM is registered with the backend.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct VmName(String);

impl VmName {
    /// Validates a VM name.
    ///
    /// # Errors
    /// Returns [`CoreError::InvalidVmName`] when the name is empty, has
    /// surrounding whitespace, contains control characters, quotes or path
    /// separators, or is `.` or `..`. The name becomes a folder name under
    /// the VirtualBox machines directory.
    pub fn new(name: impl Into<String>) -> Result<Self, CoreError> {
        let name = name.into();
        let reason = if name.is_empty() {
            Some("must not be empty")
        } else if name.trim() != name {
            Some("must not have leading or trailing whitespace")
        } else if name.chars().any(|c| c.is_control() || c == '"') {
            Some("must not contain control characters or quotes")
        } else if name.contains(['/', '\\']) {
            Some("must not contain path separators")
        } else if name == "." || name == ".." {
            Some("must not be a relative directory name")
        } else {
            None
        };
        match reason {
            Some(reason) => Err(CoreError::InvalidVmName { name, reason: reason.to_owned() }),
            None => Ok(Self(name)),
        }
    }

    /// Builds a unique `boinc_vm_<timestamp>` name.
    #[must_use]
    pub fn generate(now: DateTime<Utc>) -> Self {
        Self(format!("boinc_vm_{}", now.format("%Y%m%d%H%M%S")))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VmName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for VmName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for VmName {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<VmName> for String {
    fn from(name: VmName) -> Self {
        name.0
    }
}

//! Work units and the results produced from them.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::CoreError;

/// Prefix of the file a result is stored under.
pub const RESULT_FILE_PREFIX: &str = "result_";

/// Longest accepted unit name, in bytes.
///
/// The longest file derived from a name is the result store's temporary
/// `.result_<name>.<uuid>.tmp`, which must still fit in 255 bytes.
pub const MAX_UNIT_NAME_LEN: usize = 255 - RESULT_FILE_PREFIX.len() - TEMP_NAME_OVERHEAD;

/// Leading dot, separator, hyphenated uuid and `.tmp`.
const TEMP_NAME_OVERHEAD: usize = 1 + 1 + 36 + 4;

/// A packaged task waiting in (or just claimed from) the work queue.
///
/// The payload is an opaque archive holding an entry point and its inputs.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkUnit {
    /// Unique within the queue; doubles as the file name.
    pub name: String,

    /// Archive bytes.
    pub payload: Vec<u8>,
}

impl WorkUnit {
    pub fn new(name: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            payload: payload.into(),
        }
    }
}

impl fmt::Debug for WorkUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkUnit")
            .field("name", &self.name)
            .field("payload_len", &self.payload.len())
            .finish()
    }
}

/// Captured output of one executed work unit.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultUnit {
    /// Name of the work unit this result was produced from.
    pub name: String,

    /// Archive holding the stdout/stderr captures.
    pub payload: Vec<u8>,
}

impl ResultUnit {
    pub fn new(name: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            payload: payload.into(),
        }
    }

    /// File name the result is persisted under.
    pub fn file_name(&self) -> String {
        result_file_name(&self.name)
    }
}

impl fmt::Debug for ResultUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResultUnit")
            .field("name", &self.name)
            .field("payload_len", &self.payload.len())
            .finish()
    }
}

/// File name of the result for the work unit called `name`.
pub fn result_file_name(name: &str) -> String {
    format!("{RESULT_FILE_PREFIX}{name}")
}

/// Validate that a unit name can be used as a plain file name.
///
/// Names starting with `.` are refused: the stores use dot-files for
/// writes that have not been renamed into place yet.
pub fn validate_unit_name(name: &str) -> Result<(), CoreError> {
    let invalid = |reason| CoreError::InvalidUnitName {
        name: name.to_string(),
        reason,
    };

    if name.is_empty() {
        return Err(invalid("name cannot be empty"));
    }
    if name.starts_with('.') {
        return Err(invalid("name cannot start with '.'"));
    }
    if name.contains(['/', '\\', '\0']) {
        return Err(invalid("name cannot contain path separators"));
    }
    if name.len() > MAX_UNIT_NAME_LEN {
        return Err(invalid("name is too long"));
    }

    Ok(())
}

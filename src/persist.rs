//! Persisted power-drop flag
//!
//! Records across BMC restarts whether the last host power loss was
//! unexpected. The file holds the literal text `Yes` or `No`; anything
//! unreadable counts as `No` so a torn write can never block a power-on.

use std::path::{Path, PathBuf};

use tracing::warn;

/// Whether host power was dropped uncleanly
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropState {
    Yes,
    No,
}

impl DropState {
    fn as_str(self) -> &'static str {
        match self {
            DropState::Yes => "Yes",
            DropState::No => "No",
        }
    }
}

/// File name under the state directory
const FLAG_FILE: &str = "power-drop";

/// Handle to the persisted flag file
#[derive(Clone)]
pub struct PowerDropFlag {
    path: PathBuf,
}

impl PowerDropFlag {
    pub fn new(state_dir: &Path) -> Self {
        Self {
            path: state_dir.join(FLAG_FILE),
        }
    }

    /// Read the flag. Missing or unreadable files are `No`.
    pub fn load(&self) -> DropState {
        match std::fs::read_to_string(&self.path) {
            Ok(raw) if raw.trim() == "Yes" => DropState::Yes,
            Ok(_) => DropState::No,
            Err(e) => {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!("failed to read {}: {}", self.path.display(), e);
                }
                DropState::No
            }
        }
    }

    /// Write the flag synchronously with create-or-truncate semantics,
    /// creating the state directory if needed. Failures are logged; the
    /// machine never stalls on the flag.
    pub fn store(&self, state: DropState) {
        if let Some(dir) = self.path.parent() {
            if let Err(e) = std::fs::create_dir_all(dir) {
                warn!("failed to create state dir {}: {}", dir.display(), e);
                return;
            }
        }
        if let Err(e) = std::fs::write(&self.path, state.as_str()) {
            warn!("failed to write {}: {}", self.path.display(), e);
        }
    }
}

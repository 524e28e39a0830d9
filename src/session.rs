//! Session save/restore: an explicit, versioned JSON record of the
//! controller's resumable state. Fuzzer state is deliberately absent; it is
//! rebuilt when the scan resumes.

use std::collections::{HashSet, VecDeque};
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::errors::ScanError;
use crate::options::Options;
use crate::response::Response;

pub const SESSION_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
pub struct Session {
    pub version: u32,
    pub targets: VecDeque<String>,
    pub directories: VecDeque<String>,
    pub passed_urls: HashSet<String>,
    pub dictionary_index: usize,
    pub current_job: usize,
    pub errors: usize,
    pub options: Options,
    pub results: Vec<Response>,
    pub responses: Vec<Response>,
    pub last_output: String,
}

impl Session {
    pub fn save(&self, path: &Path) -> Result<(), ScanError> {
        let content = serde_json::to_string(self)
            .map_err(|e| ScanError::Session(format!("Couldn't serialize session: {e}")))?;
        fs::write(path, content)
            .map_err(|e| ScanError::Session(format!("Couldn't write {}: {e}", path.display())))?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self, ScanError> {
        let invalid = || {
            ScanError::Session(format!(
                "{} is not a valid session file or it's in an old format",
                path.display()
            ))
        };
        let content = fs::read_to_string(path).map_err(|_| invalid())?;
        let session: Session = serde_json::from_str(&content).map_err(|_| invalid())?;
        if session.version != SESSION_VERSION {
            return Err(invalid());
        }
        Ok(session)
    }
}

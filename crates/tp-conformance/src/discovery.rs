use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tp_types::{CaseId, InputCase};

use crate::HarnessError;

/// A fixture found on disk, not yet read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixtureFile {
    pub id: CaseId,
    pub index: usize,
    pub file_name: String,
    pub path: PathBuf,
}

impl FixtureFile {
    /// Read the fixture as UTF-8 and strip trailing whitespace.
    pub fn load(&self) -> Result<InputCase, HarnessError> {
        let raw = fs::read_to_string(&self.path)?;
        Ok(InputCase::new(self.index, &self.file_name, &raw)?)
    }

    #[must_use]
    pub fn matches_filter(&self, filter: &str) -> bool {
        self.id.as_str().contains(filter) || self.file_name.contains(filter)
    }
}

/// List `root` (non-recursively), keep regular files with `extension`, sort
/// by file name and number them from 1.
///
/// A missing directory is created and reported as
/// [`HarnessError::FixturesCreated`] so the caller aborts with instructions
/// instead of running an empty suite.
pub fn discover_fixtures(root: &Path, extension: &str) -> Result<Vec<FixtureFile>, HarnessError> {
    if !root.exists() {
        fs::create_dir_all(root)?;
        return Err(HarnessError::FixturesCreated {
            path: root.to_path_buf(),
            extension: extension.to_owned(),
        });
    }

    let mut names = Vec::new();
    for entry in fs::read_dir(root)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_file() && path.extension().is_some_and(|ext| ext == extension) {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    names.sort();

    names
        .into_iter()
        .enumerate()
        .map(|(offset, file_name)| {
            let index = offset + 1;
            Ok(FixtureFile {
                id: CaseId::for_fixture(index, &file_name)?,
                index,
                path: root.join(&file_name),
                file_name,
            })
        })
        .collect()
}

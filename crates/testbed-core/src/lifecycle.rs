use crate::CoreError;
use serde::Serialize;
use std::fmt;

/// States of the import state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportState {
    Base,
    DefaultFolders,
    ImportData,
    DefaultProjects,
    Publish,
    Unlock,
    Ready,
    Reimport,
}

impl fmt::Display for ImportState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ImportState::Base => "base",
            ImportState::DefaultFolders => "default_folders",
            ImportState::ImportData => "import_data",
            ImportState::DefaultProjects => "default_projects",
            ImportState::Publish => "publish",
            ImportState::Unlock => "unlock",
            ImportState::Ready => "ready",
            ImportState::Reimport => "reimport",
        };
        f.write_str(name)
    }
}

pub fn validate_transition(from: ImportState, to: ImportState) -> Result<(), CoreError> {
    let valid = matches!(
        (from, to),
        (ImportState::Base, ImportState::DefaultFolders)
            | (
                ImportState::DefaultFolders | ImportState::Reimport,
                ImportState::ImportData
            )
            | (ImportState::ImportData, ImportState::DefaultProjects | ImportState::Publish)
            | (
                ImportState::DefaultProjects,
                ImportState::Publish | ImportState::Unlock
            )
            | (ImportState::Publish | ImportState::Unlock, ImportState::Ready)
    );

    if valid {
        Ok(())
    } else {
        Err(CoreError::InvalidTransition {
            from: from.to_string(),
            to: to.to_string(),
        })
    }
}

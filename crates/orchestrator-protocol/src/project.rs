use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::ids::ProjectId;

/// Project facts handed to every plugin call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectContext {
    pub id: ProjectId,
    /// `owner/name` on the code host.
    pub repository: String,
    /// Local checkout that workspaces are derived from.
    pub path: PathBuf,
    pub default_branch: String,
}

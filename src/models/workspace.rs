use serde::{Deserialize, Serialize};

pub const WORKSPACE_MODEL: &str = "powerbi.workspace";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkspaceState {
    #[default]
    Active,
    Deleted,
}

/// Local mirror of a Power BI workspace (group).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workspace {
    pub id: i64,
    pub name: String,
    /// Power BI group id; unique across mirror records.
    pub workspace_id: String,
    #[serde(default)]
    pub is_on_dedicated_capacity: bool,
    #[serde(default)]
    pub state: WorkspaceState,
}

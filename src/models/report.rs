use serde::{Deserialize, Serialize};

use super::settings::AccessLevel;

pub const REPORT_MODEL: &str = "powerbi.report";

/// Local mirror of a Power BI report. `(workspace_id, report_id)` is the
/// natural key used by synchronization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Report {
    pub id: i64,
    pub name: String,
    /// Embed URL.
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub workspace_id: Option<String>,
    #[serde(default)]
    pub workspace_ref_id: Option<i64>,
    #[serde(default)]
    pub report_id: Option<String>,
    #[serde(default)]
    pub dataset_id: Option<String>,
    /// Overrides the configuration's default access level when set.
    #[serde(default)]
    pub access_level: Option<AccessLevel>,
}

impl Report {
    /// Both external ids, if the record has them.
    pub fn external_ids(&self) -> Option<(&str, &str)> {
        let ws = self.workspace_id.as_deref().filter(|s| !s.is_empty())?;
        let rep = self.report_id.as_deref().filter(|s| !s.is_empty())?;
        Some((ws, rep))
    }

    /// Path of the standalone viewer page for this report.
    pub fn viewer_path(&self) -> String {
        format!("/powerbi/view/{}", self.id)
    }
}

//! Mirrors Power BI workspaces and reports into local records.

use std::sync::Arc;

use serde::Serialize;
use serde_json::json;

use crate::errors::AppError;
use crate::middleware::metrics;
use crate::models::report::{Report, REPORT_MODEL};
use crate::models::settings::Settings;
use crate::models::workspace::{Workspace, WORKSPACE_MODEL};
use crate::models::{Domain, Record, SearchQuery};
use crate::powerbi::types::{RemoteReport, RemoteWorkspace};
use crate::powerbi::{AadCredentials, PowerBiClient};
use crate::store::{from_record, Access, RecordStore};

const UNKNOWN_NAME: &str = "Unknown";

/// Outcome of one synchronization pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncSummary {
    pub workspaces_created: u64,
    pub workspaces_updated: u64,
    pub reports_created: u64,
    pub reports_updated: u64,
    /// External ids of workspaces whose reports could not be fetched.
    pub failed_workspaces: Vec<String>,
}

enum Upsert {
    Created(i64),
    Updated(i64),
}

pub struct SyncEngine {
    store: Arc<dyn RecordStore>,
    client: Arc<PowerBiClient>,
}

fn to_record(value: serde_json::Value) -> Record {
    match value {
        serde_json::Value::Object(map) => map,
        _ => Record::new(),
    }
}

impl SyncEngine {
    pub fn new(store: Arc<dyn RecordStore>, client: Arc<PowerBiClient>) -> Self {
        Self { store, client }
    }

    /// Pull every accessible workspace and its reports. A failure listing
    /// workspaces fails the pass; a failure listing one workspace's reports
    /// is logged and recorded in the summary.
    pub async fn sync_all(&self, settings: &Settings) -> Result<SyncSummary, AppError> {
        let creds = settings.aad_credentials()?;
        let result = self.run(&creds).await;
        match &result {
            Ok(summary) => {
                metrics::record_sync(true, summary.reports_created, summary.reports_updated);
                tracing::info!(
                    workspaces_created = summary.workspaces_created,
                    workspaces_updated = summary.workspaces_updated,
                    reports_created = summary.reports_created,
                    reports_updated = summary.reports_updated,
                    failed = summary.failed_workspaces.len(),
                    "Power BI synchronization finished"
                );
            }
            Err(e) => {
                metrics::record_sync(false, 0, 0);
                tracing::error!("Power BI synchronization failed: {}", e);
            }
        }
        result
    }

    async fn run(&self, creds: &AadCredentials) -> Result<SyncSummary, AppError> {
        let mut summary = SyncSummary::default();
        let workspaces = self.client.list_workspaces(creds).await?;
        if workspaces.is_empty() {
            tracing::info!("no accessible Power BI workspaces");
        }

        for remote in &workspaces {
            let workspace_name = remote.name.as_deref().unwrap_or(UNKNOWN_NAME);
            let workspace_ref = match self.upsert_workspace(remote, workspace_name).await? {
                Upsert::Created(id) => {
                    summary.workspaces_created += 1;
                    id
                }
                Upsert::Updated(id) => {
                    summary.workspaces_updated += 1;
                    id
                }
            };

            let reports = match self.client.list_reports(creds, &remote.id).await {
                Ok(reports) => reports,
                Err(e) => {
                    tracing::warn!(
                        workspace_id = %remote.id,
                        "failed to fetch reports for workspace '{}': {}",
                        workspace_name,
                        e
                    );
                    summary.failed_workspaces.push(remote.id.clone());
                    continue;
                }
            };

            for report in &reports {
                match self
                    .upsert_report(report, &remote.id, workspace_name, workspace_ref)
                    .await?
                {
                    Upsert::Created(_) => summary.reports_created += 1,
                    Upsert::Updated(_) => summary.reports_updated += 1,
                }
            }
        }

        Ok(summary)
    }

    async fn upsert_workspace(
        &self,
        remote: &RemoteWorkspace,
        name: &str,
    ) -> Result<Upsert, AppError> {
        let values = json!({
            "name": name,
            "is_on_dedicated_capacity": remote.is_on_dedicated_capacity,
            "state": "active",
        });

        let existing = self
            .store
            .search(
                WORKSPACE_MODEL,
                &SearchQuery::first(Domain::eq("workspace_id", remote.id.as_str())),
                Access::Elevated,
            )
            .await?;

        if let Some(found) = existing.into_iter().next() {
            let found: Workspace = from_record(found)?;
            self.store
                .update(WORKSPACE_MODEL, found.id, to_record(values), Access::Elevated)
                .await?;
            return Ok(Upsert::Updated(found.id));
        }

        let mut record = to_record(values);
        record.insert("workspace_id".into(), remote.id.clone().into());
        let id = self
            .store
            .create(WORKSPACE_MODEL, record, Access::Elevated)
            .await?;
        tracing::debug!(workspace_id = %remote.id, id, "created workspace mirror");
        Ok(Upsert::Created(id))
    }

    async fn upsert_report(
        &self,
        remote: &RemoteReport,
        workspace_id: &str,
        workspace_name: &str,
        workspace_ref: i64,
    ) -> Result<Upsert, AppError> {
        let name = remote.name.as_deref().unwrap_or(UNKNOWN_NAME);
        let domain = Domain::all_of(vec![
            Domain::eq("workspace_id", workspace_id),
            Domain::eq("report_id", remote.id.as_str()),
        ]);
        let existing = self
            .store
            .search(REPORT_MODEL, &SearchQuery::first(domain), Access::Elevated)
            .await?;

        let mut values = to_record(json!({
            "url": remote.embed_url.as_deref().unwrap_or_default(),
            "dataset_id": remote.dataset_id.as_deref().unwrap_or_default(),
            "workspace_ref_id": workspace_ref,
        }));

        if let Some(found) = existing.into_iter().next() {
            let found: Report = from_record(found)?;
            values.insert("name".into(), name.into());
            self.store
                .update(REPORT_MODEL, found.id, values, Access::Elevated)
                .await?;
            return Ok(Upsert::Updated(found.id));
        }

        values.insert("name".into(), format!("{} ({})", name, workspace_name).into());
        values.insert("workspace_id".into(), workspace_id.into());
        values.insert("report_id".into(), remote.id.clone().into());
        let id = self
            .store
            .create(REPORT_MODEL, values, Access::Elevated)
            .await?;
        Ok(Upsert::Created(id))
    }

    /// Refresh one report's url, dataset and name from Power BI, keeping the
    /// stored values for anything the service leaves blank.
    pub async fn refresh_report(&self, settings: &Settings, id: i64) -> Result<Report, AppError> {
        let report = self.load_report(id).await?;
        let (workspace_id, report_id) = report.external_ids().ok_or_else(|| {
            AppError::BadRequest(format!(
                "report {} needs both a workspace id and a report id",
                id
            ))
        })?;
        let creds = settings.aad_credentials()?;

        let details = self
            .client
            .get_report_details(&creds, workspace_id, report_id)
            .await?;

        let non_empty = |v: &Option<String>| v.clone().filter(|s| !s.is_empty());
        let url = non_empty(&details.embed_url)
            .or_else(|| non_empty(&details.web_url))
            .unwrap_or_else(|| report.url.clone());
        let dataset_id = non_empty(&details.dataset_id).or_else(|| report.dataset_id.clone());
        let name = non_empty(&details.name).unwrap_or_else(|| report.name.clone());

        self.store
            .update(
                REPORT_MODEL,
                id,
                to_record(json!({ "url": url, "dataset_id": dataset_id, "name": name })),
                Access::Elevated,
            )
            .await?;
        tracing::info!(report = id, "refreshed report metadata from Power BI");

        self.load_report(id).await
    }

    async fn load_report(&self, id: i64) -> Result<Report, AppError> {
        let record = self
            .store
            .find_by_id(REPORT_MODEL, id, &[], Access::Elevated)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("report {} not found", id)))?;
        Ok(from_record(record)?)
    }
}

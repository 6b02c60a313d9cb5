//! Embed configuration for the browser-side Power BI SDK.

use serde::Serialize;

use crate::credentials::SettingsProvider;
use crate::errors::AppError;
use crate::models::report::{Report, REPORT_MODEL};
use crate::powerbi::PowerBiClient;
use crate::store::{from_record, Access, RecordStore};

/// Everything `powerbi.embed()` needs for one report.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EmbedConfig {
    pub report_id: String,
    pub embed_url: Option<String>,
    pub embed_token: String,
    pub name: String,
}

/// Resolve a local report record into an embed configuration. Settings and
/// credentials are checked before any call to Azure AD or Power BI.
pub async fn embed_config(
    store: &dyn RecordStore,
    settings: &dyn SettingsProvider,
    client: &PowerBiClient,
    report_rec_id: i64,
) -> Result<EmbedConfig, AppError> {
    let report: Report = store
        .find_by_id(REPORT_MODEL, report_rec_id, &[], Access::Elevated)
        .await?
        .map(from_record)
        .transpose()?
        .ok_or_else(|| AppError::NotFound(format!("report {} not found", report_rec_id)))?;

    let settings = settings.require_active().await?;
    let creds = settings.aad_credentials()?;

    let (workspace_id, report_id) = report.external_ids().ok_or_else(|| {
        AppError::BadRequest(format!(
            "report {} needs both a workspace id and a report id",
            report_rec_id
        ))
    })?;

    let details = client
        .get_report_details(&creds, workspace_id, report_id)
        .await?;

    let dataset_id = report
        .dataset_id
        .as_deref()
        .filter(|d| !d.is_empty())
        .or(details.dataset_id.as_deref());
    let access_level = report.access_level.unwrap_or(settings.default_access_level);

    let embed_token = client
        .generate_embed_token(&creds, workspace_id, report_id, dataset_id, access_level)
        .await?;

    tracing::info!(
        report = report_rec_id,
        access_level = access_level.as_api_str(),
        "issued embed token"
    );

    Ok(EmbedConfig {
        report_id: details
            .id
            .clone()
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| report_id.to_string()),
        embed_url: details.embed_url.clone(),
        embed_token,
        name: details
            .name
            .clone()
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| report.name.clone()),
    })
}

fn escape_attr(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('"', "&quot;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// Inline iframe preview for a report's stored embed URL. Empty when the
/// report has no URL.
pub fn preview_html(url: &str) -> String {
    if url.is_empty() {
        return String::new();
    }
    format!(
        r#"<div style="width:100%; height:800px;"><iframe title="Power BI Report" width="100%" height="100%" src="{}" frameborder="0" allow="clipboard-write; autoplay 'none'" allowfullscreen="true"></iframe></div>"#,
        escape_attr(url)
    )
}

/// Standalone page that fetches the embed configuration and embeds the
/// report with the filter pane hidden.
pub fn viewer_page(report_rec_id: i64, sdk_url: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html>
  <head>
    <meta charset="utf-8"/>
    <meta name="viewport" content="width=device-width, initial-scale=1"/>
    <title>Power BI</title>
    <script src="{sdk}"></script>
    <style>
      html, body, #reportContainer {{ height: 100%; width: 100%; margin: 0; }}
    </style>
  </head>
  <body>
    <div id="reportContainer"></div>
    <script>
      async function load() {{
        const resp = await fetch('/powerbi/embed_config/{id}', {{ method: 'POST', headers: {{'Content-Type': 'application/json'}}, credentials: 'same-origin' }});
        const cfg = await resp.json();
        if (cfg.error) {{
          const pre = document.createElement('pre');
          pre.style.cssText = 'padding:16px;color:#b00';
          pre.textContent = cfg.message || cfg.error;
          document.body.replaceChildren(pre);
          return;
        }}
        const models = window['powerbi-client'].models;
        const embedConfig = {{
          type: 'report',
          id: cfg.reportId,
          embedUrl: cfg.embedUrl,
          accessToken: cfg.embedToken,
          tokenType: models.TokenType.Embed,
          settings: {{ panes: {{ filters: {{ visible: false }} }}, navContentPaneEnabled: true }}
        }};
        const container = document.getElementById('reportContainer');
        powerbi.reset(container);
        powerbi.embed(container, embedConfig);
      }}
      load();
    </script>
  </body>
</html>
"#,
        sdk = escape_attr(sdk_url),
        id = report_rec_id,
    )
}

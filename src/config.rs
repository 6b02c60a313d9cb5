use serde::Deserialize;

pub const DEFAULT_LOGIN_BASE_URL: &str = "https://login.microsoftonline.com";
pub const DEFAULT_API_BASE_URL: &str = "https://api.powerbi.com/v1.0/myorg";
pub const DEFAULT_SCOPE: &str = "https://analysis.windows.net/powerbi/api/.default";
pub const DEFAULT_SDK_URL: &str =
    "https://cdn.jsdelivr.net/npm/powerbi-client@2.23.1/dist/powerbi.min.js";
pub const DEFAULT_TIMEOUT_SECS: u64 = 20;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub port: u16,
    /// Postgres URL, or `memory://` for the in-memory store.
    pub database_url: String,
    /// Key for the admin API and the report viewer. Those routes answer 500
    /// until it is set.
    pub admin_key: Option<String>,
    /// Allowed browser origin for CORS.
    pub dashboard_origin: String,
    pub powerbi: PowerBiConfig,
}

/// Endpoints and limits for the Azure AD / Power BI integration.
#[derive(Debug, Clone, Deserialize)]
pub struct PowerBiConfig {
    pub login_base_url: String,
    pub api_base_url: String,
    pub scope: String,
    /// Per-call timeout; there are no retries.
    pub timeout_secs: u64,
    /// powerbi-client SDK loaded by the viewer page.
    pub sdk_url: String,
}

impl Default for PowerBiConfig {
    fn default() -> Self {
        Self {
            login_base_url: DEFAULT_LOGIN_BASE_URL.into(),
            api_base_url: DEFAULT_API_BASE_URL.into(),
            scope: DEFAULT_SCOPE.into(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            sdk_url: DEFAULT_SDK_URL.into(),
        }
    }
}

impl Config {
    /// Configuration for tests and local runs: in-memory store, default
    /// Power BI endpoints.
    pub fn for_memory(admin_key: Option<&str>) -> Self {
        Self {
            port: 8069,
            database_url: "memory://".into(),
            admin_key: admin_key.map(String::from),
            dashboard_origin: "http://localhost:3000".into(),
            powerbi: PowerBiConfig::default(),
        }
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
}

pub fn load() -> anyhow::Result<Config> {
    dotenvy::dotenv().ok();

    let admin_key = std::env::var("CONNECTOR_ADMIN_KEY")
        .ok()
        .filter(|k| !k.trim().is_empty());
    if admin_key.is_none() {
        tracing::warn!("CONNECTOR_ADMIN_KEY is not set; admin API and report viewer are disabled");
    }

    let timeout_secs = match std::env::var("POWERBI_TIMEOUT_SECS") {
        Ok(raw) => raw
            .parse::<u64>()
            .ok()
            .filter(|s| *s > 0)
            .ok_or_else(|| anyhow::anyhow!("POWERBI_TIMEOUT_SECS must be a positive integer, got '{}'", raw))?,
        Err(_) => DEFAULT_TIMEOUT_SECS,
    };

    Ok(Config {
        port: std::env::var("CONNECTOR_PORT")
            .unwrap_or_else(|_| "8069".into())
            .parse()
            .unwrap_or(8069),
        database_url: env_or("DATABASE_URL", "postgres://localhost/connector"),
        admin_key,
        dashboard_origin: env_or("DASHBOARD_ORIGIN", "http://localhost:3000"),
        powerbi: PowerBiConfig {
            login_base_url: env_or("POWERBI_LOGIN_BASE_URL", DEFAULT_LOGIN_BASE_URL),
            api_base_url: env_or("POWERBI_API_BASE_URL", DEFAULT_API_BASE_URL),
            scope: env_or("POWERBI_SCOPE", DEFAULT_SCOPE),
            timeout_secs,
            sdk_url: env_or("POWERBI_SDK_URL", DEFAULT_SDK_URL),
        },
    })
}

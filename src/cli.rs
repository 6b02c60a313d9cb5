use clap::{Parser, Subcommand, ValueEnum};

use connector::models::settings::AccessLevel;

/// Power BI connector: token-gated data API and report embedding
#[derive(Parser)]
#[command(name = "pbi-connector", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the HTTP server
    Serve {
        /// Port to bind (defaults to CONNECTOR_PORT)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Manage connector configurations
    Settings {
        #[command(subcommand)]
        command: SettingsCommands,
    },

    /// Mirror Power BI workspaces and reports using the active configuration
    Sync,

    /// Manage mirrored reports
    Report {
        #[command(subcommand)]
        command: ReportCommands,
    },

    /// Check Azure AD credentials and Power BI access
    TestConnection {
        /// Configuration id (defaults to the active one)
        #[arg(long)]
        id: Option<i64>,
        /// Only acquire an Azure AD token
        #[arg(long)]
        aad_only: bool,
    },
}

#[derive(Clone, Copy, ValueEnum)]
pub enum AccessLevelArg {
    View,
    Edit,
}

impl From<AccessLevelArg> for AccessLevel {
    fn from(arg: AccessLevelArg) -> Self {
        match arg {
            AccessLevelArg::View => AccessLevel::View,
            AccessLevelArg::Edit => AccessLevel::Edit,
        }
    }
}

#[derive(Subcommand)]
pub enum SettingsCommands {
    /// Create a configuration and print its API token
    Create {
        #[arg(long)]
        name: Option<String>,
        /// Model names exposed through the data API
        #[arg(long, value_delimiter = ',')]
        allowed_models: Option<Vec<String>>,
        #[arg(long)]
        max_records: Option<i64>,
        #[arg(long, env = "POWERBI_TENANT_ID")]
        tenant_id: Option<String>,
        #[arg(long, env = "POWERBI_CLIENT_ID")]
        client_id: Option<String>,
        #[arg(long, env = "POWERBI_CLIENT_SECRET", hide_env_values = true)]
        client_secret: Option<String>,
        #[arg(long, value_enum, default_value = "view")]
        access_level: AccessLevelArg,
        /// Leave the new configuration inactive
        #[arg(long)]
        inactive: bool,
    },
    /// Show the active configuration (secrets masked)
    Show,
    /// Make a configuration the active one
    Activate {
        #[arg(long)]
        id: i64,
    },
    /// Regenerate a configuration's API token
    RotateToken {
        #[arg(long)]
        id: i64,
    },
    /// Delete a configuration
    Delete {
        #[arg(long)]
        id: i64,
    },
}

#[derive(Subcommand)]
pub enum ReportCommands {
    /// Refresh one report's metadata from Power BI
    Refresh {
        #[arg(long)]
        id: i64,
    },
}

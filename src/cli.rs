use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::defaults::{DEFAULT_OUTPUT, DEFAULT_TESTDATA_DIR};
use crate::provider::{AwsConfig, GcpConfig, ProviderKind};

#[derive(Debug, Parser)]
#[command(
    name = "slowlog-fetch",
    version,
    about = "Download MySQL slow query logs from managed cloud databases",
    args_conflicts_with_subcommands = true
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,

    /// Cloud provider hosting the instance
    #[arg(long, value_enum, default_value_t = ProviderKind::Aws)]
    pub provider: ProviderKind,

    /// Instance name prefix; the first matching instance is used
    #[arg(short, long, default_value = "")]
    pub instance: String,

    /// Only download log files whose name contains this string
    #[arg(short, long, default_value = "")]
    pub filter: String,

    /// File that downloaded logs are appended to (`-` for stdout)
    #[arg(short, long, default_value = DEFAULT_OUTPUT)]
    pub output: String,

    /// Enable debug logging
    #[arg(short, long)]
    pub debug: bool,

    /// Serve synthetic logs instead of calling a cloud provider
    #[arg(long)]
    pub fake: bool,

    /// AWS shared-config profile
    #[arg(long)]
    pub profile: Option<String>,

    /// AWS region
    #[arg(long)]
    pub region: Option<String>,

    /// GCP project ID (required with --provider gcp)
    #[arg(long)]
    pub project: Option<String>,

    /// Path to a GCP credentials file
    #[arg(long)]
    pub credentials: Option<PathBuf>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Generate synthetic MySQL slow query logs for local testing
    Testlog {
        /// Directory the generated files are written to
        #[arg(short, long, default_value = DEFAULT_TESTDATA_DIR)]
        output_dir: PathBuf,
    },
}

impl Cli {
    pub fn aws_config(&self) -> AwsConfig {
        AwsConfig {
            profile: self.profile.clone(),
            region: self.region.clone(),
        }
    }

    pub fn gcp_config(&self) -> GcpConfig {
        GcpConfig {
            project: self.project.clone().unwrap_or_default(),
            credentials: self.credentials.clone(),
        }
    }
}

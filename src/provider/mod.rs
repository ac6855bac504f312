use async_trait::async_trait;
use clap::ValueEnum;

use crate::error::Result;

pub mod aws;
pub mod fake;
pub mod gcp;

pub use aws::{AwsConfig, AwsProviderClient};
pub use fake::FakeProviderClient;
pub use gcp::{GcpConfig, GcpProviderClient};

/// Provider-specific name of a managed database instance.
pub type Instance = String;

/// Provider-specific path of one retrievable log file.
pub type LogFileRef = String;

/// Raw text of a downloaded log file.
pub type LogContent = String;

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum ProviderKind {
    Aws,
    Gcp,
}

/// Operations every cloud backend exposes to the retrieval pipeline.
///
/// An `Err` from `list_instances` means the listing itself failed; an
/// instance-less account returns `Ok` with an empty vector.
#[async_trait]
pub trait ProviderClient: Send + Sync {
    async fn list_instances(&self) -> Result<Vec<Instance>>;

    /// Fails with `InstanceNotFound` when `instance` is not among the
    /// provider's current instances.
    async fn list_log_files(&self, instance: &str) -> Result<Vec<LogFileRef>>;

    /// `Ok(None)` is a successful download with nothing to write.
    async fn download_log_file(&self, instance: &str, file: &str) -> Result<Option<LogContent>>;
}

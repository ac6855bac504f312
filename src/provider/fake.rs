use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use super::{Instance, LogContent, LogFileRef, ProviderClient};
use crate::error::{Error, Result};
use crate::testdata;

#[derive(Clone)]
enum FakeDownload {
    Content(Option<LogContent>),
    #[cfg(test)]
    Fail(String),
}

/// In-memory provider serving canned instances and log files.
#[derive(Clone, Default)]
pub struct FakeProviderClient {
    instances: Vec<Instance>,
    listing_error: Option<String>,
    files: HashMap<Instance, Vec<LogFileRef>>,
    downloads: HashMap<LogFileRef, FakeDownload>,
    cancel_on: Option<(LogFileRef, CancellationToken)>,
    delay: Duration,
    attempts: Arc<Mutex<Vec<LogFileRef>>>,
}

impl FakeProviderClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Synthetic slow-query logs for every sample instance name.
    pub fn with_sample_data() -> Self {
        let mut fake = Self::new().with_delay(Duration::from_millis(200));
        for instance in testdata::INSTANCE_NAMES {
            let rotated = format!("slowquery/mysql-slowquery.log.{instance}.1");
            fake = fake
                .with_files(
                    instance,
                    &["slowquery/mysql-slowquery.log", rotated.as_str()],
                )
                .with_content("slowquery/mysql-slowquery.log", testdata::full_log())
                .with_content(&rotated, testdata::instance_log(instance));
        }
        fake
    }

    /// Registers `files` for `instance`, adding the instance if unknown.
    pub fn with_files(mut self, instance: &str, files: &[&str]) -> Self {
        if !self.instances.iter().any(|known| known == instance) {
            self.instances.push(instance.to_string());
        }
        self.files.insert(
            instance.to_string(),
            files.iter().map(|s| s.to_string()).collect(),
        );
        self
    }

    pub fn with_content(mut self, file: &str, content: impl Into<String>) -> Self {
        self.downloads
            .insert(file.to_string(), FakeDownload::Content(Some(content.into())));
        self
    }

    /// Applied to every provider call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    async fn pause(&self) {
        if !self.delay.is_zero() {
            sleep(self.delay).await;
        }
    }
}

#[cfg(test)]
impl FakeProviderClient {
    pub fn with_instances(mut self, instances: &[&str]) -> Self {
        self.instances = instances.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn with_listing_error(mut self, message: &str) -> Self {
        self.listing_error = Some(message.to_string());
        self
    }

    pub fn with_absent_content(mut self, file: &str) -> Self {
        self.downloads
            .insert(file.to_string(), FakeDownload::Content(None));
        self
    }

    pub fn with_failure(mut self, file: &str, message: &str) -> Self {
        self.downloads
            .insert(file.to_string(), FakeDownload::Fail(message.to_string()));
        self
    }

    /// Cancels `token` as soon as `file` starts downloading.
    pub fn with_cancel_on(mut self, file: &str, token: CancellationToken) -> Self {
        self.cancel_on = Some((file.to_string(), token));
        self
    }

    /// Every file a download was attempted for, in call order.
    pub fn attempts(&self) -> Vec<LogFileRef> {
        self.attempts
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

#[async_trait]
impl ProviderClient for FakeProviderClient {
    async fn list_instances(&self) -> Result<Vec<Instance>> {
        self.pause().await;
        if let Some(message) = &self.listing_error {
            return Err(Error::listing("instances", message));
        }
        Ok(self.instances.clone())
    }

    async fn list_log_files(&self, instance: &str) -> Result<Vec<LogFileRef>> {
        self.pause().await;
        if !self.instances.iter().any(|known| known == instance) {
            return Err(Error::InstanceNotFound {
                instance: instance.to_string(),
            });
        }
        Ok(self.files.get(instance).cloned().unwrap_or_default())
    }

    async fn download_log_file(&self, _instance: &str, file: &str) -> Result<Option<LogContent>> {
        self.attempts
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(file.to_string());

        if let Some((target, token)) = &self.cancel_on {
            if target == file {
                token.cancel();
                sleep(Duration::from_secs(30)).await;
            }
        }
        self.pause().await;

        match self.downloads.get(file) {
            Some(FakeDownload::Content(content)) => Ok(content.clone()),
            #[cfg(test)]
            Some(FakeDownload::Fail(message)) => Err(Error::download(file, message)),
            None => Ok(Some(format!("contents of {file}\n"))),
        }
    }
}

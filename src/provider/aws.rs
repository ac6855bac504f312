use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_rds::error::DisplayErrorContext;
use aws_sdk_rds::Client;
use aws_types::region::Region;
use tracing::debug;

use super::{Instance, LogContent, LogFileRef, ProviderClient};
use crate::defaults::{AWS_SLOWQUERY_PREFIX, MAX_INSTANCES};
use crate::error::{Error, Result};

#[derive(Clone, Debug, Default)]
pub struct AwsConfig {
    pub profile: Option<String>,
    pub region: Option<String>,
}

#[derive(Clone)]
pub struct AwsProviderClient {
    client: Client,
}

impl AwsProviderClient {
    pub async fn connect(config: &AwsConfig) -> Self {
        let mut loader = aws_config::defaults(BehaviorVersion::latest());
        if let Some(profile) = config.profile.as_deref() {
            loader = loader.profile_name(profile);
        }
        if let Some(region) = config.region.clone() {
            loader = loader.region(Region::new(region));
        }
        let sdk_config = loader.load().await;
        Self {
            client: Client::new(&sdk_config),
        }
    }

    #[cfg(test)]
    fn from_client(client: Client) -> Self {
        Self { client }
    }

    async fn ensure_instance(&self, instance: &str) -> Result<()> {
        match self
            .client
            .describe_db_instances()
            .db_instance_identifier(instance)
            .send()
            .await
        {
            Ok(_) => Ok(()),
            Err(err)
                if err
                    .as_service_error()
                    .is_some_and(|service| service.is_db_instance_not_found_fault()) =>
            {
                Err(Error::InstanceNotFound {
                    instance: instance.to_string(),
                })
            }
            Err(err) => Err(Error::listing("DB instances", DisplayErrorContext(err))),
        }
    }
}

#[async_trait]
impl ProviderClient for AwsProviderClient {
    async fn list_instances(&self) -> Result<Vec<Instance>> {
        debug!(max = MAX_INSTANCES, "listing RDS instances");
        let response = self
            .client
            .describe_db_instances()
            .max_records(MAX_INSTANCES)
            .send()
            .await
            .map_err(|err| Error::listing("DB instances", DisplayErrorContext(err)))?;
        let instances: Vec<Instance> = response
            .db_instances()
            .iter()
            .filter_map(|db| db.db_instance_identifier())
            .map(str::to_string)
            .collect();
        if instances.is_empty() {
            debug!("no RDS instances found");
        }
        for instance in &instances {
            debug!(%instance, "found RDS instance");
        }
        Ok(instances)
    }

    async fn list_log_files(&self, instance: &str) -> Result<Vec<LogFileRef>> {
        self.ensure_instance(instance).await?;

        let mut files = Vec::new();
        let mut marker: Option<String> = None;
        loop {
            let response = self
                .client
                .describe_db_log_files()
                .db_instance_identifier(instance)
                .filename_contains(AWS_SLOWQUERY_PREFIX)
                .set_marker(marker.take())
                .send()
                .await
                .map_err(|err| Error::listing("log files", DisplayErrorContext(err)))?;

            files.extend(
                response
                    .describe_db_log_files()
                    .iter()
                    .filter_map(|details| details.log_file_name())
                    .map(str::to_string),
            );

            match response.marker() {
                Some(next) if !next.is_empty() => marker = Some(next.to_string()),
                _ => break,
            }
        }

        Ok(files)
    }

    async fn download_log_file(&self, instance: &str, file: &str) -> Result<Option<LogContent>> {
        let mut content: Option<LogContent> = None;
        let mut marker: Option<String> = None;
        loop {
            let response = self
                .client
                .download_db_log_file_portion()
                .db_instance_identifier(instance)
                .log_file_name(file)
                .set_marker(marker.take())
                .send()
                .await
                .map_err(|err| Error::download(file, DisplayErrorContext(err)))?;

            if let Some(data) = response.log_file_data() {
                content.get_or_insert_with(String::new).push_str(data);
            }

            let pending = response.additional_data_pending().unwrap_or(false);
            match response.marker() {
                Some(next) if pending && !next.is_empty() => marker = Some(next.to_string()),
                _ => break,
            }
            debug!(%file, "fetching next log portion");
        }

        Ok(content)
    }
}

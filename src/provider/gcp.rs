use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{Days, NaiveDate, Utc};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use oauth2::basic::BasicClient;
use oauth2::reqwest::async_http_client;
use oauth2::{AuthUrl, ClientId, ClientSecret, RefreshToken, TokenResponse, TokenUrl};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info};

use super::{Instance, LogContent, LogFileRef, ProviderClient};
use crate::defaults::{GCP_RETENTION_DAYS, GCP_SLOWQUERY_LOG_ID, MAX_INSTANCES};
use crate::error::{Error, Result};

const SQLADMIN_URL: &str = "https://sqladmin.googleapis.com/v1";
const LOGGING_ENTRIES_URL: &str = "https://logging.googleapis.com/v2/entries:list";
const GOOGLE_AUTH_URL: &str = "https://accounts.google.com/o/oauth2/auth";
const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const METADATA_TOKEN_URL: &str =
    "http://metadata.google.internal/computeMetadata/v1/instance/service-accounts/default/token";
const CLOUD_PLATFORM_SCOPE: &str = "https://www.googleapis.com/auth/cloud-platform";
const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const ASSERTION_LIFETIME_SECS: i64 = 3600;
const TIMEOUT_SECONDS: u64 = 60;
const INSTANCE_PAGE_SIZE: i32 = 500;
const LOG_REF_PREFIX: &str = "slowquery/mysql-slow.log/";

#[derive(Clone, Debug, Default)]
pub struct GcpConfig {
    pub project: String,
    pub credentials: Option<PathBuf>,
}

pub struct GcpProviderClient {
    http_client: reqwest::Client,
    project: String,
    token: String,
    sqladmin_url: String,
    logging_url: String,
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum CredentialsFile {
    AuthorizedUser {
        client_id: String,
        client_secret: String,
        refresh_token: String,
    },
    ServiceAccount(ServiceAccountKey),
}

#[derive(Deserialize)]
struct ServiceAccountKey {
    client_email: String,
    private_key: String,
    private_key_id: Option<String>,
    #[serde(default = "default_token_uri")]
    token_uri: String,
}

fn default_token_uri() -> String {
    GOOGLE_TOKEN_URL.to_string()
}

#[derive(Debug, Serialize, Deserialize)]
struct AssertionClaims {
    iss: String,
    scope: String,
    aud: String,
    iat: i64,
    exp: i64,
}

#[derive(Deserialize)]
struct AccessToken {
    access_token: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct InstancesPage {
    #[serde(default)]
    items: Vec<DatabaseInstance>,
    next_page_token: Option<String>,
}

#[derive(Deserialize)]
struct DatabaseInstance {
    name: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct EntriesPage {
    #[serde(default)]
    entries: Vec<LogEntry>,
    next_page_token: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LogEntry {
    text_payload: Option<String>,
}

impl GcpProviderClient {
    pub async fn connect(config: &GcpConfig) -> Result<Self> {
        if config.project.is_empty() {
            return Err(Error::Config("GCP project ID is required".into()));
        }

        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(TIMEOUT_SECONDS))
            .build()
            .map_err(|err| Error::Config(format!("failed to create HTTP client: {err}")))?;

        let path = credentials_path(
            config.credentials.as_deref(),
            std::env::var_os("GOOGLE_APPLICATION_CREDENTIALS"),
            std::env::var_os("HOME"),
        );
        let token = match path {
            Some(path) => token_from_file(&http_client, &path).await?,
            None => token_from_metadata(&http_client).await?,
        };

        Ok(Self {
            http_client,
            project: config.project.clone(),
            token,
            sqladmin_url: SQLADMIN_URL.to_string(),
            logging_url: LOGGING_ENTRIES_URL.to_string(),
        })
    }

    async fn fetch_instance_page(
        &self,
        max_results: i32,
        page_token: Option<&str>,
    ) -> Result<InstancesPage> {
        let url = format!("{}/projects/{}/instances", self.sqladmin_url, self.project);
        let mut request = self
            .http_client
            .get(&url)
            .bearer_auth(&self.token)
            .query(&[("maxResults", max_results)]);
        if let Some(token) = page_token {
            request = request.query(&[("pageToken", token)]);
        }

        let response = request
            .send()
            .await
            .map_err(|err| Error::listing("Cloud SQL instances", err))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::listing(
                "Cloud SQL instances",
                format!("HTTP {status}: {body}"),
            ));
        }

        response
            .json()
            .await
            .map_err(|err| Error::listing("Cloud SQL instances", err))
    }

    /// Walks every page of the project's instances looking for `instance`.
    async fn instance_exists(&self, instance: &str) -> Result<bool> {
        let mut page_token: Option<String> = None;
        loop {
            let page = self
                .fetch_instance_page(INSTANCE_PAGE_SIZE, page_token.as_deref())
                .await?;
            if page
                .items
                .iter()
                .any(|item| short_instance_name(&item.name) == instance)
            {
                return Ok(true);
            }
            match page.next_page_token {
                Some(next) if !next.is_empty() => page_token = Some(next),
                _ => return Ok(false),
            }
        }
    }

    fn entries_filter(&self, instance: &str, day: NaiveDate) -> Result<String> {
        let next = day
            .checked_add_days(Days::new(1))
            .ok_or_else(|| Error::Config(format!("date out of range: {day}")))?;
        let log_name = format!(
            "projects/{}/logs/{}",
            self.project,
            GCP_SLOWQUERY_LOG_ID.replace('/', "%2F")
        );
        Ok(format!(
            "resource.type=\"cloudsql_database\" \
             AND resource.labels.database_id=\"{}:{}\" \
             AND logName=\"{}\" \
             AND timestamp>=\"{}T00:00:00Z\" AND timestamp<\"{}T00:00:00Z\"",
            self.project, instance, log_name, day, next
        ))
    }
}

#[async_trait]
impl ProviderClient for GcpProviderClient {
    async fn list_instances(&self) -> Result<Vec<Instance>> {
        debug!(project = %self.project, max = MAX_INSTANCES, "listing Cloud SQL instances");
        let page = self.fetch_instance_page(MAX_INSTANCES, None).await?;
        let instances: Vec<Instance> = page
            .items
            .iter()
            .map(|item| short_instance_name(&item.name).to_string())
            .collect();
        for instance in &instances {
            info!(%instance, "found Cloud SQL instance");
        }
        Ok(instances)
    }

    async fn list_log_files(&self, instance: &str) -> Result<Vec<LogFileRef>> {
        if !self.instance_exists(instance).await? {
            return Err(Error::InstanceNotFound {
                instance: instance.to_string(),
            });
        }

        Ok(daily_log_refs(Utc::now().date_naive(), GCP_RETENTION_DAYS))
    }

    async fn download_log_file(&self, instance: &str, file: &str) -> Result<Option<LogContent>> {
        let day = parse_log_ref(file)
            .ok_or_else(|| Error::download(file, "not a Cloud SQL slow-query log reference"))?;
        let filter = self.entries_filter(instance, day)?;

        let mut content: Option<LogContent> = None;
        let mut page_token: Option<String> = None;
        loop {
            let mut body = json!({
                "resourceNames": [format!("projects/{}", self.project)],
                "filter": filter,
                "orderBy": "timestamp asc",
            });
            if let Some(token) = page_token.take() {
                body["pageToken"] = json!(token);
            }

            let response = self
                .http_client
                .post(&self.logging_url)
                .bearer_auth(&self.token)
                .json(&body)
                .send()
                .await
                .map_err(|err| Error::download(file, err))?;
            let status = response.status();
            if !status.is_success() {
                let text = response.text().await.unwrap_or_default();
                return Err(Error::download(file, format!("HTTP {status}: {text}")));
            }

            let page: EntriesPage = response
                .json()
                .await
                .map_err(|err| Error::download(file, err))?;
            for payload in page.entries.into_iter().filter_map(|entry| entry.text_payload) {
                let buffer = content.get_or_insert_with(String::new);
                buffer.push_str(&payload);
                if !payload.ends_with('\n') {
                    buffer.push('\n');
                }
            }

            match page.next_page_token {
                Some(next) if !next.is_empty() => page_token = Some(next),
                _ => break,
            }
        }

        Ok(content)
    }
}

/// Cloud SQL reports either a bare name or a `projects/.../instances/<name>` path.
fn short_instance_name(name: &str) -> &str {
    name.rsplit('/').next().unwrap_or(name)
}

/// One reference per UTC day, oldest first, ending with `today`.
fn daily_log_refs(today: NaiveDate, days: u64) -> Vec<LogFileRef> {
    (0..days)
        .rev()
        .filter_map(|offset| today.checked_sub_days(Days::new(offset)))
        .map(|day| format!("{LOG_REF_PREFIX}{}", day.format("%Y-%m-%d")))
        .collect()
}

fn parse_log_ref(file: &str) -> Option<NaiveDate> {
    let day = file.strip_prefix(LOG_REF_PREFIX)?;
    NaiveDate::parse_from_str(day, "%Y-%m-%d").ok()
}

/// Explicit path, then `GOOGLE_APPLICATION_CREDENTIALS`, then the gcloud
/// application-default credentials file.
fn credentials_path(
    explicit: Option<&Path>,
    env_credentials: Option<OsString>,
    home: Option<OsString>,
) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }
    if let Some(path) = env_credentials.filter(|value| !value.is_empty()) {
        return Some(PathBuf::from(path));
    }
    let adc = PathBuf::from(home?)
        .join(".config")
        .join("gcloud")
        .join("application_default_credentials.json");
    adc.is_file().then_some(adc)
}

async fn token_from_file(http_client: &reqwest::Client, path: &Path) -> Result<String> {
    let raw = tokio::fs::read_to_string(path).await.map_err(|err| {
        Error::Config(format!("unable to read credentials {}: {err}", path.display()))
    })?;
    let credentials: CredentialsFile = serde_json::from_str(&raw).map_err(|err| {
        Error::Config(format!("invalid credentials file {}: {err}", path.display()))
    })?;

    let token = match credentials {
        CredentialsFile::AuthorizedUser {
            client_id,
            client_secret,
            refresh_token,
        } => token_from_refresh(client_id, client_secret, refresh_token).await?,
        CredentialsFile::ServiceAccount(key) => {
            token_from_service_account(http_client, &key, Utc::now().timestamp()).await?
        }
    };

    debug!(path = %path.display(), "authenticated with credentials file");
    Ok(token)
}

async fn token_from_refresh(
    client_id: String,
    client_secret: String,
    refresh_token: String,
) -> Result<String> {
    let auth_url = AuthUrl::new(GOOGLE_AUTH_URL.to_string())
        .map_err(|err| Error::Config(format!("invalid authorization URL: {err}")))?;
    let token_url = TokenUrl::new(GOOGLE_TOKEN_URL.to_string())
        .map_err(|err| Error::Config(format!("invalid token URL: {err}")))?;
    let oauth_client = BasicClient::new(
        ClientId::new(client_id),
        Some(ClientSecret::new(client_secret)),
        auth_url,
        Some(token_url),
    );

    let token = oauth_client
        .exchange_refresh_token(&RefreshToken::new(refresh_token))
        .request_async(async_http_client)
        .await
        .map_err(|err| Error::Config(format!("OAuth2 token exchange failed: {err}")))?;
    Ok(token.access_token().secret().clone())
}

/// Signs the RS256 assertion for the JWT-bearer grant.
fn service_account_assertion(key: &ServiceAccountKey, now: i64) -> Result<String> {
    let mut header = Header::new(Algorithm::RS256);
    header.kid = key.private_key_id.clone();
    let claims = AssertionClaims {
        iss: key.client_email.clone(),
        scope: CLOUD_PLATFORM_SCOPE.to_string(),
        aud: key.token_uri.clone(),
        iat: now,
        exp: now + ASSERTION_LIFETIME_SECS,
    };
    let signing_key = EncodingKey::from_rsa_pem(key.private_key.as_bytes())
        .map_err(|err| Error::Config(format!("invalid service account private key: {err}")))?;
    jsonwebtoken::encode(&header, &claims, &signing_key)
        .map_err(|err| Error::Config(format!("unable to sign service account assertion: {err}")))
}

async fn token_from_service_account(
    http_client: &reqwest::Client,
    key: &ServiceAccountKey,
    now: i64,
) -> Result<String> {
    let assertion = service_account_assertion(key, now)?;
    let response = http_client
        .post(&key.token_uri)
        .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())])
        .send()
        .await
        .map_err(|err| Error::Config(format!("service account token request failed: {err}")))?;
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(Error::Config(format!(
            "service account token request refused: HTTP {status}: {body}"
        )));
    }
    let token: AccessToken = response
        .json()
        .await
        .map_err(|err| Error::Config(format!("invalid token response: {err}")))?;
    debug!(account = %key.client_email, "authenticated as service account");
    Ok(token.access_token)
}

async fn token_from_metadata(http_client: &reqwest::Client) -> Result<String> {
    let response = http_client
        .get(METADATA_TOKEN_URL)
        .header("Metadata-Flavor", "Google")
        .send()
        .await
        .map_err(|err| {
            Error::Config(format!(
                "no GCP credentials found and the metadata server is unreachable: {err}"
            ))
        })?;
    if !response.status().is_success() {
        return Err(Error::Config(format!(
            "metadata server refused token request: HTTP {}",
            response.status()
        )));
    }
    let token: AccessToken = response
        .json()
        .await
        .map_err(|err| Error::Config(format!("invalid metadata token response: {err}")))?;
    debug!("authenticated with metadata server");
    Ok(token.access_token)
}

use std::collections::HashSet;
use std::future::Future;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::output::LogSink;
use crate::provider::{Instance, LogContent, LogFileRef, ProviderClient};
use crate::resolver;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FileOutcome {
    Skipped,
    Written,
}

/// Per-file progress of a filtered download.
#[derive(Debug, Default)]
pub struct DownloadReport {
    pub files: Vec<(LogFileRef, FileOutcome)>,
    /// Content of every successful download, in download order.
    pub contents: Vec<LogContent>,
}

impl DownloadReport {
    pub fn written(&self) -> impl Iterator<Item = &str> {
        self.files
            .iter()
            .filter(|(_, outcome)| *outcome == FileOutcome::Written)
            .map(|(file, _)| file.as_str())
    }

    pub fn skipped(&self) -> usize {
        self.files
            .iter()
            .filter(|(_, outcome)| *outcome == FileOutcome::Skipped)
            .count()
    }
}

pub fn accepts(file: &str, filter: &str) -> bool {
    filter.is_empty() || file.contains(filter)
}

/// Files passing `filter`, in their original order.
pub fn filter_log_files<'a>(files: &'a [LogFileRef], filter: &str) -> Vec<&'a LogFileRef> {
    files.iter().filter(|file| accepts(file, filter)).collect()
}

pub async fn list_slow_query_logs(
    client: &dyn ProviderClient,
    instance: &str,
) -> Result<Vec<LogFileRef>> {
    let files = client.list_log_files(instance).await?;
    for file in &files {
        debug!(%file, "found log file");
    }
    Ok(files)
}

/// Downloads every file accepted by `filter` and appends it to `sink`.
///
/// The first failure ends the run; content appended before it stays in
/// the sink. Cancellation ends the run with `Error::Cancelled`.
pub async fn download_filtered(
    client: &dyn ProviderClient,
    instance: &str,
    filter: &str,
    files: &[LogFileRef],
    sink: &mut dyn LogSink,
    cancel: &CancellationToken,
) -> Result<DownloadReport> {
    let mut report = DownloadReport::default();
    download_filtered_into(client, instance, filter, files, sink, cancel, &mut report).await?;
    Ok(report)
}

/// Like `download_filtered`, but records progress in `report` so that an
/// aborted run still shows which files reached the sink.
pub async fn download_filtered_into(
    client: &dyn ProviderClient,
    instance: &str,
    filter: &str,
    files: &[LogFileRef],
    sink: &mut dyn LogSink,
    cancel: &CancellationToken,
    report: &mut DownloadReport,
) -> Result<()> {
    let mut attempted: HashSet<&str> = HashSet::new();

    for file in files {
        if !accepts(file, filter) {
            debug!(%file, %filter, "skipping log file");
            report.files.push((file.clone(), FileOutcome::Skipped));
            continue;
        }
        if !attempted.insert(file.as_str()) {
            debug!(%file, "skipping repeated log file");
            report.files.push((file.clone(), FileOutcome::Skipped));
            continue;
        }
        if cancel.is_cancelled() {
            warn!(%file, "cancelled before download");
            return Err(Error::Cancelled);
        }

        debug!(%file, "downloading log file");
        let content = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                warn!(%file, "cancelled during download");
                return Err(Error::Cancelled);
            }
            result = client.download_log_file(instance, file) => result?,
        };

        sink.append(content.as_deref())?;
        info!(
            %file,
            bytes = content.as_ref().map_or(0, String::len),
            destination = %sink.describe(),
            "wrote log file"
        );
        report.files.push((file.clone(), FileOutcome::Written));
        report.contents.extend(content);
    }

    if cancel.is_cancelled() {
        return Err(Error::Cancelled);
    }
    Ok(())
}

/// Awaits `step` unless `cancel` fires first.
async fn cancellable<T>(
    cancel: &CancellationToken,
    step: impl Future<Output = T>,
) -> Result<T> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Error::Cancelled),
        value = step => Ok(value),
    }
}

pub struct RunRequest<'a> {
    pub prefix: &'a str,
    pub filter: &'a str,
}

#[derive(Debug)]
pub struct RunSummary {
    pub instance: Instance,
    pub report: DownloadReport,
}

/// Resolve, enumerate, then download, against any provider.
pub async fn run(
    client: &dyn ProviderClient,
    request: &RunRequest<'_>,
    sink: &mut dyn LogSink,
    cancel: &CancellationToken,
) -> Result<RunSummary> {
    let instance = cancellable(cancel, resolver::resolve(client, request.prefix))
        .await?
        .ok_or_else(|| Error::NoInstanceFound {
            prefix: request.prefix.to_string(),
        })?;
    info!(%instance, "resolved instance");

    let files = cancellable(cancel, list_slow_query_logs(client, &instance)).await??;
    info!(
        %instance,
        count = files.len(),
        matching = filter_log_files(&files, request.filter).len(),
        "listed slow query logs"
    );

    let mut report = DownloadReport::default();
    if let Err(err) = download_filtered_into(
        client,
        &instance,
        request.filter,
        &files,
        sink,
        cancel,
        &mut report,
    )
    .await
    {
        warn!(
            %instance,
            written = ?report.written().collect::<Vec<_>>(),
            destination = %sink.describe(),
            "download aborted; files already written remain in the destination"
        );
        return Err(err);
    }
    info!(
        %instance,
        written = report.written().count(),
        skipped = report.skipped(),
        "download complete"
    );

    Ok(RunSummary { instance, report })
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use super::*;
    use crate::output::{FileSink, MemorySink};
    use crate::provider::FakeProviderClient;

    fn refs(files: &[&str]) -> Vec<LogFileRef> {
        files.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn filter_keeps_matching_files_in_order() {
        let files = refs(&["slowquery/a.log", "general/b.log", "slowquery/c.log"]);
        assert_eq!(
            filter_log_files(&files, "slowquery"),
            vec!["slowquery/a.log", "slowquery/c.log"]
        );
    }

    #[test]
    fn empty_filter_accepts_everything() {
        let files = refs(&["a.log", "b.log"]);
        assert_eq!(filter_log_files(&files, ""), vec!["a.log", "b.log"]);
    }

    #[test]
    fn filtering_is_idempotent() {
        let files = refs(&["slowquery/a.log", "general/b.log", "x-slowquery"]);
        let once: Vec<LogFileRef> = filter_log_files(&files, "slowquery")
            .into_iter()
            .cloned()
            .collect();
        let twice: Vec<LogFileRef> = filter_log_files(&once, "slowquery")
            .into_iter()
            .cloned()
            .collect();
        assert_eq!(once, twice);
    }

    #[tokio::test]
    async fn list_forwards_to_provider() {
        let client = FakeProviderClient::new().with_files("test-instance", &["log1.log", "log2.log"]);
        let files = list_slow_query_logs(&client, "test-instance").await.unwrap();
        assert_eq!(files, vec!["log1.log", "log2.log"]);
    }

    #[tokio::test]
    async fn list_without_files_is_empty() {
        let client = FakeProviderClient::new().with_files("empty-instance", &[]);
        let files = list_slow_query_logs(&client, "empty-instance").await.unwrap();
        assert!(files.is_empty());
    }

    #[tokio::test]
    async fn list_unknown_instance_is_not_found() {
        let client = FakeProviderClient::new().with_instances(&["known"]);
        let err = list_slow_query_logs(&client, "unknown").await.unwrap_err();
        assert!(matches!(err, Error::InstanceNotFound { instance } if instance == "unknown"));
    }

    #[tokio::test]
    async fn only_matching_files_are_downloaded() {
        let files = refs(&["slowquery/a.log", "general/b.log"]);
        let client = FakeProviderClient::new()
            .with_files("db", &["slowquery/a.log", "general/b.log"])
            .with_content("slowquery/a.log", "A\n");
        let mut sink = MemorySink::default();

        let report = download_filtered(
            &client,
            "db",
            "slowquery",
            &files,
            &mut sink,
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(client.attempts(), vec!["slowquery/a.log"]);
        assert_eq!(sink.written, vec!["A\n"]);
        assert_eq!(report.contents, vec!["A\n"]);
        assert_eq!(
            report.files,
            vec![
                ("slowquery/a.log".to_string(), FileOutcome::Written),
                ("general/b.log".to_string(), FileOutcome::Skipped),
            ]
        );
    }

    #[tokio::test]
    async fn empty_filter_downloads_all_in_order() {
        let files = refs(&["a.log", "b.log"]);
        let client = FakeProviderClient::new()
            .with_content("a.log", "first\n")
            .with_content("b.log", "second\n");
        let mut sink = MemorySink::default();

        let cancel = CancellationToken::new();

        let report = download_filtered(&client, "db", "", &files, &mut sink, &cancel)
            .await
            .unwrap();

        assert_eq!(client.attempts(), vec!["a.log", "b.log"]);
        assert_eq!(sink.written, vec!["first\n", "second\n"]);
        assert_eq!(report.written().collect::<Vec<_>>(), vec!["a.log", "b.log"]);
        assert_eq!(report.skipped(), 0);
    }

    #[tokio::test]
    async fn failure_aborts_and_keeps_earlier_output() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("slow.log");
        let files = refs(&["slowquery/1.log", "slowquery/2.log", "slowquery/3.log"]);
        let client = FakeProviderClient::new()
            .with_content("slowquery/1.log", "one\n")
            .with_failure("slowquery/2.log", "connection reset")
            .with_content("slowquery/3.log", "three\n");
        let mut sink = FileSink::new(&path);

        let err = download_filtered(
            &client,
            "db",
            "slowquery",
            &files,
            &mut sink,
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, Error::Download { ref file, .. } if file == "slowquery/2.log"));
        assert_eq!(client.attempts(), vec!["slowquery/1.log", "slowquery/2.log"]);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "one\n");
    }

    #[tokio::test]
    async fn absent_content_counts_as_written_without_output() {
        let files = refs(&["a.log", "b.log"]);
        let client = FakeProviderClient::new()
            .with_absent_content("a.log")
            .with_content("b.log", "");
        let mut sink = MemorySink::default();

        let cancel = CancellationToken::new();

        let report = download_filtered(&client, "db", "", &files, &mut sink, &cancel)
            .await
            .unwrap();

        assert_eq!(report.written().count(), 2);
        assert_eq!(report.contents, vec![""]);
        assert_eq!(sink.written, vec![""]);
    }

    #[tokio::test]
    async fn write_failure_aborts_batch() {
        let files = refs(&["a.log", "b.log", "c.log"]);
        let client = FakeProviderClient::new();
        let mut sink = MemorySink {
            fail_after: Some(1),
            ..MemorySink::default()
        };

        let err = download_filtered(&client, "db", "", &files, &mut sink, &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Write { .. }));
        assert_eq!(client.attempts(), vec!["a.log", "b.log"]);
        assert_eq!(sink.written, vec!["contents of a.log\n"]);
    }

    #[tokio::test]
    async fn cancelled_token_stops_before_any_download() {
        let files = refs(&["a.log"]);
        let client = FakeProviderClient::new();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let mut sink = MemorySink::default();

        let err = download_filtered(&client, "db", "", &files, &mut sink, &cancel)
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Cancelled));
        assert!(client.attempts().is_empty());
    }

    #[tokio::test]
    async fn cancellation_during_download_is_not_a_download_error() {
        let files = refs(&["a.log", "b.log", "c.log"]);
        let cancel = CancellationToken::new();
        let client = FakeProviderClient::new().with_cancel_on("b.log", cancel.clone());
        let mut sink = MemorySink::default();

        let err = download_filtered(&client, "db", "", &files, &mut sink, &cancel)
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Cancelled));
        assert_eq!(client.attempts(), vec!["a.log", "b.log"]);
        assert_eq!(sink.written, vec!["contents of a.log\n"]);
    }

    #[tokio::test]
    async fn run_resolves_lists_and_downloads() {
        let client = FakeProviderClient::new()
            .with_instances(&["other-instance"])
            .with_files(
                "test-instance",
                &["slowquery/mysql-slowquery.log", "slowquery/mysql-slowquery.log.1"],
            )
            .with_content("slowquery/mysql-slowquery.log.1", "rotated\n");
        let mut sink = MemorySink::default();
        let request = RunRequest {
            prefix: "test",
            filter: ".log.1",
        };

        let summary = run(&client, &request, &mut sink, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(summary.instance, "test-instance");
        assert_eq!(summary.report.skipped(), 1);
        assert_eq!(sink.written, vec!["rotated\n"]);
    }

    #[tokio::test]
    async fn run_without_matching_instance_fails() {
        let client = FakeProviderClient::new().with_instances(&["prod-db"]);
        let mut sink = MemorySink::default();
        let request = RunRequest {
            prefix: "staging",
            filter: "",
        };

        let err = run(&client, &request, &mut sink, &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, Error::NoInstanceFound { prefix } if prefix == "staging"));
        assert!(client.attempts().is_empty());
    }

    #[tokio::test]
    async fn run_with_failed_listing_reports_no_instance() {
        let client = FakeProviderClient::new()
            .with_instances(&["prod-db"])
            .with_listing_error("access denied");
        let mut sink = MemorySink::default();
        let request = RunRequest {
            prefix: "prod",
            filter: "",
        };

        let err = run(&client, &request, &mut sink, &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, Error::NoInstanceFound { .. }));
    }

    #[tokio::test]
    async fn repeated_refs_are_downloaded_once() {
        let files = refs(&["slowquery/a.log", "slowquery/a.log", "slowquery/b.log"]);
        let client = FakeProviderClient::new();
        let mut sink = MemorySink::default();

        let cancel = CancellationToken::new();

        let report = download_filtered(&client, "db", "", &files, &mut sink, &cancel)
            .await
            .unwrap();

        assert_eq!(client.attempts(), vec!["slowquery/a.log", "slowquery/b.log"]);
        assert_eq!(
            sink.written,
            vec!["contents of slowquery/a.log\n", "contents of slowquery/b.log\n"]
        );
        assert_eq!(
            report.files,
            vec![
                ("slowquery/a.log".to_string(), FileOutcome::Written),
                ("slowquery/a.log".to_string(), FileOutcome::Skipped),
                ("slowquery/b.log".to_string(), FileOutcome::Written),
            ]
        );
    }

    #[tokio::test]
    async fn aborted_download_keeps_progress_in_report() {
        let files = refs(&["1.log", "2.log", "3.log"]);
        let client = FakeProviderClient::new().with_failure("2.log", "timeout");
        let mut sink = MemorySink::default();
        let mut report = DownloadReport::default();

        let err = download_filtered_into(
            &client,
            "db",
            "",
            &files,
            &mut sink,
            &CancellationToken::new(),
            &mut report,
        )
        .await
        .unwrap_err();

        assert!(matches!(err, Error::Download { .. }));
        assert_eq!(report.written().collect::<Vec<_>>(), vec!["1.log"]);
        assert_eq!(report.contents, vec!["contents of 1.log\n"]);
    }

    #[tokio::test]
    async fn cancellation_while_every_file_is_skipped_is_reported() {
        let files = refs(&["general/a.log"]);
        let client = FakeProviderClient::new();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let mut sink = MemorySink::default();

        let err = download_filtered(&client, "db", "slowquery", &files, &mut sink, &cancel)
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Cancelled));
    }

    #[tokio::test]
    async fn cancellation_interrupts_slow_instance_listing() {
        let client = FakeProviderClient::new()
            .with_files("prod-db", &["slowquery/a.log"])
            .with_delay(Duration::from_secs(30));
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });
        let mut sink = MemorySink::default();
        let request = RunRequest {
            prefix: "prod",
            filter: "",
        };

        let started = Instant::now();
        let err = run(&client, &request, &mut sink, &cancel).await.unwrap_err();

        assert!(matches!(err, Error::Cancelled));
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(client.attempts().is_empty());
        assert!(sink.written.is_empty());
    }
}

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

mod cli;
mod defaults;
mod error;
mod logging;
mod output;
mod pipeline;
mod provider;
mod resolver;
mod testdata;

use cli::{Cli, Command};
use pipeline::RunRequest;
use provider::{AwsProviderClient, FakeProviderClient, GcpProviderClient, ProviderClient, ProviderKind};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init(cli.debug, output::is_stdout(&cli.output));

    if let Some(Command::Testlog { output_dir }) = &cli.command {
        testdata::generate(output_dir)
            .with_context(|| format!("generating test logs in {}", output_dir.display()))?;
        return Ok(());
    }

    info!(provider = ?cli.provider, fake = cli.fake, "start slowlog-fetch");

    let client: Box<dyn ProviderClient> = if cli.fake {
        Box::new(FakeProviderClient::with_sample_data())
    } else {
        match cli.provider {
            ProviderKind::Aws => Box::new(AwsProviderClient::connect(&cli.aws_config()).await),
            ProviderKind::Gcp => Box::new(GcpProviderClient::connect(&cli.gcp_config()).await?),
        }
    };

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling");
            on_signal.cancel();
        }
    });

    let mut sink = output::open_sink(&cli.output);
    let request = RunRequest {
        prefix: &cli.instance,
        filter: &cli.filter,
    };

    match pipeline::run(client.as_ref(), &request, sink.as_mut(), &cancel).await {
        Ok(summary) => {
            info!(
                instance = %summary.instance,
                files = summary.report.written().count(),
                bytes = summary.report.contents.iter().map(String::len).sum::<usize>(),
                destination = %sink.describe(),
                "finished"
            );
            Ok(())
        }
        Err(err) => {
            error!(error = %err, "run aborted");
            Err(err.into())
        }
    }
}

use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;
use tracing::error;

use items_service::{
    cli::{Cli, Command},
    provision,
    server::Server,
    store::connector_for,
};

fn init_tracing() {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();

    let cli = Cli::parse();
    match run(cli.into_command()).await {
        Ok(code) => code,
        Err(err) => {
            error!("items-service exited with error: {err:?}");
            ExitCode::FAILURE
        }
    }
}

async fn run(command: Command) -> Result<ExitCode> {
    match command {
        Command::Serve(args) => {
            let connector = connector_for(&args.store_uri, args.connect_timeout())?;
            let outcome = Server::new(args, connector).run_until_signal().await?;
            Ok(outcome.exit_code())
        }
        Command::Provision(args) => {
            provision::run(&args.store_uri, &args.credentials).await?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

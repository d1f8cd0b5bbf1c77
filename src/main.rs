use std::{error::Error, sync::Arc};

use clap::Parser;
use metrics_exporter_prometheus::PrometheusBuilder;
use time::OffsetDateTime;
use tracing_subscriber::EnvFilter;

use ledgerbook::{
    api::{self, parse_date, AppState},
    config::{CliArgs, Command, Config},
    ledger::Ledger,
    storage::open_backend,
};

fn main() {
    let cli = CliArgs::parse();
    let config = Config::load(&cli);
    init_tracing(&config);

    let command = cli.command.clone().unwrap_or(Command::Serve);
    if let Err(e) = run(command, config) {
        tracing::error!(error = %e, "ledgerbook exited with an error");
        std::process::exit(1);
    }
}

fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if config.logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn run(command: Command, config: Config) -> Result<(), Box<dyn Error>> {
    match command {
        Command::Serve => serve(config),
        Command::Migrate => {
            let mut storage = config.storage.clone();
            storage.auto_migrate = true;
            open_backend(&storage)?;
            tracing::info!(backend = ?storage.backend, "Migrations applied");
            Ok(())
        }
        Command::TrialBalance { as_of } => {
            let ledger = Ledger::new(open_backend(&config.storage)?);
            let as_of = match as_of.as_deref() {
                Some(value) => parse_date(value)?,
                None => OffsetDateTime::now_utc().date(),
            };
            print!("{}", ledger.trial_balance(as_of)?);
            Ok(())
        }
    }
}

/// The Postgres driver is blocking, so the backend is opened before the
/// runtime starts and every storage call runs on the blocking pool.
fn serve(config: Config) -> Result<(), Box<dyn Error>> {
    let ledger = Arc::new(Ledger::new(open_backend(&config.storage)?));
    let addr = config.listen_addr()?;

    let runtime = tokio::runtime::Builder::new_multi_thread().enable_all().build()?;
    runtime.block_on(async move {
        let handle = PrometheusBuilder::new().install_recorder()?;

        let mut state = AppState::new(ledger);
        state.metrics = Some(handle);

        #[cfg(feature = "nl")]
        {
            state.agent = match ledgerbook::agent::StatementAgent::from_config(&config.agent) {
                Ok(agent) => Some(Arc::new(agent)),
                Err(e) => {
                    tracing::warn!(error = %e, "Statement agent disabled");
                    None
                }
            };
        }

        let app = api::router(state, Arc::new(config.auth.clone()));

        tracing::info!(%addr, auth = config.auth.enabled, "API listening");
        axum::Server::bind(&addr)
            .serve(app.into_make_service())
            .await?;
        Ok::<(), Box<dyn Error>>(())
    })
}

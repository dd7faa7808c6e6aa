use std::{process::ExitCode, sync::Arc};

use quizroom::{
    collaborator::InMemoryQuizStore,
    config::{Config, LogFormat},
    gateway::Gateway,
    server,
};
use tracing_subscriber::EnvFilter;

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Pretty => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let config = match Config::from_env() {
        Ok(config) => config,
        Err(error) => {
            eprintln!("invalid configuration: {error}");
            return ExitCode::FAILURE;
        }
    };
    init_tracing(config.log_format);

    let address = match config.bind_address() {
        Ok(address) => address,
        Err(error) => {
            tracing::error!(%error, "cannot bind");
            return ExitCode::FAILURE;
        }
    };

    let store = match &config.quiz_file {
        Some(path) => match InMemoryQuizStore::load(path) {
            Ok(store) => store,
            Err(error) => {
                tracing::error!(path = %path.display(), %error, "cannot load quizzes");
                return ExitCode::FAILURE;
            }
        },
        None => {
            tracing::warn!("QUIZ_FILE not set, starting without quizzes");
            InMemoryQuizStore::default()
        }
    };

    let gateway = Gateway::new(Arc::new(store), config.game);
    let shutdown = {
        let gateway = gateway.clone();
        async move {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("shutting down");
            gateway.shutdown().await;
        }
    };

    let (address, server) =
        match warp::serve(server::routes(gateway)).try_bind_with_graceful_shutdown(address, shutdown) {
            Ok(bound) => bound,
            Err(error) => {
                tracing::error!(%address, %error, "cannot bind");
                return ExitCode::FAILURE;
            }
        };
    tracing::info!(%address, "listening");
    server.await;

    ExitCode::SUCCESS
}

use std::process::ExitCode;

use dotenvy::dotenv;
use service::app::Rollar;
use service::errors::ServiceError;
use tracing::{error, info};

fn main() -> ExitCode {
    dotenv().ok();

    let path = configs::resolve_path(std::env::args().skip(1));
    let cfg = match configs::AppConfig::load_and_validate(&path) {
        Ok(cfg) => cfg,
        Err(e) => {
            // Logging is configured from this file, so fall back to defaults to report it.
            common::utils::logging::init_logging_default(None);
            error!(service = "rollar", event = "config_invalid", %path, error = %e, "failed to load configuration");
            return ExitCode::FAILURE;
        }
    };
    common::utils::logging::init_logging(Some(&cfg.logging.level), cfg.logging.json);

    let pid = std::process::id();
    std::panic::set_hook(Box::new(move |info| {
        error!(service = "rollar", event = "panic", pid, message = %info, "unhandled panic occurred");
    }));

    let mut builder = tokio::runtime::Builder::new_multi_thread();
    builder.enable_all();
    if let Some(w) = cfg.server.worker_threads {
        builder.worker_threads(w);
    }
    let rt = match builder.build() {
        Ok(rt) => rt,
        Err(e) => {
            error!(service = "rollar", event = "runtime_build_failed", error = %e, "failed to build tokio runtime");
            return ExitCode::FAILURE;
        }
    };

    info!(
        service = "rollar",
        event = "start",
        pid,
        version = common::ROLLAR_VERSION,
        config = %path,
        threads = cfg.server.worker_threads.unwrap_or_default(),
        "rollar starting"
    );

    let handle = rt.handle().clone();
    rt.block_on(async move {
        let app = match Rollar::bootstrap(cfg, handle).await {
            Ok(app) => app,
            Err(e) => {
                let event = match e {
                    ServiceError::Configuration(_) => "config_invalid",
                    ServiceError::Connection(_) => "database_unavailable",
                    _ => "bootstrap_failed",
                };
                error!(service = "rollar", event, error = %e, "bootstrap failed");
                return ExitCode::FAILURE;
            }
        };

        if let Err(e) = app.startup().await {
            error!(service = "rollar", event = "startup_failed", error = %e, "startup failed");
            return ExitCode::FAILURE;
        }

        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(service = "rollar", event = "signal_error", error = %e, "failed to listen for Ctrl+C");
        }
        info!(service = "rollar", event = "shutdown_signal", pid, "shutting down");

        match app.shutdown().await {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                error!(service = "rollar", event = "shutdown_failed", error = %e, "shutdown failed");
                ExitCode::FAILURE
            }
        }
    })
}

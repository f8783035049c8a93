use crate::cli::ServeArgs;
use crate::infra::{build_services, AppState, Services};
use crate::routes::with_compliance_routes;
use axum::Extension;
use axum_prometheus::PrometheusMetricLayer;
use coi_engine::compliance::run_expiry_jobs;
use coi_engine::config::AppConfig;
use coi_engine::error::AppError;
use coi_engine::telemetry;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub(crate) async fn run(mut args: ServeArgs) -> Result<(), AppError> {
    let mut config = AppConfig::load()?;

    if let Some(host) = args.host.take() {
        config.server.host = host;
    }
    if let Some(port) = args.port.take() {
        config.server.port = port;
    }

    telemetry::init(&config.telemetry)?;

    let (prometheus_layer, prometheus_handle) = PrometheusMetricLayer::pair();
    let readiness_flag = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let app_state = AppState {
        readiness: readiness_flag.clone(),
        metrics: Arc::new(prometheus_handle),
    };

    let Services {
        lifecycle,
        scheduler,
        ..
    } = build_services(config.compliance.auto_apply, config.scheduler.schedule());

    let jobs_cancel = CancellationToken::new();
    let jobs_handle = tokio::spawn(run_expiry_jobs(
        lifecycle.clone(),
        scheduler,
        config.scheduler.interval,
        jobs_cancel.clone(),
    ));

    let app = with_compliance_routes(lifecycle)
        .layer(Extension(app_state))
        .layer(prometheus_layer);

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    readiness_flag.store(true, Ordering::Release);

    info!(
        ?config.environment,
        %addr,
        auto_apply = ?config.compliance.auto_apply,
        thresholds = ?config.scheduler.thresholds,
        "coi compliance engine ready"
    );

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    readiness_flag.store(false, Ordering::Release);
    jobs_cancel.cancel();
    if tokio::time::timeout(Duration::from_secs(5), jobs_handle)
        .await
        .is_err()
    {
        warn!("expiry jobs did not stop within 5s");
    }
    info!("coi compliance engine stopped");

    served?;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "failed to install Ctrl-C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("received SIGINT, starting graceful shutdown");
        }
        () = terminate => {
            info!("received SIGTERM, starting graceful shutdown");
        }
    }
}

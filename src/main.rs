use std::sync::Arc;

use cwl_status::api;
use cwl_status::coc::CocConnector;
use cwl_status::config::Config;
use cwl_status::metrics;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let config = Config::load();
    metrics::register_metrics();

    if config.upstream.credentials.is_none() {
        tracing::warn!(
            "No upstream credentials configured; set COC_API_TOKEN or COC_EMAIL and COC_PASSWORD"
        );
    }

    let connector =
        CocConnector::new(config.upstream.clone()).expect("Failed to build upstream HTTP client");
    let app = api::router(Arc::new(connector));

    let addr = format!("{}:{}", config.bind_addr, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .unwrap_or_else(|e| panic!("Failed to bind to {addr}: {e}"));

    tracing::info!("CWL status listening on {addr}");
    axum::serve(listener, app)
        .await
        .expect("Failed to start server");
}

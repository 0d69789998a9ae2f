use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context as _;
use axum::Router;
use axum::body::Body;
use axum::http::{HeaderName, Request};
use axum::routing::{get, post};
use branchbot::config::ConfigCache;
use branchbot::github::{self, GithubClient};
use branchbot::handlers::{self, BranchCleaner};
use secrecy::SecretString;
use tower::ServiceBuilder;
use tower::limit::ConcurrencyLimitLayer;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;
use tracing as log;

const REQUEST_ID_HEADER: &str = "x-request-id";
const DEFAULT_PLUGIN_NAME: &str = "branch-cleaner";
const MAX_CONCURRENT_REQUESTS: usize = 100;

async fn run_server(addr: SocketAddr) -> anyhow::Result<()> {
    let webhook_secret: SecretString = std::env::var("GITHUB_WEBHOOK_SECRET")
        .context("GITHUB_WEBHOOK_SECRET must be set")?
        .into();
    let plugin_name = std::env::var("BRANCHBOT_PLUGIN_NAME")
        .unwrap_or_else(|_| DEFAULT_PLUGIN_NAME.to_string());
    let mut gh = GithubClient::new_from_env()?;
    gh.set_retry_rate_limit(true);

    let ctx = Arc::new(handlers::Context {
        github: gh,
        config_cache: ConfigCache::new(),
        branch_cleaner: BranchCleaner::new(plugin_name),
        webhook_secret,
    });

    let request_id = HeaderName::from_static(REQUEST_ID_HEADER);
    let middleware = ServiceBuilder::new()
        .layer(SetRequestIdLayer::new(request_id.clone(), MakeRequestUuid))
        .layer(
            TraceLayer::new_for_http().make_span_with(|req: &Request<Body>| {
                let request_id = req
                    .headers()
                    .get(REQUEST_ID_HEADER)
                    .and_then(|id| id.to_str().ok())
                    .unwrap_or_default();
                log::info_span!(
                    "request",
                    request_id = %request_id,
                    method = %req.method(),
                    uri = %req.uri(),
                )
            }),
        )
        .layer(PropagateRequestIdLayer::new(request_id))
        .layer(CatchPanicLayer::new())
        .layer(ConcurrencyLimitLayer::new(MAX_CONCURRENT_REQUESTS));

    let app = Router::new()
        .route("/", get(|| async { handlers::DESCRIPTION }))
        .route("/github-hook", post(github::webhook))
        .layer(middleware)
        .with_state(ctx);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    log::info!("Listening on http://{}", addr);
    axum::serve(listener, app).await?;
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    branchbot::logger::init();

    let port = match std::env::var("PORT") {
        Ok(port) => port
            .parse()
            .with_context(|| format!("PORT {port:?} is not a valid port"))?,
        Err(_) => 8000,
    };
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    run_server(addr).await.context("Failed to run the server")
}

use envconfig::Envconfig;
use kube::Client;
use simpleapi_operator::{config::OperatorConfig, init_tracing, runtime};
use tracing::info;

#[tokio::main(flavor = "multi_thread")]
async fn main() -> anyhow::Result<()> {
    init_tracing("info");

    // kube's rustls stack needs a process-wide crypto provider.
    if let Err(e) = rustls::crypto::CryptoProvider::install_default(
        rustls::crypto::aws_lc_rs::default_provider(),
    ) {
        tracing::debug!(
            ?e,
            "CryptoProvider already installed or incompatible; proceeding"
        );
    }

    let cfg = OperatorConfig::init_from_env()?.normalized();
    let route_kind = cfg.route_kind()?;
    info!(?cfg, %route_kind, "Starting simpleapi-operator");

    let client = Client::try_default().await?;
    runtime::run_all(client, cfg).await
}

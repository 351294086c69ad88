use std::net::SocketAddr;

use kube::Client;
use tokio::task::JoinHandle;

use crate::{config::OperatorConfig, controller::run_controller, web::run_http_server};

/// Compute the HTTP bind address based on config.
pub fn compute_http_addr(cfg: &OperatorConfig) -> SocketAddr {
    ([0, 0, 0, 0], cfg.http_port).into()
}

/// Spawn the Kubernetes controller loop.
pub fn spawn_controller(
    client: Client,
    cfg: OperatorConfig,
) -> JoinHandle<anyhow::Result<()>> {
    tokio::spawn(async move { run_controller(client, cfg).await })
}

/// Spawn the health endpoint server.
pub fn spawn_http(addr: SocketAddr) -> JoinHandle<anyhow::Result<()>> {
    tokio::spawn(async move { run_http_server(addr).await })
}

/// Start the controller and the HTTP server. Returns once the controller
/// stops (shutdown signal) or either task fails.
pub async fn run_all(client: Client, cfg: OperatorConfig) -> anyhow::Result<()> {
    let http_addr = compute_http_addr(&cfg);

    let controller = spawn_controller(client, cfg);
    let http = spawn_http(http_addr);
    race(controller, http).await
}

/// Wait for whichever task ends first. The HTTP server never exits on its
/// own, so a finished controller aborts it.
async fn race(
    mut controller: JoinHandle<anyhow::Result<()>>,
    mut http: JoinHandle<anyhow::Result<()>>,
) -> anyhow::Result<()> {
    tokio::select! {
        res = &mut controller => {
            http.abort();
            res??;
        }
        res = &mut http => {
            controller.abort();
            res??;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_addr_binds_all_interfaces() {
        let cfg = OperatorConfig {
            http_port: 9090,
            ..Default::default()
        };
        assert_eq!(compute_http_addr(&cfg).to_string(), "0.0.0.0:9090");
    }

    fn forever() -> JoinHandle<anyhow::Result<()>> {
        tokio::spawn(async {
            std::future::pending::<()>().await;
            Ok(())
        })
    }

    #[tokio::test]
    async fn controller_exit_stops_http_server() {
        let controller = tokio::spawn(async { Ok::<(), anyhow::Error>(()) });
        race(controller, forever()).await.unwrap();
    }

    #[tokio::test]
    async fn controller_failure_is_returned() {
        let controller = tokio::spawn(async { Err::<(), _>(anyhow::anyhow!("watch failed")) });
        let err = race(controller, forever()).await.unwrap_err();
        assert_eq!(err.to_string(), "watch failed");
    }

    #[tokio::test]
    async fn http_failure_is_returned() {
        let http = tokio::spawn(async { Err::<(), _>(anyhow::anyhow!("bind failed")) });
        let err = race(forever(), http).await.unwrap_err();
        assert_eq!(err.to_string(), "bind failed");
    }
}

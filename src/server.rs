//! Server
use crate::core::config::{APP_NAME, APP_VERSION, Config};
use crate::core::container::Container;
use crate::integration::tibber::Home;
use tokio_util::sync::CancellationToken;

/// Run the server with the given configuration and shutdown token
pub async fn server(config: Config, shutdown_token: CancellationToken) {
    let container = Container::new(config);
    log::info!("{APP_NAME} v{APP_VERSION} started");

    let homes = tokio::select! {
        _ = shutdown_token.cancelled() => {
            container.shutdown().await;
            return;
        }
        homes = discover_homes(&container) => homes,
    };

    let service = container.bridge_service(homes);
    service.run(shutdown_token).await;
    container.shutdown().await;
}

/// Discover the homes of the account, retrying until successful.
async fn discover_homes(container: &Container) -> Vec<Home> {
    let mut interval = tokio::time::interval(tokio::time::Duration::from_secs(60));
    loop {
        interval.tick().await;
        match container.tibber_client().homes().await {
            Ok(homes) => {
                if homes.is_empty() {
                    log::warn!("No homes found for the account");
                }
                for home in &homes {
                    log::info!("Discovered home {} ({})", home.address, home.id);
                }
                return homes;
            }
            Err(e) => log::error!("Failed to discover homes: {e}"),
        }
    }
}

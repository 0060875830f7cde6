use crate::{
    healthcheck::{Listen, Server},
    index::SharedServiceHealthIndex,
};
use tracing::{debug, info};

/// Pushes the index's view of health-checked services to the health check server whenever it
/// changes, until `drain` is signaled.
///
/// Changes are debounced through a single-key queue, so a burst of watch events results in one
/// sync of the latest state.
pub async fn run<L>(index: SharedServiceHealthIndex, mut server: Server<L>, drain: drain::Watch)
where
    L: Listen + Send,
    L::Handle: Send,
{
    let updates = index.read().updates().clone();
    let sync = async {
        while let Some(((), ())) = updates.get().await {
            let (services, endpoints) = {
                let index = index.read();
                (index.services(), index.local_endpoints())
            };
            debug!(services = services.len(), "Syncing health checks");
            server.sync_services(services);
            server.sync_endpoints(endpoints);
            updates.done(&());
        }
    };
    tokio::pin!(sync);

    tokio::select! {
        _ = &mut sync => {}
        handle = drain.signaled() => {
            info!("Closing health check listeners");
            updates.shutdown();
            handle.release_after(sync).await;
        }
    }
}

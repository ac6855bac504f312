use tracing::{debug, warn};

use crate::provider::{Instance, ProviderClient};

/// Returns the first instance, in provider order, whose name starts with
/// `prefix`. A failed listing is logged and treated as "no instance".
pub async fn resolve(client: &dyn ProviderClient, prefix: &str) -> Option<Instance> {
    let instances = match client.list_instances().await {
        Ok(instances) => instances,
        Err(err) => {
            warn!(error = %err, "instance listing failed");
            return None;
        }
    };

    if instances.is_empty() {
        debug!("provider reported no instances");
    }

    instances
        .into_iter()
        .find(|instance| matches_prefix(instance, prefix))
}

fn matches_prefix(instance: &str, prefix: &str) -> bool {
    instance.len() >= prefix.len() && &instance.as_bytes()[..prefix.len()] == prefix.as_bytes()
}

//! App state and host status command handlers.

use std::sync::Arc;

use capsule_types::app::Action;
use capsule_types::events::EventType;
use capsule_types::network::NetworkLink;
use serde_json::Value;
use tracing::info;

use super::{param, str_param, to_json};
use crate::rpc::RpcError;
use crate::DaemonState;

type Result = std::result::Result<Value, RpcError>;

/// Current app state.
pub async fn get_app_state(state: &Arc<DaemonState>) -> Result {
    let app = state.app_state.read().await.clone();
    to_json(&app)
}

/// Apply a UI action and return the new state.
pub async fn dispatch_action(state: &Arc<DaemonState>, params: &Value) -> Result {
    let action: Action = param(params, "action")?;
    let next = state.dispatch(&action).await?;
    to_json(&next)
}

/// Report the host's network link. Returns whether downloads may run now.
pub async fn set_network_status(state: &Arc<DaemonState>, params: &Value) -> Result {
    let link = str_param(params, "link")?;
    let link = NetworkLink::parse(link)
        .ok_or_else(|| RpcError::invalid_params("link must be offline, metered or unmetered"))?;

    let before = state.app_state.read().await.network;
    state.dispatch(&Action::NetworkChanged { link }).await?;
    let downloads_allowed = state.network_available().await;

    if before != link {
        info!(link = link.as_str(), downloads_allowed, "network status changed");
        state.event_bus.publish(
            EventType::NetworkChanged,
            serde_json::json!({ "link": link, "downloads_allowed": downloads_allowed }),
        );
    }

    Ok(serde_json::json!({
        "link": link,
        "downloads_allowed": downloads_allowed,
    }))
}

//! Process-wide client.
//!
//! An ordinary [`Client`] kept in a static slot for hosts that stream a
//! single meeting. It is created on first use from the environment, which
//! also installs the tracing subscriber, and lives until [`uninit`].

use crate::client::Client;
use crate::config::{Config, JoinParams};
use crate::errors::RtmsError;
use common::config::LogConfig;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::debug;

static CLIENT: Mutex<Option<Arc<Client>>> = Mutex::new(None);

fn slot() -> MutexGuard<'static, Option<Arc<Client>>> {
    CLIENT.lock().unwrap_or_else(PoisonError::into_inner)
}

/// The process-wide client, created on first call.
///
/// # Errors
///
/// Returns `RtmsError::Config` if the environment holds an invalid value.
pub fn client() -> Result<Arc<Client>, RtmsError> {
    let mut slot = slot();
    if let Some(client) = slot.as_ref() {
        return Ok(Arc::clone(client));
    }

    common::logging::init(&LogConfig::from_env());
    let client = Arc::new(Client::new(Config::from_env()?));
    debug!(target: "rtms.client", client_id = %client.id(), "Process-wide client created");
    *slot = Some(Arc::clone(&client));
    Ok(client)
}

/// Install `client` as the process-wide client, returning the one it replaces.
///
/// The replaced client is not left; call [`Client::leave`] on it if needed.
pub fn install(client: Client) -> Option<Arc<Client>> {
    slot().replace(Arc::new(client))
}

/// Join on the process-wide client.
///
/// # Errors
///
/// See [`Client::join`].
pub async fn join(params: JoinParams) -> Result<(), RtmsError> {
    client()?.join(params).await
}

/// Leave on the process-wide client. A no-op if it was never created.
///
/// # Errors
///
/// See [`Client::leave`].
pub fn leave() -> Result<(), RtmsError> {
    let current = slot().clone();
    match current {
        Some(client) => client.leave(),
        None => Ok(()),
    }
}

/// Leave and drop the process-wide client. The next [`client`] call
/// creates a fresh one.
///
/// # Errors
///
/// See [`Client::leave`].
pub fn uninit() -> Result<(), RtmsError> {
    let current = slot().take();
    match current {
        Some(client) => {
            debug!(target: "rtms.client", client_id = %client.id(), "Tearing down process-wide client");
            client.leave()
        }
        None => Ok(()),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::signaling::SignalingState;
    use crate::transport::mock::{MockConnector, MockPeer};
    use serde_json::json;

    // Single test: the slot is process-wide and tests run in parallel
    #[tokio::test]
    async fn test_global_lifecycle() {
        let peer = MockPeer::new();
        let connector = MockConnector::new(peer.clone());
        install(Client::with_connector(Config::default(), Arc::new(connector)));

        let first = client().unwrap();
        assert!(Arc::ptr_eq(&first, &client().unwrap()));

        join(
            JoinParams::new("m1", "s1", "ws://127.0.0.1:1")
                .with_signature("sig")
                .with_manual_poll(),
        )
        .await
        .unwrap();
        peer.push_json(&json!({"msg_type": "SIGNALING_HAND_SHAKE_RESP", "status_code": 0}));
        first.poll().unwrap();
        assert_eq!(first.state(), SignalingState::Ready);

        uninit().unwrap();
        assert_eq!(first.state(), SignalingState::Terminated);
        assert_eq!(peer.close_count(), 1);

        // Nothing left to tear down
        uninit().unwrap();
        leave().unwrap();
    }
}

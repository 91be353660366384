//! Diff broadcaster: pushes each state transition to synchronized clients

use std::sync::Arc;
use towercg_state::{diff::diff_trees, StateStore, StoreSubscription};
use tracing::trace;

use crate::connection::ConnectionRegistry;
use crate::protocol::Envelope;

/// Store subscriber that turns every transition into one diff frame.
///
/// Runs inside the store's notification, so frames are queued for each
/// connection in transition order. Empty diffs are not sent.
pub struct DiffBroadcaster {
    _subscription: StoreSubscription,
}

impl DiffBroadcaster {
    pub fn attach(store: &StateStore, registry: Arc<ConnectionRegistry>) -> Self {
        let subscription = store.subscribe(move |transition| {
            let delta = diff_trees(&transition.old, &transition.new);
            if delta.is_empty() {
                trace!(version = transition.version, "Transition without changes, nothing to send");
                return Ok(());
            }

            let frame = Envelope::diff(&delta)?.encode()?;
            let sent = registry.broadcast(Some(transition.version), &frame);
            trace!(
                version = transition.version,
                namespaces = delta.len(),
                "Sent diff to {} connections",
                sent
            );
            Ok(())
        });

        Self {
            _subscription: subscription,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::Connection;
    use serde_json::{json, Value};
    use tokio::sync::mpsc;
    use towercg_core::BackgroundFailurePolicy;
    use towercg_state::{Action, MemoryStorageEngine, Reducer, TreeDiff};
    use uuid::Uuid;

    struct Lamp;

    impl Reducer for Lamp {
        fn namespace(&self) -> &str {
            "lamp"
        }

        fn default_state(&self) -> Value {
            json!({"on": false})
        }

        fn reduce(&self, _state: &Value, action: &Action) -> Option<Value> {
            match action.kind.as_str() {
                "lamp/set" => Some(json!({"on": action.payload})),
                // A fresh but equal value: replaced by reference, not by content
                "lamp/touch" => Some(json!({"on": false})),
                _ => None,
            }
        }
    }

    #[tokio::test]
    async fn test_sends_diffs_and_skips_empty_ones() {
        let store = StateStore::open(
            Arc::new(MemoryStorageEngine::new()),
            vec![Arc::new(Lamp) as Arc<dyn Reducer>],
            BackgroundFailurePolicy::Log,
        )
        .await
        .unwrap();
        let registry = Arc::new(ConnectionRegistry::new());
        let _broadcaster = DiffBroadcaster::attach(&store, registry.clone());

        let (tx, mut rx) = mpsc::unbounded_channel();
        let connection = Connection {
            id: Uuid::new_v4(),
            authenticated: true,
        };
        registry.begin_registration().insert(connection, store.version(), tx);

        store.dispatch(Action::of("lamp/touch"));
        assert!(rx.try_recv().is_err());

        store.dispatch(Action::new("lamp/set", json!(true)));
        let frame: Envelope = serde_json::from_str(&rx.try_recv().unwrap()).unwrap();
        assert_eq!(frame.name, crate::protocol::STATE_CHANGED);

        let delta: TreeDiff = serde_json::from_value(frame.payload).unwrap();
        let mut client = serde_json::Map::new();
        client.insert("lamp".into(), json!({"on": false}));
        delta.apply_to(&mut client).unwrap();
        assert_eq!(Value::Object(client), json!({"lamp": {"on": true}}));
    }
}

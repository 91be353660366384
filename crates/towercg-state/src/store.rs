//! Reducer-driven state store
//!
//! `dispatch` recomputes the tree by handing the action to every reducer,
//! swaps the new tree in, asks the persistence engine to save it without
//! waiting, and notifies subscribers with `(old, new)` before returning.
//!
//! Dispatches are serialized. A dispatch from another thread waits for the
//! running one to finish and then applies its own action before returning.
//! A dispatch issued by a subscriber while it is being notified is queued
//! and applied by the enclosing dispatch, in the order it was issued.
//! Reducers never run reentrantly.

use serde_json::Value;
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::thread::{self, ThreadId};
use tokio::runtime::Handle;
use towercg_core::{call_guarded, BackgroundFailurePolicy};
use tracing::{debug, error, info, warn};

use crate::action::Action;
use crate::error::{Result, StateStoreError};
use crate::persistence::PersistenceEngine;
use crate::tree::StateTree;

/// One namespace of the tree, owned by one plugin.
pub trait Reducer: Send + Sync {
    /// Key of this reducer's sub-state in the tree
    fn namespace(&self) -> &str;

    /// Sub-state used when nothing was persisted for this namespace
    fn default_state(&self) -> Value;

    /// New sub-state for `action`, or `None` when the action is not
    /// recognized and the current sub-state is kept as is.
    fn reduce(&self, state: &Value, action: &Action) -> Option<Value>;
}

/// A completed dispatch.
#[derive(Debug, Clone)]
pub struct Transition {
    /// Monotonic tree version; the tree loaded at startup is version 0
    pub version: u64,
    pub action: Action,
    pub old: Arc<StateTree>,
    pub new: Arc<StateTree>,
}

impl Transition {
    /// Namespaces whose sub-state was replaced by this transition.
    pub fn changed(&self) -> impl Iterator<Item = &str> {
        self.new.iter().filter_map(|(key, new)| match self.old.get(key) {
            Some(old) if Arc::ptr_eq(old, new) => None,
            _ => Some(key),
        })
    }
}

/// Outcome of `StateStore::dispatch`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// Applied and notified before `dispatch` returned
    Applied,
    /// Issued from a subscriber; the enclosing dispatch will apply it
    Queued,
    /// A reducer panicked; the tree was left unchanged
    Discarded,
}

type StoreListener = Arc<dyn Fn(&Transition) -> anyhow::Result<()> + Send + Sync>;

struct Current {
    version: u64,
    tree: Arc<StateTree>,
}

#[derive(Default)]
struct Queue {
    pending: VecDeque<Action>,
    /// Thread running the current drain
    drainer: Option<ThreadId>,
}

struct StoreInner {
    reducers: Vec<Arc<dyn Reducer>>,
    current: RwLock<Current>,
    queue: Mutex<Queue>,
    /// Held for the whole of a drain
    drain: Mutex<()>,
    listeners: RwLock<Vec<(u64, StoreListener)>>,
    next_listener: AtomicU64,
    engine: Arc<dyn PersistenceEngine>,
    runtime: Handle,
    policy: BackgroundFailurePolicy,
}

/// Shared handle to the store. Cloning is cheap.
#[derive(Clone)]
pub struct StateStore {
    inner: Arc<StoreInner>,
}

impl StateStore {
    /// Load the persisted tree and build the store.
    ///
    /// Every reducer gets an entry: the persisted one if present, its
    /// default otherwise. Persisted keys without a reducer are dropped.
    pub async fn open(
        engine: Arc<dyn PersistenceEngine>,
        reducers: Vec<Arc<dyn Reducer>>,
        policy: BackgroundFailurePolicy,
    ) -> Result<Self> {
        let mut seen = HashSet::new();
        for reducer in &reducers {
            if !seen.insert(reducer.namespace().to_string()) {
                return Err(StateStoreError::DuplicateNamespace(
                    reducer.namespace().to_string(),
                ));
            }
        }

        let mut persisted = engine.load().await?.unwrap_or_default();
        let mut tree = StateTree::new();
        for reducer in &reducers {
            let key = reducer.namespace();
            let value = match persisted.remove(key) {
                Some(value) => value,
                None => {
                    debug!(namespace = key, "Using default state");
                    reducer.default_state()
                }
            };
            tree.insert(key.to_string(), Arc::new(value));
        }
        for key in persisted.keys() {
            warn!(namespace = %key, "Dropping persisted state with no registered plugin");
        }

        info!("State store opened with {} namespaces", tree.len());

        Ok(Self {
            inner: Arc::new(StoreInner {
                reducers,
                current: RwLock::new(Current {
                    version: 0,
                    tree: Arc::new(tree),
                }),
                queue: Mutex::new(Queue::default()),
                drain: Mutex::new(()),
                listeners: RwLock::new(Vec::new()),
                next_listener: AtomicU64::new(0),
                engine,
                runtime: Handle::current(),
                policy,
            }),
        })
    }

    /// Current tree.
    pub fn state(&self) -> Arc<StateTree> {
        Arc::clone(&self.read_current().tree)
    }

    /// Current tree together with its version.
    pub fn snapshot(&self) -> (u64, Arc<StateTree>) {
        let current = self.read_current();
        (current.version, Arc::clone(&current.tree))
    }

    pub fn version(&self) -> u64 {
        self.read_current().version
    }

    /// Current sub-state of one namespace.
    pub fn get(&self, namespace: &str) -> Option<Arc<Value>> {
        self.read_current().tree.get(namespace).cloned()
    }

    pub fn namespaces(&self) -> impl Iterator<Item = &str> {
        self.inner.reducers.iter().map(|r| r.namespace())
    }

    pub fn dispatch(&self, action: Action) -> Dispatch {
        self.dispatch_with_state(action).0
    }

    /// Dispatch, and return the tree as it stood right after this action.
    ///
    /// Later dispatches from other tasks do not show up in the returned
    /// tree. A queued action has not run yet, so it gets the current one.
    pub fn dispatch_with_state(&self, action: Action) -> (Dispatch, Arc<StateTree>) {
        let me = thread::current().id();
        {
            let mut queue = self.lock_queue();
            if queue.drainer == Some(me) {
                queue.pending.push_back(action);
                debug!("Dispatch from a subscriber, queued action");
                drop(queue);
                return (Dispatch::Queued, self.state());
            }
        }

        let _drain = self
            .inner
            .drain
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        let _guard = DrainGuard::enter(self, me);

        // Left behind by a drain that unwound
        self.drain_pending();
        let outcome = self.apply(action);
        self.drain_pending();
        outcome
    }

    /// Register a listener for every transition. Listeners run in
    /// registration order; a listener that fails or panics is logged and
    /// skipped.
    pub fn subscribe<F>(&self, listener: F) -> StoreSubscription
    where
        F: Fn(&Transition) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let id = self.inner.next_listener.fetch_add(1, Ordering::Relaxed);
        self.inner
            .listeners
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push((id, Arc::new(listener)));
        StoreSubscription {
            id,
            store: Some(Arc::downgrade(&self.inner)),
        }
    }

    fn drain_pending(&self) {
        loop {
            let next = self.lock_queue().pending.pop_front();
            match next {
                Some(action) => {
                    self.apply(action);
                }
                None => break,
            }
        }
    }

    fn apply(&self, action: Action) -> (Dispatch, Arc<StateTree>) {
        let old = self.state();
        let tree = match call_guarded(|| Ok(self.reduce(&old, &action))) {
            Ok(tree) => Arc::new(tree),
            Err(e) => {
                error!(action = %action.kind, "Reducer failed, action discarded: {:#}", e);
                return (Dispatch::Discarded, old);
            }
        };

        let transition = {
            let mut current = self
                .inner
                .current
                .write()
                .unwrap_or_else(|e| e.into_inner());
            current.version += 1;
            current.tree = Arc::clone(&tree);
            Transition {
                version: current.version,
                action,
                old,
                new: tree,
            }
        };

        debug!(
            action = %transition.action.kind,
            version = transition.version,
            "Dispatched"
        );

        self.persist(Arc::clone(&transition.new));
        self.notify(&transition);
        (Dispatch::Applied, transition.new)
    }

    fn persist(&self, tree: Arc<StateTree>) {
        let engine = Arc::clone(&self.inner.engine);
        self.inner
            .policy
            .spawn_on(&self.inner.runtime, "state-save", async move {
                engine.save(&tree).await.map_err(anyhow::Error::from)
            });
    }

    fn notify(&self, transition: &Transition) {
        let listeners: Vec<StoreListener> = self
            .inner
            .listeners
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(_, l)| Arc::clone(l))
            .collect();

        for listener in listeners {
            if let Err(e) = call_guarded(|| listener(transition)) {
                warn!(
                    action = %transition.action.kind,
                    "State subscriber failed: {:#}", e
                );
            }
        }
    }

    fn read_current(&self) -> std::sync::RwLockReadGuard<'_, Current> {
        self.inner
            .current
            .read()
            .unwrap_or_else(|e| e.into_inner())
    }

    fn lock_queue(&self) -> std::sync::MutexGuard<'_, Queue> {
        self.inner.queue.lock().unwrap_or_else(|e| e.into_inner())
    }
}

// Marks the current thread as the drainer until dropped. Actions still
// pending after an unwind stay queued for the next dispatch.
struct DrainGuard<'a> {
    store: &'a StateStore,
}

impl<'a> DrainGuard<'a> {
    fn enter(store: &'a StateStore, me: ThreadId) -> Self {
        store.lock_queue().drainer = Some(me);
        Self { store }
    }
}

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        let mut queue = self.store.lock_queue();
        queue.drainer = None;
        if thread::panicking() && !queue.pending.is_empty() {
            warn!(
                "Drain interrupted, {} queued actions left for the next dispatch",
                queue.pending.len()
            );
        }
    }
}

/// Handle to a store listener. Dropping it unsubscribes.
#[must_use = "dropping a StoreSubscription cancels it"]
pub struct StoreSubscription {
    id: u64,
    store: Option<Weak<StoreInner>>,
}

impl StoreSubscription {
    pub fn cancel(mut self) {
        self.release();
    }

    /// Keep the listener for the life of the store.
    pub fn detach(mut self) {
        self.store = None;
    }

    fn release(&mut self) {
        if let Some(inner) = self.store.take().and_then(|weak| weak.upgrade()) {
            inner
                .listeners
                .write()
                .unwrap_or_else(|e| e.into_inner())
                .retain(|(id, _)| *id != self.id);
        }
    }
}

impl Drop for StoreSubscription {
    fn drop(&mut self) {
        self.release();
    }
}

//! towercg-state: Central State Store
//!
//! Provides:
//! - `StateStore`: one reducer per plugin, combined under the plugin's name
//! - `PersistenceEngine`: load once at startup, save after every dispatch
//! - `diff`: structural deltas between two trees, plus the matching apply
//! - `reducers`: helpers for common reducer shapes
//!
//! ```text
//! dispatch(action) ─► reducers ─► new StateTree ─┬─► subscribers (old, new)
//!                                                 └─► engine.save (detached)
//! ```

pub mod action;
pub mod diff;
pub mod error;
pub mod persistence;
pub mod reducers;
pub mod store;
pub mod tree;

pub use action::Action;
pub use diff::{Delta, TreeDiff};
pub use error::{Result, StateStoreError};
pub use persistence::{FileStorageEngine, MemoryStorageEngine, PersistenceEngine};
pub use store::{Dispatch, Reducer, StateStore, StoreSubscription, Transition};
pub use tree::StateTree;

/// Prelude for convenient imports
pub mod prelude {
    pub use super::action::Action;
    pub use super::reducers::{combine, keyed_setter, setter, toggle, ReduceFn};
    pub use super::store::{Reducer, StateStore, Transition};
    pub use super::tree::StateTree;
}

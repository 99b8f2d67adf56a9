//! The global state container.

use std::collections::HashMap;

use serde_json::Value;

use crate::event::{Event, StoreId};
use crate::store::{StoreHandle, ViewHandle};

/// Shared, store-agnostic application data handed to every handler.
pub type AppState = serde_json::Map<String, Value>;

/// The single source of truth.
///
/// Only ever replaced wholesale: the dispatcher folds an effect map over an
/// owned copy and installs the result. Nothing outside the reducer table
/// can produce a new value, so fields are read through accessors.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GlobalState {
    pub(crate) root_store_id: Option<StoreId>,
    pub(crate) root_view: Option<ViewHandle>,
    pub(crate) app_state: AppState,
    pub(crate) stores: HashMap<StoreId, StoreHandle>,
    pub(crate) event_queue: Vec<Event>,
}

impl GlobalState {
    /// Empty state seeded with the given app state.
    pub fn with_app_state(app_state: AppState) -> Self {
        Self {
            app_state,
            ..Self::default()
        }
    }

    /// Id of the mounted root store.
    pub fn root_store_id(&self) -> Option<&StoreId> {
        self.root_store_id.as_ref()
    }

    /// Host view the root store was mounted into.
    pub fn root_view(&self) -> Option<&ViewHandle> {
        self.root_view.as_ref()
    }

    pub fn app_state(&self) -> &AppState {
        &self.app_state
    }

    /// Registered store by id.
    pub fn store(&self, id: &StoreId) -> Option<&StoreHandle> {
        self.stores.get(id)
    }

    /// All registered stores.
    pub fn stores(&self) -> &HashMap<StoreId, StoreHandle> {
        &self.stores
    }

    /// Events waiting for the scheduler, in queue order.
    pub fn event_queue(&self) -> &[Event] {
        &self.event_queue
    }

    /// Replace the app state wholesale. Intended for custom reducers.
    pub fn set_app_state(mut self, app_state: AppState) -> Self {
        self.app_state = app_state;
        self
    }

    /// Set one app state key. Intended for custom reducers.
    pub fn assoc_app_state(mut self, key: impl Into<String>, value: Value) -> Self {
        self.app_state.insert(key.into(), value);
        self
    }

    /// Take the queued events, leaving the queue empty.
    pub(crate) fn take_queue(&mut self) -> Vec<Event> {
        std::mem::take(&mut self.event_queue)
    }
}

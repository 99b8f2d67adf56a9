//! Effects and insertion-ordered effect maps.
//!
//! Handlers never change state themselves; they return an [`EffectMap`]
//! naming the changes they want. The dispatcher folds the map through the
//! reducer table in insertion order.

use std::fmt;

use indexmap::IndexMap;
use serde::de::{self, Deserializer, MapAccess, Visitor};
use serde::Deserialize;
use serde_json::Value;

use crate::event::{Event, EventName, StoreId};
use crate::query::Query;
use crate::store::{StoreHandle, ViewHandle};

/// Built-in effect names, used as keys in the reducer table.
pub mod names {
    /// Insert a store into the registry and schedule its `init` event.
    pub const REGISTER_STORE: &str = "registerStore";
    /// Schedule a store's `remove` event followed by its removal.
    pub const DEREGISTER_STORE: &str = "deregisterStore";
    /// Remove a store from the registry immediately.
    pub const DISSOC_STORE: &str = "dissocStore";
    /// Append events to the deferred queue.
    pub const DISPATCH_AFTER: &str = "dispatchAfter";
    /// Accepted alias of [`DISPATCH_AFTER`] when decoding JSON.
    pub const ADD_DISPATCH_TO_QUEUE: &str = "addDispatchToQueue";
    /// Replace a store's private local state.
    pub const CHANGE_STORE_STATE: &str = "changeStoreState";
    /// Hand a query to the network collaborator.
    pub const SEND_QUERY: &str = "sendQuery";
    /// Record the root store and its view host.
    pub const MOUNT_ROOT: &str = "mountRoot";

    /// Every name owned by a built-in reducer.
    pub const BUILTIN: &[&str] = &[
        REGISTER_STORE,
        DEREGISTER_STORE,
        DISSOC_STORE,
        DISPATCH_AFTER,
        ADD_DISPATCH_TO_QUEUE,
        CHANGE_STORE_STATE,
        SEND_QUERY,
        MOUNT_ROOT,
    ];
}

/// A named intent to change global state.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// `registerStore`: add the store to the registry.
    RegisterStore(StoreHandle),
    /// `deregisterStore`: run the store's `remove` handler, then drop it.
    DeregisterStore(StoreHandle),
    /// `dissocStore`: drop the store's registry entry right away.
    ///
    /// Meant to be issued by the deregistration sequence only.
    DissocStore(StoreHandle),
    /// `dispatchAfter`: append events to the deferred queue.
    DispatchAfter(Vec<Event>),
    /// `changeStoreState`: replace the target store's local state.
    ChangeStoreState {
        /// Store whose cell is replaced.
        store_id: StoreId,
        /// New contents of the cell.
        new_value: Value,
    },
    /// `sendQuery`: ask the network collaborator to run a query and
    /// dispatch `response_event` with `[status, payload]` when it returns.
    SendQuery {
        /// The request.
        query: Query,
        /// Event dispatched with the response.
        response_event: EventName,
    },
    /// `mountRoot`: record the root store id and the host view handle.
    MountRoot {
        /// The root store.
        store_id: StoreId,
        /// Where the root view was mounted.
        view: ViewHandle,
    },
    /// Any application-defined effect, resolved by a registered custom reducer.
    Custom {
        /// Effect name.
        name: String,
        /// Arbitrary payload handed to the reducer.
        payload: Value,
    },
}

impl Effect {
    /// Application-defined effect.
    pub fn custom(name: impl Into<String>, payload: Value) -> Self {
        Self::Custom {
            name: name.into(),
            payload,
        }
    }

    /// The reducer table key for this effect.
    pub fn name(&self) -> &str {
        match self {
            Self::RegisterStore(_) => names::REGISTER_STORE,
            Self::DeregisterStore(_) => names::DEREGISTER_STORE,
            Self::DissocStore(_) => names::DISSOC_STORE,
            Self::DispatchAfter(_) => names::DISPATCH_AFTER,
            Self::ChangeStoreState { .. } => names::CHANGE_STORE_STATE,
            Self::SendQuery { .. } => names::SEND_QUERY,
            Self::MountRoot { .. } => names::MOUNT_ROOT,
            Self::Custom { name, .. } => name,
        }
    }

    /// Decode one entry of a JSON effect object.
    fn from_json(name: String, payload: Value) -> Result<Self, String> {
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct ChangeStoreState {
            store_id: StoreId,
            new_value: Value,
        }

        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct SendQuery {
            query: Query,
            response_event: EventName,
        }

        match name.as_str() {
            names::DISPATCH_AFTER | names::ADD_DISPATCH_TO_QUEUE => {
                let events: Vec<Event> =
                    serde_json::from_value(payload).map_err(|e| format!("{name}: {e}"))?;
                Ok(Self::DispatchAfter(events))
            }
            names::CHANGE_STORE_STATE => {
                let p: ChangeStoreState =
                    serde_json::from_value(payload).map_err(|e| format!("{name}: {e}"))?;
                Ok(Self::ChangeStoreState {
                    store_id: p.store_id,
                    new_value: p.new_value,
                })
            }
            names::SEND_QUERY => {
                let p: SendQuery =
                    serde_json::from_value(payload).map_err(|e| format!("{name}: {e}"))?;
                Ok(Self::SendQuery {
                    query: p.query,
                    response_event: p.response_event,
                })
            }
            names::REGISTER_STORE
            | names::DEREGISTER_STORE
            | names::DISSOC_STORE
            | names::MOUNT_ROOT => Err(format!("{name} carries a live handle and has no JSON form")),
            _ => Ok(Self::Custom { name, payload }),
        }
    }
}

/// Insertion-ordered mapping from effect name to effect.
///
/// Each name appears at most once. Inserting an effect whose name is
/// already present replaces it in place, keeping its original position.
#[derive(Debug, Clone, Default)]
pub struct EffectMap {
    effects: IndexMap<String, Effect>,
}

impl EffectMap {
    /// Create an empty effect map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `effect` under its name, returning the effect it replaced.
    pub fn insert(&mut self, effect: Effect) -> Option<Effect> {
        self.effects.insert(effect.name().to_owned(), effect)
    }

    /// Builder form of [`insert`](EffectMap::insert).
    pub fn with(mut self, effect: Effect) -> Self {
        self.insert(effect);
        self
    }

    /// Look up an effect by name.
    pub fn get(&self, name: &str) -> Option<&Effect> {
        self.effects.get(name)
    }

    /// Effects in fold order.
    pub fn iter(&self) -> impl Iterator<Item = &Effect> {
        self.effects.values()
    }

    /// Effect names in fold order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.effects.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.effects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.effects.is_empty()
    }

    /// Decode an effect map from its JSON object form.
    ///
    /// # Errors
    ///
    /// Returns the decode error message if `value` is not an object, or if a
    /// built-in effect's payload has the wrong shape.
    pub fn from_json(value: Value) -> Result<Self, String> {
        serde_json::from_value(value).map_err(|e| e.to_string())
    }
}

// Order is part of an effect map's meaning, unlike a plain map.
impl PartialEq for EffectMap {
    fn eq(&self, other: &Self) -> bool {
        self.effects.len() == other.effects.len()
            && self.effects.iter().eq(other.effects.iter())
    }
}

impl IntoIterator for EffectMap {
    type Item = Effect;
    type IntoIter = indexmap::map::IntoValues<String, Effect>;

    fn into_iter(self) -> Self::IntoIter {
        self.effects.into_values()
    }
}

impl FromIterator<Effect> for EffectMap {
    fn from_iter<I: IntoIterator<Item = Effect>>(iter: I) -> Self {
        iter.into_iter().fold(Self::new(), Self::with)
    }
}

impl<'de> Deserialize<'de> for EffectMap {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct EffectMapVisitor;

        impl<'de> Visitor<'de> for EffectMapVisitor {
            type Value = EffectMap;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("an object mapping effect names to payloads")
            }

            fn visit_map<A>(self, mut map: A) -> Result<EffectMap, A::Error>
            where
                A: MapAccess<'de>,
            {
                let mut effects = EffectMap::new();
                while let Some((name, payload)) = map.next_entry::<String, Value>()? {
                    effects.insert(Effect::from_json(name, payload).map_err(de::Error::custom)?);
                }
                Ok(effects)
            }
        }

        deserializer.deserialize_map(EffectMapVisitor)
    }
}

//! Event naming codec and the queued event type.
//!
//! Every event is addressed to a store by namespacing its local name with
//! the store's id: `"{store_id}/{local_name}"`. The one exception is the
//! reserved [`APPLY_EFFECTS`] control event, whose single parameter is an
//! effect map applied without any handler lookup.

use std::fmt;
use std::str::FromStr;

use serde::de::{self, Deserializer, SeqAccess, Visitor};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::effect::EffectMap;
use crate::error::EventNameError;

/// Separator between the store namespace and the local event name.
pub const SEPARATOR: char = '/';

/// Namespace of the reserved control event.
pub const CONTROL_NAMESPACE: &str = "conductor";

/// Local name of the reserved control event.
pub const APPLY_EFFECTS_LOCAL: &str = "apply-effects";

/// The reserved control event. Its single parameter IS an effect map.
pub const APPLY_EFFECTS: &str = "conductor/apply-effects";

/// Unique, stable identifier of a store.
///
/// Guaranteed non-empty and free of the namespace separator, which keeps
/// [`parse_event_name`] an exact inverse of [`make_event_name`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct StoreId(String);

impl StoreId {
    /// Validate and wrap a store identifier.
    ///
    /// # Errors
    ///
    /// * [`EventNameError::EmptyStoreId`] if `id` is empty.
    /// * [`EventNameError::SeparatorInStoreId`] if `id` contains `/`.
    pub fn new(id: impl Into<String>) -> Result<Self, EventNameError> {
        let id = id.into();
        if id.is_empty() {
            return Err(EventNameError::EmptyStoreId);
        }
        if id.contains(SEPARATOR) {
            return Err(EventNameError::SeparatorInStoreId(id));
        }
        Ok(Self(id))
    }

    /// Returns the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StoreId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for StoreId {
    type Error = EventNameError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<StoreId> for String {
    fn from(id: StoreId) -> Self {
        id.0
    }
}

impl FromStr for StoreId {
    type Err = EventNameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

/// A namespaced event identifier: `{namespace: StoreId, local: String}`.
///
/// Serialized as the canonical `"{namespace}/{local}"` string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EventName {
    namespace: StoreId,
    local: String,
}

impl EventName {
    /// The store this event is addressed to.
    pub fn namespace(&self) -> &StoreId {
        &self.namespace
    }

    /// The event name local to its store.
    pub fn local(&self) -> &str {
        &self.local
    }

    /// The reserved `conductor/apply-effects` control event.
    pub fn apply_effects() -> Self {
        Self {
            namespace: StoreId(CONTROL_NAMESPACE.to_owned()),
            local: APPLY_EFFECTS_LOCAL.to_owned(),
        }
    }

    /// Whether this is the reserved control event.
    pub fn is_apply_effects(&self) -> bool {
        self.namespace.as_str() == CONTROL_NAMESPACE && self.local == APPLY_EFFECTS_LOCAL
    }
}

impl fmt::Display for EventName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{SEPARATOR}{}", self.namespace, self.local)
    }
}

impl FromStr for EventName {
    type Err = EventNameError;

    /// Splits at the first `/`. Everything after it is the local name.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (namespace, local) = s
            .split_once(SEPARATOR)
            .ok_or_else(|| EventNameError::MissingSeparator(s.to_owned()))?;
        Ok(make_event_name(&StoreId::new(namespace)?, local))
    }
}

impl TryFrom<String> for EventName {
    type Error = EventNameError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<EventName> for String {
    fn from(name: EventName) -> Self {
        name.to_string()
    }
}

/// Build the canonical event name addressed to `store_id`.
///
/// Total: any valid [`StoreId`] combined with any local name yields an
/// event name that [`parse_event_name`] maps straight back.
pub fn make_event_name(store_id: &StoreId, local: impl Into<String>) -> EventName {
    EventName {
        namespace: store_id.clone(),
        local: local.into(),
    }
}

/// Split an event name back into its store id and local name.
pub fn parse_event_name(name: &EventName) -> (StoreId, String) {
    (name.namespace.clone(), name.local.clone())
}

/// An event awaiting dispatch, either immediately or from the deferred queue.
///
/// The JSON form of a named event is the array `[eventName, ...params]`,
/// for example `["s1/foo", 42]`.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// An event addressed to a store, with positional parameters.
    Named {
        /// Namespaced target.
        name: EventName,
        /// Positional parameters passed to the handler after its context.
        params: Vec<Value>,
    },

    /// The reserved control event carrying an already-built effect map.
    ApplyEffects(EffectMap),
}

impl Event {
    /// Shorthand for [`Event::Named`].
    pub fn named(name: EventName, params: Vec<Value>) -> Self {
        Self::Named { name, params }
    }

    /// Address `local` on `store_id` with the given parameters.
    pub fn to_store(store_id: &StoreId, local: &str, params: Vec<Value>) -> Self {
        Self::Named {
            name: make_event_name(store_id, local),
            params,
        }
    }

    /// The event name this event is dispatched under.
    pub fn name(&self) -> EventName {
        match self {
            Self::Named { name, .. } => name.clone(),
            Self::ApplyEffects(_) => EventName::apply_effects(),
        }
    }
}

impl<'de> Deserialize<'de> for Event {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct EventVisitor;

        impl<'de> Visitor<'de> for EventVisitor {
            type Value = Event;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("an array of the form [eventName, ...params]")
            }

            fn visit_seq<A>(self, mut seq: A) -> Result<Event, A::Error>
            where
                A: SeqAccess<'de>,
            {
                let name: EventName = seq
                    .next_element()?
                    .ok_or_else(|| de::Error::invalid_length(0, &self))?;
                let mut params = Vec::new();
                while let Some(param) = seq.next_element::<Value>()? {
                    params.push(param);
                }
                Ok(Event::Named { name, params })
            }
        }

        deserializer.deserialize_seq(EventVisitor)
    }
}

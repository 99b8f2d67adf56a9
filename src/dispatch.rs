//! The dispatcher: single-writer engine over the global state container.
//!
//! [`Engine`] is synchronous and owns the only mutable copy of
//! [`GlobalState`]. A dispatch resolves the event to a handler, invokes
//! it, folds the returned effect map through the reducer table, and
//! installs the result in one assignment. The actor in `actor.rs` owns the
//! engine and drives scheduling around it.

use serde_json::Value;

use crate::effect::EffectMap;
use crate::error::DispatchError;
use crate::event::{Event, EventName};
use crate::query::Query;
use crate::reducer::{Commit, ReducerTable};
use crate::state::GlobalState;
use crate::store::{Handler, StoreHandle};

/// Why an event found no handler. Recoverable: nothing changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Unhandled {
    /// No store is registered under the event's namespace.
    UnknownStore(EventName),
    /// The store exists but declares no handler for the local name.
    UnknownEvent(EventName),
}

/// What a successful dispatch did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// An effect map was folded and the result installed.
    Applied {
        /// Number of effects folded.
        effects: usize,
        /// Events in the deferred queue right after installation.
        deferred: usize,
    },
    /// The handler returned an empty effect map.
    NoEffects,
    /// No handler was found; state is untouched.
    Unhandled(Unhandled),
}

/// Result of resolving an event name against a state snapshot.
enum Resolution {
    Found { store: StoreHandle, handler: Handler },
    Missing(Unhandled),
}

fn resolve(state: &GlobalState, name: &EventName) -> Resolution {
    let Some(store) = state.store(name.namespace()) else {
        return Resolution::Missing(Unhandled::UnknownStore(name.clone()));
    };
    match store.events().get(name.local()) {
        Some(handler) => Resolution::Found {
            store: store.clone(),
            handler: handler.clone(),
        },
        None => Resolution::Missing(Unhandled::UnknownEvent(name.clone())),
    }
}

/// Decode the single parameter of the reserved apply-effects event.
fn decode_effects(params: Vec<Value>) -> Result<EffectMap, DispatchError> {
    let mut params = params.into_iter();
    match (params.next(), params.next()) {
        (Some(value), None) => EffectMap::from_json(value).map_err(DispatchError::MalformedEffects),
        (None, _) => Err(DispatchError::MalformedEffects(
            "apply-effects expects one parameter, got none".to_owned(),
        )),
        (Some(_), Some(_)) => Err(DispatchError::MalformedEffects(
            "apply-effects expects exactly one parameter".to_owned(),
        )),
    }
}

/// Owner of the global state and the reducer table.
#[derive(Debug)]
pub(crate) struct Engine {
    state: GlobalState,
    reducers: ReducerTable,
}

impl Engine {
    pub(crate) fn new(state: GlobalState, reducers: ReducerTable) -> Self {
        Self { state, reducers }
    }

    pub(crate) fn state(&self) -> &GlobalState {
        &self.state
    }

    /// Dispatch one event.
    ///
    /// On success returns the outcome plus any queries staged by the fold,
    /// which the caller must send. Deferred events stay in the state's
    /// queue until [`take_deferred`](Engine::take_deferred).
    ///
    /// # Errors
    ///
    /// Any [`DispatchError`]; the installed state is unchanged when one is
    /// returned.
    pub(crate) fn dispatch(
        &mut self,
        event: Event,
    ) -> Result<(DispatchOutcome, Vec<(Query, EventName)>), DispatchError> {
        let _span = tracing::info_span!("dispatch", event = %event.name()).entered();

        let effects = match event {
            Event::ApplyEffects(effects) => effects,
            Event::Named { name, params } if name.is_apply_effects() => decode_effects(params)
                .inspect_err(|e| tracing::error!(error = %e, "rejected apply-effects payload"))?,
            Event::Named { name, params } => match resolve(&self.state, &name) {
                Resolution::Found { store, handler } => {
                    handler(&store, &self.state.app_state, &params)
                }
                Resolution::Missing(reason) => {
                    tracing::warn!(event = %name, reason = ?reason, "no handler for event");
                    return Ok((DispatchOutcome::Unhandled(reason), Vec::new()));
                }
            },
        };

        if effects.is_empty() {
            return Ok((DispatchOutcome::NoEffects, Vec::new()));
        }

        let count = effects.len();
        let fold = self
            .reducers
            .fold(&self.state, effects)
            .inspect_err(|e| tracing::error!(error = %e, "effect fold aborted, state unchanged"))?;

        self.state = fold.state;
        let queries = fold
            .commits
            .into_iter()
            .filter_map(Commit::apply_local)
            .collect();

        let deferred = self.state.event_queue.len();
        tracing::debug!(effects = count, deferred, "effects applied");
        Ok((
            DispatchOutcome::Applied {
                effects: count,
                deferred,
            },
            queries,
        ))
    }

    /// Swap the deferred queue for an empty one and return what it held.
    pub(crate) fn take_deferred(&mut self) -> Vec<Event> {
        self.state.take_queue()
    }
}

//! Effect reducer table and the fold algorithm.
//!
//! Reducers are the only way global state changes. A fold runs over an
//! owned copy of the current state; side effects that cannot be expressed
//! as a new state value (local-state writes, outgoing queries) are staged
//! as [`Commit`]s and only carried out once every effect has folded.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::effect::{Effect, EffectMap, names};
use crate::error::{BuildError, DispatchError};
use crate::event::EventName;
use crate::query::Query;
use crate::registry;
use crate::state::GlobalState;
use crate::store::StoreHandle;

/// Application-defined reducer for [`Effect::Custom`] payloads.
pub(crate) type CustomReducer = Arc<dyn Fn(GlobalState, Value) -> GlobalState + Send + Sync>;

/// Built-in reducers get the staging area as well as the state.
pub(crate) type BuiltinReducer = fn(Fold, Effect) -> Result<Fold, DispatchError>;

/// A side effect staged during a fold.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Commit {
    /// Replace `store`'s local state with `value`.
    LocalWrite { store: StoreHandle, value: Value },
    /// Send `query`, then dispatch `response_event`.
    Query {
        query: Query,
        response_event: EventName,
    },
}

impl Commit {
    /// Carry out a local write. Returns queries untouched for the caller to run.
    pub(crate) fn apply_local(self) -> Option<(Query, EventName)> {
        match self {
            Self::LocalWrite { store, value } => {
                if let Some(cell) = store.local_state() {
                    cell.replace(value);
                }
                None
            }
            Self::Query {
                query,
                response_event,
            } => Some((query, response_event)),
        }
    }
}

/// Intermediate result of folding an effect map.
#[derive(Debug, Clone)]
pub(crate) struct Fold {
    pub state: GlobalState,
    pub commits: Vec<Commit>,
    /// Queue index for the next `init` event. Starts at the queue length
    /// seen when the fold began, so `init` runs ahead of anything the same
    /// effect map defers.
    pub init_slot: usize,
}

impl Fold {
    fn new(state: GlobalState) -> Self {
        let init_slot = state.event_queue.len();
        Self {
            state,
            commits: Vec::new(),
            init_slot,
        }
    }
}

#[derive(Clone)]
enum Reducer {
    Builtin(BuiltinReducer),
    Custom(CustomReducer),
}

/// Closed mapping from effect name to reducer.
///
/// Built-in reducers are always present. `sendQuery` is present only when
/// a query client is configured. Applications add their own effects with
/// [`register`](ReducerTable::register).
#[derive(Clone)]
pub(crate) struct ReducerTable {
    reducers: HashMap<String, Reducer>,
}

impl ReducerTable {
    /// Table holding the built-in reducers.
    pub(crate) fn builtin() -> Self {
        let builtins: [(&str, BuiltinReducer); 6] = [
            (names::REGISTER_STORE, registry::register_store),
            (names::DEREGISTER_STORE, registry::deregister_store),
            (names::DISSOC_STORE, registry::dissoc_store),
            (names::DISPATCH_AFTER, dispatch_after),
            (names::CHANGE_STORE_STATE, change_store_state),
            (names::MOUNT_ROOT, mount_root),
        ];
        let reducers = builtins
            .into_iter()
            .map(|(name, f)| (name.to_owned(), Reducer::Builtin(f)))
            .collect();
        Self { reducers }
    }

    /// Enable the `sendQuery` effect.
    pub(crate) fn with_queries(mut self) -> Self {
        self.reducers
            .insert(names::SEND_QUERY.to_owned(), Reducer::Builtin(send_query));
        self
    }

    /// Register a reducer for an application-defined effect.
    ///
    /// # Errors
    ///
    /// * [`BuildError::ReservedEffect`] if `name` belongs to a built-in effect.
    /// * [`BuildError::DuplicateReducer`] if `name` is already registered.
    pub(crate) fn register(
        &mut self,
        name: impl Into<String>,
        reducer: CustomReducer,
    ) -> Result<(), BuildError> {
        let name = name.into();
        if names::BUILTIN.contains(&name.as_str()) {
            return Err(BuildError::ReservedEffect(name));
        }
        if self.reducers.contains_key(&name) {
            return Err(BuildError::DuplicateReducer(name));
        }
        self.reducers.insert(name, Reducer::Custom(reducer));
        Ok(())
    }

    /// Fold `effects` over a copy of `state` in insertion order.
    ///
    /// Aborts at the first effect without a reducer, or whose reducer
    /// fails. On error nothing is returned that could be installed, so the
    /// caller's `state` remains the current state.
    pub(crate) fn fold(
        &self,
        state: &GlobalState,
        effects: EffectMap,
    ) -> Result<Fold, DispatchError> {
        let mut fold = Fold::new(state.clone());
        for effect in effects {
            let reducer = match self.reducers.get(effect.name()) {
                Some(reducer) => reducer,
                None if effect.name() == names::SEND_QUERY => {
                    return Err(DispatchError::NoQueryClient);
                }
                None => return Err(DispatchError::UnknownEffect(effect.name().to_owned())),
            };
            fold = match (reducer, effect) {
                (Reducer::Builtin(f), effect) => f(fold, effect)?,
                (Reducer::Custom(f), Effect::Custom { payload, .. }) => Fold {
                    state: f(fold.state, payload),
                    ..fold
                },
                (Reducer::Custom(_), effect) => return Err(mismatch(&effect)),
            };
        }
        Ok(fold)
    }
}

impl fmt::Debug for ReducerTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&str> = self.reducers.keys().map(String::as_str).collect();
        names.sort_unstable();
        f.debug_struct("ReducerTable").field("effects", &names).finish()
    }
}

/// A payload whose shape does not belong to the reducer its name selected.
pub(crate) fn mismatch(effect: &Effect) -> DispatchError {
    DispatchError::MalformedEffects(format!(
        "payload for '{}' does not match its reducer",
        effect.name()
    ))
}

fn dispatch_after(mut fold: Fold, effect: Effect) -> Result<Fold, DispatchError> {
    let events = match effect {
        Effect::DispatchAfter(events) => events,
        other => return Err(mismatch(&other)),
    };
    fold.state.event_queue.extend(events);
    Ok(fold)
}

fn change_store_state(mut fold: Fold, effect: Effect) -> Result<Fold, DispatchError> {
    let (store_id, new_value) = match effect {
        Effect::ChangeStoreState {
            store_id,
            new_value,
        } => (store_id, new_value),
        other => return Err(mismatch(&other)),
    };
    let store = fold
        .state
        .stores
        .get(&store_id)
        .filter(|store| store.local_state().is_some())
        .cloned()
        .ok_or_else(|| DispatchError::MissingLocalState(store_id.to_string()))?;
    fold.commits.push(Commit::LocalWrite {
        store,
        value: new_value,
    });
    Ok(fold)
}

// State is unchanged; the request goes out after the fold commits.
fn send_query(mut fold: Fold, effect: Effect) -> Result<Fold, DispatchError> {
    let (query, response_event) = match effect {
        Effect::SendQuery {
            query,
            response_event,
        } => (query, response_event),
        other => return Err(mismatch(&other)),
    };
    fold.commits.push(Commit::Query {
        query,
        response_event,
    });
    Ok(fold)
}

fn mount_root(mut fold: Fold, effect: Effect) -> Result<Fold, DispatchError> {
    let (store_id, view) = match effect {
        Effect::MountRoot { store_id, view } => (store_id, view),
        other => return Err(mismatch(&other)),
    };
    fold.state.root_store_id = Some(store_id);
    fold.state.root_view = Some(view);
    Ok(fold)
}

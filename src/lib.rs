//! A uni-directional state container for UI applications.
//!
//! Stores declare named event handlers. A handler receives the app state
//! and the event's parameters and returns an [`EffectMap`] describing what
//! should change. The conductor folds that map through a table of
//! reducers into a new [`GlobalState`] and installs it in one step; if any
//! reducer fails, nothing changes.
//!
//! Events addressed to a store use `"{store-id}/{local-name}"` names. The
//! reserved `conductor/apply-effects` event carries an effect map directly.
//! Follow-up work (`dispatchAfter`, store `init`/`remove`) goes into a
//! deferred queue that the actor drains on later scheduler ticks.

mod actor;
mod conductor;
mod dispatch;
mod effect;
mod error;
mod event;
mod query;
mod reducer;
mod registry;
mod state;
mod store;

pub use actor::FatalHook;
pub use conductor::{Conductor, ConductorBuilder, ConductorConfig};
pub use dispatch::{DispatchOutcome, Unhandled};
pub use effect::{Effect, EffectMap, names};
pub use error::{BuildError, DispatchError, EventNameError};
pub use event::{
    APPLY_EFFECTS, CONTROL_NAMESPACE, Event, EventName, SEPARATOR, StoreId, make_event_name,
    parse_event_name,
};
pub use query::{HttpQueryClient, HttpQueryConfig, Query, QueryClient, QueryResponse};
pub use registry::{INIT_EVENT, REMOVE_EVENT};
pub use state::{AppState, GlobalState};
pub use store::{EventMap, Handler, LocalState, Store, StoreHandle, ViewHandle, ViewHost, ViewNode};

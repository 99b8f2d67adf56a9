//! Store registry lifecycle, expressed as built-in reducers.
//!
//! Registration and removal go through the same effect fold as every other
//! state change. Lifecycle events (`init`, `remove`) are never dispatched
//! synchronously; they are appended to the deferred queue.

use crate::effect::{Effect, EffectMap};
use crate::error::DispatchError;
use crate::event::Event;
use crate::reducer::{Fold, mismatch};

/// Local event dispatched to a store after it is registered.
pub const INIT_EVENT: &str = "init";

/// Local event dispatched to a store before it is removed.
pub const REMOVE_EVENT: &str = "remove";

/// `registerStore`: insert the store, replacing any store with the same id.
///
/// Queues `init` for the store only when it declares an `init` handler.
/// The event goes ahead of everything else the current effect map defers,
/// after the `init` of any store registered earlier in the same map.
pub(crate) fn register_store(mut fold: Fold, effect: Effect) -> Result<Fold, DispatchError> {
    let store = match effect {
        Effect::RegisterStore(store) => store,
        other => return Err(mismatch(&other)),
    };
    let id = store.id();
    let wants_init = store.events().contains(INIT_EVENT);

    if fold.state.stores.insert(id.clone(), store).is_some() {
        tracing::warn!(store_id = %id, "store already registered, overwriting");
    }
    if wants_init {
        let queue = &mut fold.state.event_queue;
        let at = fold.init_slot.min(queue.len());
        queue.insert(at, Event::to_store(&id, INIT_EVENT, Vec::new()));
        fold.init_slot = at + 1;
    }
    tracing::debug!(store_id = %id, init = wants_init, "store registered");
    Ok(fold)
}

/// `deregisterStore`: queue the store's `remove` event, then its removal.
///
/// The store stays registered until the queued `dissocStore` runs, so its
/// `remove` handler still resolves.
pub(crate) fn deregister_store(mut fold: Fold, effect: Effect) -> Result<Fold, DispatchError> {
    let store = match effect {
        Effect::DeregisterStore(store) => store,
        other => return Err(mismatch(&other)),
    };
    let id = store.id();
    fold.state.event_queue.extend([
        Event::to_store(&id, REMOVE_EVENT, Vec::new()),
        Event::ApplyEffects(EffectMap::new().with(Effect::DissocStore(store))),
    ]);
    tracing::debug!(store_id = %id, "store deregistration queued");
    Ok(fold)
}

/// `dissocStore`: drop the registry entry for the store's id.
pub(crate) fn dissoc_store(mut fold: Fold, effect: Effect) -> Result<Fold, DispatchError> {
    let store = match effect {
        Effect::DissocStore(store) => store,
        other => return Err(mismatch(&other)),
    };
    let id = store.id();
    if fold.state.stores.remove(&id).is_none() {
        tracing::debug!(store_id = %id, "dissoc of unregistered store");
    }
    Ok(fold)
}

//! The store contract consumed by the conductor.
//!
//! A store is a self-contained unit of business logic: it has a stable id,
//! a table of event handlers, a view, and optionally a private
//! [`LocalState`] cell for state the global container does not track.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::ops::Deref;
use std::sync::{Arc, PoisonError, RwLock};

use serde_json::Value;

use crate::effect::EffectMap;
use crate::event::StoreId;
use crate::state::AppState;

/// Pure event handler: `(store, shared app state, params) -> effects`.
///
/// Handlers must not perform I/O or mutate anything. Every change they
/// want is expressed in the returned [`EffectMap`], which may be empty.
pub type Handler = Arc<dyn Fn(&StoreHandle, &AppState, &[Value]) -> EffectMap + Send + Sync>;

/// A store's mapping from local event name to handler.
#[derive(Clone, Default)]
pub struct EventMap {
    handlers: HashMap<String, Handler>,
}

impl EventMap {
    /// Create an empty event map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` under `local`, replacing any previous handler.
    ///
    /// # Returns
    ///
    /// `self` for method chaining.
    pub fn on<F>(mut self, local: impl Into<String>, handler: F) -> Self
    where
        F: Fn(&StoreHandle, &AppState, &[Value]) -> EffectMap + Send + Sync + 'static,
    {
        self.handlers.insert(local.into(), Arc::new(handler));
        self
    }

    /// Look up the handler for a local event name.
    pub fn get(&self, local: &str) -> Option<&Handler> {
        self.handlers.get(local)
    }

    /// Whether a handler is declared for `local`.
    pub fn contains(&self, local: &str) -> bool {
        self.handlers.contains_key(local)
    }

    /// Number of declared handlers.
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Whether no handlers are declared.
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl fmt::Debug for EventMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        names.sort_unstable();
        f.debug_set().entries(names).finish()
    }
}

/// Private mutable cell owned by a single store.
///
/// Anyone holding the store may read it. It is only written by the
/// `changeStoreState` effect, after the effect map that carries it has
/// folded successfully.
#[derive(Debug, Default)]
pub struct LocalState {
    cell: RwLock<Value>,
}

impl LocalState {
    /// Create a cell holding `initial`.
    pub fn new(initial: Value) -> Self {
        Self {
            cell: RwLock::new(initial),
        }
    }

    /// A clone of the current contents.
    pub fn get(&self) -> Value {
        self.cell
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Replace the contents, returning the previous value.
    pub(crate) fn replace(&self, value: Value) -> Value {
        let mut guard = self.cell.write().unwrap_or_else(PoisonError::into_inner);
        std::mem::replace(&mut *guard, value)
    }
}

/// Opaque node produced by [`Store::render`] and consumed by a [`ViewHost`].
///
/// The conductor never looks inside; the view layer downcasts to whatever
/// tree type it renders.
pub struct ViewNode(Box<dyn Any + Send>);

impl ViewNode {
    /// Wrap any view tree value.
    pub fn new<T: Any + Send>(node: T) -> Self {
        Self(Box::new(node))
    }

    /// Borrow the node as `T` if that is what it holds.
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.0.downcast_ref()
    }

    /// Take the node out as `T`, or get it back unchanged.
    pub fn downcast<T: Any>(self) -> Result<T, Self> {
        self.0.downcast::<T>().map(|b| *b).map_err(Self)
    }
}

impl fmt::Debug for ViewNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ViewNode(..)")
    }
}

/// The host view system a root store is mounted into.
pub trait ViewHost: Send + Sync + 'static {
    /// Install a rendered view tree.
    fn mount(&self, node: ViewNode);
}

/// Cloneable handle to a [`ViewHost`]. Equality is identity.
#[derive(Clone)]
pub struct ViewHandle(Arc<dyn ViewHost>);

impl ViewHandle {
    /// Wrap a view host.
    pub fn new<H: ViewHost>(host: H) -> Self {
        Self(Arc::new(host))
    }
}

impl From<Arc<dyn ViewHost>> for ViewHandle {
    fn from(host: Arc<dyn ViewHost>) -> Self {
        Self(host)
    }
}

impl Deref for ViewHandle {
    type Target = dyn ViewHost;

    fn deref(&self) -> &Self::Target {
        &*self.0
    }
}

impl PartialEq for ViewHandle {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for ViewHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ViewHandle(..)")
    }
}

/// A unit of business logic addressable by the conductor.
///
/// # Contract
///
/// - [`id`](Store::id) must be stable for the lifetime of the store.
/// - [`render`](Store::render) must be pure.
/// - Handlers in [`events`](Store::events) must be pure; see [`Handler`].
pub trait Store: Send + Sync + 'static {
    /// Unique, stable identifier. Event names addressed to this store use
    /// it as their namespace.
    fn id(&self) -> StoreId;

    /// Local event name to handler mapping.
    fn events(&self) -> &EventMap;

    /// Turn the shared app state into a view tree.
    fn render(&self, app_state: &AppState) -> ViewNode;

    /// The store's private mutable cell, if it keeps one.
    fn local_state(&self) -> Option<&LocalState> {
        None
    }
}

/// Cloneable, shareable handle to a registered store.
///
/// Equality is identity: two handles are equal when they point at the same
/// store instance.
#[derive(Clone)]
pub struct StoreHandle(Arc<dyn Store>);

impl StoreHandle {
    /// Wrap a store.
    pub fn new<S: Store>(store: S) -> Self {
        Self(Arc::new(store))
    }
}

impl From<Arc<dyn Store>> for StoreHandle {
    fn from(store: Arc<dyn Store>) -> Self {
        Self(store)
    }
}

impl Deref for StoreHandle {
    type Target = dyn Store;

    fn deref(&self) -> &Self::Target {
        &*self.0
    }
}

impl PartialEq for StoreHandle {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for StoreHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("StoreHandle").field(&self.0.id()).finish()
    }
}

//! Top-level entry point: the [`Conductor`] handle and its builder.
//!
//! [`ConductorBuilder`] collects the initial app state, custom reducers, an
//! optional query client and a fatal-error hook, then starts the actor
//! thread on [`build`](ConductorBuilder::build). The returned handle is
//! cheap to clone; every clone talks to the same actor.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{mpsc, oneshot, watch};

use crate::actor::{ActorParts, FatalHook, Message, run_actor};
use crate::dispatch::{DispatchOutcome, Engine};
use crate::effect::EffectMap;
use crate::error::{BuildError, DispatchError};
use crate::event::Event;
use crate::query::QueryClient;
use crate::reducer::{CustomReducer, ReducerTable};
use crate::state::{AppState, GlobalState};
use crate::store::{StoreHandle, ViewHandle};

/// Tuning knobs for the actor.
#[derive(Debug, Clone)]
pub struct ConductorConfig {
    /// Capacity of the bounded mailbox between handles and the actor.
    ///
    /// Default: 32. Values below 1 are treated as 1.
    pub mailbox_capacity: usize,
    /// How long [`Conductor::settle`] sleeps between polls.
    ///
    /// Default: 1 millisecond.
    pub settle_poll_interval: Duration,
}

impl Default for ConductorConfig {
    fn default() -> Self {
        Self {
            mailbox_capacity: 32,
            settle_poll_interval: Duration::from_millis(1),
        }
    }
}

/// Async handle to a running conductor.
///
/// Lightweight, cloneable, and `Send + Sync`. All state changes are
/// serialized through the actor, so concurrent callers never observe a
/// partially applied effect map.
#[derive(Debug, Clone)]
pub struct Conductor {
    sender: mpsc::Sender<Message>,
    state_rx: watch::Receiver<GlobalState>,
    settle_poll_interval: Duration,
}

impl Conductor {
    /// Shorthand for [`ConductorBuilder::new`].
    pub fn builder() -> ConductorBuilder {
        ConductorBuilder::new()
    }

    /// Dispatch an event and wait for the outcome.
    ///
    /// Events the handler defers (and lifecycle events such as `init`) are
    /// not run before this returns; use [`settle`](Conductor::settle) to
    /// wait for them.
    ///
    /// # Returns
    ///
    /// [`DispatchOutcome::Unhandled`] when no store or handler matches the
    /// event. Nothing changes in that case.
    ///
    /// # Errors
    ///
    /// * Any fatal [`DispatchError`] raised by the fold; state is unchanged.
    /// * [`DispatchError::ConductorGone`] if the actor has stopped.
    pub async fn dispatch(&self, event: Event) -> Result<DispatchOutcome, DispatchError> {
        let (tx, rx) = oneshot::channel();
        self.send(Message::Dispatch { event, reply: tx }).await?;
        rx.await.map_err(|_| DispatchError::ConductorGone)?
    }

    /// Fold an effect map directly into the state.
    ///
    /// Equivalent to dispatching the reserved `conductor/apply-effects`
    /// event with `effects` as its only parameter.
    pub async fn apply_effects(&self, effects: EffectMap) -> Result<DispatchOutcome, DispatchError> {
        self.dispatch(Event::ApplyEffects(effects)).await
    }

    /// Mount `store` as the root store.
    ///
    /// Renders the store's view against the current app state, hands the
    /// node to `view`, then records the root and registers the store in a
    /// single fold. The store's `init` event, if declared, is deferred.
    ///
    /// # Errors
    ///
    /// Same as [`dispatch`](Conductor::dispatch).
    pub async fn mount(
        &self,
        store: StoreHandle,
        view: ViewHandle,
    ) -> Result<DispatchOutcome, DispatchError> {
        let (tx, rx) = oneshot::channel();
        self.send(Message::Mount {
            store,
            view,
            reply: tx,
        })
        .await?;
        rx.await.map_err(|_| DispatchError::ConductorGone)?
    }

    /// Snapshot of the current global state.
    ///
    /// # Errors
    ///
    /// [`DispatchError::ConductorGone`] if the actor has stopped.
    pub async fn state(&self) -> Result<GlobalState, DispatchError> {
        let (tx, rx) = oneshot::channel();
        self.send(Message::GetState { reply: tx }).await?;
        rx.await.map_err(|_| DispatchError::ConductorGone)
    }

    /// Watch channel that receives every newly installed state.
    ///
    /// Only dispatches that fold at least one effect publish a new value.
    pub fn subscribe(&self) -> watch::Receiver<GlobalState> {
        self.state_rx.clone()
    }

    /// Wait until no deferred events or queries are outstanding.
    ///
    /// Handlers that keep deferring new events forever make this wait
    /// forever too.
    ///
    /// # Errors
    ///
    /// [`DispatchError::ConductorGone`] if the actor has stopped.
    pub async fn settle(&self) -> Result<(), DispatchError> {
        loop {
            let (tx, rx) = oneshot::channel();
            self.send(Message::Pending { reply: tx }).await?;
            let pending = rx.await.map_err(|_| DispatchError::ConductorGone)?;
            if pending == 0 {
                return Ok(());
            }
            tracing::trace!(pending, "waiting for conductor to settle");
            tokio::time::sleep(self.settle_poll_interval).await;
        }
    }

    /// Ask the actor to stop.
    ///
    /// Messages already in the mailbox ahead of the request are still
    /// handled. Deferred events that have not run yet are dropped.
    pub async fn shutdown(&self) {
        if self.sender.send(Message::Shutdown).await.is_err() {
            tracing::debug!("shutdown requested but conductor already stopped");
        }
    }

    /// Check whether the actor is still running.
    pub fn is_alive(&self) -> bool {
        !self.sender.is_closed()
    }

    async fn send(&self, msg: Message) -> Result<(), DispatchError> {
        self.sender
            .send(msg)
            .await
            .map_err(|_| DispatchError::ConductorGone)
    }
}

/// Builder for configuring and starting a [`Conductor`].
///
/// # Examples
///
/// ```no_run
/// use conductor::ConductorBuilder;
///
/// # fn example() -> Result<(), conductor::BuildError> {
/// let conductor = ConductorBuilder::new()
///     .reducer("setTitle", |state, title| state.assoc_app_state("title", title))
///     .build()?;
/// # Ok(())
/// # }
/// ```
pub struct ConductorBuilder {
    config: ConductorConfig,
    app_state: AppState,
    reducers: Vec<(String, CustomReducer)>,
    query_client: Option<Arc<dyn QueryClient>>,
    on_fatal: Option<FatalHook>,
}

impl Default for ConductorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ConductorBuilder {
    /// Create a builder with default config, empty app state, and only the
    /// built-in reducers.
    pub fn new() -> Self {
        Self {
            config: ConductorConfig::default(),
            app_state: AppState::new(),
            reducers: Vec::new(),
            query_client: None,
            on_fatal: None,
        }
    }

    /// Replace the actor tuning knobs.
    pub fn config(mut self, config: ConductorConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the initial app state.
    pub fn app_state(mut self, app_state: AppState) -> Self {
        self.app_state = app_state;
        self
    }

    /// Register a reducer for a custom effect name.
    ///
    /// The reducer receives the state being folded and the effect's JSON
    /// payload, and returns the next state.
    ///
    /// # Arguments
    ///
    /// * `name` - Effect name, e.g. `"setTitle"`. Built-in names are
    ///   rejected by [`build`](ConductorBuilder::build).
    /// * `reducer` - Pure function from `(state, payload)` to the next state.
    pub fn reducer<F>(mut self, name: impl Into<String>, reducer: F) -> Self
    where
        F: Fn(GlobalState, Value) -> GlobalState + Send + Sync + 'static,
    {
        self.reducers.push((name.into(), Arc::new(reducer)));
        self
    }

    /// Enable the `sendQuery` effect, served by `client`.
    pub fn query_client(mut self, client: impl QueryClient) -> Self {
        self.query_client = Some(Arc::new(client));
        self
    }

    /// Called with every fatal error, including ones raised by deferred
    /// events and query responses that have no caller to report to.
    pub fn on_fatal<F>(mut self, hook: F) -> Self
    where
        F: Fn(&DispatchError) + Send + Sync + 'static,
    {
        self.on_fatal = Some(Arc::new(hook));
        self
    }

    /// Start the actor thread and return a handle to it.
    ///
    /// # Errors
    ///
    /// * [`BuildError::ReservedEffect`] / [`BuildError::DuplicateReducer`]
    ///   if a custom reducer name collides.
    /// * [`BuildError::Runtime`] if the actor runtime or thread cannot be
    ///   created.
    pub fn build(self) -> Result<Conductor, BuildError> {
        let mut reducers = ReducerTable::builtin();
        if self.query_client.is_some() {
            reducers = reducers.with_queries();
        }
        for (name, reducer) in self.reducers {
            reducers.register(name, reducer)?;
        }

        let engine = Engine::new(GlobalState::with_app_state(self.app_state), reducers);
        let (state_tx, state_rx) = watch::channel(engine.state().clone());
        let (tx, rx) = mpsc::channel(self.config.mailbox_capacity.max(1));

        let parts = ActorParts {
            engine,
            query_client: self.query_client,
            on_fatal: self.on_fatal,
            state_tx,
            mailbox: tx.downgrade(),
        };

        // The actor gets its own runtime so it keeps running regardless of
        // the caller's runtime flavor, or without one at all.
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        std::thread::Builder::new()
            .name("conductor".to_owned())
            .spawn(move || rt.block_on(run_actor(parts, rx)))?;

        tracing::info!(
            mailbox_capacity = self.config.mailbox_capacity,
            "conductor started"
        );
        Ok(Conductor {
            sender: tx,
            state_rx,
            settle_poll_interval: self.config.settle_poll_interval,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use serde_json::json;

    use super::*;
    use crate::effect::Effect;
    use crate::event::EventName;
    use crate::query::{Query, QueryResponse};
    use crate::registry::INIT_EVENT;
    use crate::store::test_fixtures::{CallLog, deferring, recording_events, sid, store};
    use crate::store::{EventMap, ViewHost, ViewNode};

    fn register(store: StoreHandle) -> EffectMap {
        EffectMap::new().with(Effect::RegisterStore(store))
    }

    /// Answers every query with status 200 and the query body echoed back.
    struct EchoClient;

    #[async_trait]
    impl QueryClient for EchoClient {
        async fn send(&self, query: Query) -> QueryResponse {
            QueryResponse {
                status: 200,
                payload: json!({ "echo": query.body }),
            }
        }
    }

    #[derive(Default, Clone)]
    struct RecordingHost(Arc<Mutex<Vec<String>>>);

    impl ViewHost for RecordingHost {
        fn mount(&self, node: ViewNode) {
            let rendered = node
                .downcast::<String>()
                .unwrap_or_else(|_| "<unknown>".to_owned());
            self.0.lock().unwrap().push(rendered);
        }
    }

    #[tokio::test]
    async fn dispatch_to_unregistered_store_is_unhandled() {
        let conductor = ConductorBuilder::new().build().unwrap();
        let before = conductor.state().await.unwrap();

        let outcome = conductor
            .dispatch(Event::to_store(&sid("s1"), "foo", vec![]))
            .await
            .unwrap();

        assert!(matches!(outcome, DispatchOutcome::Unhandled(_)));
        assert_eq!(conductor.state().await.unwrap(), before);
    }

    #[tokio::test]
    async fn deferred_events_run_after_the_call_returns() {
        let log = CallLog::default();
        let events = recording_events(&log, &["second"]).on(
            "first",
            deferring(Event::to_store(&sid("s1"), "second", vec![])),
        );
        let conductor = ConductorBuilder::new().build().unwrap();
        conductor.apply_effects(register(store("s1", events))).await.unwrap();

        let outcome = conductor
            .dispatch(Event::to_store(&sid("s1"), "first", vec![]))
            .await
            .unwrap();
        assert_eq!(
            outcome,
            DispatchOutcome::Applied {
                effects: 1,
                deferred: 1
            }
        );

        conductor.settle().await.unwrap();
        assert_eq!(log.entries(), ["s1/second:[]"]);
        assert!(conductor.state().await.unwrap().event_queue().is_empty());
    }

    #[tokio::test]
    async fn init_runs_after_registration() {
        let log = CallLog::default();
        let conductor = ConductorBuilder::new().build().unwrap();
        conductor
            .apply_effects(register(store("s1", recording_events(&log, &[INIT_EVENT]))))
            .await
            .unwrap();
        conductor.settle().await.unwrap();
        assert_eq!(log.entries(), ["s1/init:[]"]);
    }

    #[tokio::test]
    async fn deregister_runs_remove_then_drops_store() {
        let log = CallLog::default();
        let s1 = store("s1", recording_events(&log, &["remove", "foo"]));
        let conductor = ConductorBuilder::new().build().unwrap();
        conductor.apply_effects(register(s1.clone())).await.unwrap();

        conductor
            .apply_effects(EffectMap::new().with(Effect::DeregisterStore(s1)))
            .await
            .unwrap();
        conductor.settle().await.unwrap();

        assert_eq!(log.entries(), ["s1/remove:[]"]);
        assert!(conductor.state().await.unwrap().stores().is_empty());

        let outcome = conductor
            .dispatch(Event::to_store(&sid("s1"), "foo", vec![]))
            .await
            .unwrap();
        assert!(matches!(outcome, DispatchOutcome::Unhandled(_)));
        assert_eq!(log.entries(), ["s1/remove:[]"]);
    }

    #[tokio::test]
    async fn json_apply_effects_defers_named_event() {
        let log = CallLog::default();
        let conductor = ConductorBuilder::new().build().unwrap();
        conductor
            .apply_effects(register(store("s1", recording_events(&log, &["foo"]))))
            .await
            .unwrap();

        let event = Event::named(
            EventName::apply_effects(),
            vec![json!({ "dispatchAfter": [["s1/foo", 42]] })],
        );
        let outcome = conductor.dispatch(event).await.unwrap();
        assert_eq!(
            outcome,
            DispatchOutcome::Applied {
                effects: 1,
                deferred: 1
            }
        );

        conductor.settle().await.unwrap();
        assert_eq!(log.entries(), ["s1/foo:[42]"]);
    }

    #[tokio::test]
    async fn init_runs_before_events_deferred_alongside_registration() {
        let log = CallLog::default();
        let s1 = store("s1", recording_events(&log, &[INIT_EVENT, "foo"]));
        let conductor = ConductorBuilder::new().build().unwrap();

        conductor
            .apply_effects(
                EffectMap::new()
                    .with(Effect::DispatchAfter(vec![Event::to_store(
                        &sid("s1"),
                        "foo",
                        vec![],
                    )]))
                    .with(Effect::RegisterStore(s1)),
            )
            .await
            .unwrap();
        conductor.settle().await.unwrap();

        assert_eq!(log.entries(), ["s1/init:[]", "s1/foo:[]"]);
    }

    #[tokio::test]
    async fn custom_reducer_updates_app_state() {
        let conductor = ConductorBuilder::new()
            .reducer("setCount", |state, payload| state.assoc_app_state("count", payload))
            .build()
            .unwrap();

        conductor
            .apply_effects(EffectMap::new().with(Effect::custom("setCount", json!(3))))
            .await
            .unwrap();

        assert_eq!(conductor.state().await.unwrap().app_state()["count"], json!(3));
    }

    #[tokio::test]
    async fn unknown_effect_is_fatal_and_state_unchanged() {
        let conductor = ConductorBuilder::new().build().unwrap();
        let before = conductor.state().await.unwrap();

        let err = conductor
            .apply_effects(EffectMap::new().with(Effect::custom("bogus", json!(null))))
            .await
            .unwrap_err();

        assert!(matches!(err, DispatchError::UnknownEffect(ref name) if name == "bogus"));
        assert_eq!(conductor.state().await.unwrap(), before);
        assert!(conductor.is_alive());
    }

    #[tokio::test]
    async fn fatal_error_in_deferred_event_reaches_hook() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let conductor = ConductorBuilder::new()
            .on_fatal(move |e| sink.lock().unwrap().push(e.to_string()))
            .build()
            .unwrap();

        let bad = Event::ApplyEffects(EffectMap::new().with(Effect::custom("bogus", json!(1))));
        let events = EventMap::new().on("go", deferring(bad));
        conductor.apply_effects(register(store("s1", events))).await.unwrap();

        conductor
            .dispatch(Event::to_store(&sid("s1"), "go", vec![]))
            .await
            .unwrap();
        conductor.settle().await.unwrap();

        assert_eq!(
            *seen.lock().unwrap(),
            ["no reducer registered for effect 'bogus'"]
        );
    }

    #[tokio::test]
    async fn mount_renders_and_registers_root() {
        let host = RecordingHost::default();
        let conductor = ConductorBuilder::new().build().unwrap();
        let root = store("app", EventMap::new());

        conductor
            .mount(root.clone(), ViewHandle::new(host.clone()))
            .await
            .unwrap();

        let state = conductor.state().await.unwrap();
        assert_eq!(state.root_store_id(), Some(&sid("app")));
        assert!(state.root_view().is_some());
        assert_eq!(state.store(&sid("app")), Some(&root));
        assert_eq!(*host.0.lock().unwrap(), ["app:0"]);
    }

    #[tokio::test]
    async fn query_response_is_dispatched_to_response_event() {
        let log = CallLog::default();
        let response_event: EventName = "s1/loaded".parse().unwrap();
        let events = recording_events(&log, &["loaded"]).on("load", move |_, _, _| {
            EffectMap::new().with(Effect::SendQuery {
                query: Query::new(json!({ "id": 7 })),
                response_event: response_event.clone(),
            })
        });
        let conductor = ConductorBuilder::new().query_client(EchoClient).build().unwrap();
        conductor.apply_effects(register(store("s1", events))).await.unwrap();

        conductor
            .dispatch(Event::to_store(&sid("s1"), "load", vec![]))
            .await
            .unwrap();
        conductor.settle().await.unwrap();

        assert_eq!(log.entries(), [r#"s1/loaded:[200,{"echo":{"id":7}}]"#]);
    }

    struct PanickingClient;

    #[async_trait]
    impl QueryClient for PanickingClient {
        async fn send(&self, _query: Query) -> QueryResponse {
            panic!("query client failed");
        }
    }

    #[tokio::test]
    async fn panicking_query_client_still_answers_and_settles() {
        let log = CallLog::default();
        let events = recording_events(&log, &["loaded"]).on("load", |_, _, _| {
            EffectMap::new().with(Effect::SendQuery {
                query: Query::new(json!({})),
                response_event: "s1/loaded".parse().unwrap(),
            })
        });
        let conductor = ConductorBuilder::new()
            .query_client(PanickingClient)
            .build()
            .unwrap();
        conductor.apply_effects(register(store("s1", events))).await.unwrap();

        conductor
            .dispatch(Event::to_store(&sid("s1"), "load", vec![]))
            .await
            .unwrap();
        tokio::time::timeout(Duration::from_secs(5), conductor.settle())
            .await
            .expect("settle should finish after a client panic")
            .unwrap();

        assert_eq!(
            log.entries(),
            [r#"s1/loaded:[0,{"error":"query client panicked"}]"#]
        );
        assert!(conductor.is_alive());
    }

    #[tokio::test]
    async fn send_query_without_client_is_fatal() {
        let conductor = ConductorBuilder::new().build().unwrap();
        let effects = EffectMap::new().with(Effect::SendQuery {
            query: Query::new(json!({})),
            response_event: "s1/loaded".parse().unwrap(),
        });

        let err = conductor.apply_effects(effects).await.unwrap_err();
        assert!(matches!(err, DispatchError::NoQueryClient));
    }

    #[tokio::test]
    async fn subscribers_see_installed_state() {
        let conductor = ConductorBuilder::new()
            .reducer("setCount", |state, payload| state.assoc_app_state("count", payload))
            .build()
            .unwrap();
        let mut rx = conductor.subscribe();

        conductor
            .apply_effects(EffectMap::new().with(Effect::custom("setCount", json!(9))))
            .await
            .unwrap();

        rx.changed().await.unwrap();
        assert_eq!(rx.borrow().app_state()["count"], json!(9));
    }

    #[tokio::test]
    async fn handle_reports_gone_after_shutdown() {
        let conductor = ConductorBuilder::new().build().unwrap();
        conductor.shutdown().await;

        let err = conductor.state().await.unwrap_err();
        assert!(matches!(err, DispatchError::ConductorGone));
        assert!(!conductor.is_alive());
    }

    #[test]
    fn build_rejects_reserved_effect_name() {
        let err = ConductorBuilder::new()
            .reducer("dispatchAfter", |state, _| state)
            .build()
            .unwrap_err();
        assert!(matches!(err, BuildError::ReservedEffect(ref name) if name == "dispatchAfter"));
    }

    #[test]
    fn build_rejects_duplicate_reducer() {
        let err = ConductorBuilder::new()
            .reducer("setCount", |state, _| state)
            .reducer("setCount", |state, _| state)
            .build()
            .unwrap_err();
        assert!(matches!(err, BuildError::DuplicateReducer(_)));
    }

    #[test]
    fn config_defaults() {
        let config = ConductorConfig::default();
        assert_eq!(config.mailbox_capacity, 32);
        assert_eq!(config.settle_poll_interval, Duration::from_millis(1));
    }
}

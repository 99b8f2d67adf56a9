//! Actor loop that owns the engine and schedules deferred dispatches.
//!
//! The actor runs on a dedicated thread inside a current-thread tokio
//! runtime, which makes it the single logical owner of the global state.
//! It receives messages from [`Conductor`](crate::Conductor) handles over a
//! bounded `mpsc` mailbox and handles them one at a time.
//!
//! Deferred events are moved out of the state's queue right after each
//! install and pushed onto an internal tick channel. The loop selects
//! between the mailbox and the tick channel, so a deferred event always
//! runs on a later iteration than the dispatch that queued it, in queue
//! order, possibly with unrelated mailbox traffic in between.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch};

use crate::dispatch::{DispatchOutcome, Engine};
use crate::effect::{Effect, EffectMap};
use crate::error::DispatchError;
use crate::event::{Event, EventName};
use crate::query::{Query, QueryClient, QueryResponse};
use crate::state::GlobalState;
use crate::store::{StoreHandle, ViewHandle};

/// Called with every fatal error, including ones from deferred dispatches
/// that have no caller to return to.
pub type FatalHook = Arc<dyn Fn(&DispatchError) + Send + Sync>;

/// Result type sent back through the `Dispatch` reply channel.
pub(crate) type DispatchResult = Result<DispatchOutcome, DispatchError>;

/// Messages sent from `Conductor` to the actor loop.
pub(crate) enum Message {
    /// Dispatch an event and report the outcome.
    Dispatch {
        event: Event,
        reply: oneshot::Sender<DispatchResult>,
    },

    /// Render `store` into `view`, then register it as the root store.
    Mount {
        store: StoreHandle,
        view: ViewHandle,
        reply: oneshot::Sender<DispatchResult>,
    },

    /// Response of a query started by a `sendQuery` effect.
    QueryResponse { event: Event },

    /// Snapshot of the current global state.
    GetState {
        reply: oneshot::Sender<GlobalState>,
    },

    /// Number of deferred events and queries still outstanding.
    Pending { reply: oneshot::Sender<usize> },

    /// Stop the actor loop.
    Shutdown,
}

/// Everything the actor needs besides its mailbox.
pub(crate) struct ActorParts {
    pub engine: Engine,
    pub query_client: Option<Arc<dyn QueryClient>>,
    pub on_fatal: Option<FatalHook>,
    pub state_tx: watch::Sender<GlobalState>,
    /// Lets query tasks post responses without keeping the actor alive.
    pub mailbox: mpsc::WeakSender<Message>,
}

struct Actor {
    engine: Engine,
    query_client: Option<Arc<dyn QueryClient>>,
    on_fatal: Option<FatalHook>,
    state_tx: watch::Sender<GlobalState>,
    mailbox: mpsc::WeakSender<Message>,
    ticks: mpsc::UnboundedSender<Event>,
    pending_ticks: usize,
    in_flight: usize,
}

/// Runs the conductor actor loop until shutdown.
///
/// The loop exits when a `Shutdown` message arrives or every `Conductor`
/// handle has been dropped. Deferred events still waiting for their tick
/// at that point are dropped.
pub(crate) async fn run_actor(parts: ActorParts, mut rx: mpsc::Receiver<Message>) {
    let (ticks, mut tick_rx) = mpsc::unbounded_channel::<Event>();
    let mut actor = Actor {
        engine: parts.engine,
        query_client: parts.query_client,
        on_fatal: parts.on_fatal,
        state_tx: parts.state_tx,
        mailbox: parts.mailbox,
        ticks,
        pending_ticks: 0,
        in_flight: 0,
    };

    loop {
        tokio::select! {
            msg = rx.recv() => match msg {
                Some(Message::Shutdown) | None => break,
                Some(msg) => actor.handle(msg),
            },
            Some(event) = tick_rx.recv() => {
                actor.pending_ticks -= 1;
                tracing::debug!(event = %event.name(), "running deferred event");
                actor.dispatch_unattended(event);
            }
        }
    }

    if actor.pending_ticks > 0 {
        tracing::warn!(
            lost = actor.pending_ticks,
            "conductor stopped with deferred events still queued"
        );
    }
    tracing::info!("conductor actor stopped");
}

impl Actor {
    fn handle(&mut self, msg: Message) {
        match msg {
            Message::Dispatch { event, reply } => {
                let result = self.dispatch(event);
                // The caller may have stopped waiting. Nothing to do then.
                let _ = reply.send(result);
            }

            Message::Mount { store, view, reply } => {
                let result = self.mount(store, view);
                let _ = reply.send(result);
            }

            Message::QueryResponse { event } => {
                self.in_flight = self.in_flight.saturating_sub(1);
                self.dispatch_unattended(event);
            }

            Message::GetState { reply } => {
                let _ = reply.send(self.engine.state().clone());
            }

            Message::Pending { reply } => {
                let _ = reply.send(self.pending_ticks + self.in_flight);
            }

            // Handled by the loop.
            Message::Shutdown => {}
        }
    }

    /// Dispatch, then start staged queries and schedule deferred events.
    fn dispatch(&mut self, event: Event) -> DispatchResult {
        let (outcome, queries) = self.engine.dispatch(event)?;
        for (query, response_event) in queries {
            self.start_query(query, response_event);
        }
        if matches!(outcome, DispatchOutcome::Applied { .. }) {
            self.schedule_deferred();
            self.state_tx.send_replace(self.engine.state().clone());
        }
        Ok(outcome)
    }

    /// Dispatch an event nobody is waiting on; fatal errors go to the hook.
    fn dispatch_unattended(&mut self, event: Event) {
        if let Err(e) = self.dispatch(event) {
            tracing::error!(error = %e, "unattended dispatch failed");
            if let Some(hook) = &self.on_fatal {
                hook(&e);
            }
        }
    }

    fn mount(&mut self, store: StoreHandle, view: ViewHandle) -> DispatchResult {
        let node = store.render(self.engine.state().app_state());
        view.mount(node);
        tracing::info!(store_id = %store.id(), "root store mounted");
        self.dispatch(Event::ApplyEffects(
            EffectMap::new()
                .with(Effect::MountRoot {
                    store_id: store.id(),
                    view,
                })
                .with(Effect::RegisterStore(store)),
        ))
    }

    /// Swap the state's queue out and give each event its own tick.
    fn schedule_deferred(&mut self) {
        let batch = self.engine.take_deferred();
        if batch.is_empty() {
            return;
        }
        tracing::debug!(count = batch.len(), "scheduling deferred events");
        for event in batch {
            // The receiver lives as long as the loop, so this only fails
            // during teardown.
            if self.ticks.send(event).is_ok() {
                self.pending_ticks += 1;
            }
        }
    }

    fn start_query(&mut self, query: Query, response_event: EventName) {
        let Some(client) = self.query_client.clone() else {
            tracing::error!(event = %response_event, "query staged without a client");
            return;
        };
        let mailbox = self.mailbox.clone();
        self.in_flight += 1;
        tokio::spawn(async move {
            // Run the client in its own task so a panic still yields a
            // response and `in_flight` comes back down.
            let response = match tokio::spawn(async move { client.send(query).await }).await {
                Ok(response) => response,
                Err(e) => {
                    tracing::error!(event = %response_event, error = %e, "query task failed");
                    QueryResponse::transport_error("query client panicked")
                }
            };
            tracing::debug!(event = %response_event, status = response.status, "query finished");
            let event = Event::named(response_event, response.into_params());
            match mailbox.upgrade() {
                Some(tx) => {
                    let _ = tx.send(Message::QueryResponse { event }).await;
                }
                None => tracing::debug!("conductor gone, dropping query response"),
            }
        });
    }
}

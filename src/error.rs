//! Crate-level error types for event naming, dispatch, and construction.

use std::io;

/// Error returned when a store id or event name string is malformed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EventNameError {
    /// Store ids must be non-empty.
    #[error("store id must not be empty")]
    EmptyStoreId,

    /// Store ids must not contain the namespace separator.
    #[error("store id '{0}' contains the namespace separator '/'")]
    SeparatorInStoreId(String),

    /// A serialized event name had no `/` between namespace and local name.
    #[error("event name '{0}' is missing the namespace separator '/'")]
    MissingSeparator(String),
}

/// Fatal error raised while dispatching an event.
///
/// Recoverable conditions (unknown store, unknown handler) are never
/// reported through this type; see
/// [`DispatchOutcome::Unhandled`](crate::DispatchOutcome::Unhandled).
/// Every variant here means the fold was aborted and the global state was
/// left exactly as it was before the dispatch began.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// An effect map named an effect with no registered reducer.
    #[error("no reducer registered for effect '{0}'")]
    UnknownEffect(String),

    /// `changeStoreState` targeted a store without a local state cell.
    ///
    /// Also raised when the target store is not registered at all.
    #[error("store '{0}' has no local state cell")]
    MissingLocalState(String),

    /// The parameter of the reserved apply-effects event was not an effect map.
    #[error("malformed effect map: {0}")]
    MalformedEffects(String),

    /// A `sendQuery` effect was folded but no query client is configured.
    #[error("sendQuery effect requires a configured query client")]
    NoQueryClient,

    /// The conductor actor has stopped, so no further events are processed.
    #[error("conductor actor is no longer running")]
    ConductorGone,
}

/// Error returned by [`ConductorBuilder::build`](crate::ConductorBuilder::build).
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    /// A custom reducer tried to claim a built-in effect name.
    #[error("effect name '{0}' is reserved for a built-in reducer")]
    ReservedEffect(String),

    /// The same custom effect name was registered twice.
    #[error("a reducer for effect '{0}' is already registered")]
    DuplicateReducer(String),

    /// The actor runtime could not be created.
    #[error("failed to start conductor runtime: {0}")]
    Runtime(#[from] io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_effect_names_the_effect() {
        let err = DispatchError::UnknownEffect("bogus".into());
        assert_eq!(err.to_string(), "no reducer registered for effect 'bogus'");
    }

    #[test]
    fn missing_local_state_names_the_store() {
        let err = DispatchError::MissingLocalState("s1".into());
        assert_eq!(err.to_string(), "store 's1' has no local state cell");
    }

    #[test]
    fn conductor_gone_display() {
        assert_eq!(
            DispatchError::ConductorGone.to_string(),
            "conductor actor is no longer running"
        );
    }

    #[test]
    fn build_error_runtime_from_conversion() {
        let io_err = io::Error::other("no threads left");
        let err = BuildError::from(io_err);
        assert!(err.to_string().contains("no threads left"));
    }

    #[test]
    fn event_name_error_display() {
        let err = EventNameError::MissingSeparator("nope".into());
        assert_eq!(
            err.to_string(),
            "event name 'nope' is missing the namespace separator '/'"
        );
    }

    // Errors cross the actor's thread boundary inside oneshot replies.
    const _: () = {
        #[allow(dead_code)]
        fn assert_send_sync<T: Send + Sync>() {}

        #[allow(dead_code)]
        fn check() {
            assert_send_sync::<DispatchError>();
            assert_send_sync::<BuildError>();
            assert_send_sync::<EventNameError>();
        }
    };
}

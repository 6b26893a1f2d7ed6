// Copyright (c) 2026 Palimpsest Contributors. Licensed under AGPLv3.
//! Dispatcher / Handler Registry.
//!
//! A reducer table keyed by event type. Reducers are pure
//! `(state, event) -> state` functions supplied by the owning application at
//! startup; the engine carries no payload semantics of its own.
//!
//! Registries are explicitly constructed and passed by reference — there is
//! no process-wide singleton — so tests and documents get isolated instances.
//!
//! # Purity contract
//! Reducers must not close over shared mutable state. Determinism of replay
//! and soundness of the navigator cache both depend on this.

use crate::event::{DocumentState, EventRecord};
use std::collections::HashMap;
use thiserror::Error;

pub type Reducer =
    Box<dyn Fn(DocumentState, &EventRecord) -> Result<DocumentState, String> + Send + Sync>;

#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("no handler registered for event type '{0}'")]
    MissingHandler(String),

    #[error("handler for '{event_type}' failed: {message}")]
    HandlerFailed {
        event_type: String,
        message: String,
    },
}

/// What to do when an event's type has no registered handler.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MissingHandlerPolicy {
    /// Raise. Used on the live recording path, where an unknown type is a
    /// programming error.
    Strict,
    /// Skip with a warning. Used during replay so logs written by newer
    /// application versions still reconstruct.
    Lenient,
}

/// Outcome of dispatching one event.
#[derive(Debug)]
pub enum Dispatched {
    Applied(DocumentState),
    /// Lenient mode only: no handler, state passed through unchanged.
    Skipped(DocumentState),
}

#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Reducer>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a reducer for an event type. Re-registering replaces the
    /// previous reducer.
    pub fn register_handler(
        &mut self,
        event_type: impl Into<String>,
        reducer: impl Fn(DocumentState, &EventRecord) -> Result<DocumentState, String>
            + Send
            + Sync
            + 'static,
    ) {
        let event_type = event_type.into();
        if self.handlers.contains_key(&event_type) {
            tracing::warn!(%event_type, "overwriting previously registered handler");
        }
        self.handlers.insert(event_type, Box::new(reducer));
    }

    pub fn has_handler(&self, event_type: &str) -> bool {
        self.handlers.contains_key(event_type)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Apply one event to a state via its type's reducer.
    pub fn dispatch(
        &self,
        state: DocumentState,
        event: &EventRecord,
        policy: MissingHandlerPolicy,
    ) -> Result<Dispatched, DispatchError> {
        match self.handlers.get(&event.event_type) {
            Some(reducer) => {
                let next = reducer(state, event).map_err(|message| {
                    DispatchError::HandlerFailed {
                        event_type: event.event_type.clone(),
                        message,
                    }
                })?;
                Ok(Dispatched::Applied(next))
            }
            None => match policy {
                MissingHandlerPolicy::Strict => {
                    Err(DispatchError::MissingHandler(event.event_type.clone()))
                }
                MissingHandlerPolicy::Lenient => {
                    tracing::warn!(
                        event_type = %event.event_type,
                        sequence = event.sequence,
                        "no handler for event type; skipping"
                    );
                    Ok(Dispatched::Skipped(state))
                }
            },
        }
    }
}

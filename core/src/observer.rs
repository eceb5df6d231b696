//! Observer fan-out (§4.G): a thin publisher-subscriber over the engine's
//! lifecycle events. Observers must not mutate engine state; the publisher
//! enforces nothing beyond the `&self` signature, matching the teacher's
//! convention that listeners are read-only spectators.

use std::sync::Arc;

/// One lifecycle event raised by the Houdini engine. Carries borrowed text
/// where possible to avoid allocating on the hot path.
#[derive(Debug, Clone, Copy)]
pub enum Event<'a> {
    Start,
    Iteration(usize),
    Implementation(&'a str),
    Assignment(&'a str, bool),
    Outcome(&'a str, crate::driver::Outcome),
    Enqueue(&'a str),
    Dequeue(&'a str),
    Constant(&'a str),
    End,
    FlushStart,
    FlushFinish,
    Exception(&'a str),
}

/// All default to no-op so implementors only need to override what they
/// observe.
pub trait Observer: Send + Sync {
    fn on_event(&self, _event: Event<'_>) {}
}

/// Routes every lifecycle event to `tracing`, never to stdout/stderr
/// directly (see the crate-level `#![deny(clippy::print_stdout, ...)]`).
pub struct TracingObserver;

impl Observer for TracingObserver {
    fn on_event(&self, event: Event<'_>) {
        match event {
            Event::Start => tracing::info!(target: "houdini_core::engine", "start"),
            Event::End => tracing::info!(target: "houdini_core::engine", "end"),
            Event::Outcome(implementation, outcome) => tracing::info!(
                target: "houdini_core::engine",
                implementation,
                ?outcome,
                "outcome"
            ),
            Event::Iteration(n) => {
                tracing::debug!(target: "houdini_core::engine", iteration = n, "iteration")
            }
            Event::Implementation(name) => {
                tracing::debug!(target: "houdini_core::engine", implementation = name, "visiting")
            }
            Event::Enqueue(name) => {
                tracing::debug!(target: "houdini_core::engine", implementation = name, "enqueue")
            }
            Event::Dequeue(name) => {
                tracing::debug!(target: "houdini_core::engine", implementation = name, "dequeue")
            }
            Event::Constant(name) => {
                tracing::debug!(target: "houdini_core::engine", candidate = name, "constant")
            }
            Event::Assignment(name, value) => tracing::debug!(
                target: "houdini_core::engine",
                candidate = name,
                value,
                "assignment"
            ),
            Event::FlushStart => tracing::warn!(target: "houdini_core::engine", "flush start"),
            Event::FlushFinish => tracing::warn!(target: "houdini_core::engine", "flush finish"),
            Event::Exception(message) => {
                tracing::error!(target: "houdini_core::engine", "{message}")
            }
        }
    }
}

/// Fans out every event to its registered observers in insertion order.
/// Registering the same pointer twice is a no-op.
#[derive(Default)]
pub struct ObserverPublisher {
    observers: Vec<Arc<dyn Observer>>,
}

impl ObserverPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, observer: Arc<dyn Observer>) {
        if self
            .observers
            .iter()
            .any(|o| Arc::ptr_eq(o, &observer))
        {
            return;
        }
        self.observers.push(observer);
    }

    pub fn publish(&self, event: Event<'_>) {
        for observer in &self.observers {
            observer.on_event(event);
        }
    }
}

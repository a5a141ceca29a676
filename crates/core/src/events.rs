//! Observer interfaces
//!
//! Processors expose their events as a typed enum and keep an
//! [`EventHandlers`] list. Handlers are registered at construction and run
//! synchronously inside the processor's dispatch step, so they observe
//! events in the same order the processor produces them.
//!
//! [`FrameObserver`] is the pipeline-wide counterpart: it sees every frame
//! push between processors.

use std::fmt;
use std::sync::Arc;

use crate::{Frame, FrameDirection};

type Handler<E> = Box<dyn Fn(&E) + Send + Sync>;

/// Registered handlers for one processor's event type
pub struct EventHandlers<E> {
    handlers: Vec<Handler<E>>,
}

impl<E> EventHandlers<E> {
    pub fn new() -> Self {
        Self {
            handlers: Vec::new(),
        }
    }

    /// Register a handler
    pub fn register<F>(&mut self, handler: F)
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        self.handlers.push(Box::new(handler));
    }

    /// Invoke every handler in registration order
    pub fn emit(&self, event: &E) {
        for handler in &self.handlers {
            handler(event);
        }
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl<E> Default for EventHandlers<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> fmt::Debug for EventHandlers<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventHandlers")
            .field("handlers", &self.handlers.len())
            .finish()
    }
}

/// A frame moving from one processor to its neighbor
#[derive(Debug)]
pub struct FramePushed<'a> {
    pub source: &'a str,
    pub destination: &'a str,
    pub frame: &'a Frame,
    pub direction: FrameDirection,
}

/// Pipeline-wide observer of frame pushes
pub trait FrameObserver: Send + Sync + 'static {
    fn on_push_frame(&self, event: &FramePushed<'_>);
}

/// Shared observer list handed to every processor
pub type Observers = Arc<[Arc<dyn FrameObserver>]>;

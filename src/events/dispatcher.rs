//! Event dispatcher.
//!
//! Producers push onto an unbounded queue through an `EventSender` and return immediately. A
//! single dispatcher task drains the queue and calls every interested handler, in registration
//! order, for each event. A failing handler is logged and does not stop the others. A handler
//! that runs past the slow-handler threshold is reported but always runs to completion, so work
//! a handler starts (such as a storage migration) is never cut off halfway.

use crate::events::{Event, EventFamily};
use crate::system::{System, SystemInner};
use crate::wallet::WalletSyncError;

use std::sync::Weak;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, warn};

/// Trait for handling engine events.
///
/// Implementors receive every event of the families they subscribe to, together with the
/// system that produced it.
#[async_trait::async_trait]
pub trait EventHandler: Send + Sync {
    /// Handle one event.
    async fn handle(&mut self, system: &System, event: &Event) -> Result<(), WalletSyncError>;

    /// Get the name of this handler for logging and diagnostics.
    fn name(&self) -> &'static str;

    /// Families this handler wants to receive.
    fn families(&self) -> &[EventFamily] {
        &EventFamily::ALL
    }
}

pub(crate) enum Dispatch {
    Event(Event),
    Register(Box<dyn EventHandler>),
    Flush(oneshot::Sender<()>),
}

/// Cheap handle used by producers to enqueue events.
#[derive(Clone)]
pub(crate) struct EventSender {
    tx: mpsc::UnboundedSender<Dispatch>,
}

impl EventSender {
    pub(crate) fn channel() -> (Self, mpsc::UnboundedReceiver<Dispatch>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Queue an event. Never blocks.
    pub(crate) fn emit(&self, event: Event) {
        if self.tx.send(Dispatch::Event(event)).is_err() {
            debug!("Event dispatcher has stopped, dropping event");
        }
    }

    pub(crate) fn register(&self, handler: Box<dyn EventHandler>) {
        if self.tx.send(Dispatch::Register(handler)).is_err() {
            warn!("Event dispatcher has stopped, handler not registered");
        }
    }

    /// Resolve once every event queued before this call has been delivered.
    pub(crate) async fn flush(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.tx.send(Dispatch::Flush(done_tx)).is_ok() {
            let _ = done_rx.await;
        }
    }
}

/// Event dispatcher that manages multiple event handlers.
pub struct EventDispatcher {
    handlers: Vec<Box<dyn EventHandler>>,
    slow_handler_threshold: Duration,
}

impl EventDispatcher {
    /// Create a new, empty event dispatcher.
    pub fn new(slow_handler_threshold: Duration) -> Self {
        Self {
            handlers: Vec::new(),
            slow_handler_threshold,
        }
    }

    /// Register a new event handler.
    ///
    /// Handlers are called in the order they are registered.
    pub fn register_handler(&mut self, handler: Box<dyn EventHandler>) {
        debug!("Registering event handler {}", handler.name());
        self.handlers.push(handler);
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }

    /// Dispatch an event to all interested handlers.
    ///
    /// Errors from handlers are logged, but do not stop other handlers from running.
    pub async fn dispatch(&mut self, system: &System, event: &Event) {
        let family = event.family();
        for handler in &mut self.handlers {
            if !handler.families().contains(&family) {
                continue;
            }

            let name = handler.name();
            let mut handling = handler.handle(system, event);
            let result = match tokio::time::timeout(self.slow_handler_threshold, &mut handling).await
            {
                Ok(result) => result,
                Err(_) => {
                    warn!(
                        "Handler {} still handling {:?} event after {:?}",
                        name, family, self.slow_handler_threshold
                    );
                    handling.await
                }
            };
            if let Err(e) = result {
                error!("Handler {} failed to process event: {}", name, e);
            }
        }
    }

    /// Drain the queue until every sender is gone or the system has been dropped.
    pub(crate) async fn run(
        mut self,
        mut rx: mpsc::UnboundedReceiver<Dispatch>,
        system: Weak<SystemInner>,
    ) {
        while let Some(message) = rx.recv().await {
            match message {
                Dispatch::Register(handler) => self.register_handler(handler),
                Dispatch::Flush(done) => {
                    let _ = done.send(());
                }
                Dispatch::Event(event) => {
                    let Some(inner) = system.upgrade() else {
                        debug!("System dropped, stopping event dispatcher");
                        break;
                    };
                    let system = System::from_inner(inner);
                    self.dispatch(&system, &event).await;
                }
            }
        }
        debug!("Event dispatcher finished");
    }
}

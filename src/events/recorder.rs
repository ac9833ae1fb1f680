//! Event recording and sequence checking.
//!
//! `EventRecorder` keeps every delivered event and lets callers await a predicate over the
//! observed stream. `check_events` verifies an ordered, possibly partial, expected sequence
//! against what was observed:
//!
//! - a **strict** matcher fails the check when the next observed event does not match it;
//! - a **scan** matcher skips observed events until one matches, tolerating interleavings such
//!   as `SyncProgress`;
//! - a matcher that is neither is optional: when the next observed event does not match, the
//!   matcher is dropped and checking continues with the next one.

use crate::events::{
    Event, EventHandler, SystemEvent, TransferEvent, WalletEvent, WalletManagerEvent,
};
use crate::system::System;
use crate::wallet::{ManagerId, Transfer, WalletId, WalletSyncError};

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;

/// One expected event and how to match it against the observed stream.
#[derive(Debug, Clone)]
pub struct EventMatcher<E> {
    pub event: E,
    pub strict: bool,
    pub scan: bool,
}

impl<E> EventMatcher<E> {
    /// A strict, non-scanning matcher.
    pub fn new(event: E) -> Self {
        Self {
            event,
            strict: true,
            scan: false,
        }
    }

    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    pub fn scan(mut self, scan: bool) -> Self {
        self.scan = scan;
        self
    }
}

impl<E> From<E> for EventMatcher<E> {
    fn from(event: E) -> Self {
        EventMatcher::new(event)
    }
}

/// Check `matchers`, in order, against the `observed` stream.
pub fn check_events<E: PartialEq>(observed: &[E], matchers: &[EventMatcher<E>]) -> bool {
    let mut cursor = 0usize;

    for matcher in matchers {
        loop {
            match observed.get(cursor) {
                None if matcher.strict => return false,
                None => break,
                Some(event) if *event == matcher.event => {
                    cursor += 1;
                    break;
                }
                Some(_) if matcher.scan => cursor += 1,
                Some(_) if matcher.strict => return false,
                Some(_) => break,
            }
        }
    }

    true
}

/// Check a plain expected list. Strict means `observed` is exactly `expected`; otherwise
/// `expected` must appear in order, with anything interleaved.
pub fn check_exact<E: PartialEq + Clone>(observed: &[E], expected: &[E], strict: bool) -> bool {
    if strict {
        return observed == expected;
    }
    let matchers: Vec<EventMatcher<E>> = expected
        .iter()
        .cloned()
        .map(|event| EventMatcher::new(event).scan(true))
        .collect();
    check_events(observed, &matchers)
}

/// Shared log of every event delivered to its handler.
#[derive(Clone, Default)]
pub struct EventRecorder {
    log: Arc<Mutex<Vec<Event>>>,
    notify: Arc<Notify>,
}

struct RecordingHandler {
    log: Arc<Mutex<Vec<Event>>>,
    notify: Arc<Notify>,
}

#[async_trait::async_trait]
impl EventHandler for RecordingHandler {
    async fn handle(&mut self, _system: &System, event: &Event) -> Result<(), WalletSyncError> {
        self.log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event.clone());
        self.notify.notify_waiters();
        Ok(())
    }

    fn name(&self) -> &'static str {
        "EventRecorder"
    }
}

impl EventRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// A handler feeding this recorder; register it with a `System`.
    pub fn handler(&self) -> Box<dyn EventHandler> {
        Box::new(RecordingHandler {
            log: self.log.clone(),
            notify: self.notify.clone(),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Event>> {
        self.log.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Every recorded event, in delivery order.
    pub fn events(&self) -> Vec<Event> {
        self.lock().clone()
    }

    pub fn system_events(&self) -> Vec<SystemEvent> {
        self.lock()
            .iter()
            .filter_map(|event| match event {
                Event::System(event) => Some(event.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn manager_events(&self, manager: ManagerId) -> Vec<WalletManagerEvent> {
        self.lock()
            .iter()
            .filter_map(|event| match event {
                Event::Manager { manager: id, event } if *id == manager => Some(event.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn wallet_events(&self, wallet: WalletId) -> Vec<WalletEvent> {
        self.lock()
            .iter()
            .filter_map(|event| match event {
                Event::Wallet { wallet: id, event } if *id == wallet => Some(event.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn transfer_events(&self, wallet: WalletId) -> Vec<(Transfer, TransferEvent)> {
        self.lock()
            .iter()
            .filter_map(|event| match event {
                Event::Transfer {
                    wallet: id,
                    transfer,
                    event,
                } if *id == wallet => Some((transfer.clone(), event.clone())),
                _ => None,
            })
            .collect()
    }

    /// Transfer events of every wallet of `manager`.
    pub fn manager_transfer_events(&self, manager: ManagerId) -> Vec<(Transfer, TransferEvent)> {
        self.lock()
            .iter()
            .filter_map(|event| match event {
                Event::Transfer {
                    wallet,
                    transfer,
                    event,
                } if wallet.manager == manager => Some((transfer.clone(), event.clone())),
                _ => None,
            })
            .collect()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Wait until `predicate` holds over the recorded events. Returns `false` on timeout.
    pub async fn wait_for<F>(&self, timeout: Duration, predicate: F) -> bool
    where
        F: Fn(&[Event]) -> bool,
    {
        let wait = async {
            loop {
                let notified = self.notify.notified();
                if predicate(self.lock().as_slice()) {
                    return;
                }
                notified.await;
            }
        };
        tokio::time::timeout(timeout, wait).await.is_ok()
    }

    /// Wait until `manager` reports a transition into `state`.
    pub async fn wait_for_manager_state(
        &self,
        timeout: Duration,
        manager: ManagerId,
        state: crate::wallet::WalletManagerState,
    ) -> bool {
        self.wait_for(timeout, |events| {
            events.iter().any(|event| {
                matches!(
                    event,
                    Event::Manager {
                        manager: id,
                        event: WalletManagerEvent::Changed { new_state, .. },
                    } if *id == manager && *new_state == state
                )
            })
        })
        .await
    }
}

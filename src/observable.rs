//! Named multi-listener event channels with panic-isolated dispatch.
//!
//! Event names are declared once at construction; subscribing to or
//! dispatching an undeclared name is a programmer error. Dispatch runs
//! handlers in subscription order and a failing handler never stops the
//! rest: the panic is caught, logged, and iteration continues.
//!
//! Dispatch deliberately happens on a *taken* handler list
//! ([`Observable::take`] / [`Observable::restore`]) so that handlers can
//! re-enter the owner, even to subscribe new handlers mid-dispatch,
//! without deadlocking; anything registered while a dispatch is in flight
//! lands in the next round.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};

use tracing::warn;

use crate::cookies::Cookie;
use crate::error::HttpClientError;
use crate::request::Request;
use crate::response::Response;

/// Positional arguments handed through to event handlers.
pub enum EventArgs<'a> {
    Empty,
    Request(&'a Request),
    Response(&'a Response),
    NewCookies(&'a [Cookie], &'a Response),
}

/// A subscribed handler.
pub type EventHandler = Box<dyn FnMut(&EventArgs<'_>) + Send>;

/// Event-name-keyed handler lists.
pub struct Observable {
    channels: HashMap<&'static str, Vec<EventHandler>>,
}

impl Observable {
    /// Declares the channel set. Only these names can ever be used.
    pub fn new(events: &[&'static str]) -> Self {
        Observable {
            channels: events.iter().map(|name| (*name, Vec::new())).collect(),
        }
    }

    pub fn subscribe(
        &mut self,
        event: &str,
        handler: EventHandler,
    ) -> Result<(), HttpClientError> {
        self.channel_mut(event)?.push(handler);
        Ok(())
    }

    /// Removes and returns the current handlers of `event`, leaving the
    /// channel empty (but declared).
    pub fn take(&mut self, event: &str) -> Result<Vec<EventHandler>, HttpClientError> {
        Ok(std::mem::take(self.channel_mut(event)?))
    }

    /// Puts taken handlers back in front of any subscribed meanwhile,
    /// preserving overall subscription order.
    pub fn restore(&mut self, event: &str, mut taken: Vec<EventHandler>) {
        if let Some(channel) = self.channels.get_mut(event) {
            taken.append(channel);
            *channel = taken;
        }
    }

    pub fn handler_count(&self, event: &str) -> usize {
        self.channels.get(event).map_or(0, Vec::len)
    }

    /// Drops every handler; declarations survive.
    pub fn clear(&mut self) {
        for channel in self.channels.values_mut() {
            channel.clear();
        }
    }

    /// Runs `handlers` in order, isolating each one: a panic is logged and
    /// the remaining handlers still run.
    pub fn dispatch(event: &str, handlers: &mut [EventHandler], args: &EventArgs<'_>) {
        for (index, handler) in handlers.iter_mut().enumerate() {
            if catch_unwind(AssertUnwindSafe(|| handler(args))).is_err() {
                warn!("observer {index} for '{event}' failed; continuing");
            }
        }
    }

    fn channel_mut(&mut self, event: &str) -> Result<&mut Vec<EventHandler>, HttpClientError> {
        self.channels
            .get_mut(event)
            .ok_or_else(|| HttpClientError::UnknownEvent(event.to_string()))
    }
}

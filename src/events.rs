//! Named events dispatched by lookers to the host application.

use std::fmt;

use crate::error::LookerError;

/// Name of the event carrying a [`LookerError`].
pub const ERROR_EVENT: &str = "error";

/// Name of the event fired once decoded overlays are available.
pub const OVERLAYS_PREPARED_EVENT: &str = "overlays-prepared";

/// An event dispatched by a looker.
#[derive(Debug)]
pub enum LookerEvent {
    /// A user-visible error, e.g. an invalid seek or a missing fragment
    Error(LookerError),
    /// Overlays for the current sample were decoded
    OverlaysPrepared,
}

impl LookerEvent {
    /// Event name listeners subscribe to.
    pub fn name(&self) -> &'static str {
        match self {
            LookerEvent::Error(_) => ERROR_EVENT,
            LookerEvent::OverlaysPrepared => OVERLAYS_PREPARED_EVENT,
        }
    }
}

/// Handle returned by [`EventTarget::add_event_listener`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Handler = Box<dyn FnMut(&LookerEvent)>;

/// Registry of event listeners keyed by event name.
#[derive(Default)]
pub struct EventTarget {
    next_id: u64,
    listeners: Vec<(ListenerId, String, Handler)>,
}

impl fmt::Debug for EventTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventTarget")
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

impl EventTarget {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe `handler` to events named `name`.
    pub fn add_event_listener(&mut self, name: &str, handler: impl FnMut(&LookerEvent) + 'static) -> ListenerId {
        let id = ListenerId(self.next_id);
        self.next_id += 1;
        self.listeners.push((id, name.to_owned(), Box::new(handler)));
        id
    }

    /// Unsubscribe a listener. Returns `false` if it was not registered.
    pub fn remove_event_listener(&mut self, id: ListenerId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(listener, ..)| *listener != id);
        self.listeners.len() != before
    }

    /// Deliver an event to every listener of its name, in subscription order.
    ///
    /// Returns the number of listeners notified.
    pub fn dispatch(&mut self, event: &LookerEvent) -> usize {
        let name = event.name();
        let mut notified = 0;
        for (_, listener_name, handler) in &mut self.listeners {
            if listener_name == name {
                handler(event);
                notified += 1;
            }
        }
        if notified == 0 {
            if let LookerEvent::Error(error) = event {
                log::warn!("Unhandled looker error: {}", error);
            }
        }
        notified
    }

    /// Number of listeners subscribed to `name`.
    pub fn listener_count(&self, name: &str) -> usize {
        self.listeners.iter().filter(|(_, n, _)| n == name).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn test_dispatch_by_name() {
        let mut target = EventTarget::new();
        let seen = Rc::new(RefCell::new(Vec::new()));

        let errors = Rc::clone(&seen);
        target.add_event_listener(ERROR_EVENT, move |event| {
            errors.borrow_mut().push(event.to_string_lossy());
        });
        let prepared = Rc::clone(&seen);
        target.add_event_listener(OVERLAYS_PREPARED_EVENT, move |_| {
            prepared.borrow_mut().push("prepared".to_string());
        });

        assert_eq!(target.dispatch(&LookerEvent::Error(LookerError::NoFragment)), 1);
        assert_eq!(target.dispatch(&LookerEvent::OverlaysPrepared), 1);
        assert_eq!(*seen.borrow(), ["No fragment set", "prepared"]);
    }

    #[test]
    fn test_remove_listener() {
        let mut target = EventTarget::new();
        let id = target.add_event_listener(ERROR_EVENT, |_| {});
        assert_eq!(target.listener_count(ERROR_EVENT), 1);
        assert!(target.remove_event_listener(id));
        assert!(!target.remove_event_listener(id));
        assert_eq!(target.dispatch(&LookerEvent::Error(LookerError::NoFragment)), 0);
    }

    impl LookerEvent {
        fn to_string_lossy(&self) -> String {
            match self {
                LookerEvent::Error(e) => e.to_string(),
                LookerEvent::OverlaysPrepared => self.name().to_string(),
            }
        }
    }
}

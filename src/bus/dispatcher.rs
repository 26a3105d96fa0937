//! Priority-ordered command dispatch
//!
//! Inbound bus messages are routed through a table of handlers bound to
//! topic-filter patterns. The table is walked in descending priority
//! (registration order breaks ties) and the first handler that claims a
//! message stops the walk. A handler that declines must leave all shared
//! state untouched so later handlers can still act.

use crate::bus::client::BusHandle;
use crate::bus::matcher::topic_matches;

/// Handler callback: returns true when the message was handled
pub type HandlerFn = Box<dyn Fn(&BusHandle, &str, &[u8]) -> bool + Send + Sync>;

struct Handler {
    pattern: String,
    name: String,
    priority: u8,
    callback: HandlerFn,
}

/// The handler table
#[derive(Default)]
pub struct Dispatcher {
    handlers: Vec<Handler>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a handler and re-sort the table by descending priority.
    /// The sort is stable, so equal priorities keep registration order.
    pub fn register_handler(
        &mut self,
        pattern: impl Into<String>,
        priority: u8,
        name: impl Into<String>,
        callback: HandlerFn,
    ) {
        let pattern = pattern.into();
        let name = name.into();

        tracing::info!(
            "Registered handler '{}' for pattern '{}' (priority: {})",
            name,
            pattern,
            priority
        );

        self.handlers.push(Handler {
            pattern,
            name,
            priority,
            callback,
        });
        self.handlers.sort_by(|a, b| b.priority.cmp(&a.priority));
    }

    /// Remove every handler registered for `pattern`
    pub fn unregister_handler(&mut self, pattern: &str) {
        let before = self.handlers.len();
        self.handlers.retain(|h| h.pattern != pattern);
        if self.handlers.len() < before {
            tracing::info!("Unregistered handler for pattern '{}'", pattern);
        }
    }

    /// Route one message. Returns true when some handler claimed it; an
    /// unmatched message is logged and is not an error.
    pub fn dispatch(&self, bus: &BusHandle, topic: &str, payload: &[u8]) -> bool {
        tracing::debug!("Dispatching message on topic {} ({} bytes)", topic, payload.len());

        for handler in &self.handlers {
            if topic_matches(&handler.pattern, topic) {
                tracing::trace!(
                    "Trying handler '{}' (pattern '{}', priority {})",
                    handler.name,
                    handler.pattern,
                    handler.priority
                );

                if (handler.callback)(bus, topic, payload) {
                    tracing::debug!("Handled by '{}'", handler.name);
                    return true;
                }
            }
        }

        tracing::debug!("No handler processed topic {}", topic);
        false
    }

    /// Registered patterns in dispatch order, for the initial subscribe pass
    pub fn patterns(&self) -> Vec<String> {
        self.handlers.iter().map(|h| h.pattern.clone()).collect()
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::client::BusHandle;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    fn test_handle() -> BusHandle {
        BusHandle::detached()
    }

    fn recording_handler(log: Arc<Mutex<Vec<&'static str>>>, tag: &'static str, claim: bool) -> HandlerFn {
        Box::new(move |_bus, _topic, _payload| {
            log.lock().unwrap().push(tag);
            claim
        })
    }

    #[test]
    fn test_priority_order_and_first_claim() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut dispatcher = Dispatcher::new();

        dispatcher.register_handler("a/#", 100, "low", recording_handler(log.clone(), "low", true));
        dispatcher.register_handler("a/b", 150, "high", recording_handler(log.clone(), "high", true));

        assert!(dispatcher.dispatch(&test_handle(), "a/b", b"x"));
        assert_eq!(*log.lock().unwrap(), vec!["high"]);
    }

    #[test]
    fn test_declined_message_falls_through() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut dispatcher = Dispatcher::new();

        dispatcher.register_handler("a/#", 150, "first", recording_handler(log.clone(), "first", false));
        dispatcher.register_handler("a/#", 100, "second", recording_handler(log.clone(), "second", true));

        assert!(dispatcher.dispatch(&test_handle(), "a/x", b""));
        assert_eq!(*log.lock().unwrap(), vec!["first", "second"]);
    }

    #[test]
    fn test_ties_keep_registration_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut dispatcher = Dispatcher::new();

        for tag in ["one", "two", "three"] {
            dispatcher.register_handler("t/#", 100, tag, recording_handler(log.clone(), tag, false));
        }
        // A later high-priority insert still sorts first
        dispatcher.register_handler("t/#", 200, "urgent", recording_handler(log.clone(), "urgent", false));

        dispatcher.dispatch(&test_handle(), "t/x", b"");
        assert_eq!(*log.lock().unwrap(), vec!["urgent", "one", "two", "three"]);
    }

    #[test]
    fn test_dispatch_is_repeatable() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut dispatcher = Dispatcher::new();

        let c = counter.clone();
        dispatcher.register_handler(
            "r/+",
            100,
            "count",
            Box::new(move |_, _, _| {
                c.fetch_add(1, Ordering::Relaxed);
                true
            }),
        );

        for _ in 0..3 {
            assert!(dispatcher.dispatch(&test_handle(), "r/x", b""));
        }
        assert_eq!(counter.load(Ordering::Relaxed), 3);
    }

    #[test]
    fn test_unmatched_topic_is_noop() {
        let mut dispatcher = Dispatcher::new();
        dispatcher.register_handler("only/this", 100, "h", Box::new(|_, _, _| true));

        assert!(!dispatcher.dispatch(&test_handle(), "something/else", b""));
    }

    #[test]
    fn test_unregister() {
        let mut dispatcher = Dispatcher::new();
        dispatcher.register_handler("x", 100, "h", Box::new(|_, _, _| true));
        assert_eq!(dispatcher.handler_count(), 1);

        dispatcher.unregister_handler("x");
        assert_eq!(dispatcher.handler_count(), 0);
        assert!(!dispatcher.dispatch(&test_handle(), "x", b""));
    }
}

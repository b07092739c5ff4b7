use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Weak};
use tracing::{debug, warn};

use crate::error::HandlerError;
use crate::types::InboundMessage;

/// Callback registered for one message type
pub type Handler = Arc<dyn Fn(&InboundMessage) -> Result<(), HandlerError> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct HandlerId(u64);

#[derive(Default)]
struct HandlerTable {
    next_id: u64,
    by_type: HashMap<String, Vec<(HandlerId, Handler)>>,
}

impl HandlerTable {
    fn remove(&mut self, msg_type: &str, id: HandlerId) -> bool {
        let Some(handlers) = self.by_type.get_mut(msg_type) else {
            return false;
        };
        let before = handlers.len();
        handlers.retain(|(handler_id, _)| *handler_id != id);
        let removed = handlers.len() != before;
        if handlers.is_empty() {
            self.by_type.remove(msg_type);
        }
        removed
    }
}

/// Routes inbound messages to the handlers registered for their type
///
/// Handlers run in registration order. A handler that returns an error or
/// panics is logged and skipped; the rest still run and the caller of
/// [`dispatch`](Self::dispatch) never sees the failure.
///
/// Cloning is cheap and yields a handle onto the same handler table.
#[derive(Clone, Default)]
pub struct MessageDispatcher {
    table: Arc<Mutex<HandlerTable>>,
}

/// Outcome of a single [`MessageDispatcher::dispatch`] call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DispatchOutcome {
    /// Handlers that ran to completion
    pub handled: usize,
    /// Handlers that returned an error or panicked
    pub failed: usize,
}

impl MessageDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for `msg_type`
    ///
    /// The returned disposer removes exactly this registration. Dropping the
    /// disposer without calling it leaves the handler installed.
    pub fn on<F>(&self, msg_type: impl Into<String>, handler: F) -> HandlerDisposer
    where
        F: Fn(&InboundMessage) -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        let msg_type = msg_type.into();
        let mut table = self.table.lock();
        let id = HandlerId(table.next_id);
        table.next_id += 1;
        table
            .by_type
            .entry(msg_type.clone())
            .or_default()
            .push((id, Arc::new(handler)));

        HandlerDisposer {
            table: Arc::downgrade(&self.table),
            msg_type,
            id,
        }
    }

    /// Register a handler that receives the frame deserialized as `T`
    ///
    /// A frame that does not deserialize counts as a handler failure.
    pub fn on_typed<T, F>(&self, msg_type: impl Into<String>, handler: F) -> HandlerDisposer
    where
        T: DeserializeOwned,
        F: Fn(T) -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        self.on(msg_type, move |message: &InboundMessage| {
            let value = message.deserialize::<T>()?;
            handler(value)
        })
    }

    /// Deliver a message to every handler registered for its type
    ///
    /// The handler list is copied before any handler runs, so handlers may
    /// register or dispose handlers without affecting this dispatch.
    pub fn dispatch(&self, message: &InboundMessage) -> DispatchOutcome {
        let handlers: Vec<Handler> = {
            let table = self.table.lock();
            match table.by_type.get(message.msg_type()) {
                Some(handlers) => handlers.iter().map(|(_, h)| Arc::clone(h)).collect(),
                None => {
                    debug!(msg_type = message.msg_type(), "no handlers registered");
                    return DispatchOutcome::default();
                }
            }
        };

        let mut outcome = DispatchOutcome::default();
        for (index, handler) in handlers.iter().enumerate() {
            match panic::catch_unwind(AssertUnwindSafe(|| handler(message))) {
                Ok(Ok(())) => outcome.handled += 1,
                Ok(Err(e)) => {
                    outcome.failed += 1;
                    warn!(
                        msg_type = message.msg_type(),
                        handler = index,
                        error = %e,
                        "message handler failed"
                    );
                }
                Err(payload) => {
                    outcome.failed += 1;
                    warn!(
                        msg_type = message.msg_type(),
                        handler = index,
                        panic = panic_message(payload.as_ref()),
                        "message handler panicked"
                    );
                }
            }
        }
        outcome
    }

    /// Number of handlers currently registered for `msg_type`
    pub fn handler_count(&self, msg_type: &str) -> usize {
        self.table
            .lock()
            .by_type
            .get(msg_type)
            .map_or(0, |handlers| handlers.len())
    }
}

impl std::fmt::Debug for MessageDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let table = self.table.lock();
        let mut types: Vec<_> = table
            .by_type
            .iter()
            .map(|(t, handlers)| (t.clone(), handlers.len()))
            .collect();
        types.sort();
        f.debug_struct("MessageDispatcher")
            .field("handlers", &types)
            .finish()
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string panic payload"
    }
}

/// Removes one handler registration
///
/// Calling [`dispose`](Self::dispose) more than once is harmless.
#[derive(Debug)]
#[must_use = "dropping the disposer leaves the handler registered with no way to remove it"]
pub struct HandlerDisposer {
    table: Weak<Mutex<HandlerTable>>,
    msg_type: String,
    id: HandlerId,
}

impl HandlerDisposer {
    /// Unregister the handler. Returns `true` only on the call that removed it.
    pub fn dispose(&self) -> bool {
        match self.table.upgrade() {
            Some(table) => table.lock().remove(&self.msg_type, self.id),
            None => false,
        }
    }

    /// Message type the handler was registered under
    pub fn msg_type(&self) -> &str {
        &self.msg_type
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    fn message(text: &str) -> InboundMessage {
        InboundMessage::parse(text).unwrap()
    }

    fn recorder() -> (Arc<StdMutex<Vec<String>>>, impl Fn(&str) -> Handler) {
        let log = Arc::new(StdMutex::new(Vec::new()));
        let make = {
            let log = Arc::clone(&log);
            move |name: &str| -> Handler {
                let log = Arc::clone(&log);
                let name = name.to_string();
                Arc::new(move |_msg: &InboundMessage| {
                    log.lock().unwrap().push(name.clone());
                    Ok(())
                })
            }
        };
        (log, make)
    }

    #[test]
    fn test_handlers_run_in_registration_order() {
        let dispatcher = MessageDispatcher::new();
        let (log, make) = recorder();
        for name in ["a", "b", "c"] {
            let handler = make(name);
            let _ = dispatcher.on("price_update", move |m| handler(m));
        }

        let outcome = dispatcher.dispatch(&message(r#"{"type":"price_update"}"#));

        assert_eq!(outcome, DispatchOutcome { handled: 3, failed: 0 });
        assert_eq!(*log.lock().unwrap(), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_unknown_type_is_silent_noop() {
        let dispatcher = MessageDispatcher::new();
        let outcome = dispatcher.dispatch(&message(r#"{"type":"future_feature"}"#));
        assert_eq!(outcome, DispatchOutcome::default());
    }

    #[test]
    fn test_failing_handlers_are_isolated() {
        let dispatcher = MessageDispatcher::new();
        let (log, make) = recorder();

        let _ = dispatcher.on("trade", |_m| Err("boom".into()));
        let _ = dispatcher.on("trade", |_m| panic!("handler exploded"));
        let last = make("after");
        let _ = dispatcher.on("trade", move |m| last(m));

        let outcome = dispatcher.dispatch(&message(r#"{"type":"trade"}"#));

        assert_eq!(outcome, DispatchOutcome { handled: 1, failed: 2 });
        assert_eq!(*log.lock().unwrap(), vec!["after"]);
    }

    #[test]
    fn test_disposer_removes_exactly_one_handler() {
        let dispatcher = MessageDispatcher::new();
        let (log, make) = recorder();
        let first = make("first");
        let second = make("second");
        let first_disposer = dispatcher.on("trade", move |m| first(m));
        let _second_disposer = dispatcher.on("trade", move |m| second(m));

        assert!(first_disposer.dispose());
        assert!(!first_disposer.dispose());
        assert_eq!(dispatcher.handler_count("trade"), 1);

        dispatcher.dispatch(&message(r#"{"type":"trade"}"#));
        assert_eq!(*log.lock().unwrap(), vec!["second"]);
    }

    #[test]
    fn test_same_closure_registered_twice_is_removed_once() {
        let dispatcher = MessageDispatcher::new();
        let (log, make) = recorder();
        let handler = make("shared");
        let h1 = Arc::clone(&handler);
        let h2 = Arc::clone(&handler);

        let d1 = dispatcher.on("trade", move |m| h1(m));
        let _d2 = dispatcher.on("trade", move |m| h2(m));
        d1.dispose();

        dispatcher.dispatch(&message(r#"{"type":"trade"}"#));
        assert_eq!(log.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_handler_can_dispose_itself_during_dispatch() {
        let dispatcher = MessageDispatcher::new();
        let slot: Arc<StdMutex<Option<HandlerDisposer>>> = Arc::new(StdMutex::new(None));
        let calls = Arc::new(StdMutex::new(0));

        let disposer = {
            let slot = Arc::clone(&slot);
            let calls = Arc::clone(&calls);
            dispatcher.on("once", move |_m| {
                *calls.lock().unwrap() += 1;
                if let Some(d) = slot.lock().unwrap().as_ref() {
                    d.dispose();
                }
                Ok(())
            })
        };
        *slot.lock().unwrap() = Some(disposer);

        dispatcher.dispatch(&message(r#"{"type":"once"}"#));
        dispatcher.dispatch(&message(r#"{"type":"once"}"#));

        assert_eq!(*calls.lock().unwrap(), 1);
        assert_eq!(dispatcher.handler_count("once"), 0);
    }

    #[test]
    fn test_typed_handler_and_deserialize_failure() {
        #[derive(serde::Deserialize)]
        struct Update {
            price: f64,
        }

        let dispatcher = MessageDispatcher::new();
        let seen = Arc::new(StdMutex::new(Vec::new()));
        let _ = {
            let seen = Arc::clone(&seen);
            dispatcher.on_typed("price_update", move |u: Update| {
                seen.lock().unwrap().push(u.price);
                Ok(())
            })
        };

        let ok = dispatcher.dispatch(&message(r#"{"type":"price_update","price":0.62}"#));
        let bad = dispatcher.dispatch(&message(r#"{"type":"price_update","price":"high"}"#));

        assert_eq!(ok.handled, 1);
        assert_eq!(bad.failed, 1);
        assert_eq!(*seen.lock().unwrap(), vec![0.62]);
    }

    #[test]
    fn test_disposer_outliving_dispatcher_is_harmless() {
        let dispatcher = MessageDispatcher::new();
        let disposer = dispatcher.on("trade", |_m| Ok(()));
        drop(dispatcher);
        assert!(!disposer.dispose());
    }
}

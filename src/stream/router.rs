//! Stream subscription fan-out.
//!
//! Listeners are keyed by `"<stream name>::<key>"`. Incoming stream events are
//! matched on `"<collection>::<eventName>"`, so every listener registered for
//! the same pair receives the event. Subscription ids only exist to satisfy
//! the `sub` wire format and are never matched against inbound traffic.

use std::collections::HashMap;
use std::fmt;

use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use crate::ids;
use crate::stream::proto::{
    ClientMessage, StreamFieldsMsg, STREAM_COLLECTION_PREFIX, STREAM_DOCUMENT_ID,
};

/// Callback invoked with the first argument of each matching stream event.
pub type StreamListener = Box<dyn FnMut(Value) + Send + 'static>;

#[derive(Default)]
pub struct SubscriptionRouter {
    listeners: HashMap<String, Vec<StreamListener>>,
}

impl SubscriptionRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `listener` for `(name, key)` and returns the `sub` request
    /// to send, carrying a fresh random subscription id.
    pub fn subscribe(&mut self, name: &str, key: &str, listener: StreamListener) -> ClientMessage {
        self.listeners
            .entry(route_key(name, key))
            .or_default()
            .push(listener);

        ClientMessage::Sub {
            id: ids::random_id(),
            name: name.to_string(),
            params: vec![
                Value::String(key.to_string()),
                json!({"useCollection": false, "args": []}),
            ],
        }
    }

    /// Routes a `changed` message to its listeners and returns how many were
    /// invoked. Non-stream documents are ignored.
    pub fn dispatch(&mut self, collection: &str, document_id: &str, fields: &Value) -> usize {
        if !collection.starts_with(STREAM_COLLECTION_PREFIX) || document_id != STREAM_DOCUMENT_ID {
            return 0;
        }

        let fields = match StreamFieldsMsg::deserialize(fields) {
            Ok(fields) => fields,
            Err(err) => {
                debug!(event = "stream_event_malformed", collection, error = %err);
                return 0;
            }
        };

        let key = route_key(collection, &fields.event_name);
        let Some(listeners) = self.listeners.get_mut(&key) else {
            debug!(event = "stream_event_unrouted", route = %key);
            return 0;
        };

        let payload = fields.args.into_iter().next().unwrap_or(Value::Null);
        for listener in listeners.iter_mut() {
            listener(payload.clone());
        }
        listeners.len()
    }

    pub fn listener_count(&self, name: &str, key: &str) -> usize {
        self.listeners
            .get(&route_key(name, key))
            .map_or(0, Vec::len)
    }
}

impl fmt::Debug for SubscriptionRouter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let routes: HashMap<&str, usize> = self
            .listeners
            .iter()
            .map(|(route, listeners)| (route.as_str(), listeners.len()))
            .collect();
        f.debug_struct("SubscriptionRouter")
            .field("routes", &routes)
            .finish()
    }
}

fn route_key(name: &str, key: &str) -> String {
    format!("{name}::{key}")
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use serde_json::{json, Value};

    use super::{StreamListener, SubscriptionRouter};
    use crate::stream::proto::ClientMessage;

    fn recorder() -> (Arc<Mutex<Vec<Value>>>, StreamListener) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let listener: StreamListener = Box::new(move |value: Value| {
            sink.lock().expect("lock").push(value);
        });
        (seen, listener)
    }

    fn event(name: &str, args: Value) -> Value {
        json!({"eventName": name, "args": args})
    }

    #[test]
    fn subscribe_builds_sub_request() {
        let mut router = SubscriptionRouter::new();
        let (_, listener) = recorder();
        let message = router.subscribe("stream-room-messages", "GENERAL", listener);

        let ClientMessage::Sub { id, name, params } = message else {
            panic!("expected sub message");
        };
        assert!(!id.is_empty());
        assert_eq!(name, "stream-room-messages");
        assert_eq!(
            params,
            vec![json!("GENERAL"), json!({"useCollection": false, "args": []})]
        );
    }

    #[test]
    fn fans_out_to_every_listener_of_the_pair_only() {
        let mut router = SubscriptionRouter::new();
        let (first, first_listener) = recorder();
        let (second, second_listener) = recorder();
        let (other, other_listener) = recorder();
        router.subscribe("stream-room-messages", "GENERAL", first_listener);
        router.subscribe("stream-room-messages", "GENERAL", second_listener);
        router.subscribe("stream-room-messages", "random", other_listener);

        let invoked = router.dispatch(
            "stream-room-messages",
            "id",
            &event("GENERAL", json!([{"_id": "m1"}, "ignored"])),
        );

        assert_eq!(invoked, 2);
        assert_eq!(*first.lock().expect("lock"), vec![json!({"_id": "m1"})]);
        assert_eq!(*second.lock().expect("lock"), vec![json!({"_id": "m1"})]);
        assert!(other.lock().expect("lock").is_empty());
    }

    #[test]
    fn ignores_non_stream_collections_and_documents() {
        let mut router = SubscriptionRouter::new();
        let (seen, listener) = recorder();
        router.subscribe("users", "GENERAL", listener);

        assert_eq!(router.dispatch("users", "id", &event("GENERAL", json!([1]))), 0);
        assert_eq!(
            router.dispatch("stream-room-messages", "abc", &event("GENERAL", json!([1]))),
            0
        );
        assert!(seen.lock().expect("lock").is_empty());
    }

    #[test]
    fn missing_args_deliver_null() {
        let mut router = SubscriptionRouter::new();
        let (seen, listener) = recorder();
        router.subscribe("stream-notify-room", "r1/typing", listener);

        router.dispatch("stream-notify-room", "id", &json!({"eventName": "r1/typing"}));

        assert_eq!(*seen.lock().expect("lock"), vec![Value::Null]);
        assert_eq!(router.listener_count("stream-notify-room", "r1/typing"), 1);
    }
}

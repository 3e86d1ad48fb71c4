//! Event name mappings for the server-push event stream.

use serde::de::DeserializeOwned;
use std::{collections::HashMap, fmt, sync::Arc};

/// Event name reserved for the protocol keep-alive; never delivered to consumers.
pub const KEEP_ALIVE_EVENT: &str = "KeepAliveEvent";

type EventDecoder<E> = Arc<dyn Fn(&str) -> serde_json::Result<E> + Send + Sync>;

enum Mapping<E> {
    KeepAlive,
    Decode(EventDecoder<E>),
}

impl<E> Clone for Mapping<E> {
    fn clone(&self) -> Self {
        match self {
            Mapping::KeepAlive => Mapping::KeepAlive,
            Mapping::Decode(decoder) => Mapping::Decode(decoder.clone()),
        }
    }
}

/// Result of resolving an event by name.
#[derive(Debug, PartialEq)]
pub enum Decoded<E> {
    Event(E),
    KeepAlive,
    Unmapped,
}

/// Maps wire event names to decoders producing the application event type `E`.
pub struct EventMappings<E> {
    mappings: HashMap<String, Mapping<E>>,
}

impl<E> EventMappings<E> {
    /// Mappings holding only the reserved keep-alive name.
    pub fn new() -> Self {
        let mut mappings = HashMap::new();
        mappings.insert(KEEP_ALIVE_EVENT.to_string(), Mapping::KeepAlive);
        Self { mappings }
    }

    /// Maps `name` to JSON payloads of type `T`, converted into `E`.
    pub fn register<T>(&mut self, name: impl Into<String>) -> &mut Self
    where
        T: DeserializeOwned + Into<E> + 'static,
        E: 'static,
    {
        self.register_with(name, |payload| serde_json::from_str::<T>(payload).map(Into::into))
    }

    /// Maps `name` to a custom payload decoder.
    pub fn register_with<F>(&mut self, name: impl Into<String>, decoder: F) -> &mut Self
    where
        F: Fn(&str) -> serde_json::Result<E> + Send + Sync + 'static,
    {
        self.mappings.insert(name.into(), Mapping::Decode(Arc::new(decoder)));
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.mappings.contains_key(name)
    }

    /// Resolves `name` and decodes `payload` with the mapped decoder.
    pub fn decode(&self, name: &str, payload: &str) -> serde_json::Result<Decoded<E>> {
        match self.mappings.get(name) {
            None => Ok(Decoded::Unmapped),
            Some(Mapping::KeepAlive) => Ok(Decoded::KeepAlive),
            Some(Mapping::Decode(decoder)) => decoder(payload).map(Decoded::Event),
        }
    }
}

impl<E> Default for EventMappings<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> Clone for EventMappings<E> {
    fn clone(&self) -> Self {
        Self {
            mappings: self.mappings.clone(),
        }
    }
}

impl<E> fmt::Debug for EventMappings<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&str> = self.mappings.keys().map(String::as_str).collect();
        names.sort_unstable();
        f.debug_struct("EventMappings").field("names", &names).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Notification {
        text: String,
    }

    #[derive(Debug, PartialEq)]
    enum AppEvent {
        Notification(Notification),
    }

    impl From<Notification> for AppEvent {
        fn from(n: Notification) -> Self {
            AppEvent::Notification(n)
        }
    }

    #[test]
    fn resolves_registered_names() {
        let mut mappings = EventMappings::<AppEvent>::new();
        mappings.register::<Notification>("Notification");

        assert_eq!(
            mappings.decode("Notification", "{\"text\":\"hi\"}").unwrap(),
            Decoded::Event(AppEvent::Notification(Notification { text: "hi".into() }))
        );
        assert_eq!(mappings.decode(KEEP_ALIVE_EVENT, "{}").unwrap(), Decoded::KeepAlive);
        assert_eq!(mappings.decode("Other", "{}").unwrap(), Decoded::Unmapped);
        assert!(mappings.decode("Notification", "{").is_err());
    }

    #[test]
    fn debug_lists_names() {
        let mut mappings = EventMappings::<String>::new();
        mappings.register_with("Text", |payload| Ok(payload.to_string()));
        assert_eq!(format!("{:?}", mappings), "EventMappings { names: [\"KeepAliveEvent\", \"Text\"] }");
    }
}

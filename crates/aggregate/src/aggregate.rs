//! Core aggregate and domain event traits.

use serde::{Serialize, de::DeserializeOwned};

use crate::error::{AggregateError, Result};

/// Trait for domain events.
///
/// Implemented by a tagged enum holding every payload variant one aggregate
/// type knows about. Events are stored under [`DomainEvent::event_type`] and
/// decoded by dispatching on that string; a type outside
/// [`DomainEvent::EVENT_TYPES`] is a hard decode error.
pub trait DomainEvent: Serialize + DeserializeOwned + Send + Sync + Clone {
    /// Every event type name this enum can decode.
    const EVENT_TYPES: &'static [&'static str];

    /// Returns the namespaced event type name, e.g. `"ledger.deposited"`.
    fn event_type(&self) -> &'static str;

    /// Encodes the event as an opaque payload.
    fn encode(&self) -> Result<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }

    /// Decodes a payload stored under `event_type`.
    fn decode(event_type: &str, payload: &serde_json::Value) -> Result<Self> {
        if !Self::EVENT_TYPES.contains(&event_type) {
            return Err(AggregateError::UnknownEventType {
                event_type: event_type.to_string(),
            });
        }

        let event: Self = serde_json::from_value(payload.clone())?;
        if event.event_type() != event_type {
            return Err(AggregateError::EventTypeMismatch {
                declared: event_type.to_string(),
                actual: event.event_type(),
            });
        }
        Ok(event)
    }
}

/// Trait for the folded state ("memento") of an event-sourced aggregate.
///
/// The memento is a plain value: it is cloned on every mutation, so an
/// [`AggregateState`](crate::AggregateState) handed to another task is never
/// changed behind its back.
pub trait Aggregate: Default + Clone + Serialize + DeserializeOwned + Send + Sync {
    /// The type of events this aggregate produces and consumes.
    type Event: DomainEvent;

    /// Returns the aggregate type name.
    fn aggregate_type() -> &'static str;

    /// Folds an event into the state.
    ///
    /// Must be pure and deterministic, and must not fail: events are facts.
    fn apply(&mut self, event: &Self::Event);

    /// Folds several events in order.
    fn apply_all<'a>(&mut self, events: impl IntoIterator<Item = &'a Self::Event>)
    where
        Self::Event: 'a,
    {
        for event in events {
            self.apply(event);
        }
    }
}

//! Reply handlers: typed decoders bound to queued operations.
//!
//! Every queued operation carries exactly one [`ReplyHandler`]. After a batch
//! executes, the handler receives that operation's raw [`Reply`] and nothing
//! else, decodes it, and writes the result into a caller-held [`ReplySlot`].
//!
//! ```text
//! Decoder shapes:
//!
//! Count     Integer                          -> i64
//! Ids       Array[Bulk]                      -> Vec<String>
//! Entities  Array[Array[name, value, ...]]   -> Vec<M::Model>
//! Raw       anything but an error            -> Reply
//! Discard   anything but an error            -> ()
//! ```

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::model::{FieldList, Materializer};
use crate::reply::{Reply, ReplyError};

/// Destination a handler writes its decoded result into.
///
/// The caller keeps one clone and gives another to the handler. After
/// `execute()` returns, [`ReplySlot::take`] yields the decoded value.
pub struct ReplySlot<T> {
    inner: Arc<Mutex<SlotState<T>>>,
}

struct SlotState<T> {
    value: Option<T>,
    writes: usize,
}

impl<T> ReplySlot<T> {
    /// Creates an empty slot.
    pub fn new() -> Self {
        Self { inner: Arc::new(Mutex::new(SlotState { value: None, writes: 0 })) }
    }

    /// Stores a decoded value, replacing any previous one.
    pub fn fill(&self, value: T) {
        let mut state = self.inner.lock();
        state.value = Some(value);
        state.writes += 1;
    }

    /// Removes and returns the decoded value.
    pub fn take(&self) -> Option<T> {
        self.inner.lock().value.take()
    }

    /// Returns true if a value is waiting to be taken.
    pub fn is_filled(&self) -> bool {
        self.inner.lock().value.is_some()
    }

    /// Number of times a handler has written into this slot.
    pub fn writes(&self) -> usize {
        self.inner.lock().writes
    }
}

impl<T: Clone> ReplySlot<T> {
    /// Returns a copy of the decoded value without removing it.
    pub fn get(&self) -> Option<T> {
        self.inner.lock().value.clone()
    }
}

impl<T> Clone for ReplySlot<T> {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }
}

impl<T> Default for ReplySlot<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for ReplySlot<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.lock();
        f.debug_struct("ReplySlot")
            .field("filled", &state.value.is_some())
            .field("writes", &state.writes)
            .finish()
    }
}

/// Receives the grouped field lists of an entity-list reply.
pub trait EntitySink: Send {
    /// Model name the entities are materialized as.
    fn model_name(&self) -> &str;

    /// Materializes and stores the entities, in reply order.
    fn accept(&mut self, entities: Vec<FieldList>) -> Result<(), ReplyError>;
}

struct MaterializingSink<M: Materializer> {
    model_name: String,
    materializer: Arc<M>,
    slot: ReplySlot<Vec<M::Model>>,
}

impl<M> EntitySink for MaterializingSink<M>
where
    M: Materializer + 'static,
    M::Model: Send,
{
    fn model_name(&self) -> &str {
        &self.model_name
    }

    fn accept(&mut self, entities: Vec<FieldList>) -> Result<(), ReplyError> {
        let mut models = Vec::with_capacity(entities.len());
        for fields in entities {
            let model = self.materializer.materialize(&self.model_name, fields).map_err(|e| {
                ReplyError::Materialize { model: self.model_name.clone(), reason: e.to_string() }
            })?;
            models.push(model);
        }
        self.slot.fill(models);
        Ok(())
    }
}

/// Decoder bound to one queued operation.
pub enum ReplyHandler {
    /// Result is ignored; error replies are still reported.
    Discard,
    /// Integer reply written to an `i64` slot.
    Count(ReplySlot<i64>),
    /// Array of ids written to a `Vec<String>` slot.
    Ids(ReplySlot<Vec<String>>),
    /// Array of field lists handed to a materializer.
    Entities(Box<dyn EntitySink>),
    /// Reply stored as-is.
    Raw(ReplySlot<Reply>),
}

impl ReplyHandler {
    /// Integer decoder writing into `slot`.
    pub fn count(slot: &ReplySlot<i64>) -> Self {
        ReplyHandler::Count(slot.clone())
    }

    /// Id-list decoder writing into `slot`.
    pub fn ids(slot: &ReplySlot<Vec<String>>) -> Self {
        ReplyHandler::Ids(slot.clone())
    }

    /// Raw reply handler writing into `slot`.
    pub fn raw(slot: &ReplySlot<Reply>) -> Self {
        ReplyHandler::Raw(slot.clone())
    }

    /// Entity-list decoder materializing `model_name` entities into `slot`.
    ///
    /// # Example
    ///
    /// ```
    /// use kvscript::{EntityMaterializer, ReplyHandler, ReplySlot};
    /// use std::sync::Arc;
    ///
    /// let users = ReplySlot::new();
    /// let handler = ReplyHandler::entities("User", Arc::new(EntityMaterializer), &users);
    /// assert_eq!(handler.shape(), "entities");
    /// ```
    pub fn entities<M>(
        model_name: impl Into<String>,
        materializer: Arc<M>,
        slot: &ReplySlot<Vec<M::Model>>,
    ) -> Self
    where
        M: Materializer + 'static,
        M::Model: Send,
    {
        ReplyHandler::Entities(Box::new(MaterializingSink {
            model_name: model_name.into(),
            materializer,
            slot: slot.clone(),
        }))
    }

    /// Entity-list decoder feeding a custom sink.
    pub fn entity_sink(sink: impl EntitySink + 'static) -> Self {
        ReplyHandler::Entities(Box::new(sink))
    }

    /// Name of the decoder shape.
    pub fn shape(&self) -> &'static str {
        match self {
            ReplyHandler::Discard => "discard",
            ReplyHandler::Count(_) => "count",
            ReplyHandler::Ids(_) => "ids",
            ReplyHandler::Entities(_) => "entities",
            ReplyHandler::Raw(_) => "raw",
        }
    }

    /// Decodes `reply` and writes the result to this handler's destination.
    pub fn handle(self, reply: Reply) -> Result<(), ReplyError> {
        match self {
            ReplyHandler::Discard => reply.check().map(|_| ()),
            ReplyHandler::Count(slot) => {
                slot.fill(reply.into_integer()?);
                Ok(())
            }
            ReplyHandler::Ids(slot) => {
                slot.fill(decode_ids(reply)?);
                Ok(())
            }
            ReplyHandler::Entities(mut sink) => sink.accept(decode_entities(reply)?),
            ReplyHandler::Raw(slot) => {
                slot.fill(reply.check()?);
                Ok(())
            }
        }
    }
}

impl fmt::Debug for ReplyHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReplyHandler::Entities(sink) => write!(f, "Entities({})", sink.model_name()),
            other => f.write_str(other.shape()),
        }
    }
}

/// Decodes an array of ids, keeping reply order.
pub fn decode_ids(reply: Reply) -> Result<Vec<String>, ReplyError> {
    reply.into_array()?.into_iter().map(Reply::into_string).collect()
}

/// Decodes an array of entity field lists, keeping reply order.
pub fn decode_entities(reply: Reply) -> Result<Vec<FieldList>, ReplyError> {
    let items = reply.into_array()?;
    let mut entities = Vec::with_capacity(items.len());
    for (index, item) in items.into_iter().enumerate() {
        let elements = item.into_array()?;
        if elements.len() % 2 != 0 {
            return Err(ReplyError::OddFieldCount { entity: index, len: elements.len() });
        }

        let mut fields = FieldList::new();
        let mut iter = elements.into_iter();
        while let (Some(name), Some(value)) = (iter.next(), iter.next()) {
            let name = name.into_bulk()?;
            let name = String::from_utf8(name.to_vec())
                .map_err(|_| ReplyError::InvalidUtf8("field name"))?;
            fields.push(name, value.into_bulk()?);
        }
        entities.push(fields);
    }
    Ok(entities)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::EntityMaterializer;

    fn entity(pairs: &[&'static str]) -> Reply {
        Reply::Array(pairs.iter().map(|s| Reply::bulk(*s)).collect())
    }

    #[test]
    fn test_count_handler() {
        let slot = ReplySlot::new();
        ReplyHandler::count(&slot).handle(Reply::Integer(3)).unwrap();
        assert_eq!(slot.take(), Some(3));
        assert_eq!(slot.writes(), 1);
    }

    #[test]
    fn test_count_handler_rejects_array() {
        let slot = ReplySlot::new();
        let err = ReplyHandler::count(&slot).handle(Reply::Array(vec![])).unwrap_err();
        assert_eq!(err, ReplyError::UnexpectedShape { expected: "integer", found: "array" });
        assert!(!slot.is_filled());
    }

    #[test]
    fn test_ids_handler_keeps_order() {
        let slot = ReplySlot::new();
        let reply = Reply::Array(vec![Reply::bulk("c"), Reply::bulk("b"), Reply::bulk("a")]);
        ReplyHandler::ids(&slot).handle(reply).unwrap();
        assert_eq!(slot.take(), Some(vec!["c".to_string(), "b".to_string(), "a".to_string()]));
    }

    #[test]
    fn test_ids_handler_rejects_nested_arrays() {
        let slot = ReplySlot::new();
        let reply = Reply::Array(vec![Reply::Array(vec![])]);
        assert!(ReplyHandler::ids(&slot).handle(reply).is_err());
    }

    #[test]
    fn test_entities_handler() {
        let slot = ReplySlot::new();
        let handler = ReplyHandler::entities("User", Arc::new(EntityMaterializer), &slot);
        let reply = Reply::Array(vec![
            entity(&["id", "2", "name", "Bob"]),
            entity(&["id", "1", "name", "Alice"]),
        ]);
        handler.handle(reply).unwrap();

        let users = slot.take().unwrap();
        assert_eq!(users.len(), 2);
        assert_eq!(users[0].id, "2");
        assert_eq!(users[1].field("name"), Some("Alice"));
    }

    #[test]
    fn test_empty_entity_array_is_not_an_error() {
        let slot = ReplySlot::new();
        let handler = ReplyHandler::entities("User", Arc::new(EntityMaterializer), &slot);
        handler.handle(Reply::Array(vec![])).unwrap();
        assert_eq!(slot.take().map(|v| v.len()), Some(0));
    }

    #[test]
    fn test_entities_odd_field_count() {
        let reply = Reply::Array(vec![entity(&["id", "1"]), entity(&["id", "2", "name"])]);
        assert_eq!(decode_entities(reply), Err(ReplyError::OddFieldCount { entity: 1, len: 3 }));
    }

    #[test]
    fn test_entities_flat_array_is_rejected() {
        let reply = entity(&["id", "1"]);
        assert_eq!(
            decode_entities(reply),
            Err(ReplyError::UnexpectedShape { expected: "array", found: "bulk" })
        );
    }

    #[test]
    fn test_materialize_failure_is_reported() {
        let slot = ReplySlot::new();
        let handler = ReplyHandler::entities("User", Arc::new(EntityMaterializer), &slot);
        let err = handler.handle(Reply::Array(vec![entity(&["name", "NoId"])])).unwrap_err();
        assert!(matches!(err, ReplyError::Materialize { ref model, .. } if model == "User"));
    }

    #[test]
    fn test_discard_reports_store_errors() {
        assert!(ReplyHandler::Discard.handle(Reply::Nil).is_ok());
        assert_eq!(
            ReplyHandler::Discard.handle(Reply::Error("ERR x".to_string())),
            Err(ReplyError::Store("ERR x".to_string()))
        );
    }

    #[test]
    fn test_raw_handler() {
        let slot = ReplySlot::new();
        ReplyHandler::raw(&slot).handle(Reply::bulk("v")).unwrap();
        assert_eq!(slot.get(), Some(Reply::bulk("v")));
        assert!(slot.is_filled());
    }
}

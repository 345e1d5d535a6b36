//! Scripted query primitives.
//!
//! Each primitive validates its arguments, resolves its script in the
//! transaction's catalog and queues one invocation with the right argument
//! order and decoder. Primitives never perform I/O; results appear in the
//! handler's slot after [`Transaction::execute`].
//!
//! | Primitive | Keys | Args | Decoder |
//! |---|---|---|---|
//! | `find_models_by_set_ids` | set | model, limit, offset | entities |
//! | `delete_models_by_set_ids` | set | model | count |
//! | `delete_string_index` | - | model, id, field | none |
//! | `find_models_by_sorted_set_ids` | sorted set | model, order | entities |
//! | `find_models_by_string_index` | index | model, order | entities |
//! | `extract_ids_from_string_index` | index | order | ids |

use std::fmt;
use std::str::FromStr;

use crate::handler::ReplyHandler;
use crate::script::catalog::{
    DELETE_MODELS_BY_SET_IDS, DELETE_STRING_INDEX, EXTRACT_IDS_FROM_STRING_INDEX,
    FIND_MODELS_BY_SET_IDS, FIND_MODELS_BY_SORTED_SET_IDS, FIND_MODELS_BY_STRING_INDEX,
};
use crate::transaction::{ScriptCall, Transaction};
use crate::transport::{Args, IntoArg};
use crate::{Error, Result};

/// Sort direction passed to order-sensitive scripts.
///
/// The string forms are part of the script contracts; the scripts compare
/// against them literally.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum OrderKind {
    /// Lowest score (or lexicographically smallest member) first.
    #[default]
    Ascending,
    /// Highest score first.
    Descending,
}

impl OrderKind {
    /// Wire form of the order.
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderKind::Ascending => "asc",
            OrderKind::Descending => "desc",
        }
    }

    /// The opposite direction.
    pub fn reverse(self) -> Self {
        match self {
            OrderKind::Ascending => OrderKind::Descending,
            OrderKind::Descending => OrderKind::Ascending,
        }
    }
}

impl fmt::Display for OrderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "asc" | "ascending" => Ok(OrderKind::Ascending),
            "desc" | "descending" => Ok(OrderKind::Descending),
            other => Err(Error::invalid_argument(format!("unknown order kind: {:?}", other))),
        }
    }
}

impl IntoArg for OrderKind {
    fn into_arg(self) -> bytes::Bytes {
        bytes::Bytes::from_static(self.as_str().as_bytes())
    }
}

fn require(operation: &str, what: &str, value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(Error::contract(operation, format!("{} must not be empty", what)));
    }
    Ok(())
}

fn require_handler(operation: &str, handler: &ReplyHandler, accepted: &str) -> Result<()> {
    let shape = handler.shape();
    if shape != accepted && shape != "discard" {
        return Err(Error::contract(
            operation,
            format!("expects a {} or discard handler, got {}", accepted, shape),
        ));
    }
    Ok(())
}

fn require_entities(operation: &str, handler: &ReplyHandler, model_name: &str) -> Result<()> {
    require_handler(operation, handler, "entities")?;
    if let ReplyHandler::Entities(sink) = handler {
        if sink.model_name() != model_name {
            return Err(Error::contract(
                operation,
                format!(
                    "handler materializes {} but the query reads {}",
                    sink.model_name(),
                    model_name
                ),
            ));
        }
    }
    Ok(())
}

impl Transaction {
    fn invoke(&mut self, script_name: &str, call: ScriptCall, handler: ReplyHandler) -> Result<()> {
        let script = self.catalog().script(script_name)?.clone();
        self.enqueue_script_as(script_name, &script, call, handler)
    }

    /// Queues a lookup of every model whose id is in the set at `set_key`.
    ///
    /// # Arguments
    ///
    /// * `set_key` - Key of the (unordered) set of ids
    /// * `model_name` - Model the ids belong to
    /// * `limit` - Maximum number of models to return, 0 for all
    /// * `offset` - Number of set members to skip
    /// * `handler` - An entities handler for `model_name`, or discard
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// # use kvscript::{Client, EntityMaterializer, ReplyHandler, ReplySlot};
    /// # use std::sync::Arc;
    /// # fn demo(client: &Client) -> Result<(), kvscript::Error> {
    /// let users = ReplySlot::new();
    /// let mut tx = client.transaction();
    /// tx.find_models_by_set_ids(
    ///     "User:all",
    ///     "User",
    ///     10,
    ///     0,
    ///     ReplyHandler::entities("User", Arc::new(EntityMaterializer), &users),
    /// )?;
    /// tx.execute()?;
    /// let users = users.take().unwrap_or_default();
    /// # Ok(())
    /// # }
    /// ```
    pub fn find_models_by_set_ids(
        &mut self,
        set_key: &str,
        model_name: &str,
        limit: u32,
        offset: u32,
        handler: ReplyHandler,
    ) -> Result<()> {
        let op = FIND_MODELS_BY_SET_IDS;
        require(op, "set key", set_key)?;
        require(op, "model name", model_name)?;
        require_entities(op, &handler, model_name)?;

        let call = ScriptCall::new().key(set_key).arg(model_name).arg(limit).arg(offset);
        self.invoke(op, call, handler)
    }

    /// Queues deletion of every model whose id is in the set at `set_key`,
    /// and of the set itself. The count of deleted models goes to a count
    /// handler.
    pub fn delete_models_by_set_ids(
        &mut self,
        set_key: &str,
        model_name: &str,
        handler: ReplyHandler,
    ) -> Result<()> {
        let op = DELETE_MODELS_BY_SET_IDS;
        require(op, "set key", set_key)?;
        require(op, "model name", model_name)?;
        require_handler(op, &handler, "count")?;

        let call = ScriptCall::new().key(set_key).arg(model_name);
        self.invoke(op, call, handler)
    }

    /// Queues removal of the string index entry for `field_name` of one
    /// model. Succeeds when there is no such entry.
    pub fn delete_string_index(
        &mut self,
        model_name: &str,
        model_id: &str,
        field_name: &str,
    ) -> Result<()> {
        let op = DELETE_STRING_INDEX;
        require(op, "model name", model_name)?;
        require(op, "model id", model_id)?;
        require(op, "field name", field_name)?;

        let call = ScriptCall::new().arg(model_name).arg(model_id).arg(field_name);
        self.invoke(op, call, ReplyHandler::Discard)
    }

    /// Queues a lookup of the models whose ids are in the sorted set at
    /// `set_key`, in score order.
    pub fn find_models_by_sorted_set_ids(
        &mut self,
        set_key: &str,
        model_name: &str,
        order: OrderKind,
        handler: ReplyHandler,
    ) -> Result<()> {
        let op = FIND_MODELS_BY_SORTED_SET_IDS;
        require(op, "set key", set_key)?;
        require(op, "model name", model_name)?;
        require_entities(op, &handler, model_name)?;

        let call = ScriptCall::new().key(set_key).arg(model_name).arg(order);
        self.invoke(op, call, handler)
    }

    /// Queues a lookup of the models referenced by the string index at
    /// `set_key`, in index order.
    pub fn find_models_by_string_index(
        &mut self,
        set_key: &str,
        model_name: &str,
        order: OrderKind,
        handler: ReplyHandler,
    ) -> Result<()> {
        let op = FIND_MODELS_BY_STRING_INDEX;
        require(op, "set key", set_key)?;
        require(op, "model name", model_name)?;
        require_entities(op, &handler, model_name)?;

        let call = ScriptCall::new().key(set_key).arg(model_name).arg(order);
        self.invoke(op, call, handler)
    }

    /// Queues extraction of the ids referenced by the string index at
    /// `set_key`, in index order.
    pub fn extract_ids_from_string_index(
        &mut self,
        set_key: &str,
        order: OrderKind,
        handler: ReplyHandler,
    ) -> Result<()> {
        let op = EXTRACT_IDS_FROM_STRING_INDEX;
        require(op, "set key", set_key)?;
        require_handler(op, &handler, "ids")?;

        let call = ScriptCall::new().key(set_key).arg(order);
        self.invoke(op, call, handler)
    }

    /// Queues `HSET <model>:<id> field value ...` for one model.
    ///
    /// Convenience for the write side of the key layout the query scripts
    /// read.
    pub fn save_model_fields<'a>(
        &mut self,
        model_name: &str,
        model_id: &str,
        fields: impl IntoIterator<Item = (&'a str, &'a str)>,
    ) -> Result<()> {
        require("HSET", "model name", model_name)?;
        require("HSET", "model id", model_id)?;

        let mut args = Args::new().arg(crate::keys::model_key(model_name, model_id));
        let mut count = 0;
        for (name, value) in fields {
            args = args.arg(name).arg(value);
            count += 1;
        }
        if count == 0 {
            return Err(Error::contract("HSET", "at least one field is required"));
        }
        self.enqueue("HSET", args)
    }
}

//! Boundary to the model-materialization collaborator.
//!
//! Entity-list decoders group each entity's fields into a [`FieldList`] and
//! hand it to a [`Materializer`], which turns it into a typed model. Two
//! materializers ship with the crate: [`EntityMaterializer`] keeps the raw
//! fields, [`JsonMaterializer`] deserializes into any `serde` type.

use std::collections::BTreeMap;
use std::marker::PhantomData;

use bytes::Bytes;
use serde::de::value::{self, MapDeserializer};
use serde::de::{self, DeserializeOwned, Deserializer, IntoDeserializer, Unexpected, Visitor};

/// Name of the field every entity-list script emits first.
pub const ID_FIELD: &str = "id";

/// Ordered name/value pairs describing one stored entity.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldList {
    pairs: Vec<(String, Bytes)>,
}

impl FieldList {
    /// Creates an empty field list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a field.
    pub fn push(&mut self, name: impl Into<String>, value: impl Into<Bytes>) {
        self.pairs.push((name.into(), value.into()));
    }

    /// Returns the first value stored under `name`.
    pub fn get(&self, name: &str) -> Option<&Bytes> {
        self.pairs.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    /// Returns the value stored under `name` as text.
    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(|v| std::str::from_utf8(v).ok())
    }

    /// Returns the entity id, if the list carries one.
    pub fn id(&self) -> Option<&str> {
        self.get_str(ID_FIELD)
    }

    /// Number of fields.
    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    /// Returns true if there are no fields.
    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// Iterates the fields in reply order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Bytes)> {
        self.pairs.iter().map(|(n, v)| (n.as_str(), v))
    }

    /// Consumes the list, returning its pairs.
    pub fn into_pairs(self) -> Vec<(String, Bytes)> {
        self.pairs
    }
}

impl<N: Into<String>, V: Into<Bytes>> FromIterator<(N, V)> for FieldList {
    fn from_iter<I: IntoIterator<Item = (N, V)>>(iter: I) -> Self {
        let mut list = FieldList::new();
        for (name, value) in iter {
            list.push(name, value);
        }
        list
    }
}

/// Reconstructs typed entities from their stored fields.
pub trait Materializer: Send + Sync {
    /// The typed entity this materializer produces.
    type Model;

    /// Builds one entity of `model_name` from its fields.
    fn materialize(&self, model_name: &str, fields: FieldList) -> anyhow::Result<Self::Model>;
}

/// An entity whose fields are kept as raw bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entity {
    /// Model name the entity was loaded as.
    pub model: String,
    /// Entity id.
    pub id: String,
    /// Stored fields, excluding the id.
    pub fields: BTreeMap<String, Bytes>,
}

impl Entity {
    /// Returns a field as text.
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).and_then(|v| std::str::from_utf8(v).ok())
    }
}

/// Materializes [`Entity`] values; requires every field list to carry an id.
#[derive(Debug, Clone, Copy, Default)]
pub struct EntityMaterializer;

impl Materializer for EntityMaterializer {
    type Model = Entity;

    fn materialize(&self, model_name: &str, fields: FieldList) -> anyhow::Result<Entity> {
        let mut id = None;
        let mut map = BTreeMap::new();
        for (name, value) in fields.into_pairs() {
            if name == ID_FIELD && id.is_none() {
                id = Some(String::from_utf8(value.to_vec())?);
            } else {
                map.insert(name, value);
            }
        }
        let id = id.ok_or_else(|| anyhow::anyhow!("{} entity without an id field", model_name))?;
        Ok(Entity { model: model_name.to_string(), id, fields: map })
    }
}

/// Materializes any `serde` model.
///
/// Every field arrives as text. A field is parsed only when the target type
/// asks for it: numbers, booleans and `char` parse from their text form,
/// sequences, maps and nested structs parse as JSON, and everything else
/// stays the stored string. A `String` field holding `"1"` or `"null"` keeps
/// that text.
pub struct JsonMaterializer<T> {
    _model: PhantomData<fn() -> T>,
}

impl<T> JsonMaterializer<T> {
    /// Creates a materializer for `T`.
    pub fn new() -> Self {
        Self { _model: PhantomData }
    }
}

impl<T> Default for JsonMaterializer<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: DeserializeOwned> Materializer for JsonMaterializer<T> {
    type Model = T;

    fn materialize(&self, model_name: &str, fields: FieldList) -> anyhow::Result<T> {
        let mut pairs = Vec::with_capacity(fields.len());
        for (name, value) in fields.into_pairs() {
            let text = String::from_utf8(value.to_vec())
                .map_err(|_| anyhow::anyhow!("{}.{} is not valid UTF-8", model_name, name))?;
            pairs.push((name, FieldValue(text)));
        }
        let map = MapDeserializer::<_, value::Error>::new(pairs.into_iter());
        T::deserialize(map).map_err(|e| anyhow::anyhow!("{}: {}", model_name, e))
    }
}

/// One stored field value, deserialized on demand.
struct FieldValue(String);

impl FieldValue {
    fn parse_json<'de, V: Visitor<'de>>(
        self,
        visit: impl FnOnce(serde_json::Value, V) -> Result<V::Value, serde_json::Error>,
        visitor: V,
    ) -> Result<V::Value, value::Error> {
        let json: serde_json::Value =
            serde_json::from_str(&self.0).map_err(<value::Error as de::Error>::custom)?;
        visit(json, visitor).map_err(<value::Error as de::Error>::custom)
    }
}

impl<'de> IntoDeserializer<'de, value::Error> for FieldValue {
    type Deserializer = Self;

    fn into_deserializer(self) -> Self {
        self
    }
}

macro_rules! parse_scalar {
    ($($method:ident => $visit:ident,)*) => {
        $(
            fn $method<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Self::Error> {
                match self.0.parse() {
                    Ok(v) => visitor.$visit(v),
                    Err(_) => Err(de::Error::invalid_value(Unexpected::Str(&self.0), &visitor)),
                }
            }
        )*
    };
}

impl<'de> Deserializer<'de> for FieldValue {
    type Error = value::Error;

    fn deserialize_any<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Self::Error> {
        visitor.visit_string(self.0)
    }

    parse_scalar! {
        deserialize_bool => visit_bool,
        deserialize_i8 => visit_i8,
        deserialize_i16 => visit_i16,
        deserialize_i32 => visit_i32,
        deserialize_i64 => visit_i64,
        deserialize_i128 => visit_i128,
        deserialize_u8 => visit_u8,
        deserialize_u16 => visit_u16,
        deserialize_u32 => visit_u32,
        deserialize_u64 => visit_u64,
        deserialize_u128 => visit_u128,
        deserialize_f32 => visit_f32,
        deserialize_f64 => visit_f64,
        deserialize_char => visit_char,
    }

    fn deserialize_option<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Self::Error> {
        visitor.visit_some(self)
    }

    fn deserialize_newtype_struct<V: Visitor<'de>>(
        self,
        _name: &'static str,
        visitor: V,
    ) -> Result<V::Value, Self::Error> {
        visitor.visit_newtype_struct(self)
    }

    fn deserialize_enum<V: Visitor<'de>>(
        self,
        _name: &'static str,
        _variants: &'static [&'static str],
        visitor: V,
    ) -> Result<V::Value, Self::Error> {
        visitor.visit_enum(self.0.into_deserializer())
    }

    fn deserialize_seq<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Self::Error> {
        self.parse_json(|json, v| json.deserialize_seq(v), visitor)
    }

    fn deserialize_tuple<V: Visitor<'de>>(
        self,
        len: usize,
        visitor: V,
    ) -> Result<V::Value, Self::Error> {
        self.parse_json(|json, v| json.deserialize_tuple(len, v), visitor)
    }

    fn deserialize_tuple_struct<V: Visitor<'de>>(
        self,
        name: &'static str,
        len: usize,
        visitor: V,
    ) -> Result<V::Value, Self::Error> {
        self.parse_json(|json, v| json.deserialize_tuple_struct(name, len, v), visitor)
    }

    fn deserialize_map<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Self::Error> {
        self.parse_json(|json, v| json.deserialize_map(v), visitor)
    }

    fn deserialize_struct<V: Visitor<'de>>(
        self,
        name: &'static str,
        fields: &'static [&'static str],
        visitor: V,
    ) -> Result<V::Value, Self::Error> {
        self.parse_json(|json, v| json.deserialize_struct(name, fields, v), visitor)
    }

    serde::forward_to_deserialize_any! {
        str string bytes byte_buf unit unit_struct identifier ignored_any
    }
}

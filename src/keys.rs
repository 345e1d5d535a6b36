//! Key layout shared by the scripts and the code that writes models.
//!
//! - Model hash: `<model>:<id>`
//! - String index: sorted set `<model>:<field>` with members `<value>\0<id>`

use bytes::{BufMut, Bytes, BytesMut};

/// Separator between the indexed value and the id in a string index member.
pub const INDEX_SEPARATOR: u8 = 0;

/// Key of the hash holding one model's fields.
pub fn model_key(model_name: &str, id: &str) -> String {
    format!("{}:{}", model_name, id)
}

/// Key of the string index over `field_name`.
pub fn string_index_key(model_name: &str, field_name: &str) -> String {
    format!("{}:{}", model_name, field_name)
}

/// Member stored in a string index for `id` whose field holds `value`.
pub fn string_index_member(value: &str, id: &str) -> Bytes {
    let mut buf = BytesMut::with_capacity(value.len() + 1 + id.len());
    buf.put_slice(value.as_bytes());
    buf.put_u8(INDEX_SEPARATOR);
    buf.put_slice(id.as_bytes());
    buf.freeze()
}

/// Splits a string index member back into `(value, id)`.
pub fn split_string_index_member(member: &[u8]) -> Option<(&[u8], &[u8])> {
    let pos = member.iter().rposition(|b| *b == INDEX_SEPARATOR)?;
    Some((&member[..pos], &member[pos + 1..]))
}

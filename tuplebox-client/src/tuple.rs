//! Result tuples with typed field access.

use crate::error::ClientError;
use rmpv::Value;
use std::any::Any;
use std::fmt;
use std::sync::Arc;
use tuplebox_protocol::Mapper;

/// One result row: an ordered sequence of fields, decoded on access through
/// the configured mapper.
#[derive(Clone)]
pub struct Tuple {
    fields: Vec<Value>,
    mapper: Arc<Mapper>,
}

impl Tuple {
    pub(crate) fn new(row: Value, mapper: Arc<Mapper>) -> Result<Self, ClientError> {
        match row {
            Value::Array(fields) => Ok(Self { fields, mapper }),
            _ => Err(tuplebox_protocol::ProtocolError::Malformed("result row is not an array").into()),
        }
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Raw field value at `index`.
    pub fn field(&self, index: usize) -> Option<&Value> {
        self.fields.get(index)
    }

    /// Decodes the field at `index` into `T` via the mapper registry.
    pub fn get<T: Any>(&self, index: usize) -> Result<T, ClientError> {
        let value = self.field(index).ok_or_else(|| {
            ClientError::InvalidRequest(format!(
                "tuple has {} fields, no field {index}",
                self.fields.len()
            ))
        })?;
        Ok(self.mapper.from_value::<T>(value)?)
    }

    pub fn values(&self) -> &[Value] {
        &self.fields
    }

    pub fn into_values(self) -> Vec<Value> {
        self.fields
    }
}

impl fmt::Debug for Tuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Tuple").field(&self.fields).finish()
    }
}

impl PartialEq for Tuple {
    fn eq(&self, other: &Self) -> bool {
        self.fields == other.fields
    }
}

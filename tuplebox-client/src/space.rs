//! Typed CRUD surface over a space.

use crate::connection::{response_data, Connection};
use crate::error::ClientError;
use crate::metadata::{IndexMetadata, Metadata, SpaceMetadata};
use crate::tuple::Tuple;
use rmpv::Value;
use std::any::Any;
use std::fmt;
use std::sync::Arc;
use tuplebox_protocol::consts::keys;
use tuplebox_protocol::{Mapper, RequestType, ResultMapper};

/// Iterator type for select requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum IteratorType {
    #[default]
    Eq = 0,
    Req = 1,
    All = 2,
    Lt = 3,
    Le = 4,
    Ge = 5,
    Gt = 6,
}

/// Options for select requests.
#[derive(Debug, Clone)]
pub struct SelectOptions {
    pub limit: u32,
    pub offset: u32,
    pub iterator: IteratorType,
}

impl SelectOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limit(mut self, limit: u32) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_offset(mut self, offset: u32) -> Self {
        self.offset = offset;
        self
    }

    pub fn with_iterator(mut self, iterator: IteratorType) -> Self {
        self.iterator = iterator;
        self
    }
}

impl Default for SelectOptions {
    fn default() -> Self {
        Self {
            limit: u32::MAX,
            offset: 0,
            iterator: IteratorType::Eq,
        }
    }
}

/// An index addressed by id or by name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexRef {
    Id(u32),
    Name(String),
}

impl From<u32> for IndexRef {
    fn from(id: u32) -> Self {
        IndexRef::Id(id)
    }
}

impl From<&str> for IndexRef {
    fn from(name: &str) -> Self {
        IndexRef::Name(name.to_string())
    }
}

impl From<String> for IndexRef {
    fn from(name: String) -> Self {
        IndexRef::Name(name)
    }
}

impl fmt::Display for IndexRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IndexRef::Id(id) => write!(f, "{id}"),
            IndexRef::Name(name) => f.write_str(name),
        }
    }
}

/// A single update operation: `{op-symbol, field-no, arguments}`.
///
/// Constructors guarantee well-formedness; there is no way to build an
/// operation with a wrong argument count.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateOp {
    operator: &'static str,
    field: u32,
    args: Vec<Value>,
}

impl UpdateOp {
    pub fn assign(field: u32, value: Value) -> Self {
        Self::unary("=", field, value)
    }

    pub fn add(field: u32, value: Value) -> Self {
        Self::unary("+", field, value)
    }

    pub fn subtract(field: u32, value: Value) -> Self {
        Self::unary("-", field, value)
    }

    pub fn bit_and(field: u32, value: Value) -> Self {
        Self::unary("&", field, value)
    }

    pub fn bit_or(field: u32, value: Value) -> Self {
        Self::unary("|", field, value)
    }

    pub fn bit_xor(field: u32, value: Value) -> Self {
        Self::unary("^", field, value)
    }

    pub fn insert(field: u32, value: Value) -> Self {
        Self::unary("!", field, value)
    }

    pub fn delete(field: u32, count: u32) -> Self {
        Self::unary("#", field, Value::from(count))
    }

    pub fn splice(field: u32, offset: u32, length: u32, replacement: &str) -> Self {
        Self {
            operator: ":",
            field,
            args: vec![
                Value::from(offset),
                Value::from(length),
                Value::from(replacement),
            ],
        }
    }

    fn unary(operator: &'static str, field: u32, value: Value) -> Self {
        Self {
            operator,
            field,
            args: vec![value],
        }
    }

    fn to_value(&self) -> Value {
        let mut entry = Vec::with_capacity(2 + self.args.len());
        entry.push(Value::from(self.operator));
        entry.push(Value::from(self.field));
        entry.extend(self.args.iter().cloned());
        Value::Array(entry)
    }
}

/// CRUD operations over one space. Holds a shared reference to the client's
/// connection; cheap to clone.
#[derive(Clone)]
pub struct Space {
    conn: Arc<Connection>,
    metadata: Arc<Metadata>,
    meta: Arc<SpaceMetadata>,
    mapper: Arc<Mapper>,
}

impl fmt::Debug for Space {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Space")
            .field("meta", &self.meta)
            .finish_non_exhaustive()
    }
}

impl Space {
    pub(crate) fn new(
        conn: Arc<Connection>,
        metadata: Arc<Metadata>,
        meta: Arc<SpaceMetadata>,
    ) -> Self {
        let mapper = conn.config().mapper.clone();
        Self {
            conn,
            metadata,
            meta,
            mapper,
        }
    }

    pub fn id(&self) -> u32 {
        self.meta.id
    }

    pub fn name(&self) -> &str {
        &self.meta.name
    }

    pub fn meta(&self) -> &SpaceMetadata {
        &self.meta
    }

    /// Selects tuples matching `key` through `index`.
    pub async fn select(
        &self,
        index: impl Into<IndexRef>,
        key: Vec<Value>,
        options: &SelectOptions,
    ) -> Result<Vec<Tuple>, ClientError> {
        let rows = self.select_rows(index.into(), key, options).await?;
        self.into_tuples(rows)
    }

    /// Selects and decodes each row with a caller-supplied result mapper.
    pub async fn select_with<T: Any>(
        &self,
        index: impl Into<IndexRef>,
        key: Vec<Value>,
        options: &SelectOptions,
        mapper: &ResultMapper<T>,
    ) -> Result<Vec<T>, ClientError> {
        let rows = self.select_rows(index.into(), key, options).await?;
        Ok(mapper.decode(&rows)?)
    }

    async fn select_rows(
        &self,
        index: IndexRef,
        key: Vec<Value>,
        options: &SelectOptions,
    ) -> Result<Vec<Value>, ClientError> {
        let index_meta = self.resolve_index(&index)?;
        self.check_key(&index_meta, &key)?;

        let body = Value::Map(vec![
            (Value::from(keys::SPACE_ID), Value::from(self.meta.id)),
            (Value::from(keys::INDEX_ID), Value::from(index_meta.id)),
            (Value::from(keys::LIMIT), Value::from(options.limit)),
            (Value::from(keys::OFFSET), Value::from(options.offset)),
            (
                Value::from(keys::ITERATOR),
                Value::from(options.iterator as u8),
            ),
            (Value::from(keys::KEY), Value::Array(key)),
        ]);
        let response = self.conn.request(RequestType::Select.code(), body).await?;
        Ok(response_data(&response))
    }

    /// Inserts a tuple; fails if a tuple with the same primary key exists.
    pub async fn insert(&self, tuple: Vec<Value>) -> Result<Vec<Tuple>, ClientError> {
        self.store(RequestType::Insert, tuple).await
    }

    /// Inserts or fully replaces a tuple.
    pub async fn replace(&self, tuple: Vec<Value>) -> Result<Vec<Tuple>, ClientError> {
        self.store(RequestType::Replace, tuple).await
    }

    async fn store(
        &self,
        request: RequestType,
        tuple: Vec<Value>,
    ) -> Result<Vec<Tuple>, ClientError> {
        if tuple.is_empty() {
            return Err(ClientError::InvalidRequest("tuple must not be empty".into()));
        }
        let body = Value::Map(vec![
            (Value::from(keys::SPACE_ID), Value::from(self.meta.id)),
            (Value::from(keys::TUPLE), Value::Array(tuple)),
        ]);
        let response = self.conn.request(request.code(), body).await?;
        self.into_tuples(response_data(&response))
    }

    /// Applies `ops` to the tuple matching `key`.
    pub async fn update(
        &self,
        index: impl Into<IndexRef>,
        key: Vec<Value>,
        ops: Vec<UpdateOp>,
    ) -> Result<Vec<Tuple>, ClientError> {
        let index = index.into();
        let index_meta = self.resolve_index(&index)?;
        self.check_key(&index_meta, &key)?;
        let ops = Self::check_ops(ops)?;

        let body = Value::Map(vec![
            (Value::from(keys::SPACE_ID), Value::from(self.meta.id)),
            (Value::from(keys::INDEX_ID), Value::from(index_meta.id)),
            (Value::from(keys::KEY), Value::Array(key)),
            (Value::from(keys::TUPLE), Value::Array(ops)),
        ]);
        let response = self.conn.request(RequestType::Update.code(), body).await?;
        self.into_tuples(response_data(&response))
    }

    /// Deletes the tuple matching `key`.
    pub async fn delete(
        &self,
        index: impl Into<IndexRef>,
        key: Vec<Value>,
    ) -> Result<Vec<Tuple>, ClientError> {
        let index = index.into();
        let index_meta = self.resolve_index(&index)?;
        self.check_key(&index_meta, &key)?;

        let body = Value::Map(vec![
            (Value::from(keys::SPACE_ID), Value::from(self.meta.id)),
            (Value::from(keys::INDEX_ID), Value::from(index_meta.id)),
            (Value::from(keys::KEY), Value::Array(key)),
        ]);
        let response = self.conn.request(RequestType::Delete.code(), body).await?;
        self.into_tuples(response_data(&response))
    }

    /// Updates the tuple matching `tuple`'s primary key with `ops`, or
    /// inserts `tuple` when no match exists.
    pub async fn upsert(
        &self,
        tuple: Vec<Value>,
        ops: Vec<UpdateOp>,
    ) -> Result<Vec<Tuple>, ClientError> {
        if tuple.is_empty() {
            return Err(ClientError::InvalidRequest("tuple must not be empty".into()));
        }
        let ops = Self::check_ops(ops)?;

        let body = Value::Map(vec![
            (Value::from(keys::SPACE_ID), Value::from(self.meta.id)),
            (Value::from(keys::TUPLE), Value::Array(tuple)),
            (Value::from(keys::OPS), Value::Array(ops)),
        ]);
        let response = self.conn.request(RequestType::Upsert.code(), body).await?;
        self.into_tuples(response_data(&response))
    }

    fn resolve_index(&self, index: &IndexRef) -> Result<Arc<IndexMetadata>, ClientError> {
        let found = match index {
            IndexRef::Id(id) => self.metadata.index_by_id(self.meta.id, *id),
            IndexRef::Name(name) => self.metadata.index_by_name(self.meta.id, name),
        };
        found.ok_or_else(|| ClientError::IndexNotFound {
            space: self.meta.name.clone(),
            index: index.to_string(),
        })
    }

    /// Key arity must not exceed the index part count; partial keys are only
    /// valid on tree indexes (an empty key selects everything on any index).
    fn check_key(&self, index: &IndexMetadata, key: &[Value]) -> Result<(), ClientError> {
        if key.len() > index.parts.len() {
            return Err(ClientError::InvalidRequest(format!(
                "key has {} parts but index '{}' has only {}",
                key.len(),
                index.name,
                index.parts.len()
            )));
        }
        if !key.is_empty() && key.len() < index.parts.len() && index.index_type != "tree" {
            return Err(ClientError::InvalidRequest(format!(
                "partial key on {} index '{}' requires a tree index",
                index.index_type, index.name
            )));
        }
        Ok(())
    }

    fn check_ops(ops: Vec<UpdateOp>) -> Result<Vec<Value>, ClientError> {
        if ops.is_empty() {
            return Err(ClientError::InvalidRequest(
                "update requires at least one operation".into(),
            ));
        }
        Ok(ops.iter().map(UpdateOp::to_value).collect())
    }

    fn into_tuples(&self, rows: Vec<Value>) -> Result<Vec<Tuple>, ClientError> {
        rows.into_iter()
            .map(|row| Tuple::new(row, self.mapper.clone()))
            .collect()
    }
}

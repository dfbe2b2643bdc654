//! Schema metadata cache.
//!
//! Every CRUD request addresses spaces and indexes by numeric id; callers
//! use names. The cache scans the `_vspace` and `_vindex` system spaces,
//! builds lookup maps in both directions, and publishes them as one
//! immutable snapshot swapped atomically on refresh.

use crate::connection::{response_data, Connection};
use crate::error::ClientError;
use crate::space::IteratorType;
use rmpv::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use tuplebox_protocol::consts::{keys, system_spaces};
use tuplebox_protocol::{ProtocolError, RequestType};

/// One field of a space format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldMeta {
    pub name: String,
    pub field_type: String,
    pub is_nullable: bool,
}

/// Space descriptor from `_vspace`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpaceMetadata {
    pub id: u32,
    pub name: String,
    pub engine: String,
    pub format: Vec<FieldMeta>,
}

/// One key part of an index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexPart {
    pub field_no: u32,
    pub part_type: String,
}

/// Index descriptor from `_vindex`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexMetadata {
    pub space_id: u32,
    pub id: u32,
    pub name: String,
    pub index_type: String,
    pub unique: bool,
    pub parts: Vec<IndexPart>,
}

#[derive(Default)]
struct Snapshot {
    spaces_by_name: HashMap<String, Arc<SpaceMetadata>>,
    spaces_by_id: HashMap<u32, Arc<SpaceMetadata>>,
    indexes_by_id: HashMap<(u32, u32), Arc<IndexMetadata>>,
    indexes_by_name: HashMap<(u32, String), Arc<IndexMetadata>>,
}

impl Snapshot {
    fn build(space_rows: &[Value], index_rows: &[Value]) -> Result<Self, ClientError> {
        let mut snapshot = Snapshot::default();
        for row in space_rows {
            let space = Arc::new(parse_space(row)?);
            snapshot
                .spaces_by_name
                .insert(space.name.clone(), space.clone());
            snapshot.spaces_by_id.insert(space.id, space);
        }
        for row in index_rows {
            let index = Arc::new(parse_index(row)?);
            snapshot
                .indexes_by_id
                .insert((index.space_id, index.id), index.clone());
            snapshot
                .indexes_by_name
                .insert((index.space_id, index.name.clone()), index);
        }
        Ok(snapshot)
    }
}

/// The metadata cache. Lazily populated on first lookup, refreshed on
/// demand. Lookups never observe a partially built snapshot.
pub struct Metadata {
    conn: Arc<Connection>,
    snapshot: RwLock<Arc<Snapshot>>,
    populated: AtomicBool,
}

impl Metadata {
    pub(crate) fn new(conn: Arc<Connection>) -> Self {
        Self {
            conn,
            snapshot: RwLock::new(Arc::new(Snapshot::default())),
            populated: AtomicBool::new(false),
        }
    }

    /// Rescans `_vspace` and `_vindex` and swaps in a fresh snapshot.
    pub async fn refresh(&self) -> Result<(), ClientError> {
        let space_rows = self.scan(system_spaces::VSPACE_ID).await?;
        let index_rows = self.scan(system_spaces::VINDEX_ID).await?;
        let snapshot = Snapshot::build(&space_rows, &index_rows)?;
        tracing::debug!(
            spaces = snapshot.spaces_by_id.len(),
            indexes = snapshot.indexes_by_id.len(),
            "metadata refreshed"
        );

        *write_lock(&self.snapshot) = Arc::new(snapshot);
        self.populated.store(true, Ordering::Release);
        Ok(())
    }

    /// Full scan of a system space: empty key, max limit.
    async fn scan(&self, space_id: u32) -> Result<Vec<Value>, ClientError> {
        let body = Value::Map(vec![
            (Value::from(keys::SPACE_ID), Value::from(space_id)),
            (Value::from(keys::INDEX_ID), Value::from(0u32)),
            (Value::from(keys::LIMIT), Value::from(u32::MAX)),
            (Value::from(keys::OFFSET), Value::from(0u32)),
            (
                Value::from(keys::ITERATOR),
                Value::from(IteratorType::All as u8),
            ),
            (Value::from(keys::KEY), Value::Array(Vec::new())),
        ]);
        let response = self.conn.request(RequestType::Select.code(), body).await?;
        Ok(response_data(&response))
    }

    async fn ensure_populated(&self) -> Result<(), ClientError> {
        if self.populated.load(Ordering::Acquire) {
            return Ok(());
        }
        self.refresh().await
    }

    pub async fn space_by_name(
        &self,
        name: &str,
    ) -> Result<Option<Arc<SpaceMetadata>>, ClientError> {
        self.ensure_populated().await?;
        Ok(self.load().spaces_by_name.get(name).cloned())
    }

    pub async fn space_by_id(&self, id: u32) -> Result<Option<Arc<SpaceMetadata>>, ClientError> {
        self.ensure_populated().await?;
        Ok(self.load().spaces_by_id.get(&id).cloned())
    }

    pub fn index_by_id(&self, space_id: u32, index_id: u32) -> Option<Arc<IndexMetadata>> {
        self.load().indexes_by_id.get(&(space_id, index_id)).cloned()
    }

    pub fn index_by_name(&self, space_id: u32, name: &str) -> Option<Arc<IndexMetadata>> {
        self.load()
            .indexes_by_name
            .get(&(space_id, name.to_string()))
            .cloned()
    }

    fn load(&self) -> Arc<Snapshot> {
        match self.snapshot.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

fn write_lock<'a>(
    lock: &'a RwLock<Arc<Snapshot>>,
) -> std::sync::RwLockWriteGuard<'a, Arc<Snapshot>> {
    match lock.write() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn malformed(reason: &'static str) -> ClientError {
    ProtocolError::Malformed(reason).into()
}

/// Parses a `_vspace` tuple:
/// `[id, owner, name, engine, field_count, flags, format]`.
fn parse_space(row: &Value) -> Result<SpaceMetadata, ClientError> {
    let fields = row
        .as_array()
        .ok_or_else(|| malformed("_vspace row is not an array"))?;
    let id = fields
        .first()
        .and_then(Value::as_u64)
        .ok_or_else(|| malformed("_vspace row has no space id"))? as u32;
    let name = fields
        .get(2)
        .and_then(Value::as_str)
        .ok_or_else(|| malformed("_vspace row has no name"))?
        .to_string();
    let engine = fields
        .get(3)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    let format = fields
        .get(6)
        .and_then(Value::as_array)
        .map(|entries| entries.iter().map(parse_field).collect::<Result<_, _>>())
        .transpose()?
        .unwrap_or_default();

    Ok(SpaceMetadata {
        id,
        name,
        engine,
        format,
    })
}

fn parse_field(entry: &Value) -> Result<FieldMeta, ClientError> {
    let map = entry
        .as_map()
        .ok_or_else(|| malformed("space format entry is not a map"))?;
    let name = map_str(map, "name").ok_or_else(|| malformed("format entry has no name"))?;
    let field_type = map_str(map, "type").unwrap_or_default();
    let is_nullable = map_bool(map, "is_nullable").unwrap_or(false);
    Ok(FieldMeta {
        name,
        field_type,
        is_nullable,
    })
}

/// Parses a `_vindex` tuple:
/// `[space_id, index_id, name, type, opts, parts]`. Parts come either as
/// `[field_no, type]` pairs or as maps with `field`/`type` keys, depending
/// on the server version.
fn parse_index(row: &Value) -> Result<IndexMetadata, ClientError> {
    let fields = row
        .as_array()
        .ok_or_else(|| malformed("_vindex row is not an array"))?;
    let space_id = fields
        .first()
        .and_then(Value::as_u64)
        .ok_or_else(|| malformed("_vindex row has no space id"))? as u32;
    let id = fields
        .get(1)
        .and_then(Value::as_u64)
        .ok_or_else(|| malformed("_vindex row has no index id"))? as u32;
    let name = fields
        .get(2)
        .and_then(Value::as_str)
        .ok_or_else(|| malformed("_vindex row has no name"))?
        .to_string();
    let index_type = fields
        .get(3)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_lowercase();
    let unique = fields
        .get(4)
        .and_then(Value::as_map)
        .and_then(|opts| map_bool(opts, "unique"))
        .unwrap_or(false);

    let parts = fields
        .get(5)
        .and_then(Value::as_array)
        .map(|entries| entries.iter().map(parse_part).collect::<Result<_, _>>())
        .transpose()?
        .unwrap_or_default();

    Ok(IndexMetadata {
        space_id,
        id,
        name,
        index_type,
        unique,
        parts,
    })
}

fn parse_part(entry: &Value) -> Result<IndexPart, ClientError> {
    if let Some(pair) = entry.as_array() {
        let field_no = pair
            .first()
            .and_then(Value::as_u64)
            .ok_or_else(|| malformed("index part has no field number"))? as u32;
        let part_type = pair
            .get(1)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_lowercase();
        return Ok(IndexPart {
            field_no,
            part_type,
        });
    }
    if let Some(map) = entry.as_map() {
        let field_no = map
            .iter()
            .find(|(key, _)| key.as_str() == Some("field"))
            .and_then(|(_, field)| field.as_u64())
            .ok_or_else(|| malformed("index part has no field number"))? as u32;
        let part_type = map_str(map, "type").unwrap_or_default().to_lowercase();
        return Ok(IndexPart {
            field_no,
            part_type,
        });
    }
    Err(malformed("index part is neither an array nor a map"))
}

fn map_str(map: &[(Value, Value)], key: &str) -> Option<String> {
    map.iter()
        .find(|(k, _)| k.as_str() == Some(key))
        .and_then(|(_, v)| v.as_str())
        .map(str::to_string)
}

fn map_bool(map: &[(Value, Value)], key: &str) -> Option<bool> {
    map.iter()
        .find(|(k, _)| k.as_str() == Some(key))
        .and_then(|(_, v)| v.as_bool())
}

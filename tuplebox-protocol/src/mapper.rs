//! Value/object mapper registry.
//!
//! Converts between MessagePack values and native types through two
//! registries: value converters keyed by `(ValueKind, TypeId)` and object
//! converters keyed by `TypeId`. Lookups are exact-match only; a missing
//! entry surfaces as [`MapperError::ConverterNotFound`].

use crate::decimal::{Decimal, EXT_DECIMAL, EXT_UUID};
use crate::error::MapperError;
use rmpv::{Utf8String, Value};
use std::any::{type_name, Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use uuid::Uuid;

/// The MessagePack variant a value converter is registered against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    Nil,
    Boolean,
    Integer,
    Float,
    String,
    Binary,
    Array,
    Map,
    Ext,
}

impl ValueKind {
    pub fn of(value: &Value) -> Self {
        match value {
            Value::Nil => Self::Nil,
            Value::Boolean(_) => Self::Boolean,
            Value::Integer(_) => Self::Integer,
            Value::F32(_) | Value::F64(_) => Self::Float,
            Value::String(_) => Self::String,
            Value::Binary(_) => Self::Binary,
            Value::Array(_) => Self::Array,
            Value::Map(_) => Self::Map,
            Value::Ext(..) => Self::Ext,
        }
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Nil => "nil",
            Self::Boolean => "boolean",
            Self::Integer => "integer",
            Self::Float => "float",
            Self::String => "string",
            Self::Binary => "binary",
            Self::Array => "array",
            Self::Map => "map",
            Self::Ext => "ext",
        };
        f.write_str(name)
    }
}

struct FromFn<T>(Box<dyn Fn(&Value) -> Result<T, MapperError> + Send + Sync>);
struct IntoFn<T>(Box<dyn Fn(&T) -> Result<Value, MapperError> + Send + Sync>);

/// Bidirectional converter registry.
pub struct Mapper {
    from_value: HashMap<(ValueKind, TypeId), Arc<dyn Any + Send + Sync>>,
    into_value: HashMap<TypeId, Arc<dyn Any + Send + Sync>>,
}

impl Mapper {
    /// Creates an empty mapper with no converters registered.
    pub fn new() -> Self {
        Self {
            from_value: HashMap::new(),
            into_value: HashMap::new(),
        }
    }

    /// Creates a mapper with the default converter set: booleans, signed and
    /// unsigned integers, floats, strings, raw bytes, UUID and decimal ext
    /// types, arrays, maps, and nil.
    pub fn with_defaults() -> Self {
        let mut mapper = Self::new();
        register_default_converters(&mut mapper);
        mapper
    }

    /// Registers a value converter producing `T` from values of `kind`.
    ///
    /// Replaces any previous converter for the same `(kind, T)` pair.
    pub fn register_value_converter<T, F>(&mut self, kind: ValueKind, convert: F)
    where
        T: Any,
        F: Fn(&Value) -> Result<T, MapperError> + Send + Sync + 'static,
    {
        self.from_value.insert(
            (kind, TypeId::of::<T>()),
            Arc::new(FromFn::<T>(Box::new(convert))),
        );
    }

    /// Registers an object converter producing a value from `T`.
    pub fn register_object_converter<T, F>(&mut self, convert: F)
    where
        T: Any,
        F: Fn(&T) -> Result<Value, MapperError> + Send + Sync + 'static,
    {
        self.into_value
            .insert(TypeId::of::<T>(), Arc::new(IntoFn::<T>(Box::new(convert))));
    }

    /// Converts a MessagePack value to `T` via the registered converter.
    pub fn from_value<T: Any>(&self, value: &Value) -> Result<T, MapperError> {
        let kind = ValueKind::of(value);
        let converter = self
            .from_value
            .get(&(kind, TypeId::of::<T>()))
            .and_then(|entry| entry.downcast_ref::<FromFn<T>>())
            .ok_or(MapperError::ConverterNotFound {
                kind,
                target: type_name::<T>(),
            })?;
        (converter.0)(value)
    }

    /// Converts a native object to a MessagePack value.
    pub fn to_value<T: Any>(&self, object: &T) -> Result<Value, MapperError> {
        let converter = self
            .into_value
            .get(&TypeId::of::<T>())
            .and_then(|entry| entry.downcast_ref::<IntoFn<T>>())
            .ok_or(MapperError::ObjectConverterNotFound(type_name::<T>()))?;
        (converter.0)(object)
    }
}

impl Default for Mapper {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl fmt::Debug for Mapper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mapper")
            .field("value_converters", &self.from_value.len())
            .field("object_converters", &self.into_value.len())
            .finish()
    }
}

fn int_from_value<T>(value: &Value) -> Result<T, MapperError>
where
    T: TryFrom<i64> + TryFrom<u64> + Any,
{
    let converted = match value {
        Value::Integer(n) => {
            if let Some(signed) = n.as_i64() {
                T::try_from(signed).ok()
            } else {
                n.as_u64().and_then(|unsigned| T::try_from(unsigned).ok())
            }
        }
        _ => None,
    };
    converted.ok_or_else(|| MapperError::OutOfRange {
        target: type_name::<T>(),
        value: value.to_string(),
    })
}

fn register_default_converters(mapper: &mut Mapper) {
    mapper.register_value_converter(ValueKind::Boolean, |value| match value.as_bool() {
        Some(flag) => Ok(flag),
        None => Err(MapperError::OutOfRange {
            target: "bool",
            value: value.to_string(),
        }),
    });
    mapper.register_value_converter(ValueKind::Integer, int_from_value::<i8>);
    mapper.register_value_converter(ValueKind::Integer, int_from_value::<i16>);
    mapper.register_value_converter(ValueKind::Integer, int_from_value::<i32>);
    mapper.register_value_converter(ValueKind::Integer, int_from_value::<i64>);
    mapper.register_value_converter(ValueKind::Integer, int_from_value::<u8>);
    mapper.register_value_converter(ValueKind::Integer, int_from_value::<u16>);
    mapper.register_value_converter(ValueKind::Integer, int_from_value::<u32>);
    mapper.register_value_converter(ValueKind::Integer, int_from_value::<u64>);
    mapper.register_value_converter(ValueKind::Float, |value| match value {
        Value::F32(v) => Ok(*v),
        Value::F64(v) => Ok(*v as f32),
        _ => Err(MapperError::OutOfRange {
            target: "f32",
            value: value.to_string(),
        }),
    });
    mapper.register_value_converter(ValueKind::Float, |value| match value.as_f64() {
        Some(v) => Ok(v),
        None => Err(MapperError::OutOfRange {
            target: "f64",
            value: value.to_string(),
        }),
    });
    mapper.register_value_converter(ValueKind::String, |value| {
        value
            .as_str()
            .map(str::to_owned)
            .ok_or(MapperError::InvalidUtf8)
    });
    mapper.register_value_converter(ValueKind::Binary, |value| match value {
        Value::Binary(bytes) => Ok(bytes.clone()),
        _ => Err(MapperError::OutOfRange {
            target: "Vec<u8>",
            value: value.to_string(),
        }),
    });
    mapper.register_value_converter(ValueKind::Ext, |value| match value {
        Value::Ext(EXT_UUID, data) => {
            Uuid::from_slice(data).map_err(|_| MapperError::InvalidExt {
                kind: "uuid",
                reason: "payload is not 16 bytes",
            })
        }
        _ => Err(MapperError::InvalidExt {
            kind: "uuid",
            reason: "unexpected ext tag",
        }),
    });
    mapper.register_value_converter(ValueKind::Ext, |value| match value {
        Value::Ext(EXT_DECIMAL, data) => Decimal::from_ext_bytes(data),
        _ => Err(MapperError::InvalidExt {
            kind: "decimal",
            reason: "unexpected ext tag",
        }),
    });
    mapper.register_value_converter(ValueKind::Array, |value| match value {
        Value::Array(items) => Ok(items.clone()),
        _ => Err(MapperError::OutOfRange {
            target: "Vec<Value>",
            value: value.to_string(),
        }),
    });
    mapper.register_value_converter(ValueKind::Map, |value| match value {
        Value::Map(entries) => Ok(entries.clone()),
        _ => Err(MapperError::OutOfRange {
            target: "Vec<(Value, Value)>",
            value: value.to_string(),
        }),
    });
    mapper.register_value_converter(ValueKind::Nil, |_| Ok(()));

    mapper.register_object_converter(|flag: &bool| Ok(Value::Boolean(*flag)));
    mapper.register_object_converter(|n: &i8| Ok(Value::from(*n)));
    mapper.register_object_converter(|n: &i16| Ok(Value::from(*n)));
    mapper.register_object_converter(|n: &i32| Ok(Value::from(*n)));
    mapper.register_object_converter(|n: &i64| Ok(Value::from(*n)));
    mapper.register_object_converter(|n: &u8| Ok(Value::from(*n)));
    mapper.register_object_converter(|n: &u16| Ok(Value::from(*n)));
    mapper.register_object_converter(|n: &u32| Ok(Value::from(*n)));
    mapper.register_object_converter(|n: &u64| Ok(Value::from(*n)));
    mapper.register_object_converter(|v: &f32| Ok(Value::F32(*v)));
    mapper.register_object_converter(|v: &f64| Ok(Value::F64(*v)));
    mapper.register_object_converter(|s: &String| {
        Ok(Value::String(Utf8String::from(s.as_str())))
    });
    mapper.register_object_converter(|bytes: &Vec<u8>| Ok(Value::Binary(bytes.clone())));
    mapper.register_object_converter(|id: &Uuid| {
        Ok(Value::Ext(EXT_UUID, id.as_bytes().to_vec()))
    });
    mapper.register_object_converter(|decimal: &Decimal| {
        Ok(Value::Ext(EXT_DECIMAL, decimal.to_ext_bytes()?))
    });
    mapper.register_object_converter(|items: &Vec<Value>| Ok(Value::Array(items.clone())));
    mapper.register_object_converter(|entries: &Vec<(Value, Value)>| {
        Ok(Value::Map(entries.clone()))
    });
    mapper.register_object_converter(|_: &()| Ok(Value::Nil));
}

/// Decodes one tuple row into `T`.
pub struct ResultMapper<T> {
    convert: Box<dyn Fn(&[Value]) -> Result<T, MapperError> + Send + Sync>,
}

impl<T> ResultMapper<T> {
    /// Decodes a single row, which must be an array value.
    pub fn decode_row(&self, row: &Value) -> Result<T, MapperError> {
        match row {
            Value::Array(fields) => (self.convert)(fields),
            other => Err(MapperError::NotATuple(ValueKind::of(other))),
        }
    }

    /// Decodes every row of a response data array.
    pub fn decode(&self, rows: &[Value]) -> Result<Vec<T>, MapperError> {
        rows.iter().map(|row| self.decode_row(row)).collect()
    }
}

/// Produces and caches result mappers per target type: requesting a mapper
/// for the same `T` twice returns the same instance.
pub struct ResultMapperFactory {
    cache: Mutex<HashMap<TypeId, Arc<dyn Any + Send + Sync>>>,
}

impl ResultMapperFactory {
    pub fn new() -> Self {
        Self {
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the cached mapper for `T`, creating it from `convert` on the
    /// first request. Later calls ignore `convert` and reuse the cached one.
    pub fn mapper_for<T, F>(&self, convert: F) -> Arc<ResultMapper<T>>
    where
        T: Any,
        F: Fn(&[Value]) -> Result<T, MapperError> + Send + Sync + 'static,
    {
        let mut cache = lock_cache(&self.cache);
        if let Some(cached) = cache
            .get(&TypeId::of::<T>())
            .and_then(|entry| entry.clone().downcast::<ResultMapper<T>>().ok())
        {
            return cached;
        }

        let mapper = Arc::new(ResultMapper {
            convert: Box::new(convert),
        });
        cache.insert(TypeId::of::<T>(), mapper.clone() as Arc<dyn Any + Send + Sync>);
        mapper
    }
}

impl Default for ResultMapperFactory {
    fn default() -> Self {
        Self::new()
    }
}

fn lock_cache(
    cache: &Mutex<HashMap<TypeId, Arc<dyn Any + Send + Sync>>>,
) -> MutexGuard<'_, HashMap<TypeId, Arc<dyn Any + Send + Sync>>> {
    match cache.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_integer_conversions() {
        let mapper = Mapper::with_defaults();

        assert_eq!(mapper.from_value::<u32>(&Value::from(7u64)).unwrap(), 7);
        assert_eq!(mapper.from_value::<i8>(&Value::from(-3i64)).unwrap(), -3);
        assert_eq!(
            mapper.from_value::<u64>(&Value::from(u64::MAX)).unwrap(),
            u64::MAX
        );
    }

    #[test]
    fn test_integer_out_of_range() {
        let mapper = Mapper::with_defaults();
        let result = mapper.from_value::<u8>(&Value::from(300u64));
        assert!(matches!(result, Err(MapperError::OutOfRange { .. })));

        let result = mapper.from_value::<u32>(&Value::from(-1i64));
        assert!(matches!(result, Err(MapperError::OutOfRange { .. })));
    }

    #[test]
    fn test_string_and_binary() {
        let mapper = Mapper::with_defaults();
        assert_eq!(
            mapper.from_value::<String>(&Value::from("hello")).unwrap(),
            "hello"
        );
        assert_eq!(
            mapper
                .from_value::<Vec<u8>>(&Value::Binary(vec![1, 2, 3]))
                .unwrap(),
            vec![1, 2, 3]
        );
    }

    #[test]
    fn test_converter_not_found() {
        let mapper = Mapper::with_defaults();
        let result = mapper.from_value::<String>(&Value::from(1u64));
        match result {
            Err(MapperError::ConverterNotFound { kind, .. }) => {
                assert_eq!(kind, ValueKind::Integer);
            }
            other => panic!("expected ConverterNotFound, got {other:?}"),
        }
    }

    #[test]
    fn test_empty_mapper_has_no_converters() {
        let mapper = Mapper::new();
        assert!(mapper.from_value::<bool>(&Value::Boolean(true)).is_err());
        assert!(mapper.to_value(&true).is_err());
    }

    #[test]
    fn test_uuid_ext_roundtrip() {
        let mapper = Mapper::with_defaults();
        let id = Uuid::from_bytes([0xab; 16]);

        let value = mapper.to_value(&id).unwrap();
        assert!(matches!(value, Value::Ext(EXT_UUID, _)));
        assert_eq!(mapper.from_value::<Uuid>(&value).unwrap(), id);
    }

    #[test]
    fn test_decimal_ext_roundtrip() {
        let mapper = Mapper::with_defaults();
        let decimal = Decimal::new(false, 2, vec![9, 9, 5]).unwrap();

        let value = mapper.to_value(&decimal).unwrap();
        assert_eq!(mapper.from_value::<Decimal>(&value).unwrap(), decimal);
    }

    #[test]
    fn test_object_conversions() {
        let mapper = Mapper::with_defaults();
        assert_eq!(mapper.to_value(&42u32).unwrap(), Value::from(42u32));
        assert_eq!(
            mapper.to_value(&"abc".to_string()).unwrap(),
            Value::from("abc")
        );
        assert_eq!(mapper.to_value(&()).unwrap(), Value::Nil);
    }

    #[test]
    fn test_custom_converter_registration() {
        let mut mapper = Mapper::new();
        mapper.register_value_converter(ValueKind::String, |value| {
            value
                .as_str()
                .map(|s| s.len())
                .ok_or(MapperError::InvalidUtf8)
        });

        assert_eq!(mapper.from_value::<usize>(&Value::from("four")).unwrap(), 4);
    }

    #[test]
    fn test_result_mapper_decodes_rows() {
        let factory = ResultMapperFactory::new();
        let shared = Mapper::with_defaults();
        let mapper = factory.mapper_for(move |fields: &[Value]| {
            let id: u64 = shared.from_value(&fields[0])?;
            let name: String = shared.from_value(&fields[1])?;
            Ok((id, name))
        });

        let rows = vec![
            Value::Array(vec![Value::from(1u64), Value::from("one")]),
            Value::Array(vec![Value::from(2u64), Value::from("two")]),
        ];
        let decoded = mapper.decode(&rows).unwrap();
        assert_eq!(decoded, vec![(1, "one".to_string()), (2, "two".to_string())]);
    }

    #[test]
    fn test_result_mapper_rejects_non_array_row() {
        let factory = ResultMapperFactory::new();
        let mapper = factory.mapper_for(|_: &[Value]| Ok(0u8));
        let result = mapper.decode_row(&Value::from("oops"));
        assert!(matches!(result, Err(MapperError::NotATuple(_))));
    }

    #[test]
    fn test_result_mapper_cached_per_type() {
        let factory = ResultMapperFactory::new();
        let first = factory.mapper_for(|_: &[Value]| Ok(1u32));
        let second = factory.mapper_for(|_: &[Value]| Ok(2u32));
        assert!(Arc::ptr_eq(&first, &second));

        let other = factory.mapper_for(|_: &[Value]| Ok(1u64));
        assert_eq!(other.decode_row(&Value::Array(vec![])).unwrap(), 1u64);
    }
}

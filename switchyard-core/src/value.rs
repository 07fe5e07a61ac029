//! 动态值
//!
//! 参数抓取、类型转换、拦截器和处理器之间传递的统一值类型。
//! 处理器可以通过 [`Arguments::value`] 把它还原为具体的 Rust 类型。

use std::any::Any;
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, LinkedList, VecDeque};
use std::fmt;
use std::hash::Hash;
use std::io::Read;
use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;

use crate::types::{CollectionKind, TypeKey};

/// 动态值
#[derive(Clone, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Char(char),
    Str(String),
    Bytes(Vec<u8>),
    Enum {
        ty: TypeKey,
        variant: String,
    },
    Array(Vec<Value>),
    Collection {
        kind: CollectionKind,
        items: Vec<Value>,
    },
    /// 保持插入顺序的键值对
    Map(Vec<(Value, Value)>),
    Object(Arc<dyn Any + Send + Sync>),
}

impl Value {
    pub fn str(s: impl Into<String>) -> Self {
        Value::Str(s.into())
    }

    pub fn object<T: Any + Send + Sync>(value: T) -> Self {
        Value::Object(Arc::new(value))
    }

    /// 可读取的流，写出时会被完整读取并关闭
    pub fn reader<R: Read + Send + 'static>(reader: R) -> Self {
        Value::Object(Arc::new(Readable::new(reader)))
    }

    /// 构造集合：抽象接口替换为具体实现，集合语义（去重、排序）在这里生效
    pub fn collection(kind: CollectionKind, items: Vec<Value>) -> Self {
        let kind = kind.concrete();
        let mut items = if kind.is_unique() {
            dedup(items)
        } else {
            items
        };
        if kind.is_sorted() {
            items.sort_by(Value::natural_cmp);
        }
        Value::Collection { kind, items }
    }

    /// 插入键值对，已存在的键会被覆盖
    pub fn map_insert(entries: &mut Vec<(Value, Value)>, key: Value, value: Value) {
        match entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => entries.push((key, value)),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            Value::Enum { variant, .. } => Some(variant),
            _ => None,
        }
    }

    /// 数组或集合的元素
    pub fn items(&self) -> Option<&[Value]> {
        match self {
            Value::Array(items) | Value::Collection { items, .. } => Some(items),
            _ => None,
        }
    }

    /// 按字符串键查找 Map 中的值
    pub fn map_get(&self, key: &str) -> Option<&Value> {
        match self {
            Value::Map(entries) => entries
                .iter()
                .find(|(k, _)| k.to_string() == key)
                .map(|(_, v)| v),
            _ => None,
        }
    }

    pub fn downcast<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        match self {
            Value::Object(object) => Arc::clone(object).downcast::<T>().ok(),
            _ => None,
        }
    }

    /// 值的简短类型名，用于错误信息
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Char(_) => "char",
            Value::Str(_) => "string",
            Value::Bytes(_) => "bytes",
            Value::Enum { .. } => "enum",
            Value::Array(_) => "array",
            Value::Collection { .. } => "collection",
            Value::Map(_) => "map",
            Value::Object(_) => "object",
        }
    }

    /// 自然顺序：数值按大小，其他按字符串表示
    pub fn natural_cmp(a: &Value, b: &Value) -> Ordering {
        match (a, b) {
            (Value::Int(x), Value::Int(y)) => x.cmp(y),
            (x, y) if x.as_f64().is_some() && y.as_f64().is_some() => x
                .as_f64()
                .partial_cmp(&y.as_f64())
                .unwrap_or(Ordering::Equal),
            (Value::Null, Value::Null) => Ordering::Equal,
            (Value::Null, _) => Ordering::Less,
            (_, Value::Null) => Ordering::Greater,
            (x, y) => x.to_string().cmp(&y.to_string()),
        }
    }
}

/// 去重用的可哈希投影，与 `Value` 的相等性一致
#[derive(PartialEq, Eq, Hash)]
enum DedupKey<'a> {
    Null,
    Bool(bool),
    Int(i64),
    Float(u64),
    Char(char),
    Str(&'a str),
    Bytes(&'a [u8]),
    Enum(&'a TypeKey, &'a str),
}

impl<'a> DedupKey<'a> {
    /// 复合值、对象和 NaN 没有投影
    fn of(value: &'a Value) -> Option<Self> {
        Some(match value {
            Value::Null => DedupKey::Null,
            Value::Bool(b) => DedupKey::Bool(*b),
            Value::Int(i) => DedupKey::Int(*i),
            Value::Float(x) if x.is_nan() => return None,
            // -0.0 == 0.0
            Value::Float(x) if *x == 0.0 => DedupKey::Float(0),
            Value::Float(x) => DedupKey::Float(x.to_bits()),
            Value::Char(c) => DedupKey::Char(*c),
            Value::Str(s) => DedupKey::Str(s),
            Value::Bytes(b) => DedupKey::Bytes(b),
            Value::Enum { ty, variant } => DedupKey::Enum(ty, variant),
            _ => return None,
        })
    }
}

/// 保持首次出现顺序去重；标量按哈希比较，其余值逐个比较
fn dedup(items: Vec<Value>) -> Vec<Value> {
    let mut keep = Vec::with_capacity(items.len());
    {
        let mut seen = HashSet::with_capacity(items.len());
        let mut others: Vec<&Value> = Vec::new();
        for item in &items {
            let fresh = match DedupKey::of(item) {
                Some(key) => seen.insert(key),
                // NaN 不等于任何值
                None if matches!(item, Value::Float(_)) => true,
                None if others.contains(&item) => false,
                None => {
                    others.push(item);
                    true
                }
            };
            keep.push(fresh);
        }
    }
    items
        .into_iter()
        .zip(keep)
        .filter_map(|(item, fresh)| fresh.then_some(item))
        .collect()
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Char(a), Value::Char(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Bytes(a), Value::Bytes(b)) => a == b,
            (
                Value::Enum { ty: ta, variant: va },
                Value::Enum { ty: tb, variant: vb },
            ) => ta == tb && va == vb,
            (Value::Array(a), Value::Array(b)) => a == b,
            (
                Value::Collection { kind: ka, items: ia },
                Value::Collection { kind: kb, items: ib },
            ) => ka == kb && ia == ib,
            (Value::Map(a), Value::Map(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("Null"),
            Value::Bool(b) => write!(f, "Bool({})", b),
            Value::Int(i) => write!(f, "Int({})", i),
            Value::Float(x) => write!(f, "Float({})", x),
            Value::Char(c) => write!(f, "Char({:?})", c),
            Value::Str(s) => write!(f, "Str({:?})", s),
            Value::Bytes(b) => write!(f, "Bytes({} bytes)", b.len()),
            Value::Enum { ty, variant } => write!(f, "Enum({}::{})", ty.simple_name(), variant),
            Value::Array(items) => f.debug_tuple("Array").field(items).finish(),
            Value::Collection { kind, items } => {
                write!(f, "{}", kind.name())?;
                f.debug_list().entries(items).finish()
            }
            Value::Map(entries) => f
                .debug_map()
                .entries(entries.iter().map(|(k, v)| (k, v)))
                .finish(),
            Value::Object(_) => f.write_str("Object(..)"),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => Ok(()),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{}", x),
            Value::Char(c) => write!(f, "{}", c),
            Value::Str(s) => f.write_str(s),
            Value::Bytes(b) => f.write_str(&String::from_utf8_lossy(b)),
            Value::Enum { variant, .. } => f.write_str(variant),
            Value::Array(items) | Value::Collection { items, .. } => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                f.write_str("]")
            }
            Value::Map(entries) => {
                f.write_str("{")?;
                for (i, (k, v)) in entries.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}={}", k, v)?;
                }
                f.write_str("}")
            }
            Value::Object(_) => f.write_str("<object>"),
        }
    }
}

macro_rules! value_from {
    ($($ty:ty => $variant:ident as $target:ty),* $(,)?) => {
        $(
            impl From<$ty> for Value {
                fn from(v: $ty) -> Self {
                    Value::$variant(v as $target)
                }
            }
        )*
    };
}

value_from! {
    i8 => Int as i64,
    i16 => Int as i64,
    i32 => Int as i64,
    i64 => Int as i64,
    u8 => Int as i64,
    u16 => Int as i64,
    u32 => Int as i64,
    f32 => Float as f64,
    f64 => Float as f64,
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<char> for Value {
    fn from(v: char) -> Self {
        Value::Char(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Bytes(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

/// 可读取的流
///
/// 只能被读取一次，读取完成后底层 reader 被释放（即"关闭"）
pub struct Readable {
    inner: Mutex<Option<Box<dyn Read + Send>>>,
}

impl Readable {
    pub fn new<R: Read + Send + 'static>(reader: R) -> Self {
        Self {
            inner: Mutex::new(Some(Box::new(reader))),
        }
    }

    /// 读取全部内容并关闭；已被读取过时返回 `None`
    pub fn drain(&self) -> Option<std::io::Result<Vec<u8>>> {
        let mut reader = self.inner.lock().take()?;
        let mut buffer = Vec::new();
        Some(reader.read_to_end(&mut buffer).map(|_| buffer))
    }
}

/// 值还原错误
#[derive(Debug, Error)]
pub enum ValueError {
    #[error("Expected {expected}, found {found}")]
    TypeMismatch {
        expected: &'static str,
        found: &'static str,
    },

    #[error("Value {value} out of range for {expected}")]
    OutOfRange { expected: &'static str, value: i64 },

    #[error("Argument index {index} out of bounds ({len} arguments)")]
    IndexOutOfBounds { index: usize, len: usize },
}

/// 从 [`Value`] 还原为具体类型
pub trait FromValue: Sized {
    fn from_value(value: Value) -> Result<Self, ValueError>;
}

fn mismatch<T>(expected: &'static str, found: &Value) -> Result<T, ValueError> {
    Err(ValueError::TypeMismatch {
        expected,
        found: found.type_name(),
    })
}

macro_rules! from_value_int {
    ($($ty:ty),*) => {
        $(
            impl FromValue for $ty {
                fn from_value(value: Value) -> Result<Self, ValueError> {
                    match value {
                        Value::Int(i) => <$ty>::try_from(i).map_err(|_| ValueError::OutOfRange {
                            expected: stringify!($ty),
                            value: i,
                        }),
                        other => mismatch(stringify!($ty), &other),
                    }
                }
            }
        )*
    };
}

from_value_int!(i8, i16, i32, i64, u8, u16, u32, u64, usize);

impl FromValue for f64 {
    fn from_value(value: Value) -> Result<Self, ValueError> {
        match value.as_f64() {
            Some(f) => Ok(f),
            None => mismatch("f64", &value),
        }
    }
}

impl FromValue for f32 {
    fn from_value(value: Value) -> Result<Self, ValueError> {
        f64::from_value(value).map(|f| f as f32)
    }
}

impl FromValue for bool {
    fn from_value(value: Value) -> Result<Self, ValueError> {
        match value {
            Value::Bool(b) => Ok(b),
            other => mismatch("bool", &other),
        }
    }
}

impl FromValue for char {
    fn from_value(value: Value) -> Result<Self, ValueError> {
        match value {
            Value::Char(c) => Ok(c),
            other => mismatch("char", &other),
        }
    }
}

impl FromValue for String {
    fn from_value(value: Value) -> Result<Self, ValueError> {
        match value {
            Value::Str(s) => Ok(s),
            Value::Enum { variant, .. } => Ok(variant),
            Value::Char(c) => Ok(c.to_string()),
            other => mismatch("string", &other),
        }
    }
}

impl FromValue for Value {
    fn from_value(value: Value) -> Result<Self, ValueError> {
        Ok(value)
    }
}

impl<T: FromValue> FromValue for Option<T> {
    fn from_value(value: Value) -> Result<Self, ValueError> {
        match value {
            Value::Null => Ok(None),
            other => T::from_value(other).map(Some),
        }
    }
}

fn into_items(value: Value, expected: &'static str) -> Result<Vec<Value>, ValueError> {
    match value {
        Value::Array(items) | Value::Collection { items, .. } => Ok(items),
        Value::Null => Ok(Vec::new()),
        other => mismatch(expected, &other),
    }
}

impl<T: FromValue> FromValue for Vec<T> {
    fn from_value(value: Value) -> Result<Self, ValueError> {
        into_items(value, "sequence")?
            .into_iter()
            .map(T::from_value)
            .collect()
    }
}

impl<T: FromValue> FromValue for VecDeque<T> {
    fn from_value(value: Value) -> Result<Self, ValueError> {
        Vec::<T>::from_value(value).map(VecDeque::from)
    }
}

impl<T: FromValue> FromValue for LinkedList<T> {
    fn from_value(value: Value) -> Result<Self, ValueError> {
        Vec::<T>::from_value(value).map(|items| items.into_iter().collect())
    }
}

impl<T: FromValue + Eq + Hash> FromValue for HashSet<T> {
    fn from_value(value: Value) -> Result<Self, ValueError> {
        Vec::<T>::from_value(value).map(|items| items.into_iter().collect())
    }
}

impl<T: FromValue + Ord> FromValue for BTreeSet<T> {
    fn from_value(value: Value) -> Result<Self, ValueError> {
        Vec::<T>::from_value(value).map(|items| items.into_iter().collect())
    }
}

fn into_entries(value: Value) -> Result<Vec<(Value, Value)>, ValueError> {
    match value {
        Value::Map(entries) => Ok(entries),
        Value::Null => Ok(Vec::new()),
        other => mismatch("map", &other),
    }
}

impl<T: FromValue> FromValue for HashMap<String, T> {
    fn from_value(value: Value) -> Result<Self, ValueError> {
        into_entries(value)?
            .into_iter()
            .map(|(k, v)| Ok((k.to_string(), T::from_value(v)?)))
            .collect()
    }
}

impl<T: FromValue> FromValue for BTreeMap<String, T> {
    fn from_value(value: Value) -> Result<Self, ValueError> {
        into_entries(value)?
            .into_iter()
            .map(|(k, v)| Ok((k.to_string(), T::from_value(v)?)))
            .collect()
    }
}

impl<T: Any + Send + Sync> FromValue for Arc<T> {
    fn from_value(value: Value) -> Result<Self, ValueError> {
        match value.downcast::<T>() {
            Some(object) => Ok(object),
            None => mismatch(std::any::type_name::<T>(), &value),
        }
    }
}

/// 一次调用的全部实参，按形参顺序排列
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Arguments {
    values: Vec<Value>,
}

impl Arguments {
    pub fn new(values: Vec<Value>) -> Self {
        Self { values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    pub fn set(&mut self, index: usize, value: Value) -> Result<(), ValueError> {
        let len = self.values.len();
        let slot = self
            .values
            .get_mut(index)
            .ok_or(ValueError::IndexOutOfBounds { index, len })?;
        *slot = value;
        Ok(())
    }

    /// 按下标取出并还原为具体类型（克隆）
    pub fn value<T: FromValue>(&self, index: usize) -> Result<T, ValueError> {
        let value = self.values.get(index).cloned().ok_or(ValueError::IndexOutOfBounds {
            index,
            len: self.values.len(),
        })?;
        T::from_value(value)
    }

    /// 按下标移出并还原为具体类型，原位置留下 `Null`
    pub fn take<T: FromValue>(&mut self, index: usize) -> Result<T, ValueError> {
        let len = self.values.len();
        let slot = self
            .values
            .get_mut(index)
            .ok_or(ValueError::IndexOutOfBounds { index, len })?;
        T::from_value(std::mem::take(slot))
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Value> {
        self.values.iter()
    }

    pub fn into_vec(self) -> Vec<Value> {
        self.values
    }
}

impl From<Vec<Value>> for Arguments {
    fn from(values: Vec<Value>) -> Self {
        Self::new(values)
    }
}

//! 类型转换
//!
//! 请求中的原始字符串按目标类型转换为 [`Value`]。
//!
//! 查找顺序：
//! 1. 目标类型上精确注册的转换器
//! 2. 已缓存的解析结果
//! 3. 距离最近的转换器：注册类型可以赋给目标类型（注册类型是目标的子类型）；
//!    声明了 `can_construct_subtypes` 的转换器也可以反向匹配（注册类型是目标的父类型，
//!    例如通用的枚举转换器）。距离相同时先注册的优先
//! 4. 数组类型由元素转换器合成
//!
//! 解析结果（包括合成的数组转换器）按目标类型缓存。

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use thiserror::Error;

use switchyard_core::{well_known, Primitive, TypeDescriptor, TypeHierarchy, TypeKey, TypeKind, Value};

/// 转换错误
#[derive(Debug, Error)]
pub enum ConvertError {
    #[error("No converter registered for type '{ty}'")]
    NoConverter { ty: TypeKey },

    #[error("Cannot bind request values to an array of primitive '{ty}'")]
    CannotConvertPrimitive { ty: TypeKey },

    #[error("Type '{ty}' is not a scalar or array conversion target")]
    NotConvertible { ty: TypeKey },

    #[error("Cannot convert '{value}' to '{ty}': {reason}")]
    Invalid {
        ty: TypeKey,
        value: String,
        reason: String,
    },
}

/// 字符串到某个类型的转换器
pub trait Converter: Send + Sync {
    fn convert(&self, target: &TypeDescriptor, raw: &str) -> Result<Value, ConvertError>;

    /// 能否构造注册类型的子类型（允许反向匹配）
    fn can_construct_subtypes(&self) -> bool {
        false
    }

    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

/// 基本类型的零值
pub fn zero_value(primitive: Primitive) -> Value {
    match primitive {
        Primitive::Bool => Value::Bool(false),
        Primitive::Char => Value::Char('\0'),
        Primitive::F32 | Primitive::F64 => Value::Float(0.0),
        _ => Value::Int(0),
    }
}

/// 缺失值：基本类型取零值，其余为 `Null`
pub fn null_value(target: &TypeDescriptor) -> Value {
    match target.kind() {
        TypeKind::Primitive(p) => zero_value(*p),
        _ => Value::Null,
    }
}

/// 基本类型或装箱类型；装箱形式在无法解析时返回 `Null`，基本类型返回零值
fn scalar_target(target: &TypeDescriptor) -> Result<(Primitive, bool), ConvertError> {
    match target.kind() {
        TypeKind::Primitive(p) => Ok((*p, false)),
        TypeKind::Boxed(p) => Ok((*p, true)),
        _ => Err(ConvertError::NotConvertible {
            ty: target.key().clone(),
        }),
    }
}

fn fallback(primitive: Primitive, boxed: bool) -> Value {
    if boxed {
        Value::Null
    } else {
        zero_value(primitive)
    }
}

macro_rules! parse_int {
    ($raw:expr, $ty:ty) => {
        $raw.parse::<$ty>().ok().map(|v| Value::Int(v as i64))
    };
}

fn parse_number(primitive: Primitive, raw: &str) -> Option<Value> {
    match primitive {
        Primitive::I8 => parse_int!(raw, i8),
        Primitive::I16 => parse_int!(raw, i16),
        Primitive::I32 => parse_int!(raw, i32),
        Primitive::I64 => parse_int!(raw, i64),
        Primitive::U8 => parse_int!(raw, u8),
        Primitive::U16 => parse_int!(raw, u16),
        Primitive::U32 => parse_int!(raw, u32),
        Primitive::U64 => raw
            .parse::<u64>()
            .ok()
            .and_then(|v| i64::try_from(v).ok())
            .map(Value::Int),
        Primitive::F32 => raw.parse::<f32>().ok().map(Value::from),
        Primitive::F64 => raw.parse::<f64>().ok().map(Value::from),
        Primitive::Bool | Primitive::Char => None,
    }
}

/// 数值转换器
#[derive(Debug, Default)]
pub struct NumberConverter;

impl Converter for NumberConverter {
    fn convert(&self, target: &TypeDescriptor, raw: &str) -> Result<Value, ConvertError> {
        let (primitive, boxed) = scalar_target(target)?;
        Ok(parse_number(primitive, raw.trim()).unwrap_or_else(|| fallback(primitive, boxed)))
    }
}

/// 布尔转换器：`true` / `on` / `y` / `yes`（不区分大小写）或非零数字为真
#[derive(Debug, Default)]
pub struct BoolConverter;

impl BoolConverter {
    pub fn parse(raw: &str) -> bool {
        let raw = raw.trim();
        if ["true", "on", "y", "yes"]
            .iter()
            .any(|t| raw.eq_ignore_ascii_case(t))
        {
            return true;
        }
        match raw.parse::<f64>() {
            Ok(n) => n != 0.0 && !n.is_nan(),
            Err(_) => false,
        }
    }
}

impl Converter for BoolConverter {
    fn convert(&self, target: &TypeDescriptor, raw: &str) -> Result<Value, ConvertError> {
        let (primitive, boxed) = scalar_target(target)?;
        if boxed && raw.trim().is_empty() {
            return Ok(fallback(primitive, boxed));
        }
        Ok(Value::Bool(Self::parse(raw)))
    }
}

/// 字符转换器：取第一个字符
#[derive(Debug, Default)]
pub struct CharConverter;

impl Converter for CharConverter {
    fn convert(&self, target: &TypeDescriptor, raw: &str) -> Result<Value, ConvertError> {
        let (primitive, boxed) = scalar_target(target)?;
        Ok(raw
            .chars()
            .next()
            .map(Value::Char)
            .unwrap_or_else(|| fallback(primitive, boxed)))
    }
}

#[derive(Debug, Default)]
pub struct StringConverter;

impl Converter for StringConverter {
    fn convert(&self, _target: &TypeDescriptor, raw: &str) -> Result<Value, ConvertError> {
        Ok(Value::str(raw))
    }
}

/// 枚举转换器：先精确匹配，再不区分大小写匹配，都失败时为 `Null`
#[derive(Debug, Default)]
pub struct EnumConverter;

impl Converter for EnumConverter {
    fn convert(&self, target: &TypeDescriptor, raw: &str) -> Result<Value, ConvertError> {
        let TypeKind::Enum(variants) = target.kind() else {
            return Ok(Value::Null);
        };
        let raw = raw.trim();
        let variant = variants
            .iter()
            .find(|v| v.as_str() == raw)
            .or_else(|| variants.iter().find(|v| v.eq_ignore_ascii_case(raw)));

        Ok(match variant {
            Some(variant) => Value::Enum {
                ty: target.key().clone(),
                variant: variant.clone(),
            },
            None => Value::Null,
        })
    }

    fn can_construct_subtypes(&self) -> bool {
        true
    }
}

/// 闭包转换器，用于自定义对象类型
pub struct FnConverter<F> {
    function: F,
}

impl<F> FnConverter<F>
where
    F: Fn(&str) -> Result<Value, ConvertError> + Send + Sync,
{
    pub fn new(function: F) -> Self {
        Self { function }
    }
}

impl<F> Converter for FnConverter<F>
where
    F: Fn(&str) -> Result<Value, ConvertError> + Send + Sync,
{
    fn convert(&self, _target: &TypeDescriptor, raw: &str) -> Result<Value, ConvertError> {
        (self.function)(raw)
    }
}

/// 由元素转换器合成的数组转换器：单个值转换为只有一个元素的数组
struct ArrayConverter {
    element: TypeDescriptor,
    inner: Arc<dyn Converter>,
}

impl Converter for ArrayConverter {
    fn convert(&self, _target: &TypeDescriptor, raw: &str) -> Result<Value, ConvertError> {
        Ok(Value::Array(vec![self.inner.convert(&self.element, raw)?]))
    }

    fn name(&self) -> &str {
        "ArrayConverter"
    }
}

/// 自定义集合适配器：用收集到的全部元素构造集合
#[derive(Clone)]
pub struct CollectionAdapter {
    ty: TypeKey,
    construct: Arc<dyn Fn(Vec<Value>) -> Value + Send + Sync>,
}

impl CollectionAdapter {
    pub fn new<F>(ty: TypeKey, construct: F) -> Self
    where
        F: Fn(Vec<Value>) -> Value + Send + Sync + 'static,
    {
        Self {
            ty,
            construct: Arc::new(construct),
        }
    }

    pub fn type_key(&self) -> &TypeKey {
        &self.ty
    }

    pub fn construct(&self, items: Vec<Value>) -> Value {
        (self.construct)(items)
    }
}

impl fmt::Debug for CollectionAdapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CollectionAdapter").field("ty", &self.ty).finish()
    }
}

/// 转换服务
///
/// 启动时注册转换器，之后只读（缓存除外），可以在请求线程间共享。
pub struct ConversionService {
    hierarchy: Arc<TypeHierarchy>,
    registered: Vec<(TypeKey, Arc<dyn Converter>)>,
    resolved: RwLock<HashMap<TypeKey, Arc<dyn Converter>>>,
    collections: HashMap<TypeKey, CollectionAdapter>,
}

impl ConversionService {
    /// 带内置转换器（基本类型、装箱类型、字符串、枚举）
    pub fn new(hierarchy: Arc<TypeHierarchy>) -> Self {
        let mut service = Self::empty(hierarchy);
        let number: Arc<dyn Converter> = Arc::new(NumberConverter);
        let boolean: Arc<dyn Converter> = Arc::new(BoolConverter);
        let character: Arc<dyn Converter> = Arc::new(CharConverter);

        for primitive in Primitive::ALL {
            let converter = match primitive {
                Primitive::Bool => &boolean,
                Primitive::Char => &character,
                _ => &number,
            };
            service.register_shared(primitive.type_key(), Arc::clone(converter));
            service.register_shared(primitive.boxed_key(), Arc::clone(converter));
        }
        service.register(TypeKey::of::<String>(), StringConverter);
        service.register(well_known::ENUM, EnumConverter);
        service
    }

    /// 不带任何转换器
    pub fn empty(hierarchy: Arc<TypeHierarchy>) -> Self {
        Self {
            hierarchy,
            registered: Vec::new(),
            resolved: RwLock::new(HashMap::new()),
            collections: HashMap::new(),
        }
    }

    pub fn hierarchy(&self) -> &Arc<TypeHierarchy> {
        &self.hierarchy
    }

    /// 注册转换器；同一类型重复注册时原位替换
    pub fn register<C: Converter + 'static>(&mut self, ty: TypeKey, converter: C) -> &mut Self {
        self.register_shared(ty, Arc::new(converter))
    }

    pub fn register_fn<F>(&mut self, ty: TypeKey, function: F) -> &mut Self
    where
        F: Fn(&str) -> Result<Value, ConvertError> + Send + Sync + 'static,
    {
        self.register(ty, FnConverter::new(function))
    }

    pub fn register_shared(&mut self, ty: TypeKey, converter: Arc<dyn Converter>) -> &mut Self {
        match self.registered.iter_mut().find(|(key, _)| *key == ty) {
            Some(entry) => entry.1 = converter,
            None => self.registered.push((ty, converter)),
        }
        self.resolved.get_mut().clear();
        self
    }

    /// 注册自定义集合类型（`CollectionKind::Custom`）的构造方式
    pub fn register_collection<F>(&mut self, ty: TypeKey, construct: F) -> &mut Self
    where
        F: Fn(Vec<Value>) -> Value + Send + Sync + 'static,
    {
        self.collections
            .insert(ty.clone(), CollectionAdapter::new(ty, construct));
        self
    }

    pub fn collection_adapter(&self, ty: &TypeKey) -> Option<&CollectionAdapter> {
        self.collections.get(ty)
    }

    /// 已缓存的解析结果数量
    pub fn cached(&self) -> usize {
        self.resolved.read().len()
    }

    /// 查找目标类型的转换器
    pub fn lookup(&self, target: &TypeDescriptor) -> Result<Arc<dyn Converter>, ConvertError> {
        if let Some((_, converter)) = self.registered.iter().find(|(key, _)| key == target.key()) {
            return Ok(Arc::clone(converter));
        }
        if let Some(converter) = self.resolved.read().get(target.key()) {
            return Ok(Arc::clone(converter));
        }

        let converter = self.resolve(target)?;

        let mut resolved = self.resolved.write();
        let converter = resolved
            .entry(target.key().clone())
            .or_insert(converter);
        tracing::debug!("Resolved converter for {}: {}", target.key(), converter.name());
        Ok(Arc::clone(converter))
    }

    fn resolve(&self, target: &TypeDescriptor) -> Result<Arc<dyn Converter>, ConvertError> {
        if let TypeKind::Array(element) = target.kind() {
            if element.is_primitive() {
                return Err(ConvertError::CannotConvertPrimitive {
                    ty: element.key().clone(),
                });
            }
            let inner = self.lookup(element)?;
            return Ok(Arc::new(ArrayConverter {
                element: element.as_ref().clone(),
                inner,
            }));
        }
        self.closest(target).ok_or_else(|| ConvertError::NoConverter {
            ty: target.key().clone(),
        })
    }

    fn closest(&self, target: &TypeDescriptor) -> Option<Arc<dyn Converter>> {
        let mut best: Option<(usize, &Arc<dyn Converter>)> = None;

        for (key, converter) in &self.registered {
            let distance = self
                .hierarchy
                .key_distance(key, target.key())
                .or_else(|| {
                    converter
                        .can_construct_subtypes()
                        .then(|| self.hierarchy.distance(target, key))
                        .flatten()
                });

            if let Some(distance) = distance {
                if best.map_or(true, |(current, _)| distance < current) {
                    best = Some((distance, converter));
                }
            }
        }

        best.map(|(_, converter)| Arc::clone(converter))
    }

    /// 启动时检查目标类型能否转换
    pub fn ensure_convertible(&self, target: &TypeDescriptor) -> Result<(), ConvertError> {
        match target.kind() {
            TypeKind::Collection { .. } | TypeKind::Map { .. } => Err(ConvertError::NotConvertible {
                ty: target.key().clone(),
            }),
            _ => self.lookup(target).map(|_| ()),
        }
    }

    pub fn convert_str(&self, target: &TypeDescriptor, raw: &str) -> Result<Value, ConvertError> {
        self.convert(target, Value::str(raw))
    }

    /// 把原始值转换为目标类型
    ///
    /// - 目标是数组：多值逐个转换，单值转换为单元素数组
    /// - 目标不是数组而原始值是数组：取第一个元素（递归），空数组视为空字符串
    /// - 原始值为 `Null`：基本类型取零值，其余为 `Null`
    pub fn convert(&self, target: &TypeDescriptor, raw: Value) -> Result<Value, ConvertError> {
        match target.kind() {
            TypeKind::Collection { .. } | TypeKind::Map { .. } => Err(ConvertError::NotConvertible {
                ty: target.key().clone(),
            }),
            TypeKind::Array(element) => {
                let converter = self.lookup(target)?;
                match raw {
                    Value::Null => Ok(Value::Null),
                    Value::Array(items) | Value::Collection { items, .. } => items
                        .into_iter()
                        .map(|item| self.convert(element, item))
                        .collect::<Result<Vec<_>, _>>()
                        .map(Value::Array),
                    scalar => converter.convert(target, &scalar.to_string()),
                }
            }
            _ => match raw {
                Value::Null => Ok(null_value(target)),
                Value::Array(items) | Value::Collection { items, .. } => {
                    let first = items.into_iter().next().unwrap_or_else(|| Value::str(""));
                    self.convert(target, first)
                }
                Value::Str(text) => self.lookup(target)?.convert(target, &text),
                other => self.lookup(target)?.convert(target, &other.to_string()),
            },
        }
    }
}

impl fmt::Debug for ConversionService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let registered: Vec<&str> = self.registered.iter().map(|(k, _)| k.name()).collect();
        f.debug_struct("ConversionService")
            .field("registered", &registered)
            .field("collections", &self.collections.len())
            .field("cached", &self.cached())
            .finish()
    }
}

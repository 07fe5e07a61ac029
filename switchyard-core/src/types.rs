//! 类型元数据
//!
//! 运行时没有反射，所有"类型"信息都在注册阶段显式描述：
//!
//! - [`TypeKey`] 类型标识（名称），可廉价克隆，可作为 Map 的键
//! - [`TypeDescriptor`] 类型描述：标识 + 形态（基本类型、装箱类型、枚举、数组、集合……）
//! - [`TypeHierarchy`] 类型继承图，用于计算"最近可赋值类型"的距离
//!
//! Rust 类型与描述的对应关系：`i32` 是基本类型，`Option<i32>` 是其装箱形式，
//! `Vec<T>` / `HashSet<T>` / `BTreeSet<T>` / `VecDeque<T>` 是集合，`Box<[T]>` 是数组。

use std::borrow::Cow;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, LinkedList, VecDeque};
use std::fmt;
use std::sync::Arc;

/// 类型标识
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeKey(Cow<'static, str>);

impl TypeKey {
    /// 使用静态名称创建
    pub const fn from_static(name: &'static str) -> Self {
        Self(Cow::Borrowed(name))
    }

    /// 使用任意名称创建
    pub fn named(name: impl Into<String>) -> Self {
        Self(Cow::Owned(name.into()))
    }

    /// Rust 类型对应的标识
    pub fn of<T: ?Sized + 'static>() -> Self {
        Self(Cow::Borrowed(std::any::type_name::<T>()))
    }

    pub fn name(&self) -> &str {
        &self.0
    }

    /// 去掉模块路径后的简短名称，例如 `app::UserController` -> `UserController`
    pub fn simple_name(&self) -> &str {
        let name = self.name();
        let head = name.split('<').next().unwrap_or(name);
        match head.rfind("::") {
            Some(pos) => &name[pos + 2..],
            None => name,
        }
    }
}

impl fmt::Debug for TypeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TypeKey({})", self.0)
    }
}

impl fmt::Display for TypeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&'static str> for TypeKey {
    fn from(name: &'static str) -> Self {
        Self::from_static(name)
    }
}

/// 预定义的抽象类型，作为隐式继承边的终点
pub mod well_known {
    use super::TypeKey;

    /// 所有非基本类型的根
    pub const OBJECT: TypeKey = TypeKey::from_static("Object");
    /// 所有装箱数值类型的父类型
    pub const NUMBER: TypeKey = TypeKey::from_static("Number");
    /// 所有枚举的父类型
    pub const ENUM: TypeKey = TypeKey::from_static("Enum");
    /// 字符串的父类型
    pub const CHAR_SEQUENCE: TypeKey = TypeKey::from_static("CharSequence");
}

/// 基本类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Primitive {
    Bool,
    Char,
    I8,
    I16,
    I32,
    I64,
    U8,
    U16,
    U32,
    U64,
    F32,
    F64,
}

impl Primitive {
    pub fn is_numeric(self) -> bool {
        !matches!(self, Primitive::Bool | Primitive::Char)
    }

    pub fn is_float(self) -> bool {
        matches!(self, Primitive::F32 | Primitive::F64)
    }

    /// 基本类型本身的标识
    pub fn type_key(self) -> TypeKey {
        match self {
            Primitive::Bool => TypeKey::of::<bool>(),
            Primitive::Char => TypeKey::of::<char>(),
            Primitive::I8 => TypeKey::of::<i8>(),
            Primitive::I16 => TypeKey::of::<i16>(),
            Primitive::I32 => TypeKey::of::<i32>(),
            Primitive::I64 => TypeKey::of::<i64>(),
            Primitive::U8 => TypeKey::of::<u8>(),
            Primitive::U16 => TypeKey::of::<u16>(),
            Primitive::U32 => TypeKey::of::<u32>(),
            Primitive::U64 => TypeKey::of::<u64>(),
            Primitive::F32 => TypeKey::of::<f32>(),
            Primitive::F64 => TypeKey::of::<f64>(),
        }
    }

    /// 装箱形式（`Option<T>`）的标识
    pub fn boxed_key(self) -> TypeKey {
        match self {
            Primitive::Bool => TypeKey::of::<Option<bool>>(),
            Primitive::Char => TypeKey::of::<Option<char>>(),
            Primitive::I8 => TypeKey::of::<Option<i8>>(),
            Primitive::I16 => TypeKey::of::<Option<i16>>(),
            Primitive::I32 => TypeKey::of::<Option<i32>>(),
            Primitive::I64 => TypeKey::of::<Option<i64>>(),
            Primitive::U8 => TypeKey::of::<Option<u8>>(),
            Primitive::U16 => TypeKey::of::<Option<u16>>(),
            Primitive::U32 => TypeKey::of::<Option<u32>>(),
            Primitive::U64 => TypeKey::of::<Option<u64>>(),
            Primitive::F32 => TypeKey::of::<Option<f32>>(),
            Primitive::F64 => TypeKey::of::<Option<f64>>(),
        }
    }

    pub const ALL: [Primitive; 12] = [
        Primitive::Bool,
        Primitive::Char,
        Primitive::I8,
        Primitive::I16,
        Primitive::I32,
        Primitive::I64,
        Primitive::U8,
        Primitive::U16,
        Primitive::U32,
        Primitive::U64,
        Primitive::F32,
        Primitive::F64,
    ];
}

/// 集合形态
///
/// 前六个是抽象接口，声明参数时可以使用，构造时会被替换为最合适的具体实现；
/// `Custom` 由注册的适配器构造（接受任意集合作为构造参数）。
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CollectionKind {
    Collection,
    List,
    Set,
    SortedSet,
    Queue,
    Deque,
    ArrayList,
    LinkedList,
    HashSet,
    LinkedHashSet,
    TreeSet,
    ArrayDeque,
    Custom(TypeKey),
}

impl CollectionKind {
    pub fn is_abstract(&self) -> bool {
        matches!(
            self,
            CollectionKind::Collection
                | CollectionKind::List
                | CollectionKind::Set
                | CollectionKind::SortedSet
                | CollectionKind::Queue
                | CollectionKind::Deque
        )
    }

    /// 抽象接口对应的具体实现
    pub fn concrete(&self) -> CollectionKind {
        match self {
            CollectionKind::Collection | CollectionKind::List => CollectionKind::ArrayList,
            CollectionKind::Set => CollectionKind::HashSet,
            CollectionKind::SortedSet => CollectionKind::TreeSet,
            CollectionKind::Queue | CollectionKind::Deque => CollectionKind::ArrayDeque,
            other => other.clone(),
        }
    }

    /// 元素是否唯一
    pub fn is_unique(&self) -> bool {
        matches!(
            self.concrete(),
            CollectionKind::HashSet | CollectionKind::LinkedHashSet | CollectionKind::TreeSet
        )
    }

    /// 元素是否有序（按自然顺序）
    pub fn is_sorted(&self) -> bool {
        matches!(self.concrete(), CollectionKind::TreeSet)
    }

    pub fn name(&self) -> &str {
        match self {
            CollectionKind::Collection => "Collection",
            CollectionKind::List => "List",
            CollectionKind::Set => "Set",
            CollectionKind::SortedSet => "SortedSet",
            CollectionKind::Queue => "Queue",
            CollectionKind::Deque => "Deque",
            CollectionKind::ArrayList => "ArrayList",
            CollectionKind::LinkedList => "LinkedList",
            CollectionKind::HashSet => "HashSet",
            CollectionKind::LinkedHashSet => "LinkedHashSet",
            CollectionKind::TreeSet => "TreeSet",
            CollectionKind::ArrayDeque => "ArrayDeque",
            CollectionKind::Custom(key) => key.name(),
        }
    }
}

/// 类型形态
#[derive(Debug, Clone, PartialEq)]
pub enum TypeKind {
    Primitive(Primitive),
    Boxed(Primitive),
    String,
    Enum(Arc<[String]>),
    Array(Box<TypeDescriptor>),
    Collection {
        kind: CollectionKind,
        element: Box<TypeDescriptor>,
    },
    Map {
        key: Box<TypeDescriptor>,
        value: Box<TypeDescriptor>,
    },
    Object,
}

/// 类型描述
#[derive(Debug, Clone, PartialEq)]
pub struct TypeDescriptor {
    key: TypeKey,
    kind: TypeKind,
}

impl TypeDescriptor {
    pub fn new(key: TypeKey, kind: TypeKind) -> Self {
        Self { key, kind }
    }

    pub fn primitive(primitive: Primitive) -> Self {
        Self::new(primitive.type_key(), TypeKind::Primitive(primitive))
    }

    pub fn boxed(primitive: Primitive) -> Self {
        Self::new(primitive.boxed_key(), TypeKind::Boxed(primitive))
    }

    pub fn string() -> Self {
        Self::new(TypeKey::of::<String>(), TypeKind::String)
    }

    /// 枚举类型，`variants` 为全部可选值
    pub fn enumeration<I, S>(key: TypeKey, variants: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let variants: Vec<String> = variants.into_iter().map(Into::into).collect();
        Self::new(key, TypeKind::Enum(variants.into()))
    }

    pub fn array_of(element: TypeDescriptor) -> Self {
        let key = TypeKey::named(format!("[{}]", element.key));
        Self::new(key, TypeKind::Array(Box::new(element)))
    }

    pub fn collection(kind: CollectionKind, element: TypeDescriptor) -> Self {
        let key = TypeKey::named(format!("{}<{}>", kind.name(), element.key));
        Self::new(
            key,
            TypeKind::Collection {
                kind,
                element: Box::new(element),
            },
        )
    }

    pub fn map(key: TypeDescriptor, value: TypeDescriptor) -> Self {
        let type_key = TypeKey::named(format!("Map<{}, {}>", key.key, value.key));
        Self::new(
            type_key,
            TypeKind::Map {
                key: Box::new(key),
                value: Box::new(value),
            },
        )
    }

    /// 普通对象类型（由容器或自定义转换器提供）
    pub fn object(key: TypeKey) -> Self {
        Self::new(key, TypeKind::Object)
    }

    pub fn of<T: Described>() -> Self {
        T::descriptor()
    }

    /// 替换类型标识，保留形态
    pub fn with_key(mut self, key: TypeKey) -> Self {
        self.key = key;
        self
    }

    pub fn key(&self) -> &TypeKey {
        &self.key
    }

    pub fn kind(&self) -> &TypeKind {
        &self.kind
    }

    pub fn is_primitive(&self) -> bool {
        matches!(self.kind, TypeKind::Primitive(_))
    }

    pub fn is_array(&self) -> bool {
        matches!(self.kind, TypeKind::Array(_))
    }

    pub fn is_collection(&self) -> bool {
        matches!(self.kind, TypeKind::Collection { .. })
    }

    pub fn is_map(&self) -> bool {
        matches!(self.kind, TypeKind::Map { .. })
    }

    /// 数组或集合的元素类型
    pub fn element(&self) -> Option<&TypeDescriptor> {
        match &self.kind {
            TypeKind::Array(element) => Some(element),
            TypeKind::Collection { element, .. } => Some(element),
            _ => None,
        }
    }

    /// 由形态推导出的隐式父类型
    fn implicit_parents(&self) -> Vec<TypeKey> {
        match &self.kind {
            TypeKind::Primitive(_) => Vec::new(),
            TypeKind::Boxed(p) if p.is_numeric() => vec![well_known::NUMBER],
            TypeKind::String => vec![well_known::CHAR_SEQUENCE],
            TypeKind::Enum(_) => vec![well_known::ENUM],
            _ => Vec::new(),
        }
    }
}

impl fmt::Display for TypeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.key, f)
    }
}

/// 可以描述自身类型的 Rust 类型
pub trait Described {
    fn descriptor() -> TypeDescriptor;
}

macro_rules! described_primitive {
    ($($ty:ty => $p:ident),* $(,)?) => {
        $(
            impl Described for $ty {
                fn descriptor() -> TypeDescriptor {
                    TypeDescriptor::primitive(Primitive::$p)
                }
            }

            impl Described for Option<$ty> {
                fn descriptor() -> TypeDescriptor {
                    TypeDescriptor::boxed(Primitive::$p)
                }
            }
        )*
    };
}

described_primitive! {
    bool => Bool,
    char => Char,
    i8 => I8,
    i16 => I16,
    i32 => I32,
    i64 => I64,
    u8 => U8,
    u16 => U16,
    u32 => U32,
    u64 => U64,
    f32 => F32,
    f64 => F64,
}

impl Described for String {
    fn descriptor() -> TypeDescriptor {
        TypeDescriptor::string()
    }
}

impl Described for Option<String> {
    fn descriptor() -> TypeDescriptor {
        TypeDescriptor::string()
    }
}

macro_rules! described_collection {
    ($($ty:ident => $kind:ident),* $(,)?) => {
        $(
            impl<T: Described + 'static> Described for $ty<T> {
                fn descriptor() -> TypeDescriptor {
                    TypeDescriptor::collection(CollectionKind::$kind, T::descriptor())
                        .with_key(TypeKey::of::<Self>())
                }
            }
        )*
    };
}

described_collection! {
    Vec => ArrayList,
    LinkedList => LinkedList,
    HashSet => HashSet,
    BTreeSet => TreeSet,
    VecDeque => ArrayDeque,
}

impl<T: Described + 'static> Described for Box<[T]> {
    fn descriptor() -> TypeDescriptor {
        TypeDescriptor::array_of(T::descriptor()).with_key(TypeKey::of::<Self>())
    }
}

impl<K: Described + 'static, V: Described + 'static> Described for HashMap<K, V> {
    fn descriptor() -> TypeDescriptor {
        TypeDescriptor::map(K::descriptor(), V::descriptor()).with_key(TypeKey::of::<Self>())
    }
}

impl<K: Described + 'static, V: Described + 'static> Described for BTreeMap<K, V> {
    fn descriptor() -> TypeDescriptor {
        TypeDescriptor::map(K::descriptor(), V::descriptor()).with_key(TypeKey::of::<Self>())
    }
}

/// 类型继承图
///
/// 启动阶段注册显式的父类型边，之后只读。隐式边：
/// 装箱数值 -> `Number`，字符串 -> `CharSequence`，枚举 -> `Enum`，
/// 其余非基本类型在没有声明父类型时 -> `Object`。
#[derive(Debug, Clone)]
pub struct TypeHierarchy {
    parents: HashMap<TypeKey, Vec<TypeKey>>,
}

impl TypeHierarchy {
    pub fn new() -> Self {
        let mut parents = HashMap::new();
        for key in [
            well_known::NUMBER,
            well_known::ENUM,
            well_known::CHAR_SEQUENCE,
        ] {
            parents.insert(key, vec![well_known::OBJECT]);
        }
        Self { parents }
    }

    /// 声明 `ty` 的直接父类型（父类和接口），按声明顺序
    pub fn declare<I>(&mut self, ty: TypeKey, supertypes: I) -> &mut Self
    where
        I: IntoIterator<Item = TypeKey>,
    {
        let entry = self.parents.entry(ty).or_default();
        for supertype in supertypes {
            if !entry.contains(&supertype) {
                entry.push(supertype);
            }
        }
        self
    }

    /// 某个描述的直接父类型（显式声明优先，其次是隐式边）
    pub fn parents_of(&self, descriptor: &TypeDescriptor) -> Vec<TypeKey> {
        let mut result: Vec<TypeKey> = self
            .parents
            .get(descriptor.key())
            .cloned()
            .unwrap_or_default();
        for implicit in descriptor.implicit_parents() {
            if !result.contains(&implicit) {
                result.push(implicit);
            }
        }
        if result.is_empty() && !descriptor.is_primitive() && *descriptor.key() != well_known::OBJECT {
            result.push(well_known::OBJECT);
        }
        result
    }

    fn parents_of_key(&self, key: &TypeKey) -> Vec<TypeKey> {
        match self.parents.get(key) {
            Some(parents) if !parents.is_empty() => parents.clone(),
            _ if *key == well_known::OBJECT => Vec::new(),
            _ => vec![well_known::OBJECT],
        }
    }

    /// 从 `from` 向上走到 `to` 的最少步数；不可达返回 `None`
    pub fn distance(&self, from: &TypeDescriptor, to: &TypeKey) -> Option<usize> {
        if from.key() == to {
            return Some(0);
        }
        self.walk(self.parents_of(from))
            .into_iter()
            .find(|(key, _)| key == to)
            .map(|(_, depth)| depth)
    }

    /// 只知道两端标识时的距离（只使用显式边）
    pub fn key_distance(&self, from: &TypeKey, to: &TypeKey) -> Option<usize> {
        if from == to {
            return Some(0);
        }
        self.walk(self.parents_of_key(from))
            .into_iter()
            .find(|(key, _)| key == to)
            .map(|(_, depth)| depth)
    }

    /// `from` 的值能否赋给 `to`
    pub fn is_assignable(&self, from: &TypeDescriptor, to: &TypeKey) -> bool {
        self.distance(from, to).is_some()
    }

    /// 全部祖先类型，按距离由近到远（广度优先）
    pub fn ancestors(&self, descriptor: &TypeDescriptor) -> Vec<TypeKey> {
        self.walk(self.parents_of(descriptor))
            .into_iter()
            .map(|(key, _)| key)
            .collect()
    }

    /// 只知道标识时的祖先类型（只使用显式边）
    pub fn ancestors_of_key(&self, key: &TypeKey) -> Vec<TypeKey> {
        self.walk(self.parents_of_key(key))
            .into_iter()
            .map(|(key, _)| key)
            .collect()
    }

    fn walk(&self, start: Vec<TypeKey>) -> Vec<(TypeKey, usize)> {
        let mut visited: HashSet<TypeKey> = HashSet::new();
        let mut queue: VecDeque<(TypeKey, usize)> = start.into_iter().map(|k| (k, 1)).collect();
        let mut order = Vec::new();

        while let Some((key, depth)) = queue.pop_front() {
            if !visited.insert(key.clone()) {
                continue;
            }
            for parent in self.parents_of_key(&key) {
                if !visited.contains(&parent) {
                    queue.push_back((parent, depth + 1));
                }
            }
            order.push((key, depth));
        }

        order
    }
}

impl Default for TypeHierarchy {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simple_name() {
        assert_eq!(TypeKey::from_static("app::web::UserController").simple_name(), "UserController");
        assert_eq!(TypeKey::of::<String>().simple_name(), "String");
        assert_eq!(TypeKey::from_static("Plain").simple_name(), "Plain");
    }

    #[test]
    fn test_described_mapping() {
        assert!(TypeDescriptor::of::<i32>().is_primitive());
        assert_eq!(
            TypeDescriptor::of::<Option<i32>>().kind(),
            &TypeKind::Boxed(Primitive::I32)
        );

        let list = TypeDescriptor::of::<Vec<String>>();
        match list.kind() {
            TypeKind::Collection { kind, element } => {
                assert_eq!(kind, &CollectionKind::ArrayList);
                assert_eq!(element.kind(), &TypeKind::String);
            }
            other => panic!("unexpected kind {:?}", other),
        }
        assert_eq!(list.key(), &TypeKey::of::<Vec<String>>());
    }

    #[test]
    fn test_abstract_collection_resolution() {
        assert_eq!(CollectionKind::List.concrete(), CollectionKind::ArrayList);
        assert_eq!(CollectionKind::SortedSet.concrete(), CollectionKind::TreeSet);
        assert_eq!(CollectionKind::Queue.concrete(), CollectionKind::ArrayDeque);
        assert!(CollectionKind::Set.is_unique());
        assert!(!CollectionKind::Deque.is_unique());
        assert!(CollectionKind::SortedSet.is_sorted());
    }

    #[test]
    fn test_implicit_distances() {
        let hierarchy = TypeHierarchy::new();
        let boxed = TypeDescriptor::boxed(Primitive::I32);
        assert_eq!(hierarchy.distance(&boxed, boxed.key()), Some(0));
        assert_eq!(hierarchy.distance(&boxed, &well_known::NUMBER), Some(1));
        assert_eq!(hierarchy.distance(&boxed, &well_known::OBJECT), Some(2));

        let color = TypeDescriptor::enumeration(TypeKey::from_static("Color"), ["RED", "GREEN"]);
        assert_eq!(hierarchy.distance(&color, &well_known::ENUM), Some(1));

        // 基本类型不参与继承
        let primitive = TypeDescriptor::primitive(Primitive::I32);
        assert_eq!(hierarchy.distance(&primitive, &well_known::NUMBER), None);
    }

    #[test]
    fn test_explicit_hierarchy_breadth_first() {
        let mut hierarchy = TypeHierarchy::new();
        hierarchy
            .declare("Admin".into(), ["User".into(), "Auditable".into()])
            .declare("User".into(), ["Principal".into()]);

        let admin = TypeDescriptor::object("Admin".into());
        assert_eq!(
            hierarchy.ancestors(&admin),
            vec![
                TypeKey::from("User"),
                TypeKey::from("Auditable"),
                TypeKey::from("Principal"),
                well_known::OBJECT,
            ]
        );
        assert_eq!(hierarchy.distance(&admin, &"Principal".into()), Some(2));
        assert!(!hierarchy.is_assignable(&admin, &"Unrelated".into()));
    }
}

//! 参数抓取
//!
//! 处理器的每个形参在启动时声明为一个 [`Parameter`]，由 [`FetcherFactory`]
//! 按固定优先级选出取值来源：
//!
//! 查询参数 > 路径变量 > 请求头 > 会话属性 > 请求属性 > 拦截器槽位 > 容器（按类型，可带限定名）
//!
//! 集合与 Map 类型的查询参数由专门的抓取器处理。
//! 必需的值缺失且没有默认值时返回 [`WebError::MissingParameter`]。

use std::fmt;
use std::sync::Arc;

use switchyard_core::{CollectionKind, Container, TypeDescriptor, TypeKey, TypeKind, Value};

use crate::convert::{null_value, CollectionAdapter, ConversionService};
use crate::error::WebError;
use crate::mapping::RouteMapping;
use crate::request::RequestContext;

/// 值来源
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParameterSource {
    Query,
    Path,
    Header,
    Session,
    RequestAttribute,
    InterceptSlot,
    Container,
}

impl fmt::Display for ParameterSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ParameterSource::Query => "query",
            ParameterSource::Path => "path",
            ParameterSource::Header => "header",
            ParameterSource::Session => "session",
            ParameterSource::RequestAttribute => "request attribute",
            ParameterSource::InterceptSlot => "intercept slot",
            ParameterSource::Container => "container",
        };
        f.write_str(name)
    }
}

/// 解析后的绑定方式
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Binding {
    Query(String),
    PathVariable(String),
    Header(String),
    Session(String),
    RequestAttribute(String),
    InterceptSlot,
    Container { qualifier: Option<String> },
}

impl Binding {
    pub fn source(&self) -> ParameterSource {
        match self {
            Binding::Query(_) => ParameterSource::Query,
            Binding::PathVariable(_) => ParameterSource::Path,
            Binding::Header(_) => ParameterSource::Header,
            Binding::Session(_) => ParameterSource::Session,
            Binding::RequestAttribute(_) => ParameterSource::RequestAttribute,
            Binding::InterceptSlot => ParameterSource::InterceptSlot,
            Binding::Container { .. } => ParameterSource::Container,
        }
    }
}

/// 形参声明
///
/// ```ignore
/// Parameter::of::<Option<i32>>("page").query("page").default_value("1")
/// Parameter::of::<String>("id").path("id")
/// Parameter::bean::<UserRepository>("repo").qualifier("primary")
/// ```
#[derive(Debug, Clone)]
pub struct Parameter {
    name: String,
    ty: TypeDescriptor,
    query: Option<String>,
    path: Option<String>,
    header: Option<String>,
    session: Option<String>,
    attribute: Option<String>,
    intercept: bool,
    qualifier: Option<String>,
    default: Option<String>,
    required: bool,
}

impl Parameter {
    pub fn new(name: impl Into<String>, ty: TypeDescriptor) -> Self {
        Self {
            name: name.into(),
            ty,
            query: None,
            path: None,
            header: None,
            session: None,
            attribute: None,
            intercept: false,
            qualifier: None,
            default: None,
            required: true,
        }
    }

    pub fn of<T: switchyard_core::Described>(name: impl Into<String>) -> Self {
        Self::new(name, T::descriptor())
    }

    /// 由容器按类型提供的参数
    pub fn bean<T: ?Sized + 'static>(name: impl Into<String>) -> Self {
        Self::new(name, TypeDescriptor::object(TypeKey::of::<T>()))
    }

    pub fn query(mut self, name: impl Into<String>) -> Self {
        self.query = Some(name.into());
        self
    }

    pub fn path(mut self, name: impl Into<String>) -> Self {
        self.path = Some(name.into());
        self
    }

    pub fn header(mut self, name: impl Into<String>) -> Self {
        self.header = Some(name.into());
        self
    }

    pub fn session(mut self, name: impl Into<String>) -> Self {
        self.session = Some(name.into());
        self
    }

    pub fn attribute(mut self, name: impl Into<String>) -> Self {
        self.attribute = Some(name.into());
        self
    }

    /// 由拦截器填充的槽位，抓取时为占位值
    pub fn intercept(mut self) -> Self {
        self.intercept = true;
        self
    }

    pub fn qualifier(mut self, name: impl Into<String>) -> Self {
        self.qualifier = Some(name.into());
        self
    }

    /// 缺失时使用的默认值；集合为逗号分隔，Map 为 `k=v,k=v`
    pub fn default_value(mut self, value: impl Into<String>) -> Self {
        self.default = Some(value.into());
        self
    }

    /// 缺失时不报错（取 null / 零值 / 空集合）
    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn ty(&self) -> &TypeDescriptor {
        &self.ty
    }

    pub fn is_required(&self) -> bool {
        self.required
    }

    pub fn binding(&self) -> Binding {
        if let Some(name) = &self.query {
            Binding::Query(name.clone())
        } else if let Some(name) = &self.path {
            Binding::PathVariable(name.clone())
        } else if let Some(name) = &self.header {
            Binding::Header(name.clone())
        } else if let Some(name) = &self.session {
            Binding::Session(name.clone())
        } else if let Some(name) = &self.attribute {
            Binding::RequestAttribute(name.clone())
        } else if self.intercept {
            Binding::InterceptSlot
        } else {
            Binding::Container {
                qualifier: self.qualifier.clone(),
            }
        }
    }
}

/// 参数抓取器
pub trait ArgumentFetcher: Send + Sync + fmt::Debug {
    fn fetch(&self, ctx: &RequestContext) -> Result<Value, WebError>;

    fn source(&self) -> ParameterSource;
}

/// 多值来源：查询参数或请求头
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MultiValued {
    Query,
    Header,
}

impl MultiValued {
    fn values<'a>(&self, ctx: &'a RequestContext, name: &str) -> Vec<&'a str> {
        match self {
            MultiValued::Query => ctx.query_params(name),
            MultiValued::Header => ctx.header_values(name),
        }
    }

    fn source(&self) -> ParameterSource {
        match self {
            MultiValued::Query => ParameterSource::Query,
            MultiValued::Header => ParameterSource::Header,
        }
    }
}

fn split_default(default: &str) -> Vec<Value> {
    default
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(Value::str)
        .collect()
}

fn missing(name: &str, kind: ParameterSource) -> WebError {
    WebError::MissingParameter {
        name: name.to_string(),
        kind,
    }
}

/// 标量或数组参数
#[derive(Debug)]
struct ScalarFetcher {
    from: MultiValued,
    name: String,
    target: TypeDescriptor,
    default: Option<String>,
    required: bool,
    conversion: Arc<ConversionService>,
}

impl ArgumentFetcher for ScalarFetcher {
    fn fetch(&self, ctx: &RequestContext) -> Result<Value, WebError> {
        let values = self.from.values(ctx, &self.name);
        let raw = if values.is_empty() {
            match &self.default {
                Some(default) if self.target.is_array() => Value::Array(split_default(default)),
                Some(default) => Value::str(default.as_str()),
                None if self.required => return Err(missing(&self.name, self.source())),
                None => Value::Null,
            }
        } else if self.target.is_array() {
            Value::Array(values.into_iter().map(Value::str).collect())
        } else {
            Value::str(values[0])
        };

        Ok(self.conversion.convert(&self.target, raw)?)
    }

    fn source(&self) -> ParameterSource {
        self.from.source()
    }
}

/// 集合参数：收集全部同名值，逐个转换元素
#[derive(Debug)]
struct CollectionFetcher {
    from: MultiValued,
    name: String,
    kind: CollectionKind,
    element: TypeDescriptor,
    default: Option<String>,
    required: bool,
    conversion: Arc<ConversionService>,
    /// `Custom` 集合的构造方式
    adapter: Option<CollectionAdapter>,
}

impl ArgumentFetcher for CollectionFetcher {
    fn fetch(&self, ctx: &RequestContext) -> Result<Value, WebError> {
        let values = self.from.values(ctx, &self.name);
        let raw: Vec<Value> = if values.is_empty() {
            match &self.default {
                Some(default) => split_default(default),
                None if self.required => return Err(missing(&self.name, self.source())),
                None => Vec::new(),
            }
        } else {
            values.into_iter().map(Value::str).collect()
        };

        let items = raw
            .into_iter()
            .map(|item| self.conversion.convert(&self.element, item))
            .collect::<Result<Vec<_>, _>>()?;
        match &self.adapter {
            Some(adapter) => Ok(adapter.construct(items)),
            None => Ok(Value::collection(self.kind.clone(), items)),
        }
    }

    fn source(&self) -> ParameterSource {
        self.from.source()
    }
}

/// Map 参数：`name:key=value` 或 `name[key]=value`
#[derive(Debug)]
struct MapFetcher {
    name: String,
    key: TypeDescriptor,
    value: TypeDescriptor,
    default: Option<String>,
    required: bool,
    conversion: Arc<ConversionService>,
}

impl MapFetcher {
    fn entry_key<'a>(&self, query_name: &'a str) -> Option<&'a str> {
        let rest = query_name.strip_prefix(self.name.as_str())?;
        rest.strip_prefix(':')
            .or_else(|| rest.strip_prefix('[').and_then(|r| r.strip_suffix(']')))
    }

    fn insert(&self, entries: &mut Vec<(Value, Value)>, key: &str, value: &str) -> Result<(), WebError> {
        let key = self.conversion.convert_str(&self.key, key)?;
        let value = self.conversion.convert_str(&self.value, value)?;
        Value::map_insert(entries, key, value);
        Ok(())
    }
}

impl ArgumentFetcher for MapFetcher {
    fn fetch(&self, ctx: &RequestContext) -> Result<Value, WebError> {
        let mut entries = Vec::new();
        for (name, value) in ctx.query_pairs() {
            if let Some(key) = self.entry_key(name) {
                self.insert(&mut entries, key, value)?;
            }
        }

        if entries.is_empty() {
            match &self.default {
                Some(default) => {
                    for pair in default.split(',').filter(|p| !p.trim().is_empty()) {
                        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
                        self.insert(&mut entries, key.trim(), value.trim())?;
                    }
                }
                None if self.required => return Err(missing(&self.name, ParameterSource::Query)),
                None => {}
            }
        }

        Ok(Value::Map(entries))
    }

    fn source(&self) -> ParameterSource {
        ParameterSource::Query
    }
}

#[derive(Debug)]
struct PathVariableFetcher {
    name: String,
    target: TypeDescriptor,
    conversion: Arc<ConversionService>,
}

impl ArgumentFetcher for PathVariableFetcher {
    fn fetch(&self, ctx: &RequestContext) -> Result<Value, WebError> {
        let raw = ctx
            .path_variable(&self.name)
            .ok_or_else(|| missing(&self.name, ParameterSource::Path))?;
        Ok(self.conversion.convert(&self.target, Value::Str(raw))?)
    }

    fn source(&self) -> ParameterSource {
        ParameterSource::Path
    }
}

/// 会话属性或请求属性：字符串按目标类型转换，其他值原样传递
#[derive(Debug)]
struct AttributeFetcher {
    session: bool,
    name: String,
    target: TypeDescriptor,
    conversion: Arc<ConversionService>,
}

impl ArgumentFetcher for AttributeFetcher {
    fn fetch(&self, ctx: &RequestContext) -> Result<Value, WebError> {
        let value = if self.session {
            ctx.session().and_then(|s| s.get(&self.name))
        } else {
            ctx.attribute(&self.name)
        };

        match value {
            None | Some(Value::Null) => Ok(null_value(&self.target)),
            Some(Value::Str(text)) if is_text_convertible(&self.target) => {
                Ok(self.conversion.convert(&self.target, Value::Str(text))?)
            }
            Some(other) => Ok(other),
        }
    }

    fn source(&self) -> ParameterSource {
        if self.session {
            ParameterSource::Session
        } else {
            ParameterSource::RequestAttribute
        }
    }
}

fn is_text_convertible(target: &TypeDescriptor) -> bool {
    matches!(
        target.kind(),
        TypeKind::Primitive(_) | TypeKind::Boxed(_) | TypeKind::Enum(_) | TypeKind::Array(_)
    )
}

/// 拦截器槽位：抓取时为空，由拦截器通过 `set_named_arg` 填充
#[derive(Debug)]
struct InterceptSlotFetcher;

impl ArgumentFetcher for InterceptSlotFetcher {
    fn fetch(&self, _ctx: &RequestContext) -> Result<Value, WebError> {
        Ok(Value::Null)
    }

    fn source(&self) -> ParameterSource {
        ParameterSource::InterceptSlot
    }
}

struct ContainerFetcher {
    ty: TypeKey,
    qualifier: Option<String>,
    container: Arc<dyn Container>,
}

impl fmt::Debug for ContainerFetcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContainerFetcher")
            .field("ty", &self.ty)
            .field("qualifier", &self.qualifier)
            .finish()
    }
}

impl ArgumentFetcher for ContainerFetcher {
    fn fetch(&self, _ctx: &RequestContext) -> Result<Value, WebError> {
        let bean = self.container.resolve(&self.ty, self.qualifier.as_deref())?;
        Ok(Value::Object(bean))
    }

    fn source(&self) -> ParameterSource {
        ParameterSource::Container
    }
}

/// 抓取器工厂
#[derive(Clone)]
pub struct FetcherFactory {
    conversion: Arc<ConversionService>,
    container: Arc<dyn Container>,
}

impl FetcherFactory {
    pub fn new(conversion: Arc<ConversionService>, container: Arc<dyn Container>) -> Self {
        Self {
            conversion,
            container,
        }
    }

    pub fn conversion(&self) -> &Arc<ConversionService> {
        &self.conversion
    }

    /// 为一个形参创建抓取器，同时做启动期检查（路径变量是否声明、类型能否转换）
    pub fn create(
        &self,
        parameter: &Parameter,
        mapping: &RouteMapping,
    ) -> Result<Box<dyn ArgumentFetcher>, WebError> {
        let ty = parameter.ty().clone();
        let conversion = Arc::clone(&self.conversion);

        let fetcher: Box<dyn ArgumentFetcher> = match parameter.binding() {
            Binding::Query(name) => self.multi_valued(parameter, MultiValued::Query, name)?,
            Binding::Header(name) => self.multi_valued(parameter, MultiValued::Header, name)?,
            Binding::PathVariable(name) => {
                if !mapping.declares_variable(&name) {
                    return Err(WebError::Configuration(format!(
                        "Parameter '{}' binds path variable '{}' which is not declared by {}",
                        parameter.name(),
                        name,
                        mapping
                    )));
                }
                self.check(parameter, &ty)?;
                Box::new(PathVariableFetcher {
                    name,
                    target: ty,
                    conversion,
                })
            }
            Binding::Session(name) => Box::new(AttributeFetcher {
                session: true,
                name,
                target: ty,
                conversion,
            }),
            Binding::RequestAttribute(name) => Box::new(AttributeFetcher {
                session: false,
                name,
                target: ty,
                conversion,
            }),
            Binding::InterceptSlot => Box::new(InterceptSlotFetcher),
            Binding::Container { qualifier } => Box::new(ContainerFetcher {
                ty: ty.key().clone(),
                qualifier,
                container: Arc::clone(&self.container),
            }),
        };

        Ok(fetcher)
    }

    fn multi_valued(
        &self,
        parameter: &Parameter,
        from: MultiValued,
        name: String,
    ) -> Result<Box<dyn ArgumentFetcher>, WebError> {
        let conversion = Arc::clone(&self.conversion);
        let default = parameter.default.clone();
        let required = parameter.is_required();

        match parameter.ty().kind() {
            TypeKind::Collection { kind, element } => {
                self.check(parameter, element)?;
                let adapter = match kind {
                    CollectionKind::Custom(ty) => Some(
                        self.conversion
                            .collection_adapter(ty)
                            .cloned()
                            .ok_or_else(|| {
                                WebError::Configuration(format!(
                                    "Parameter '{}': no collection adapter registered for '{}'",
                                    parameter.name(),
                                    ty
                                ))
                            })?,
                    ),
                    _ => None,
                };
                Ok(Box::new(CollectionFetcher {
                    from,
                    name,
                    kind: kind.clone(),
                    element: element.as_ref().clone(),
                    default,
                    required,
                    conversion,
                    adapter,
                }))
            }
            TypeKind::Map { key, value } if from == MultiValued::Query => {
                self.check(parameter, key)?;
                self.check(parameter, value)?;
                Ok(Box::new(MapFetcher {
                    name,
                    key: key.as_ref().clone(),
                    value: value.as_ref().clone(),
                    default,
                    required,
                    conversion,
                }))
            }
            _ => {
                self.check(parameter, parameter.ty())?;
                Ok(Box::new(ScalarFetcher {
                    from,
                    name,
                    target: parameter.ty().clone(),
                    default,
                    required,
                    conversion,
                }))
            }
        }
    }

    fn check(&self, parameter: &Parameter, target: &TypeDescriptor) -> Result<(), WebError> {
        self.conversion.ensure_convertible(target).map_err(|e| {
            WebError::Configuration(format!("Parameter '{}': {}", parameter.name(), e))
        })
    }
}

impl fmt::Debug for FetcherFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FetcherFactory")
            .field("conversion", &self.conversion)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::{HashMap, HashSet, VecDeque};

    use http::Method;
    use switchyard_core::{ApplicationContext, FromValue, TypeHierarchy};

    use super::*;
    use crate::request::{PathBindings, Session};

    fn factory() -> FetcherFactory {
        let conversion = Arc::new(ConversionService::new(Arc::new(TypeHierarchy::new())));
        FetcherFactory::new(conversion, Arc::new(ApplicationContext::new()))
    }

    fn mapping() -> RouteMapping {
        RouteMapping::get("/items/{id}").build().unwrap()
    }

    fn fetch(parameter: Parameter, uri: &str) -> Result<Value, WebError> {
        let ctx = RequestContext::new(Method::GET, uri);
        factory().create(&parameter, &mapping())?.fetch(&ctx)
    }

    #[test]
    fn test_binding_priority() {
        let both = Parameter::of::<String>("id").path("id").query("id");
        assert_eq!(both.binding(), Binding::Query("id".into()));

        let header_and_session = Parameter::of::<String>("x").session("x").header("x");
        assert_eq!(header_and_session.binding().source(), ParameterSource::Header);

        let plain = Parameter::bean::<String>("repo").qualifier("primary");
        assert_eq!(
            plain.binding(),
            Binding::Container {
                qualifier: Some("primary".into())
            }
        );
    }

    #[test]
    fn test_collections_from_repeated_params() {
        let uri = "/items/1?var=a&var=b&var=c";

        let list: Vec<String> =
            FromValue::from_value(fetch(Parameter::of::<Vec<String>>("var").query("var"), uri).unwrap())
                .unwrap();
        assert_eq!(list, vec!["a", "b", "c"]);

        let set: HashSet<String> = FromValue::from_value(
            fetch(Parameter::of::<HashSet<String>>("var").query("var"), uri).unwrap(),
        )
        .unwrap();
        assert_eq!(set, HashSet::from(["a".into(), "b".into(), "c".into()]));

        let deque: VecDeque<String> = FromValue::from_value(
            fetch(Parameter::of::<VecDeque<String>>("var").query("var"), uri).unwrap(),
        )
        .unwrap();
        assert_eq!(deque.len(), 3);
        assert_eq!(deque.back().map(String::as_str), Some("c"));
    }

    #[test]
    fn test_abstract_collection_kind_uses_concrete_type() {
        let ty = TypeDescriptor::collection(CollectionKind::Set, TypeDescriptor::of::<i32>());
        let value = fetch(Parameter::new("n", ty).query("n"), "/items/1?n=3&n=1&n=3").unwrap();
        match value {
            Value::Collection { kind, items } => {
                assert_eq!(kind, CollectionKind::HashSet);
                assert_eq!(items, vec![Value::Int(3), Value::Int(1)]);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_custom_collection_built_by_registered_adapter() {
        let bag = TypeKey::from_static("Bag");
        let ty = TypeDescriptor::collection(CollectionKind::Custom(bag.clone()), TypeDescriptor::of::<String>());
        let parameter = Parameter::new("v", ty).query("v");

        let mut conversion = ConversionService::new(Arc::new(TypeHierarchy::new()));
        conversion.register_collection(bag, |items| {
            let mut entries = Vec::new();
            Value::map_insert(&mut entries, Value::str("size"), Value::Int(items.len() as i64));
            Value::map_insert(&mut entries, Value::str("items"), Value::Array(items));
            Value::Map(entries)
        });
        let factory = FetcherFactory::new(Arc::new(conversion), Arc::new(ApplicationContext::new()));

        let ctx = RequestContext::new(Method::GET, "/items/1?v=a&v=b");
        let value = factory.create(&parameter, &mapping()).unwrap().fetch(&ctx).unwrap();
        assert_eq!(value.map_get("size"), Some(&Value::Int(2)));
        assert_eq!(
            value.map_get("items"),
            Some(&Value::Array(vec![Value::str("a"), Value::str("b")]))
        );

        let err = self::factory().create(&parameter, &mapping()).unwrap_err();
        assert!(matches!(err, WebError::Configuration(ref m) if m.contains("Bag")));
    }

    #[test]
    fn test_collection_default_and_missing() {
        let with_default = Parameter::of::<Vec<i32>>("ids").query("ids").default_value("1, 2,3");
        let value = fetch(with_default, "/items/1").unwrap();
        assert_eq!(Vec::<i32>::from_value(value).unwrap(), vec![1, 2, 3]);

        let required = Parameter::of::<Vec<i32>>("ids").query("ids");
        assert!(matches!(
            fetch(required, "/items/1"),
            Err(WebError::MissingParameter { kind: ParameterSource::Query, .. })
        ));

        let optional = Parameter::of::<Vec<i32>>("ids").query("ids").optional();
        assert_eq!(Vec::<i32>::from_value(fetch(optional, "/items/1").unwrap()).unwrap(), Vec::<i32>::new());
    }

    #[test]
    fn test_map_encodings_and_default() {
        let param = Parameter::of::<HashMap<String, i32>>("var").query("var");
        let value = fetch(param.clone(), "/items/1?var[x]=1&var:y=2&other=3").unwrap();
        let map = HashMap::<String, i32>::from_value(value).unwrap();
        assert_eq!(map.len(), 2);
        assert_eq!(map["x"], 1);
        assert_eq!(map["y"], 2);

        let defaulted = fetch(param.clone().default_value("a=5,b=6"), "/items/1").unwrap();
        assert_eq!(defaulted.map_get("b"), Some(&Value::Int(6)));

        assert!(matches!(
            fetch(param, "/items/1"),
            Err(WebError::MissingParameter { .. })
        ));
    }

    #[test]
    fn test_scalar_query_required_optional_default() {
        let page = Parameter::of::<i32>("page").query("page");
        assert_eq!(fetch(page.clone(), "/items/1?page=4").unwrap(), Value::Int(4));
        assert!(matches!(
            fetch(page.clone(), "/items/1"),
            Err(WebError::MissingParameter { .. })
        ));
        assert_eq!(fetch(page.clone().optional(), "/items/1").unwrap(), Value::Int(0));
        assert_eq!(fetch(page.default_value("9"), "/items/1").unwrap(), Value::Int(9));
    }

    #[test]
    fn test_path_variable_fetch_and_validation() {
        let factory = factory();
        let mapping = mapping();

        let fetcher = factory
            .create(&Parameter::of::<i64>("id").path("id"), &mapping)
            .unwrap();
        let ctx = RequestContext::new(Method::GET, "/items/77");
        let _scope = ctx.push_bindings(PathBindings::from([("id".to_string(), "77".to_string())]));
        assert_eq!(fetcher.fetch(&ctx).unwrap(), Value::Int(77));

        let err = factory
            .create(&Parameter::of::<i64>("other").path("other"), &mapping)
            .unwrap_err();
        assert!(matches!(err, WebError::Configuration(_)));
    }

    #[test]
    fn test_array_of_primitive_rejected_at_startup() {
        let err = factory()
            .create(&Parameter::of::<Box<[i32]>>("ids").query("ids"), &mapping())
            .unwrap_err();
        assert!(err.to_string().contains("array of primitive"));
    }

    #[test]
    fn test_header_session_and_attribute_sources() {
        let session = Arc::new(Session::new("s"));
        session.set("count", "12");
        let ctx = RequestContext::builder(Method::GET, "/items/1")
            .header("X-Token", "abc")
            .session(session)
            .attribute("tenant", "acme")
            .build();
        let factory = factory();
        let mapping = mapping();

        let header = factory
            .create(&Parameter::of::<String>("token").header("x-token"), &mapping)
            .unwrap();
        assert_eq!(header.fetch(&ctx).unwrap(), Value::str("abc"));

        let count = factory
            .create(&Parameter::of::<i32>("count").session("count"), &mapping)
            .unwrap();
        assert_eq!(count.fetch(&ctx).unwrap(), Value::Int(12));

        let tenant = factory
            .create(&Parameter::of::<String>("tenant").attribute("tenant"), &mapping)
            .unwrap();
        assert_eq!(tenant.fetch(&ctx).unwrap(), Value::str("acme"));

        let absent = factory
            .create(&Parameter::of::<i32>("missing").attribute("missing"), &mapping)
            .unwrap();
        assert_eq!(absent.fetch(&ctx).unwrap(), Value::Int(0));
    }

    struct Repository;

    #[test]
    fn test_container_fallback() {
        let context = Arc::new(ApplicationContext::new());
        context.register_named("main", Repository).unwrap();
        let conversion = Arc::new(ConversionService::new(Arc::new(TypeHierarchy::new())));
        let factory = FetcherFactory::new(conversion, context);

        let fetcher = factory
            .create(&Parameter::bean::<Repository>("repo").qualifier("main"), &mapping())
            .unwrap();
        let value = fetcher.fetch(&RequestContext::new(Method::GET, "/items/1")).unwrap();
        assert!(value.downcast::<Repository>().is_some());

        let unknown = factory
            .create(&Parameter::bean::<Repository>("repo").qualifier("other"), &mapping())
            .unwrap();
        assert!(matches!(
            unknown.fetch(&RequestContext::new(Method::GET, "/items/1")),
            Err(WebError::Container(_))
        ));
    }
}

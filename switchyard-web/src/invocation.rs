//! 处理器调用
//!
//! - [`HandlerMethod`] 启动时声明的处理器方法：路由、形参、结果处理方式、目标函数
//! - [`Invocation`] 编译后的方法：路由映射 + 参数抓取器，之后只读
//! - [`MatchResult`] / [`best`] 候选方法的匹配结果与择优规则
//! - [`InvocationRegistry`] 每个方法只构建一次

use std::any::Any;
use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use http::StatusCode;
use parking_lot::RwLock;
use thiserror::Error;

use switchyard_aop::MethodKey;
use switchyard_core::{Arguments, CallResult, ThrownError, TypeKey};

use crate::error::WebError;
use crate::fetcher::{ArgumentFetcher, FetcherFactory, Parameter};
use crate::mapping::{PathMatch, RouteMapping, RouteMappingBuilder};
use crate::outcome::Outcome;
use crate::request::{PathBindings, RequestContext};

/// 类型擦除后的目标函数：控制器实例、请求上下文、实参
pub type HandlerFn =
    dyn Fn(&(dyn Any + Send + Sync), &RequestContext, Arguments) -> CallResult + Send + Sync;

/// 控制器实例类型与处理器声明不一致
#[derive(Debug, Error)]
#[error("Handler target is not a '{expected}'")]
pub struct TargetMismatch {
    expected: &'static str,
}

/// 处理器方法声明
///
/// ```ignore
/// HandlerMethod::new("show", RouteMapping::get("/users/{id}"), |c: &UserController, args| {
///     let id: i64 = args.value(0)?;
///     c.show(id)
/// })
/// .param(Parameter::of::<i64>("id").path("id"))
/// .write()
/// ```
#[derive(Clone)]
pub struct HandlerMethod {
    name: Cow<'static, str>,
    mapping: RouteMappingBuilder,
    parameters: Vec<Parameter>,
    outcomes: Vec<Outcome>,
    default_view: Option<String>,
    function: Arc<HandlerFn>,
}

impl HandlerMethod {
    pub fn new<C, F>(name: impl Into<Cow<'static, str>>, mapping: RouteMappingBuilder, function: F) -> Self
    where
        C: Any + Send + Sync,
        F: Fn(&C, Arguments) -> CallResult + Send + Sync + 'static,
    {
        Self::with_request(name, mapping, move |target: &C, _ctx: &RequestContext, args| {
            function(target, args)
        })
    }

    /// 目标函数需要访问请求上下文（写响应、嵌套调度等）
    pub fn with_request<C, F>(
        name: impl Into<Cow<'static, str>>,
        mapping: RouteMappingBuilder,
        function: F,
    ) -> Self
    where
        C: Any + Send + Sync,
        F: Fn(&C, &RequestContext, Arguments) -> CallResult + Send + Sync + 'static,
    {
        let erased = move |target: &(dyn Any + Send + Sync), ctx: &RequestContext, args: Arguments| {
            match target.downcast_ref::<C>() {
                Some(target) => function(target, ctx, args),
                None => Err(ThrownError::new(TargetMismatch {
                    expected: std::any::type_name::<C>(),
                })),
            }
        };

        Self {
            name: name.into(),
            mapping,
            parameters: Vec::new(),
            outcomes: Vec::new(),
            default_view: None,
            function: Arc::new(erased),
        }
    }

    pub fn param(mut self, parameter: Parameter) -> Self {
        self.parameters.push(parameter);
        self
    }

    /// 渲染视图，视图名可以包含 `{0}`
    pub fn view(mut self, name: impl Into<String>) -> Self {
        self.outcomes.push(Outcome::View(Some(name.into())));
        self
    }

    /// 返回值即视图名
    pub fn view_from_result(mut self) -> Self {
        self.outcomes.push(Outcome::View(None));
        self
    }

    pub fn write(mut self) -> Self {
        self.outcomes.push(Outcome::Write);
        self
    }

    /// 重定向，目标可以包含 `{0}`
    pub fn redirect(mut self, target: impl Into<String>) -> Self {
        self.outcomes.push(Outcome::Redirect(Some(target.into())));
        self
    }

    /// 返回值即重定向目标
    pub fn redirect_to_result(mut self) -> Self {
        self.outcomes.push(Outcome::Redirect(None));
        self
    }

    pub fn status(mut self, code: StatusCode) -> Self {
        self.outcomes.push(Outcome::Status { code, message: None });
        self
    }

    pub fn status_with_message(mut self, code: StatusCode, message: impl Into<String>) -> Self {
        self.outcomes.push(Outcome::Status {
            code,
            message: Some(message.into()),
        });
        self
    }

    pub fn default_view(mut self, name: impl Into<String>) -> Self {
        self.default_view = Some(name.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn parameters(&self) -> &[Parameter] {
        &self.parameters
    }
}

impl fmt::Debug for HandlerMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerMethod")
            .field("name", &self.name)
            .field("mapping", &self.mapping)
            .field("parameters", &self.parameters.len())
            .field("outcomes", &self.outcomes)
            .finish()
    }
}

/// 一次匹配的结果
#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    path_match: PathMatch,
    confidence: u32,
    default_view: Option<String>,
}

impl MatchResult {
    pub fn path_match(&self) -> &PathMatch {
        &self.path_match
    }

    pub fn group_count(&self) -> usize {
        self.path_match.group_count()
    }

    pub fn confidence(&self) -> u32 {
        self.confidence
    }

    pub fn default_view(&self) -> Option<&str> {
        self.default_view.as_deref()
    }

    pub fn bindings(&self) -> PathBindings {
        self.path_match.bindings()
    }

    /// 是否严格优于 `other`：捕获组多者胜，其次置信度高者胜
    pub fn beats(&self, other: &MatchResult) -> bool {
        match self.group_count().cmp(&other.group_count()) {
            std::cmp::Ordering::Greater => true,
            std::cmp::Ordering::Less => false,
            std::cmp::Ordering::Equal => self.confidence > other.confidence,
        }
    }
}

/// 两个候选中更好的一个；相同时保留先出现的 `current`
pub fn best<T>(current: Option<(T, MatchResult)>, candidate: Option<(T, MatchResult)>) -> Option<(T, MatchResult)> {
    match (current, candidate) {
        (Some(current), Some(candidate)) => {
            if candidate.1.beats(&current.1) {
                Some(candidate)
            } else {
                Some(current)
            }
        }
        (current, None) => current,
        (None, candidate) => candidate,
    }
}

/// 编译后的处理器方法
pub struct Invocation {
    method: MethodKey,
    mapping: RouteMapping,
    fetchers: Vec<Box<dyn ArgumentFetcher>>,
    arg_names: Arc<[String]>,
    outcomes: Vec<Outcome>,
    default_view: Option<String>,
    function: Arc<HandlerFn>,
}

impl Invocation {
    /// 编译路由、创建参数抓取器；声明错误在这里暴露
    pub fn build(owner: &TypeKey, method: &HandlerMethod, factory: &FetcherFactory) -> Result<Self, WebError> {
        let key = MethodKey::new(owner.clone(), method.name.clone());
        let mapping = method.mapping.clone().build()?;

        let fetchers = method
            .parameters
            .iter()
            .map(|p| factory.create(p, &mapping))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| match e {
                WebError::Configuration(message) => {
                    WebError::Configuration(format!("{}: {}", key.signature(), message))
                }
                other => other,
            })?;
        let arg_names: Arc<[String]> = method
            .parameters
            .iter()
            .map(|p| p.name().to_string())
            .collect();

        let mut outcomes = method.outcomes.clone();
        Outcome::sort(&mut outcomes);

        tracing::debug!("Mapped {} -> {}", mapping, key.signature());

        Ok(Self {
            method: key,
            mapping,
            fetchers,
            arg_names,
            outcomes,
            default_view: method.default_view.clone(),
            function: Arc::clone(&method.function),
        })
    }

    pub fn method(&self) -> &MethodKey {
        &self.method
    }

    pub fn mapping(&self) -> &RouteMapping {
        &self.mapping
    }

    pub fn arg_names(&self) -> Arc<[String]> {
        Arc::clone(&self.arg_names)
    }

    pub fn outcomes(&self) -> &[Outcome] {
        &self.outcomes
    }

    pub fn default_view(&self) -> Option<&str> {
        self.default_view.as_deref()
    }

    /// 测试请求，`path` 为去掉调度器前缀后的路径
    pub fn test(&self, ctx: &RequestContext, path: &str) -> Option<MatchResult> {
        let (path_match, confidence) = self.mapping.test(ctx, path)?;
        Some(MatchResult {
            path_match,
            confidence,
            default_view: self.default_view.clone(),
        })
    }

    /// 依次抓取全部实参
    pub fn fetch_arguments(&self, ctx: &RequestContext) -> Result<Arguments, WebError> {
        let mut values = Vec::with_capacity(self.fetchers.len());
        for (fetcher, name) in self.fetchers.iter().zip(self.arg_names.iter()) {
            match fetcher.fetch(ctx) {
                Ok(value) => values.push(value),
                Err(e @ WebError::MissingParameter { .. }) => {
                    tracing::warn!("{} for {}", e, self.method.signature());
                    return Err(e);
                }
                Err(e) => {
                    tracing::debug!("Failed to fetch '{}' for {}: {}", name, self.method.signature(), e);
                    return Err(e);
                }
            }
        }
        Ok(Arguments::new(values))
    }

    /// 直接调用目标函数（不经过拦截链）
    pub fn call(&self, target: &(dyn Any + Send + Sync), ctx: &RequestContext, args: Arguments) -> CallResult {
        (self.function)(target, ctx, args)
    }
}

impl fmt::Debug for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Invocation")
            .field("method", &self.method)
            .field("mapping", &self.mapping.to_string())
            .field("fetchers", &self.fetchers)
            .field("outcomes", &self.outcomes)
            .finish()
    }
}

/// 处理器方法注册表
///
/// 同一方法只构建一次：先读锁查找，未命中时持写锁再查一次后构建。
#[derive(Default)]
pub struct InvocationRegistry {
    invocations: RwLock<HashMap<MethodKey, Arc<Invocation>>>,
}

impl InvocationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, method: &MethodKey) -> Option<Arc<Invocation>> {
        self.invocations.read().get(method).cloned()
    }

    pub fn get_or_build<F>(&self, method: &MethodKey, build: F) -> Result<Arc<Invocation>, WebError>
    where
        F: FnOnce() -> Result<Invocation, WebError>,
    {
        if let Some(invocation) = self.invocations.read().get(method) {
            return Ok(Arc::clone(invocation));
        }

        let mut invocations = self.invocations.write();
        if let Some(invocation) = invocations.get(method) {
            return Ok(Arc::clone(invocation));
        }

        let invocation = Arc::new(build()?);
        tracing::debug!("Cached invocation for {}", method.signature());
        invocations.insert(method.clone(), Arc::clone(&invocation));
        Ok(invocation)
    }

    pub fn len(&self) -> usize {
        self.invocations.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.invocations.read().is_empty()
    }
}

impl fmt::Debug for InvocationRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InvocationRegistry")
            .field("invocations", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use http::Method;
    use switchyard_core::{ApplicationContext, TypeHierarchy, Value};

    use super::*;
    use crate::convert::ConversionService;
    use crate::mapping::RouteMapping;

    struct Controller {
        greeting: String,
    }

    fn factory() -> FetcherFactory {
        let conversion = Arc::new(ConversionService::new(Arc::new(TypeHierarchy::new())));
        FetcherFactory::new(conversion, Arc::new(ApplicationContext::new()))
    }

    fn build(method: HandlerMethod) -> Invocation {
        Invocation::build(&TypeKey::of::<Controller>(), &method, &factory()).unwrap()
    }

    #[test]
    fn test_best_prefers_more_groups_over_confidence() {
        let simple = build(
            HandlerMethod::new("simple", RouteMapping::get("/simple").header("x-test"), |_: &Controller, _| {
                Ok(Value::Null)
            }),
        );
        let variable = build(HandlerMethod::new(
            "variable",
            RouteMapping::builder().path("/match-{var}"),
            |_: &Controller, _| Ok(Value::Null),
        ));

        let a = RequestContext::builder(Method::GET, "/simple")
            .header("x-test", "1")
            .build();
        let a_match = simple.test(&a, "/simple").unwrap();
        assert_eq!((a_match.group_count(), a_match.confidence()), (0, 2));

        let b = RequestContext::new(Method::GET, "/match-x");
        let b_match = variable.test(&b, "/match-x").unwrap();
        assert_eq!((b_match.group_count(), b_match.confidence()), (1, 0));

        let winner = best(Some(("A", a_match.clone())), Some(("B", b_match.clone()))).unwrap();
        assert_eq!(winner.0, "B");
        let winner = best(Some(("B", b_match)), Some(("A", a_match))).unwrap();
        assert_eq!(winner.0, "B");
    }

    #[test]
    fn test_best_ties_keep_first_and_null_loses() {
        let invocation = build(HandlerMethod::new(
            "any",
            RouteMapping::builder().path("/x"),
            |_: &Controller, _| Ok(Value::Null),
        ));
        let ctx = RequestContext::new(Method::GET, "/x");
        let m = invocation.test(&ctx, "/x").unwrap();

        assert_eq!(best(Some((1, m.clone())), Some((2, m.clone()))).unwrap().0, 1);
        assert_eq!(best(None, Some((2, m.clone()))).unwrap().0, 2);
        assert_eq!(best(Some((1, m)), None).unwrap().0, 1);
        assert!(best::<i32>(None, None).is_none());
    }

    #[test]
    fn test_fetch_and_call() {
        let invocation = build(
            HandlerMethod::new("greet", RouteMapping::get("/greet/{name}"), |c: &Controller, args| {
                let name: String = args.value(0)?;
                Ok(Value::str(format!("{} {}", c.greeting, name)))
            })
            .param(Parameter::of::<String>("name").path("name"))
            .write(),
        );
        let ctx = RequestContext::new(Method::GET, "/greet/Ann");
        let m = invocation.test(&ctx, "/greet/Ann").unwrap();
        let _scope = ctx.push_bindings(m.bindings());

        let args = invocation.fetch_arguments(&ctx).unwrap();
        let target = Controller {
            greeting: "Hello".into(),
        };
        let result = invocation.call(&target, &ctx, args).unwrap();
        assert_eq!(result, Value::str("Hello Ann"));
        assert_eq!(&*invocation.arg_names(), &["name".to_string()]);
    }

    #[test]
    fn test_wrong_target_type() {
        let invocation = build(HandlerMethod::new(
            "noop",
            RouteMapping::builder().path("/"),
            |_: &Controller, _| Ok(Value::Null),
        ));
        let ctx = RequestContext::new(Method::GET, "/");
        let err = invocation.call(&42_u32, &ctx, Arguments::default()).unwrap_err();
        assert!(err.is::<TargetMismatch>());
    }

    #[test]
    fn test_unknown_path_variable_names_method() {
        let method = HandlerMethod::new("broken", RouteMapping::get("/a"), |_: &Controller, _| {
            Ok(Value::Null)
        })
        .param(Parameter::of::<String>("id").path("id"));
        let err = Invocation::build(&TypeKey::of::<Controller>(), &method, &factory()).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("Controller::broken"), "{}", message);
        assert!(message.contains("'id'"), "{}", message);
    }

    #[test]
    fn test_registry_builds_once() {
        let registry = InvocationRegistry::new();
        let builds = AtomicUsize::new(0);
        let key = MethodKey::of::<Controller>("noop");
        let method = HandlerMethod::new("noop", RouteMapping::builder().path("/"), |_: &Controller, _| {
            Ok(Value::Null)
        });

        for _ in 0..3 {
            registry
                .get_or_build(&key, || {
                    builds.fetch_add(1, Ordering::SeqCst);
                    Invocation::build(&TypeKey::of::<Controller>(), &method, &factory())
                })
                .unwrap();
        }
        assert_eq!(builds.load(Ordering::SeqCst), 1);
        assert_eq!(registry.len(), 1);
        assert!(registry.get(&key).is_some());
    }
}

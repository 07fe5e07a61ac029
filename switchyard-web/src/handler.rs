//! 控制器
//!
//! [`ControllerDefinition`] 在启动时声明一个控制器实例及其处理器方法；
//! [`ControllerHandler`] 是编译后的形式，负责在自己的方法中挑出最匹配的一个。

use std::any::Any;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use switchyard_aop::MethodKey;
use switchyard_core::TypeKey;

use crate::error::WebError;
use crate::fetcher::FetcherFactory;
use crate::invocation::{best, HandlerMethod, Invocation, InvocationRegistry, MatchResult};
use crate::request::RequestContext;

/// 控制器声明
///
/// ```ignore
/// ControllerDefinition::new(UserController::default())
///     .method(HandlerMethod::new("list", RouteMapping::get("/users"), |c: &UserController, _| c.list()).write())
/// ```
pub struct ControllerDefinition {
    ty: TypeKey,
    instance: Arc<dyn Any + Send + Sync>,
    methods: Vec<HandlerMethod>,
}

impl ControllerDefinition {
    pub fn new<C: Any + Send + Sync>(instance: C) -> Self {
        Self::from_arc(Arc::new(instance))
    }

    /// 使用已共享的实例，例如从容器取出的 bean
    pub fn from_arc<C: Any + Send + Sync>(instance: Arc<C>) -> Self {
        Self {
            ty: TypeKey::of::<C>(),
            instance,
            methods: Vec::new(),
        }
    }

    pub fn method(mut self, method: HandlerMethod) -> Self {
        self.methods.push(method);
        self
    }

    pub fn type_key(&self) -> &TypeKey {
        &self.ty
    }

    pub fn methods(&self) -> &[HandlerMethod] {
        &self.methods
    }
}

impl fmt::Debug for ControllerDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ControllerDefinition")
            .field("type", &self.ty)
            .field("methods", &self.methods)
            .finish()
    }
}

/// 编译后的控制器
pub struct ControllerHandler {
    ty: TypeKey,
    instance: Arc<dyn Any + Send + Sync>,
    invocations: Vec<Arc<Invocation>>,
}

impl ControllerHandler {
    /// 编译全部处理器方法；同一控制器内方法名不能重复
    pub fn build(
        definition: ControllerDefinition,
        factory: &FetcherFactory,
        registry: &InvocationRegistry,
    ) -> Result<Self, WebError> {
        let ControllerDefinition { ty, instance, methods } = definition;

        let mut seen = HashSet::new();
        let mut invocations = Vec::with_capacity(methods.len());
        for method in &methods {
            if !seen.insert(method.name().to_string()) {
                return Err(WebError::Configuration(format!(
                    "Duplicate handler method '{}' on {}",
                    method.name(),
                    ty.simple_name()
                )));
            }
            let key = MethodKey::new(ty.clone(), method.name().to_string());
            let invocation = registry.get_or_build(&key, || Invocation::build(&ty, method, factory))?;
            invocations.push(invocation);
        }

        tracing::debug!(
            "Registered controller {} with {} handler method(s)",
            ty.simple_name(),
            invocations.len()
        );
        Ok(Self {
            ty,
            instance,
            invocations,
        })
    }

    pub fn type_key(&self) -> &TypeKey {
        &self.ty
    }

    pub fn target(&self) -> &(dyn Any + Send + Sync) {
        self.instance.as_ref()
    }

    pub fn invocations(&self) -> &[Arc<Invocation>] {
        &self.invocations
    }

    /// 本控制器中最匹配的方法
    pub fn find(&self, ctx: &RequestContext, path: &str) -> Option<(&Invocation, MatchResult)> {
        self.invocations.iter().fold(None, |current, invocation| {
            let candidate = invocation.test(ctx, path).map(|m| (invocation.as_ref(), m));
            best(current, candidate)
        })
    }
}

impl fmt::Debug for ControllerHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let methods: Vec<&str> = self.invocations.iter().map(|i| i.method().name()).collect();
        f.debug_struct("ControllerHandler")
            .field("type", &self.ty)
            .field("methods", &methods)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use http::Method;
    use switchyard_core::{ApplicationContext, TypeHierarchy, Value};

    use super::*;
    use crate::convert::ConversionService;
    use crate::mapping::RouteMapping;

    struct Pages;

    fn factory() -> FetcherFactory {
        let conversion = Arc::new(ConversionService::new(Arc::new(TypeHierarchy::new())));
        FetcherFactory::new(conversion, Arc::new(ApplicationContext::new()))
    }

    fn pages() -> ControllerDefinition {
        ControllerDefinition::new(Pages)
            .method(HandlerMethod::new(
                "any",
                RouteMapping::builder().path("/page-{id}"),
                |_: &Pages, _| Ok(Value::str("any")),
            ))
            .method(HandlerMethod::new(
                "get",
                RouteMapping::get("/page-{id}"),
                |_: &Pages, _| Ok(Value::str("get")),
            ))
            .method(HandlerMethod::new(
                "index",
                RouteMapping::get("/{section}/{id}"),
                |_: &Pages, _| Ok(Value::str("index")),
            ))
    }

    #[test]
    fn test_find_prefers_confidence_among_equal_groups() {
        let handler = ControllerHandler::build(pages(), &factory(), &InvocationRegistry::new()).unwrap();

        let ctx = RequestContext::new(Method::GET, "/page-3");
        let (invocation, matched) = handler.find(&ctx, "/page-3").unwrap();
        assert_eq!(invocation.method().name(), "get");
        assert_eq!(matched.confidence(), 1);

        let ctx = RequestContext::new(Method::DELETE, "/page-3");
        let (invocation, _) = handler.find(&ctx, "/page-3").unwrap();
        assert_eq!(invocation.method().name(), "any");

        let ctx = RequestContext::new(Method::GET, "/docs/7");
        let (invocation, matched) = handler.find(&ctx, "/docs/7").unwrap();
        assert_eq!(invocation.method().name(), "index");
        assert_eq!(matched.bindings().get("section").map(String::as_str), Some("docs"));

        assert!(handler.find(&RequestContext::new(Method::GET, "/"), "/").is_none());
    }

    #[test]
    fn test_duplicate_method_name_is_rejected() {
        let definition = ControllerDefinition::new(Pages)
            .method(HandlerMethod::new("a", RouteMapping::get("/x"), |_: &Pages, _| Ok(Value::Null)))
            .method(HandlerMethod::new("a", RouteMapping::get("/y"), |_: &Pages, _| Ok(Value::Null)));
        let err = ControllerHandler::build(definition, &factory(), &InvocationRegistry::new()).unwrap_err();
        assert!(matches!(err, WebError::Configuration(_)));
    }
}

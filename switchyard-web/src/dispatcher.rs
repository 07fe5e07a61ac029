//! 请求调度
//!
//! 每个请求的处理流程：
//!
//! 1. 路由：在全部控制器中选出最匹配的处理器方法，没有则 404
//! 2. 绑定路径变量（压栈，调用结束后弹出）
//! 3. 抓取参数，经过拦截链调用目标方法
//! 4. 结果映射；目标方法抛出的异常交给异常处理器
//!
//! [`DispatcherRouter`] 按 URL 前缀把请求分给不同的 [`Dispatcher`]，最长前缀优先。

use std::cell::Cell;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use switchyard_aop::{InterceptorChainFactory, InterceptorDeclarations, MethodKey};
use switchyard_core::{
    ApplicationContext, Arguments, Container, Environment, Handled, ThrownError, TypeHierarchy,
    TypeKey,
};

use crate::constants::{DISPATCHER_ERROR_DETAILS, DISPATCHER_PREFIX};
use crate::convert::ConversionService;
use crate::error::{ErrorResponse, WebError};
use crate::exception_handler::{ExceptionHandler, ExceptionHandlerRegistry};
use crate::fetcher::FetcherFactory;
use crate::handler::{ControllerDefinition, ControllerHandler};
use crate::invocation::{best, Invocation, InvocationRegistry, MatchResult};
use crate::outcome;
use crate::request::RequestContext;
use crate::view::ViewRenderer;

/// 规范化前缀：以 `/` 开头、不以 `/` 结尾；根前缀为空串
fn normalize_prefix(prefix: &str) -> String {
    let trimmed = prefix.trim().trim_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("/{}", trimmed)
    }
}

/// 去掉前缀后的路径；前缀必须落在路径段边界上
fn strip_prefix<'a>(prefix: &str, path: &'a str) -> Option<&'a str> {
    let rest = path.strip_prefix(prefix)?;
    if rest.is_empty() {
        Some("/")
    } else if rest.starts_with('/') {
        Some(rest)
    } else {
        None
    }
}

/// 把错误写成 JSON 错误响应，覆盖已写入的内容
fn write_error(ctx: &RequestContext, error: &WebError, expose_details: bool) {
    let body = ErrorResponse::from_error(error, ctx.path(), expose_details);
    let mut response = ctx.response();
    response.reset();
    response.set_status(body.status_code());
    response.default_content_type("application/json");
    response.write(&body.to_json());
}

/// 调度器
pub struct Dispatcher {
    prefix: String,
    handlers: Vec<ControllerHandler>,
    invocations: InvocationRegistry,
    chains: InterceptorChainFactory,
    exception_handlers: ExceptionHandlerRegistry,
    views: Option<Arc<dyn ViewRenderer>>,
    error_details: bool,
}

impl Dispatcher {
    pub fn builder() -> DispatcherBuilder {
        DispatcherBuilder::new()
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn handlers(&self) -> &[ControllerHandler] {
        &self.handlers
    }

    pub fn invocation(&self, method: &MethodKey) -> Option<Arc<Invocation>> {
        self.invocations.get(method)
    }

    /// 请求路径相对于本调度器的部分；不在前缀下时返回 `None`
    pub fn relative_path<'a>(&self, path: &'a str) -> Option<&'a str> {
        strip_prefix(&self.prefix, path)
    }

    /// 在全部控制器中选出最匹配的方法；完全相同时先注册的优先
    pub fn select(&self, ctx: &RequestContext, path: &str) -> Option<(&ControllerHandler, &Invocation, MatchResult)> {
        let selected = self.handlers.iter().fold(None, |current, handler| {
            let candidate = handler
                .find(ctx, path)
                .map(|(invocation, matched)| ((handler, invocation), matched));
            best(current, candidate)
        });
        selected.map(|((handler, invocation), matched)| (handler, invocation, matched))
    }

    /// 调度一个请求
    ///
    /// 异常处理器已处理的异常视为成功，返回 `Ok(())`。
    pub fn dispatch(self: &Arc<Self>, ctx: &RequestContext) -> Result<(), WebError> {
        ctx.attach_dispatcher(self);

        let Some(path) = self.relative_path(ctx.path()) else {
            return Err(WebError::NotFound {
                method: ctx.method().clone(),
                path: ctx.path().to_string(),
            });
        };

        match self.run(ctx, path) {
            Err(WebError::Handled(_)) => Ok(()),
            Err(e @ WebError::Handler(_)) => {
                tracing::error!("❌ Unhandled error for {} {}: {}", ctx.method(), ctx.path(), e);
                Err(e)
            }
            other => other,
        }
    }

    /// 在同一请求中嵌套调度 `path`（相对于本调度器前缀）
    ///
    /// 嵌套调用中异常被处理时返回 [`WebError::Handled`]，外层处理器应原样向上传递。
    pub fn include(&self, ctx: &RequestContext, path: &str) -> Result<(), WebError> {
        tracing::debug!("Including {} (depth {})", path, ctx.binding_depth());
        self.run(ctx, path)
    }

    /// 调度并把错误写成响应
    pub fn service(self: &Arc<Self>, ctx: &RequestContext) {
        if let Err(error) = self.dispatch(ctx) {
            write_error(ctx, &error, self.error_details);
        }
    }

    fn run(&self, ctx: &RequestContext, path: &str) -> Result<(), WebError> {
        let Some((handler, invocation, matched)) = self.select(ctx, path) else {
            tracing::debug!("No handler for {} {}", ctx.method(), path);
            return Err(WebError::NotFound {
                method: ctx.method().clone(),
                path: path.to_string(),
            });
        };

        let _scope = ctx.push_bindings(matched.bindings());
        let args = invocation.fetch_arguments(ctx)?;
        let chain = self.chains.chain_for(invocation.method())?;

        let reached = Cell::new(false);
        let terminal = |args: Arguments| {
            reached.set(true);
            invocation.call(handler.target(), ctx, args)
        };
        let result = chain.execute(invocation.arg_names(), args, &terminal);

        if !reached.get() && result.is_ok() {
            tracing::debug!("Interceptor short-circuited {}", invocation.method().signature());
        }

        match result {
            Ok(value) => outcome::apply(
                invocation.outcomes(),
                matched.default_view(),
                &value,
                ctx,
                self.views.as_deref(),
            ),
            Err(thrown) => self.handle_thrown(thrown, ctx, invocation),
        }
    }

    fn handle_thrown(&self, thrown: ThrownError, ctx: &RequestContext, invocation: &Invocation) -> Result<(), WebError> {
        // 嵌套调度的错误经处理器 `?` 回到这里，还原为原来的 WebError
        if thrown.is::<WebError>() {
            return match thrown.into_inner().downcast::<WebError>() {
                Ok(nested) => Err(*nested),
                Err(other) => Err(WebError::Handler(ThrownError::msg(other.to_string()))),
            };
        }

        if self.exception_handlers.handle(&thrown, ctx) {
            tracing::debug!(
                "🛡️ {} from {} handled by exception handler",
                thrown.kind().simple_name(),
                invocation.method().signature()
            );
            return Err(WebError::Handled(Handled));
        }

        Err(WebError::Handler(thrown))
    }
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("prefix", &self.prefix)
            .field("handlers", &self.handlers)
            .field("exception_handlers", &self.exception_handlers)
            .field("error_details", &self.error_details)
            .finish()
    }
}

/// 调度器构建器
///
/// 没有显式设置时：空类型继承图、默认转换服务、空容器、无视图渲染器。
pub struct DispatcherBuilder {
    prefix: String,
    controllers: Vec<ControllerDefinition>,
    hierarchy: Option<Arc<TypeHierarchy>>,
    conversion: Option<Arc<ConversionService>>,
    container: Option<Arc<dyn Container>>,
    declarations: InterceptorDeclarations,
    exception_handlers: ExceptionHandlerRegistry,
    views: Option<Arc<dyn ViewRenderer>>,
    error_details: bool,
}

impl DispatcherBuilder {
    pub fn new() -> Self {
        Self {
            prefix: String::new(),
            controllers: Vec::new(),
            hierarchy: None,
            conversion: None,
            container: None,
            declarations: InterceptorDeclarations::new(),
            exception_handlers: ExceptionHandlerRegistry::new(),
            views: None,
            error_details: false,
        }
    }

    /// 读取 `dispatcher.prefix` 和 `dispatcher.error-details`
    pub fn from_environment(env: &Environment) -> Self {
        Self::new()
            .prefix(env.get_string_or(DISPATCHER_PREFIX, ""))
            .error_details(env.get_bool_or(DISPATCHER_ERROR_DETAILS, false))
    }

    pub fn prefix(mut self, prefix: impl AsRef<str>) -> Self {
        self.prefix = normalize_prefix(prefix.as_ref());
        self
    }

    pub fn controller(mut self, controller: ControllerDefinition) -> Self {
        self.controllers.push(controller);
        self
    }

    pub fn hierarchy(mut self, hierarchy: Arc<TypeHierarchy>) -> Self {
        self.hierarchy = Some(hierarchy);
        self
    }

    pub fn conversion(mut self, conversion: Arc<ConversionService>) -> Self {
        self.conversion = Some(conversion);
        self
    }

    pub fn container(mut self, container: Arc<dyn Container>) -> Self {
        self.container = Some(container);
        self
    }

    /// 在方法上声明拦截器
    pub fn intercept_method(mut self, method: MethodKey, interceptor: TypeKey) -> Self {
        self.declarations.on_method(method, interceptor);
        self
    }

    /// 在类型上声明拦截器
    pub fn intercept_type(mut self, owner: TypeKey, interceptor: TypeKey) -> Self {
        self.declarations.on_type(owner, interceptor);
        self
    }

    pub fn declarations(mut self, declarations: InterceptorDeclarations) -> Self {
        self.declarations = declarations;
        self
    }

    pub fn exception_handler<E, H>(mut self, handler: H) -> Self
    where
        E: std::error::Error + 'static,
        H: ExceptionHandler + 'static,
    {
        self.exception_handlers.register::<E, H>(handler);
        self
    }

    pub fn exception_handlers(mut self, registry: ExceptionHandlerRegistry) -> Self {
        self.exception_handlers = registry;
        self
    }

    pub fn view_renderer<V: ViewRenderer + 'static>(mut self, renderer: V) -> Self {
        self.views = Some(Arc::new(renderer));
        self
    }

    pub fn shared_view_renderer(mut self, renderer: Arc<dyn ViewRenderer>) -> Self {
        self.views = Some(renderer);
        self
    }

    pub fn error_details(mut self, enabled: bool) -> Self {
        self.error_details = enabled;
        self
    }

    /// 编译全部控制器；声明错误（未知路径变量、无法转换的参数类型等）在这里返回
    pub fn build(self) -> Result<Arc<Dispatcher>, WebError> {
        let hierarchy = self
            .hierarchy
            .unwrap_or_else(|| Arc::new(TypeHierarchy::new()));
        let conversion = self
            .conversion
            .unwrap_or_else(|| Arc::new(ConversionService::new(Arc::clone(&hierarchy))));
        let container: Arc<dyn Container> = match self.container {
            Some(container) => container,
            None => Arc::new(ApplicationContext::new()),
        };

        // 方法按 (控制器类型, 方法名) 缓存，同一类型只能注册一次
        let mut registered = HashSet::new();
        for definition in &self.controllers {
            if !registered.insert(definition.type_key().clone()) {
                return Err(WebError::Configuration(format!(
                    "Controller {} is registered more than once",
                    definition.type_key().simple_name()
                )));
            }
        }

        let factory = FetcherFactory::new(conversion, Arc::clone(&container));
        let invocations = InvocationRegistry::new();
        let handlers = self
            .controllers
            .into_iter()
            .map(|definition| ControllerHandler::build(definition, &factory, &invocations))
            .collect::<Result<Vec<_>, _>>()?;

        let chains = InterceptorChainFactory::new(self.declarations, hierarchy, container);

        tracing::info!(
            "✅ Dispatcher '{}' ready: {} controller(s), {} handler method(s)",
            if self.prefix.is_empty() { "/" } else { self.prefix.as_str() },
            handlers.len(),
            invocations.len()
        );

        Ok(Arc::new(Dispatcher {
            prefix: self.prefix,
            handlers,
            invocations,
            chains,
            exception_handlers: self.exception_handlers,
            views: self.views,
            error_details: self.error_details,
        }))
    }
}

impl Default for DispatcherBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// 按前缀分发到多个调度器
#[derive(Debug, Default)]
pub struct DispatcherRouter {
    dispatchers: Vec<Arc<Dispatcher>>,
    error_details: bool,
}

impl DispatcherRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn single(dispatcher: Arc<Dispatcher>) -> Self {
        let mut router = Self::new();
        router.add(dispatcher);
        router
    }

    /// 添加调度器；相同前缀时先添加的优先
    pub fn add(&mut self, dispatcher: Arc<Dispatcher>) -> &mut Self {
        self.error_details |= dispatcher.error_details;
        self.dispatchers.push(dispatcher);
        self.dispatchers
            .sort_by(|a, b| b.prefix.len().cmp(&a.prefix.len()));
        self
    }

    pub fn dispatchers(&self) -> &[Arc<Dispatcher>] {
        &self.dispatchers
    }

    /// 最长前缀匹配
    pub fn route(&self, path: &str) -> Option<&Arc<Dispatcher>> {
        self.dispatchers
            .iter()
            .find(|d| d.relative_path(path).is_some())
    }

    /// 处理一个请求，结果写入 `ctx` 的响应
    pub fn service(&self, ctx: &RequestContext) {
        match self.route(ctx.path()) {
            Some(dispatcher) => dispatcher.service(ctx),
            None => {
                tracing::debug!("No dispatcher for {}", ctx.path());
                let error = WebError::NotFound {
                    method: ctx.method().clone(),
                    path: ctx.path().to_string(),
                };
                write_error(ctx, &error, self.error_details);
            }
        }
    }
}

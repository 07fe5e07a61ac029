//! # Switchyard Web
//!
//! 请求调度与处理器调用引擎，传输层基于 Axum
//!
//! ## 核心特性
//!
//! - **路由匹配** - `/users/{id}` 风格的路径模板，按捕获组数和置信度择优
//! - **参数绑定** - 查询参数、路径变量、请求头、会话、请求属性、容器 bean
//! - **类型转换** - 按类型距离选择最近的转换器，结果缓存
//! - **拦截链** - 集成 Switchyard AOP，可改参数、短路或处理返回值
//! - **结果映射** - 视图 / 写出 / 重定向 / 状态码
//! - **异常处理** - 按异常的运行时类型查找处理器

pub mod constants;
pub mod convert;
pub mod dispatcher;
pub mod error;
pub mod exception_handler;
pub mod fetcher;
pub mod handler;
pub mod invocation;
pub mod mapping;
pub mod middleware;
pub mod outcome;
pub mod request;
pub mod response;
pub mod server;
pub mod view;

pub use convert::{CollectionAdapter, ConversionService, ConvertError, Converter};
pub use dispatcher::{Dispatcher, DispatcherBuilder, DispatcherRouter};
pub use error::{ErrorResponse, WebError};
pub use exception_handler::{ExceptionHandler, ExceptionHandlerRegistry};
pub use fetcher::{ArgumentFetcher, Binding, FetcherFactory, Parameter, ParameterSource};
pub use handler::{ControllerDefinition, ControllerHandler};
pub use invocation::{best, HandlerMethod, Invocation, InvocationRegistry, MatchResult};
pub use mapping::{PathMatch, PathPattern, RouteMapping, RouteMappingBuilder};
pub use outcome::Outcome;
pub use request::{PathBindings, RequestContext, Session};
pub use response::ResponseSink;
pub use server::{ServerProperties, WebServer};
pub use view::{Model, TeraViewRenderer, ViewError, ViewRenderer};

pub mod prelude {
    //! 预导入模块

    pub use crate::dispatcher::{Dispatcher, DispatcherRouter};
    pub use crate::exception_handler::ExceptionHandler;
    pub use crate::fetcher::Parameter;
    pub use crate::handler::ControllerDefinition;
    pub use crate::invocation::HandlerMethod;
    pub use crate::mapping::RouteMapping;
    pub use crate::request::RequestContext;
    pub use crate::server::{ServerProperties, WebServer};
    pub use crate::view::TeraViewRenderer;
    pub use crate::error::WebError;

    pub use http::{Method, StatusCode};
}

//! Web 服务器模块
//!
//! 基于 Axum：每个请求转换为 [`RequestContext`]，在阻塞线程池上同步调度，
//! 再把响应缓冲转换回 HTTP 响应。

use std::sync::Arc;

use axum::{
    body::Body,
    extract::{Request, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Router,
};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;

use switchyard_core::{ApplicationError, ApplicationResult, Environment};

use crate::constants::{
    SERVER_ENABLE_CORS, SERVER_ENABLE_REQUEST_LOGGING, SERVER_HOST, SERVER_MAX_BODY_SIZE,
    SERVER_PORT,
};
use crate::dispatcher::DispatcherRouter;
use crate::error::ErrorResponse;
use crate::middleware;
use crate::request::RequestContext;

/// Web 服务器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerProperties {
    /// 服务器监听地址
    pub host: String,

    /// 服务器监听端口
    pub port: u16,

    /// 请求体最大字节数
    pub max_body_size: usize,

    /// 是否启用 CORS
    pub enable_cors: bool,

    /// 是否启用请求日志
    pub enable_request_logging: bool,
}

impl Default for ServerProperties {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            max_body_size: 2 * 1024 * 1024,
            enable_cors: false,
            enable_request_logging: true,
        }
    }
}

impl ServerProperties {
    /// 从 Environment 加载配置；端口或请求体上限越界时返回配置错误
    pub fn from_environment(env: &Environment) -> ApplicationResult<Self> {
        let defaults = Self::default();
        let port = env.get_i64_or(SERVER_PORT, i64::from(defaults.port));
        let max_body_size = env.get_i64_or(SERVER_MAX_BODY_SIZE, defaults.max_body_size as i64);

        Ok(Self {
            host: env.get_string_or(SERVER_HOST, &defaults.host),
            port: u16::try_from(port).map_err(|_| {
                ApplicationError::Configuration(format!("{} out of range: {}", SERVER_PORT, port))
            })?,
            max_body_size: usize::try_from(max_body_size).map_err(|_| {
                ApplicationError::Configuration(format!(
                    "{} must not be negative: {}",
                    SERVER_MAX_BODY_SIZE, max_body_size
                ))
            })?,
            enable_cors: env.get_bool_or(SERVER_ENABLE_CORS, defaults.enable_cors),
            enable_request_logging: env
                .get_bool_or(SERVER_ENABLE_REQUEST_LOGGING, defaults.enable_request_logging),
        })
    }

    /// 获取服务器地址
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Clone)]
struct ServerState {
    router: Arc<DispatcherRouter>,
    max_body_size: usize,
}

/// Switchyard Web 服务器
pub struct WebServer {
    properties: ServerProperties,
    router: Arc<DispatcherRouter>,
}

impl WebServer {
    pub fn new(properties: ServerProperties, router: DispatcherRouter) -> Self {
        Self {
            properties,
            router: Arc::new(router),
        }
    }

    /// 使用 Environment 中的服务器配置
    pub fn from_environment(env: &Environment, router: DispatcherRouter) -> ApplicationResult<Self> {
        Ok(Self::new(ServerProperties::from_environment(env)?, router))
    }

    pub fn properties(&self) -> &ServerProperties {
        &self.properties
    }

    /// 构建 Axum 路由：全部请求交给调度器
    pub fn into_router(self) -> Router {
        let state = ServerState {
            router: self.router,
            max_body_size: self.properties.max_body_size,
        };

        let mut app = Router::new()
            .fallback(dispatch)
            .with_state(state)
            .layer(axum::middleware::from_fn(middleware::request_id));

        if self.properties.enable_request_logging {
            app = app.layer(axum::middleware::from_fn(middleware::request_logging));
        }
        if self.properties.enable_cors {
            app = app.layer(CorsLayer::permissive());
        }
        app
    }

    /// 启动服务器
    pub async fn run(self) -> ApplicationResult<()> {
        let addr = self.properties.address();
        let app = self.into_router().into_make_service();

        tracing::info!("🚀 Starting Switchyard Web Server on {}", addr);

        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| ApplicationError::Other(format!("Failed to bind to {}: {}", addr, e)))?;

        tracing::info!("✅ Server listening on http://{}", addr);

        axum::serve(listener, app)
            .await
            .map_err(|e| ApplicationError::Other(format!("Server error: {}", e)))?;

        Ok(())
    }
}

async fn dispatch(State(state): State<ServerState>, request: Request) -> Response {
    let (parts, body) = request.into_parts();
    let path = parts.uri.path().to_string();

    let body = match axum::body::to_bytes(body, state.max_body_size).await {
        Ok(body) => body,
        Err(e) => {
            tracing::warn!(path = %path, "Failed to read request body: {}", e);
            return ErrorResponse::new(
                StatusCode::PAYLOAD_TOO_LARGE,
                "Payload Too Large".to_string(),
                format!("Request body exceeds {} bytes", state.max_body_size),
                path,
            )
            .into_response();
        }
    };

    let router = Arc::clone(&state.router);
    let worker = tokio::task::spawn_blocking(move || {
        let ctx = RequestContext::from_parts(parts.method, &parts.uri, parts.headers, body);
        router.service(&ctx);
        ctx.into_response().into_parts()
    });

    match worker.await {
        Ok((status, headers, body)) => {
            let mut response = Response::new(Body::from(body));
            *response.status_mut() = status;
            *response.headers_mut() = headers;
            response
        }
        Err(e) => {
            tracing::error!(path = %path, "Dispatch worker failed: {}", e);
            ErrorResponse::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal Server Error".to_string(),
                "Internal Server Error".to_string(),
                path,
            )
            .into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use tower::ServiceExt;

    use switchyard_core::{ConfigValue, MapPropertySource, Value};

    use super::*;
    use crate::constants::X_REQUEST_ID;
    use crate::dispatcher::Dispatcher;
    use crate::fetcher::Parameter;
    use crate::handler::ControllerDefinition;
    use crate::invocation::HandlerMethod;
    use crate::mapping::RouteMapping;

    struct Greeter;

    fn server() -> Router {
        let dispatcher = Dispatcher::builder()
            .prefix("/app")
            .controller(ControllerDefinition::new(Greeter).method(
                HandlerMethod::new("hello", RouteMapping::get("/hello/{name}"), |_: &Greeter, args| {
                    let name: String = args.value(0)?;
                    let times: i64 = args.value(1)?;
                    Ok(Value::str(name.repeat(times as usize)))
                })
                .param(Parameter::of::<String>("name").path("name"))
                .param(Parameter::of::<i64>("times").query("times").default_value("1"))
                .write(),
            ))
            .build()
            .unwrap();

        let properties = ServerProperties {
            enable_request_logging: false,
            ..ServerProperties::default()
        };
        WebServer::new(properties, DispatcherRouter::single(dispatcher)).into_router()
    }

    async fn body_text(response: Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_request_round_trip_through_dispatcher() {
        let response = server()
            .oneshot(
                http::Request::builder()
                    .uri("/app/hello/ab?times=2")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key(X_REQUEST_ID));
        assert_eq!(
            response.headers().get("content-type").unwrap(),
            "text/plain; charset=utf-8"
        );
        assert_eq!(body_text(response).await, "abab");
    }

    #[tokio::test]
    async fn test_unknown_route_is_json_404() {
        let response = server()
            .oneshot(http::Request::builder().uri("/elsewhere").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let json: serde_json::Value = serde_json::from_str(&body_text(response).await).unwrap();
        assert_eq!(json["status"], 404);
        assert_eq!(json["path"], "/elsewhere");
    }

    #[test]
    fn test_properties_from_environment() {
        let env = Environment::new();
        env.add_property_source(Box::new(
            MapPropertySource::new("test")
                .with_property(SERVER_PORT, ConfigValue::Int(9090))
                .with_property(SERVER_ENABLE_CORS, ConfigValue::Bool(true)),
        ));

        let properties = ServerProperties::from_environment(&env).unwrap();
        assert_eq!(properties.address(), "0.0.0.0:9090");
        assert!(properties.enable_cors);
        assert!(properties.enable_request_logging);
    }

    #[test]
    fn test_out_of_range_properties_are_rejected() {
        let port = Environment::new();
        port.add_property_source(Box::new(
            MapPropertySource::new("test").with_property(SERVER_PORT, ConfigValue::Int(70_000)),
        ));
        assert!(matches!(
            ServerProperties::from_environment(&port),
            Err(ApplicationError::Configuration(_))
        ));

        let body = Environment::new();
        body.add_property_source(Box::new(
            MapPropertySource::new("test").with_property(SERVER_MAX_BODY_SIZE, ConfigValue::Int(-1)),
        ));
        assert!(matches!(
            ServerProperties::from_environment(&body),
            Err(ApplicationError::Configuration(_))
        ));
    }
}

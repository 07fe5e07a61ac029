//! Web 层错误
//!
//! - 路由未命中 -> 404
//! - 缺少必需参数 -> 400（唯一的客户端错误）
//! - 其余（转换器缺失、视图渲染、拦截器解析、容器、未处理的处理器异常）-> 500
//!
//! [`WebError::Handled`] 不是错误：异常处理器已经处理了处理器抛出的异常，
//! 调用方只需停止后续的结果映射，不要记录或改写它。

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use http::Method;
use serde_json::Value as JsonValue;
use thiserror::Error;

use switchyard_aop::{AopError, ErrorInfo};
use switchyard_core::{ContainerError, Handled, ThrownError};

use crate::convert::ConvertError;
use crate::fetcher::ParameterSource;
use crate::view::ViewError;

/// Web 层错误类型
#[derive(Error, Debug)]
pub enum WebError {
    /// 没有匹配的处理器 - 404
    #[error("No handler found for {method} {path}")]
    NotFound { method: Method, path: String },

    /// 缺少必需参数 - 400
    #[error("Missing {kind} parameter '{name}'")]
    MissingParameter { name: String, kind: ParameterSource },

    #[error("Conversion error: {0}")]
    Conversion(#[from] ConvertError),

    #[error("View error: {0}")]
    View(#[from] ViewError),

    #[error("Interceptor error: {0}")]
    Interceptor(#[from] AopError),

    #[error("Container error: {0}")]
    Container(#[from] ContainerError),

    /// 启动期配置错误（路由、参数声明）
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Invalid header: {0}")]
    InvalidHeader(String),

    /// 处理器抛出且没有异常处理器处理的异常
    #[error("Handler failed: {0}")]
    Handler(ThrownError),

    /// 异常已被异常处理器处理
    ///
    /// 经 `?` 转成 `ThrownError` 后，`ThrownError::is_handled` 仍能识别。
    #[error("Exception handled")]
    Handled(#[source] Handled),
}

impl WebError {
    /// 获取错误对应的 HTTP 状态码
    pub fn status_code(&self) -> StatusCode {
        match self {
            WebError::NotFound { .. } => StatusCode::NOT_FOUND,
            WebError::MissingParameter { .. } => StatusCode::BAD_REQUEST,
            WebError::Handled(_) => StatusCode::OK,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn is_handled(&self) -> bool {
        matches!(self, WebError::Handled(_))
    }

    /// 获取错误详情（用于 JSON 响应）
    pub fn details(&self) -> Option<JsonValue> {
        match self {
            WebError::MissingParameter { name, kind } => Some(serde_json::json!({
                "parameter": name,
                "source": kind.to_string(),
            })),
            _ => None,
        }
    }

    /// 异常链（开启错误详情时返回）
    fn trace(&self) -> Option<String> {
        match self {
            WebError::Handler(thrown) => Some(ErrorInfo::from_thrown(thrown).full_description()),
            _ => None,
        }
    }
}

/// 标准错误响应格式
#[derive(Debug, serde::Serialize)]
pub struct ErrorResponse {
    pub timestamp: String,
    pub status: u16,
    pub error: String,
    pub message: String,
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<JsonValue>,
}

impl ErrorResponse {
    pub fn new(status: StatusCode, error: String, message: String, path: String) -> Self {
        Self {
            timestamp: chrono::Utc::now().to_rfc3339(),
            status: status.as_u16(),
            error,
            message,
            path,
            trace: None,
            details: None,
        }
    }

    /// 由 [`WebError`] 构造；`expose_details` 为假时 5xx 错误不暴露内部信息
    pub fn from_error(error: &WebError, path: &str, expose_details: bool) -> Self {
        let status = error.status_code();
        let reason = status.canonical_reason().unwrap_or("Unknown Error").to_string();
        let message = if status.is_server_error() && !expose_details {
            reason.clone()
        } else {
            error.to_string()
        };

        let mut response = Self::new(status, reason, message, path.to_string());
        response.details = error.details();
        if expose_details {
            response.trace = error.trace();
        }
        response
    }

    pub fn with_trace(mut self, trace: String) -> Self {
        self.trace = Some(trace);
        self
    }

    pub fn with_details(mut self, details: JsonValue) -> Self {
        self.details = Some(details);
        self
    }

    pub fn status_code(&self) -> StatusCode {
        StatusCode::from_u16(self.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }

    /// JSON 响应体
    pub fn to_json(&self) -> Vec<u8> {
        serde_json::to_vec(self).unwrap_or_else(|e| {
            tracing::error!("Failed to serialize error response: {}", e);
            Vec::new()
        })
    }
}

impl IntoResponse for ErrorResponse {
    fn into_response(self) -> Response {
        (self.status_code(), Json(self)).into_response()
    }
}

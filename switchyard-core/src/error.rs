//! 错误类型
//!
//! - [`ThrownError`] 处理器或拦截器抛出的错误，携带运行时类型标识，供异常处理器按类型查找
//! - [`ContainerError`] 容器解析错误
//! - [`ApplicationError`] 启动、配置、日志等应用级错误
//!
//! 引导代码（`app` 模块）使用 `anyhow` 添加上下文。

use std::error::Error as StdError;
use std::fmt;

use thiserror::Error;

use crate::types::TypeKey;
use crate::value::Value;

/// 处理器方法或拦截器的调用结果
pub type CallResult = std::result::Result<Value, ThrownError>;

/// 处理器抛出的错误
///
/// 任何 `std::error::Error` 都可以通过 `?` 转换为 `ThrownError`，
/// 转换时记录其具体类型，异常处理器注册表按该类型精确匹配。
pub struct ThrownError {
    kind: TypeKey,
    inner: Box<dyn StdError + Send + Sync + 'static>,
}

impl ThrownError {
    pub fn new<E>(error: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self {
            kind: TypeKey::of::<E>(),
            inner: Box::new(error),
        }
    }

    /// 只有消息的错误，类型为 [`MessageError`]
    pub fn msg(message: impl Into<String>) -> Self {
        Self::new(MessageError(message.into()))
    }

    /// 错误的运行时类型
    pub fn kind(&self) -> &TypeKey {
        &self.kind
    }

    pub fn message(&self) -> String {
        self.inner.to_string()
    }

    pub fn is<E: StdError + 'static>(&self) -> bool {
        self.inner.is::<E>()
    }

    pub fn downcast_ref<E: StdError + 'static>(&self) -> Option<&E> {
        self.inner.downcast_ref::<E>()
    }

    pub fn as_error(&self) -> &(dyn StdError + Send + Sync + 'static) {
        self.inner.as_ref()
    }

    pub fn into_inner(self) -> Box<dyn StdError + Send + Sync + 'static> {
        self.inner
    }

    /// 是否为 [`Handled`] 信号（本身或出现在错误源链中）
    pub fn is_handled(&self) -> bool {
        if self.inner.is::<Handled>() {
            return true;
        }
        let mut current = self.inner.source();
        while let Some(source) = current {
            if source.is::<Handled>() {
                return true;
            }
            current = source.source();
        }
        false
    }
}

impl<E> From<E> for ThrownError
where
    E: StdError + Send + Sync + 'static,
{
    fn from(error: E) -> Self {
        Self::new(error)
    }
}

impl fmt::Debug for ThrownError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThrownError")
            .field("kind", &self.kind)
            .field("message", &self.inner.to_string())
            .finish()
    }
}

impl fmt::Display for ThrownError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.inner, f)
    }
}

/// 异常已被异常处理器处理
///
/// 沿调用栈向上传递以停止后续处理，不是失败，拦截器不应把它记录为错误。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Error)]
#[error("Exception handled")]
pub struct Handled;

/// 纯消息错误
#[derive(Debug, Error)]
#[error("{0}")]
pub struct MessageError(pub String);

/// 容器错误
#[derive(Debug, Error)]
pub enum ContainerError {
    #[error("No bean of type '{ty}' found{}", qualifier_suffix(.qualifier))]
    BeanNotFound {
        ty: TypeKey,
        qualifier: Option<String>,
    },

    #[error("Expected a single bean of type '{ty}' but found {count}: {names:?}")]
    NoUniqueBean {
        ty: TypeKey,
        count: usize,
        names: Vec<String>,
    },

    #[error("Bean '{name}' is already registered for type '{ty}'")]
    DuplicateBean { ty: TypeKey, name: String },

    #[error("Bean '{name}' cannot be cast to '{expected}'")]
    TypeMismatch { name: String, expected: &'static str },
}

fn qualifier_suffix(qualifier: &Option<String>) -> String {
    match qualifier {
        Some(q) => format!(" with qualifier '{}'", q),
        None => String::new(),
    }
}

pub type ContainerResult<T> = std::result::Result<T, ContainerError>;

/// 应用级错误
#[derive(Debug, Error)]
pub enum ApplicationError {
    #[error("Container error: {0}")]
    Container(#[from] ContainerError),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Failed to initialize logging: {0}")]
    LoggingInitFailed(String),

    #[error("{0}")]
    Other(String),
}

pub type ApplicationResult<T> = std::result::Result<T, ApplicationError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Error)]
    #[error("boom {0}")]
    struct CustomException(u32);

    fn raise() -> Result<u32, CustomException> {
        Err(CustomException(7))
    }

    fn fails() -> CallResult {
        let n = raise()?;
        Ok(Value::from(n))
    }

    #[test]
    fn test_question_mark_records_runtime_type() {
        let err = fails().unwrap_err();
        assert_eq!(err.kind(), &TypeKey::of::<CustomException>());
        assert_eq!(err.message(), "boom 7");
        assert!(err.is::<CustomException>());
        assert_eq!(err.downcast_ref::<CustomException>().unwrap().0, 7);
    }

    #[test]
    fn test_message_error_kind() {
        let err = ThrownError::msg("plain");
        assert_eq!(err.kind(), &TypeKey::of::<MessageError>());
        assert_eq!(err.to_string(), "plain");
    }

    #[derive(Debug, Error)]
    #[error("wrapped")]
    struct Wrapper(#[source] Handled);

    #[test]
    fn test_handled_signal_detected_through_sources() {
        assert!(ThrownError::new(Handled).is_handled());
        assert!(ThrownError::new(Wrapper(Handled)).is_handled());
        assert!(!ThrownError::msg("plain").is_handled());
        assert!(!ThrownError::new(CustomException(1)).is_handled());
    }

    #[test]
    fn test_container_error_messages() {
        let err = ContainerError::BeanNotFound {
            ty: TypeKey::from_static("Repo"),
            qualifier: Some("primary".into()),
        };
        assert_eq!(err.to_string(), "No bean of type 'Repo' found with qualifier 'primary'");
    }
}

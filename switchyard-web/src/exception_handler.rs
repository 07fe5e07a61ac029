//! 异常处理器
//!
//! 处理器抛出的异常按运行时类型（[`ThrownError::kind`]）在注册表中精确查找。
//! 处理器返回 `true` 表示已处理：调度器停止结果映射，响应由异常处理器负责写入。

use std::collections::HashMap;
use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;

use switchyard_core::{ThrownError, TypeKey};

use crate::request::RequestContext;

/// 异常处理器
pub trait ExceptionHandler: Send + Sync {
    /// 返回是否已处理
    fn handle(&self, error: &ThrownError, ctx: &RequestContext) -> bool;
}

impl<F> ExceptionHandler for F
where
    F: Fn(&ThrownError, &RequestContext) -> bool + Send + Sync,
{
    fn handle(&self, error: &ThrownError, ctx: &RequestContext) -> bool {
        self(error, ctx)
    }
}

/// 异常处理器注册表
#[derive(Default, Clone)]
pub struct ExceptionHandlerRegistry {
    handlers: HashMap<TypeKey, Arc<dyn ExceptionHandler>>,
}

impl ExceptionHandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 为错误类型 `E` 注册处理器，覆盖已有的
    pub fn register<E, H>(&mut self, handler: H) -> &mut Self
    where
        E: StdError + 'static,
        H: ExceptionHandler + 'static,
    {
        self.register_for(TypeKey::of::<E>(), handler)
    }

    pub fn register_for<H>(&mut self, kind: TypeKey, handler: H) -> &mut Self
    where
        H: ExceptionHandler + 'static,
    {
        tracing::debug!("Registered exception handler for {}", kind);
        self.handlers.insert(kind, Arc::new(handler));
        self
    }

    pub fn lookup(&self, kind: &TypeKey) -> Option<Arc<dyn ExceptionHandler>> {
        self.handlers.get(kind).cloned()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// 查找并调用处理器；没有处理器或处理器未处理时返回 `false`
    pub fn handle(&self, error: &ThrownError, ctx: &RequestContext) -> bool {
        match self.lookup(error.kind()) {
            Some(handler) => handler.handle(error, ctx),
            None => false,
        }
    }
}

impl fmt::Debug for ExceptionHandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kinds: Vec<&str> = self.handlers.keys().map(TypeKey::name).collect();
        f.debug_struct("ExceptionHandlerRegistry")
            .field("handlers", &kinds)
            .finish()
    }
}

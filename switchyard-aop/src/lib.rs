//! Switchyard AOP - 方法拦截链
//!
//! - 在方法或类型上声明拦截器，子类型继承父类型上的声明
//! - 每个方法首次调用时构建拦截链并缓存
//! - 拦截器可以修改参数、短路调用或处理返回值

pub mod chain;
pub mod error_info;
pub mod interceptor;
pub mod joinpoint;

pub use chain::{AopError, InterceptorChain, InterceptorChainFactory, InterceptorDeclarations};
pub use error_info::ErrorInfo;
pub use interceptor::{register_interceptor, LoggingInterceptor, MethodInterceptor, TimingInterceptor};
pub use joinpoint::{JoinPoint, MethodKey, ProceedingJoinPoint, Terminal};

/// 预导入模块
pub mod prelude {
    pub use crate::chain::{InterceptorChainFactory, InterceptorDeclarations};
    pub use crate::interceptor::{register_interceptor, MethodInterceptor};
    pub use crate::joinpoint::{JoinPoint, MethodKey, ProceedingJoinPoint};
}

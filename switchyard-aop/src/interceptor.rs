//! 方法拦截器
//!
//! 拦截器以 `Arc<dyn MethodInterceptor>` 的形式保存在容器中，
//! 键为拦截器自身的类型标识，见 [`register_interceptor`]。

use std::sync::Arc;
use std::time::Duration;

use switchyard_core::utils::naming;
use switchyard_core::{ApplicationContext, CallResult, ContainerResult, TypeKey};

use crate::error_info::ErrorInfo;
use crate::joinpoint::ProceedingJoinPoint;

/// 方法拦截器
pub trait MethodInterceptor: Send + Sync {
    /// 环绕调用；不调用 `invocation.proceed()` 即短路
    fn invoke(&self, invocation: &mut ProceedingJoinPoint<'_>) -> CallResult;

    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

/// 以 `I` 的类型标识把拦截器注册到容器
pub fn register_interceptor<I>(context: &ApplicationContext, interceptor: I) -> ContainerResult<()>
where
    I: MethodInterceptor + 'static,
{
    let ty = TypeKey::of::<I>();
    let name = naming::bean_name_for(&ty);
    let shared: Arc<dyn MethodInterceptor> = Arc::new(interceptor);
    context.register_instance(ty, name, Arc::new(shared))
}

/// 日志拦截器：记录进入、退出和异常
#[derive(Debug, Clone, Default)]
pub struct LoggingInterceptor {
    log_args: bool,
}

impl LoggingInterceptor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_args(mut self) -> Self {
        self.log_args = true;
        self
    }
}

impl MethodInterceptor for LoggingInterceptor {
    fn invoke(&self, invocation: &mut ProceedingJoinPoint<'_>) -> CallResult {
        let signature = invocation.join_point().signature();
        if self.log_args {
            tracing::info!("→ Entering: {} with {:?}", signature, invocation.args());
        } else {
            tracing::info!("→ Entering: {}", signature);
        }

        let result = invocation.proceed();
        let elapsed = invocation.join_point().started_at().elapsed();

        match &result {
            Ok(_) => tracing::info!("← Exiting: {} (took {:?})", signature, elapsed),
            Err(e) => {
                let info = ErrorInfo::from_thrown(e);
                if info.handled {
                    tracing::info!("← Exiting: {} (exception handled, took {:?})", signature, elapsed);
                    return result;
                }
                tracing::error!(
                    "❌ Exception in {}: [{}] {}",
                    signature,
                    info.error_type,
                    info.full_description()
                );
            }
        }

        result
    }

    fn name(&self) -> &str {
        "LoggingInterceptor"
    }
}

/// 耗时拦截器：超过阈值时告警
#[derive(Debug, Clone)]
pub struct TimingInterceptor {
    threshold: Duration,
}

impl TimingInterceptor {
    pub fn new(threshold: Duration) -> Self {
        Self { threshold }
    }

    pub fn threshold(&self) -> Duration {
        self.threshold
    }
}

impl Default for TimingInterceptor {
    fn default() -> Self {
        Self::new(Duration::from_millis(500))
    }
}

impl MethodInterceptor for TimingInterceptor {
    fn invoke(&self, invocation: &mut ProceedingJoinPoint<'_>) -> CallResult {
        let result = invocation.proceed();
        let elapsed = invocation.join_point().started_at().elapsed();
        if elapsed > self.threshold {
            tracing::warn!(
                "⚠️ Slow method detected: {} took {}ms (threshold: {}ms)",
                invocation.join_point().signature(),
                elapsed.as_millis(),
                self.threshold.as_millis()
            );
        }
        result
    }

    fn name(&self) -> &str {
        "TimingInterceptor"
    }
}

//! 连接点
//!
//! [`JoinPoint`] 描述一次方法调用：方法标识、形参名、实参、开始时间。
//! [`ProceedingJoinPoint`] 在此基础上持有拦截链的剩余部分，`proceed()` 继续向内执行。

use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use switchyard_core::{Arguments, CallResult, TypeKey, Value, ValueError};

use crate::interceptor::MethodInterceptor;

/// 方法标识：所属类型 + 方法名
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MethodKey {
    owner: TypeKey,
    name: Cow<'static, str>,
}

impl MethodKey {
    pub fn new(owner: TypeKey, name: impl Into<Cow<'static, str>>) -> Self {
        Self {
            owner,
            name: name.into(),
        }
    }

    pub fn of<T: ?Sized + 'static>(name: impl Into<Cow<'static, str>>) -> Self {
        Self::new(TypeKey::of::<T>(), name)
    }

    pub fn owner(&self) -> &TypeKey {
        &self.owner
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// `UserController::show`
    pub fn signature(&self) -> String {
        format!("{}::{}", self.owner.simple_name(), self.name)
    }
}

impl fmt::Display for MethodKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}", self.owner, self.name)
    }
}

/// 连接点
#[derive(Clone)]
pub struct JoinPoint {
    method: MethodKey,
    arg_names: Arc<[String]>,
    args: Arguments,
    started_at: Instant,
}

impl JoinPoint {
    pub fn new(method: MethodKey, arg_names: Arc<[String]>, args: Arguments) -> Self {
        Self {
            method,
            arg_names,
            args,
            started_at: Instant::now(),
        }
    }

    pub fn method(&self) -> &MethodKey {
        &self.method
    }

    pub fn signature(&self) -> String {
        self.method.signature()
    }

    pub fn arg_names(&self) -> &[String] {
        &self.arg_names
    }

    pub fn args(&self) -> &Arguments {
        &self.args
    }

    pub fn args_mut(&mut self) -> &mut Arguments {
        &mut self.args
    }

    /// 按形参名读取实参
    pub fn named_arg(&self, name: &str) -> Option<&Value> {
        let index = self.arg_names.iter().position(|n| n == name)?;
        self.args.get(index)
    }

    pub fn started_at(&self) -> Instant {
        self.started_at
    }
}

impl fmt::Debug for JoinPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JoinPoint")
            .field("signature", &self.signature())
            .field("arg_names", &self.arg_names)
            .field("args", &self.args)
            .finish()
    }
}

impl fmt::Display for JoinPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.signature())
    }
}

/// 拦截链末端：真正的方法调用
pub type Terminal<'a> = dyn Fn(Arguments) -> CallResult + 'a;

/// 可继续执行的连接点
///
/// 拦截器可以在 `proceed()` 之前修改参数，之后处理返回值；
/// 不调用 `proceed()` 即短路剩余拦截器和目标方法，拦截器自己的返回值成为调用结果。
pub struct ProceedingJoinPoint<'a> {
    join_point: JoinPoint,
    remaining: &'a [Arc<dyn MethodInterceptor>],
    terminal: &'a Terminal<'a>,
}

impl<'a> ProceedingJoinPoint<'a> {
    pub fn new(
        join_point: JoinPoint,
        remaining: &'a [Arc<dyn MethodInterceptor>],
        terminal: &'a Terminal<'a>,
    ) -> Self {
        Self {
            join_point,
            remaining,
            terminal,
        }
    }

    /// 执行下一个拦截器，没有时调用目标方法
    ///
    /// 内层看到的是当前参数的副本，可以多次调用（例如重试）
    pub fn proceed(&self) -> CallResult {
        match self.remaining.split_first() {
            Some((next, rest)) => {
                let mut inner = ProceedingJoinPoint {
                    join_point: self.join_point.clone(),
                    remaining: rest,
                    terminal: self.terminal,
                };
                next.invoke(&mut inner)
            }
            None => (self.terminal)(self.join_point.args.clone()),
        }
    }

    pub fn join_point(&self) -> &JoinPoint {
        &self.join_point
    }

    pub fn args(&self) -> &Arguments {
        self.join_point.args()
    }

    pub fn args_mut(&mut self) -> &mut Arguments {
        self.join_point.args_mut()
    }

    pub fn set_arg(&mut self, index: usize, value: Value) -> Result<(), ValueError> {
        self.join_point.args.set(index, value)
    }

    /// 按形参名设置实参，形参不存在时返回 `false`
    pub fn set_named_arg(&mut self, name: &str, value: Value) -> bool {
        match self.join_point.arg_names.iter().position(|n| n == name) {
            Some(index) => self.join_point.args.set(index, value).is_ok(),
            None => false,
        }
    }
}

impl fmt::Debug for ProceedingJoinPoint<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProceedingJoinPoint")
            .field("join_point", &self.join_point)
            .field("remaining", &self.remaining.len())
            .finish()
    }
}

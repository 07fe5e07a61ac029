//! 拦截链
//!
//! - [`InterceptorDeclarations`] 启动时登记"哪些拦截器声明在哪个方法 / 类型上"
//! - [`InterceptorChainFactory`] 按方法收集声明、从容器解析实例，并按方法标识缓存
//! - [`InterceptorChain`] 执行：从外到内依次调用拦截器，最内层是目标方法

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use thiserror::Error;

use switchyard_core::{Arguments, CallResult, Container, ContainerError, TypeHierarchy, TypeKey};

use crate::interceptor::MethodInterceptor;
use crate::joinpoint::{JoinPoint, MethodKey, ProceedingJoinPoint, Terminal};

/// 拦截链构建错误
#[derive(Debug, Error)]
pub enum AopError {
    #[error("Failed to resolve interceptor '{ty}' for {method}: {source}")]
    Resolve {
        method: MethodKey,
        ty: TypeKey,
        #[source]
        source: ContainerError,
    },

    #[error("Bean '{ty}' is not a MethodInterceptor")]
    NotAnInterceptor { ty: TypeKey },
}

/// 拦截器声明
#[derive(Debug, Clone, Default)]
pub struct InterceptorDeclarations {
    on_methods: HashMap<MethodKey, Vec<TypeKey>>,
    on_types: HashMap<TypeKey, Vec<TypeKey>>,
}

impl InterceptorDeclarations {
    pub fn new() -> Self {
        Self::default()
    }

    /// 在方法上声明拦截器，按声明顺序由外到内
    pub fn on_method(&mut self, method: MethodKey, interceptor: TypeKey) -> &mut Self {
        self.on_methods.entry(method).or_default().push(interceptor);
        self
    }

    /// 在类型上声明拦截器，作用于该类型及其子类型的全部方法
    pub fn on_type(&mut self, owner: TypeKey, interceptor: TypeKey) -> &mut Self {
        self.on_types.entry(owner).or_default().push(interceptor);
        self
    }

    /// 方法上的声明在前，然后是所属类型，再按继承距离由近到远；重复的只保留最近的一次
    pub fn collect(&self, method: &MethodKey, hierarchy: &TypeHierarchy) -> Vec<TypeKey> {
        let mut result: Vec<TypeKey> = Vec::new();
        let mut push_all = |declared: Option<&Vec<TypeKey>>| {
            for ty in declared.into_iter().flatten() {
                if !result.contains(ty) {
                    result.push(ty.clone());
                }
            }
        };

        push_all(self.on_methods.get(method));
        push_all(self.on_types.get(method.owner()));
        for ancestor in hierarchy.ancestors_of_key(method.owner()) {
            push_all(self.on_types.get(&ancestor));
        }

        result
    }

    pub fn is_empty(&self) -> bool {
        self.on_methods.is_empty() && self.on_types.is_empty()
    }
}

/// 某个方法的拦截链，构建后不可变
pub struct InterceptorChain {
    method: MethodKey,
    interceptors: Arc<[Arc<dyn MethodInterceptor>]>,
}

impl InterceptorChain {
    pub fn new(method: MethodKey, interceptors: Vec<Arc<dyn MethodInterceptor>>) -> Self {
        Self {
            method,
            interceptors: interceptors.into(),
        }
    }

    pub fn method(&self) -> &MethodKey {
        &self.method
    }

    pub fn len(&self) -> usize {
        self.interceptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.interceptors.is_empty()
    }

    /// 依次执行拦截器，最后调用 `terminal`
    pub fn execute(
        &self,
        arg_names: Arc<[String]>,
        args: Arguments,
        terminal: &Terminal<'_>,
    ) -> CallResult {
        let join_point = JoinPoint::new(self.method.clone(), arg_names, args);
        ProceedingJoinPoint::new(join_point, &self.interceptors, terminal).proceed()
    }
}

impl fmt::Debug for InterceptorChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.interceptors.iter().map(|i| i.name()).collect();
        f.debug_struct("InterceptorChain")
            .field("method", &self.method)
            .field("interceptors", &names)
            .finish()
    }
}

/// 拦截链工厂
///
/// 首次调用某个方法时构建拦截链并缓存；缓存只增不减，
/// 构建前后各检查一次，保证同一方法只缓存一条链。
pub struct InterceptorChainFactory {
    declarations: InterceptorDeclarations,
    hierarchy: Arc<TypeHierarchy>,
    container: Arc<dyn Container>,
    cache: RwLock<HashMap<MethodKey, Arc<InterceptorChain>>>,
}

impl InterceptorChainFactory {
    pub fn new(
        declarations: InterceptorDeclarations,
        hierarchy: Arc<TypeHierarchy>,
        container: Arc<dyn Container>,
    ) -> Self {
        Self {
            declarations,
            hierarchy,
            container,
            cache: RwLock::new(HashMap::new()),
        }
    }

    pub fn declarations(&self) -> &InterceptorDeclarations {
        &self.declarations
    }

    pub fn chain_for(&self, method: &MethodKey) -> Result<Arc<InterceptorChain>, AopError> {
        if let Some(chain) = self.cache.read().get(method) {
            return Ok(Arc::clone(chain));
        }

        let mut cache = self.cache.write();
        if let Some(chain) = cache.get(method) {
            return Ok(Arc::clone(chain));
        }

        let chain = Arc::new(self.build(method)?);
        tracing::debug!("Built interceptor chain for {}: {:?}", method.signature(), chain);
        cache.insert(method.clone(), Arc::clone(&chain));
        Ok(chain)
    }

    pub fn cached(&self) -> usize {
        self.cache.read().len()
    }

    fn build(&self, method: &MethodKey) -> Result<InterceptorChain, AopError> {
        let declared = self.declarations.collect(method, &self.hierarchy);
        let mut interceptors = Vec::with_capacity(declared.len());

        for ty in declared {
            let bean = self
                .container
                .resolve(&ty, None)
                .map_err(|source| AopError::Resolve {
                    method: method.clone(),
                    ty: ty.clone(),
                    source,
                })?;
            let interceptor = bean
                .downcast_ref::<Arc<dyn MethodInterceptor>>()
                .cloned()
                .ok_or(AopError::NotAnInterceptor { ty })?;
            interceptors.push(interceptor);
        }

        Ok(InterceptorChain::new(method.clone(), interceptors))
    }
}

impl fmt::Debug for InterceptorChainFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InterceptorChainFactory")
            .field("declarations", &self.declarations)
            .field("cached", &self.cached())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interceptor::register_interceptor;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use switchyard_core::{ApplicationContext, ThrownError, Value};

    struct Controller;
    struct BaseController;

    /// 记录调用顺序
    struct Trace {
        label: &'static str,
        log: Arc<Mutex<Vec<String>>>,
    }

    impl MethodInterceptor for Trace {
        fn invoke(&self, invocation: &mut ProceedingJoinPoint<'_>) -> CallResult {
            self.log.lock().push(format!("{}>", self.label));
            let result = invocation.proceed();
            self.log.lock().push(format!("<{}", self.label));
            result
        }
    }

    struct Outer(Trace);
    struct Inner(Trace);

    impl MethodInterceptor for Outer {
        fn invoke(&self, invocation: &mut ProceedingJoinPoint<'_>) -> CallResult {
            self.0.invoke(invocation)
        }
    }

    impl MethodInterceptor for Inner {
        fn invoke(&self, invocation: &mut ProceedingJoinPoint<'_>) -> CallResult {
            self.0.invoke(invocation)
        }
    }

    struct Deny;

    impl MethodInterceptor for Deny {
        fn invoke(&self, _invocation: &mut ProceedingJoinPoint<'_>) -> CallResult {
            Ok(Value::str("denied"))
        }
    }

    struct FillUser;

    impl MethodInterceptor for FillUser {
        fn invoke(&self, invocation: &mut ProceedingJoinPoint<'_>) -> CallResult {
            if !invocation.set_named_arg("user", Value::str("alice")) {
                return Err(ThrownError::msg("no user slot"));
            }
            invocation.proceed()
        }
    }

    fn names(args: &[&str]) -> Arc<[String]> {
        args.iter().map(|s| s.to_string()).collect::<Vec<_>>().into()
    }

    #[test]
    fn test_collect_order_and_dedup() {
        let mut hierarchy = TypeHierarchy::new();
        hierarchy.declare(TypeKey::of::<Controller>(), [TypeKey::of::<BaseController>()]);

        let method = MethodKey::of::<Controller>("index");
        let mut declarations = InterceptorDeclarations::new();
        declarations
            .on_type(TypeKey::of::<BaseController>(), "Audit".into())
            .on_type(TypeKey::of::<BaseController>(), "Timing".into())
            .on_type(TypeKey::of::<Controller>(), "Timing".into())
            .on_method(method.clone(), "Auth".into());

        assert_eq!(
            declarations.collect(&method, &hierarchy),
            vec![
                TypeKey::from("Auth"),
                TypeKey::from("Timing"),
                TypeKey::from("Audit"),
            ]
        );
    }

    #[test]
    fn test_nested_execution_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let context = Arc::new(ApplicationContext::new());
        register_interceptor(
            &context,
            Outer(Trace { label: "outer", log: Arc::clone(&log) }),
        )
        .unwrap();
        register_interceptor(
            &context,
            Inner(Trace { label: "inner", log: Arc::clone(&log) }),
        )
        .unwrap();

        let method = MethodKey::of::<Controller>("index");
        let mut declarations = InterceptorDeclarations::new();
        declarations
            .on_method(method.clone(), TypeKey::of::<Outer>())
            .on_method(method.clone(), TypeKey::of::<Inner>());

        let factory = InterceptorChainFactory::new(
            declarations,
            Arc::new(TypeHierarchy::new()),
            context,
        );
        let chain = factory.chain_for(&method).unwrap();

        let terminal_log = Arc::clone(&log);
        let terminal = move |_args: Arguments| -> CallResult {
            terminal_log.lock().push("call".to_string());
            Ok(Value::Int(1))
        };
        let result = chain.execute(names(&[]), Arguments::default(), &terminal).unwrap();

        assert_eq!(result, Value::Int(1));
        assert_eq!(*log.lock(), vec!["outer>", "inner>", "call", "<inner", "<outer"]);
    }

    #[test]
    fn test_short_circuit_skips_target() {
        let context = Arc::new(ApplicationContext::new());
        register_interceptor(&context, Deny).unwrap();

        let method = MethodKey::of::<Controller>("secret");
        let mut declarations = InterceptorDeclarations::new();
        declarations.on_type(TypeKey::of::<Controller>(), TypeKey::of::<Deny>());
        let factory = InterceptorChainFactory::new(
            declarations,
            Arc::new(TypeHierarchy::new()),
            context,
        );

        let calls = AtomicUsize::new(0);
        let terminal = |_args: Arguments| -> CallResult {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(Value::str("secret"))
        };
        let result = factory
            .chain_for(&method)
            .unwrap()
            .execute(names(&[]), Arguments::default(), &terminal)
            .unwrap();

        assert_eq!(result, Value::str("denied"));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_interceptor_fills_named_slot() {
        let context = Arc::new(ApplicationContext::new());
        register_interceptor(&context, FillUser).unwrap();

        let method = MethodKey::of::<Controller>("profile");
        let mut declarations = InterceptorDeclarations::new();
        declarations.on_method(method.clone(), TypeKey::of::<FillUser>());
        let factory = InterceptorChainFactory::new(
            declarations,
            Arc::new(TypeHierarchy::new()),
            context,
        );

        let terminal = |args: Arguments| -> CallResult {
            let user: String = args.value(1)?;
            Ok(Value::str(format!("hello {}", user)))
        };
        let result = factory
            .chain_for(&method)
            .unwrap()
            .execute(
                names(&["id", "user"]),
                Arguments::new(vec![Value::Int(3), Value::Null]),
                &terminal,
            )
            .unwrap();

        assert_eq!(result, Value::str("hello alice"));
    }

    #[test]
    fn test_chain_cached_per_method() {
        let factory = InterceptorChainFactory::new(
            InterceptorDeclarations::new(),
            Arc::new(TypeHierarchy::new()),
            Arc::new(ApplicationContext::new()),
        );
        let method = MethodKey::of::<Controller>("index");

        let first = factory.chain_for(&method).unwrap();
        let second = factory.chain_for(&method).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert!(first.is_empty());
        assert_eq!(factory.cached(), 1);
    }

    #[test]
    fn test_concurrent_first_access_builds_one_chain() {
        let context = ApplicationContext::new();
        register_interceptor(&context, Deny).unwrap();
        let method = MethodKey::of::<Controller>("index");
        let mut declarations = InterceptorDeclarations::new();
        declarations.on_method(method.clone(), TypeKey::of::<Deny>());
        let factory = InterceptorChainFactory::new(
            declarations,
            Arc::new(TypeHierarchy::new()),
            Arc::new(context),
        );

        let threads = 8;
        let barrier = std::sync::Barrier::new(threads);
        let chains: Vec<Arc<InterceptorChain>> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..threads)
                .map(|_| {
                    scope.spawn(|| {
                        barrier.wait();
                        factory.chain_for(&method).unwrap()
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert_eq!(factory.cached(), 1);
        assert!(chains.iter().all(|chain| Arc::ptr_eq(chain, &chains[0])));
        assert_eq!(chains[0].len(), 1);
    }

    #[test]
    fn test_missing_interceptor_bean() {
        let method = MethodKey::of::<Controller>("index");
        let mut declarations = InterceptorDeclarations::new();
        declarations.on_method(method.clone(), "Ghost".into());
        let factory = InterceptorChainFactory::new(
            declarations,
            Arc::new(TypeHierarchy::new()),
            Arc::new(ApplicationContext::new()),
        );

        assert!(matches!(
            factory.chain_for(&method),
            Err(AopError::Resolve { .. })
        ));
        assert_eq!(factory.cached(), 0);
    }
}

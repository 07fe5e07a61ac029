//! 对象容器
//!
//! 按类型（可选限定名）解析对象实例。Web 引擎的容器参数、拦截器实例都从这里取得。
//! 启动阶段注册，请求阶段只读。

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::config::{Environment, PropertySource};
use crate::error::{ContainerError, ContainerResult};
use crate::types::TypeKey;
use crate::utils::naming;

/// 容器中的对象
pub type Bean = Arc<dyn Any + Send + Sync>;

type BeanFactory = Arc<dyn Fn() -> Bean + Send + Sync>;

/// 作用域
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    /// 全局唯一实例
    Singleton,
    /// 每次解析创建新实例
    Prototype,
}

enum BeanSource {
    Instance(Bean),
    Factory(BeanFactory),
}

struct BeanEntry {
    name: String,
    source: BeanSource,
}

impl BeanEntry {
    fn scope(&self) -> Scope {
        match self.source {
            BeanSource::Instance(_) => Scope::Singleton,
            BeanSource::Factory(_) => Scope::Prototype,
        }
    }

    fn get(&self) -> Bean {
        match &self.source {
            BeanSource::Instance(bean) => Arc::clone(bean),
            BeanSource::Factory(factory) => factory(),
        }
    }
}

/// 容器接口
pub trait Container: Send + Sync {
    /// 按类型解析；给出限定名时按名称在该类型下精确查找
    fn resolve(&self, ty: &TypeKey, qualifier: Option<&str>) -> ContainerResult<Bean>;

    fn contains(&self, ty: &TypeKey, qualifier: Option<&str>) -> bool;

    /// 某个类型下全部对象的名称，按注册顺序
    fn bean_names(&self, ty: &TypeKey) -> Vec<String>;
}

/// 类型化的便捷方法
pub trait ContainerExt: Container {
    fn get_bean_by_type<T: Any + Send + Sync>(&self) -> ContainerResult<Arc<T>> {
        let bean = self.resolve(&TypeKey::of::<T>(), None)?;
        downcast_bean(bean, &TypeKey::of::<T>().to_string())
    }

    fn get_bean<T: Any + Send + Sync>(&self, name: &str) -> ContainerResult<Arc<T>> {
        let bean = self.resolve(&TypeKey::of::<T>(), Some(name))?;
        downcast_bean(bean, name)
    }
}

impl<C: Container + ?Sized> ContainerExt for C {}

fn downcast_bean<T: Any + Send + Sync>(bean: Bean, name: &str) -> ContainerResult<Arc<T>> {
    bean.downcast::<T>().map_err(|_| ContainerError::TypeMismatch {
        name: name.to_string(),
        expected: std::any::type_name::<T>(),
    })
}

/// 默认容器实现
pub struct ApplicationContext {
    beans: RwLock<HashMap<TypeKey, Vec<BeanEntry>>>,
    environment: Arc<Environment>,
}

impl fmt::Debug for ApplicationContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let beans = self.beans.read();
        let summary: Vec<(String, Vec<&str>)> = beans
            .iter()
            .map(|(ty, entries)| {
                (
                    ty.to_string(),
                    entries.iter().map(|e| e.name.as_str()).collect(),
                )
            })
            .collect();
        f.debug_struct("ApplicationContext")
            .field("beans", &summary)
            .field("environment", &self.environment)
            .finish()
    }
}

impl ApplicationContext {
    pub fn new() -> Self {
        Self::with_environment(Arc::new(Environment::new()))
    }

    pub fn with_environment(environment: Arc<Environment>) -> Self {
        Self {
            beans: RwLock::new(HashMap::new()),
            environment,
        }
    }

    pub fn builder() -> ApplicationContextBuilder {
        ApplicationContextBuilder::new()
    }

    pub fn environment(&self) -> &Arc<Environment> {
        &self.environment
    }

    /// 注册单例，名称由类型名推导（`UserService` -> `userService`）
    pub fn register_singleton<T: Any + Send + Sync>(&self, instance: T) -> ContainerResult<()> {
        let ty = TypeKey::of::<T>();
        let name = naming::bean_name_for(&ty);
        self.insert(ty, name, BeanSource::Instance(Arc::new(instance)))
    }

    /// 注册带名称的单例
    pub fn register_named<T: Any + Send + Sync>(
        &self,
        name: impl Into<String>,
        instance: T,
    ) -> ContainerResult<()> {
        self.insert(
            TypeKey::of::<T>(),
            name.into(),
            BeanSource::Instance(Arc::new(instance)),
        )
    }

    /// 以任意类型标识注册已经构造好的实例
    ///
    /// 用于 trait object：例如以拦截器类型为键保存 `Arc<dyn MethodInterceptor>`
    pub fn register_instance(
        &self,
        ty: TypeKey,
        name: impl Into<String>,
        instance: Bean,
    ) -> ContainerResult<()> {
        self.insert(ty, name.into(), BeanSource::Instance(instance))
    }

    /// 注册原型工厂，每次解析调用一次
    pub fn register_factory<T, F>(&self, name: impl Into<String>, factory: F) -> ContainerResult<()>
    where
        T: Any + Send + Sync,
        F: Fn() -> T + Send + Sync + 'static,
    {
        let factory: BeanFactory = Arc::new(move || Arc::new(factory()) as Bean);
        self.insert(TypeKey::of::<T>(), name.into(), BeanSource::Factory(factory))
    }

    pub fn scope_of(&self, ty: &TypeKey, name: &str) -> Option<Scope> {
        self.beans
            .read()
            .get(ty)?
            .iter()
            .find(|e| e.name == name)
            .map(BeanEntry::scope)
    }

    fn insert(&self, ty: TypeKey, name: String, source: BeanSource) -> ContainerResult<()> {
        let mut beans = self.beans.write();
        let entries = beans.entry(ty.clone()).or_default();
        if entries.iter().any(|e| e.name == name) {
            tracing::warn!("Bean '{}' already exists for type '{}', registration failed", name, ty);
            return Err(ContainerError::DuplicateBean { ty, name });
        }
        tracing::debug!("Registered bean '{}' of type '{}'", name, ty);
        entries.push(BeanEntry { name, source });
        Ok(())
    }
}

impl Default for ApplicationContext {
    fn default() -> Self {
        Self::new()
    }
}

impl Container for ApplicationContext {
    fn resolve(&self, ty: &TypeKey, qualifier: Option<&str>) -> ContainerResult<Bean> {
        let beans = self.beans.read();
        let entries = beans.get(ty).map(Vec::as_slice).unwrap_or_default();

        let not_found = || ContainerError::BeanNotFound {
            ty: ty.clone(),
            qualifier: qualifier.map(String::from),
        };

        match qualifier {
            Some(name) => entries
                .iter()
                .find(|e| e.name == name)
                .map(BeanEntry::get)
                .ok_or_else(not_found),
            None => match entries {
                [] => Err(not_found()),
                [only] => Ok(only.get()),
                many => Err(ContainerError::NoUniqueBean {
                    ty: ty.clone(),
                    count: many.len(),
                    names: many.iter().map(|e| e.name.clone()).collect(),
                }),
            },
        }
    }

    fn contains(&self, ty: &TypeKey, qualifier: Option<&str>) -> bool {
        let beans = self.beans.read();
        match (beans.get(ty), qualifier) {
            (Some(entries), Some(name)) => entries.iter().any(|e| e.name == name),
            (Some(entries), None) => !entries.is_empty(),
            (None, _) => false,
        }
    }

    fn bean_names(&self, ty: &TypeKey) -> Vec<String> {
        self.beans
            .read()
            .get(ty)
            .map(|entries| entries.iter().map(|e| e.name.clone()).collect())
            .unwrap_or_default()
    }
}

/// 上下文构建器
pub struct ApplicationContextBuilder {
    environment: Environment,
}

impl ApplicationContextBuilder {
    pub fn new() -> Self {
        Self {
            environment: Environment::new(),
        }
    }

    pub fn add_property_source(self, source: Box<dyn PropertySource>) -> Self {
        self.environment.add_property_source(source);
        self
    }

    pub fn set_active_profiles(self, profiles: Vec<String>) -> Self {
        self.environment.set_active_profiles(profiles);
        self
    }

    pub fn build(self) -> Arc<ApplicationContext> {
        Arc::new(ApplicationContext::with_environment(Arc::new(self.environment)))
    }
}

impl Default for ApplicationContextBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug)]
    struct UserRepository {
        table: &'static str,
    }

    #[test]
    fn test_resolve_by_type() {
        let ctx = ApplicationContext::new();
        ctx.register_singleton(UserRepository { table: "users" }).unwrap();

        let repo = ctx.get_bean_by_type::<UserRepository>().unwrap();
        assert_eq!(repo.table, "users");
        assert_eq!(ctx.bean_names(&TypeKey::of::<UserRepository>()), vec!["userRepository"]);
    }

    #[test]
    fn test_qualifier_and_ambiguity() {
        let ctx = ApplicationContext::new();
        ctx.register_named("primary", UserRepository { table: "a" }).unwrap();
        ctx.register_named("replica", UserRepository { table: "b" }).unwrap();

        assert_eq!(ctx.get_bean::<UserRepository>("replica").unwrap().table, "b");
        assert!(matches!(
            ctx.get_bean_by_type::<UserRepository>(),
            Err(ContainerError::NoUniqueBean { count: 2, .. })
        ));
        assert!(matches!(
            ctx.get_bean::<UserRepository>("missing"),
            Err(ContainerError::BeanNotFound { .. })
        ));
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let ctx = ApplicationContext::new();
        ctx.register_named("repo", UserRepository { table: "a" }).unwrap();
        let err = ctx.register_named("repo", UserRepository { table: "b" }).unwrap_err();
        assert!(matches!(err, ContainerError::DuplicateBean { .. }));
    }

    #[test]
    fn test_prototype_factory_creates_each_time() {
        static CREATED: AtomicUsize = AtomicUsize::new(0);

        let ctx = ApplicationContext::new();
        ctx.register_factory("counter", || CREATED.fetch_add(1, Ordering::SeqCst))
            .unwrap();

        let first = ctx.get_bean_by_type::<usize>().unwrap();
        let second = ctx.get_bean_by_type::<usize>().unwrap();
        assert_eq!((*first, *second), (0, 1));
        assert_eq!(
            ctx.scope_of(&TypeKey::of::<usize>(), "counter"),
            Some(Scope::Prototype)
        );
    }

    #[test]
    fn test_register_instance_under_custom_key() {
        let ctx = ApplicationContext::new();
        let key = TypeKey::from_static("AuditInterceptor");
        ctx.register_instance(key.clone(), "audit", Arc::new("trait object stand-in"))
            .unwrap();

        let bean = ctx.resolve(&key, None).unwrap();
        assert_eq!(*bean.downcast::<&str>().unwrap(), "trait object stand-in");
    }
}

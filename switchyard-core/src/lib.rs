// switchyard-core: 调度引擎的基础设施
//
// - 类型元数据与继承图（无反射的类型距离计算）
// - 动态值与参数
// - 处理器错误模型
// - 对象容器、配置环境、日志初始化

pub mod app;
pub mod config;
pub mod constants;
pub mod container;
pub mod error;
pub mod logging;
pub mod types;
pub mod utils;
pub mod value;

pub use app::SwitchyardApplication;
pub use config::{
    ConfigValue, Environment, EnvironmentPropertySource, MapPropertySource, PropertySource,
    TomlPropertySource,
};
pub use container::{
    ApplicationContext, ApplicationContextBuilder, Bean, Container, ContainerExt, Scope,
};
pub use error::{
    ApplicationError, ApplicationResult, CallResult, ContainerError, ContainerResult,
    Handled, MessageError, ThrownError,
};
pub use logging::{LogFormat, LogLevel, LoggingConfig};
pub use types::{
    well_known, CollectionKind, Described, Primitive, TypeDescriptor, TypeHierarchy, TypeKey,
    TypeKind,
};
pub use value::{Arguments, FromValue, Readable, Value, ValueError};

/// 常用类型
pub mod prelude {
    pub use crate::app::SwitchyardApplication;
    pub use crate::config::{ConfigValue, Environment, MapPropertySource, PropertySource};
    pub use crate::container::{ApplicationContext, Container, ContainerExt};
    pub use crate::error::{CallResult, ThrownError};
    pub use crate::logging::{LogFormat, LogLevel, LoggingConfig};
    pub use crate::types::{CollectionKind, Described, TypeDescriptor, TypeHierarchy, TypeKey};
    pub use crate::value::{Arguments, FromValue, Value};
    pub use anyhow::{anyhow, Context};
}

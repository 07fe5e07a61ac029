//! 框架配置常量定义
//!
//! 定义 Web 层使用的配置键名称

// ==================== Server 配置 ====================

/// 服务器监听地址
pub const SERVER_HOST: &str = "server.host";

/// 服务器监听端口
pub const SERVER_PORT: &str = "server.port";

/// 请求体最大字节数
pub const SERVER_MAX_BODY_SIZE: &str = "server.max-body-size";

/// 是否启用 CORS
pub const SERVER_ENABLE_CORS: &str = "server.enable-cors";

/// 是否启用请求日志
pub const SERVER_ENABLE_REQUEST_LOGGING: &str = "server.enable-request-logging";

// ==================== Dispatcher 配置 ====================

/// 调度器挂载前缀
pub const DISPATCHER_PREFIX: &str = "dispatcher.prefix";

/// 错误响应是否包含内部错误详情
pub const DISPATCHER_ERROR_DETAILS: &str = "dispatcher.error-details";

// ==================== 视图配置 ====================

/// 模板目录
pub const VIEW_TEMPLATE_DIR: &str = "view.template-dir";

/// 视图名没有扩展名时追加的后缀
pub const VIEW_SUFFIX: &str = "view.suffix";

// ==================== 请求头 ====================

/// 请求 ID 头
pub const X_REQUEST_ID: &str = "x-request-id";

//! 视图渲染
//!
//! 结果映射只依赖 [`ViewRenderer`]：给定视图名和模型，返回渲染后的文本。
//! 默认实现 [`TeraViewRenderer`] 基于 Tera 模板引擎。

use std::collections::BTreeMap;
use std::error::Error as StdError;

use tera::Tera;
use thiserror::Error;

use switchyard_core::{Environment, Value};

use crate::constants::{VIEW_SUFFIX, VIEW_TEMPLATE_DIR};

/// 视图模型
pub type Model = BTreeMap<String, Value>;

/// 视图错误
#[derive(Error, Debug)]
pub enum ViewError {
    #[error("No view renderer found for view '{view}'")]
    NoRendererFound { view: String },

    #[error("Failed to render view '{view}': {cause}")]
    Rendering { view: String, cause: String },

    #[error("Failed to initialize templates: {0}")]
    Init(String),
}

/// 视图渲染器
pub trait ViewRenderer: Send + Sync {
    fn render(&self, view: &str, model: &Model) -> Result<String, ViewError>;

    fn content_type(&self) -> &str {
        "text/html; charset=utf-8"
    }
}

/// 动态值转换为 JSON，供模板使用
pub fn value_to_json(value: &Value) -> serde_json::Value {
    use serde_json::Value as Json;

    match value {
        Value::Null | Value::Object(_) => Json::Null,
        Value::Bool(b) => Json::Bool(*b),
        Value::Int(i) => Json::from(*i),
        Value::Float(f) => serde_json::Number::from_f64(*f)
            .map(Json::Number)
            .unwrap_or(Json::Null),
        Value::Char(c) => Json::String(c.to_string()),
        Value::Str(s) => Json::String(s.clone()),
        Value::Bytes(b) => Json::String(String::from_utf8_lossy(b).into_owned()),
        Value::Enum { variant, .. } => Json::String(variant.clone()),
        Value::Array(items) | Value::Collection { items, .. } => {
            Json::Array(items.iter().map(value_to_json).collect())
        }
        Value::Map(entries) => Json::Object(
            entries
                .iter()
                .map(|(k, v)| (k.to_string(), value_to_json(v)))
                .collect(),
        ),
    }
}

fn error_chain(error: &dyn StdError) -> String {
    let mut message = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

/// Tera 视图渲染器
#[derive(Debug)]
pub struct TeraViewRenderer {
    tera: Tera,
    suffix: String,
}

impl TeraViewRenderer {
    /// 加载目录下的全部模板
    pub fn new(template_dir: &str) -> Result<Self, ViewError> {
        let pattern = format!("{}/**/*", template_dir.trim_end_matches('/'));
        let tera = Tera::new(&pattern).map_err(|e| {
            ViewError::Init(format!(
                "Failed to initialize Tera with pattern '{}': {}",
                pattern,
                error_chain(&e)
            ))
        })?;

        tracing::info!(pattern = %pattern, "Template engine created");
        Ok(Self {
            tera,
            suffix: ".html".to_string(),
        })
    }

    /// 从 Environment 创建
    pub fn from_environment(env: &Environment) -> Result<Self, ViewError> {
        let dir = env.get_string_or(VIEW_TEMPLATE_DIR, "templates");
        let renderer = Self::new(&dir)?;
        Ok(match env.get_string(VIEW_SUFFIX) {
            Some(suffix) => renderer.with_suffix(suffix),
            None => renderer,
        })
    }

    /// 使用内存中的模板（名称, 内容）
    pub fn from_templates<I, N, C>(templates: I) -> Result<Self, ViewError>
    where
        I: IntoIterator<Item = (N, C)>,
        N: AsRef<str>,
        C: AsRef<str>,
    {
        let mut tera = Tera::default();
        tera.add_raw_templates(templates)
            .map_err(|e| ViewError::Init(error_chain(&e)))?;
        Ok(Self {
            tera,
            suffix: ".html".to_string(),
        })
    }

    pub fn with_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.suffix = suffix.into();
        self
    }

    /// 视图名没有扩展名时追加后缀
    fn template_name(&self, view: &str) -> String {
        let last = view.rsplit('/').next().unwrap_or(view);
        if last.contains('.') {
            view.to_string()
        } else {
            format!("{}{}", view, self.suffix)
        }
    }
}

impl ViewRenderer for TeraViewRenderer {
    fn render(&self, view: &str, model: &Model) -> Result<String, ViewError> {
        let name = self.template_name(view);
        let mut context = tera::Context::new();
        for (key, value) in model {
            context.insert(key.as_str(), &value_to_json(value));
        }

        self.tera
            .render(&name, &context)
            .map_err(|e| ViewError::Rendering {
                view: name,
                cause: error_chain(&e),
            })
    }
}

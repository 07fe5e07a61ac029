//! 结果映射
//!
//! 处理器方法可以声明多种结果处理方式，按固定顺序尝试：
//! 视图 -> 直接写出 -> 重定向 -> 状态码。第一个适用并成功的生效，其余忽略。
//! 模板中的 `{0}` 会被替换为返回值。

use http::StatusCode;

use switchyard_core::{Readable, ThrownError, Value};

use crate::error::WebError;
use crate::request::RequestContext;
use crate::view::{Model, ViewError, ViewRenderer};

/// 结果处理方式
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// 渲染视图；没有给出视图名时使用返回值（字符串）或默认视图
    View(Option<String>),
    /// 把返回值写入响应体
    Write,
    /// 重定向；没有给出目标时使用返回值
    Redirect(Option<String>),
    /// 设置状态码，可带消息
    Status {
        code: StatusCode,
        message: Option<String>,
    },
}

impl Outcome {
    fn rank(&self) -> u8 {
        match self {
            Outcome::View(_) => 0,
            Outcome::Write => 1,
            Outcome::Redirect(_) => 2,
            Outcome::Status { .. } => 3,
        }
    }

    /// 按固定优先级排序
    pub fn sort(outcomes: &mut [Outcome]) {
        outcomes.sort_by_key(Outcome::rank);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Applied {
    Yes,
    NotApplicable,
}

/// `{0}` 替换为返回值
pub fn format_template(template: &str, value: &Value) -> String {
    template.replace("{0}", &value.to_string())
}

/// 依次尝试结果处理方式；都不适用时保持默认的 200 空响应
pub fn apply(
    outcomes: &[Outcome],
    default_view: Option<&str>,
    value: &Value,
    ctx: &RequestContext,
    views: Option<&dyn ViewRenderer>,
) -> Result<(), WebError> {
    for outcome in outcomes {
        let applied = match outcome {
            Outcome::View(template) => render_view(template.as_deref(), default_view, value, ctx, views)?,
            Outcome::Write => write_value(value, ctx)?,
            Outcome::Redirect(template) => redirect(template.as_deref(), value, ctx)?,
            Outcome::Status { code, message } => {
                let mut response = ctx.response();
                response.set_status(*code);
                if let Some(message) = message {
                    response.default_content_type("text/plain; charset=utf-8");
                    response.write_str(&format_template(message, value));
                }
                Applied::Yes
            }
        };

        if applied == Applied::Yes {
            return Ok(());
        }
    }
    Ok(())
}

fn render_view(
    template: Option<&str>,
    default_view: Option<&str>,
    value: &Value,
    ctx: &RequestContext,
    views: Option<&dyn ViewRenderer>,
) -> Result<Applied, WebError> {
    let name = match template {
        Some(template) => format_template(template, value),
        None => match value.as_str() {
            Some(name) => name.to_string(),
            None => default_view.unwrap_or_default().to_string(),
        },
    };
    if name.is_empty() {
        return Ok(Applied::NotApplicable);
    }

    let renderer = views.ok_or_else(|| ViewError::NoRendererFound { view: name.clone() })?;

    let mut model = Model::new();
    if let Value::Map(entries) = value {
        for (key, entry) in entries {
            model.insert(key.to_string(), entry.clone());
        }
    }
    model.insert("result".to_string(), value.clone());

    let html = renderer.render(&name, &model)?;
    tracing::debug!("Rendered view '{}'", name);

    let mut response = ctx.response();
    response.default_content_type(renderer.content_type());
    response.write_str(&html);
    Ok(Applied::Yes)
}

fn write_value(value: &Value, ctx: &RequestContext) -> Result<Applied, WebError> {
    match value {
        Value::Null => Ok(Applied::NotApplicable),
        Value::Bytes(bytes) => {
            let mut response = ctx.response();
            response.default_content_type("application/octet-stream");
            response.write(bytes);
            Ok(Applied::Yes)
        }
        Value::Object(_) => {
            let Some(readable) = value.downcast::<Readable>() else {
                return Ok(Applied::NotApplicable);
            };
            match readable.drain() {
                Some(Ok(bytes)) => {
                    let mut response = ctx.response();
                    response.default_content_type("application/octet-stream");
                    response.write(&bytes);
                    Ok(Applied::Yes)
                }
                Some(Err(e)) => Err(WebError::Handler(ThrownError::new(e))),
                None => Ok(Applied::NotApplicable),
            }
        }
        other => {
            let mut response = ctx.response();
            response.default_content_type("text/plain; charset=utf-8");
            response.write_str(&other.to_string());
            Ok(Applied::Yes)
        }
    }
}

fn redirect(template: Option<&str>, value: &Value, ctx: &RequestContext) -> Result<Applied, WebError> {
    let target = match template {
        Some(template) => format_template(template, value),
        None => value.to_string(),
    };
    if target.is_empty() {
        return Ok(Applied::NotApplicable);
    }
    ctx.response().redirect(&target)?;
    Ok(Applied::Yes)
}

#[cfg(test)]
mod tests {
    use http::Method;

    use super::*;
    use crate::view::TeraViewRenderer;

    fn ctx() -> RequestContext {
        RequestContext::new(Method::GET, "/")
    }

    #[test]
    fn test_fixed_priority_order() {
        let mut outcomes = vec![
            Outcome::Status {
                code: StatusCode::CREATED,
                message: None,
            },
            Outcome::Redirect(None),
            Outcome::Write,
        ];
        Outcome::sort(&mut outcomes);
        assert_eq!(outcomes[0], Outcome::Write);

        let ctx = ctx();
        apply(&outcomes, None, &Value::str("hello"), &ctx, None).unwrap();
        let response = ctx.response();
        assert_eq!(response.body_text(), "hello");
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[test]
    fn test_null_write_falls_through_to_status() {
        let outcomes = vec![
            Outcome::Write,
            Outcome::Status {
                code: StatusCode::ACCEPTED,
                message: Some("queued {0}".into()),
            },
        ];
        let ctx = ctx();
        apply(&outcomes, None, &Value::Null, &ctx, None).unwrap();
        let response = ctx.response();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        assert_eq!(response.body_text(), "queued ");
    }

    #[test]
    fn test_templated_redirect() {
        let ctx = ctx();
        apply(
            &[Outcome::Redirect(Some("/users/{0}".into()))],
            None,
            &Value::Int(42),
            &ctx,
            None,
        )
        .unwrap();
        let response = ctx.response();
        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(response.header("location"), Some("/users/42"));
    }

    #[test]
    fn test_readable_is_drained() {
        let ctx = ctx();
        let stream = Value::reader(std::io::Cursor::new(b"streamed".to_vec()));
        apply(&[Outcome::Write], None, &stream, &ctx, None).unwrap();
        assert_eq!(ctx.response().body(), b"streamed");
    }

    #[test]
    fn test_view_rendering_and_missing_renderer() {
        let renderer = TeraViewRenderer::from_templates([("greet.html", "Hi {{ result }}")]).unwrap();
        let ctx = ctx();
        apply(
            &[Outcome::View(Some("greet".into()))],
            None,
            &Value::str("Bob"),
            &ctx,
            Some(&renderer),
        )
        .unwrap();
        assert_eq!(ctx.response().body_text(), "Hi Bob");

        let err = apply(&[Outcome::View(None)], Some("home"), &Value::Null, &ctx, None).unwrap_err();
        assert!(matches!(err, WebError::View(ViewError::NoRendererFound { .. })));
    }

    #[test]
    fn test_nothing_applicable_leaves_empty_ok() {
        let ctx = ctx();
        apply(&[Outcome::Write, Outcome::Redirect(None)], None, &Value::Null, &ctx, None).unwrap();
        let response = ctx.response();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(!response.is_committed());
    }
}

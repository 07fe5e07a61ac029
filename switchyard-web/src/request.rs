//! 请求上下文
//!
//! 一次请求在调度过程中需要的全部状态：方法、路径、查询参数、请求头、
//! 请求 / 会话属性、响应缓冲，以及路径变量绑定栈。
//!
//! 路径变量绑定是一个栈：每次调度（包括嵌套的 include）压入一层，
//! 结束时由 [`BindingScope`] 弹出，所以外层请求在 include 返回后仍然看到自己的绑定。

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use http::{HeaderMap, HeaderName, HeaderValue, Method};
use parking_lot::{Mutex, MutexGuard, RwLock};

use switchyard_core::Value;

use crate::dispatcher::Dispatcher;
use crate::error::WebError;
use crate::response::ResponseSink;

/// 一层路径变量绑定（已解码）
pub type PathBindings = HashMap<String, String>;

/// 会话
pub struct Session {
    id: String,
    attributes: RwLock<HashMap<String, Value>>,
}

impl Session {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            attributes: RwLock::new(HashMap::new()),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn get(&self, name: &str) -> Option<Value> {
        self.attributes.read().get(name).cloned()
    }

    pub fn set(&self, name: impl Into<String>, value: impl Into<Value>) {
        self.attributes.write().insert(name.into(), value.into());
    }

    pub fn remove(&self, name: &str) -> Option<Value> {
        self.attributes.write().remove(name)
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("attributes", &self.attributes.read().len())
            .finish()
    }
}

/// 请求上下文
pub struct RequestContext {
    method: Method,
    path: String,
    query: Vec<(String, String)>,
    headers: HeaderMap,
    body: Bytes,
    attributes: Mutex<HashMap<String, Value>>,
    session: Option<Arc<Session>>,
    response: Mutex<ResponseSink>,
    bindings: Mutex<Vec<PathBindings>>,
    dispatcher: Mutex<Option<Arc<Dispatcher>>>,
}

impl RequestContext {
    /// `uri` 可以带查询串，例如 `/users/42?verbose=true`
    pub fn new(method: Method, uri: &str) -> Self {
        Self::builder(method, uri).build()
    }

    pub fn builder(method: Method, uri: &str) -> RequestContextBuilder {
        RequestContextBuilder::new(method, uri)
    }

    /// 由 HTTP 请求的各部分构造
    pub fn from_parts(method: Method, uri: &http::Uri, headers: HeaderMap, body: Bytes) -> Self {
        let path = match uri.path() {
            "" => "/".to_string(),
            p => p.to_string(),
        };
        Self {
            method,
            path,
            query: parse_query(uri.query().unwrap_or("")),
            headers,
            body,
            attributes: Mutex::new(HashMap::new()),
            session: None,
            response: Mutex::new(ResponseSink::new()),
            bindings: Mutex::new(Vec::new()),
            dispatcher: Mutex::new(None),
        }
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    /// 请求路径（不含查询串）
    pub fn path(&self) -> &str {
        &self.path
    }

    // ==================== 查询参数 ====================

    /// 全部查询参数，按出现顺序
    pub fn query_pairs(&self) -> &[(String, String)] {
        &self.query
    }

    /// 第一个同名查询参数
    pub fn query_param(&self, name: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// 全部同名查询参数
    pub fn query_params(&self, name: &str) -> Vec<&str> {
        self.query
            .iter()
            .filter(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
            .collect()
    }

    pub fn has_query_param(&self, name: &str) -> bool {
        self.query.iter().any(|(k, _)| k == name)
    }

    // ==================== 请求头 ====================

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// 第一个同名请求头（名称不区分大小写）
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn header_values(&self, name: &str) -> Vec<&str> {
        self.headers
            .get_all(name)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .collect()
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    // ==================== 属性与会话 ====================

    pub fn attribute(&self, name: &str) -> Option<Value> {
        self.attributes.lock().get(name).cloned()
    }

    pub fn set_attribute(&self, name: impl Into<String>, value: impl Into<Value>) {
        self.attributes.lock().insert(name.into(), value.into());
    }

    pub fn remove_attribute(&self, name: &str) -> Option<Value> {
        self.attributes.lock().remove(name)
    }

    pub fn session(&self) -> Option<&Arc<Session>> {
        self.session.as_ref()
    }

    // ==================== 响应 ====================

    /// 锁定响应缓冲；不要在持有期间调用 `include`
    pub fn response(&self) -> MutexGuard<'_, ResponseSink> {
        self.response.lock()
    }

    pub fn into_response(self) -> ResponseSink {
        self.response.into_inner()
    }

    // ==================== 路径变量 ====================

    /// 压入一层路径变量绑定，返回的守卫在离开作用域时弹出
    pub fn push_bindings(&self, bindings: PathBindings) -> BindingScope<'_> {
        let mut stack = self.bindings.lock();
        stack.push(bindings);
        BindingScope {
            context: self,
            depth: stack.len(),
        }
    }

    /// 当前（最内层）调度的路径变量
    pub fn path_variable(&self, name: &str) -> Option<String> {
        self.bindings
            .lock()
            .last()
            .and_then(|top| top.get(name).cloned())
    }

    pub fn binding_depth(&self) -> usize {
        self.bindings.lock().len()
    }

    // ==================== 嵌套调度 ====================

    pub(crate) fn attach_dispatcher(&self, dispatcher: &Arc<Dispatcher>) {
        let mut slot = self.dispatcher.lock();
        if slot.is_none() {
            *slot = Some(Arc::clone(dispatcher));
        }
    }

    /// 把 `path` 交给当前调度器再走一遍路由，结果写入同一个响应
    ///
    /// 嵌套调用期间压入新的路径变量绑定，返回后恢复外层绑定。
    pub fn include(&self, path: &str) -> Result<(), WebError> {
        let dispatcher = self
            .dispatcher
            .lock()
            .clone()
            .ok_or_else(|| WebError::Configuration("include() called outside of a dispatch".into()))?;
        dispatcher.include(self, path)
    }
}

impl fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestContext")
            .field("method", &self.method)
            .field("path", &self.path)
            .field("query", &self.query)
            .field("binding_depth", &self.binding_depth())
            .finish()
    }
}

/// 路径变量绑定的作用域守卫
pub struct BindingScope<'a> {
    context: &'a RequestContext,
    depth: usize,
}

impl Drop for BindingScope<'_> {
    fn drop(&mut self) {
        let mut stack = self.context.bindings.lock();
        stack.truncate(self.depth - 1);
    }
}

fn parse_query(query: &str) -> Vec<(String, String)> {
    url::form_urlencoded::parse(query.as_bytes())
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect()
}

/// 请求上下文构建器（测试与嵌入场景）
pub struct RequestContextBuilder {
    method: Method,
    path: String,
    query: Vec<(String, String)>,
    headers: HeaderMap,
    body: Bytes,
    attributes: HashMap<String, Value>,
    session: Option<Arc<Session>>,
}

impl RequestContextBuilder {
    fn new(method: Method, uri: &str) -> Self {
        let (path, query) = match uri.split_once('?') {
            Some((path, query)) => (path, parse_query(query)),
            None => (uri, Vec::new()),
        };
        Self {
            method,
            path: if path.is_empty() { "/".into() } else { path.into() },
            query,
            headers: HeaderMap::new(),
            body: Bytes::new(),
            attributes: HashMap::new(),
            session: None,
        }
    }

    /// 追加请求头；名称或值非法时忽略
    pub fn header(mut self, name: &str, value: &str) -> Self {
        match (HeaderName::try_from(name), HeaderValue::from_str(value)) {
            (Ok(name), Ok(value)) => {
                self.headers.append(name, value);
            }
            _ => tracing::warn!("Ignoring invalid header {}: {}", name, value),
        }
        self
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    pub fn attribute(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    pub fn session(mut self, session: Arc<Session>) -> Self {
        self.session = Some(session);
        self
    }

    pub fn build(self) -> RequestContext {
        RequestContext {
            method: self.method,
            path: self.path,
            query: self.query,
            headers: self.headers,
            body: self.body,
            attributes: Mutex::new(self.attributes),
            session: self.session,
            response: Mutex::new(ResponseSink::new()),
            bindings: Mutex::new(Vec::new()),
            dispatcher: Mutex::new(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_parsing_keeps_order_and_decodes() {
        let ctx = RequestContext::new(Method::GET, "/search?var=a&var=b%20c&q=x+y");
        assert_eq!(ctx.path(), "/search");
        assert_eq!(ctx.query_params("var"), vec!["a", "b c"]);
        assert_eq!(ctx.query_param("q"), Some("x y"));
        assert!(!ctx.has_query_param("missing"));
    }

    #[test]
    fn test_binding_stack_restores_outer_scope() {
        let ctx = RequestContext::new(Method::GET, "/");
        let outer = ctx.push_bindings(PathBindings::from([("id".to_string(), "1".to_string())]));
        {
            let _inner =
                ctx.push_bindings(PathBindings::from([("id".to_string(), "2".to_string())]));
            assert_eq!(ctx.path_variable("id").as_deref(), Some("2"));
            assert_eq!(ctx.binding_depth(), 2);
        }
        assert_eq!(ctx.path_variable("id").as_deref(), Some("1"));
        drop(outer);
        assert_eq!(ctx.binding_depth(), 0);
        assert_eq!(ctx.path_variable("id"), None);
    }

    #[test]
    fn test_headers_are_case_insensitive() {
        let ctx = RequestContext::builder(Method::GET, "/")
            .header("X-Test", "one")
            .header("x-test", "two")
            .build();
        assert_eq!(ctx.header("x-TEST"), Some("one"));
        assert_eq!(ctx.header_values("X-Test"), vec!["one", "two"]);
    }

    #[test]
    fn test_session_and_request_attributes() {
        let session = Arc::new(Session::new("s-1"));
        session.set("user", "alice");
        let ctx = RequestContext::builder(Method::GET, "/")
            .session(session)
            .attribute("trace", 7)
            .build();

        assert_eq!(ctx.session().unwrap().get("user"), Some(Value::str("alice")));
        assert_eq!(ctx.attribute("trace"), Some(Value::Int(7)));
        assert_eq!(ctx.remove_attribute("trace"), Some(Value::Int(7)));
        assert_eq!(ctx.attribute("trace"), None);
    }

    #[test]
    fn test_include_without_dispatcher_fails() {
        let ctx = RequestContext::new(Method::GET, "/");
        assert!(matches!(ctx.include("/x"), Err(WebError::Configuration(_))));
    }
}

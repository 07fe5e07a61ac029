//! 响应缓冲
//!
//! 处理器、异常处理器和结果映射都写入同一个 [`ResponseSink`]，
//! 请求结束后由服务器层转换为 HTTP 响应。

use http::header::{HeaderName, HeaderValue, CONTENT_TYPE, LOCATION};
use http::{HeaderMap, StatusCode};

use crate::error::WebError;

/// 响应缓冲
#[derive(Debug)]
pub struct ResponseSink {
    status: StatusCode,
    headers: HeaderMap,
    body: Vec<u8>,
    committed: bool,
}

impl ResponseSink {
    pub fn new() -> Self {
        Self {
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            body: Vec::new(),
            committed: false,
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn set_status(&mut self, status: StatusCode) {
        self.status = status;
        self.committed = true;
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// 设置响应头，覆盖同名头
    pub fn set_header(&mut self, name: &str, value: &str) -> Result<(), WebError> {
        let name = HeaderName::try_from(name)
            .map_err(|e| WebError::InvalidHeader(format!("{}: {}", name, e)))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| WebError::InvalidHeader(format!("{}: {}", name, e)))?;
        self.headers.insert(name, value);
        Ok(())
    }

    /// 没有 Content-Type 时设置
    pub fn default_content_type(&mut self, content_type: &str) {
        if self.headers.contains_key(CONTENT_TYPE) {
            return;
        }
        if let Ok(value) = HeaderValue::from_str(content_type) {
            self.headers.insert(CONTENT_TYPE, value);
        }
    }

    pub fn write(&mut self, bytes: &[u8]) {
        self.body.extend_from_slice(bytes);
        self.committed = true;
    }

    pub fn write_str(&mut self, text: &str) {
        self.write(text.as_bytes());
    }

    /// 302 重定向
    pub fn redirect(&mut self, location: &str) -> Result<(), WebError> {
        let value = HeaderValue::from_str(location)
            .map_err(|e| WebError::InvalidHeader(format!("Location {}: {}", location, e)))?;
        self.headers.insert(LOCATION, value);
        self.body.clear();
        self.set_status(StatusCode::FOUND);
        Ok(())
    }

    /// 丢弃已写入的内容，用错误响应替换
    pub fn reset(&mut self) {
        self.status = StatusCode::OK;
        self.headers.clear();
        self.body.clear();
        self.committed = false;
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// 响应体的文本形式（测试和日志用）
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// 是否已有处理器写入过状态、重定向或响应体
    pub fn is_committed(&self) -> bool {
        self.committed
    }

    pub fn into_parts(self) -> (StatusCode, HeaderMap, Vec<u8>) {
        (self.status, self.headers, self.body)
    }
}

impl Default for ResponseSink {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redirect_sets_location_and_found() {
        let mut sink = ResponseSink::new();
        sink.write_str("ignored");
        sink.redirect("/login?next=%2Fhome").unwrap();

        assert_eq!(sink.status(), StatusCode::FOUND);
        assert_eq!(sink.header("location"), Some("/login?next=%2Fhome"));
        assert!(sink.body().is_empty());
        assert!(sink.is_committed());
    }

    #[test]
    fn test_default_content_type_keeps_explicit_value() {
        let mut sink = ResponseSink::new();
        sink.set_header("content-type", "application/json").unwrap();
        sink.default_content_type("text/plain; charset=utf-8");
        assert_eq!(sink.header("content-type"), Some("application/json"));
    }

    #[test]
    fn test_invalid_header_value_is_rejected() {
        let mut sink = ResponseSink::new();
        assert!(matches!(
            sink.set_header("x-bad", "line\nbreak"),
            Err(WebError::InvalidHeader(_))
        ));
    }
}

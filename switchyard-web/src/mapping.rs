//! 路由映射
//!
//! - [`PathPattern`] 把 `/users/{id}/posts/{post}` 编译为锚定的正则，
//!   每个 `{name}` 变成一个捕获组 `([^/]+)`，其余字符按字面量转义；
//!   请求路径是百分号编码的，字面量中的非 ASCII 字符按 UTF-8 字节编码后匹配
//! - [`PathVariableIndex`] 变量名到捕获组编号（从 1 开始）的映射
//! - [`RouteMapping`] 路径模式加上方法、参数、请求头、Content-Type、Accept 条件，
//!   每满足一个声明的条件，匹配置信度加一；声明了但不满足则不匹配

use std::collections::HashMap;
use std::fmt;

use http::header::{ACCEPT, CONTENT_TYPE};
use http::Method;
use regex::Regex;

use crate::error::WebError;
use crate::request::{PathBindings, RequestContext};

/// 路径变量索引
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PathVariableIndex {
    names: Vec<String>,
}

impl PathVariableIndex {
    /// 变量对应的捕获组编号（从 1 开始）
    pub fn group_of(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|n| n == name).map(|i| i + 1)
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// 字面量部分的正则；非 ASCII 字符匹配其百分号编码（十六进制不区分大小写）
fn literal(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut buf = [0u8; 4];
    for ch in text.chars() {
        if ch.is_ascii() {
            out.push_str(&regex::escape(ch.encode_utf8(&mut buf)));
        } else {
            for byte in ch.encode_utf8(&mut buf).bytes() {
                out.push_str(&format!("%(?i:{:02X})", byte));
            }
        }
    }
    out
}

/// 编译后的路径模式
#[derive(Debug, Clone)]
pub struct PathPattern {
    template: String,
    regex: Regex,
    index: PathVariableIndex,
}

impl PathPattern {
    pub fn compile(template: &str) -> Result<Self, WebError> {
        let invalid = |reason: &str| {
            WebError::Configuration(format!("Invalid path pattern '{}': {}", template, reason))
        };

        let mut pattern = String::from("^");
        let mut names: Vec<String> = Vec::new();
        let mut rest = template;

        while let Some(open) = rest.find('{') {
            pattern.push_str(&literal(&rest[..open]));
            let after = &rest[open + 1..];
            let close = after.find('}').ok_or_else(|| invalid("unclosed '{'"))?;
            let name = after[..close].trim();

            if name.is_empty() || name.contains('{') || name.contains('/') {
                return Err(invalid("empty or malformed variable name"));
            }
            if names.iter().any(|n| n == name) {
                return Err(invalid(&format!("duplicate variable '{}'", name)));
            }

            names.push(name.to_string());
            pattern.push_str("([^/]+)");
            rest = &after[close + 1..];
        }
        if rest.contains('}') {
            return Err(invalid("unmatched '}'"));
        }
        pattern.push_str(&literal(rest));
        pattern.push('$');

        let regex = Regex::new(&pattern).map_err(|e| invalid(&e.to_string()))?;
        tracing::debug!("Compiled path pattern {} -> {}", template, pattern);

        Ok(Self {
            template: template.to_string(),
            regex,
            index: PathVariableIndex { names },
        })
    }

    pub fn template(&self) -> &str {
        &self.template
    }

    pub fn index(&self) -> &PathVariableIndex {
        &self.index
    }

    pub fn regex(&self) -> &Regex {
        &self.regex
    }

    /// 匹配整条路径
    pub fn matches(&self, path: &str) -> Option<PathMatch> {
        let captures = self.regex.captures(path)?;
        let groups = (1..captures.len())
            .map(|i| captures.get(i).map(|m| m.as_str().to_string()))
            .collect();
        Some(PathMatch {
            groups,
            index: self.index.clone(),
        })
    }
}

impl fmt::Display for PathPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.template)
    }
}

/// 一次路径匹配的结果
#[derive(Debug, Clone, PartialEq)]
pub struct PathMatch {
    groups: Vec<Option<String>>,
    index: PathVariableIndex,
}

impl PathMatch {
    /// 捕获组数量（即模式中的变量个数）
    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    /// 原始（未解码）捕获值
    pub fn raw(&self, name: &str) -> Option<&str> {
        let group = self.index.group_of(name)?;
        self.groups.get(group - 1)?.as_deref()
    }

    /// URL 解码后的全部绑定；解码失败时保留原始值
    pub fn bindings(&self) -> PathBindings {
        let mut bindings = HashMap::with_capacity(self.groups.len());
        for (name, raw) in self.index.names().iter().zip(&self.groups) {
            if let Some(raw) = raw {
                let value = urlencoding::decode(raw)
                    .map(|v| v.into_owned())
                    .unwrap_or_else(|_| raw.clone());
                bindings.insert(name.clone(), value);
            }
        }
        bindings
    }
}

/// 参数或请求头条件：`name` 表示必须存在，`name=value` 表示必须等于
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Requirement {
    Present(String),
    Equals(String, String),
}

impl Requirement {
    pub fn parse(expr: &str) -> Self {
        match expr.split_once('=') {
            Some((name, value)) => Requirement::Equals(name.trim().into(), value.trim().into()),
            None => Requirement::Present(expr.trim().into()),
        }
    }

    fn satisfied_by<'a>(&self, lookup: impl Fn(&str) -> Vec<&'a str>) -> bool {
        match self {
            Requirement::Present(name) => !lookup(name.as_str()).is_empty(),
            Requirement::Equals(name, expected) => lookup(name.as_str())
                .iter()
                .any(|v| *v == expected.as_str()),
        }
    }
}

/// 路由映射
#[derive(Debug, Clone)]
pub struct RouteMapping {
    patterns: Vec<PathPattern>,
    methods: Vec<Method>,
    params: Vec<Requirement>,
    headers: Vec<Requirement>,
    consumes: Vec<String>,
    produces: Vec<String>,
}

impl RouteMapping {
    pub fn builder() -> RouteMappingBuilder {
        RouteMappingBuilder::default()
    }

    pub fn get(path: &str) -> RouteMappingBuilder {
        Self::builder().path(path).method(Method::GET)
    }

    pub fn post(path: &str) -> RouteMappingBuilder {
        Self::builder().path(path).method(Method::POST)
    }

    pub fn put(path: &str) -> RouteMappingBuilder {
        Self::builder().path(path).method(Method::PUT)
    }

    pub fn delete(path: &str) -> RouteMappingBuilder {
        Self::builder().path(path).method(Method::DELETE)
    }

    pub fn patterns(&self) -> &[PathPattern] {
        &self.patterns
    }

    pub fn methods(&self) -> &[Method] {
        &self.methods
    }

    /// 变量是否在每个路径模式中都存在
    pub fn declares_variable(&self, name: &str) -> bool {
        !self.patterns.is_empty()
            && self
                .patterns
                .iter()
                .all(|p| p.index().group_of(name).is_some())
    }

    /// 测试请求，返回路径匹配和置信度
    ///
    /// `path` 是去掉调度器前缀后的相对路径。
    pub fn test(&self, ctx: &RequestContext, path: &str) -> Option<(PathMatch, u32)> {
        let path_match = self.patterns.iter().find_map(|p| p.matches(path))?;
        let mut confidence = 0;

        if !self.methods.is_empty() {
            if !self.methods.contains(ctx.method()) {
                return None;
            }
            confidence += 1;
        }

        if !self.params.is_empty() {
            if !self
                .params
                .iter()
                .all(|r| r.satisfied_by(|name| ctx.query_params(name)))
            {
                return None;
            }
            confidence += 1;
        }

        if !self.headers.is_empty() {
            if !self
                .headers
                .iter()
                .all(|r| r.satisfied_by(|name| ctx.header_values(name)))
            {
                return None;
            }
            confidence += 1;
        }

        if !self.consumes.is_empty() {
            let content_type = ctx.header(CONTENT_TYPE.as_str())?;
            let media = media_type(content_type);
            if !self.consumes.iter().any(|c| media_matches(c, &media)) {
                return None;
            }
            confidence += 1;
        }

        if !self.produces.is_empty() {
            let accept = ctx.header(ACCEPT.as_str()).unwrap_or("*/*");
            let acceptable = accept.split(',').map(media_type).any(|range| {
                self.produces.iter().any(|p| media_matches(&range, p))
            });
            if !acceptable {
                return None;
            }
            confidence += 1;
        }

        Some((path_match, confidence))
    }
}

impl fmt::Display for RouteMapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let methods: Vec<&str> = self.methods.iter().map(Method::as_str).collect();
        let patterns: Vec<&str> = self.patterns.iter().map(PathPattern::template).collect();
        if methods.is_empty() {
            write!(f, "* {}", patterns.join(" | "))
        } else {
            write!(f, "{} {}", methods.join(","), patterns.join(" | "))
        }
    }
}

/// 去掉参数并小写，例如 `Text/HTML; charset=utf-8` -> `text/html`
fn media_type(value: &str) -> String {
    value
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase()
}

/// 媒体范围匹配，`range` 可以带通配符（`*/*`、`text/*`）
fn media_matches(range: &str, media: &str) -> bool {
    let range = media_type(range);
    let media = media_type(media);
    if range == "*/*" || media == "*/*" || range == media {
        return true;
    }
    match (range.split_once('/'), media.split_once('/')) {
        (Some((rt, "*")), Some((mt, _))) | (Some((rt, _)), Some((mt, "*"))) => rt == mt,
        _ => false,
    }
}

/// 路由映射构建器
#[derive(Debug, Clone, Default)]
pub struct RouteMappingBuilder {
    paths: Vec<String>,
    methods: Vec<Method>,
    params: Vec<String>,
    headers: Vec<String>,
    consumes: Vec<String>,
    produces: Vec<String>,
}

impl RouteMappingBuilder {
    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.paths.push(path.into());
        self
    }

    pub fn method(mut self, method: Method) -> Self {
        if !self.methods.contains(&method) {
            self.methods.push(method);
        }
        self
    }

    /// 必需的查询参数：`name` 或 `name=value`
    pub fn param(mut self, expr: impl Into<String>) -> Self {
        self.params.push(expr.into());
        self
    }

    /// 必需的请求头：`name` 或 `name=value`
    pub fn header(mut self, expr: impl Into<String>) -> Self {
        self.headers.push(expr.into());
        self
    }

    pub fn consumes(mut self, media: impl Into<String>) -> Self {
        self.consumes.push(media.into());
        self
    }

    pub fn produces(mut self, media: impl Into<String>) -> Self {
        self.produces.push(media.into());
        self
    }

    pub fn build(self) -> Result<RouteMapping, WebError> {
        if self.paths.is_empty() {
            return Err(WebError::Configuration(
                "Route mapping declares no path".to_string(),
            ));
        }
        let patterns = self
            .paths
            .iter()
            .map(|p| PathPattern::compile(p))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(RouteMapping {
            patterns,
            methods: self.methods,
            params: self.params.iter().map(|p| Requirement::parse(p)).collect(),
            headers: self.headers.iter().map(|h| Requirement::parse(h)).collect(),
            consumes: self.consumes,
            produces: self.produces,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pattern_with_two_variables() {
        let pattern = PathPattern::compile("/prefix/{a}/{b}").unwrap();
        assert_eq!(pattern.index().len(), 2);
        assert_eq!(pattern.index().group_of("a"), Some(1));
        assert_eq!(pattern.index().group_of("b"), Some(2));

        let m = pattern.matches("/prefix/x/y").unwrap();
        assert_eq!(m.group_count(), 2);
        assert_eq!(m.raw("a"), Some("x"));
        assert_eq!(m.raw("b"), Some("y"));

        assert!(pattern.matches("/prefix/x").is_none());
        assert!(pattern.matches("/prefix/x/y/z").is_none());
    }

    #[test]
    fn test_literal_characters_are_escaped() {
        let pattern = PathPattern::compile("/files/{name}.txt").unwrap();
        assert!(pattern.matches("/files/report.txt").is_some());
        assert!(pattern.matches("/files/reportXtxt").is_none());

        let plain = PathPattern::compile("/a+b").unwrap();
        assert!(plain.matches("/a+b").is_some());
        assert!(plain.matches("/aab").is_none());
    }

    #[test]
    fn test_non_ascii_literal_matches_encoded_path() {
        let pattern = PathPattern::compile("/café/{id}").unwrap();
        let m = pattern.matches("/caf%C3%A9/7").unwrap();
        assert_eq!(m.bindings().get("id").map(String::as_str), Some("7"));
        assert!(pattern.matches("/caf%c3%a9/7").is_some());
        assert!(pattern.matches("/cafe/7").is_none());
    }

    #[test]
    fn test_bindings_are_url_decoded() {
        let pattern = PathPattern::compile("/users/{name}").unwrap();
        let m = pattern.matches("/users/John%20Doe").unwrap();
        assert_eq!(m.raw("name"), Some("John%20Doe"));
        assert_eq!(m.bindings().get("name").map(String::as_str), Some("John Doe"));
    }

    #[test]
    fn test_malformed_patterns_are_rejected() {
        assert!(PathPattern::compile("/a/{id").is_err());
        assert!(PathPattern::compile("/a/{}").is_err());
        assert!(PathPattern::compile("/a/{id}/{id}").is_err());
        assert!(PathPattern::compile("/a/id}").is_err());
    }

    #[test]
    fn test_required_header_mismatch_is_no_match() {
        let mapping = RouteMapping::get("/x").header("x-test").build().unwrap();
        let without = RequestContext::new(Method::GET, "/x");
        assert!(mapping.test(&without, "/x").is_none());

        let with = RequestContext::builder(Method::GET, "/x")
            .header("X-Test", "1")
            .build();
        let (_, confidence) = mapping.test(&with, "/x").unwrap();
        assert_eq!(confidence, 2);
    }

    #[test]
    fn test_method_mismatch_and_head_not_implied() {
        let mapping = RouteMapping::get("/x").build().unwrap();
        let head = RequestContext::new(Method::HEAD, "/x");
        assert!(mapping.test(&head, "/x").is_none());
    }

    #[test]
    fn test_param_requirements() {
        let mapping = RouteMapping::builder()
            .path("/x")
            .param("mode=full")
            .build()
            .unwrap();
        let ok = RequestContext::new(Method::GET, "/x?mode=full");
        let wrong = RequestContext::new(Method::GET, "/x?mode=lite");
        assert_eq!(mapping.test(&ok, "/x").map(|(_, c)| c), Some(1));
        assert!(mapping.test(&wrong, "/x").is_none());
    }

    #[test]
    fn test_consumes_and_produces() {
        let mapping = RouteMapping::post("/data")
            .consumes("application/json")
            .produces("text/html")
            .build()
            .unwrap();

        let no_content_type = RequestContext::new(Method::POST, "/data");
        assert!(mapping.test(&no_content_type, "/data").is_none());

        let json = RequestContext::builder(Method::POST, "/data")
            .header("content-type", "application/json; charset=utf-8")
            .build();
        assert_eq!(mapping.test(&json, "/data").map(|(_, c)| c), Some(3));

        let wants_json = RequestContext::builder(Method::POST, "/data")
            .header("content-type", "application/json")
            .header("accept", "application/json")
            .build();
        assert!(mapping.test(&wants_json, "/data").is_none());

        let wants_text = RequestContext::builder(Method::POST, "/data")
            .header("content-type", "application/json")
            .header("accept", "application/xml, text/*;q=0.8")
            .build();
        assert!(mapping.test(&wants_text, "/data").is_some());
    }

    #[test]
    fn test_declares_variable_requires_all_patterns() {
        let mapping = RouteMapping::builder()
            .path("/a/{id}")
            .path("/b/{id}/{extra}")
            .build()
            .unwrap();
        assert!(mapping.declares_variable("id"));
        assert!(!mapping.declares_variable("extra"));
    }
}

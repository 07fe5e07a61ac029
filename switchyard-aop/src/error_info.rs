//! 拦截器看到的错误信息

use switchyard_core::ThrownError;

/// 结构化的错误信息
#[derive(Debug, Clone)]
pub struct ErrorInfo {
    pub message: String,

    /// 错误的运行时类型名
    pub error_type: String,

    /// 错误源链（cause chain）
    pub source_chain: Vec<String>,

    /// 异常已被处理，只是沿调用栈传递的信号
    pub handled: bool,
}

impl ErrorInfo {
    pub fn from_thrown(error: &ThrownError) -> Self {
        let mut source_chain = Vec::new();
        let mut current = error.as_error().source();
        while let Some(source) = current {
            source_chain.push(source.to_string());
            current = source.source();
        }

        Self {
            message: error.message(),
            error_type: error.kind().simple_name().to_string(),
            source_chain,
            handled: error.is_handled(),
        }
    }

    /// 完整描述（包含源链）
    pub fn full_description(&self) -> String {
        if self.source_chain.is_empty() {
            self.message.clone()
        } else {
            format!(
                "{}\nCaused by:\n  {}",
                self.message,
                self.source_chain.join("\n  ")
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fmt;

    #[derive(Debug)]
    struct Outer(std::io::Error);

    impl fmt::Display for Outer {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("query failed")
        }
    }

    impl std::error::Error for Outer {
        fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
            Some(&self.0)
        }
    }

    #[test]
    fn test_source_chain() {
        let thrown = ThrownError::new(Outer(std::io::Error::other("socket closed")));
        let info = ErrorInfo::from_thrown(&thrown);

        assert_eq!(info.error_type, "Outer");
        assert_eq!(info.source_chain, vec!["socket closed".to_string()]);
        assert_eq!(info.full_description(), "query failed\nCaused by:\n  socket closed");
        assert!(!info.handled);
    }

    #[test]
    fn test_handled_signal_flag() {
        let info = ErrorInfo::from_thrown(&ThrownError::new(switchyard_core::Handled));
        assert!(info.handled);
        assert_eq!(info.message, "Exception handled");
    }
}

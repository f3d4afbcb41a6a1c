//! 错误类型定义
//! Error types for stream ingestion and configuration

use std::time::Duration;

/// 视频流错误 (连接/读帧/解码)
///
/// 所有变体都会驱动会话的重连状态机, 不会导致进程退出
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    /// 连接超时 (握手 + 首帧)
    #[error("connection timeout after {:.1}s", .0.as_secs_f64())]
    ConnectTimeout(Duration),

    /// 连接失败
    #[error("connection failed: {0}")]
    Connect(String),

    /// 读帧超时
    #[error("frame read timeout after {:.1}s", .0.as_secs_f64())]
    ReadTimeout(Duration),

    /// 解码失败
    #[error("decode failed: {0}")]
    Decode(String),

    /// 对端关闭流
    #[error("stream closed")]
    Closed,

    /// IO错误
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// 配置错误
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config parse error: {0}")]
    Json(#[from] serde_json::Error),

    /// 字段超出允许范围
    #[error("{field} = {value} out of range [{min}, {max}]")]
    OutOfRange {
        field: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },
}

pub type StreamResult<T> = std::result::Result<T, StreamError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let e = StreamError::ConnectTimeout(Duration::from_secs(10));
        assert_eq!(e.to_string(), "connection timeout after 10.0s");

        let e = ConfigError::OutOfRange {
            field: "frame_skip",
            value: 12.0,
            min: 0.0,
            max: 10.0,
        };
        assert!(e.to_string().contains("frame_skip"));
    }
}

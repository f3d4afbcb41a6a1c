// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
pub mod config; // 配置参数
pub mod context; // 应用上下文
pub mod detection; // 姿态分析与跌倒检测
pub mod error; // 错误类型
pub mod input; // 视频输入系统

pub use crate::config::{DetectionConfig, FallConfig, FallguardConfig, StreamConfig};
pub use crate::context::AppContext;
pub use crate::detection::{DetectionEngine, DetectionResult, PoseEstimator, Posture};
pub use crate::error::{ConfigError, StreamError};
pub use crate::input::{CameraStreamSession, StreamRegistry, StreamState};

/// 时间字符串 (北京时间), 用于日志与文件名
pub fn gen_time_string(delimiter: &str) -> String {
    let offset = chrono::FixedOffset::east_opt(8 * 60 * 60);
    let t_now = match offset {
        Some(offset) => chrono::Utc::now().with_timezone(&offset).naive_local(),
        None => chrono::Utc::now().naive_utc(),
    };
    let fmt = format!(
        "%Y{}%m{}%d{}%H{}%M{}%S{}%f",
        delimiter, delimiter, delimiter, delimiter, delimiter, delimiter
    );
    t_now.format(&fmt).to_string()
}

//! 运行参数配置 - 通过JSON文件调整参数
//! Runtime configuration (stream sessions, detection, fall rules)

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::detection::KeypointLayout;
use crate::error::ConfigError;
use crate::input::backoff::MAX_BACKOFF;

/// 视频流会话参数
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    pub connect_timeout_secs: f64,      // 握手+首帧超时
    pub read_timeout_secs: f64,         // 单帧读取超时
    pub reconnect_base_delay_secs: f64, // 重连基础延迟
    pub max_reconnect_attempts: u32,    // 连续失败上限
    pub max_backoff_secs: f64,          // 退避延迟上限
    pub frame_skip: u32,                // 每 N+1 帧转发一帧给订阅者
    pub target_fps: u32,                // 检测节拍
    pub stop_timeout_secs: f64,         // 停止时等待工作线程退出的时长
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 10.0,
            read_timeout_secs: 5.0,
            reconnect_base_delay_secs: 5.0,
            max_reconnect_attempts: 5,
            max_backoff_secs: 60.0,
            frame_skip: 2,
            target_fps: 15,
            stop_timeout_secs: 5.0,
        }
    }
}

/// 秒数 → Duration; 负数/NaN 取 0, 超出可表示范围取 `ceiling`
fn secs_or(secs: f64, ceiling: Duration) -> Duration {
    if secs.is_nan() || secs <= 0.0 {
        return Duration::ZERO;
    }
    Duration::try_from_secs_f64(secs).map_or(ceiling, |d| d.min(ceiling))
}

/// 超时类参数的上限
const MAX_TIMEOUT: Duration = Duration::from_secs(3600);

impl StreamConfig {
    pub fn connect_timeout(&self) -> Duration {
        secs_or(self.connect_timeout_secs, MAX_TIMEOUT)
    }

    pub fn read_timeout(&self) -> Duration {
        secs_or(self.read_timeout_secs, MAX_TIMEOUT)
    }

    pub fn reconnect_base_delay(&self) -> Duration {
        secs_or(self.reconnect_base_delay_secs, MAX_BACKOFF)
    }

    pub fn max_backoff(&self) -> Duration {
        secs_or(self.max_backoff_secs, MAX_BACKOFF)
    }

    pub fn stop_timeout(&self) -> Duration {
        secs_or(self.stop_timeout_secs, MAX_TIMEOUT)
    }

    /// 检测节拍间隔
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.target_fps.max(1) as f64)
    }
}

/// 检测引擎参数 (部分参数透传给姿态估计器)
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    pub max_persons_per_frame: usize,
    pub min_keypoint_visibility: f32,
    pub min_detection_confidence: f32,
    pub min_tracking_confidence: f32,
    pub keypoint_layout: KeypointLayout,
    pub bbox_padding: f32,            // 关键点外接框扩展比例
    pub posture_history_len: usize,   // 姿态历史容量
    pub position_history_len: usize,  // 髋部位置历史容量
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            max_persons_per_frame: 5,
            min_keypoint_visibility: 0.5,
            min_detection_confidence: 0.5,
            min_tracking_confidence: 0.5,
            keypoint_layout: KeypointLayout::MediaPipe33,
            bbox_padding: 0.1,
            posture_history_len: 30,
            position_history_len: 15,
        }
    }
}

/// 跌倒判定阈值
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FallConfig {
    pub cooldown_secs: f64,              // 同一目标两次告警的最小间隔
    pub fall_velocity_threshold: f32,    // 最终判定使用的下降速度阈值
    pub descent_query_threshold: f32,    // 通用查询使用的下降速度阈值
    pub angle_rate_threshold: f32,       // 角速度阈值 (度/秒)
    pub upright_window_secs: f64,        // "最近直立" 时间窗
    pub min_fall_angle: f32,             // 跌倒时躯干最小倾角
    pub fall_confidence: f32,            // 确认跌倒后的最低置信度
    pub velocity_window: usize,          // 速度计算使用的样本数
    pub angle_window: usize,             // 角速度计算使用的样本数
    pub min_elapsed_secs: f64,           // 噪声保护: 小于该时间差不计算速度
}

impl Default for FallConfig {
    fn default() -> Self {
        Self {
            cooldown_secs: 30.0,
            fall_velocity_threshold: 0.2,
            descent_query_threshold: 0.25,
            angle_rate_threshold: 30.0,
            upright_window_secs: 2.5,
            min_fall_angle: 50.0,
            fall_confidence: 0.85,
            velocity_window: 3,
            angle_window: 5,
            min_elapsed_secs: 0.01,
        }
    }
}

/// 全部配置
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FallguardConfig {
    pub stream: StreamConfig,
    pub detection: DetectionConfig,
    pub fall: FallConfig,
}

fn check_range(field: &'static str, value: f64, min: f64, max: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value >= min && value <= max {
        Ok(())
    } else {
        Err(ConfigError::OutOfRange {
            field,
            value,
            min,
            max,
        })
    }
}

impl FallguardConfig {
    /// 从JSON文件加载配置, 文件不存在时写出默认配置
    pub fn load(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        match Self::try_load(path) {
            Ok(config) => {
                tracing::info!(path = %path.display(), "✅ 配置已加载");
                config
            }
            Err(ConfigError::Io(_)) => {
                tracing::info!(path = %path.display(), "📝 配置文件不存在,创建默认配置");
                let config = Self::default();
                if let Err(e) = config.save(path) {
                    tracing::warn!(error = %e, "保存默认配置失败");
                }
                config
            }
            Err(e) => {
                tracing::warn!(error = %e, "⚠️ 配置文件无效,使用默认值");
                Self::default()
            }
        }
    }

    /// 严格加载: 读取 + 解析 + 校验
    pub fn try_load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let json = fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&json)?;
        config.validate()?;
        Ok(config)
    }

    /// 保存配置到JSON文件
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path.as_ref(), json)?;
        tracing::info!(path = %path.as_ref().display(), "💾 配置已保存");
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let s = &self.stream;
        check_range("stream.connect_timeout_secs", s.connect_timeout_secs, 5.0, 60.0)?;
        check_range("stream.read_timeout_secs", s.read_timeout_secs, 0.1, 60.0)?;
        check_range("stream.reconnect_base_delay_secs", s.reconnect_base_delay_secs, 1.0, 30.0)?;
        check_range("stream.max_backoff_secs", s.max_backoff_secs, 1.0, MAX_BACKOFF.as_secs_f64())?;
        check_range("stream.stop_timeout_secs", s.stop_timeout_secs, 0.1, 60.0)?;
        check_range("stream.max_reconnect_attempts", s.max_reconnect_attempts as f64, 1.0, 20.0)?;
        check_range("stream.frame_skip", s.frame_skip as f64, 0.0, 10.0)?;
        check_range("stream.target_fps", s.target_fps as f64, 1.0, 30.0)?;

        let d = &self.detection;
        check_range("detection.max_persons_per_frame", d.max_persons_per_frame as f64, 1.0, 20.0)?;
        check_range("detection.min_keypoint_visibility", d.min_keypoint_visibility as f64, 0.0, 1.0)?;
        check_range("detection.min_detection_confidence", d.min_detection_confidence as f64, 0.1, 1.0)?;
        check_range("detection.min_tracking_confidence", d.min_tracking_confidence as f64, 0.1, 1.0)?;

        check_range("fall.cooldown_secs", self.fall.cooldown_secs, 5.0, 300.0)?;
        Ok(())
    }

    /// 打印当前配置
    pub fn print_summary(&self) {
        tracing::info!(
            connect_timeout = self.stream.connect_timeout_secs,
            reconnect_delay = self.stream.reconnect_base_delay_secs,
            max_attempts = self.stream.max_reconnect_attempts,
            frame_skip = self.stream.frame_skip,
            target_fps = self.stream.target_fps,
            "🎛️ 视频流配置"
        );
        tracing::info!(
            max_persons = self.detection.max_persons_per_frame,
            layout = ?self.detection.keypoint_layout,
            cooldown = self.fall.cooldown_secs,
            "🎛️ 检测配置"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("fallguard-{}-{}.json", name, std::process::id()))
    }

    #[test]
    fn test_default_is_valid() {
        assert!(FallguardConfig::default().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_out_of_range() {
        let mut config = FallguardConfig::default();
        config.stream.frame_skip = 11;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::OutOfRange { field: "stream.frame_skip", .. })
        ));

        let mut config = FallguardConfig::default();
        config.fall.cooldown_secs = 1.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: FallguardConfig =
            serde_json::from_str(r#"{"fall": {"cooldown_secs": 60.0}}"#).unwrap();
        assert_eq!(config.fall.cooldown_secs, 60.0);
        assert_eq!(config.fall.min_fall_angle, 50.0);
        assert_eq!(config.stream, StreamConfig::default());
    }

    #[test]
    fn test_save_then_load() {
        let path = temp_path("roundtrip");
        let mut config = FallguardConfig::default();
        config.detection.keypoint_layout = KeypointLayout::Coco17;
        config.save(&path).unwrap();

        let loaded = FallguardConfig::try_load(&path).unwrap();
        assert_eq!(loaded, config);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn test_load_missing_file_writes_default() {
        let path = temp_path("missing");
        let _ = fs::remove_file(&path);

        let config = FallguardConfig::load(&path);
        assert_eq!(config, FallguardConfig::default());
        assert!(path.exists());
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn test_backoff_cap_above_sixty_rejected() {
        let mut config = FallguardConfig::default();
        config.stream.max_backoff_secs = 600.0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::OutOfRange { field: "stream.max_backoff_secs", .. })
        ));
        assert_eq!(config.stream.max_backoff(), Duration::from_secs(60));
    }

    #[test]
    fn test_huge_timeouts_rejected_and_never_panic() {
        let path = temp_path("huge-timeouts");
        for (field, json) in [
            ("stream.stop_timeout_secs", r#"{"stream": {"stop_timeout_secs": 1e30}}"#),
            ("stream.read_timeout_secs", r#"{"stream": {"read_timeout_secs": 1e30}}"#),
            ("stream.max_backoff_secs", r#"{"stream": {"max_backoff_secs": 1e30}}"#),
        ] {
            fs::write(&path, json).unwrap();
            match FallguardConfig::try_load(&path) {
                Err(ConfigError::OutOfRange { field: f, .. }) => assert_eq!(f, field),
                other => panic!("{field}: expected OutOfRange, got {other:?}"),
            }
        }
        let _ = fs::remove_file(&path);

        // 未经校验的配置也不会在换算时 panic
        let s = StreamConfig {
            stop_timeout_secs: 1e30,
            read_timeout_secs: f64::INFINITY,
            max_backoff_secs: 1e30,
            connect_timeout_secs: f64::NAN,
            ..StreamConfig::default()
        };
        assert_eq!(s.stop_timeout(), MAX_TIMEOUT);
        assert_eq!(s.read_timeout(), MAX_TIMEOUT);
        assert_eq!(s.max_backoff(), MAX_BACKOFF);
        assert_eq!(s.connect_timeout(), Duration::ZERO);
    }

    #[test]
    fn test_durations() {
        let s = StreamConfig::default();
        assert_eq!(s.connect_timeout(), Duration::from_secs(10));
        assert_eq!(s.max_backoff(), Duration::from_secs(60));
        assert!((s.tick_interval().as_secs_f64() - 1.0 / 15.0).abs() < 1e-9);
    }
}

/// 姿态估计器接口
/// External pose estimation capability consumed by the detection engine
use anyhow::Result;
use image::RgbImage;

use super::types::{KeypointLayout, PersonPose};
use crate::config::DetectionConfig;

/// 估计器初始化参数, 由检测配置透传
///
/// 模型实现据此设置检测/跟踪置信度与最大人数
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EstimatorOptions {
    pub max_persons: usize,
    pub min_detection_confidence: f32,
    pub min_tracking_confidence: f32,
    pub layout: KeypointLayout,
}

impl From<&DetectionConfig> for EstimatorOptions {
    fn from(config: &DetectionConfig) -> Self {
        Self {
            max_persons: config.max_persons_per_frame,
            min_detection_confidence: config.min_detection_confidence,
            min_tracking_confidence: config.min_tracking_confidence,
            layout: config.keypoint_layout,
        }
    }
}

/// 统一的姿态估计接口
///
/// 模型本身 (MediaPipe / YOLOv8-pose 等) 不在本 crate 内, 由调用方实现此 trait 注入
///
/// ## 调用约定
/// ```text
/// 解码帧 + 时间戳(ms) → estimate → 0..N 个人的关键点 (归一化坐标 + 可见度)
/// ```
/// 部分实现 (视频模式的 MediaPipe) 跨帧有状态, 引擎保证同一摄像头的时间戳严格递增
pub trait PoseEstimator: Send {
    /// # Arguments
    /// * `image` - 解码后的RGB帧
    /// * `timestamp_ms` - 严格递增的时间戳 (毫秒)
    ///
    /// # Returns
    /// * `Vec<PersonPose>` - 输出顺序即槽位顺序
    fn estimate(&mut self, image: &RgbImage, timestamp_ms: i64) -> Result<Vec<PersonPose>>;
}

impl<F> PoseEstimator for F
where
    F: FnMut(&RgbImage, i64) -> Result<Vec<PersonPose>> + Send,
{
    fn estimate(&mut self, image: &RgbImage, timestamp_ms: i64) -> Result<Vec<PersonPose>> {
        self(image, timestamp_ms)
    }
}

/// 空估计器: 不输出任何人
///
/// 仅拉流、不做分析时使用
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopEstimator;

impl PoseEstimator for NoopEstimator {
    fn estimate(&mut self, _image: &RgbImage, _timestamp_ms: i64) -> Result<Vec<PersonPose>> {
        Ok(Vec::new())
    }
}

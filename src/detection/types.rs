// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

/// 跌倒检测数据结构定义
/// Data structures for pose-based fall detection
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ========== 枚举类型 ==========

/// 关键点布局
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeypointLayout {
    /// MediaPipe Pose 33点 (肩 11/12, 髋 23/24)
    #[default]
    #[serde(rename = "mediapipe33")]
    MediaPipe33,
    /// COCO 17点 / YOLOv8-pose (肩 5/6, 髋 11/12)
    #[serde(rename = "coco17")]
    Coco17,
}

/// COCO 17点骨架连线
const COCO_SKELETON: [(usize, usize); 16] = [
    (0, 1),
    (0, 2),
    (1, 3),
    (2, 4),
    (5, 6),
    (5, 11),
    (6, 12),
    (11, 12),
    (5, 7),
    (6, 8),
    (7, 9),
    (8, 10),
    (11, 13),
    (12, 14),
    (13, 15),
    (14, 16),
];

/// MediaPipe 躯干与四肢连线
const MEDIAPIPE_SKELETON: [(usize, usize); 12] = [
    (11, 12), // 双肩
    (11, 13),
    (13, 15), // 左臂
    (12, 14),
    (14, 16), // 右臂
    (11, 23),
    (12, 24), // 躯干
    (23, 24), // 双髋
    (23, 25),
    (25, 27), // 左腿
    (24, 26),
    (26, 28), // 右腿
];

impl KeypointLayout {
    /// (左肩, 右肩)
    pub fn shoulders(&self) -> (usize, usize) {
        match self {
            KeypointLayout::MediaPipe33 => (11, 12),
            KeypointLayout::Coco17 => (5, 6),
        }
    }

    /// (左髋, 右髋)
    pub fn hips(&self) -> (usize, usize) {
        match self {
            KeypointLayout::MediaPipe33 => (23, 24),
            KeypointLayout::Coco17 => (11, 12),
        }
    }

    pub fn skeleton(&self) -> &'static [(usize, usize)] {
        match self {
            KeypointLayout::MediaPipe33 => &MEDIAPIPE_SKELETON,
            KeypointLayout::Coco17 => &COCO_SKELETON,
        }
    }
}

/// 人体姿态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Posture {
    Standing,
    Sitting,
    Lying,
    Falling,
    Unknown,
}

impl Posture {
    pub fn as_str(&self) -> &'static str {
        match self {
            Posture::Standing => "standing",
            Posture::Sitting => "sitting",
            Posture::Lying => "lying",
            Posture::Falling => "falling",
            Posture::Unknown => "unknown",
        }
    }

    /// 站立或坐姿视为 "直立"
    pub fn is_upright(&self) -> bool {
        matches!(self, Posture::Standing | Posture::Sitting)
    }

    /// 标注颜色
    pub fn color(&self) -> [u8; 3] {
        match self {
            Posture::Standing => [0, 255, 0],
            Posture::Sitting => [255, 255, 0],
            Posture::Lying => [255, 165, 0],
            Posture::Falling => [255, 0, 0],
            Posture::Unknown => [128, 128, 128],
        }
    }
}

// ========== 数据结构 ==========

fn default_visibility() -> f32 {
    1.0
}

/// 关键点 (归一化坐标 0-1, visibility 为可见置信度)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Keypoint {
    pub x: f32,
    pub y: f32,
    #[serde(default)]
    pub z: f32,
    #[serde(default = "default_visibility")]
    pub visibility: f32,
}

impl Keypoint {
    pub fn new(x: f32, y: f32, visibility: f32) -> Self {
        Self {
            x,
            y,
            z: 0.0,
            visibility,
        }
    }

    pub fn is_visible(&self, min_visibility: f32) -> bool {
        self.visibility >= min_visibility && self.x.is_finite() && self.y.is_finite()
    }
}

/// 姿态估计器输出的单人结果
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PersonPose {
    pub keypoints: Vec<Keypoint>,
}

impl PersonPose {
    pub fn new(keypoints: Vec<Keypoint>) -> Self {
        Self { keypoints }
    }
}

/// 检测框 (归一化坐标 0-1)
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl BoundingBox {
    pub fn center_y(&self) -> f32 {
        self.y + self.height / 2.0
    }

    /// 转换为像素坐标 (x1, y1, x2, y2)
    pub fn to_pixels(&self, frame_width: u32, frame_height: u32) -> (i32, i32, i32, i32) {
        let w = frame_width as f32;
        let h = frame_height as f32;
        (
            (self.x * w) as i32,
            (self.y * h) as i32,
            ((self.x + self.width) * w) as i32,
            ((self.y + self.height) * h) as i32,
        )
    }
}

/// 单人检测结果
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PersonObservation {
    /// 跟踪ID (格式: {camera_id}_person_{slot})
    pub id: String,
    pub slot: usize,
    pub bbox: BoundingBox,
    pub posture: Posture,
    pub confidence: f32,
    /// 躯干与竖直方向夹角 (度)
    pub body_angle: Option<f32>,
    pub fall_risk: f32,
    pub keypoints: Vec<Keypoint>,
}

/// 单帧检测结果 (检测引擎 → 传输层)
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetectionResult {
    pub camera_id: String,
    pub frame_number: u64,
    pub timestamp: DateTime<Utc>,
    pub persons: Vec<PersonObservation>,
    pub fall_detected: bool,
    pub fall_person_ids: Vec<String>,
    pub processing_time_ms: f64,
}

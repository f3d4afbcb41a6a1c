//! 姿态几何计算
//! Torso geometry derived from body keypoints

use super::types::{BoundingBox, Keypoint, KeypointLayout};

/// 躯干关键点 (肩中点 + 髋中点, 归一化坐标)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Torso {
    pub shoulder: (f32, f32),
    pub hip: (f32, f32),
}

impl Torso {
    /// 从关键点提取躯干; 任一肩/髋可见度不足时返回 None
    pub fn from_keypoints(
        keypoints: &[Keypoint],
        layout: KeypointLayout,
        min_visibility: f32,
    ) -> Option<Self> {
        let (ls, rs) = layout.shoulders();
        let (lh, rh) = layout.hips();
        Some(Self {
            shoulder: midpoint(keypoints, ls, rs, min_visibility)?,
            hip: midpoint(keypoints, lh, rh, min_visibility)?,
        })
    }

    /// 髋→肩向量与竖直方向夹角 (度), 0 = 直立, 90 = 水平
    pub fn body_angle(&self) -> f32 {
        let dx = self.shoulder.0 - self.hip.0;
        let dy = self.shoulder.1 - self.hip.1;
        dx.abs().atan2(dy.abs()).to_degrees().clamp(0.0, 90.0)
    }

    /// 图像坐标 y 向下: 肩在髋之上即 shoulder.y < hip.y
    pub fn shoulders_above_hips(&self) -> bool {
        self.shoulder.1 < self.hip.1
    }

    pub fn hip_center_y(&self) -> f32 {
        self.hip.1
    }
}

/// 两个关键点的中点, 要求二者都可见
pub fn midpoint(keypoints: &[Keypoint], a: usize, b: usize, min_visibility: f32) -> Option<(f32, f32)> {
    let ka = keypoints.get(a)?;
    let kb = keypoints.get(b)?;
    if !ka.is_visible(min_visibility) || !kb.is_visible(min_visibility) {
        return None;
    }
    Some(((ka.x + kb.x) / 2.0, (ka.y + kb.y) / 2.0))
}

/// 关键点外接框, 四周扩展 `padding` 比例后裁剪到 [0,1]
///
/// 优先使用可见关键点; 全部不可见时退化为全部有限坐标点
pub fn keypoint_bbox(keypoints: &[Keypoint], padding: f32, min_visibility: f32) -> Option<BoundingBox> {
    let visible: Vec<&Keypoint> = keypoints
        .iter()
        .filter(|k| k.is_visible(min_visibility))
        .collect();
    let points: Vec<&Keypoint> = if visible.is_empty() {
        keypoints
            .iter()
            .filter(|k| k.x.is_finite() && k.y.is_finite())
            .collect()
    } else {
        visible
    };
    if points.is_empty() {
        return None;
    }

    let (mut x1, mut y1) = (f32::MAX, f32::MAX);
    let (mut x2, mut y2) = (f32::MIN, f32::MIN);
    for k in &points {
        x1 = x1.min(k.x);
        y1 = y1.min(k.y);
        x2 = x2.max(k.x);
        y2 = y2.max(k.y);
    }

    let pad_x = (x2 - x1) * padding;
    let pad_y = (y2 - y1) * padding;
    let x1 = (x1 - pad_x).clamp(0.0, 1.0);
    let y1 = (y1 - pad_y).clamp(0.0, 1.0);
    let x2 = (x2 + pad_x).clamp(0.0, 1.0);
    let y2 = (y2 + pad_y).clamp(0.0, 1.0);

    Some(BoundingBox {
        x: x1,
        y: y1,
        width: x2 - x1,
        height: y2 - y1,
    })
}

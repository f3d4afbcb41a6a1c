//! 单人时序跟踪
//! Bounded temporal history of one tracked person
//!
//! 身份按 (摄像头ID, 输出槽位) 定位, 不做外观重识别:
//! 估计器若在帧间调换输出顺序, 两条轨迹会互换身份

use std::collections::VecDeque;

use super::types::Posture;

/// 轨迹键
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TrackKey {
    pub camera_id: String,
    pub slot: usize,
}

impl TrackKey {
    pub fn new(camera_id: impl Into<String>, slot: usize) -> Self {
        Self {
            camera_id: camera_id.into(),
            slot,
        }
    }

    /// 对外身份字符串
    pub fn identity(&self) -> String {
        format!("{}_person_{}", self.camera_id, self.slot)
    }
}

/// 姿态样本
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PostureSample {
    pub timestamp: f64,
    pub posture: Posture,
    pub body_angle: Option<f32>,
}

/// 髋部高度样本
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PositionSample {
    pub timestamp: f64,
    pub hip_y: f32,
}

/// 单人轨迹
#[derive(Debug, Clone)]
pub struct PersonTrack {
    key: TrackKey,
    postures: VecDeque<PostureSample>,
    positions: VecDeque<PositionSample>,
    posture_capacity: usize,
    position_capacity: usize,
    last_upright: Option<f64>,
    fall_cooldown_until: Option<f64>,
}

fn push_bounded<T>(buf: &mut VecDeque<T>, capacity: usize, item: T) {
    buf.push_back(item);
    while buf.len() > capacity {
        buf.pop_front();
    }
}

impl PersonTrack {
    pub fn new(key: TrackKey, posture_capacity: usize, position_capacity: usize) -> Self {
        let posture_capacity = posture_capacity.max(1);
        let position_capacity = position_capacity.max(1);
        Self {
            key,
            postures: VecDeque::with_capacity(posture_capacity),
            positions: VecDeque::with_capacity(position_capacity),
            posture_capacity,
            position_capacity,
            last_upright: None,
            fall_cooldown_until: None,
        }
    }

    pub fn key(&self) -> &TrackKey {
        &self.key
    }

    /// 记录一次观测
    ///
    /// 时间戳早于最近样本时按最近样本计, 保证缓冲区按时间有序
    pub fn record(&mut self, timestamp: f64, posture: Posture, body_angle: Option<f32>, hip_y: Option<f32>) {
        let timestamp = self
            .postures
            .back()
            .map_or(timestamp, |last| timestamp.max(last.timestamp));

        push_bounded(
            &mut self.postures,
            self.posture_capacity,
            PostureSample {
                timestamp,
                posture,
                body_angle,
            },
        );

        if let Some(hip_y) = hip_y.filter(|y| y.is_finite()) {
            let timestamp = self
                .positions
                .back()
                .map_or(timestamp, |last| timestamp.max(last.timestamp));
            push_bounded(
                &mut self.positions,
                self.position_capacity,
                PositionSample { timestamp, hip_y },
            );
        }

        if posture.is_upright() {
            self.last_upright = Some(timestamp);
        }
    }

    pub fn postures(&self) -> impl DoubleEndedIterator<Item = &PostureSample> + ExactSizeIterator {
        self.postures.iter()
    }

    pub fn positions(&self) -> impl DoubleEndedIterator<Item = &PositionSample> + ExactSizeIterator {
        self.positions.iter()
    }

    pub fn last_upright(&self) -> Option<f64> {
        self.last_upright
    }

    pub fn fall_cooldown_until(&self) -> Option<f64> {
        self.fall_cooldown_until
    }

    pub fn in_cooldown(&self, now: f64) -> bool {
        self.fall_cooldown_until.map_or(false, |until| now < until)
    }

    pub fn start_cooldown(&mut self, until: f64) {
        self.fall_cooldown_until = Some(until);
    }

    /// 竖直速度 (归一化高度/秒, 正值 = 下降)
    ///
    /// 取最近 `window` 个位置样本的首尾; 时间差 ≤ `min_dt` 时视为噪声返回 None
    pub fn vertical_velocity(&self, window: usize, min_dt: f64) -> Option<f32> {
        let n = self.positions.len().min(window.max(2));
        if n < 2 {
            return None;
        }
        let start = self.positions.get(self.positions.len() - n)?;
        let end = self.positions.back()?;
        let dt = end.timestamp - start.timestamp;
        if dt <= min_dt {
            return None;
        }
        Some(((end.hip_y - start.hip_y) as f64 / dt) as f32)
    }

    /// 角速度 (度/秒), 取最近 `window` 个姿态样本中有角度值的首尾
    pub fn angle_change_rate(&self, window: usize, min_dt: f64) -> Option<f32> {
        let mut recent = self
            .postures
            .iter()
            .rev()
            .take(window)
            .filter_map(|s| s.body_angle.map(|a| (s.timestamp, a)));
        let (t_end, a_end) = recent.next()?;
        let (t_start, a_start) = recent.last()?;
        let dt = t_end - t_start;
        if dt <= min_dt {
            return None;
        }
        Some(((a_end - a_start).abs() as f64 / dt) as f32)
    }

    /// `window_secs` 内是否出现过站立/坐姿
    ///
    /// 从最新样本向前扫描, 一旦超出时间窗即停止
    pub fn recently_upright(&self, now: f64, window_secs: f64) -> bool {
        for sample in self.postures.iter().rev() {
            if now - sample.timestamp > window_secs {
                break;
            }
            if sample.posture.is_upright() {
                return true;
            }
        }
        false
    }
}

/// 姿态分类与跌倒判定
/// Posture classification from torso geometry and temporal fall decision
use super::track::PersonTrack;
use super::types::Posture;
use crate::config::FallConfig;

/// 单次观测的判定结果
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Assessment {
    pub posture: Posture,
    pub confidence: f32,
    /// 本次观测是否新确认了一次跌倒
    pub fall_detected: bool,
    pub velocity: Option<f32>,
    pub fall_risk: f32,
}

#[derive(Debug, Clone, Default)]
pub struct FallClassifier {
    config: FallConfig,
}

impl FallClassifier {
    pub fn new(config: FallConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &FallConfig {
        &self.config
    }

    /// 由躯干倾角得到姿态与置信度
    ///
    /// | 倾角      | 条件        | 姿态     | 置信度 |
    /// |-----------|-------------|----------|--------|
    /// | 无        |             | Unknown  | 0.3    |
    /// | < 25°     |             | Standing | 0.9    |
    /// | < 50°     | 肩在髋之上  | Sitting  | 0.75   |
    /// | < 50°     | 肩不在髋之上| Lying    | 0.6    |
    /// | < 70°     |             | Lying    | 0.8    |
    /// | ≥ 70°     |             | Lying    | 0.9    |
    pub fn classify_posture(&self, body_angle: Option<f32>, shoulders_above_hips: bool) -> (Posture, f32) {
        match body_angle.filter(|a| a.is_finite()) {
            None => (Posture::Unknown, 0.3),
            Some(a) if a < 25.0 => (Posture::Standing, 0.9),
            Some(a) if a < 50.0 => {
                if shoulders_above_hips {
                    (Posture::Sitting, 0.75)
                } else {
                    (Posture::Lying, 0.6)
                }
            }
            Some(a) if a < 70.0 => (Posture::Lying, 0.8),
            Some(_) => (Posture::Lying, 0.9),
        }
    }

    pub fn vertical_velocity(&self, track: &PersonTrack) -> Option<f32> {
        track.vertical_velocity(self.config.velocity_window, self.config.min_elapsed_secs)
    }

    /// 快速下降; `threshold` 为空时使用通用查询阈值
    pub fn is_rapid_descent(&self, track: &PersonTrack, threshold: Option<f32>) -> bool {
        let threshold = threshold.unwrap_or(self.config.descent_query_threshold);
        self.vertical_velocity(track).map_or(false, |v| v > threshold)
    }

    pub fn is_rapid_angle_change(&self, track: &PersonTrack) -> bool {
        track
            .angle_change_rate(self.config.angle_window, self.config.min_elapsed_secs)
            .map_or(false, |rate| rate > self.config.angle_rate_threshold)
    }

    /// 兜底规则: 最近5个姿态样本中最早3个里有站立, 且当前为躺姿
    pub fn has_stand_to_lie_transition(&self, track: &PersonTrack) -> bool {
        if track.postures().len() < 5 {
            return false;
        }
        let recent: Vec<Posture> = track.postures().rev().take(5).map(|s| s.posture).collect();
        // recent[0] 为最新样本, recent[2..5] 为最早的3个
        recent[0] == Posture::Lying && recent[2..5].contains(&Posture::Standing)
    }

    /// 跌倒判定 (观测已写入轨迹之后调用)
    pub fn is_fall(&self, track: &PersonTrack, now: f64, posture: Posture, body_angle: Option<f32>) -> bool {
        if track.in_cooldown(now) {
            return false;
        }
        if posture != Posture::Lying {
            return false;
        }
        if !track.recently_upright(now, self.config.upright_window_secs) {
            return false;
        }
        if body_angle.map_or(false, |a| a < self.config.min_fall_angle) {
            return false;
        }

        self.is_rapid_descent(track, Some(self.config.fall_velocity_threshold))
            || self.is_rapid_angle_change(track)
            || self.has_stand_to_lie_transition(track)
    }

    /// 更新轨迹并给出本次观测的最终姿态
    ///
    /// 确认跌倒时姿态升级为 Falling, 并进入冷却期
    pub fn assess(
        &self,
        track: &mut PersonTrack,
        now: f64,
        body_angle: Option<f32>,
        shoulders_above_hips: bool,
        hip_y: Option<f32>,
    ) -> Assessment {
        let (mut posture, mut confidence) = self.classify_posture(body_angle, shoulders_above_hips);
        track.record(now, posture, body_angle, hip_y);

        let fall_detected = self.is_fall(track, now, posture, body_angle);
        if fall_detected {
            posture = Posture::Falling;
            confidence = confidence.max(self.config.fall_confidence);
            track.start_cooldown(now + self.config.cooldown_secs);
            tracing::warn!(
                person = %track.key().identity(),
                angle = ?body_angle,
                "🚨 检测到跌倒"
            );
        }

        let velocity = self.vertical_velocity(track);
        Assessment {
            posture,
            confidence,
            fall_detected,
            velocity,
            fall_risk: fall_risk(posture, body_angle, velocity),
        }
    }
}

/// 跌倒风险评分 [0, 1]
pub fn fall_risk(posture: Posture, body_angle: Option<f32>, velocity: Option<f32>) -> f32 {
    let mut risk: f32 = match posture {
        Posture::Standing => 0.1,
        Posture::Sitting => 0.3,
        Posture::Lying => 0.6,
        Posture::Falling => 1.0,
        Posture::Unknown => 0.5,
    };
    if let Some(angle) = body_angle.filter(|a| a.is_finite()) {
        risk = risk * 0.5 + (angle / 90.0).clamp(0.0, 1.0) * 0.5;
    }
    if let Some(v) = velocity.filter(|v| v.is_finite() && *v > 0.0) {
        risk = (risk + (v / 0.5).min(1.0) * 0.3).min(1.0);
    }
    risk.clamp(0.0, 1.0)
}

/// 检测引擎 (Detection Engine)
/// 职责: 解码帧 → 姿态估计 → 轨迹更新 → 姿态/跌倒判定 → DetectionResult
use std::collections::HashMap;
use std::time::Instant;

use chrono::{DateTime, Utc};
use image::RgbImage;

use super::annotate::annotate;
use super::classifier::FallClassifier;
use super::estimator::PoseEstimator;
use super::geometry::{keypoint_bbox, Torso};
use super::track::{PersonTrack, TrackKey};
use super::types::{BoundingBox, DetectionResult, PersonObservation, PersonPose, Posture};
use crate::config::{DetectionConfig, FallConfig};
use crate::input::VideoFrame;

pub struct DetectionEngine {
    estimator: Box<dyn PoseEstimator>,
    config: DetectionConfig,
    classifier: FallClassifier,
    /// (摄像头, 槽位) → 轨迹
    tracks: HashMap<TrackKey, PersonTrack>,
    /// 每路摄像头上一次传给估计器的时间戳 (ms)
    last_timestamps: HashMap<String, i64>,
    frame_count: u64,
}

impl DetectionEngine {
    pub fn new(estimator: Box<dyn PoseEstimator>, config: DetectionConfig, fall: FallConfig) -> Self {
        tracing::info!(
            layout = ?config.keypoint_layout,
            max_persons = config.max_persons_per_frame,
            cooldown_secs = fall.cooldown_secs,
            "🔍 检测引擎初始化"
        );
        Self {
            estimator,
            config,
            classifier: FallClassifier::new(fall),
            tracks: HashMap::new(),
            last_timestamps: HashMap::new(),
            frame_count: 0,
        }
    }

    pub fn config(&self) -> &DetectionConfig {
        &self.config
    }

    pub fn classifier(&self) -> &FallClassifier {
        &self.classifier
    }

    /// 处理一帧, 返回标注后的图像与检测结果
    pub fn process_frame(&mut self, frame: &VideoFrame, camera_id: &str) -> (RgbImage, DetectionResult) {
        self.process_frame_at(frame, camera_id, Utc::now())
    }

    pub fn process_frame_at(
        &mut self,
        frame: &VideoFrame,
        camera_id: &str,
        now: DateTime<Utc>,
    ) -> (RgbImage, DetectionResult) {
        let start = Instant::now();

        let timestamp_ms = self.next_timestamp(camera_id, now.timestamp_millis());
        let persons = match self.estimator.estimate(&frame.image, timestamp_ms) {
            Ok(persons) => persons,
            Err(e) => {
                tracing::warn!(camera_id = %camera_id, error = %e, "⚠️ 姿态估计失败, 按无人处理");
                Vec::new()
            }
        };

        let mut result = self.analyze(camera_id, persons, now);

        let mut annotated = frame.image.as_ref().clone();
        annotate(
            &mut annotated,
            &result,
            self.config.keypoint_layout,
            self.config.min_keypoint_visibility,
        );

        result.processing_time_ms = start.elapsed().as_secs_f64() * 1000.0;
        (annotated, result)
    }

    /// 跳过估计器, 直接处理已有关键点
    pub fn process_poses(&mut self, camera_id: &str, persons: Vec<PersonPose>, now: DateTime<Utc>) -> DetectionResult {
        let start = Instant::now();
        let mut result = self.analyze(camera_id, persons, now);
        result.processing_time_ms = start.elapsed().as_secs_f64() * 1000.0;
        result
    }

    /// 同一摄像头的估计器时间戳严格递增, 时钟未前进时取 上一次 + 1
    fn next_timestamp(&mut self, camera_id: &str, wall_ms: i64) -> i64 {
        let ts = match self.last_timestamps.get(camera_id) {
            Some(&prev) if wall_ms <= prev => prev + 1,
            _ => wall_ms,
        };
        self.last_timestamps.insert(camera_id.to_string(), ts);
        ts
    }

    fn analyze(&mut self, camera_id: &str, mut persons: Vec<PersonPose>, now: DateTime<Utc>) -> DetectionResult {
        self.frame_count += 1;
        persons.truncate(self.config.max_persons_per_frame);

        let now_secs = now.timestamp_micros() as f64 / 1_000_000.0;
        let layout = self.config.keypoint_layout;
        let min_vis = self.config.min_keypoint_visibility;
        let (posture_len, position_len) = (self.config.posture_history_len, self.config.position_history_len);

        let mut observations = Vec::with_capacity(persons.len());
        for (slot, pose) in persons.into_iter().enumerate() {
            let bbox = keypoint_bbox(&pose.keypoints, self.config.bbox_padding, min_vis).unwrap_or_default();
            let torso = Torso::from_keypoints(&pose.keypoints, layout, min_vis);
            let body_angle = torso.map(|t| t.body_angle());
            let shoulders_above_hips = torso.map_or(false, |t| t.shoulders_above_hips());
            // 髋部不可见时用检测框中心代替
            let hip_y = torso
                .map(|t| t.hip_center_y())
                .or_else(|| (bbox != BoundingBox::default()).then(|| bbox.center_y()));

            let key = TrackKey::new(camera_id, slot);
            let track = self.tracks.entry(key.clone()).or_insert_with(|| {
                tracing::debug!(person = %key.identity(), "➕ 新建轨迹");
                PersonTrack::new(key.clone(), posture_len, position_len)
            });

            let assessment = self
                .classifier
                .assess(track, now_secs, body_angle, shoulders_above_hips, hip_y);

            observations.push(PersonObservation {
                id: key.identity(),
                slot,
                bbox,
                posture: assessment.posture,
                confidence: assessment.confidence,
                body_angle,
                fall_risk: assessment.fall_risk,
                keypoints: pose.keypoints,
            });
        }

        let fall_person_ids: Vec<String> = observations
            .iter()
            .filter(|p| p.posture == Posture::Falling)
            .map(|p| p.id.clone())
            .collect();

        DetectionResult {
            camera_id: camera_id.to_string(),
            frame_number: self.frame_count,
            timestamp: now,
            fall_detected: !fall_person_ids.is_empty(),
            fall_person_ids,
            persons: observations,
            processing_time_ms: 0.0,
        }
    }

    /// 清除某路摄像头的全部轨迹 (流被移除时调用)
    pub fn reset_camera(&mut self, camera_id: &str) {
        self.tracks.retain(|key, _| key.camera_id != camera_id);
        self.last_timestamps.remove(camera_id);
    }

    pub fn track_count(&self) -> usize {
        self.tracks.len()
    }

    pub fn track(&self, key: &TrackKey) -> Option<&PersonTrack> {
        self.tracks.get(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::geometry::tests::mediapipe_pose;
    use chrono::Duration as ChronoDuration;
    use std::sync::{Arc, Mutex};

    fn engine_with(estimator: Box<dyn PoseEstimator>) -> DetectionEngine {
        DetectionEngine::new(estimator, DetectionConfig::default(), FallConfig::default())
    }

    fn frame() -> VideoFrame {
        VideoFrame::new(RgbImage::new(64, 48), 1)
    }

    fn person(angle: f32, hip_y: f32) -> PersonPose {
        PersonPose::new(mediapipe_pose(0.5, hip_y, 0.25, angle, 0.95))
    }

    #[test]
    fn test_estimator_timestamps_strictly_increase() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let estimator = move |_: &RgbImage, ts: i64| -> anyhow::Result<Vec<PersonPose>> {
            sink.lock().unwrap().push(ts);
            Ok(Vec::new())
        };
        let mut engine = engine_with(Box::new(estimator));
        let t0 = Utc::now();
        let f = frame();
        // 时钟停滞与回拨
        engine.process_frame_at(&f, "cam1", t0);
        engine.process_frame_at(&f, "cam1", t0);
        engine.process_frame_at(&f, "cam1", t0 - ChronoDuration::seconds(1));
        engine.process_frame_at(&f, "cam1", t0 + ChronoDuration::milliseconds(500));
        // 不同摄像头各自计时
        engine.process_frame_at(&f, "cam2", t0 - ChronoDuration::seconds(1));

        let seen = seen.lock().unwrap();
        let base = t0.timestamp_millis();
        assert_eq!(&seen[..4], &[base, base + 1, base + 2, base + 500]);
        assert_eq!(seen[4], base - 1000);
    }

    #[test]
    fn test_estimator_error_yields_empty_result() {
        let estimator = |_: &RgbImage, _: i64| -> anyhow::Result<Vec<PersonPose>> { anyhow::bail!("model crashed") };
        let mut engine = engine_with(Box::new(estimator));
        let (img, result) = engine.process_frame(&frame(), "cam1");
        assert!(result.persons.is_empty());
        assert!(!result.fall_detected);
        assert_eq!(img.dimensions(), (64, 48));
        assert!(result.processing_time_ms >= 0.0);
    }

    #[test]
    fn test_observation_fields() {
        let estimator = |_: &RgbImage, _: i64| -> anyhow::Result<Vec<PersonPose>> { Ok(vec![person(5.0, 0.7)]) };
        let mut engine = engine_with(Box::new(estimator));
        let (_, result) = engine.process_frame(&frame(), "cam1");

        assert_eq!(result.camera_id, "cam1");
        assert_eq!(result.frame_number, 1);
        let p = &result.persons[0];
        assert_eq!(p.id, "cam1_person_0");
        assert_eq!(p.slot, 0);
        assert_eq!(p.posture, Posture::Standing);
        assert!((p.confidence - 0.9).abs() < 1e-6);
        assert!(p.body_angle.unwrap() < 6.0);
        assert_eq!(p.keypoints.len(), 33);
        for v in [p.bbox.x, p.bbox.y, p.bbox.x + p.bbox.width, p.bbox.y + p.bbox.height] {
            assert!((0.0..=1.0 + 1e-6).contains(&v));
        }
        assert_eq!(engine.track_count(), 1);
    }

    #[test]
    fn test_truncates_to_max_persons() {
        let mut engine = engine_with(Box::new(crate::detection::NoopEstimator));
        let persons = (0..8).map(|_| person(5.0, 0.7)).collect();
        let result = engine.process_poses("cam1", persons, Utc::now());
        assert_eq!(result.persons.len(), 5);
        assert_eq!(result.persons[4].id, "cam1_person_4");
        assert_eq!(engine.track_count(), 5);
    }

    #[test]
    fn test_invisible_person_is_unknown() {
        let mut engine = engine_with(Box::new(crate::detection::NoopEstimator));
        let pose = PersonPose::new(mediapipe_pose(0.5, 0.7, 0.25, 0.0, 0.1));
        let result = engine.process_poses("cam1", vec![pose, PersonPose::default()], Utc::now());
        assert_eq!(result.persons[0].posture, Posture::Unknown);
        assert!((result.persons[0].confidence - 0.3).abs() < 1e-6);
        assert!(result.persons[0].body_angle.is_none());
        assert_eq!(result.persons[1].bbox, BoundingBox::default());
    }

    #[test]
    fn test_fall_flags_aggregate() {
        let mut engine = engine_with(Box::new(crate::detection::NoopEstimator));
        let t0 = Utc::now();
        let at = |ms: i64| t0 + ChronoDuration::milliseconds(ms);

        // 槽位0 跌倒, 槽位1 保持站立
        for ms in [0, 200, 400] {
            let r = engine.process_poses("cam1", vec![person(10.0, 0.5), person(5.0, 0.6)], at(ms));
            assert!(!r.fall_detected);
        }
        let r = engine.process_poses("cam1", vec![person(80.0, 0.65), person(5.0, 0.6)], at(600));
        assert!(r.fall_detected);
        assert_eq!(r.fall_person_ids, vec!["cam1_person_0".to_string()]);
        assert_eq!(r.persons[0].posture, Posture::Falling);
        assert!(r.persons[0].confidence >= 0.85);
        assert_eq!(r.persons[1].posture, Posture::Standing);

        // 冷却期内不重复告警
        let r = engine.process_poses("cam1", vec![person(80.0, 0.7), person(5.0, 0.6)], at(800));
        assert!(!r.fall_detected);
        assert_eq!(r.frame_number, 5);
    }

    #[test]
    fn test_reset_camera_drops_tracks() {
        let mut engine = engine_with(Box::new(crate::detection::NoopEstimator));
        engine.process_poses("cam1", vec![person(5.0, 0.7)], Utc::now());
        engine.process_poses("cam2", vec![person(5.0, 0.7), person(5.0, 0.7)], Utc::now());
        assert_eq!(engine.track_count(), 3);
        engine.reset_camera("cam2");
        assert_eq!(engine.track_count(), 1);
        assert!(engine.track(&TrackKey::new("cam1", 0)).is_some());
    }
}

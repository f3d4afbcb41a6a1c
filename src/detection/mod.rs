/// 检测系统 (Detection System)
///
/// 基于人体关键点的时序姿态分析
/// - PoseEstimator:   姿态估计 (外部能力, trait 注入)
/// - PersonTrack:     单人历史 (姿态/倾角/髋部高度)
/// - FallClassifier:  姿态分类 + 跌倒判定
/// - DetectionEngine: 逐帧编排
pub mod annotate;
pub mod classifier;
pub mod engine;
pub mod estimator;
pub mod geometry;
pub mod track;
pub mod types;

pub use classifier::{fall_risk, Assessment, FallClassifier};
pub use engine::DetectionEngine;
pub use estimator::{EstimatorOptions, NoopEstimator, PoseEstimator};
pub use geometry::Torso;
pub use track::{PersonTrack, TrackKey};
pub use types::{
    BoundingBox, DetectionResult, Keypoint, KeypointLayout, PersonObservation, PersonPose, Posture,
};

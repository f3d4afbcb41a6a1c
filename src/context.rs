//! 应用上下文
//! Explicitly constructed application context: configuration + stream registry

use std::sync::Arc;

use crate::config::FallguardConfig;
use crate::detection::{DetectionEngine, EstimatorOptions, PoseEstimator};
use crate::input::{StreamConnector, StreamRegistry};

/// 进程内共享对象, 由入口显式构造并传递
pub struct AppContext {
    pub config: FallguardConfig,
    pub registry: Arc<StreamRegistry>,
}

impl AppContext {
    pub fn new(config: FallguardConfig, connector: Arc<dyn StreamConnector>) -> Self {
        let registry = Arc::new(StreamRegistry::new(config.stream.clone(), connector));
        Self { config, registry }
    }

    /// 按当前配置创建检测引擎
    pub fn detection_engine(&self, estimator: Box<dyn PoseEstimator>) -> DetectionEngine {
        DetectionEngine::new(
            estimator,
            self.config.detection.clone(),
            self.config.fall.clone(),
        )
    }

    /// 姿态估计器参数 (置信度阈值/最大人数/关键点布局)
    pub fn estimator_options(&self) -> EstimatorOptions {
        EstimatorOptions::from(&self.config.detection)
    }

    /// 由工厂按配置构造估计器, 再创建检测引擎
    pub fn detection_engine_with<F>(&self, build: F) -> DetectionEngine
    where
        F: FnOnce(EstimatorOptions) -> Box<dyn PoseEstimator>,
    {
        self.detection_engine(build(self.estimator_options()))
    }

    /// 停止全部视频流
    pub fn shutdown(&self) {
        if !self.registry.is_empty() {
            tracing::info!(sessions = self.registry.len(), "🛑 停止全部视频流");
        }
        self.registry.stop_all();
    }
}

impl Drop for AppContext {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::NoopEstimator;
    use crate::input::testing::{fast_config, wait_until, Script, ScriptedConnector};
    use crate::input::StreamState;

    #[test]
    fn test_shutdown_stops_all_sessions() {
        let config = FallguardConfig {
            stream: fast_config(),
            ..Default::default()
        };
        let connector = ScriptedConnector::new(vec![Script::Frames(100_000), Script::Frames(100_000)]);
        let ctx = AppContext::new(config, connector);
        assert!(ctx.registry.start_session("a", "rtsp://a"));
        assert!(ctx.registry.start_session("b", "rtsp://b"));
        let a = ctx.registry.get_session("a").unwrap();
        assert!(wait_until(|| a.state() == StreamState::Streaming));

        ctx.shutdown();
        assert!(ctx.registry.is_empty());
        assert_eq!(a.state(), StreamState::Disconnected);
        assert!(!a.is_running());
    }

    #[test]
    fn test_engine_uses_context_config() {
        let mut config = FallguardConfig::default();
        config.detection.max_persons_per_frame = 2;
        let ctx = AppContext::new(config, ScriptedConnector::new(vec![]));
        let engine = ctx.detection_engine(Box::new(NoopEstimator));
        assert_eq!(engine.config().max_persons_per_frame, 2);
    }

    #[test]
    fn test_estimator_receives_confidence_thresholds() {
        let mut config = FallguardConfig::default();
        config.detection.min_detection_confidence = 0.8;
        config.detection.min_tracking_confidence = 0.3;
        let ctx = AppContext::new(config, ScriptedConnector::new(vec![]));

        let mut seen = None;
        let engine = ctx.detection_engine_with(|opts| {
            seen = Some(opts);
            Box::new(NoopEstimator)
        });
        let opts = seen.unwrap();
        assert_eq!(opts.min_detection_confidence, 0.8);
        assert_eq!(opts.min_tracking_confidence, 0.3);
        assert_eq!(opts.max_persons, engine.config().max_persons_per_frame);
    }
}

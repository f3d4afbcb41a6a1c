//! 会话注册表 - 摄像头ID → 视频流会话
//! Stream registry: at most one session per camera id
//!
//! 表级锁只保护映射本身; 停止会话 (可能等待工作线程) 尽量在锁外进行,
//! 避免批量停止时阻塞其他会话的查询

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use super::connector::StreamConnector;
use super::session::{lock, CameraStreamSession};
use super::types::SessionSnapshot;
use crate::config::StreamConfig;

pub struct StreamRegistry {
    config: StreamConfig,
    connector: Arc<dyn StreamConnector>,
    sessions: Mutex<HashMap<String, Arc<CameraStreamSession>>>,
}

impl StreamRegistry {
    pub fn new(config: StreamConfig, connector: Arc<dyn StreamConnector>) -> Self {
        Self {
            config,
            connector,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// 创建会话 (未启动)
    ///
    /// 同ID已有会话时先停止并替换, 旧会话进入 Disconnected 后新会话才可能开始连接
    pub fn create(&self, camera_id: &str, target: &str) -> Arc<CameraStreamSession> {
        let mut sessions = lock(&self.sessions);
        if let Some(old) = sessions.remove(camera_id) {
            tracing::info!(camera_id = %camera_id, "🔁 替换已有会话");
            old.stop();
        }
        let session = Arc::new(CameraStreamSession::new(
            camera_id,
            target,
            self.config.clone(),
            Arc::clone(&self.connector),
        ));
        sessions.insert(camera_id.to_string(), Arc::clone(&session));
        session
    }

    pub fn get(&self, camera_id: &str) -> Option<Arc<CameraStreamSession>> {
        lock(&self.sessions).get(camera_id).cloned()
    }

    /// 停止并删除; 返回是否存在
    pub fn remove(&self, camera_id: &str) -> bool {
        let removed = lock(&self.sessions).remove(camera_id);
        match removed {
            Some(session) => {
                session.stop();
                true
            }
            None => false,
        }
    }

    /// 停止全部会话 (进程退出时调用)
    pub fn stop_all(&self) {
        let drained: Vec<_> = lock(&self.sessions).drain().collect();
        tracing::info!(count = drained.len(), "⏹️ 停止全部会话");
        for (_, session) in drained {
            session.stop();
        }
    }

    // ========== 对外接口 ==========

    /// 创建并启动会话
    pub fn start_session(&self, camera_id: &str, target: &str) -> bool {
        self.create(camera_id, target).start()
    }

    pub fn stop_session(&self, camera_id: &str) -> bool {
        self.remove(camera_id)
    }

    pub fn get_session(&self, camera_id: &str) -> Option<Arc<CameraStreamSession>> {
        self.get(camera_id)
    }

    /// 全部会话的统计快照
    pub fn all_stats(&self) -> HashMap<String, SessionSnapshot> {
        let sessions: Vec<_> = lock(&self.sessions).values().cloned().collect();
        sessions
            .into_iter()
            .map(|s| (s.camera_id().to_string(), s.snapshot()))
            .collect()
    }

    pub fn camera_ids(&self) -> Vec<String> {
        let mut ids: Vec<_> = lock(&self.sessions).keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        lock(&self.sessions).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Drop for StreamRegistry {
    fn drop(&mut self) {
        self.stop_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::testing::{fast_config, wait_until, Script, ScriptedConnector};
    use crate::input::types::{SessionEvent, StreamState};

    fn registry(scripts: Vec<Script>) -> StreamRegistry {
        StreamRegistry::new(fast_config(), ScriptedConnector::new(scripts))
    }

    #[test]
    fn test_remove_then_get_is_absent() {
        let registry = registry(vec![Script::Frames(usize::MAX)]);
        assert!(registry.start_session("cam1", "rtsp://cam1"));
        let session = registry.get("cam1").expect("session");
        assert!(wait_until(|| session.state() == StreamState::Streaming));

        assert!(registry.remove("cam1"));
        assert!(registry.get("cam1").is_none());
        assert_eq!(session.state(), StreamState::Disconnected);
        assert!(!registry.remove("cam1"));
    }

    #[test]
    fn test_create_replaces_and_stops_previous() {
        let registry = registry(vec![Script::Frames(usize::MAX), Script::Frames(usize::MAX)]);
        let first = registry.create("cam1", "rtsp://old");
        let first_events = first.subscribe(4096);
        assert!(first.start());
        assert!(wait_until(|| first.state() == StreamState::Streaming));

        let second = registry.create("cam1", "rtsp://new");
        // 旧会话已停止, 新会话尚未开始连接
        assert_eq!(first.state(), StreamState::Disconnected);
        assert_eq!(second.state(), StreamState::Disconnected);
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get("cam1").map(|s| s.target().to_string()), Some("rtsp://new".into()));

        assert!(second.start());
        assert!(wait_until(|| second.state() == StreamState::Streaming));
        assert!(first_events.try_iter().any(|e| matches!(
            e,
            SessionEvent::StateChanged { state: StreamState::Disconnected, .. }
        )));
        registry.stop_all();
    }

    #[test]
    fn test_stop_all_clears_registry() {
        let registry = registry(vec![Script::Frames(usize::MAX); 3]);
        for id in ["a", "b", "c"] {
            assert!(registry.start_session(id, &format!("rtsp://{id}")));
        }
        assert_eq!(registry.camera_ids(), vec!["a", "b", "c"]);
        let sessions: Vec<_> = ["a", "b", "c"].iter().filter_map(|id| registry.get(id)).collect();

        registry.stop_all();
        assert!(registry.is_empty());
        assert!(sessions.iter().all(|s| s.state() == StreamState::Disconnected));
    }

    #[test]
    fn test_all_stats_redacts_credentials() {
        let registry = registry(vec![Script::Refuse; 10]);
        registry.create("cam1", "rtsp://admin:pw@10.0.0.1/live");
        let stats = registry.all_stats();
        let snapshot = &stats["cam1"];
        assert_eq!(snapshot.target, "rtsp://***@10.0.0.1/live");
        assert_eq!(snapshot.state, StreamState::Disconnected);
    }
}

/// 视频输入系统数据结构定义
/// Data structures for camera stream sessions
use chrono::{DateTime, Utc};
use image::RgbImage;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;

// ========== 枚举类型 ==========

/// 会话状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamState {
    Disconnected,
    Connecting,
    Connected,
    Streaming,
    Reconnecting,
    Failed,
}

impl StreamState {
    pub fn as_str(&self) -> &'static str {
        match self {
            StreamState::Disconnected => "disconnected",
            StreamState::Connecting => "connecting",
            StreamState::Connected => "connected",
            StreamState::Streaming => "streaming",
            StreamState::Reconnecting => "reconnecting",
            StreamState::Failed => "failed",
        }
    }

    /// 状态转移表
    ///
    /// `Disconnected` 可由任意状态进入 (stop 命令);
    /// `Failed -> Failed` 用于更新错误信息 (重试耗尽)
    pub fn can_transition_to(self, next: StreamState) -> bool {
        use StreamState::*;
        matches!(
            (self, next),
            (_, Disconnected)
                | (Disconnected, Connecting)
                | (Connecting, Connected)
                | (Connecting, Failed)
                | (Connected, Streaming)
                | (Streaming, Reconnecting)
                | (Streaming, Failed)
                | (Reconnecting, Connecting)
                | (Failed, Reconnecting)
                | (Failed, Connecting)
                | (Failed, Failed)
        )
    }
}

impl fmt::Display for StreamState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ========== 数据结构 ==========

/// 已解码帧 (会话工作线程 → 最新帧槽位 / 订阅者)
#[derive(Clone, Debug)]
pub struct VideoFrame {
    pub image: Arc<RgbImage>, // 使用Arc共享数据,避免复制
    pub frame_id: u64,
    pub captured_at: DateTime<Utc>,
}

impl VideoFrame {
    pub fn new(image: RgbImage, frame_id: u64) -> Self {
        Self {
            image: Arc::new(image),
            frame_id,
            captured_at: Utc::now(),
        }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn byte_len(&self) -> usize {
        self.image.as_raw().len()
    }
}

/// 会话统计
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct StreamStats {
    pub frames_received: u64,
    pub frames_dropped: u64,
    pub bytes_received: u64,
    pub avg_fps: f64,
    pub reconnect_count: u64,
    pub connect_latency_secs: f64,
    pub last_frame_at: Option<DateTime<Utc>>,
}

/// 会话事件 (工作线程 → 订阅者)
#[derive(Clone, Debug)]
pub enum SessionEvent {
    StateChanged {
        camera_id: String,
        state: StreamState,
        error: Option<String>,
    },
    Frame {
        camera_id: String,
        frame: VideoFrame,
    },
}

/// 会话快照 (只读视图,供上层查询)
#[derive(Clone, Debug, Serialize)]
pub struct SessionSnapshot {
    pub camera_id: String,
    pub target: String, // 已脱敏
    pub state: StreamState,
    pub stats: StreamStats,
    pub error: Option<String>,
}

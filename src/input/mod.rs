/// 视频输入系统 (Video Input System)
///
/// 每路摄像头一个独立工作线程, 负责连接、解码与断线重连
/// - CameraStreamSession: 单路会话 (状态机 + 最新帧槽位)
/// - StreamRegistry:      摄像头ID → 会话
/// - StreamConnector:     底层连接接口 (FFmpeg 实现需开启 `ffmpeg` 特性)
pub mod backoff;
pub mod connector;
pub mod registry;
pub mod session;
pub mod types;

#[cfg(feature = "ffmpeg")]
pub mod decode_filter;
#[cfg(feature = "ffmpeg")]
pub mod ffmpeg;

#[cfg(test)]
pub(crate) mod testing;

pub use backoff::Backoff;
pub use connector::{redact_target, send_latest, FrameSource, StreamConnector};
#[cfg(feature = "ffmpeg")]
pub use ffmpeg::FfmpegConnector;
pub use registry::StreamRegistry;
pub use session::CameraStreamSession;
pub use types::{SessionEvent, SessionSnapshot, StreamState, StreamStats, VideoFrame};

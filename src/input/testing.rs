//! 测试用脚本化视频源
//! Scripted connector driving session/registry tests

use image::RgbImage;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use super::connector::{FrameSource, StreamConnector};
use crate::config::StreamConfig;
use crate::error::{StreamError, StreamResult};

/// 每次 connect 消耗一条脚本
#[derive(Clone, Debug)]
pub enum Script {
    /// 连接成功, 产出 N 帧后断流
    Frames(usize),
    /// 连接超时
    Timeout,
    /// 连接被拒绝
    Refuse,
    /// connect 阻塞指定时长后超时
    Hang(Duration),
}

pub struct ScriptedConnector {
    scripts: Mutex<VecDeque<Script>>,
    connects: AtomicUsize,
}

impl ScriptedConnector {
    pub fn new(scripts: Vec<Script>) -> Arc<Self> {
        Arc::new(Self {
            scripts: Mutex::new(scripts.into()),
            connects: AtomicUsize::new(0),
        })
    }

    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

impl StreamConnector for ScriptedConnector {
    fn connect(&self, _target: &str, timeout: Duration) -> StreamResult<Box<dyn FrameSource>> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let script = self.scripts.lock().unwrap().pop_front().unwrap_or(Script::Refuse);
        match script {
            Script::Frames(n) => Ok(Box::new(ScriptedSource { remaining: n })),
            Script::Timeout => Err(StreamError::ConnectTimeout(timeout)),
            Script::Refuse => Err(StreamError::Connect("connection refused".into())),
            Script::Hang(d) => {
                std::thread::sleep(d);
                Err(StreamError::ConnectTimeout(timeout))
            }
        }
    }
}

struct ScriptedSource {
    remaining: usize,
}

impl FrameSource for ScriptedSource {
    fn read_frame(&mut self, _timeout: Duration) -> StreamResult<RgbImage> {
        if self.remaining == 0 {
            return Err(StreamError::Closed);
        }
        self.remaining -= 1;
        std::thread::sleep(Duration::from_millis(1));
        Ok(RgbImage::new(4, 4))
    }
}

/// 毫秒级参数, 让状态机在测试中快速运转
pub fn fast_config() -> StreamConfig {
    StreamConfig {
        connect_timeout_secs: 1.0,
        read_timeout_secs: 1.0,
        reconnect_base_delay_secs: 0.01,
        max_reconnect_attempts: 5,
        max_backoff_secs: 0.05,
        frame_skip: 0,
        target_fps: 15,
        stop_timeout_secs: 2.0,
    }
}

pub fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    cond()
}

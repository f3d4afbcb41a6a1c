/// 摄像头视频流会话
/// Camera stream session: one worker thread, reconnect state machine, latest-frame slot
///
/// 状态机:
/// Disconnected → Connecting → Connected → Streaming
///                    ↓                        ↓ (读帧失败)
///                  Failed  ←── 重试耗尽 ── Reconnecting → Connecting
use chrono::Utc;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError, TrySendError};
use image::RgbImage;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use super::backoff::Backoff;
use super::connector::{redact_target, FrameSource, StreamConnector};
use super::types::{SessionEvent, SessionSnapshot, StreamState, StreamStats, VideoFrame};
use crate::config::StreamConfig;
use crate::error::{StreamError, StreamResult};

/// FPS 统计窗口 (最近30次成功读帧)
const FPS_WINDOW: usize = 30;

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct Status {
    state: StreamState,
    stats: StreamStats,
    last_error: Option<String>,
}

/// 会话与工作线程共享的状态
struct Shared {
    camera_id: String,
    /// 当前有效的工作线程代数, 旧代工作线程的写入一律忽略
    generation: AtomicU64,
    status: Mutex<Status>,
    latest: Mutex<Option<VideoFrame>>,
    subscribers: Mutex<Vec<Sender<SessionEvent>>>,
}

impl Shared {
    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }

    /// 状态转移 (仅当前代工作线程有效)
    ///
    /// 事件在持有状态锁时投递, 与 `retire` 串行, 订阅者看到的事件顺序与状态变更顺序一致
    fn transition(&self, generation: u64, next: StreamState, error: Option<String>) -> bool {
        let mut status = lock(&self.status);
        if !self.is_current(generation) {
            return false;
        }
        if !status.state.can_transition_to(next) {
            tracing::warn!(
                camera_id = %self.camera_id,
                from = %status.state,
                to = %next,
                "非法状态转移,已忽略"
            );
            return false;
        }
        status.state = next;
        if error.is_some() {
            status.last_error = error.clone();
        }

        match &error {
            Some(e) => tracing::info!(camera_id = %self.camera_id, state = %next, error = %e, "📹 状态变更"),
            None => tracing::info!(camera_id = %self.camera_id, state = %next, "📹 状态变更"),
        }
        self.publish(SessionEvent::StateChanged {
            camera_id: self.camera_id.clone(),
            state: next,
            error,
        });
        true
    }

    /// 停止: 作废所有旧代工作线程并进入 Disconnected
    fn retire(&self) -> u64 {
        let mut status = lock(&self.status);
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        status.state = StreamState::Disconnected;
        tracing::info!(camera_id = %self.camera_id, state = %StreamState::Disconnected, "📹 状态变更");
        self.publish(SessionEvent::StateChanged {
            camera_id: self.camera_id.clone(),
            state: StreamState::Disconnected,
            error: None,
        });
        generation
    }

    /// 尽力投递 (at-most-once, 非阻塞): 队列满则丢弃, 订阅者断开则移除
    ///
    /// 锁顺序: status → latest → subscribers
    fn publish(&self, event: SessionEvent) {
        let mut subscribers = lock(&self.subscribers);
        subscribers.retain(|tx| match tx.try_send(event.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                tracing::trace!(camera_id = %self.camera_id, "订阅者队列已满,丢弃事件");
                true
            }
            Err(TrySendError::Disconnected(_)) => {
                tracing::debug!(camera_id = %self.camera_id, "订阅者已断开,移除");
                false
            }
        });
    }
}

/// 工作线程句柄
struct Worker {
    handle: JoinHandle<()>,
    stop_tx: Sender<()>,
    done_rx: Receiver<()>,
}

/// 摄像头视频流会话
///
/// 重连周期内持续存在, 仅在显式 stop/remove 时销毁
pub struct CameraStreamSession {
    camera_id: String,
    target: String,
    config: StreamConfig,
    connector: Arc<dyn StreamConnector>,
    shared: Arc<Shared>,
    worker: Mutex<Option<Worker>>,
}

impl CameraStreamSession {
    pub fn new(
        camera_id: impl Into<String>,
        target: impl Into<String>,
        config: StreamConfig,
        connector: Arc<dyn StreamConnector>,
    ) -> Self {
        let camera_id = camera_id.into();
        Self {
            shared: Arc::new(Shared {
                camera_id: camera_id.clone(),
                generation: AtomicU64::new(0),
                status: Mutex::new(Status {
                    state: StreamState::Disconnected,
                    stats: StreamStats::default(),
                    last_error: None,
                }),
                latest: Mutex::new(None),
                subscribers: Mutex::new(Vec::new()),
            }),
            camera_id,
            target: target.into(),
            config,
            connector,
            worker: Mutex::new(None),
        }
    }

    pub fn camera_id(&self) -> &str {
        &self.camera_id
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    /// 启动工作线程
    ///
    /// 已在运行时返回 false; 终态 Failed 需要再次调用 start 才能恢复
    pub fn start(&self) -> bool {
        let mut worker = lock(&self.worker);
        if let Some(w) = worker.as_ref() {
            if !w.handle.is_finished() {
                tracing::warn!(camera_id = %self.camera_id, "⚠️ 会话已在运行");
                return false;
            }
        }
        if let Some(finished) = worker.take() {
            let _ = finished.handle.join();
        }

        let generation = self.shared.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let (stop_tx, stop_rx) = crossbeam_channel::bounded(1);
        let (done_tx, done_rx) = crossbeam_channel::bounded(1);

        let runner = SessionWorker {
            shared: Arc::clone(&self.shared),
            connector: Arc::clone(&self.connector),
            target: self.target.clone(),
            config: self.config.clone(),
            generation,
            stop_rx,
            _done_tx: done_tx,
        };

        let spawned = std::thread::Builder::new()
            .name(format!("stream-{}", self.camera_id))
            .spawn(move || runner.run());

        match spawned {
            Ok(handle) => {
                tracing::info!(
                    camera_id = %self.camera_id,
                    target = %redact_target(&self.target),
                    "🎬 会话启动"
                );
                *worker = Some(Worker {
                    handle,
                    stop_tx,
                    done_rx,
                });
                true
            }
            Err(e) => {
                tracing::error!(camera_id = %self.camera_id, error = %e, "❌ 工作线程创建失败");
                let mut status = lock(&self.shared.status);
                status.state = StreamState::Failed;
                status.last_error = Some(format!("worker spawn failed: {e}"));
                false
            }
        }
    }

    /// 停止会话 (任意状态 → Disconnected)
    ///
    /// 最多等待 `stop_timeout`; 超时的工作线程被放弃 (detach),
    /// 其后续写入因代数失效而被忽略
    pub fn stop(&self) {
        let worker = lock(&self.worker).take();
        if let Some(w) = worker {
            let _ = w.stop_tx.try_send(());
            match w.done_rx.recv_timeout(self.config.stop_timeout()) {
                Err(RecvTimeoutError::Timeout) => {
                    tracing::warn!(
                        camera_id = %self.camera_id,
                        timeout_secs = self.config.stop_timeout_secs,
                        "⚠️ 工作线程未在限定时间内退出,已放弃"
                    );
                }
                Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                    let _ = w.handle.join();
                }
            }
        }
        self.shared.retire();
        tracing::info!(camera_id = %self.camera_id, "⏹️ 会话已停止");
    }

    pub fn is_running(&self) -> bool {
        lock(&self.worker)
            .as_ref()
            .map_or(false, |w| !w.handle.is_finished())
    }

    pub fn state(&self) -> StreamState {
        lock(&self.shared.status).state
    }

    pub fn stats(&self) -> StreamStats {
        lock(&self.shared.status).stats.clone()
    }

    pub fn last_error(&self) -> Option<String> {
        lock(&self.shared.status).last_error.clone()
    }

    /// 最新解码帧 (单槽位, 覆盖写)
    pub fn latest_frame(&self) -> Option<VideoFrame> {
        lock(&self.shared.latest).clone()
    }

    /// 订阅会话事件
    ///
    /// 投递语义: 至多一次、尽力而为、不阻塞工作线程
    pub fn subscribe(&self, capacity: usize) -> Receiver<SessionEvent> {
        let (tx, rx) = crossbeam_channel::bounded(capacity.max(1));
        lock(&self.shared.subscribers).push(tx);
        rx
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let status = lock(&self.shared.status);
        SessionSnapshot {
            camera_id: self.camera_id.clone(),
            target: redact_target(&self.target),
            state: status.state,
            stats: status.stats.clone(),
            error: status.last_error.clone(),
        }
    }
}

impl Drop for CameraStreamSession {
    fn drop(&mut self) {
        if lock(&self.worker).is_some() {
            self.stop();
        }
    }
}

/// 滚动FPS窗口
struct FpsWindow {
    times: VecDeque<Instant>,
}

impl FpsWindow {
    fn new() -> Self {
        Self {
            times: VecDeque::with_capacity(FPS_WINDOW),
        }
    }

    fn push(&mut self, t: Instant) -> f64 {
        self.times.push_back(t);
        while self.times.len() > FPS_WINDOW {
            self.times.pop_front();
        }
        match (self.times.front(), self.times.back()) {
            (Some(first), Some(last)) if self.times.len() >= 2 => {
                let span = last.duration_since(*first).as_secs_f64();
                if span > 0.0 {
                    (self.times.len() - 1) as f64 / span
                } else {
                    0.0
                }
            }
            _ => 0.0,
        }
    }
}

/// 会话工作线程
struct SessionWorker {
    shared: Arc<Shared>,
    connector: Arc<dyn StreamConnector>,
    target: String,
    config: StreamConfig,
    generation: u64,
    stop_rx: Receiver<()>,
    // 线程退出时 drop, 通知 stop() 等待方
    _done_tx: Sender<()>,
}

impl SessionWorker {
    fn camera_id(&self) -> &str {
        &self.shared.camera_id
    }

    fn should_stop(&self) -> bool {
        !self.shared.is_current(self.generation)
            || matches!(self.stop_rx.try_recv(), Ok(()) | Err(TryRecvError::Disconnected))
    }

    fn transition(&self, next: StreamState, error: Option<String>) -> bool {
        self.shared.transition(self.generation, next, error)
    }

    fn run(self) {
        let mut backoff = Backoff::new(
            self.config.reconnect_base_delay(),
            self.config.max_backoff(),
            self.config.max_reconnect_attempts,
        );
        let mut fps = FpsWindow::new();

        'session: loop {
            if self.should_stop() || !self.transition(StreamState::Connecting, None) {
                break;
            }

            let started = Instant::now();
            let (mut source, first) = match self.open() {
                Ok(opened) => opened,
                Err(e) => {
                    tracing::error!(camera_id = %self.camera_id(), error = %e, "❌ 连接失败");
                    self.transition(StreamState::Failed, Some(e.to_string()));
                    if !self.wait_backoff(&mut backoff, &e) {
                        break;
                    }
                    continue;
                }
            };

            let latency = started.elapsed().as_secs_f64();
            backoff.reset();
            {
                let mut status = lock(&self.shared.status);
                if self.shared.is_current(self.generation) {
                    status.stats.connect_latency_secs = latency;
                }
            }
            tracing::info!(camera_id = %self.camera_id(), latency_secs = latency, "✅ 连接成功");
            if !self.transition(StreamState::Connected, None)
                || !self.transition(StreamState::Streaming, None)
            {
                break;
            }
            self.on_frame(first, &mut fps);

            loop {
                if self.should_stop() {
                    break 'session;
                }
                match source.read_frame(self.config.read_timeout()) {
                    Ok(image) => self.on_frame(image, &mut fps),
                    Err(e) => {
                        tracing::warn!(camera_id = %self.camera_id(), error = %e, "⚠️ 读帧失败");
                        {
                            let mut status = lock(&self.shared.status);
                            if self.shared.is_current(self.generation) {
                                status.stats.frames_dropped += 1;
                                status.last_error = Some(e.to_string());
                            }
                        }
                        drop(source);
                        if !self.wait_backoff(&mut backoff, &e) {
                            break 'session;
                        }
                        continue 'session;
                    }
                }
            }
        }
        tracing::debug!(camera_id = %self.camera_id(), generation = self.generation, "工作线程退出");
    }

    /// 握手 + 在超时内读到首帧
    fn open(&self) -> StreamResult<(Box<dyn FrameSource>, RgbImage)> {
        let timeout = self.config.connect_timeout();
        let started = Instant::now();
        let mut source = self.connector.connect(&self.target, timeout)?;

        let remaining = timeout.saturating_sub(started.elapsed());
        if remaining.is_zero() {
            return Err(StreamError::ConnectTimeout(timeout));
        }
        let first = source.read_frame(remaining).map_err(|e| match e {
            StreamError::ReadTimeout(_) => StreamError::ConnectTimeout(timeout),
            other => other,
        })?;
        Ok((source, first))
    }

    /// 记录失败并等待退避; 返回 false 表示应退出 (重试耗尽或收到停止)
    fn wait_backoff(&self, backoff: &mut Backoff, error: &StreamError) -> bool {
        let Some(delay) = backoff.on_failure() else {
            let message = format!(
                "max reconnection attempts ({}) reached: {}",
                backoff.max_attempts(),
                error
            );
            tracing::error!(camera_id = %self.camera_id(), "❌ 重连次数耗尽");
            self.transition(StreamState::Failed, Some(message));
            return false;
        };

        if !self.transition(StreamState::Reconnecting, None) {
            return false;
        }
        tracing::info!(
            camera_id = %self.camera_id(),
            delay_secs = delay.as_secs_f64(),
            attempt = backoff.failures() + 1,
            "🔄 等待重连"
        );

        match self.stop_rx.recv_timeout(delay) {
            Err(RecvTimeoutError::Timeout) => {
                let mut status = lock(&self.shared.status);
                if !self.shared.is_current(self.generation) {
                    return false;
                }
                status.stats.reconnect_count += 1;
                true
            }
            Ok(()) | Err(RecvTimeoutError::Disconnected) => false,
        }
    }

    /// 单帧成功: 覆盖最新帧槽位, 更新统计, 按跳帧因子转发
    fn on_frame(&self, image: RgbImage, fps: &mut FpsWindow) {
        let avg_fps = fps.push(Instant::now());
        let skip = self.config.frame_skip as u64;

        let mut status = lock(&self.shared.status);
        if !self.shared.is_current(self.generation) {
            return;
        }
        let stats = &mut status.stats;
        stats.frames_received += 1;
        stats.bytes_received += image.as_raw().len() as u64;
        stats.avg_fps = avg_fps;
        stats.last_frame_at = Some(Utc::now());
        let frame_id = stats.frames_received;
        let frame = VideoFrame::new(image, frame_id);

        // 仍持有状态锁: 停止后不会再有旧代帧进入槽位或队列
        *lock(&self.shared.latest) = Some(frame.clone());

        if frame_id % (skip + 1) == 0 {
            self.shared.publish(SessionEvent::Frame {
                camera_id: self.shared.camera_id.clone(),
                frame,
            });
        }
    }
}

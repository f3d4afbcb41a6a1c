/// RTSP主动拉流连接器 (FFmpeg软件解码)
/// RTSP connector backed by ez-ffmpeg, software decoding only
use crossbeam_channel::{Receiver, RecvTimeoutError};
use ez_ffmpeg::core::context::null_output::create_null_output;
use ez_ffmpeg::filter::frame_pipeline_builder::FramePipelineBuilder;
use ez_ffmpeg::{AVMediaType, FfmpegContext, Input};
use image::RgbImage;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::connector::{redact_target, FrameSource, StreamConnector};
use super::decode_filter::DecodeFilter;
use crate::error::{StreamError, StreamResult};

/// FFmpeg 连接器
#[derive(Debug, Clone)]
pub struct FfmpegConnector {
    /// 输出分辨率, None 表示保持原始分辨率
    pub scale: Option<(u32, u32)>,
    /// RTSP 传输方式 (tcp/udp)
    pub transport: String,
}

impl Default for FfmpegConnector {
    fn default() -> Self {
        Self {
            scale: Some((1280, 720)),
            transport: "tcp".to_string(),
        }
    }
}

impl StreamConnector for FfmpegConnector {
    fn connect(&self, target: &str, timeout: Duration) -> StreamResult<Box<dyn FrameSource>> {
        tracing::debug!(target = %redact_target(target), "🔍 使用CPU软件解码");

        // 容量1: 读到的永远是最新解码帧
        let (tx, rx) = crossbeam_channel::bounded(1);
        let closed = Arc::new(AtomicBool::new(false));
        let filter = DecodeFilter::new(tx, rx.clone(), Arc::clone(&closed), redact_target(target));

        let pipe: FramePipelineBuilder = AVMediaType::AVMEDIA_TYPE_VIDEO.into();
        let pipe = pipe.filter("decode", Box::new(filter));
        let out = create_null_output().add_frame_pipeline(pipe);

        // socket 超时 (微秒)
        let timeout_us = timeout.as_micros().to_string();
        let input = Input::new(target).set_input_opts(
            [
                ("rtsp_transport", self.transport.as_str()),
                ("rtsp_flags", "prefer_tcp"),
                ("buffer_size", "67108864"),
                ("timeout", timeout_us.as_str()),
            ]
            .into(),
        );

        let mut filters = vec!["format=yuv420p".to_string()];
        if let Some((w, h)) = self.scale {
            filters.insert(0, format!("scale={w}:{h}"));
        }

        let ctx = FfmpegContext::builder()
            .input(input)
            .filter_desc(filters.join(","))
            .output(out)
            .build()
            .map_err(|e| StreamError::Connect(format!("build failed: {e}")))?;

        let scheduler = ctx
            .start()
            .map_err(|e| StreamError::Connect(format!("start failed: {e}")))?;

        Ok(Box::new(FfmpegSource {
            rx,
            closed,
            abort: Some(Box::new(move || scheduler.abort())),
        }))
    }
}

/// 运行中的FFmpeg解码流水线
struct FfmpegSource {
    rx: Receiver<RgbImage>,
    closed: Arc<AtomicBool>,
    abort: Option<Box<dyn FnOnce() + Send>>,
}

impl FrameSource for FfmpegSource {
    fn read_frame(&mut self, timeout: Duration) -> StreamResult<RgbImage> {
        match self.rx.recv_timeout(timeout) {
            Ok(image) => Ok(image),
            Err(RecvTimeoutError::Timeout) => Err(StreamError::ReadTimeout(timeout)),
            Err(RecvTimeoutError::Disconnected) => Err(StreamError::Closed),
        }
    }
}

impl Drop for FfmpegSource {
    fn drop(&mut self) {
        self.closed.store(true, Ordering::Release);
        if let Some(abort) = self.abort.take() {
            abort();
        }
    }
}

/// FFmpeg解码过滤器模块
/// FFmpeg decode filter module: YUV420P frame → RgbImage → session channel
use crossbeam_channel::{Receiver, Sender};
use ez_ffmpeg::filter::frame_filter::FrameFilter;
use ez_ffmpeg::filter::frame_filter_context::FrameFilterContext;
use ez_ffmpeg::{AVMediaType, Frame};
use image::RgbImage;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::connector::send_latest;

/// FFmpeg解码过滤器: RTSP流 → RGB帧
///
/// 通道满时丢弃旧帧 (会话线程只关心最新帧)
#[derive(Clone)]
pub struct DecodeFilter {
    pub tx: Sender<RgbImage>,
    /// 与会话共用的接收端, 仅用于丢弃积压的旧帧
    pub drain: Receiver<RgbImage>,
    /// 会话释放连接后置位
    pub closed: Arc<AtomicBool>,
    /// 已脱敏的拉流地址, 仅用于日志
    pub target: String,
    pub count: u64,
}

impl DecodeFilter {
    pub fn new(
        tx: Sender<RgbImage>,
        drain: Receiver<RgbImage>,
        closed: Arc<AtomicBool>,
        target: String,
    ) -> Self {
        Self {
            tx,
            drain,
            closed,
            target,
            count: 0,
        }
    }
}

impl FrameFilter for DecodeFilter {
    fn media_type(&self) -> AVMediaType {
        AVMediaType::AVMEDIA_TYPE_VIDEO
    }

    fn init(&mut self, _ctx: &FrameFilterContext) -> Result<(), String> {
        tracing::debug!(target = %self.target, "✅ 解码过滤器启动");
        Ok(())
    }

    fn filter_frame(
        &mut self,
        frame: Frame,
        _ctx: &FrameFilterContext,
    ) -> Result<Option<Frame>, String> {
        unsafe {
            if frame.as_ptr().is_null() {
                return Ok(Some(frame));
            }

            let w = (*frame.as_ptr()).width as u32;
            let h = (*frame.as_ptr()).height as u32;
            if w == 0 || h == 0 {
                return Ok(Some(frame));
            }

            // YUV420P → RGB (BT.601)
            let data_y = (*frame.as_ptr()).data[0];
            let data_u = (*frame.as_ptr()).data[1];
            let data_v = (*frame.as_ptr()).data[2];
            if data_y.is_null() || data_u.is_null() || data_v.is_null() {
                return Err("unexpected pixel format, yuv420p required".to_string());
            }
            let y_stride = (*frame.as_ptr()).linesize[0] as usize;
            let uv_stride = (*frame.as_ptr()).linesize[1] as usize;

            let mut rgb = vec![0u8; (w * h) as usize * 3];
            for y in 0..h as usize {
                for x in 0..w as usize {
                    let y_val = *data_y.add(y * y_stride + x) as f32;
                    let u_val = *data_u.add((y / 2) * uv_stride + x / 2) as f32 - 128.0;
                    let v_val = *data_v.add((y / 2) * uv_stride + x / 2) as f32 - 128.0;

                    let idx = (y * w as usize + x) * 3;
                    rgb[idx] = (y_val + 1.402 * v_val).clamp(0.0, 255.0) as u8;
                    rgb[idx + 1] = (y_val - 0.344 * u_val - 0.714 * v_val).clamp(0.0, 255.0) as u8;
                    rgb[idx + 2] = (y_val + 1.772 * u_val).clamp(0.0, 255.0) as u8;
                }
            }

            self.count += 1;
            // 会话已释放连接, 通知FFmpeg结束
            if self.closed.load(Ordering::Acquire) {
                return Err("session closed".to_string());
            }
            if let Some(image) = RgbImage::from_raw(w, h, rgb) {
                if !send_latest(&self.tx, &self.drain, image) {
                    return Err("session closed".to_string());
                }
            }

            Ok(Some(frame))
        }
    }

    fn uninit(&mut self, _ctx: &FrameFilterContext) {
        tracing::debug!(target = %self.target, frames = self.count, "解码过滤器退出");
    }
}

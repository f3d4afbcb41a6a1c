/// 数字卫兵 (Digital Sentinel)
///
/// 多路摄像头跌倒监控
///
/// 系统架构:
/// 1. 采集线程: 每路摄像头一个会话工作线程 (连接/解码/断线重连)
/// 2. 主线程:   按目标帧率取各路最新帧 → 检测引擎 → 告警与快照
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Context};
use clap::Parser;
use crossbeam_channel::Receiver;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use fallguard::detection::NoopEstimator;
use fallguard::input::{FfmpegConnector, SessionEvent};
use fallguard::{gen_time_string, AppContext, FallguardConfig, StreamState};

/// 数字卫兵参数
#[derive(Parser, Debug)]
#[command(author, version, about = "数字卫兵 - 多路摄像头跌倒监控", long_about = None)]
struct Args {
    /// 配置文件 (不存在时写入默认配置)
    #[arg(short, long, default_value = "fallguard.json")]
    config: PathBuf,

    /// 摄像头, 格式 ID=URL, 可重复
    #[arg(long = "camera", value_name = "ID=URL", required = true)]
    cameras: Vec<String>,

    /// 跳帧数 (覆盖配置文件)
    #[arg(long)]
    frame_skip: Option<u32>,

    /// 检测帧率 (覆盖配置文件)
    #[arg(long)]
    target_fps: Option<u32>,

    /// 跌倒告警冷却秒数 (覆盖配置文件)
    #[arg(long)]
    cooldown: Option<f64>,

    /// 解码输出分辨率, 格式 WxH; 为空则保持原始分辨率
    #[arg(long, default_value = "1280x720")]
    scale: String,

    /// 统计输出间隔 (秒)
    #[arg(long, default_value_t = 10)]
    stats_interval: u64,

    /// 跌倒快照保存目录
    #[arg(long)]
    snapshot_dir: Option<PathBuf>,

    /// 运行时长 (秒), 不指定则一直运行
    #[arg(long)]
    duration: Option<u64>,
}

fn parse_camera(arg: &str) -> anyhow::Result<(String, String)> {
    match arg.split_once('=') {
        Some((id, url)) if !id.trim().is_empty() && !url.trim().is_empty() => {
            Ok((id.trim().to_string(), url.trim().to_string()))
        }
        _ => bail!("invalid --camera '{arg}', expected ID=URL"),
    }
}

fn parse_scale(arg: &str) -> anyhow::Result<Option<(u32, u32)>> {
    if arg.is_empty() {
        return Ok(None);
    }
    let (w, h) = arg
        .split_once('x')
        .with_context(|| format!("invalid --scale '{arg}', expected WxH"))?;
    Ok(Some((w.parse()?, h.parse()?)))
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "fallguard=info,sentinel=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    let mut config = FallguardConfig::load(&args.config);
    if let Some(skip) = args.frame_skip {
        config.stream.frame_skip = skip;
    }
    if let Some(fps) = args.target_fps {
        config.stream.target_fps = fps;
    }
    if let Some(cooldown) = args.cooldown {
        config.fall.cooldown_secs = cooldown;
    }
    config.validate()?;
    config.print_summary();

    let cameras = args
        .cameras
        .iter()
        .map(|c| parse_camera(c))
        .collect::<anyhow::Result<Vec<_>>>()?;

    let connector = FfmpegConnector {
        scale: parse_scale(&args.scale)?,
        ..Default::default()
    };

    if let Some(dir) = &args.snapshot_dir {
        std::fs::create_dir_all(dir).with_context(|| format!("create {}", dir.display()))?;
    }

    tracing::info!(cameras = cameras.len(), "🚀 数字卫兵系统启动");

    let ctx = AppContext::new(config, Arc::new(connector));

    // ========== 启动采集会话 ==========
    let mut events: HashMap<String, Receiver<SessionEvent>> = HashMap::new();
    for (id, url) in &cameras {
        let session = ctx.registry.create(id, url);
        events.insert(id.clone(), session.subscribe(32));
        session.start();
    }

    // 姿态模型不随本程序分发, 未注入估计器时只做拉流与健康监控
    let mut engine = ctx.detection_engine_with(|opts| {
        tracing::warn!(
            max_persons = opts.max_persons,
            min_detection_confidence = opts.min_detection_confidence,
            min_tracking_confidence = opts.min_tracking_confidence,
            layout = ?opts.layout,
            "⚠️ 未配置姿态估计器, 检测结果将不含人员"
        );
        Box::new(NoopEstimator)
    });

    // ========== 主循环 ==========
    let tick = ctx.config.stream.tick_interval();
    let stats_interval = Duration::from_secs(args.stats_interval.max(1));
    let started = Instant::now();
    let mut last_stats = Instant::now();
    let mut last_frame_ids: HashMap<String, u64> = HashMap::new();

    loop {
        let tick_start = Instant::now();

        // 流断开后清理该路轨迹
        for (id, rx) in &events {
            for event in rx.try_iter() {
                if let SessionEvent::StateChanged { state, error, .. } = event {
                    match state {
                        StreamState::Reconnecting | StreamState::Failed => {
                            engine.reset_camera(id);
                            tracing::warn!(camera_id = %id, state = %state, error = ?error, "📴 视频流中断");
                        }
                        StreamState::Streaming => {
                            tracing::info!(camera_id = %id, "📡 视频流就绪");
                        }
                        _ => {}
                    }
                }
            }
        }

        for id in ctx.registry.camera_ids() {
            let Some(session) = ctx.registry.get_session(&id) else {
                continue;
            };
            let Some(frame) = session.latest_frame() else {
                continue;
            };
            // 同一帧只处理一次
            if last_frame_ids.get(&id) == Some(&frame.frame_id) {
                continue;
            }
            last_frame_ids.insert(id.clone(), frame.frame_id);

            let (annotated, result) = engine.process_frame(&frame, &id);
            tracing::debug!(
                camera_id = %id,
                persons = result.persons.len(),
                ms = %format!("{:.1}", result.processing_time_ms),
                "🔍 检测完成"
            );

            if result.fall_detected {
                tracing::warn!(camera_id = %id, persons = ?result.fall_person_ids, "🚨 跌倒告警");
                if let Ok(json) = serde_json::to_string(&result) {
                    println!("{json}");
                }
                if let Some(dir) = &args.snapshot_dir {
                    let path = dir.join(format!("{}_{}.jpg", id, gen_time_string("-")));
                    if let Err(e) = annotated.save(&path) {
                        tracing::error!(path = %path.display(), error = %e, "❌ 快照保存失败");
                    }
                }
            }
        }

        if last_stats.elapsed() >= stats_interval {
            last_stats = Instant::now();
            let mut stats: Vec<_> = ctx.registry.all_stats().into_values().collect();
            stats.sort_by(|a, b| a.camera_id.cmp(&b.camera_id));
            for s in stats {
                tracing::info!(
                    camera_id = %s.camera_id,
                    state = %s.state,
                    fps = %format!("{:.1}", s.stats.avg_fps),
                    frames = s.stats.frames_received,
                    dropped = s.stats.frames_dropped,
                    reconnects = s.stats.reconnect_count,
                    error = ?s.error,
                    "📊 流状态"
                );
            }
        }

        if let Some(secs) = args.duration {
            if started.elapsed() >= Duration::from_secs(secs) {
                break;
            }
        }

        if let Some(rest) = tick.checked_sub(tick_start.elapsed()) {
            std::thread::sleep(rest);
        }
    }

    ctx.shutdown();
    tracing::info!("👋 数字卫兵已退出");
    Ok(())
}

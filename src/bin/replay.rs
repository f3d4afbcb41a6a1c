/// 关键点录制回放
///
/// 读取 JSON Lines 格式的关键点录制, 逐行送入检测引擎, 每行输出一个 DetectionResult (JSON)
///
/// 输入行格式:
/// {"camera_id": "cam1", "timestamp": "2024-01-01T00:00:00.000Z", "persons": [{"keypoints": [{"x":0.5,"y":0.2,"visibility":0.9}, ...]}]}
use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::PathBuf;

use anyhow::Context;
use chrono::{DateTime, Utc};
use clap::Parser;
use serde::Deserialize;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use fallguard::detection::{KeypointLayout, NoopEstimator, PersonPose};
use fallguard::FallguardConfig;

#[derive(Parser, Debug)]
#[command(author, version, about = "关键点录制回放 - 离线评估跌倒规则", long_about = None)]
struct Args {
    /// 输入文件 ("-" 表示标准输入)
    #[arg(short, long, default_value = "-")]
    input: String,

    /// 配置文件 (可选)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// 关键点布局: mediapipe33 / coco17
    #[arg(long)]
    layout: Option<String>,

    /// 只输出检测到跌倒的行
    #[arg(long)]
    falls_only: bool,
}

#[derive(Debug, Deserialize)]
struct Record {
    camera_id: String,
    timestamp: DateTime<Utc>,
    #[serde(default)]
    persons: Vec<PersonPose>,
}

fn parse_layout(name: &str) -> anyhow::Result<KeypointLayout> {
    serde_json::from_value(serde_json::Value::String(name.to_lowercase()))
        .with_context(|| format!("unknown keypoint layout '{name}'"))
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "fallguard=info,replay=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => FallguardConfig::try_load(path)?,
        None => FallguardConfig::default(),
    };
    if let Some(layout) = &args.layout {
        config.detection.keypoint_layout = parse_layout(layout)?;
    }
    config.validate()?;

    let reader: Box<dyn BufRead> = if args.input == "-" {
        Box::new(BufReader::new(io::stdin()))
    } else {
        let file = File::open(&args.input).with_context(|| format!("open {}", args.input))?;
        Box::new(BufReader::new(file))
    };

    let mut engine = fallguard::DetectionEngine::new(
        Box::new(NoopEstimator),
        config.detection.clone(),
        config.fall.clone(),
    );

    let stdout = io::stdout();
    let mut out = BufWriter::new(stdout.lock());
    let (mut frames, mut falls, mut skipped) = (0u64, 0u64, 0u64);

    for (lineno, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let record: Record = match serde_json::from_str(&line) {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(line = lineno + 1, error = %e, "⚠️ 跳过无法解析的行");
                skipped += 1;
                continue;
            }
        };

        let result = engine.process_poses(&record.camera_id, record.persons, record.timestamp);
        frames += 1;
        if result.fall_detected {
            falls += 1;
        }
        if !args.falls_only || result.fall_detected {
            serde_json::to_writer(&mut out, &result)?;
            out.write_all(b"\n")?;
        }
    }
    out.flush()?;

    tracing::info!(frames, falls, skipped, tracks = engine.track_count(), "✅ 回放完成");
    Ok(())
}

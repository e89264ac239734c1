use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use signal_hook::consts::{SIGINT, SIGTERM};
use tracing_subscriber::{prelude::*, EnvFilter};
use v4l_capture::{CancelToken, CaptureDevice, CaptureLoop, FrameSink, LoopSummary};

use crate::{
    codec::FrameCodec,
    config::{Params, Settings},
    detector::{Detector, NullDetector},
    pipeline::FacePipeline,
    render::FileWriter,
};

mod codec;
mod config;
mod detector;
mod pipeline;
mod render;

#[derive(Debug, Clone, clap::Parser)]
#[command(about = "カメラ映像から顔を検出して結果画像を書き出す")]
struct Opt {
    /// YAMLの設定ファイル。コマンドライン引数が優先される
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(flatten)]
    params: Params,
}

fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    let Opt { config, params } = Opt::parse();
    let settings = Settings::load(config.as_deref(), params)?;

    let token = CancelToken::new();
    for sig in [SIGINT, SIGTERM] {
        signal_hook::flag::register(sig, token.flag())
            .with_context(|| format!("failed to register signal {sig}"))?;
    }

    let detector = NullDetector::init(settings.model.as_deref())?;
    let writer = FileWriter::new(&settings.output);
    let mut pipeline = FacePipeline::new(FrameCodec, detector, writer);

    let res = capture(&settings, &token, &mut pipeline);

    // デバイスを閉じてから検出器を解放する
    let mut detector = pipeline.into_detector();
    if let Err(e) = detector.release() {
        tracing::warn!("Failed to release detector: {:?}", e);
    }

    let summary = res?;
    tracing::info!(
        "{} frames captured, last result in {}",
        summary.frames,
        settings.output.display()
    );
    Ok(())
}

// デバイスの構築からループ終了、解放までを行う
fn capture<S: FrameSink>(
    settings: &Settings,
    token: &CancelToken,
    sink: &mut S,
) -> anyhow::Result<LoopSummary> {
    let mut device = CaptureDevice::open_with(&settings.device, settings.request)?;
    let res = run(&mut device, settings, token, sink);
    device.stop_and_close();
    res
}

fn run<S: FrameSink>(
    device: &mut CaptureDevice,
    settings: &Settings,
    token: &CancelToken,
    sink: &mut S,
) -> anyhow::Result<LoopSummary> {
    device.allocate_buffers(settings.buffers)?;
    device.start_streaming()?;

    let format = device.format();
    tracing::info!(
        "capturing {} from {} into {}",
        format,
        device.path().display(),
        settings.output.display()
    );
    tracing::info!("Press Ctrl+C to stop");

    let summary = CaptureLoop::new(settings.loop_config.clone()).run(device, token, sink)?;
    Ok(summary)
}

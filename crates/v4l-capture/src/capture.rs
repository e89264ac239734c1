//! フレーム取得ループ
//!
//! 1スレッドで取得と処理を繰り返す。ブロックするのは取得時の待機だけで、
//! その上限はタイムアウトで決まるため、停止要求には最大1タイムアウト分の遅れで応じる

use std::{
    fmt,
    time::{Duration, Instant},
};

use crate::{
    cancel::CancelToken,
    device::{CaptureDevice, CapturedFrame},
    driver::Driver,
    error::{AcquireError, RunError, SinkError},
};

/// ループのパラメータ
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopConfig {
    /// 1回の取得で待つ最大時間
    pub timeout: Duration,
    /// 進捗をログに出す間隔。0なら出さない
    pub report_every: u64,
    /// 指定数のフレームを処理したら終了する
    pub max_frames: Option<u64>,
    /// 連続した一時エラーをこの回数で致命的とみなす
    pub max_consecutive_transient: u32,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(1),
            report_every: 10,
            max_frames: None,
            max_consecutive_transient: 50,
        }
    }
}

/// ループ開始からのフレーム数と経過時間
///
/// デバイスから取得できたフレームを数えるので、処理先が読み飛ばしたフレームも含む。
/// 検出した顔の数など処理結果は処理先が自分で報告する
#[derive(Debug, Clone, Copy)]
pub struct Throughput {
    frames: u64,
    start: Instant,
    elapsed: Duration,
}

impl Throughput {
    pub fn start(now: Instant) -> Self {
        Self {
            frames: 0,
            start: now,
            elapsed: Duration::ZERO,
        }
    }

    /// 1フレーム取得したことを記録する
    pub fn record(&mut self, now: Instant) {
        self.frames += 1;
        self.elapsed = now.saturating_duration_since(self.start);
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// 最後に記録した時点での経過時間
    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    /// 秒間フレーム数。経過時間が0の間は計算しない
    pub fn fps(&self) -> Option<f64> {
        let secs = self.elapsed.as_secs_f64();
        (secs > 0.0).then(|| self.frames as f64 / secs)
    }
}

impl fmt::Display for Throughput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "frame={} fps={:.2}",
            self.frames,
            self.fps().unwrap_or_default()
        )
    }
}

/// 取得したフレームの処理先
pub trait FrameSink {
    /// `stats`はこのフレームを含めた値
    fn consume(&mut self, frame: &CapturedFrame, stats: &Throughput) -> Result<(), SinkError>;
}

/// ループの終了理由
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    Cancelled,
    FrameLimit,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoopSummary {
    pub frames: u64,
    pub elapsed: Duration,
    pub reason: ExitReason,
}

pub struct CaptureLoop {
    config: LoopConfig,
}

impl CaptureLoop {
    pub fn new(config: LoopConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &LoopConfig {
        &self.config
    }

    /// 停止要求かフレーム数の上限まで取得を続ける
    ///
    /// デバイスの解放は呼び出し側で行う
    pub fn run<D, S>(
        &self,
        device: &mut CaptureDevice<D>,
        token: &CancelToken,
        sink: &mut S,
    ) -> Result<LoopSummary, RunError>
    where
        D: Driver,
        S: FrameSink + ?Sized,
    {
        let start = Instant::now();
        let mut stats = Throughput::start(start);
        let mut transient = 0u32;
        let limit = self.config.max_frames;

        let reason = loop {
            if token.is_cancelled() {
                break ExitReason::Cancelled;
            }
            if limit.is_some_and(|max| stats.frames() >= max) {
                break ExitReason::FrameLimit;
            }

            let res = device.acquire_frame(self.config.timeout);
            if token.is_cancelled() {
                break ExitReason::Cancelled;
            }
            let frame = match res {
                Ok(frame) => frame,
                Err(AcquireError::Timeout(_)) => {
                    transient = 0;
                    continue;
                }
                Err(AcquireError::Transient(e)) => {
                    transient += 1;
                    if transient >= self.config.max_consecutive_transient {
                        tracing::error!("{transient} consecutive transient errors: {:?}", e);
                        return Err(AcquireError::Fatal(e).into());
                    }
                    continue;
                }
                Err(e) => {
                    tracing::error!("Failed to acquire frame: {:?}", e);
                    return Err(e.into());
                }
            };
            transient = 0;

            stats.record(Instant::now());
            let every = self.config.report_every;
            if every > 0 && stats.frames().is_multiple_of(every) {
                tracing::info!("{stats}");
            }

            match sink.consume(&frame, &stats) {
                Ok(()) => {}
                Err(SinkError::Skip(reason)) => {
                    tracing::debug!("frame {} skipped: {reason}", frame.sequence);
                }
                Err(SinkError::Fatal(e)) => {
                    tracing::error!("Failed to process frame {}: {:?}", frame.sequence, e);
                    return Err(RunError::Sink(e));
                }
            }
        };

        let summary = LoopSummary {
            frames: stats.frames(),
            elapsed: start.elapsed(),
            reason,
        };
        tracing::info!(
            "capture loop finished after {} frames in {:.2?} ({:?})",
            summary.frames,
            summary.elapsed,
            summary.reason
        );
        Ok(summary)
    }
}

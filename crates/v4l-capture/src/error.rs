use std::{io, path::PathBuf, time::Duration};

pub type Result<T> = std::result::Result<T, Error>;

/// デバイスのセットアップ中に発生するエラー
///
/// いずれも致命的で、途中まで構築したものを解放してから終了する
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to open {}: {source}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("capability query failed: {0}")]
    Capability(String),
    #[error("format negotiation failed: {0}")]
    FormatNegotiation(String),
    #[error("device granted {granted} buffers, at least {required} are required")]
    InsufficientBuffers { granted: u32, required: u32 },
    #[error("buffer {step} failed at index {index}: {source}")]
    Mapping {
        step: &'static str,
        index: u32,
        #[source]
        source: io::Error,
    },
    #[error("stream on rejected: {0}")]
    StreamOn(#[source] io::Error),
    #[error("invalid device state: {0}")]
    State(&'static str),
}

impl Error {
    pub(crate) fn mapping(step: &'static str, index: u32, source: io::Error) -> Self {
        Self::Mapping {
            step,
            index,
            source,
        }
    }
}

/// フレーム取得時のエラー
///
/// `Timeout`と`Transient`は次のループで再試行すればよい
#[derive(Debug, thiserror::Error)]
pub enum AcquireError {
    #[error("no frame became ready within {0:?}")]
    Timeout(Duration),
    #[error("device not ready: {0}")]
    Transient(#[source] io::Error),
    #[error("device error: {0}")]
    Fatal(#[source] io::Error),
}

impl AcquireError {
    /// ループを止めずに再試行できるか
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout(_) | Self::Transient(_))
    }

    pub(crate) fn fatal(msg: &'static str) -> Self {
        Self::Fatal(io::Error::other(msg))
    }
}

/// フレームの処理側が返すエラー
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    /// このフレームだけを捨てて続行する
    #[error("frame skipped: {0}")]
    Skip(String),
    /// ループを止める
    #[error(transparent)]
    Fatal(anyhow::Error),
}

/// キャプチャループを止めたエラー
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error(transparent)]
    Device(#[from] AcquireError),
    #[error(transparent)]
    Sink(anyhow::Error),
}

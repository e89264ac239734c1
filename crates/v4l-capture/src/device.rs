//! キャプチャデバイスのライフサイクル
//!
//! open → フォーマットのネゴシエーション → バッファ確保 → ストリーム開始 の順に構築し、
//! ストリーム停止 → アンマップ → close の逆順で解放する

use std::{
    io,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::{
    buffer::{BufferPool, Ownership},
    driver::{DeviceCaps, Driver},
    error::{AcquireError, Error, Result},
    format::{FormatRequest, FrameFormat},
    v4l2::V4l2Driver,
};

/// ストリーミング状態
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Streaming {
    Off,
    On,
}

/// デバイスメモリからコピーした1フレーム
///
/// バッファの状態とは独立した寿命を持つ
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedFrame {
    /// ネゴシエーション済みのフォーマット
    pub format: FrameFormat,
    pub data: Vec<u8>,
    /// ドライバのフレーム番号
    pub sequence: u32,
    /// コピー元のバッファ番号
    pub index: u32,
}

/// V4L2キャプチャデバイス
pub struct CaptureDevice<D: Driver = V4l2Driver> {
    path: PathBuf,
    driver: D,
    caps: DeviceCaps,
    format: FrameFormat,
    pool: Option<BufferPool<D::Region>>,
    streaming: Streaming,
    closed: bool,
}

impl CaptureDevice<V4l2Driver> {
    /// デバイスを開き、圧縮フォーマットで指定解像度をネゴシエーションする
    ///
    /// デバイスが非圧縮フォーマットを返した場合は設定エラーとする
    pub fn open(path: impl AsRef<Path>, width: u32, height: u32) -> Result<Self> {
        Self::open_with(path, FormatRequest::compressed(width, height))
    }

    /// 任意のエンコーディングを要求して開く
    pub fn open_with(path: impl AsRef<Path>, request: FormatRequest) -> Result<Self> {
        let path = path.as_ref();
        request.validate().map_err(Error::FormatNegotiation)?;
        let driver = V4l2Driver::open(path).map_err(|source| Error::Open {
            path: path.to_path_buf(),
            source,
        })?;
        Self::with_driver(path, driver, request)
    }
}

impl<D: Driver> CaptureDevice<D> {
    /// 開いたドライバに対してcapability確認とフォーマット設定を行う
    ///
    /// 失敗した場合はドライバを閉じてから返す
    pub fn with_driver(
        path: impl Into<PathBuf>,
        mut driver: D,
        request: FormatRequest,
    ) -> Result<Self> {
        let path = path.into();
        match negotiate(&mut driver, &request) {
            Ok((caps, format)) => {
                tracing::info!(
                    "{}: {} ({}) negotiated {}",
                    path.display(),
                    caps.card,
                    caps.driver,
                    format
                );
                Ok(Self {
                    path,
                    driver,
                    caps,
                    format,
                    pool: None,
                    streaming: Streaming::Off,
                    closed: false,
                })
            }
            Err(e) => {
                driver.close();
                Err(e)
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn caps(&self) -> &DeviceCaps {
        &self.caps
    }

    /// ネゴシエーション済みのフォーマット
    pub fn format(&self) -> FrameFormat {
        self.format
    }

    pub fn streaming(&self) -> Streaming {
        self.streaming
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn pool(&self) -> Option<&BufferPool<D::Region>> {
        self.pool.as_ref()
    }

    /// マップ済みのバッファ数
    pub fn buffer_count(&self) -> usize {
        self.pool.as_ref().map_or(0, BufferPool::len)
    }

    /// バッファを確保してマップし、全てをデバイスに渡す
    ///
    /// `count_hint`は2以上。デバイスがより少ない数を返すことがあるが、2未満なら失敗する
    pub fn allocate_buffers(&mut self, count_hint: u32) -> Result<()> {
        if self.closed {
            return Err(Error::State("device is closed"));
        }
        if self.pool.is_some() {
            return Err(Error::State("buffers are already allocated"));
        }
        let pool = BufferPool::create(&mut self.driver, count_hint)?;
        tracing::info!("{} buffers mapped", pool.len());
        self.pool = Some(pool);
        Ok(())
    }

    /// ストリームを開始する
    pub fn start_streaming(&mut self) -> Result<()> {
        if self.closed {
            return Err(Error::State("device is closed"));
        }
        if self.streaming == Streaming::On {
            return Ok(());
        }
        if self.pool.is_none() {
            return Err(Error::StreamOn(io::Error::other("no buffers are allocated")));
        }
        self.driver.stream_on().map_err(Error::StreamOn)?;
        self.streaming = Streaming::On;
        tracing::info!("streaming started");
        Ok(())
    }

    /// 次のフレームを最大`timeout`待って取得する
    ///
    /// 書き込まれたバイト数だけをコピーし、バッファはすぐにデバイスへ戻す
    pub fn acquire_frame(
        &mut self,
        timeout: Duration,
    ) -> std::result::Result<CapturedFrame, AcquireError> {
        if self.streaming != Streaming::On {
            return Err(AcquireError::fatal("device is not streaming"));
        }
        let Some(pool) = self.pool.as_mut() else {
            return Err(AcquireError::fatal("no buffers are allocated"));
        };

        match self.driver.wait_readable(timeout) {
            Ok(true) => {}
            Ok(false) => return Err(AcquireError::Timeout(timeout)),
            // シグナルで起こされた場合は呼び出し側でキャンセルを確認させる
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {
                return Err(AcquireError::Transient(e))
            }
            Err(e) => return Err(AcquireError::Fatal(e)),
        }

        let dequeued = match self.driver.dequeue() {
            Ok(d) => d,
            Err(e) if is_transient(&e) => return Err(AcquireError::Transient(e)),
            Err(e) => return Err(AcquireError::Fatal(e)),
        };

        let buffer = pool
            .take_from_device(dequeued.index)
            .map_err(AcquireError::Fatal)?;
        let data = buffer
            .read(dequeued.bytesused as usize)
            .ok_or_else(|| AcquireError::fatal("buffer is owned by the device"))?;
        pool.enqueue(&mut self.driver, dequeued.index)
            .inspect_err(|e| {
                tracing::error!("Failed to requeue buffer {}: {:?}", dequeued.index, e);
            })
            .map_err(AcquireError::Fatal)?;

        Ok(CapturedFrame {
            format: self.format,
            data,
            sequence: dequeued.sequence,
            index: dequeued.index,
        })
    }

    /// ストリーム停止、アンマップ、closeの順に解放する
    ///
    /// 何度呼んでもよく、確保の途中で失敗したデバイスに対しても安全。
    /// 各ステップは前のステップの失敗に関わらず実行する
    pub fn stop_and_close(&mut self) {
        if self.closed {
            return;
        }
        // 致命的なエラーの後ではデバイスが無効になっていることがあるので失敗は無視する
        if let Err(e) = self.driver.stream_off() {
            tracing::debug!("stream off failed: {:?}", e);
        }
        self.streaming = Streaming::Off;

        if let Some(mut pool) = self.pool.take() {
            // ストリーム停止でドライバのキューは空になる
            pool.reclaim_all();
            debug_assert_eq!(pool.count(Ownership::WithDevice), 0);
            let count = pool.len();
            pool.release(&mut self.driver);
            if let Err(e) = self.driver.request_buffers(0) {
                tracing::debug!("failed to free driver buffers: {:?}", e);
            }
            tracing::debug!("{count} buffers unmapped");
        }

        self.driver.close();
        self.closed = true;
        tracing::info!("{} closed", self.path.display());
    }
}

impl<D: Driver> Drop for CaptureDevice<D> {
    fn drop(&mut self) {
        self.stop_and_close();
    }
}

// キューが空か、シグナルで中断された
fn is_transient(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
    )
}

// capability確認とフォーマットのネゴシエーション
fn negotiate<D: Driver>(
    driver: &mut D,
    request: &FormatRequest,
) -> Result<(DeviceCaps, FrameFormat)> {
    request.validate().map_err(Error::FormatNegotiation)?;
    let caps = driver
        .query_caps()
        .map_err(|e| Error::Capability(e.to_string()))?;
    if !caps.video_capture {
        return Err(Error::Capability(format!(
            "{} does not support video capture",
            caps.card
        )));
    }
    if !caps.streaming {
        return Err(Error::Capability(format!(
            "{} does not support streaming I/O",
            caps.card
        )));
    }

    let requested = request.as_format();
    let format = driver
        .set_format(&requested)
        .map_err(|e| Error::FormatNegotiation(format!("device rejected {requested}: {e}")))?;
    if format.encoding != request.encoding {
        return Err(Error::FormatNegotiation(format!(
            "requested {} but device negotiated {}",
            request.encoding, format.encoding
        )));
    }
    if format.width == 0 || format.height == 0 {
        return Err(Error::FormatNegotiation(format!(
            "device negotiated an empty frame {format}"
        )));
    }
    if (format.width, format.height) != (request.width, request.height) {
        tracing::info!(
            "device adjusted {}x{} to {}x{}",
            request.width,
            request.height,
            format.width,
            format.height
        );
    }
    Ok((caps, format))
}

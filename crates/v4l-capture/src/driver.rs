//! カーネルドライバとのやり取りの抽象
//!
//! V4L2のioctl手順をそのままメソッドにしている。
//! 実機では[`crate::v4l2::V4l2Driver`]を使い、テストではメモリ上の擬似デバイスに差し替える

use std::{io, time::Duration};

use crate::format::FrameFormat;

/// capability問い合わせの結果のうち、キャプチャに必要なもの
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceCaps {
    pub driver: String,
    pub card: String,
    pub bus: String,
    /// VIDEO_CAPTUREをサポートしているか
    pub video_capture: bool,
    /// ストリーミングI/Oをサポートしているか
    pub streaming: bool,
}

/// QUERYBUFで得られるマッピングパラメータ
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferInfo {
    pub index: u32,
    pub length: u32,
    pub offset: u32,
}

/// DQBUFで受け取ったバッファの情報
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dequeued {
    pub index: u32,
    /// ドライバが書き込んだバイト数。バッファ容量以下
    pub bytesused: u32,
    pub sequence: u32,
}

/// プロセス空間にマップされたメモリ領域
pub trait Region {
    /// マップした領域のバイト数
    fn capacity(&self) -> usize;

    /// 先頭から`len`バイトをアプリケーション側のメモリにコピーする
    ///
    /// `len`が容量を超える場合は容量までに切り詰める
    fn copy_out(&self, len: usize) -> Vec<u8>;
}

/// V4L2キャプチャデバイスのプロトコル
///
/// 各メソッドは1つのioctlやシステムコールに対応する。
/// 状態遷移の順序は[`crate::device::CaptureDevice`]が管理する
pub trait Driver {
    type Region: Region;

    fn query_caps(&mut self) -> io::Result<DeviceCaps>;

    /// フォーマットを要求し、デバイスが実際に採用したフォーマットを返す
    fn set_format(&mut self, request: &FrameFormat) -> io::Result<FrameFormat>;

    /// MMAPバッファを要求し、デバイスが割り当てた数を返す。0を渡すと解放
    fn request_buffers(&mut self, count: u32) -> io::Result<u32>;

    fn query_buffer(&mut self, index: u32) -> io::Result<BufferInfo>;

    fn map(&mut self, info: &BufferInfo) -> io::Result<Self::Region>;

    /// マップを解除する。領域の所有権を受け取るので二重解除は起きない
    fn unmap(&mut self, region: Self::Region) -> io::Result<()>;

    fn queue(&mut self, index: u32) -> io::Result<()>;

    /// 書き込み済みのバッファを取り出す。準備ができていなければ`WouldBlock`
    fn dequeue(&mut self) -> io::Result<Dequeued>;

    /// 読み出し可能になるまで最大`timeout`待つ。タイムアウトしたら`Ok(false)`
    fn wait_readable(&mut self, timeout: Duration) -> io::Result<bool>;

    fn stream_on(&mut self) -> io::Result<()>;

    fn stream_off(&mut self) -> io::Result<()>;

    /// デバイスハンドルを閉じる。2回目以降は何もしない
    fn close(&mut self);
}

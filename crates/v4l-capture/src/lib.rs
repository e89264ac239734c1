//! V4L2デバイスからMMAPバッファでフレームを取り出すライブラリ
//!
//! デバイスを開いてからストリームを止めるまでのバッファの所有権を追跡し、
//! どの段階で失敗しても確保したものを解放できるようにしている

pub mod buffer;
pub mod cancel;
pub mod capture;
pub mod device;
pub mod driver;
pub mod error;
pub mod format;
#[cfg(test)]
mod mock;
pub mod util;
pub mod v4l2;

pub use cancel::CancelToken;
pub use capture::{CaptureLoop, ExitReason, FrameSink, LoopConfig, LoopSummary, Throughput};
pub use device::{CaptureDevice, CapturedFrame, Streaming};
pub use error::{AcquireError, Error, Result, RunError, SinkError};
pub use format::{FormatRequest, FrameFormat, PixelEncoding};

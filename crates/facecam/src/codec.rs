use std::borrow::Cow;

use image::{ImageFormat, RgbImage};
use v4l_capture::{FrameFormat, PixelEncoding};
use yuvutils_rs::{YuvPackedImage, YuvRange, YuvStandardMatrix};

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("unsupported encoding {0}")]
    UnsupportedEncoding(PixelEncoding),
    #[error("failed to decode frame: {0}")]
    Decode(String),
}

/// キャプチャしたバイト列を画像に変換する
pub trait ImageCodec {
    /// `format`はネゴシエーション済みの値を渡す
    fn decode(&self, data: &[u8], format: &FrameFormat) -> Result<RgbImage, CodecError>;
}

/// MJPGとYUYVに対応したデコーダ
#[derive(Debug, Default, Clone, Copy)]
pub struct FrameCodec;

impl ImageCodec for FrameCodec {
    fn decode(&self, data: &[u8], format: &FrameFormat) -> Result<RgbImage, CodecError> {
        if data.is_empty() {
            return Err(CodecError::Decode("empty frame".into()));
        }
        match format.encoding {
            PixelEncoding::Mjpeg => {
                let image = image::load_from_memory_with_format(data, ImageFormat::Jpeg)
                    .map_err(|e| CodecError::Decode(e.to_string()))?;
                Ok(image.to_rgb8())
            }
            PixelEncoding::Yuyv => yuyv422_to_rgb(data, format),
            other => Err(CodecError::UnsupportedEncoding(other)),
        }
    }
}

// 行末のパディングは`stride`で読み飛ばす
fn yuyv422_to_rgb(buf: &[u8], format: &FrameFormat) -> Result<RgbImage, CodecError> {
    let (width, height) = (format.width, format.height);
    let row = width as usize * 2;
    let stride = (format.stride as usize).max(row);
    // 最終行のパディングは書き込まれないことがある
    let expected = stride * (height as usize).saturating_sub(1) + row;
    if height == 0 || buf.len() < expected {
        return Err(CodecError::Decode(format!(
            "YUYV {width}x{height} (stride {stride}) needs {expected} bytes, got {}",
            buf.len()
        )));
    }
    // 変換側は詰めた行しか受け付けないので、パディングがあれば詰め直す
    let packed: Cow<[u8]> = if stride == row {
        Cow::Borrowed(&buf[..expected])
    } else {
        buf.chunks(stride)
            .take(height as usize)
            .flat_map(|line| &line[..row])
            .copied()
            .collect()
    };
    let src = YuvPackedImage {
        width,
        height,
        yuy: &packed,
        yuy_stride: width * 2,
    };
    let rgb_stride = width * 3;
    let mut rgb = vec![0; (rgb_stride * height) as usize];
    yuvutils_rs::yuyv422_to_rgb(
        &src,
        &mut rgb,
        rgb_stride,
        YuvRange::Limited,
        YuvStandardMatrix::Bt601,
    )
    .map_err(|e| CodecError::Decode(e.to_string()))?;
    RgbImage::from_raw(width, height, rgb)
        .ok_or_else(|| CodecError::Decode("RGB buffer size mismatch".into()))
}

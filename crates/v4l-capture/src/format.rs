//! キャプチャフォーマットの定義

use std::fmt;

/// ピクセルのエンコーディング
///
/// デモで扱うのはMJPGとYUYVのみ。それ以外はFourCCのまま保持する
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelEncoding {
    /// Motion-JPEG。圧縮フォーマット
    Mjpeg,
    /// YUV 4:2:2 packed。非圧縮フォーマット
    Yuyv,
    Other([u8; 4]),
}

impl PixelEncoding {
    pub const fn fourcc(&self) -> [u8; 4] {
        match self {
            Self::Mjpeg => *b"MJPG",
            Self::Yuyv => *b"YUYV",
            Self::Other(repr) => *repr,
        }
    }

    pub fn from_fourcc(repr: [u8; 4]) -> Self {
        match &repr {
            b"MJPG" => Self::Mjpeg,
            b"YUYV" => Self::Yuyv,
            _ => Self::Other(repr),
        }
    }

    pub const fn is_compressed(&self) -> bool {
        matches!(self, Self::Mjpeg)
    }
}

impl fmt::Display for PixelEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in self.fourcc() {
            // 表示できない値はドットにする
            let c = if b.is_ascii_graphic() { b as char } else { '.' };
            write!(f, "{c}")?;
        }
        Ok(())
    }
}

/// デバイスとネゴシエーションしたフォーマット
///
/// 要求値と異なることがあるので、バイト列の解釈には必ずこちらを使う
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameFormat {
    pub encoding: PixelEncoding,
    pub width: u32,
    pub height: u32,
    /// 1行のバイト数(bytesperline)。圧縮フォーマットでは0
    ///
    /// 行末にパディングを持つデバイスでは`width * 2`より大きくなる
    pub stride: u32,
}

impl FrameFormat {
    /// 行間にパディングのないフォーマット
    pub const fn new(encoding: PixelEncoding, width: u32, height: u32) -> Self {
        Self {
            encoding,
            width,
            height,
            stride: packed_stride(encoding, width),
        }
    }

    /// デバイスが報告した行のバイト数を使う。0なら詰めた値のまま
    pub const fn with_stride(mut self, stride: u32) -> Self {
        if stride > 0 {
            self.stride = stride;
        }
        self
    }
}

const fn packed_stride(encoding: PixelEncoding, width: u32) -> u32 {
    match encoding {
        PixelEncoding::Yuyv => width * 2,
        _ => 0,
    }
}

impl fmt::Display for FrameFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}x{}", self.encoding, self.width, self.height)
    }
}

/// デバイスに要求するフォーマット
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FormatRequest {
    pub encoding: PixelEncoding,
    pub width: u32,
    pub height: u32,
}

impl FormatRequest {
    pub const fn new(encoding: PixelEncoding, width: u32, height: u32) -> Self {
        Self {
            encoding,
            width,
            height,
        }
    }

    /// 圧縮フォーマットでの要求
    pub const fn compressed(width: u32, height: u32) -> Self {
        Self::new(PixelEncoding::Mjpeg, width, height)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.width == 0 || self.height == 0 {
            return Err(format!(
                "Invalid width or height {}x{}",
                self.width, self.height
            ));
        }
        Ok(())
    }

    pub(crate) fn as_format(&self) -> FrameFormat {
        FrameFormat::new(self.encoding, self.width, self.height)
    }
}

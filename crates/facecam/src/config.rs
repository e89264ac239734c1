//! 実行パラメータ
//!
//! YAMLファイルとコマンドライン引数は同じキーを持ち、コマンドライン側が優先される

use std::{
    io,
    path::{Path, PathBuf},
    time::Duration,
};

use image::ImageFormat;
use v4l_capture::{
    buffer::MIN_BUFFERS, util::device_path, FormatRequest, LoopConfig, PixelEncoding,
};

const DEFAULT_OUTPUT: &str = "result_camera.jpg";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error(transparent)]
    Read(#[from] io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// 要求するピクセルフォーマット
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Encoding {
    Mjpg,
    Yuyv,
}

impl From<Encoding> for PixelEncoding {
    fn from(value: Encoding) -> Self {
        match value {
            Encoding::Mjpg => PixelEncoding::Mjpeg,
            Encoding::Yuyv => PixelEncoding::Yuyv,
        }
    }
}

/// 未指定の項目を持てるパラメータ
#[derive(Debug, Clone, Default, PartialEq, clap::Args, serde::Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Params {
    /// デバイスのパス。数字のみなら/dev/videoNとみなす [default: 0]
    pub device: Option<String>,
    /// 要求する幅 [default: 640]
    #[arg(long)]
    pub width: Option<u32>,
    /// 要求する高さ [default: 480]
    #[arg(long)]
    pub height: Option<u32>,
    /// 要求するピクセルフォーマット [default: mjpg]
    #[arg(long, value_enum)]
    pub encoding: Option<Encoding>,
    /// 要求するバッファ数 [default: 4]
    #[arg(long)]
    pub buffers: Option<u32>,
    /// 1回の取得で待つミリ秒 [default: 1000]
    #[arg(long)]
    pub timeout_ms: Option<u64>,
    /// 進捗を出すフレーム間隔 [default: 10]
    #[arg(long)]
    pub report_every: Option<u64>,
    /// 指定数のフレームで終了する
    #[arg(long)]
    pub max_frames: Option<u64>,
    /// 結果画像の出力先 [default: result_camera.jpg]
    #[arg(short, long)]
    pub output: Option<PathBuf>,
    /// 検出モデルのパス
    #[arg(long)]
    pub model: Option<PathBuf>,
}

impl Params {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = fs_err::read_to_string(path)?;
        Ok(serde_yaml::from_str(&content)?)
    }

    /// `other`で指定された項目で上書きする
    pub fn merge(self, other: Params) -> Params {
        Params {
            device: other.device.or(self.device),
            width: other.width.or(self.width),
            height: other.height.or(self.height),
            encoding: other.encoding.or(self.encoding),
            buffers: other.buffers.or(self.buffers),
            timeout_ms: other.timeout_ms.or(self.timeout_ms),
            report_every: other.report_every.or(self.report_every),
            max_frames: other.max_frames.or(self.max_frames),
            output: other.output.or(self.output),
            model: other.model.or(self.model),
        }
    }
}

/// 既定値を埋めて検証済みのパラメータ
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub device: PathBuf,
    pub request: FormatRequest,
    pub buffers: u32,
    pub loop_config: LoopConfig,
    pub output: PathBuf,
    pub model: Option<PathBuf>,
}

impl Settings {
    /// 設定ファイルがあれば読み、コマンドライン引数で上書きする
    pub fn load(file: Option<&Path>, cli: Params) -> Result<Self, ConfigError> {
        let base = match file {
            Some(path) => Params::from_file(path)?,
            None => Params::default(),
        };
        Self::try_from(base.merge(cli))
    }
}

impl TryFrom<Params> for Settings {
    type Error = ConfigError;

    fn try_from(p: Params) -> Result<Self, Self::Error> {
        let encoding = p.encoding.unwrap_or(Encoding::Mjpg);
        let request = FormatRequest::new(
            encoding.into(),
            p.width.unwrap_or(640),
            p.height.unwrap_or(480),
        );
        request.validate().map_err(ConfigError::Invalid)?;

        let buffers = p.buffers.unwrap_or(4);
        if buffers < MIN_BUFFERS {
            return Err(ConfigError::Invalid(format!(
                "buffers must be at least {MIN_BUFFERS}, got {buffers}"
            )));
        }
        let timeout_ms = p.timeout_ms.unwrap_or(1000);
        if timeout_ms == 0 {
            return Err(ConfigError::Invalid("timeout_ms must be positive".into()));
        }

        let output = p.output.unwrap_or_else(|| DEFAULT_OUTPUT.into());
        match ImageFormat::from_path(&output) {
            Ok(ImageFormat::Jpeg | ImageFormat::Png) => {}
            _ => {
                return Err(ConfigError::Invalid(format!(
                    "output must be a .jpg or .png file: {}",
                    output.display()
                )))
            }
        }

        Ok(Self {
            device: device_path(p.device.as_deref().unwrap_or("0")),
            request,
            buffers,
            loop_config: LoopConfig {
                timeout: Duration::from_millis(timeout_ms),
                report_every: p.report_every.unwrap_or(10),
                max_frames: p.max_frames,
                ..Default::default()
            },
            output,
            model: p.model,
        })
    }
}

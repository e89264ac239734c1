//! 顔検出器の境界
//!
//! 推論エンジンはこの外側にあり、ここでは入出力の形だけを決める

use std::path::{Path, PathBuf};

use image::RgbImage;

#[derive(Debug, thiserror::Error)]
pub enum DetectorError {
    #[error("failed to initialize detector: {0}")]
    Init(String),
    #[error("inference failed: {0}")]
    Inference(String),
    #[error("failed to release detector: {0}")]
    Release(String),
}

/// 画像座標での矩形
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundingBox {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

/// 検出された1つの顔
#[derive(Debug, Clone, PartialEq)]
pub struct Face {
    pub bbox: BoundingBox,
    pub score: f32,
    /// 両目、鼻、口の両端
    pub landmarks: [(i32, i32); 5],
}

pub trait Detector {
    fn infer(&mut self, image: &RgbImage) -> Result<Vec<Face>, DetectorError>;

    /// 確保したリソースを返す。デバイスを閉じた後に1回だけ呼ばれる
    fn release(&mut self) -> Result<(), DetectorError>;
}

/// 推論エンジンを持たない検出器
///
/// 常に0件を返すので、取得と描画の経路だけを動かせる
#[derive(Debug)]
pub struct NullDetector {
    model: Option<PathBuf>,
    released: bool,
}

impl NullDetector {
    pub fn init(model: Option<&Path>) -> Result<Self, DetectorError> {
        if let Some(path) = model {
            if !path.is_file() {
                return Err(DetectorError::Init(format!(
                    "model not found: {}",
                    path.display()
                )));
            }
            tracing::info!(
                "model {} accepted, no inference engine is linked",
                path.display()
            );
        }
        Ok(Self {
            model: model.map(Path::to_path_buf),
            released: false,
        })
    }
}

impl Detector for NullDetector {
    fn infer(&mut self, _image: &RgbImage) -> Result<Vec<Face>, DetectorError> {
        if self.released {
            return Err(DetectorError::Inference("detector already released".into()));
        }
        Ok(vec![])
    }

    fn release(&mut self) -> Result<(), DetectorError> {
        if self.released {
            return Err(DetectorError::Release("detector already released".into()));
        }
        self.released = true;
        if let Some(path) = &self.model {
            tracing::debug!("model {} released", path.display());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_detector() -> anyhow::Result<()> {
        let mut det = NullDetector::init(None)?;
        assert!(det.infer(&RgbImage::new(8, 8))?.is_empty());
        det.release()?;
        assert!(det.infer(&RgbImage::new(8, 8)).is_err());
        assert!(det.release().is_err());
        Ok(())
    }

    #[test]
    fn test_model_path() -> anyhow::Result<()> {
        let res = NullDetector::init(Some(Path::new("/nonexistent/face.rknn")));
        assert!(matches!(res, Err(DetectorError::Init(_))));

        let model = tempfile::NamedTempFile::new()?;
        let mut det = NullDetector::init(Some(model.path()))?;
        det.release()?;
        Ok(())
    }
}

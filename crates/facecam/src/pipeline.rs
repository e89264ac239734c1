//! 1フレームごとの処理: デコード → 検出 → 描画 → 書き出し

use v4l_capture::{CapturedFrame, FrameSink, SinkError, Throughput};

use crate::{
    codec::ImageCodec,
    detector::Detector,
    render::{annotate, FrameWriter},
};

pub struct FacePipeline<C, D, W> {
    codec: C,
    detector: D,
    writer: W,
}

impl<C, D, W> FacePipeline<C, D, W>
where
    C: ImageCodec,
    D: Detector,
    W: FrameWriter,
{
    pub fn new(codec: C, detector: D, writer: W) -> Self {
        Self {
            codec,
            detector,
            writer,
        }
    }

    /// デバイスを閉じた後に検出器を解放するために取り出す
    pub fn into_detector(self) -> D {
        self.detector
    }
}

impl<C, D, W> FrameSink for FacePipeline<C, D, W>
where
    C: ImageCodec,
    D: Detector,
    W: FrameWriter,
{
    fn consume(&mut self, frame: &CapturedFrame, stats: &Throughput) -> Result<(), SinkError> {
        let mut image = self
            .codec
            .decode(&frame.data, &frame.format)
            .map_err(|e| SinkError::Skip(e.to_string()))?;
        if image.width() == 0 || image.height() == 0 {
            return Err(SinkError::Skip("decoded an empty image".into()));
        }

        let faces = self
            .detector
            .infer(&image)
            .map_err(|e| SinkError::Fatal(e.into()))?;
        tracing::debug!("frame {}: {} faces", frame.sequence, faces.len());

        annotate(&mut image, &faces, stats.fps());
        self.writer.write(&image).map_err(SinkError::Fatal)
    }
}

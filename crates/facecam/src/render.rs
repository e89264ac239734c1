//! 検出結果の描画と書き出し

use std::path::PathBuf;

use anyhow::Context;
use image::{Rgb, RgbImage};

use crate::detector::Face;

const GREEN: Rgb<u8> = Rgb([0, 255, 0]);
const BLACK: Rgb<u8> = Rgb([0, 0, 0]);
const LANDMARK_COLORS: [Rgb<u8>; 5] = [
    Rgb([255, 0, 0]),
    Rgb([255, 0, 255]),
    Rgb([0, 255, 255]),
    Rgb([255, 255, 0]),
    Rgb([0, 0, 255]),
];

const GLYPH_WIDTH: i32 = 5;
const GLYPH_HEIGHT: i32 = 7;
const ADVANCE: i32 = GLYPH_WIDTH + 1;

/// 枠、スコア、ランドマーク、全体の情報行を描く
pub fn annotate(image: &mut RgbImage, faces: &[Face], fps: Option<f64>) {
    for face in faces {
        let b = face.bbox;
        let right = b.x.saturating_add(b.width as i32 - 1);
        let bottom = b.y.saturating_add(b.height as i32 - 1);
        draw_rect(image, b.x, b.y, right, bottom, GREEN);

        let label = format!("{:.2}", face.score);
        draw_text(image, b.x, (b.y - GLYPH_HEIGHT - 2).max(0), &label, GREEN);

        for (&(x, y), color) in face.landmarks.iter().zip(LANDMARK_COLORS) {
            fill_rect(image, x - 1, y - 1, x + 1, y + 1, color);
        }
    }

    let info = format!("faces={} fps={:.2}", faces.len(), fps.unwrap_or_default());
    let width = info.chars().count() as i32 * ADVANCE;
    fill_rect(image, 2, 2, 2 + width + 2, 2 + GLYPH_HEIGHT + 2, BLACK);
    draw_text(image, 4, 4, &info, GREEN);
}

/// 描画済みの画像の書き出し先
pub trait FrameWriter {
    fn write(&mut self, image: &RgbImage) -> anyhow::Result<()>;
}

/// 毎フレーム同じファイルを上書きする
///
/// 形式は拡張子で決まる
#[derive(Debug, Clone)]
pub struct FileWriter {
    path: PathBuf,
}

impl FileWriter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl FrameWriter for FileWriter {
    fn write(&mut self, image: &RgbImage) -> anyhow::Result<()> {
        image
            .save(&self.path)
            .with_context(|| format!("failed to write {}", self.path.display()))
    }
}

fn put(image: &mut RgbImage, x: i32, y: i32, color: Rgb<u8>) {
    if x >= 0 && y >= 0 && (x as u32) < image.width() && (y as u32) < image.height() {
        image.put_pixel(x as u32, y as u32, color);
    }
}

fn draw_rect(image: &mut RgbImage, left: i32, top: i32, right: i32, bottom: i32, color: Rgb<u8>) {
    for x in left..=right {
        put(image, x, top, color);
        put(image, x, bottom, color);
    }
    for y in top..=bottom {
        put(image, left, y, color);
        put(image, right, y, color);
    }
}

fn fill_rect(image: &mut RgbImage, left: i32, top: i32, right: i32, bottom: i32, color: Rgb<u8>) {
    let right = right.min(image.width() as i32 - 1);
    let bottom = bottom.min(image.height() as i32 - 1);
    for y in top.max(0)..=bottom {
        for x in left.max(0)..=right {
            image.put_pixel(x as u32, y as u32, color);
        }
    }
}

// 5x7のビットマップフォント。大文字小文字は区別しない
fn draw_text(image: &mut RgbImage, x: i32, y: i32, text: &str, color: Rgb<u8>) {
    for (i, ch) in text.chars().enumerate() {
        let Some(rows) = glyph(ch.to_ascii_uppercase()) else {
            continue;
        };
        let ox = x + i as i32 * ADVANCE;
        for (row, bits) in rows.iter().enumerate() {
            for col in 0..GLYPH_WIDTH {
                if (bits >> (GLYPH_WIDTH - 1 - col)) & 1 == 1 {
                    put(image, ox + col, y + row as i32, color);
                }
            }
        }
    }
}

fn glyph(ch: char) -> Option<[u8; 7]> {
    let rows = match ch {
        '0' => [0x0e, 0x11, 0x13, 0x15, 0x19, 0x11, 0x0e],
        '1' => [0x04, 0x0c, 0x04, 0x04, 0x04, 0x04, 0x0e],
        '2' => [0x0e, 0x11, 0x01, 0x02, 0x04, 0x08, 0x1f],
        '3' => [0x1e, 0x01, 0x01, 0x0e, 0x01, 0x01, 0x1e],
        '4' => [0x02, 0x06, 0x0a, 0x12, 0x1f, 0x02, 0x02],
        '5' => [0x1f, 0x10, 0x1e, 0x01, 0x01, 0x11, 0x0e],
        '6' => [0x06, 0x08, 0x10, 0x1e, 0x11, 0x11, 0x0e],
        '7' => [0x1f, 0x01, 0x02, 0x04, 0x08, 0x08, 0x08],
        '8' => [0x0e, 0x11, 0x11, 0x0e, 0x11, 0x11, 0x0e],
        '9' => [0x0e, 0x11, 0x11, 0x0f, 0x01, 0x02, 0x0c],
        'A' => [0x0e, 0x11, 0x11, 0x1f, 0x11, 0x11, 0x11],
        'C' => [0x0e, 0x11, 0x10, 0x10, 0x10, 0x11, 0x0e],
        'E' => [0x1f, 0x10, 0x1e, 0x10, 0x10, 0x10, 0x1f],
        'F' => [0x1f, 0x10, 0x1e, 0x10, 0x10, 0x10, 0x10],
        'P' => [0x1e, 0x11, 0x11, 0x1e, 0x10, 0x10, 0x10],
        'S' => [0x0f, 0x10, 0x0e, 0x01, 0x01, 0x11, 0x0e],
        '=' => [0x00, 0x00, 0x1f, 0x00, 0x1f, 0x00, 0x00],
        '.' => [0x00, 0x00, 0x00, 0x00, 0x00, 0x0c, 0x0c],
        '-' => [0x00, 0x00, 0x00, 0x1f, 0x00, 0x00, 0x00],
        ' ' => [0; 7],
        _ => return None,
    };
    Some(rows)
}

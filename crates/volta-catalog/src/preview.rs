//! PNG preview rendering for imported files.
//!
//! A small grayscale sparkline of the first required numeric column,
//! good enough to spot a dead cell or a truncated run at a glance in
//! the file browser.

use std::collections::BTreeMap;
use std::io::Cursor;

use bytes::Bytes;
use image::{GrayImage, ImageFormat, Luma};
use serde_json::Value;

use volta_core::{Error, Result};

const WIDTH: u32 = 320;
const HEIGHT: u32 = 120;
const MARGIN: u32 = 4;

/// Renders a sparkline of `column` over the rendered rows.
///
/// Rows with a null cell in the column are skipped. An empty or fully
/// null column renders as a blank image rather than failing the import.
pub fn render_preview(column: &str, rows: &[BTreeMap<String, Value>]) -> Result<Bytes> {
    let series: Vec<f64> = rows
        .iter()
        .filter_map(|row| row.get(column).and_then(Value::as_f64))
        .collect();

    let mut img = GrayImage::from_pixel(WIDTH, HEIGHT, Luma([255u8]));
    if series.len() >= 2 {
        let min = series.iter().copied().fold(f64::INFINITY, f64::min);
        let max = series.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let span = if (max - min).abs() < f64::EPSILON {
            1.0
        } else {
            max - min
        };
        let plot_w = (WIDTH - 2 * MARGIN) as f64;
        let plot_h = (HEIGHT - 2 * MARGIN) as f64;
        let mut previous: Option<(u32, u32)> = None;
        for (i, value) in series.iter().enumerate() {
            let x = MARGIN + ((i as f64 / (series.len() - 1) as f64) * plot_w) as u32;
            let normalized = (value - min) / span;
            let y = MARGIN + ((1.0 - normalized) * plot_h) as u32;
            if let Some((px, py)) = previous {
                draw_line(&mut img, px, py, x, y);
            }
            previous = Some((x.min(WIDTH - 1), y.min(HEIGHT - 1)));
        }
    }

    let mut cursor = Cursor::new(Vec::new());
    image::DynamicImage::ImageLuma8(img)
        .write_to(&mut cursor, ImageFormat::Png)
        .map_err(|e| Error::internal(format!("preview encode failed: {e}")))?;
    Ok(Bytes::from(cursor.into_inner()))
}

fn draw_line(img: &mut GrayImage, x0: u32, y0: u32, x1: u32, y1: u32) {
    // Bresenham over the integer pixel grid.
    let (mut x0, mut y0) = (x0 as i64, y0 as i64);
    let (x1, y1) = (x1 as i64, y1 as i64);
    let dx = (x1 - x0).abs();
    let dy = -(y1 - y0).abs();
    let sx = if x0 < x1 { 1 } else { -1 };
    let sy = if y0 < y1 { 1 } else { -1 };
    let mut err = dx + dy;
    loop {
        if x0 >= 0 && y0 >= 0 && (x0 as u32) < img.width() && (y0 as u32) < img.height() {
            img.put_pixel(x0 as u32, y0 as u32, Luma([0u8]));
        }
        if x0 == x1 && y0 == y1 {
            break;
        }
        let e2 = 2 * err;
        if e2 >= dy {
            err += dy;
            x0 += sx;
        }
        if e2 <= dx {
            err += dx;
            y0 += sy;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rows(values: &[f64]) -> Vec<BTreeMap<String, Value>> {
        values
            .iter()
            .map(|v| {
                let mut row = BTreeMap::new();
                row.insert("Voltage_V".to_string(), Value::from(*v));
                row
            })
            .collect()
    }

    #[test]
    fn renders_a_png_payload() {
        let bytes = render_preview("Voltage_V", &rows(&[3.7, 3.71, 3.72, 3.68])).expect("render");
        // PNG magic.
        assert_eq!(&bytes[..8], &[0x89, b'P', b'N', b'G', b'\r', b'\n', 0x1a, b'\n']);
    }

    #[test]
    fn empty_series_still_renders() {
        let bytes = render_preview("Voltage_V", &[]).expect("render");
        assert!(!bytes.is_empty());
    }

    #[test]
    fn constant_series_does_not_divide_by_zero() {
        let bytes = render_preview("Voltage_V", &rows(&[3.7, 3.7, 3.7])).expect("render");
        assert!(!bytes.is_empty());
    }
}

//! Framebuffer access.
//!
//! Converts the engine's interleaved pixel buffer into what a display
//! consumer can use directly. Polled at high frequency during live renders,
//! so a buffer that is not ready (or does not match the request) yields
//! `None` instead of an error.

use std::sync::Arc;

use crate::engine::{EngineSdk, SceneHandle};

/// Pixel buffer as the engine exposes it: row-major, channels interleaved.
#[derive(Debug, Clone, PartialEq)]
pub struct RawFramebuffer {
    pub width: usize,
    pub height: usize,
    pub channels: usize,
    pub data: Vec<f32>,
}

impl RawFramebuffer {
    /// Buffer filled with one value on every channel.
    pub fn filled(width: usize, height: usize, channels: usize, value: f32) -> Self {
        Self {
            width,
            height,
            channels,
            data: vec![value; width * height * channels],
        }
    }

    fn is_consistent(&self) -> bool {
        self.width > 0
            && self.height > 0
            && self.channels > 0
            && self.data.len() == self.width * self.height * self.channels
    }
}

/// Render border in normalized `[0, 1]` fractions of the full resolution.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Border {
    pub min_x: f32,
    pub max_x: f32,
    pub min_y: f32,
    pub max_y: f32,
}

impl Border {
    pub const FULL: Border = Border {
        min_x: 0.0,
        max_x: 1.0,
        min_y: 0.0,
        max_y: 1.0,
    };

    /// Integer pixel bounds `(x0, x1, y0, y1)`, end-exclusive.
    ///
    /// Fractions are clamped to `[0, 1]` and truncated. Returns `None` when
    /// the region is empty.
    pub fn pixel_bounds(&self, width: usize, height: usize) -> Option<PixelBounds> {
        let scale = |fraction: f32, size: usize| (fraction.clamp(0.0, 1.0) * size as f32) as usize;

        let bounds = PixelBounds {
            x0: scale(self.min_x, width),
            x1: scale(self.max_x, width).min(width),
            y0: scale(self.min_y, height),
            y1: scale(self.max_y, height).min(height),
        };
        (bounds.x1 > bounds.x0 && bounds.y1 > bounds.y0).then_some(bounds)
    }
}

/// End-exclusive integer region of a framebuffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelBounds {
    pub x0: usize,
    pub x1: usize,
    pub y0: usize,
    pub y1: usize,
}

impl PixelBounds {
    pub fn width(&self) -> usize {
        self.x1 - self.x0
    }

    pub fn height(&self) -> usize {
        self.y1 - self.y0
    }
}

/// Shape of the returned pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FramebufferLayout {
    /// Full image, `height` rows of `width` pixels.
    #[default]
    Raw,
    /// Full image as a single row of `width * height` pixels.
    Flat,
    /// Only the region inside the request's border. A request without a
    /// border yields no pixels.
    Cropped,
}

/// What a consumer wants out of the engine's framebuffer.
#[derive(Debug, Clone, PartialEq)]
pub struct FramebufferRequest {
    pub width: usize,
    pub height: usize,
    pub image_index: usize,
    /// `None` asks the engine how many channels the output has.
    pub channels: Option<usize>,
    pub layout: FramebufferLayout,
    /// Expand to four channels (RGBA).
    pub backfill: bool,
    pub border: Option<Border>,
}

impl FramebufferRequest {
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            image_index: 0,
            channels: None,
            layout: FramebufferLayout::Raw,
            backfill: false,
            border: None,
        }
    }

    pub fn with_channels(mut self, channels: usize) -> Self {
        self.channels = Some(channels);
        self
    }

    pub fn with_layout(mut self, layout: FramebufferLayout) -> Self {
        self.layout = layout;
        self
    }

    pub fn with_backfill(mut self, backfill: bool) -> Self {
        self.backfill = backfill;
        self
    }

    pub fn with_border(mut self, border: Border) -> Self {
        self.border = Some(border);
        self
    }

    pub fn with_image_index(mut self, image_index: usize) -> Self {
        self.image_index = image_index;
        self
    }
}

/// Consumer-ready pixels.
#[derive(Debug, Clone, PartialEq)]
pub struct FramebufferPixels {
    pub width: usize,
    pub height: usize,
    pub channels: usize,
    pub layout: FramebufferLayout,
    pub data: Vec<f32>,
}

impl FramebufferPixels {
    pub fn pixel(&self, x: usize, y: usize) -> Option<&[f32]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let start = (y * self.width + x) * self.channels;
        self.data.get(start..start + self.channels)
    }

    pub fn rows(&self) -> impl Iterator<Item = &[f32]> {
        self.data.chunks_exact(self.width * self.channels)
    }

    pub fn pixels(&self) -> impl Iterator<Item = &[f32]> {
        self.data.chunks_exact(self.channels)
    }
}

/// Expands 1-4 channel pixels to RGBA.
///
/// 1 channel `v` becomes `(v, v, v, 1)`, 2 channels become `(c0, c1, 0, 1)`,
/// 3 channels get alpha 1 and 4 channels pass through. Other counts return
/// `None`.
pub fn backfill_rgba(data: &[f32], channels: usize) -> Option<Vec<f32>> {
    if channels == 0 || channels > 4 || data.len() % channels != 0 {
        return None;
    }
    if channels == 4 {
        return Some(data.to_vec());
    }

    let mut out = Vec::with_capacity(data.len() / channels * 4);
    for pixel in data.chunks_exact(channels) {
        let rgba = match *pixel {
            [v] => [v, v, v, 1.0],
            [c0, c1] => [c0, c1, 0.0, 1.0],
            [c0, c1, c2] => [c0, c1, c2, 1.0],
            _ => unreachable!("chunk length is 1..=3"),
        };
        out.extend_from_slice(&rgba);
    }
    Some(out)
}

/// Copies the rows and columns inside `bounds` out of an interleaved buffer.
pub fn crop(data: &[f32], width: usize, channels: usize, bounds: PixelBounds) -> Vec<f32> {
    let row_stride = width * channels;
    let mut out = Vec::with_capacity(bounds.width() * bounds.height() * channels);
    for y in bounds.y0..bounds.y1 {
        let row = y * row_stride;
        out.extend_from_slice(&data[row + bounds.x0 * channels..row + bounds.x1 * channels]);
    }
    out
}

/// Reads and converts engine framebuffers for one scene handle at a time.
#[derive(Clone)]
pub struct FramebufferAccessor {
    engine: Arc<dyn EngineSdk>,
}

impl FramebufferAccessor {
    pub fn new(engine: Arc<dyn EngineSdk>) -> Self {
        Self { engine }
    }

    /// Returns `None` when the buffer is not ready or does not match the
    /// request.
    pub fn get(
        &self,
        handle: SceneHandle,
        request: &FramebufferRequest,
    ) -> Option<FramebufferPixels> {
        let raw = self.engine.read_framebuffer(handle, request.image_index)?;
        let channels = match request.channels {
            Some(channels) => channels,
            None => self
                .engine
                .channel_count(handle, request.image_index)
                .unwrap_or(raw.channels),
        };
        convert(raw, request, channels)
    }
}

fn convert(
    raw: RawFramebuffer,
    request: &FramebufferRequest,
    channels: usize,
) -> Option<FramebufferPixels> {
    if !raw.is_consistent()
        || raw.channels != channels
        || raw.width != request.width
        || raw.height != request.height
    {
        return None;
    }

    let (width, height, data) = match request.layout {
        FramebufferLayout::Raw => (raw.width, raw.height, raw.data),
        FramebufferLayout::Flat => (raw.width * raw.height, 1, raw.data),
        FramebufferLayout::Cropped => {
            let bounds = request.border?.pixel_bounds(raw.width, raw.height)?;
            (
                bounds.width(),
                bounds.height(),
                crop(&raw.data, raw.width, channels, bounds),
            )
        }
    };

    let (channels, data) = if request.backfill {
        (4, backfill_rgba(&data, channels)?)
    } else {
        (channels, data)
    };

    Some(FramebufferPixels {
        width,
        height,
        channels,
        layout: request.layout,
        data,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backfill_single_channel() {
        let out = backfill_rgba(&[0.25, 0.5], 1).unwrap();
        assert_eq!(out, vec![0.25, 0.25, 0.25, 1.0, 0.5, 0.5, 0.5, 1.0]);
    }

    #[test]
    fn test_backfill_two_and_three_channels() {
        assert_eq!(
            backfill_rgba(&[0.1, 0.2], 2).unwrap(),
            vec![0.1, 0.2, 0.0, 1.0]
        );
        assert_eq!(
            backfill_rgba(&[0.1, 0.2, 0.3], 3).unwrap(),
            vec![0.1, 0.2, 0.3, 1.0]
        );
    }

    #[test]
    fn test_backfill_passthrough_and_rejects() {
        let rgba = [0.1, 0.2, 0.3, 0.4];
        assert_eq!(backfill_rgba(&rgba, 4).unwrap(), rgba.to_vec());
        assert!(backfill_rgba(&[0.0; 5], 5).is_none());
        assert!(backfill_rgba(&[0.0; 3], 2).is_none());
        assert!(backfill_rgba(&[], 0).is_none());
    }

    #[test]
    fn test_border_bounds_truncate_and_clamp() {
        let border = Border {
            min_x: 0.25,
            max_x: 0.75,
            min_y: -0.5,
            max_y: 1.5,
        };
        let bounds = border.pixel_bounds(10, 4).unwrap();
        assert_eq!(
            bounds,
            PixelBounds {
                x0: 2,
                x1: 7,
                y0: 0,
                y1: 4
            }
        );
    }

    #[test]
    fn test_border_empty_region() {
        let border = Border {
            min_x: 0.5,
            max_x: 0.5,
            min_y: 0.0,
            max_y: 1.0,
        };
        assert!(border.pixel_bounds(8, 8).is_none());
    }

    #[test]
    fn test_crop_extracts_region() {
        // 3x2 image, 1 channel, value = x + 10 * y
        let data = [0.0, 1.0, 2.0, 10.0, 11.0, 12.0];
        let bounds = PixelBounds {
            x0: 1,
            x1: 3,
            y0: 1,
            y1: 2,
        };
        assert_eq!(crop(&data, 3, 1, bounds), vec![11.0, 12.0]);
    }

    #[test]
    fn test_convert_rejects_mismatch() {
        let raw = RawFramebuffer::filled(4, 4, 3, 0.5);
        let request = FramebufferRequest::new(8, 4);
        assert!(convert(raw.clone(), &request, 3).is_none());

        let request = FramebufferRequest::new(4, 4);
        assert!(convert(raw.clone(), &request, 1).is_none());

        let mut truncated = raw;
        truncated.data.pop();
        assert!(convert(truncated, &request, 3).is_none());
    }

    #[test]
    fn test_convert_cropped_backfilled() {
        let raw = RawFramebuffer::filled(4, 4, 1, 0.8);
        let request = FramebufferRequest::new(4, 4)
            .with_layout(FramebufferLayout::Cropped)
            .with_border(Border {
                min_x: 0.5,
                max_x: 1.0,
                min_y: 0.0,
                max_y: 0.5,
            })
            .with_backfill(true);

        let pixels = convert(raw, &request, 1).unwrap();
        assert_eq!((pixels.width, pixels.height, pixels.channels), (2, 2, 4));
        assert_eq!(pixels.pixel(1, 1).unwrap(), &[0.8, 0.8, 0.8, 1.0]);
        assert!(pixels.pixel(2, 0).is_none());
    }

    #[test]
    fn test_flat_is_one_row() {
        let raw = RawFramebuffer::filled(3, 2, 2, 0.0);
        let request = FramebufferRequest::new(3, 2).with_layout(FramebufferLayout::Flat);
        let pixels = convert(raw, &request, 2).unwrap();
        assert_eq!((pixels.width, pixels.height), (6, 1));
        assert_eq!(pixels.rows().count(), 1);
        assert_eq!(pixels.pixels().count(), 6);
    }

    #[test]
    fn test_cropped_without_border_is_none() {
        let raw = RawFramebuffer::filled(4, 4, 1, 0.8);
        let request = FramebufferRequest::new(4, 4).with_layout(FramebufferLayout::Cropped);
        assert!(convert(raw, &request, 1).is_none());
    }

    #[test]
    fn test_raw_rows() {
        let raw = RawFramebuffer::filled(3, 2, 2, 0.0);
        let pixels = convert(raw, &FramebufferRequest::new(3, 2), 2).unwrap();
        assert_eq!(pixels.rows().count(), 2);
        assert!(pixels.rows().all(|row| row.len() == 6));
    }
}

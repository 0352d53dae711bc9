use std::convert::Infallible;

use cockpitdecks_common::ImagePayload;
use embedded_graphics::{
    Pixel,
    pixelcolor::{Rgb888, RgbColor},
    prelude::{DrawTarget, OriginDimensions, Size},
};

use super::Color;

/// RGB888 framebuffer of one key face
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Bitmap {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl std::fmt::Debug for Bitmap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Bitmap({}x{})", self.width, self.height)
    }
}

impl Bitmap {
    /// Black bitmap
    pub fn new(width: u32, height: u32) -> Self {
        Self::filled(width, height, Color::BLACK)
    }

    /// Bitmap of a single color
    pub fn filled(width: u32, height: u32, color: Color) -> Self {
        let pixels = width as usize * height as usize;
        let mut data = Vec::with_capacity(pixels * 3);
        for _ in 0..pixels {
            data.extend_from_slice(&[color.r, color.g, color.b]);
        }
        Self {
            width,
            height,
            data,
        }
    }

    /// Wrap raw RGB888 rows; `None` when the length does not match
    pub fn from_rgb888(width: u32, height: u32, data: Vec<u8>) -> Option<Self> {
        (data.len() == width as usize * height as usize * 3).then_some(Self {
            width,
            height,
            data,
        })
    }

    /// Width in pixels
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Height in pixels
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Raw RGB888 rows
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    fn offset(&self, x: u32, y: u32) -> Option<usize> {
        (x < self.width && y < self.height).then(|| (y as usize * self.width as usize + x as usize) * 3)
    }

    /// Color at a position, `None` outside
    pub fn pixel(&self, x: u32, y: u32) -> Option<Color> {
        let at = self.offset(x, y)?;
        Some(Color::rgb(self.data[at], self.data[at + 1], self.data[at + 2]))
    }

    /// Set one pixel; positions outside are ignored
    pub fn set_pixel(&mut self, x: u32, y: u32, color: Color) {
        if let Some(at) = self.offset(x, y) {
            self.data[at..at + 3].copy_from_slice(&[color.r, color.g, color.b]);
        }
    }

    /// Nearest-neighbour resize
    pub fn scaled(&self, width: u32, height: u32) -> Self {
        if width == self.width && height == self.height {
            return self.clone();
        }
        let mut out = Bitmap::new(width, height);
        if self.width == 0 || self.height == 0 {
            return out;
        }
        for y in 0..height {
            let sy = (u64::from(y) * u64::from(self.height) / u64::from(height.max(1))) as u32;
            for x in 0..width {
                let sx = (u64::from(x) * u64::from(self.width) / u64::from(width.max(1))) as u32;
                if let Some(color) = self.pixel(sx, sy) {
                    out.set_pixel(x, y, color);
                }
            }
        }
        out
    }

    /// Copy into the wire payload
    pub fn to_payload(&self) -> ImagePayload {
        ImagePayload::rgb888(self.width, self.height, self.data.clone())
    }
}

impl OriginDimensions for Bitmap {
    fn size(&self) -> Size {
        Size::new(self.width, self.height)
    }
}

impl DrawTarget for Bitmap {
    type Color = Rgb888;
    type Error = Infallible;

    fn draw_iter<I>(&mut self, pixels: I) -> Result<(), Self::Error>
    where
        I: IntoIterator<Item = Pixel<Self::Color>>,
    {
        for Pixel(point, color) in pixels {
            if point.x >= 0 && point.y >= 0 {
                self.set_pixel(
                    point.x as u32,
                    point.y as u32,
                    Color::rgb(color.r(), color.g(), color.b()),
                );
            }
        }
        Ok(())
    }
}

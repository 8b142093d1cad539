// Copyright (c) 2025 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

use image::GrayImage;

use crate::error::HitError;

/// Element types a camera frame may carry.
pub trait Sample: Copy {
    fn to_f64(self) -> f64;

    /// Exposes the samples as bytes when they already are `u8`, allowing
    /// 8-bit frames to skip rescaling.
    fn as_u8_slice(_samples: &[Self]) -> Option<&[u8]> {
        None
    }
}

impl Sample for u8 {
    fn to_f64(self) -> f64 {
        self as f64
    }
    fn as_u8_slice(samples: &[u8]) -> Option<&[u8]> {
        Some(samples)
    }
}

macro_rules! impl_sample {
    ($($t:ty),*) => {
        $(impl Sample for $t {
            fn to_f64(self) -> f64 {
                self as f64
            }
        })*
    };
}
impl_sample!(u16, u32, i8, i16, i32, f32, f64);

/// Interleaving order of 3-channel frames. Instrument cameras deliver BGR;
/// images decoded by the `image` crate are RGB.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum ChannelOrder {
    #[default]
    Bgr,
    Rgb,
}

/// Read-only view of one camera frame. `shape` is `[height, width]` or
/// `[height, width, channels]`; `data` is row-major with channels
/// interleaved. The shape is not validated until the frame is processed.
#[derive(Clone, Debug)]
pub struct Frame<'a, T: Sample> {
    pub shape: Vec<usize>,
    pub data: &'a [T],
    pub channel_order: ChannelOrder,
}

impl<'a, T: Sample> Frame<'a, T> {
    pub fn new(shape: &[usize], data: &'a [T]) -> Frame<'a, T> {
        Frame{shape: shape.to_vec(), data, channel_order: ChannelOrder::Bgr}
    }

    pub fn gray(width: u32, height: u32, data: &'a [T]) -> Frame<'a, T> {
        Frame::new(&[height as usize, width as usize], data)
    }

    pub fn color(width: u32, height: u32, data: &'a [T],
                 channel_order: ChannelOrder) -> Frame<'a, T> {
        Frame{shape: vec![height as usize, width as usize, 3],
              data, channel_order}
    }

    /// Validates the shape against the data, returning
    /// (width, height, channels).
    pub fn dimensions(&self) -> Result<(u32, u32, usize), HitError> {
        let invalid = || HitError::InvalidFrameShape{
            shape: self.shape.clone(), data_len: self.data.len()};
        let (height, width, channels) = match self.shape.as_slice() {
            [h, w] => (*h, *w, 1),
            [h, w, 3] => (*h, *w, 3),
            _ => return Err(invalid()),
        };
        let expected_len = height.checked_mul(width)
            .and_then(|n| n.checked_mul(channels));
        if expected_len != Some(self.data.len()) ||
            width > u32::MAX as usize || height > u32::MAX as usize
        {
            return Err(invalid());
        }
        Ok((width as u32, height as u32, channels))
    }
}

impl<'a> From<&'a GrayImage> for Frame<'a, u8> {
    fn from(image: &'a GrayImage) -> Self {
        let (width, height) = image.dimensions();
        Frame::gray(width, height, image.as_raw())
    }
}

// mod tests.

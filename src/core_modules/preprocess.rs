// THEORY:
// Frames arrive as interleaved RGB images of arbitrary size, while vision models
// expect a fixed square, planar, batched tensor. This module is the bridge:
// scale the frame so its shorter side matches the model's input size, cut the
// centered square out of it, then transpose HWC into CHW and prepend a batch
// axis. Pixel values are carried through unscaled.

use image::imageops::{self, FilterType};
use image::RgbImage;
use ndarray::Array4;

use crate::core_modules::tensor::Tensor;

/// Scales `frame` so its shorter side equals `size`, keeping the aspect ratio.
/// A frame that already has that shorter side is returned as-is.
pub fn adaptive_resize(frame: &RgbImage, size: u32) -> RgbImage {
    let (w, h) = frame.dimensions();
    if w == 0 || h == 0 {
        return frame.clone();
    }
    let scaled = |long: u32, short: u32| (long as u64 * size as u64 / short as u64) as u32;
    let (ow, oh) = if w <= h { (size, scaled(h, w)) } else { (scaled(w, h), size) };

    if ow == w && oh == h {
        return frame.clone();
    }
    imageops::resize(frame, ow.max(1), oh.max(1), FilterType::Triangle)
}

/// Cuts a `width` x `height` window out of the center of `frame`.
/// The window is clamped to the frame if it does not fit. An odd leftover is
/// split with the half rounded to even.
pub fn center_crop(frame: &RgbImage, width: u32, height: u32) -> RgbImage {
    let (w, h) = frame.dimensions();
    let (cw, ch) = (width.min(w), height.min(h));
    let x0 = ((w - cw) as f64 / 2.0).round_ties_even() as u32;
    let y0 = ((h - ch) as f64 / 2.0).round_ties_even() as u32;
    imageops::crop_imm(frame, x0, y0, cw, ch).to_image()
}

/// Converts an RGB image into a `[1, 3, H, W]` tensor.
pub fn to_chw_tensor(frame: &RgbImage) -> Tensor {
    let (w, h) = frame.dimensions();
    let tensor = Array4::from_shape_fn((1, 3, h as usize, w as usize), |(_, c, y, x)| {
        frame.get_pixel(x as u32, y as u32).0[c] as f32
    });
    tensor.into_dyn()
}

/// Full frame preparation: resize, center crop to `size` x `size`, convert to a batched CHW tensor.
pub fn preprocess_frame(frame: &RgbImage, size: u32) -> Tensor {
    let resized = adaptive_resize(frame, size);
    let cropped = center_crop(&resized, size, size);
    to_chw_tensor(&cropped)
}

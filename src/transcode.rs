// 该文件是 Zitai （姿态） 项目的一部分。
// src/transcode.rs - 8 位交错像素与浮点平面张量之间的转换
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Zitai Authors

use image::RgbImage;

use crate::{
  buffer::{Buffer, BufferError, Host, HostBuffer, IMAGE_CHANNELS, Location},
  geometry::Size,
  kernel::Kernel,
};

/// 像素值与浮点值之间的映射
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Normalization {
  /// 原值复制
  #[default]
  Raw,
  /// `v / 256 - 0.5`，结果落在 `[-0.5, 0.5)`
  Centered,
}

impl Normalization {
  #[inline]
  pub fn forward(self, value: u8) -> f32 {
    match self {
      Normalization::Raw => f32::from(value),
      Normalization::Centered => f32::from(value) / 256.0 - 0.5,
    }
  }

  /// 逆映射：先限制到 `[0, 255]` 再截断。
  #[inline]
  pub fn inverse(self, value: f32) -> u8 {
    let raw = match self {
      Normalization::Raw => value,
      Normalization::Centered => (value + 0.5) * 256.0,
    };
    // NaN 经 `as` 转换为 0
    raw.clamp(0.0, 255.0) as u8
  }
}

fn check_len(len: usize, size: Size) -> Result<usize, BufferError> {
  let expected = size.area() * IMAGE_CHANNELS;
  if size.is_empty() {
    return Err(BufferError::EmptyImage);
  }
  if len != expected {
    return Err(BufferError::ShapeMismatch {
      expected,
      actual: len,
    });
  }
  Ok(size.area())
}

/// `[H, W, 3]` 交错像素转为 `[3, H, W]` 浮点平面。
pub fn to_float_planar_into(
  dst: &mut [f32],
  src: &[u8],
  size: Size,
  normalization: Normalization,
) -> Result<(), BufferError> {
  let plane = check_len(src.len(), size)?;
  check_len(dst.len(), size)?;

  let (red, rest) = dst.split_at_mut(plane);
  let (green, blue) = rest.split_at_mut(plane);
  for (i, pixel) in src.chunks_exact(IMAGE_CHANNELS).enumerate() {
    red[i] = normalization.forward(pixel[0]);
    green[i] = normalization.forward(pixel[1]);
    blue[i] = normalization.forward(pixel[2]);
  }
  Ok(())
}

/// [`to_float_planar_into`] 的逆变换。
pub fn from_float_planar_into(
  dst: &mut [u8],
  src: &[f32],
  size: Size,
  normalization: Normalization,
) -> Result<(), BufferError> {
  let plane = check_len(src.len(), size)?;
  check_len(dst.len(), size)?;

  let (red, rest) = src.split_at(plane);
  let (green, blue) = rest.split_at(plane);
  for (i, pixel) in dst.chunks_exact_mut(IMAGE_CHANNELS).enumerate() {
    pixel[0] = normalization.inverse(red[i]);
    pixel[1] = normalization.inverse(green[i]);
    pixel[2] = normalization.inverse(blue[i]);
  }
  Ok(())
}

/// 把 `src` 图像写入 `dst` 中从元素 `offset` 开始的 `[3, H, W]` 区域。
///
/// `dst` 必须已经分配，多个尺度可以依次打包进同一个张量。
pub fn to_float_planar<L: Location>(
  dst: &mut Buffer<f32, L>,
  offset: usize,
  src: &Buffer<u8, L>,
  normalization: Normalization,
) -> Result<(), BufferError> {
  dst.check_same_location(src)?;
  let size = src.image_size().ok_or(BufferError::EmptyImage)?;
  let needed = size.area() * IMAGE_CHANNELS;
  let end = offset.checked_add(needed).unwrap_or(usize::MAX);
  if end > dst.volume() {
    return Err(BufferError::ShapeMismatch {
      expected: end,
      actual: dst.volume(),
    });
  }

  dst.make_unique()?;
  // SAFETY: offset + needed 不超过 dst 的元素数量
  let target = unsafe { dst.as_mut_ptr().add(offset) };
  let kernel = Kernel::ToFloatPlanar {
    src: src.as_ptr(),
    dst: target,
    size,
    normalization,
  };
  // SAFETY: dst 独占；两个缓冲区元素类型不同，不可能共享内存块
  unsafe { dst.location().launch(kernel) }
}

/// 把 `[3, H, W]`（或更高维但至少含 `3 * H * W` 个元素）的张量转回 `[H, W, 3]` 图像。
pub fn from_float_planar<L: Location>(
  dst: &mut Buffer<u8, L>,
  src: &Buffer<f32, L>,
  size: Size,
  normalization: Normalization,
) -> Result<(), BufferError> {
  dst.check_same_location(src)?;
  if src.is_empty() || size.is_empty() {
    return Err(BufferError::EmptyImage);
  }
  let needed = size.area() * IMAGE_CHANNELS;
  if src.volume() < needed {
    return Err(BufferError::ShapeMismatch {
      expected: needed,
      actual: src.volume(),
    });
  }

  let shape = size.image_shape();
  if dst.shape() != shape || dst.handle_count() > 1 {
    dst.reset(&shape)?;
  }
  let kernel = Kernel::FromFloatPlanar {
    src: src.as_ptr(),
    dst: dst.as_mut_ptr(),
    size,
    normalization,
  };
  // SAFETY: dst 恰好为 [H, W, 3]，src 至少含 3 * H * W 个元素
  unsafe { dst.location().launch(kernel) }
}

/// 主机图像转为 `[3, H, W]` 浮点张量。
pub fn image_to_float_planar(
  image: &RgbImage,
  normalization: Normalization,
) -> Result<HostBuffer<f32>, BufferError> {
  let size = Size::of_image(image);
  let mut tensor = HostBuffer::with_shape(Host, &size.planar_shape())?;
  // SAFETY: tensor 刚刚创建，没有其他句柄
  let planar = unsafe { tensor.as_mut_slice_unchecked() };
  to_float_planar_into(planar, image.as_raw(), size, normalization)?;
  Ok(tensor)
}

/// 主机上的 `[3, H, W]` 浮点张量转回图像，尺寸取自张量的最后两维。
pub fn float_planar_to_image(
  tensor: &HostBuffer<f32>,
  normalization: Normalization,
) -> Result<RgbImage, BufferError> {
  let size = Size::new(tensor.width() as u32, tensor.height() as u32);
  let mut image = RgbImage::new(size.width, size.height);
  let needed = size.area() * IMAGE_CHANNELS;
  let data = tensor.as_slice();
  if data.len() < needed {
    return Err(BufferError::ShapeMismatch {
      expected: needed,
      actual: data.len(),
    });
  }
  from_float_planar_into(&mut image, &data[..needed], size, normalization)?;
  Ok(image)
}

#[cfg(test)]
mod tests {
  use image::Rgb;

  use super::*;
  use crate::buffer::{Device, DeviceBuffer};

  fn gradient(width: u32, height: u32) -> RgbImage {
    RgbImage::from_fn(width, height, |x, y| {
      Rgb([
        (x * 13 + y) as u8,
        (y * 7 + x * 3) as u8,
        ((x + y) * 31) as u8,
      ])
    })
  }

  #[test]
  fn raw_round_trip_is_lossless() {
    let mut all = RgbImage::new(256, 1);
    for (x, _, pixel) in all.enumerate_pixels_mut() {
      *pixel = Rgb([x as u8, 255 - x as u8, (x as u8).wrapping_mul(3)]);
    }
    for image in [all, gradient(17, 9), gradient(1, 1)] {
      let tensor = image_to_float_planar(&image, Normalization::Raw).unwrap();
      let back = float_planar_to_image(&tensor, Normalization::Raw).unwrap();
      assert_eq!(back, image);
    }
  }

  #[test]
  fn centered_round_trip_within_one() {
    let image = gradient(40, 30);
    let tensor = image_to_float_planar(&image, Normalization::Centered).unwrap();
    assert!(tensor.as_slice().iter().all(|v| (-0.5..0.5).contains(v)));

    let back = float_planar_to_image(&tensor, Normalization::Centered).unwrap();
    for (a, b) in image.as_raw().iter().zip(back.as_raw()) {
      assert!(a.abs_diff(*b) <= 1);
    }
  }

  #[test]
  fn planar_layout_is_channel_major() {
    let image = RgbImage::from_raw(2, 2, (1..=12).collect()).unwrap();
    let tensor = image_to_float_planar(&image, Normalization::Raw).unwrap();
    assert_eq!(tensor.shape(), &[3, 2, 2]);
    assert_eq!(
      tensor.as_slice(),
      &[1.0, 4.0, 7.0, 10.0, 2.0, 5.0, 8.0, 11.0, 3.0, 6.0, 9.0, 12.0]
    );
  }

  #[test]
  fn inverse_clamps_out_of_range() {
    assert_eq!(Normalization::Raw.inverse(-4.0), 0);
    assert_eq!(Normalization::Raw.inverse(300.0), 255);
    assert_eq!(Normalization::Raw.inverse(12.9), 12);
    assert_eq!(Normalization::Raw.inverse(f32::NAN), 0);
    assert_eq!(Normalization::Centered.inverse(0.6), 255);
    assert_eq!(Normalization::Centered.inverse(-0.6), 0);
  }

  #[test]
  fn offset_packs_after_previous_plane() {
    let device = Device::emulated(1 << 16);
    let image = gradient(4, 3);
    let src = DeviceBuffer::from_image(device.clone(), &image).unwrap();
    let mut tensor = DeviceBuffer::<f32>::filled(device, &[2, 3, 3, 4], -1.0).unwrap();

    to_float_planar(&mut tensor, 36, &src, Normalization::Raw).unwrap();
    let data = tensor.to_vec().unwrap();
    assert!(data[..36].iter().all(|&v| v == -1.0));
    let expected = image_to_float_planar(&image, Normalization::Raw).unwrap();
    assert_eq!(&data[36..], expected.as_slice());

    assert!(matches!(
      to_float_planar(&mut tensor, 40, &src, Normalization::Raw),
      Err(BufferError::ShapeMismatch { .. })
    ));
  }

  #[test]
  fn mismatched_lengths_are_rejected() {
    let mut dst = [0f32; 5];
    assert!(matches!(
      to_float_planar_into(&mut dst, &[0; 6], Size::new(2, 1), Normalization::Raw),
      Err(BufferError::ShapeMismatch {
        expected: 6,
        actual: 5
      })
    ));
  }
}

// 该文件是 Zitai （姿态） 项目的一部分。
// src/geometry.rs - 保持宽高比的缩放与填充
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

use std::{fmt, str::FromStr};

use image::{
  ImageBuffer, Rgb, RgbImage,
  imageops::{self, FilterType},
};
use thiserror::Error;

use crate::{
  buffer::{Buffer, BufferError, IMAGE_CHANNELS, Location},
  kernel::Kernel,
};

/// 图像或网络输入的空间尺寸
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Size {
  pub width: u32,
  pub height: u32,
}

impl Size {
  pub const fn new(width: u32, height: u32) -> Self {
    Self { width, height }
  }

  pub fn of_image(image: &RgbImage) -> Self {
    let (width, height) = image.dimensions();
    Self { width, height }
  }

  pub fn is_empty(&self) -> bool {
    self.width == 0 || self.height == 0
  }

  pub fn area(&self) -> usize {
    self.width as usize * self.height as usize
  }

  /// 交错图像缓冲区的形状 `[H, W, 3]`
  pub fn image_shape(&self) -> [usize; 3] {
    [self.height as usize, self.width as usize, IMAGE_CHANNELS]
  }

  /// 平面张量的形状 `[3, H, W]`
  pub fn planar_shape(&self) -> [usize; 3] {
    [IMAGE_CHANNELS, self.height as usize, self.width as usize]
  }
}

impl fmt::Display for Size {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}x{}", self.width, self.height)
  }
}

#[derive(Error, Debug, PartialEq, Eq)]
#[error("分辨率格式无效: '{0}', 应为 WxH, 例如 656x368")]
pub struct ParseSizeError(String);

impl FromStr for Size {
  type Err = ParseSizeError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let invalid = || ParseSizeError(s.to_string());
    let (width, height) = s.trim().split_once(['x', 'X']).ok_or_else(invalid)?;
    Ok(Size {
      width: width.trim().parse().map_err(|_| invalid())?,
      height: height.trim().parse().map_err(|_| invalid())?,
    })
  }
}

/// 填充区域的取值方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BorderMode {
  /// 固定颜色
  Constant([u8; 3]),
  /// 重复内容边缘的像素
  Replicate,
}

impl Default for BorderMode {
  fn default() -> Self {
    BorderMode::Constant([0, 0, 0])
  }
}

/// 使 `source` 整体放入 `target` 的最大统一缩放因子。
///
/// 源尺寸为空时返回 0，调用方应把 0 视为失败。
pub fn compute_scale_factor(source: Size, target: Size) -> f64 {
  if source.is_empty() {
    return 0.0;
  }
  let ratio_width = f64::from(target.width) / f64::from(source.width);
  let ratio_height = f64::from(target.height) / f64::from(source.height);
  ratio_width.min(ratio_height)
}

/// 按 `scale` 缩放后内容占据的区域，限制在 `[1, target]` 之内。
pub fn scaled_extent(source: Size, scale: f64, target: Size) -> Size {
  let fit = |len: u32, bound: u32| {
    let scaled = (f64::from(len) * scale).round();
    (scaled as u32).clamp(1, bound.max(1))
  };
  Size {
    width: fit(source.width, target.width),
    height: fit(source.height, target.height),
  }
}

fn check_scale(scale: f64) -> Result<(), BufferError> {
  if scale.is_finite() && scale > 0.0 {
    Ok(())
  } else {
    Err(BufferError::InvalidScale(scale))
  }
}

fn check_len(len: usize, size: Size) -> Result<(), BufferError> {
  let expected = size.area() * IMAGE_CHANNELS;
  if len == expected {
    Ok(())
  } else {
    Err(BufferError::ShapeMismatch {
      expected,
      actual: len,
    })
  }
}

/// 缩放 `src` 并放在 `dst` 画布的左上角，其余区域按 `border` 填充。
///
/// 两个切片都是行优先的 RGB 交错数据。缩小时使用三角滤波，放大时使用 Catmull-Rom，
/// 尺寸不变时直接复制。主机与设备共用这一实现。
pub fn resize_with_padding_into(
  dst: &mut [u8],
  target: Size,
  src: &[u8],
  source: Size,
  scale: f64,
  border: BorderMode,
) -> Result<(), BufferError> {
  if source.is_empty() || target.is_empty() {
    return Err(BufferError::EmptyImage);
  }
  check_scale(scale)?;
  check_len(src.len(), source)?;
  check_len(dst.len(), target)?;

  let extent = scaled_extent(source, scale, target);
  let view = ImageBuffer::<Rgb<u8>, &[u8]>::from_raw(source.width, source.height, src).ok_or(
    BufferError::ShapeMismatch {
      expected: source.area() * IMAGE_CHANNELS,
      actual: src.len(),
    },
  )?;
  let dst_len = dst.len();
  let mut canvas = ImageBuffer::<Rgb<u8>, &mut [u8]>::from_raw(target.width, target.height, dst)
    .ok_or(BufferError::ShapeMismatch {
      expected: target.area() * IMAGE_CHANNELS,
      actual: dst_len,
    })?;

  if extent == source {
    imageops::replace(&mut canvas, &view, 0, 0);
  } else {
    let filter = if extent.width < source.width || extent.height < source.height {
      FilterType::Triangle
    } else {
      FilterType::CatmullRom
    };
    let resized = imageops::resize(&view, extent.width, extent.height, filter);
    imageops::replace(&mut canvas, &resized, 0, 0);
  }

  fill_border(&mut canvas, extent, border);
  Ok(())
}

fn fill_border(canvas: &mut ImageBuffer<Rgb<u8>, &mut [u8]>, extent: Size, border: BorderMode) {
  let (width, height) = canvas.dimensions();
  for y in 0..height {
    let start = if y < extent.height { extent.width } else { 0 };
    for x in start..width {
      let pixel = match border {
        BorderMode::Constant(value) => Rgb(value),
        BorderMode::Replicate => {
          *canvas.get_pixel(x.min(extent.width - 1), y.min(extent.height - 1))
        }
      };
      canvas.put_pixel(x, y, pixel);
    }
  }
}

/// 主机图像版本的 [`resize_with_padding_into`]，输出恰好为 `target` 大小。
pub fn resize_with_padding(
  image: &RgbImage,
  scale_factor: f64,
  target: Size,
  border: BorderMode,
) -> Result<RgbImage, BufferError> {
  let mut canvas = RgbImage::new(target.width, target.height);
  resize_with_padding_into(
    &mut canvas,
    target,
    image.as_raw(),
    Size::of_image(image),
    scale_factor,
    border,
  )?;
  Ok(canvas)
}

/// 在 `src` 所在位置上执行缩放填充，`dst` 按需重新分配为 `[H, W, 3]`。
pub fn resize_buffer_with_padding<L: Location>(
  dst: &mut Buffer<u8, L>,
  src: &Buffer<u8, L>,
  scale_factor: f64,
  target: Size,
  border: BorderMode,
) -> Result<(), BufferError> {
  dst.check_same_location(src)?;
  let source = src.image_size().ok_or(BufferError::EmptyImage)?;
  if target.is_empty() {
    return Err(BufferError::EmptyImage);
  }
  check_scale(scale_factor)?;

  if dst.shares_block_with(src) {
    dst.release();
  }
  let shape = target.image_shape();
  if dst.shape() != shape || dst.handle_count() > 1 {
    dst.reset(&shape)?;
  }

  let kernel = Kernel::ResizeWithPadding {
    src: src.as_ptr(),
    source,
    dst: dst.as_mut_ptr(),
    target,
    scale: scale_factor,
    border,
  };
  // SAFETY: 两个缓冲区的形状已与内核尺寸一致，dst 独占且不与 src 共享内存
  unsafe { dst.location().launch(kernel) }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::buffer::{Device, DeviceBuffer, Host, HostBuffer};

  #[test]
  fn scale_factor_is_tight_fit() {
    let source = Size::new(640, 480);
    let target = Size::new(368, 368);
    let scale = compute_scale_factor(source, target);
    assert!((scale - 0.575).abs() < 1e-12);
    assert_eq!(scaled_extent(source, scale, target), Size::new(368, 276));
  }

  #[test]
  fn scale_factor_never_overscales() {
    let sizes = [1u32, 3, 16, 99, 480, 640, 1080, 1920, 4000];
    let targets = [Size::new(368, 368), Size::new(656, 368), Size::new(16, 32)];
    for &w in &sizes {
      for &h in &sizes {
        for &target in &targets {
          let source = Size::new(w, h);
          let scale = compute_scale_factor(source, target);
          let sw = (f64::from(w) * scale).round() as u32;
          let sh = (f64::from(h) * scale).round() as u32;
          assert!(sw <= target.width, "{source} -> {target}");
          assert!(sh <= target.height, "{source} -> {target}");
          assert!(sw == target.width || sh == target.height, "{source} -> {target}");
        }
      }
    }
  }

  #[test]
  fn empty_source_scale_is_zero() {
    assert_eq!(compute_scale_factor(Size::new(0, 10), Size::new(16, 16)), 0.0);
  }

  #[test]
  fn parse_size() {
    assert_eq!("656x368".parse::<Size>().unwrap(), Size::new(656, 368));
    assert_eq!(" 1280 X 720 ".parse::<Size>().unwrap(), Size::new(1280, 720));
    assert!("656".parse::<Size>().is_err());
    assert!("-1x-1".parse::<Size>().is_err());
    assert_eq!(Size::new(3, 4).to_string(), "3x4");
  }

  #[test]
  fn padding_fills_short_axis() {
    let image = RgbImage::from_pixel(640, 480, Rgb([200, 100, 50]));
    let target = Size::new(368, 368);
    let scale = compute_scale_factor(Size::of_image(&image), target);
    let out = resize_with_padding(&image, scale, target, BorderMode::default()).unwrap();

    assert_eq!(out.dimensions(), (368, 368));
    assert_eq!(*out.get_pixel(0, 0), Rgb([200, 100, 50]));
    assert_eq!(*out.get_pixel(367, 275), Rgb([200, 100, 50]));
    for y in 276..368 {
      assert_eq!(*out.get_pixel(0, y), Rgb([0, 0, 0]));
      assert_eq!(*out.get_pixel(367, y), Rgb([0, 0, 0]));
    }
  }

  #[test]
  fn replicate_border_repeats_edges() {
    let mut image = RgbImage::new(2, 2);
    image.put_pixel(1, 0, Rgb([10, 20, 30]));
    image.put_pixel(0, 1, Rgb([40, 50, 60]));
    image.put_pixel(1, 1, Rgb([70, 80, 90]));
    let out = resize_with_padding(&image, 1.0, Size::new(4, 3), BorderMode::Replicate).unwrap();

    assert_eq!(*out.get_pixel(3, 0), Rgb([10, 20, 30]));
    assert_eq!(*out.get_pixel(0, 2), Rgb([40, 50, 60]));
    assert_eq!(*out.get_pixel(3, 2), Rgb([70, 80, 90]));
  }

  #[test]
  fn constant_border_uses_value() {
    let image = RgbImage::from_pixel(4, 2, Rgb([1, 1, 1]));
    let out =
      resize_with_padding(&image, 1.0, Size::new(4, 4), BorderMode::Constant([9, 8, 7])).unwrap();
    assert_eq!(*out.get_pixel(2, 1), Rgb([1, 1, 1]));
    assert_eq!(*out.get_pixel(2, 3), Rgb([9, 8, 7]));
  }

  #[test]
  fn invalid_scale_is_rejected() {
    let image = RgbImage::new(4, 4);
    for scale in [0.0, -1.0, f64::NAN, f64::INFINITY] {
      assert!(matches!(
        resize_with_padding(&image, scale, Size::new(4, 4), BorderMode::default()),
        Err(BufferError::InvalidScale(_))
      ));
    }
  }

  #[test]
  fn host_and_device_resize_agree() {
    let image = RgbImage::from_fn(37, 23, |x, y| Rgb([(x * 7) as u8, (y * 11) as u8, (x ^ y) as u8]));
    let target = Size::new(64, 48);
    let scale = compute_scale_factor(Size::of_image(&image), target);

    let host_src = HostBuffer::from_image(Host, &image).unwrap();
    let mut host_dst = HostBuffer::<u8>::default();
    resize_buffer_with_padding(&mut host_dst, &host_src, scale, target, BorderMode::default())
      .unwrap();

    let device = Device::emulated(1 << 20);
    let device_src = DeviceBuffer::from_image(device.clone(), &image).unwrap();
    let mut device_dst = DeviceBuffer::<u8>::new(device);
    resize_buffer_with_padding(&mut device_dst, &device_src, scale, target, BorderMode::default())
      .unwrap();

    assert_eq!(host_dst.shape(), &[48, 64, 3]);
    assert_eq!(device_dst.to_vec().unwrap(), host_dst.as_slice());
    let expected = resize_with_padding(&image, scale, target, BorderMode::default()).unwrap();
    assert_eq!(host_dst.as_slice(), expected.as_raw().as_slice());
  }

  #[test]
  fn resize_writes_only_private_blocks() {
    let image = RgbImage::from_pixel(4, 4, Rgb([5, 5, 5]));
    let src = HostBuffer::from_image(Host, &image).unwrap();
    let mut dst = HostBuffer::<u8>::filled(Host, &[4, 4, 3], 200).unwrap();
    let reader = dst.clone();
    resize_buffer_with_padding(&mut dst, &src, 1.0, Size::new(4, 4), BorderMode::default())
      .unwrap();
    assert!(reader.as_slice().iter().all(|&v| v == 200));
    assert_eq!(dst.as_slice(), image.as_raw().as_slice());
  }

  #[test]
  fn resize_across_runtimes_is_rejected() {
    let image = RgbImage::new(4, 4);
    let src = DeviceBuffer::from_image(Device::emulated(1 << 10), &image).unwrap();
    let mut dst = DeviceBuffer::<u8>::new(Device::emulated(1 << 10));
    assert!(matches!(
      resize_buffer_with_padding(&mut dst, &src, 1.0, Size::new(4, 4), BorderMode::default()),
      Err(BufferError::LocationMismatch)
    ));
    assert!(dst.is_empty());
  }
}

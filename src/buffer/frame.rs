// 该文件是 Zitai （姿态） 项目的一部分。
// src/buffer/frame.rs - 交错 RGB 图像缓冲区
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

use super::{Buffer, BufferError, Location};
use crate::geometry::Size;

/// 交错图像每个像素的通道数
pub const IMAGE_CHANNELS: usize = 3;

impl<L: Location> Buffer<u8, L> {
  /// 把解码后的 RGB 图像放到 `location` 上，形状为 `[H, W, 3]`。
  pub fn from_image(location: L, image: &RgbImage) -> Result<Self, BufferError> {
    let size = Size::of_image(image);
    if size.is_empty() {
      return Err(BufferError::EmptyImage);
    }
    Self::from_slice(location, &size.image_shape(), image.as_raw())
  }

  /// 形状为 `[H, W, 3]` 时返回图像尺寸。
  pub fn image_size(&self) -> Option<Size> {
    match self.shape() {
      &[height, width, IMAGE_CHANNELS] if height > 0 && width > 0 => {
        Some(Size::new(u32::try_from(width).ok()?, u32::try_from(height).ok()?))
      }
      _ => None,
    }
  }

  pub fn to_image(&self) -> Result<RgbImage, BufferError> {
    let size = self.image_size().ok_or(BufferError::EmptyImage)?;
    let data = self.to_vec()?;
    let actual = data.len();
    RgbImage::from_raw(size.width, size.height, data).ok_or(BufferError::ShapeMismatch {
      expected: size.area() * IMAGE_CHANNELS,
      actual,
    })
  }
}

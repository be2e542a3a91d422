// 该文件是 Zitai （姿态） 项目的一部分。
// src/format/input.rs - 多尺度网络输入张量
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
use tracing::{debug, error};

use super::FormatError;
use crate::{
  buffer::{Buffer, Host, HostBuffer, IMAGE_CHANNELS, Location},
  geometry::{BorderMode, Size, compute_scale_factor, resize_buffer_with_padding},
  transcode::{Normalization, to_float_planar},
};

const ALIGNMENT: u32 = 16;

/// 把一帧图像格式化为 `[N, 3, H, W]` 的网络输入张量，每个尺度占一个 `[3, H, W]` 切片。
///
/// 尺度 `i` 的请求比例为 `1 - i * gap`，内容按该比例（对齐到 16）缩放后放在完整网络画布的
/// 左上角，剩余区域填充。像素使用 [`Normalization::Centered`] 映射。
#[derive(Debug)]
pub struct InputFormatter<L: Location> {
  net_size: Size,
  scale_number: usize,
  scale_gap: f64,
  border: BorderMode,
  scaled_input: Buffer<u8, L>,
  location: L,
}

impl<L: Location> InputFormatter<L> {
  /// 不做校验的构造函数，参数校验见 [`crate::config::InputFormatterBuilder`]。
  pub fn new(location: L, net_size: Size, scale_number: usize, scale_gap: f64) -> Self {
    Self {
      net_size,
      scale_number,
      scale_gap,
      border: BorderMode::default(),
      scaled_input: Buffer::new(location.clone()),
      location,
    }
  }

  pub fn with_border(mut self, border: BorderMode) -> Self {
    self.border = border;
    self
  }

  pub fn net_size(&self) -> Size {
    self.net_size
  }

  pub fn scale_number(&self) -> usize {
    self.scale_number
  }

  pub fn scale_gap(&self) -> f64 {
    self.scale_gap
  }

  pub fn location(&self) -> &L {
    &self.location
  }

  pub fn tensor_shape(&self) -> [usize; 4] {
    [
      self.scale_number,
      IMAGE_CHANNELS,
      self.net_size.height as usize,
      self.net_size.width as usize,
    ]
  }

  /// 第 `index` 个尺度内容区域的目标尺寸。
  pub fn target_size(&self, index: usize) -> Result<Size, FormatError> {
    let requested = 1.0 - index as f64 * self.scale_gap;
    if requested > 1.0 {
      return Err(FormatError::Configuration(format!(
        "第 {} 个尺度的比例 {} 大于 1, 尺度间隔 {} 无效",
        index, requested, self.scale_gap
      )));
    }
    let align = |len: u32| {
      let step = f64::from(ALIGNMENT);
      let rounded = step * (f64::from(len) * requested / step).round();
      let upper = (len / ALIGNMENT * ALIGNMENT).max(1);
      // 负值与 NaN 经 `as` 转换为 0，再被夹到 1
      (rounded as u32).clamp(1, upper)
    };
    Ok(Size::new(
      align(self.net_size.width),
      align(self.net_size.height),
    ))
  }

  /// 格式化一帧图像，返回每个尺度的缩放因子。
  ///
  /// `dst` 的形状与 [`Self::tensor_shape`] 不同或与其他句柄共享内存时才会重新分配。
  /// 调用返回前会同步存储位置；失败时 `dst` 被清空。
  pub fn format(
    &mut self,
    image: &Buffer<u8, L>,
    dst: &mut Buffer<f32, L>,
  ) -> Result<Vec<f64>, FormatError> {
    let result = self.format_inner(image, dst);
    if let Err(e) = &result {
      error!("输入格式化失败: {}", e);
      dst.release();
    }
    result
  }

  fn format_inner(
    &mut self,
    image: &Buffer<u8, L>,
    dst: &mut Buffer<f32, L>,
  ) -> Result<Vec<f64>, FormatError> {
    let source = image
      .image_size()
      .ok_or_else(|| FormatError::Input("输入图像为空".to_string()))?;
    if self.net_size.is_empty() || self.scale_number == 0 {
      return Err(FormatError::Configuration(format!(
        "网络输入 {} 与尺度数量 {} 无效",
        self.net_size, self.scale_number
      )));
    }

    let shape = self.tensor_shape();
    if dst.shape() != shape || dst.handle_count() > 1 {
      debug!("分配网络输入张量: {:?}", shape);
      dst.reset(&shape)?;
    }
    let plane = dst.volume_range(1, 3)?;

    let mut scales = Vec::with_capacity(self.scale_number);
    for index in 0..self.scale_number {
      let target = self.target_size(index)?;
      let scale = compute_scale_factor(source, target);
      debug!(
        "尺度 {}: 源图像 {}, 目标 {}, 缩放因子 {:.4}",
        index, source, target, scale
      );

      resize_buffer_with_padding(
        &mut self.scaled_input,
        image,
        scale,
        self.net_size,
        self.border,
      )?;
      to_float_planar(
        dst,
        index * plane,
        &self.scaled_input,
        Normalization::Centered,
      )?;
      scales.push(scale);
    }

    self.location.synchronize()?;
    Ok(scales)
  }
}

impl InputFormatter<Host> {
  /// 主机图像的便捷入口，每次返回新的张量。
  pub fn format_image(
    &mut self,
    image: &RgbImage,
  ) -> Result<(HostBuffer<f32>, Vec<f64>), FormatError> {
    if Size::of_image(image).is_empty() {
      error!("输入格式化失败: 输入图像为空");
      return Err(FormatError::Input("输入图像为空".to_string()));
    }
    let frame = HostBuffer::from_image(Host, image)?;
    let mut tensor = HostBuffer::default();
    let scales = self.format(&frame, &mut tensor)?;
    Ok((tensor, scales))
  }
}

// 该文件是 Zitai （姿态） 项目的一部分。
// src/format/output.rs - 输出张量与显示图像之间的转换
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
  transcode::{Normalization, from_float_planar, to_float_planar},
};

#[derive(Debug)]
pub struct OutputFormatter<L: Location> {
  output_size: Size,
  generate_output: bool,
  border: BorderMode,
  scaled_input: Buffer<u8, L>,
  location: L,
}

impl<L: Location> OutputFormatter<L> {
  pub fn new(location: L, output_size: Size, generate_output: bool) -> Self {
    Self {
      output_size,
      generate_output,
      border: BorderMode::default(),
      scaled_input: Buffer::new(location.clone()),
      location,
    }
  }

  pub fn with_border(mut self, border: BorderMode) -> Self {
    self.border = border;
    self
  }

  pub fn output_size(&self) -> Size {
    self.output_size
  }

  pub fn generate_output(&self) -> bool {
    self.generate_output
  }

  pub fn tensor_shape(&self) -> [usize; 3] {
    self.output_size.planar_shape()
  }

  /// 把源图像缩放填充到输出分辨率，写成 `[3, H, W]` 的原值浮点张量。
  ///
  /// 返回源图像到输出空间的缩放因子。不生成输出时 `dst` 被清空，但缩放因子照常返回。
  /// 失败时 `dst` 同样被清空。
  pub fn format(
    &mut self,
    image: &Buffer<u8, L>,
    dst: &mut Buffer<f32, L>,
  ) -> Result<f64, FormatError> {
    let result = self.format_inner(image, dst);
    if let Err(e) = &result {
      error!("输出格式化失败: {}", e);
      dst.release();
    }
    result
  }

  fn format_inner(
    &mut self,
    image: &Buffer<u8, L>,
    dst: &mut Buffer<f32, L>,
  ) -> Result<f64, FormatError> {
    let source = image
      .image_size()
      .ok_or_else(|| FormatError::Input("输入图像为空".to_string()))?;
    if self.output_size.is_empty() {
      return Err(FormatError::Configuration(format!(
        "输出分辨率 {} 无效",
        self.output_size
      )));
    }

    let scale = compute_scale_factor(source, self.output_size);
    debug!(
      "输出缩放: 源图像 {}, 输出 {}, 缩放因子 {:.4}",
      source, self.output_size, scale
    );

    if !self.generate_output {
      dst.release();
      self.location.synchronize()?;
      return Ok(scale);
    }

    resize_buffer_with_padding(
      &mut self.scaled_input,
      image,
      scale,
      self.output_size,
      self.border,
    )?;
    let shape = self.tensor_shape();
    if dst.shape() != shape || dst.handle_count() > 1 {
      debug!("分配输出张量: {:?}", shape);
      dst.reset(&shape)?;
    }
    to_float_planar(dst, 0, &self.scaled_input, Normalization::Raw)?;

    self.location.synchronize()?;
    Ok(scale)
  }

  /// 把渲染后的 `[3, H, W]` 张量转回输出分辨率的 `[H, W, 3]` 图像。
  pub fn format_to_image(
    &self,
    tensor: &Buffer<f32, L>,
    dst: &mut Buffer<u8, L>,
  ) -> Result<(), FormatError> {
    let result = self.format_to_image_inner(tensor, dst);
    if let Err(e) = &result {
      error!("输出图像转换失败: {}", e);
      dst.release();
    }
    result
  }

  fn format_to_image_inner(
    &self,
    tensor: &Buffer<f32, L>,
    dst: &mut Buffer<u8, L>,
  ) -> Result<(), FormatError> {
    if tensor.is_empty() {
      return Err(FormatError::Output("输出张量为空".to_string()));
    }
    let size = self.output_size;
    if tensor.height() != size.height as usize
      || tensor.width() != size.width as usize
      || tensor.volume() < size.area() * IMAGE_CHANNELS
    {
      return Err(FormatError::Output(format!(
        "输出张量形状 {:?} 与输出分辨率 {} 不符",
        tensor.shape(),
        size
      )));
    }

    from_float_planar(dst, tensor, size, Normalization::Raw)?;
    self.location.synchronize()?;
    Ok(())
  }
}

impl OutputFormatter<Host> {
  pub fn format_image(&mut self, image: &RgbImage) -> Result<(HostBuffer<f32>, f64), FormatError> {
    if Size::of_image(image).is_empty() {
      error!("输出格式化失败: 输入图像为空");
      return Err(FormatError::Input("输入图像为空".to_string()));
    }
    let frame = HostBuffer::from_image(Host, image)?;
    let mut tensor = HostBuffer::default();
    let scale = self.format(&frame, &mut tensor)?;
    Ok((tensor, scale))
  }

  pub fn tensor_to_image(&self, tensor: &HostBuffer<f32>) -> Result<RgbImage, FormatError> {
    let mut frame = HostBuffer::default();
    self.format_to_image(tensor, &mut frame)?;
    Ok(frame.to_image()?)
  }
}

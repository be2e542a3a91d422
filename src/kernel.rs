// 该文件是 Zitai （姿态） 项目的一部分。
// src/kernel.rs - 可在任一存储位置执行的图像内核
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

use crate::{
  buffer::{BufferError, IMAGE_CHANNELS},
  geometry::{BorderMode, Size, resize_with_padding_into},
  transcode::{Normalization, from_float_planar_into, to_float_planar_into},
};

/// 内核描述：参数与所在位置的内存指针。
///
/// 主机直接执行，设备运行时把它提交到自己的队列。两边执行同一份切片实现，
/// 因此结果逐元素一致。
#[derive(Debug)]
pub enum Kernel {
  /// 保持宽高比缩放到 `target` 画布的左上角，剩余区域填充
  ResizeWithPadding {
    src: *const u8,
    source: Size,
    dst: *mut u8,
    target: Size,
    scale: f64,
    border: BorderMode,
  },
  /// `[H, W, 3]` 的 8 位交错图像转为 `[3, H, W]` 的浮点平面
  ToFloatPlanar {
    src: *const u8,
    dst: *mut f32,
    size: Size,
    normalization: Normalization,
  },
  /// `ToFloatPlanar` 的逆变换
  FromFloatPlanar {
    src: *const f32,
    dst: *mut u8,
    size: Size,
    normalization: Normalization,
  },
}

impl Kernel {
  pub fn name(&self) -> &'static str {
    match self {
      Kernel::ResizeWithPadding { .. } => "resize_with_padding",
      Kernel::ToFloatPlanar { .. } => "to_float_planar",
      Kernel::FromFloatPlanar { .. } => "from_float_planar",
    }
  }

  /// 执行内核。
  ///
  /// # Safety
  ///
  /// 每个指针都可访问其尺寸对应的 `area * 3` 个元素，输入与输出互不重叠，
  /// 执行期间没有其他写者。
  pub unsafe fn execute(self) -> Result<(), BufferError> {
    match self {
      Kernel::ResizeWithPadding {
        src,
        source,
        dst,
        target,
        scale,
        border,
      } => {
        let src = unsafe { image_slice(src, source) }?;
        let dst = unsafe { image_slice_mut(dst, target) }?;
        resize_with_padding_into(dst, target, src, source, scale, border)
      }
      Kernel::ToFloatPlanar {
        src,
        dst,
        size,
        normalization,
      } => {
        let src = unsafe { image_slice(src, size) }?;
        let dst = unsafe { image_slice_mut(dst, size) }?;
        to_float_planar_into(dst, src, size, normalization)
      }
      Kernel::FromFloatPlanar {
        src,
        dst,
        size,
        normalization,
      } => {
        let src = unsafe { image_slice(src, size) }?;
        let dst = unsafe { image_slice_mut(dst, size) }?;
        from_float_planar_into(dst, src, size, normalization)
      }
    }
  }
}

unsafe fn image_slice<'a, T>(ptr: *const T, size: Size) -> Result<&'a [T], BufferError> {
  if ptr.is_null() || size.is_empty() {
    return Err(BufferError::EmptyImage);
  }
  Ok(unsafe { std::slice::from_raw_parts(ptr, size.area() * IMAGE_CHANNELS) })
}

unsafe fn image_slice_mut<'a, T>(ptr: *mut T, size: Size) -> Result<&'a mut [T], BufferError> {
  if ptr.is_null() || size.is_empty() {
    return Err(BufferError::EmptyImage);
  }
  Ok(unsafe { std::slice::from_raw_parts_mut(ptr, size.area() * IMAGE_CHANNELS) })
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn null_pointers_are_rejected() {
    let mut out = [0f32; 3];
    let kernel = Kernel::ToFloatPlanar {
      src: std::ptr::null(),
      dst: out.as_mut_ptr(),
      size: Size::new(1, 1),
      normalization: Normalization::Raw,
    };
    assert_eq!(kernel.name(), "to_float_planar");
    assert!(matches!(unsafe { kernel.execute() }, Err(BufferError::EmptyImage)));
  }

  #[test]
  fn executes_on_plain_memory() {
    let pixels = [10u8, 20, 30, 40, 50, 60];
    let mut planar = [0f32; 6];
    let kernel = Kernel::ToFloatPlanar {
      src: pixels.as_ptr(),
      dst: planar.as_mut_ptr(),
      size: Size::new(2, 1),
      normalization: Normalization::Raw,
    };
    unsafe { kernel.execute() }.unwrap();
    assert_eq!(planar, [10.0, 40.0, 20.0, 50.0, 30.0, 60.0]);
  }
}

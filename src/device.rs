// 该文件是 Zitai （姿态） 项目的一部分。
// src/device.rs - 加速器设备运行时
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

use std::{alloc::Layout, ptr::NonNull};

use thiserror::Error;

use crate::{buffer::BufferError, kernel::Kernel};

mod emulated;
pub use self::emulated::{DeviceStats, EmulatedDevice};

#[derive(Error, Debug)]
pub enum DeviceError {
  #[error("设备内存不足: 请求 {requested} 字节, 剩余 {available} 字节")]
  OutOfMemory { requested: usize, available: usize },
  #[error("内核启动失败: {0}")]
  InvalidLaunch(String),
  #[error("设备运行时错误: {0}")]
  Runtime(String),
  #[error("内核执行失败: {0}")]
  Kernel(Box<BufferError>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyKind {
  HostToDevice,
  DeviceToHost,
  DeviceToDevice,
}

/// 设备运行时：内存管理、内核执行与同步。
///
/// 运行时可以异步执行 `memcpy(DeviceToDevice)`、`memset_pattern` 与 `launch`，
/// 但 `free` 与涉及主机内存的复制必须在返回前完成。
pub trait DeviceRuntime: Send + Sync {
  fn name(&self) -> &str;

  fn malloc(&self, layout: Layout) -> Result<NonNull<u8>, DeviceError>;

  /// # Safety
  ///
  /// `ptr` 必须来自本运行时以相同 `layout` 调用的 `malloc`，且尚未释放。
  unsafe fn free(&self, ptr: NonNull<u8>, layout: Layout);

  /// # Safety
  ///
  /// 两个指针按 `kind` 指向主机或本设备的内存，各自可访问 `bytes` 字节且互不重叠。
  unsafe fn memcpy(
    &self,
    dst: *mut u8,
    src: *const u8,
    bytes: usize,
    kind: CopyKind,
  ) -> Result<(), DeviceError>;

  /// # Safety
  ///
  /// `dst` 为本设备内存，可写 `pattern.len() * count` 字节。
  unsafe fn memset_pattern(
    &self,
    dst: *mut u8,
    pattern: &[u8],
    count: usize,
  ) -> Result<(), DeviceError>;

  /// # Safety
  ///
  /// 内核中的指针为本设备内存，并满足 [`Kernel::execute`] 的要求。
  unsafe fn launch(&self, kernel: Kernel) -> Result<(), DeviceError>;

  fn synchronize(&self) -> Result<(), DeviceError>;
}

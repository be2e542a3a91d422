// 该文件是 Zitai （姿态） 项目的一部分。
// src/buffer/location.rs - 缓冲区存储位置
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

use std::{alloc::Layout, fmt, ptr::NonNull, sync::Arc};

use crate::{
  buffer::BufferError,
  device::{CopyKind, DeviceError, DeviceRuntime, EmulatedDevice},
  kernel::Kernel,
};

/// 存储位置：缓冲区内存的分配、释放、复制与内核执行策略。
///
/// 所有指针参数都指向本位置分配的内存（`upload`/`download` 的切片一侧除外）。
pub trait Location: Clone + fmt::Debug + Send + Sync + 'static {
  fn name(&self) -> &'static str;

  /// 两个位置是否指向同一块可互相访问的内存（例如同一个设备运行时）。
  fn same_as(&self, other: &Self) -> bool;

  fn allocate(&self, layout: Layout) -> Result<NonNull<u8>, BufferError>;

  /// # Safety
  ///
  /// `ptr` 必须来自本位置以相同 `layout` 调用的 `allocate`，且尚未释放。
  unsafe fn release(&self, ptr: NonNull<u8>, layout: Layout);

  /// # Safety
  ///
  /// `dst` 与 `src` 各自可访问 `bytes` 字节，且互不重叠。
  unsafe fn copy(&self, dst: *mut u8, src: *const u8, bytes: usize) -> Result<(), BufferError>;

  /// # Safety
  ///
  /// `dst` 可写 `pattern.len() * count` 字节。
  unsafe fn fill(&self, dst: *mut u8, pattern: &[u8], count: usize) -> Result<(), BufferError>;

  /// # Safety
  ///
  /// `dst` 可写 `src.len()` 字节。
  unsafe fn upload(&self, dst: *mut u8, src: &[u8]) -> Result<(), BufferError>;

  /// # Safety
  ///
  /// `src` 可读 `dst.len()` 字节。
  unsafe fn download(&self, dst: &mut [u8], src: *const u8) -> Result<(), BufferError>;

  /// # Safety
  ///
  /// 内核中的指针必须满足 [`Kernel::execute`] 的要求。
  unsafe fn launch(&self, kernel: Kernel) -> Result<(), BufferError>;

  /// 等待本位置上已提交的工作全部完成。
  fn synchronize(&self) -> Result<(), BufferError>;
}

/// 主机内存，使用全局分配器。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Host;

impl Location for Host {
  fn name(&self) -> &'static str {
    "host"
  }

  fn same_as(&self, _other: &Self) -> bool {
    true
  }

  fn allocate(&self, layout: Layout) -> Result<NonNull<u8>, BufferError> {
    // 零初始化，保证安全切片读到的总是已初始化内存
    // SAFETY: 调用方保证 layout 非零大小
    let ptr = unsafe { std::alloc::alloc_zeroed(layout) };
    NonNull::new(ptr).ok_or(BufferError::Allocation {
      location: self.name(),
      bytes: layout.size(),
    })
  }

  unsafe fn release(&self, ptr: NonNull<u8>, layout: Layout) {
    unsafe { std::alloc::dealloc(ptr.as_ptr(), layout) }
  }

  unsafe fn copy(&self, dst: *mut u8, src: *const u8, bytes: usize) -> Result<(), BufferError> {
    unsafe { std::ptr::copy_nonoverlapping(src, dst, bytes) };
    Ok(())
  }

  unsafe fn fill(&self, dst: *mut u8, pattern: &[u8], count: usize) -> Result<(), BufferError> {
    unsafe { fill_pattern(dst, pattern, count) };
    Ok(())
  }

  unsafe fn upload(&self, dst: *mut u8, src: &[u8]) -> Result<(), BufferError> {
    unsafe { std::ptr::copy_nonoverlapping(src.as_ptr(), dst, src.len()) };
    Ok(())
  }

  unsafe fn download(&self, dst: &mut [u8], src: *const u8) -> Result<(), BufferError> {
    unsafe { std::ptr::copy_nonoverlapping(src, dst.as_mut_ptr(), dst.len()) };
    Ok(())
  }

  unsafe fn launch(&self, kernel: Kernel) -> Result<(), BufferError> {
    unsafe { kernel.execute() }
  }

  fn synchronize(&self) -> Result<(), BufferError> {
    Ok(())
  }
}

/// 按 `pattern` 重复写入 `count` 次。
///
/// # Safety
///
/// `dst` 可写 `pattern.len() * count` 字节。
pub(crate) unsafe fn fill_pattern(dst: *mut u8, pattern: &[u8], count: usize) {
  let step = pattern.len();
  for i in 0..count {
    unsafe { std::ptr::copy_nonoverlapping(pattern.as_ptr(), dst.add(i * step), step) };
  }
}

/// 加速器设备内存，具体操作交给设备运行时。
#[derive(Clone)]
pub struct Device {
  runtime: Arc<dyn DeviceRuntime>,
}

impl Device {
  pub fn new(runtime: Arc<dyn DeviceRuntime>) -> Self {
    Self { runtime }
  }

  /// 使用主机内存模拟、容量为 `capacity` 字节的设备。
  pub fn emulated(capacity: usize) -> Self {
    Self::new(Arc::new(EmulatedDevice::new(capacity)))
  }

  pub fn runtime(&self) -> &dyn DeviceRuntime {
    self.runtime.as_ref()
  }
}

impl fmt::Debug for Device {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Device")
      .field("runtime", &self.runtime.name())
      .finish()
  }
}

impl Location for Device {
  fn name(&self) -> &'static str {
    "device"
  }

  fn same_as(&self, other: &Self) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(&self.runtime), Arc::as_ptr(&other.runtime))
  }

  fn allocate(&self, layout: Layout) -> Result<NonNull<u8>, BufferError> {
    self.runtime.malloc(layout).map_err(|e| match e {
      DeviceError::OutOfMemory { requested, .. } => BufferError::Allocation {
        location: self.name(),
        bytes: requested,
      },
      other => BufferError::Device(other),
    })
  }

  unsafe fn release(&self, ptr: NonNull<u8>, layout: Layout) {
    unsafe { self.runtime.free(ptr, layout) }
  }

  unsafe fn copy(&self, dst: *mut u8, src: *const u8, bytes: usize) -> Result<(), BufferError> {
    unsafe {
      self
        .runtime
        .memcpy(dst, src, bytes, CopyKind::DeviceToDevice)
    }?;
    Ok(())
  }

  unsafe fn fill(&self, dst: *mut u8, pattern: &[u8], count: usize) -> Result<(), BufferError> {
    unsafe { self.runtime.memset_pattern(dst, pattern, count) }?;
    Ok(())
  }

  unsafe fn upload(&self, dst: *mut u8, src: &[u8]) -> Result<(), BufferError> {
    unsafe {
      self
        .runtime
        .memcpy(dst, src.as_ptr(), src.len(), CopyKind::HostToDevice)
    }?;
    Ok(())
  }

  unsafe fn download(&self, dst: &mut [u8], src: *const u8) -> Result<(), BufferError> {
    unsafe {
      self
        .runtime
        .memcpy(dst.as_mut_ptr(), src, dst.len(), CopyKind::DeviceToHost)
    }?;
    Ok(())
  }

  unsafe fn launch(&self, kernel: Kernel) -> Result<(), BufferError> {
    unsafe { self.runtime.launch(kernel) }.map_err(|e| match e {
      DeviceError::Kernel(inner) => *inner,
      other => BufferError::Device(other),
    })
  }

  fn synchronize(&self) -> Result<(), BufferError> {
    self.runtime.synchronize()?;
    Ok(())
  }
}

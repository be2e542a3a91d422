// 该文件是 Zitai （姿态） 项目的一部分。
// src/device/emulated.rs - 主机内存模拟的设备运行时
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

use std::{
  alloc::Layout,
  ptr::NonNull,
  sync::atomic::{AtomicU64, AtomicUsize, Ordering},
};

use tracing::{debug, warn};

use super::{CopyKind, DeviceError, DeviceRuntime};
use crate::{buffer::location::fill_pattern, kernel::Kernel};

/// 运行时统计，用于确认数据路径（例如设备内复制不经过主机）。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeviceStats {
  pub allocations: u64,
  pub frees: u64,
  pub host_to_device: u64,
  pub device_to_host: u64,
  pub device_to_device: u64,
  pub fills: u64,
  pub launches: u64,
  pub synchronizations: u64,
}

#[derive(Debug, Default)]
struct Counters {
  allocations: AtomicU64,
  frees: AtomicU64,
  host_to_device: AtomicU64,
  device_to_host: AtomicU64,
  device_to_device: AtomicU64,
  fills: AtomicU64,
  launches: AtomicU64,
  synchronizations: AtomicU64,
}

fn bump(counter: &AtomicU64) {
  counter.fetch_add(1, Ordering::Relaxed);
}

/// 没有真实加速器时使用的设备：内存来自主机堆，容量固定，所有工作同步完成。
#[derive(Debug)]
pub struct EmulatedDevice {
  capacity: usize,
  used: AtomicUsize,
  counters: Counters,
}

impl EmulatedDevice {
  pub fn new(capacity: usize) -> Self {
    debug!("创建模拟设备, 容量 {} 字节", capacity);
    Self {
      capacity,
      used: AtomicUsize::new(0),
      counters: Counters::default(),
    }
  }

  pub fn capacity(&self) -> usize {
    self.capacity
  }

  pub fn used(&self) -> usize {
    self.used.load(Ordering::Acquire)
  }

  pub fn stats(&self) -> DeviceStats {
    let c = &self.counters;
    DeviceStats {
      allocations: c.allocations.load(Ordering::Relaxed),
      frees: c.frees.load(Ordering::Relaxed),
      host_to_device: c.host_to_device.load(Ordering::Relaxed),
      device_to_host: c.device_to_host.load(Ordering::Relaxed),
      device_to_device: c.device_to_device.load(Ordering::Relaxed),
      fills: c.fills.load(Ordering::Relaxed),
      launches: c.launches.load(Ordering::Relaxed),
      synchronizations: c.synchronizations.load(Ordering::Relaxed),
    }
  }

  fn reserve(&self, bytes: usize) -> Result<(), DeviceError> {
    self
      .used
      .fetch_update(Ordering::AcqRel, Ordering::Acquire, |used| {
        used
          .checked_add(bytes)
          .filter(|&total| total <= self.capacity)
      })
      .map(|_| ())
      .map_err(|used| DeviceError::OutOfMemory {
        requested: bytes,
        available: self.capacity.saturating_sub(used),
      })
  }
}

impl DeviceRuntime for EmulatedDevice {
  fn name(&self) -> &str {
    "emulated"
  }

  fn malloc(&self, layout: Layout) -> Result<NonNull<u8>, DeviceError> {
    if let Err(e) = self.reserve(layout.size()) {
      warn!("模拟设备分配失败: {}", e);
      return Err(e);
    }

    // SAFETY: 缓冲区只为非零大小的 layout 申请内存
    let ptr = unsafe { std::alloc::alloc_zeroed(layout) };
    match NonNull::new(ptr) {
      Some(ptr) => {
        bump(&self.counters.allocations);
        Ok(ptr)
      }
      None => {
        self.used.fetch_sub(layout.size(), Ordering::AcqRel);
        Err(DeviceError::OutOfMemory {
          requested: layout.size(),
          available: self.capacity.saturating_sub(self.used()),
        })
      }
    }
  }

  unsafe fn free(&self, ptr: NonNull<u8>, layout: Layout) {
    unsafe { std::alloc::dealloc(ptr.as_ptr(), layout) };
    self.used.fetch_sub(layout.size(), Ordering::AcqRel);
    bump(&self.counters.frees);
  }

  unsafe fn memcpy(
    &self,
    dst: *mut u8,
    src: *const u8,
    bytes: usize,
    kind: CopyKind,
  ) -> Result<(), DeviceError> {
    bump(match kind {
      CopyKind::HostToDevice => &self.counters.host_to_device,
      CopyKind::DeviceToHost => &self.counters.device_to_host,
      CopyKind::DeviceToDevice => &self.counters.device_to_device,
    });
    unsafe { std::ptr::copy_nonoverlapping(src, dst, bytes) };
    Ok(())
  }

  unsafe fn memset_pattern(
    &self,
    dst: *mut u8,
    pattern: &[u8],
    count: usize,
  ) -> Result<(), DeviceError> {
    bump(&self.counters.fills);
    unsafe { fill_pattern(dst, pattern, count) };
    Ok(())
  }

  unsafe fn launch(&self, kernel: Kernel) -> Result<(), DeviceError> {
    bump(&self.counters.launches);
    unsafe { kernel.execute() }.map_err(|e| DeviceError::Kernel(Box::new(e)))
  }

  fn synchronize(&self) -> Result<(), DeviceError> {
    bump(&self.counters.synchronizations);
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn allocation_respects_capacity() {
    let device = EmulatedDevice::new(100);
    let layout = Layout::array::<u8>(60).unwrap();
    let first = device.malloc(layout).unwrap();
    assert_eq!(device.used(), 60);

    let err = device.malloc(layout).unwrap_err();
    assert!(matches!(
      err,
      DeviceError::OutOfMemory {
        requested: 60,
        available: 40
      }
    ));

    unsafe { device.free(first, layout) };
    assert_eq!(device.used(), 0);
    assert!(device.malloc(Layout::array::<u8>(100).unwrap()).is_ok());
  }

  #[test]
  fn copies_are_counted_by_kind() {
    let device = EmulatedDevice::new(1024);
    let layout = Layout::array::<u8>(4).unwrap();
    let a = device.malloc(layout).unwrap();
    let b = device.malloc(layout).unwrap();
    let host = [1u8, 2, 3, 4];
    let mut back = [0u8; 4];
    unsafe {
      device
        .memcpy(a.as_ptr(), host.as_ptr(), 4, CopyKind::HostToDevice)
        .unwrap();
      device
        .memcpy(b.as_ptr(), a.as_ptr(), 4, CopyKind::DeviceToDevice)
        .unwrap();
      device
        .memcpy(back.as_mut_ptr(), b.as_ptr(), 4, CopyKind::DeviceToHost)
        .unwrap();
      device.free(a, layout);
      device.free(b, layout);
    }
    assert_eq!(back, host);
    let stats = device.stats();
    assert_eq!(stats.host_to_device, 1);
    assert_eq!(stats.device_to_device, 1);
    assert_eq!(stats.device_to_host, 1);
    assert_eq!(stats.allocations, 2);
    assert_eq!(stats.frees, 2);
  }
}

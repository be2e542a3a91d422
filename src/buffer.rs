// 该文件是 Zitai （姿态） 项目的一部分。
// src/buffer.rs - 多维引用计数缓冲区
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

use thiserror::Error;
use tracing::debug;

use crate::device::DeviceError;

mod frame;
pub(crate) mod location;

pub use self::frame::IMAGE_CHANNELS;
pub use self::location::{Device, Host, Location};

/// 主机内存缓冲区
pub type HostBuffer<T> = Buffer<T, Host>;
/// 设备内存缓冲区
pub type DeviceBuffer<T> = Buffer<T, Device>;

#[derive(Error, Debug)]
pub enum BufferError {
  #[error("维度索引越界: [{first}, {last}] 超出 {dimensions} 维")]
  Index {
    first: usize,
    last: usize,
    dimensions: usize,
  },
  #[error("维度区间颠倒: {first} > {last}")]
  InvertedRange { first: usize, last: usize },
  #[error("{location} 内存分配失败: {bytes} 字节")]
  Allocation { location: &'static str, bytes: usize },
  #[error("形状不匹配: 期望 {expected} 个元素, 实际 {actual} 个")]
  ShapeMismatch { expected: usize, actual: usize },
  #[error("无效缩放因子: {0}")]
  InvalidScale(f64),
  #[error("图像为空或形状不是 [H, W, 3]")]
  EmptyImage,
  #[error("缓冲区不在同一存储位置")]
  LocationMismatch,
  #[error("设备错误: {0}")]
  Device(#[from] DeviceError),
}

mod sealed {
  pub trait Sealed {}
}

/// 可存放在缓冲区中的元素类型，均为无填充的纯数据类型。
pub trait Element:
  sealed::Sealed + Copy + Default + PartialEq + fmt::Debug + Send + Sync + 'static
{
}

macro_rules! element {
  ($($ty:ty),* $(,)?) => {
    $(
      impl sealed::Sealed for $ty {}
      impl Element for $ty {}
    )*
  };
}

element!(u8, i8, u16, i16, u32, i32, u64, i64, f32, f64);

pub(crate) fn bytes_of<T: Element>(value: &T) -> &[u8] {
  // SAFETY: Element 只为无填充的基本数值类型实现
  unsafe { std::slice::from_raw_parts((value as *const T).cast::<u8>(), size_of::<T>()) }
}

fn checked_volume(shape: &[usize]) -> Option<usize> {
  if shape.is_empty() {
    return Some(0);
  }
  shape.iter().try_fold(1usize, |acc, &dim| acc.checked_mul(dim))
}

/// 一块连续内存，最后一个句柄释放时按所在位置的策略回收。
struct Block<T: Element, L: Location> {
  ptr: NonNull<T>,
  layout: Layout,
  location: L,
}

impl<T: Element, L: Location> Block<T, L> {
  fn allocate(location: &L, len: usize) -> Result<Self, BufferError> {
    let layout = Layout::array::<T>(len).map_err(|_| BufferError::Allocation {
      location: location.name(),
      bytes: len.saturating_mul(size_of::<T>()),
    })?;
    let ptr = location.allocate(layout)?;
    Ok(Self {
      ptr: ptr.cast(),
      layout,
      location: location.clone(),
    })
  }
}

impl<T: Element, L: Location> Drop for Block<T, L> {
  fn drop(&mut self) {
    // SAFETY: ptr 与 layout 来自同一位置的 allocate，且只释放一次
    unsafe { self.location.release(self.ptr.cast(), self.layout) }
  }
}

// SAFETY: Block 只持有纯数据元素的内存，安全接口只写入独占的块，共享的块只读
unsafe impl<T: Element, L: Location> Send for Block<T, L> {}
unsafe impl<T: Element, L: Location> Sync for Block<T, L> {}

/// 带形状的多维缓冲区。
///
/// `Clone` 只复制句柄，新旧句柄以只读方式共享同一块内存（引用计数）；需要独立副本时使用
/// [`Buffer::deep_clone`] 或 [`Buffer::copy_to`]。安全接口的写操作遇到共享内存时先换到
/// 独占的新块，因此共享句柄读到的内容不会在其下被改写。
pub struct Buffer<T: Element, L: Location> {
  shape: Vec<usize>,
  volume: usize,
  block: Option<Arc<Block<T, L>>>,
  location: L,
}

impl<T: Element, L: Location> Buffer<T, L> {
  pub fn new(location: L) -> Self {
    Self {
      shape: Vec::new(),
      volume: 0,
      block: None,
      location,
    }
  }

  pub fn with_shape(location: L, shape: &[usize]) -> Result<Self, BufferError> {
    let mut buffer = Self::new(location);
    buffer.reset(shape)?;
    Ok(buffer)
  }

  pub fn filled(location: L, shape: &[usize], value: T) -> Result<Self, BufferError> {
    let mut buffer = Self::new(location);
    buffer.reset_with(shape, value)?;
    Ok(buffer)
  }

  /// 从主机切片创建缓冲区，数据会被上传到 `location`。
  pub fn from_slice(location: L, shape: &[usize], data: &[T]) -> Result<Self, BufferError> {
    let expected = checked_volume(shape).ok_or(BufferError::Allocation {
      location: location.name(),
      bytes: usize::MAX,
    })?;
    if expected != data.len() {
      return Err(BufferError::ShapeMismatch {
        expected,
        actual: data.len(),
      });
    }

    let mut buffer = Self::with_shape(location, shape)?;
    if !buffer.is_empty() {
      let dst = buffer.as_mut_ptr().cast::<u8>();
      // SAFETY: 新块独占且恰好容纳 data.len() 个元素
      unsafe {
        let src = std::slice::from_raw_parts(data.as_ptr().cast::<u8>(), size_of_val(data));
        buffer.location.upload(dst, src)?;
      }
    }
    Ok(buffer)
  }

  /// 重新分配内存。
  ///
  /// 新内存的内容未指定。只有在新块分配成功后才会替换旧块，失败时缓冲区保持原状。
  /// 形状为空或含有零维时释放内存，缓冲区变为空。
  pub fn reset(&mut self, shape: &[usize]) -> Result<(), BufferError> {
    let volume = checked_volume(shape).ok_or(BufferError::Allocation {
      location: self.location.name(),
      bytes: usize::MAX,
    })?;
    if volume == 0 {
      self.release();
      return Ok(());
    }

    let block = Block::allocate(&self.location, volume)?;
    debug!(
      "在 {} 上分配缓冲区: 形状 {:?}, 共 {} 个元素",
      self.location.name(),
      shape,
      volume
    );
    self.shape = shape.to_vec();
    self.volume = volume;
    self.block = Some(Arc::new(block));
    Ok(())
  }

  pub fn reset_1d(&mut self, size: usize) -> Result<(), BufferError> {
    self.reset(&[size])
  }

  pub fn reset_with(&mut self, shape: &[usize], value: T) -> Result<(), BufferError> {
    self.reset(shape)?;
    self.set_to(value)
  }

  pub fn reset_1d_with(&mut self, size: usize, value: T) -> Result<(), BufferError> {
    self.reset_with(&[size], value)
  }

  /// 放弃本句柄对内存的引用。
  pub fn release(&mut self) {
    self.shape.clear();
    self.volume = 0;
    self.block = None;
  }

  /// 将每个元素置为 `value`。
  ///
  /// 本句柄与其他句柄共享内存时先换到新块，其他句柄看到的内容不变。
  pub fn set_to(&mut self, value: T) -> Result<(), BufferError> {
    if self.volume == 0 {
      return Ok(());
    }
    if self.handle_count() > 1 {
      let shape = self.shape.clone();
      self.reset(&shape)?;
    }
    let count = self.volume;
    let dst = self.as_mut_ptr().cast::<u8>();
    // SAFETY: dst 指向 count 个 T
    unsafe { self.location.fill(dst, bytes_of(&value), count) }
  }

  /// 深拷贝：新的独立内存块，内容与当前缓冲区相同。
  pub fn deep_clone(&self) -> Result<Self, BufferError> {
    let mut other = Self::new(self.location.clone());
    self.copy_to(&mut other)?;
    Ok(other)
  }

  /// 把内容复制到 `dst`。
  ///
  /// 元素数量不同或 `dst` 与其他句柄共享内存时，`dst` 先重新分配，随后采用本缓冲区的形状。
  /// 复制在所在位置内部完成，设备缓冲区之间不经过主机内存。两个缓冲区必须属于同一存储位置。
  pub fn copy_to(&self, dst: &mut Self) -> Result<(), BufferError> {
    self.check_same_location(dst)?;
    if self.is_empty() {
      dst.release();
      return Ok(());
    }
    if self.shares_block_with(dst) {
      dst.shape.clone_from(&self.shape);
      return Ok(());
    }

    if dst.volume != self.volume || dst.handle_count() > 1 {
      dst.reset(&self.shape)?;
    } else {
      dst.shape.clone_from(&self.shape);
    }
    let bytes = self.volume * size_of::<T>();
    // SAFETY: 两块内存各自容纳 volume 个 T，且互不重叠
    unsafe {
      self
        .location
        .copy(dst.as_mut_ptr().cast(), self.as_ptr().cast(), bytes)
    }
  }

  /// 本句柄与其他句柄共享内存时，复制出一块独占的内存（内容不变）。
  ///
  /// 写入之前调用，保证其他句柄看到的内容不会改变。
  pub fn make_unique(&mut self) -> Result<(), BufferError> {
    if self.handle_count() <= 1 {
      return Ok(());
    }
    let mut copy = Self::new(self.location.clone());
    self.copy_to(&mut copy)?;
    *self = copy;
    Ok(())
  }

  /// `other` 与本缓冲区是否位于同一存储位置，不同位置之间不能直接复制或执行内核。
  pub fn check_same_location<U: Element>(&self, other: &Buffer<U, L>) -> Result<(), BufferError> {
    if self.location.same_as(&other.location) {
      Ok(())
    } else {
      Err(BufferError::LocationMismatch)
    }
  }

  /// 转移所有权，本句柄变为空。
  pub fn take(&mut self) -> Self {
    let empty = Self::new(self.location.clone());
    std::mem::replace(self, empty)
  }

  /// 下载全部元素到主机。
  pub fn to_vec(&self) -> Result<Vec<T>, BufferError> {
    let mut data = vec![T::default(); self.volume];
    if self.volume > 0 {
      // SAFETY: data 与块的大小一致
      unsafe {
        let dst =
          std::slice::from_raw_parts_mut(data.as_mut_ptr().cast::<u8>(), size_of_val(&data[..]));
        self.location.download(dst, self.as_ptr().cast())?;
      }
    }
    Ok(data)
  }

  /// 复制到另一个位置（主机到设备即上传，设备到主机即下载）。
  pub fn transfer_to<M: Location>(&self, location: M) -> Result<Buffer<T, M>, BufferError> {
    let data = self.to_vec()?;
    Buffer::from_slice(location, &self.shape, &data)
  }

  #[inline]
  pub fn is_empty(&self) -> bool {
    self.volume == 0
  }

  #[inline]
  pub fn shape(&self) -> &[usize] {
    &self.shape
  }

  /// 第 `dim` 维的大小：超出维数时返回 1，空缓冲区返回 0。
  pub fn size(&self, dim: usize) -> usize {
    match self.shape.get(dim) {
      Some(&size) => size,
      None => usize::from(!self.shape.is_empty()),
    }
  }

  #[inline]
  pub fn num_dimensions(&self) -> usize {
    self.shape.len()
  }

  #[inline]
  pub fn volume(&self) -> usize {
    self.volume
  }

  /// 第 `first` 到第 `last` 维（含）的元素数量。
  pub fn volume_range(&self, first: usize, last: usize) -> Result<usize, BufferError> {
    if first > last {
      return Err(BufferError::InvertedRange { first, last });
    }
    if last >= self.shape.len() {
      return Err(BufferError::Index {
        first,
        last,
        dimensions: self.shape.len(),
      });
    }
    Ok(self.shape[first..=last].iter().product())
  }

  /// 倒数第二维，即张量的高。
  pub fn height(&self) -> usize {
    match self.shape.len() {
      0 | 1 => 0,
      n => self.shape[n - 2],
    }
  }

  /// 最后一维，即张量的宽。
  pub fn width(&self) -> usize {
    match self.shape.len() {
      0 | 1 => 0,
      n => self.shape[n - 1],
    }
  }

  #[inline]
  pub fn as_ptr(&self) -> *const T {
    self
      .block
      .as_ref()
      .map_or(std::ptr::null(), |block| block.ptr.as_ptr().cast_const())
  }

  /// 可写指针。
  ///
  /// 通过它写入前，本句柄必须独占内存（见 [`Buffer::make_unique`]），否则是未定义行为。
  #[inline]
  pub fn as_mut_ptr(&mut self) -> *mut T {
    self
      .block
      .as_ref()
      .map_or(std::ptr::null_mut(), |block| block.ptr.as_ptr())
  }

  #[inline]
  pub fn location(&self) -> &L {
    &self.location
  }

  pub fn shares_block_with(&self, other: &Self) -> bool {
    match (&self.block, &other.block) {
      (Some(a), Some(b)) => Arc::ptr_eq(a, b),
      _ => false,
    }
  }

  /// 共享同一块内存的句柄数量，空缓冲区为 0。
  pub fn handle_count(&self) -> usize {
    self.block.as_ref().map_or(0, Arc::strong_count)
  }
}

impl<T: Element> Buffer<T, Host> {
  pub fn from_vec(shape: &[usize], data: Vec<T>) -> Result<Self, BufferError> {
    Self::from_slice(Host, shape, &data)
  }

  pub fn as_slice(&self) -> &[T] {
    match &self.block {
      // SAFETY: 主机块容纳 volume 个已初始化的 T
      Some(block) => unsafe { std::slice::from_raw_parts(block.ptr.as_ptr(), self.volume) },
      None => &[],
    }
  }

  /// 仅当本句柄独占内存时返回可变切片。
  pub fn get_mut(&mut self) -> Option<&mut [T]> {
    let volume = self.volume;
    match &mut self.block {
      Some(block) => {
        let block = Arc::get_mut(block)?;
        // SAFETY: 独占句柄，且块容纳 volume 个 T
        Some(unsafe { std::slice::from_raw_parts_mut(block.ptr.as_ptr(), volume) })
      }
      None => Some(&mut []),
    }
  }

  /// 可变切片，不检查其他句柄。
  ///
  /// # Safety
  ///
  /// 返回的切片存活期间，不得通过其他共享句柄读写同一块内存。
  pub unsafe fn as_mut_slice_unchecked(&mut self) -> &mut [T] {
    match &self.block {
      Some(block) => unsafe { std::slice::from_raw_parts_mut(block.ptr.as_ptr(), self.volume) },
      None => &mut [],
    }
  }
}

impl<T: Element, L: Location> Clone for Buffer<T, L> {
  fn clone(&self) -> Self {
    Self {
      shape: self.shape.clone(),
      volume: self.volume,
      block: self.block.clone(),
      location: self.location.clone(),
    }
  }
}

impl<T: Element, L: Location + Default> Default for Buffer<T, L> {
  fn default() -> Self {
    Self::new(L::default())
  }
}

impl<T: Element, L: Location> fmt::Debug for Buffer<T, L> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Buffer")
      .field("location", &self.location.name())
      .field("shape", &self.shape)
      .field("volume", &self.volume)
      .field("handles", &self.handle_count())
      .finish()
  }
}

// 该文件是 Zitai （姿态） 项目的一部分。
// src/format.rs - 网络输入输出格式化
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

use thiserror::Error;

use crate::{buffer::BufferError, config::ConfigError, device::DeviceError};

mod input;
mod output;

pub use self::input::InputFormatter;
pub use self::output::OutputFormatter;

#[derive(Error, Debug)]
pub enum FormatError {
  #[error("输入错误: {0}")]
  Input(String),
  #[error("配置错误: {0}")]
  Configuration(String),
  #[error("输出错误: {0}")]
  Output(String),
  #[error(transparent)]
  Buffer(#[from] BufferError),
}

/// 错误分类，供流水线框架决定如何上报。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
  Input,
  Configuration,
  Index,
  Allocation,
  Output,
}

impl FormatError {
  pub fn kind(&self) -> ErrorKind {
    match self {
      FormatError::Input(_) => ErrorKind::Input,
      FormatError::Configuration(_) => ErrorKind::Configuration,
      FormatError::Output(_) => ErrorKind::Output,
      FormatError::Buffer(e) => buffer_kind(e),
    }
  }
}

fn buffer_kind(error: &BufferError) -> ErrorKind {
  match error {
    BufferError::Index { .. } | BufferError::InvertedRange { .. } | BufferError::ShapeMismatch { .. } => {
      ErrorKind::Index
    }
    BufferError::Allocation { .. } | BufferError::Device(DeviceError::OutOfMemory { .. }) => {
      ErrorKind::Allocation
    }
    BufferError::EmptyImage => ErrorKind::Input,
    BufferError::InvalidScale(_) | BufferError::LocationMismatch => ErrorKind::Configuration,
    BufferError::Device(DeviceError::Kernel(inner)) => buffer_kind(inner),
    BufferError::Device(_) => ErrorKind::Output,
  }
}

impl From<ConfigError> for FormatError {
  fn from(err: ConfigError) -> Self {
    FormatError::Configuration(err.to_string())
  }
}

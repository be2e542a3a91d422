// 该文件是 Zitai （姿态） 项目的一部分。
// src/config.rs - 格式化器配置
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

//! 输入输出格式化器的构建器。
//!
//! 构建器可以直接设置，也可以从 URL 解析：
//!
//! ```no_run
//! use zitai::{FromUrl, Host, config::InputFormatterBuilder};
//! use url::Url;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let url = Url::parse("netinput:?net=656x368&scales=2&gap=0.3")?;
//! let formatter = InputFormatterBuilder::from_url(&url)?.build(Host)?;
//! # Ok(())
//! # }
//! ```

use std::collections::HashMap;

use thiserror::Error;
use tracing::{debug, error};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  buffer::Location,
  format::{InputFormatter, OutputFormatter},
  geometry::{BorderMode, ParseSizeError, Size},
};

const NET_ALIGNMENT: u32 = 16;

#[derive(Error, Debug)]
pub enum ConfigError {
  #[error("URL 方案不匹配: 期望 '{expected}', 实际 '{found}'")]
  SchemeMismatch { expected: &'static str, found: String },
  #[error(transparent)]
  InvalidResolution(#[from] ParseSizeError),
  #[error("网络分辨率 {0} 的宽和高必须是 16 的正整数倍")]
  NotMultipleOf16(Size),
  #[error("输出分辨率 {0} 不能为空")]
  EmptyResolution(Size),
  #[error("尺度数量必须至少为 1, 实际为 {0}")]
  InvalidScaleNumber(usize),
  #[error("多尺度时尺度间隔必须大于 0, 实际为 {0}")]
  InvalidScaleGap(f64),
  #[error("参数 '{key}' 的值 '{value}' 无效")]
  InvalidValue { key: String, value: String },
}

fn check_scheme<T: FromUrlWithScheme>(url: &Url) -> Result<(), ConfigError> {
  if url.scheme() != T::SCHEME {
    error!(
      "URL 方案不匹配: 期望 '{}', 实际 '{}'",
      T::SCHEME,
      url.scheme()
    );
    return Err(ConfigError::SchemeMismatch {
      expected: T::SCHEME,
      found: url.scheme().to_string(),
    });
  }
  Ok(())
}

fn parse_value<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
  value.trim().parse().map_err(|_| ConfigError::InvalidValue {
    key: key.to_string(),
    value: value.to_string(),
  })
}

/// `replicate`，或者 `R,G,B` 形式的填充颜色
fn parse_border(value: &str) -> Result<BorderMode, ConfigError> {
  if value.eq_ignore_ascii_case("replicate") {
    return Ok(BorderMode::Replicate);
  }
  let channels = value
    .split(',')
    .map(|c| parse_value::<u8>("border", c))
    .collect::<Result<Vec<_>, _>>()?;
  match channels.as_slice() {
    &[r, g, b] => Ok(BorderMode::Constant([r, g, b])),
    _ => Err(ConfigError::InvalidValue {
      key: "border".to_string(),
      value: value.to_string(),
    }),
  }
}

/// 输入格式化器构建器，默认网络分辨率 656x368、单尺度、尺度间隔 0.25。
#[derive(Debug, Clone, PartialEq)]
pub struct InputFormatterBuilder {
  net_size: Size,
  scale_number: usize,
  scale_gap: f64,
  border: BorderMode,
}

impl Default for InputFormatterBuilder {
  fn default() -> Self {
    Self {
      net_size: Size::new(656, 368),
      scale_number: 1,
      scale_gap: 0.25,
      border: BorderMode::default(),
    }
  }
}

impl FromUrl for InputFormatterBuilder {
  type Error = ConfigError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    check_scheme::<Self>(url)?;

    let query: HashMap<_, _> = url.query_pairs().collect();
    let mut builder = Self::default();
    if let Some(net) = query.get("net") {
      builder.net_size = net.parse()?;
    }
    if let Some(scales) = query.get("scales") {
      builder.scale_number = parse_value("scales", scales)?;
    }
    if let Some(gap) = query.get("gap") {
      builder.scale_gap = parse_value("gap", gap)?;
    }
    if let Some(border) = query.get("border") {
      builder.border = parse_border(border)?;
    }
    debug!("输入格式化配置: {:?}", builder);
    Ok(builder)
  }
}

impl FromUrlWithScheme for InputFormatterBuilder {
  const SCHEME: &'static str = "netinput";
}

impl InputFormatterBuilder {
  pub fn net_size(mut self, net_size: Size) -> Self {
    self.net_size = net_size;
    self
  }

  pub fn scale_number(mut self, scale_number: usize) -> Self {
    self.scale_number = scale_number;
    self
  }

  pub fn scale_gap(mut self, scale_gap: f64) -> Self {
    self.scale_gap = scale_gap;
    self
  }

  pub fn border(mut self, border: BorderMode) -> Self {
    self.border = border;
    self
  }

  pub fn validate(&self) -> Result<(), ConfigError> {
    let aligned = |len: u32| len > 0 && len % NET_ALIGNMENT == 0;
    if !aligned(self.net_size.width) || !aligned(self.net_size.height) {
      return Err(ConfigError::NotMultipleOf16(self.net_size));
    }
    if self.scale_number == 0 {
      return Err(ConfigError::InvalidScaleNumber(self.scale_number));
    }
    if self.scale_number > 1 && !(self.scale_gap > 0.0) {
      return Err(ConfigError::InvalidScaleGap(self.scale_gap));
    }
    Ok(())
  }

  pub fn build<L: Location>(self, location: L) -> Result<InputFormatter<L>, ConfigError> {
    self.validate().inspect_err(|e| error!("输入格式化配置无效: {}", e))?;
    debug!(
      "创建输入格式化器: 网络分辨率 {}, {} 个尺度, 间隔 {}, 位置 {}",
      self.net_size,
      self.scale_number,
      self.scale_gap,
      location.name()
    );
    Ok(
      InputFormatter::new(location, self.net_size, self.scale_number, self.scale_gap)
        .with_border(self.border),
    )
  }
}

/// 输出格式化器构建器，默认输出分辨率 1280x720 并生成输出。
#[derive(Debug, Clone, PartialEq)]
pub struct OutputFormatterBuilder {
  output_size: Size,
  generate_output: bool,
  border: BorderMode,
}

impl Default for OutputFormatterBuilder {
  fn default() -> Self {
    Self {
      output_size: Size::new(1280, 720),
      generate_output: true,
      border: BorderMode::default(),
    }
  }
}

impl FromUrl for OutputFormatterBuilder {
  type Error = ConfigError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    check_scheme::<Self>(url)?;

    let query: HashMap<_, _> = url.query_pairs().collect();
    let mut builder = Self::default();
    if let Some(size) = query.get("size") {
      builder.output_size = size.parse()?;
    }
    if let Some(generate) = query.get("generate") {
      builder.generate_output = parse_value("generate", generate)?;
    }
    if let Some(border) = query.get("border") {
      builder.border = parse_border(border)?;
    }
    debug!("输出格式化配置: {:?}", builder);
    Ok(builder)
  }
}

impl FromUrlWithScheme for OutputFormatterBuilder {
  const SCHEME: &'static str = "netoutput";
}

impl OutputFormatterBuilder {
  pub fn output_size(mut self, output_size: Size) -> Self {
    self.output_size = output_size;
    self
  }

  pub fn generate_output(mut self, generate_output: bool) -> Self {
    self.generate_output = generate_output;
    self
  }

  pub fn border(mut self, border: BorderMode) -> Self {
    self.border = border;
    self
  }

  pub fn build<L: Location>(self, location: L) -> Result<OutputFormatter<L>, ConfigError> {
    if self.output_size.is_empty() {
      error!("输出分辨率 {} 不能为空", self.output_size);
      return Err(ConfigError::EmptyResolution(self.output_size));
    }
    Ok(OutputFormatter::new(location, self.output_size, self.generate_output).with_border(self.border))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::buffer::Host;

  fn url(s: &str) -> Url {
    Url::parse(s).unwrap()
  }

  #[test]
  fn input_defaults() {
    let formatter = InputFormatterBuilder::default().build(Host).unwrap();
    assert_eq!(formatter.net_size(), Size::new(656, 368));
    assert_eq!(formatter.scale_number(), 1);
    assert_eq!(formatter.scale_gap(), 0.25);
  }

  #[test]
  fn input_from_url() {
    let builder =
      InputFormatterBuilder::from_url(&url("netinput:?net=368x368&scales=2&gap=0.3&border=replicate"))
        .unwrap();
    let formatter = builder.build(Host).unwrap();
    assert_eq!(formatter.net_size(), Size::new(368, 368));
    assert_eq!(formatter.tensor_shape(), [2, 3, 368, 368]);
    assert_eq!(formatter.scale_gap(), 0.3);
  }

  #[test]
  fn scheme_is_checked() {
    let err = InputFormatterBuilder::from_url(&url("netoutput:?size=8x8")).unwrap_err();
    assert!(matches!(
      err,
      ConfigError::SchemeMismatch {
        expected: "netinput",
        ..
      }
    ));
  }

  #[test]
  fn net_size_must_be_aligned() {
    for net in [Size::new(650, 368), Size::new(656, 0), Size::new(0, 0)] {
      let err = InputFormatterBuilder::default().net_size(net).build(Host).unwrap_err();
      assert!(matches!(err, ConfigError::NotMultipleOf16(_)));
    }
  }

  #[test]
  fn gap_required_for_multiple_scales() {
    let builder = InputFormatterBuilder::default().scale_number(3);
    for gap in [0.0, -0.25, f64::NAN] {
      let err = builder.clone().scale_gap(gap).build(Host).unwrap_err();
      assert!(matches!(err, ConfigError::InvalidScaleGap(_)));
    }
    assert!(InputFormatterBuilder::default().scale_gap(0.0).build(Host).is_ok());
    assert!(matches!(
      InputFormatterBuilder::default().scale_number(0).build(Host),
      Err(ConfigError::InvalidScaleNumber(0))
    ));
  }

  #[test]
  fn malformed_values_are_reported() {
    assert!(matches!(
      InputFormatterBuilder::from_url(&url("netinput:?net=656")),
      Err(ConfigError::InvalidResolution(_))
    ));
    assert!(matches!(
      InputFormatterBuilder::from_url(&url("netinput:?scales=two")),
      Err(ConfigError::InvalidValue { .. })
    ));
    assert!(matches!(
      OutputFormatterBuilder::from_url(&url("netoutput:?border=1,2")),
      Err(ConfigError::InvalidValue { .. })
    ));
  }

  #[test]
  fn output_from_url() {
    let formatter =
      OutputFormatterBuilder::from_url(&url("netoutput:?size=640x480&generate=false&border=9,9,9"))
        .unwrap()
        .build(Host)
        .unwrap();
    assert_eq!(formatter.output_size(), Size::new(640, 480));
    assert!(!formatter.generate_output());

    let err = OutputFormatterBuilder::default()
      .output_size(Size::new(0, 480))
      .build(Host)
      .unwrap_err();
    assert!(matches!(err, ConfigError::EmptyResolution(_)));
  }
}

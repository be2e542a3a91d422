// 该文件是 Zitai （姿态） 项目的一部分。
// src/bin/simple_roundtrip.rs - 输入输出格式化往返测试
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

use std::{path::PathBuf, sync::Arc};

use anyhow::{Result, bail};
use clap::Parser;
use image::ImageReader;
use tracing::info;
use url::Url;

use zitai::{
  Device, DeviceBuffer, FromUrl,
  config::{InputFormatterBuilder, OutputFormatterBuilder},
  device::EmulatedDevice,
};

/// 把一张图像上传到模拟设备，生成网络输入张量与输出张量，再把输出张量保存为图像
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 输入图像路径
  #[arg(long, value_name = "IMAGE")]
  pub input: PathBuf,
  /// 输出图像路径
  #[arg(long, value_name = "IMAGE")]
  pub output: PathBuf,
  /// 网络输入配置
  #[arg(long, value_name = "URL", default_value = "netinput:?net=656x368&scales=1&gap=0.3")]
  pub net: Url,
  /// 显示输出配置
  #[arg(long, value_name = "URL", default_value = "netoutput:?size=1280x720&generate=true")]
  pub display: Url,
  /// 模拟设备容量（MiB）
  #[arg(long, value_name = "MIB", default_value_t = 256)]
  pub device_memory: usize,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  info!("输入图像: {}", args.input.display());
  info!("输出图像: {}", args.output.display());
  info!("网络输入配置: {}", args.net);
  info!("显示输出配置: {}", args.display);

  let runtime = Arc::new(EmulatedDevice::new(args.device_memory << 20));
  let device = Device::new(runtime.clone());

  let mut input_formatter = InputFormatterBuilder::from_url(&args.net)?.build(device.clone())?;
  let mut output_formatter =
    OutputFormatterBuilder::from_url(&args.display)?.build(device.clone())?;
  if !output_formatter.generate_output() {
    bail!("显示输出配置未启用输出生成, 无法保存图像");
  }

  let image = ImageReader::open(&args.input)?.decode()?.to_rgb8();
  info!("图像尺寸: {}x{}", image.width(), image.height());
  let frame = DeviceBuffer::from_image(device.clone(), &image)?;

  let now = std::time::Instant::now();
  let mut net_input = DeviceBuffer::new(device.clone());
  let scales = input_formatter.format(&frame, &mut net_input)?;
  info!(
    "网络输入张量 {:?}, 各尺度缩放因子 {:?}, 耗时 {:.2?}",
    net_input.shape(),
    scales,
    now.elapsed()
  );

  let now = std::time::Instant::now();
  let mut rendered = DeviceBuffer::new(device.clone());
  let scale = output_formatter.format(&frame, &mut rendered)?;
  let mut display = DeviceBuffer::new(device);
  output_formatter.format_to_image(&rendered, &mut display)?;
  info!(
    "输出张量 {:?}, 缩放因子 {:.4}, 耗时 {:.2?}",
    rendered.shape(),
    scale,
    now.elapsed()
  );

  display.to_image()?.save(&args.output)?;
  info!("已保存到 {}", args.output.display());

  let stats = runtime.stats();
  info!(
    "设备统计: 分配 {} 次, 内核 {} 次, 同步 {} 次, 上传 {} 次, 下载 {} 次, 占用 {} 字节",
    stats.allocations,
    stats.launches,
    stats.synchronizations,
    stats.host_to_device,
    stats.device_to_host,
    runtime.used()
  );

  Ok(())
}

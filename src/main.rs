// 该文件是 Jianzhi （鉴质） 项目的一部分。
// src/main.rs - 实时检验控制台
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

mod args;
mod console;

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use jianzhi::FromUrl;
use jianzhi::analysis::{AnalysisClient, AnalyzerWrapper};
use jianzhi::capture::V4l2Camera;
use jianzhi::config::{REPAINT_INTERVAL, SessionConfig};
use jianzhi::output::SnapshotOutput;
use jianzhi::overlay::{ImageSurface, OverlayRenderer, RepaintLoop, load_font};
use jianzhi::session::{SessionController, SessionHandle, SessionNotice};
use jianzhi::stats::shared_store;

use console::{ConsoleCommand, HELP, format_result, format_stats};

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
    .init();

  let args = args::Args::parse();

  info!("摄像头: {}", args.camera);
  info!("分析服务: {}", args.analyzer);
  if let Some(record) = &args.record {
    info!("快照输出: {}", record);
  }

  let camera = V4l2Camera::from_url(&args.camera).context("摄像头配置错误")?;
  let analyzer = AnalyzerWrapper::from_url(&args.analyzer)
    .context("分析服务配置错误")?
    .with_api_key(args.api_key.clone());
  let font = args
    .font
    .as_ref()
    .map(load_font)
    .transpose()
    .context("无法加载字体")?;
  let output = args
    .record
    .as_ref()
    .map(SnapshotOutput::from_url)
    .transpose()
    .context("快照输出配置错误")?
    .map(|output| match &font {
      Some(font) => output.with_font(font.clone()),
      None => output,
    });

  let config =
    SessionConfig::default().with_auto_scan_delay(Duration::from_secs(args.auto_scan_secs));
  let store = shared_store(config.history_capacity);
  let client = Arc::new(AnalysisClient::new(analyzer));
  let (controller, handle, mut notices) = SessionController::new(config, camera, client, store);
  let session = tokio::spawn(controller.run());

  // 叠加层重绘
  let shutdown = CancellationToken::new();
  let surface = Arc::new(Mutex::new(ImageSurface::new(0, 0, font)));
  let display = match args.display {
    Some(size) => watch::channel((size.width, size.height)).1,
    None => handle.video_size(),
  };
  let repaint = tokio::spawn(
    RepaintLoop::new(OverlayRenderer::default(), surface.clone(), REPAINT_INTERVAL).run(
      handle.subscribe(),
      display,
      shutdown.clone(),
    ),
  );

  if args.auto_start {
    report(handle.start_camera().await?.status_line());
  }

  println!("Jianzhi 实时检验控制台");
  println!("======================");
  println!("{}", HELP);

  let mut lines = BufReader::new(tokio::io::stdin()).lines();
  loop {
    tokio::select! {
      line = lines.next_line() => {
        let Some(line) = line.context("读取标准输入失败")? else {
          info!("标准输入已关闭");
          break;
        };
        if line.trim().is_empty() {
          continue;
        }
        match line.parse::<ConsoleCommand>() {
          Ok(ConsoleCommand::Quit) => break,
          Ok(command) => execute(command, &handle, output.as_ref(), &surface).await?,
          Err(e) => println!("{}", e),
        }
      }
      Some(notice) = notices.recv() => match notice {
        SessionNotice::CameraDenied(reason) => {
          println!("无法使用摄像头进行实时检验，请检查设备权限: {}", reason);
        }
        SessionNotice::ResultSettled(result) => println!("{}", format_result(&result)),
      },
      _ = tokio::signal::ctrl_c() => {
        info!("收到中断信号");
        break;
      }
    }
  }

  handle.shutdown().await.ok();
  shutdown.cancel();
  let (session, repaint) = tokio::join!(session, repaint);
  session.context("会话任务异常退出")?;
  repaint.context("重绘任务异常退出")?;

  let stats = handle.dashboard().snapshot();
  println!("{}", format_stats(&stats));
  Ok(())
}

fn report(status: String) {
  println!("状态: {}", status);
}

async fn execute(
  command: ConsoleCommand,
  handle: &SessionHandle,
  output: Option<&SnapshotOutput>,
  surface: &Mutex<ImageSurface>,
) -> Result<()> {
  match command {
    ConsoleCommand::Start => report(handle.start_camera().await?.status_line()),
    ConsoleCommand::Stop => report(handle.stop_camera().await?.status_line()),
    ConsoleCommand::Capture => {
      let before = handle.state();
      let after = handle.capture().await?;
      if !before.camera_active {
        println!("摄像头未打开，请先执行 start");
      } else if after.analysis_in_flight && !before.analysis_in_flight {
        println!("正在分析...");
      }
    }
    ConsoleCommand::ToggleAuto => report(handle.toggle_auto_scan().await?.status_line()),
    ConsoleCommand::File(path) => {
      if handle.inspect_file(path).await?.analysis_in_flight {
        println!("正在分析...");
      }
    }
    ConsoleCommand::Stats => println!("{}", format_stats(&handle.dashboard().snapshot())),
    ConsoleCommand::History(n) => {
      let history = handle.dashboard().recent(n);
      if history.is_empty() {
        println!("暂无检验记录");
      }
      for result in history {
        println!("{}", format_result(&result));
      }
    }
    ConsoleCommand::Snapshot => {
      let Some(output) = output else {
        println!("未配置 --record，无法保存快照");
        return Ok(());
      };
      let Some(result) = handle.state().last_result else {
        println!("暂无检验结果");
        return Ok(());
      };
      let saved = {
        let live = surface.lock().unwrap_or_else(PoisonError::into_inner);
        output.save_live(&result, &live)
      };
      match saved {
        Ok(path) => println!("快照已保存: {}", path.display()),
        Err(e) => warn!("保存快照失败: {}", e),
      }
    }
    ConsoleCommand::Help => println!("{}", HELP),
    ConsoleCommand::Quit => {}
  }
  Ok(())
}

// 该文件是 Jianzhi （鉴质） 项目的一部分。
// src/console.rs - 操作员控制台命令
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::path::PathBuf;
use std::str::FromStr;

use jianzhi::inspection::InspectionResult;
use jianzhi::stats::AggregateStats;
use thiserror::Error;

const DEFAULT_HISTORY: usize = 10;

pub const HELP: &str = "\
命令:
  start            打开摄像头
  stop             关闭摄像头
  capture | c      采集并分析当前画面
  auto             切换自动扫描
  file <path>      分析图像文件
  stats            显示统计
  history [n]      显示最近 n 条结果（默认 10）
  snapshot         保存最近结果的标注快照
  help             显示本帮助
  quit             退出";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
  Start,
  Stop,
  Capture,
  ToggleAuto,
  File(PathBuf),
  Stats,
  History(usize),
  Snapshot,
  Help,
  Quit,
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConsoleParseError {
  #[error("空命令")]
  Empty,
  #[error("未知命令 '{0}'，输入 help 查看可用命令")]
  Unknown(String),
  #[error("file 命令需要文件路径")]
  MissingPath,
  #[error("无效的条数 '{0}'")]
  InvalidCount(String),
}

impl FromStr for ConsoleCommand {
  type Err = ConsoleParseError;

  fn from_str(line: &str) -> Result<Self, Self::Err> {
    let line = line.trim();
    let (verb, rest) = match line.split_once(char::is_whitespace) {
      Some((verb, rest)) => (verb, rest.trim()),
      None => (line, ""),
    };

    match verb.to_ascii_lowercase().as_str() {
      "" => Err(ConsoleParseError::Empty),
      "start" => Ok(ConsoleCommand::Start),
      "stop" => Ok(ConsoleCommand::Stop),
      "capture" | "c" => Ok(ConsoleCommand::Capture),
      "auto" => Ok(ConsoleCommand::ToggleAuto),
      "file" if rest.is_empty() => Err(ConsoleParseError::MissingPath),
      "file" => Ok(ConsoleCommand::File(PathBuf::from(rest))),
      "stats" => Ok(ConsoleCommand::Stats),
      "history" if rest.is_empty() => Ok(ConsoleCommand::History(DEFAULT_HISTORY)),
      "history" => rest
        .parse()
        .map(ConsoleCommand::History)
        .map_err(|_| ConsoleParseError::InvalidCount(rest.to_string())),
      "snapshot" => Ok(ConsoleCommand::Snapshot),
      "help" | "?" => Ok(ConsoleCommand::Help),
      "quit" | "exit" | "q" => Ok(ConsoleCommand::Quit),
      other => Err(ConsoleParseError::Unknown(other.to_string())),
    }
  }
}

/// 单条结果的摘要行
pub fn format_result(result: &InspectionResult) -> String {
  let mut text = format!(
    "[{}] {} {} {}",
    result.local_time(),
    result.id,
    result.product_label,
    result.verdict()
  );
  for defect in &result.defects {
    text.push_str(&format!(
      "\n    - {} ({}): {}",
      defect.kind,
      defect.severity.as_str(),
      defect.description
    ));
  }
  text
}

pub fn format_stats(stats: &AggregateStats) -> String {
  let mut text = format!(
    "已检验 {} 件，合格 {}，不合格 {}，良品率 {:.1}%",
    stats.total_inspected,
    stats.passed,
    stats.failed,
    stats.yield_rate() * 100.0
  );
  for bucket in &stats.defect_trend_buckets {
    text.push_str(&format!("\n    {:<10} {}", bucket.label, bucket.count));
  }
  text
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn commands_parse() {
    assert_eq!("start".parse(), Ok(ConsoleCommand::Start));
    assert_eq!("  C ".parse(), Ok(ConsoleCommand::Capture));
    assert_eq!("auto".parse(), Ok(ConsoleCommand::ToggleAuto));
    assert_eq!(
      "file /tmp/part 7.jpg".parse(),
      Ok(ConsoleCommand::File(PathBuf::from("/tmp/part 7.jpg")))
    );
    assert_eq!("history".parse(), Ok(ConsoleCommand::History(10)));
    assert_eq!("history 3".parse(), Ok(ConsoleCommand::History(3)));
    assert_eq!("exit".parse(), Ok(ConsoleCommand::Quit));
  }

  #[test]
  fn bad_commands_are_reported() {
    assert_eq!("".parse::<ConsoleCommand>(), Err(ConsoleParseError::Empty));
    assert_eq!(
      "file".parse::<ConsoleCommand>(),
      Err(ConsoleParseError::MissingPath)
    );
    assert_eq!(
      "history many".parse::<ConsoleCommand>(),
      Err(ConsoleParseError::InvalidCount("many".into()))
    );
    assert!(matches!(
      "launch".parse::<ConsoleCommand>(),
      Err(ConsoleParseError::Unknown(_))
    ));
  }

  #[test]
  fn stats_summary_lists_buckets() {
    let text = format_stats(&AggregateStats::default());
    assert!(text.starts_with("已检验 0 件"));
    assert!(text.contains("Scratches"));
    assert!(text.contains("Label"));
  }
}

// 该文件是 Jianzhi （鉴质） 项目的一部分。
// src/stats.rs - 检验统计汇总
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use tracing::{debug, warn};

use crate::config::HISTORY_CAPACITY;
use crate::inspection::{InspectionResult, InspectionStatus};

/// 缺陷趋势分类：(显示名称, 匹配关键字)
///
/// 关键字为词干，使 "Hairline Scratch" 也能计入 "Scratches"。
pub const TREND_BUCKETS: [(&str, &str); 5] = [
  ("Scratches", "scratch"),
  ("Misalign", "misalign"),
  ("Color", "color"),
  ("Cracks", "crack"),
  ("Label", "label"),
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrendBucket {
  pub label: &'static str,
  pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateStats {
  pub total_inspected: u64,
  pub passed: u64,
  pub failed: u64,
  pub defect_trend_buckets: Vec<TrendBucket>,
}

impl Default for AggregateStats {
  fn default() -> Self {
    Self {
      total_inspected: 0,
      passed: 0,
      failed: 0,
      defect_trend_buckets: TREND_BUCKETS
        .iter()
        .map(|(label, _)| TrendBucket {
          label: *label,
          count: 0,
        })
        .collect(),
    }
  }
}

impl AggregateStats {
  /// 良品率（0-1），尚无检验时为 0
  pub fn yield_rate(&self) -> f64 {
    if self.total_inspected == 0 {
      0.0
    } else {
      self.passed as f64 / self.total_inspected as f64
    }
  }

  pub fn bucket(&self, label: &str) -> Option<u64> {
    self
      .defect_trend_buckets
      .iter()
      .find(|b| b.label == label)
      .map(|b| b.count)
  }
}

/// 汇总存储：有界历史记录与累计统计
///
/// 历史按插入顺序最新在前，超出容量时淘汰最早插入的记录。
#[derive(Debug)]
pub struct AggregationStore {
  stats: AggregateStats,
  history: VecDeque<Arc<InspectionResult>>,
  capacity: usize,
}

impl Default for AggregationStore {
  fn default() -> Self {
    Self::with_capacity(HISTORY_CAPACITY)
  }
}

impl AggregationStore {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with_capacity(capacity: usize) -> Self {
    Self {
      stats: AggregateStats::default(),
      history: VecDeque::with_capacity(capacity),
      capacity,
    }
  }

  pub fn record(&mut self, result: Arc<InspectionResult>) {
    match result.status {
      InspectionStatus::Pass => {
        self.stats.total_inspected += 1;
        self.stats.passed += 1;
      }
      InspectionStatus::Fail => {
        self.stats.total_inspected += 1;
        self.stats.failed += 1;
        self.count_trends(&result);
      }
      InspectionStatus::Pending => {
        warn!("结果 {} 尚未给出结论，不计入统计", result.id);
      }
    }

    self.history.push_front(result);
    self.history.truncate(self.capacity);
    debug!(
      "统计已更新: 共 {} 件, 合格 {}, 不合格 {}",
      self.stats.total_inspected, self.stats.passed, self.stats.failed
    );
  }

  fn count_trends(&mut self, result: &InspectionResult) {
    for defect in &result.defects {
      let kind = defect.kind.to_lowercase();
      for (bucket, (_, keyword)) in self
        .stats
        .defect_trend_buckets
        .iter_mut()
        .zip(TREND_BUCKETS.iter())
      {
        if kind.contains(keyword) {
          bucket.count += 1;
        }
      }
    }
  }

  /// 最近的 `n` 条结果，最新在前
  pub fn recent(&self, n: usize) -> Vec<Arc<InspectionResult>> {
    self.history.iter().take(n).cloned().collect()
  }

  pub fn history(&self) -> Vec<Arc<InspectionResult>> {
    self.history.iter().cloned().collect()
  }

  pub fn snapshot(&self) -> AggregateStats {
    self.stats.clone()
  }

  pub fn len(&self) -> usize {
    self.history.len()
  }

  pub fn is_empty(&self) -> bool {
    self.history.is_empty()
  }
}

/// 会话与看板共享的汇总存储
pub type SharedStore = Arc<Mutex<AggregationStore>>;

pub fn shared_store(capacity: usize) -> SharedStore {
  Arc::new(Mutex::new(AggregationStore::with_capacity(capacity)))
}

pub(crate) fn lock_store(store: &SharedStore) -> MutexGuard<'_, AggregationStore> {
  store.lock().unwrap_or_else(PoisonError::into_inner)
}

/// 看板与历史视图的只读查询
#[derive(Clone)]
pub struct Dashboard {
  store: SharedStore,
}

impl Dashboard {
  pub fn new(store: SharedStore) -> Self {
    Self { store }
  }

  pub fn recent(&self, n: usize) -> Vec<Arc<InspectionResult>> {
    lock_store(&self.store).recent(n)
  }

  pub fn history(&self) -> Vec<Arc<InspectionResult>> {
    lock_store(&self.store).history()
  }

  pub fn snapshot(&self) -> AggregateStats {
    lock_store(&self.store).snapshot()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::inspection::{Defect, EncodedImage, ImageRef, Severity};
  use chrono::Utc;
  use image::RgbImage;

  fn result(id: usize, status: InspectionStatus, kinds: &[&str]) -> Arc<InspectionResult> {
    let image = EncodedImage::encode_jpeg(&RgbImage::new(2, 2), 80).unwrap();
    Arc::new(InspectionResult {
      id: format!("QC-{}", id),
      captured_at: Utc::now(),
      status,
      confidence: 0.9,
      defects: kinds
        .iter()
        .map(|k| Defect {
          kind: k.to_string(),
          description: String::new(),
          severity: Severity::Low,
          bounding_box: None,
        })
        .collect(),
      image_ref: ImageRef::new(image),
      product_label: "Gear".into(),
    })
  }

  #[test]
  fn history_is_bounded_and_newest_first() {
    let mut store = AggregationStore::new();
    for i in 0..51 {
      store.record(result(i, InspectionStatus::Pass, &[]));
    }
    assert_eq!(store.len(), 50);
    let history = store.history();
    assert_eq!(history[0].id, "QC-50");
    assert_eq!(history[49].id, "QC-1");
    assert!(history.iter().all(|r| r.id != "QC-0"));
    assert_eq!(store.snapshot().total_inspected, 51);
  }

  #[test]
  fn totals_always_balance() {
    let mut store = AggregationStore::new();
    for i in 0..17 {
      let status = if i % 3 == 0 {
        InspectionStatus::Fail
      } else {
        InspectionStatus::Pass
      };
      store.record(result(i, status, &["Crack"]));
      let stats = store.snapshot();
      assert_eq!(stats.total_inspected, stats.passed + stats.failed);
    }
  }

  #[test]
  fn failed_scratch_counts_once() {
    let mut store = AggregationStore::new();
    store.record(result(1, InspectionStatus::Fail, &["Hairline Scratch"]));
    let stats = store.snapshot();
    assert_eq!(stats.bucket("Scratches"), Some(1));
    assert_eq!(
      stats.defect_trend_buckets.iter().map(|b| b.count).sum::<u64>(),
      1
    );
  }

  #[test]
  fn passed_results_leave_trends_alone() {
    let mut store = AggregationStore::new();
    store.record(result(1, InspectionStatus::Pass, &["Hairline Scratch", "Crack"]));
    let stats = store.snapshot();
    assert!(stats.defect_trend_buckets.iter().all(|b| b.count == 0));
    assert_eq!(stats.passed, 1);
  }

  #[test]
  fn one_defect_may_hit_several_buckets() {
    let mut store = AggregationStore::new();
    store.record(result(1, InspectionStatus::Fail, &["Label color mismatch", "Dent"]));
    let stats = store.snapshot();
    assert_eq!(stats.bucket("Label"), Some(1));
    assert_eq!(stats.bucket("Color"), Some(1));
    assert_eq!(stats.bucket("Cracks"), Some(0));
  }

  #[test]
  fn recent_returns_prefix() {
    let mut store = AggregationStore::new();
    for i in 0..5 {
      store.record(result(i, InspectionStatus::Fail, &[]));
    }
    let ids: Vec<_> = store.recent(2).iter().map(|r| r.id.clone()).collect();
    assert_eq!(ids, vec!["QC-4", "QC-3"]);
    assert_eq!(store.recent(10).len(), 5);
  }

  #[test]
  fn yield_rate_handles_empty_store() {
    let mut store = AggregationStore::new();
    assert_eq!(store.snapshot().yield_rate(), 0.0);
    store.record(result(1, InspectionStatus::Pass, &[]));
    store.record(result(2, InspectionStatus::Fail, &[]));
    assert_eq!(store.snapshot().yield_rate(), 0.5);
  }
}

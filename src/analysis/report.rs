// 该文件是 Jianzhi （鉴质） 项目的一部分。
// src/analysis/report.rs - 分析服务响应格式
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

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::warn;

use crate::inspection::{
  BoundingBox, Defect, ImageRef, InspectionResult, InspectionStatus, Severity,
};

/// 分析服务未给出产品类型时使用的占位名称
pub const DEFAULT_PRODUCT_LABEL: &str = "Detected Item";
/// 分析失败时的产品名称
pub const FALLBACK_PRODUCT_LABEL: &str = "Unknown Asset";

/// 发送给分析服务的固定任务说明
pub const ANALYSIS_INSTRUCTION: &str = "Act as a specialized industrial quality control vision system with autonomous product recognition.
1. Identify the specific type of manufactured product or component in this image.
2. Identify any visual defects such as scratches, cracks, misalignments, label issues, or color inconsistencies.
3. For each defect found, provide its location as a bounding box [ymin, xmin, ymax, xmax] using normalized coordinates from 0 to 1000.
4. Determine if the product should PASS or FAIL quality standards based on general industrial excellence.
Return the results in the specified JSON format.";

/// 分析服务给出的结论，仅接受 PASS / FAIL
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum ReportStatus {
  #[serde(rename = "PASS", alias = "pass", alias = "Pass")]
  Pass,
  #[serde(rename = "FAIL", alias = "fail", alias = "Fail")]
  Fail,
}

impl From<ReportStatus> for InspectionStatus {
  fn from(status: ReportStatus) -> Self {
    match status {
      ReportStatus::Pass => InspectionStatus::Pass,
      ReportStatus::Fail => InspectionStatus::Fail,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportDefect {
  #[serde(rename = "type")]
  pub kind: String,
  pub description: String,
  pub severity: String,
  #[serde(default)]
  pub bounding_box: Option<Vec<f64>>,
}

impl ReportDefect {
  fn into_defect(self) -> Defect {
    let bounding_box = match self.bounding_box.as_deref() {
      Some(values) => {
        let bbox = BoundingBox::from_slice(values);
        if bbox.is_none() {
          warn!(
            "缺陷 {} 的边界框包含 {} 个坐标，按无定位处理",
            self.kind,
            values.len()
          );
        }
        bbox
      }
      None => None,
    };

    Defect {
      severity: Severity::from_label(&self.severity),
      kind: self.kind,
      description: self.description,
      bounding_box,
    }
  }
}

/// 分析服务的结构化响应
///
/// 只做结构校验：`status`、`confidence`、`defects` 及每个缺陷的
/// `type`、`description`、`severity` 必须存在。
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisReport {
  #[serde(default)]
  pub product_type: Option<String>,
  pub status: ReportStatus,
  pub confidence: f32,
  pub defects: Vec<ReportDefect>,
}

impl AnalysisReport {
  pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
    serde_json::from_str(text)
  }

  /// 分析失败时替代的结果
  pub fn fallback() -> Self {
    Self {
      product_type: Some(FALLBACK_PRODUCT_LABEL.to_string()),
      status: ReportStatus::Fail,
      confidence: 0.0,
      defects: vec![ReportDefect {
        kind: "Error".to_string(),
        description: "Could not analyze image".to_string(),
        severity: "high".to_string(),
        bounding_box: None,
      }],
    }
  }

  pub fn into_result(
    self,
    id: String,
    captured_at: DateTime<Utc>,
    image_ref: ImageRef,
  ) -> InspectionResult {
    let product_label = self
      .product_type
      .map(|p| p.trim().to_string())
      .filter(|p| !p.is_empty())
      .unwrap_or_else(|| DEFAULT_PRODUCT_LABEL.to_string());

    let confidence = if self.confidence.is_finite() {
      self.confidence.clamp(0.0, 1.0)
    } else {
      0.0
    };

    InspectionResult {
      id,
      captured_at,
      status: self.status.into(),
      confidence,
      defects: self.defects.into_iter().map(ReportDefect::into_defect).collect(),
      image_ref,
      product_label,
    }
  }
}

/// 响应格式声明
pub fn response_schema() -> Value {
  json!({
    "type": "OBJECT",
    "properties": {
      "productType": {
        "type": "STRING",
        "description": "The identified category of the product (e.g., 'Circuit Board', 'Machined Part', etc.)"
      },
      "status": {
        "type": "STRING",
        "description": "PASS or FAIL status based on quality control standards."
      },
      "confidence": {
        "type": "NUMBER",
        "description": "Confidence score from 0 to 1."
      },
      "defects": {
        "type": "ARRAY",
        "items": {
          "type": "OBJECT",
          "properties": {
            "type": { "type": "STRING" },
            "description": { "type": "STRING" },
            "severity": { "type": "STRING", "description": "low, medium, or high" },
            "boundingBox": {
              "type": "ARRAY",
              "items": { "type": "NUMBER" },
              "description": "[ymin, xmin, ymax, xmax] coordinates from 0-1000"
            }
          },
          "required": ["type", "description", "severity"]
        }
      }
    },
    "required": ["productType", "status", "confidence", "defects"]
  })
}

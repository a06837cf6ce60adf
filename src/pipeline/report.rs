use serde::Serialize;
use std::fmt;
use tracing::{debug, info, warn};

use crate::crawler::Paper;

/// 单篇论文会失败的阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Download,
    Render,
    Compose,
    Delivery,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Download => "下载",
            Stage::Render => "截图",
            Stage::Compose => "组装",
            Stage::Delivery => "发送",
        };
        write!(f, "{}", name)
    }
}

/// 某篇论文在某个阶段的失败记录
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageFailure {
    pub paper_id: String,
    pub stage: Stage,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum PaperOutcome {
    /// 邮件已发出
    Delivered { screenshot: bool, ai_summary: bool },
    /// 在该阶段失败，未发送
    Skipped { stage: Stage },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PaperEntry {
    pub paper_id: String,
    pub title: String,
    pub outcome: PaperOutcome,
}

/// 一次运行的结果汇总
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunReport {
    pub found: usize,
    pub entries: Vec<PaperEntry>,
    pub failures: Vec<StageFailure>,
}

impl RunReport {
    pub fn record_failure(&mut self, paper_id: &str, stage: Stage, reason: impl Into<String>) {
        let reason = reason.into();
        warn!("论文 {} 在{}阶段失败: {}", paper_id, stage, reason);
        self.failures.push(StageFailure {
            paper_id: paper_id.to_string(),
            stage,
            reason,
        });
    }

    pub fn record_outcome(&mut self, paper_id: &str, title: &str, outcome: PaperOutcome) {
        self.entries.push(PaperEntry {
            paper_id: paper_id.to_string(),
            title: title.to_string(),
            outcome,
        });
    }

    /// 记录失败，并把论文标记为在该阶段跳过
    pub fn record_skip(&mut self, paper: &Paper, stage: Stage, reason: impl Into<String>) {
        self.record_failure(&paper.id, stage, reason);
        self.record_outcome(&paper.id, &paper.title, PaperOutcome::Skipped { stage });
    }

    pub fn delivered(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| matches!(e.outcome, PaperOutcome::Delivered { .. }))
            .count()
    }

    /// 已发出但缺少截图或使用了简化概括
    pub fn partial(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| {
                matches!(
                    e.outcome,
                    PaperOutcome::Delivered { screenshot, ai_summary } if !screenshot || !ai_summary
                )
            })
            .count()
    }

    pub fn skipped(&self) -> usize {
        self.entries.len() - self.delivered()
    }

    pub fn failures_for(&self, paper_id: &str) -> Vec<&StageFailure> {
        self.failures
            .iter()
            .filter(|f| f.paper_id == paper_id)
            .collect()
    }

    /// 逐篇写入日志：完整处理、部分处理或跳过及原因
    pub fn log(&self) {
        info!(
            "📊 处理汇总: 发现 {} 篇，发送 {} 篇（其中部分处理 {} 篇），跳过 {} 篇",
            self.found,
            self.delivered(),
            self.partial(),
            self.skipped()
        );

        for entry in &self.entries {
            let id = &entry.paper_id;
            match entry.outcome {
                PaperOutcome::Skipped { stage } => warn!("❌ {} 在{}阶段跳过", id, stage),
                PaperOutcome::Delivered {
                    screenshot: true,
                    ai_summary: true,
                } => info!("✅ {} 完整处理", id),
                PaperOutcome::Delivered {
                    screenshot,
                    ai_summary,
                } => {
                    let shot = if screenshot { "有" } else { "无" };
                    let ai = if ai_summary { "有" } else { "简化版" };
                    info!("⚠️ {} 部分处理 (截图: {}, AI概括: {})", id, shot, ai);
                }
            }
        }
        for failure in &self.failures {
            let (id, stage) = (&failure.paper_id, failure.stage);
            warn!("  {} [{}] {}", id, stage, failure.reason);
        }

        if let Ok(json) = serde_json::to_string(self) {
            debug!("运行报告: {}", json);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn paper(id: &str) -> Paper {
        Paper {
            id: id.to_string(),
            title: id.to_uppercase(),
            authors: Vec::new(),
            abstract_text: String::new(),
            published: Utc::now(),
            categories: Default::default(),
            pdf_url: String::new(),
            abs_url: String::new(),
        }
    }

    #[test]
    fn counts_by_outcome() {
        let mut report = RunReport {
            found: 3,
            ..Default::default()
        };
        let complete = PaperOutcome::Delivered {
            screenshot: true,
            ai_summary: true,
        };
        let partial = PaperOutcome::Delivered {
            screenshot: false,
            ai_summary: true,
        };
        report.record_outcome("a", "A", complete);
        report.record_outcome("b", "B", partial);
        report.record_failure("b", Stage::Download, "404");
        report.record_skip(&paper("c"), Stage::Compose, "font");

        assert_eq!(report.delivered(), 2);
        assert_eq!(report.partial(), 1);
        assert_eq!(report.skipped(), 1);
        assert_eq!(report.failures_for("b")[0].stage, Stage::Download);
        assert!(report.failures_for("a").is_empty());

        let skipped = &report.entries[2];
        assert_eq!(skipped.title, "C");
        assert_eq!(
            skipped.outcome,
            PaperOutcome::Skipped {
                stage: Stage::Compose
            }
        );
    }
}

//! 单次运行的处理流程：检索 → 下载 → 截图 → 概括 → 组装 → 发送。
//!
//! 论文逐篇顺序处理。每篇论文的阶段失败在这里被捕获并记录，然后继续下一篇；
//! 只有检索失败和邮件认证失败会终止整个运行。

pub mod report;

pub use report::{PaperEntry, PaperOutcome, RunReport, Stage, StageFailure};

use chrono::Local;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::analyzer::{fallback_summary, Analyzer, ChatClient, SummarizeResult, Summary};
use crate::composer::html::render_daily_summary;
use crate::composer::{ComposedMessage, Composer};
use crate::config::AppConfig;
use crate::crawler::{ArxivCrawler, Paper, SearchError};
use crate::mailer::{DeliveryError, MailTransport, SmtpMailer};
use crate::pdf::render::PdfiumRenderer;
use crate::pdf::{DownloadedArtifact, PdfProcessor};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("论文检索失败: {0}")]
    Search(#[from] SearchError),

    #[error("邮件认证失败，停止本次运行: {0}")]
    MailAuth(DeliveryError),
}

pub struct Pipeline {
    config: AppConfig,
    crawler: ArxivCrawler,
    pdf: PdfProcessor,
    analyzer: Analyzer,
    composer: Composer,
    mailer: Box<dyn MailTransport>,
}

impl Pipeline {
    pub fn new(
        config: AppConfig,
        crawler: ArxivCrawler,
        pdf: PdfProcessor,
        analyzer: Analyzer,
        composer: Composer,
        mailer: Box<dyn MailTransport>,
    ) -> Self {
        Self {
            config,
            crawler,
            pdf,
            analyzer,
            composer,
            mailer,
        }
    }

    /// 按配置创建真实的网络、渲染和 SMTP 组件
    pub fn from_config(config: AppConfig) -> anyhow::Result<Self> {
        let crawler = ArxivCrawler::new(&config.search)?;
        let renderer = Arc::new(PdfiumRenderer::new(config.pdf.pdfium_library_path.clone()));
        let pdf = PdfProcessor::new(&config.pdf, renderer)?;
        let analyzer = Analyzer::new(Box::new(ChatClient::new(config.analyzer.clone())?));
        let composer = Composer::new(&config.composer, pdf.download_dir());
        let mailer = Box::new(SmtpMailer::new(&config.mail)?);

        Ok(Self::new(config, crawler, pdf, analyzer, composer, mailer))
    }

    /// 执行一次完整流程
    pub async fn run(&self) -> Result<RunReport, PipelineError> {
        let today = Local::now().format("%Y-%m-%d").to_string();
        info!("🚀 开始执行论文推送任务: {}", today);

        let mut report = RunReport::default();

        // 去重集合只在本次运行内有效
        let mut seen = HashSet::new();
        let papers = match self.crawler.search(&self.config.search, &mut seen).await {
            Ok(papers) => papers,
            Err(e) => {
                error!("❌ 论文检索失败，终止运行: {}", e);
                return Err(e.into());
            }
        };
        report.found = papers.len();

        if papers.is_empty() {
            info!("今天没有找到符合条件的新论文");
        }

        for (index, paper) in papers.iter().enumerate() {
            info!(
                "📄 处理第 {}/{} 篇论文: {} - {}",
                index + 1,
                papers.len(),
                paper.id,
                paper.title
            );

            if let Err(e) = self.process_paper(paper, &today, &mut report).await {
                let remaining = papers.len() - index - 1;
                error!("❌ 邮件认证失败，剩余 {} 篇论文不再发送", remaining);
                report.log();
                return Err(PipelineError::MailAuth(e));
            }
        }

        if self.config.mail.send_daily_summary {
            self.send_daily_summary(&today, &mut report).await?;
        }

        report.log();
        info!(
            "🎉 任务完成: 成功发送 {}/{} 篇论文",
            report.delivered(),
            report.found
        );
        Ok(report)
    }

    /// 处理单篇论文。只有认证失败会作为错误返回，其他失败都记入报告。
    async fn process_paper(
        &self,
        paper: &Paper,
        today: &str,
        report: &mut RunReport,
    ) -> Result<(), DeliveryError> {
        let artifact = self.acquire(paper, report).await;
        let screenshot = artifact.as_ref().and_then(|a| a.screenshot_path.clone());

        let summary = self.summarize(paper).await;

        let shot = screenshot.as_deref();
        let message = match self.composer.compose(paper, &summary, shot, today) {
            Ok(message) => message,
            Err(e) => {
                report.record_skip(paper, Stage::Compose, e.to_string());
                return Ok(());
            }
        };

        match self.mailer.send(&message).await {
            Ok(()) => {
                info!("✅ 论文处理完成: {}", paper.id);
                report.record_outcome(
                    &paper.id,
                    &paper.title,
                    PaperOutcome::Delivered {
                        screenshot: screenshot.is_some(),
                        ai_summary: summary.ai_generated,
                    },
                );
                Ok(())
            }
            Err(e) => {
                report.record_skip(paper, Stage::Delivery, e.to_string());
                if e.is_auth() {
                    Err(e)
                } else {
                    Ok(())
                }
            }
        }
    }

    /// 下载 PDF 并渲染首页。失败时记录并返回 None 或不含截图的结果。
    async fn acquire(&self, paper: &Paper, report: &mut RunReport) -> Option<DownloadedArtifact> {
        let pdf_path: PathBuf = match self.pdf.download(paper).await {
            Ok(path) => path,
            Err(e) => {
                report.record_failure(&paper.id, e.stage(), e.to_string());
                return None;
            }
        };

        let screenshot_path = match self.pdf.screenshot(paper, &pdf_path).await {
            Ok(path) => Some(path),
            Err(e) => {
                report.record_failure(&paper.id, e.stage(), e.to_string());
                None
            }
        };

        let artifact = DownloadedArtifact {
            paper_id: paper.id.clone(),
            pdf_path,
            screenshot_path,
        };
        info!(
            "论文文件就绪 {}: PDF {}，截图 {}",
            artifact.paper_id,
            artifact.pdf_path.display(),
            artifact
                .screenshot_path
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "无".to_string())
        );
        Some(artifact)
    }

    async fn summarize(&self, paper: &Paper) -> Summary {
        match self.analyzer.summarize(paper).await {
            SummarizeResult::Ok(summary) => summary,
            SummarizeResult::Failed(reason) => {
                warn!("AI概括失败，使用简化概括 {}: {}", paper.id, reason);
                fallback_summary(paper)
            }
        }
    }

    async fn send_daily_summary(
        &self,
        today: &str,
        report: &mut RunReport,
    ) -> Result<(), PipelineError> {
        let message = ComposedMessage {
            paper_id: "daily-summary".to_string(),
            subject: format!("📊 ArXiv论文日报 - {}", today),
            html: render_daily_summary(today, report.found, report.delivered(), report.skipped()),
            inline_images: Vec::new(),
        };

        match self.mailer.send(&message).await {
            Ok(()) => {
                info!("📊 每日汇总邮件已发送");
                Ok(())
            }
            Err(e) if e.is_auth() => Err(PipelineError::MailAuth(e)),
            Err(e) => {
                warn!("每日汇总邮件发送失败: {}", e);
                Ok(())
            }
        }
    }
}

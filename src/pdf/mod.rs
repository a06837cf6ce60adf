pub mod render;

pub use render::{PageRenderer, PdfiumRenderer};

use image::imageops::FilterType;
use image::ImageFormat;
use lopdf::Document;
use reqwest::{header::CONTENT_TYPE, Client, StatusCode};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::config::PdfConfig;
use crate::crawler::Paper;
use crate::pipeline::Stage;

#[derive(Debug, Error)]
pub enum AcquireError {
    #[error("下载失败: {0}")]
    Download(#[from] reqwest::Error),

    #[error("下载失败，状态码: {0}")]
    Http(StatusCode),

    #[error("响应不是PDF (content-type: {0})")]
    NotPdf(String),

    #[error("IO错误: {0}")]
    Io(#[from] std::io::Error),

    #[error("PDF损坏: {0}")]
    Corrupt(#[from] lopdf::Error),

    #[error("PDF没有页面")]
    EmptyDocument,

    #[error("渲染失败: {0}")]
    Render(String),
}

impl AcquireError {
    /// 下载类错误与渲染类错误分别记入不同阶段
    pub fn stage(&self) -> Stage {
        match self {
            AcquireError::Download(_)
            | AcquireError::Http(_)
            | AcquireError::NotPdf(_)
            | AcquireError::Io(_) => Stage::Download,
            AcquireError::Corrupt(_) | AcquireError::EmptyDocument | AcquireError::Render(_) => {
                Stage::Render
            }
        }
    }
}

/// 下载目录中属于某篇论文的文件
#[derive(Debug, Clone, PartialEq)]
pub struct DownloadedArtifact {
    pub paper_id: String,
    pub pdf_path: PathBuf,
    pub screenshot_path: Option<PathBuf>,
}

pub struct PdfProcessor {
    client: Client,
    download_dir: PathBuf,
    screenshot_dir: PathBuf,
    screenshot_width: u32,
    renderer: Arc<dyn PageRenderer>,
}

impl PdfProcessor {
    pub fn new(config: &PdfConfig, renderer: Arc<dyn PageRenderer>) -> Result<Self, AcquireError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent("Mozilla/5.0 (compatible; arxiv2mail/0.1)")
            .build()?;

        let download_dir = PathBuf::from(&config.download_dir);
        let screenshot_dir = download_dir.join("screenshots");
        std::fs::create_dir_all(&screenshot_dir)?;

        Ok(Self {
            client,
            download_dir,
            screenshot_dir,
            screenshot_width: config.screenshot_width.max(1),
            renderer,
        })
    }

    pub fn download_dir(&self) -> &Path {
        &self.download_dir
    }

    /// 下载论文PDF。已存在且能正常解析的文件直接复用，损坏的文件删除后重新下载。
    pub async fn download(&self, paper: &Paper) -> Result<PathBuf, AcquireError> {
        let pdf_path = self.download_dir.join(format!("{}.pdf", paper.file_stem()));
        if tokio::fs::try_exists(&pdf_path).await.unwrap_or(false) {
            match count_pages(&pdf_path) {
                Ok(_) => {
                    info!("PDF已存在: {}", pdf_path.display());
                    return Ok(pdf_path);
                }
                Err(e) => {
                    warn!("已有PDF不可用，重新下载 {}: {}", pdf_path.display(), e);
                    tokio::fs::remove_file(&pdf_path).await?;
                }
            }
        }

        info!("下载PDF: {} -> {}", paper.pdf_url, pdf_path.display());
        let response = self.client.get(&paper.pdf_url).send().await?;

        let status = response.status();
        if !status.is_success() {
            error!("下载失败，状态码: {}", status);
            return Err(AcquireError::Http(status));
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();
        if !content_type.to_ascii_lowercase().contains("pdf") {
            return Err(AcquireError::NotPdf(content_type));
        }

        let bytes = response.bytes().await?;
        if !bytes.starts_with(b"%PDF") {
            return Err(AcquireError::NotPdf(format!("{}, 缺少 %PDF 文件头", content_type)));
        }

        // 先写临时文件再改名，中断的下载不会留下同名的半截文件
        let part_path = pdf_path.with_extension("pdf.part");
        tokio::fs::write(&part_path, &bytes).await?;
        tokio::fs::rename(&part_path, &pdf_path).await?;
        info!("PDF下载完成: {} ({} 字节)", pdf_path.display(), bytes.len());

        Ok(pdf_path)
    }

    /// 渲染首页为固定宽度的PNG截图，保持宽高比
    pub async fn screenshot(
        &self,
        paper: &Paper,
        pdf_path: &Path,
    ) -> Result<PathBuf, AcquireError> {
        let file_name = format!("{}.png", paper.file_stem());
        let screenshot_path = self.screenshot_dir.join(file_name);
        if tokio::fs::try_exists(&screenshot_path).await.unwrap_or(false) {
            if image::image_dimensions(&screenshot_path).is_ok() {
                info!("截图已存在: {}", screenshot_path.display());
                return Ok(screenshot_path);
            }
            warn!("已有截图无法读取，重新渲染: {}", screenshot_path.display());
            tokio::fs::remove_file(&screenshot_path)
                .await
                .map_err(|e| AcquireError::Render(format!("删除损坏截图失败: {}", e)))?;
        }

        let pages = count_pages(pdf_path)?;
        info!("PDF共 {} 页，渲染首页: {}", pages, pdf_path.display());

        let renderer = Arc::clone(&self.renderer);
        let width = self.screenshot_width;
        let pdf = pdf_path.to_path_buf();
        let out = screenshot_path.clone();

        tokio::task::spawn_blocking(move || -> Result<(), AcquireError> {
            let page = renderer
                .render_first_page(&pdf, width)
                .map_err(AcquireError::Render)?;

            if page.width() == 0 || page.height() == 0 {
                return Err(AcquireError::Render("渲染结果为空图片".to_string()));
            }

            let height = scaled_height(page.width(), page.height(), width);
            let page = if page.width() != width {
                page.resize_exact(width, height, FilterType::Lanczos3)
            } else {
                page
            };

            let part = out.with_extension("png.part");
            page.to_rgb8()
                .save_with_format(&part, ImageFormat::Png)
                .map_err(|e| AcquireError::Render(format!("保存截图失败: {}", e)))?;
            std::fs::rename(&part, &out)
                .map_err(|e| AcquireError::Render(format!("保存截图失败: {}", e)))?;
            Ok(())
        })
        .await
        .map_err(|e| AcquireError::Render(format!("渲染任务异常退出: {}", e)))??;

        info!("截图已生成: {}", screenshot_path.display());
        Ok(screenshot_path)
    }
}

/// 用 lopdf 打开文件统计页数，区分损坏文件和空文档
pub fn count_pages(pdf_path: &Path) -> Result<usize, AcquireError> {
    let document = Document::load(pdf_path)?;
    let pages = document.get_pages().len();
    if pages == 0 {
        return Err(AcquireError::EmptyDocument);
    }
    Ok(pages)
}

pub(crate) fn scaled_height(width: u32, height: u32, target_width: u32) -> u32 {
    let scaled =
        (u64::from(height) * u64::from(target_width) + u64::from(width) / 2) / u64::from(width);
    (scaled as u32).max(1)
}

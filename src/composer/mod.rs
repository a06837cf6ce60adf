//! 邮件内容组装：HTML 模式直接生成正文，图片模式把全部内容绘制成一张图片再内嵌。

pub mod html;
pub mod image;
pub mod text;

use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};

use self::html::{render_image_wrapper, render_paper_html, SCREENSHOT_CID, SUMMARY_IMAGE_CID};
use self::image::{FontSet, ImageComposer};
use crate::analyzer::Summary;
use crate::config::{ComposerConfig, OutputMode};
use crate::crawler::Paper;

#[derive(Debug, Error)]
pub enum ComposeError {
    #[error("字体不可用: {0}")]
    Font(String),

    #[error("图片处理失败: {0}")]
    Image(#[from] ::image::ImageError),

    #[error("文件读写失败: {0}")]
    Io(#[from] std::io::Error),
}

/// 按 Content-ID 引用的内嵌图片
#[derive(Debug, Clone)]
pub struct InlineImage {
    pub content_id: String,
    pub filename: String,
    pub bytes: Vec<u8>,
}

/// 一封待发送的邮件
#[derive(Debug, Clone)]
pub struct ComposedMessage {
    pub paper_id: String,
    pub subject: String,
    pub html: String,
    pub inline_images: Vec<InlineImage>,
}

/// `【AI论文分享】<日期>-<标题前30字>...`
pub fn subject(paper: &Paper, today: &str) -> String {
    let head: String = paper.title.chars().take(30).collect();
    if paper.title.chars().count() > 30 {
        format!("【AI论文分享】{}-{}...", today, head)
    } else {
        format!("【AI论文分享】{}-{}", today, head)
    }
}

pub struct Composer {
    mode: OutputMode,
    images: Option<Result<ImageComposer, String>>,
    output_dir: PathBuf,
}

impl Composer {
    /// 图片模式在这里加载字体；加载失败会在每篇论文组装时报告
    pub fn new(config: &ComposerConfig, download_dir: &Path) -> Self {
        let images = match config.mode {
            OutputMode::Html => None,
            OutputMode::Image => Some(
                FontSet::load(config.font_path.as_deref())
                    .map(ImageComposer::new)
                    .map_err(|e| {
                        warn!("图片模式字体加载失败: {}", e);
                        e.to_string()
                    }),
            ),
        };

        Self {
            mode: config.mode,
            images,
            output_dir: download_dir.join("generated_images"),
        }
    }

    pub fn mode(&self) -> OutputMode {
        self.mode
    }

    /// 图片模式下字体是否可用
    pub fn is_ready(&self) -> bool {
        !matches!(self.images, Some(Err(_)))
    }

    /// 组装一封邮件。截图读取失败时按“无截图”处理。
    pub fn compose(
        &self,
        paper: &Paper,
        summary: &Summary,
        screenshot: Option<&Path>,
        today: &str,
    ) -> Result<ComposedMessage, ComposeError> {
        let subject = subject(paper, today);

        match &self.images {
            Some(Err(reason)) => Err(ComposeError::Font(reason.clone())),
            Some(Ok(images)) => {
                let shot = screenshot.and_then(|path| match ::image::open(path) {
                    Ok(img) => Some(img),
                    Err(e) => {
                        warn!("截图读取失败，按无截图处理 {}: {}", path.display(), e);
                        None
                    }
                });

                let canvas = images.render(paper, summary, shot.as_ref(), today);

                std::fs::create_dir_all(&self.output_dir)?;
                let filename = format!("{}_summary.png", paper.file_stem());
                let path = self.output_dir.join(&filename);
                canvas.save(&path)?;
                info!("摘要图片已生成: {}", path.display());

                let bytes = std::fs::read(&path)?;
                Ok(ComposedMessage {
                    paper_id: paper.id.clone(),
                    subject,
                    html: render_image_wrapper(paper, today),
                    inline_images: vec![InlineImage {
                        content_id: SUMMARY_IMAGE_CID.to_string(),
                        filename,
                        bytes,
                    }],
                })
            }
            None => {
                let shot = screenshot.and_then(|path| match std::fs::read(path) {
                    Ok(bytes) if !bytes.is_empty() => Some(bytes),
                    Ok(_) => {
                        warn!("截图文件为空，按无截图处理: {}", path.display());
                        None
                    }
                    Err(e) => {
                        warn!("截图读取失败，按无截图处理 {}: {}", path.display(), e);
                        None
                    }
                });

                let html = render_paper_html(paper, summary, shot.is_some(), today);
                let inline_images = shot
                    .map(|bytes| InlineImage {
                        content_id: SCREENSHOT_CID.to_string(),
                        filename: format!("{}_page1.png", paper.file_stem()),
                        bytes,
                    })
                    .into_iter()
                    .collect();

                Ok(ComposedMessage {
                    paper_id: paper.id.clone(),
                    subject,
                    html,
                    inline_images,
                })
            }
        }
    }
}

use ab_glyph::{Font, FontVec, PxScale, ScaleFont};
use image::{imageops, DynamicImage, Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_text_mut, text_size};
use imageproc::rect::Rect;
use std::path::Path;
use tracing::{info, warn};

use super::html::format_authors;
use super::text::{wrap_text, TextMeasure};
use super::ComposeError;
use crate::analyzer::Summary;
use crate::crawler::Paper;

pub const CANVAS_WIDTH: u32 = 1080;
const MARGIN: u32 = 20;
const PADDING: u32 = 20;
const SECTION_SPACING: u32 = 15;
const BLOCK_GAP: u32 = 10;
const PREVIEW_BAR: u32 = 40;
pub const PREVIEW_MAX_HEIGHT: u32 = 1300;
pub const PLACEHOLDER_HEIGHT: u32 = 240;
const LINE_FACTOR: f32 = 1.4;

const TITLE_PX: f32 = 26.0;
const SUBTITLE_PX: f32 = 18.0;
const BODY_PX: f32 = 15.0;
const SMALL_PX: f32 = 14.0;

const BACKGROUND: Rgb<u8> = Rgb([0xf8, 0xfa, 0xfc]);
const CARD: Rgb<u8> = Rgb([0xff, 0xff, 0xff]);
const BAR: Rgb<u8> = Rgb([0xf1, 0xf5, 0xf9]);
const AI_CARD: Rgb<u8> = Rgb([0xf0, 0xfd, 0xf4]);
const HEADER_TEXT: Rgb<u8> = Rgb([0x1e, 0x29, 0x3b]);
const BODY_TEXT: Rgb<u8> = Rgb([0x47, 0x55, 0x69]);
const ACCENT: Rgb<u8> = Rgb([0x0e, 0xa5, 0xe9]);
const MUTED: Rgb<u8> = Rgb([0xa0, 0xa0, 0xa0]);

/// 依次尝试的中文字体
const FONT_CANDIDATES: &[&str] = &[
    "/usr/share/fonts/opentype/noto/NotoSansCJK-Regular.ttc",
    "/usr/share/fonts/noto-cjk/NotoSansCJK-Regular.ttc",
    "/usr/share/fonts/truetype/wqy/wqy-microhei.ttc",
    "/usr/share/fonts/truetype/wqy/wqy-zenhei.ttc",
    "/usr/share/fonts/truetype/arphic/uming.ttc",
    "/System/Library/Fonts/PingFang.ttc",
    "/System/Library/Fonts/Hiragino Sans GB.ttc",
    "C:/Windows/Fonts/msyh.ttc",
    "C:/Windows/Fonts/simhei.ttf",
    "./fonts/NotoSansCJK-Regular.ttc",
    "./fonts/wqy-microhei.ttc",
];

/// 用来判断字体能否显示中文的字符
const CJK_PROBE: char = '中';

pub struct FontSet {
    font: FontVec,
}

impl FontSet {
    /// 配置了字体时只用该文件，否则依次尝试候选列表。字体必须能显示中文。
    pub fn load(preferred: Option<&str>) -> Result<Self, ComposeError> {
        if let Some(path) = preferred.map(str::trim).filter(|p| !p.is_empty()) {
            return Self::from_file(Path::new(path));
        }

        for path in FONT_CANDIDATES.iter().map(Path::new) {
            if !path.exists() {
                continue;
            }
            match Self::from_file(path) {
                Ok(fonts) => return Ok(fonts),
                Err(e) => warn!("跳过字体 {}: {}", path.display(), e),
            }
        }

        Err(ComposeError::Font("未找到可用的中文字体，请配置 composer.font_path".to_string()))
    }

    pub fn from_file(path: &Path) -> Result<Self, ComposeError> {
        let data = std::fs::read(path)
            .map_err(|e| ComposeError::Font(format!("读取 {} 失败: {}", path.display(), e)))?;
        let font = FontVec::try_from_vec_and_index(data, 0)
            .map_err(|e| ComposeError::Font(format!("解析 {} 失败: {}", path.display(), e)))?;

        if font.glyph_id(CJK_PROBE).0 == 0 {
            return Err(ComposeError::Font(format!("{} 不包含中文字形", path.display())));
        }

        info!("已加载字体: {}", path.display());
        Ok(Self { font })
    }
}

impl TextMeasure for FontSet {
    fn text_width(&self, text: &str, px: f32) -> f32 {
        text_size(PxScale::from(px), &self.font, text).0 as f32
    }

    fn line_height(&self, px: f32) -> f32 {
        self.font.as_scaled(PxScale::from(px)).height()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Preview {
    Screenshot { width: u32, height: u32 },
    Placeholder,
}

/// 图片各区块的尺寸和折行结果；绘制严格按照该布局进行
#[derive(Debug, Clone)]
pub struct ImageLayout {
    pub title_lines: Vec<String>,
    pub meta_lines: Vec<String>,
    pub header_height: u32,
    pub preview: Preview,
    pub preview_height: u32,
    pub summary_heading: &'static str,
    pub sections: Vec<(&'static str, Vec<String>)>,
    pub summary_height: u32,
    pub footer_height: u32,
    pub height: u32,
}

fn line_height(measure: &dyn TextMeasure, px: f32) -> u32 {
    (measure.line_height(px) * LINE_FACTOR).ceil() as u32
}

fn content_width() -> u32 {
    CANVAS_WIDTH - 2 * MARGIN - 2 * PADDING
}

/// 截图等比缩放进 内容宽度 × PREVIEW_MAX_HEIGHT 的区域
pub fn fit_screenshot(width: u32, height: u32) -> (u32, u32) {
    let max_w = content_width() as f64;
    let max_h = PREVIEW_MAX_HEIGHT as f64;
    let scale = f64::min(max_w / width.max(1) as f64, max_h / height.max(1) as f64);
    (
        ((width as f64 * scale).round() as u32).max(1),
        ((height as f64 * scale).round() as u32).max(1),
    )
}

/// 计算布局。宽度固定，高度随文字增长，不截断任何内容。
pub fn plan_layout(
    paper: &Paper,
    summary: &Summary,
    screenshot: Option<(u32, u32)>,
    today: &str,
    measure: &dyn TextMeasure,
) -> ImageLayout {
    let max_width = content_width() as f32;

    let title_lines = wrap_text(&paper.title, max_width, TITLE_PX, measure);
    let meta = format!(
        "ArXiv ID: {}    发布: {}    推送: {}\n作者: {}",
        paper.id,
        paper.published.format("%Y年%m月%d日"),
        today,
        format_authors(&paper.authors),
    );
    let meta_lines = wrap_text(&meta, max_width, BODY_PX, measure);

    let header_height = 2 * PADDING
        + title_lines.len() as u32 * line_height(measure, TITLE_PX)
        + BLOCK_GAP
        + meta_lines.len() as u32 * line_height(measure, BODY_PX);

    let (preview, inner) = match screenshot {
        Some((w, h)) => {
            let (width, height) = fit_screenshot(w, h);
            (Preview::Screenshot { width, height }, height)
        }
        None => (Preview::Placeholder, PLACEHOLDER_HEIGHT),
    };
    let preview_height = PREVIEW_BAR + BLOCK_GAP + inner + PADDING;

    let sections: Vec<(&'static str, Vec<String>)> = summary
        .sections()
        .iter()
        .map(|(label, content)| (*label, wrap_text(content, max_width, BODY_PX, measure)))
        .collect();

    let summary_height = 2 * PADDING
        + line_height(measure, SUBTITLE_PX)
        + BLOCK_GAP
        + sections
            .iter()
            .map(|(_, lines)| {
                line_height(measure, SUBTITLE_PX)
                    + lines.len() as u32 * line_height(measure, BODY_PX)
                    + BLOCK_GAP
            })
            .sum::<u32>();

    let footer_height = line_height(measure, SMALL_PX);

    let height = MARGIN
        + header_height
        + SECTION_SPACING
        + preview_height
        + SECTION_SPACING
        + summary_height
        + SECTION_SPACING
        + footer_height
        + MARGIN;

    let summary_heading = if summary.ai_generated {
        "AI智能概括"
    } else {
        "自动摘要（简化版）"
    };

    ImageLayout {
        title_lines,
        meta_lines,
        header_height,
        preview,
        preview_height,
        summary_heading,
        sections,
        summary_height,
        footer_height,
        height,
    }
}

pub struct ImageComposer {
    fonts: FontSet,
}

impl ImageComposer {
    pub fn new(fonts: FontSet) -> Self {
        Self { fonts }
    }

    /// 绘制整张分享图：标题区、首页预览（或占位）、概括区、页脚
    pub fn render(
        &self,
        paper: &Paper,
        summary: &Summary,
        screenshot: Option<&DynamicImage>,
        today: &str,
    ) -> RgbImage {
        let dims = screenshot.map(|s| (s.width(), s.height()));
        let layout = plan_layout(paper, summary, dims, today, &self.fonts);

        let mut img = RgbImage::from_pixel(CANVAS_WIDTH, layout.height, BACKGROUND);
        let card_width = CANVAS_WIDTH - 2 * MARGIN;
        let text_x = (MARGIN + PADDING) as i32;
        let mut y = MARGIN;

        // 标题区
        fill(&mut img, MARGIN, y, card_width, layout.header_height, CARD);
        let mut line_y = y + PADDING;
        for line in &layout.title_lines {
            self.text(&mut img, line, text_x, line_y, TITLE_PX, HEADER_TEXT);
            line_y += line_height(&self.fonts, TITLE_PX);
        }
        line_y += BLOCK_GAP;
        for line in &layout.meta_lines {
            self.text(&mut img, line, text_x, line_y, BODY_PX, BODY_TEXT);
            line_y += line_height(&self.fonts, BODY_PX);
        }
        y += layout.header_height + SECTION_SPACING;

        // 预览区
        fill(&mut img, MARGIN, y, card_width, layout.preview_height, CARD);
        fill(&mut img, MARGIN, y, card_width, PREVIEW_BAR, BAR);
        self.text(
            &mut img,
            "论文首页预览",
            text_x,
            y + 10,
            SUBTITLE_PX,
            HEADER_TEXT,
        );
        let inner_y = y + PREVIEW_BAR + BLOCK_GAP;
        match (layout.preview, screenshot) {
            (Preview::Screenshot { width, height }, Some(shot)) => {
                let scaled = shot
                    .resize_exact(width, height, imageops::FilterType::Lanczos3)
                    .to_rgb8();
                let x = MARGIN + (card_width - width) / 2;
                imageops::overlay(&mut img, &scaled, i64::from(x), i64::from(inner_y));
            }
            _ => {
                fill(
                    &mut img,
                    MARGIN + PADDING,
                    inner_y,
                    content_width(),
                    PLACEHOLDER_HEIGHT,
                    BACKGROUND,
                );
                self.text(
                    &mut img,
                    "PDF截图不可用",
                    text_x + PADDING as i32,
                    inner_y + PLACEHOLDER_HEIGHT / 2,
                    BODY_PX,
                    MUTED,
                );
            }
        }
        y += layout.preview_height + SECTION_SPACING;

        // 概括区
        fill(
            &mut img,
            MARGIN,
            y,
            card_width,
            layout.summary_height,
            AI_CARD,
        );
        let mut line_y = y + PADDING;
        self.text(
            &mut img,
            layout.summary_heading,
            text_x,
            line_y,
            SUBTITLE_PX,
            HEADER_TEXT,
        );
        line_y += line_height(&self.fonts, SUBTITLE_PX) + BLOCK_GAP;
        for (label, lines) in &layout.sections {
            self.text(&mut img, label, text_x, line_y, SUBTITLE_PX, ACCENT);
            line_y += line_height(&self.fonts, SUBTITLE_PX);
            for line in lines {
                self.text(&mut img, line, text_x, line_y, BODY_PX, BODY_TEXT);
                line_y += line_height(&self.fonts, BODY_PX);
            }
            line_y += BLOCK_GAP;
        }
        y += layout.summary_height + SECTION_SPACING;

        let footer = format!("ArXiv论文转发工具 | {}", today);
        let footer_width = self.fonts.text_width(&footer, SMALL_PX) as u32;
        let footer_x = (CANVAS_WIDTH.saturating_sub(footer_width) / 2) as i32;
        self.text(&mut img, &footer, footer_x, y, SMALL_PX, MUTED);

        img
    }

    fn text(&self, img: &mut RgbImage, text: &str, x: i32, y: u32, px: f32, color: Rgb<u8>) {
        if text.trim().is_empty() {
            return;
        }
        let scale = PxScale::from(px);
        draw_text_mut(img, color, x, y as i32, scale, &self.fonts.font, text);
    }
}

fn fill(img: &mut RgbImage, x: u32, y: u32, w: u32, h: u32, color: Rgb<u8>) {
    if w == 0 || h == 0 {
        return;
    }
    draw_filled_rect_mut(img, Rect::at(x as i32, y as i32).of_size(w, h), color);
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::analyzer::fallback_summary;
    use crate::composer::text::tests::MonoMeasure;
    use chrono::Utc;

    /// 只含必需表的最小 TrueType 字体，所有字形宽 500/1000 em。
    /// `with_cjk` 为真时 cmap 把“中”映射到字形 1，否则没有 cmap。
    pub(crate) fn synthetic_font(with_cjk: bool) -> Vec<u8> {
        let glyphs: u16 = 2;

        let mut head = vec![0u8; 54];
        head[0..4].copy_from_slice(&0x0001_0000u32.to_be_bytes());
        head[12..16].copy_from_slice(&0x5F0F_3CF5u32.to_be_bytes());
        head[18..20].copy_from_slice(&1000u16.to_be_bytes());

        let mut hhea = vec![0u8; 36];
        hhea[0..4].copy_from_slice(&0x0001_0000u32.to_be_bytes());
        hhea[4..6].copy_from_slice(&800i16.to_be_bytes());
        hhea[6..8].copy_from_slice(&(-200i16).to_be_bytes());
        hhea[34..36].copy_from_slice(&glyphs.to_be_bytes());

        let hmtx: Vec<u8> = (0..glyphs)
            .flat_map(|_| [500u16.to_be_bytes(), 0u16.to_be_bytes()].concat())
            .collect();

        let mut maxp = 0x0000_5000u32.to_be_bytes().to_vec();
        maxp.extend(glyphs.to_be_bytes());

        let mut tables: Vec<(&[u8; 4], Vec<u8>)> = Vec::new();
        if with_cjk {
            let mut words: Vec<u16> = Vec::new();
            // version, numTables
            words.extend([0, 1]);
            // Windows Unicode BMP 子表，偏移 12
            words.extend([3, 1, 0, 12]);
            // format 4: length, language, segCountX2, searchRange, entrySelector, rangeShift
            words.extend([4, 32, 0, 4, 4, 1, 0]);
            // 两段：“中”和结尾的 0xFFFF。endCode, reservedPad, startCode
            words.extend([0x4E2D, 0xFFFF, 0, 0x4E2D, 0xFFFF]);
            // idDelta, idRangeOffset
            words.extend([1u16.wrapping_sub(0x4E2D), 1, 0, 0]);

            let cmap: Vec<u8> = words.iter().flat_map(|v| v.to_be_bytes()).collect();
            tables.push((b"cmap", cmap));
        }
        tables.push((b"head", head));
        tables.push((b"hhea", hhea));
        tables.push((b"hmtx", hmtx));
        tables.push((b"maxp", maxp));

        let mut font = Vec::new();
        font.extend(0x0001_0000u32.to_be_bytes());
        font.extend((tables.len() as u16).to_be_bytes());
        font.extend([0u8; 6]);

        let mut offset = 12 + 16 * tables.len();
        let mut body = Vec::new();
        for (tag, data) in &tables {
            font.extend_from_slice(*tag);
            font.extend(0u32.to_be_bytes());
            font.extend((offset as u32).to_be_bytes());
            font.extend((data.len() as u32).to_be_bytes());
            offset += data.len();
            body.extend_from_slice(data);
        }
        font.extend(body);
        font
    }

    fn font_file(dir: &Path, with_cjk: bool) -> std::path::PathBuf {
        let path = dir.join(if with_cjk { "cjk.ttf" } else { "latin.ttf" });
        std::fs::write(&path, synthetic_font(with_cjk)).unwrap();
        path
    }

    fn paper(title: &str) -> Paper {
        Paper {
            id: "2401.00001".to_string(),
            title: title.to_string(),
            authors: vec!["Ada".to_string(), "Alan".to_string()],
            abstract_text: "image segmentation".to_string(),
            published: Utc::now(),
            categories: ["cs.CV".to_string()].into_iter().collect(),
            pdf_url: String::new(),
            abs_url: String::new(),
        }
    }

    #[test]
    fn missing_screenshot_reserves_placeholder_region() {
        let p = paper("Segment everything");
        let summary = fallback_summary(&p);
        let layout = plan_layout(&p, &summary, None, "2024-01-04", &MonoMeasure);

        assert_eq!(layout.preview, Preview::Placeholder);
        assert!(layout.preview_height >= PLACEHOLDER_HEIGHT);
        let sections = layout.header_height + layout.summary_height + layout.preview_height;
        assert!(layout.height >= sections);
    }

    #[test]
    fn height_grows_with_summary_text() {
        let p = paper("Segment everything");
        let short = fallback_summary(&p);
        let mut long = short.clone();
        long.method = "很长的方法描述。".repeat(200);

        let a = plan_layout(&p, &short, None, "2024-01-04", &MonoMeasure);
        let b = plan_layout(&p, &long, None, "2024-01-04", &MonoMeasure);

        assert_eq!(a.preview_height, b.preview_height);
        assert!(b.summary_height > a.summary_height);
        assert!(b.height > a.height);

        let method_lines = &b.sections[2].1;
        let rendered: String = method_lines.concat();
        assert_eq!(rendered, long.method);
    }

    #[test]
    fn screenshot_is_fit_into_content_region() {
        let (w, h) = fit_screenshot(1600, 2264);
        assert!(w <= content_width() && h <= PREVIEW_MAX_HEIGHT);
        assert_eq!(h, PREVIEW_MAX_HEIGHT);

        let (w, h) = fit_screenshot(2000, 500);
        assert_eq!(w, content_width());
        assert_eq!(h, 250);

        let p = paper("t");
        let summary = fallback_summary(&p);
        let layout = plan_layout(&p, &summary, Some((1600, 2264)), "2024-01-04", &MonoMeasure);
        assert!(matches!(
            layout.preview,
            Preview::Screenshot {
                height: PREVIEW_MAX_HEIGHT,
                ..
            }
        ));
    }

    #[test]
    fn font_without_cjk_glyphs_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let latin = font_file(dir.path(), false);

        let err = FontSet::load(Some(latin.to_str().unwrap())).err().unwrap();
        assert!(matches!(
            err,
            ComposeError::Font(reason) if reason.contains("不包含中文字形")
        ));

        let cjk = font_file(dir.path(), true);
        assert!(FontSet::load(Some(cjk.to_str().unwrap())).is_ok());
    }

    #[test]
    fn configured_font_is_not_replaced_by_system_fonts() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.ttc");
        let garbage = dir.path().join("garbage.ttf");
        std::fs::write(&garbage, b"not a font").unwrap();

        for path in [missing, garbage] {
            assert!(matches!(
                FontSet::load(Some(path.to_str().unwrap())),
                Err(ComposeError::Font(_))
            ));
        }
    }

    #[test]
    fn render_matches_layout_height() {
        let dir = tempfile::tempdir().unwrap();
        let fonts = FontSet::from_file(&font_file(dir.path(), true)).unwrap();

        let p = paper("Segment everything");
        let summary = fallback_summary(&p);
        let expected = plan_layout(&p, &summary, None, "2024-01-04", &fonts).height;

        let composer = ImageComposer::new(fonts);
        let img = composer.render(&p, &summary, None, "2024-01-04");
        assert_eq!(img.width(), CANVAS_WIDTH);
        assert_eq!(img.height(), expected);
    }
}

use image::{DynamicImage, RgbaImage};
use pdfium_render::prelude::*;
use std::path::Path;
use tracing::debug;

/// 把 PDF 某一页栅格化为图片。实现是阻塞的，调用方放进 `spawn_blocking`。
pub trait PageRenderer: Send + Sync {
    fn render_first_page(&self, pdf_path: &Path, target_width: u32) -> Result<DynamicImage, String>;
}

/// 基于 pdfium 的渲染器，每次渲染时绑定动态库
pub struct PdfiumRenderer {
    library_dir: Option<String>,
}

impl PdfiumRenderer {
    pub fn new(library_dir: Option<String>) -> Self {
        Self { library_dir }
    }

    /// 能否加载 pdfium 动态库
    pub fn is_available(&self) -> bool {
        self.bind().is_ok()
    }

    fn bind(&self) -> Result<Pdfium, String> {
        let bindings = match &self.library_dir {
            Some(dir) => Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path(dir))
                .or_else(|_| Pdfium::bind_to_system_library()),
            None => Pdfium::bind_to_system_library(),
        }
        .map_err(|e| format!("无法加载 pdfium 库: {}", e))?;

        Ok(Pdfium::new(bindings))
    }
}

impl PageRenderer for PdfiumRenderer {
    fn render_first_page(
        &self,
        pdf_path: &Path,
        target_width: u32,
    ) -> Result<DynamicImage, String> {
        let pdfium = self.bind()?;
        let document = pdfium
            .load_pdf_from_file(pdf_path, None)
            .map_err(|e| format!("打开PDF失败: {}", e))?;

        let page = document
            .pages()
            .get(0)
            .map_err(|e| format!("读取首页失败: {}", e))?;

        let render_config = PdfRenderConfig::new()
            .set_target_width(target_width as i32)
            .render_form_data(true);

        let bitmap = page
            .render_with_config(&render_config)
            .map_err(|e| format!("渲染首页失败: {}", e))?;

        let width = bitmap.width() as u32;
        let height = bitmap.height() as u32;
        debug!("pdfium 渲染结果: {}x{}", width, height);

        RgbaImage::from_raw(width, height, bitmap.as_rgba_bytes())
            .map(DynamicImage::ImageRgba8)
            .ok_or_else(|| format!("位图数据长度与尺寸 {}x{} 不符", width, height))
    }
}

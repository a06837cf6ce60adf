use crate::analyzer::Summary;
use crate::crawler::Paper;

pub const SCREENSHOT_CID: &str = "screenshot";
pub const SUMMARY_IMAGE_CID: &str = "summary_image";

const STYLE: &str = r#"
body { font-family: 'Microsoft YaHei', 'Noto Sans SC', Arial, sans-serif; line-height: 1.6; max-width: 800px; margin: 0 auto; padding: 20px; background-color: #f5f5f5; }
.container { background-color: white; padding: 30px; border-radius: 10px; box-shadow: 0 2px 10px rgba(0,0,0,0.1); }
.header { border-bottom: 3px solid #4CAF50; padding-bottom: 20px; margin-bottom: 30px; }
.paper-title { color: #2c3e50; font-size: 24px; font-weight: bold; margin-bottom: 10px; line-height: 1.3; }
.paper-info { background-color: #f8f9fa; padding: 15px; border-left: 4px solid #4CAF50; margin: 20px 0; }
.info-item { margin: 8px 0; color: #555; }
.info-label { font-weight: bold; color: #2c3e50; }
.screenshot-section { text-align: center; margin: 20px 0; padding: 20px; background-color: #f8f9fa; border-radius: 8px; }
.screenshot-title { color: #2c3e50; font-size: 16px; font-weight: bold; margin-bottom: 15px; }
.screenshot-img { max-width: 100%; height: auto; border: 2px solid #ddd; border-radius: 8px; }
.analysis-section { background-color: #e8f5e8; padding: 20px; border-radius: 8px; margin: 20px 0; }
.analysis-title { color: #2c3e50; font-size: 18px; font-weight: bold; margin-bottom: 15px; border-bottom: 2px solid #4CAF50; padding-bottom: 8px; }
.analysis-label { font-weight: bold; color: #2c3e50; }
.analysis-body { white-space: pre-line; color: #2c3e50; margin-bottom: 10px; }
.analysis-note { font-size: 12px; color: #888; }
.footer { margin-top: 30px; padding-top: 20px; border-top: 1px solid #eee; color: #666; font-size: 14px; text-align: center; }
.arxiv-link { color: #4CAF50; text-decoration: none; font-weight: bold; }
"#;

/// 最多列出5位作者，其余以“等”代替
pub fn format_authors(authors: &[String]) -> String {
    if authors.is_empty() {
        return "未知作者".to_string();
    }
    let mut s = authors[..authors.len().min(5)].join(", ");
    if authors.len() > 5 {
        s.push_str(" 等");
    }
    s
}

/// HTML 模式的邮件正文；没有截图时不输出预览区块
pub fn render_paper_html(
    paper: &Paper,
    summary: &Summary,
    has_screenshot: bool,
    today: &str,
) -> String {
    let categories: Vec<&str> = paper.categories.iter().map(String::as_str).collect();
    let mut html = format!(
        r#"<!DOCTYPE html>
<html>
<head>
<meta charset="UTF-8">
<style>{style}</style>
</head>
<body>
<div class="container">
<div class="header"><div class="paper-title">{title}</div></div>
<div class="paper-info">
  <div class="info-item"><span class="info-label">ArXiv编号：</span>{id}</div>
  <div class="info-item"><span class="info-label">作者：</span>{authors}</div>
  <div class="info-item"><span class="info-label">发布日期：</span>{published}</div>
  <div class="info-item"><span class="info-label">分类：</span>{categories}</div>
  <div class="info-item"><span class="info-label">ArXiv链接：</span><a href="{abs_url}" class="arxiv-link">查看原文</a></div>
</div>
"#,
        style = STYLE,
        title = html_escape(&paper.title),
        id = html_escape(&paper.id),
        authors = html_escape(&format_authors(&paper.authors)),
        published = paper.published.format("%Y年%m月%d日"),
        categories = html_escape(&categories.join(", ")),
        abs_url = html_escape(&paper.abs_url),
    );

    if has_screenshot {
        html.push_str(&format!(
            r#"<div class="screenshot-section">
  <div class="screenshot-title">📄 论文首页预览</div>
  <img src="cid:{cid}" alt="论文首页截图" class="screenshot-img">
</div>
"#,
            cid = SCREENSHOT_CID
        ));
    }

    let heading = if summary.ai_generated {
        "🤖 AI智能分析"
    } else {
        "📝 自动摘要（简化版）"
    };
    html.push_str(r#"<div class="analysis-section">"#);
    html.push_str(&format!(r#"<div class="analysis-title">{}</div>"#, heading));
    html.push('\n');
    for (label, content) in summary.sections() {
        html.push_str(&format!(
            r#"<div class="analysis-label">{label}</div><div class="analysis-body">{content}</div>"#,
            label = label,
            content = html_escape(content),
        ));
        html.push('\n');
    }
    if !summary.ai_generated {
        html.push_str(r#"<div class="analysis-note">"#);
        html.push_str("AI 接口暂不可用，以上为根据标题与摘要生成的简化分析。");
        html.push_str("</div>\n");
    }
    html.push_str("</div>\n");

    html.push_str(&footer(today));
    html.push_str("</div>\n</body>\n</html>");
    html
}

/// 图片模式的外层正文，只引用一张内嵌图片
pub fn render_image_wrapper(paper: &Paper, today: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html>
<head>
<meta charset="UTF-8">
<style>{style}</style>
</head>
<body>
<div class="container" style="text-align: center;">
<h2>📚 AI论文分享</h2>
<p>以下是今日推荐的ArXiv论文摘要，点击查看原文：</p>
<div><img src="cid:{cid}" alt="论文摘要图片" class="screenshot-img"></div>
<p><a href="{abs_url}" class="arxiv-link">📖 查看论文原文</a></p>
{footer}</div>
</body>
</html>"#,
        style = STYLE,
        cid = SUMMARY_IMAGE_CID,
        abs_url = html_escape(&paper.abs_url),
        footer = footer(today),
    )
}

/// 每日汇总邮件
pub fn render_daily_summary(today: &str, found: usize, delivered: usize, failed: usize) -> String {
    let rate = delivered as f64 / found.max(1) as f64 * 100.0;
    format!(
        r#"<!DOCTYPE html>
<html>
<head>
<meta charset="UTF-8">
<style>{style}</style>
</head>
<body>
<div class="container">
<h2>📊 {today} 论文处理汇总</h2>
<div class="paper-info">
  <div class="info-item">🔍 发现论文总数: <b>{found}</b> 篇</div>
  <div class="info-item">✅ 成功发送: <b>{delivered}</b> 篇</div>
  <div class="info-item">❌ 处理失败: <b>{failed}</b> 篇</div>
  <div class="info-item">📧 成功率: <b>{rate:.1}%</b></div>
</div>
{footer}</div>
</body>
</html>"#,
        style = STYLE,
        today = html_escape(today),
        found = found,
        delivered = delivered,
        failed = failed,
        rate = rate,
        footer = footer(today),
    )
}

fn footer(today: &str) -> String {
    format!(
        r#"<div class="footer">
  <p>📧 这是一封自动生成的论文分享邮件</p>
  <p>🤖 由ArXiv论文转发工具自动发送 | ⏰ {}</p>
</div>
"#,
        html_escape(today)
    )
}

pub fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

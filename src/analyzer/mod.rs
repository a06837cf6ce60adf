//! 摘要概括：调用生成式接口得到五段式中文概括，失败时由调用方换用本地简化概括。

pub mod client;

pub use client::{AnalyzerError, ChatClient, TextGenerator};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::crawler::Paper;

/// 五个栏目的标签，顺序即输出顺序
pub const SECTION_LABELS: [&str; 5] = ["研究领域", "核心贡献", "技术方法", "实验结果", "意义价值"];

const SYSTEM_PROMPT: &str =
    "你是一位熟悉人工智能各领域的科研助理，擅长用通俗易懂的中文概括英文论文摘要。";

/// 一篇论文的结构化概括
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Summary {
    pub domain: String,
    pub contribution: String,
    pub method: String,
    pub results: String,
    pub significance: String,
    /// true 表示来自生成式接口，false 表示本地简化概括
    pub ai_generated: bool,
}

impl Summary {
    /// (标签, 内容) 按固定顺序排列
    pub fn sections(&self) -> [(&'static str, &str); 5] {
        [
            (SECTION_LABELS[0], self.domain.as_str()),
            (SECTION_LABELS[1], self.contribution.as_str()),
            (SECTION_LABELS[2], self.method.as_str()),
            (SECTION_LABELS[3], self.results.as_str()),
            (SECTION_LABELS[4], self.significance.as_str()),
        ]
    }
}

/// 生成式概括的结果；`Failed` 时调用方应使用 [`fallback_summary`]
#[derive(Debug)]
pub enum SummarizeResult {
    Ok(Summary),
    Failed(AnalyzerError),
}

pub struct Analyzer {
    generator: Box<dyn TextGenerator>,
}

impl Analyzer {
    pub fn new(generator: Box<dyn TextGenerator>) -> Self {
        Self { generator }
    }

    pub async fn summarize(&self, paper: &Paper) -> SummarizeResult {
        let prompt = build_prompt(paper);
        info!("调用生成式接口概括摘要: {}", paper.id);

        let response = match self.generator.generate(SYSTEM_PROMPT, &prompt).await {
            Ok(text) => text,
            Err(e) => return SummarizeResult::Failed(e),
        };

        match parse_summary(&response) {
            Some(summary) => SummarizeResult::Ok(summary),
            None => {
                warn!("概括响应缺少栏目: {}", paper.id);
                let preview: String = response.chars().take(200).collect();
                SummarizeResult::Failed(AnalyzerError::Unparseable(preview))
            }
        }
    }
}

pub fn build_prompt(paper: &Paper) -> String {
    let category = paper.primary_category().unwrap_or("未知");
    format!(
        "请分析以下ArXiv论文的摘要，并提供一个简洁明了的中文概括。请按照以下格式输出：\n\n\
         **研究领域**：[论文所属的具体研究领域]\n\n\
         **核心贡献**：[论文的主要贡献和创新点，1-2句话]\n\n\
         **技术方法**：[使用的主要技术方法或算法，1-2句话]\n\n\
         **实验结果**：[关键实验结果或性能表现，如果摘要中有提到的话，1句话]\n\n\
         **意义价值**：[该研究的实际应用价值或学术意义，1句话]\n\n\
         论文标题：{title}\n\n\
         论文分类：{category}\n\n\
         论文摘要：{abstract_text}\n\n\
         请用通俗易懂的中文进行概括，每部分控制在50字以内，总长度不超过300字。",
        title = paper.title,
        category = category,
        abstract_text = paper.abstract_text,
    )
}

/// 按标签切分响应：标签后的冒号可为全角或半角，允许 `**`、`#`、`-` 等修饰。
/// 两个相邻标签之间的文字归前一个栏目，最后一个栏目取到结尾。
/// 缺少任一栏目或内容为空时返回 `None`。
pub fn parse_summary(response: &str) -> Option<Summary> {
    let mut found: Vec<(usize, usize, usize)> = Vec::new();

    for (index, label) in SECTION_LABELS.iter().enumerate() {
        let (start, end) = find_label(response, label)?;
        found.push((start, end, index));
    }
    found.sort_by_key(|(start, _, _)| *start);

    let mut contents: [String; 5] = Default::default();
    for (i, (_, content_start, index)) in found.iter().enumerate() {
        let content_end = found.get(i + 1).map_or(response.len(), |(s, _, _)| *s);
        let text = clean_section(&response[*content_start..content_end]);
        if text.is_empty() {
            return None;
        }
        contents[*index] = text;
    }

    let [domain, contribution, method, results, significance] = contents;
    Some(Summary {
        domain,
        contribution,
        method,
        results,
        significance,
        ai_generated: true,
    })
}

/// 返回 (标签行起点, 内容起点)。只认行首（忽略修饰符）紧跟冒号的标签。
fn find_label(response: &str, label: &str) -> Option<(usize, usize)> {
    let mut line_start = 0;
    for line in response.split_inclusive('\n') {
        let trimmed = line.trim_start_matches(|c: char| {
            c.is_whitespace() || matches!(c, '*' | '#' | '-' | '【' | '[')
        });
        if let Some(rest) = trimmed.strip_prefix(label) {
            let rest_trimmed = rest.trim_start_matches(['*', '】', ']', ' ']);
            let after = rest_trimmed
                .strip_prefix('：')
                .or_else(|| rest_trimmed.strip_prefix(':'));
            if let Some(after) = after {
                let content_start = line_start + (line.len() - after.len());
                return Some((line_start, content_start));
            }
        }
        line_start += line.len();
    }
    None
}

fn clean_section(raw: &str) -> String {
    raw.lines()
        .map(|l| l.trim().trim_matches('*').trim())
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// 不依赖外部服务的简化概括，五个栏目均非空，永不失败
pub fn fallback_summary(paper: &Paper) -> Summary {
    let abstract_lower = paper.abstract_text.to_lowercase();
    let has_any = |words: &[&str]| words.iter().any(|w| abstract_lower.contains(w));

    let field = if has_any(&["machine learning", "deep learning", "neural"]) {
        "机器学习"
    } else if has_any(&["computer vision", "image", "visual"]) {
        "计算机视觉"
    } else if has_any(&["natural language", "nlp", "text"]) {
        "自然语言处理"
    } else if has_any(&["robot", "control", "planning"]) {
        "机器人学"
    } else {
        "人工智能"
    };

    let domain = match paper.primary_category() {
        Some(category) => format!("{}（{}）", field, category),
        None => field.to_string(),
    };

    let title = paper.title.trim();
    let contribution = if title.is_empty() {
        format!("该论文在{}领域提出了新的方法和见解。", field)
    } else {
        format!("论文《{}》在{}领域提出了新的方法和见解。", title, field)
    };

    Summary {
        domain,
        contribution,
        method: "采用了先进的算法和技术框架来解决相关问题。".to_string(),
        results: "实验验证了所提方法的有效性。".to_string(),
        significance: format!(
            "为{}领域的发展提供了有价值的贡献。（注：此为自动生成的简化分析，详细内容请查看原论文摘要。）",
            field
        ),
        ai_generated: false,
    }
}

use serde::{Deserialize, Serialize};

use crate::crawler::Paper;

/// 检索条件：关键词、学科分类与数量上限
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SearchConfig {
    pub keywords: Vec<String>,
    pub categories: Vec<String>,
    pub max_papers: usize,
    pub max_back_days: u32,
    pub base_url: String,
    pub request_delay_ms: u64,
    pub max_retries: u32,
    pub timeout_secs: u64,
}

impl SearchConfig {
    /// 去除空白项后的关键词
    pub fn normalized_keywords(&self) -> Vec<String> {
        self.keywords
            .iter()
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty())
            .collect()
    }

    /// 标题或摘要包含任一关键词（忽略大小写），且分类与配置分类有交集
    pub fn matches(&self, paper: &Paper) -> bool {
        self.matches_keywords(paper) && self.matches_categories(paper)
    }

    pub fn matches_keywords(&self, paper: &Paper) -> bool {
        let title = paper.title.to_lowercase();
        let abstract_text = paper.abstract_text.to_lowercase();

        self.normalized_keywords().iter().any(|kw| {
            let kw = kw.to_lowercase();
            title.contains(&kw) || abstract_text.contains(&kw)
        })
    }

    pub fn matches_categories(&self, paper: &Paper) -> bool {
        paper
            .categories
            .iter()
            .any(|c| self.categories.iter().any(|wanted| wanted.trim() == c))
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            keywords: vec![
                "machine learning".to_string(),
                "artificial intelligence".to_string(),
            ],
            categories: vec![
                "cs.AI".to_string(),
                "cs.CL".to_string(),
                "cs.CV".to_string(),
                "cs.LG".to_string(),
                "cs.NE".to_string(),
                "cs.RO".to_string(),
                "stat.ML".to_string(),
            ],
            max_papers: 5,
            max_back_days: 3,
            base_url: "https://export.arxiv.org/api/query".to_string(),
            request_delay_ms: 3000,
            max_retries: 3,
            timeout_secs: 30,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::collections::BTreeSet;

    fn paper(title: &str, abstract_text: &str, categories: &[&str]) -> Paper {
        Paper {
            id: "2401.00001".to_string(),
            title: title.to_string(),
            authors: vec!["Ada".to_string()],
            abstract_text: abstract_text.to_string(),
            published: Utc::now(),
            categories: categories.iter().map(|c| c.to_string()).collect::<BTreeSet<_>>(),
            pdf_url: "https://arxiv.org/pdf/2401.00001.pdf".to_string(),
            abs_url: "https://arxiv.org/abs/2401.00001".to_string(),
        }
    }

    #[test]
    fn keyword_match_ignores_case_and_checks_abstract() {
        let config = SearchConfig {
            keywords: vec!["Diffusion Model".to_string()],
            ..Default::default()
        };

        assert!(config.matches(&paper("A DIFFUSION MODEL for X", "", &["cs.CV"])));
        assert!(config.matches(&paper("Other", "we train a diffusion model", &["cs.LG"])));
        assert!(!config.matches(&paper("Other", "nothing relevant", &["cs.LG"])));
    }

    #[test]
    fn category_set_must_intersect() {
        let config = SearchConfig {
            keywords: vec!["graph".to_string()],
            categories: vec!["cs.LG".to_string()],
            ..Default::default()
        };

        assert!(config.matches(&paper("graph nets", "", &["math.CO", "cs.LG"])));
        assert!(!config.matches(&paper("graph nets", "", &["math.CO"])));
    }

    #[test]
    fn blank_keywords_are_ignored() {
        let config = SearchConfig {
            keywords: vec!["  ".to_string(), " agent ".to_string()],
            ..Default::default()
        };

        assert_eq!(config.normalized_keywords(), vec!["agent".to_string()]);
        assert!(!config.matches(&paper("unrelated", "text", &["cs.AI"])));
    }
}

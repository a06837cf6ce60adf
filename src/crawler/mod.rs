pub mod arxiv;

pub use arxiv::{parse_feed, ArxivCrawler, SearchError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// 检索得到的一篇论文，构造后只读
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Paper {
    /// 去掉版本号的 arXiv 编号，如 `2401.01234`、`cs/9901001`
    pub id: String,
    pub title: String,
    pub authors: Vec<String>,
    pub abstract_text: String,
    pub published: DateTime<Utc>,
    pub categories: BTreeSet<String>,
    pub pdf_url: String,
    pub abs_url: String,
}

impl Paper {
    /// 用作下载目录中文件名的编号，旧式编号中的 `/` 替换为 `_`
    pub fn file_stem(&self) -> String {
        self.id.replace('/', "_")
    }

    pub fn primary_category(&self) -> Option<&str> {
        self.categories.iter().next().map(String::as_str)
    }
}

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use regex::Regex;
use reqwest::{Client, StatusCode, Url};
use std::collections::{BTreeSet, HashSet};
use std::sync::OnceLock;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::Paper;
use crate::config::SearchConfig;

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("无效的检索地址: {0}")]
    InvalidUrl(String),

    #[error("网络请求错误: {0}")]
    Network(#[from] reqwest::Error),

    #[error("arXiv 返回错误状态: {0}")]
    Status(StatusCode),

    #[error("arXiv 接口报错: {0}")]
    Api(String),

    #[error("arXiv 在 {0} 次重试后仍然限流或不可用")]
    Exhausted(u32),

    #[error("XML解析错误: {0}")]
    Parse(String),
}

pub struct ArxivCrawler {
    client: Client,
    base_url: Url,
    max_retries: u32,
    request_delay: Duration,
}

impl ArxivCrawler {
    pub fn new(config: &SearchConfig) -> Result<Self, SearchError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent("arxiv2mail/0.1 (daily paper digest)")
            .build()?;

        let base_url = Url::parse(config.base_url.trim())
            .map_err(|e| SearchError::InvalidUrl(format!("{}: {}", config.base_url, e)))?;

        Ok(Self {
            client,
            base_url,
            max_retries: config.max_retries.max(1),
            request_delay: Duration::from_millis(config.request_delay_ms),
        })
    }

    /// 逐个关键词检索并合并结果。
    ///
    /// `seen` 是本次运行的去重集合，已出现的编号不会再次返回。结果按发布时间倒序，
    /// 截断到 `max_papers`。任一请求失败即返回错误，不产生部分结果。
    pub async fn search(
        &self,
        config: &SearchConfig,
        seen: &mut HashSet<String>,
    ) -> Result<Vec<Paper>, SearchError> {
        let now = Utc::now();
        let cutoff = now - ChronoDuration::days(i64::from(config.max_back_days));
        let per_query = (config.max_papers * 2).max(10);

        let mut papers = Vec::new();

        for keyword in config.normalized_keywords() {
            let query = build_query(&keyword, &config.categories, cutoff, now);
            info!("检索关键词 '{}': {}", keyword, query);

            let xml = self.fetch(&query, per_query).await?;
            let entries = parse_feed(&xml)?;

            let mut accepted = 0;
            for paper in entries {
                if paper.published < cutoff {
                    debug!("跳过过期论文: {} ({})", paper.id, paper.published);
                    continue;
                }
                if !config.matches(&paper) {
                    debug!("跳过不匹配的论文: {}", paper.id);
                    continue;
                }
                if !seen.insert(paper.id.clone()) {
                    debug!("跳过重复论文: {}", paper.id);
                    continue;
                }
                papers.push(paper);
                accepted += 1;
            }

            info!("关键词 '{}' 找到 {} 篇论文", keyword, accepted);
        }

        papers.sort_by(|a, b| b.published.cmp(&a.published));
        papers.truncate(config.max_papers);

        info!("合并去重后共 {} 篇论文", papers.len());
        Ok(papers)
    }

    async fn fetch(&self, query: &str, max_results: usize) -> Result<String, SearchError> {
        let mut url = self.base_url.clone();
        url.query_pairs_mut()
            .append_pair("search_query", query)
            .append_pair("start", "0")
            .append_pair("max_results", &max_results.to_string())
            .append_pair("sortBy", "submittedDate")
            .append_pair("sortOrder", "descending");

        let mut last_error = None;

        for attempt in 1..=self.max_retries {
            // arXiv 要求请求之间保持间隔
            let delay = self.request_delay * attempt;
            if !delay.is_zero() {
                debug!(
                    "等待 {}ms 后发送请求 (第 {}/{} 次)",
                    delay.as_millis(),
                    attempt,
                    self.max_retries
                );
                tokio::time::sleep(delay).await;
            }

            let response = match self.client.get(url.clone()).send().await {
                Ok(resp) => resp,
                Err(e) => {
                    warn!("请求失败 (第 {}/{} 次): {}", attempt, self.max_retries, e);
                    last_error = Some(SearchError::Network(e));
                    continue;
                }
            };

            let status = response.status();
            let text = response.text().await?;
            debug!("arXiv 响应状态: {}, 内容长度: {} 字节", status, text.len());

            // 429/502/503 或响应体含 "Rate exceeded" 视为限流/服务暂不可用
            if matches!(status.as_u16(), 429 | 502 | 503) || text.contains("Rate exceeded") {
                warn!(
                    "arXiv 返回 {} (第 {}/{} 次尝试)",
                    status, attempt, self.max_retries
                );
                if attempt < self.max_retries {
                    tokio::time::sleep(self.request_delay * 2u32.pow(attempt)).await;
                }
                continue;
            }

            if !status.is_success() {
                return Err(SearchError::Status(status));
            }

            return Ok(text);
        }

        Err(last_error.unwrap_or(SearchError::Exhausted(self.max_retries)))
    }
}

/// `all:关键词 AND submittedDate:[..] AND (cat:a OR cat:b)`，含空格的关键词按短语检索
pub fn build_query(
    keyword: &str,
    categories: &[String],
    from: DateTime<Utc>,
    to: DateTime<Utc>,
) -> String {
    let keyword = keyword.trim();
    let keyword_part = if keyword.contains(' ') {
        format!("all:\"{}\"", keyword.replace('"', ""))
    } else {
        format!("all:{}", keyword)
    };

    let time_part = format!(
        "submittedDate:[{}0000 TO {}2359]",
        from.format("%Y%m%d"),
        to.format("%Y%m%d")
    );

    let cats: Vec<String> = categories
        .iter()
        .map(|c| c.trim())
        .filter(|c| !c.is_empty())
        .map(|c| format!("cat:{}", c))
        .collect();

    if cats.is_empty() {
        format!("{} AND {}", keyword_part, time_part)
    } else {
        format!(
            "{} AND {} AND ({})",
            keyword_part,
            time_part,
            cats.join(" OR ")
        )
    }
}

/// 从条目 id（`http://arxiv.org/abs/2401.01234v2`）得到去掉版本号的编号
pub fn normalize_arxiv_id(id_url: &str) -> String {
    static VERSION: OnceLock<Regex> = OnceLock::new();
    let version = VERSION.get_or_init(|| Regex::new(r"v\d+$").expect("valid version regex"));

    let trimmed = id_url.trim().trim_end_matches('/');
    let tail = match trimmed.rfind("/abs/") {
        Some(i) => &trimmed[i + "/abs/".len()..],
        None => trimmed,
    };
    version.replace(tail, "").to_string()
}

pub fn pdf_url(id: &str) -> String {
    format!("https://arxiv.org/pdf/{}.pdf", id)
}

pub fn abs_url(id: &str) -> String {
    format!("https://arxiv.org/abs/{}", id)
}

fn normalize_ws(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[derive(Default)]
struct EntryBuilder {
    id: String,
    title: String,
    summary: String,
    published: String,
    authors: Vec<String>,
    categories: BTreeSet<String>,
    pdf_link: Option<String>,
}

impl EntryBuilder {
    fn add_category(&mut self, e: &BytesStart) {
        for attr in e.attributes().flatten() {
            if attr.key.local_name().as_ref() == b"term" {
                if let Ok(value) = attr.unescape_value() {
                    let value = value.trim();
                    if !value.is_empty() {
                        self.categories.insert(value.to_string());
                    }
                }
            }
        }
    }

    /// `<link title="pdf" href="..."/>`
    fn add_link(&mut self, e: &BytesStart) {
        let mut href = None;
        let mut is_pdf = false;
        for attr in e.attributes().flatten() {
            let Ok(value) = attr.unescape_value() else {
                continue;
            };
            match attr.key.local_name().as_ref() {
                b"href" => href = Some(value.trim().to_string()),
                b"title" if value == "pdf" => is_pdf = true,
                b"type" if value == "application/pdf" => is_pdf = true,
                _ => {}
            }
        }
        if is_pdf {
            if let Some(href) = href.filter(|h| !h.is_empty()) {
                self.pdf_link = Some(href);
            }
        }
    }

    fn build(self) -> Result<Option<Paper>, SearchError> {
        if self.id.contains("/api/errors") {
            return Err(SearchError::Api(self.summary));
        }
        if self.id.is_empty() || self.title.is_empty() {
            warn!("条目缺少 id 或标题，跳过");
            return Ok(None);
        }

        let published = match DateTime::parse_from_rfc3339(&self.published) {
            Ok(dt) => dt.with_timezone(&Utc),
            Err(e) => {
                warn!("无法解析发布时间 '{}' ({}): {}", self.published, self.id, e);
                return Ok(None);
            }
        };

        let id = normalize_arxiv_id(&self.id);
        Ok(Some(Paper {
            pdf_url: self.pdf_link.unwrap_or_else(|| pdf_url(&id)),
            abs_url: abs_url(&id),
            id,
            title: self.title,
            authors: self.authors,
            abstract_text: self.summary,
            published,
            categories: self.categories,
        }))
    }
}

/// 解析 arXiv Atom 响应
pub fn parse_feed(xml: &str) -> Result<Vec<Paper>, SearchError> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut papers = Vec::new();
    let mut entry: Option<EntryBuilder> = None;
    let mut in_author = false;
    let mut text = String::new();

    loop {
        match reader.read_event() {
            Ok(Event::Eof) => break,
            Ok(Event::Start(e)) => {
                text.clear();
                match e.local_name().as_ref() {
                    b"entry" => entry = Some(EntryBuilder::default()),
                    b"author" => in_author = true,
                    b"category" => {
                        if let Some(cur) = entry.as_mut() {
                            cur.add_category(&e);
                        }
                    }
                    b"link" => {
                        if let Some(cur) = entry.as_mut() {
                            cur.add_link(&e);
                        }
                    }
                    _ => {}
                }
            }
            Ok(Event::Empty(e)) => {
                if let Some(cur) = entry.as_mut() {
                    match e.local_name().as_ref() {
                        b"category" => cur.add_category(&e),
                        b"link" => cur.add_link(&e),
                        _ => {}
                    }
                }
            }
            Ok(Event::Text(t)) => {
                let value = t.unescape().map_err(|e| SearchError::Parse(e.to_string()))?;
                text.push_str(&value);
            }
            Ok(Event::CData(t)) => {
                text.push_str(&String::from_utf8_lossy(&t.into_inner()));
            }
            Ok(Event::End(e)) => {
                let name = e.local_name();
                let value = normalize_ws(&text);
                text.clear();

                if name.as_ref() == b"entry" {
                    if let Some(done) = entry.take() {
                        if let Some(paper) = done.build()? {
                            papers.push(paper);
                        }
                    }
                    continue;
                }

                let Some(cur) = entry.as_mut() else {
                    continue;
                };
                match name.as_ref() {
                    b"id" => cur.id = value,
                    b"title" => cur.title = value,
                    b"summary" => cur.summary = value,
                    b"published" => cur.published = value,
                    b"name" if in_author && !value.is_empty() => cur.authors.push(value),
                    b"author" => in_author = false,
                    _ => {}
                }
            }
            Err(e) => {
                return Err(SearchError::Parse(format!(
                    "位置 {}: {}",
                    reader.buffer_position(),
                    e
                )))
            }
            _ => {}
        }
    }

    Ok(papers)
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::{Matcher, Server};

    fn entry(id: &str, title: &str, summary: &str, published: &str, cats: &[&str]) -> String {
        let categories: String = cats
            .iter()
            .map(|c| format!(r#"<category term="{c}" scheme="http://arxiv.org/schemas/atom"/>"#))
            .collect();
        format!(
            r#"<entry>
    <id>http://arxiv.org/abs/{id}</id>
    <updated>{published}</updated>
    <published>{published}</published>
    <title>{title}</title>
    <summary>{summary}</summary>
    <author><name>Ada Lovelace</name></author>
    <author><name>Alan Turing</name></author>
    <link href="http://arxiv.org/abs/{id}" rel="alternate" type="text/html"/>
    {categories}
  </entry>"#
        )
    }

    fn feed(entries: &[String]) -> String {
        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<feed xmlns="http://www.w3.org/2005/Atom" xmlns:arxiv="http://arxiv.org/schemas/atom">
  <title type="html">ArXiv Query</title>
  <id>http://arxiv.org/api/abc</id>
  {}
</feed>"#,
            entries.join("\n")
        )
    }

    /// `days` 天前发布、只有一个分类的条目
    fn recent(id: &str, title: &str, summary: &str, days: i64, category: &str) -> String {
        entry(id, title, summary, &days_ago(days), &[category])
    }

    fn days_ago(days: i64) -> String {
        (Utc::now() - ChronoDuration::days(days))
            .format("%Y-%m-%dT%H:%M:%SZ")
            .to_string()
    }

    fn config(base_url: &str, keywords: &[&str], max_papers: usize) -> SearchConfig {
        SearchConfig {
            keywords: keywords.iter().map(|k| k.to_string()).collect(),
            categories: vec!["cs.LG".to_string(), "cs.CL".to_string()],
            max_papers,
            max_back_days: 7,
            base_url: format!("{}/api/query", base_url),
            request_delay_ms: 0,
            max_retries: 2,
            timeout_secs: 5,
        }
    }

    #[test]
    fn parse_feed_extracts_fields_and_strips_version() {
        let xml = feed(&[entry(
            "2401.01234v2",
            "Sparse\n   Attention  Revisited",
            "We study &lt;sparse&gt; attention.",
            "2024-01-03T10:00:00Z",
            &["cs.LG", "cs.CL"],
        )]);

        let papers = parse_feed(&xml).unwrap();
        assert_eq!(papers.len(), 1);

        let paper = &papers[0];
        assert_eq!(paper.id, "2401.01234");
        assert_eq!(paper.title, "Sparse Attention Revisited");
        assert_eq!(paper.abstract_text, "We study <sparse> attention.");
        assert_eq!(paper.authors, vec!["Ada Lovelace", "Alan Turing"]);
        assert!(paper.categories.contains("cs.CL"));
        assert_eq!(paper.pdf_url, "https://arxiv.org/pdf/2401.01234.pdf");
    }

    #[test]
    fn pdf_link_from_feed_takes_precedence() {
        let xml = feed(&[r#"<entry>
    <id>http://arxiv.org/abs/2401.00002v1</id>
    <published>2024-01-03T10:00:00Z</published>
    <title>Linked</title>
    <summary>s</summary>
    <link href="http://arxiv.org/abs/2401.00002v1" rel="alternate" type="text/html"/>
    <link title="pdf" href="http://arxiv.org/pdf/2401.00002v1" rel="related" type="application/pdf"/>
  </entry>"#
            .to_string()]);

        let papers = parse_feed(&xml).unwrap();
        assert_eq!(papers[0].pdf_url, "http://arxiv.org/pdf/2401.00002v1");
        assert_eq!(papers[0].abs_url, "https://arxiv.org/abs/2401.00002");
    }

    #[test]
    fn old_style_ids_keep_archive_prefix() {
        let old_style = normalize_arxiv_id("http://arxiv.org/abs/cs/9901001v1");
        assert_eq!(old_style, "cs/9901001");
        let unversioned = normalize_arxiv_id("http://arxiv.org/abs/2401.00001");
        assert_eq!(unversioned, "2401.00001");
    }

    #[test]
    fn api_error_entry_becomes_error() {
        let xml = feed(&[r#"<entry><id>http://arxiv.org/api/errors#incorrect_id_format</id>
            <title>Error</title><summary>incorrect id format</summary></entry>"#
            .to_string()]);
        assert!(matches!(
            parse_feed(&xml),
            Err(SearchError::Api(msg)) if msg.contains("incorrect")
        ));
    }

    #[test]
    fn malformed_xml_is_parse_error() {
        assert!(matches!(
            parse_feed("<feed><entry><id>x</title></feed>"),
            Err(SearchError::Parse(_))
        ));
    }

    #[test]
    fn query_quotes_phrases_and_lists_categories() {
        let now = Utc::now();
        let categories = ["cs.LG".to_string(), "cs.AI".to_string()];
        let q = build_query("deep learning", &categories, now, now);
        assert!(q.starts_with("all:\"deep learning\" AND submittedDate:["));
        assert!(q.ends_with("(cat:cs.LG OR cat:cs.AI)"));
    }

    #[tokio::test]
    async fn search_filters_dedups_sorts_and_truncates() {
        let mut server = Server::new_async().await;

        let first = feed(&[
            recent("2401.00001v1", "Transformers", "scaling", 1, "cs.LG"),
            recent("2401.00002v1", "Graphs", "a transformer", 3, "cs.CL"),
            recent("2401.00003v1", "Protein transformer", "bio", 2, "q-bio.BM"),
            recent("2401.00004v1", "Old transformer", "stale", 30, "cs.LG"),
        ]);
        let second = feed(&[
            recent("2401.00001v2", "Transformers", "attention", 1, "cs.LG"),
            recent("2401.00005v1", "Attention sinks", "study", 0, "cs.CL"),
        ]);

        let _m1 = server
            .mock("GET", "/api/query")
            .match_query(Matcher::Regex("search_query=all%3ATransformer".to_string()))
            .with_status(200)
            .with_body(first)
            .create_async()
            .await;
        let _m2 = server
            .mock("GET", "/api/query")
            .match_query(Matcher::Regex("search_query=all%3Aattention".to_string()))
            .with_status(200)
            .with_body(second)
            .create_async()
            .await;

        let config = config(&server.url(), &["Transformer", "attention"], 2);
        let crawler = ArxivCrawler::new(&config).unwrap();
        let mut seen = HashSet::new();

        let papers = crawler.search(&config, &mut seen).await.unwrap();

        let ids: Vec<&str> = papers.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["2401.00005", "2401.00001"]);
        for paper in &papers {
            assert!(config.matches(paper));
        }
        assert!(seen.contains("2401.00002"));
        assert!(!seen.contains("2401.00003"));
        assert!(!seen.contains("2401.00004"));
    }

    #[tokio::test]
    async fn server_error_aborts_search() {
        let mut server = Server::new_async().await;
        let _m = server
            .mock("GET", "/api/query")
            .match_query(Matcher::Any)
            .with_status(500)
            .create_async()
            .await;

        let config = config(&server.url(), &["llm"], 5);
        let crawler = ArxivCrawler::new(&config).unwrap();
        let mut seen = HashSet::new();

        let err = crawler.search(&config, &mut seen).await.unwrap_err();
        assert!(matches!(err, SearchError::Status(s) if s.as_u16() == 500));
    }

    #[tokio::test]
    async fn rate_limit_is_retried_then_fails() {
        let mut server = Server::new_async().await;
        let m = server
            .mock("GET", "/api/query")
            .match_query(Matcher::Any)
            .with_status(503)
            .expect(2)
            .create_async()
            .await;

        let config = config(&server.url(), &["llm"], 5);
        let crawler = ArxivCrawler::new(&config).unwrap();
        let mut seen = HashSet::new();

        let err = crawler.search(&config, &mut seen).await.unwrap_err();
        assert!(matches!(err, SearchError::Exhausted(2)));
        m.assert_async().await;
    }
}

pub mod keywords;

use anyhow::{bail, Result};
use chrono::NaiveTime;
use serde::{Deserialize, Serialize};
use std::path::Path;

pub use keywords::SearchConfig;

pub const DEFAULT_CONFIG_PATH: &str = "config/settings.toml";
pub const ENV_PREFIX: &str = "ARXIV2MAIL";

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AppConfig {
    pub search: SearchConfig,
    pub pdf: PdfConfig,
    pub analyzer: AnalyzerConfig,
    pub composer: ComposerConfig,
    pub mail: MailConfig,
    pub schedule: ScheduleConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PdfConfig {
    pub download_dir: String,
    pub screenshot_width: u32,
    pub timeout_secs: u64,
    /// pdfium 动态库所在目录，为空时使用系统库
    #[serde(default)]
    pub pdfium_library_path: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AnalyzerConfig {
    pub api_key: String,
    pub api_url: String,
    pub model: String,
    pub timeout_secs: u64,
    pub max_retries: u32,
}

/// 邮件正文的组织方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputMode {
    Html,
    Image,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ComposerConfig {
    pub mode: OutputMode,
    #[serde(default)]
    pub font_path: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MailConfig {
    pub smtp_server: String,
    pub smtp_port: u16,
    pub username: String,
    pub password: String,
    pub sender: String,
    pub recipient: String,
    pub timeout_secs: u64,
    pub send_daily_summary: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ScheduleConfig {
    /// 本地时间 HH:MM
    pub daily_time: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    pub file: String,
}

impl AppConfig {
    /// 默认值 → 配置文件 → ARXIV2MAIL__* 环境变量，逐层覆盖
    pub fn load_from(path: &str) -> Result<Self> {
        // .env 不存在时忽略
        let _ = dotenvy::dotenv();

        let settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::from(Path::new(path)).required(false))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("search.keywords")
                    .with_list_parse_key("search.categories")
                    .try_parsing(true),
            )
            .build()?;

        let config: AppConfig = settings.try_deserialize()?;
        Ok(config)
    }

    pub fn save(&self, path: &str) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        if let Some(parent) = Path::new(path).parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    /// 检查运行所需的配置项，一次性报告全部缺失项
    pub fn validate(&self) -> Result<()> {
        let mut problems = Vec::new();

        if self.search.normalized_keywords().is_empty() {
            problems.push("search.keywords".to_string());
        }
        if self.search.max_papers == 0 {
            problems.push("search.max_papers".to_string());
        }
        if self.analyzer.api_key.trim().is_empty() {
            problems.push("analyzer.api_key".to_string());
        }

        let required = [
            ("mail.username", &self.mail.username),
            ("mail.password", &self.mail.password),
            ("mail.sender", &self.mail.sender),
            ("mail.recipient", &self.mail.recipient),
        ];
        for (name, value) in required {
            if value.trim().is_empty() {
                problems.push(name.to_string());
            }
        }

        if self.schedule.daily_time().is_err() {
            problems.push(format!("schedule.daily_time ({})", self.schedule.daily_time));
        }

        if !problems.is_empty() {
            bail!("缺少或无效的配置项: {}", problems.join(", "));
        }
        Ok(())
    }
}

impl ScheduleConfig {
    pub fn daily_time(&self) -> Result<NaiveTime> {
        Ok(NaiveTime::parse_from_str(self.daily_time.trim(), "%H:%M")?)
    }
}

impl Default for PdfConfig {
    fn default() -> Self {
        Self {
            download_dir: "./downloads".to_string(),
            screenshot_width: 1600,
            timeout_secs: 60,
            pdfium_library_path: None,
        }
    }
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            api_url: "https://generativelanguage.googleapis.com/v1beta/openai/chat/completions"
                .to_string(),
            model: "gemini-2.0-flash".to_string(),
            timeout_secs: 30,
            max_retries: 3,
        }
    }
}

impl Default for ComposerConfig {
    fn default() -> Self {
        Self {
            mode: OutputMode::Image,
            font_path: None,
        }
    }
}

impl Default for MailConfig {
    fn default() -> Self {
        Self {
            smtp_server: "smtp.gmail.com".to_string(),
            smtp_port: 465,
            username: String::new(),
            password: String::new(),
            sender: String::new(),
            recipient: String::new(),
            timeout_secs: 30,
            send_daily_summary: false,
        }
    }
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            daily_time: "09:00".to_string(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            file: "arxiv2mail.log".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn complete() -> AppConfig {
        let mut config = AppConfig::default();
        config.analyzer.api_key = "key".to_string();
        config.mail.username = "bot@example.com".to_string();
        config.mail.password = "secret".to_string();
        config.mail.sender = "bot@example.com".to_string();
        config.mail.recipient = "me@example.com".to_string();
        config
    }

    #[test]
    fn default_config_lists_every_missing_credential() {
        let err = AppConfig::default().validate().unwrap_err().to_string();
        for name in ["analyzer.api_key", "mail.username", "mail.password", "mail.recipient"] {
            assert!(err.contains(name), "{err}");
        }
    }

    #[test]
    fn complete_config_validates() {
        complete().validate().unwrap();
    }

    #[test]
    fn bad_daily_time_is_rejected() {
        let mut config = complete();
        config.schedule.daily_time = "25:99".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn saved_file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.toml");
        let path = path.to_str().unwrap();

        let mut config = complete();
        config.search.max_papers = 9;
        config.composer.mode = OutputMode::Html;
        config.save(path).unwrap();

        let loaded = AppConfig::load_from(path).unwrap();
        assert_eq!(loaded.search.max_papers, 9);
        assert_eq!(loaded.composer.mode, OutputMode::Html);
        assert_eq!(loaded.mail.recipient, "me@example.com");
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.toml");
        let loaded = AppConfig::load_from(path.to_str().unwrap()).unwrap();
        assert_eq!(loaded.search.max_papers, 5);
        assert_eq!(loaded.mail.smtp_port, 465);
    }
}

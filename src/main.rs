use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::Path;
use tracing::{error, info, warn};

use arxiv2mail::composer::Composer;
use arxiv2mail::config::{AppConfig, DEFAULT_CONFIG_PATH};
use arxiv2mail::mailer::SmtpMailer;
use arxiv2mail::pdf::PdfiumRenderer;
use arxiv2mail::pipeline::Pipeline;
use arxiv2mail::utils::{logger, scheduler::TaskScheduler};

#[derive(Parser)]
#[command(name = "arxiv2mail")]
#[command(about = "ArXiv论文每日检索、AI概括与邮件推送", long_about = None)]
struct Cli {
    /// 配置文件路径
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 生成默认配置文件和目录
    Init,
    /// 检查配置、SMTP 登录、字体和 pdfium
    Check,
    /// 立即执行一次
    Once,
    /// 按配置的时间每天执行
    Schedule,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let app_config = AppConfig::load_from(&cli.config)?;

    let _guard = logger::init_logger(&app_config.logging.file);
    info!("arxiv2mail 启动");

    match cli.command {
        Commands::Init => init_command(&cli.config, &app_config).await?,
        Commands::Check => check_command(&app_config).await?,
        Commands::Once => once_command(app_config).await?,
        Commands::Schedule => schedule_command(app_config).await?,
    }

    Ok(())
}

async fn init_command(path: &str, app_config: &AppConfig) -> Result<()> {
    info!("初始化配置...");

    let download_dir = Path::new(&app_config.pdf.download_dir);
    tokio::fs::create_dir_all(download_dir).await?;

    if tokio::fs::try_exists(path).await.unwrap_or(false) {
        warn!("配置文件已存在，未覆盖: {}", path);
    } else {
        AppConfig::default().save(path)?;
        info!("已生成配置文件: {}", path);
    }

    info!("✅ 初始化完成！");
    info!("下一步:");
    info!(
        "  1. 编辑 {} 填写 API key 和邮箱信息（或使用 .env / ARXIV2MAIL__ 环境变量）",
        path
    );
    info!("  2. 运行 'arxiv2mail check' 检查配置");
    info!("  3. 运行 'arxiv2mail once' 立即执行一次");

    Ok(())
}

async fn check_command(app_config: &AppConfig) -> Result<()> {
    app_config.validate()?;
    info!("✅ 配置项完整");

    let mailer = SmtpMailer::new(&app_config.mail)?;
    match mailer.test_connection().await {
        Ok(true) => info!("✅ SMTP 连接和登录正常"),
        Ok(false) => warn!("⚠️ SMTP 服务器未响应"),
        Err(e) => error!("❌ SMTP 检查失败: {}", e),
    }

    let download_dir = Path::new(&app_config.pdf.download_dir);
    let composer = Composer::new(&app_config.composer, download_dir);
    if composer.is_ready() {
        info!("✅ 输出模式可用: {:?}", composer.mode());
    } else {
        error!("❌ 图片模式没有可用的中文字体，请配置 composer.font_path");
    }

    if PdfiumRenderer::new(app_config.pdf.pdfium_library_path.clone()).is_available() {
        info!("✅ pdfium 可用");
    } else {
        warn!("⚠️ pdfium 不可用，邮件中将不包含论文首页截图");
    }

    Ok(())
}

async fn once_command(app_config: AppConfig) -> Result<()> {
    app_config.validate()?;
    let pipeline = Pipeline::from_config(app_config)?;
    let report = pipeline.run().await?;

    info!(
        "本次发送 {} 篇，失败记录 {} 条",
        report.delivered(),
        report.failures.len()
    );
    Ok(())
}

async fn schedule_command(app_config: AppConfig) -> Result<()> {
    app_config.validate()?;
    let at = app_config.schedule.daily_time()?;

    info!("启动定时任务调度器...");
    let scheduler = TaskScheduler::new().await?;

    scheduler
        .add_daily_job(at, move || {
            let app_config = app_config.clone();
            async move {
                let result = match Pipeline::from_config(app_config) {
                    Ok(pipeline) => pipeline.run().await.map_err(anyhow::Error::from),
                    Err(e) => Err(e),
                };
                if let Err(e) = result {
                    error!("❌ 定时任务失败: {:#}", e);
                }
            }
        })
        .await?;

    scheduler.start().await?;

    info!("调度器运行中，按 Ctrl+C 停止");

    tokio::signal::ctrl_c().await?;
    info!("收到停止信号");

    scheduler.shutdown().await?;
    Ok(())
}

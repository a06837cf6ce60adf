use anyhow::Result;
use chrono::{FixedOffset, Local, NaiveTime, Offset, Timelike};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{info, warn};

pub struct TaskScheduler {
    scheduler: JobScheduler,
    run_lock: Arc<Mutex<()>>,
}

impl TaskScheduler {
    pub async fn new() -> Result<Self> {
        let scheduler = JobScheduler::new().await?;
        Ok(Self {
            scheduler,
            run_lock: Arc::new(Mutex::new(())),
        })
    }

    /// 每天在本地时间 `at` 执行一次。上一次执行尚未结束时跳过本次。
    pub async fn add_daily_job<F, Fut>(&self, at: NaiveTime, job_fn: F) -> Result<()>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let offset = Local::now().offset().fix();
        let cron_expr = daily_cron(at, offset);
        let local_time = at.format("%H:%M");
        info!("定时任务: 每天 {} (cron UTC: {})", local_time, cron_expr);

        let job_fn = Arc::new(job_fn);
        let run_lock = Arc::clone(&self.run_lock);

        let job = Job::new_async(cron_expr.as_str(), move |_uuid, _lock| {
            let job_fn = Arc::clone(&job_fn);
            let run_lock = Arc::clone(&run_lock);
            Box::pin(async move {
                info!("执行定时任务");
                run_exclusive(&run_lock, job_fn()).await;
            })
        })?;

        self.scheduler.add(job).await?;
        Ok(())
    }

    pub async fn start(&self) -> Result<()> {
        self.scheduler.start().await?;
        info!("任务调度器已启动");
        Ok(())
    }

    pub async fn shutdown(mut self) -> Result<()> {
        self.scheduler.shutdown().await?;
        info!("任务调度器已关闭");
        Ok(())
    }
}

/// 持有运行锁执行任务；锁被占用时直接返回 false
async fn run_exclusive<Fut>(lock: &Mutex<()>, task: Fut) -> bool
where
    Fut: Future<Output = ()>,
{
    let Ok(_guard) = lock.try_lock() else {
        warn!("上一次任务仍在执行，跳过本次触发");
        return false;
    };
    task.await;
    true
}

/// 把本地时间换算成 UTC 下的六段式 cron 表达式（秒 分 时 日 月 周）
pub fn daily_cron(local: NaiveTime, offset: FixedOffset) -> String {
    let local_secs = i64::from(local.num_seconds_from_midnight());
    let offset_secs = i64::from(offset.local_minus_utc());
    let utc_secs = (local_secs - offset_secs).rem_euclid(86_400);
    format!("0 {} {} * * *", (utc_secs % 3600) / 60, utc_secs / 3600)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    #[test]
    fn converts_local_time_to_utc_cron() {
        let beijing = FixedOffset::east_opt(8 * 3600).unwrap();
        assert_eq!(daily_cron(at(9, 0), beijing), "0 0 1 * * *");
        assert_eq!(daily_cron(at(7, 30), beijing), "0 30 23 * * *");

        let utc = FixedOffset::east_opt(0).unwrap();
        assert_eq!(daily_cron(at(0, 5), utc), "0 5 0 * * *");

        let new_york = FixedOffset::west_opt(5 * 3600).unwrap();
        assert_eq!(daily_cron(at(21, 15), new_york), "0 15 2 * * *");
    }

    #[tokio::test]
    async fn overlapping_trigger_is_skipped_while_locked() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let lock = Mutex::new(());
        let runs = AtomicUsize::new(0);

        let runs = &runs;
        let count = || async move {
            runs.fetch_add(1, Ordering::SeqCst);
        };

        let held = lock.lock().await;
        assert!(!run_exclusive(&lock, count()).await);
        drop(held);

        assert!(run_exclusive(&lock, count()).await);
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }
}

use fanout_pool::{Config, Pool, PoolError};
use tokio::runtime::Builder;
use tracing_subscriber::EnvFilter;
use std::{
    error::Error,
    time::{Duration, Instant},
};


fn main() -> Result<(), Box<dyn Error>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let rt = Builder::new_multi_thread()
        .enable_all()
        .build()?;

    rt.block_on(async {
        let pool = Pool::with_config(Config::io_bound())?;
        let payloads: Vec<u32> = (0..pool.config().queue_depth as u32).collect();
        let needle = payloads.len() as u32 / 2;

        let now = Instant::now();
        let hit = pool
            .run_jobs(payloads, move |i| async move {
                tokio::time::sleep(Duration::from_millis(u64::from(i % 7))).await;
                Ok::<_, PoolError>((i == needle).then(|| i.to_be_bytes().to_vec()))
            })
            .await?;

        tracing::info!(?hit, elapsed = ?now.elapsed(), "batch finished");
        pool.shutdown_and_join().await;
        tracing::info!(metrics = ?pool.metrics(), "pool drained");
        Ok::<_, PoolError>(())
    })?;
    Ok(())
}

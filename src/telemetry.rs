use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::manager::StreamRegistry;

/// Swaps every registered camera's byte counter to zero and returns the sum.
pub async fn sample(registry: &StreamRegistry) -> u64 {
    registry
        .snapshot()
        .await
        .iter()
        .map(|pipe| pipe.take_received())
        .sum()
}

/// Samples once per configured interval until cancelled. The receiver always
/// holds the total of the last completed interval.
pub(crate) fn start_telemetry(
    registry: StreamRegistry,
    cancel: CancellationToken,
) -> watch::Receiver<u64> {
    let (tx, rx) = watch::channel(0u64);
    let period = registry.config().telemetry_interval();

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // first tick completes immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    log::info!("Telemetry: stopped");
                    break;
                }
                _ = ticker.tick() => {
                    let total = sample(&registry).await;
                    if total > 0 {
                        log::info!("Telemetry: ingested {} bytes in {:?}", total, period);
                    } else {
                        log::debug!("Telemetry: idle");
                    }
                    tx.send_replace(total);
                }
            }
        }
    });

    rx
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use bytes::Bytes;
    use ffmpeg_proc::ArgTemplate;

    use super::*;
    use crate::{config::ServerConfig, media::types::CameraId};

    fn registry(dir: &std::path::Path, interval_ms: u64) -> StreamRegistry {
        let mut config = ServerConfig::default().with_data_dir(dir);
        config.record = false;
        config.telemetry_interval_ms = interval_ms;
        config.codec.program = "sh".to_string();
        config.codec.live_args = ArgTemplate::new(["-c", "cat > \"$0\"", "{output}"]);
        StreamRegistry::new(Arc::new(config), CancellationToken::new())
    }

    #[tokio::test]
    async fn test_sample_sums_and_resets_all_cameras() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let registry = registry(dir.path(), 1_000);

        let a = registry.get_or_create(&CameraId::parse("a")?).await?;
        let b = registry.get_or_create(&CameraId::parse("b")?).await?;
        a.enqueue(Bytes::from(vec![0u8; 100])).await?;
        a.enqueue(Bytes::from(vec![0u8; 20])).await?;
        b.enqueue(Bytes::from(vec![0u8; 5])).await?;

        assert_eq!(sample(&registry).await, 125);
        assert_eq!(a.take_received(), 0);
        assert_eq!(b.take_received(), 0);
        assert_eq!(sample(&registry).await, 0);

        b.enqueue(Bytes::from(vec![0u8; 7])).await?;
        assert_eq!(sample(&registry).await, 7);

        for pipe in [a, b] {
            pipe.signal_end().await;
            pipe.closed().await;
        }
        Ok(())
    }

    #[tokio::test]
    async fn test_deregistered_camera_is_absent() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let registry = registry(dir.path(), 1_000);

        let a = registry.get_or_create(&CameraId::parse("a")?).await?;
        a.enqueue(Bytes::from(vec![0u8; 64])).await?;
        a.signal_end().await;
        a.closed().await;

        assert_eq!(sample(&registry).await, 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_periodic_task_publishes_interval_total() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let registry = registry(dir.path(), 50);
        let cancel = CancellationToken::new();
        let mut rx = start_telemetry(registry.clone(), cancel.clone());

        let pipe = registry.get_or_create(&CameraId::parse("a")?).await?;
        pipe.enqueue(Bytes::from(vec![0u8; 300])).await?;

        let observed = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                rx.changed().await.unwrap();
                let total = *rx.borrow();
                if total > 0 {
                    return total;
                }
            }
        })
        .await?;
        assert_eq!(observed, 300);

        cancel.cancel();
        pipe.signal_end().await;
        pipe.closed().await;
        Ok(())
    }
}

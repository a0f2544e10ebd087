//! The sampling loop.
//!
//! Readings arrive one per line. A number is a reading; `null`, `none` or
//! `-` mark a failed measurement. Blank lines and `#` comments are skipped.
//!
//! Input is read on a dedicated thread and forwarded over a channel, so a
//! reading source that keeps its pipe open never holds up shutdown.

use std::collections::BTreeMap;
use std::future::Future;
use std::io::{self, BufRead};
use std::sync::Arc;
use std::time::Duration;

use hydro_alerts::{AlertConfig, AlertManager, Dispatch, Result, TracingObserver};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::channels::build_registry;

const LINE_BUFFER: usize = 64;

/// Counters for one run of the sampling loop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    /// Lines that carried a reading or an absent marker.
    pub readings: usize,
    /// Readings that were absent or unparseable.
    pub absent: usize,
    /// Events recorded.
    pub events: usize,
    /// Bursts started.
    pub bursts: usize,
    /// Bursts dropped while another was active or with no channels.
    pub dropped: usize,
}

/// Parses one input line.
///
/// Returns `None` for blank lines and comments, `Some(None)` for an absent
/// or unparseable reading.
#[must_use]
pub fn parse_reading(line: &str) -> Option<Option<f64>> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }

    match line.to_ascii_lowercase().as_str() {
        "null" | "none" | "-" => Some(None),
        value => match value.parse::<f64>() {
            Ok(reading) if reading.is_finite() => Some(Some(reading)),
            _ => {
                warn!(input = %line, "unparseable reading treated as absent");
                Some(None)
            }
        },
    }
}

/// Builds the manager with every configured channel and a tracing observer.
///
/// # Errors
///
/// Returns an error if the configuration or a channel is invalid.
pub fn build_manager(config: &AlertConfig) -> Result<AlertManager> {
    let registry = Arc::new(build_registry(config)?);
    let manager = AlertManager::new(config, registry)?;
    manager.add_observer(Arc::new(TracingObserver::new()));
    Ok(manager)
}

/// Probes every channel in the background and logs a READY / NOT AVAILABLE summary.
pub fn spawn_probe(manager: Arc<AlertManager>, timeout: Duration) -> JoinHandle<BTreeMap<String, bool>> {
    tokio::spawn(async move {
        let results = manager.probe_channels(timeout).await;
        for (name, available) in &results {
            if *available {
                info!(channel = %name, "READY");
            } else {
                warn!(channel = %name, "NOT AVAILABLE");
            }
        }
        info!(
            ready = results.values().filter(|a| **a).count(),
            total = results.len(),
            "channel probe complete"
        );
        results
    })
}

/// Reads lines from `reader` on a dedicated thread.
///
/// The thread stops at end of input, after a read error, or once the
/// receiver is dropped. A thread still blocked in a read does not keep the
/// process alive.
///
/// # Errors
///
/// Returns an error if the thread cannot be spawned.
pub fn spawn_line_reader<R>(reader: R) -> io::Result<mpsc::Receiver<io::Result<String>>>
where
    R: BufRead + Send + 'static,
{
    let (tx, rx) = mpsc::channel(LINE_BUFFER);
    std::thread::Builder::new()
        .name("hydroguard-input".to_string())
        .spawn(move || {
            for line in reader.lines() {
                let failed = line.is_err();
                if tx.blocking_send(line).is_err() || failed {
                    break;
                }
            }
        })?;
    Ok(rx)
}

/// Feeds readings from `lines` into `manager` until end of input or `shutdown`.
///
/// # Errors
///
/// Returns the first read error forwarded on `lines`.
pub async fn run_readings<F>(
    manager: &AlertManager,
    mut lines: mpsc::Receiver<io::Result<String>>,
    shutdown: F,
) -> io::Result<RunSummary>
where
    F: Future<Output = ()>,
{
    let mut summary = RunSummary::default();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            () = &mut shutdown => {
                info!("shutdown requested");
                break;
            }
            line = lines.recv() => {
                let Some(line) = line else {
                    debug!("end of input");
                    break;
                };
                let line = line?;
                let Some(reading) = parse_reading(&line) else {
                    continue;
                };

                summary.readings += 1;
                if reading.is_none() {
                    summary.absent += 1;
                }

                match manager.ingest(reading) {
                    Dispatch::Idle | Dispatch::Periodic { .. } => {}
                    Dispatch::Resolved(_) => summary.events += 1,
                    Dispatch::Burst { .. } => {
                        summary.events += 1;
                        summary.bursts += 1;
                    }
                    Dispatch::Dropped { .. } => {
                        summary.events += 1;
                        summary.dropped += 1;
                    }
                }
            }
        }
    }

    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use hydro_alerts::{AlertLevel, BurstConfig};

    fn config() -> AlertConfig {
        AlertConfig {
            burst: BurstConfig {
                attempts: 1,
                interval_ms: 0,
                send_timeout_ms: 1_000,
            },
            ..AlertConfig::sample()
        }
    }

    mod parse_tests {
        use super::*;
        use test_case::test_case;

        #[test_case("152.5", Some(Some(152.5)); "number")]
        #[test_case("  270 ", Some(Some(270.0)); "padded")]
        #[test_case("null", Some(None); "null marker")]
        #[test_case("NONE", Some(None); "none marker")]
        #[test_case("-", Some(None); "dash marker")]
        #[test_case("abc", Some(None); "garbage")]
        #[test_case("inf", Some(None); "infinite")]
        #[test_case("", None; "blank")]
        #[test_case("# camera restarted", None; "comment")]
        fn parse(input: &str, expected: Option<Option<f64>>) {
            assert_eq!(parse_reading(input), expected);
        }
    }

    mod loop_tests {
        use super::*;

        #[tokio::test]
        async fn feeds_readings_until_eof() {
            let mut config = config();
            config.channels.retain(|name, _| name == "log");
            let manager = build_manager(&config).unwrap();

            let input = io::Cursor::new(b"# start\n100\n160\n\nnull\n145\n120\n".to_vec());
            let lines = spawn_line_reader(input).unwrap();
            let summary = run_readings(&manager, lines, std::future::pending())
                .await
                .unwrap();

            assert_eq!(summary.readings, 5);
            assert_eq!(summary.absent, 1);
            assert_eq!(summary.events, 3);
            assert_eq!(summary.bursts + summary.dropped, 2);

            manager.wait_idle().await;
            assert_eq!(manager.current_level(), AlertLevel::Normal);
            assert_eq!(manager.history(10).len(), 3);
        }

        #[tokio::test]
        async fn stops_on_shutdown() {
            let manager = build_manager(&AlertConfig::default()).unwrap();
            let (_tx, rx) = mpsc::channel(1);

            let summary = run_readings(&manager, rx, async {}).await.unwrap();
            assert_eq!(summary, RunSummary::default());
        }

        #[tokio::test]
        async fn read_error_ends_the_loop() {
            let manager = build_manager(&AlertConfig::default()).unwrap();
            let (tx, rx) = mpsc::channel(2);
            tx.send(Ok("100".to_string())).await.unwrap();
            tx.send(Err(io::Error::other("pipe broke"))).await.unwrap();

            let err = run_readings(&manager, rx, std::future::pending())
                .await
                .unwrap_err();
            assert_eq!(err.to_string(), "pipe broke");
        }

        /// Input whose first read blocks until the test lets go of it.
        struct OpenInput(std::sync::mpsc::Receiver<()>);

        impl io::Read for OpenInput {
            fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
                let _ = self.0.recv();
                Ok(0)
            }
        }

        #[test]
        fn shutdown_does_not_wait_for_open_input() {
            let (hold, held) = std::sync::mpsc::channel::<()>();
            let started = std::time::Instant::now();

            let runtime = tokio::runtime::Builder::new_multi_thread()
                .worker_threads(1)
                .enable_all()
                .build()
                .unwrap();
            let summary = runtime.block_on(async {
                let manager = build_manager(&AlertConfig::default()).unwrap();
                let lines = spawn_line_reader(io::BufReader::new(OpenInput(held))).unwrap();
                run_readings(&manager, lines, tokio::time::sleep(Duration::from_millis(50)))
                    .await
                    .unwrap()
            });
            drop(runtime);

            assert_eq!(summary, RunSummary::default());
            assert!(started.elapsed() < Duration::from_secs(5));
            drop(hold);
        }
    }

    mod probe_tests {
        use super::*;

        #[tokio::test]
        async fn probe_runs_in_background() {
            let mut config = config();
            config.channels.retain(|name, _| name == "log");
            let manager = Arc::new(build_manager(&config).unwrap());

            let results = spawn_probe(Arc::clone(&manager), Duration::from_secs(1))
                .await
                .unwrap();
            assert_eq!(results.get("log"), Some(&true));
            assert_eq!(manager.status().available_channels(), 1);
        }
    }
}

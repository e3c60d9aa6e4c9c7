use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tokio::time::{Duration, sleep};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use linkvault_core::app::{AppBuilder, Submission};
use linkvault_core::domain::{OpStatus, RequestParams};
use linkvault_core::ports::{FetchError, FetchedArtifact, Fetcher, ProgressSink};
use linkvault_core::{VaultConfig, VaultError};

/// 上流の代わりに、パラメータの値の数 × 1 MiB のファイルを書くだけの Fetcher
struct DemoFetcher {
    root: PathBuf,
}

#[async_trait]
impl Fetcher for DemoFetcher {
    async fn fetch(
        &self,
        params: &RequestParams,
        progress: &dyn ProgressSink,
    ) -> Result<FetchedArtifact, FetchError> {
        progress.set_request_id(format!("demo-{}", unix_millis()));
        progress.set_status(OpStatus::Running);

        let values = params.iter().map(|(_, v)| v.strings().count()).sum::<usize>().max(1);
        for step in 1..=4 {
            sleep(Duration::from_millis(100)).await;
            progress.set_fraction(step as f64 / 4.0);
        }

        let path = self.root.join(format!("demo_{}.nc", unix_millis()));
        let bytes = vec![0u8; values * 1024 * 1024];
        tokio::fs::write(&path, &bytes).await?;
        Ok(FetchedArtifact {
            path,
            size_bytes: bytes.len() as u64,
        })
    }
}

fn unix_millis() -> u128 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default()
}

#[derive(Serialize)]
struct SubmissionView<'a> {
    op_id: String,
    link_id: String,
    filename: &'a str,
    size_mb: f64,
    expiry_hours: u32,
    cache_hit: bool,
}

impl<'a> From<&'a Submission> for SubmissionView<'a> {
    fn from(s: &'a Submission) -> Self {
        Self {
            op_id: s.op_id.to_string(),
            link_id: s.link_id.to_string(),
            filename: &s.filename,
            size_mb: s.size_mb,
            expiry_hours: s.expiry_hours,
            cache_hit: s.cache_hit,
        }
    }
}

fn default_params() -> RequestParams {
    RequestParams::new()
        .with("product_type", vec!["reanalysis"])
        .with("variable", vec!["2m_temperature", "total_precipitation"])
        .with("year", vec!["2024"])
        .with("month", vec!["01", "02"])
        .with("data_format", "netcdf")
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    if let Err(e) = run().await {
        error!(error = %e, kind = ?e.kind(), "linkvault demo failed");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), VaultError> {
    let config = VaultConfig::load()?;
    let serve = std::env::args().any(|arg| arg == "--serve");
    let params = match std::env::args().skip(1).find(|arg| arg.starts_with('{')) {
        Some(raw) => serde_json::from_str(&raw).map_err(|e| {
            VaultError::Config(linkvault_core::config::ConfigError::Invalid {
                key: "request params",
                reason: e.to_string(),
            })
        })?,
        None => default_params(),
    };

    let app = AppBuilder::new(config.clone())
        .fetcher(Arc::new(DemoFetcher {
            root: config.artifact_root.clone(),
        }))
        .build()?;
    let reaper = app.start_reaper();
    let broker = app.broker();

    // (A) 1 回目は上流から取得、2 回目は同じ署名なのでキャッシュヒット
    let first = broker.submit("127.0.0.1", &params).await?;
    print_json("submitted", &SubmissionView::from(&first));
    let second = broker.submit("127.0.0.1", &params).await?;
    print_json("submitted", &SubmissionView::from(&second));

    // (B) 3 回目はデフォルト設定（60 秒に 2 回）ならレート制限
    match broker.submit("127.0.0.1", &params).await {
        Ok(third) => print_json("submitted", &SubmissionView::from(&third)),
        Err(e @ VaultError::RateLimited { .. }) => {
            warn!(retry_after_secs = e.retry_after().map(|d| d.as_secs()), "third submission rate limited");
        }
        Err(e) => return Err(e),
    }

    // (C) リンクを使う
    let link_id = first.link_id.to_string();
    let redemption = broker.redeem(&link_id)?;
    info!(
        file = %redemption.artifact_path.display(),
        remaining = redemption.remaining(),
        "redeemed link"
    );
    print_json("link_status", &broker.link_status(&link_id));
    if let Some(view) = broker.progress(&first.op_id.to_string()) {
        print_json("progress", &view);
    }
    print_json("status", &app.status());

    if serve {
        info!("reaper running, press Ctrl-C to stop");
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for Ctrl-C");
        }
    }

    // (D) Reaper を止める（最後に 1 回回収する）
    let exit = reaper.shutdown(app.shutdown_timeout()).await;
    info!(?exit, "reaper stopped");
    Ok(())
}

fn print_json<T: Serialize>(label: &str, value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{label}: {json}"),
        Err(e) => warn!(error = %e, label, "failed to render output"),
    }
}

//! `dlq run` – host the worker pool until interrupted.

use anyhow::Result;
use dlq_core::executor::HttpExecutor;
use dlq_core::worker::{PoolSettings, WorkerPool};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::cli::control_socket;
use crate::cli::Env;

/// Cancels the returned token on Ctrl-C.
pub(crate) fn shutdown_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt received, shutting down");
            trigger.cancel();
        }
    });
    token
}

pub async fn run_server(env: Env, max_concurrent: Option<usize>) -> Result<()> {
    let mut settings = PoolSettings::from_config(&env.cfg);
    if let Some(n) = max_concurrent {
        settings.max_concurrent = n;
    }
    let mut pool = WorkerPool::new(
        env.store.clone(),
        Arc::new(HttpExecutor::default()),
        Arc::clone(&env.control),
        env.scratch.clone(),
        Arc::clone(&env.clock),
        settings,
    );

    let recovered = pool.recover().await?;
    if !recovered.is_empty() {
        println!("Recovered {} interrupted job(s)", recovered.len());
    }

    let socket_path = dlq_core::control::default_control_socket_path().ok();
    let listener = match &socket_path {
        Some(path) => match control_socket::spawn_control_listener(env.service.clone(), path) {
            Ok(handle) => {
                tracing::debug!(path = %path.display(), "control socket listening");
                Some(handle)
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), "control socket unavailable: {:#}", e);
                None
            }
        },
        None => None,
    };

    println!("Worker pool running (Ctrl-C to stop)");
    pool.run(shutdown_on_ctrl_c()).await;

    if let Some(handle) = listener {
        handle.abort();
    }
    if let Some(path) = socket_path {
        let _ = std::fs::remove_file(path);
    }
    let stats = env.service.stats().await?;
    println!(
        "Stopped: {} pending, {} downloading (resumed on next run), {} completed, {} failed",
        stats.pending, stats.downloading, stats.completed, stats.failed
    );
    Ok(())
}

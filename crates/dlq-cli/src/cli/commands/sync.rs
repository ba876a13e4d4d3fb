//! `dlq sync` – reconcile the client mirror and materialize finished jobs.

use anyhow::{Context, Result};
use dlq_core::client::{DirLibrary, MirrorDb, Poller, Reconciler};
use std::sync::Arc;

use super::run::shutdown_on_ctrl_c;
use crate::cli::Env;

pub async fn run_sync(env: &Env, once: bool) -> Result<()> {
    let mirror = MirrorDb::open_default().await.context("open client mirror")?;
    let library = DirLibrary::new(env.cfg.library_root()?);
    println!("Library: {}", library.root().display());
    let reconciler = Reconciler::new(Arc::new(env.service.clone()), mirror, Arc::new(library));

    if once {
        let report = reconciler.reconcile_once().await?;
        println!(
            "Synced: {} new, {} updated, {} removed, {} materialized, {} failed, {} active",
            report.applied.created,
            report.applied.updated,
            report.applied.deleted.len(),
            report.materialized.len(),
            report.failed.len(),
            report.active
        );
        return Ok(());
    }

    let mut poller = Poller::new(reconciler, env.cfg.poll_interval(), env.cfg.poll.drain_cycles);
    poller.run_until_idle(shutdown_on_ctrl_c()).await;
    let entries = poller.reconciler().mirror().entries().await?;
    let materialized = entries.iter().filter(|e| e.materialized).count();
    println!("Mirror holds {} job(s), {} in the library", entries.len(), materialized);
    Ok(())
}

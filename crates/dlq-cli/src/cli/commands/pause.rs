//! `dlq pause <id>` – pause a job. If `dlq run` is active, the request goes to
//! it so the running download is stopped by its worker.

use anyhow::Result;
use dlq_core::service::QueueService;
use dlq_core::store::JobId;

use crate::cli::control_socket::{self, ControlVerb};

pub async fn run_pause(service: &QueueService, id: JobId) -> Result<()> {
    let status = match control_socket::request(ControlVerb::Pause, id).await? {
        Some(reply) => reply.into_result()?,
        None => service.pause(id).await?.status,
    };
    println!("Job {id} is {status}");
    Ok(())
}

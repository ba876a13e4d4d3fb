//! `dlq cancel <id>` – cancel a job, through `dlq run` when one is active.

use anyhow::Result;
use dlq_core::service::QueueService;
use dlq_core::store::JobId;

use crate::cli::control_socket::{self, ControlVerb};

pub async fn run_cancel(service: &QueueService, id: JobId) -> Result<()> {
    let status = match control_socket::request(ControlVerb::Cancel, id).await? {
        Some(reply) => reply.into_result()?,
        None => service.cancel(id).await?.status,
    };
    println!("Job {id} is {status}");
    Ok(())
}

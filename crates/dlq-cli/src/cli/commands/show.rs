//! `dlq show <id>` – one job in detail.

use anyhow::Result;
use dlq_core::service::QueueService;
use dlq_core::store::JobId;

use super::format_progress;

pub async fn run_show(service: &QueueService, id: JobId) -> Result<()> {
    let job = service.get(id).await?;
    println!("id:          {}", job.id);
    println!("source:      {}", job.source);
    println!("format:      {}", job.output_format);
    println!("priority:    {}", job.priority);
    println!("status:      {}", job.status);
    println!("progress:    {}", format_progress(job.progress));
    if let Some(pos) = job.position {
        println!("position:    {pos}");
    }
    println!("retries:     {}/{}", job.retry_count, job.max_retries);
    if let Some(key) = &job.idempotency_key {
        println!("key:         {key}");
    }
    if let Some(msg) = &job.error_message {
        let code = job.error_code.as_deref().unwrap_or("-");
        println!("error:       {msg} ({code})");
    }
    if let Some(result) = &job.result_ref {
        println!("result:      {result}");
    }
    if let Some(size) = job.file_size {
        println!("size:        {size} bytes");
    }
    if let Some(title) = &job.metadata.title {
        println!("title:       {title}");
    }
    if let Some(artist) = &job.metadata.artist {
        println!("artist:      {artist}");
    }
    if let Some(secs) = job.metadata.duration_secs {
        println!("duration:    {secs:.0}s");
    }
    Ok(())
}

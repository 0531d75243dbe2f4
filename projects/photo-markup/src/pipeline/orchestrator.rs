// Export orchestrator: manages export job lifecycle
//
// Each job runs on its own thread, tracks its state in a process-wide
// registry and is read back by the HTTP progress endpoints.

pub use crate::pipeline::types::ExportState;
use crate::pipeline::export::{run_export, ExportRequest, ExportServices, PhotoProgress};
use anyhow::Result;
use std::any::Any;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, RwLock};
use std::thread;

// Global registry of export jobs
lazy_static::lazy_static! {
    static ref EXPORT_REGISTRY: RwLock<HashMap<String, Arc<ExportState>>> =
        RwLock::new(HashMap::new());
}

pub fn get_export_state(job_id: &str) -> Option<Arc<ExportState>> {
    EXPORT_REGISTRY
        .read()
        .ok()
        .and_then(|registry| registry.get(job_id).cloned())
}

/// All known jobs, newest first.
pub fn list_export_states() -> Vec<Arc<ExportState>> {
    let mut states: Vec<Arc<ExportState>> = EXPORT_REGISTRY
        .read()
        .map(|registry| registry.values().cloned().collect())
        .unwrap_or_default();
    states.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    states
}

fn register_export(state: Arc<ExportState>) -> Result<()> {
    tracing::info!("Registering export job: {}", state.job_id);
    EXPORT_REGISTRY
        .write()
        .map_err(|_| anyhow::anyhow!("Export registry lock poisoned"))?
        .insert(state.job_id.clone(), state);
    Ok(())
}

#[cfg(test)]
fn unregister_export(job_id: &str) {
    if let Ok(mut registry) = EXPORT_REGISTRY.write() {
        registry.remove(job_id);
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

pub fn new_job_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Registers a new job and runs it on a background thread.
pub fn start_export(services: Arc<ExportServices>, request: ExportRequest) -> Result<Arc<ExportState>> {
    let job_id = new_job_id();
    let state = Arc::new(ExportState::new(job_id.clone()));
    register_export(state.clone())?;

    let state_job = state.clone();
    thread::Builder::new()
        .name(format!("export-{}", &job_id[..8]))
        .spawn(move || {
            let progress_state = state_job.clone();
            let on_photo = move |p: &PhotoProgress| {
                progress_state.record_photo(p.processed, p.total, p.failed, p.elapsed_ms)
            };

            // The workspace guard still cleans up while unwinding.
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                run_export(&services, &job_id, &request, on_photo)
            }));
            match outcome {
                Ok(Ok(summary)) => state_job.mark_complete(summary.archive),
                Ok(Err(e)) => {
                    tracing::error!("Export job {} failed: {:#}", job_id, e);
                    state_job.mark_failed(format!("{:#}", e));
                }
                Err(payload) => {
                    let message = panic_message(payload.as_ref());
                    tracing::error!("Export job {} panicked: {}", job_id, message);
                    state_job.mark_failed(format!("Export panicked: {}", message));
                }
            }
        })?;

    Ok(state)
}

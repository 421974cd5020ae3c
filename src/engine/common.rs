// src/engine/common.rs
//
// Common utilities shared across engine modules.

use crate::error::IngestError;

/// Run a codec closure with panics converted to typed errors.
///
/// mozjpeg and rav1d sit on top of C-heritage code paths that abort via panic
/// on some malformed inputs. A pipeline fed untrusted bytes must survive that:
/// the panic is caught here and surfaced as `IngestError::Internal` carrying
/// the stage label.
pub fn run_with_panic_policy<T, F>(stage: &'static str, f: F) -> Result<T, IngestError>
where
    F: FnOnce() -> Result<T, IngestError> + std::panic::UnwindSafe,
{
    match std::panic::catch_unwind(f) {
        Ok(result) => result,
        Err(payload) => {
            let detail = if let Some(s) = payload.downcast_ref::<&str>() {
                s.to_string()
            } else if let Some(s) = payload.downcast_ref::<String>() {
                s.clone()
            } else {
                "unknown panic".to_string()
            };
            tracing::warn!(stage, %detail, "codec panicked");
            Err(IngestError::internal(format!("{stage}: {detail}")))
        }
    }
}

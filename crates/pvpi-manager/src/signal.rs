//! Operator stop requests.
//!
//! SIGINT, SIGTERM and SIGHUP all count as a stop. Service managers send
//! SIGTERM, so it must reach the same cleanup path as Ctrl-C.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::info;

use crate::error::ManagerResult;

/// Run `on_stop` whenever a stop signal arrives.
///
/// Only one handler can be installed per process.
pub fn on_stop_signal<F>(mut on_stop: F) -> ManagerResult<()>
where
    F: FnMut() + Send + 'static,
{
    ctrlc::set_handler(move || {
        info!("Stop signal received");
        on_stop();
    })?;
    Ok(())
}

/// Install a handler that raises the returned flag on a stop signal.
pub fn stop_flag_on_signal() -> ManagerResult<Arc<AtomicBool>> {
    let stop = Arc::new(AtomicBool::new(false));
    let flag = stop.clone();
    on_stop_signal(move || flag.store(true, Ordering::SeqCst))?;
    Ok(stop)
}

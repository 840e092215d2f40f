//! Process-exit teardown.
//!
//! The first successful load registers a `libc::atexit` hook that tears the
//! most recently loaded bridge down when the process exits normally. Signal
//! driven shutdown calls [`crate::Bridge::teardown`] directly; whichever runs
//! first wins and the other is a no-op.

use std::sync::{Mutex, Once, PoisonError};
use tracing::{debug, warn};

use crate::bridge::Bridge;

static EXIT_TARGET: Mutex<Option<Bridge>> = Mutex::new(None);
static EXIT_HOOK: Once = Once::new();

/// Makes `bridge` the target of the exit hook, installing the hook on first use.
pub fn register_exit_hook(bridge: &Bridge) {
    *EXIT_TARGET.lock().unwrap_or_else(PoisonError::into_inner) = Some(bridge.clone());

    EXIT_HOOK.call_once(|| {
        let status = unsafe { libc::atexit(run_exit_hook) };
        if status != 0 {
            warn!("Failed to register process exit hook (code={})", status);
        } else {
            debug!("Registered process exit hook");
        }
    });
}

/// Clears the exit slot if it still points at `bridge`.
///
/// Called by [`Bridge::teardown`] so a torn-down bridge is not kept alive
/// until process exit.
pub fn release_exit_hook(bridge: &Bridge) {
    let released = {
        let mut slot = EXIT_TARGET.lock().unwrap_or_else(PoisonError::into_inner);
        match slot.as_ref() {
            Some(target) if target.same_as(bridge) => slot.take(),
            _ => None,
        }
    };
    if released.is_some() {
        debug!("Released process exit target");
    }
}

/// Whether a bridge is waiting for the exit hook.
pub fn has_exit_target() -> bool {
    EXIT_TARGET.lock().unwrap_or_else(PoisonError::into_inner).is_some()
}

/// Tears down the bridge registered for process exit, if any.
///
/// Returns whether a live host was shut down.
pub fn run_exit_teardown() -> bool {
    let target = EXIT_TARGET
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .take();
    match target {
        Some(bridge) => bridge.teardown(),
        None => false,
    }
}

extern "C" fn run_exit_hook() {
    // Unwinding across the C exit path is undefined.
    let _ = std::panic::catch_unwind(run_exit_teardown);
}

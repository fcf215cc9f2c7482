//! Security-posture probe for the host process

use std::io;
use tracing::{debug, warn};

/// Whether the host process runs as root (effective uid 0).
#[cfg(unix)]
pub fn is_running_with_elevated_privileges() -> io::Result<bool> {
    // SAFETY: geteuid has no preconditions and cannot fail.
    Ok(unsafe { libc::geteuid() } == 0)
}

#[cfg(not(unix))]
pub fn is_running_with_elevated_privileges() -> io::Result<bool> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "privilege detection is only implemented for unix hosts",
    ))
}

/// Logs a warning when the host is elevated. Never fails.
pub(crate) fn warn_if_elevated(plugin_id: &str) {
    match is_running_with_elevated_privileges() {
        Ok(true) => warn!(
            "Plugin host is running with elevated privileges while serving remote plugin {}. This is not recommended",
            plugin_id
        ),
        Ok(false) => {}
        Err(e) => debug!("Error checking host process execution privilege: {}", e),
    }
}

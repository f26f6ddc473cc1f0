//! Best-effort sandboxing for capture binaries.
//!
//! Capture helpers run with elevated privileges to reach raw sockets and
//! USB radios; once the device is open they need very little else.  Both
//! hooks degrade to a logged warning when the environment refuses them
//! (unprivileged runs, containers without the capability).

use caps::{CapSet, Capability, CapsHashSet};
use log::{info, warn};

/// Confine the filesystem view by chrooting into a scratch directory.
pub fn jail_filesystem(jail_dir: &str) -> bool {
    if let Err(err) = std::fs::create_dir_all(jail_dir) {
        warn!("not jailing filesystem, could not create {jail_dir}: {err}");
        return false;
    }

    match nix::unistd::chroot(jail_dir) {
        Ok(()) => {
            if let Err(err) = std::env::set_current_dir("/") {
                warn!("chroot succeeded but chdir to / failed: {err}");
                return false;
            }
            info!("jailed filesystem to {jail_dir}");
            true
        }
        Err(err) => {
            warn!("not jailing filesystem: {err}");
            false
        }
    }
}

/// Drop every capability except the two raw-radio ones.
pub fn drop_most_caps() -> bool {
    let keep: CapsHashSet = [Capability::CAP_NET_RAW, Capability::CAP_NET_ADMIN]
        .into_iter()
        .collect();

    let result = caps::set(None, CapSet::Effective, &keep)
        .and_then(|()| caps::set(None, CapSet::Permitted, &keep))
        .and_then(|()| caps::clear(None, CapSet::Inheritable));

    match result {
        Ok(()) => {
            info!("dropped capabilities, keeping NET_RAW and NET_ADMIN");
            true
        }
        Err(err) => {
            warn!("not dropping capabilities: {err}");
            false
        }
    }
}

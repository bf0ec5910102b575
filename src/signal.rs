//! SIGINT handling.
//!
//! The first SIGINT is left to reach the running compilers, which fail their
//! commands; the build then winds down through the normal failure path and
//! still writes its state and trace.  A second SIGINT kills us outright.

#[cfg(unix)]
fn sigint_action(handler: libc::sighandler_t) {
    // Safety: installing a handler is plain libc; the struct is fully
    // initialized by zeroing.
    unsafe {
        let mut sa: libc::sigaction = std::mem::zeroed();
        sa.sa_sigaction = handler;
        libc::sigaction(libc::SIGINT, &sa, std::ptr::null_mut());
    }
}

#[cfg(unix)]
extern "C" fn sigint_handler(_sig: libc::c_int) {
    sigint_action(libc::SIG_DFL);
}

#[cfg(unix)]
pub fn register_sigint() {
    sigint_action(sigint_handler as libc::sighandler_t);
}

#[cfg(not(unix))]
pub fn register_sigint() {}

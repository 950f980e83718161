use std::sync::OnceLock;

use stevedore_core::cancel::CancellationToken;

static CANCEL: OnceLock<CancellationToken> = OnceLock::new();

/// Install signal handlers for cooperative shutdown and return the token
/// they trip.
///
/// First signal cancels in-flight maintenance and restores the default
/// handler so a second signal terminates immediately.
pub fn install_signal_handlers() -> CancellationToken {
    let token = CANCEL.get_or_init(CancellationToken::new).clone();

    #[cfg(unix)]
    {
        // Safety: the handler only flips an atomic flag and restores the
        // default handler.
        unsafe {
            libc::signal(
                libc::SIGTERM,
                unix_signal_handler as *const () as libc::sighandler_t,
            );
            libc::signal(
                libc::SIGINT,
                unix_signal_handler as *const () as libc::sighandler_t,
            );
        }
    }

    token
}

#[cfg(unix)]
extern "C" fn unix_signal_handler(sig: libc::c_int) {
    if let Some(token) = CANCEL.get() {
        token.cancel();
    }
    // Restore default handler so a second signal kills immediately.
    unsafe {
        libc::signal(sig, libc::SIG_DFL);
    }
}

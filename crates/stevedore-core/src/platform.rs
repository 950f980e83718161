/// Return the system hostname, or `"unknown"` if it cannot be determined.
pub fn hostname() -> String {
    #[cfg(unix)]
    {
        nix::unistd::gethostname()
            .map(|h| h.to_string_lossy().to_string())
            .unwrap_or_else(|_| "unknown".into())
    }

    #[cfg(windows)]
    {
        std::env::var("COMPUTERNAME").unwrap_or_else(|_| "unknown".into())
    }
}

/// Return the login name of the current user.
pub fn username() -> String {
    whoami::username()
}

/// The `user@host` identity used for the maintenance owner check.
pub fn local_owner() -> String {
    format!("{}@{}", username(), hostname())
}

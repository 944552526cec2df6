pub mod backend;
pub mod cache;
pub mod cancel;
pub mod chunker;
pub mod codec;
pub mod compress;
pub mod config;
pub mod crypto;
pub mod error;
pub mod hashing;
pub mod importer;
pub mod lock;
pub mod maintenance;
pub mod object;
pub mod packfile;
pub mod repository;
pub mod resource;
pub mod snapshot;
pub mod state;
pub mod vfs;

#[cfg(test)]
mod tests;

/// Return the system hostname, or `"unknown"` if it cannot be determined.
pub fn hostname() -> String {
    #[cfg(unix)]
    {
        nix::unistd::gethostname()
            .map(|h| h.to_string_lossy().to_string())
            .unwrap_or_else(|_| "unknown".into())
    }

    #[cfg(not(unix))]
    {
        std::env::var("COMPUTERNAME").unwrap_or_else(|_| "unknown".into())
    }
}

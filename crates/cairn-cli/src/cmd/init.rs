use cairn_core::backend::fs::FsBackend;
use cairn_core::config::RepositoryConfig;
use cairn_core::error::{CairnError, Result};
use cairn_core::repository::Repository;

pub fn run(path: &str, encrypted: bool) -> Result<()> {
    let mut config = RepositoryConfig::new();
    let passphrase = if encrypted {
        config = config.with_encryption();
        Some(std::env::var("CAIRN_PASSPHRASE").map_err(|_| {
            CairnError::Config("encrypted repository requires CAIRN_PASSPHRASE".into())
        })?)
    } else {
        None
    };

    let repo = Repository::create(
        Box::new(FsBackend::new(path)),
        config,
        passphrase.as_deref(),
    )?;
    println!(
        "Initialized {} repository {} at {path}",
        if encrypted { "encrypted" } else { "plaintext" },
        repo.configuration().repository_id
    );
    Ok(())
}

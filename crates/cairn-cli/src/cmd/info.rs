use cairn_core::error::Result;
use cairn_core::repository::Repository;

use super::format_size;

pub fn run(repo: &Repository) -> Result<()> {
    let config = repo.configuration();
    println!("Repository ID:  {}", config.repository_id);
    println!("Format version: {}", config.version);
    println!("Created:        {}", config.timestamp.format("%Y-%m-%d %H:%M:%S"));
    println!(
        "Chunking:       {} ({} / {} / {})",
        config.chunking.algorithm,
        format_size(config.chunking.min_size as u64),
        format_size(config.chunking.normal_size as u64),
        format_size(config.chunking.max_size as u64)
    );
    println!(
        "Hashing:        {} ({} bits{})",
        config.hashing.algorithm,
        config.hashing.bits,
        if config.encryption.is_some() {
            ", MAC-keyed"
        } else {
            ""
        }
    );
    match &config.compression {
        Some(compression) => println!("Compression:    {}", compression.algorithm),
        None => println!("Compression:    none"),
    }
    match &config.encryption {
        Some(encryption) => println!("Encryption:     {}", encryption.algorithm),
        None => println!("Encryption:     none"),
    }
    println!("Packfile cap:   {}", format_size(config.packfile.max_size));

    println!("Snapshots:      {}", repo.list_snapshots().len());
    println!("States:         {}", repo.get_states()?.len());
    println!("Packfiles:      {}", repo.list_packfiles()?.len());
    Ok(())
}

use cairn_core::error::Result;
use cairn_core::importer::FsImporter;
use cairn_core::lock;
use cairn_core::repository::Repository;
use cairn_core::snapshot::events::{self, Event};

use super::format_size;

pub fn run(
    repo: &Repository,
    source: &str,
    name: String,
    tags: Vec<String>,
    verbose: bool,
) -> Result<()> {
    let importer = FsImporter::new(source)?;
    let guard = lock::acquire(
        repo.backend(),
        &repo.configuration().repository_id,
        lock::DEFAULT_LOCK_TTL_SECS,
    )?;

    let (sender, receiver) = events::channel();
    let printer = std::thread::spawn(move || {
        let mut files = 0u64;
        let mut bytes = 0u64;
        let mut errors = 0u64;
        for event in receiver {
            match event {
                Event::FileOk { path, size } => {
                    files += 1;
                    bytes += size;
                    if verbose {
                        println!("A {path}");
                    }
                }
                Event::FileError { path, error } => {
                    errors += 1;
                    eprintln!("! {path}: {error}");
                }
                Event::PackfileFlushed { checksum, size } => {
                    if verbose {
                        println!("P {checksum} ({})", format_size(size));
                    }
                }
                Event::DirectoryOk { .. } | Event::SnapshotCommitted { .. } => {}
            }
        }
        (files, bytes, errors)
    });

    let mut builder = repo.new_snapshot().with_name(name).with_events(sender);
    if !tags.is_empty() {
        builder = builder.with_tags(tags);
    }
    let result = builder.commit(&importer);
    lock::release(repo.backend(), guard)?;
    let header = result?;

    let (files, bytes, errors) = printer
        .join()
        .unwrap_or((0, 0, 0));
    println!(
        "Snapshot {} committed: {files} files, {} ({errors} errors)",
        header.identifier.to_hex(),
        format_size(bytes)
    );
    Ok(())
}

use cairn_core::cancel::CancelToken;
use cairn_core::error::Result;
use cairn_core::importer::FsExporter;
use cairn_core::repository::Repository;
use cairn_core::snapshot::events::{self, Event};
use cairn_core::snapshot::restore::restore;
use cairn_core::snapshot::SnapshotHandle;

use super::format_size;

pub fn run(repo: &Repository, snapshot: &str, target: &str, verbose: bool) -> Result<()> {
    let handle = SnapshotHandle::resolve(repo, snapshot)?;
    let exporter = FsExporter::new(target)?;

    let (sender, receiver) = events::channel();
    let printer = std::thread::spawn(move || {
        for event in receiver {
            match event {
                Event::FileOk { path, .. } => {
                    if verbose {
                        println!("R {path}");
                    }
                }
                Event::FileError { path, error } => eprintln!("! {path}: {error}"),
                _ => {}
            }
        }
    });

    let stats = restore(&handle, &exporter, Some(&sender), &CancelToken::new());
    drop(sender);
    let _ = printer.join();
    let stats = stats?;

    println!(
        "Restored {} into {target}: {} files, {} directories, {} ({} errors)",
        handle.header.identifier.to_hex(),
        stats.files,
        stats.directories,
        format_size(stats.bytes),
        stats.errors
    );
    Ok(())
}

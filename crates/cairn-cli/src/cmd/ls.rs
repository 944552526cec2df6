use cairn_core::error::Result;
use cairn_core::repository::Repository;
use cairn_core::snapshot::SnapshotHandle;
use cairn_core::vfs::VfsEntry;

use super::format_size;

pub fn list_snapshots(repo: &Repository) -> Result<()> {
    for id in repo.list_snapshots() {
        let handle = SnapshotHandle::load(repo, &id)?;
        let header = &handle.header;
        println!(
            "{}  {}  {:>10}  {}",
            header.identifier.to_hex(),
            header.timestamp.format("%Y-%m-%d %H:%M:%S"),
            format_size(header.summary.below.size),
            header.name
        );
    }
    Ok(())
}

pub fn list_tree(repo: &Repository, snapshot: &str, path: &str) -> Result<()> {
    let handle = SnapshotHandle::resolve(repo, snapshot)?;
    match handle.stat(path)? {
        VfsEntry::Dir(dir) => {
            for child in &dir.children {
                match handle.get_entry(&child.checksum)? {
                    VfsEntry::Dir(child_dir) => println!("d {:>10}  {}/", "-", child_dir.name),
                    VfsEntry::File(file) => {
                        let marker = if file.symlink_target.is_some() { "l" } else { "-" };
                        println!("{marker} {:>10}  {}", format_size(file.size), file.name);
                    }
                    VfsEntry::Error(error) => println!("! {:>10}  {}", "-", error.path),
                }
            }
        }
        VfsEntry::File(file) => {
            println!("- {:>10}  {}", format_size(file.size), file.name);
        }
        VfsEntry::Error(error) => println!("! {}: {}", error.path, error.error),
    }
    Ok(())
}

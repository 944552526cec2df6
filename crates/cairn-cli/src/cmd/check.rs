use cairn_core::cancel::CancelToken;
use cairn_core::error::Result;
use cairn_core::maintenance;
use cairn_core::repository::Repository;

pub fn run(repo: &Repository) -> Result<()> {
    let report = maintenance::check(repo, &CancelToken::new())?;
    println!(
        "OK: {} packfiles, {} blobs, {} files verified",
        report.packfiles, report.blobs, report.files
    );
    Ok(())
}

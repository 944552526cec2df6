use cairn_core::error::Result;
use cairn_core::lock;
use cairn_core::maintenance;
use cairn_core::repository::Repository;

pub fn run(
    repo: &Repository,
    remove_orphans: bool,
    merge_states: bool,
    break_lock: bool,
) -> Result<()> {
    if break_lock {
        let existed = lock::break_lock(repo.backend(), &repo.configuration().repository_id)?;
        println!(
            "{}",
            if existed {
                "Removed advisory lock"
            } else {
                "No advisory lock present"
            }
        );
    }

    if !remove_orphans && !merge_states {
        // Report-only mode.
        let orphans = maintenance::orphan_packfiles(repo)?;
        println!(
            "{} orphan packfiles, {} states",
            orphans.len(),
            repo.get_states()?.len()
        );
        return Ok(());
    }

    // Destructive passes run under the advisory lock so an in-flight commit
    // is not mistaken for a crash.
    let guard = lock::acquire(
        repo.backend(),
        &repo.configuration().repository_id,
        lock::DEFAULT_LOCK_TTL_SECS,
    )?;
    let result = (|| -> Result<()> {
        if merge_states {
            match maintenance::merge_states(repo)? {
                Some(merged) => println!("Merged states into {}", merged.to_hex()),
                None => println!("Nothing to merge"),
            }
        }
        if remove_orphans {
            let removed = maintenance::remove_orphan_packfiles(repo)?;
            println!("Removed {removed} orphan packfiles");
        }
        Ok(())
    })();
    lock::release(repo.backend(), guard)?;
    result
}

//! The create-phase driver: re-runs the builder plugin for every directory
//! whose build rules need re-evaluation.

use crate::db::{Database, Flags};
use crate::plugin::Plugin;
use anyhow::{Context, Result};
use log::debug;

const TARGET: &str = "tup::updater::create";

/// For every directory flagged `CREATE`, re-evaluates its build rules by
/// invoking the builder plugin.
///
/// Before calling into the plugin, every command that is a child of a
/// CREATE-flagged directory is marked `DELETE` — the plugin is expected to
/// clear that flag (by re-declaring the command) on any it still wants;
/// whatever it doesn't re-declare remains flagged for cleanup by the
/// executor.
///
/// This does a single pass: `create()` may itself introduce further
/// `CREATE` flags (e.g. by declaring a sub-directory), and those are left
/// for the next invocation of the updater rather than looped to a fixed
/// point here (see the crate's design notes).
pub fn run_create_phase(db: &mut Database, plugin: &dyn Plugin) -> Result<()> {
    // Collect the work list before invoking the plugin: `create()` mutates
    // the very `node` table this query is reading, so collecting first
    // avoids iterator invalidation (the snapshot happens inside
    // `select_node_by_flags` itself).
    let mut work = Vec::new();
    db.select_node_by_flags(Flags::CREATE, |db, dbn| {
        debug!(target: TARGET, "directory {} ({}) flagged CREATE", dbn.tupid, dbn.name);
        db.set_cmdchild_flags(dbn.tupid, Flags::DELETE)
            .with_context(|| format!("marking commands of {} for deletion", dbn.name))?;
        work.push((dbn.tupid, dbn.name.clone()));
        Ok(())
    })?;

    for (tupid, name) in work {
        debug!(target: TARGET, "create({:?})", name);
        plugin
            .create(&name)
            .with_context(|| format!("create phase failed for directory {:?}", name))?;
        db.set_flags_by_id(tupid, Flags::NONE)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::NodeType;
    use crate::plugin::test_support::FakePlugin;

    #[test]
    fn reparents_commands_to_delete_before_create_runs() {
        let mut db = Database::open_in_memory().unwrap();
        db.insert_node(1, "dir", NodeType::Dir, Flags::CREATE).unwrap();
        db.insert_node(2, "cc -c a.c", NodeType::Cmd, Flags::NONE).unwrap();
        db.insert_file_link(1, 2).unwrap();

        let plugin = FakePlugin::default();
        run_create_phase(&mut db, &plugin).unwrap();

        assert_eq!(*plugin.calls.borrow(), vec!["dir".to_string()]);
        assert_eq!(db.node_flags(1).unwrap(), Flags::NONE);
        // The command was marked DELETE by the pre-pass; since the fake
        // plugin doesn't re-declare it, it stays DELETE for the executor
        // to clean up.
        assert_eq!(db.node_flags(2).unwrap(), Flags::DELETE);
    }

    #[test]
    fn plugin_failure_aborts_and_leaves_flag_set() {
        let mut db = Database::open_in_memory().unwrap();
        db.insert_node(1, "dir", NodeType::Dir, Flags::CREATE).unwrap();

        let plugin = FakePlugin {
            fail_on: vec!["dir".to_string()],
            ..Default::default()
        };
        let err = run_create_phase(&mut db, &plugin).unwrap_err();
        assert!(err.to_string().contains("create phase failed"));
        // Flags were not cleared since create() failed.
        assert_eq!(db.node_flags(1).unwrap(), Flags::CREATE);
    }

    #[test]
    fn no_create_flagged_nodes_is_a_no_op() {
        let mut db = Database::open_in_memory().unwrap();
        let plugin = FakePlugin::default();
        run_create_phase(&mut db, &plugin).unwrap();
        assert!(plugin.calls.borrow().is_empty());
    }
}

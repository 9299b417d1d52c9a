//! Executes a built graph: dispatches every node in dependency order,
//! running commands, deleting stale files, and clearing persisted flags
//! as each node completes.

use crate::db::{Database, Flags, NodeType};
use crate::errors::UpdaterError;
use crate::graph::{Graph, NodeIndex};
use crate::progress::{count_dispatched_nodes, show_progress};
use anyhow::{Context, Result};
use log::debug;
use std::process::Command;

const TARGET: &str = "tup::updater::executor";

/// Environment variable a dispatched command can read to recover the
/// tupid of the fresh node created for it, e.g. to record extra outputs.
const TUP_CMD_ID: &str = "TUP_CMD_ID";

/// Drains `graph` in dependency order, dispatching every non-root node
/// exactly once.
///
/// A node only becomes eligible once every edge pointing into it has been
/// removed (its `incoming_count` has reached zero) — a direct
/// reader-count form of Kahn's algorithm, driven off the same
/// `incoming_count`/edge bookkeeping the builder populated.
pub fn execute_graph(graph: &mut Graph, db: &mut Database, show: bool) -> Result<()> {
    let total = count_dispatched_nodes(graph);
    let mut processed = 0usize;
    show_progress(show, processed, total);

    let root = graph.root;
    let mut ready: Vec<NodeIndex> = vec![root];

    while let Some(n) = ready.pop() {
        if n != root {
            dispatch(graph, db, n)?;
            processed += 1;
            show_progress(show, processed, total);
        }

        while graph.has_edges(n) {
            let dst = graph.pop_edge(n).expect("has_edges just confirmed an edge exists");
            if graph.node(dst).incoming_count == 0 {
                ready.push(dst);
            }
        }

        if n != root {
            db.set_flags_by_id(graph.node(n).tupid, Flags::NONE)?;
        }
        graph.remove_node(n);
    }

    let leftover = graph.node_list_iter().filter(|&idx| graph.contains(idx)).count();
    if leftover > 0 {
        return Err(UpdaterError::GraphNotEmpty.into());
    }
    Ok(())
}

fn dispatch(graph: &Graph, db: &mut Database, n: NodeIndex) -> Result<()> {
    let node = graph.node(n);
    match node.node_type {
        NodeType::File => {
            if node.flags == Flags::DELETE {
                delete_file(db, node.tupid, &node.name)?;
            }
        }
        NodeType::Cmd => {
            if node.flags.contains(Flags::DELETE) {
                println!("\x1b[35mDelete[{}]: {}\x1b[0m", node.tupid, node.name);
                db.delete_name_file(node.tupid)?;
            } else {
                update(db, node.tupid, &node.name)?;
            }
        }
        NodeType::Dir | NodeType::Ghost => {}
    }
    Ok(())
}

/// Runs a command node's shell command, reincarnating its persistent node
/// under a fresh tupid first so a failure can be rolled back cleanly and
/// a success can move its old cmd-links over before dropping the old
/// identity.
///
/// `TUP_CMD_ID` is set only on the spawned child's own environment (via
/// [`Command::env`]), never process-wide — the original's
/// `setenv`/`unsetenv` pair around a single-threaded `system()` call has
/// no safe analogue once command dispatch could ever run concurrently.
fn update(db: &mut Database, tupid: i64, command: &str) -> Result<()> {
    let new_tupid = db.create_dup_node(command, NodeType::Cmd, Flags::NONE)?;

    let result = run_command(command, new_tupid);
    match result {
        Ok(true) => {
            db.move_cmdlink(tupid, new_tupid)?;
            db.delete_name_file(tupid)?;
            Ok(())
        }
        Ok(false) => {
            db.delete_name_file(new_tupid)?;
            Err(UpdaterError::CmdFail { command: command.to_string() }.into())
        }
        Err(e) => {
            db.delete_name_file(new_tupid)?;
            Err(e).with_context(|| format!("failed to run command: {:?}", command))
        }
    }
}

fn run_command(command: &str, cmd_id: i64) -> Result<bool> {
    println!("{}", command);
    let status = Command::new("/bin/sh")
        .arg("-c")
        .arg(command)
        .env(TUP_CMD_ID, cmd_id.to_string())
        .status()?;
    Ok(status.success())
}

/// Removes a stale file's persistent node and its on-disk file, treating
/// an already-missing file as success.
fn delete_file(db: &mut Database, tupid: i64, name: &str) -> Result<()> {
    println!("\x1b[35mDelete[{}]: {}\x1b[0m", tupid, name);
    db.delete_name_file(tupid)?;
    match std::fs::remove_file(name) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e).with_context(|| format!("unable to remove {:?}", name)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::build_graph;
    use crate::db::Database;

    #[test]
    fn delete_only_file_with_no_dependents_is_unlinked_and_counted() {
        let mut db = Database::open_in_memory().unwrap();
        db.insert_node(1, "/tmp/does-not-exist-for-test-xyz", NodeType::File, Flags::DELETE)
            .unwrap();

        let mut g = build_graph(&db).unwrap();
        execute_graph(&mut g, &mut db, false).unwrap();

        assert!(!db.node_exists(1).unwrap());
    }

    #[test]
    fn cmd_flagged_delete_is_removed_without_running() {
        let mut db = Database::open_in_memory().unwrap();
        db.insert_node(1, "dir", NodeType::Dir, Flags::NONE).unwrap();
        db.insert_node(2, "this-would-fail-if-run; exit 1", NodeType::Cmd, Flags::DELETE)
            .unwrap();
        db.insert_file_link(1, 2).unwrap();
        db.set_flags_by_id(1, Flags::MODIFY).unwrap();

        let mut g = build_graph(&db).unwrap();
        execute_graph(&mut g, &mut db, false).unwrap();

        assert!(!db.node_exists(2).unwrap());
    }

    #[test]
    fn successful_command_reincarnates_node_and_clears_flags() {
        let mut db = Database::open_in_memory().unwrap();
        db.insert_node(1, "true", NodeType::Cmd, Flags::MODIFY).unwrap();

        let mut g = build_graph(&db).unwrap();
        execute_graph(&mut g, &mut db, false).unwrap();

        assert!(!db.node_exists(1).unwrap());
    }

    #[test]
    fn failing_command_surfaces_cmd_fail_and_rolls_back_dup_node() {
        let mut db = Database::open_in_memory().unwrap();
        db.insert_node(1, "false", NodeType::Cmd, Flags::MODIFY).unwrap();

        let mut g = build_graph(&db).unwrap();
        let err = execute_graph(&mut g, &mut db, false).unwrap_err();
        assert!(err.to_string().contains("command failed"));
    }
}

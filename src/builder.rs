//! The graph builder: traverses database links starting from every
//! MODIFY- or DELETE-flagged node, producing a finite acyclic graph of the
//! affected subset.

use crate::db::{Database, DbNode, Flags, NodeType};
use crate::graph::{Graph, NodeIndex, NodeState};
use anyhow::Result;
use log::debug;

const TARGET: &str = "tup::updater::builder";

/// Builds the transient graph of everything reachable from a MODIFY- or
/// DELETE-flagged node, via file-links and cmd-links.
pub fn build_graph(db: &Database) -> Result<Graph> {
    let mut g = Graph::new();

    // Seed the graph from every MODIFY-flagged node, with the root
    // temporarily wearing MODIFY so add_file's flag-propagation rule picks
    // it up, then again for DELETE.
    g.node_mut(g.root).flags = Flags::MODIFY;
    let root = g.root;
    db.select_node_by_flags(Flags::MODIFY, |_db, dbn| add_file(&mut g, root, dbn))?;

    g.node_mut(g.root).flags = Flags::DELETE;
    db.select_node_by_flags(Flags::DELETE, |_db, dbn| add_file(&mut g, root, dbn))?;

    g.node_mut(g.root).flags = Flags::NONE;

    // Drain the DFS stack. A node on `plist` in `Initialized` state has its
    // dependencies explored (and is left on the stack, now `Processing`);
    // one in `Processing` state has had all its dependents visited and
    // moves to the finished list.
    while let Some(&cur) = g.plist.last() {
        match g.node(cur).state {
            NodeState::Initialized => {
                find_deps(db, &mut g, cur)?;
                g.node_mut(cur).state = NodeState::Processing;
            }
            NodeState::Processing => {
                g.plist.pop();
                g.node_mut(cur).state = NodeState::Finished;
                g.node_list.push(cur);
            }
            NodeState::Finished => unreachable!("finished node cannot still be on plist"),
        }
    }

    Ok(g)
}

/// Adds (or updates) the graph node for `dbn`, linking it from `src`.
///
/// The flag actually recorded on the graph node is *derived from `src`*,
/// not taken from `dbn`'s own persisted flags: if `src` is a file, the
/// propagated flag is forced to MODIFY (a file's dependents react to its
/// modification, never its deletion — a command is only removed when its
/// containing directory is re-created and fails to re-declare it);
/// otherwise the propagated flag is whatever `src` currently carries.
fn add_file(g: &mut Graph, src: NodeIndex, dbn: &DbNode) -> Result<()> {
    let propagated = if g.node(src).node_type == NodeType::File {
        Flags::MODIFY
    } else {
        g.node(src).flags
    };

    let n = match g.find_by_tupid(dbn.tupid) {
        Some(existing) => {
            let existing_flags = g.node(existing).flags;
            if (existing_flags & propagated).is_empty() {
                debug!(
                    target: TARGET,
                    "adding flag ({:?}) to {}", propagated, dbn.tupid
                );
                g.node_mut(existing).flags |= propagated;
            }
            existing
        }
        None => {
            debug!(
                target: TARGET,
                "create node: {} ({:?})", dbn.tupid, dbn.node_type
            );
            g.create_node(dbn.tupid, dbn.name.clone(), dbn.node_type, propagated)
        }
    };

    if g.node(n).state == NodeState::Processing {
        let err = g.add_edge(src, n).unwrap_err();
        anyhow::bail!(err);
    }
    g.add_edge(src, n).expect("checked above that dst is not Processing");
    Ok(())
}

/// Queries file-links and cmd-links outgoing from `n`, funneling each
/// result through [`add_file`].
fn find_deps(db: &Database, g: &mut Graph, n: NodeIndex) -> Result<()> {
    let tupid = g.node(n).tupid;

    let mut file_deps = Vec::new();
    db.select_node_by_link(tupid, |dbn| {
        file_deps.push(dbn.clone());
        Ok(())
    })?;
    for dbn in &file_deps {
        add_file(g, n, dbn)?;
    }

    let mut cmd_deps = Vec::new();
    db.select_node_by_cmdlink(tupid, |dbn| {
        cmd_deps.push(dbn.clone());
        Ok(())
    })?;
    for dbn in &cmd_deps {
        add_file(g, n, dbn)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::NodeType;

    #[test]
    fn modify_on_leaf_file_reaches_dependent_command() {
        let db = Database::open_in_memory().unwrap();
        db.insert_node(1, "f.c", NodeType::File, Flags::MODIFY).unwrap();
        db.insert_node(2, "cc -c f.c", NodeType::Cmd, Flags::NONE).unwrap();
        db.insert_file_link(1, 2).unwrap();

        let g = build_graph(&db).unwrap();
        let file_idx = g.find_by_tupid(1).unwrap();
        let cmd_idx = g.find_by_tupid(2).unwrap();
        assert_eq!(g.node(file_idx).flags, Flags::MODIFY);
        assert_eq!(g.node(cmd_idx).flags, Flags::MODIFY);
    }

    #[test]
    fn delete_on_file_with_no_dependents() {
        let db = Database::open_in_memory().unwrap();
        db.insert_node(1, "stale", NodeType::File, Flags::DELETE).unwrap();

        let g = build_graph(&db).unwrap();
        let idx = g.find_by_tupid(1).unwrap();
        assert_eq!(g.node(idx).flags, Flags::DELETE);
    }

    #[test]
    fn cycle_is_detected() {
        let db = Database::open_in_memory().unwrap();
        db.insert_node(1, "cmd", NodeType::Cmd, Flags::MODIFY).unwrap();
        db.insert_node(2, "out", NodeType::File, Flags::MODIFY).unwrap();
        db.insert_cmd_link(1, 2).unwrap();
        db.insert_file_link(2, 1).unwrap();

        let err = build_graph(&db).unwrap_err();
        assert!(err.to_string().contains("Circular dependency detected"));
    }

    #[test]
    fn delete_only_file_gaining_modify_still_accumulates_both_flags() {
        // A file already flagged DELETE (from a direct DB flag) that is
        // also reached via a MODIFY-propagating edge ends up carrying both
        // bits; the executor's exact-DELETE check means it will then be
        // skipped rather than unlinked, matching the original's "num_nodes
        // compensation" scenario (computed here via the final progress
        // pass instead, see crate::progress).
        let db = Database::open_in_memory().unwrap();
        db.insert_node(1, "shared.h", NodeType::File, Flags::DELETE).unwrap();
        db.insert_node(2, "other.c", NodeType::File, Flags::MODIFY).unwrap();
        db.insert_node(3, "cc -c other.c", NodeType::Cmd, Flags::NONE).unwrap();
        db.insert_file_link(2, 3).unwrap();
        db.insert_file_link(3, 1).unwrap();

        let g = build_graph(&db).unwrap();
        let idx = g.find_by_tupid(1).unwrap();
        assert_eq!(g.node(idx).flags, Flags::DELETE | Flags::MODIFY);
    }
}

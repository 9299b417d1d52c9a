//! The persistent database: nodes, links, flags, and configuration.
//!
//! Backed by SQLite, matching the real `tup` project's own choice of
//! storage engine. This module is the concrete implementation of the
//! database contract that the rest of the crate treats as an external
//! collaborator.
//!
//! Row callbacks (`select_node_by_flags`, `select_node_by_link`,
//! `select_node_by_cmdlink`) snapshot their result set into a `Vec` before
//! invoking the caller's closure, so a closure that itself writes to the
//! database (as the create-phase does) never invalidates a live cursor.
//!
//! Mutating operations log under the `tup::updater::db` target, matching
//! the per-module `debug!` instrumentation the rest of the crate's core
//! modules carry.

use anyhow::{Context, Result};
use bitflags::bitflags;
use log::debug;
use rusqlite::{params, Connection, OptionalExtension};

const TARGET: &str = "tup::updater::db";

bitflags! {
    /// Per-node pending-work flags. `NONE` means up to date.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Flags: i32 {
        const NONE = 0;
        const MODIFY = 1 << 0;
        const DELETE = 1 << 1;
        const CREATE = 1 << 2;
    }
}

impl Flags {
    fn from_bits_db(bits: i32) -> Flags {
        Flags::from_bits_truncate(bits)
    }
}

/// The kind of a persistent node. Only `File` and `Cmd` are treated
/// specially by the core; `Dir` and `Ghost` exist so the graph can
/// traverse through them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeType {
    File,
    Cmd,
    Dir,
    Ghost,
}

impl NodeType {
    fn to_i32(self) -> i32 {
        match self {
            NodeType::File => 0,
            NodeType::Cmd => 1,
            NodeType::Dir => 2,
            NodeType::Ghost => 3,
        }
    }

    fn from_i32(v: i32) -> Result<NodeType> {
        Ok(match v {
            0 => NodeType::File,
            1 => NodeType::Cmd,
            2 => NodeType::Dir,
            3 => NodeType::Ghost,
            other => anyhow::bail!("unknown node type {}", other),
        })
    }
}

/// A row from the `node` table, as handed to query callbacks.
#[derive(Debug, Clone)]
pub struct DbNode {
    pub tupid: i64,
    pub name: String,
    pub node_type: NodeType,
    pub flags: Flags,
}

/// An open connection to the updater's SQLite database.
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Opens (creating if necessary) the database at `path`, ensuring the
    /// schema exists.
    pub fn open(path: &str) -> Result<Database> {
        let conn = Connection::open(path)
            .with_context(|| format!("open database {:?}", path))?;
        let db = Database { conn };
        db.init_schema()?;
        Ok(db)
    }

    /// Opens a database entirely in memory; used by tests.
    #[cfg(test)]
    pub fn open_in_memory() -> Result<Database> {
        let conn = Connection::open_in_memory()?;
        let db = Database { conn };
        db.init_schema()?;
        Ok(db)
    }

    fn init_schema(&self) -> Result<()> {
        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS node (
                tupid INTEGER PRIMARY KEY,
                name  TEXT NOT NULL,
                type  INTEGER NOT NULL,
                flags INTEGER NOT NULL DEFAULT 0
            );
            CREATE TABLE IF NOT EXISTS file_link (
                src INTEGER NOT NULL,
                dst INTEGER NOT NULL
            );
            CREATE TABLE IF NOT EXISTS cmd_link (
                src INTEGER NOT NULL,
                dst INTEGER NOT NULL
            );
            CREATE TABLE IF NOT EXISTS config (
                key   TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS file_link_src ON file_link(src);
            CREATE INDEX IF NOT EXISTS cmd_link_src ON cmd_link(src);
            ",
        )?;
        Ok(())
    }

    // -- configuration -----------------------------------------------------

    pub fn config_get_string(&self, key: &str, default: &str) -> Result<String> {
        let val: Option<String> = self
            .conn
            .query_row("SELECT value FROM config WHERE key = ?1", params![key], |r| r.get(0))
            .optional()?;
        Ok(val.unwrap_or_else(|| default.to_string()))
    }

    pub fn config_get_int(&self, key: &str, default: i64) -> Result<i64> {
        let val: Option<String> = self
            .conn
            .query_row("SELECT value FROM config WHERE key = ?1", params![key], |r| r.get(0))
            .optional()?;
        Ok(match val {
            Some(s) => s.parse().with_context(|| format!("config {:?} is not an integer", key))?,
            None => default,
        })
    }

    #[cfg(test)]
    pub fn config_set(&self, key: &str, value: &str) -> Result<()> {
        self.conn.execute(
            "INSERT INTO config(key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        Ok(())
    }

    // -- node creation, used by tests and by the plugin's effective equivalent --

    #[cfg(test)]
    pub fn insert_node(&self, tupid: i64, name: &str, node_type: NodeType, flags: Flags) -> Result<()> {
        self.conn.execute(
            "INSERT INTO node(tupid, name, type, flags) VALUES (?1, ?2, ?3, ?4)",
            params![tupid, name, node_type.to_i32(), flags.bits()],
        )?;
        Ok(())
    }

    #[cfg(test)]
    pub fn insert_file_link(&self, src: i64, dst: i64) -> Result<()> {
        self.conn
            .execute("INSERT INTO file_link(src, dst) VALUES (?1, ?2)", params![src, dst])?;
        Ok(())
    }

    #[cfg(test)]
    pub fn insert_cmd_link(&self, src: i64, dst: i64) -> Result<()> {
        self.conn
            .execute("INSERT INTO cmd_link(src, dst) VALUES (?1, ?2)", params![src, dst])?;
        Ok(())
    }

    #[cfg(test)]
    pub fn node_flags(&self, tupid: i64) -> Result<Flags> {
        let bits: i32 = self
            .conn
            .query_row("SELECT flags FROM node WHERE tupid = ?1", params![tupid], |r| r.get(0))?;
        Ok(Flags::from_bits_db(bits))
    }

    #[cfg(test)]
    pub fn node_exists(&self, tupid: i64) -> Result<bool> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM node WHERE tupid = ?1",
            params![tupid],
            |r| r.get(0),
        )?;
        Ok(count > 0)
    }

    // -- queries consumed by the core ---------------------------------------

    /// Invokes `callback` once per node whose flags intersect `flag_mask`.
    /// The result set is collected before any callback runs, so the
    /// callback may freely write to the database (e.g. via
    /// `set_cmdchild_flags`) without invalidating this query.
    pub fn select_node_by_flags(
        &self,
        flag_mask: Flags,
        mut callback: impl FnMut(&Database, &DbNode) -> Result<()>,
    ) -> Result<()> {
        let rows: Vec<DbNode> = {
            let mut stmt = self
                .conn
                .prepare("SELECT tupid, name, type, flags FROM node WHERE flags & ?1 != 0")?;
            let rows = stmt.query_map(params![flag_mask.bits()], |r| {
                Ok((r.get::<_, i64>(0)?, r.get::<_, String>(1)?, r.get::<_, i32>(2)?, r.get::<_, i32>(3)?))
            })?;
            let mut out = Vec::new();
            for row in rows {
                let (tupid, name, node_type, flags) = row?;
                out.push(DbNode {
                    tupid,
                    name,
                    node_type: NodeType::from_i32(node_type)?,
                    flags: Flags::from_bits_db(flags),
                });
            }
            out
        };
        debug!(target: TARGET, "select_node_by_flags({:?}): {} matching node(s)", flag_mask, rows.len());
        for dbn in &rows {
            callback(self, dbn)?;
        }
        Ok(())
    }

    /// Invokes `callback` once per file-link destination reachable from
    /// `tupid` (i.e. `tupid` is a file with dependents).
    pub fn select_node_by_link(
        &self,
        tupid: i64,
        mut callback: impl FnMut(&DbNode) -> Result<()>,
    ) -> Result<()> {
        for dbn in self.linked_nodes("file_link", tupid)? {
            callback(&dbn)?;
        }
        Ok(())
    }

    /// Invokes `callback` once per cmd-link destination reachable from
    /// `tupid` (i.e. `tupid` is a command with produced outputs).
    pub fn select_node_by_cmdlink(
        &self,
        tupid: i64,
        mut callback: impl FnMut(&DbNode) -> Result<()>,
    ) -> Result<()> {
        for dbn in self.linked_nodes("cmd_link", tupid)? {
            callback(&dbn)?;
        }
        Ok(())
    }

    fn linked_nodes(&self, link_table: &str, tupid: i64) -> Result<Vec<DbNode>> {
        let sql = format!(
            "SELECT n.tupid, n.name, n.type, n.flags
             FROM {link_table} l JOIN node n ON n.tupid = l.dst
             WHERE l.src = ?1"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params![tupid], |r| {
            Ok((r.get::<_, i64>(0)?, r.get::<_, String>(1)?, r.get::<_, i32>(2)?, r.get::<_, i32>(3)?))
        })?;
        let mut out = Vec::new();
        for row in rows {
            let (tupid, name, node_type, flags) = row?;
            out.push(DbNode {
                tupid,
                name,
                node_type: NodeType::from_i32(node_type)?,
                flags: Flags::from_bits_db(flags),
            });
        }
        Ok(out)
    }

    /// Sets `flags` on every command node whose parent directory is
    /// `dir_tupid`. A command's parent is modeled as a `file_link` from the
    /// directory to the command, mirroring how `tup` links a directory to
    /// the commands declared inside it.
    pub fn set_cmdchild_flags(&self, dir_tupid: i64, flags: Flags) -> Result<()> {
        debug!(target: TARGET, "set_cmdchild_flags(dir {}, {:?})", dir_tupid, flags);
        self.conn.execute(
            "UPDATE node SET flags = ?1
             WHERE type = ?2 AND tupid IN (
                 SELECT dst FROM file_link WHERE src = ?3
             )",
            params![flags.bits(), NodeType::Cmd.to_i32(), dir_tupid],
        )?;
        Ok(())
    }

    pub fn set_flags_by_id(&self, tupid: i64, flags: Flags) -> Result<()> {
        debug!(target: TARGET, "set_flags_by_id({}, {:?})", tupid, flags);
        self.conn
            .execute("UPDATE node SET flags = ?1 WHERE tupid = ?2", params![flags.bits(), tupid])?;
        Ok(())
    }

    /// Creates a duplicate node with the same name/type as an existing one
    /// but fresh flags, returning its new tupid. Used by the executor's
    /// "reincarnation" of a command about to run (see `executor::update`).
    pub fn create_dup_node(&self, name: &str, node_type: NodeType, flags: Flags) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO node(name, type, flags) VALUES (?1, ?2, ?3)",
            params![name, node_type.to_i32(), flags.bits()],
        )?;
        let tupid = self.conn.last_insert_rowid();
        debug!(target: TARGET, "create_dup_node({:?}, {:?}) -> {}", name, node_type, tupid);
        Ok(tupid)
    }

    /// Re-parents every cmd-link sourced at `old_tupid` onto `new_tupid`.
    pub fn move_cmdlink(&self, old_tupid: i64, new_tupid: i64) -> Result<()> {
        debug!(target: TARGET, "move_cmdlink({} -> {})", old_tupid, new_tupid);
        self.conn.execute(
            "UPDATE cmd_link SET src = ?1 WHERE src = ?2",
            params![new_tupid, old_tupid],
        )?;
        Ok(())
    }

    /// Deletes a node's own record along with any links that reference it,
    /// in a single short-lived transaction so a crash mid-delete can't
    /// leave dangling links.
    pub fn delete_name_file(&mut self, tupid: i64) -> Result<()> {
        debug!(target: TARGET, "delete_name_file({})", tupid);
        let tx = self.conn.transaction()?;
        tx.execute("DELETE FROM node WHERE tupid = ?1", params![tupid])?;
        tx.execute("DELETE FROM file_link WHERE src = ?1 OR dst = ?1", params![tupid])?;
        tx.execute("DELETE FROM cmd_link WHERE src = ?1 OR dst = ?1", params![tupid])?;
        tx.commit()?;
        Ok(())
    }

    /// Looks up a single node by tupid, for callers that need the name or
    /// type of a node they already know the id of.
    pub fn get_node(&self, tupid: i64) -> Result<Option<DbNode>> {
        self.conn
            .query_row(
                "SELECT tupid, name, type, flags FROM node WHERE tupid = ?1",
                params![tupid],
                |r| {
                    Ok((
                        r.get::<_, i64>(0)?,
                        r.get::<_, String>(1)?,
                        r.get::<_, i32>(2)?,
                        r.get::<_, i32>(3)?,
                    ))
                },
            )
            .optional()?
            .map(|(tupid, name, node_type, flags)| -> Result<DbNode> {
                Ok(DbNode {
                    tupid,
                    name,
                    node_type: NodeType::from_i32(node_type)?,
                    flags: Flags::from_bits_db(flags),
                })
            })
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults_when_absent() {
        let db = Database::open_in_memory().unwrap();
        assert_eq!(db.config_get_string("create_so", "make.so").unwrap(), "make.so");
        assert_eq!(db.config_get_int("show_progress", 1).unwrap(), 1);
    }

    #[test]
    fn config_overrides_default() {
        let db = Database::open_in_memory().unwrap();
        db.config_set("show_progress", "0").unwrap();
        assert_eq!(db.config_get_int("show_progress", 1).unwrap(), 0);
    }

    #[test]
    fn select_by_flags_snapshots_before_callback_writes() {
        let db = Database::open_in_memory().unwrap();
        db.insert_node(1, "dirA", NodeType::Dir, Flags::CREATE).unwrap();
        db.insert_node(2, "dirB", NodeType::Dir, Flags::CREATE).unwrap();
        db.insert_node(3, "cc -c a.c", NodeType::Cmd, Flags::NONE).unwrap();
        db.insert_file_link(1, 3).unwrap();

        let mut seen = Vec::new();
        db.select_node_by_flags(Flags::CREATE, |db, dbn| {
            seen.push(dbn.tupid);
            // Mutate a table unrelated to the one still being iterated;
            // this must not perturb the in-flight callback sequence.
            db.set_cmdchild_flags(dbn.tupid, Flags::DELETE)?;
            Ok(())
        })
        .unwrap();

        seen.sort();
        assert_eq!(seen, vec![1, 2]);
        assert_eq!(db.node_flags(3).unwrap(), Flags::DELETE);
    }

    #[test]
    fn cmd_link_traversal_follows_src() {
        let db = Database::open_in_memory().unwrap();
        db.insert_node(1, "cc -c a.c -o a.o", NodeType::Cmd, Flags::NONE).unwrap();
        db.insert_node(2, "a.o", NodeType::File, Flags::NONE).unwrap();
        db.insert_cmd_link(1, 2).unwrap();

        let mut dests = Vec::new();
        db.select_node_by_cmdlink(1, |dbn| {
            dests.push(dbn.tupid);
            Ok(())
        })
        .unwrap();
        assert_eq!(dests, vec![2]);
    }

    #[test]
    fn delete_name_file_removes_links() {
        let mut db = Database::open_in_memory().unwrap();
        db.insert_node(1, "a", NodeType::File, Flags::NONE).unwrap();
        db.insert_node(2, "b", NodeType::Cmd, Flags::NONE).unwrap();
        db.insert_file_link(1, 2).unwrap();
        db.delete_name_file(1).unwrap();
        assert!(!db.node_exists(1).unwrap());
        let mut dests = Vec::new();
        db.select_node_by_link(1, |dbn| {
            dests.push(dbn.tupid);
            Ok(())
        })
        .unwrap();
        assert!(dests.is_empty());
    }
}

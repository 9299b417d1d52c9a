//! Top-level sequencing of a single updater invocation: acquire the lock,
//! load the builder plugin, run the create phase, build the graph, execute
//! it, release the lock.

use crate::builder::build_graph;
use crate::create::run_create_phase;
use crate::db::Database;
use crate::executor::execute_graph;
use crate::lock::UpdateLock;
use crate::plugin::{LoadedPlugin, Plugin};
use anyhow::Result;
use std::path::Path;

const UPDATE_LOCK_FILE: &str = ".tup/update-lock";

/// Runs one full update pass against the database at `db_path`, rooted in
/// the directory containing it.
pub fn run(db_path: &str) -> Result<()> {
    let lock_path = Path::new(UPDATE_LOCK_FILE);
    let _lock = UpdateLock::acquire(lock_path)?;

    let mut db = Database::open(db_path)?;
    let create_so = db.config_get_string("create_so", "make.so")?;
    let show_progress = db.config_get_int("show_progress", 1)? != 0;

    let plugin = LoadedPlugin::load(&create_so)?;
    run_with_plugin(&mut db, &plugin, show_progress)
}

/// The same sequencing as [`run`], but against an already-open database
/// and an already-resolved plugin — the seam the test suite drives
/// against a [`crate::plugin::test_support::FakePlugin`].
pub fn run_with_plugin(db: &mut Database, plugin: &dyn Plugin, show_progress: bool) -> Result<()> {
    run_create_phase(db, plugin)?;
    let mut graph = build_graph(db)?;
    execute_graph(&mut graph, db, show_progress)?;
    Ok(())
}

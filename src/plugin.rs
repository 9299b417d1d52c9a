//! Loading and invoking the "create" builder plugin.
//!
//! The plugin is a dynamically loaded shared object exporting a single C
//! entry point, `int create(const char *dir)`. Given a directory's name, it
//! registers the commands and file-links that characterize that
//! directory's build rules into the database, returning 0 on success and
//! negative on failure.
//!
//! The plugin runs in-process (loaded via `libloading`, a safe(r) wrapper
//! around `dlopen`/`dlsym`) and is expected to open its own connection to
//! the same on-disk database path, under the same update lock the updater
//! itself holds — the FFI boundary stays free of Rust types by passing a
//! path, not a live connection handle.

use anyhow::{anyhow, Context, Result};
use libloading::{Library, Symbol};
use std::ffi::CString;
use std::os::raw::{c_char, c_int};

/// A loaded builder plugin's `create` entry point.
///
/// Indirected as a trait so tests can drive the create-phase driver
/// against a fake implementation without compiling and loading a real
/// `cdylib` fixture.
pub trait Plugin {
    /// Invokes the plugin's `create` entry point for `dir`. Returns `Ok(())`
    /// on success (the plugin returned >= 0), or an error describing the
    /// failure (the plugin returned negative).
    fn create(&self, dir: &str) -> Result<()>;
}

type CreateFn = unsafe extern "C" fn(*const c_char) -> c_int;

/// A plugin loaded from an on-disk shared object via `dlopen`.
///
/// The `Library` must outlive every call through `entry`, so it's kept
/// alongside the resolved symbol for the plugin's whole lifetime.
pub struct LoadedPlugin {
    _lib: Library,
    entry: CreateFn,
}

impl LoadedPlugin {
    /// Loads `path` and resolves its `create` symbol. Both a missing file
    /// and a missing symbol are fatal (`PLUGIN-LOAD`, per the error
    /// taxonomy): the updater cannot proceed without a builder.
    pub fn load(path: &str) -> Result<LoadedPlugin> {
        // Safety: loading an arbitrary shared object runs its
        // initializers; this is inherent to the plugin contract (§6) and
        // mirrors the original's direct `dlopen` call.
        let lib = unsafe { Library::new(path) }
            .with_context(|| format!("Error: Unable to load {}", path))?;
        let entry: CreateFn = unsafe {
            let sym: Symbol<CreateFn> = lib
                .get(b"create\0")
                .map_err(|_| anyhow!("Error: Couldn't find 'create' symbol in builder."))?;
            *sym
        };
        Ok(LoadedPlugin { _lib: lib, entry })
    }
}

impl Plugin for LoadedPlugin {
    fn create(&self, dir: &str) -> Result<()> {
        let cdir = CString::new(dir).with_context(|| format!("directory name {:?} has embedded NUL", dir))?;
        // Safety: `entry` was resolved from the plugin's own `create`
        // symbol and the contract requires it accept a NUL-terminated
        // directory name and return an int status.
        let rc = unsafe { (self.entry)(cdir.as_ptr()) };
        if rc < 0 {
            anyhow::bail!("create({:?}) failed with status {}", dir, rc);
        }
        Ok(())
    }
}

#[cfg(test)]
pub mod test_support {
    use super::*;
    use std::cell::RefCell;

    /// An in-process fake plugin for exercising the create-phase driver
    /// without a real shared object.
    #[derive(Default)]
    pub struct FakePlugin {
        pub calls: RefCell<Vec<String>>,
        pub fail_on: Vec<String>,
    }

    impl Plugin for FakePlugin {
        fn create(&self, dir: &str) -> Result<()> {
            self.calls.borrow_mut().push(dir.to_string());
            if self.fail_on.iter().any(|d| d == dir) {
                anyhow::bail!("create({:?}) failed", dir);
            }
            Ok(())
        }
    }
}

//! Temporary run storage.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use log;
use tempfile;

use crate::run::{Run, RunId, RunKind, RunWriter};

/// Temporary directory holding the runs of a single sort session.
///
/// Run files are named after the sorted file, the run round and position, and the phase that produced
/// them, e.g. `data.2.5.merged`. The directory is removed by [`TempArea::close`], and on a
/// best-effort basis when the area is dropped.
pub struct TempArea {
    dir: tempfile::TempDir,
    name: String,
}

impl TempArea {
    /// Creates a new temporary directory inside `parent`.
    ///
    /// # Arguments
    /// * `parent` - Directory the temporary directory is created in
    /// * `name` - Name of the sorted file, used as a run file name prefix
    pub fn create(parent: &Path, name: &str) -> io::Result<Self> {
        let dir = tempfile::Builder::new()
            .prefix(&format!("{}.", name))
            .suffix(".tmp")
            .tempdir_in(parent)?;

        log::info!("using {} as a temporary directory", dir.path().display());

        return Ok(TempArea {
            dir,
            name: name.to_string(),
        });
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Returns the file path of a run.
    pub fn run_path(&self, id: RunId, kind: RunKind) -> PathBuf {
        self.dir
            .path()
            .join(format!("{}.{}.{}.{}", self.name, id.round, id.position, kind.suffix()))
    }

    /// Creates a run writer for the run `id`.
    pub fn create_run(&self, id: RunId, kind: RunKind, buf_size: usize) -> io::Result<RunWriter> {
        RunWriter::create(id, kind, &self.run_path(id, kind), buf_size)
    }

    /// Deletes a consumed run.
    pub fn remove_run(&self, run: Run) -> io::Result<()> {
        log::trace!("removing run {} ({})", run.id(), run.path().display());
        fs::remove_file(run.path())
    }

    /// Moves the last run to the output path.
    pub fn promote(&self, run: Run, output: &Path) -> io::Result<()> {
        if let Err(err) = fs::rename(run.path(), output) {
            // the temporary directory may be located on another file system
            log::debug!("run rename failed ({}), copying {} instead", err, run.path().display());
            move_by_copy(run.path(), output)?;
        }

        return Ok(());
    }

    /// Removes the temporary directory with everything left in it.
    pub fn close(self) -> io::Result<()> {
        let path = self.dir.path().to_path_buf();
        self.dir.close()?;
        log::debug!("temporary directory {} removed", path.display());

        return Ok(());
    }
}

/// Copies `from` to `to`, syncs the copy to disk and only then removes `from`.
fn move_by_copy(from: &Path, to: &Path) -> io::Result<()> {
    fs::copy(from, to)?;
    fs::OpenOptions::new().write(true).open(to)?.sync_all()?;
    fs::remove_file(from)
}

//! An open notebook: ordered cells plus the directory they execute in.

use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::cell::{Cell, CodeCell, Language};
use crate::ids::{CellId, SessionId};

/// Subdirectory of the session dir holding code cell files.
pub const SRC_DIR: &str = "src";

/// Filename of the dependency manifest in the session dir.
pub const MANIFEST_FILENAME: &str = "package.json";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("cell {0} not found")]
    CellNotFound(CellId),
    #[error("a cell with id {0} already exists")]
    DuplicateId(CellId),
    #[error("a code cell named '{0}' already exists")]
    DuplicateFilename(String),
}

#[derive(Debug, Clone)]
pub struct Session {
    id: SessionId,
    dir: PathBuf,
    language: Language,
    cells: Vec<Cell>,
}

impl Session {
    #[must_use]
    pub fn new(id: SessionId, dir: PathBuf, language: Language, cells: Vec<Cell>) -> Self {
        Self {
            id,
            dir,
            language,
            cells,
        }
    }

    #[must_use]
    pub fn id(&self) -> &SessionId {
        &self.id
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    #[must_use]
    pub fn language(&self) -> Language {
        self.language
    }

    #[must_use]
    pub fn cells(&self) -> &[Cell] {
        &self.cells
    }

    #[must_use]
    pub fn src_dir(&self) -> PathBuf {
        self.dir.join(SRC_DIR)
    }

    /// On-disk location of a code cell file.
    #[must_use]
    pub fn path_for(&self, filename: &str) -> PathBuf {
        self.src_dir().join(filename)
    }

    #[must_use]
    pub fn manifest_path(&self) -> PathBuf {
        self.dir.join(MANIFEST_FILENAME)
    }

    #[must_use]
    pub fn cell(&self, id: &CellId) -> Option<&Cell> {
        self.cells.iter().find(|c| c.id() == id)
    }

    pub fn cell_mut(&mut self, id: &CellId) -> Option<&mut Cell> {
        self.cells.iter_mut().find(|c| c.id() == id)
    }

    #[must_use]
    pub fn code_cell_by_filename(&self, filename: &str) -> Option<&CodeCell> {
        self.cells
            .iter()
            .filter_map(Cell::as_code)
            .find(|c| c.filename == filename)
    }

    /// Filenames of every code cell, in notebook order.
    #[must_use]
    pub fn code_filenames(&self) -> Vec<String> {
        self.cells
            .iter()
            .filter_map(Cell::as_code)
            .map(|c| c.filename.clone())
            .collect()
    }

    /// Replace the cell with the same id. Rejects a filename collision with
    /// another code cell.
    pub fn replace_cell(&mut self, cell: Cell) -> Result<Cell, SessionError> {
        if let Some(code) = cell.as_code()
            && let Some(existing) = self.code_cell_by_filename(&code.filename)
            && existing.id != code.id
        {
            return Err(SessionError::DuplicateFilename(code.filename.clone()));
        }
        let slot = self
            .cells
            .iter_mut()
            .find(|c| c.id() == cell.id())
            .ok_or_else(|| SessionError::CellNotFound(cell.id().clone()))?;
        Ok(std::mem::replace(slot, cell))
    }

    pub fn remove_cell(&mut self, id: &CellId) -> Result<Cell, SessionError> {
        let idx = self
            .cells
            .iter()
            .position(|c| c.id() == id)
            .ok_or_else(|| SessionError::CellNotFound(id.clone()))?;
        Ok(self.cells.remove(idx))
    }

    /// Insert at `index`, clamped to the end of the list.
    pub fn insert_cell_at(&mut self, index: usize, cell: Cell) -> Result<(), SessionError> {
        if self.cell(cell.id()).is_some() {
            return Err(SessionError::DuplicateId(cell.id().clone()));
        }
        if let Some(code) = cell.as_code()
            && self.code_cell_by_filename(&code.filename).is_some()
        {
            return Err(SessionError::DuplicateFilename(code.filename.clone()));
        }
        let index = index.min(self.cells.len());
        self.cells.insert(index, cell);
        Ok(())
    }
}

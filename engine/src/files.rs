//! On-disk mirror of a session's runnable cells.
//!
//! Runners execute from disk, so code cells live at `<dir>/src/<filename>`
//! and the manifest at `<dir>/package.json`.

use std::io;

use cellbook_types::{Cell, Session};

/// Create the source directory and write every runnable cell.
pub(crate) async fn prepare(session: &Session) -> io::Result<()> {
    tokio::fs::create_dir_all(session.src_dir()).await?;
    for cell in session.cells() {
        write_cell(session, cell).await?;
    }
    Ok(())
}

pub(crate) async fn write_cell(session: &Session, cell: &Cell) -> io::Result<()> {
    match cell {
        Cell::Code(code) => {
            tokio::fs::create_dir_all(session.src_dir()).await?;
            tokio::fs::write(session.path_for(&code.filename), &code.source).await
        }
        Cell::PackageJson(manifest) => {
            tokio::fs::write(session.manifest_path(), &manifest.source).await
        }
        Cell::Title(_) | Cell::Markdown(_) => Ok(()),
    }
}

/// Remove a code cell's file. A file that is already gone is fine.
pub(crate) async fn remove_code_file(session: &Session, filename: &str) -> io::Result<()> {
    match tokio::fs::remove_file(session.path_for(filename)).await {
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

/// Current manifest text on disk, if any.
pub(crate) async fn read_manifest(session: &Session) -> Option<String> {
    tokio::fs::read_to_string(session.manifest_path()).await.ok()
}

//! Build the startup sessions named in the config from what is on disk.

use std::path::Path;

use anyhow::{Context, Result};

use cellbook_config::SessionConfig;
use cellbook_types::{
    Cell, CellId, CellStatus, CodeCell, Language, MANIFEST_FILENAME, PackageJsonCell, SRC_DIR,
    Session,
};

/// The manifest (if present) followed by one code cell per source file in
/// `<dir>/src`, by filename. An empty directory gets a blank `index` cell.
pub(crate) fn discover(config: &SessionConfig) -> Result<Session> {
    let mut cells = Vec::new();

    let manifest = config.dir.join(MANIFEST_FILENAME);
    if manifest.is_file() {
        let source = std::fs::read_to_string(&manifest)
            .with_context(|| format!("reading {}", manifest.display()))?;
        cells.push(Cell::PackageJson(PackageJsonCell {
            id: CellId::generate(),
            source,
            status: CellStatus::Idle,
        }));
    }

    let mut code = source_cells(&config.dir.join(SRC_DIR), config.language)?;
    if code.is_empty() {
        code.push(Cell::Code(CodeCell {
            id: CellId::generate(),
            source: String::new(),
            filename: format!("index.{}", config.language.extension()),
            language: config.language,
            status: CellStatus::Idle,
        }));
    }
    cells.extend(code);

    Ok(Session::new(
        config.id.clone(),
        config.dir.clone(),
        config.language,
        cells,
    ))
}

fn source_cells(src: &Path, language: Language) -> Result<Vec<Cell>> {
    let entries = match std::fs::read_dir(src) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e).with_context(|| format!("listing {}", src.display())),
    };

    let mut files = Vec::new();
    for entry in entries {
        let entry = entry.with_context(|| format!("listing {}", src.display()))?;
        if !entry.file_type().is_ok_and(|t| t.is_file()) {
            continue;
        }
        let Ok(filename) = entry.file_name().into_string() else {
            continue;
        };
        if Language::from_filename(&filename) == Some(language) {
            files.push(filename);
        }
    }
    files.sort();

    files
        .into_iter()
        .map(|filename| {
            let path = src.join(&filename);
            let source = std::fs::read_to_string(&path)
                .with_context(|| format!("reading {}", path.display()))?;
            Ok(Cell::Code(CodeCell {
                id: CellId::generate(),
                source,
                filename,
                language,
                status: CellStatus::Idle,
            }))
        })
        .collect()
}

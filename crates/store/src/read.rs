/// Read path: `traverse()`, `read_output()`, `read_dataset()`.
///
/// Readers take no lock. The container is opened read-only and replayed
/// once; a record still being appended by a writer is treated as absent, so
/// a traversal only ever lists complete datasets.
use container::Container;
use dataset::Dataset;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::StoreError;

/// Every dataset path of one container as of open time, depth-first with
/// children in name order, without a leading separator.
#[derive(Debug, Clone)]
pub struct Traversal {
    paths: std::vec::IntoIter<String>,
}

impl Iterator for Traversal {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        self.paths.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.paths.size_hint()
    }
}

impl ExactSizeIterator for Traversal {}

/// Lists every dataset in `filename`.
pub fn traverse(filename: &Path) -> Result<Traversal, StoreError> {
    let container = Container::open_read_only(filename)?;
    let paths: Vec<String> = container.dataset_paths().collect();
    debug!(file = %filename.display(), items = paths.len(), "traversed");
    Ok(Traversal {
        paths: paths.into_iter(),
    })
}

/// Result of [`read_output`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Summary {
    pub filename: PathBuf,
    pub items: usize,
}

/// Counts the datasets in `filename`, printing each path to `out` when
/// `verbose`, followed by `status: file <filename> has <n> items`.
pub fn read_output<W: Write>(
    filename: &Path,
    verbose: bool,
    out: &mut W,
) -> Result<Summary, StoreError> {
    let mut items = 0;
    for path in traverse(filename)? {
        if verbose {
            writeln!(out, "{path}")?;
        }
        items += 1;
    }
    writeln!(out, "status: file {} has {} items", filename.display(), items)?;

    Ok(Summary {
        filename: filename.to_path_buf(),
        items,
    })
}

/// Loads one dataset by its full path.
pub fn read_dataset(filename: &Path, path: &str) -> Result<Dataset, StoreError> {
    let mut container = Container::open_read_only(filename)?;
    Ok(container.read_dataset(path)?)
}

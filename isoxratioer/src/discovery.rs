//! Locating IsoX exports in a fragment folder tree.
//!
//! A fragment folder holds one subfolder per file type, conventionally `Smp` and `Std`:
//!
//! ```text
//! 119/
//!   Smp/run1.isox
//!   Std/run2.isox
//! ```
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use isoxratio::BatchInput;

/// An export found under a fragment folder, labeled with its parent folder's name
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct DiscoveredFile {
    pub path: PathBuf,
    pub file_type: String,
}

/// A folder of exports measuring one fragment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FragmentFolder {
    pub path: PathBuf,
    pub name: String,
    pub files: Vec<DiscoveredFile>,
}

impl FragmentFolder {
    /// Build batch inputs for the folder's files, labeling each with the folder name
    /// as its fragment when `label_with_folder` is set.
    pub fn batch_inputs(&self, label_with_folder: bool) -> Vec<BatchInput> {
        self.files
            .iter()
            .map(|f| {
                let input = BatchInput::new(f.path.clone()).with_file_type(f.file_type.clone());
                if label_with_folder {
                    input.with_fragment(self.name.clone())
                } else {
                    input
                }
            })
            .collect()
    }
}

pub fn folder_name(path: &Path) -> String {
    path.file_name()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string())
}

fn has_extension(path: &Path, extension: &str) -> bool {
    path.file_name()
        .map(|name| name.to_string_lossy().ends_with(extension))
        .unwrap_or_default()
}

fn collect_from_subfolders(
    folder: &Path,
    extension: &str,
    acc: &mut Vec<DiscoveredFile>,
) -> io::Result<()> {
    for entry in fs::read_dir(folder)? {
        let entry = entry?;
        let path = entry.path();
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let file_type = folder_name(&path);
        for child in fs::read_dir(&path)? {
            let child = child?;
            let child_path = child.path();
            if child.file_type()?.is_file() && has_extension(&child_path, extension) {
                acc.push(DiscoveredFile {
                    path: child_path,
                    file_type: file_type.clone(),
                });
            }
        }
        collect_from_subfolders(&path, extension, acc)?;
    }
    Ok(())
}

/// Find every file ending with `extension` in the subfolders of `folder` at any depth.
///
/// Files directly inside `folder` are not collected. The result is in path order.
pub fn find_files_in_subfolders(folder: &Path, extension: &str) -> io::Result<Vec<DiscoveredFile>> {
    let mut files = Vec::new();
    collect_from_subfolders(folder, extension, &mut files)?;
    files.sort();
    Ok(files)
}

pub fn discover_fragment_folder(folder: &Path, extension: &str) -> io::Result<FragmentFolder> {
    if !folder.is_dir() {
        return Err(io::Error::new(
            io::ErrorKind::NotFound,
            format!("{} is not a directory", folder.display()),
        ));
    }
    let files = find_files_in_subfolders(folder, extension)?;
    if files.is_empty() {
        warn!(
            "No files ending with {extension} found under {}",
            folder.display()
        );
    } else {
        debug!("Found {} files under {}", files.len(), folder.display());
    }
    Ok(FragmentFolder {
        path: folder.to_path_buf(),
        name: folder_name(folder),
        files,
    })
}

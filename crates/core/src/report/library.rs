use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use super::ReportError;
use crate::experiment::FINAL_DIR;

/// One experiment's finished chapter.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FinalVersion {
    pub experiment: String,
    pub text: String,
    pub path: PathBuf,
}

fn sorted_entries(dir: &Path) -> Result<Vec<PathBuf>, ReportError> {
    let read_err = |source| ReportError::ReadDir {
        path: dir.to_path_buf(),
        source,
    };
    let mut paths = Vec::new();
    for entry in fs::read_dir(dir).map_err(read_err)? {
        paths.push(entry.map_err(read_err)?.path());
    }
    paths.sort();
    Ok(paths)
}

/// Walks `{auditions_dir}/*/final/*.txt` and groups the texts by chapter id.
/// Editor and sanity artefacts are skipped; a missing auditions directory
/// yields an empty map.
pub fn gather_final_versions(
    auditions_dir: &Path,
) -> Result<BTreeMap<String, Vec<FinalVersion>>, ReportError> {
    let mut chapters: BTreeMap<String, Vec<FinalVersion>> = BTreeMap::new();
    if !auditions_dir.is_dir() {
        return Ok(chapters);
    }

    for experiment_dir in sorted_entries(auditions_dir)? {
        let final_dir = experiment_dir.join(FINAL_DIR);
        if !final_dir.is_dir() {
            continue;
        }
        let experiment = experiment_dir
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();

        for path in sorted_entries(&final_dir)? {
            let is_txt = path.extension().map(|ext| ext == "txt").unwrap_or(false);
            let Some(stem) = path.file_stem().map(|s| s.to_string_lossy().into_owned()) else {
                continue;
            };
            let lowered = stem.to_lowercase();
            if !is_txt || !path.is_file() || lowered.contains("editor") || lowered.contains("sanity") {
                continue;
            }
            let text = fs::read_to_string(&path).map_err(|source| ReportError::ReadFile {
                path: path.clone(),
                source,
            })?;
            chapters.entry(stem).or_default().push(FinalVersion {
                experiment: experiment.clone(),
                text,
                path,
            });
        }
    }
    Ok(chapters)
}

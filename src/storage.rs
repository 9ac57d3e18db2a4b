use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct DataPaths {
    pub cases_path: PathBuf,
    pub boundaries_path: PathBuf,
}

impl DataPaths {
    pub fn new(data_dir: impl Into<PathBuf>, cases_file: &str, boundaries_file: &str) -> Self {
        let data_dir: PathBuf = data_dir.into();
        Self {
            cases_path: data_dir.join(cases_file),
            boundaries_path: data_dir.join(boundaries_file),
        }
    }
}

pub fn file_present_nonempty(path: &Path) -> bool {
    match std::fs::metadata(path) {
        Ok(m) => m.is_file() && m.len() > 0,
        Err(_) => false,
    }
}

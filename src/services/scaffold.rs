//! Project folder layout.
//!
//! Existing files are never overwritten, so scaffolding an existing project
//! only fills in what is missing.

use std::io::Write;
use std::path::{Path, PathBuf};

use crate::errors::AppError;

pub const FOLDERS: [&str; 6] = [
    "01_dados_brutos",
    "02_dados_processados",
    "03_notebooks",
    "04_scripts",
    "05_modelos",
    "06_relatorios",
];

fn starter_files(project_name: &str) -> Vec<(&'static str, String)> {
    vec![
        ("03_notebooks/exploracao_inicial.ipynb", String::new()),
        (
            "04_scripts/README.md",
            "Collector and processing scripts.\n".to_string(),
        ),
        (
            "README.md",
            format!(
                "# Air quality analysis project: {}\n\nProject description...\n",
                project_name
            ),
        ),
        (
            ".gitignore",
            "/target/\n.vscode/\n01_dados_brutos/\n02_dados_processados/\n".to_string(),
        ),
    ]
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Entry {
    Created(PathBuf),
    Existing(PathBuf),
}

#[derive(Debug, Default)]
pub struct ScaffoldReport {
    pub entries: Vec<Entry>,
}

impl ScaffoldReport {
    pub fn created(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| matches!(e, Entry::Created(_)))
            .count()
    }

    pub fn existing(&self) -> usize {
        self.entries.len() - self.created()
    }
}

/// Create `path` with `content` unless it already exists.
fn create_file(path: &Path, content: &str) -> Result<Entry, AppError> {
    match std::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
    {
        Ok(mut file) => {
            file.write_all(content.as_bytes())?;
            Ok(Entry::Created(path.to_path_buf()))
        }
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
            Ok(Entry::Existing(path.to_path_buf()))
        }
        Err(e) => Err(AppError::Io(e)),
    }
}

/// Create the project folders (each with a `.gitkeep`) and starter files
/// under `root`.
pub fn scaffold(root: &Path) -> Result<ScaffoldReport, AppError> {
    let mut report = ScaffoldReport::default();

    for folder in FOLDERS {
        let dir = root.join(folder);
        if dir.is_dir() {
            tracing::info!("Folder exists: {}/", dir.display());
            report.entries.push(Entry::Existing(dir.clone()));
        } else {
            std::fs::create_dir_all(&dir)?;
            tracing::info!("Folder created: {}/", dir.display());
            report.entries.push(Entry::Created(dir.clone()));
        }
        create_file(&dir.join(".gitkeep"), "")?;
    }

    let project_name = root
        .canonicalize()
        .ok()
        .and_then(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
        .unwrap_or_else(|| "qualidade_ar_projeto".to_string());

    for (relative, content) in starter_files(&project_name) {
        let path = root.join(relative);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let entry = create_file(&path, &content)?;
        match &entry {
            Entry::Created(p) => tracing::info!("File created: {}", p.display()),
            Entry::Existing(p) => tracing::info!("File exists: {}", p.display()),
        }
        report.entries.push(entry);
    }

    Ok(report)
}

use std::path::PathBuf;

const SQLITE_FILE: &str = "aquafarm.sqlite";

/// Common storage and listen configuration shared by all services.
///
/// Each service binary fills this from its config file and command line,
/// then passes it to storage layer initialization.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Root directory for persistent data.
    pub data_dir: Option<PathBuf>,

    /// Path to the SQLite database file.
    /// Defaults to `{data_dir}/aquafarm.sqlite` if not specified.
    pub sqlite_path: Option<PathBuf>,

    /// Listen address for the HTTP server.
    pub listen: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            sqlite_path: None,
            listen: "0.0.0.0:8080".to_string(),
        }
    }
}

impl ServiceConfig {
    /// Explicit `sqlite_path`, else `{data_dir}/aquafarm.sqlite`, else a file
    /// in the working directory.
    pub fn resolve_sqlite_path(&self) -> PathBuf {
        match (&self.sqlite_path, &self.data_dir) {
            (Some(path), _) => path.clone(),
            (None, Some(dir)) => dir.join(SQLITE_FILE),
            (None, None) => PathBuf::from(SQLITE_FILE),
        }
    }

    /// Create the directories the database file needs and return its path.
    pub fn prepare_storage(&self) -> std::io::Result<PathBuf> {
        if let Some(dir) = &self.data_dir {
            std::fs::create_dir_all(dir)?;
        }
        let path = self.resolve_sqlite_path();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        Ok(path)
    }
}

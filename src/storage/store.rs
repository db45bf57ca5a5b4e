use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use super::types::*;
use crate::error::{ToolError, ToolResult};

pub const CONFIG_FILE_NAME: &str = "config.toml";
pub const DEFAULT_DOMAIN_FILE_NAME: &str = "default_domain.json";
pub const LOG_FILE_NAME: &str = "diradmin.log";
pub const USERS_FILE_NAME: &str = "users.json";
const WORK_ROOT_DIR: &str = "working";

// -- Base directory -----------------------------------------------------------

/// `$DIRADMIN_HOME`, else the platform config dir.
pub fn base_dir() -> ToolResult<PathBuf> {
    let dir = match std::env::var_os("DIRADMIN_HOME") {
        Some(home) => PathBuf::from(home),
        None => dirs::config_dir()
            .ok_or_else(|| ToolError::Config("Could not determine config directory".into()))?
            .join("diradmin"),
    };
    fs::create_dir_all(&dir).map_err(|e| ToolError::file(&dir, e))?;
    Ok(dir)
}

pub fn load_settings(base_dir: &Path) -> ToolResult<Settings> {
    let path = base_dir.join(CONFIG_FILE_NAME);
    if !path.exists() {
        return Ok(Settings::default());
    }
    let contents = fs::read_to_string(&path).map_err(|e| ToolError::file(&path, e))?;
    toml::from_str(&contents)
        .map_err(|e| ToolError::Config(format!("{} is not valid toml: {}", path.display(), e)))
}

pub fn read_default_domain(base_dir: &Path) -> ToolResult<Option<Defaults>> {
    let path = base_dir.join(DEFAULT_DOMAIN_FILE_NAME);
    if !path.exists() {
        return Ok(None);
    }
    let defaults: Defaults = read_json_path(&path)?;
    if defaults.apps_domain.is_empty() {
        return Err(ToolError::Config(format!(
            "Unexpected defaults read from {}",
            path.display()
        )));
    }
    Ok(Some(defaults))
}

pub fn write_defaults(
    base_dir: &Path,
    defaults: &Defaults,
    overwrite_ok: bool,
) -> ToolResult<PathBuf> {
    let path = base_dir.join(DEFAULT_DOMAIN_FILE_NAME);
    ensure_writable(&path, overwrite_ok)?;
    write_json_path(&path, defaults)?;
    Ok(path)
}

// -- Path-level helpers -------------------------------------------------------

fn ensure_writable(path: &Path, overwrite_ok: bool) -> ToolResult<()> {
    if !path.is_file() {
        return Ok(());
    }
    let readonly = fs::metadata(path)
        .map(|m| m.permissions().readonly())
        .unwrap_or(false);
    if readonly {
        return Err(ToolError::FileConflict {
            path: path.to_path_buf(),
            reason: "The file permissions do not allow writing.".into(),
        });
    }
    if !overwrite_ok {
        return Err(ToolError::FileConflict {
            path: path.to_path_buf(),
            reason: "Use --force to overwrite.".into(),
        });
    }
    Ok(())
}

fn read_json_path<T: DeserializeOwned>(path: &Path) -> ToolResult<T> {
    let contents = fs::read_to_string(path).map_err(|e| ToolError::file(path, e))?;
    serde_json::from_str(&contents).map_err(|e| ToolError::Json {
        path: path.to_path_buf(),
        source: e,
    })
}

fn write_json_path<T: Serialize + ?Sized>(path: &Path, value: &T) -> ToolResult<()> {
    let contents = serde_json::to_string(value).map_err(|e| ToolError::Json {
        path: path.to_path_buf(),
        source: e,
    })?;
    fs::write(path, contents).map_err(|e| ToolError::file(path, e))?;
    debug!("Wrote file {}", path.display());
    Ok(())
}

// -- Per-domain working store -------------------------------------------------

/// Files for one apps domain, rooted at `<work_root>/<domain>`.
///
/// Single writer: two processes sharing a domain directory is unsupported.
#[derive(Debug, Clone)]
pub struct WorkingStore {
    domain: String,
    work_dir: PathBuf,
}

impl WorkingStore {
    pub fn open(base_dir: &Path, settings: &Settings, domain: &str) -> ToolResult<Self> {
        let root = match &settings.work_dir {
            Some(dir) if dir.is_absolute() => dir.clone(),
            Some(dir) => base_dir.join(dir),
            None => base_dir.join(WORK_ROOT_DIR),
        };
        Self::at(root.join(domain), domain)
    }

    pub fn at(work_dir: PathBuf, domain: &str) -> ToolResult<Self> {
        fs::create_dir_all(&work_dir).map_err(|e| ToolError::file(&work_dir, e))?;
        Ok(Self {
            domain: domain.to_string(),
            work_dir,
        })
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    pub fn path(&self, file_name: &str) -> PathBuf {
        self.work_dir.join(file_name)
    }

    pub fn exists(&self, file_name: &str) -> bool {
        self.path(file_name).is_file()
    }

    /// Last modified time, formatted for log messages.
    pub fn file_time(&self, file_name: &str) -> ToolResult<String> {
        let path = self.path(file_name);
        let modified = fs::metadata(&path)
            .and_then(|m| m.modified())
            .map_err(|e| ToolError::file(&path, e))?;
        let local: chrono::DateTime<chrono::Local> = modified.into();
        Ok(local.format("%a %b %e %H:%M:%S %Y").to_string())
    }

    pub fn ensure_writable(&self, file_name: &str, overwrite_ok: bool) -> ToolResult<()> {
        ensure_writable(&self.path(file_name), overwrite_ok)
    }

    pub fn remove(&self, file_name: &str) -> ToolResult<()> {
        let path = self.path(file_name);
        if path.is_file() {
            fs::remove_file(&path).map_err(|e| ToolError::file(&path, e))?;
            debug!("Removed file {}", path.display());
        }
        Ok(())
    }

    // -- JSON -----------------------------------------------------------------

    pub fn read_json<T: DeserializeOwned>(&self, file_name: &str) -> ToolResult<T> {
        let path = self.path(file_name);
        if !path.is_file() {
            return Err(ToolError::file(
                &path,
                std::io::Error::new(std::io::ErrorKind::NotFound, "Cannot locate file"),
            ));
        }
        read_json_path(&path)
    }

    pub fn write_json<T: Serialize + ?Sized>(
        &self,
        file_name: &str,
        value: &T,
        overwrite_ok: bool,
    ) -> ToolResult<PathBuf> {
        let path = self.path(file_name);
        ensure_writable(&path, overwrite_ok)?;
        write_json_path(&path, value)?;
        Ok(path)
    }

    // -- Text -----------------------------------------------------------------

    /// One entry per line; blank lines are skipped.
    pub fn read_text_set(&self, file_name: &str) -> ToolResult<BTreeSet<String>> {
        let path = self.path(file_name);
        let contents = fs::read_to_string(&path).map_err(|e| ToolError::file(&path, e))?;
        Ok(contents
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect())
    }

    // -- CSV ------------------------------------------------------------------

    pub fn read_csv(&self, file_name: &str) -> ToolResult<Vec<Vec<String>>> {
        let path = self.path(file_name);
        let csv_err = |e| ToolError::Csv {
            path: path.clone(),
            source: e,
        };
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_path(&path)
            .map_err(csv_err)?;
        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record.map_err(csv_err)?;
            rows.push(record.iter().map(str::to_string).collect());
        }
        Ok(rows)
    }

    /// Returns `None` (and writes nothing) when there are no rows.
    pub fn write_csv<R, F>(
        &self,
        file_name: &str,
        header: &[&str],
        rows: R,
        overwrite_ok: bool,
    ) -> ToolResult<Option<PathBuf>>
    where
        R: IntoIterator<Item = Vec<F>>,
        F: AsRef<[u8]>,
    {
        let path = self.path(file_name);
        ensure_writable(&path, overwrite_ok)?;
        let mut rows = rows.into_iter().peekable();
        if rows.peek().is_none() {
            warn!(
                "Improperly formed csv rows. File not written: {}",
                path.display()
            );
            return Ok(None);
        }
        let csv_err = |e| ToolError::Csv {
            path: path.clone(),
            source: e,
        };
        let mut writer = csv::Writer::from_path(&path).map_err(csv_err)?;
        if !header.is_empty() {
            writer.write_record(header).map_err(csv_err)?;
        }
        for row in rows {
            writer.write_record(row).map_err(csv_err)?;
        }
        writer.flush().map_err(|e| ToolError::file(&path, e))?;
        debug!("Wrote {}", path.display());
        Ok(Some(path))
    }
}

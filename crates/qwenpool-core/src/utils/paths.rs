use std::fs;
use std::path::PathBuf;

const DATA_DIR: &str = ".qwenpool";

/// Get data directory path.
///
/// Priority:
/// 1. `QWENPOOL_DATA_DIR` environment variable (for container deployments)
/// 2. `~/.qwenpool`
pub fn get_data_dir() -> Result<PathBuf, String> {
    let data_dir = if let Ok(custom_dir) = std::env::var("QWENPOOL_DATA_DIR") {
        PathBuf::from(custom_dir)
    } else {
        let home = dirs::home_dir().ok_or("Cannot resolve the user home directory")?;
        home.join(DATA_DIR)
    };

    ensure_dir(data_dir)
}

/// Create `dir` if missing and hand it back.
pub fn ensure_dir(dir: PathBuf) -> Result<PathBuf, String> {
    if !dir.exists() {
        fs::create_dir_all(&dir)
            .map_err(|e| format!("Failed to create data directory {}: {}", dir.display(), e))?;
    }
    Ok(dir)
}

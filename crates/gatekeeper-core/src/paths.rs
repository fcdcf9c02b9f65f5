use directories::ProjectDirs;
use std::path::PathBuf;

pub const APP_QUALIFIER: &str = "com";
pub const APP_ORG: &str = "gatekeeper";
pub const APP_NAME: &str = "gatekeeper";

pub const DATA_DIR_ENV: &str = "GATEKEEPER_DATA_DIR";
pub const STATUS_SOCKET_ENV: &str = "GATEKEEPER_STATUS_SOCKET";

pub fn data_dir() -> anyhow::Result<PathBuf> {
    if let Ok(override_dir) = std::env::var(DATA_DIR_ENV) {
        return Ok(PathBuf::from(override_dir));
    }
    let dirs = ProjectDirs::from(APP_QUALIFIER, APP_ORG, APP_NAME)
        .ok_or_else(|| anyhow::anyhow!("cannot determine data directory"))?;
    Ok(dirs.data_dir().to_path_buf())
}

pub fn snapshot_path() -> anyhow::Result<PathBuf> {
    Ok(data_dir()?.join("config.json"))
}

pub fn key_dir() -> anyhow::Result<PathBuf> {
    Ok(data_dir()?.join("keys"))
}

pub fn status_socket_path() -> anyhow::Result<PathBuf> {
    if let Ok(override_path) = std::env::var(STATUS_SOCKET_ENV) {
        return Ok(PathBuf::from(override_path));
    }
    #[cfg(unix)]
    {
        Ok(data_dir()?.join("gatekeeper-status.sock"))
    }
    #[cfg(windows)]
    {
        Ok(PathBuf::from(r"\\.\pipe\GatekeeperStatus"))
    }
}

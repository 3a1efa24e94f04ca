use std::path::PathBuf;

pub fn system_config_file() -> PathBuf {
    PathBuf::from("/etc/face-enroll/face-enroll.toml")
}

pub fn system_data_dir() -> PathBuf {
    PathBuf::from("/usr/share/face-enroll")
}

/// Per-user config, checked before the system file.
pub fn user_config_file() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("face-enroll").join("face-enroll.toml"))
}

/// First existing config file: explicit path, local dev config, user config,
/// then the system file.
pub fn find_config_file(explicit: Option<PathBuf>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path);
    }

    let local = PathBuf::from("configs/face-enroll.toml");
    [Some(local), user_config_file(), Some(system_config_file())]
        .into_iter()
        .flatten()
        .find(|p| p.exists())
}

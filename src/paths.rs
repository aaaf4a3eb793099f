use std::path::PathBuf;

/// Default config file: `~/.config/vbm/config.toml`
pub fn config_file() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("vbm")
        .join("config.toml")
}

/// Default log file used by `--log`: `~/.local/share/vbm/vbm.log`
pub fn log_file() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("vbm")
        .join("vbm.log")
}

use std::path::PathBuf;

/// Configuration for the map build and table read paths.
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory holding table files.
    pub dir: PathBuf,

    /// Use fsync instead of fdatasync when finishing output files
    /// (default: false).
    pub use_fsync: bool,

    /// Total on-disk budget for the table directory. Checked after a new
    /// map file is written; `None` disables the check (default).
    pub max_allowed_space: Option<u64>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("./atlasdb"),
            use_fsync: false,
            max_allowed_space: None,
        }
    }
}

impl Config {
    /// Create a new config with the given table directory.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            ..Default::default()
        }
    }

    /// Use fsync when finishing output files.
    pub fn use_fsync(mut self, enabled: bool) -> Self {
        self.use_fsync = enabled;
        self
    }

    /// Set the on-disk space budget.
    pub fn max_allowed_space(mut self, bytes: u64) -> Self {
        self.max_allowed_space = Some(bytes);
        self
    }
}

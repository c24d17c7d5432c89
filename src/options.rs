use std::path::PathBuf;

use crate::cookies::Cookie;

#[derive(Debug, Clone)]
pub struct Options {
    /// Number of concurrent segment download workers.
    pub workers: usize,
    pub referer: Option<String>,
    pub cookies: Vec<Cookie>,
    /// Skip segments whose download failed instead of aborting the assembly.
    pub skip_missing: bool,
    /// Parent directory for the per-run segment directory, system temp dir when unset.
    pub temp_dir: Option<PathBuf>,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            workers: 4,
            referer: None,
            cookies: Vec::new(),
            skip_missing: false,
            temp_dir: None,
        }
    }
}

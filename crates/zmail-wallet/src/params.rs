//! Discovery of the Sapling proving parameter files.
//!
//! Search order:
//! 1. An explicitly configured directory
//! 2. `params/` under the working directory and up to five of its parents
//! 3. `params/` next to the executable and up to five of its parents
//! 4. `~/.zcash-params`

use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::WalletError;

/// Spend circuit parameter file name.
pub const SPEND_PARAMS: &str = "sapling-spend.params";

/// Output circuit parameter file name.
pub const OUTPUT_PARAMS: &str = "sapling-output.params";

const PARAMS_DIR: &str = "params";
const MAX_PARENT_LEVELS: usize = 5;

/// Location of a complete parameter set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvingParameters {
    pub dir: PathBuf,
    pub spend: PathBuf,
    pub output: PathBuf,
}

impl ProvingParameters {
    /// Use `dir` if it holds both parameter files.
    pub fn in_dir(dir: &Path) -> Option<Self> {
        let spend = dir.join(SPEND_PARAMS);
        let output = dir.join(OUTPUT_PARAMS);
        (spend.is_file() && output.is_file()).then(|| Self {
            dir: dir.to_path_buf(),
            spend,
            output,
        })
    }

    /// Search the standard locations, optionally starting with `configured`.
    pub fn locate(configured: Option<&Path>) -> Result<Self, WalletError> {
        let mut candidates: Vec<PathBuf> = configured.map(Path::to_path_buf).into_iter().collect();
        candidates.extend(default_search_dirs());
        Self::locate_in(candidates)
    }

    /// Return the first candidate holding both files. On failure the error
    /// lists every directory that was checked.
    pub fn locate_in(candidates: impl IntoIterator<Item = PathBuf>) -> Result<Self, WalletError> {
        let mut checked = Vec::new();
        for dir in candidates {
            debug!(dir = %dir.display(), "checking for proving parameters");
            if let Some(found) = Self::in_dir(&dir) {
                info!(dir = %found.dir.display(), "proving parameters found");
                return Ok(found);
            }
            checked.push(dir);
        }
        Err(WalletError::ParamsNotFound { checked })
    }
}

/// `start/params` and the same under each of up to five ancestors.
fn ancestor_params_dirs(start: &Path) -> impl Iterator<Item = PathBuf> + '_ {
    start
        .ancestors()
        .take(MAX_PARENT_LEVELS + 1)
        .map(|dir| dir.join(PARAMS_DIR))
}

fn default_search_dirs() -> Vec<PathBuf> {
    let mut dirs_out = Vec::new();
    if let Ok(cwd) = std::env::current_dir() {
        dirs_out.extend(ancestor_params_dirs(&cwd));
    }
    if let Some(exe_dir) = std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf))
    {
        dirs_out.extend(ancestor_params_dirs(&exe_dir));
    }
    if let Some(home) = dirs::home_dir() {
        dirs_out.push(home.join(".zcash-params"));
    }
    dirs_out.dedup();
    dirs_out
}

use std::path::{Path, PathBuf};
use std::time::Duration;

use dibs_core::ModuleName;

pub const REPOSITORIES_DIR: &str = "repositories";

/// Grace period for a killed supervised process before it is reported stuck.
pub const KILL_GRACE: Duration = Duration::from_secs(5);

/// Time a supervised process group gets between SIGTERM and SIGKILL.
pub const TERM_GRACE: Duration = Duration::from_secs(2);

pub fn repositories_root(base_dir: &Path) -> PathBuf {
    base_dir.join(REPOSITORIES_DIR)
}

/// `<base>/repositories/<module segments…>`
pub fn repository_path(base_dir: &Path, module: &ModuleName) -> PathBuf {
    module.path_under(&repositories_root(base_dir))
}

use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::{info, warn};

use crate::consts::{SOLVER_FOV_HIGH_DEG, SOLVER_FOV_LOW_DEG};

/// Result of one plate-solving attempt. Failure of one frame never
/// blocks the others.
#[derive(Clone, Debug, PartialEq)]
pub enum SolveOutcome {
    Solved,
    Failed { detail: String },
}

/// Narrow boundary to the external WCS solver: solve one calibrated
/// file, report success or failure. The solver is expected to mutate the
/// FITS header in place with WCS keys on success and exit non-zero on
/// failure.
pub trait WcsSolver {
    fn solve(&self, path: &Path) -> SolveOutcome;
}

/// Shells out to a plate-solver binary (e.g. astrometry.net's
/// `solve-field`) with a fixed field-of-view width hint.
pub struct CommandSolver {
    binary: PathBuf,
}

impl CommandSolver {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

impl WcsSolver for CommandSolver {
    fn solve(&self, path: &Path) -> SolveOutcome {
        let result = Command::new(&self.binary)
            .arg("--scale-units")
            .arg("degwidth")
            .arg("--scale-low")
            .arg(SOLVER_FOV_LOW_DEG.to_string())
            .arg("--scale-high")
            .arg(SOLVER_FOV_HIGH_DEG.to_string())
            .arg("--overwrite")
            .arg("--no-plots")
            .arg(path)
            .status();

        match result {
            Ok(status) if status.success() => {
                info!(path = %path.display(), "WCS solution found");
                SolveOutcome::Solved
            }
            Ok(status) => {
                warn!(path = %path.display(), code = ?status.code(), "WCS solver failed");
                SolveOutcome::Failed {
                    detail: format!("solver exited with status {status}"),
                }
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "WCS solver did not start");
                SolveOutcome::Failed {
                    detail: format!("failed to start solver: {e}"),
                }
            }
        }
    }
}

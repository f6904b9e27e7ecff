//! Git code acquisition

use tracing::{debug, info};

use crate::deploy::runner::CommandRunner;
use crate::deploy::shell::{self, quote};
use crate::errors::DeployerError;

/// What happened to the working tree
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GitSync {
    Cloned,
    Pulled,
}

/// Sync a git repository into `target_dir` (clone or pull)
pub async fn sync_repository(
    runner: &CommandRunner<'_>,
    repo_url: &str,
    branch: Option<&str>,
    target_dir: &str,
) -> Result<GitSync, DeployerError> {
    info!("Syncing Git repository {} into {}", repo_url, target_dir);
    let transcript = runner.transcript();

    ensure_git(runner).await;

    let work_tree = format!("{}/.git", target_dir);
    if runner.probe(&format!("test -d {}", quote(&work_tree))).await {
        debug!("Working tree exists, pulling updates...");
        transcript.info(format!("Existing working tree found at {}, pulling", target_dir));
        let pull = match branch {
            Some(branch) => format!("git -C {} pull origin {}", quote(target_dir), quote(branch)),
            None => format!("git -C {} pull", quote(target_dir)),
        };
        runner.run(&pull).await?;
        transcript.info("Repository updated");
        Ok(GitSync::Pulled)
    } else {
        debug!("Cloning repository to {}...", target_dir);
        transcript.info(format!("No working tree at {}, cloning", target_dir));
        let clone = match branch {
            Some(branch) => format!(
                "git clone -b {} {} {}",
                quote(branch),
                quote(repo_url),
                quote(target_dir)
            ),
            None => format!("git clone {} {}", quote(repo_url), quote(target_dir)),
        };
        runner.run(&clone).await?;
        transcript.info("Repository cloned");
        Ok(GitSync::Cloned)
    }
}

/// Install git when the host lacks it; a failure here surfaces as the
/// clone/pull failing right after
async fn ensure_git(runner: &CommandRunner<'_>) {
    if runner.probe("git --version").await {
        return;
    }
    runner
        .transcript()
        .info("git is not installed, installing it with the OS package manager");
    if let Err(e) = runner.run(&shell::package_install("git")).await {
        runner
            .transcript()
            .warn(format!("Could not install git: {}", e));
    }
}

//! Process supervisor adapter (pm2) with a detached fallback

use tracing::{debug, info};

use crate::deploy::runner::CommandRunner;
use crate::deploy::shell::{self, quote};
use crate::errors::DeployerError;

/// Pid file written by a detached launch, relative to the app directory
pub const PID_FILE: &str = ".deployer.pid";

/// Log file a detached launch redirects output to
pub const DETACHED_LOG: &str = "app.log";

/// How the application ended up running
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchMode {
    Supervised,
    Detached,
}

/// Start the application in `dir`, under pm2 when `supervise` is set and pm2
/// is (or can be made) available
pub async fn launch(
    runner: &CommandRunner<'_>,
    dir: &str,
    name: &str,
    supervise: bool,
) -> Result<LaunchMode, DeployerError> {
    let transcript = runner.transcript();

    if !supervise {
        transcript.info("Process supervision not requested");
        launch_detached(runner, dir).await?;
        return Ok(LaunchMode::Detached);
    }

    if !ensure_supervisor(runner).await {
        launch_detached(runner, dir).await?;
        return Ok(LaunchMode::Detached);
    }

    launch_supervised(runner, dir, name).await?;
    Ok(LaunchMode::Supervised)
}

/// Probe for pm2, installing it once if absent.
///
/// Returns false when supervision has to be disabled for this run.
pub async fn ensure_supervisor(runner: &CommandRunner<'_>) -> bool {
    if let Some(version) = runner.probe_output("pm2 -v").await {
        debug!("pm2 {} present", version);
        return true;
    }

    let transcript = runner.transcript();
    transcript.info("pm2 not found, installing it globally");
    let install = shell::privileged("npm install -g pm2 || $SUDO npm install -g pm2");
    if let Err(e) = runner.run(&install).await {
        transcript.warn(format!(
            "pm2 installation failed, supervision disabled for this run: {}",
            e
        ));
        return false;
    }

    if runner.probe("pm2 -v").await {
        true
    } else {
        transcript.warn("pm2 still not callable after install, supervision disabled for this run");
        false
    }
}

/// Whether pm2 knows an instance called `name`.
///
/// A failing `describe` is only read as "not found" when the pm2 daemon
/// itself answers; otherwise the supervisor is reported as unavailable.
pub async fn find_instance(runner: &CommandRunner<'_>, name: &str) -> Result<bool, DeployerError> {
    match runner.run(&format!("pm2 describe {}", quote(name))).await {
        Ok(stdout) => Ok(!stdout.contains("doesn't exist")),
        Err(DeployerError::Command { .. }) => {
            if runner.probe("pm2 ping").await {
                Ok(false)
            } else {
                Err(DeployerError::SupervisorUnavailable(format!(
                    "pm2 could not describe {} and its daemon does not answer",
                    name
                )))
            }
        }
        Err(e) => Err(e),
    }
}

async fn launch_supervised(
    runner: &CommandRunner<'_>,
    dir: &str,
    name: &str,
) -> Result<(), DeployerError> {
    let transcript = runner.transcript();
    let name_q = quote(name);

    if find_instance(runner, name).await? {
        transcript.info(format!("Replacing existing pm2 instance {}", name));
        runner.run(&format!("pm2 stop {}", name_q)).await?;
        runner.run(&format!("pm2 delete {}", name_q)).await?;
    } else {
        transcript.info(format!("No pm2 instance named {} yet, first deployment", name));
    }

    info!("Starting {} under pm2", name);
    runner
        .run_in(dir, &format!("pm2 start npm --name {} -- start", name_q))
        .await?;
    transcript.info(format!("Application started under pm2 as {}", name));

    if let Err(e) = runner.run("pm2 save").await {
        transcript.warn(format!("Could not persist the pm2 process list: {}", e));
    }
    Ok(())
}

async fn launch_detached(runner: &CommandRunner<'_>, dir: &str) -> Result<(), DeployerError> {
    let transcript = runner.transcript();

    // the pid file holds a process group leader; signal the whole group so
    // the node child of `npm start` goes down with it
    let stop_previous = shell::in_dir(
        dir,
        &format!(
            "if [ -f {pid} ]; then kill -- -\"$(cat {pid})\" 2>/dev/null || kill \"$(cat {pid})\" 2>/dev/null || true; rm -f {pid}; fi",
            pid = PID_FILE
        ),
    );
    if let Err(e) = runner.run(&stop_previous).await {
        transcript.warn(format!("Could not stop the previous background process: {}", e));
    }

    // braces keep `echo $!` in the app directory instead of backgrounding the cd;
    // setsid makes npm the leader of a fresh process group
    let start = shell::in_dir(
        dir,
        &format!(
            "{{ setsid nohup npm start > {log} 2>&1 < /dev/null & echo $! > {pid}; }}",
            log = DETACHED_LOG,
            pid = PID_FILE
        ),
    );
    runner.run(&start).await?;
    transcript.info(format!(
        "Application started as a background process, output in {}/{}",
        dir, DETACHED_LOG
    ));
    Ok(())
}

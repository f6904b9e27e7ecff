//! Project build step

use crate::deploy::chain::StrategyChain;
use crate::deploy::runner::CommandRunner;
use crate::deploy::shell::{self, quote};
use crate::errors::DeployerError;

/// Result of the build step; never aborts a deployment on its own
#[derive(Debug)]
pub enum BuildOutcome {
    /// Built with the named invocation
    Built(String),
    /// The project declares no build script
    Skipped,
    /// Every invocation failed
    Failed(DeployerError),
}

/// Build the project in `dir`, falling back to direct compiler invocations
pub async fn build_project(runner: &CommandRunner<'_>, dir: &str) -> BuildOutcome {
    let has_build_script = format!(
        r#"grep -q '"build"[[:space:]]*:' {}"#,
        quote(&format!("{}/package.json", dir))
    );
    if !runner.probe(&has_build_script).await {
        runner
            .transcript()
            .info("Build skipped: package.json declares no build script");
        return BuildOutcome::Skipped;
    }

    let npm_build = shell::in_dir(dir, "npm run build");
    let npx_tsc = shell::in_dir(dir, "npx --no-install tsc");
    let local_tsc = shell::in_dir(dir, "./node_modules/.bin/tsc");

    let chain = StrategyChain::new("Build")
        .strategy("npm run build", move || async move {
            runner.run(&npm_build).await.map(|_| ())
        })
        .strategy("npx tsc", move || async move {
            runner.run(&npx_tsc).await.map(|_| ())
        })
        .strategy("node_modules/.bin/tsc", move || async move {
            runner.run(&local_tsc).await.map(|_| ())
        });

    match chain.run(runner.transcript()).await {
        Ok(success) => BuildOutcome::Built(success.strategy),
        Err(exhausted) => BuildOutcome::Failed(exhausted.into_error(DeployerError::Build)),
    }
}

//! Node.js runtime provisioning

use tracing::info;

use crate::deploy::chain::StrategyChain;
use crate::deploy::runner::CommandRunner;
use crate::deploy::shell;
use crate::errors::DeployerError;

/// Version probe: both the runtime and its package manager must answer
pub const RUNTIME_PROBE: &str = "node -v && npm -v";

/// Loads a user-space nvm installation into the current shell
pub const NVM_PRELUDE: &str =
    r#"export NVM_DIR="$HOME/.nvm"; [ -s "$NVM_DIR/nvm.sh" ] && . "$NVM_DIR/nvm.sh";"#;

const NVM_INSTALLER: &str = "https://raw.githubusercontent.com/nvm-sh/nvm/v0.39.7/install.sh";

/// A callable runtime on the remote host
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Runtime {
    /// Install strategy used, `None` when the runtime was already present
    pub installed_with: Option<String>,

    /// Shell prelude later project commands need to find the runtime
    pub prelude: Option<String>,
}

/// Make sure `node` and `npm` are callable, installing them if necessary
pub async fn ensure_runtime(
    runner: &CommandRunner<'_>,
    node_major: u32,
) -> Result<Runtime, DeployerError> {
    let transcript = runner.transcript();

    if let Some(versions) = runner.probe_output(RUNTIME_PROBE).await {
        transcript.info(format!("Node.js runtime present: {}", one_line(&versions)));
        return Ok(Runtime::default());
    }

    let nvm_runner = runner.with_prelude(Some(NVM_PRELUDE.to_string()));
    if let Some(versions) = nvm_runner.probe_output(RUNTIME_PROBE).await {
        transcript.info(format!(
            "Node.js runtime present through nvm: {}",
            one_line(&versions)
        ));
        return Ok(Runtime {
            installed_with: None,
            prelude: Some(NVM_PRELUDE.to_string()),
        });
    }

    info!("Node.js not found, installing major version {}", node_major);
    transcript.info(format!(
        "Node.js runtime not found, installing version {}.x",
        node_major
    ));

    let nodesource = nodesource_install(node_major);
    let snap = shell::privileged(&format!(
        "$SUDO snap install node --classic --channel={}",
        node_major
    ));
    let native = shell::package_install("nodejs npm");
    let nvm = format!(
        "curl -fsSL {url} | bash && {prelude} nvm install {major} && nvm alias default {major}",
        url = NVM_INSTALLER,
        prelude = NVM_PRELUDE,
        major = node_major
    );

    let chain = StrategyChain::new("Runtime installation")
        .strategy("NodeSource repository", move || {
            install_then_probe(runner, nodesource, None)
        })
        .strategy("snap", move || install_then_probe(runner, snap, None))
        .strategy("native package manager", move || {
            install_then_probe(runner, native, None)
        })
        .strategy("nvm", move || {
            install_then_probe(runner, nvm, Some(NVM_PRELUDE.to_string()))
        });

    let success = chain
        .run(transcript)
        .await
        .map_err(|exhausted| exhausted.into_error(DeployerError::Provisioning))?;

    Ok(Runtime {
        installed_with: Some(success.strategy),
        prelude: success.value,
    })
}

fn nodesource_install(node_major: u32) -> String {
    shell::privileged(&format!(
        "if command -v apt-get >/dev/null 2>&1; then \
curl -fsSL https://deb.nodesource.com/setup_{major}.x | $SUDO bash - && $SUDO apt-get install -y nodejs; \
elif command -v yum >/dev/null 2>&1; then \
curl -fsSL https://rpm.nodesource.com/setup_{major}.x | $SUDO bash - && $SUDO yum install -y nodejs; \
else echo 'NodeSource supports apt and yum hosts only' >&2; exit 1; fi",
        major = node_major
    ))
}

/// An install only counts once the runtime actually answers
async fn install_then_probe(
    runner: &CommandRunner<'_>,
    install: String,
    prelude: Option<String>,
) -> Result<Option<String>, DeployerError> {
    runner.run(&install).await?;

    let check = runner.with_prelude(prelude.clone());
    match check.probe_output(RUNTIME_PROBE).await {
        Some(versions) => {
            runner
                .transcript()
                .info(format!("Node.js now available: {}", one_line(&versions)));
            Ok(prelude)
        }
        None => Err(DeployerError::Provisioning(
            "install finished but node/npm are still not callable".to_string(),
        )),
    }
}

fn one_line(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

//! Uploaded archive acquisition

use tracing::info;

use crate::deploy::chain::StrategyChain;
use crate::deploy::runner::CommandRunner;
use crate::deploy::shell::{self, quote};
use crate::deploy::transfer::{self, Encoding};
use crate::errors::DeployerError;
use crate::utils::{generate_uuid, sha256_hash};

/// Directories whose files must be executable after extraction
const EXECUTABLE_DIRS: &[&str] = &["node_modules/.bin", "node_modules/typescript/bin"];

/// Upload an archive and extract it into `target_dir`.
///
/// Extraction happens in a fresh staging directory, so a wrapper directory
/// is detected the same way on a first deployment and on a redeployment over
/// an existing release. Returns the name of the extraction tool that worked.
pub async fn deploy_archive(
    runner: &CommandRunner<'_>,
    file_name: &str,
    bytes: &[u8],
    target_dir: &str,
) -> Result<String, DeployerError> {
    let transcript = runner.transcript();
    let run_id = generate_uuid();
    let remote_archive = format!("/tmp/deploy-{}-{}", run_id, sanitize_file_name(file_name));
    let staging_dir = format!("/tmp/deploy-{}-src", run_id);

    info!("Uploading archive {} to {}", file_name, remote_archive);
    transcript.info(format!(
        "Uploading archive {} ({} bytes, sha256 {}) to {}",
        file_name,
        bytes.len(),
        sha256_hash(bytes),
        remote_archive
    ));
    let mechanism =
        transfer::upload_with_fallback(runner, bytes, &remote_archive, Encoding::Base64).await?;
    transcript.info(format!("Archive uploaded via {}", mechanism));

    let installed = async {
        runner.run(&format!("mkdir -p {}", quote(&staging_dir))).await?;
        let tool = extract(runner, file_name, &remote_archive, &staging_dir).await?;
        promote_staging(runner, &staging_dir, target_dir).await?;
        Ok::<_, DeployerError>(tool)
    }
    .await;

    let cleanup = format!("rm -rf {} {}", quote(&staging_dir), quote(&remote_archive));
    if let Err(e) = runner.run(&cleanup).await {
        transcript.warn(format!("Could not remove temporary archive files: {}", e));
    }

    let tool = installed?;
    repair_permissions(runner, target_dir).await;
    Ok(tool)
}

async fn extract(
    runner: &CommandRunner<'_>,
    file_name: &str,
    archive: &str,
    target_dir: &str,
) -> Result<String, DeployerError> {
    let archive_q = quote(archive);
    let dir_q = quote(target_dir);

    let unzip = format!("unzip -o -q {} -d {}", archive_q, dir_q);
    let python = format!(
        "python3 -c 'import sys, zipfile; zipfile.ZipFile(sys.argv[1]).extractall(sys.argv[2])' {} {}",
        archive_q, dir_q
    );
    let install_unzip = format!("{} && {}", shell::package_install("unzip"), unzip);
    let seven_zip = format!("7z x -y -o{} {}", dir_q, archive_q);

    let chain = StrategyChain::new(format!("Extraction of {}", file_name))
        .strategy("unzip", move || async move {
            runner.run(&unzip).await.map(|_| ())
        })
        .strategy("python3 zipfile", move || async move {
            runner.run(&python).await.map(|_| ())
        })
        .strategy("package-manager unzip", move || async move {
            runner.run(&install_unzip).await.map(|_| ())
        })
        .strategy("7z", move || async move {
            runner.run(&seven_zip).await.map(|_| ())
        });

    chain
        .run(runner.transcript())
        .await
        .map(|success| success.strategy)
        .map_err(|exhausted| exhausted.into_error(DeployerError::Extraction))
}

/// Copy an extracted release from `staging_dir` over `target_dir`.
///
/// When the archive wraps everything in one top-level directory
/// (`shop-main/package.json`), the contents of that directory are what gets
/// copied. Files the release does not ship (`.env`, `node_modules`) stay.
pub async fn promote_staging(
    runner: &CommandRunner<'_>,
    staging_dir: &str,
    target_dir: &str,
) -> Result<(), DeployerError> {
    let entries = runner.run(&format!("ls -A {}", quote(staging_dir))).await?;
    let entries: Vec<&str> = entries.lines().filter(|e| !e.is_empty()).collect();

    let mut release_root = staging_dir.to_string();
    if let [only] = entries.as_slice() {
        let candidate = format!("{}/{}", staging_dir, only);
        if runner.probe(&format!("test -d {}", quote(&candidate))).await {
            runner
                .transcript()
                .info(format!("Archive wraps everything in {}/, flattening", only));
            release_root = candidate;
        }
    }

    runner
        .run(&format!(
            "mkdir -p {} && cp -a {} {}",
            quote(target_dir),
            quote(&format!("{}/.", release_root)),
            quote(&format!("{}/", target_dir))
        ))
        .await
        .map_err(|e| {
            DeployerError::Extraction(format!("Could not copy release into {}: {}", target_dir, e))
        })?;
    Ok(())
}

/// Best-effort: restore executable bits lost by extractors that ignore them
async fn repair_permissions(runner: &CommandRunner<'_>, target_dir: &str) {
    let transcript = runner.transcript();

    for dir in EXECUTABLE_DIRS {
        let command = shell::in_dir(
            target_dir,
            &format!(
                "if [ -d {dir} ]; then chmod +x {dir}/*; fi",
                dir = dir
            ),
        );
        if let Err(e) = runner.run(&command).await {
            transcript.warn(format!("Could not mark {} executable: {}", dir, e));
        }
    }

    let scripts = format!(
        "find {} -maxdepth 1 -type f -name '*.sh' -exec chmod +x {{}} +",
        quote(target_dir)
    );
    if let Err(e) = runner.run(&scripts).await {
        transcript.warn(format!("Could not mark shell scripts executable: {}", e));
    }
}

fn sanitize_file_name(name: &str) -> String {
    let cleaned: String = name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(name)
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();

    if cleaned.trim_matches('.').is_empty() {
        "archive.zip".to_string()
    } else {
        cleaned
    }
}

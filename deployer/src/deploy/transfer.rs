//! File transfer with fallback encodings

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};

use crate::deploy::chain::StrategyChain;
use crate::deploy::runner::CommandRunner;
use crate::deploy::shell::{self, quote};
use crate::errors::DeployerError;
use crate::utils::generate_uuid;

/// Base64 characters shipped per shell command
const BASE64_CHUNK_LEN: usize = 64 * 1024;

/// How the shell-level fallbacks carry the payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    /// UTF-8 text such as an environment file
    Text,
    /// Arbitrary bytes such as an archive
    Base64,
}

/// Write `content` to `remote_path` over the session's direct stream
pub async fn upload(
    runner: &CommandRunner<'_>,
    content: &[u8],
    remote_path: &str,
) -> Result<(), DeployerError> {
    runner
        .transport()
        .write_file(remote_path, content, runner.timeout())
        .await
}

/// Write `content` to `remote_path`, falling back through shell-level
/// encodings when the direct stream is blocked. Returns the mechanism used.
pub async fn upload_with_fallback(
    runner: &CommandRunner<'_>,
    content: &[u8],
    remote_path: &str,
    encoding: Encoding,
) -> Result<String, DeployerError> {
    let chain = StrategyChain::new(format!("Transfer of {}", remote_path))
        .strategy("direct stream", move || upload(runner, content, remote_path))
        .strategy("shell base64 decode", move || {
            upload_base64_chunks(runner, content, remote_path)
        })
        .strategy("temporary file and rename", move || {
            upload_via_temp(runner, content, remote_path)
        })
        .strategy("shell printf", move || {
            upload_printf(runner, content, remote_path, encoding)
        });

    chain
        .run(runner.transcript())
        .await
        .map(|success| success.strategy)
        .map_err(|exhausted| exhausted.into_error(DeployerError::Transfer))
}

async fn upload_base64_chunks(
    runner: &CommandRunner<'_>,
    content: &[u8],
    remote_path: &str,
) -> Result<(), DeployerError> {
    let encoded = BASE64.encode(content);
    let staging = format!("{}.b64", remote_path);
    let chunks: Vec<&str> = if encoded.is_empty() {
        vec![""]
    } else {
        encoded
            .as_bytes()
            .chunks(BASE64_CHUNK_LEN)
            .filter_map(|chunk| std::str::from_utf8(chunk).ok())
            .collect()
    };
    let total = chunks.len();

    for (index, chunk) in chunks.into_iter().enumerate() {
        let redirect = if index == 0 { ">" } else { ">>" };
        let command = format!("printf '%s' '{}' {} {}", chunk, redirect, quote(&staging));
        let label = format!(
            "write base64 chunk {}/{} to {}",
            index + 1,
            total,
            staging
        );
        runner.run_labeled(&command, &label).await?;
    }

    runner
        .run(&format!(
            "base64 -d {staging} > {target} && rm -f {staging}",
            staging = quote(&staging),
            target = quote(remote_path)
        ))
        .await?;
    Ok(())
}

async fn upload_via_temp(
    runner: &CommandRunner<'_>,
    content: &[u8],
    remote_path: &str,
) -> Result<(), DeployerError> {
    let temp_path = format!("/tmp/.deployer-upload-{}", generate_uuid());
    upload(runner, content, &temp_path).await?;
    runner
        .run(&format!(
            "mkdir -p {dir} && mv -f {temp} {target}",
            dir = quote(shell::parent_dir(remote_path)),
            temp = quote(&temp_path),
            target = quote(remote_path)
        ))
        .await?;
    Ok(())
}

/// Single-command write. `printf '%s'` keeps backslashes and adds no newline.
async fn upload_printf(
    runner: &CommandRunner<'_>,
    content: &[u8],
    remote_path: &str,
    encoding: Encoding,
) -> Result<(), DeployerError> {
    let command = match encoding {
        Encoding::Text => format!(
            "printf '%s' {} > {}",
            quote(&String::from_utf8_lossy(content)),
            quote(remote_path)
        ),
        Encoding::Base64 => format!(
            "printf '%s' '{}' | base64 -d > {}",
            BASE64.encode(content),
            quote(remote_path)
        ),
    };
    runner
        .run_labeled(&command, &format!("write payload into {}", remote_path))
        .await?;
    Ok(())
}

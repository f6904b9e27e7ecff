//! Uploaded archive staging tests

use std::fs;
use std::path::Path;
use std::time::Duration;

use deployer::deploy::archive::{deploy_archive, promote_staging};
use deployer::deploy::runner::CommandRunner;
use deployer::deploy::transcript::Transcript;

use crate::support::{scratch_dir, FakeHost, LocalShell, Reply, TARGET};

const TIMEOUT: Duration = Duration::from_secs(30);

fn stage_release(root: &Path, version: &str) -> String {
    let staging = root.join(format!("staging-{}", version));
    let wrapper = staging.join("shop-main");
    fs::create_dir_all(wrapper.join("src")).unwrap();
    fs::write(
        wrapper.join("package.json"),
        format!(r#"{{"name":"shop","version":"{}"}}"#, version),
    )
    .unwrap();
    fs::write(wrapper.join("src/index.js"), format!("// {}", version)).unwrap();
    staging.to_string_lossy().into_owned()
}

#[cfg(unix)]
#[tokio::test]
async fn test_redeploying_wrapped_archive_replaces_release() {
    let root = scratch_dir("archive");
    let target = root.join("app");
    let target_str = target.to_string_lossy().into_owned();
    let transcript = Transcript::new();
    let runner = CommandRunner::new(&LocalShell, &transcript, TIMEOUT);

    promote_staging(&runner, &stage_release(&root, "1.0.0"), &target_str)
        .await
        .unwrap();
    assert!(fs::read_to_string(target.join("package.json")).unwrap().contains("1.0.0"));
    fs::write(target.join(".env"), "PORT=8080").unwrap();

    promote_staging(&runner, &stage_release(&root, "2.0.0"), &target_str)
        .await
        .unwrap();

    let package = fs::read_to_string(target.join("package.json")).unwrap();
    assert!(package.contains("2.0.0"), "{}", package);
    assert_eq!(fs::read_to_string(target.join("src/index.js")).unwrap(), "// 2.0.0");
    assert_eq!(fs::read_to_string(target.join(".env")).unwrap(), "PORT=8080");
    assert!(!target.join("shop-main").exists());

    let flattened = transcript
        .entries()
        .iter()
        .filter(|e| e.contains("Archive wraps everything in shop-main/"))
        .count();
    assert_eq!(flattened, 2);

    let _ = fs::remove_dir_all(&root);
}

#[cfg(unix)]
#[tokio::test]
async fn test_unwrapped_archive_is_copied_as_is() {
    let root = scratch_dir("archive");
    let staging = root.join("staging");
    fs::create_dir_all(&staging).unwrap();
    fs::write(staging.join("package.json"), r#"{"name":"shop"}"#).unwrap();
    fs::write(staging.join(".npmrc"), "fund=false").unwrap();
    let target = root.join("app");
    let transcript = Transcript::new();
    let runner = CommandRunner::new(&LocalShell, &transcript, TIMEOUT);

    promote_staging(
        &runner,
        &staging.to_string_lossy(),
        &target.to_string_lossy(),
    )
    .await
    .unwrap();

    assert!(target.join("package.json").exists());
    assert!(target.join(".npmrc").exists());
    assert!(!transcript.entries().iter().any(|e| e.contains("flattening")));

    let _ = fs::remove_dir_all(&root);
}

#[tokio::test]
async fn test_archive_is_extracted_into_fresh_staging() {
    let host = FakeHost::new().on("ls -A", Reply::Stdout("shop-main\n".to_string()));
    let transcript = Transcript::new();
    let runner = CommandRunner::new(&host, &transcript, TIMEOUT);

    let tool = deploy_archive(&runner, "shop-main.zip", b"PK\x03\x04", TARGET)
        .await
        .unwrap();
    assert_eq!(tool, "unzip");

    let commands = host.commands();
    let unzip = commands.iter().position(|c| c.starts_with("unzip -o")).unwrap();
    let staging = commands[unzip]
        .split(" -d ")
        .nth(1)
        .unwrap()
        .trim_matches('\'')
        .to_string();
    assert!(staging.starts_with("/tmp/deploy-") && staging.ends_with("-src"));

    let copy = commands
        .iter()
        .position(|c| c == &format!("mkdir -p '{t}' && cp -a '{s}/shop-main/.' '{t}/'", s = staging, t = TARGET))
        .unwrap();
    let cleanup = commands
        .iter()
        .position(|c| c.starts_with(&format!("rm -rf '{}' '/tmp/deploy-", staging)))
        .unwrap();
    assert!(unzip < copy && copy < cleanup);
    assert!(!commands.iter().any(|c| c.contains(&format!("-d '{}'", TARGET))));
}

#[tokio::test]
async fn test_failed_copy_is_fatal_and_cleans_up() {
    let host = FakeHost::new().fail("cp -a", "cp: cannot create directory: Permission denied");
    let transcript = Transcript::new();
    let runner = CommandRunner::new(&host, &transcript, TIMEOUT);

    let err = deploy_archive(&runner, "app.zip", b"PK\x03\x04", TARGET)
        .await
        .unwrap_err();

    assert_eq!(err.kind(), "ExtractionError");
    assert!(err.to_string().contains("Permission denied"));
    assert!(host.ran("rm -rf '/tmp/deploy-"));
}

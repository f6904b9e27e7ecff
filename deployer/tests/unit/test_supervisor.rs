//! Process supervisor adapter tests

use std::time::Duration;

use deployer::deploy::runner::CommandRunner;
use deployer::deploy::supervisor::{find_instance, launch, LaunchMode};
use deployer::deploy::transcript::Transcript;
use deployer::errors::DeployerError;

use crate::support::{self, git_config, position, FakeHost, Reply};

const TIMEOUT: Duration = Duration::from_secs(60);

#[tokio::test]
async fn test_first_deployment_is_not_an_error() {
    let host = FakeHost::new()
        .fail("pm2 describe", "[PM2][WARN] shop doesn't exist");
    let transcript = Transcript::new();
    let runner = CommandRunner::new(&host, &transcript, TIMEOUT);

    assert!(!find_instance(&runner, "shop").await.unwrap());

    let mode = launch(&runner, "/var/www/shop", "shop", true).await.unwrap();
    assert_eq!(mode, LaunchMode::Supervised);
    assert!(!host.ran("pm2 stop"));
    assert!(!host.ran("pm2 delete"));
    assert!(host.ran("pm2 save"));
}

#[tokio::test]
async fn test_existing_instance_is_replaced() {
    let host = FakeHost::new().on(
        "pm2 describe",
        Reply::Stdout("status │ online".to_string()),
    );
    let transcript = Transcript::new();
    let runner = CommandRunner::new(&host, &transcript, TIMEOUT);

    launch(&runner, "/var/www/shop", "shop", true).await.unwrap();

    let commands = host.commands();
    let stop = commands.iter().position(|c| c == "pm2 stop 'shop'").unwrap();
    let delete = commands.iter().position(|c| c == "pm2 delete 'shop'").unwrap();
    let start = commands.iter().position(|c| c.contains("pm2 start npm")).unwrap();
    assert!(stop < delete && delete < start);
}

#[tokio::test]
async fn test_broken_supervisor_is_reported() {
    let host = FakeHost::new()
        .fail("pm2 describe", "connect ECONNREFUSED")
        .fail("pm2 ping", "connect ECONNREFUSED");
    let transcript = Transcript::new();
    let runner = CommandRunner::new(&host, &transcript, TIMEOUT);

    let err = find_instance(&runner, "shop").await.unwrap_err();
    assert!(matches!(err, DeployerError::SupervisorUnavailable(_)));
    assert_eq!(err.kind(), "SupervisorError");
}

#[tokio::test]
async fn test_broken_supervisor_fails_the_run() {
    let host = FakeHost::new()
        .fail("pm2 describe", "connect ECONNREFUSED")
        .fail("pm2 ping", "connect ECONNREFUSED");

    let result = support::deployer(&host).deploy(&git_config(None)).await;

    assert!(!result.success);
    assert!(result.error.as_deref().unwrap().starts_with("SupervisorError"));
    assert!(!host.ran("pm2 start"));
}

#[tokio::test]
async fn test_failed_pm2_install_falls_back_to_detached() {
    let host = FakeHost::new()
        .fail("pm2 -v", "pm2: command not found")
        .fail("npm install -g pm2", "EACCES: permission denied");

    let result = support::deployer(&host).deploy(&git_config(None)).await;

    assert!(result.success, "{}", result.message);
    assert!(result.message.contains("detached process"));
    assert!(host.ran("nohup npm start > app.log 2>&1"));
    assert!(!host.ran("pm2 start"));
    assert!(position(&result.logs, "WARNING: pm2 installation failed").is_some());
}

#[tokio::test]
async fn test_supervision_not_requested() {
    let host = FakeHost::new();
    let transcript = Transcript::new();
    let runner = CommandRunner::new(&host, &transcript, TIMEOUT);

    let mode = launch(&runner, "/var/www/shop", "shop", false).await.unwrap();

    assert_eq!(mode, LaunchMode::Detached);
    assert!(!host.ran("pm2"));
    assert!(host.ran("echo $! > .deployer.pid"));
}

#[tokio::test]
async fn test_detached_relaunch_stops_whole_process_group() {
    let host = FakeHost::new();
    let transcript = Transcript::new();
    let runner = CommandRunner::new(&host, &transcript, TIMEOUT);

    launch(&runner, "/var/www/shop", "shop", false).await.unwrap();

    let commands = host.commands();
    let stop = commands
        .iter()
        .position(|c| c.contains("kill -- -\"$(cat .deployer.pid)\""))
        .unwrap();
    let start = commands
        .iter()
        .position(|c| c.contains("setsid nohup npm start > app.log 2>&1"))
        .unwrap();
    assert!(stop < start);
    assert!(commands[start].starts_with("cd '/var/www/shop' && {"));
}

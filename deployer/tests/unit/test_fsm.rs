//! FSM unit tests

use deployer::deploy::fsm::{classify, DeploymentFsm, DeploymentState, Stage, StageKind, StageOutcome};
use deployer::errors::DeployerError;

#[test]
fn test_fsm_initial_state() {
    let fsm = DeploymentFsm::new();
    assert_eq!(fsm.state(), DeploymentState::Pending);
    assert!(fsm.error().is_none());
    assert!(fsm.history().is_empty());
}

#[test]
fn test_fsm_full_success_flow() {
    let mut fsm = DeploymentFsm::new();

    for stage in Stage::all().filter(|s| !s.is_post_terminal()) {
        fsm.enter(stage).unwrap();
        assert_eq!(fsm.state(), DeploymentState::InStage(stage));
    }
    assert_eq!(fsm.finish(), DeploymentState::Succeeded);

    fsm.enter(Stage::PersistAgentRecord).unwrap();
    assert_eq!(fsm.history().len(), 10);
}

#[test]
fn test_fsm_optional_stages_can_be_skipped() {
    let mut fsm = DeploymentFsm::new();

    fsm.enter(Stage::Connect).unwrap();
    fsm.enter(Stage::AcquireCode).unwrap();
    fsm.enter(Stage::ProvisionRuntime).unwrap();
    fsm.enter(Stage::Launch).unwrap();
    fsm.enter(Stage::Disconnect).unwrap();

    assert_eq!(
        fsm.history(),
        &[
            Stage::Connect,
            Stage::AcquireCode,
            Stage::ProvisionRuntime,
            Stage::Launch,
            Stage::Disconnect
        ]
    );
}

#[test]
fn test_fsm_rejects_backward_transitions() {
    let mut fsm = DeploymentFsm::new();

    fsm.enter(Stage::Connect).unwrap();
    fsm.enter(Stage::InstallDependencies).unwrap();

    let err = fsm.enter(Stage::ProvisionRuntime).unwrap_err();
    assert!(matches!(err, DeployerError::Internal(_)));
    assert_eq!(fsm.state(), DeploymentState::InStage(Stage::InstallDependencies));
}

#[test]
fn test_fsm_connect_failure_flow() {
    let mut fsm = DeploymentFsm::new();
    fsm.enter(Stage::Connect).unwrap();

    let err = DeployerError::Connection("handshake timed out".to_string());
    assert_eq!(fsm.record_failure(Stage::Connect, &err), StageOutcome::Fatal);

    // Disconnect still runs on the failure path
    fsm.enter(Stage::Disconnect).unwrap();
    assert_eq!(fsm.finish(), DeploymentState::Failed);
    assert_eq!(fsm.error(), Some("Connection error: handshake timed out"));
    assert_eq!(fsm.failed_stage(), Some(Stage::Connect));
}

#[test]
fn test_fsm_keeps_first_fatal_error() {
    let mut fsm = DeploymentFsm::new();
    fsm.enter(Stage::Connect).unwrap();
    fsm.enter(Stage::AcquireCode).unwrap();

    fsm.record_failure(Stage::AcquireCode, &DeployerError::Extraction("no tools".to_string()));
    fsm.record_failure(Stage::Launch, &DeployerError::Internal("later".to_string()));

    assert_eq!(fsm.failed_stage(), Some(Stage::AcquireCode));
    assert_eq!(fsm.error(), Some("Extraction error: no tools"));
}

#[test]
fn test_stage_table() {
    let mandatory: Vec<Stage> = Stage::all()
        .filter(|s| s.kind() == StageKind::Mandatory)
        .collect();
    assert_eq!(
        mandatory,
        vec![
            Stage::Connect,
            Stage::PrepareTarget,
            Stage::AcquireCode,
            Stage::UploadEnvironment,
            Stage::ProvisionRuntime,
            Stage::InstallDependencies,
            Stage::Launch,
        ]
    );
    assert_eq!(classify(Stage::Build), StageOutcome::Recoverable);
    assert_eq!(classify(Stage::Disconnect), StageOutcome::Recoverable);
}

use std::sync::Arc;

use swgpio::{
    AppConfig, AppError, ClaimState, Direction, Edge, GpioManager, MockBackend, PinMode,
};

fn manager() -> (Arc<MockBackend>, GpioManager<MockBackend>) {
    let config = Arc::new(AppConfig::default());
    let backend = Arc::new(MockBackend::default());
    let manager = GpioManager::new(config, backend.clone());
    (backend, manager)
}

#[actix_rt::test]
async fn setup_write_read_round_trip() {
    let (_backend, manager) = manager();

    manager.setup(16, Direction::Out, Edge::None).await.unwrap();
    manager.write_value(16, true).await.unwrap();
    assert!(manager.read_value(16).await.unwrap());

    manager.write_value(16, false).await.unwrap();
    assert!(!manager.read_value(16).await.unwrap());
}

#[actix_rt::test]
async fn unmapped_channel_claims_nothing() {
    let (backend, manager) = manager();

    let err = manager.setup(99, Direction::Out, Edge::None).await.unwrap_err();
    assert!(matches!(err, AppError::UnmappedChannel(99)));

    let ops = backend.operations();
    assert!(!ops.iter().any(|op| op.starts_with("export")));
}

#[actix_rt::test]
async fn write_before_setup_is_not_exported() {
    let (_backend, manager) = manager();

    let err = manager.write_value(18, true).await.unwrap_err();
    assert!(matches!(err, AppError::NotExported(18)));
}

#[actix_rt::test]
async fn read_before_setup_is_not_exported() {
    let (_backend, manager) = manager();

    let err = manager.read_value(18).await.unwrap_err();
    assert!(matches!(err, AppError::NotExported(18)));
}

#[actix_rt::test]
async fn read_back_is_allowed_on_outputs_only_write_is_gated() {
    let (_backend, manager) = manager();

    manager.setup(16, Direction::Out, Edge::None).await.unwrap();
    assert!(!manager.read_value(16).await.unwrap());

    manager.setup(12, Direction::In, Edge::Both).await.unwrap();
    let err = manager.write_value(12, true).await.unwrap_err();
    assert!(matches!(err, AppError::NotExported(12)));
}

#[actix_rt::test]
async fn resetup_unexports_then_reexports() {
    let (backend, manager) = manager();

    manager.setup(26, Direction::Out, Edge::None).await.unwrap();
    backend.clear_operations();

    manager.setup(26, Direction::Out, Edge::None).await.unwrap();

    let ops = backend.operations();
    let exists = ops.iter().position(|op| op == "exists PA21").unwrap();
    let unexport = ops.iter().position(|op| op == "unexport PA21").unwrap();
    let export = ops.iter().position(|op| op == "export PA21").unwrap();
    assert!(exists < unexport && unexport < export);

    let desc = manager.channel_descriptor(26).await.unwrap();
    assert_eq!(desc.claimed, ClaimState::Output);
    assert!(desc.listening);
}

#[actix_rt::test]
async fn resetup_replaces_the_interrupt_registration() {
    let (backend, manager) = manager();

    manager.setup(26, Direction::Out, Edge::None).await.unwrap();
    manager.setup(26, Direction::In, Edge::Both).await.unwrap();

    let ops = backend.operations();
    assert_eq!(ops.iter().filter(|op| *op == "watch PA21").count(), 2);
    assert_eq!(ops.iter().filter(|op| *op == "unwatch PA21").count(), 1);

    let desc = manager.channel_descriptor(26).await.unwrap();
    assert_eq!(desc.claimed, ClaimState::Input);
    assert!(desc.listening);
}

#[actix_rt::test]
async fn resetup_overwrites_a_stale_claim() {
    let (_backend, manager) = manager();

    manager.setup(12, Direction::Out, Edge::None).await.unwrap();
    manager.setup(12, Direction::In, Edge::None).await.unwrap();

    let desc = manager.channel_descriptor(12).await.unwrap();
    assert_eq!(desc.claimed, ClaimState::Input);

    let err = manager.write_value(12, true).await.unwrap_err();
    assert!(matches!(err, AppError::NotExported(12)));
}

#[actix_rt::test]
async fn external_transition_emits_one_change_event() {
    let (backend, manager) = manager();

    manager.setup(12, Direction::In, Edge::Both).await.unwrap();
    let mut rx = manager.subscribe_events();

    backend.set_external_value("PD14", true);

    let event = rx.recv().await.unwrap();
    assert_eq!(event.channel, 12);
    assert!(event.value);
    assert!(rx.try_recv().is_err());
}

#[actix_rt::test]
async fn each_transition_is_delivered_independently() {
    let (backend, manager) = manager();

    manager.setup(12, Direction::In, Edge::Both).await.unwrap();
    let mut rx = manager.subscribe_events();

    backend.set_external_value("PD14", true);
    backend.set_external_value("PD14", false);
    backend.set_external_value("PD14", true);

    assert!(rx.recv().await.unwrap().value);
    assert!(!rx.recv().await.unwrap().value);
    assert!(rx.recv().await.unwrap().value);
}

#[actix_rt::test]
async fn destroy_releases_every_claim_and_registration() {
    let (backend, manager) = manager();

    manager.setup(16, Direction::Out, Edge::None).await.unwrap();
    manager.setup(12, Direction::In, Edge::Both).await.unwrap();

    manager.destroy().await.unwrap();

    for channel in [16, 12] {
        let desc = manager.channel_descriptor(channel).await.unwrap();
        assert_eq!(desc.claimed, ClaimState::None);
        assert!(!desc.listening);
    }

    let ops = backend.operations();
    assert!(ops.iter().any(|op| op == "unexport PC4"));
    assert!(ops.iter().any(|op| op == "unexport PD14"));
    assert!(ops.iter().any(|op| op == "unwatch PC4"));
    assert!(ops.iter().any(|op| op == "unwatch PD14"));

    // idempotent on an already-empty registry
    manager.destroy().await.unwrap();
}

#[actix_rt::test]
async fn destroy_keeps_event_subscribers_connected() {
    let (backend, manager) = manager();

    manager.setup(12, Direction::In, Edge::Both).await.unwrap();
    let mut rx = manager.subscribe_events();

    manager.destroy().await.unwrap();
    manager.setup(12, Direction::In, Edge::Both).await.unwrap();
    backend.set_external_value("PD14", true);

    assert_eq!(rx.recv().await.unwrap().channel, 12);
}

#[actix_rt::test]
async fn reset_clears_claims_cache_and_subscribers() {
    let (backend, manager) = manager();

    manager.setup(16, Direction::Out, Edge::None).await.unwrap();
    let mut rx = manager.subscribe_events();

    manager.reset();

    assert!(rx.recv().await.is_err());
    let err = manager.read_value(16).await.unwrap_err();
    assert!(matches!(err, AppError::NotExported(16)));

    // the pin table cache was dropped, so the next setup re-probes
    manager.setup(16, Direction::Out, Edge::None).await.unwrap();
    let probes = backend
        .operations()
        .iter()
        .filter(|op| *op == "board-info")
        .count();
    assert_eq!(probes, 2);
}

#[actix_rt::test]
async fn revision_is_probed_once_per_process() {
    let (backend, manager) = manager();

    manager.setup(16, Direction::Out, Edge::None).await.unwrap();
    manager.setup(12, Direction::In, Edge::None).await.unwrap();

    let probes = backend
        .operations()
        .iter()
        .filter(|op| *op == "board-info")
        .count();
    assert_eq!(probes, 1);
}

#[actix_rt::test]
async fn unreadable_revision_fails_setup_without_claiming() {
    let (backend, manager) = manager();
    backend.set_board_info("Processor\t: ARMv7 Processor rev 4 (v7l)\n");

    let err = manager.setup(16, Direction::Out, Edge::None).await.unwrap_err();
    assert!(matches!(err, AppError::RevisionUnreadable));
    assert!(!backend.operations().iter().any(|op| op.starts_with("export")));

    // a later probe against a readable source succeeds
    backend.set_board_info("Revision\t: 0000000000000a20\n");
    let err = manager.read_value(16).await.unwrap_err();
    assert!(matches!(err, AppError::NotExported(16)));
    manager.setup(16, Direction::Out, Edge::None).await.unwrap();
}

#[actix_rt::test]
async fn read_trims_whitespace_and_treats_empty_as_low() {
    let (backend, manager) = manager();

    manager.setup(12, Direction::In, Edge::None).await.unwrap();

    backend.set_raw_value("PD14", "1\n");
    assert!(manager.read_value(12).await.unwrap());

    backend.set_raw_value("PD14", "");
    assert!(!manager.read_value(12).await.unwrap());
}

#[test]
fn only_the_opi_mode_is_accepted() {
    let config = Arc::new(AppConfig::default());
    let backend = Arc::new(MockBackend::default());
    let manager = GpioManager::new(config, backend);

    manager.set_mode(PinMode::Opi).unwrap();
    let err = manager.set_mode(PinMode::Bcm).unwrap_err();
    assert!(matches!(err, AppError::InvalidMode(_)));
}

//! Creation path: uniqueness, resolution, key delivery profiles.

use rstest::rstest;

use crate::provider::NodeStatus;
use crate::test_support::GatewayCall;

use super::*;

#[tokio::test]
async fn create_provisions_and_reports_running() {
    let gateway = FakeGateway::new();
    let mut node = lifecycle(&gateway);

    node.create().await.expect("create should succeed");

    assert_eq!(node.state(), NodeState::Running);
    let handle = node.handle().expect("handle should be recorded");
    assert_eq!(handle.id, "i-fake");
    assert!(gateway.calls().iter().any(|call| matches!(
        call,
        GatewayCall::WaitUntilRunning { ids } if ids == &vec![String::from("i-fake")]
    )));
}

#[tokio::test]
async fn name_is_resolved_once_and_submitted_verbatim() {
    let gateway = FakeGateway::new();
    let mut node = lifecycle(&gateway);

    node.create().await.expect("create should succeed");

    let name = node.node_name().expect("name should be resolved").to_owned();
    assert!(name.starts_with("test-node-"));
    assert_eq!(gateway.created_name().as_deref(), Some(name.as_str()));
    // Repeated lookups keep returning the same name.
    assert_eq!(node.node_name(), Some(name.as_str()));
}

#[tokio::test]
async fn duplicate_name_is_rejected_before_any_create_call() {
    let gateway = FakeGateway::new();
    let mut node = lifecycle(&gateway);
    let name = node.resolve_name().expect("name should resolve");
    gateway.set_steady_listing(vec![instance("i-other", &name, NodeStatus::Running)]);

    let err = node.create().await.expect_err("create should collide");

    assert!(matches!(err, NodeError::DuplicateInstance { name: n } if n == name));
    assert_eq!(node.state(), NodeState::Error);
    assert!(gateway.created_name().is_none());
}

#[tokio::test]
async fn blank_name_prefix_is_a_configuration_error() {
    let gateway = FakeGateway::new();
    let mut spec = fixture_spec();
    spec.name_prefix = String::from("   ");
    let mut node = NodeLifecycle::new(gateway, spec, KeyDeliveryProfile::MetadataKeys);

    let err = node.create().await.expect_err("blank prefix should fail");

    assert!(matches!(err, NodeError::Configuration(_)));
}

#[test]
fn builder_rejects_missing_image_and_blank_fields() {
    let missing_image = NodeSpec::builder().build();
    assert_eq!(
        missing_image.expect_err("image is required"),
        NodeSpecError::Validation(String::from("image"))
    );

    let blank_user = NodeSpec::builder()
        .image(fixture_image())
        .user(" ")
        .build();
    assert_eq!(
        blank_user.expect_err("blank user should fail"),
        NodeSpecError::Validation(String::from("user"))
    );
}

#[tokio::test]
async fn create_is_only_valid_from_the_uncreated_state() {
    let gateway = FakeGateway::new();
    let mut node = running_lifecycle(&gateway).await;

    let err = node.create().await.expect_err("second create should fail");

    assert!(matches!(err, NodeError::Configuration(_)));
}

#[tokio::test]
async fn provider_create_failure_surfaces_verbatim_and_marks_error() {
    let gateway = FakeGateway::new();
    gateway.set_create_response(Err(crate::test_support::FakeGatewayError(String::from(
        "quota exceeded",
    ))));
    let mut node = lifecycle(&gateway);

    let err = node.create().await.expect_err("create should fail");

    assert!(matches!(err, NodeError::Provider(ref cause) if cause.0 == "quota exceeded"));
    assert_eq!(node.state(), NodeState::Error);
}

#[tokio::test]
async fn supplied_key_pair_is_never_regenerated() {
    let gateway = FakeGateway::new();
    let node = running_lifecycle(&gateway).await;

    let pair = node.spec().key_pair.as_ref().expect("pair should remain");
    assert!(!pair.is_generated());
    assert_eq!(pair.public_key, "ssh-rsa AAAAB3Nza fixture");
}

#[tokio::test]
async fn a_key_pair_is_generated_when_none_was_supplied() {
    let gateway = FakeGateway::new();
    let spec = NodeSpec::builder()
        .image(fixture_image())
        .size(fixture_size())
        .build()
        .expect("spec should build");
    let mut node = NodeLifecycle::new(gateway, spec, KeyDeliveryProfile::MetadataKeys);

    node.create().await.expect("create should succeed");

    let name = node.node_name().expect("name should resolve").to_owned();
    let pair = node.spec().key_pair.as_ref().expect("pair should exist");
    assert!(pair.is_generated());
    assert_eq!(pair.name, format!("key-pair-{name}"));
    assert!(pair.public_key.starts_with("ssh-rsa "));
}

#[tokio::test]
async fn metadata_profile_injects_the_public_key_for_the_user() {
    let gateway = FakeGateway::new();
    let _node = running_lifecycle(&gateway).await;

    let params = gateway.created_params().expect("params should be recorded");
    assert_eq!(
        params.metadata.get("ssh-keys").map(String::as_str),
        Some("centos:ssh-rsa AAAAB3Nza fixture")
    );
    assert!(params.key_pair_name.is_none());
}

#[tokio::test]
async fn imported_profile_registers_the_pair_and_defaults_volume_cleanup() {
    let gateway = FakeGateway::new();
    let mut node = NodeLifecycle::new(
        gateway.clone(),
        fixture_spec(),
        KeyDeliveryProfile::ImportedKeyPair,
    );

    node.create().await.expect("create should succeed");

    assert!(gateway.calls().iter().any(|call| matches!(
        call,
        GatewayCall::ImportKeyPair { name, public_key }
            if name == "fixture-key" && public_key == "ssh-rsa AAAAB3Nza fixture"
    )));
    let params = gateway.created_params().expect("params should be recorded");
    assert_eq!(params.key_pair_name.as_deref(), Some("fixture-key"));
    assert_eq!(params.delete_root_volume_on_termination, Some(true));
}

#[tokio::test]
async fn imported_profile_preserves_an_explicit_volume_setting() {
    let gateway = FakeGateway::new();
    let params = CreateParams {
        delete_root_volume_on_termination: Some(false),
        ..CreateParams::default()
    };
    let spec = NodeSpec::builder()
        .image(fixture_image())
        .size(fixture_size())
        .key_pair(supplied_key_pair())
        .params(params)
        .build()
        .expect("spec should build");
    let mut node = NodeLifecycle::new(gateway.clone(), spec, KeyDeliveryProfile::ImportedKeyPair);

    node.create().await.expect("create should succeed");

    let submitted = gateway.created_params().expect("params should be recorded");
    assert_eq!(submitted.delete_root_volume_on_termination, Some(false));
}

#[tokio::test]
async fn image_identifier_is_resolved_through_the_gateway_and_memoised() {
    let gateway = FakeGateway::new();
    gateway.insert_image("debian-12", fixture_image());
    let spec = NodeSpec::builder()
        .image_identifier("debian-12")
        .size(fixture_size())
        .key_pair(supplied_key_pair())
        .build()
        .expect("spec should build");
    let mut node = NodeLifecycle::new(gateway.clone(), spec, KeyDeliveryProfile::MetadataKeys);

    node.create().await.expect("create should succeed");

    assert_eq!(node.spec().image, ImageSource::Resolved(fixture_image()));
}

#[tokio::test]
async fn size_identifier_is_matched_against_the_catalog() {
    let gateway = FakeGateway::new();
    gateway.set_sizes(vec![fixture_size(), SizeRef {
        id: String::from("size-2"),
        name: String::from("large"),
    }]);
    let spec = NodeSpec::builder()
        .image(fixture_image())
        .size_identifier("size-2")
        .key_pair(supplied_key_pair())
        .build()
        .expect("spec should build");
    let mut node = NodeLifecycle::new(gateway.clone(), spec, KeyDeliveryProfile::MetadataKeys);

    node.create().await.expect("create should succeed");

    match &node.spec().size {
        SizeSource::Resolved(size) => assert_eq!(size.id, "size-2"),
        other => panic!("size should be resolved, got {other:?}"),
    }
}

#[tokio::test]
async fn unknown_size_identifier_is_a_configuration_error() {
    let gateway = FakeGateway::new();
    gateway.set_sizes(vec![fixture_size()]);
    let spec = NodeSpec::builder()
        .image(fixture_image())
        .size_identifier("size-missing")
        .key_pair(supplied_key_pair())
        .build()
        .expect("spec should build");
    let mut node = NodeLifecycle::new(gateway, spec, KeyDeliveryProfile::MetadataKeys);

    let err = node.create().await.expect_err("unknown size should fail");

    assert!(matches!(err, NodeError::Configuration(message) if message.contains("size-missing")));
}

#[tokio::test]
async fn default_size_takes_the_first_catalog_entry() {
    let gateway = FakeGateway::new();
    gateway.set_sizes(vec![fixture_size(), SizeRef {
        id: String::from("size-2"),
        name: String::from("large"),
    }]);
    let spec = NodeSpec::builder()
        .image(fixture_image())
        .key_pair(supplied_key_pair())
        .build()
        .expect("spec should build");
    let mut node = NodeLifecycle::new(gateway.clone(), spec, KeyDeliveryProfile::MetadataKeys);

    node.create().await.expect("create should succeed");

    match &node.spec().size {
        SizeSource::Resolved(size) => assert_eq!(size.id, "size-1"),
        other => panic!("size should be resolved, got {other:?}"),
    }
}

#[rstest]
#[case("metadata", KeyDeliveryProfile::MetadataKeys)]
#[case("metadata-keys", KeyDeliveryProfile::MetadataKeys)]
#[case("imported", KeyDeliveryProfile::ImportedKeyPair)]
#[case("Imported-Key-Pair", KeyDeliveryProfile::ImportedKeyPair)]
fn profiles_parse_from_their_config_spellings(
    #[case] input: &str,
    #[case] expected: KeyDeliveryProfile,
) {
    let parsed: KeyDeliveryProfile = input.parse().expect("profile should parse");
    assert_eq!(parsed, expected);
}

#[test]
fn unknown_profile_spelling_is_rejected() {
    let err = "carrier-pigeon"
        .parse::<KeyDeliveryProfile>()
        .expect_err("nonsense should not parse");
    assert!(err.contains("carrier-pigeon"));
}

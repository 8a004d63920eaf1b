//! Tests for key pair generation and supplied-key handling.

use super::KeyPair;

#[test]
fn generate_produces_openssh_rsa_line_with_user_comment() {
    let pair = KeyPair::generate("node-123", "centos").expect("generation should succeed");

    assert_eq!(pair.name, "key-pair-node-123");
    assert!(
        pair.public_key.starts_with("ssh-rsa "),
        "unexpected public line: {}",
        pair.public_key
    );
    assert!(
        pair.public_key.ends_with(" centos"),
        "public line should carry the user comment: {}",
        pair.public_key
    );
    assert!(
        pair.fingerprint.starts_with("SHA256:"),
        "unexpected fingerprint: {}",
        pair.fingerprint
    );
    assert!(
        pair.private_key.contains("OPENSSH PRIVATE KEY"),
        "private key should be OpenSSH PEM"
    );
    assert!(pair.is_generated());
}

#[test]
fn supplied_pairs_are_not_marked_generated() {
    let pair = KeyPair::supplied("deploy-key", "ssh-rsa abc admin", "SHA256:xyz", "pem");

    assert_eq!(pair.name, "deploy-key");
    assert_eq!(pair.public_key, "ssh-rsa abc admin");
    assert!(!pair.is_generated());
}

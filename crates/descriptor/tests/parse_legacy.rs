//! Parsing coverage for the legacy pipe-delimited `.upd_info` string.

use descriptor::{DescriptorError, UpdateDescriptor};

#[test]
fn direct_zsync_descriptor_round_trips() {
    let raw = "zsync|https://example.com/App-latest-x86_64.AppImage.zsync";
    let parsed = UpdateDescriptor::parse_legacy(raw).expect("valid descriptor");
    assert_eq!(
        parsed,
        UpdateDescriptor::Direct {
            url: "https://example.com/App-latest-x86_64.AppImage.zsync".to_string(),
        }
    );
    assert_eq!(parsed.to_string(), raw);
}

#[test]
fn gh_releases_descriptor_parses_five_fields() {
    let raw = "gh-releases-zsync|someuser|somerepo|latest|App-*x86_64.AppImage.zsync";
    let parsed = UpdateDescriptor::parse_legacy(raw).expect("valid descriptor");
    assert_eq!(
        parsed,
        UpdateDescriptor::ReleaseHosted {
            transport: "gh-releases-zsync".to_string(),
            username: "someuser".to_string(),
            repo: "somerepo".to_string(),
            tag_or_package: "latest".to_string(),
            filename: "App-*x86_64.AppImage.zsync".to_string(),
        }
    );
    assert!(parsed.direct_url().is_none());
}

#[test]
fn bintray_descriptor_parses_five_fields() {
    let raw = "bintray-zsync|someuser|somerepo|somepackage|App-latest.AppImage.zsync";
    let parsed = UpdateDescriptor::parse_legacy(raw).expect("valid descriptor");
    assert!(matches!(parsed, UpdateDescriptor::ReleaseHosted { .. }));
}

#[test]
fn empty_string_is_rejected() {
    assert!(matches!(
        UpdateDescriptor::parse_legacy(""),
        Err(DescriptorError::InvalidDelimiterCount(1))
    ));
}

#[test]
fn unknown_transport_is_rejected() {
    let err = UpdateDescriptor::parse_legacy("carrier-pigeon|https://example.com/x").unwrap_err();
    assert!(matches!(err, DescriptorError::UnsupportedTransport(t) if t == "carrier-pigeon"));
}

#[test]
fn wrong_field_count_is_rejected() {
    let err = UpdateDescriptor::parse_legacy("zsync|a|b|c").unwrap_err();
    assert!(matches!(err, DescriptorError::InvalidDelimiterCount(4)));
}

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

//! # Overview
//!
//! `descriptor` models the update descriptor the core consumes at the
//! boundary named by `spec` §6. Locating an AppImage on disk, extracting its
//! embedded `.upd_info` ELF section, and splitting that string on `|` are
//! explicitly out of scope (`spec` §1) and are the responsibility of a
//! collaborator; this crate only types the result of that work.
//!
//! The two shapes mirror the `antony-jr/AppImageBridge` update-information
//! JSON: a generic `zsync` descriptor carrying a direct URL, and a
//! release-hosting descriptor (`gh-releases-zsync`, `bintray-zsync`) that a
//! collaborator resolves into a URL before the core ever sees it.

use std::fmt;

/// An update descriptor, already parsed and validated by a collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateDescriptor {
    /// A direct zsync control-file URL.
    Direct {
        /// Absolute URL of the `.zsync` control file.
        url: String,
    },
    /// A release-hosting descriptor that must be resolved into a direct URL
    /// by a collaborator (querying a release API) before `Coordinator::run`
    /// is called with the resulting [`UpdateDescriptor::Direct`].
    ReleaseHosted {
        /// Name of the release-hosting transport, e.g. `"gh-releases-zsync"`
        /// or `"bintray-zsync"`.
        transport: String,
        /// Account or organization owning the repository.
        username: String,
        /// Repository name.
        repo: String,
        /// Release tag (`gh-releases-zsync`) or package name
        /// (`bintray-zsync`); the field name in the wire format differs by
        /// transport but both resolve to a release identifier.
        tag_or_package: String,
        /// Name of the control-file asset to look up within the release.
        filename: String,
    },
}

impl UpdateDescriptor {
    /// Parses the legacy pipe-delimited `.upd_info` string into a descriptor.
    ///
    /// This mirrors `antony-jr/AppImageBridge`'s
    /// `appimageupdateinformation_p.cc` split-on-`|` step, which the core
    /// does not perform itself (ELF extraction is out of scope) but which a
    /// collaborator may reuse this helper for once it has the raw string.
    pub fn parse_legacy(raw: &str) -> Result<Self, DescriptorError> {
        let parts: Vec<&str> = raw.split('|').collect();
        match parts.as_slice() {
            [] => Err(DescriptorError::Empty),
            [_] => Err(DescriptorError::InvalidDelimiterCount(parts.len())),
            [transport, url] => {
                if *transport == "zsync" {
                    Ok(Self::Direct {
                        url: (*url).to_string(),
                    })
                } else {
                    Err(DescriptorError::UnsupportedTransport((*transport).to_string()))
                }
            }
            [transport, username, repo, tag_or_package, filename] => {
                if *transport == "gh-releases-zsync" || *transport == "bintray-zsync" {
                    Ok(Self::ReleaseHosted {
                        transport: (*transport).to_string(),
                        username: (*username).to_string(),
                        repo: (*repo).to_string(),
                        tag_or_package: (*tag_or_package).to_string(),
                        filename: (*filename).to_string(),
                    })
                } else {
                    Err(DescriptorError::UnsupportedTransport((*transport).to_string()))
                }
            }
            other => Err(DescriptorError::InvalidDelimiterCount(other.len())),
        }
    }

    /// Returns the direct URL if this descriptor is already resolved.
    pub fn direct_url(&self) -> Option<&str> {
        match self {
            Self::Direct { url } => Some(url),
            Self::ReleaseHosted { .. } => None,
        }
    }
}

impl fmt::Display for UpdateDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Direct { url } => write!(f, "zsync|{url}"),
            Self::ReleaseHosted {
                transport,
                username,
                repo,
                tag_or_package,
                filename,
            } => write!(f, "{transport}|{username}|{repo}|{tag_or_package}|{filename}"),
        }
    }
}

/// Failure parsing a legacy pipe-delimited update-information string.
#[derive(Debug, Clone, thiserror::Error)]
pub enum DescriptorError {
    /// The update-information string was empty.
    #[error("update information is empty")]
    Empty,
    /// The string did not split into 2 or 5 `|`-delimited fields.
    #[error("update information has invalid number of delimited fields: {0}")]
    InvalidDelimiterCount(usize),
    /// The transport named in the first field is not one this core supports.
    #[error("unsupported update transport: {0}")]
    UnsupportedTransport(String),
}

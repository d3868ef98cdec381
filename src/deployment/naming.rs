//! # Content-addressed artifact names.
//!
//! `name = prefix + BASE64URL_NOPAD(SHA-256(content)) + suffix`
//!
//! Names are pure functions of content: identical bytes always map to the same
//! name, so publishing the same artifact twice is a no-op.

use data_encoding::BASE64URL_NOPAD;
use sha2::{Digest, Sha256};

/// Kinds of stored deployment content.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ArtifactKind {
    /// Manifest of the service types the deployment needs.
    Assemblies,
    /// Cell configuration (service descriptors).
    Config,
    /// Key/value settings.
    Settings,
    /// Deployment identity derived from the three artifact names.
    Deployment,
}

impl ArtifactKind {
    /// Name prefix of this kind.
    pub fn prefix(self) -> &'static str {
        match self {
            ArtifactKind::Assemblies => "assemblies/",
            ArtifactKind::Config => "config/",
            ArtifactKind::Settings => "settings/",
            ArtifactKind::Deployment => "deployment/",
        }
    }

    /// Name suffix of this kind.
    pub fn suffix(self) -> &'static str {
        match self {
            ArtifactKind::Deployment => "",
            _ => ".json",
        }
    }
}

/// Content name of `content` for `kind`.
pub fn name_for(kind: ArtifactKind, content: &[u8]) -> String {
    let digest = Sha256::digest(content);
    format!("{}{}{}", kind.prefix(), BASE64URL_NOPAD.encode(&digest), kind.suffix())
}

/// Deployment name derived from its three artifact names.
pub fn deployment_name(assemblies: &str, config: &str, settings: &str) -> String {
    let identity = format!("{assemblies}\n{config}\n{settings}");
    name_for(ArtifactKind::Deployment, identity.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_are_pure_functions_of_content() {
        let a = name_for(ArtifactKind::Config, b"{\"services\":[]}");
        let b = name_for(ArtifactKind::Config, b"{\"services\":[]}");
        let c = name_for(ArtifactKind::Config, b"{\"services\":[1]}");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.starts_with("config/"));
        assert!(a.ends_with(".json"));
        // sha-256 is 32 bytes: 43 unpadded base64url characters
        assert_eq!(a.len(), "config/".len() + 43 + ".json".len());
        let digest = &a["config/".len()..a.len() - ".json".len()];
        assert!(!digest.contains(['=', '+', '/']));
    }

    #[test]
    fn same_bytes_differ_by_kind() {
        assert_ne!(
            name_for(ArtifactKind::Config, b"x"),
            name_for(ArtifactKind::Settings, b"x")
        );
    }

    #[test]
    fn deployment_name_depends_on_every_artifact() {
        let base = deployment_name("a", "c", "s");
        assert_eq!(base, deployment_name("a", "c", "s"));
        assert_ne!(base, deployment_name("a2", "c", "s"));
        assert_ne!(base, deployment_name("a", "c", "s2"));
        assert!(base.starts_with("deployment/"));
    }
}

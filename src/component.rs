//! Compiled component: the client-side derived value the rendering surface
//! consumes.
//!
//! Assembled from a fetched artifact set: the bundled executable module
//! text (the constructor source), every style artifact concatenated, and
//! the namespace prefix the identifiers were rewritten under. A sha-256
//! fingerprint over the three makes supersede checks cheap.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::artifacts::ArtifactSet;
use crate::error::{PipelineError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ViewportMode {
    Desktop,
    Mobile,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompiledComponent {
    /// Executable module text; the host evaluates this into the component
    /// constructor.
    pub ctor_source: String,
    /// Aggregated flat style text for all style artifacts.
    pub styles: String,
    pub namespace_prefix: String,
    pub fingerprint: String,
}

impl CompiledComponent {
    pub fn new(ctor_source: String, styles: String, namespace_prefix: String) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(ctor_source.as_bytes());
        hasher.update(styles.as_bytes());
        hasher.update(namespace_prefix.as_bytes());
        let fingerprint = format!("{:x}", hasher.finalize());
        CompiledComponent {
            ctor_source,
            styles,
            namespace_prefix,
            fingerprint,
        }
    }

    /// Assemble from a fetched artifact set.
    pub fn assemble(set: &ArtifactSet) -> Result<Self> {
        let script = set.script().ok_or_else(|| PipelineError::Compile {
            package: set.package.clone(),
            message: "artifact set has no script artifact".to_string(),
        })?;
        let ctor_source = script.content.clone().unwrap_or_default();

        let mut styles = String::new();
        for style in set.styles() {
            if let Some(css) = &style.content {
                if !styles.is_empty() {
                    styles.push('\n');
                }
                styles.push_str(css);
            }
        }

        Ok(CompiledComponent::new(
            ctor_source,
            styles,
            set.namespace_prefix.clone(),
        ))
    }
}

/// The version part of a compiled-cache key: viewport variant, the placed
/// instance's monotonic version stamp, and a fingerprint of its serialized
/// configuration.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CompositeVersion {
    pub viewport: ViewportMode,
    pub version_stamp: u64,
    pub config_fingerprint: String,
}

impl CompositeVersion {
    pub fn new(viewport: ViewportMode, version_stamp: u64, config: &serde_json::Value) -> Self {
        let serialized = config.to_string();
        let mut hasher = Sha256::new();
        hasher.update(serialized.as_bytes());
        CompositeVersion {
            viewport,
            version_stamp,
            config_fingerprint: format!("{:x}", hasher.finalize()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifacts::{ArtifactDescriptor, ArtifactKind};

    fn descriptor(name: &str, kind: ArtifactKind, content: &str) -> ArtifactDescriptor {
        ArtifactDescriptor {
            file_name: name.to_string(),
            kind,
            content: Some(content.to_string()),
            url: None,
            namespace_prefix: "lb_1_x".to_string(),
            message: None,
        }
    }

    #[test]
    fn test_assemble_aggregates_styles() {
        let set = ArtifactSet {
            package: "lb".to_string(),
            namespace_prefix: "lb_1_x".to_string(),
            artifacts: vec![
                descriptor("index.js", ArtifactKind::Script, "export const m = 1;"),
                descriptor("a.css", ArtifactKind::Style, ".x { color: red; }"),
                descriptor("b.css", ArtifactKind::Style, ".y { color: blue; }"),
            ],
        };
        let compiled = CompiledComponent::assemble(&set).unwrap();
        assert_eq!(compiled.ctor_source, "export const m = 1;");
        assert!(compiled.styles.contains(".x") && compiled.styles.contains(".y"));
        assert_eq!(compiled.namespace_prefix, "lb_1_x");
    }

    #[test]
    fn test_assemble_without_script_fails() {
        let set = ArtifactSet {
            package: "lb".to_string(),
            namespace_prefix: "lb_1_x".to_string(),
            artifacts: vec![descriptor("a.css", ArtifactKind::Style, ".x {}")],
        };
        assert!(CompiledComponent::assemble(&set).is_err());
    }

    #[test]
    fn test_fingerprint_tracks_content() {
        let a = CompiledComponent::new("code".into(), "css".into(), "p".into());
        let b = CompiledComponent::new("code".into(), "css".into(), "p".into());
        let c = CompiledComponent::new("code2".into(), "css".into(), "p".into());
        assert_eq!(a.fingerprint, b.fingerprint);
        assert_ne!(a.fingerprint, c.fingerprint);
    }

    #[test]
    fn test_composite_version_distinguishes_config() {
        let v1 = CompositeVersion::new(
            ViewportMode::Desktop,
            3,
            &serde_json::json!({ "limit": 10 }),
        );
        let v2 = CompositeVersion::new(
            ViewportMode::Desktop,
            3,
            &serde_json::json!({ "limit": 20 }),
        );
        let v3 =
            CompositeVersion::new(ViewportMode::Mobile, 3, &serde_json::json!({ "limit": 10 }));
        assert_ne!(v1, v2);
        assert_ne!(v1, v3);
    }
}

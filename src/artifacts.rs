//! Per-fetch artifact compilation service.
//!
//! Given a package name, mints a fresh instance token, runs every file in
//! the package through the rewrite/bundle/flatten pipeline, and returns the
//! descriptor set the client loader consumes. Per-file failures become
//! `error`-kind descriptors so one bad file never blocks the rest of the
//! package; the whole response still succeeds. Files are independent, so
//! they are processed in parallel.

use std::path::Path;

use lazy_static::lazy_static;
use rayon::prelude::*;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::bundler;
use crate::error::{PipelineError, Result};
use crate::module_env::{LOCALIZE_MODULE, ModuleEnv};
use crate::package::{FileCategory, PackageStore, classify_extension};
use crate::rewriter;
use crate::style;
use crate::token::InstanceToken;

lazy_static! {
    static ref SCHEMA_DECL_RE: Regex =
        Regex::new(r"export\s+const\s+[A-Za-z_$][A-Za-z0-9_$]*\s*=\s*new\s+SettingGroup\s*\(")
            .unwrap();
    static ref LOCALIZATION_DECL_RE: Regex = Regex::new(r"new\s+Localization\s*\(").unwrap();
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactKind {
    Script,
    Style,
    Text,
    Image,
    Unknown,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactDescriptor {
    pub file_name: String,
    pub kind: ArtifactKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    pub namespace_prefix: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactSet {
    pub package: String,
    pub namespace_prefix: String,
    pub artifacts: Vec<ArtifactDescriptor>,
}

impl ArtifactSet {
    pub fn script(&self) -> Option<&ArtifactDescriptor> {
        self.artifacts
            .iter()
            .find(|a| a.kind == ArtifactKind::Script)
    }

    pub fn styles(&self) -> impl Iterator<Item = &ArtifactDescriptor> {
        self.artifacts
            .iter()
            .filter(|a| a.kind == ArtifactKind::Style)
    }

    /// Valid (non-error) artifact count.
    pub fn valid_count(&self) -> usize {
        self.artifacts
            .iter()
            .filter(|a| a.kind != ArtifactKind::Error)
            .count()
    }
}

/// Compile one package under a freshly minted instance token. `NotFound`
/// when the package directory does not exist; per-file failures are
/// descriptors, never errors.
pub fn compile_package(
    store: &PackageStore,
    env: &ModuleEnv,
    package: &str,
    instance_hint: Option<&str>,
) -> Result<ArtifactSet> {
    if !store.exists(package) {
        return Err(PipelineError::NotFound(package.to_string()));
    }

    let token = match instance_hint {
        Some(hint) => InstanceToken::with_hint(package, hint),
        None => InstanceToken::generate(package),
    };
    let package_dir = store.package_dir(package);
    let files = store.files(package)?;

    debug!(package, token = %token, files = files.len(), "compiling artifact set");

    let artifacts: Vec<ArtifactDescriptor> = files
        .par_iter()
        .filter_map(|path| compile_file(path, &package_dir, package, &token, env))
        .collect();

    Ok(ArtifactSet {
        package: package.to_string(),
        namespace_prefix: token.as_str().to_string(),
        artifacts,
    })
}

/// Async seam for the HTTP tier: bundling is CPU+I/O bound, so it runs on
/// the blocking pool, one independent task per request.
pub async fn compile_package_task(
    store: PackageStore,
    env: ModuleEnv,
    package: String,
    instance_hint: Option<String>,
) -> Result<ArtifactSet> {
    let name = package.clone();
    tokio::task::spawn_blocking(move || {
        compile_package(&store, &env, &package, instance_hint.as_deref())
    })
    .await
    .map_err(|e| PipelineError::Compile {
        package: name,
        message: format!("compile task failed: {}", e),
    })?
}

/// Compile a single file to its descriptor. `None` means the file is
/// bundle-internal (a non-entry script the entry imports) and produces no
/// descriptor of its own.
fn compile_file(
    path: &Path,
    package_dir: &Path,
    package: &str,
    token: &InstanceToken,
    env: &ModuleEnv,
) -> Option<ArtifactDescriptor> {
    let file_name = path
        .strip_prefix(package_dir)
        .unwrap_or(path)
        .to_string_lossy()
        .replace('\\', "/");
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_string())
        .unwrap_or_default();
    let prefix = token.as_str().to_string();

    match classify_extension(&ext) {
        FileCategory::Script => {
            let source = match std::fs::read_to_string(path) {
                Ok(s) => s,
                Err(e) => return Some(error_descriptor(&file_name, &prefix, &e.to_string())),
            };
            if SCHEMA_DECL_RE.is_match(&source) || stem == "settings" {
                // Schema text stays raw and re-serializable; only its
                // export identifier is namespaced.
                let rewritten = rewriter::rewrite_schema_export(&source, token);
                return Some(text_descriptor(&file_name, &prefix, rewritten));
            }
            if source.contains(LOCALIZE_MODULE)
                || LOCALIZATION_DECL_RE.is_match(&source)
                || stem == "localization"
                || stem == "lang"
            {
                return Some(text_descriptor(&file_name, &prefix, source));
            }
            // Only the top-level index is an entry; a nested index.* is an
            // ordinary helper the entry may import.
            if stem == "index" && !file_name.contains('/') {
                // Bundle first so the rewrite also covers inlined helper
                // modules, then namespace the merged output.
                return Some(
                    match bundler::bundle(&source, package_dir, &env.external_modules()) {
                        Ok(bundled) => ArtifactDescriptor {
                            file_name,
                            kind: ArtifactKind::Script,
                            content: Some(rewriter::rewrite_script(&bundled.code, token)),
                            url: None,
                            namespace_prefix: prefix,
                            message: None,
                        },
                        Err(message) => {
                            warn!(package, file = %file_name, %message, "bundle failed");
                            error_descriptor(&file_name, &prefix, &message)
                        }
                    },
                );
            }
            // Imported by the entry; lives inside the bundle.
            None
        }
        FileCategory::Style => {
            let source = match std::fs::read_to_string(path) {
                Ok(s) => s,
                Err(e) => return Some(error_descriptor(&file_name, &prefix, &e.to_string())),
            };
            let rewritten = rewriter::rewrite_style_selectors(&source, token);
            Some(match style::flatten_styles(&rewritten) {
                Ok(flat) => ArtifactDescriptor {
                    file_name,
                    kind: ArtifactKind::Style,
                    content: Some(flat),
                    url: None,
                    namespace_prefix: prefix,
                    message: None,
                },
                Err(message) => {
                    warn!(package, file = %file_name, %message, "style preprocessing failed");
                    error_descriptor(&file_name, &prefix, &message)
                }
            })
        }
        FileCategory::Text => match std::fs::read_to_string(path) {
            Ok(source) => Some(text_descriptor(&file_name, &prefix, source)),
            Err(e) => Some(error_descriptor(&file_name, &prefix, &e.to_string())),
        },
        FileCategory::Image => Some(ArtifactDescriptor {
            file_name: file_name.clone(),
            kind: ArtifactKind::Image,
            content: None,
            url: Some(format!("/packages/{}/{}", package, file_name)),
            namespace_prefix: prefix,
            message: None,
        }),
        FileCategory::Unknown => Some(ArtifactDescriptor {
            file_name,
            kind: ArtifactKind::Unknown,
            content: None,
            url: None,
            namespace_prefix: prefix,
            message: None,
        }),
    }
}

fn text_descriptor(file_name: &str, prefix: &str, content: String) -> ArtifactDescriptor {
    ArtifactDescriptor {
        file_name: file_name.to_string(),
        kind: ArtifactKind::Text,
        content: Some(content),
        url: None,
        namespace_prefix: prefix.to_string(),
        message: None,
    }
}

fn error_descriptor(file_name: &str, prefix: &str, message: &str) -> ArtifactDescriptor {
    ArtifactDescriptor {
        file_name: file_name.to_string(),
        kind: ArtifactKind::Error,
        content: None,
        url: None,
        namespace_prefix: prefix.to_string(),
        message: Some(message.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn fixture_store() -> (tempfile::TempDir, PackageStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = PackageStore::new(dir.path().to_path_buf());
        let pkg = dir.path().join("Leaderboard");
        fs::create_dir_all(&pkg).unwrap();
        fs::write(
            pkg.join("index.jsx"),
            concat!(
                "import { render } from \"@widget/ui\";\n",
                "export const main = () => <div className=\"leaderboard-title\">hi</div>;\n"
            ),
        )
        .unwrap();
        fs::write(pkg.join("widget.css"), ".leaderboard-title { color: red; }").unwrap();
        fs::write(
            pkg.join("settings.js"),
            concat!(
                "import { SettingGroup } from \"@widget/settings\";\n",
                "export const fooSettings = new SettingGroup({ limit: 10 });\n"
            ),
        )
        .unwrap();
        fs::write(pkg.join("trophy.png"), [0u8, 1, 2]).unwrap();
        (dir, store)
    }

    #[test]
    fn test_compile_full_package() {
        let (_dir, store) = fixture_store();
        let env = ModuleEnv::standard();
        let set = compile_package(&store, &env, "Leaderboard", Some("ab3")).unwrap();
        let prefix = set.namespace_prefix.clone();

        let script = set.script().unwrap();
        let code = script.content.as_ref().unwrap();
        assert!(code.contains(&format!("className=\"{}-leaderboard-title\"", prefix)));

        let style = set.styles().next().unwrap();
        let css = style.content.as_ref().unwrap();
        assert!(css.contains(&format!(".{}-leaderboard-title {{", prefix)));

        let settings = set
            .artifacts
            .iter()
            .find(|a| a.file_name == "settings.js")
            .unwrap();
        assert_eq!(settings.kind, ArtifactKind::Text);
        assert!(settings
            .content
            .as_ref()
            .unwrap()
            .contains(&format!("export const {}_fooSettings", prefix)));

        let image = set
            .artifacts
            .iter()
            .find(|a| a.kind == ArtifactKind::Image)
            .unwrap();
        assert_eq!(image.url.as_deref(), Some("/packages/Leaderboard/trophy.png"));
        assert!(image.content.is_none());
    }

    #[test]
    fn test_missing_package_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = PackageStore::new(dir.path().to_path_buf());
        let env = ModuleEnv::standard();
        assert!(matches!(
            compile_package(&store, &env, "Ghost", None),
            Err(PipelineError::NotFound(_))
        ));
    }

    #[test]
    fn test_bad_file_does_not_block_siblings() {
        let (dir, store) = fixture_store();
        let env = ModuleEnv::standard();
        // Unbalanced style sheet alongside the good one.
        fs::write(
            dir.path().join("Leaderboard").join("broken.css"),
            ".bad { color: red;",
        )
        .unwrap();

        let set = compile_package(&store, &env, "Leaderboard", None).unwrap();
        let broken = set
            .artifacts
            .iter()
            .find(|a| a.file_name == "broken.css")
            .unwrap();
        assert_eq!(broken.kind, ArtifactKind::Error);
        assert!(broken.message.is_some());
        // The entry script and the healthy style still compiled.
        assert!(set.script().is_some());
        assert!(set
            .artifacts
            .iter()
            .any(|a| a.file_name == "widget.css" && a.kind == ArtifactKind::Style));
    }

    #[test]
    fn test_nested_index_is_not_an_entry() {
        let (dir, store) = fixture_store();
        let env = ModuleEnv::standard();
        let sub = dir.path().join("Leaderboard").join("partials");
        fs::create_dir_all(&sub).unwrap();
        fs::write(sub.join("index.js"), "export const partial = 1;\n").unwrap();

        let set = compile_package(&store, &env, "Leaderboard", None).unwrap();
        let scripts: Vec<_> = set
            .artifacts
            .iter()
            .filter(|a| a.kind == ArtifactKind::Script)
            .collect();
        assert_eq!(scripts.len(), 1);
        assert_eq!(scripts[0].file_name, "index.jsx");
    }

    #[test]
    fn test_two_fetches_get_disjoint_namespaces() {
        let (_dir, store) = fixture_store();
        let env = ModuleEnv::standard();
        let a = compile_package(&store, &env, "Leaderboard", Some("ab3")).unwrap();
        let b = compile_package(&store, &env, "Leaderboard", Some("cd7")).unwrap();
        assert_ne!(a.namespace_prefix, b.namespace_prefix);

        let css_a = a.styles().next().unwrap().content.clone().unwrap();
        let css_b = b.styles().next().unwrap().content.clone().unwrap();
        assert!(css_a.contains(&a.namespace_prefix));
        assert!(!css_b.contains(&a.namespace_prefix));
    }

    #[tokio::test]
    async fn test_async_seam() {
        let (_dir, store) = fixture_store();
        let env = ModuleEnv::standard();
        let set = compile_package_task(store, env, "Leaderboard".to_string(), None)
            .await
            .unwrap();
        assert!(set.script().is_some());
    }
}

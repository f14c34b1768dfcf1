//! Bundling Service.
//!
//! Resolves a rewritten script entry into one self-contained executable
//! module string. Relative imports are inlined recursively (scope-merged,
//! with their `export` keywords stripped); imports of whitelisted external
//! modules (the UI framework and the schema/localization libraries) are
//! hoisted untouched to the top of the output, because the loader supplies
//! those at evaluation time. Style-sheet imports are dropped; styles travel
//! as their own artifact.
//!
//! The entry is staged to a temp file in the package directory and read
//! back as the bundle input, like any other module file on disk; the file
//! is removed on every exit path (`NamedTempFile` owns the cleanup).

use std::collections::HashSet;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use lazy_static::lazy_static;
use regex::{Captures, Regex};
use tracing::debug;

/// Extensions probed when resolving an extensionless relative import, in
/// priority order.
const RESOLVE_EXTENSIONS: [&str; 4] = ["js", "jsx", "ts", "tsx"];

const STYLE_EXTENSIONS: [&str; 2] = ["css", "scss"];

lazy_static! {
    /// A whole import statement on its own line, with or without bindings.
    static ref IMPORT_RE: Regex = Regex::new(
        r#"(?m)^[ \t]*import\s+(?:[^'"\n]+from\s+)?['"]([^'"]+)['"][ \t]*;?[ \t]*\r?\n?"#
    )
    .unwrap();

    /// Exported declarations in an inlined dependency become plain
    /// declarations in the merged scope.
    static ref EXPORT_KEYWORD_RE: Regex =
        Regex::new(r"(?m)^(\s*)export\s+(const|let|var|function|class)\b").unwrap();

    static ref EXPORT_DEFAULT_RE: Regex = Regex::new(r"(?m)^(\s*)export\s+default\s+").unwrap();
}

#[derive(Debug, Clone)]
pub struct BundledModule {
    pub code: String,
}

struct Bundler<'a> {
    workdir: &'a Path,
    externals: &'a [String],
    visited: HashSet<PathBuf>,
    hoisted: Vec<String>,
    inlined: Vec<String>,
    default_counter: u32,
}

/// Bundle entry source located (conceptually) at the package root.
/// Returns the merged module text or a compile-error message the caller
/// surfaces as an `error`-kind artifact descriptor.
pub fn bundle(
    entry_source: &str,
    workdir: &Path,
    externals: &[String],
) -> Result<BundledModule, String> {
    // Stage the entry to disk and read it back from there, so it goes
    // through the same filesystem path as every module it imports. Removed
    // on success and failure alike.
    let mut temp = tempfile::Builder::new()
        .prefix(".widget-entry-")
        .suffix(".js")
        .tempfile_in(workdir)
        .map_err(|e| format!("failed to write temp entry: {}", e))?;
    temp.write_all(entry_source.as_bytes())
        .map_err(|e| format!("failed to write temp entry: {}", e))?;
    let staged = fs::read_to_string(temp.path())
        .map_err(|e| format!("failed to read temp entry: {}", e))?;

    let mut bundler = Bundler {
        workdir,
        externals,
        visited: HashSet::new(),
        hoisted: Vec::new(),
        inlined: Vec::new(),
        default_counter: 0,
    };
    if let Ok(canonical) = temp.path().canonicalize() {
        bundler.visited.insert(canonical);
    }

    let entry_body = bundler.process_source(&staged, workdir, "<entry>", 0)?;

    let mut code = String::new();
    for import in &bundler.hoisted {
        code.push_str(import);
        code.push('\n');
    }
    if !bundler.hoisted.is_empty() {
        code.push('\n');
    }
    for chunk in &bundler.inlined {
        code.push_str(chunk);
        if !chunk.ends_with('\n') {
            code.push('\n');
        }
        code.push('\n');
    }
    code.push_str(entry_body.trim_start_matches('\n'));

    debug!(
        modules = bundler.visited.len() + 1,
        externals = bundler.hoisted.len(),
        "bundle assembled"
    );
    Ok(BundledModule { code })
}

impl<'a> Bundler<'a> {
    /// Strip/resolve every import in one module's source, inlining relative
    /// dependencies first so the merged scope is definition-ordered.
    fn process_source(
        &mut self,
        source: &str,
        dir: &Path,
        display_name: &str,
        depth: u32,
    ) -> Result<String, String> {
        if depth > 32 {
            return Err(format!("{}: import chain too deep", display_name));
        }

        let mut error: Option<String> = None;
        let body = IMPORT_RE.replace_all(source, |caps: &Captures| {
            if error.is_some() {
                return String::new();
            }
            let specifier = caps[1].to_string();
            let statement = caps[0].trim().to_string();

            if self.is_external(&specifier) {
                if !self.hoisted.contains(&statement) {
                    self.hoisted.push(statement);
                }
                return String::new();
            }
            if is_style_import(&specifier) {
                return String::new();
            }
            if specifier.starts_with("./") || specifier.starts_with("../") {
                if let Err(e) = self.inline_relative(&specifier, dir, display_name, depth) {
                    error = Some(e);
                }
                return String::new();
            }
            error = Some(format!(
                "{}: module \"{}\" is neither relative nor on the external whitelist",
                display_name, specifier
            ));
            String::new()
        });

        if let Some(e) = error {
            return Err(e);
        }
        Ok(body.into_owned())
    }

    fn inline_relative(
        &mut self,
        specifier: &str,
        dir: &Path,
        importer: &str,
        depth: u32,
    ) -> Result<(), String> {
        let resolved = resolve_relative(dir, specifier).ok_or_else(|| {
            format!("{}: cannot resolve \"{}\"", importer, specifier)
        })?;

        let canonical = resolved
            .canonicalize()
            .unwrap_or_else(|_| resolved.clone());
        if !self.visited.insert(canonical) {
            return Ok(()); // already inlined (or a cycle in flight)
        }

        let source = fs::read_to_string(&resolved)
            .map_err(|e| format!("{}: failed to read \"{}\": {}", importer, specifier, e))?;

        let parent = resolved
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.workdir.to_path_buf());
        let display = resolved
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| specifier.to_string());

        let body = self.process_source(&source, &parent, &display, depth + 1)?;
        let demoted = self.demote_exports(&body);
        self.inlined.push(format!(
            "// inlined from {}\n{}",
            specifier,
            demoted.trim()
        ));
        Ok(())
    }

    /// Exports of an inlined dependency become plain declarations; default
    /// exports get a synthetic name so two deps cannot collide.
    fn demote_exports(&mut self, source: &str) -> String {
        let no_named = EXPORT_KEYWORD_RE.replace_all(source, "$1$2");
        EXPORT_DEFAULT_RE
            .replace_all(&no_named, |caps: &Captures| {
                self.default_counter += 1;
                format!("{}const __default_{} = ", &caps[1], self.default_counter)
            })
            .into_owned()
    }

    fn is_external(&self, specifier: &str) -> bool {
        self.externals
            .iter()
            .any(|e| specifier == e || specifier.starts_with(&format!("{}/", e)))
    }
}

fn is_style_import(specifier: &str) -> bool {
    STYLE_EXTENSIONS
        .iter()
        .any(|ext| specifier.ends_with(&format!(".{}", ext)))
}

fn resolve_relative(dir: &Path, specifier: &str) -> Option<PathBuf> {
    let base = dir.join(specifier);
    if base.is_file() {
        return Some(base);
    }
    for ext in RESOLVE_EXTENSIONS {
        let with_ext = base.with_extension(ext);
        if with_ext.is_file() {
            return Some(with_ext);
        }
    }
    for ext in RESOLVE_EXTENSIONS {
        let index = base.join(format!("index.{}", ext));
        if index.is_file() {
            return Some(index);
        }
    }
    None
}

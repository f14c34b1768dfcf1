//! Package store: upload validation, name sanitization, and the on-disk
//! layout compiled artifacts are produced from.
//!
//! A package is a directory under the store root holding one script entry
//! (`index.*`), style sheets, optional settings-schema and localization
//! modules, and static assets. Input errors are rejected synchronously and
//! whole: a bad upload writes nothing.

use std::fs;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::error::{PipelineError, Result};

pub const ALLOWED_SCRIPT_EXTENSIONS: [&str; 4] = ["js", "jsx", "ts", "tsx"];
pub const ALLOWED_STYLE_EXTENSIONS: [&str; 2] = ["css", "scss"];
pub const ALLOWED_TEXT_EXTENSIONS: [&str; 4] = ["json", "txt", "md", "html"];
pub const ALLOWED_IMAGE_EXTENSIONS: [&str; 7] =
    ["png", "jpg", "jpeg", "gif", "webp", "svg", "ico"];

/// Coarse classification shared by upload validation and artifact
/// compilation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileCategory {
    Script,
    Style,
    Text,
    Image,
    Unknown,
}

pub fn classify_extension(ext: &str) -> FileCategory {
    let ext = ext.to_ascii_lowercase();
    if ALLOWED_SCRIPT_EXTENSIONS.contains(&ext.as_str()) {
        FileCategory::Script
    } else if ALLOWED_STYLE_EXTENSIONS.contains(&ext.as_str()) {
        FileCategory::Style
    } else if ALLOWED_TEXT_EXTENSIONS.contains(&ext.as_str()) {
        FileCategory::Text
    } else if ALLOWED_IMAGE_EXTENSIONS.contains(&ext.as_str()) {
        FileCategory::Image
    } else {
        FileCategory::Unknown
    }
}

pub fn allowed_extensions() -> Vec<&'static str> {
    let mut all = Vec::new();
    all.extend_from_slice(&ALLOWED_SCRIPT_EXTENSIONS);
    all.extend_from_slice(&ALLOWED_STYLE_EXTENSIONS);
    all.extend_from_slice(&ALLOWED_TEXT_EXTENSIONS);
    all.extend_from_slice(&ALLOWED_IMAGE_EXTENSIONS);
    all
}

/// Name sanitization shared by every endpoint: trim whitespace, keep only
/// letters, digits, `-`, `_`; a run of two or more `-`/`_` collapses to a
/// single `_`.
pub fn sanitize_name(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut run = String::new();
    for c in raw.trim().chars() {
        if c == '-' || c == '_' {
            run.push(c);
            continue;
        }
        if !run.is_empty() {
            flush_run(&mut out, &run);
            run.clear();
        }
        if c.is_ascii_alphanumeric() {
            out.push(c);
        }
    }
    if !run.is_empty() {
        flush_run(&mut out, &run);
    }
    out
}

fn flush_run(out: &mut String, run: &str) {
    if run.len() == 1 {
        out.push_str(run);
    } else {
        out.push('_');
    }
}

#[derive(Debug, Clone)]
pub struct UploadFile {
    pub name: String,
    pub content: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub name: String,
    pub script_files: Vec<UploadFile>,
    pub style_files: Vec<UploadFile>,
    pub extra_files: Vec<UploadFile>,
}

#[derive(Debug, Clone)]
pub struct PackageStore {
    root: PathBuf,
}

impl PackageStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        PackageStore { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// All package names. An absent root is an empty store, not an error.
    pub fn list(&self) -> Vec<String> {
        let mut names = Vec::new();
        let entries = match fs::read_dir(&self.root) {
            Ok(e) => e,
            Err(_) => return names,
        };
        for entry in entries.flatten() {
            if entry.path().is_dir() {
                names.push(entry.file_name().to_string_lossy().to_string());
            }
        }
        names.sort();
        names
    }

    pub fn package_dir(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    pub fn exists(&self, name: &str) -> bool {
        self.package_dir(name).is_dir()
    }

    /// Every file in a package, relative paths included (assets may nest).
    pub fn files(&self, name: &str) -> Result<Vec<PathBuf>> {
        let dir = self.package_dir(name);
        if !dir.is_dir() {
            return Err(PipelineError::NotFound(name.to_string()));
        }
        let mut files = Vec::new();
        for entry in WalkDir::new(&dir).follow_links(true).into_iter().flatten() {
            if entry.path().is_file() {
                files.push(entry.path().to_path_buf());
            }
        }
        files.sort();
        Ok(files)
    }

    /// Validate and persist an upload. Validation happens entirely before
    /// the first write, so a rejected upload leaves no trace.
    pub fn save(&self, request: &UploadRequest) -> Result<String> {
        let name = sanitize_name(&request.name);
        if name.is_empty() {
            return Err(PipelineError::Input(
                "package name is empty after sanitization".to_string(),
            ));
        }
        if request.script_files.is_empty() {
            return Err(PipelineError::Input(
                "at least one script file is required".to_string(),
            ));
        }
        if request.style_files.is_empty() {
            return Err(PipelineError::Input(
                "at least one style file is required".to_string(),
            ));
        }

        for file in &request.script_files {
            validate_file_name(&file.name)?;
            require_category(&file.name, FileCategory::Script)?;
        }
        for file in &request.style_files {
            validate_file_name(&file.name)?;
            require_category(&file.name, FileCategory::Style)?;
        }
        for file in &request.extra_files {
            validate_file_name(&file.name)?;
            let ext = extension_of(&file.name);
            if classify_extension(&ext) == FileCategory::Unknown {
                return Err(disallowed(&file.name));
            }
        }

        let dir = self.package_dir(&name);
        fs::create_dir_all(&dir)?;
        for file in request
            .script_files
            .iter()
            .chain(&request.style_files)
            .chain(&request.extra_files)
        {
            fs::write(dir.join(&file.name), &file.content)?;
        }
        Ok(name)
    }

    /// Read one file by its package-relative name.
    pub fn read_file(&self, package: &str, file_name: &str) -> Result<String> {
        validate_file_name(file_name)?;
        let path = self.package_dir(package).join(file_name);
        fs::read_to_string(path).map_err(PipelineError::Io)
    }

    /// Overwrite one file. Used by the settings/localization update
    /// endpoints after serialize-back; the caller must invalidate the
    /// compiled cache for every placed instance of the package afterwards.
    pub fn write_file(&self, package: &str, file_name: &str, content: &str) -> Result<()> {
        validate_file_name(file_name)?;
        if !self.exists(package) {
            return Err(PipelineError::NotFound(package.to_string()));
        }
        fs::write(self.package_dir(package).join(file_name), content)?;
        Ok(())
    }
}

/// File names are plain names inside the package directory. A separator or
/// a `..` component would let an upload write outside the store root, so
/// they are rejected before anything touches the disk.
fn validate_file_name(file_name: &str) -> Result<()> {
    let flat = !file_name.is_empty()
        && !file_name.contains('/')
        && !file_name.contains('\\')
        && file_name != "."
        && file_name != "..";
    if flat {
        Ok(())
    } else {
        Err(PipelineError::Input(format!(
            "file name \"{}\" must be a plain name without path separators",
            file_name
        )))
    }
}

fn extension_of(file_name: &str) -> String {
    Path::new(file_name)
        .extension()
        .map(|e| e.to_string_lossy().to_string())
        .unwrap_or_default()
}

fn require_category(file_name: &str, expected: FileCategory) -> Result<()> {
    let ext = extension_of(file_name);
    if classify_extension(&ext) == expected {
        Ok(())
    } else {
        Err(disallowed(file_name))
    }
}

fn disallowed(file_name: &str) -> PipelineError {
    PipelineError::Input(format!(
        "file type of \"{}\" is not allowed; allowed extensions: {}",
        file_name,
        allowed_extensions().join(", ")
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn upload(name: &str) -> UploadRequest {
        UploadRequest {
            name: name.to_string(),
            script_files: vec![UploadFile {
                name: "index.jsx".to_string(),
                content: b"export const main = () => null;".to_vec(),
            }],
            style_files: vec![UploadFile {
                name: "widget.css".to_string(),
                content: b".title { color: red; }".to_vec(),
            }],
            extra_files: vec![],
        }
    }

    #[test]
    fn test_sanitize_name() {
        assert_eq!(sanitize_name("  My Widget--v2  "), "MyWidget_v2");
        assert_eq!(sanitize_name("leader-board"), "leader-board");
        assert_eq!(sanitize_name("a__b--c_-d"), "a_b_c_d");
        assert_eq!(sanitize_name("crazy!name?"), "crazyname");
        assert_eq!(sanitize_name("   "), "");
    }

    #[test]
    fn test_empty_store_lists_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let store = PackageStore::new(dir.path().join("packages"));
        assert!(store.list().is_empty());
    }

    #[test]
    fn test_save_and_list() {
        let dir = tempfile::tempdir().unwrap();
        let store = PackageStore::new(dir.path());
        let name = store.save(&upload("My Widget")).unwrap();
        assert_eq!(name, "MyWidget");
        assert_eq!(store.list(), vec!["MyWidget"]);
        assert!(store.exists("MyWidget"));
        assert_eq!(store.files("MyWidget").unwrap().len(), 2);
    }

    #[test]
    fn test_upload_requires_both_categories() {
        let dir = tempfile::tempdir().unwrap();
        let store = PackageStore::new(dir.path());

        let mut no_styles = upload("w");
        no_styles.style_files.clear();
        assert!(matches!(
            store.save(&no_styles),
            Err(PipelineError::Input(_))
        ));

        let mut no_scripts = upload("w");
        no_scripts.script_files.clear();
        assert!(matches!(
            store.save(&no_scripts),
            Err(PipelineError::Input(_))
        ));
        // Nothing was written by the rejected uploads.
        assert!(store.list().is_empty());
    }

    #[test]
    fn test_disallowed_extension_enumerates_allowed_list() {
        let dir = tempfile::tempdir().unwrap();
        let store = PackageStore::new(dir.path());
        let mut bad = upload("w");
        bad.extra_files.push(UploadFile {
            name: "run.exe".to_string(),
            content: vec![0u8],
        });
        let err = store.save(&bad).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("run.exe"));
        assert!(message.contains("js, jsx, ts, tsx"));
        assert!(store.list().is_empty());
    }

    #[test]
    fn test_traversal_file_name_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("a").join("b");
        let store = PackageStore::new(&root);

        let mut sneaky = upload("w");
        sneaky.script_files.push(UploadFile {
            name: "../../escape.js".to_string(),
            content: b"export const x = 1;".to_vec(),
        });
        assert!(matches!(
            store.save(&sneaky),
            Err(PipelineError::Input(_))
        ));
        // Nothing was written, inside the store root or above it.
        assert!(store.list().is_empty());
        assert!(!dir.path().join("escape.js").exists());

        // The single-file endpoints hold the same line.
        assert!(matches!(
            store.read_file("w", "../secret"),
            Err(PipelineError::Input(_))
        ));
        assert!(matches!(
            store.write_file("w", "..\\evil.css", ".x {}"),
            Err(PipelineError::Input(_))
        ));
    }

    #[test]
    fn test_missing_package_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = PackageStore::new(dir.path());
        assert!(matches!(
            store.files("ghost"),
            Err(PipelineError::NotFound(_))
        ));
    }

    #[test]
    fn test_classification() {
        assert_eq!(classify_extension("tsx"), FileCategory::Script);
        assert_eq!(classify_extension("CSS"), FileCategory::Style);
        assert_eq!(classify_extension("png"), FileCategory::Image);
        assert_eq!(classify_extension("json"), FileCategory::Text);
        assert_eq!(classify_extension("exe"), FileCategory::Unknown);
    }
}

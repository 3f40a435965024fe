//! Template handles – mapping template names onto files under the source root.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::config::{CompileConfig, TEMPLATE_EXT};
use crate::error::{CompileError, Result};

/// One source template, loaded from disk.
#[derive(Debug, Clone)]
pub struct TemplateHandle {
    /// Slash-separated name without extension, e.g. `emails/welcome`.
    pub name: String,
    /// Canonical path of the backing file.
    pub absolute_path: PathBuf,
    pub raw_text: String,
}

impl TemplateHandle {
    /// Load `<source_root>/<name>.njk`.
    pub fn load(config: &CompileConfig, name: &str) -> Result<Self> {
        let name = normalize_name(name);
        let root = canonical_root(&config.source_root)?;
        let path = root.join(format!("{name}.{TEMPLATE_EXT}"));
        if !path.exists() {
            return Err(CompileError::NotFound(name));
        }
        let absolute_path = confine(&path, &root)?;
        let raw_text = fs::read_to_string(&absolute_path)?;
        Ok(Self {
            name,
            absolute_path,
            raw_text,
        })
    }

    /// Directory containing the template, used as the base for includes.
    pub fn dir(&self) -> &Path {
        self.absolute_path.parent().unwrap_or(Path::new(""))
    }
}

/// Normalise a template reference into a template name.
///
/// `"/emails/base.njk"` and `"emails/base"` both become `"emails/base"`.
pub fn normalize_name(reference: &str) -> String {
    let name = reference.trim().replace('\\', "/");
    let name = name.trim_start_matches('/');
    let name = name
        .strip_suffix(&format!(".{TEMPLATE_EXT}"))
        .unwrap_or(name);
    name.to_string()
}

/// Canonicalise the source root, mapping a missing root onto `NotFound`.
pub(crate) fn canonical_root(root: &Path) -> Result<PathBuf> {
    fs::canonicalize(root).map_err(|e| match e.kind() {
        io::ErrorKind::NotFound => CompileError::NotFound(root.display().to_string()),
        _ => CompileError::Io(e),
    })
}

/// Resolve symlinks in `path` and check it is a regular file under `root`.
///
/// `root` must already be canonical.
pub(crate) fn confine(path: &Path, root: &Path) -> Result<PathBuf> {
    let canonical = fs::canonicalize(path).map_err(|e| match e.kind() {
        io::ErrorKind::NotFound => CompileError::NotFound(path.display().to_string()),
        _ => CompileError::Io(e),
    })?;
    if !canonical.starts_with(root) {
        return Err(CompileError::PathEscape {
            path: canonical,
            root: root.to_path_buf(),
        });
    }
    if !canonical.is_file() {
        return Err(CompileError::NotAFile(canonical));
    }
    Ok(canonical)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_are_normalized() {
        assert_eq!(normalize_name("base.njk"), "base");
        assert_eq!(normalize_name("/emails/welcome.njk"), "emails/welcome");
        assert_eq!(normalize_name("emails\\welcome"), "emails/welcome");
        assert_eq!(normalize_name("layouts/v1.2"), "layouts/v1.2");
    }

    #[test]
    fn load_reads_template() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("emails")).unwrap();
        fs::write(dir.path().join("emails/welcome.njk"), "Hi {{ name }}").unwrap();

        let config = CompileConfig::new(dir.path(), dir.path().join("dist"));
        let handle = TemplateHandle::load(&config, "emails/welcome").unwrap();
        assert_eq!(handle.name, "emails/welcome");
        assert_eq!(handle.raw_text, "Hi {{ name }}");
        assert!(handle.dir().ends_with("emails"));
    }

    #[test]
    fn missing_template_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let config = CompileConfig::new(dir.path(), dir.path().join("dist"));
        let err = TemplateHandle::load(&config, "nope").unwrap_err();
        assert!(matches!(err, CompileError::NotFound(name) if name == "nope"));
    }

    #[test]
    fn names_cannot_leave_the_root() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("src");
        fs::create_dir_all(&root).unwrap();
        fs::write(dir.path().join("secret.njk"), "s3cr3t").unwrap();

        let config = CompileConfig::new(&root, dir.path().join("dist"));
        let err = TemplateHandle::load(&config, "../secret").unwrap_err();
        assert!(matches!(err, CompileError::PathEscape { .. }));
    }

    #[cfg(unix)]
    #[test]
    fn symlinked_template_cannot_leave_the_root() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("src");
        fs::create_dir_all(&root).unwrap();
        let secret = dir.path().join("secret.txt");
        fs::write(&secret, "s3cr3t").unwrap();
        std::os::unix::fs::symlink(&secret, root.join("link.njk")).unwrap();

        let config = CompileConfig::new(&root, dir.path().join("dist"));
        let err = TemplateHandle::load(&config, "link").unwrap_err();
        assert!(matches!(err, CompileError::PathEscape { .. }), "got {err:?}");
    }

    #[test]
    fn directories_are_not_templates() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("odd.njk")).unwrap();
        let config = CompileConfig::new(dir.path(), dir.path().join("dist"));
        let err = TemplateHandle::load(&config, "odd").unwrap_err();
        assert!(matches!(err, CompileError::NotAFile(_)));
    }
}

//! Discovery Module
//!
//! Packaging layer around the compiler: finds template files, maps each to its
//! output artifact and compiles a batch. A partial `{{> name}}` resolves to the
//! artifact written next to its caller, so output names keep the source
//! directory layout relative to a common base.

use rayon::prelude::*;
use std::fs;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::config::CompileOptions;
use crate::finalize::{compile_template, CompiledUnit};
use crate::validate::CompilerError;

pub const DEFAULT_TEMPLATE_EXTENSION: &str = "mustache";

#[derive(Debug, thiserror::Error)]
pub enum BatchError {
    #[error("{}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{}: {source}", .path.display())]
    Compile {
        path: PathBuf,
        #[source]
        source: CompilerError,
    },
}

impl BatchError {
    pub fn path(&self) -> &Path {
        match self {
            BatchError::Io { path, .. } | BatchError::Compile { path, .. } => path,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CompiledFile {
    pub source: PathBuf,
    pub output: PathBuf,
    pub unit: CompiledUnit,
}

// ═══════════════════════════════════════════════════════════════════════════════
// TEMPLATE DISCOVERY
// ═══════════════════════════════════════════════════════════════════════════════

/// Collect template files. Files named directly are always taken; directories
/// are walked for files ending in `.{extension}`. Result is sorted and deduplicated.
pub fn find_templates(inputs: &[PathBuf], extension: &str) -> Vec<PathBuf> {
    let mut files = Vec::new();

    for input in inputs {
        if input.is_file() {
            files.push(input.clone());
            continue;
        }
        for entry in WalkDir::new(input)
            .follow_links(true)
            .into_iter()
            .filter_map(Result::ok)
        {
            let path = entry.path();
            if path.is_file() && path.extension().map_or(false, |ext| ext == extension) {
                files.push(path.to_path_buf());
            }
        }
    }

    files.sort();
    files.dedup();
    debug!(count = files.len(), "discovered templates");
    files
}

/// Drop a leading U+FEFF.
pub fn strip_byte_order_mark(text: &str) -> &str {
    text.strip_prefix('\u{feff}').unwrap_or(text)
}

/// Deepest directory containing every file's parent directory.
pub fn common_base(files: &[PathBuf]) -> PathBuf {
    let mut parents = files.iter().map(|f| f.parent().unwrap_or_else(|| Path::new("")));
    let Some(first) = parents.next() else {
        return PathBuf::new();
    };

    let mut base: Vec<Component<'_>> = first.components().collect();
    for parent in parents {
        let shared = base
            .iter()
            .zip(parent.components())
            .take_while(|(a, b)| **a == *b)
            .count();
        base.truncate(shared);
    }
    base.iter().collect()
}

/// `<out_dir>/<template dir relative to base>/<file stem><extension>`.
pub fn output_path(template: &Path, base: &Path, out_dir: &Path, extension: &str) -> PathBuf {
    let relative_dir = template
        .parent()
        .and_then(|dir| dir.strip_prefix(base).ok())
        .unwrap_or_else(|| Path::new(""));
    let stem = template
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    out_dir.join(relative_dir).join(format!("{}{}", stem, extension))
}

// ═══════════════════════════════════════════════════════════════════════════════
// BATCH COMPILATION
// ═══════════════════════════════════════════════════════════════════════════════

fn compile_file(
    template: &Path,
    base: &Path,
    out_dir: &Path,
    options: &CompileOptions,
) -> Result<CompiledFile, BatchError> {
    let text = fs::read_to_string(template).map_err(|source| BatchError::Io {
        path: template.to_path_buf(),
        source,
    })?;
    let file_path = template.to_string_lossy();
    let unit = compile_template(strip_byte_order_mark(&text), &file_path, options).map_err(
        |source| BatchError::Compile {
            path: template.to_path_buf(),
            source,
        },
    )?;
    Ok(CompiledFile {
        source: template.to_path_buf(),
        output: output_path(template, base, out_dir, &options.partial_extension),
        unit,
    })
}

fn write_output(file: &CompiledFile) -> Result<(), BatchError> {
    let io_error = |source| BatchError::Io {
        path: file.output.clone(),
        source,
    };
    if let Some(dir) = file.output.parent() {
        fs::create_dir_all(dir).map_err(io_error)?;
    }
    fs::write(&file.output, &file.unit.code).map_err(io_error)
}

/// Compile `templates` in parallel, then write the artifacts in order. Stops at
/// the first failure; artifacts for templates before it are already written.
pub fn compile_all(
    templates: &[PathBuf],
    base: &Path,
    out_dir: &Path,
    options: &CompileOptions,
) -> Result<Vec<CompiledFile>, BatchError> {
    let results: Vec<Result<CompiledFile, BatchError>> = templates
        .par_iter()
        .map(|template| compile_file(template, base, out_dir, options))
        .collect();

    let mut compiled = Vec::with_capacity(results.len());
    for result in results {
        let file = result?;
        write_output(&file)?;
        info!("Compiled {}", file.source.display());
        compiled.push(file);
    }
    Ok(compiled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validate::ERR_MISSING_BLOCK_END;
    use tempfile::TempDir;

    fn write(root: &Path, rel: &str, contents: &str) -> PathBuf {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn test_strip_byte_order_mark() {
        assert_eq!(strip_byte_order_mark("\u{feff}{{x}}"), "{{x}}");
        assert_eq!(strip_byte_order_mark("plain"), "plain");
    }

    #[test]
    fn test_common_base() {
        let files = vec![
            PathBuf::from("src/views/a.mustache"),
            PathBuf::from("src/views/list/b.mustache"),
            PathBuf::from("src/partials/c.mustache"),
        ];
        assert_eq!(common_base(&files), PathBuf::from("src"));
        assert_eq!(common_base(&files[1..2]), PathBuf::from("src/views/list"));
        assert_eq!(common_base(&[]), PathBuf::new());
    }

    #[test]
    fn test_output_path_keeps_layout() {
        let out = output_path(
            Path::new("src/views/list/item.en.mustache"),
            Path::new("src"),
            Path::new("dist"),
            ".js",
        );
        assert_eq!(out, PathBuf::from("dist/views/list/item.en.js"));
    }

    #[test]
    fn test_find_templates_filters_by_extension() {
        let dir = TempDir::new().unwrap();
        let a = write(dir.path(), "a.mustache", "a");
        let b = write(dir.path(), "nested/b.mustache", "b");
        write(dir.path(), "nested/readme.txt", "skip");
        let explicit = write(dir.path(), "other.tpl", "c");

        let found = find_templates(&[dir.path().to_path_buf(), explicit.clone()], "mustache");
        let mut expected = vec![a, b, explicit];
        expected.sort();
        assert_eq!(found, expected);
    }

    #[test]
    fn test_compile_all_writes_artifacts() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("src");
        let out = dir.path().join("out");
        let page = write(&src, "page.mustache", "\u{feff}{{#rows}}{{> row}}{{/rows}}");
        let row = write(&src, "row.mustache", "<{{.}}>");

        let templates = find_templates(&[src.clone()], DEFAULT_TEMPLATE_EXTENSION);
        let base = common_base(&templates);
        let compiled = compile_all(&templates, &base, &out, &CompileOptions::default()).unwrap();
        assert_eq!(compiled.len(), 2);

        let page_js = fs::read_to_string(out.join("page.js")).unwrap();
        assert!(page_js.starts_with("module.exports"));
        assert!(page_js.contains("require('./row.js').render(data$1)"));
        assert!(!page_js.contains('\u{feff}'));
        assert!(out.join("row.js").is_file());
        assert!(compiled.iter().any(|f| f.source == page));
        assert!(compiled.iter().any(|f| f.source == row));
    }

    #[test]
    fn test_compile_all_stops_at_first_failure() {
        let dir = TempDir::new().unwrap();
        let good = write(dir.path(), "a.mustache", "ok");
        let bad = write(dir.path(), "b.mustache", "{{#open}}");
        let out = dir.path().join("out");

        let err = compile_all(
            &[good, bad.clone()],
            dir.path(),
            &out,
            &CompileOptions::default(),
        )
        .unwrap_err();
        assert_eq!(err.path(), bad.as_path());
        match err {
            BatchError::Compile { source, .. } => assert_eq!(source.code, ERR_MISSING_BLOCK_END),
            other => panic!("unexpected {:?}", other),
        }
        assert!(out.join("a.js").is_file());
        assert!(!out.join("b.js").exists());
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("nope.mustache");
        let err = compile_all(&[missing], dir.path(), dir.path(), &CompileOptions::default())
            .unwrap_err();
        assert!(matches!(err, BatchError::Io { .. }));
    }
}

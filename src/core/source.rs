use std::{
    io::Write,
    path::{Path, PathBuf},
};

use tempfile::NamedTempFile;

use crate::{constants::TEMP_FILE_PREFIX, core::domain::RunnableSource};

#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("Agent file not found: {}", path.display())]
    NotFound { path: PathBuf },
    #[error("Agent path is not a regular file: {}", path.display())]
    NotAFile { path: PathBuf },
    #[error("Agent file is not readable: {}: {msg}", path.display())]
    Unreadable { path: PathBuf, msg: String },
    #[error("Agent code too large ({size} characters, maximum {max})")]
    TooLarge { size: usize, max: usize },
    #[error("Failed to materialize agent code: {msg}")]
    Materialize { msg: String },
}

/// A script on disk, ready to be handed to the interpreter.
///
/// Inline code lives in a temporary file owned by this value; the file is
/// removed when it is dropped, whatever the outcome of the run.
#[derive(Debug)]
pub struct ResolvedSource {
    path: PathBuf,
    temp_file: Option<NamedTempFile>,
}

impl ResolvedSource {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_temporary(&self) -> bool {
        self.temp_file.is_some()
    }
}

#[derive(Clone, Debug)]
pub struct SourceResolver {
    temp_dir: PathBuf,
    script_suffix: String,
    max_code_size: usize,
}

impl SourceResolver {
    pub fn new<T>(temp_dir: T, script_suffix: &str, max_code_size: usize) -> Self
    where
        T: AsRef<Path>,
    {
        SourceResolver {
            temp_dir: temp_dir.as_ref().into(),
            script_suffix: script_suffix.to_string(),
            max_code_size,
        }
    }

    #[tracing::instrument(skip(self, source), fields(kind = source_kind(source)))]
    pub fn resolve(&self, source: &RunnableSource) -> Result<ResolvedSource, ResolveError> {
        match source {
            RunnableSource::Path { location } => self.resolve_path(location),
            RunnableSource::InlineCode { text } => self.materialize(text),
        }
    }

    fn resolve_path(&self, location: &Path) -> Result<ResolvedSource, ResolveError> {
        let metadata = std::fs::metadata(location).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => ResolveError::NotFound {
                path: location.into(),
            },
            _ => ResolveError::Unreadable {
                path: location.into(),
                msg: e.to_string(),
            },
        })?;

        if !metadata.is_file() {
            return Err(ResolveError::NotAFile {
                path: location.into(),
            });
        }

        std::fs::File::open(location).map_err(|e| ResolveError::Unreadable {
            path: location.into(),
            msg: e.to_string(),
        })?;

        let path = std::fs::canonicalize(location).map_err(|e| ResolveError::Unreadable {
            path: location.into(),
            msg: e.to_string(),
        })?;

        tracing::debug!("Resolved agent path: {}", path.display());
        Ok(ResolvedSource {
            path,
            temp_file: None,
        })
    }

    fn materialize(&self, text: &str) -> Result<ResolvedSource, ResolveError> {
        let size = text.chars().count();
        if size > self.max_code_size {
            return Err(ResolveError::TooLarge {
                size,
                max: self.max_code_size,
            });
        }

        std::fs::create_dir_all(&self.temp_dir)
            .map_err(|e| ResolveError::Materialize { msg: e.to_string() })?;

        let mut temp_file = tempfile::Builder::new()
            .prefix(TEMP_FILE_PREFIX)
            .suffix(&self.script_suffix)
            .tempfile_in(&self.temp_dir)
            .map_err(|e| ResolveError::Materialize { msg: e.to_string() })?;

        temp_file
            .write_all(text.as_bytes())
            .and_then(|_| temp_file.flush())
            .map_err(|e| ResolveError::Materialize { msg: e.to_string() })?;

        let path = temp_file.path().to_path_buf();
        tracing::debug!("Materialized inline agent code: {}", path.display());

        Ok(ResolvedSource {
            path,
            temp_file: Some(temp_file),
        })
    }
}

fn source_kind(source: &RunnableSource) -> &'static str {
    match source {
        RunnableSource::Path { .. } => "path",
        RunnableSource::InlineCode { .. } => "inline",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn resolver(dir: &TempDir) -> SourceResolver {
        SourceResolver::new(dir.path().join("scratch"), ".py", 100)
    }

    #[test]
    fn test_inline_code_is_written_and_removed_on_drop() {
        let dir = TempDir::new().unwrap();
        let resolver = resolver(&dir);

        let resolved = resolver
            .resolve(&RunnableSource::inline("print('OK-12345')"))
            .unwrap();
        let path = resolved.path().to_path_buf();

        assert!(resolved.is_temporary());
        assert!(path.is_absolute());
        assert!(path.extension().is_some_and(|ext| ext == "py"));
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "print('OK-12345')"
        );

        drop(resolved);
        assert!(!path.exists());
    }

    #[test]
    fn test_inline_code_names_are_unique() {
        let dir = TempDir::new().unwrap();
        let resolver = resolver(&dir);

        let first = resolver.resolve(&RunnableSource::inline("a")).unwrap();
        let second = resolver.resolve(&RunnableSource::inline("a")).unwrap();
        assert_ne!(first.path(), second.path());
    }

    #[test]
    fn test_inline_code_size_limit_counts_characters() {
        let dir = TempDir::new().unwrap();
        let resolver = resolver(&dir);

        // 100 multi-byte characters fit, 101 do not.
        let fits = "é".repeat(100);
        assert!(resolver.resolve(&RunnableSource::inline(fits)).is_ok());

        let too_big = "é".repeat(101);
        assert!(matches!(
            resolver.resolve(&RunnableSource::inline(too_big)),
            Err(ResolveError::TooLarge { size: 101, max: 100 })
        ));
    }

    #[test]
    fn test_missing_path() {
        let dir = TempDir::new().unwrap();
        let resolver = resolver(&dir);

        let missing = dir.path().join("nope.py");
        let err = resolver
            .resolve(&RunnableSource::path(&missing))
            .unwrap_err();
        assert!(matches!(err, ResolveError::NotFound { .. }));
        assert!(err.to_string().contains("nope.py"));
    }

    #[test]
    fn test_directory_is_not_an_agent() {
        let dir = TempDir::new().unwrap();
        let resolver = resolver(&dir);

        assert!(matches!(
            resolver.resolve(&RunnableSource::path(dir.path())),
            Err(ResolveError::NotAFile { .. })
        ));
    }

    #[test]
    fn test_existing_path_is_kept() {
        let dir = TempDir::new().unwrap();
        let resolver = resolver(&dir);

        let agent = dir.path().join("agent.py");
        std::fs::write(&agent, "print('hi')").unwrap();

        let resolved = resolver.resolve(&RunnableSource::path(&agent)).unwrap();
        assert!(!resolved.is_temporary());
        assert_eq!(resolved.path(), std::fs::canonicalize(&agent).unwrap());

        drop(resolved);
        assert!(agent.exists());
    }

    #[test]
    fn test_unwritable_temp_dir() {
        // /proc is readonly dir
        let resolver = SourceResolver::new("/proc/agentrunner_scratch", ".py", 100);
        assert!(matches!(
            resolver.resolve(&RunnableSource::inline("print(1)")),
            Err(ResolveError::Materialize { .. })
        ));
    }
}

//! Sync file naming and parsing.
//!
//! Lock metadata is encoded in the marker file name so that any process can
//! discover and enumerate markers without a separate index:
//!
//! ```text
//! __ofs[ "_r" | "_w" ][ "#" <id> ].sync
//! ```

use std::path::{Path, PathBuf};

use iosync_core::traits::IdProvider;

use crate::id::StringIdProvider;

/// Base token every sync file name starts with.
pub const SYNC_FILE_NAME: &str = "__ofs";

/// Extension of every sync file, including the dot.
pub const SYNC_FILE_EXTENSION: &str = ".sync";

const READ_SUFFIX: &str = "r";
const WRITE_SUFFIX: &str = "w";
const SUFFIX_SEPARATOR: char = '_';
const ID_SEPARATOR: char = '#';

/// Identity of a sync file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncFileNamingContext {
    /// Containing directory.
    pub directory: Option<PathBuf>,
    /// `Some(true)` for read markers, `Some(false)` for write markers and
    /// `None` for the generic marker shared by readers and writers.
    pub is_read_scope: Option<bool>,
    /// Whether the name carries a random identifier segment.
    pub has_id: bool,
}

impl SyncFileNamingContext {
    /// Context for a marker in `directory`.
    pub fn in_directory(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: Some(directory.into()),
            ..Self::default()
        }
    }

    pub fn read_scope(mut self, is_read_scope: Option<bool>) -> Self {
        self.is_read_scope = is_read_scope;
        self
    }

    pub fn with_id(mut self, has_id: bool) -> Self {
        self.has_id = has_id;
        self
    }
}

/// Builds and parses sync file names.
#[derive(Debug, Clone, Default)]
pub struct SyncFileNameService<P = StringIdProvider> {
    id_provider: P,
}

impl<P: IdProvider> SyncFileNameService<P> {
    pub fn new(id_provider: P) -> Self {
        Self { id_provider }
    }

    /// Builds the full marker path for `context`.
    ///
    /// A fresh identifier is drawn from the id provider on every call when
    /// `context.has_id` is set.
    pub fn file_name(&self, context: &SyncFileNamingContext) -> PathBuf {
        let mut file_name = String::from(SYNC_FILE_NAME);
        if let Some(suffix) = scope_suffix(context.is_read_scope) {
            file_name.push(SUFFIX_SEPARATOR);
            file_name.push_str(suffix);
        }

        if context.has_id {
            file_name.push(ID_SEPARATOR);
            file_name.push_str(&self.id_provider.new_id());
        }

        file_name.push_str(SYNC_FILE_EXTENSION);

        match &context.directory {
            Some(directory) => directory.join(file_name),
            None => PathBuf::from(file_name),
        }
    }

    /// Glob matching every marker of the context's scope kind, with any id.
    pub fn search_filter(&self, context: &SyncFileNamingContext) -> String {
        search_filter(context.is_read_scope)
    }

    /// Parses a marker path back into its context.
    ///
    /// Names that do not follow the grammar yield a context with
    /// `is_read_scope == None` and `has_id == false`.
    pub fn parse(&self, path: &Path) -> SyncFileNamingContext {
        parse(path)
    }
}

/// Glob matching every marker of a scope kind.
pub fn search_filter(is_read_scope: Option<bool>) -> String {
    match scope_suffix(is_read_scope) {
        None => format!("{SYNC_FILE_NAME}*{SYNC_FILE_EXTENSION}"),
        Some(suffix) => {
            format!("{SYNC_FILE_NAME}{SUFFIX_SEPARATOR}{suffix}*{SYNC_FILE_EXTENSION}")
        }
    }
}

/// Parses a marker path into its naming context.
pub fn parse(path: &Path) -> SyncFileNamingContext {
    parse_parts(path).unwrap_or_else(|directory| SyncFileNamingContext {
        directory,
        ..SyncFileNamingContext::default()
    })
}

/// Returns `true` when the file name of `path` follows the sync file grammar.
pub fn is_sync_file_name(path: &Path) -> bool {
    parse_parts(path).is_ok()
}

/// Matches a file name against a single-`*` search filter.
pub fn matches_search_filter(file_name: &str, filter: &str) -> bool {
    match filter.split_once('*') {
        Some((prefix, suffix)) => {
            file_name.len() >= prefix.len() + suffix.len()
                && file_name.starts_with(prefix)
                && ends_with_ignore_case(file_name, suffix)
        }
        None => file_name == filter,
    }
}

fn scope_suffix(is_read_scope: Option<bool>) -> Option<&'static str> {
    is_read_scope.map(|is_read| if is_read { READ_SUFFIX } else { WRITE_SUFFIX })
}

fn ends_with_ignore_case(value: &str, suffix: &str) -> bool {
    value.len() >= suffix.len()
        && value.is_char_boundary(value.len() - suffix.len())
        && value[value.len() - suffix.len()..].eq_ignore_ascii_case(suffix)
}

/// On failure returns the directory that was recovered before parsing gave up.
fn parse_parts(path: &Path) -> Result<SyncFileNamingContext, Option<PathBuf>> {
    let extension_matches = path
        .extension()
        .and_then(|extension| extension.to_str())
        .is_some_and(|extension| extension.eq_ignore_ascii_case(&SYNC_FILE_EXTENSION[1..]));
    if !extension_matches {
        return Err(None);
    }

    let directory = if path.is_absolute() {
        path.parent().map(Path::to_path_buf)
    } else {
        None
    };

    let Some(stem) = path.file_stem().and_then(|stem| stem.to_str()) else {
        return Err(directory);
    };

    let Some(rest) = stem.strip_prefix(SYNC_FILE_NAME) else {
        return Err(directory);
    };

    let (scope, has_id) = match rest.split_once(ID_SEPARATOR) {
        Some((scope, _id)) => (scope, true),
        None => (rest, false),
    };

    let is_read_scope = match scope.to_ascii_lowercase().as_str() {
        "" => None,
        "_r" => Some(true),
        "_w" => Some(false),
        _ => return Err(directory),
    };

    Ok(SyncFileNamingContext {
        directory,
        is_read_scope,
        has_id,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedId(&'static str);

    impl IdProvider for FixedId {
        fn new_id(&self) -> String {
            self.0.to_string()
        }
    }

    fn context(is_read_scope: Option<bool>, has_id: bool) -> SyncFileNamingContext {
        SyncFileNamingContext::in_directory("/var/data")
            .read_scope(is_read_scope)
            .with_id(has_id)
    }

    #[test]
    fn test_reading_name_without_id() {
        let names = SyncFileNameService::new(StringIdProvider);
        let path = names.file_name(&context(Some(true), false));
        assert_eq!(path, PathBuf::from("/var/data/__ofs_r.sync"));
    }

    #[test]
    fn test_writing_name_without_id() {
        let names = SyncFileNameService::new(StringIdProvider);
        let path = names.file_name(&context(Some(false), false));
        assert_eq!(path, PathBuf::from("/var/data/__ofs_w.sync"));
    }

    #[test]
    fn test_generic_name_without_id() {
        let names = SyncFileNameService::new(StringIdProvider);
        let path = names.file_name(&context(None, false));
        assert_eq!(path, PathBuf::from("/var/data/__ofs.sync"));
    }

    #[test]
    fn test_names_with_id() {
        for id in ["id", "identifier"] {
            let names = SyncFileNameService::new(FixedId(id));
            assert_eq!(
                names.file_name(&context(None, true)),
                PathBuf::from(format!("/var/data/__ofs#{id}.sync"))
            );
            assert_eq!(
                names.file_name(&context(Some(true), true)),
                PathBuf::from(format!("/var/data/__ofs_r#{id}.sync"))
            );
        }
    }

    #[test]
    fn test_name_without_directory() {
        let names = SyncFileNameService::new(FixedId("ABCD1234"));
        let path = names.file_name(&SyncFileNamingContext::default().read_scope(Some(false)));
        assert_eq!(path, PathBuf::from("__ofs_w.sync"));
    }

    #[test]
    fn test_search_filters() {
        let names = SyncFileNameService::new(StringIdProvider);
        assert_eq!(names.search_filter(&context(Some(false), false)), "__ofs_w*.sync");
        assert_eq!(names.search_filter(&context(Some(true), true)), "__ofs_r*.sync");
        assert_eq!(names.search_filter(&context(None, false)), "__ofs*.sync");
    }

    #[test]
    fn test_parse_write_marker_with_id() {
        let parsed = parse(Path::new("/var/data/__ofs_w#id.sync"));
        assert_eq!(
            parsed,
            SyncFileNamingContext {
                directory: Some(PathBuf::from("/var/data")),
                is_read_scope: Some(false),
                has_id: true,
            }
        );
    }

    #[test]
    fn test_round_trip() {
        let names = SyncFileNameService::new(StringIdProvider);
        for is_read_scope in [Some(true), Some(false), None] {
            for has_id in [true, false] {
                let original = context(is_read_scope, has_id);
                let parsed = names.parse(&names.file_name(&original));
                assert_eq!(parsed, original);
            }
        }
    }

    #[test]
    fn test_relative_path_has_no_directory() {
        let parsed = parse(Path::new("__ofs_r.sync"));
        assert_eq!(parsed.directory, None);
        assert_eq!(parsed.is_read_scope, Some(true));
        assert!(!parsed.has_id);
    }

    #[test]
    fn test_extension_is_case_insensitive() {
        let parsed = parse(Path::new("/var/data/__ofs_R.SYNC"));
        assert_eq!(parsed.is_read_scope, Some(true));
    }

    #[test]
    fn test_unparseable_names() {
        for name in [
            "/var/data/__ofs_r.lock",
            "/var/data/ofs_r.sync",
            "/var/data/__ofs_x.sync",
            "/var/data/__ofs_x#id.sync",
            "/var/data/data.sync",
        ] {
            let parsed = parse(Path::new(name));
            assert_eq!(parsed.is_read_scope, None, "{name}");
            assert!(!parsed.has_id, "{name}");
            assert!(!is_sync_file_name(Path::new(name)), "{name}");
        }

        assert!(is_sync_file_name(Path::new("/var/data/__ofs.sync")));
    }

    #[test]
    fn test_filter_matching() {
        assert!(matches_search_filter("__ofs_r#ABCD1234.sync", "__ofs_r*.sync"));
        assert!(matches_search_filter("__ofs_r.sync", "__ofs_r*.sync"));
        assert!(!matches_search_filter("__ofs_w.sync", "__ofs_r*.sync"));
        assert!(matches_search_filter("__ofs_w.SYNC", "__ofs*.sync"));
        assert!(!matches_search_filter("__ofs.sync.bak", "__ofs*.sync"));
    }
}

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use crate::{
    mapping_table::{MappingEntry, MappingTable},
    observer::{LogEvent, ObserverBus},
    transformation_rule::MappingDocument,
    validation::{validate_document, validate_document_shape},
};

/// Configuration and mapping errors. Any of these aborts the run before the
/// first page is processed.
#[derive(Debug, Error)]
pub enum MappingError {
    #[error("Mapping file not found: {}", path.display())]
    FileNotFound { path: PathBuf },

    #[error("Failed to read mapping file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to fetch mapping source {url}: {message}")]
    Fetch { url: String, message: String },

    #[error("Failed to parse mapping document {origin}: {message}")]
    Parse { origin: String, message: String },

    #[error("Mapping document {origin} is invalid: {details}")]
    SchemaViolation { origin: String, details: String },

    #[error("Unknown function '{name}' referenced by {location}")]
    UnknownFunction { name: String, location: String },

    #[error("Function '{name}' referenced by {location} {message}")]
    InvalidArguments {
        name: String,
        location: String,
        message: String,
    },
}

/// Field separator of a flat mapping file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delimiter {
    Comma,
    Semicolon,
}

impl Delimiter {
    pub fn as_char(self) -> char {
        match self {
            Delimiter::Comma => ',',
            Delimiter::Semicolon => ';',
        }
    }
}

/// Sample the first line only: comma wins over semicolon, neither means the
/// file cannot be split.
pub fn detect_delimiter(first_line: &str) -> Option<Delimiter> {
    if first_line.contains(',') {
        Some(Delimiter::Comma)
    } else if first_line.contains(';') {
        Some(Delimiter::Semicolon)
    } else {
        None
    }
}

/// Result of parsing a flat two-column file
#[derive(Debug, Clone)]
pub struct FlatParse {
    pub table: MappingTable<String, String>,
    pub delimiter: Option<Delimiter>,
}

/// Parse a flat two-column mapping. Rows that do not yield exactly two
/// non-empty fields are dropped and counted.
pub fn parse_flat_table(text: &str) -> FlatParse {
    let first_line = text.lines().next().unwrap_or("");
    let Some(delimiter) = detect_delimiter(first_line) else {
        return FlatParse {
            table: MappingTable::empty(),
            delimiter: None,
        };
    };

    let mut entries = Vec::new();
    let mut skipped = 0;
    for line in text.lines() {
        if line.trim().is_empty() {
            continue;
        }

        let tokens: Vec<&str> = line
            .split(delimiter.as_char())
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .collect();

        match tokens.as_slice() {
            [source, target] => entries.push(MappingEntry {
                source: source.to_string(),
                target: target.to_string(),
            }),
            _ => skipped += 1,
        }
    }

    FlatParse {
        table: MappingTable::new(entries).with_skipped_rows(skipped),
        delimiter: Some(delimiter),
    }
}

/// Parse and validate a layout/web-part mapping document written in YAML
pub fn parse_mapping_document(text: &str, origin: &str) -> Result<(MappingDocument, Vec<String>), MappingError> {
    let raw: serde_json::Value = serde_yaml::from_str(text).map_err(|e| MappingError::Parse {
        origin: origin.to_string(),
        message: e.to_string(),
    })?;

    let shape = validate_document_shape(&raw);
    if shape.has_errors() {
        return Err(MappingError::SchemaViolation {
            origin: origin.to_string(),
            details: shape.error_summary(),
        });
    }

    let doc: MappingDocument = serde_yaml::from_str(text).map_err(|e| MappingError::Parse {
        origin: origin.to_string(),
        message: e.to_string(),
    })?;

    let semantic = validate_document(&doc);
    if semantic.has_errors() {
        return Err(MappingError::SchemaViolation {
            origin: origin.to_string(),
            details: semantic.error_summary(),
        });
    }

    let warnings = semantic
        .warnings
        .into_iter()
        .map(|w| format!("{}: {}", w.path, w.message))
        .collect();
    Ok((doc, warnings))
}

/// Loads mapping tables and documents, reporting through the bus when one is attached
#[derive(Default)]
pub struct MappingLoader<'a> {
    bus: Option<&'a ObserverBus>,
}

impl<'a> MappingLoader<'a> {
    pub fn new() -> Self {
        Self { bus: None }
    }

    pub fn with_bus(mut self, bus: &'a ObserverBus) -> Self {
        self.bus = Some(bus);
        self
    }

    fn log(&self, event: LogEvent) {
        if let Some(bus) = self.bus {
            bus.log(event.with_heading("MappingLoader"));
        }
    }

    fn read(&self, path: &Path) -> Result<String, MappingError> {
        match fs::read_to_string(path) {
            Ok(text) => Ok(text),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                let err = MappingError::FileNotFound {
                    path: path.to_path_buf(),
                };
                self.log(LogEvent::error("Mapping file is missing").with_error(&err));
                Err(err)
            }
            Err(source) => {
                let err = MappingError::Read {
                    path: path.to_path_buf(),
                    source,
                };
                self.log(LogEvent::error("Mapping file could not be read").with_error(&err));
                Err(err)
            }
        }
    }

    /// Load a two-column URL, user, or term mapping file
    pub fn load_flat_table(&self, path: impl AsRef<Path>) -> Result<MappingTable<String, String>, MappingError> {
        let path = path.as_ref();
        let text = self.read(path)?;
        Ok(self.flat_table_from_text(&text, &path.display().to_string()))
    }

    pub fn flat_table_from_text(&self, text: &str, origin: &str) -> MappingTable<String, String> {
        let parsed = parse_flat_table(text);

        if parsed.delimiter.is_none() && !text.trim().is_empty() {
            self.log(LogEvent::warning(format!(
                "Could not determine the delimiter of {}; no mappings loaded",
                origin
            )));
        }
        if parsed.table.skipped_rows() > 0 {
            self.log(LogEvent::warning(format!(
                "Skipped {} malformed row(s) in {}",
                parsed.table.skipped_rows(),
                origin
            )));
        }
        self.log(LogEvent::info(format!(
            "Loaded {} mapping(s) from {}",
            parsed.table.len(),
            origin
        )));

        parsed.table
    }

    /// Load the layout/web-part mapping document
    pub fn load_mapping_document(&self, path: impl AsRef<Path>) -> Result<MappingDocument, MappingError> {
        let path = path.as_ref();
        let text = self.read(path)?;
        self.mapping_document_from_text(&text, &path.display().to_string())
    }

    pub fn mapping_document_from_text(&self, text: &str, origin: &str) -> Result<MappingDocument, MappingError> {
        match parse_mapping_document(text, origin) {
            Ok((doc, warnings)) => {
                for warning in warnings {
                    self.log(LogEvent::warning(warning));
                }
                self.log(LogEvent::info(format!(
                    "Loaded {} layout mapping(s) and {} web part mapping(s) from {}",
                    doc.layouts.len(),
                    doc.web_parts.len(),
                    origin
                )));
                Ok(doc)
            }
            Err(err) => {
                self.log(LogEvent::error("Mapping document rejected").with_error(&err));
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observer::{CountingObserver, Severity};
    use std::io::Write;

    #[test]
    fn test_detect_delimiter() {
        assert_eq!(detect_delimiter("/a,/b"), Some(Delimiter::Comma));
        assert_eq!(detect_delimiter("/a;/b"), Some(Delimiter::Semicolon));
        assert_eq!(detect_delimiter("/a;/b,c"), Some(Delimiter::Comma));
        assert_eq!(detect_delimiter("/a /b"), None);
    }

    #[test]
    fn test_single_line_entry() {
        let parsed = parse_flat_table("/old/page.aspx,/new/page.aspx");
        let entries = parsed.table.entries();

        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].source, "/old/page.aspx");
        assert_eq!(entries[0].target, "/new/page.aspx");
    }

    #[test]
    fn test_n_well_formed_lines_give_n_entries() {
        let text = "a;1\nb;2\nc;3\nd;4\n";
        let parsed = parse_flat_table(text);

        assert_eq!(parsed.delimiter, Some(Delimiter::Semicolon));
        assert_eq!(parsed.table.len(), 4);
        assert_eq!(parsed.table.entries()[3].source, "d");
        assert_eq!(parsed.table.entries()[3].target, "4");
    }

    #[test]
    fn test_malformed_rows_are_dropped() {
        let text = "a,1\njustone\nb,2,extra\n,c,\n\nd,4";
        let parsed = parse_flat_table(text);

        // ",c," has only one non-empty token after discarding empties
        assert_eq!(parsed.table.len(), 2);
        assert_eq!(parsed.table.skipped_rows(), 3);
    }

    #[test]
    fn test_empty_and_undetermined_inputs() {
        assert!(parse_flat_table("").table.is_empty());

        let parsed = parse_flat_table("no delimiter here\na,b");
        assert!(parsed.delimiter.is_none());
        assert!(parsed.table.is_empty());
    }

    #[test]
    fn test_missing_file_is_fatal_and_logged() {
        let counter = CountingObserver::new();
        let bus = ObserverBus::new().with_observer(counter.clone());
        let loader = MappingLoader::new().with_bus(&bus);

        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("urlmapping.csv");
        let result = loader.load_flat_table(&missing);

        let err = result.unwrap_err();
        assert!(err.to_string().contains(&missing.display().to_string()));
        match err {
            MappingError::FileNotFound { path } => assert_eq!(path, missing),
            other => panic!("expected FileNotFound, got {:?}", other),
        }
        assert_eq!(counter.count(Severity::Error), 1);
    }

    #[test]
    fn test_empty_file_loads_empty_table() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let table = MappingLoader::new().load_flat_table(file.path()).unwrap();
        assert!(table.is_empty());
    }

    #[test]
    fn test_skipped_rows_reported_as_warning() {
        let counter = CountingObserver::new();
        let bus = ObserverBus::new().with_observer(counter.clone());
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "jdoe,john@contoso.com").unwrap();
        writeln!(file, "broken").unwrap();

        let table = MappingLoader::new()
            .with_bus(&bus)
            .load_flat_table(file.path())
            .unwrap();

        assert_eq!(table.len(), 1);
        assert_eq!(counter.count(Severity::Warning), 1);
    }

    #[test]
    fn test_mapping_document_schema_failure_is_fatal() {
        let result = parse_mapping_document("layouts:\n  - id: A\n", "inline");
        assert!(matches!(result, Err(MappingError::SchemaViolation { .. })));
    }

    #[test]
    fn test_mapping_document_bad_function_text_is_parse_error() {
        let text = r#"
layouts:
  - id: A
    target_template: T
    fields:
      - field: Title
        placement: { kind: metadata, field: Title }
        function: "NotACall"
"#;
        let result = parse_mapping_document(text, "inline");
        assert!(matches!(result, Err(MappingError::Parse { .. })));
    }

    #[test]
    fn test_mapping_document_loads() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            "layouts:\n  - id: ArticleLeft\n    default: true\n    target_template: Article\n"
        )
        .unwrap();

        let doc = MappingLoader::new().load_mapping_document(file.path()).unwrap();
        assert_eq!(doc.layouts[0].id, "ArticleLeft");
    }
}

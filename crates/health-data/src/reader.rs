//! Streaming access to the export document.
//!
//! [`StreamReader`] pulls element events from the export one at a time through
//! a buffered source, so memory stays flat no matter how large the export is.
//! The source is owned by the reader and released when it is dropped,
//! including when a consumer stops iterating early.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use health_core::error::{HealthError, Result};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use tracing::{debug, info};

// ── ElementEvent ──────────────────────────────────────────────────────────────

/// Kind of markup event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// `<Tag ...>`
    Start,
    /// `<Tag ... />`
    Empty,
    /// `</Tag>`
    End,
}

/// One tag event with its decoded attributes.
#[derive(Debug, Clone, PartialEq)]
pub struct ElementEvent {
    pub kind: EventKind,
    pub name: String,
    /// Attributes in document order. Empty for end tags.
    pub attributes: Vec<(String, String)>,
    /// Byte offset just past the event in the source.
    pub offset: u64,
}

impl ElementEvent {
    /// Value of the attribute `key`, if present.
    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// `true` for start and self-closing tags.
    pub fn opens(&self) -> bool {
        matches!(self.kind, EventKind::Start | EventKind::Empty)
    }
}

// ── StreamReader ──────────────────────────────────────────────────────────────

/// Lazy, finite, non-restartable sequence of element events.
///
/// Yields `Err(MalformedSource)` once and then ends if the markup cannot be
/// tokenized.
pub struct StreamReader<R: BufRead = BufReader<File>> {
    path: PathBuf,
    reader: Reader<R>,
    buf: Vec<u8>,
    depth: usize,
    elements: u64,
    finished: bool,
}

impl StreamReader {
    /// Open `path` for streaming.
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => HealthError::SourceNotFound {
                path: path.to_path_buf(),
            },
            _ => HealthError::Io(e),
        })?;
        if !file.metadata().map(|m| m.is_file()).unwrap_or(false) {
            return Err(HealthError::SourceNotFound {
                path: path.to_path_buf(),
            });
        }

        info!("Streaming export {}", path.display());
        Ok(Self::from_reader(
            path,
            BufReader::with_capacity(64 * 1024, file),
        ))
    }
}

impl<R: BufRead> StreamReader<R> {
    /// Stream from an already open `source`. `path` labels errors.
    pub fn from_reader(path: &Path, source: R) -> Self {
        let mut reader = Reader::from_reader(source);
        let config = reader.config_mut();
        config.trim_text(true);
        config.check_end_names = true;

        Self {
            path: path.to_path_buf(),
            reader,
            buf: Vec::with_capacity(1024),
            depth: 0,
            elements: 0,
            finished: false,
        }
    }

    /// Number of start or self-closing elements yielded so far.
    pub fn elements_read(&self) -> u64 {
        self.elements
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn offset(&self) -> u64 {
        self.reader.buffer_position() as u64
    }

    fn malformed(&self, message: impl Into<String>) -> HealthError {
        HealthError::MalformedSource {
            path: self.path.clone(),
            offset: self.offset(),
            message: message.into(),
        }
    }

    fn element(&self, kind: EventKind, tag: &BytesStart<'_>) -> Result<ElementEvent> {
        let name = String::from_utf8(tag.name().as_ref().to_vec())
            .map_err(|e| self.malformed(format!("tag name is not UTF-8: {}", e)))?;

        let mut attributes = Vec::new();
        for attr in tag.attributes() {
            let attr = attr.map_err(|e| self.malformed(format!("bad attribute in <{}>: {}", name, e)))?;
            let key = String::from_utf8(attr.key.as_ref().to_vec())
                .map_err(|e| self.malformed(format!("attribute name is not UTF-8: {}", e)))?;
            let value = attr
                .unescape_value()
                .map_err(|e| self.malformed(format!("bad value for `{}`: {}", key, e)))?
                .into_owned();
            attributes.push((key, value));
        }

        Ok(ElementEvent {
            kind,
            name,
            attributes,
            offset: self.offset(),
        })
    }

    fn next_event(&mut self) -> Option<Result<ElementEvent>> {
        loop {
            self.buf.clear();
            let read = match self.reader.read_event_into(&mut self.buf) {
                Ok(ev) => Ok(ev.into_owned()),
                Err(e) => Err(e.to_string()),
            };
            let event = match read {
                Ok(ev) => ev,
                Err(message) => return Some(Err(self.malformed(message))),
            };

            match event {
                Event::Start(tag) => {
                    self.depth += 1;
                    self.elements += 1;
                    return Some(self.element(EventKind::Start, &tag));
                }
                Event::Empty(tag) => {
                    self.elements += 1;
                    return Some(self.element(EventKind::Empty, &tag));
                }
                Event::End(tag) => {
                    self.depth = self.depth.saturating_sub(1);
                    let name = String::from_utf8_lossy(tag.name().as_ref()).into_owned();
                    return Some(Ok(ElementEvent {
                        kind: EventKind::End,
                        name,
                        attributes: Vec::new(),
                        offset: self.offset(),
                    }));
                }
                Event::Eof => {
                    if self.depth > 0 {
                        return Some(Err(self.malformed(format!(
                            "unexpected end of document with {} unclosed element(s)",
                            self.depth
                        ))));
                    }
                    debug!(
                        "Finished {} after {} elements",
                        self.path.display(),
                        self.elements
                    );
                    return None;
                }
                // Text, comments, DOCTYPE, declarations and processing
                // instructions carry no records.
                _ => continue,
            }
        }
    }
}

impl<R: BufRead> Iterator for StreamReader<R> {
    type Item = Result<ElementEvent>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        let item = self.next_event();
        if !matches!(item, Some(Ok(_))) {
            self.finished = true;
        }
        item
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use tempfile::TempDir;

    fn write_xml(dir: &Path, body: &str) -> PathBuf {
        let path = dir.join("export.xml");
        std::fs::write(&path, body).unwrap();
        path
    }

    const SAMPLE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE HealthData [
<!ELEMENT HealthData (Record*)>
]>
<HealthData locale="en_GB">
 <ExportDate value="2024-03-01 10:00:00 +0000"/>
 <Record type="HKQuantityTypeIdentifierStepCount" sourceName="Emma&apos;s iPhone" unit="count" value="120" startDate="2024-02-01 08:00:00 +0000" endDate="2024-02-01 08:10:00 +0000"/>
 <Record type="HKQuantityTypeIdentifierStepCount" sourceName="Watch" unit="count" value="80" startDate="2024-02-01 09:00:00 +0000" endDate="2024-02-01 09:05:00 +0000">
  <MetadataEntry key="HKMetadataKeySyncVersion" value="2"/>
 </Record>
</HealthData>
"#;

    // ── open ──────────────────────────────────────────────────────────────────

    #[test]
    fn test_open_missing_file() {
        let tmp = TempDir::new().unwrap();
        let err = StreamReader::open(&tmp.path().join("missing.xml"))
            .err()
            .expect("must fail");
        assert!(matches!(err, HealthError::SourceNotFound { .. }));
    }

    #[test]
    fn test_open_directory_is_not_found() {
        let tmp = TempDir::new().unwrap();
        assert!(StreamReader::open(tmp.path()).is_err());
    }

    // ── iteration ─────────────────────────────────────────────────────────────

    #[test]
    fn test_streams_elements_in_document_order() {
        let tmp = TempDir::new().unwrap();
        let path = write_xml(tmp.path(), SAMPLE);

        let events: Vec<ElementEvent> = StreamReader::open(&path)
            .unwrap()
            .collect::<Result<_>>()
            .unwrap();

        let opened: Vec<&str> = events
            .iter()
            .filter(|e| e.opens())
            .map(|e| e.name.as_str())
            .collect();
        assert_eq!(
            opened,
            vec!["HealthData", "ExportDate", "Record", "Record", "MetadataEntry"]
        );
        assert_eq!(events.last().unwrap().kind, EventKind::End);
        assert_eq!(events.last().unwrap().name, "HealthData");
    }

    #[test]
    fn test_attributes_are_unescaped() {
        let tmp = TempDir::new().unwrap();
        let path = write_xml(tmp.path(), SAMPLE);

        let record = StreamReader::open(&path)
            .unwrap()
            .filter_map(|e| e.ok())
            .find(|e| e.name == "Record")
            .unwrap();
        assert_eq!(record.kind, EventKind::Empty);
        assert_eq!(record.attr("sourceName"), Some("Emma's iPhone"));
        assert_eq!(record.attr("value"), Some("120"));
        assert_eq!(record.attr("nope"), None);
    }

    #[test]
    fn test_counts_elements() {
        let tmp = TempDir::new().unwrap();
        let path = write_xml(tmp.path(), SAMPLE);
        let mut reader = StreamReader::open(&path).unwrap();
        for ev in reader.by_ref() {
            ev.unwrap();
        }
        assert_eq!(reader.elements_read(), 5);
    }

    // ── malformed input ───────────────────────────────────────────────────────

    #[test]
    fn test_unterminated_document_is_malformed() {
        let tmp = TempDir::new().unwrap();
        let path = write_xml(
            tmp.path(),
            r#"<HealthData><Record type="x" value="1" startDate="2024-01-01 00:00:00 +0000"/>"#,
        );

        let results: Vec<Result<ElementEvent>> = StreamReader::open(&path).unwrap().collect();
        let last = results.last().unwrap();
        assert!(matches!(last, Err(HealthError::MalformedSource { .. })));
        // Iteration stops after the error.
        assert_eq!(results.iter().filter(|r| r.is_err()).count(), 1);
    }

    #[test]
    fn test_mismatched_end_tag_is_malformed() {
        let tmp = TempDir::new().unwrap();
        let path = write_xml(tmp.path(), "<HealthData><Record></Workout></HealthData>");

        let err = StreamReader::open(&path)
            .unwrap()
            .find_map(|r| r.err())
            .expect("must fail");
        match err {
            HealthError::MalformedSource { path: p, .. } => assert_eq!(p, path),
            other => panic!("unexpected error {:?}", other),
        }
    }

    /// Source that records when it is dropped.
    struct TrackedSource {
        inner: std::io::Cursor<&'static str>,
        dropped: Arc<AtomicBool>,
    }

    impl std::io::Read for TrackedSource {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            std::io::Read::read(&mut self.inner, buf)
        }
    }

    impl Drop for TrackedSource {
        fn drop(&mut self) {
            self.dropped.store(true, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_early_drop_releases_source() {
        let dropped = Arc::new(AtomicBool::new(false));
        let source = TrackedSource {
            inner: std::io::Cursor::new(SAMPLE),
            dropped: Arc::clone(&dropped),
        };
        let mut reader = StreamReader::from_reader(Path::new("export.xml"), BufReader::new(source));

        let first = reader.next().unwrap().unwrap();
        assert_eq!(first.name, "HealthData");
        assert!(!dropped.load(Ordering::SeqCst));

        drop(reader);
        assert!(dropped.load(Ordering::SeqCst));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_early_drop_closes_file_descriptor() {
        let tmp = TempDir::new().unwrap();
        let path = write_xml(tmp.path(), SAMPLE);
        let target = std::fs::canonicalize(&path).unwrap();
        let open_on_export = || {
            std::fs::read_dir("/proc/self/fd")
                .unwrap()
                .filter_map(|e| e.ok())
                .filter_map(|e| std::fs::read_link(e.path()).ok())
                .filter(|link| *link == target)
                .count()
        };

        let mut reader = StreamReader::open(&path).unwrap();
        let _first = reader.next();
        assert_eq!(open_on_export(), 1);
        drop(reader);
        assert_eq!(open_on_export(), 0);
    }

    #[test]
    fn test_from_reader_labels_errors_with_path() {
        let source = std::io::Cursor::new("<HealthData><Record>");
        let err = StreamReader::from_reader(Path::new("inline.xml"), source)
            .find_map(|r| r.err())
            .expect("must fail");
        match err {
            HealthError::MalformedSource { path, .. } => assert_eq!(path, Path::new("inline.xml")),
            other => panic!("unexpected error {:?}", other),
        }
    }
}

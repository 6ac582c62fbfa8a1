use burrow_core::{MappingRecord, Result, StorageError};
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, error, warn};

/// File operations the log relies on beyond [`Write`].
pub(crate) trait LogFile: Write {
    fn size(&self) -> io::Result<u64>;
    fn truncate(&mut self, len: u64) -> io::Result<()>;
    fn sync(&self) -> io::Result<()>;
}

impl LogFile for File {
    fn size(&self) -> io::Result<u64> {
        Ok(self.metadata()?.len())
    }

    fn truncate(&mut self, len: u64) -> io::Result<()> {
        self.set_len(len)
    }

    fn sync(&self) -> io::Result<()> {
        self.sync_data()
    }
}

/// Append-only JSON-lines log backing the in-memory store.
///
/// Each line holds one [`MappingRecord`]. Creates, upserts and tombstones
/// share the same shape; replaying the lines in order rebuilds the index.
///
/// Writes go straight to the file. A failed append is cut back to the
/// length the file had before it, so nothing reported as failed is ever
/// replayed. If that cut fails as well the log refuses further appends.
#[derive(Debug)]
pub(crate) struct AppendLog<F = File> {
    path: PathBuf,
    file: F,
    poisoned: bool,
}

impl AppendLog<File> {
    /// Opens (or creates) the log at `path` and returns every record it holds.
    ///
    /// A torn final line, left behind by a crash in the middle of an append,
    /// is cut off. A malformed line anywhere else fails the open.
    pub(crate) fn open(path: impl AsRef<Path>) -> Result<(Self, Vec<MappingRecord>)> {
        let path = path.as_ref().to_path_buf();
        let mut file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(&path)
            .map_err(|e| {
                StorageError::Unavailable(format!("open log {}: {e}", path.display()))
            })?;

        let mut content = Vec::new();
        file.read_to_end(&mut content)?;

        let (records, valid_len) = parse(&path, &content)?;
        if valid_len < content.len() {
            warn!(
                path = %path.display(),
                dropped_bytes = content.len() - valid_len,
                "truncating torn record at end of log"
            );
            file.set_len(valid_len as u64)?;
        } else if !content.is_empty() && !content.ends_with(b"\n") {
            // The last record parsed but lost its terminator.
            file.write_all(b"\n")?;
        }

        debug!(path = %path.display(), records = records.len(), "replayed log");

        Ok((
            Self {
                path,
                file,
                poisoned: false,
            },
            records,
        ))
    }

    #[cfg(test)]
    pub(crate) fn replace_file(&mut self, file: File) {
        self.file = file;
    }
}

impl<F: LogFile> AppendLog<F> {
    /// Appends `records` as one write.
    ///
    /// On error the file is restored to its previous length and
    /// `Unavailable` is returned; the caller must not apply the batch.
    pub(crate) fn append(&mut self, records: &[MappingRecord]) -> Result<()> {
        if self.poisoned {
            return Err(StorageError::Unavailable(format!(
                "log {} holds an unrecoverable partial write",
                self.path.display()
            )));
        }

        let mut buf = Vec::with_capacity(records.len() * 128);
        for record in records {
            serde_json::to_writer(&mut buf, record)
                .map_err(|e| StorageError::InvalidData(format!("encode record: {e}")))?;
            buf.push(b'\n');
        }

        let start = self.file.size()?;
        if let Err(err) = self
            .file
            .write_all(&buf)
            .and_then(|()| self.file.flush())
        {
            self.roll_back(start);
            return Err(StorageError::Unavailable(format!(
                "append to log {}: {err}",
                self.path.display()
            )));
        }
        Ok(())
    }

    fn roll_back(&mut self, len: u64) {
        let restored = match self.file.size() {
            Ok(size) if size == len => Ok(()),
            _ => self.file.truncate(len),
        };

        match restored {
            Ok(()) => warn!(path = %self.path.display(), len, "rolled back failed append"),
            Err(err) => {
                error!(
                    path = %self.path.display(),
                    error = %err,
                    "failed to roll back partial append, refusing further writes"
                );
                self.poisoned = true;
            }
        }
    }

    /// Syncs file data to disk.
    pub(crate) fn sync(&mut self) -> Result<()> {
        self.file.flush()?;
        self.file.sync()?;
        Ok(())
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }
}

/// Parses the log content, returning the records and the length of the valid prefix.
fn parse(path: &Path, content: &[u8]) -> Result<(Vec<MappingRecord>, usize)> {
    let mut records = Vec::new();
    let mut offset = 0;

    for (line_no, line) in content.split_inclusive(|b| *b == b'\n').enumerate() {
        let complete = line.ends_with(b"\n");
        let body = line.strip_suffix(b"\n").unwrap_or(line);

        if body.iter().all(u8::is_ascii_whitespace) {
            offset += line.len();
            continue;
        }

        match serde_json::from_slice::<MappingRecord>(body) {
            Ok(record) => records.push(record),
            Err(_) if !complete => return Ok((records, offset)),
            Err(e) => {
                return Err(StorageError::InvalidData(format!(
                    "{}:{}: {e}",
                    path.display(),
                    line_no + 1
                )))
            }
        }
        offset += line.len();
    }

    Ok((records, offset))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(code: &str, url: &str) -> MappingRecord {
        MappingRecord::new("u1", code, url)
    }

    /// In-memory file that accepts `budget` more bytes, then fails.
    #[derive(Debug, Default)]
    struct ShortFile {
        data: Vec<u8>,
        budget: usize,
        truncate_fails: bool,
    }

    impl Write for ShortFile {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.budget == 0 {
                return Err(io::Error::other("no space left on device"));
            }
            let n = buf.len().min(self.budget);
            self.data.extend_from_slice(&buf[..n]);
            self.budget -= n;
            Ok(n)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl LogFile for ShortFile {
        fn size(&self) -> io::Result<u64> {
            Ok(self.data.len() as u64)
        }

        fn truncate(&mut self, len: u64) -> io::Result<()> {
            if self.truncate_fails {
                return Err(io::Error::other("read-only file system"));
            }
            self.data.truncate(len as usize);
            Ok(())
        }

        fn sync(&self) -> io::Result<()> {
            Ok(())
        }
    }

    fn short_log(budget: usize) -> AppendLog<ShortFile> {
        AppendLog {
            path: PathBuf::from("urls.json"),
            file: ShortFile {
                budget,
                ..ShortFile::default()
            },
            poisoned: false,
        }
    }

    fn codes_in(data: &[u8]) -> Vec<String> {
        let (records, len) = parse(Path::new("urls.json"), data).unwrap();
        assert_eq!(len, data.len(), "log must not hold a torn line");
        records.into_iter().map(|r| r.short_code).collect()
    }

    #[test]
    fn failed_append_leaves_no_bytes_behind() {
        let mut log = short_log(usize::MAX);
        log.append(&[record("a1", "http://a.example")]).unwrap();
        let committed = log.file.data.len();

        log.file.budget = 10;
        let err = log
            .append(&[record("b2", "http://b.example")])
            .unwrap_err();
        assert!(matches!(err, StorageError::Unavailable(_)));
        assert_eq!(log.file.data.len(), committed);

        log.file.budget = usize::MAX;
        log.append(&[record("c3", "http://c.example")]).unwrap();
        assert_eq!(codes_in(&log.file.data), ["a1", "c3"]);
    }

    #[test]
    fn failed_rollback_refuses_further_appends() {
        let mut log = short_log(usize::MAX);
        log.append(&[record("a1", "http://a.example")]).unwrap();
        let committed = log.file.data.clone();

        log.file.budget = 10;
        log.file.truncate_fails = true;
        assert!(log.append(&[record("b2", "http://b.example")]).is_err());

        log.file.budget = usize::MAX;
        let err = log
            .append(&[record("c3", "http://c.example")])
            .unwrap_err();
        assert!(err.is_transient());
        assert_eq!(&log.file.data[..committed.len()], committed.as_slice());
        assert_eq!(log.file.data.len(), committed.len() + 10);
    }

    #[test]
    fn append_then_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("urls.json");

        let (mut log, records) = AppendLog::open(&path).unwrap();
        assert!(records.is_empty());
        log.append(&[record("a1", "http://a.example"), record("b2", "http://b.example")])
            .unwrap();
        drop(log);

        let (_, records) = AppendLog::open(&path).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].short_code, "a1");
        assert_eq!(records[1].original_url, "http://b.example");
    }

    #[test]
    fn torn_tail_is_truncated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("urls.json");

        let (mut log, _) = AppendLog::open(&path).unwrap();
        log.append(&[record("a1", "http://a.example")]).unwrap();
        drop(log);

        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(br#"{"uuid":"2","short_url":"b2","orig"#).unwrap();
        drop(file);

        let (mut log, records) = AppendLog::open(&path).unwrap();
        assert_eq!(records.len(), 1);

        log.append(&[record("c3", "http://c.example")]).unwrap();
        drop(log);

        let (_, records) = AppendLog::open(&path).unwrap();
        let codes: Vec<_> = records.iter().map(|r| r.short_code.as_str()).collect();
        assert_eq!(codes, ["a1", "c3"]);
    }

    #[test]
    fn unterminated_but_complete_tail_is_kept() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("urls.json");
        std::fs::write(&path, r#"{"short_url":"a1","original_url":"http://a.example"}"#).unwrap();

        let (mut log, records) = AppendLog::open(&path).unwrap();
        assert_eq!(records.len(), 1);
        log.append(&[record("b2", "http://b.example")]).unwrap();
        drop(log);

        let (_, records) = AppendLog::open(&path).unwrap();
        assert_eq!(records.len(), 2);
    }

    #[test]
    fn corrupt_middle_line_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("urls.json");
        std::fs::write(
            &path,
            "not json\n{\"short_url\":\"a1\",\"original_url\":\"http://a.example\"}\n",
        )
        .unwrap();

        let err = AppendLog::open(&path).unwrap_err();
        assert!(matches!(err, StorageError::InvalidData(ref msg) if msg.contains(":1:")));
    }

    #[test]
    fn blank_lines_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("urls.json");
        std::fs::write(
            &path,
            "\n{\"short_url\":\"a1\",\"original_url\":\"http://a.example\"}\n\n",
        )
        .unwrap();

        let (_, records) = AppendLog::open(&path).unwrap();
        assert_eq!(records.len(), 1);
    }
}

//! Hash-verified atomic database writer.
//!
//! ## `LocalFileWriter::write` — 6-step protocol
//!
//! 1. Stream the payload into `<edition>.mmdb.temp`, hashing as it is copied.
//!    A failing payload stream is a [`WriteError::Transfer`]; a failing temp
//!    file is a [`WriteError::Io`].
//! 2. Compare the MD5 with the announced hash (case-insensitive) → abort if different.
//! 3. `fsync` the temp file.
//! 4. Rename to `<edition>.mmdb` (atomic on POSIX).
//! 5. `fsync` the database directory so the rename itself is durable.
//! 6. Optionally stamp the remote modification time onto the file.
//!
//! Any failure before step 4 removes the temp file and leaves the installed
//! database untouched.

use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{self, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use filetime::FileTime;
use md5::{Digest, Md5};

use geoupdate_core::{EditionId, ZERO_MD5};

use crate::error::{io_err, WriteError};

const TEMP_SUFFIX: &str = "temp";
const COPY_BUF_SIZE: usize = 64 * 1024;

// ---------------------------------------------------------------------------
// ReadResult
// ---------------------------------------------------------------------------

/// A freshly fetched database payload and the metadata needed to install it.
///
/// Owned by value: whoever consumes it drops the stream exactly once.
pub struct ReadResult {
    pub edition_id: EditionId,
    pub reader: Box<dyn Read + Send>,
    /// Hash of the local file the fetch was conditioned on.
    pub old_hash: String,
    /// Hash announced by the update service for `reader`'s content.
    pub new_hash: String,
    pub modified_at: DateTime<Utc>,
}

impl fmt::Debug for ReadResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReadResult")
            .field("edition_id", &self.edition_id)
            .field("old_hash", &self.old_hash)
            .field("new_hash", &self.new_hash)
            .field("modified_at", &self.modified_at)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// DatabaseWriter
// ---------------------------------------------------------------------------

/// Installs downloaded databases and reports the hash of installed ones.
///
/// Implementations must be safe to call concurrently for *distinct* editions.
pub trait DatabaseWriter: Send + Sync {
    fn write(&self, result: ReadResult) -> Result<(), WriteError>;

    /// MD5 hex digest of the installed database, or [`ZERO_MD5`] if none.
    fn get_hash(&self, edition: &EditionId) -> Result<String, WriteError>;
}

/// Writes databases as `<dir>/<edition>.mmdb`.
#[derive(Debug, Clone)]
pub struct LocalFileWriter {
    dir: PathBuf,
    preserve_file_times: bool,
}

impl LocalFileWriter {
    /// Create a writer rooted at `dir`, creating the directory if needed.
    pub fn new(dir: impl Into<PathBuf>, preserve_file_times: bool) -> Result<Self, WriteError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|e| io_err(&dir, e))?;
        Ok(Self {
            dir,
            preserve_file_times,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// `<dir>/<edition>.mmdb` — pure, no I/O.
    pub fn file_path(&self, edition: &EditionId) -> PathBuf {
        self.dir.join(edition.file_name())
    }

    fn temp_path(&self, edition: &EditionId) -> PathBuf {
        self.dir.join(format!("{}.{TEMP_SUFFIX}", edition.file_name()))
    }

    fn install(&self, result: ReadResult, tmp: &Path, path: &Path) -> Result<(), WriteError> {
        let ReadResult {
            edition_id,
            mut reader,
            new_hash,
            modified_at,
            ..
        } = result;

        // Step 1: stream into the temp file.
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(tmp)
            .map_err(|e| io_err(tmp, e))?;
        let mut sink = HashingWriter::new(file);
        let mut buf = vec![0u8; COPY_BUF_SIZE];
        loop {
            let n = match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(source) => {
                    return Err(WriteError::Transfer {
                        edition: edition_id,
                        source,
                    })
                }
            };
            sink.write_all(&buf[..n]).map_err(|e| io_err(tmp, e))?;
        }
        drop(reader);
        let (file, actual) = sink.finish();

        // Step 2: verify.
        if !actual.eq_ignore_ascii_case(&new_hash) {
            return Err(WriteError::Integrity {
                edition: edition_id,
                expected: new_hash,
                actual,
            });
        }

        // Step 3 + 4: durable temp, then atomic rename.
        file.sync_all().map_err(|e| io_err(tmp, e))?;
        drop(file);
        fs::rename(tmp, path).map_err(|e| io_err(path, e))?;

        // Step 5.
        sync_dir(&self.dir)?;

        // Step 6.
        if self.preserve_file_times {
            let time = FileTime::from_unix_time(
                modified_at.timestamp(),
                modified_at.timestamp_subsec_nanos(),
            );
            filetime::set_file_times(path, time, time).map_err(|e| io_err(path, e))?;
        }

        tracing::info!("database {} updated: {}", edition_id, actual);
        Ok(())
    }
}

impl DatabaseWriter for LocalFileWriter {
    fn write(&self, result: ReadResult) -> Result<(), WriteError> {
        let path = self.file_path(&result.edition_id);
        let tmp = self.temp_path(&result.edition_id);

        let outcome = self.install(result, &tmp, &path);
        if outcome.is_err() {
            match fs::remove_file(&tmp) {
                Ok(()) => {}
                Err(err) if err.kind() == ErrorKind::NotFound => {}
                Err(err) => tracing::warn!("could not remove {}: {}", tmp.display(), err),
            }
        }
        outcome
    }

    fn get_hash(&self, edition: &EditionId) -> Result<String, WriteError> {
        let path = self.file_path(edition);
        let mut file = match File::open(&path) {
            Ok(file) => file,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                tracing::debug!("no database at {}", path.display());
                return Ok(ZERO_MD5.to_string());
            }
            Err(err) => return Err(io_err(&path, err)),
        };

        let mut hasher = Md5::new();
        io::copy(&mut file, &mut hasher).map_err(|e| io_err(&path, e))?;
        let hash = hex::encode(hasher.finalize());
        tracing::debug!("calculated MD5 of {}: {}", path.display(), hash);
        Ok(hash)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// `Write` adapter that feeds every byte written through MD5.
struct HashingWriter<W> {
    inner: W,
    hasher: Md5,
}

impl<W: Write> HashingWriter<W> {
    fn new(inner: W) -> Self {
        Self {
            inner,
            hasher: Md5::new(),
        }
    }

    fn finish(self) -> (W, String) {
        (self.inner, hex::encode(self.hasher.finalize()))
    }
}

impl<W: Write> Write for HashingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.hasher.update(&buf[..n]);
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

#[cfg(unix)]
fn sync_dir(dir: &Path) -> Result<(), WriteError> {
    File::open(dir)
        .and_then(|d| d.sync_all())
        .map_err(|e| io_err(dir, e))
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> Result<(), WriteError> {
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rstest::rstest;
    use std::io::Cursor;
    use std::time::{Duration, SystemTime};
    use tempfile::TempDir;

    const CONTENT: &str = "database content";
    const CONTENT_MD5: &str = "cfa36ddc8279b5483a5aa25e9a6151f4";

    fn test_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2023, 4, 10, 12, 47, 31).unwrap()
    }

    fn read_result(content: &str, new_hash: &str) -> ReadResult {
        ReadResult {
            edition_id: EditionId::from("GeoIP2-City"),
            reader: Box::new(Cursor::new(content.as_bytes().to_vec())),
            old_hash: String::new(),
            new_hash: new_hash.to_string(),
            modified_at: test_time(),
        }
    }

    fn mtime(path: &Path) -> SystemTime {
        fs::metadata(path).unwrap().modified().unwrap()
    }

    /// Yields `good` bytes, then fails like a dropped connection.
    struct BrokenReader {
        good: Cursor<Vec<u8>>,
    }

    impl Read for BrokenReader {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.good.read(buf)? {
                0 => Err(io::Error::new(ErrorKind::ConnectionReset, "connection reset")),
                n => Ok(n),
            }
        }
    }

    #[rstest]
    #[case::success(CONTENT_MD5, true, true)]
    #[case::hash_does_not_match("badhash", true, false)]
    #[case::hash_case_does_not_matter("CFA36DDC8279B5483A5AA25E9A6151F4", true, true)]
    #[case::do_not_preserve_file_time(CONTENT_MD5, false, true)]
    fn write_cases(#[case] new_hash: &str, #[case] preserve: bool, #[case] should_succeed: bool) {
        let tmp = TempDir::new().unwrap();
        let writer = LocalFileWriter::new(tmp.path(), preserve).unwrap();
        let result = read_result(CONTENT, new_hash);
        let path = writer.file_path(&result.edition_id);

        let outcome = writer.write(result);
        assert_eq!(outcome.is_ok(), should_succeed, "outcome: {outcome:?}");
        if !should_succeed {
            assert!(matches!(outcome, Err(WriteError::Integrity { .. })));
            assert!(!path.exists(), "failed write must not install a file");
            return;
        }

        let modified: DateTime<Utc> = mtime(&path).into();
        if preserve {
            assert_eq!(modified, test_time());
        } else {
            assert_ne!(modified, test_time());
        }
    }

    #[test]
    fn unpreserved_mtime_is_time_of_write() {
        let tmp = TempDir::new().unwrap();
        let writer = LocalFileWriter::new(tmp.path(), false).unwrap();
        let before = SystemTime::now() - Duration::from_secs(2);
        writer.write(read_result(CONTENT, CONTENT_MD5)).unwrap();
        let after = SystemTime::now() + Duration::from_secs(2);

        let written = mtime(&writer.file_path(&EditionId::from("GeoIP2-City")));
        assert!(written >= before && written <= after);
    }

    #[test]
    fn get_hash_of_written_database() {
        let tmp = TempDir::new().unwrap();
        let writer = LocalFileWriter::new(tmp.path(), false).unwrap();
        writer.write(read_result(CONTENT, CONTENT_MD5)).unwrap();

        let hash = writer.get_hash(&EditionId::from("GeoIP2-City")).unwrap();
        assert_eq!(hash, CONTENT_MD5);
    }

    #[test]
    fn get_hash_of_missing_edition_is_zero_md5() {
        let tmp = TempDir::new().unwrap();
        let writer = LocalFileWriter::new(tmp.path(), false).unwrap();
        let hash = writer.get_hash(&EditionId::from("NewEdition")).unwrap();
        assert_eq!(hash, ZERO_MD5);
    }

    #[test]
    #[cfg(unix)]
    fn get_hash_surfaces_non_missing_io_errors() {
        let tmp = TempDir::new().unwrap();
        let writer = LocalFileWriter::new(tmp.path(), false).unwrap();
        // A directory where the database file should be cannot be read as one.
        fs::create_dir(writer.file_path(&EditionId::from("GeoIP2-City"))).unwrap();

        let err = writer.get_hash(&EditionId::from("GeoIP2-City")).unwrap_err();
        assert!(matches!(err, WriteError::Io { .. }), "got: {err}");
    }

    #[test]
    fn integrity_failure_leaves_previous_database_intact() {
        let tmp = TempDir::new().unwrap();
        let writer = LocalFileWriter::new(tmp.path(), false).unwrap();
        writer.write(read_result(CONTENT, CONTENT_MD5)).unwrap();
        let path = writer.file_path(&EditionId::from("GeoIP2-City"));

        let err = writer
            .write(read_result("tampered content", CONTENT_MD5))
            .unwrap_err();
        assert!(matches!(err, WriteError::Integrity { .. }));

        assert_eq!(fs::read_to_string(&path).unwrap(), CONTENT);
        assert_eq!(
            writer.get_hash(&EditionId::from("GeoIP2-City")).unwrap(),
            CONTENT_MD5
        );
        assert!(!writer.temp_path(&EditionId::from("GeoIP2-City")).exists());
    }

    #[test]
    fn interrupted_stream_leaves_previous_database_intact() {
        let _ = env_logger::builder().is_test(true).try_init();
        let tmp = TempDir::new().unwrap();
        let writer = LocalFileWriter::new(tmp.path(), false).unwrap();
        writer.write(read_result(CONTENT, CONTENT_MD5)).unwrap();

        let mut broken = read_result("", "0123456789abcdef0123456789abcdef");
        broken.reader = Box::new(BrokenReader {
            good: Cursor::new(b"half a datab".to_vec()),
        });
        let err = writer.write(broken).unwrap_err();
        match &err {
            WriteError::Transfer { edition, source } => {
                assert_eq!(edition.as_str(), "GeoIP2-City");
                assert_eq!(source.kind(), ErrorKind::ConnectionReset);
            }
            other => panic!("expected a transfer error, got: {other}"),
        }
        assert!(!err.to_string().contains(".temp"), "{err}");

        let edition = EditionId::from("GeoIP2-City");
        assert_eq!(writer.get_hash(&edition).unwrap(), CONTENT_MD5);
        assert!(!writer.temp_path(&edition).exists(), "temp file must be cleaned up");
    }

    #[test]
    fn temp_file_removed_after_successful_write() {
        let tmp = TempDir::new().unwrap();
        let writer = LocalFileWriter::new(tmp.path(), false).unwrap();
        writer.write(read_result(CONTENT, CONTENT_MD5)).unwrap();

        let entries: Vec<_> = fs::read_dir(tmp.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(entries, vec!["GeoIP2-City.mmdb".to_string()]);
    }

    #[test]
    fn new_creates_database_directory() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("share").join("GeoIP");
        let writer = LocalFileWriter::new(&dir, false).unwrap();
        assert!(dir.is_dir());
        assert_eq!(writer.dir(), dir.as_path());
    }

    #[test]
    #[cfg(unix)]
    fn readonly_directory_leaves_original_database() {
        use std::os::unix::fs::PermissionsExt;

        let root = TempDir::new().unwrap();
        let writer = LocalFileWriter::new(root.path().join("db"), false).unwrap();
        writer.write(read_result(CONTENT, CONTENT_MD5)).unwrap();

        let mut perms = fs::metadata(writer.dir()).unwrap().permissions();
        perms.set_mode(0o555);
        fs::set_permissions(writer.dir(), perms).unwrap();

        let outcome = writer.write(read_result("new content", "e4c8d8ad5b5b8a9e2ae6c58ddef6fd48"));

        let mut perms = fs::metadata(writer.dir()).unwrap().permissions();
        perms.set_mode(0o755);
        fs::set_permissions(writer.dir(), perms).unwrap();

        // Root bypasses the permission check; the bogus hash still rejects the payload.
        let err = outcome.unwrap_err();
        assert!(matches!(err, WriteError::Io { .. } | WriteError::Integrity { .. }));
        assert_eq!(
            fs::read_to_string(writer.file_path(&EditionId::from("GeoIP2-City"))).unwrap(),
            CONTENT
        );
    }
}

//! Running a whole manifest through the fetcher.
//!
//! Items are independent. The default is one item at a time in file order;
//! with `jobs > 1` a bounded pool of worker threads pulls items from a shared
//! queue. A digest mismatch always stops the batch. Transport-class failures
//! either stop it or are recorded and skipped, depending on
//! [`TransportFailurePolicy`].

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Mutex;

use crate::fetcher::{FetchError, FetchOutcome, Fetcher};
use crate::manifest::{Manifest, PackageEntry};

/// What to do when an item fails for a reason other than a digest mismatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransportFailurePolicy {
    /// Stop the batch and return the error.
    #[default]
    Abort,
    /// Log a warning, record the failure and go on with the next item.
    Continue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchOptions {
    /// Maximum number of items fetched at once (1 = sequential).
    pub jobs: usize,
    pub transport_failures: TransportFailurePolicy,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            jobs: 1,
            transport_failures: TransportFailurePolicy::Abort,
        }
    }
}

/// Emitted before an item is processed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressLine<'a> {
    /// 1-based position in the manifest.
    pub index: usize,
    pub total: usize,
    pub name: &'a str,
}

impl std::fmt::Display for ProgressLine<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}/{}) {}", self.index, self.total, self.name)
    }
}

/// Tally of a finished (or continued-past-failure) batch.
#[derive(Debug, Default)]
pub struct BatchReport {
    pub fetched: usize,
    pub skipped: usize,
    /// Failures recorded under [`TransportFailurePolicy::Continue`].
    pub failures: Vec<FetchError>,
}

impl BatchReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    fn record(&mut self, outcome: FetchOutcome) {
        match outcome {
            FetchOutcome::Skipped => self.skipped += 1,
            FetchOutcome::Fetched { .. } => self.fetched += 1,
        }
    }

    fn merge(&mut self, other: BatchReport) {
        self.fetched += other.fetched;
        self.skipped += other.skipped;
        self.failures.extend(other.failures);
    }
}

/// Process every entry of `manifest`. Returns the first fatal error, or the
/// report once all entries were attempted.
pub fn run_manifest<F>(
    fetcher: &Fetcher,
    manifest: &Manifest,
    options: &BatchOptions,
    on_progress: F,
) -> Result<BatchReport, FetchError>
where
    F: Fn(ProgressLine<'_>) + Sync,
{
    if options.jobs <= 1 || manifest.len() <= 1 {
        run_sequential(fetcher, &manifest.entries, options, &on_progress)
    } else {
        run_pool(fetcher, &manifest.entries, options, &on_progress)
    }
}

fn run_sequential<F>(
    fetcher: &Fetcher,
    entries: &[PackageEntry],
    options: &BatchOptions,
    on_progress: &F,
) -> Result<BatchReport, FetchError>
where
    F: Fn(ProgressLine<'_>),
{
    let total = entries.len();
    let mut report = BatchReport::default();
    for (i, entry) in entries.iter().enumerate() {
        on_progress(ProgressLine {
            index: i + 1,
            total,
            name: &entry.name,
        });
        match fetcher.ensure_entry(entry) {
            Ok(outcome) => report.record(outcome),
            Err(e) => handle_failure(e, options, &mut report)?,
        }
    }
    Ok(report)
}

fn run_pool<F>(
    fetcher: &Fetcher,
    entries: &[PackageEntry],
    options: &BatchOptions,
    on_progress: &F,
) -> Result<BatchReport, FetchError>
where
    F: Fn(ProgressLine<'_>) + Sync,
{
    let total = entries.len();
    let work: Mutex<VecDeque<(usize, &PackageEntry)>> =
        Mutex::new(entries.iter().enumerate().collect());
    let stop = AtomicBool::new(false);
    let (tx, rx) = mpsc::channel::<Result<FetchOutcome, FetchError>>();
    let num_workers = options.jobs.min(total);

    std::thread::scope(|scope| {
        for _ in 0..num_workers {
            let tx = tx.clone();
            let work = &work;
            let stop = &stop;
            scope.spawn(move || loop {
                if stop.load(Ordering::SeqCst) {
                    break;
                }
                let next = work.lock().unwrap_or_else(|e| e.into_inner()).pop_front();
                let Some((i, entry)) = next else {
                    break;
                };
                on_progress(ProgressLine {
                    index: i + 1,
                    total,
                    name: &entry.name,
                });
                let res = fetcher.ensure_entry(entry);
                let fatal = match &res {
                    Err(e) => {
                        e.is_integrity_failure()
                            || options.transport_failures == TransportFailurePolicy::Abort
                    }
                    Ok(_) => false,
                };
                if fatal {
                    stop.store(true, Ordering::SeqCst);
                }
                if tx.send(res).is_err() {
                    break;
                }
            });
        }
        drop(tx);

        // In-flight items finish; the first fatal error wins.
        let mut report = BatchReport::default();
        let mut fatal: Option<FetchError> = None;
        for res in rx {
            match res {
                Ok(outcome) => report.record(outcome),
                Err(e) if fatal.is_some() => {
                    tracing::warn!("{e}");
                    report.failures.push(e);
                }
                Err(e) => {
                    let mut partial = BatchReport::default();
                    if let Err(e) = handle_failure(e, options, &mut partial) {
                        fatal = Some(e);
                    }
                    report.merge(partial);
                }
            }
        }
        match fatal {
            Some(e) => Err(e),
            None => Ok(report),
        }
    })
}

fn handle_failure(
    e: FetchError,
    options: &BatchOptions,
    report: &mut BatchReport,
) -> Result<(), FetchError> {
    if e.is_integrity_failure() || options.transport_failures == TransportFailurePolicy::Abort {
        return Err(e);
    }
    tracing::warn!("{e}; continuing with next item");
    report.failures.push(e);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::ManifestKind;
    use crate::transport::{Transport, TransportError};
    use std::fs;
    use std::path::Path;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    // md5("hello\n")
    const HELLO_MD5: &str = "b1946ac92492d2347c6235b4d2611184";

    /// Serves "hello\n" for every URL except those containing "broken".
    struct FixtureTransport {
        calls: AtomicUsize,
    }

    impl Transport for FixtureTransport {
        fn download(&self, url: &str, dest: &Path) -> Result<u64, TransportError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if url.contains("broken") {
                return Err(TransportError::Http(404));
            }
            fs::write(dest, b"hello\n").map_err(TransportError::Storage)?;
            Ok(6)
        }
    }

    fn entry(name: &str, file: &str, md5: &str) -> PackageEntry {
        PackageEntry {
            name: name.to_string(),
            url: format!("https://example.com/{file}"),
            expected_digest: md5.to_string(),
        }
    }

    fn manifest(entries: Vec<PackageEntry>) -> Manifest {
        Manifest {
            kind: ManifestKind::Packages,
            entries,
        }
    }

    fn setup() -> (tempfile::TempDir, Arc<FixtureTransport>, Fetcher) {
        let cache = tempfile::tempdir().unwrap();
        let transport = Arc::new(FixtureTransport {
            calls: AtomicUsize::new(0),
        });
        let fetcher = Fetcher::new(cache.path(), transport.clone()).unwrap();
        (cache, transport, fetcher)
    }

    #[test]
    fn progress_line_format() {
        let line = ProgressLine {
            index: 3,
            total: 80,
            name: "binutils",
        };
        assert_eq!(line.to_string(), "(3/80) binutils");
    }

    #[test]
    fn sequential_reports_progress_in_order() {
        let (_cache, _t, fetcher) = setup();
        let m = manifest(vec![
            entry("a", "a.tar.gz", HELLO_MD5),
            entry("b", "b.tar.gz", HELLO_MD5),
        ]);
        let lines = Mutex::new(Vec::new());
        let report = run_manifest(&fetcher, &m, &BatchOptions::default(), |p| {
            lines.lock().unwrap().push(p.to_string())
        })
        .unwrap();
        assert_eq!(report.fetched, 2);
        assert_eq!(*lines.lock().unwrap(), vec!["(1/2) a", "(2/2) b"]);
    }

    #[test]
    fn abort_policy_stops_on_transport_failure() {
        let (cache, transport, fetcher) = setup();
        let m = manifest(vec![
            entry("a", "a.tar.gz", HELLO_MD5),
            entry("b", "broken.tar.gz", HELLO_MD5),
            entry("c", "c.tar.gz", HELLO_MD5),
        ]);
        let err = run_manifest(&fetcher, &m, &BatchOptions::default(), |_| {}).unwrap_err();
        assert!(matches!(err, FetchError::TransportFailure { .. }));
        assert_eq!(err.name(), "b");
        assert!(cache.path().join("a.tar.gz").exists());
        assert!(!cache.path().join("c.tar.gz").exists());
        assert_eq!(transport.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn continue_policy_records_and_proceeds() {
        let (cache, _t, fetcher) = setup();
        let m = manifest(vec![
            entry("a", "a.tar.gz", HELLO_MD5),
            entry("b", "broken.tar.gz", HELLO_MD5),
            entry("c", "c.tar.gz", HELLO_MD5),
        ]);
        let options = BatchOptions {
            transport_failures: TransportFailurePolicy::Continue,
            ..BatchOptions::default()
        };
        let report = run_manifest(&fetcher, &m, &options, |_| {}).unwrap();
        assert_eq!(report.fetched, 2);
        assert!(!report.is_clean());
        assert_eq!(report.failures[0].name(), "b");
        assert!(cache.path().join("c.tar.gz").exists());
    }

    #[test]
    fn digest_mismatch_fatal_even_when_continuing() {
        let (cache, _t, fetcher) = setup();
        let m = manifest(vec![
            entry("a", "a.tar.gz", "deadbeef"),
            entry("b", "b.tar.gz", HELLO_MD5),
        ]);
        let options = BatchOptions {
            transport_failures: TransportFailurePolicy::Continue,
            ..BatchOptions::default()
        };
        let err = run_manifest(&fetcher, &m, &options, |_| {}).unwrap_err();
        assert!(err.is_integrity_failure());
        assert!(!cache.path().join("a.tar.gz").exists());
        assert!(!cache.path().join("b.tar.gz").exists());
    }

    #[test]
    fn skipped_items_counted() {
        let (cache, transport, fetcher) = setup();
        fs::write(cache.path().join("a.tar.gz"), b"already here").unwrap();
        let m = manifest(vec![
            entry("a", "a.tar.gz", HELLO_MD5),
            entry("b", "b.tar.gz", HELLO_MD5),
        ]);
        let report = run_manifest(&fetcher, &m, &BatchOptions::default(), |_| {}).unwrap();
        assert_eq!((report.fetched, report.skipped), (1, 1));
        assert_eq!(transport.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn pool_fetches_everything() {
        let (cache, _t, fetcher) = setup();
        let entries: Vec<_> = (0..12)
            .map(|i| entry(&format!("p{i}"), &format!("p{i}.tar.gz"), HELLO_MD5))
            .collect();
        let m = manifest(entries);
        let options = BatchOptions {
            jobs: 4,
            ..BatchOptions::default()
        };
        let seen = Mutex::new(Vec::new());
        let report = run_manifest(&fetcher, &m, &options, |p| {
            seen.lock().unwrap().push(p.index)
        })
        .unwrap();
        assert_eq!(report.fetched, 12);
        let mut seen = seen.into_inner().unwrap();
        seen.sort_unstable();
        assert_eq!(seen, (1..=12).collect::<Vec<_>>());
        for i in 0..12 {
            assert!(cache.path().join(format!("p{i}.tar.gz")).exists());
        }
    }

    #[test]
    fn pool_shared_filename_fetched_once() {
        let (cache, transport, fetcher) = setup();
        let m = manifest(vec![
            entry("x", "same.tar.gz", HELLO_MD5),
            entry("y", "same.tar.gz", HELLO_MD5),
            entry("z", "same.tar.gz", HELLO_MD5),
        ]);
        let options = BatchOptions {
            jobs: 3,
            ..BatchOptions::default()
        };
        let report = run_manifest(&fetcher, &m, &options, |_| {}).unwrap();
        assert_eq!((report.fetched, report.skipped), (1, 2));
        assert_eq!(transport.calls.load(Ordering::SeqCst), 1);
        assert!(cache.path().join("same.tar.gz").exists());
    }

    #[test]
    fn pool_mismatch_is_fatal() {
        let (_cache, _t, fetcher) = setup();
        let m = manifest(vec![
            entry("a", "a.tar.gz", HELLO_MD5),
            entry("bad", "bad.tar.gz", "deadbeef"),
        ]);
        let options = BatchOptions {
            jobs: 2,
            transport_failures: TransportFailurePolicy::Continue,
        };
        let err = run_manifest(&fetcher, &m, &options, |_| {}).unwrap_err();
        assert_eq!(err.name(), "bad");
        assert!(err.is_integrity_failure());
    }

    #[test]
    fn empty_manifest_is_clean() {
        let (_cache, transport, fetcher) = setup();
        let report = run_manifest(&fetcher, &manifest(vec![]), &BatchOptions::default(), |_| {
            panic!("no progress expected")
        })
        .unwrap();
        assert!(report.is_clean());
        assert_eq!(report.fetched + report.skipped, 0);
        assert_eq!(transport.calls.load(Ordering::SeqCst), 0);
    }
}

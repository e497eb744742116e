use crate::analyzer::{FormatClass, QualityLevel};
use crate::config::{ConverterConfig, DaemonConfig, IntervalConfig};
use crate::encoder::{ConvertParams, Transcode};
use crate::error::{StoreError, WorkerError};
use crate::recovery::{RecoveryMarker, RecoveryState};
use crate::store::{Job, JobStore};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;
use tracing::{error, info, warn};

/// How one pass through the loop ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Nothing eligible to convert
    NoWork,
    /// Job converted and marked playable
    Converted,
    /// Format not converted here, job marked accepted
    Accepted,
    /// Transcoder failed or produced nothing; job left as uploaded
    ConvertFailed,
    /// Output exists but the status update failed; recovery marker written
    CommitFailed,
    /// Job store unreachable or a query failed
    StoreFailed,
}

impl CycleOutcome {
    /// Whether the next sleep uses the failure interval
    pub fn is_store_failure(&self) -> bool {
        matches!(self, CycleOutcome::StoreFailed | CycleOutcome::CommitFailed)
    }
}

/// The single conversion loop: recover, claim, classify, convert, commit, sleep.
pub struct ConversionWorker<S, T> {
    store: S,
    transcoder: T,
    marker: RecoveryMarker,
    converter: ConverterConfig,
    intervals: IntervalConfig,
    stop: Arc<AtomicBool>,
    tick: Duration,
}

impl<S: JobStore, T: Transcode> ConversionWorker<S, T> {
    pub fn new(
        store: S,
        transcoder: T,
        marker: RecoveryMarker,
        config: &DaemonConfig,
        stop: Arc<AtomicBool>,
    ) -> Self {
        Self {
            store,
            transcoder,
            marker,
            converter: config.converter.clone(),
            intervals: config.intervals.clone(),
            stop,
            tick: Duration::from_secs(1),
        }
    }

    /// Length of one count-down step (one second in production)
    pub fn with_tick(mut self, tick: Duration) -> Self {
        self.tick = tick;
        self
    }

    fn is_stopped(&self) -> bool {
        self.stop.load(Ordering::Relaxed)
    }

    /// Loop until the stop flag is raised.
    ///
    /// Only fails when `max_store_retries` is configured and that many store
    /// failures happen in a row.
    pub fn run(&self) -> Result<(), WorkerError> {
        let mut consecutive_failures: u32 = 0;

        while !self.is_stopped() {
            info!("Running conversion cycle...");
            let outcome = self.run_cycle();

            if outcome.is_store_failure() {
                consecutive_failures = consecutive_failures.saturating_add(1);
                if let Some(max) = self.intervals.max_store_retries
                    && consecutive_failures >= max
                {
                    error!(
                        "Job store failed {} times in a row, stopping worker",
                        consecutive_failures
                    );
                    return Err(WorkerError::RetriesExhausted(consecutive_failures));
                }
            } else {
                consecutive_failures = 0;
            }

            self.pause_after(outcome);
        }

        info!("Conversion worker stopped");
        Ok(())
    }

    /// One full pass; store failures are logged and reported in the outcome
    pub fn run_cycle(&self) -> CycleOutcome {
        match self.try_cycle() {
            Ok(outcome) => outcome,
            Err(e) => {
                error!("Job store query failed: {}", e);
                CycleOutcome::StoreFailed
            }
        }
    }

    fn try_cycle(&self) -> Result<CycleOutcome, StoreError> {
        self.recover()?;

        match self.store.claim_next(&self.converter.host_filter)? {
            Some(job) => self.process(&job),
            None => {
                info!("No uploaded files waiting for conversion");
                Ok(CycleOutcome::NoWork)
            }
        }
    }

    /// Retry the status update remembered by the recovery marker, once.
    ///
    /// The marker is cleared after the attempt whatever its result.
    pub fn recover(&self) -> Result<(), StoreError> {
        let RecoveryState::PendingCommit(id) = self.marker.state() else {
            return Ok(());
        };

        info!(
            "Found job record [{}] whose status update failed after conversion, updating it first",
            id
        );
        let result = self.recommit(&id);

        if let Err(e) = self.marker.clear() {
            warn!(
                "Failed to remove recovery marker {}: {}",
                self.marker.path().display(),
                e
            );
        }
        result
    }

    fn recommit(&self, id: &str) -> Result<(), StoreError> {
        let Some(job) = self.store.lookup_converted(&self.converter.host_filter, id)? else {
            info!("No pending job record [{}], nothing to update", id);
            return Ok(());
        };

        if !job.destination_path().exists() {
            info!(
                "Converted file {} not found, nothing to update",
                job.destination_path().display()
            );
            return Ok(());
        }

        self.store.mark_playable(&job.id, &job.target_play_path())?;
        info!("Job record [{}] marked playable", job.id);
        Ok(())
    }

    fn process(&self, job: &Job) -> Result<CycleOutcome, StoreError> {
        let source = job.source_path();
        match job.upload_time {
            Some(at) => info!("Claimed job record [{}] uploaded at {}", job.id, at),
            None => info!("Claimed job record [{}]", job.id),
        }

        let format = FormatClass::classify(&job.save_path);
        if !format.is_convertible() {
            info!(
                "Format of {} is not supported ({:?}), keeping it unconverted",
                source.display(),
                format
            );
            self.store.mark_accepted_no_convert(&job.id)?;
            info!("Job record [{}] marked accepted", job.id);
            return Ok(CycleOutcome::Accepted);
        }

        let destination = job.destination_path();
        if job.is_already_playable_format() {
            info!(
                "{} is already in the playable format, skipping conversion",
                source.display()
            );
        } else {
            info!(
                "Converting [{}] {} -> {}",
                job.id,
                source.display(),
                destination.display()
            );

            let media = self.transcoder.probe(&source);
            let level = QualityLevel::select(media.width());
            info!(
                "Source resolution {:?}, using {} quality",
                media.resolution, level
            );

            let params = ConvertParams {
                input: source.clone(),
                output: destination.clone(),
                quality_scale: level.scale(&self.converter.quality),
                audio_sample_rate: self.converter.audio_sample_rate,
                resolution: self.converter.resolution,
            };

            if let Err(e) = self.transcoder.convert(&params) {
                warn!("Conversion of [{}] failed: {}", job.id, e);
                return Ok(CycleOutcome::ConvertFailed);
            }
        }

        if !destination.exists() {
            warn!(
                "Converted file {} for [{}] does not exist, leaving job for a later cycle",
                destination.display(),
                job.id
            );
            return Ok(CycleOutcome::ConvertFailed);
        }

        info!("Conversion of [{}] finished", job.id);
        Ok(self.commit(job))
    }

    fn commit(&self, job: &Job) -> CycleOutcome {
        match self.store.mark_playable(&job.id, &job.target_play_path()) {
            Ok(()) => {
                info!("Job record [{}] marked playable", job.id);
                CycleOutcome::Converted
            }
            Err(e) => {
                error!("Failed to mark job record [{}] playable: {}", job.id, e);
                if let Err(e) = self.marker.write(&job.id) {
                    error!(
                        "Failed to write recovery marker {}: {}",
                        self.marker.path().display(),
                        e
                    );
                }
                CycleOutcome::CommitFailed
            }
        }
    }

    /// Seconds to wait after `outcome`
    pub fn delay_secs(&self, outcome: CycleOutcome) -> u64 {
        if outcome.is_store_failure() {
            self.intervals.fails_retry_secs()
        } else {
            self.intervals.each_time_secs()
        }
    }

    fn pause_after(&self, outcome: CycleOutcome) -> u64 {
        let secs = self.delay_secs(outcome);
        let failed = outcome.is_store_failure();
        self.countdown(secs, |minutes| {
            if failed {
                error!(
                    "Job store unavailable, check the database server; retrying in {} minutes...",
                    minutes
                );
            } else {
                info!("Next conversion cycle in {} minutes...", minutes);
            }
        })
    }

    /// Sleep `total_secs` ticks, stopping early when the stop flag is raised.
    ///
    /// `report` gets the remaining whole minutes at the start and at every
    /// minute boundary. Returns the number of ticks slept.
    pub fn countdown(&self, total_secs: u64, mut report: impl FnMut(u64)) -> u64 {
        report(total_secs / 60);

        let mut remaining = total_secs;
        while remaining > 0 && !self.is_stopped() {
            thread::sleep(self.tick);
            remaining -= 1;
            if remaining > 0 && remaining % 60 == 0 {
                report(remaining / 60);
            }
        }
        total_secs - remaining
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::MediaInfo;
    use crate::error::ConvertError;
    use crate::store::JobStatus;
    use chrono::{TimeZone, Utc};
    use std::cell::{Cell, RefCell};
    use std::path::{Path, PathBuf};

    const HOST: &str = "10.0.0.5";

    #[derive(Default)]
    struct FakeStore {
        jobs: RefCell<Vec<Job>>,
        fail_claim: Cell<bool>,
        fail_commit: Cell<bool>,
        claims: Cell<usize>,
        lookups: Cell<usize>,
        mutations: Cell<usize>,
    }

    impl FakeStore {
        fn with_jobs(jobs: Vec<Job>) -> Self {
            let store = Self::default();
            store.jobs.replace(jobs);
            store
        }

        fn job(&self, id: &str) -> Job {
            self.jobs
                .borrow()
                .iter()
                .find(|j| j.id == id)
                .cloned()
                .unwrap()
        }

        fn update(&self, id: &str, status: JobStatus, play_path: Option<&str>) {
            self.mutations.set(self.mutations.get() + 1);
            for job in self.jobs.borrow_mut().iter_mut().filter(|j| j.id == id) {
                job.status = status;
                if let Some(p) = play_path {
                    job.play_path = Some(p.to_string());
                }
            }
        }
    }

    impl JobStore for &FakeStore {
        fn claim_next(&self, host_filter: &str) -> Result<Option<Job>, StoreError> {
            self.claims.set(self.claims.get() + 1);
            if self.fail_claim.get() {
                return Err(StoreError::Unavailable("connection refused".to_string()));
            }
            Ok(self
                .jobs
                .borrow()
                .iter()
                .filter(|j| j.status == JobStatus::Uploaded && j.context_path.contains(host_filter))
                .min_by_key(|j| j.upload_time)
                .cloned())
        }

        fn lookup_converted(&self, host_filter: &str, id: &str) -> Result<Option<Job>, StoreError> {
            self.lookups.set(self.lookups.get() + 1);
            Ok(self
                .jobs
                .borrow()
                .iter()
                .find(|j| {
                    j.id == id
                        && j.status == JobStatus::Uploaded
                        && j.context_path.contains(host_filter)
                })
                .cloned())
        }

        fn mark_playable(&self, id: &str, play_path: &str) -> Result<(), StoreError> {
            if self.fail_commit.get() {
                return Err(StoreError::Unavailable("connection reset".to_string()));
            }
            self.update(id, JobStatus::Playable, Some(play_path));
            Ok(())
        }

        fn mark_accepted_no_convert(&self, id: &str) -> Result<(), StoreError> {
            self.update(id, JobStatus::AcceptedNoConvert, None);
            Ok(())
        }
    }

    #[derive(Default)]
    struct FakeTranscoder {
        resolution: String,
        fail: bool,
        skip_output: bool,
        converted: RefCell<Vec<ConvertParams>>,
    }

    impl Transcode for &FakeTranscoder {
        fn probe(&self, _input: &Path) -> MediaInfo {
            MediaInfo {
                resolution: self.resolution.clone(),
                ..MediaInfo::default()
            }
        }

        fn convert(&self, params: &ConvertParams) -> Result<(), ConvertError> {
            self.converted.borrow_mut().push(params.clone());
            if self.fail {
                return Err(ConvertError::Wait(std::io::Error::other("killed")));
            }
            if !self.skip_output {
                std::fs::write(&params.output, b"FLV").unwrap();
            }
            Ok(())
        }
    }

    struct Fixture {
        dir: tempfile::TempDir,
        config: DaemonConfig,
        stop: Arc<AtomicBool>,
    }

    impl Fixture {
        fn new() -> Self {
            let config = DaemonConfig::from_toml(
                r#"
                [converter]
                ffmpeg_path = "/usr/bin/ffmpeg"
                host_filter = "10.0.0.5"

                [converter.quality]
                high = 2
                middle = 5
                low = 8

                [intervals]
                fails_retry_minutes = 1
                each_time_minutes = 2
                "#,
            )
            .unwrap();
            Self {
                dir: tempfile::tempdir().unwrap(),
                config,
                stop: Arc::new(AtomicBool::new(false)),
            }
        }

        fn root(&self) -> String {
            self.dir.path().to_string_lossy().into_owned()
        }

        fn marker(&self) -> RecoveryMarker {
            RecoveryMarker::in_dir(self.dir.path())
        }

        /// An uploaded job whose source file exists on disk
        fn job(&self, id: &str, file_name: &str, minute: u32) -> Job {
            let save_path = format!("/2013/06/14/{}", file_name);
            let source = PathBuf::from(format!("{}{}", self.root(), save_path));
            std::fs::create_dir_all(source.parent().unwrap()).unwrap();
            std::fs::write(&source, b"source").unwrap();
            Job {
                id: id.to_string(),
                storage_root: self.root(),
                save_path,
                play_path: None,
                context_path: format!("http://{}/upload", HOST),
                status: JobStatus::Uploaded,
                upload_time: Some(Utc.with_ymd_and_hms(2013, 6, 14, 9, minute, 0).unwrap()),
            }
        }

        fn worker<'a>(
            &self,
            store: &'a FakeStore,
            transcoder: &'a FakeTranscoder,
        ) -> ConversionWorker<&'a FakeStore, &'a FakeTranscoder> {
            ConversionWorker::new(
                store,
                transcoder,
                self.marker(),
                &self.config,
                self.stop.clone(),
            )
            .with_tick(Duration::ZERO)
        }
    }

    #[test]
    fn test_no_work_sleeps_normal_interval() {
        let fx = Fixture::new();
        let store = FakeStore::default();
        let transcoder = FakeTranscoder::default();
        let worker = fx.worker(&store, &transcoder);

        let outcome = worker.run_cycle();
        assert_eq!(outcome, CycleOutcome::NoWork);
        assert_eq!(store.mutations.get(), 0);
        assert!(transcoder.converted.borrow().is_empty());
        assert_eq!(worker.delay_secs(outcome), 120);
    }

    #[test]
    fn test_converts_oldest_job() {
        let fx = Fixture::new();
        let store = FakeStore::with_jobs(vec![
            fx.job("newer", "b.avi", 30),
            fx.job("older", "a.mp4", 10),
        ]);
        let transcoder = FakeTranscoder {
            resolution: "1920x1080".to_string(),
            ..FakeTranscoder::default()
        };
        let worker = fx.worker(&store, &transcoder);

        assert_eq!(worker.run_cycle(), CycleOutcome::Converted);

        let older = store.job("older");
        assert_eq!(older.status, JobStatus::Playable);
        assert_eq!(older.play_path.as_deref(), Some("/2013/06/14/a.flv"));
        assert_eq!(store.job("newer").status, JobStatus::Uploaded);

        let converted = transcoder.converted.borrow();
        assert_eq!(converted.len(), 1);
        assert_eq!(converted[0].quality_scale, 2);
        assert_eq!(converted[0].audio_sample_rate, 44100);
        assert_eq!(converted[0].output, older.destination_path());
    }

    #[test]
    fn test_quality_follows_probe() {
        for (resolution, expected) in [("640x480", 8), ("1280x720", 5), ("", 5)] {
            let fx = Fixture::new();
            let store = FakeStore::with_jobs(vec![fx.job("a", "a.mov", 0)]);
            let transcoder = FakeTranscoder {
                resolution: resolution.to_string(),
                ..FakeTranscoder::default()
            };
            fx.worker(&store, &transcoder).run_cycle();
            assert_eq!(transcoder.converted.borrow()[0].quality_scale, expected);
        }
    }

    #[test]
    fn test_unsupported_format_is_accepted() {
        let fx = Fixture::new();
        let store = FakeStore::with_jobs(vec![fx.job("rm", "a.rmvb", 0), fx.job("mkv", "b.mkv", 1)]);
        let transcoder = FakeTranscoder::default();
        let worker = fx.worker(&store, &transcoder);

        assert_eq!(worker.run_cycle(), CycleOutcome::Accepted);
        assert_eq!(worker.run_cycle(), CycleOutcome::Accepted);
        assert_eq!(store.job("rm").status, JobStatus::AcceptedNoConvert);
        assert_eq!(store.job("mkv").status, JobStatus::AcceptedNoConvert);
        assert!(transcoder.converted.borrow().is_empty());
    }

    #[test]
    fn test_flv_source_is_marked_without_converting() {
        let fx = Fixture::new();
        let store = FakeStore::with_jobs(vec![fx.job("f", "a.flv", 0)]);
        let transcoder = FakeTranscoder::default();
        let worker = fx.worker(&store, &transcoder);

        assert_eq!(worker.run_cycle(), CycleOutcome::Converted);
        assert_eq!(store.job("f").play_path.as_deref(), Some("/2013/06/14/a.flv"));
        assert!(transcoder.converted.borrow().is_empty());
    }

    #[test]
    fn test_convert_failure_leaves_job_uploaded() {
        let fx = Fixture::new();
        let store = FakeStore::with_jobs(vec![fx.job("a", "a.mp4", 0)]);

        let failing = FakeTranscoder {
            fail: true,
            ..FakeTranscoder::default()
        };
        let outcome = fx.worker(&store, &failing).run_cycle();
        assert_eq!(outcome, CycleOutcome::ConvertFailed);
        assert!(!outcome.is_store_failure());

        let silent = FakeTranscoder {
            skip_output: true,
            ..FakeTranscoder::default()
        };
        assert_eq!(
            fx.worker(&store, &silent).run_cycle(),
            CycleOutcome::ConvertFailed
        );

        assert_eq!(store.job("a").status, JobStatus::Uploaded);
        assert_eq!(store.mutations.get(), 0);
        assert!(fx.marker().read().is_none());
    }

    #[test]
    fn test_commit_failure_then_recovery() {
        let fx = Fixture::new();
        let store = FakeStore::with_jobs(vec![fx.job("a", "a.mp4", 0)]);
        let transcoder = FakeTranscoder::default();
        let worker = fx.worker(&store, &transcoder);

        store.fail_commit.set(true);
        let outcome = worker.run_cycle();
        assert_eq!(outcome, CycleOutcome::CommitFailed);
        assert_eq!(worker.delay_secs(outcome), 60);
        assert_eq!(fx.marker().read().as_deref(), Some("a"));
        assert_eq!(store.job("a").status, JobStatus::Uploaded);

        store.fail_commit.set(false);
        assert_eq!(worker.run_cycle(), CycleOutcome::NoWork);
        assert_eq!(store.job("a").status, JobStatus::Playable);
        assert!(fx.marker().read().is_none());
        assert_eq!(transcoder.converted.borrow().len(), 1);
    }

    #[test]
    fn test_recovery_is_idempotent() {
        let fx = Fixture::new();
        let job = fx.job("x", "x.wmv", 0);
        std::fs::write(job.destination_path(), b"FLV").unwrap();
        let store = FakeStore::with_jobs(vec![job]);
        let transcoder = FakeTranscoder::default();
        let worker = fx.worker(&store, &transcoder);

        fx.marker().write("x").unwrap();
        worker.recover().unwrap();
        assert_eq!(store.job("x").status, JobStatus::Playable);
        assert!(fx.marker().read().is_none());
        assert_eq!(store.lookups.get(), 1);

        worker.recover().unwrap();
        assert_eq!(store.lookups.get(), 1);
        assert_eq!(store.mutations.get(), 1);
    }

    #[test]
    fn test_recovery_without_output_only_clears_marker() {
        let fx = Fixture::new();
        let store = FakeStore::with_jobs(vec![fx.job("x", "x.mp4", 0)]);
        let transcoder = FakeTranscoder::default();
        let worker = fx.worker(&store, &transcoder);

        fx.marker().write("x").unwrap();
        worker.recover().unwrap();
        assert_eq!(store.job("x").status, JobStatus::Uploaded);
        assert_eq!(store.mutations.get(), 0);
        assert!(fx.marker().read().is_none());

        fx.marker().write("unknown").unwrap();
        worker.recover().unwrap();
        assert!(fx.marker().read().is_none());
    }

    #[test]
    fn test_recovery_attempted_once_even_on_store_error() {
        let fx = Fixture::new();
        let job = fx.job("x", "x.mp4", 0);
        std::fs::write(job.destination_path(), b"FLV").unwrap();
        let store = FakeStore::with_jobs(vec![job]);
        let transcoder = FakeTranscoder::default();
        let worker = fx.worker(&store, &transcoder);

        fx.marker().write("x").unwrap();
        store.fail_commit.set(true);
        assert!(worker.recover().is_err());
        assert!(fx.marker().read().is_none());
        assert_eq!(store.job("x").status, JobStatus::Uploaded);
    }

    #[test]
    fn test_claim_failure_backs_off_failure_interval() {
        let fx = Fixture::new();
        let store = FakeStore::default();
        store.fail_claim.set(true);
        let transcoder = FakeTranscoder::default();
        let worker = fx.worker(&store, &transcoder);

        let outcome = worker.run_cycle();
        assert_eq!(outcome, CycleOutcome::StoreFailed);
        assert_eq!(worker.delay_secs(outcome), 60);
        assert_eq!(worker.pause_after(outcome), 60);
    }

    #[test]
    fn test_countdown_reports_minutes_and_stops_early() {
        let fx = Fixture::new();
        let store = FakeStore::default();
        let transcoder = FakeTranscoder::default();
        let worker = fx.worker(&store, &transcoder);

        let mut reports = Vec::new();
        assert_eq!(worker.countdown(180, |m| reports.push(m)), 180);
        assert_eq!(reports, [3, 2, 1]);

        fx.stop.store(true, Ordering::Relaxed);
        assert_eq!(worker.countdown(180, |_| {}), 0);
    }

    #[test]
    fn test_run_returns_when_stopped() {
        let fx = Fixture::new();
        let store = FakeStore::default();
        let transcoder = FakeTranscoder::default();
        fx.stop.store(true, Ordering::Relaxed);

        assert!(fx.worker(&store, &transcoder).run().is_ok());
        assert_eq!(store.claims.get(), 0);
    }

    #[test]
    fn test_run_honours_retry_cap() {
        let mut fx = Fixture::new();
        fx.config.intervals.max_store_retries = Some(3);
        let store = FakeStore::default();
        store.fail_claim.set(true);
        let transcoder = FakeTranscoder::default();

        let result = fx.worker(&store, &transcoder).run();
        assert!(matches!(result, Err(WorkerError::RetriesExhausted(3))));
        assert_eq!(store.claims.get(), 3);
    }
}

//! Run counters, updated from many tasks and read by the progress printer

/// Counter sharded per thread, so tasks on different workers never contend.
#[derive(Debug, Default)]
pub struct Counter {
    shards: thread_local::ThreadLocal<std::sync::atomic::AtomicU64>,
}

impl Counter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, value: u64) {
        self.shards
            .get_or_default()
            .fetch_add(value, std::sync::atomic::Ordering::Relaxed);
    }

    pub fn inc(&self) {
        self.add(1);
    }

    pub fn get(&self) -> u64 {
        self.shards
            .iter()
            .map(|shard| shard.load(std::sync::atomic::Ordering::Relaxed))
            .sum()
    }
}

/// Transfers started and finished; the difference is what is still in flight.
#[derive(Debug, Default)]
pub struct InFlight {
    started: Counter,
    finished: Counter,
}

/// Marks one transfer as in flight until dropped.
pub struct TransferGuard<'a> {
    in_flight: &'a InFlight,
}

impl Drop for TransferGuard<'_> {
    fn drop(&mut self) {
        self.in_flight.finished.inc();
    }
}

impl InFlight {
    pub fn guard(&self) -> TransferGuard<'_> {
        self.started.inc();
        TransferGuard { in_flight: self }
    }

    pub fn started(&self) -> u64 {
        self.started.get()
    }

    /// Shards are summed one by one, so a concurrent read can see a finish before its start.
    pub fn pending(&self) -> u64 {
        let finished = self.finished.get();
        self.started.get().saturating_sub(finished)
    }
}

/// Counters shared by every task of one replication run.
#[derive(Debug)]
pub struct Progress {
    pub transfers: InFlight,
    pub bytes_copied: Counter,
    pub files_copied: Counter,
    pub files_failed: Counter,
    pub directories_listed: Counter,
    pub directories_skipped: Counter,
    start_time: std::time::Instant,
}

impl Progress {
    pub fn new() -> Self {
        Self {
            transfers: Default::default(),
            bytes_copied: Default::default(),
            files_copied: Default::default(),
            files_failed: Default::default(),
            directories_listed: Default::default(),
            directories_skipped: Default::default(),
            start_time: std::time::Instant::now(),
        }
    }

    pub fn elapsed(&self) -> std::time::Duration {
        self.start_time.elapsed()
    }

    /// Files copied per second since the run started, `None` before the first whole second.
    pub fn files_per_second(&self) -> Option<f64> {
        files_per_second(self.files_copied.get(), self.elapsed())
    }
}

impl Default for Progress {
    fn default() -> Self {
        Self::new()
    }
}

pub fn files_per_second(files: u64, elapsed: std::time::Duration) -> Option<f64> {
    if elapsed.as_secs() == 0 {
        return None;
    }
    Some(files as f64 / elapsed.as_secs_f64())
}

pub struct ProgressPrinter<'a> {
    progress: &'a Progress,
    last_files: u64,
    last_bytes: u64,
    last_update: std::time::Instant,
}

impl<'a> ProgressPrinter<'a> {
    pub fn new(progress: &'a Progress) -> Self {
        Self {
            progress,
            last_files: progress.files_copied.get(),
            last_bytes: progress.bytes_copied.get(),
            last_update: std::time::Instant::now(),
        }
    }

    pub fn print(&mut self) -> String {
        let time_now = std::time::Instant::now();
        let total_duration_secs = self.progress.elapsed().as_secs_f64();
        let curr_duration_secs = (time_now - self.last_update).as_secs_f64();
        let files = self.progress.files_copied.get();
        let average_files_rate = files as f64 / total_duration_secs;
        let current_files_rate = (files - self.last_files) as f64 / curr_duration_secs;
        let bytes = self.progress.bytes_copied.get();
        let average_bytes_rate = bytes as f64 / total_duration_secs;
        let current_bytes_rate = (bytes - self.last_bytes) as f64 / curr_duration_secs;
        // update self
        self.last_files = files;
        self.last_bytes = bytes;
        self.last_update = time_now;
        format!(
            "---------------------\n\
            TRANSFERS:\n\
            pending: {:>10}\n\
            average: {:>10.2} files/s\n\
            current: {:>10.2} files/s\n\
            -----------------------\n\
            COPIED:\n\
            average: {:>10}/s\n\
            current: {:>10}/s\n\
            total:   {:>10}\n\
            \n\
            files:       {:>10}\n\
            failed:      {:>10}\n\
            -----------------------\n\
            DIRECTORIES:\n\
            listed:      {:>10}\n\
            skipped:     {:>10}",
            self.progress.transfers.pending(),
            average_files_rate,
            current_files_rate,
            bytesize::ByteSize(average_bytes_rate as u64),
            bytesize::ByteSize(current_bytes_rate as u64),
            bytesize::ByteSize(bytes),
            files,
            self.progress.files_failed.get(),
            self.progress.directories_listed.get(),
            self.progress.directories_skipped.get(),
        )
    }
}

/// Prints progress to stderr every `delay` until the task is aborted.
pub async fn print_progress(progress: std::sync::Arc<Progress>, delay: std::time::Duration) {
    let mut printer = ProgressPrinter::new(&progress);
    let mut interval = tokio::time::interval(delay);
    // the first tick completes immediately
    interval.tick().await;
    loop {
        interval.tick().await;
        eprintln!("{}", printer.print());
    }
}

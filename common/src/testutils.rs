//! In-memory source and sink used by the replication tests

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::sink::{PutOptions, Sink, SinkError};
use crate::source::{Source, SourceError};

#[derive(Debug, Clone)]
enum Node {
    Dir(Vec<String>),
    File(bytes::Bytes),
}

/// Samples the governor's active operations from inside collaborator calls.
#[derive(Debug, Default)]
pub struct LoadSampler {
    governor: Mutex<Option<Arc<throttle::Governor>>>,
    max_active: AtomicUsize,
}

impl LoadSampler {
    pub fn watch(&self, governor: Arc<throttle::Governor>) {
        *self.governor.lock().unwrap() = Some(governor);
    }

    fn sample(&self) {
        if let Some(governor) = self.governor.lock().unwrap().as_ref() {
            self.max_active
                .fetch_max(governor.active_operations(), Ordering::AcqRel);
        }
    }

    pub fn max_active(&self) -> usize {
        self.max_active.load(Ordering::Acquire)
    }
}

/// Directory tree kept in memory.
///
/// Listings include the `.` and `..` pseudo entries, like many FTP servers do.
#[derive(Debug, Default)]
pub struct MemorySource {
    tree: Mutex<HashMap<String, Node>>,
    // remaining failures per path, usize::MAX fails forever
    list_failures: Mutex<HashMap<String, usize>>,
    read_failures: Mutex<HashMap<String, usize>>,
    read_calls: Mutex<HashMap<String, usize>>,
    panicking: Mutex<HashSet<String>>,
    delay: Option<std::time::Duration>,
    open: AtomicUsize,
    peak_open: AtomicUsize,
    connects: AtomicUsize,
    pub load: LoadSampler,
}

#[derive(Debug)]
pub struct MemoryConnection {
    authenticated: bool,
}

fn parent_of(path: &str) -> Option<(String, String)> {
    let pos = path.rfind('/')?;
    let parent = if pos == 0 { "/" } else { &path[..pos] };
    Some((parent.to_string(), path[pos + 1..].to_string()))
}

impl MemorySource {
    pub fn new() -> Self {
        let source = Self::default();
        source
            .tree
            .lock()
            .unwrap()
            .insert("/".to_string(), Node::Dir(Vec::new()));
        source
    }

    #[must_use]
    pub fn with_delay(mut self, delay: std::time::Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    fn link(&self, path: &str) {
        let Some((parent, name)) = parent_of(path) else {
            return;
        };
        if !self.tree.lock().unwrap().contains_key(&parent) {
            self.add_dir(&parent);
        }
        let mut tree = self.tree.lock().unwrap();
        match tree.get_mut(&parent) {
            Some(Node::Dir(names)) if !names.contains(&name) => names.push(name),
            _ => {}
        }
    }

    /// Adds an (empty) directory, creating its parents.
    pub fn add_dir(&self, path: &str) -> &Self {
        if path != "/" {
            self.tree
                .lock()
                .unwrap()
                .entry(path.to_string())
                .or_insert_with(|| Node::Dir(Vec::new()));
            self.link(path);
        }
        self
    }

    /// Adds a file, creating its parent directories.
    pub fn add_file(&self, path: &str, contents: impl Into<bytes::Bytes>) -> &Self {
        self.tree
            .lock()
            .unwrap()
            .insert(path.to_string(), Node::File(contents.into()));
        self.link(path);
        self
    }

    /// Makes the first `times` listings of `path` fail.
    pub fn fail_list(&self, path: &str, times: usize) -> &Self {
        self.list_failures
            .lock()
            .unwrap()
            .insert(path.to_string(), times);
        self
    }

    /// Makes the first `times` reads of `path` fail.
    pub fn fail_read(&self, path: &str, times: usize) -> &Self {
        self.read_failures
            .lock()
            .unwrap()
            .insert(path.to_string(), times);
        self
    }

    /// Reading `path` panics.
    pub fn panic_on_read(&self, path: &str) -> &Self {
        self.panicking.lock().unwrap().insert(path.to_string());
        self
    }

    /// Connections opened and not closed yet.
    pub fn open_connections(&self) -> usize {
        self.open.load(Ordering::Acquire)
    }

    /// Most connections that were open at the same time.
    pub fn peak_open_connections(&self) -> usize {
        self.peak_open.load(Ordering::Acquire)
    }

    pub fn total_connections(&self) -> usize {
        self.connects.load(Ordering::Acquire)
    }

    pub fn read_calls(&self, path: &str) -> usize {
        self.read_calls
            .lock()
            .unwrap()
            .get(path)
            .copied()
            .unwrap_or(0)
    }

    fn should_fail(failures: &Mutex<HashMap<String, usize>>, path: &str) -> bool {
        let mut failures = failures.lock().unwrap();
        let Some(remaining) = failures.get_mut(path) else {
            return false;
        };
        match *remaining {
            0 => false,
            usize::MAX => true,
            _ => {
                *remaining -= 1;
                true
            }
        }
    }
}

#[async_trait::async_trait]
impl Source for MemorySource {
    type Connection = MemoryConnection;

    async fn connect(
        &self,
        _timeout: std::time::Duration,
    ) -> Result<MemoryConnection, SourceError> {
        self.connects.fetch_add(1, Ordering::AcqRel);
        let open = self.open.fetch_add(1, Ordering::AcqRel) + 1;
        self.peak_open.fetch_max(open, Ordering::AcqRel);
        Ok(MemoryConnection {
            authenticated: false,
        })
    }

    async fn authenticate(&self, conn: &mut MemoryConnection) -> Result<(), SourceError> {
        conn.authenticated = true;
        Ok(())
    }

    async fn list(
        &self,
        conn: &mut MemoryConnection,
        path: &str,
    ) -> Result<Vec<String>, SourceError> {
        assert!(conn.authenticated);
        if Self::should_fail(&self.list_failures, path) {
            return Err(SourceError::List {
                path: path.to_string(),
                source: anyhow::anyhow!("421 service not available"),
            });
        }
        match self.tree.lock().unwrap().get(path) {
            Some(Node::Dir(names)) => {
                let mut listing = vec![".".to_string(), "..".to_string()];
                listing.extend(names.iter().cloned());
                Ok(listing)
            }
            _ => Err(SourceError::List {
                path: path.to_string(),
                source: anyhow::anyhow!("550 no such directory"),
            }),
        }
    }

    async fn read_all(
        &self,
        conn: &mut MemoryConnection,
        path: &str,
    ) -> Result<bytes::Bytes, SourceError> {
        assert!(conn.authenticated);
        self.load.sample();
        *self
            .read_calls
            .lock()
            .unwrap()
            .entry(path.to_string())
            .or_default() += 1;
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.panicking.lock().unwrap().contains(path) {
            panic!("reading {path} panicked");
        }
        if Self::should_fail(&self.read_failures, path) {
            return Err(SourceError::Read {
                path: path.to_string(),
                source: anyhow::anyhow!("426 connection closed; transfer aborted"),
            });
        }
        let node = self.tree.lock().unwrap().get(path).cloned();
        match node {
            Some(Node::File(contents)) => Ok(contents),
            Some(Node::Dir(_)) => Err(SourceError::IsDirectory {
                path: path.to_string(),
            }),
            None => Err(SourceError::Read {
                path: path.to_string(),
                source: anyhow::anyhow!("550 no such file"),
            }),
        }
    }

    async fn close(&self, _conn: MemoryConnection) -> Result<(), SourceError> {
        self.open.fetch_sub(1, Ordering::AcqRel);
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoredObject {
    pub body: bytes::Bytes,
    pub options: PutOptions,
}

/// Object store kept in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    objects: Mutex<HashMap<String, StoredObject>>,
    failing_keys: Mutex<HashSet<String>>,
    puts: AtomicUsize,
    delay: Option<std::time::Duration>,
    pub load: LoadSampler,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_delay(mut self, delay: std::time::Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Every upload to `key` fails.
    pub fn fail_key(&self, key: &str) -> &Self {
        self.failing_keys.lock().unwrap().insert(key.to_string());
        self
    }

    pub fn object(&self, key: &str) -> Option<StoredObject> {
        self.objects.lock().unwrap().get(key).cloned()
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.objects.lock().unwrap().keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn put_calls(&self) -> usize {
        self.puts.load(Ordering::Acquire)
    }
}

#[async_trait::async_trait]
impl Sink for MemorySink {
    async fn put_object(
        &self,
        body: bytes::Bytes,
        key: &str,
        options: &PutOptions,
    ) -> Result<(), SinkError> {
        self.load.sample();
        self.puts.fetch_add(1, Ordering::AcqRel);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing_keys.lock().unwrap().contains(key) {
            return Err(SinkError::Put {
                key: key.to_string(),
                source: anyhow::anyhow!("503 slow down"),
            });
        }
        self.objects.lock().unwrap().insert(
            key.to_string(),
            StoredObject {
                body,
                options: options.clone(),
            },
        );
        Ok(())
    }
}

//! JSON file per collection.
//!
//! Writes go to a uniquely named temp sibling which is synced and then renamed
//! over the destination, so readers see either the old or the new file and
//! never a torn one. Batches are written file by file: a crash between two
//! files of one batch leaves the earlier ones committed.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use rand::Rng;
use serde_json::Value;

use super::{Collection, DocumentStore, StoreError, StoreResult};

/// Points at which a write can be made to fail as if the process died.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrashPoint {
    /// The temp file for this collection is fully written but not renamed.
    BeforeRename(Collection),
}

#[derive(Debug)]
pub struct JsonFileStore {
    root: PathBuf,
    crash_point: Mutex<Option<CrashPoint>>,
}

impl JsonFileStore {
    /// Open a store rooted at `root`, creating the directory and sweeping temp
    /// files left behind by an interrupted write.
    pub fn open(root: impl Into<PathBuf>) -> StoreResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;

        for entry in fs::read_dir(&root)? {
            let path = entry?.path();
            if path.extension().is_some_and(|ext| ext == "tmp") {
                tracing::info!("Removing stale temp file {}", path.display());
                fs::remove_file(&path)?;
            }
        }

        Ok(Self {
            root,
            crash_point: Mutex::new(None),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, collection: Collection) -> PathBuf {
        self.root.join(format!("{}.json", collection.name()))
    }

    /// Arm a simulated crash. It fires once, on the next matching write.
    #[cfg(any(test, feature = "fault_injection"))]
    pub fn inject_crash(&self, point: CrashPoint) {
        *self
            .crash_point
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(point);
    }

    fn take_crash(&self, collection: Collection) -> bool {
        let mut armed = self
            .crash_point
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if *armed == Some(CrashPoint::BeforeRename(collection)) {
            *armed = None;
            return true;
        }
        false
    }
}

impl DocumentStore for JsonFileStore {
    fn load(&self, collection: Collection) -> StoreResult<Vec<Value>> {
        let path = self.path_for(collection);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(Vec::new());
        }

        match serde_json::from_slice::<Value>(&bytes) {
            Ok(Value::Array(records)) => Ok(records),
            Ok(_) => {
                tracing::warn!(
                    "{} is not a JSON array; treating {} as empty",
                    path.display(),
                    collection
                );
                Ok(Vec::new())
            }
            Err(e) => {
                tracing::warn!(
                    "Cannot parse {}: {}; treating {} as empty",
                    path.display(),
                    e,
                    collection
                );
                Ok(Vec::new())
            }
        }
    }

    fn save(&self, collection: Collection, records: &[Value]) -> StoreResult<()> {
        let path = self.path_for(collection);
        let body = serde_json::to_vec_pretty(records)?;
        let tmp = write_temp(&path, &body)?;

        if self.take_crash(collection) {
            return Err(StoreError::InjectedCrash(collection));
        }

        if let Err(e) = fs::rename(&tmp, &path) {
            let _ = fs::remove_file(&tmp);
            return Err(e.into());
        }
        Ok(())
    }
}

/// Replace `path` with `bytes` via temp sibling and rename.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let tmp = write_temp(path, bytes)?;
    fs::rename(&tmp, path).inspect_err(|_| {
        let _ = fs::remove_file(&tmp);
    })
}

fn write_temp(path: &Path, bytes: &[u8]) -> io::Result<PathBuf> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent)?;

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let suffix: u32 = rand::thread_rng().gen();
    let tmp = parent.join(format!(".{}.{:08x}.tmp", file_name, suffix));

    let mut file = File::create(&tmp)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    Ok(tmp)
}

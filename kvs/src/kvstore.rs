use crate::{check_key, KvsError, Record, RecordStore, Result, Upsert};
use log::{debug, error, info};
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    ffi::OsStr,
    fs::{self, File, OpenOptions},
    io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write},
    path::{Path, PathBuf},
    sync::{Arc, RwLock},
};

// compact when there is 1 MB compactable
const COMPACT_THRESHOLD: usize = 1024 * 1024;
const COMPACT_TEMP: &str = "compact.tmp";

/// A durable record store backed by a sequential file log
///
/// Reads share the lock and only the append to the log is exclusive.
#[derive(Clone)]
pub struct KvStore {
    inner: Arc<RwLock<InnerKvStore>>,
}

impl KvStore {
    /// Open the KvStore in the given directory, replaying any existing log
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let inner = InnerKvStore::open(path)?;

        Ok(Self {
            inner: Arc::new(RwLock::new(inner)),
        })
    }
}

impl RecordStore for KvStore {
    fn get(&self, key: &str) -> Result<Option<Record>> {
        self.inner.read().map_err(|_| KvsError::LockError)?.get(key)
    }

    fn list(&self) -> Result<Vec<Record>> {
        self.inner.read().map_err(|_| KvsError::LockError)?.list()
    }

    fn upsert(&self, key: String, value: String) -> Result<(Record, Upsert)> {
        check_key(&key)?;
        let command = LogCommand::Set { key, value };
        let entry = serde_json::to_string(&command)?;
        let LogCommand::Set { key, value } = command;

        let outcome = self
            .inner
            .write()
            .map_err(|_| KvsError::LockError)?
            .append(key.clone(), &entry)?;

        Ok((Record { key, value }, outcome))
    }
}

// Inner structure of a `KvStore`
//
// Note: Does not satisfy `RecordStore`, therefore you should use `KvStore` which
// hides the inner state behind a `Arc<RwLock<InnerKvStore>>`
struct InnerKvStore {
    index: BTreeMap<String, LogPointer>,
    log_path: PathBuf,
    dir_path: PathBuf,
    compactable: usize,
    file_number: usize,
}

#[derive(Clone, Debug)]
struct LogPointer {
    offset: u64,
    size: usize,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
enum LogCommand {
    Set { key: String, value: String },
}

impl InnerKvStore {
    fn open(path: impl Into<PathBuf>) -> Result<InnerKvStore> {
        let dir_path = path.into();
        fs::create_dir_all(&dir_path)?;

        // a crash during compaction can leave two logs behind, the newest is complete
        let mut file_number = 0;
        for entry in fs::read_dir(&dir_path)? {
            let path = entry?.path();
            if let Some(n) = log_number(&path) {
                file_number = file_number.max(n);
            }
        }
        let log_path = dir_path.join(format!("{}.log", file_number));

        let file = OpenOptions::new()
            .read(true)
            .create(true)
            .append(true)
            .open(&log_path)?;

        let mut store = InnerKvStore {
            index: BTreeMap::new(),
            log_path,
            dir_path,
            compactable: 0,
            file_number,
        };

        let reader = BufReader::new(&file);
        let mut iterator =
            serde_json::Deserializer::from_reader(reader).into_iter::<LogCommand>();

        // loop over all the items and rebuild the index
        let mut offset = 0;
        while let Some(cmd) = iterator.next() {
            let LogCommand::Set { key, .. } = cmd?;

            let new_offset = iterator.byte_offset();
            let ptr = LogPointer {
                offset: offset as u64,
                size: new_offset - offset,
            };

            // if the key is already stored, note that we can compact
            if let Some(old) = store.index.insert(key, ptr) {
                store.compactable += old.size;
            }

            offset = new_offset;
        }

        store.remove_stale_logs()?;
        debug!(
            "Opened {} with {} records",
            store.log_path.display(),
            store.index.len()
        );

        Ok(store)
    }

    // Append an encoded `Set` entry for `key` and point the index at it
    fn append(&mut self, key: String, entry: &str) -> Result<Upsert> {
        // open the log file with append-only permissions
        let mut file = OpenOptions::new()
            .append(true)
            .create(true)
            .open(&self.log_path)?;

        // simply write the json encoded string to the end of the log file
        let offset = file.seek(SeekFrom::End(0))?;
        if let Err(e) = file.write_all(entry.as_bytes()).and_then(|_| file.flush()) {
            // a torn entry would stop replay at the next open
            file.set_len(offset)?;
            return Err(e.into());
        }

        let ptr = LogPointer {
            offset,
            size: entry.len(),
        };

        // the index insert is the commit point, the previous pointer tells us
        // whether this write created the record
        let outcome = match self.index.insert(key, ptr) {
            Some(old) => {
                self.compactable += old.size;
                Upsert::Updated
            }
            None => Upsert::Created,
        };

        // the write above is committed, a failed compaction is retried on the next one
        if self.compactable > COMPACT_THRESHOLD {
            info!("Compacting database: {} compactable", self.compactable);
            if let Err(e) = self.compact() {
                error!("Compaction of {} failed: {}", self.log_path.display(), e);
            }
        }

        Ok(outcome)
    }

    fn compact(&mut self) -> Result<()> {
        let next_number = self.file_number + 1;
        let next_path = self.dir_path.join(format!("{}.log", next_number));
        let temp_path = self.dir_path.join(COMPACT_TEMP);
        debug!("Compacting into {}", next_path.display());

        let new_log_file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&temp_path)?;
        let mut writer = BufWriter::new(new_log_file);
        let mut current = File::open(&self.log_path)?;

        // the live index keeps pointing into the current log until the rename
        let mut index = BTreeMap::new();
        let mut offset = 0u64;
        for (key, ptr) in &self.index {
            let cmd = read_command(&mut current, ptr)?;
            let j = serde_json::to_string(&cmd)?;
            writer.write_all(j.as_bytes())?;

            index.insert(
                key.clone(),
                LogPointer {
                    offset,
                    size: j.len(),
                },
            );
            offset += j.len() as u64;
        }

        writer.flush()?;
        writer.get_ref().sync_all()?;
        drop(writer);

        // only a fully written log ever carries a `.log` name
        fs::rename(&temp_path, &next_path)?;
        let old_path = std::mem::replace(&mut self.log_path, next_path);
        self.index = index;
        self.file_number = next_number;
        self.compactable = 0;

        // a leftover old log is removed at the next open
        if let Err(e) = fs::remove_file(&old_path) {
            error!("Failed to remove {}: {}", old_path.display(), e);
        }
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<Record>> {
        let Some(ptr) = self.index.get(key) else {
            return Ok(None);
        };

        let mut file = File::open(&self.log_path)?;
        let LogCommand::Set { key, value } = read_command(&mut file, ptr)?;

        Ok(Some(Record { key, value }))
    }

    fn list(&self) -> Result<Vec<Record>> {
        let mut file = File::open(&self.log_path)?;

        self.index
            .values()
            .map(|ptr| -> Result<Record> {
                let LogCommand::Set { key, value } = read_command(&mut file, ptr)?;
                Ok(Record { key, value })
            })
            .collect()
    }

    fn remove_stale_logs(&self) -> Result<()> {
        for entry in fs::read_dir(&self.dir_path)? {
            let path = entry?.path();
            let stale_log = log_number(&path).is_some() && path != self.log_path;
            if stale_log || path.file_name() == Some(OsStr::new(COMPACT_TEMP)) {
                info!("Removing stale log {}", path.display());
                fs::remove_file(&path)?;
            }
        }
        Ok(())
    }
}

fn read_command(file: &mut File, ptr: &LogPointer) -> Result<LogCommand> {
    file.seek(SeekFrom::Start(ptr.offset))?;
    let reader = (&*file).take(ptr.size as u64);
    Ok(serde_json::from_reader(reader)?)
}

// `<n>.log` files in the data directory hold the log, anything else is ignored
fn log_number(path: &Path) -> Option<usize> {
    if path.extension()? != "log" {
        return None;
    }
    path.file_stem()?.to_str()?.parse().ok()
}

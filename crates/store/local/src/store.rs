use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use dashmap::DashSet;
use futures::StreamExt;
use futures::stream::{self, BoxStream};
use tokio::fs;
use tracing::{debug, instrument, warn};

use vanish_core::clock::truncate_to_millis;
use vanish_core::{BlobMetadata, StoredName};
use vanish_store::{BlobStore, Deletion, Handle, Locality, ObjectInfo, StoreError, StoredObject};

use crate::config::LocalConfig;

const SIDECAR_SUFFIX: &str = ".meta.json";
const TEMP_SUFFIX: &str = ".tmp";

/// Blob store keeping each payload as a file in one directory, with its
/// metadata in a JSON sidecar file next to it.
///
/// Writes go to hidden temporary files first and are then hard-linked into
/// place, so a payload never appears before its sidecar and an existing
/// name is never overwritten.
///
/// Listing also reports write residue: sidecars whose payload is gone and
/// temporary files no write in this process still owns. Both carry the
/// file's modification time, so the sweep reclaims them like any other
/// expired record.
#[derive(Debug)]
pub struct LocalBlobStore {
    root: PathBuf,
    max_object_bytes: Option<u64>,
    in_flight: DashSet<PathBuf>,
}

/// What a directory entry is to the store.
#[derive(Debug, PartialEq, Eq)]
enum Entry {
    Payload(StoredName),
    /// A sidecar, named after the payload it describes.
    Sidecar(StoredName),
    /// A temporary file left from a write.
    Temp,
}

/// What a handle points at.
enum Target {
    Payload(PathBuf, StoredName),
    Temp(PathBuf),
}

/// Keeps a temporary file out of listings while its write is running.
struct InFlight<'a> {
    set: &'a DashSet<PathBuf>,
    path: PathBuf,
}

impl<'a> InFlight<'a> {
    fn claim(set: &'a DashSet<PathBuf>, path: PathBuf) -> Self {
        set.insert(path.clone());
        Self { set, path }
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.set.remove(&self.path);
    }
}

enum Listing {
    Start,
    Reading(fs::ReadDir),
    Done,
}

impl LocalBlobStore {
    /// Open (creating if needed) the store directory.
    pub async fn open(config: LocalConfig) -> Result<Self, StoreError> {
        fs::create_dir_all(&config.directory).await.map_err(|e| {
            StoreError::BackendUnavailable(format!(
                "cannot create {}: {e}",
                config.directory.display()
            ))
        })?;
        Ok(Self {
            root: config.directory,
            max_object_bytes: config.max_object_bytes,
            in_flight: DashSet::new(),
        })
    }

    /// Directory the store writes to.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn payload_path(&self, name: &StoredName) -> PathBuf {
        self.root.join(name.to_string())
    }

    /// Map a handle back to a path inside the root, refusing anything this
    /// store could not have produced.
    fn resolve(&self, handle: &Handle) -> Option<Target> {
        let path = Path::new(handle.as_str());
        if path.parent()? != self.root {
            return None;
        }
        match classify(path.file_name()?.to_str()?)? {
            Entry::Payload(name) => Some(Target::Payload(path.to_path_buf(), name)),
            Entry::Temp => Some(Target::Temp(path.to_path_buf())),
            Entry::Sidecar(_) => None,
        }
    }

    async fn link_new(&self, contents: &[u8], target: &Path) -> io::Result<()> {
        let file_name = target
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("blob");
        let tmp = self
            .root
            .join(format!(".{file_name}.{}{TEMP_SUFFIX}", uuid::Uuid::new_v4()));
        let _claim = InFlight::claim(&self.in_flight, tmp.clone());

        fs::write(&tmp, contents).await?;
        let linked = fs::hard_link(&tmp, target).await;
        if let Err(e) = fs::remove_file(&tmp).await {
            warn!(path = %tmp.display(), error = %e, "failed to remove temporary file; leaving to sweep");
        }
        linked
    }

    async fn read_sidecar(&self, payload: &Path, name: &StoredName) -> Option<BlobMetadata> {
        let raw = match fs::read(sidecar_path(payload)).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return None,
            Err(e) => {
                warn!(blob = %name, error = %e, "unreadable metadata sidecar");
                return None;
            }
        };
        match serde_json::from_slice::<BlobMetadata>(&raw) {
            Ok(meta) if meta.stored_name == *name => Some(meta),
            Ok(meta) => {
                warn!(blob = %name, recorded = %meta.stored_name, "metadata sidecar names another blob");
                None
            }
            Err(e) => {
                warn!(blob = %name, error = %e, "corrupt metadata sidecar");
                None
            }
        }
    }

    /// Describe one payload file. `Ok(None)` means it vanished meanwhile.
    async fn describe(&self, path: &Path, name: &StoredName) -> Result<Option<ObjectInfo>, StoreError> {
        let Some(last_modified) = modified_at(path).await? else {
            return Ok(None);
        };
        Ok(Some(ObjectInfo {
            handle: self.locate(name),
            metadata: self.read_sidecar(path, name).await,
            last_modified,
        }))
    }

    /// Describe a sidecar whose payload is missing, under the payload's
    /// handle. `Ok(None)` when the payload exists and is listed on its own.
    async fn describe_orphan(&self, sidecar: &Path, name: &StoredName) -> Result<Option<ObjectInfo>, StoreError> {
        let payload = self.payload_path(name);
        if fs::try_exists(&payload).await.unwrap_or(true) {
            return Ok(None);
        }
        let Some(last_modified) = modified_at(sidecar).await? else {
            return Ok(None);
        };
        debug!(blob = %name, "sidecar without payload");
        Ok(Some(ObjectInfo {
            handle: self.locate(name),
            metadata: self.read_sidecar(&payload, name).await,
            last_modified,
        }))
    }

    /// Describe a temporary file no running write owns.
    async fn describe_temp(&self, path: PathBuf) -> Result<Option<ObjectInfo>, StoreError> {
        if self.in_flight.contains(&path) {
            return Ok(None);
        }
        let Some(last_modified) = modified_at(&path).await? else {
            return Ok(None);
        };
        debug!(path = %path.display(), "abandoned temporary file");
        Ok(Some(ObjectInfo {
            handle: Handle::new(path.to_string_lossy().into_owned()),
            metadata: None,
            last_modified,
        }))
    }

    async fn describe_entry(&self, path: PathBuf, entry: Entry) -> Result<Option<ObjectInfo>, StoreError> {
        match entry {
            Entry::Payload(name) => self.describe(&path, &name).await,
            Entry::Sidecar(name) => self.describe_orphan(&path, &name).await,
            Entry::Temp => self.describe_temp(path).await,
        }
    }
}

/// Classify a file name found in the store directory. `None` for anything
/// the store did not write.
fn classify(file_name: &str) -> Option<Entry> {
    if let Some(hidden) = file_name.strip_prefix('.') {
        let (target, _nonce) = hidden.strip_suffix(TEMP_SUFFIX)?.rsplit_once('.')?;
        let target = target.strip_suffix(SIDECAR_SUFFIX).unwrap_or(target);
        return StoredName::parse(target).ok().map(|_| Entry::Temp);
    }
    if let Some(payload) = file_name.strip_suffix(SIDECAR_SUFFIX) {
        return StoredName::parse(payload).ok().map(Entry::Sidecar);
    }
    StoredName::parse(file_name).ok().map(Entry::Payload)
}

/// Modification time of `path`, `Ok(None)` when it no longer exists and
/// `Ok(Some(None))` when the filesystem reports none.
async fn modified_at(path: &Path) -> Result<Option<Option<DateTime<Utc>>>, StoreError> {
    match fs::metadata(path).await {
        Ok(stat) => Ok(Some(
            stat.modified()
                .ok()
                .map(|at| truncate_to_millis(DateTime::<Utc>::from(at))),
        )),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(StoreError::Backend(e.to_string())),
    }
}

async fn remove_if_present(path: &Path) -> io::Result<bool> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

fn sidecar_path(payload: &Path) -> PathBuf {
    let mut raw = payload.as_os_str().to_owned();
    raw.push(SIDECAR_SUFFIX);
    PathBuf::from(raw)
}

fn io_error(err: &io::Error, what: &str) -> StoreError {
    match err.kind() {
        io::ErrorKind::NotFound => StoreError::NotFound(what.to_owned()),
        io::ErrorKind::AlreadyExists => StoreError::AlreadyExists(what.to_owned()),
        _ => StoreError::Backend(format!("{what}: {err}")),
    }
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    fn backend_name(&self) -> &'static str {
        "local"
    }

    fn locality(&self) -> Locality {
        Locality::ProcessLocal
    }

    fn locate(&self, name: &StoredName) -> Handle {
        Handle::new(self.payload_path(name).to_string_lossy().into_owned())
    }

    #[instrument(skip(self, metadata, data), fields(blob = %metadata.stored_name, size = data.len()))]
    async fn put(&self, metadata: &BlobMetadata, data: Bytes) -> Result<Handle, StoreError> {
        let size = data.len() as u64;
        if let Some(limit) = self.max_object_bytes
            && size > limit
        {
            return Err(StoreError::PayloadTooLarge { size, limit });
        }

        let payload = self.payload_path(&metadata.stored_name);
        let sidecar = sidecar_path(&payload);
        let handle = self.locate(&metadata.stored_name);
        let json =
            serde_json::to_vec(metadata).map_err(|e| StoreError::Serialization(e.to_string()))?;

        self.link_new(&json, &sidecar)
            .await
            .map_err(|e| io_error(&e, handle.as_str()))?;

        if let Err(e) = self.link_new(&data, &payload).await {
            if let Err(cleanup) = fs::remove_file(&sidecar).await {
                warn!(error = %cleanup, "failed to remove sidecar after aborted write");
            }
            return Err(io_error(&e, handle.as_str()));
        }

        debug!("blob written");
        Ok(handle)
    }

    async fn get(&self, handle: &Handle) -> Result<StoredObject, StoreError> {
        let Some(Target::Payload(path, name)) = self.resolve(handle) else {
            return Err(StoreError::NotFound(handle.to_string()));
        };

        let data = fs::read(&path)
            .await
            .map_err(|e| io_error(&e, handle.as_str()))?;
        let info = self
            .describe(&path, &name)
            .await?
            .ok_or_else(|| StoreError::NotFound(handle.to_string()))?;

        Ok(StoredObject {
            info,
            data: Bytes::from(data),
        })
    }

    /// Removes the payload and its sidecar. Either one alone still counts
    /// as [`Deletion::Removed`]; a sidecar that cannot be removed is listed
    /// again on the next sweep.
    #[instrument(skip(self), fields(handle = %handle))]
    async fn delete(&self, handle: &Handle) -> Result<Deletion, StoreError> {
        let path = match self.resolve(handle) {
            None => return Ok(Deletion::AlreadyGone),
            Some(Target::Temp(path)) => {
                let removed = remove_if_present(&path)
                    .await
                    .map_err(|e| io_error(&e, handle.as_str()))?;
                return Ok(if removed { Deletion::Removed } else { Deletion::AlreadyGone });
            }
            Some(Target::Payload(path, _)) => path,
        };

        let payload_removed = remove_if_present(&path)
            .await
            .map_err(|e| io_error(&e, handle.as_str()))?;
        let sidecar_removed = match remove_if_present(&sidecar_path(&path)).await {
            Ok(removed) => removed,
            Err(e) => {
                warn!(error = %e, "sidecar remains; leaving to sweep");
                false
            }
        };

        Ok(if payload_removed || sidecar_removed {
            Deletion::Removed
        } else {
            Deletion::AlreadyGone
        })
    }

    fn list(&self) -> BoxStream<'_, Result<ObjectInfo, StoreError>> {
        stream::unfold(Listing::Start, move |state| async move {
            let mut dir = match state {
                Listing::Done => return None,
                Listing::Reading(dir) => dir,
                Listing::Start => match fs::read_dir(&self.root).await {
                    Ok(dir) => dir,
                    Err(e) if e.kind() == io::ErrorKind::NotFound => return None,
                    Err(e) => {
                        let err = StoreError::BackendUnavailable(format!(
                            "cannot read {}: {e}",
                            self.root.display()
                        ));
                        return Some((Err(err), Listing::Done));
                    }
                },
            };

            loop {
                let entry = match dir.next_entry().await {
                    Ok(Some(entry)) => entry,
                    Ok(None) => return None,
                    Err(e) => {
                        let err = StoreError::Backend(format!("directory scan failed: {e}"));
                        return Some((Err(err), Listing::Done));
                    }
                };
                let path = entry.path();
                let Some(kind) = path.file_name().and_then(|n| n.to_str()).and_then(classify) else {
                    debug!(file = %path.display(), "ignoring foreign file in store directory");
                    continue;
                };
                let record = match &kind {
                    Entry::Payload(name) | Entry::Sidecar(name) => self.locate(name),
                    Entry::Temp => Handle::new(path.to_string_lossy().into_owned()),
                };
                match self.describe_entry(path, kind).await {
                    Ok(Some(info)) => return Some((Ok(info), Listing::Reading(dir))),
                    Ok(None) => {}
                    Err(e) => return Some((Err(e.for_record(record)), Listing::Reading(dir))),
                }
            }
        })
        .boxed()
    }
}

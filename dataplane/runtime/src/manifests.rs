use anyhow::{Context, Result};
use l4_dataplane_api::{self as api, ResourceKey};
use l4_dataplane_index::SharedIndex;
use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    time::Duration,
};
use tokio::{sync::watch, time::MissedTickBehavior};
use tracing::{debug, info, warn};

const EXTENSIONS: &[&str] = &["yaml", "yml", "json"];

/// Keeps the index in sync with the manifests in a directory.
///
/// Each file holds any number of resources. Resources are applied when their declaration changes
/// and deleted once no file declares them. When several files declare the same resource, the
/// file that sorts last wins. A file that fails to decode keeps the resources it last declared
/// successfully.
#[derive(Debug)]
pub struct ManifestDir {
    dir: PathBuf,
    index: SharedIndex,
    files: BTreeMap<PathBuf, Manifest>,
    applied: BTreeMap<ResourceKey, api::Resource>,
}

#[derive(Debug)]
struct Manifest {
    contents: String,
    resources: Vec<api::Resource>,
}

/// Counts the resources touched by a sync.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Synced {
    pub applied: usize,
    pub deleted: usize,
}

// === impl ManifestDir ===

impl ManifestDir {
    pub fn new(dir: impl Into<PathBuf>, index: SharedIndex) -> Self {
        Self {
            dir: dir.into(),
            index,
            files: BTreeMap::new(),
            applied: BTreeMap::new(),
        }
    }

    /// Polls the directory every `interval` until shutdown, marking the process ready after the
    /// first successful sync.
    pub async fn run(
        mut self,
        interval: Duration,
        ready: watch::Sender<bool>,
        shutdown: kubert::shutdown::Watch,
    ) {
        tokio::pin! {
            let shutdown = shutdown.signaled();
        }

        let mut timer = tokio::time::interval(interval);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = timer.tick() => {}
                _ = &mut shutdown => {
                    debug!("manifest poller shutting down");
                    return;
                }
            }

            match self.sync().await {
                Ok(synced) => {
                    if synced != Synced::default() {
                        info!(dir = %self.dir.display(), applied = synced.applied, deleted = synced.deleted, "Synced manifests");
                    }
                    ready.send_if_modified(|ready| !std::mem::replace(ready, true));
                }
                Err(error) => {
                    warn!(dir = %self.dir.display(), error = %format_args!("{error:#}"), "Failed to read manifests")
                }
            }
        }
    }

    /// Reads every manifest in the directory and updates the index with what changed.
    pub async fn sync(&mut self) -> Result<Synced> {
        let paths = list(&self.dir).await?;

        let mut changed = false;
        let mut files = BTreeMap::new();
        for path in paths {
            let contents = match tokio::fs::read_to_string(&path).await {
                Ok(contents) => contents,
                Err(error) => {
                    warn!(path = %path.display(), %error, "Failed to read manifest");
                    if let Some(manifest) = self.files.remove(&path) {
                        files.insert(path, manifest);
                    }
                    continue;
                }
            };

            let previous = match self.files.remove(&path) {
                Some(manifest) if manifest.contents == contents => {
                    files.insert(path, manifest);
                    continue;
                }
                manifest => manifest,
            };

            changed = true;
            let resources = match api::decode_all(&contents) {
                Ok(resources) => resources,
                Err(error) => {
                    warn!(path = %path.display(), %error, "Invalid manifest; keeping previous resources");
                    previous.map(|manifest| manifest.resources).unwrap_or_default()
                }
            };
            files.insert(path, Manifest { contents, resources });
        }
        // Files that vanished are left in `self.files`.
        changed |= !self.files.is_empty();
        self.files = files;

        if !changed {
            return Ok(Synced::default());
        }

        let declared = self.declared();
        let updates = declared
            .iter()
            .filter(|(key, resource)| self.applied.get(*key) != Some(*resource))
            .map(|(_, resource)| resource.clone())
            .collect::<Vec<_>>();
        let removed = self
            .applied
            .keys()
            .filter(|key| !declared.contains_key(*key))
            .cloned()
            .collect::<Vec<_>>();

        let synced = Synced {
            applied: updates.len(),
            deleted: removed.len(),
        };

        // Applies precede deletes so that a resource moving between files is never dropped.
        let mut index = self.index.write();
        for resource in updates {
            index.apply_resource(resource);
        }
        for key in removed {
            index.delete_resource(key);
        }
        drop(index);

        self.applied = declared;
        Ok(synced)
    }

    /// Every resource declared by the directory. Files are visited in path order so a later file
    /// replaces an earlier declaration of the same resource.
    fn declared(&self) -> BTreeMap<ResourceKey, api::Resource> {
        let mut declared = BTreeMap::new();
        for (path, manifest) in &self.files {
            for resource in &manifest.resources {
                let key = resource.key();
                if declared.insert(key.clone(), resource.clone()).is_some() {
                    warn!(path = %path.display(), %key, "Resource declared more than once; the last file wins");
                }
            }
        }
        declared
    }
}

async fn list(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut entries = tokio::fs::read_dir(dir)
        .await
        .with_context(|| format!("failed to read {}", dir.display()))?;

    let mut paths = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let is_manifest = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| EXTENSIONS.contains(&ext))
            .unwrap_or(false);
        if is_manifest && entry.file_type().await?.is_file() {
            paths.push(path);
        }
    }
    paths.sort();
    Ok(paths)
}

//! Cached access to package images
//!
//! Tags are always resolved against the registry. Everything keyed by a
//! digest (layer tars, config documents) goes through the [`BlobCache`].

use crate::api::{Lifecycle, PackageResources, Task};
use crate::archive::{read_package_archive, write_package_archive};
use crate::error::{PorchletError, PorchletResult};
use crate::oci::cache::BlobCache;
use crate::oci::client::{History, ImageConfig, RegistryClient};
use crate::oci::{ImageDigestName, ImageTagName};
use chrono::{SecondsFormat, Utc};
use std::io::Cursor;
use std::sync::Arc;
use tracing::{debug, warn};

/// Prefix marking image history entries that carry a task record
pub const TASK_MARKER: &str = "kpt:";

/// Image config label holding the revision's lifecycle
pub const LIFECYCLE_LABEL: &str = "dev.porchlet.lifecycle";

/// Image config labels naming the package and revision; they make every
/// tag's manifest digest distinct, so deleting one tag never drops another
pub const PACKAGE_LABEL: &str = "dev.porchlet.package";
pub const REVISION_LABEL: &str = "dev.porchlet.revision";

const RESOURCES_CACHE: &str = "resources";
const CONFIG_CACHE: &str = "config";

/// Registry access with a digest-keyed disk cache in front
#[derive(Clone)]
pub struct Storage {
    client: Arc<dyn RegistryClient>,
    cache: BlobCache,
}

impl Storage {
    pub fn new(client: Arc<dyn RegistryClient>, cache: BlobCache) -> Self {
        Self { client, cache }
    }

    pub fn client(&self) -> &Arc<dyn RegistryClient> {
        &self.client
    }

    /// Current digest of a tag (never cached)
    pub async fn resolve_tag(&self, tag: &ImageTagName) -> PorchletResult<ImageDigestName> {
        self.client.resolve_tag(tag).await
    }

    /// File tree of an image; an empty digest is an empty package
    pub async fn load_resources(
        &self,
        image: &ImageDigestName,
    ) -> PorchletResult<PackageResources> {
        if image.digest.is_empty() {
            return Ok(PackageResources::new());
        }

        let client = Arc::clone(&self.client);
        let tar = self
            .cache
            .read_or_fetch(RESOURCES_CACHE, &image.digest, || async move {
                let layers = client.fetch_layers(image).await?;
                Ok(Cursor::new(layers))
            })
            .await?;

        read_package_archive(&tar[..])
    }

    /// Parsed image config document
    pub async fn load_config(&self, image: &ImageDigestName) -> PorchletResult<ImageConfig> {
        let client = Arc::clone(&self.client);
        let bytes = self
            .cache
            .read_or_fetch(CONFIG_CACHE, &image.digest, || async move {
                let config = client.fetch_config(image).await?;
                Ok(Cursor::new(config))
            })
            .await?;

        serde_json::from_slice(&bytes)
            .map_err(|e| PorchletError::registry(image, format!("invalid image config: {}", e)))
    }

    /// Provenance tasks recorded in the image history, oldest first
    pub async fn load_tasks(&self, image: &ImageDigestName) -> PorchletResult<Vec<Task>> {
        if image.digest.is_empty() {
            return Ok(vec![]);
        }
        let config = self.load_config(image).await?;
        Ok(tasks_from_history(&config.history))
    }

    /// Lifecycle recorded on the image, if any
    pub async fn load_lifecycle(
        &self,
        image: &ImageDigestName,
    ) -> PorchletResult<Option<Lifecycle>> {
        if image.digest.is_empty() {
            return Ok(None);
        }
        let config = self.load_config(image).await?;
        Ok(lifecycle_from_config(&config))
    }

    /// Push a package revision as a single-layer image under `tag`
    pub async fn push(
        &self,
        tag: &ImageTagName,
        resources: &PackageResources,
        tasks: &[Task],
        lifecycle: Lifecycle,
    ) -> PorchletResult<ImageDigestName> {
        let layer = write_package_archive(resources)?;
        let config = image_config(tag, tasks, lifecycle)?;
        let digest = self.client.push_image(tag, layer, config).await?;
        debug!("Stored {} at {}", tag, digest.digest);
        Ok(digest)
    }
}

/// Collect task records from history entries, skipping anything else
pub fn tasks_from_history(history: &[History]) -> Vec<Task> {
    let mut tasks = Vec::new();
    for entry in history {
        let Some(payload) = entry.created_by.strip_prefix(TASK_MARKER) else {
            warn!("Skipping unknown image history entry: {:?}", entry.created_by);
            continue;
        };
        match serde_json::from_str::<Task>(payload) {
            Ok(task) => tasks.push(task),
            Err(e) => warn!("Failed to parse task record {:?}: {}", payload, e),
        }
    }
    tasks
}

fn lifecycle_from_config(config: &ImageConfig) -> Option<Lifecycle> {
    let value = config.label(LIFECYCLE_LABEL)?;
    match value.parse() {
        Ok(lifecycle) => Some(lifecycle),
        Err(e) => {
            warn!("Ignoring lifecycle label: {}", e);
            None
        }
    }
}

fn image_config(
    tag: &ImageTagName,
    tasks: &[Task],
    lifecycle: Lifecycle,
) -> PorchletResult<ImageConfig> {
    let created = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
    let mut config = ImageConfig {
        architecture: "amd64".to_string(),
        os: "linux".to_string(),
        created: Some(created.clone()),
        ..ImageConfig::default()
    };
    let labels = &mut config.config.labels;
    labels.insert(LIFECYCLE_LABEL.to_string(), lifecycle.to_string());
    labels.insert(PACKAGE_LABEL.to_string(), tag.image.clone());
    labels.insert(REVISION_LABEL.to_string(), tag.tag.clone());

    for task in tasks {
        config.history.push(History {
            created: Some(created.clone()),
            created_by: format!("{}{}", TASK_MARKER, serde_json::to_string(task)?),
            ..History::default()
        });
    }
    Ok(config)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::api::TaskType;
    use async_trait::async_trait;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tar::{Builder, EntryType, Header};
    use tempfile::TempDir;

    /// In-memory registry recording how often content was fetched
    #[derive(Default)]
    pub(crate) struct FakeRegistry {
        pub tags: Mutex<BTreeMap<String, BTreeMap<String, String>>>,
        pub layers: Mutex<BTreeMap<String, Vec<u8>>>,
        pub configs: Mutex<BTreeMap<String, ImageConfig>>,
        pub layer_fetches: AtomicUsize,
        pub resolves: AtomicUsize,
        pub pushes: AtomicUsize,
    }

    impl FakeRegistry {
        pub fn insert(&self, image: &str, tag: &str, digest: &str, layer: Vec<u8>, config: ImageConfig) {
            self.tags
                .lock()
                .unwrap()
                .entry(image.to_string())
                .or_default()
                .insert(tag.to_string(), digest.to_string());
            self.layers.lock().unwrap().insert(digest.to_string(), layer);
            self.configs.lock().unwrap().insert(digest.to_string(), config);
        }
    }

    #[async_trait]
    impl RegistryClient for FakeRegistry {
        async fn list_images(&self, prefix: &str) -> PorchletResult<Vec<String>> {
            let under = format!("{}/", prefix.trim_end_matches('/'));
            Ok(self
                .tags
                .lock()
                .unwrap()
                .iter()
                .filter(|(image, tags)| image.starts_with(&under) && !tags.is_empty())
                .map(|(image, _)| image.clone())
                .collect())
        }

        async fn list_tags(&self, image: &str) -> PorchletResult<Vec<String>> {
            Ok(self
                .tags
                .lock()
                .unwrap()
                .get(image)
                .map(|tags| tags.keys().cloned().collect())
                .unwrap_or_default())
        }

        async fn resolve_tag(&self, tag: &ImageTagName) -> PorchletResult<ImageDigestName> {
            self.resolves.fetch_add(1, Ordering::SeqCst);
            self.tags
                .lock()
                .unwrap()
                .get(&tag.image)
                .and_then(|tags| tags.get(&tag.tag))
                .map(|digest| ImageDigestName::new(&tag.image, digest))
                .ok_or_else(|| PorchletError::registry(tag, "tag not found"))
        }

        async fn fetch_config(&self, image: &ImageDigestName) -> PorchletResult<Vec<u8>> {
            let configs = self.configs.lock().unwrap();
            let config = configs
                .get(&image.digest)
                .ok_or_else(|| PorchletError::registry(image, "manifest unknown"))?;
            Ok(serde_json::to_vec(config)?)
        }

        async fn fetch_layers(&self, image: &ImageDigestName) -> PorchletResult<Vec<u8>> {
            self.layer_fetches.fetch_add(1, Ordering::SeqCst);
            self.layers
                .lock()
                .unwrap()
                .get(&image.digest)
                .cloned()
                .ok_or_else(|| PorchletError::registry(image, "manifest unknown"))
        }

        async fn push_image(
            &self,
            tag: &ImageTagName,
            layer: Vec<u8>,
            config: ImageConfig,
        ) -> PorchletResult<ImageDigestName> {
            let n = self.pushes.fetch_add(1, Ordering::SeqCst);
            let digest = format!("sha256:{:064x}", n + 1);
            self.insert(&tag.image, &tag.tag, &digest, layer, config);
            Ok(ImageDigestName::new(&tag.image, digest))
        }

        async fn delete_image(&self, image: &ImageDigestName) -> PorchletResult<()> {
            let mut tags = self.tags.lock().unwrap();
            if let Some(image_tags) = tags.get_mut(&image.image) {
                image_tags.retain(|_, digest| *digest != image.digest);
            }
            Ok(())
        }
    }

    fn history(entries: &[&str]) -> Vec<History> {
        entries
            .iter()
            .map(|e| History {
                created_by: e.to_string(),
                ..History::default()
            })
            .collect()
    }

    fn storage(registry: Arc<FakeRegistry>) -> (Storage, TempDir) {
        let temp = TempDir::new().unwrap();
        let storage = Storage::new(registry, BlobCache::new(temp.path()));
        (storage, temp)
    }

    #[test]
    fn provenance_skips_unmarked_entries() {
        let tasks = tasks_from_history(&history(&["kpt:{\"name\":\"init\"}", "unrelated-command"]));
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].name, "init");
    }

    #[test]
    fn provenance_skips_malformed_records_and_keeps_order() {
        let tasks = tasks_from_history(&history(&[
            "kpt:{\"name\":\"init\",\"type\":\"init\"}",
            "kpt:{not json",
            "kpt:{\"name\":\"render\",\"type\":\"eval\",\"eval\":{\"image\":\"set-labels:v0.1\"}}",
        ]));
        let names: Vec<&str> = tasks.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["init", "render"]);
        assert_eq!(tasks[1].task_type, Some(TaskType::Eval));
    }

    #[tokio::test]
    async fn empty_digest_is_an_empty_package() {
        let registry = Arc::new(FakeRegistry::default());
        let (storage, _temp) = storage(registry.clone());

        let image = ImageDigestName::new("localhost:5000/pkgs/app", "");
        assert!(storage.load_resources(&image).await.unwrap().is_empty());
        assert!(storage.load_tasks(&image).await.unwrap().is_empty());
        assert_eq!(registry.layer_fetches.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn resources_are_fetched_once_per_digest() {
        let registry = Arc::new(FakeRegistry::default());
        let mut resources = PackageResources::new();
        resources.insert("Kptfile", "kind: Kptfile\n");
        let layer = write_package_archive(&resources).unwrap();
        registry.insert("localhost:5000/pkgs/app", "v1", "sha256:aaaa", layer, ImageConfig::default());
        let (storage, _temp) = storage(registry.clone());

        let tag = ImageTagName::new("localhost:5000/pkgs/app", "v1");
        let image = storage.resolve_tag(&tag).await.unwrap();
        let first = storage.load_resources(&image).await.unwrap();
        let second = storage.load_resources(&image).await.unwrap();

        assert_eq!(first, resources);
        assert_eq!(first, second);
        assert_eq!(registry.layer_fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn symlinks_fail_without_partial_tree() {
        let mut builder = Builder::new(Vec::new());
        let mut header = Header::new_ustar();
        header.set_size(4);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append_data(&mut header, "Kptfile", &b"kind"[..]).unwrap();
        let mut link = Header::new_ustar();
        link.set_entry_type(EntryType::Symlink);
        link.set_size(0);
        builder.append_link(&mut link, "escape", "/etc/passwd").unwrap();
        let layer = builder.into_inner().unwrap();

        let registry = Arc::new(FakeRegistry::default());
        registry.insert("localhost:5000/pkgs/app", "v1", "sha256:bbbb", layer, ImageConfig::default());
        let (storage, _temp) = storage(registry);

        let image = ImageDigestName::new("localhost:5000/pkgs/app", "sha256:bbbb");
        let err = storage.load_resources(&image).await.unwrap_err();
        assert!(matches!(err, PorchletError::UnsupportedEntry { .. }));
    }

    #[tokio::test]
    async fn unknown_tag_is_a_registry_error() {
        let (storage, _temp) = storage(Arc::new(FakeRegistry::default()));
        let err = storage
            .resolve_tag(&ImageTagName::new("localhost:5000/pkgs/app", "v9"))
            .await
            .unwrap_err();
        assert!(matches!(err, PorchletError::Registry { .. }));
    }

    #[tokio::test]
    async fn unknown_records_are_pushed_back_verbatim() {
        let record = r#"kpt:{"name":"x","type":"render-v2","render":{"fn":"a"}}"#;
        let tasks = tasks_from_history(&history(&[record]));
        assert_eq!(tasks.len(), 1);

        let registry = Arc::new(FakeRegistry::default());
        let (storage, _temp) = storage(registry.clone());
        let tag = ImageTagName::new("localhost:5000/pkgs/app", "v1");
        let image = storage
            .push(&tag, &PackageResources::new(), &tasks, Lifecycle::Draft)
            .await
            .unwrap();

        let config = registry.configs.lock().unwrap()[&image.digest].clone();
        let written: serde_json::Value =
            serde_json::from_str(config.history[0].created_by.strip_prefix(TASK_MARKER).unwrap())
                .unwrap();
        let original: serde_json::Value =
            serde_json::from_str(record.strip_prefix(TASK_MARKER).unwrap()).unwrap();
        assert_eq!(written, original);
        assert_eq!(storage.load_tasks(&image).await.unwrap(), tasks);
    }

    #[test]
    fn identical_revisions_get_distinct_configs() {
        let tasks = vec![Task::init(Default::default())];
        let v1 = ImageTagName::new("localhost:5000/pkgs/basens", "v1");
        let v2 = ImageTagName::new("localhost:5000/pkgs/basens", "v2");

        let mut first = image_config(&v1, &tasks, Lifecycle::Draft).unwrap();
        let mut second = image_config(&v2, &tasks, Lifecycle::Draft).unwrap();
        for config in [&mut first, &mut second] {
            config.created = None;
            for entry in &mut config.history {
                entry.created = None;
            }
        }

        assert_ne!(
            serde_json::to_vec(&first).unwrap(),
            serde_json::to_vec(&second).unwrap()
        );
        assert_eq!(first.label(REVISION_LABEL), Some("v1"));
        assert_eq!(second.label(PACKAGE_LABEL), Some("localhost:5000/pkgs/basens"));
    }

    #[tokio::test]
    async fn push_records_tasks_and_lifecycle() {
        let registry = Arc::new(FakeRegistry::default());
        let (storage, _temp) = storage(registry);

        let tag = ImageTagName::new("localhost:5000/pkgs/app", "v1");
        let tasks = vec![Task::init(Default::default())];
        let image = storage
            .push(&tag, &PackageResources::new(), &tasks, Lifecycle::Proposed)
            .await
            .unwrap();

        let loaded = storage.load_tasks(&image).await.unwrap();
        assert_eq!(loaded, tasks);
        assert_eq!(
            storage.load_lifecycle(&image).await.unwrap(),
            Some(Lifecycle::Proposed)
        );
    }
}

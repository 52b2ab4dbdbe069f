//! `src/asset/library.rs`
//!
//! # Asset libraries and the process-scoped registry
//!
//! An [`AssetLibrary`] owns its [`AssetRepresentation`]s (`Arc`). Listing
//! entries only ever hold an [`AssetHandle`], a `Weak` that resolves to
//! `None` once the library dropped the asset. Removal may race a reader
//! resolving the handle; the reader either gets a live `Arc` or nothing.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};

use compact_str::CompactString;
use hashbrown::HashMap;
use parking_lot::{Mutex, RwLock, RwLockReadGuard};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::asset::catalog::CatalogService;
use crate::error::{CoreError, CoreResult};
use crate::model::id_code::IdCode;

// ------------------------------------------------------------
// Metadata
// ------------------------------------------------------------

/// Download information for assets whose file lives on a remote server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OnlineAssetInfo {
    pub url: CompactString,
    pub content_hash: CompactString,
    /// Library file the asset is stored in, relative to the library root.
    pub file: CompactString,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetMetaData {
    pub catalog_id: Option<Uuid>,
    pub catalog_simple_name: CompactString,
    pub tags: Vec<CompactString>,
    pub description: Option<CompactString>,
    pub author: Option<CompactString>,
    pub online: Option<OnlineAssetInfo>,
}

#[derive(Debug)]
pub struct AssetRepresentation {
    /// Path relative to the library root, `file.blend/Group/Name` style.
    pub identifier: CompactString,
    pub name: CompactString,
    pub id_code: Option<IdCode>,
    pub metadata: AssetMetaData,
    /// Catalog path resolved against the owning library at registration.
    pub catalog_path: Option<CompactString>,
    /// Stored in the currently open file rather than an external one.
    pub is_local: bool,
    /// Root of the owning library; `identifier` is relative to it.
    pub library_root: Option<PathBuf>,
}

impl AssetRepresentation {
    #[must_use]
    pub const fn is_online(&self) -> bool {
        self.metadata.online.is_some()
    }

    /// Absolute location for external assets.
    #[must_use]
    pub fn full_path(&self) -> Option<PathBuf> {
        self.library_root
            .as_ref()
            .map(|root| root.join(self.identifier.as_str()))
    }
}

/// Non-owning reference from a listing entry to an asset.
#[derive(Debug, Clone, Default)]
pub struct AssetHandle(Weak<AssetRepresentation>);

impl AssetHandle {
    #[must_use]
    pub fn new(asset: &Arc<AssetRepresentation>) -> Self {
        Self(Arc::downgrade(asset))
    }

    #[must_use]
    pub fn resolve(&self) -> Option<Arc<AssetRepresentation>> {
        self.0.upgrade()
    }

    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.0.strong_count() > 0
    }
}

// ------------------------------------------------------------
// AssetLibrary
// ------------------------------------------------------------

/// Configured location of an asset library.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetLibraryDefinition {
    pub name: CompactString,
    pub path: PathBuf,
    #[serde(default)]
    pub remote_url: Option<CompactString>,
}

#[derive(Debug)]
pub struct AssetLibrary {
    name: CompactString,
    root_path: Option<PathBuf>,
    remote_url: Option<CompactString>,
    assets: Mutex<Vec<Arc<AssetRepresentation>>>,
    catalogs: RwLock<CatalogService>,
}

impl AssetLibrary {
    #[must_use]
    pub fn new(name: impl Into<CompactString>, root_path: Option<PathBuf>) -> Self {
        Self {
            name: name.into(),
            root_path,
            remote_url: None,
            assets: Mutex::new(Vec::new()),
            catalogs: RwLock::new(CatalogService::new()),
        }
    }

    /// Build from a definition and read its catalogs from disk.
    pub fn from_definition(definition: &AssetLibraryDefinition) -> CoreResult<Self> {
        let mut library = Self::new(definition.name.clone(), Some(definition.path.clone()));
        library.remote_url = definition.remote_url.clone();
        library.reload_catalogs()?;
        Ok(library)
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn root_path(&self) -> Option<&Path> {
        self.root_path.as_deref()
    }

    #[must_use]
    pub fn remote_url(&self) -> Option<&str> {
        self.remote_url.as_deref()
    }

    fn resolve_catalog_path(&self, metadata: &AssetMetaData) -> Option<CompactString> {
        let id = metadata.catalog_id?;
        self.catalogs.read().find(&id).map(|entry| entry.path.clone())
    }

    fn register(&self, asset: AssetRepresentation) -> Arc<AssetRepresentation> {
        let asset = Arc::new(asset);
        self.assets.lock().push(Arc::clone(&asset));
        asset
    }

    /// Register an asset stored in an external library file.
    pub fn add_external_asset(
        &self,
        identifier: impl Into<CompactString>,
        name: impl Into<CompactString>,
        id_code: Option<IdCode>,
        metadata: AssetMetaData,
    ) -> Arc<AssetRepresentation> {
        let catalog_path = self.resolve_catalog_path(&metadata);
        self.register(AssetRepresentation {
            identifier: identifier.into(),
            name: name.into(),
            id_code,
            metadata,
            catalog_path,
            is_local: false,
            library_root: self.root_path.clone(),
        })
    }

    /// Register an asset living in the currently open file.
    pub fn add_local_id_asset(
        &self,
        id_code: IdCode,
        name: impl Into<CompactString>,
        metadata: AssetMetaData,
    ) -> Arc<AssetRepresentation> {
        let name: CompactString = name.into();
        let catalog_path = self.resolve_catalog_path(&metadata);
        self.register(AssetRepresentation {
            identifier: CompactString::from(format!("{}/{name}", id_code.group_name())),
            name,
            id_code: Some(id_code),
            metadata,
            catalog_path,
            is_local: true,
            library_root: None,
        })
    }

    /// Drop the library's ownership. Outstanding handles resolve to `None`.
    pub fn remove_asset(&self, asset: &Arc<AssetRepresentation>) -> bool {
        let mut assets = self.assets.lock();
        let before = assets.len();
        assets.retain(|owned| !Arc::ptr_eq(owned, asset));
        before != assets.len()
    }

    /// Forget every local asset, e.g. before main data is re-listed.
    pub fn remove_all_local(&self) -> usize {
        let mut assets = self.assets.lock();
        let before = assets.len();
        assets.retain(|asset| !asset.is_local);
        before - assets.len()
    }

    /// Forget every external asset before a full re-read.
    pub fn remove_all_external(&self) -> usize {
        let mut assets = self.assets.lock();
        let before = assets.len();
        assets.retain(|asset| asset.is_local);
        before - assets.len()
    }

    #[must_use]
    pub fn assets(&self) -> Vec<Arc<AssetRepresentation>> {
        self.assets.lock().clone()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.assets.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.assets.lock().is_empty()
    }

    pub fn catalogs(&self) -> RwLockReadGuard<'_, CatalogService> {
        self.catalogs.read()
    }

    pub fn set_catalogs(&self, service: CatalogService) {
        *self.catalogs.write() = service;
    }

    /// Re-read the catalog definition file; libraries without a root keep
    /// whatever catalogs they have.
    pub fn reload_catalogs(&self) -> CoreResult<()> {
        let Some(root) = self.root_path.as_deref() else {
            return Ok(());
        };
        let service = CatalogService::load_from_dir(root)?;
        debug!(
            marker = "ASSET_CATALOGS_LOADED",
            operation_type = "asset_library",
            library = %self.name,
            catalogs = service.len(),
            "Loaded asset catalogs"
        );
        *self.catalogs.write() = service;
        Ok(())
    }

    /// Whether `path` lies inside this library's root.
    #[must_use]
    pub fn contains_path(&self, path: &Path) -> bool {
        self.root_path
            .as_deref()
            .is_some_and(|root| path.starts_with(root))
    }
}

// ------------------------------------------------------------
// Registry
// ------------------------------------------------------------

/// Which library a listing targets.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AssetLibraryReference {
    /// Every configured library plus the current file.
    #[default]
    All,
    /// Only the currently open file.
    CurrentFile,
    /// A configured library by name.
    Custom(CompactString),
}

/// Process-scoped owner of loaded asset libraries. Create one per session
/// (or share it) and call [`Self::shutdown`] when done.
#[derive(Debug)]
pub struct AssetLibraryRegistry {
    definitions: RwLock<Vec<AssetLibraryDefinition>>,
    loaded: Mutex<HashMap<CompactString, Arc<AssetLibrary>>>,
    current_file: Arc<AssetLibrary>,
}

impl Default for AssetLibraryRegistry {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl AssetLibraryRegistry {
    #[must_use]
    pub fn new(definitions: Vec<AssetLibraryDefinition>) -> Self {
        Self {
            definitions: RwLock::new(definitions),
            loaded: Mutex::new(HashMap::new()),
            current_file: Arc::new(AssetLibrary::new("Current File", None)),
        }
    }

    #[must_use]
    pub fn definitions(&self) -> Vec<AssetLibraryDefinition> {
        self.definitions.read().clone()
    }

    #[must_use]
    pub fn definition(&self, name: &str) -> Option<AssetLibraryDefinition> {
        self.definitions
            .read()
            .iter()
            .find(|definition| definition.name == name)
            .cloned()
    }

    pub fn add_definition(&self, definition: AssetLibraryDefinition) {
        let mut definitions = self.definitions.write();
        definitions.retain(|existing| existing.name != definition.name);
        definitions.push(definition);
    }

    #[must_use]
    pub fn current_file_library(&self) -> Arc<AssetLibrary> {
        Arc::clone(&self.current_file)
    }

    /// Load (or fetch the already loaded) library for `reference`. `All`
    /// loads every configured library and returns the current-file one.
    pub fn load(&self, reference: &AssetLibraryReference) -> CoreResult<Arc<AssetLibrary>> {
        match reference {
            AssetLibraryReference::CurrentFile => Ok(self.current_file_library()),
            AssetLibraryReference::All => {
                for definition in self.definitions() {
                    if let Err(err) = self.load_definition(&definition) {
                        warn!(
                            marker = "ASSET_LIBRARY_LOAD_FAILED",
                            operation_type = "asset_library",
                            library = %definition.name,
                            error = %err,
                            "Skipping asset library"
                        );
                    }
                }
                Ok(self.current_file_library())
            }
            AssetLibraryReference::Custom(name) => {
                let definition = self
                    .definition(name)
                    .ok_or_else(|| CoreError::invalid_input("asset_library", name))?;
                self.load_definition(&definition)
            }
        }
    }

    fn load_definition(&self, definition: &AssetLibraryDefinition) -> CoreResult<Arc<AssetLibrary>> {
        if let Some(library) = self.loaded.lock().get(&definition.name) {
            return Ok(Arc::clone(library));
        }

        let library = Arc::new(AssetLibrary::from_definition(definition)?);
        info!(
            marker = "ASSET_LIBRARY_LOADED",
            operation_type = "asset_library",
            library = %definition.name,
            path = %definition.path.display(),
            "Asset library loaded"
        );

        // A concurrent loader may have won; keep whichever got in first.
        let mut loaded = self.loaded.lock();
        Ok(Arc::clone(loaded.entry(definition.name.clone()).or_insert(library)))
    }

    /// Loaded libraries, current file first.
    #[must_use]
    pub fn all_libraries(&self) -> Vec<Arc<AssetLibrary>> {
        let mut libraries = vec![self.current_file_library()];
        libraries.extend(self.loaded.lock().values().cloned());
        libraries
    }

    /// Library whose root contains `path`, if one is loaded.
    #[must_use]
    pub fn library_for_path(&self, path: &Path) -> Option<Arc<AssetLibrary>> {
        self.loaded
            .lock()
            .values()
            .find(|library| library.contains_path(path))
            .cloned()
    }

    /// Drop every loaded library. Handles held by listings go dead.
    pub fn shutdown(&self) {
        let count = {
            let mut loaded = self.loaded.lock();
            let count = loaded.len();
            loaded.clear();
            count
        };
        self.current_file.remove_all_local();
        info!(
            marker = "ASSET_REGISTRY_SHUTDOWN",
            operation_type = "asset_library",
            libraries = count,
            "Asset library registry shut down"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_handle_goes_dead_after_removal() {
        let library = AssetLibrary::new("test", None);
        let asset = library.add_external_asset("lib.blend/Object/Cube", "Cube", Some(IdCode::Object), AssetMetaData::default());
        let handle = AssetHandle::new(&asset);
        assert!(handle.resolve().is_some());

        assert!(library.remove_asset(&asset));
        drop(asset);
        assert!(handle.resolve().is_none());
        assert!(!handle.is_alive());
    }

    #[test]
    fn test_remove_all_local_keeps_external() {
        let library = AssetLibrary::new("test", None);
        library.add_local_id_asset(IdCode::Material, "Wood", AssetMetaData::default());
        library.add_external_asset("a.blend/Mesh/M", "M", Some(IdCode::Mesh), AssetMetaData::default());

        assert_eq!(library.remove_all_local(), 1);
        assert_eq!(library.len(), 1);
        assert!(!library.assets()[0].is_local);
    }

    #[test]
    fn test_registry_load_and_shutdown() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(
            tmp.path().join(crate::asset::catalog::CATALOG_DEFINITION_FILENAME),
            "VERSION 1\n00000000-0000-0000-0000-000000000001:props:props\n",
        )
        .unwrap();

        let registry = AssetLibraryRegistry::new(vec![AssetLibraryDefinition {
            name: "props".into(),
            path: tmp.path().to_path_buf(),
            remote_url: None,
        }]);

        let library = registry
            .load(&AssetLibraryReference::Custom("props".into()))
            .unwrap();
        assert_eq!(library.catalogs().len(), 1);
        let again = registry
            .load(&AssetLibraryReference::Custom("props".into()))
            .unwrap();
        assert!(Arc::ptr_eq(&library, &again));

        let metadata = AssetMetaData {
            catalog_id: Some(Uuid::from_u128(1)),
            ..AssetMetaData::default()
        };
        let asset = library.add_external_asset("x.blend/Object/Chair", "Chair", Some(IdCode::Object), metadata);
        assert_eq!(asset.catalog_path.as_deref(), Some("props"));

        assert!(registry.library_for_path(&tmp.path().join("x.blend")).is_some());
        assert_eq!(registry.all_libraries().len(), 2);

        registry.shutdown();
        assert_eq!(registry.all_libraries().len(), 1);
        assert!(registry.load(&AssetLibraryReference::Custom("missing".into())).is_err());
    }
}

//! The expansion model: the persisted plan and checkpoint of a chassis
//! expansion, one blade record per system name.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::ser::PrettyFormatter;
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use super::blade::Blade;
use super::error::ExpansionError;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    from = "BTreeMap<String, Blade>",
    into = "BTreeMap<String, Blade>"
)]
pub struct ExpansionModel {
    blades: BTreeMap<String, Blade>,
}

impl From<BTreeMap<String, Blade>> for ExpansionModel {
    fn from(mut blades: BTreeMap<String, Blade>) -> Self {
        for (system, blade) in blades.iter_mut() {
            blade.system = system.clone();
        }
        Self { blades }
    }
}

impl From<ExpansionModel> for BTreeMap<String, Blade> {
    fn from(model: ExpansionModel) -> Self {
        model.blades
    }
}

impl ExpansionModel {
    pub fn from_blades(blades: impl IntoIterator<Item = Blade>) -> Self {
        Self {
            blades: blades
                .into_iter()
                .map(|b| (b.system.clone(), b))
                .collect(),
        }
    }

    pub fn blades(&self) -> impl Iterator<Item = &Blade> {
        self.blades.values()
    }

    pub fn blades_mut(&mut self) -> impl Iterator<Item = &mut Blade> {
        self.blades.values_mut()
    }

    pub fn get(&self, system: &str) -> Option<&Blade> {
        self.blades.get(system)
    }

    pub fn get_mut(&mut self, system: &str) -> Option<&mut Blade> {
        self.blades.get_mut(system)
    }

    pub fn len(&self) -> usize {
        self.blades.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blades.is_empty()
    }

    /// Pretty JSON with a four space indent.
    pub fn to_json(&self) -> Result<String, ExpansionError> {
        let mut buf = Vec::new();
        let formatter = PrettyFormatter::with_indent(b"    ");
        let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
        self.serialize(&mut ser)
            .map_err(|source| ExpansionError::Encode {
                what: "expansion model",
                source,
            })?;
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }

    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// `sha256:<hex>` of the serialized model.
    pub fn checksum(&self) -> Result<String, ExpansionError> {
        let json = self.to_json()?;
        Ok(format!("sha256:{:x}", Sha256::digest(json.as_bytes())))
    }
}

/// Write to `<path>.tmp` and rename over `path`, so readers see either the
/// old file or the new one.
pub(crate) fn write_atomic(path: &Path, contents: &str) -> Result<(), ExpansionError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| ExpansionError::io(parent, e))?;
    }
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    fs::write(&tmp, contents).map_err(|e| ExpansionError::io(&tmp, e))?;
    fs::rename(&tmp, path).map_err(|e| ExpansionError::io(path, e))
}

pub(crate) fn remove_if_present(path: &Path) -> Result<bool, ExpansionError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(ExpansionError::io(path, e)),
    }
}

pub struct ModelStore {
    path: PathBuf,
}

impl ModelStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// A missing file is `None`. So is one that does not parse: a partial
    /// model is never used.
    pub fn load(&self) -> Result<Option<ExpansionModel>, ExpansionError> {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(ExpansionError::io(&self.path, e)),
        };
        match ExpansionModel::from_json(&text) {
            Ok(model) => Ok(Some(model)),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "expansion model is unreadable, ignoring it");
                Ok(None)
            }
        }
    }

    pub fn save(&self, model: &ExpansionModel) -> Result<(), ExpansionError> {
        write_atomic(&self.path, &model.to_json()?)?;
        info!(path = %self.path.display(), blades = model.len(), "expansion model written");
        Ok(())
    }

    pub fn remove(&self) -> Result<bool, ExpansionError> {
        remove_if_present(&self.path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expansion::blade::Bay;
    use pretty_assertions::assert_eq;

    fn blade() -> Blade {
        Blade {
            system: "db-2".into(),
            hostname: "ieatrcxb3185".into(),
            serial: "CZ3328JJT7".into(),
            src_ilo: "10.36.49.100".into(),
            dest_ilo: "10.36.49.171".into(),
            src_bay: Bay::Known(2),
            dest_bay: Bay::Unknown,
            ilo_user: Some("root".into()),
            ilo_key: Some("key-for-db_node2_ilo".into()),
        }
    }

    #[test]
    fn model_json_is_keyed_by_system_with_four_space_indent() {
        let model = ExpansionModel::from_blades([blade()]);
        let json = model.to_json().unwrap();

        assert!(json.starts_with("{\n    \"db-2\": {\n        \"hostname\": \"ieatrcxb3185\""));
        assert!(json.contains("\"src_bay\": \"2\""));
        assert!(json.contains("\"dest_bay\": \"Unknown\""));
        assert!(json.contains("\"key\": \"key-for-db_node2_ilo\""));
        assert!(!json.contains("system"));
    }

    #[test]
    fn store_round_trips_and_restores_system_names() {
        let dir = tempfile::tempdir().unwrap();
        let store = ModelStore::new(dir.path().join("runtime/expansion_model.json"));
        let model = ExpansionModel::from_blades([blade()]);

        store.save(&model).unwrap();
        let loaded = store.load().unwrap().unwrap();

        assert_eq!(loaded, model);
        assert_eq!(loaded.get("db-2").unwrap().system, "db-2");
        assert!(!dir.path().join("runtime/expansion_model.json.tmp").exists());
    }

    #[test]
    fn truncated_model_is_treated_as_absent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("expansion_model.json");
        std::fs::write(&path, "{\n    \"db-2\": {\n        \"hostname\": ").unwrap();

        assert_eq!(ModelStore::new(&path).load().unwrap(), None);
    }

    #[test]
    fn checksum_tracks_content() {
        let mut model = ExpansionModel::from_blades([blade()]);
        let before = model.checksum().unwrap();
        assert!(before.starts_with("sha256:"));

        model.get_mut("db-2").unwrap().dest_bay = Bay::Known(5);
        assert_ne!(model.checksum().unwrap(), before);
    }
}

//! Stage vocabulary and the progress sidecar that records which stages of
//! an expansion have completed.
//!
//! The sidecar is tied to one model by checksum. If the model changes
//! behind its back the sidecar no longer describes it and is discarded.
//! A model rewrite is announced in the sidecar first (`pending_checksum`),
//! so an interrupted rewrite leaves a sidecar that matches either model.

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::error::ExpansionError;
use super::model::{remove_if_present, write_atomic};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Stage {
    Validate,
    Drain,
    ReconfigureIlo,
    Reseat,
    ApplyEbipa,
    PowerOn,
    ClusterMembership,
    CleanupSource,
    Finalize,
}

impl Stage {
    pub const ALL: [Stage; 9] = [
        Stage::Validate,
        Stage::Drain,
        Stage::ReconfigureIlo,
        Stage::Reseat,
        Stage::ApplyEbipa,
        Stage::PowerOn,
        Stage::ClusterMembership,
        Stage::CleanupSource,
        Stage::Finalize,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Validate => "validate",
            Stage::Drain => "drain",
            Stage::ReconfigureIlo => "reconfigure-ilo",
            Stage::Reseat => "reseat",
            Stage::ApplyEbipa => "apply-ebipa",
            Stage::PowerOn => "power-on",
            Stage::ClusterMembership => "cluster-membership",
            Stage::CleanupSource => "cleanup-source",
            Stage::Finalize => "finalize",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    pub model_checksum: String,
    /// Checksum of a model write that may not have landed yet.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_checksum: Option<String>,
    pub completed: Vec<Stage>,
    pub blades_reseated: bool,
    pub updated_at: DateTime<Utc>,
}

impl Progress {
    pub fn new(model_checksum: impl Into<String>) -> Self {
        Self {
            model_checksum: model_checksum.into(),
            pending_checksum: None,
            completed: Vec::new(),
            blades_reseated: false,
            updated_at: Utc::now(),
        }
    }

    /// True when this record belongs to the model with `checksum`.
    pub fn describes(&self, checksum: &str) -> bool {
        self.model_checksum == checksum || self.pending_checksum.as_deref() == Some(checksum)
    }

    /// Tie the record to `checksum`, settling any pending model write.
    pub fn settle(&mut self, checksum: impl Into<String>) {
        self.model_checksum = checksum.into();
        self.pending_checksum = None;
    }

    pub fn is_done(&self, stage: Stage) -> bool {
        self.completed.contains(&stage)
    }

    pub fn complete(&mut self, stage: Stage) {
        if !self.is_done(stage) {
            self.completed.push(stage);
            self.completed.sort();
        }
    }

    /// First stage, in order, that has not completed.
    pub fn next_stage(&self) -> Option<Stage> {
        Stage::ALL.into_iter().find(|s| !self.is_done(*s))
    }
}

pub struct ProgressStore {
    path: PathBuf,
}

impl ProgressStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Raw read, with no checksum check.
    pub fn read(&self) -> Result<Option<Progress>, ExpansionError> {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(ExpansionError::io(&self.path, e)),
        };
        match serde_json::from_str(&text) {
            Ok(progress) => Ok(Some(progress)),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "progress file is unreadable, discarding it");
                Ok(None)
            }
        }
    }

    /// Progress for the model with `model_checksum`; a fresh record when
    /// none is stored or the stored one belongs to another model.
    pub fn load(&self, model_checksum: &str) -> Result<Progress, ExpansionError> {
        match self.read()? {
            Some(mut progress) if progress.describes(model_checksum) => {
                if progress.pending_checksum.is_some() {
                    warn!(checksum = model_checksum, "an earlier model write was interrupted");
                }
                progress.settle(model_checksum);
                debug!(completed = ?progress.completed, "resuming expansion");
                Ok(progress)
            }
            Some(progress) => {
                warn!(
                    expected = model_checksum,
                    found = %progress.model_checksum,
                    "progress file does not match the expansion model, discarding it"
                );
                Ok(Progress::new(model_checksum))
            }
            None => Ok(Progress::new(model_checksum)),
        }
    }

    pub fn save(&self, progress: &mut Progress) -> Result<(), ExpansionError> {
        progress.updated_at = Utc::now();
        let json = serde_json::to_string_pretty(progress).map_err(|source| {
            ExpansionError::Encode {
                what: "expansion progress",
                source,
            }
        })?;
        write_atomic(&self.path, &json)
    }

    pub fn remove(&self) -> Result<bool, ExpansionError> {
        remove_if_present(&self.path)
    }
}

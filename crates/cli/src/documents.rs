//! Loading metadata and payload documents from disk.
//!
//! Both document kinds may be JSON (`.json`) or YAML (`.yaml` / `.yml`); the format is chosen by
//! file extension. Decoding errors carry the path of the offending field so a bad payload can be
//! fixed without guessing.

use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::fmt::Display;
use std::path::{Path, PathBuf};
use tracker_core::{
    InMemoryStore, OrganisationUnit, Program, StoreResult, TrackedEntityAttribute, TrackerPayload,
};

#[derive(Debug, thiserror::Error)]
pub enum DocumentError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("unsupported document format for {0}: expected .json, .yaml or .yml")]
    UnsupportedFormat(PathBuf),
    #[error("{path}: {message}")]
    Decode { path: PathBuf, message: String },
}

pub type DocumentResult<T> = std::result::Result<T, DocumentError>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Format {
    Json,
    Yaml,
}

impl Format {
    fn from_path(path: &Path) -> DocumentResult<Self> {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => Ok(Format::Json),
            Some("yaml") | Some("yml") => Ok(Format::Yaml),
            _ => Err(DocumentError::UnsupportedFormat(path.to_path_buf())),
        }
    }
}

/// Reference data the pipeline resolves against.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct MetadataDocument {
    #[serde(default)]
    pub organisation_units: Vec<OrganisationUnit>,
    #[serde(default)]
    pub programs: Vec<Program>,
    #[serde(default)]
    pub tracked_entity_attributes: Vec<TrackedEntityAttribute>,
}

impl MetadataDocument {
    pub fn load(path: &Path) -> DocumentResult<Self> {
        load(path, "metadata")
    }

    /// Register every entry with `store`. Entries with an existing UID are replaced.
    pub fn register(self, store: &InMemoryStore) -> StoreResult<()> {
        for unit in self.organisation_units {
            store.add_organisation_unit(unit)?;
        }
        for attribute in self.tracked_entity_attributes {
            store.add_tracked_entity_attribute(attribute)?;
        }
        for program in self.programs {
            store.add_program(program)?;
        }
        Ok(())
    }
}

pub fn load_payload(path: &Path) -> DocumentResult<TrackerPayload> {
    load(path, "payload")
}

fn load<T: DeserializeOwned>(path: &Path, kind: &str) -> DocumentResult<T> {
    let format = Format::from_path(path)?;
    let text = std::fs::read_to_string(path).map_err(|source| DocumentError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    parse(&text, format, kind).map_err(|message| DocumentError::Decode {
        path: path.to_path_buf(),
        message,
    })
}

fn parse<T: DeserializeOwned>(text: &str, format: Format, kind: &str) -> Result<T, String> {
    match format {
        Format::Json => {
            let mut deserializer = serde_json::Deserializer::from_str(text);
            let parsed = serde_path_to_error::deserialize(&mut deserializer)
                .map_err(|err| mismatch(kind, err))?;
            deserializer
                .end()
                .map_err(|err| format!("{kind} has trailing content: {err}"))?;
            Ok(parsed)
        }
        Format::Yaml => {
            let deserializer = serde_yaml::Deserializer::from_str(text);
            serde_path_to_error::deserialize(deserializer).map_err(|err| mismatch(kind, err))
        }
    }
}

fn mismatch<E: Display>(kind: &str, err: serde_path_to_error::Error<E>) -> String {
    let path = err.path().to_string();
    let source = err.into_inner();
    let path = if path.is_empty() {
        "<root>"
    } else {
        path.as_str()
    };
    format!("{kind} schema mismatch at {path}: {source}")
}

//! Drag-and-drop payloads handed to a host application.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::composer::export::ExportError;
use crate::session::Session;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DragPayload {
    /// One library groove, copied out to an exportable file.
    GrooveReference {
        category_index: usize,
        groove_index: usize,
        category_name: String,
        groove_name: String,
        file: PathBuf,
    },
    /// The whole composition rendered to a MIDI file.
    CompositionExport {
        file: PathBuf,
        item_count: usize,
        length_in_beats: f64,
    },
}

impl DragPayload {
    /// The file a drop target should read.
    pub fn file(&self) -> &Path {
        match self {
            Self::GrooveReference { file, .. } | Self::CompositionExport { file, .. } => file,
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

/// Export a groove and describe it for a drag.
pub fn drag_groove(session: &Session, category: usize, groove: usize) -> Result<DragPayload, ExportError> {
    let file = session.export_groove(category, groove)?;
    let (category_name, groove_name) = session
        .store()
        .groove(category, groove)
        .map(|g| (g.category.clone(), g.name.clone()))
        .unwrap_or_default();
    Ok(DragPayload::GrooveReference {
        category_index: category,
        groove_index: groove,
        category_name,
        groove_name,
        file,
    })
}

/// Export the composition and describe it for a drag.
pub fn drag_composition(session: &Session) -> Result<DragPayload, ExportError> {
    let snapshot = session.composition();
    let file = session.export_composition()?;
    Ok(DragPayload::CompositionExport {
        file,
        item_count: snapshot.len(),
        length_in_beats: snapshot.total_length_in_beats(),
    })
}

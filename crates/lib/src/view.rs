//! Model picker contents derived from a discovery pass.

use std::fmt;

use crate::llm::Discovery;
use crate::state::Confidence;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelRow {
    pub id: String,
    pub loaded: bool,
    /// Set on the loaded row only.
    pub confidence: Option<Confidence>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelListView {
    /// The models list could not be fetched.
    Unreachable,
    /// Server answered with no models.
    Empty,
    /// One row per listed model, in server order.
    Models(Vec<ModelRow>),
}

impl ModelListView {
    pub fn from_discovery(discovery: &Discovery) -> Self {
        if !discovery.reachable {
            return ModelListView::Unreachable;
        }
        if discovery.available.is_empty() {
            return ModelListView::Empty;
        }
        let loaded = discovery.loaded.as_ref();
        let rows = discovery
            .available
            .iter()
            .map(|m| {
                let is_loaded = loaded.map(|l| l.id == m.id).unwrap_or(false);
                ModelRow {
                    id: m.id.clone(),
                    loaded: is_loaded,
                    confidence: if is_loaded {
                        loaded.map(|l| l.confidence)
                    } else {
                        None
                    },
                }
            })
            .collect();
        ModelListView::Models(rows)
    }

    pub fn loaded_row(&self) -> Option<&ModelRow> {
        match self {
            ModelListView::Models(rows) => rows.iter().find(|r| r.loaded),
            _ => None,
        }
    }
}

impl fmt::Display for ModelListView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelListView::Unreachable => write!(f, "server not responding"),
            ModelListView::Empty => write!(f, "no models available"),
            ModelListView::Models(rows) => {
                for (i, row) in rows.iter().enumerate() {
                    if i > 0 {
                        writeln!(f)?;
                    }
                    match row.confidence {
                        Some(c) if row.loaded => write!(f, "* {} ({})", row.id, c.label())?,
                        _ => write!(f, "  {}", row.id)?,
                    }
                }
                Ok(())
            }
        }
    }
}

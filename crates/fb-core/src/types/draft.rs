use crate::types::ids::{DraftId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Owner {
    pub user_id: UserId,
    pub display_name: String,
}

impl Owner {
    pub fn new(user_id: UserId, display_name: impl Into<String>) -> Self {
        Self {
            user_id,
            display_name: display_name.into(),
        }
    }
}

/// An in-progress form session, persisted one field at a time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Draft {
    pub id: DraftId,
    pub owner: Owner,
    pub fields: BTreeMap<String, Value>,
    pub metadata: DraftMetadata,
    pub created_at: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
}

impl Draft {
    pub fn field(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn is_owned_by(&self, user_id: &UserId) -> bool {
        &self.owner.user_id == user_id
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DraftMetadata {
    pub is_draft: bool,
    pub completed_sections: Vec<String>,
    pub current_section: Option<String>,
    pub submitted_at: Option<DateTime<Utc>>,
}

impl Default for DraftMetadata {
    fn default() -> Self {
        Self {
            is_draft: true,
            completed_sections: Vec::new(),
            current_section: None,
            submitted_at: None,
        }
    }
}

impl DraftMetadata {
    /// Applies a patch; completed sections keep first-completion order.
    pub fn apply(&mut self, patch: &MetadataPatch) {
        if let Some(section) = &patch.current_section {
            self.current_section = Some(section.clone());
        }
        for section in &patch.completed_sections {
            if !self.completed_sections.contains(section) {
                self.completed_sections.push(section.clone());
            }
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetadataPatch {
    pub current_section: Option<String>,
    pub completed_sections: Vec<String>,
}

impl MetadataPatch {
    pub fn is_empty(&self) -> bool {
        self.current_section.is_none() && self.completed_sections.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn completed_sections_are_an_ordered_set() {
        let mut metadata = DraftMetadata::default();
        metadata.apply(&MetadataPatch {
            current_section: Some("Pharmacy".to_string()),
            completed_sections: vec!["Reception".to_string(), "Pharmacy".to_string()],
        });
        metadata.apply(&MetadataPatch {
            current_section: None,
            completed_sections: vec!["Reception".to_string(), "Waste".to_string()],
        });

        assert_eq!(metadata.current_section.as_deref(), Some("Pharmacy"));
        assert_eq!(
            metadata.completed_sections,
            vec!["Reception", "Pharmacy", "Waste"]
        );
        assert!(metadata.is_draft);
    }
}

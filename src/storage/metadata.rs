use std::collections::HashMap;
use std::sync::Arc;
use chrono::{DateTime, Utc};
use serde::{Serialize, Deserialize};
use crate::core::error::{Error, ErrorKind, Result};
use crate::storage::layout::{atomic_write, StorageLayout};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexStatus {
    Open,
    Closed,
}

/// Per-field mapping: type, analyzer, boost, and optional nested
/// sub-fields (e.g. a text field exposing a keyword sub-field).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldMapping {
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub analyzer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub boost: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fields: Option<HashMap<String, FieldMapping>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    Text,
    Keyword,
    Number,
    Boolean,
    Date,
}

impl FieldMapping {
    pub fn text() -> Self {
        FieldMapping {
            field_type: FieldType::Text,
            analyzer: None,
            boost: None,
            fields: None,
        }
    }

    pub fn keyword() -> Self {
        FieldMapping {
            field_type: FieldType::Keyword,
            analyzer: None,
            boost: None,
            fields: None,
        }
    }

    pub fn with_boost(mut self, boost: f64) -> Self {
        self.boost = Some(boost);
        self
    }

    pub fn with_analyzer(mut self, analyzer: impl Into<String>) -> Self {
        self.analyzer = Some(analyzer.into());
        self
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IndexMappings {
    #[serde(default)]
    pub properties: HashMap<String, FieldMapping>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IndexSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_analyzer: Option<String>,
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexMetadata {
    pub name: String,
    pub settings: IndexSettings,
    pub mappings: IndexMappings,
    pub status: IndexStatus,
    pub document_count: u64,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl IndexMetadata {
    pub fn new(name: String, settings: IndexSettings, mappings: IndexMappings) -> Self {
        IndexMetadata {
            name,
            settings,
            mappings,
            status: IndexStatus::Open,
            document_count: 0,
            created_at: Utc::now(),
            updated_at: None,
        }
    }

    /// Boost for a field, defaulting to 1.0. Sub-fields resolve through
    /// their parent (`title.keyword` -> parent `title`, child `keyword`).
    pub fn field_boost(&self, field: &str) -> f64 {
        if let Some(mapping) = self.mappings.properties.get(field) {
            return mapping.boost.unwrap_or(1.0);
        }
        if let Some((parent, child)) = field.split_once('.') {
            if let Some(mapping) = self.mappings.properties.get(parent) {
                if let Some(children) = &mapping.fields {
                    if let Some(sub) = children.get(child) {
                        return sub.boost.unwrap_or(1.0);
                    }
                }
            }
        }
        1.0
    }

    /// Field names that carry analyzable text, including keyword
    /// sub-fields. Used as the default search field set.
    pub fn searchable_fields(&self) -> Vec<String> {
        let mut fields = Vec::new();
        for (name, mapping) in &self.mappings.properties {
            if matches!(mapping.field_type, FieldType::Text | FieldType::Keyword) {
                fields.push(name.clone());
            }
            if let Some(children) = &mapping.fields {
                for (child, sub) in children {
                    if matches!(sub.field_type, FieldType::Text | FieldType::Keyword) {
                        fields.push(format!("{}.{}", name, child));
                    }
                }
            }
        }
        fields.sort();
        fields
    }
}

/// File-backed index metadata: one JSON document per index.
pub struct MetadataStore {
    layout: Arc<StorageLayout>,
}

impl MetadataStore {
    pub fn new(layout: Arc<StorageLayout>) -> Self {
        MetadataStore { layout }
    }

    pub async fn create(&self, metadata: &IndexMetadata) -> Result<()> {
        let path = self.layout.metadata_path(&metadata.name);
        if tokio::fs::try_exists(&path).await? {
            return Err(Error::conflict(format!("Index '{}' already exists", metadata.name)));
        }

        tokio::fs::create_dir_all(self.layout.terms_dir(&metadata.name)).await?;
        let json = serde_json::to_vec_pretty(metadata)?;
        atomic_write(&path, &json).await
    }

    pub async fn get(&self, index: &str) -> Result<IndexMetadata> {
        let path = self.layout.metadata_path(index);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::not_found(format!("Index '{}' does not exist", index)));
            }
            Err(err) => return Err(err.into()),
        };
        Ok(serde_json::from_slice(&bytes)?)
    }

    pub async fn exists(&self, index: &str) -> Result<bool> {
        Ok(tokio::fs::try_exists(self.layout.metadata_path(index)).await?)
    }

    pub async fn list(&self) -> Result<Vec<IndexMetadata>> {
        let mut all = Vec::new();
        for name in self.layout.list_index_dirs()? {
            match self.get(&name).await {
                Ok(metadata) => all.push(metadata),
                Err(err) if err.kind == ErrorKind::NotFound => {}  // dir without metadata
                Err(err) => return Err(err),
            }
        }
        Ok(all)
    }

    pub async fn update(&self, metadata: &mut IndexMetadata) -> Result<()> {
        if !self.exists(&metadata.name).await? {
            return Err(Error::not_found(format!("Index '{}' does not exist", metadata.name)));
        }
        metadata.updated_at = Some(Utc::now());
        let json = serde_json::to_vec_pretty(metadata)?;
        atomic_write(&self.layout.metadata_path(&metadata.name), &json).await
    }

    /// Remove the whole index directory: metadata, chunks, documents,
    /// stats, in one cascade.
    pub async fn delete(&self, index: &str) -> Result<()> {
        if !self.exists(index).await? {
            return Err(Error::not_found(format!("Index '{}' does not exist", index)));
        }
        tokio::fs::remove_dir_all(self.layout.index_dir(index)).await?;
        Ok(())
    }
}

#![forbid(unsafe_code)]

//! File-typed fields.
//!
//! The backend addresses a file field by `"{model}-{field}"`. Listing is
//! filtered client-side with the field type's pattern.

use simform_core::{Dependency, FieldType, ResolvedField};

use crate::api::{ApiClient, ApiError};

/// Backend name of a file field.
#[must_use]
pub fn file_field_name(dependency: &Dependency) -> String {
    format!("{}-{}", dependency.model_name(), dependency.field_name())
}

/// Lists, uploads and downloads the files of one field.
#[derive(Debug, Clone)]
pub struct FileFieldClient {
    api: ApiClient,
    dependency: Dependency,
    field_type: FieldType,
}

impl FileFieldClient {
    /// A client for the field `dependency` of type `field_type`.
    #[must_use]
    pub fn new(api: ApiClient, dependency: Dependency, field_type: FieldType) -> Self {
        Self {
            api,
            dependency,
            field_type,
        }
    }

    /// A client for a resolved field binding.
    #[must_use]
    pub fn from_resolved(api: ApiClient, field: &ResolvedField) -> Self {
        Self::new(api, field.dependency.clone(), field.field_type.clone())
    }

    /// Backend field name.
    #[must_use]
    pub fn field_name(&self) -> String {
        file_field_name(&self.dependency)
    }

    /// Available files, filtered by the type's pattern when it has one.
    pub fn list(&self) -> Result<Vec<String>, ApiError> {
        let files = self.api.file_list(&self.field_name())?;
        Ok(match self.field_type.file_pattern() {
            Some(pattern) => files.into_iter().filter(|f| pattern.matches(f)).collect(),
            None => files,
        })
    }

    /// Upload a file for a simulation.
    pub fn upload(&self, simulation_id: &str, file_name: &str, bytes: Vec<u8>) -> Result<(), ApiError> {
        tracing::debug!(
            field = %self.dependency,
            file = file_name,
            bytes = bytes.len(),
            "uploading file"
        );
        self.api
            .upload_file(simulation_id, &self.field_name(), file_name, bytes)
    }

    /// Download a file's contents.
    pub fn download(&self, file_name: &str) -> Result<Vec<u8>, ApiError> {
        self.api.download_file(&self.field_name(), file_name)
    }
}

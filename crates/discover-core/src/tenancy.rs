//! Organizations and the projects they own.

use crate::{OrganizationSlug, ProjectId};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, RwLock};
use tracing::error;

/// Feature flag gating the discover endpoint
pub const DISCOVER_FEATURE: &str = "organizations:discover";

/// A tenant and the projects it owns
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Organization {
    pub slug: OrganizationSlug,
    pub name: String,
    pub projects: BTreeSet<ProjectId>,
    pub features: BTreeSet<String>,
}

impl Organization {
    pub fn new(slug: OrganizationSlug, name: impl Into<String>) -> Self {
        Self {
            slug,
            name: name.into(),
            projects: BTreeSet::new(),
            features: BTreeSet::new(),
        }
    }

    pub fn with_project(mut self, project: ProjectId) -> Self {
        self.projects.insert(project);
        self
    }

    pub fn with_feature(mut self, feature: impl Into<String>) -> Self {
        self.features.insert(feature.into());
        self
    }

    pub fn has_feature(&self, feature: &str) -> bool {
        self.features.contains(feature)
    }

    pub fn owns_project(&self, project: ProjectId) -> bool {
        self.projects.contains(&project)
    }
}

/// Directory failures
#[derive(Debug, thiserror::Error)]
pub enum DirectoryError {
    #[error("Organization directory lock was poisoned")]
    LockPoisoned,
}

/// Lookup of organizations by slug
#[async_trait]
pub trait OrganizationDirectory: Send + Sync {
    async fn get_organization(&self, slug: &OrganizationSlug) -> Option<Organization>;
}

/// In-memory [`OrganizationDirectory`]
#[derive(Debug, Clone, Default)]
pub struct MemoryOrganizationDirectory {
    organizations: Arc<RwLock<HashMap<OrganizationSlug, Organization>>>,
}

impl MemoryOrganizationDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace an organization
    pub fn register(&self, organization: Organization) -> Result<(), DirectoryError> {
        let mut organizations = self
            .organizations
            .write()
            .map_err(|_| DirectoryError::LockPoisoned)?;
        organizations.insert(organization.slug.clone(), organization);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.organizations.read().map(|o| o.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl OrganizationDirectory for MemoryOrganizationDirectory {
    async fn get_organization(&self, slug: &OrganizationSlug) -> Option<Organization> {
        match self.organizations.read() {
            Ok(organizations) => organizations.get(slug).cloned(),
            Err(_) => {
                error!(organization = %slug, "Organization directory lock was poisoned");
                None
            }
        }
    }
}

#[cfg(test)]
#[path = "tenancy_tests.rs"]
mod tests;

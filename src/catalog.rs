//! Read-only view of villas and their pricing rules.

use std::path::Path;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::Deserialize;
use ulid::Ulid;

use crate::error::BookingError;
use crate::model::{PricingRule, Villa};
use crate::validate::{PricingRuleInput, VillaInput};

#[async_trait]
pub trait VillaCatalog: Send + Sync {
    /// `NotFound` if no such villa.
    async fn get_villa(&self, villa_id: Ulid) -> Result<Villa, BookingError>;

    async fn pricing_rules(&self, villa_id: Ulid) -> Result<Vec<PricingRule>, BookingError>;
}

/// Layout of the JSON seed file.
#[derive(Debug, Default, Deserialize)]
struct Seed {
    #[serde(default)]
    villas: Vec<VillaInput>,
    #[serde(default)]
    rules: Vec<PricingRuleInput>,
}

#[derive(Debug, Default)]
pub struct InMemoryCatalog {
    villas: DashMap<Ulid, Villa>,
    rules: DashMap<Ulid, Vec<PricingRule>>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load villas and rules from a JSON file of the form
    /// `{"villas": [...], "rules": [...]}`.
    pub fn from_json_file(path: &Path) -> Result<Self, BookingError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| BookingError::Internal(format!("catalog {}: {e}", path.display())))?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> Result<Self, BookingError> {
        let seed: Seed = serde_json::from_str(raw)
            .map_err(|e| BookingError::Validation(format!("catalog seed: {e}")))?;
        let catalog = Self::new();
        for villa in &seed.villas {
            catalog.upsert_villa(villa.parse()?);
        }
        for rule in &seed.rules {
            catalog.add_rule(rule.parse()?);
        }
        Ok(catalog)
    }

    pub fn upsert_villa(&self, villa: Villa) {
        self.villas.insert(villa.id, villa);
    }

    pub fn add_rule(&self, rule: PricingRule) {
        self.rules.entry(rule.villa_id).or_default().push(rule);
    }

    pub fn villa_count(&self) -> usize {
        self.villas.len()
    }
}

#[async_trait]
impl VillaCatalog for InMemoryCatalog {
    async fn get_villa(&self, villa_id: Ulid) -> Result<Villa, BookingError> {
        self.villas
            .get(&villa_id)
            .map(|v| v.value().clone())
            .ok_or(BookingError::NotFound(villa_id))
    }

    async fn pricing_rules(&self, villa_id: Ulid) -> Result<Vec<PricingRule>, BookingError> {
        Ok(self
            .rules
            .get(&villa_id)
            .map(|r| r.value().clone())
            .unwrap_or_default())
    }
}

use serde::{Deserialize, Serialize};

use crate::shared::ValidationError;

/// Controls what happens when a value cannot be widened into its column type.
///
/// The policy only applies to scalar/complex clashes that have no safe widening.
/// Plain scalar conflicts are always resolved by widening along the type lattice.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum VariantPolicy {
    /// Route the clashing value into a dedicated variant column named after the
    /// original column and the incoming type kind.
    Split,
    /// Fail normalization of the document with a schema conflict error.
    Error,
}

impl Default for VariantPolicy {
    fn default() -> Self {
        Self::Split
    }
}

const fn default_variant_policy() -> VariantPolicy {
    VariantPolicy::Split
}

/// Document normalization configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct NormalizeConfig {
    /// Maximum nesting depth that is flattened into columns and child tables.
    ///
    /// Structures nested deeper than this are carried as a single serialized value
    /// instead of being unpacked further.
    #[serde(default = "default_max_nesting")]
    pub max_nesting: usize,
    /// Conflict resolution policy for values that cannot be widened.
    #[serde(default = "default_variant_policy")]
    pub variant_policy: VariantPolicy,
}

impl NormalizeConfig {
    /// Default maximum nesting depth.
    pub const DEFAULT_MAX_NESTING: usize = 100;

    /// Validates normalization configuration settings.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.max_nesting == 0 {
            return Err(ValidationError::InvalidFieldValue {
                field: "normalize.max_nesting".to_string(),
                constraint: "must be greater than 0".to_string(),
            });
        }

        Ok(())
    }
}

impl Default for NormalizeConfig {
    fn default() -> Self {
        Self {
            max_nesting: default_max_nesting(),
            variant_policy: default_variant_policy(),
        }
    }
}

fn default_max_nesting() -> usize {
    NormalizeConfig::DEFAULT_MAX_NESTING
}

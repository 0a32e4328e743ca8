//! Per-variant result aggregation.

use std::collections::HashMap;
use std::time::Duration;

use multibuild_core::{BuildFailure, VariantKind, VariantResult};

/// Complete per-variant outcome map of one parallel build.
///
/// Every requested variant has exactly one entry; failures appear as
/// structured [`BuildFailure`] values, never as missing keys.
#[derive(Debug, Default)]
pub struct BuildReport {
    entries: HashMap<VariantKind, Result<VariantResult, BuildFailure>>,
}

impl BuildReport {
    pub(crate) fn insert(
        &mut self,
        variant: VariantKind,
        outcome: Result<VariantResult, BuildFailure>,
    ) {
        self.entries.insert(variant, outcome);
    }

    /// Outcome for one variant.
    pub fn get(&self, variant: VariantKind) -> Option<&Result<VariantResult, BuildFailure>> {
        self.entries.get(&variant)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate over all entries.
    pub fn entries(
        &self,
    ) -> impl Iterator<Item = (&VariantKind, &Result<VariantResult, BuildFailure>)> {
        self.entries.iter()
    }

    /// Successful variant results.
    pub fn succeeded(&self) -> impl Iterator<Item = &VariantResult> {
        self.entries.values().filter_map(|r| r.as_ref().ok())
    }

    /// Structured failure entries.
    pub fn failed(&self) -> impl Iterator<Item = &BuildFailure> {
        self.entries.values().filter_map(|r| r.as_ref().err())
    }

    pub fn has_failures(&self) -> bool {
        self.failed().next().is_some()
    }

    /// Sum of the successful builds' wall-clock durations.
    pub fn total_duration(&self) -> Duration {
        self.succeeded().map(|r| r.duration).sum()
    }
}

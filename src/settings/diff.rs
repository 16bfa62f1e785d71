//! Settings diff
//!
//! Compares two instances of the same metadata. Unchanged parameters are
//! omitted and sections without changes are pruned.

use std::collections::BTreeSet;

use super::instance::{ConfigInstance, SectionValues};
use super::metadata::{child_path, ConfigMetadata, ParameterContainer};
use super::value::ParameterValue;

/// One changed parameter
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterChange {
    pub id: String,
    pub old: Option<ParameterValue>,
    pub new: Option<ParameterValue>,
    pub affected_containers: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DiffEntry {
    Parameter(ParameterChange),
    Section { id: String, changes: SettingsDiff },
}

/// Tree of differences between two instances
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SettingsDiff {
    pub entries: Vec<DiffEntry>,
}

impl SettingsDiff {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Every changed parameter with its slash-separated path
    pub fn changes(&self) -> Vec<(String, &ParameterChange)> {
        let mut out = Vec::new();
        self.collect_changes("", &mut out);
        out
    }

    fn collect_changes<'a>(&'a self, prefix: &str, out: &mut Vec<(String, &'a ParameterChange)>) {
        for entry in &self.entries {
            match entry {
                DiffEntry::Parameter(change) => out.push((child_path(prefix, &change.id), change)),
                DiffEntry::Section { id, changes } => {
                    changes.collect_changes(&child_path(prefix, id), out)
                }
            }
        }
    }

    /// Union of containers affected by any change
    pub fn affected_containers(&self) -> BTreeSet<String> {
        self.changes()
            .into_iter()
            .flat_map(|(_, change)| change.affected_containers.iter().cloned())
            .collect()
    }
}

/// Diff `old` against `new` under `metadata`
pub fn diff(metadata: &ConfigMetadata, old: &ConfigInstance, new: &ConfigInstance) -> SettingsDiff {
    diff_container(metadata, Some(&old.root), Some(&new.root))
}

fn diff_container(
    container: &dyn ParameterContainer,
    old: Option<&SectionValues>,
    new: Option<&SectionValues>,
) -> SettingsDiff {
    let mut entries = Vec::new();
    for parameter in container.parameters() {
        let old_value = old.and_then(|s| s.value(&parameter.id));
        let new_value = new.and_then(|s| s.value(&parameter.id));
        if old_value != new_value {
            entries.push(DiffEntry::Parameter(ParameterChange {
                id: parameter.id.clone(),
                old: old_value.cloned(),
                new: new_value.cloned(),
                affected_containers: parameter.affected_containers.clone(),
            }));
        }
    }
    for section in container.sections() {
        let changes = diff_container(
            section,
            old.and_then(|s| s.section(&section.id)),
            new.and_then(|s| s.section(&section.id)),
        );
        if !changes.is_empty() {
            entries.push(DiffEntry::Section {
                id: section.id.clone(),
                changes,
            });
        }
    }
    SettingsDiff { entries }
}

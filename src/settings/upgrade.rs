//! Upgrade-default rewrite

use super::instance::{ConfigInstance, InstanceNode, SectionValues};
use super::metadata::{child_path, ConfigMetadata, ParameterContainer};

/// Reset every `overwriteOnUpgrade` parameter to its literal default
///
/// Walks the metadata in pre-order and returns the paths that were rewritten.
pub fn apply_upgrade_defaults(metadata: &ConfigMetadata, instance: &mut ConfigInstance) -> Vec<String> {
    let mut rewritten = Vec::new();
    rewrite_container(metadata, &mut instance.root, "", &mut rewritten);
    rewritten
}

fn rewrite_container(
    container: &dyn ParameterContainer,
    values: &mut SectionValues,
    prefix: &str,
    rewritten: &mut Vec<String>,
) {
    for parameter in container.parameters() {
        if !parameter.overwrite_on_upgrade {
            continue;
        }
        values.entries.insert(
            parameter.id.clone(),
            InstanceNode::Value(parameter.kind.literal_default()),
        );
        rewritten.push(child_path(prefix, &parameter.id));
    }
    for section in container.sections() {
        let path = child_path(prefix, &section.id);
        let child = values
            .entries
            .entry(section.id.clone())
            .or_insert_with(|| InstanceNode::Section(SectionValues::default()));
        if let InstanceNode::Section(child) = child {
            rewrite_container(section, child, &path, rewritten);
        }
    }
}

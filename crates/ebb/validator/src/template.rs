//! Static template and scale checks

use crate::error::ValidationError;
use ebb_types::{LayerTemplate, ResourceKind, ScaleConfig};
use std::collections::HashSet;

/// Check a resource name against the naming rules of its kind
///
/// Storage names are 3-24 lowercase letters and digits. Every other kind
/// takes 3-63 characters of lowercase letters, digits and hyphens, starting
/// with a letter and not ending with a hyphen.
pub fn validate_name(kind: ResourceKind, name: &str) -> Result<(), ValidationError> {
    let invalid = |reason: &str| {
        Err(ValidationError::InvalidName {
            kind,
            name: name.to_string(),
            reason: reason.to_string(),
        })
    };

    if kind == ResourceKind::Storage {
        if !(3..=24).contains(&name.len()) {
            return invalid("must be 3-24 characters");
        }
        if !name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
        {
            return invalid("only lowercase letters and digits are allowed");
        }
        return Ok(());
    }

    if !(3..=63).contains(&name.len()) {
        return invalid("must be 3-63 characters");
    }
    if !name.starts_with(|c: char| c.is_ascii_lowercase()) {
        return invalid("must start with a lowercase letter");
    }
    if name.ends_with('-') {
        return invalid("must not end with a hyphen");
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
    {
        return invalid("only lowercase letters, digits and hyphens are allowed");
    }
    Ok(())
}

/// Check the data-plane template: non-empty, valid names, no duplicates
pub fn validate_template(template: &LayerTemplate) -> Result<(), ValidationError> {
    if template.resources.is_empty() {
        return Err(ValidationError::EmptyTemplate);
    }

    let mut seen = HashSet::new();
    for spec in &template.resources {
        validate_name(spec.kind, &spec.name)?;
        if !seen.insert(spec.name.as_str()) {
            return Err(ValidationError::DuplicateName {
                name: spec.name.clone(),
            });
        }
    }
    Ok(())
}

/// Check a workload's scale bounds
pub fn validate_scale(workload: &str, scale: &ScaleConfig) -> Result<(), ValidationError> {
    let invalid = |reason: String| {
        Err(ValidationError::InvalidScale {
            workload: workload.to_string(),
            reason,
        })
    };

    if scale.max_replicas == 0 {
        return invalid("max_replicas must be at least 1".to_string());
    }
    if scale.min_replicas > scale.max_replicas {
        return invalid(format!(
            "min_replicas {} exceeds max_replicas {}",
            scale.min_replicas, scale.max_replicas
        ));
    }
    if scale.cpu_millis == 0 || scale.memory_mib == 0 {
        return invalid("cpu and memory must be non-zero".to_string());
    }
    Ok(())
}

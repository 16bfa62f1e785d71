//! Module dependency resolution
//!
//! Handles dependency checking and start order for modules.

use semver::Version;
use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::str::FromStr;
use tracing::debug;

use crate::module::registry::descriptor::ModuleDescriptor;

/// Comparison operator in a dependency constraint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionOp {
    Lt,
    Le,
    Eq,
    Ge,
    Gt,
}

impl VersionOp {
    fn as_str(&self) -> &'static str {
        match self {
            VersionOp::Lt => "<",
            VersionOp::Le => "<=",
            VersionOp::Eq => "=",
            VersionOp::Ge => ">=",
            VersionOp::Gt => ">",
        }
    }
}

/// A parsed `author/name [op version]` dependency
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencySpec {
    pub fqmn: String,
    pub constraint: Option<(VersionOp, Version)>,
}

impl DependencySpec {
    /// Whether `version` satisfies the constraint
    pub fn satisfied_by(&self, version: &Version) -> bool {
        match &self.constraint {
            None => true,
            Some((op, required)) => match op {
                VersionOp::Lt => version < required,
                VersionOp::Le => version <= required,
                VersionOp::Eq => version == required,
                VersionOp::Ge => version >= required,
                VersionOp::Gt => version > required,
            },
        }
    }
}

impl fmt::Display for DependencySpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.constraint {
            None => write!(f, "{}", self.fqmn),
            Some((op, version)) => write!(f, "{} {} {}", self.fqmn, op.as_str(), version),
        }
    }
}

impl FromStr for DependencySpec {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let raw = raw.trim();
        let (name_part, constraint) = match raw.find(['<', '>', '=']) {
            None => (raw, None),
            Some(pos) => {
                let rest = &raw[pos..];
                let (op, version) = if let Some(v) = rest.strip_prefix("<=") {
                    (VersionOp::Le, v)
                } else if let Some(v) = rest.strip_prefix(">=") {
                    (VersionOp::Ge, v)
                } else if let Some(v) = rest.strip_prefix('<') {
                    (VersionOp::Lt, v)
                } else if let Some(v) = rest.strip_prefix('>') {
                    (VersionOp::Gt, v)
                } else if let Some(v) = rest.strip_prefix('=') {
                    (VersionOp::Eq, v)
                } else {
                    return Err(format!("invalid dependency {:?}", raw));
                };
                let version = Version::parse(version.trim())
                    .map_err(|e| format!("invalid version in dependency {:?}: {}", raw, e))?;
                (raw[..pos].trim(), Some((op, version)))
            }
        };

        let (author, name) = name_part
            .split_once('/')
            .ok_or_else(|| format!("dependency {:?} is not of the form author/name", raw))?;
        let well_formed = |s: &str| {
            !s.is_empty()
                && s.chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        };
        if !well_formed(author) || !well_formed(name) {
            return Err(format!("dependency {:?} is not of the form author/name", raw));
        }

        Ok(Self {
            fqmn: format!("{}/{}", author, name),
            constraint,
        })
    }
}

/// Dependency resolution result
#[derive(Debug, Clone, Default)]
pub struct DependencyResolution {
    /// FQMNs in start order (dependencies first)
    pub load_order: Vec<String>,
    /// FQMN → dependency FQMNs
    pub dependencies: HashMap<String, Vec<String>>,
    /// Modules that cannot be used, with the reason
    pub unsatisfied: Vec<(String, String)>,
}

/// Dependency resolver
pub struct ModuleDependencies;

impl ModuleDependencies {
    /// Resolve dependencies among `modules` and determine start order
    ///
    /// A module is unsatisfied when a dependency is absent, has the wrong
    /// version, is itself unsatisfied, or sits on a cycle. The rest are
    /// returned in topological order.
    pub fn resolve(modules: &[&ModuleDescriptor]) -> DependencyResolution {
        let mut versions: HashMap<String, Option<Version>> = HashMap::new();
        for module in modules {
            versions.insert(module.fqmn(), Version::parse(&module.version).ok());
        }

        let mut dependencies: HashMap<String, Vec<String>> = HashMap::new();
        let mut unsatisfied: Vec<(String, String)> = Vec::new();
        let mut broken: HashSet<String> = HashSet::new();

        for module in modules {
            let fqmn = module.fqmn();
            let specs = match module.dependency_specs() {
                Ok(specs) => specs,
                Err(e) => {
                    broken.insert(fqmn.clone());
                    unsatisfied.push((fqmn, e.to_string()));
                    continue;
                }
            };
            let mut reasons = Vec::new();
            for spec in &specs {
                match versions.get(&spec.fqmn) {
                    None => reasons.push(format!("{} is not available", spec)),
                    Some(Some(version)) if !spec.satisfied_by(version) => {
                        reasons.push(format!("{} required, found {}", spec, version))
                    }
                    Some(None) => reasons.push(format!("{} has an invalid version", spec.fqmn)),
                    Some(Some(_)) => {}
                }
            }
            if !reasons.is_empty() {
                broken.insert(fqmn.clone());
                unsatisfied.push((fqmn.clone(), reasons.join("; ")));
            }
            dependencies.insert(fqmn, specs.into_iter().map(|s| s.fqmn).collect());
        }

        // Propagate breakage to dependents until nothing changes
        loop {
            let newly: Vec<(String, String)> = modules
                .iter()
                .map(|m| m.fqmn())
                .filter(|fqmn| !broken.contains(fqmn))
                .filter_map(|fqmn| {
                    let deps = dependencies.get(&fqmn)?;
                    let bad = deps.iter().find(|d| broken.contains(*d))?;
                    let reason = format!("dependency {} is unavailable", bad);
                    Some((fqmn, reason))
                })
                .collect();
            if newly.is_empty() {
                break;
            }
            for (fqmn, reason) in newly {
                broken.insert(fqmn.clone());
                unsatisfied.push((fqmn, reason));
            }
        }

        let order: Vec<String> = modules
            .iter()
            .map(|m| m.fqmn())
            .filter(|fqmn| !broken.contains(fqmn))
            .collect();
        let load_order = Self::topological_sort(&order, &dependencies);
        let sorted: HashSet<&String> = load_order.iter().collect();
        for fqmn in &order {
            if !sorted.contains(fqmn) {
                unsatisfied.push((fqmn.clone(), "circular dependency detected".to_string()));
            }
        }

        debug!("Dependency resolution complete: {:?}", load_order);

        DependencyResolution {
            load_order,
            dependencies,
            unsatisfied,
        }
    }

    /// Topological sort of `nodes` (Kahn's algorithm); nodes on a cycle
    /// are left out of the result
    fn topological_sort(nodes: &[String], dependencies: &HashMap<String, Vec<String>>) -> Vec<String> {
        let mut in_degree: HashMap<&str, usize> = HashMap::new();
        let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();

        for node in nodes {
            in_degree.insert(node.as_str(), 0);
        }
        for node in nodes {
            for dep in dependencies.get(node).into_iter().flatten() {
                if in_degree.contains_key(dep.as_str()) {
                    dependents.entry(dep.as_str()).or_default().push(node.as_str());
                    if let Some(degree) = in_degree.get_mut(node.as_str()) {
                        *degree += 1;
                    }
                }
            }
        }

        let mut queue: VecDeque<&str> = nodes
            .iter()
            .map(String::as_str)
            .filter(|n| in_degree.get(n) == Some(&0))
            .collect();
        let mut result = Vec::new();

        while let Some(node) = queue.pop_front() {
            result.push(node.to_string());
            for dependent in dependents.get(node).into_iter().flatten() {
                if let Some(degree) = in_degree.get_mut(dependent) {
                    *degree -= 1;
                    if *degree == 0 {
                        queue.push_back(*dependent);
                    }
                }
            }
        }

        result
    }
}

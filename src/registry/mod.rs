//! Problem registry.
//!
//! Holds every known [`ProblemSpec`] keyed by id, together with the grading
//! plan resolved from each spec's grader configurations at registration
//! time. The registry is built once and read concurrently afterwards.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;
use std::sync::Arc;

use regex::Regex;
use tracing::{debug, info};

use crate::error::RegistryError;
use crate::grading::GradingPlan;
use crate::problem::catalog::builtin_problems;
use crate::problem::loader::load_problems_dir;
use crate::problem::ProblemSpec;

/// Which problems a run covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selector {
    All,
    /// Exact ids; each must exist.
    Ids(Vec<String>),
    /// Exact ids, id prefixes or `*`/`?` globs; each must match something.
    Patterns(Vec<String>),
}

impl Selector {
    /// `All` for no patterns, else `Patterns`.
    pub fn from_patterns(patterns: Vec<String>) -> Self {
        if patterns.is_empty() {
            Selector::All
        } else {
            Selector::Patterns(patterns)
        }
    }
}

enum Matcher {
    Prefix(String),
    Glob(Regex),
}

impl Matcher {
    fn parse(pattern: &str) -> Result<Self, RegistryError> {
        if !pattern.contains(['*', '?']) {
            return Ok(Matcher::Prefix(pattern.to_string()));
        }
        let mut expr = String::from("^");
        for c in pattern.chars() {
            match c {
                '*' => expr.push_str(".*"),
                '?' => expr.push('.'),
                other => expr.push_str(&regex::escape(&other.to_string())),
            }
        }
        expr.push('$');
        Regex::new(&expr)
            .map(Matcher::Glob)
            .map_err(|e| RegistryError::InvalidPattern {
                pattern: pattern.to_string(),
                message: e.to_string(),
            })
    }

    fn matches(&self, id: &str) -> bool {
        match self {
            // An exact id is also a prefix of itself.
            Matcher::Prefix(prefix) => id.starts_with(prefix.as_str()),
            Matcher::Glob(re) => re.is_match(id),
        }
    }
}

/// Registry of problems and their grading plans.
#[derive(Debug, Default)]
pub struct ProblemRegistry {
    problems: BTreeMap<String, Arc<ProblemSpec>>,
    plans: HashMap<String, Arc<GradingPlan>>,
}

impl ProblemRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding the built-in catalog.
    pub fn with_builtin() -> Result<Self, RegistryError> {
        let mut registry = Self::new();
        registry.register_all(builtin_problems())?;
        Ok(registry)
    }

    /// Validates `spec`, resolves its graders and stores it.
    pub fn register(&mut self, spec: ProblemSpec) -> Result<(), RegistryError> {
        if self.problems.contains_key(&spec.id) {
            return Err(RegistryError::DuplicateId(spec.id));
        }
        spec.validate()?;

        let graders = spec
            .grading
            .iter()
            .map(|g| g.build())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| RegistryError::InvalidSpec {
                id: spec.id.clone(),
                reason: e.to_string(),
            })?;

        debug!(problem_id = %spec.id, graders = graders.len(), "Registered problem");
        self.plans
            .insert(spec.id.clone(), Arc::new(GradingPlan::new(graders)));
        self.problems.insert(spec.id.clone(), Arc::new(spec));
        Ok(())
    }

    pub fn register_all(&mut self, specs: impl IntoIterator<Item = ProblemSpec>) -> Result<(), RegistryError> {
        for spec in specs {
            self.register(spec)?;
        }
        Ok(())
    }

    /// Registers every spec found under `dir`. Returns how many were added.
    pub fn load_dir(&mut self, dir: &Path) -> Result<usize, RegistryError> {
        let specs = load_problems_dir(dir)?;
        let count = specs.len();
        self.register_all(specs)?;
        info!(dir = %dir.display(), count, "Loaded problems from directory");
        Ok(count)
    }

    pub fn len(&self) -> usize {
        self.problems.len()
    }

    pub fn is_empty(&self) -> bool {
        self.problems.is_empty()
    }

    pub fn get(&self, id: &str) -> Result<Arc<ProblemSpec>, RegistryError> {
        self.problems
            .get(id)
            .cloned()
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))
    }

    /// Every problem in id order.
    pub fn all(&self) -> Vec<Arc<ProblemSpec>> {
        self.problems.values().cloned().collect()
    }

    /// Resolves `selector` into problems, in id order without duplicates.
    pub fn select(&self, selector: &Selector) -> Result<Vec<Arc<ProblemSpec>>, RegistryError> {
        match selector {
            Selector::All => Ok(self.all()),
            Selector::Ids(ids) => {
                let unique: BTreeSet<&str> = ids.iter().map(String::as_str).collect();
                unique.into_iter().map(|id| self.get(id)).collect()
            }
            Selector::Patterns(patterns) => {
                let mut selected = BTreeSet::new();
                for pattern in patterns {
                    let matcher = Matcher::parse(pattern)?;
                    let before = selected.len();
                    let mut matched = false;
                    for id in self.problems.keys() {
                        if matcher.matches(id) {
                            matched = true;
                            selected.insert(id.as_str());
                        }
                    }
                    if !matched {
                        return Err(RegistryError::NoMatch(pattern.clone()));
                    }
                    debug!(pattern = %pattern, added = selected.len() - before, "Pattern selected problems");
                }
                selected.into_iter().map(|id| self.get(id)).collect()
            }
        }
    }

    /// The grading plan resolved for `id` at registration.
    pub fn grading_plan(&self, id: &str) -> Result<Arc<GradingPlan>, RegistryError> {
        self.plans
            .get(id)
            .cloned()
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))
    }
}

//! Process-wide cache of parsed settings databases, keyed by camera identity.

use super::{ConfigMode, NodeForest};
use crate::query::QueryRule;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// One complete candidate pipeline topology parsed from the settings
/// database, tagged with the config modes it supports and an identifying key.
#[derive(Debug, Clone)]
pub struct Template {
    key: i32,
    mc_id: i32,
    modes: Vec<ConfigMode>,
    forest: NodeForest,
}

impl Template {
    /// Create a template from its identifying key, its comma-separated
    /// supported-mode declaration and its node tree. The mode declaration
    /// is parsed once here, not per query.
    pub fn new(key: i32, mode_declaration: &str, forest: NodeForest) -> Self {
        Self { key, mc_id: -1, modes: ConfigMode::parse_set(mode_declaration), forest }
    }

    /// Attach the media-controller id this template routes through.
    pub fn with_mc_id(mut self, mc_id: i32) -> Self {
        self.mc_id = mc_id;
        self
    }

    /// Identifying key of this template within the settings database.
    pub fn key(&self) -> i32 {
        self.key
    }

    /// Media-controller id, `-1` when the database does not declare one.
    pub fn mc_id(&self) -> i32 {
        self.mc_id
    }

    /// Whether this template declares support for the given config mode.
    pub fn supports_mode(&self, mode: ConfigMode) -> bool {
        self.modes.contains(&mode)
    }

    /// Read-only view of the template's node tree.
    pub fn forest(&self) -> &NodeForest {
        &self.forest
    }
}

/// Opaque handle to a template inside one [`SettingsDatabase`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TemplateHandle(usize);

/// The parsed settings database of one camera: the full list of candidate
/// templates, immutable and shared for the process lifetime.
#[derive(Debug, Default)]
pub struct SettingsDatabase {
    templates: Vec<Template>,
}

impl SettingsDatabase {
    /// Build a database from its templates.
    pub fn new(templates: Vec<Template>) -> Self {
        Self { templates }
    }

    /// Number of templates.
    pub fn len(&self) -> usize {
        self.templates.len()
    }

    /// Whether the database holds no templates.
    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    /// Borrow a template.
    pub fn template(&self, handle: TemplateHandle) -> &Template {
        &self.templates[handle.0]
    }

    /// Raw phase-1 match: every template whose tree satisfies all predicates
    /// in the rule exactly, in database order.
    pub fn query(&self, rule: &QueryRule) -> Vec<TemplateHandle> {
        (0..self.templates.len())
            .map(TemplateHandle)
            .filter(|&h| self.matches(h, rule))
            .collect()
    }

    /// Re-run a rule against a previously-obtained candidate subset,
    /// preserving order.
    pub fn query_subset(&self, rule: &QueryRule, subset: &[TemplateHandle]) -> Vec<TemplateHandle> {
        subset.iter().copied().filter(|&h| self.matches(h, rule)).collect()
    }

    fn matches(&self, handle: TemplateHandle, rule: &QueryRule) -> bool {
        let forest = self.template(handle).forest();
        rule.iter().all(|(sink, key, value)| {
            let node = match sink {
                Some(name) => forest.find_by_name(name),
                None => Some(forest.root()),
            };
            match node.and_then(|n| forest.attr(n, key)) {
                Some(attr) => attr.matches(value),
                None => false,
            }
        })
    }

    /// Deep-materialize one candidate into a tree the caller owns and may
    /// mutate. Port-format overrides during instantiation land on this copy
    /// only, never on the shared database.
    pub fn create_instance(&self, handle: TemplateHandle) -> NodeForest {
        self.template(handle).forest().clone()
    }
}

/// Load-once cache of settings databases for every camera on the device.
///
/// One mutex guards the map; lookups after the first successful load clone
/// an `Arc` and never block each other for long. The resolver receives the
/// store by reference rather than reaching for hidden statics.
#[derive(Debug, Default)]
pub struct DescriptorStore {
    cache: Mutex<HashMap<i32, Arc<SettingsDatabase>>>,
}

impl DescriptorStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Install the settings database for a camera, replacing any previous
    /// one. Called once per camera at open time.
    pub fn load_once(&self, camera_id: i32, database: SettingsDatabase) {
        let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        if cache.insert(camera_id, Arc::new(database)).is_some() {
            tracing::debug!("replaced settings database for camera {camera_id}");
        }
    }

    /// Look up the settings database for a camera.
    pub fn settings(&self, camera_id: i32) -> Option<Arc<SettingsDatabase>> {
        let cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        cache.get(&camera_id).cloned()
    }

    /// Drop the databases of all cameras, at process teardown.
    pub fn release_all(&self) {
        let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        cache.clear();
    }
}

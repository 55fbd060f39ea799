pub mod tables;

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::error::{Error, Result};
use crate::models::*;
use tables::WideTable;

/// Handle to a knowledge base stored as CSV tables in one directory.
///
/// Everything is loaded once on open and each mutation rewrites the
/// tables it touched. The handle is cheap to clone; clones share state.
/// The directory is assumed to be owned exclusively by this process.
pub struct KnowledgeBase {
    dir: PathBuf,
    state: Arc<Mutex<KbState>>,
}

#[derive(Debug, Clone, Default)]
struct KbState {
    /// Registry order is the classifier's column order.
    features: Vec<Feature>,
    settings: BTreeMap<String, ValueSetting>,
    species: Vec<String>,
    applicability: WideTable<bool>,
    values: WideTable<FeatureValue>,
}

impl KbState {
    fn feature_by_code(&self, code: &str) -> Result<&Feature> {
        self.features
            .iter()
            .find(|f| f.code == code)
            .ok_or_else(|| Error::UnknownFeature(code.to_string()))
    }

    fn setting(&self, code: &str) -> Result<ValueSetting> {
        self.feature_by_code(code)?;
        Ok(self.settings.get(code).cloned().unwrap_or_default())
    }

    fn require_species(&self, name: &str) -> Result<()> {
        if self.species.iter().any(|s| s == name) {
            Ok(())
        } else {
            Err(Error::UnknownSpecies(name.to_string()))
        }
    }

    fn codes(&self) -> Vec<String> {
        self.features.iter().map(|f| f.code.clone()).collect()
    }
}

impl KnowledgeBase {
    /// Open a knowledge base, starting with an empty feature registry if none is stored.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        Self::load(dir.into(), false)
    }

    /// Open a knowledge base, starting with the default bird features if none are stored.
    pub fn open_seeded(dir: impl Into<PathBuf>) -> Result<Self> {
        Self::load(dir.into(), true)
    }

    fn load(dir: PathBuf, seed: bool) -> Result<Self> {
        std::fs::create_dir_all(&dir)?;

        let features = match tables::read_feature_map(&dir)? {
            Some(features) => features,
            None => match tables::read_feature_labels(&dir)? {
                Some(labels) => labels
                    .into_iter()
                    .enumerate()
                    .map(|(row, label)| {
                        let feature = Feature::from_label(label);
                        tables::check_code(&feature.code).map_err(|e| {
                            let reason = e.to_string();
                            Error::malformed(tables::FEATURE_LABELS, row + 1, "feature", reason)
                        })?;
                        Ok(feature)
                    })
                    .collect::<Result<Vec<_>>>()?,
                None if seed => default_features(),
                None => Vec::new(),
            },
        };

        let settings = load_settings(&dir, &features)?;
        let species = tables::read_species(&dir)?.unwrap_or_default();

        let codes = features.iter().map(|f| f.code.clone()).collect::<Vec<_>>();
        let applicability: WideTable<bool> = WideTable::read(&dir, tables::APPLICABILITY)?
            .unwrap_or_else(|| WideTable::with_columns(codes.clone()));
        let mut values: WideTable<FeatureValue> = WideTable::read(&dir, tables::VALUES)?
            .unwrap_or_else(|| WideTable::with_columns(codes));
        type_values(&mut values, &features, &settings);

        tracing::info!(
            dir = %dir.display(),
            features = features.len(),
            species = species.len(),
            "knowledge base loaded"
        );

        Ok(Self {
            dir,
            state: Arc::new(Mutex::new(KbState {
                features,
                settings,
                species,
                applicability,
                values,
            })),
        })
    }

    pub fn data_dir(&self) -> &Path {
        &self.dir
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, KbState> {
        self.state.lock().expect("knowledge base lock poisoned")
    }

    /// Apply a mutation to a copy of the state. The copy replaces the
    /// shared state only if the mutation, including its writes, succeeded.
    fn update<T>(&self, apply: impl FnOnce(&mut KbState) -> Result<T>) -> Result<T> {
        let mut state = self.lock();
        let mut next = state.clone();
        let out = apply(&mut next)?;
        *state = next;
        Ok(out)
    }

    // ============================================================
    // Feature registry
    // ============================================================

    pub fn list_features(&self) -> Vec<Feature> {
        self.lock().features.clone()
    }

    pub fn get_feature(&self, label: &str) -> Option<Feature> {
        self.lock().features.iter().find(|f| f.label == label).cloned()
    }

    pub fn feature_by_code(&self, code: &str) -> Option<Feature> {
        self.lock().feature_by_code(code).ok().cloned()
    }

    /// Register a feature. Returns `None` if the label is empty or already registered.
    ///
    /// New features start out enumerable with no values. Fails with
    /// [`Error::InvalidFeatureCode`] before anything changes if the derived
    /// code cannot name a file in the data directory.
    pub fn add_feature(&self, label: &str) -> Result<Option<Feature>> {
        let label = label.trim();
        if label.is_empty() {
            return Ok(None);
        }
        let feature = Feature::from_label(label);
        tables::check_code(&feature.code)?;

        self.update(|state| {
            if state.features.iter().any(|f| f.label == label) {
                tracing::debug!(label, "feature already registered");
                return Ok(None);
            }

            state.features.push(feature.clone());
            state.settings.entry(feature.code.clone()).or_default();

            // The registry goes last: settings of unregistered codes are ignored on load.
            self.save_settings(state)?;
            self.save_registry(state)?;

            tracing::info!(label, code = %feature.code, "feature registered");
            Ok(Some(feature))
        })
    }

    /// Remove a feature and its value setting.
    ///
    /// Its columns stay in the applicability and value tables until
    /// [`KnowledgeBase::prune`] is run.
    pub fn remove_feature(&self, label: &str) -> Result<Option<Feature>> {
        self.update(|state| {
            let Some(index) = state.features.iter().position(|f| f.label == label) else {
                return Ok(None);
            };
            self.remove_feature_in(state, index).map(Some)
        })
    }

    pub fn remove_feature_at(&self, index: usize) -> Result<Option<Feature>> {
        self.update(|state| {
            if index >= state.features.len() {
                return Ok(None);
            }
            self.remove_feature_in(state, index).map(Some)
        })
    }

    fn remove_feature_in(&self, state: &mut KbState, index: usize) -> Result<Feature> {
        let feature = state.features.remove(index);

        // Another label may derive the same code; its setting stays.
        let orphaned = !state.features.iter().any(|f| f.code == feature.code);
        if orphaned {
            state.settings.remove(&feature.code);
        }

        self.save_registry(state)?;
        self.save_settings(state)?;
        if orphaned {
            tables::remove_table(&self.dir, &tables::enum_values_file(&feature.code))?;
        }

        tracing::info!(label = %feature.label, code = %feature.code, "feature removed");
        Ok(feature)
    }

    // ============================================================
    // Value settings
    // ============================================================

    pub fn get_setting(&self, code: &str) -> Result<ValueSetting> {
        self.lock().setting(code)
    }

    /// Every registered feature with its setting, in registry order.
    pub fn feature_domains(&self) -> Vec<(Feature, ValueSetting)> {
        let state = self.lock();
        state
            .features
            .iter()
            .map(|f| {
                let setting = state.settings.get(&f.code).cloned().unwrap_or_default();
                (f.clone(), setting)
            })
            .collect()
    }

    /// Switch a feature's kind. Data of the previous kind is discarded.
    pub fn set_kind(&self, code: &str, kind: ValueKind) -> Result<ValueSetting> {
        self.update(|state| {
            let current = state.setting(code)?;
            if current.kind() == kind {
                return Ok(current);
            }

            let setting = ValueSetting::empty(kind);
            state.settings.insert(code.to_string(), setting.clone());
            self.save_settings(state)?;
            if current.kind() == ValueKind::Enumerable {
                tables::remove_table(&self.dir, &tables::enum_values_file(code))?;
            }

            tracing::info!(code, kind = %kind, "value kind changed");
            Ok(setting)
        })
    }

    /// Configure a numeric range, switching the feature to numeric if needed.
    ///
    /// Existing values are not re-checked; see [`KnowledgeBase::domain_violations`].
    pub fn set_range(&self, code: &str, min: i64, max: i64) -> Result<()> {
        if min > max {
            return Err(Error::InvalidRange { min, max });
        }

        self.update(|state| {
            let current = state.setting(code)?;
            state
                .settings
                .insert(code.to_string(), ValueSetting::Range { min, max });
            self.save_settings(state)?;
            if current.kind() == ValueKind::Enumerable {
                tables::remove_table(&self.dir, &tables::enum_values_file(code))?;
            }

            tracing::info!(code, min, max, "range saved");
            Ok(())
        })
    }

    pub fn get_range(&self, code: &str) -> Result<Option<(i64, i64)>> {
        Ok(self.lock().setting(code)?.range())
    }

    /// Append a value label. Returns false for empty or already listed labels.
    pub fn add_enum_value(&self, code: &str, value: &str) -> Result<bool> {
        let value = value.trim();
        self.update(|state| {
            let mut values = enum_values_of(state, code)?;
            if value.is_empty() || values.iter().any(|v| v == value) {
                return Ok(false);
            }

            values.push(value.to_string());
            state
                .settings
                .insert(code.to_string(), ValueSetting::Enum { values });
            self.save_settings(state)?;

            tracing::info!(code, value, "enum value added");
            Ok(true)
        })
    }

    /// Remove the value label at `index`. Later labels shift down by one.
    pub fn remove_enum_value(&self, code: &str, index: usize) -> Result<Option<String>> {
        self.update(|state| {
            let mut values = enum_values_of(state, code)?;
            if index >= values.len() {
                return Ok(None);
            }

            let removed = values.remove(index);
            state
                .settings
                .insert(code.to_string(), ValueSetting::Enum { values });
            self.save_settings(state)?;

            tracing::info!(code, value = %removed, "enum value removed");
            Ok(Some(removed))
        })
    }

    // ============================================================
    // Taxonomy
    // ============================================================

    pub fn list_species(&self) -> Vec<String> {
        self.lock().species.clone()
    }

    /// Add a species. Returns false if the name is empty or already present.
    pub fn add_species(&self, name: &str) -> Result<bool> {
        let name = name.trim();
        self.update(|state| {
            if name.is_empty() || state.species.iter().any(|s| s == name) {
                return Ok(false);
            }

            state.species.push(name.to_string());
            tables::write_species(&self.dir, &state.species)?;

            tracing::info!(species = name, "species added");
            Ok(true)
        })
    }

    /// Remove the species at `index`.
    ///
    /// Its applicability and value rows are kept until [`KnowledgeBase::prune`] is run.
    pub fn remove_species_at(&self, index: usize) -> Result<Option<String>> {
        self.update(|state| {
            if index >= state.species.len() {
                return Ok(None);
            }
            self.remove_species_in(state, index).map(Some)
        })
    }

    pub fn remove_species(&self, name: &str) -> Result<bool> {
        self.update(|state| {
            let index = state.species.iter().position(|s| s == name);
            match index {
                Some(index) => self.remove_species_in(state, index).map(|_| true),
                None => Ok(false),
            }
        })
    }

    fn remove_species_in(&self, state: &mut KbState, index: usize) -> Result<String> {
        let removed = state.species.remove(index);
        tables::write_species(&self.dir, &state.species)?;

        tracing::info!(species = %removed, "species removed");
        Ok(removed)
    }

    // ============================================================
    // Applicability
    // ============================================================

    /// Applicability flags stored for a species. Empty when it has no row.
    pub fn get_applicability(&self, species: &str) -> BTreeMap<String, bool> {
        self.lock()
            .applicability
            .row(species)
            .map(|r| r.cells.clone())
            .unwrap_or_default()
    }

    pub fn is_applicable(&self, species: &str, code: &str) -> bool {
        self.get_applicability(species)
            .get(code)
            .copied()
            .unwrap_or(false)
    }

    /// Insert or update the applicability row of a species.
    pub fn set_applicability(&self, species: &str, flags: BTreeMap<String, bool>) -> Result<()> {
        self.update(|state| {
            state.require_species(species)?;
            for code in flags.keys() {
                state.feature_by_code(code)?;
            }

            let codes = state.codes();
            state
                .applicability
                .ensure_columns(codes.iter().map(String::as_str));
            state.applicability.upsert(
                species,
                flags.into_iter().map(|(code, flag)| (code, Some(flag))).collect(),
            );
            state.applicability.write(&self.dir, tables::APPLICABILITY)?;

            tracing::info!(species, "applicability saved");
            Ok(())
        })
    }

    // ============================================================
    // Feature values
    // ============================================================

    /// Stored values of a species, one entry per table column.
    ///
    /// A species without a row maps every registered code to `None`.
    pub fn get_values(&self, species: &str) -> BTreeMap<String, Option<FeatureValue>> {
        let state = self.lock();
        match state.values.row(species) {
            Some(row) => state
                .values
                .columns
                .iter()
                .map(|code| (code.clone(), row.cells.get(code).cloned()))
                .collect(),
            None => state.features.iter().map(|f| (f.code.clone(), None)).collect(),
        }
    }

    /// Validate and save the values of a species.
    ///
    /// Every applicable feature needs a non-empty value inside its domain.
    /// On failure nothing is written. Values for features that do not apply
    /// to the species are ignored.
    pub fn set_values(
        &self,
        species: &str,
        values: BTreeMap<String, Option<FeatureValue>>,
    ) -> Result<()> {
        self.update(|state| {
            state.require_species(species)?;
            for code in values.keys() {
                state.feature_by_code(code)?;
            }

            let applicable = state
                .applicability
                .row(species)
                .map(|r| r.cells.clone())
                .unwrap_or_default();
            let is_applicable = |code: &str| applicable.get(code).copied().unwrap_or(false);
            let provided = |code: &str| {
                values
                    .get(code)
                    .and_then(Option::as_ref)
                    .filter(|v| !v.is_blank())
            };

            let missing = state
                .features
                .iter()
                .filter(|f| is_applicable(&f.code) && provided(&f.code).is_none())
                .map(|f| f.label.clone())
                .collect::<Vec<_>>();
            if !missing.is_empty() {
                tracing::warn!(species, ?missing, "values missing, nothing saved");
                return Err(Error::MissingValues { labels: missing });
            }

            let mut cells = BTreeMap::new();
            for feature in state.features.iter().filter(|f| is_applicable(&f.code)) {
                let Some(value) = provided(&feature.code) else {
                    continue;
                };
                let setting = state.settings.get(&feature.code).cloned().unwrap_or_default();
                let value = setting.coerce(value);
                if !setting.admits(&value) {
                    return Err(Error::OutOfDomain {
                        label: feature.label.clone(),
                        value: value.to_string(),
                    });
                }
                cells.insert(feature.code.clone(), Some(value));
            }

            let codes = state.codes();
            state.values.ensure_columns(codes.iter().map(String::as_str));
            state.values.upsert(species, cells);
            state.values.write(&self.dir, tables::VALUES)?;

            tracing::info!(species, "values saved");
            Ok(())
        })
    }

    // ============================================================
    // Reports and maintenance
    // ============================================================

    /// Applicability and value of every registered feature for a species.
    pub fn species_profile(&self, species: &str) -> Result<SpeciesProfile> {
        let state = self.lock();
        state.require_species(species)?;

        let flags = state.applicability.row(species);
        let values = state.values.row(species);
        let entries = state
            .features
            .iter()
            .map(|f| ProfileEntry {
                label: f.label.clone(),
                code: f.code.clone(),
                applicable: flags
                    .and_then(|r| r.cells.get(&f.code))
                    .copied()
                    .unwrap_or(false),
                value: values.and_then(|r| r.cells.get(&f.code)).cloned(),
            })
            .collect();

        Ok(SpeciesProfile {
            species: species.to_string(),
            entries,
        })
    }

    /// Stored values that no longer fit their feature's current setting.
    pub fn domain_violations(&self) -> Vec<DomainViolation> {
        let state = self.lock();
        let mut violations = Vec::new();
        for row in &state.values.rows {
            for (code, value) in &row.cells {
                let Ok(setting) = state.setting(code) else {
                    continue;
                };
                if !setting.admits(value) {
                    violations.push(DomainViolation {
                        species: row.species.clone(),
                        code: code.clone(),
                        value: value.clone(),
                    });
                }
            }
        }
        violations
    }

    /// Drop columns of unregistered features and rows of removed species
    /// from the applicability and value tables.
    pub fn prune(&self) -> Result<PruneReport> {
        self.update(|state| {
            let codes = state.codes().into_iter().collect::<BTreeSet<_>>();
            let species = state.species.iter().cloned().collect::<BTreeSet<_>>();

            let mut columns = BTreeSet::new();
            let mut rows = BTreeSet::new();

            let stale_columns = |columns_of: &[String]| {
                columns_of
                    .iter()
                    .filter(|c| !codes.contains(*c))
                    .cloned()
                    .collect::<Vec<_>>()
            };

            let mut applicability_changed = false;
            for code in stale_columns(state.applicability.columns.as_slice()) {
                applicability_changed |= state.applicability.drop_column(&code);
                columns.insert(code);
            }
            let stale_rows = state
                .applicability
                .rows
                .iter()
                .filter(|r| !species.contains(&r.species))
                .map(|r| r.species.clone())
                .collect::<Vec<_>>();
            for name in stale_rows {
                applicability_changed |= state.applicability.drop_row(&name);
                rows.insert(name);
            }

            let mut values_changed = false;
            for code in stale_columns(state.values.columns.as_slice()) {
                values_changed |= state.values.drop_column(&code);
                columns.insert(code);
            }
            let stale_rows = state
                .values
                .rows
                .iter()
                .filter(|r| !species.contains(&r.species))
                .map(|r| r.species.clone())
                .collect::<Vec<_>>();
            for name in stale_rows {
                values_changed |= state.values.drop_row(&name);
                rows.insert(name);
            }

            if applicability_changed {
                state.applicability.write(&self.dir, tables::APPLICABILITY)?;
            }
            if values_changed {
                state.values.write(&self.dir, tables::VALUES)?;
            }

            let report = PruneReport {
                dropped_columns: columns.into_iter().collect(),
                dropped_rows: rows.into_iter().collect(),
            };
            tracing::info!(
                columns = report.dropped_columns.len(),
                rows = report.dropped_rows.len(),
                "stale table entries pruned"
            );
            Ok(report)
        })
    }

    // ============================================================
    // Persistence
    // ============================================================

    fn save_registry(&self, state: &KbState) -> Result<()> {
        tables::write_feature_map(&self.dir, &state.features)?;
        tables::write_feature_labels(&self.dir, &state.features)
    }

    /// Rewrite ranges, every enum value list and the kind table.
    ///
    /// Files are replaced one at a time, so a failure part way through can
    /// leave them out of step with each other.
    fn save_settings(&self, state: &KbState) -> Result<()> {
        let mut ranges = Vec::new();
        let mut kinds = Vec::new();
        for (code, setting) in &state.settings {
            match setting {
                ValueSetting::Range { min, max } => ranges.push((code.clone(), *min, *max)),
                ValueSetting::Enum { values } => {
                    tables::write_enum_values(&self.dir, code, values)?
                }
            }
            kinds.push((code.clone(), setting.kind()));
        }
        tables::write_ranges(&self.dir, &ranges)?;
        tables::write_value_kinds(&self.dir, &kinds)
    }
}

impl Clone for KnowledgeBase {
    fn clone(&self) -> Self {
        Self {
            dir: self.dir.clone(),
            state: self.state.clone(),
        }
    }
}

fn enum_values_of(state: &KbState, code: &str) -> Result<Vec<String>> {
    match state.setting(code)? {
        ValueSetting::Enum { values } => Ok(values),
        other => Err(Error::KindMismatch {
            code: code.to_string(),
            expected: ValueKind::Enumerable.to_string(),
            actual: other.kind().to_string(),
        }),
    }
}

/// Type raw value cells by their feature's setting.
///
/// Registered features without a stored setting count as enumerable.
/// Cells in columns of unregistered features are typed from their text.
fn type_values(
    values: &mut WideTable<FeatureValue>,
    features: &[Feature],
    settings: &BTreeMap<String, ValueSetting>,
) {
    for row in &mut values.rows {
        for (code, value) in row.cells.iter_mut() {
            *value = match settings.get(code) {
                Some(setting) => setting.coerce(value),
                None if features.iter().any(|f| f.code == *code) => {
                    ValueSetting::default().coerce(value)
                }
                None => FeatureValue::parse_cell(&value.to_string())
                    .unwrap_or_else(|| value.clone()),
            };
        }
    }
}

/// Rebuild value settings for the registered features.
///
/// The kind table decides the kind when it has an entry. Otherwise a stored
/// range makes a feature numeric and a value list makes it enumerable.
fn load_settings(dir: &Path, features: &[Feature]) -> Result<BTreeMap<String, ValueSetting>> {
    let ranges = tables::read_ranges(dir)?
        .into_iter()
        .map(|(code, min, max)| (code, (min, max)))
        .collect::<BTreeMap<_, _>>();
    let kinds = tables::read_value_kinds(dir)?
        .into_iter()
        .collect::<BTreeMap<_, _>>();

    let mut settings = BTreeMap::new();
    for feature in features {
        let code = &feature.code;
        if settings.contains_key(code) {
            continue;
        }
        let values = tables::read_enum_values(dir, code)?;
        let kind = match (kinds.get(code), ranges.contains_key(code), &values) {
            (Some(kind), _, _) => *kind,
            (None, true, _) => ValueKind::Numeric,
            (None, false, Some(_)) => ValueKind::Enumerable,
            (None, false, None) => continue,
        };
        let setting = match kind {
            ValueKind::Numeric => {
                let (min, max) = ranges.get(code).copied().unwrap_or(DEFAULT_RANGE);
                ValueSetting::Range { min, max }
            }
            ValueKind::Enumerable => ValueSetting::Enum {
                values: values.unwrap_or_default(),
            },
        };
        settings.insert(code.clone(), setting);
    }

    let orphaned = ranges
        .keys()
        .chain(kinds.keys())
        .filter(|code| !settings.contains_key(*code))
        .count();
    if orphaned > 0 {
        tracing::debug!(orphaned, "ignoring settings of unregistered features");
    }

    Ok(settings)
}

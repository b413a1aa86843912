//! Activity assembly
//!
//! [`ActivityLoader::load`] turns an [`ActivityDef`] into a runnable
//! [`Activity`]: it picks the workload, resolves every op against the
//! activity's live parameters, creates the driver and builds the op
//! sequence. Every compile-time error surfaces here, before any worker
//! starts.

use crate::activity_def::ActivityDef;
use crate::driver::{Driver, DriverRegistry};
use crate::error::ActivityError;
use crate::sequence::OpSequence;
use crate::workload::Workload;
use cb_templating::{ConfigSource, ParsedTemplateMap};
use cb_virtdata::{BindingCompiler, GeneratorLibrary};
use dashmap::DashMap;
use std::fmt;
use std::sync::Arc;

/// Everything a worker needs to run cycles
pub struct Activity {
    alias: String,
    sequence: OpSequence<ParsedTemplateMap>,
    driver: Arc<dyn Driver>,
}

impl Activity {
    /// Assemble from parts
    #[must_use]
    pub fn new(alias: impl Into<String>, sequence: OpSequence<ParsedTemplateMap>, driver: Arc<dyn Driver>) -> Self {
        Self {
            alias: alias.into(),
            sequence,
            driver,
        }
    }

    /// Activity alias
    #[inline]
    #[must_use]
    pub fn alias(&self) -> &str {
        &self.alias
    }

    /// Op sequence
    #[inline]
    #[must_use]
    pub fn sequence(&self) -> &OpSequence<ParsedTemplateMap> {
        &self.sequence
    }

    /// Driver shared by every worker
    #[inline]
    #[must_use]
    pub fn driver(&self) -> &Arc<dyn Driver> {
        &self.driver
    }
}

impl fmt::Debug for Activity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Activity")
            .field("alias", &self.alias)
            .field("sequence", &self.sequence)
            .field("driver", &self.driver.name())
            .finish()
    }
}

/// Builds activities from definitions
pub struct ActivityLoader {
    compiler: Arc<BindingCompiler>,
    drivers: Arc<DriverRegistry>,
    workloads: DashMap<String, Workload>,
}

impl ActivityLoader {
    /// Loader with the default generator library and drivers
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::new(Arc::new(BindingCompiler::default()), Arc::new(DriverRegistry::with_defaults()))
    }

    /// Loader with a binding cache of `capacity` entries
    #[must_use]
    pub fn with_cache_capacity(capacity: u64) -> Self {
        Self::new(
            Arc::new(BindingCompiler::with_capacity(GeneratorLibrary::with_defaults(), capacity)),
            Arc::new(DriverRegistry::with_defaults()),
        )
    }

    /// Loader over an existing compiler and driver registry
    #[must_use]
    pub fn new(compiler: Arc<BindingCompiler>, drivers: Arc<DriverRegistry>) -> Self {
        Self {
            compiler,
            drivers,
            workloads: DashMap::new(),
        }
    }

    /// Driver registry
    #[inline]
    #[must_use]
    pub fn drivers(&self) -> &Arc<DriverRegistry> {
        &self.drivers
    }

    /// Shared binding compiler
    #[inline]
    #[must_use]
    pub fn compiler(&self) -> &Arc<BindingCompiler> {
        &self.compiler
    }

    /// Make a workload available to `workload=<name>`
    pub fn register_workload(&self, workload: Workload) {
        tracing::debug!(workload = workload.name(), ops = workload.ops().len(), "workload registered");
        self.workloads.insert(workload.name().to_string(), workload);
    }

    /// Build an activity
    ///
    /// `workload=<name>` selects a registered workload, falling back to a
    /// YAML file at that path. Otherwise `op=<stmt>` runs one inline op.
    ///
    /// # Errors
    /// Returns [`ActivityError`] for invalid parameters, a missing or
    /// malformed workload, an op that fails to resolve, an unknown driver
    /// or an empty op sequence.
    pub fn load(&self, def: &ActivityDef) -> Result<Activity, ActivityError> {
        def.validate()?;
        let alias = def.alias();
        let workload = self.workload_for(def, &alias)?;

        let source: Arc<dyn ConfigSource> = def.params().clone();
        let mut weighted = Vec::with_capacity(workload.ops().len());
        for raw in workload.ops() {
            let op = ParsedTemplateMap::resolve(raw, Some(Arc::clone(&source)), &self.compiler)?;
            weighted.push((op, raw.ratio));
        }
        let sequence = OpSequence::new(weighted).ok_or_else(|| ActivityError::EmptySequence {
            alias: alias.clone(),
        })?;
        let driver = self.drivers.create(def)?;

        tracing::info!(
            alias = %alias,
            workload = workload.name(),
            ops = sequence.ops().len(),
            sequence = sequence.len(),
            driver = driver.name(),
            "activity loaded"
        );
        Ok(Activity::new(alias, sequence, driver))
    }

    fn workload_for(&self, def: &ActivityDef, alias: &str) -> Result<Workload, ActivityError> {
        if let Some(name) = def.workload() {
            if let Some(workload) = self.workloads.get(&name) {
                return Ok(workload.value().clone());
            }
            return Workload::from_file(&name);
        }
        if let Some(stmt) = def.op() {
            return Ok(Workload::inline(alias, &stmt));
        }
        Err(ActivityError::NoWorkload {
            alias: alias.to_string(),
        })
    }
}

impl Default for ActivityLoader {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl fmt::Debug for ActivityLoader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let workloads: Vec<String> = self.workloads.iter().map(|e| e.key().clone()).collect();
        f.debug_struct("ActivityLoader")
            .field("drivers", &self.drivers)
            .field("workloads", &workloads)
            .finish_non_exhaustive()
    }
}

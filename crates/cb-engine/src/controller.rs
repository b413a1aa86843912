//! Scenario controller
//!
//! A registry of running activities keyed by alias. Control calls are
//! serialized by one lock over the registry; workers run concurrently
//! with control calls and with each other.
//!
//! # Example
//!
//! ```rust,ignore
//! let controller = ScenarioController::new(EngineConfig::default());
//! controller.start_params("alias=load; driver=diag; op=noop; cycles=1M; threads=4")?;
//! controller.modify("load", "threads", "8")?;
//! controller.await_activity("load", Some(Duration::from_secs(60)))?;
//! ```

use crate::activity::ActivityLoader;
use crate::activity_def::{ActivityDef, CORE_PARAMS};
use crate::config::EngineConfig;
use crate::cycles::CycleRange;
use crate::error::{ActivityError, ControlError, ParamError};
use crate::executor::ActivityExecutor;
use crate::metrics::MetricsSummary;
use crate::params::ParameterMap;
use crate::run_state::RunState;
use indexmap::IndexMap;
use parking_lot::Mutex;
use regex::Regex;
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Controls the activities of one scenario
pub struct ScenarioController {
    session: Uuid,
    config: EngineConfig,
    loader: ActivityLoader,
    activities: Mutex<IndexMap<String, Arc<ActivityExecutor>>>,
}

impl ScenarioController {
    /// Controller with the default generator library and drivers
    #[must_use]
    pub fn new(config: EngineConfig) -> Self {
        let loader = ActivityLoader::with_cache_capacity(config.binding_cache_capacity);
        Self::with_loader(config, loader)
    }

    /// Controller over a custom loader
    #[must_use]
    pub fn with_loader(config: EngineConfig, loader: ActivityLoader) -> Self {
        let session = Uuid::new_v4();
        tracing::info!(session = %session, "scenario controller created");
        Self {
            session,
            config,
            loader,
            activities: Mutex::new(IndexMap::new()),
        }
    }

    /// Session id
    #[inline]
    #[must_use]
    pub fn session_id(&self) -> Uuid {
        self.session
    }

    /// Engine configuration
    #[inline]
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Activity loader, for registering workloads and drivers
    #[inline]
    #[must_use]
    pub fn loader(&self) -> &ActivityLoader {
        &self.loader
    }

    /// Start an activity
    ///
    /// A new alias is registered only if loading and starting succeed. A
    /// stopped or finished alias is restarted with its existing definition
    /// updated from `def`; a rejected update leaves that definition as it
    /// was.
    ///
    /// # Errors
    /// Returns [`ControlError::AlreadyRunning`] for a running alias,
    /// [`ControlError::Param`] for invalid values and
    /// [`ControlError::Activity`] if the activity fails to load or start.
    pub fn start(&self, def: ActivityDef) -> Result<Arc<ActivityExecutor>, ControlError> {
        let mut activities = self.activities.lock();
        self.start_locked(&mut activities, def)
    }

    /// Parse `name=value;...` text and start the activity
    ///
    /// # Errors
    /// Returns [`ControlError::Param`] for malformed text, otherwise as
    /// [`ScenarioController::start`].
    pub fn start_params(&self, text: &str) -> Result<Arc<ActivityExecutor>, ControlError> {
        self.start(ActivityDef::parse(text)?)
    }

    fn start_locked(
        &self,
        activities: &mut IndexMap<String, Arc<ActivityExecutor>>,
        def: ActivityDef,
    ) -> Result<Arc<ActivityExecutor>, ControlError> {
        let alias = def.alias();
        if let Some(existing) = activities.get(&alias).cloned() {
            return self.restart_locked(activities, &existing, &def);
        }

        let activity = self.loader.load(&def)?;
        let executor = ActivityExecutor::new(def, activity, self.config.clone())?;
        executor.start()?;
        activities.insert(alias.clone(), Arc::clone(&executor));
        tracing::info!(session = %self.session, alias = %alias, "activity registered");
        Ok(executor)
    }

    /// Restart a registered alias with `def` merged over its params
    ///
    /// The merged params are validated before the live ones change. A new
    /// driver, workload, inline op or driver setting rebuilds the activity
    /// under the same alias; otherwise the existing pool restarts.
    fn restart_locked(
        &self,
        activities: &mut IndexMap<String, Arc<ActivityExecutor>>,
        existing: &Arc<ActivityExecutor>,
        def: &ActivityDef,
    ) -> Result<Arc<ActivityExecutor>, ControlError> {
        let alias = existing.alias().to_string();
        if existing.state().is_active() {
            return Err(ControlError::AlreadyRunning { alias });
        }
        let update = def.params().snapshot();
        let mut merged = existing.def().params().snapshot();
        merged.extend(update.clone());
        let candidate = ActivityDef::from_map(ParameterMap::from_pairs(merged));
        candidate.validate()?;

        if existing
            .def()
            .needs_reload(&candidate, existing.activity().driver().config_names())
        {
            let activity = self.loader.load(&candidate)?;
            let executor = ActivityExecutor::new(candidate, activity, self.config.clone())?;
            executor.start()?;
            activities.insert(alias.clone(), Arc::clone(&executor));
            tracing::info!(session = %self.session, alias = %alias, "activity reloaded");
            return Ok(executor);
        }

        existing.def().params().apply(&update);
        existing.start()?;
        Ok(Arc::clone(existing))
    }

    /// Start an activity and wait for it to complete
    ///
    /// The registry lock is released while waiting.
    ///
    /// # Errors
    /// As [`ScenarioController::start`], plus the activity's worker failure.
    pub fn run(&self, def: ActivityDef, timeout: Option<Duration>) -> Result<bool, ControlError> {
        let executor = self.start(def)?;
        Ok(executor.await_completion(timeout)?)
    }

    /// Stop every activity matching `pattern`
    ///
    /// `pattern` is split on `,`, `;` and spaces. An element made only of
    /// word characters, `-` and `.` names an alias exactly; any other
    /// element is a regular expression that must match a whole alias.
    ///
    /// # Errors
    /// Returns [`ControlError::InvalidPattern`] for a bad expression and
    /// [`ControlError::NoMatch`] when nothing matches.
    pub fn stop(&self, pattern: &str) -> Result<Vec<String>, ControlError> {
        let activities = self.activities.lock();
        let matched = match_aliases(activities.keys(), pattern)?;
        for alias in &matched {
            if let Some(executor) = activities.get(alias) {
                executor.stop();
            }
        }
        Ok(matched)
    }

    /// Start every stopped or finished activity matching `pattern`
    ///
    /// Patterns follow [`ScenarioController::stop`]. Matched activities
    /// that are already running are left alone. Returns the aliases
    /// started.
    ///
    /// # Errors
    /// Returns the pattern errors of [`ScenarioController::stop`], or the
    /// first start failure; activities started before it keep running.
    pub fn start_matching(&self, pattern: &str) -> Result<Vec<String>, ControlError> {
        let activities = self.activities.lock();
        let matched = match_aliases(activities.keys(), pattern)?;
        let mut started = Vec::with_capacity(matched.len());
        for alias in matched {
            let Some(executor) = activities.get(&alias) else {
                continue;
            };
            if executor.state().is_active() {
                continue;
            }
            executor.def().validate()?;
            executor.start()?;
            started.push(alias);
        }
        tracing::info!(session = %self.session, pattern, started = started.len(), "activities started by pattern");
        Ok(started)
    }

    /// Stop, then force-stop, every activity after `grace`
    pub fn force_stop_scenario(&self, grace: Duration) {
        let activities = self.activities.lock();
        tracing::info!(session = %self.session, activities = activities.len(), "force stopping scenario");
        for executor in activities.values() {
            executor.force_stop(grace);
        }
    }

    /// Wait for one activity
    ///
    /// # Errors
    /// Returns [`ControlError::UnknownAlias`] for an unknown alias and the
    /// activity's worker failure.
    pub fn await_activity(&self, alias: &str, timeout: Option<Duration>) -> Result<bool, ControlError> {
        let executor = self.executor(alias)?;
        Ok(executor.await_completion(timeout)?)
    }

    /// Wait for every activity, sharing one deadline
    ///
    /// # Errors
    /// Returns the first worker failure found.
    pub fn await_completion(&self, timeout: Option<Duration>) -> Result<bool, ControlError> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let executors: Vec<Arc<ActivityExecutor>> = self.activities.lock().values().cloned().collect();
        let mut all = true;
        for executor in executors {
            let remaining = deadline.map(|d| d.saturating_duration_since(Instant::now()));
            all &= executor.await_completion(remaining)?;
        }
        Ok(all)
    }

    /// Change one parameter of a registered activity
    ///
    /// # Errors
    /// Returns [`ControlError::UnknownAlias`] for an unknown alias and
    /// [`ControlError::Param`] for a name neither the engine, the driver
    /// nor the activity's own params know, or for an invalid value.
    pub fn modify(&self, alias: &str, param: &str, value: &str) -> Result<(), ControlError> {
        let activities = self.activities.lock();
        let executor = activities.get(alias).ok_or_else(|| ControlError::UnknownAlias {
            alias: alias.to_string(),
        })?;
        check_known(executor, param)?;
        validate_param(param, value)?;
        tracing::info!(alias, param, value, "modifying activity");
        executor.def().params().set(param, value);
        Ok(())
    }

    /// Apply a parameter map to the activity it names
    ///
    /// An unknown alias is started from the map. For a known alias every
    /// name is checked as in [`ScenarioController::modify`] before any
    /// value changes.
    ///
    /// # Errors
    /// Returns [`ControlError::MissingAlias`] without an `alias`,
    /// [`ControlError::Param`] for unknown names or invalid values, or a
    /// start error.
    pub fn apply(&self, params: &IndexMap<String, String>) -> Result<(), ControlError> {
        let alias = params.get("alias").ok_or(ControlError::MissingAlias)?;
        for (name, value) in params {
            validate_param(name, value)?;
        }
        let mut activities = self.activities.lock();
        match activities.get(alias) {
            Some(executor) => {
                for name in params.keys() {
                    check_known(executor, name)?;
                }
                tracing::info!(alias = %alias, params = params.len(), "applying params");
                executor.def().params().apply(params);
                Ok(())
            }
            None => {
                let def = ActivityDef::from_map(ParameterMap::from_pairs(params.clone()));
                self.start_locked(&mut activities, def).map(|_| ())
            }
        }
    }

    /// Registered aliases in start order
    #[must_use]
    pub fn aliases(&self) -> Vec<String> {
        self.activities.lock().keys().cloned().collect()
    }

    /// Definition of a registered activity
    #[must_use]
    pub fn activity_def(&self, alias: &str) -> Option<ActivityDef> {
        self.activities.lock().get(alias).map(|e| e.def().clone())
    }

    /// Executor of a registered activity
    ///
    /// # Errors
    /// Returns [`ControlError::UnknownAlias`] for an unknown alias.
    pub fn executor(&self, alias: &str) -> Result<Arc<ActivityExecutor>, ControlError> {
        self.activities
            .lock()
            .get(alias)
            .cloned()
            .ok_or_else(|| ControlError::UnknownAlias {
                alias: alias.to_string(),
            })
    }

    /// Whether `alias` has active workers
    #[must_use]
    pub fn is_running(&self, alias: &str) -> bool {
        self.activities
            .lock()
            .get(alias)
            .is_some_and(|e| e.state().is_active())
    }

    /// Lifecycle state of every activity
    #[must_use]
    pub fn states(&self) -> Vec<(String, RunState)> {
        self.activities
            .lock()
            .iter()
            .map(|(alias, e)| (alias.clone(), e.state()))
            .collect()
    }

    /// Metrics summary of every activity
    #[must_use]
    pub fn summaries(&self) -> Vec<MetricsSummary> {
        self.activities
            .lock()
            .values()
            .map(|e| e.metrics().summary())
            .collect()
    }

    /// Stop every activity and drop the registry
    pub fn shutdown(&self) {
        let mut activities = self.activities.lock();
        for executor in activities.values() {
            if !executor.stop() {
                executor.force_stop(self.config.force_stop_grace());
            }
        }
        tracing::info!(session = %self.session, activities = activities.len(), "scenario shut down");
        activities.clear();
    }
}

impl std::fmt::Debug for ScenarioController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScenarioController")
            .field("session", &self.session)
            .field("aliases", &self.aliases())
            .finish_non_exhaustive()
    }
}

impl Drop for ScenarioController {
    fn drop(&mut self) {
        for executor in self.activities.get_mut().values() {
            executor.stop();
        }
    }
}

/// Accept names read by the engine, the activity's driver, or already set
fn check_known(executor: &ActivityExecutor, name: &str) -> Result<(), ParamError> {
    let driver_params = executor.activity().driver().config_names();
    let params = executor.def().params();
    if CORE_PARAMS.iter().chain(driver_params).any(|known| *known == name) || params.contains(name) {
        return Ok(());
    }
    let mut known: Vec<String> = CORE_PARAMS
        .iter()
        .chain(driver_params)
        .map(|n| (*n).to_string())
        .chain(params.keys())
        .collect();
    known.sort();
    known.dedup();
    Err(ParamError::unknown(name, &known))
}

fn validate_param(name: &str, value: &str) -> Result<(), ParamError> {
    let candidate = ActivityDef::from_map(ParameterMap::from_pairs([(name, value)]));
    match name {
        "threads" => candidate.threads().map(|_| ()),
        "cycles" => value.parse::<CycleRange>().map(|_| ()),
        "cyclerate" => candidate.cyclerate().map(|_| ()),
        "errors" => candidate.error_policy().map(|_| ()),
        "maxtries" => candidate.max_tries().map(|_| ()),
        "stride" => candidate.stride().map(|_| ()),
        _ => Ok(()),
    }
}

fn is_plain_alias(element: &str) -> bool {
    element
        .chars()
        .all(|c| c.is_alphanumeric() || matches!(c, '_' | '-' | '.'))
}

fn match_aliases<'a>(
    aliases: impl Iterator<Item = &'a String> + Clone,
    pattern: &str,
) -> Result<Vec<String>, ControlError> {
    let mut matched: Vec<String> = Vec::new();
    for element in pattern.split([',', ';', ' ']).filter(|e| !e.is_empty()) {
        if is_plain_alias(element) {
            if aliases.clone().any(|a| a == element) {
                if !matched.iter().any(|m| m == element) {
                    matched.push(element.to_string());
                }
            } else {
                return Err(ControlError::UnknownAlias {
                    alias: element.to_string(),
                });
            }
            continue;
        }
        let regex = Regex::new(&format!("^(?:{element})$")).map_err(|e| ControlError::InvalidPattern {
            pattern: element.to_string(),
            message: e.to_string(),
        })?;
        for alias in aliases.clone().filter(|a| regex.is_match(a)) {
            if !matched.contains(alias) {
                matched.push(alias.clone());
            }
        }
    }
    if matched.is_empty() {
        return Err(ControlError::NoMatch {
            pattern: pattern.to_string(),
        });
    }
    Ok(matched)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn alias_patterns() {
        let aliases = names(&["read", "write", "read2", "a.b"]);
        assert_eq!(match_aliases(aliases.iter(), "read").unwrap(), names(&["read"]));
        assert_eq!(match_aliases(aliases.iter(), "read.*").unwrap(), names(&["read", "read2"]));
        assert_eq!(match_aliases(aliases.iter(), "write, read2;read2").unwrap(), names(&["write", "read2"]));
        assert_eq!(match_aliases(aliases.iter(), "a.b").unwrap(), names(&["a.b"]));
        assert!(matches!(match_aliases(aliases.iter(), "nope"), Err(ControlError::UnknownAlias { .. })));
        assert!(matches!(match_aliases(aliases.iter(), "x.*"), Err(ControlError::NoMatch { .. })));
        assert!(matches!(match_aliases(aliases.iter(), "(read"), Err(ControlError::InvalidPattern { .. })));
        assert!(matches!(match_aliases(aliases.iter(), " , "), Err(ControlError::NoMatch { .. })));
    }

    #[test]
    fn param_validation() {
        assert!(validate_param("threads", "4").is_ok());
        assert!(validate_param("threads", "none").is_err());
        assert!(validate_param("cycles", "1..0").is_err());
        assert!(validate_param("errors", "stop").is_ok());
        assert!(validate_param("anything", "goes").is_ok());
    }
}

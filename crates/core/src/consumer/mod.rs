//! Consumer-side shared state: the points received from remote producers,
//! the producers themselves, and which systems and module types are of
//! interest.

use std::{
    collections::BTreeSet,
    sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard},
};

use uuid::Uuid;

use crate::{
    component::{
        ComponentDiagnostics, ComponentLogging, ConsumerComponent, ConsumerComponentDelegate,
        StartParams,
    },
    config::TesterConfig,
    log::{Log, LogCategory},
    model::{is_valid_system_number, upsert_status, ConsumerPoint, ModuleIdentifier, ProducerStatus},
    notify::Notifier,
    ComponentError, Result, ValidationError,
};

/// View-side receiver of consumer model changes, called on the model's
/// notifier thread. `None` means "reload everything".
pub trait ConsumerModelDelegate: Send + Sync {
    fn state_changed(&self) {}
    fn producers_changed(&self, _index: Option<usize>) {}
    fn points_changed(&self, _index: Option<usize>) {}
    fn system_numbers_changed(&self) {}
}

struct ConsumerState {
    cid: Uuid,
    name: String,
    interface: Option<String>,
    started: bool,
    logging: ComponentLogging,
    points: Vec<ConsumerPoint>,
    producers: Vec<ProducerStatus>,
    observed_system_numbers: BTreeSet<u8>,
    discovered_system_numbers: BTreeSet<u8>,
    module_types: Vec<ModuleIdentifier>,
}

pub struct ConsumerModel {
    state: RwLock<ConsumerState>,
    component: Arc<dyn ConsumerComponent>,
    log: Log,
    notifier: Notifier,
    delegate: RwLock<Option<Arc<dyn ConsumerModelDelegate>>>,
}

impl ConsumerModel {
    pub fn new(
        component: Arc<dyn ConsumerComponent>,
        config: &TesterConfig,
        log: Log,
    ) -> Result<Arc<Self>> {
        Ok(Arc::new(Self {
            state: RwLock::new(ConsumerState {
                cid: Uuid::new_v4(),
                name: config.consumer.name.clone(),
                interface: None,
                started: false,
                logging: ComponentLogging::default(),
                points: Vec::new(),
                producers: Vec::new(),
                observed_system_numbers: BTreeSet::new(),
                discovered_system_numbers: BTreeSet::new(),
                module_types: Vec::new(),
            }),
            component,
            log,
            notifier: Notifier::new("consumer")?,
            delegate: RwLock::new(None),
        }))
    }

    pub fn set_delegate(&self, delegate: Option<Arc<dyn ConsumerModelDelegate>>) {
        *self.delegate.write().unwrap_or_else(|e| e.into_inner()) = delegate;
    }

    pub fn log(&self) -> &Log {
        &self.log
    }

    pub fn start(&self) {
        let mut state = self.write();
        if state.started {
            return;
        }
        let Some(interface) = state.interface.clone() else {
            self.log.add(
                LogCategory::Warning,
                "Select a network interface before starting the consumer",
            );
            return;
        };

        let params = StartParams {
            cid: state.cid,
            name: state.name.clone(),
            interface,
        };
        if let Err(error) = self.component.start(&params) {
            self.log_error("Failed to start consumer", &error);
            return;
        }
        // A fresh component knows nothing of what was selected before.
        if !state.module_types.is_empty() {
            self.component.add_module_types(&state.module_types);
        }
        if !state.observed_system_numbers.is_empty() {
            self.component
                .observe_system_numbers(&state.observed_system_numbers);
        }
        state.started = true;
        drop(state);

        self.log.add(
            LogCategory::Info,
            format!("Consumer {} started on {}", params.cid, params.interface),
        );
        self.notify(|delegate| delegate.state_changed());
    }

    pub fn stop(&self) {
        let mut state = self.write();
        if !state.started {
            return;
        }
        self.component.stop();
        state.started = false;
        drop(state);

        self.log.add(LogCategory::Info, "Consumer stopped");
        self.notify(|delegate| delegate.state_changed());
    }

    /// Stops and forgets every point, producer, system number and module
    /// type, taking a new component identifier. The interface is kept.
    pub fn reset(&self) {
        let mut state = self.write();
        if state.started {
            self.component.stop();
            state.started = false;
        }
        state.points.clear();
        state.producers.clear();
        state.observed_system_numbers.clear();
        state.discovered_system_numbers.clear();
        state.module_types.clear();
        state.cid = Uuid::new_v4();
        let cid = state.cid;
        drop(state);

        self.log
            .add(LogCategory::Info, format!("Consumer reset, new identifier {cid}"));
        self.notify(|delegate| {
            delegate.state_changed();
            delegate.points_changed(None);
            delegate.producers_changed(None);
            delegate.system_numbers_changed();
        });
    }

    pub fn set_interface(&self, interface: Option<String>) {
        if self.read().interface == interface {
            return;
        }
        let was_started = self.is_started();
        if was_started {
            self.stop();
        }
        self.write().interface = interface.clone();
        self.log.add(
            LogCategory::Info,
            format!(
                "Consumer interface set to {}",
                interface.as_deref().unwrap_or("none")
            ),
        );
        if was_started {
            self.start();
        }
        self.notify(|delegate| delegate.state_changed());
    }

    pub fn set_name(&self, name: impl Into<String>) {
        let name = name.into();
        let mut state = self.write();
        self.component.update_name(&name);
        state.name = name;
        drop(state);
        self.notify(|delegate| delegate.state_changed());
    }

    pub fn set_component_logging(&self, logging: ComponentLogging) {
        let mut state = self.write();
        self.component.set_logging(logging);
        state.logging = logging;
    }

    /// Replaces the set of observed systems. Rejected as a whole when any
    /// number is out of range.
    pub fn observe_system_numbers(&self, system_numbers: BTreeSet<u8>) {
        if let Some(&invalid) = system_numbers
            .iter()
            .find(|&&system| !is_valid_system_number(system))
        {
            self.log_error(
                "Failed to observe system numbers",
                &ValidationError::InvalidSystemNumber(invalid).into(),
            );
            return;
        }

        let mut state = self.write();
        self.component.observe_system_numbers(&system_numbers);
        state.observed_system_numbers = system_numbers;
        let observed = format_systems(&state.observed_system_numbers);
        drop(state);

        self.log
            .add(LogCategory::Info, format!("Observing systems {observed}"));
        self.notify(|delegate| delegate.system_numbers_changed());
    }

    /// Requests additional module types. Base modules do not pull in their
    /// velocity/acceleration companions.
    pub fn add_module_types(&self, identifiers: &[ModuleIdentifier]) {
        let mut state = self.write();
        let mut added: Vec<ModuleIdentifier> = Vec::new();
        for identifier in identifiers {
            if !state.module_types.contains(identifier) && !added.contains(identifier) {
                added.push(*identifier);
            }
        }
        if added.is_empty() {
            return;
        }
        self.component.add_module_types(&added);
        state.module_types.extend(added.iter().copied());
        state.module_types.sort();
        drop(state);

        self.log
            .add(LogCategory::Info, format!("Requested {}", format_modules(&added)));
        self.notify(|delegate| delegate.state_changed());
    }

    /// Drops module types. Dropping a base module also drops its companion.
    pub fn remove_module_types(&self, identifiers: &[ModuleIdentifier]) {
        let mut state = self.write();
        let mut removed: Vec<ModuleIdentifier> = Vec::new();
        for identifier in identifiers {
            for target in std::iter::once(*identifier).chain(identifier.dependent()) {
                if state.module_types.contains(&target) && !removed.contains(&target) {
                    removed.push(target);
                }
            }
        }
        if removed.is_empty() {
            return;
        }
        self.component.remove_module_types(&removed);
        state.module_types.retain(|identifier| !removed.contains(identifier));
        drop(state);

        self.log.add(
            LogCategory::Info,
            format!("Stopped requesting {}", format_modules(&removed)),
        );
        self.notify(|delegate| delegate.state_changed());
    }

    pub fn request_producer_point_names(&self) {
        let state = self.write();
        if !state.started {
            self.log.add(
                LogCategory::Warning,
                "Start the consumer before requesting point names",
            );
            return;
        }
        self.component.request_producer_point_names();
        drop(state);
        self.log
            .add(LogCategory::Info, "Requested point names from producers");
    }

    // ---- snapshots ----

    pub fn points(&self) -> Vec<ConsumerPoint> {
        self.read().points.clone()
    }

    pub fn producers(&self) -> Vec<ProducerStatus> {
        self.read().producers.clone()
    }

    pub fn observed_system_numbers(&self) -> BTreeSet<u8> {
        self.read().observed_system_numbers.clone()
    }

    pub fn discovered_system_numbers(&self) -> BTreeSet<u8> {
        self.read().discovered_system_numbers.clone()
    }

    pub fn module_types(&self) -> Vec<ModuleIdentifier> {
        self.read().module_types.clone()
    }

    pub fn is_started(&self) -> bool {
        self.read().started
    }

    pub fn interface(&self) -> Option<String> {
        self.read().interface.clone()
    }

    pub fn name(&self) -> String {
        self.read().name.clone()
    }

    pub fn cid(&self) -> Uuid {
        self.read().cid
    }

    pub fn component_logging(&self) -> ComponentLogging {
        self.read().logging
    }

    pub fn flush_notifications(&self) {
        self.notifier.flush();
    }

    fn read(&self) -> RwLockReadGuard<'_, ConsumerState> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, ConsumerState> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }

    fn log_error(&self, context: &str, error: &ComponentError) {
        self.log
            .add(error.log_category(), format!("{context}: {error}"));
    }

    fn notify(&self, f: impl FnOnce(&dyn ConsumerModelDelegate) + Send + 'static) {
        let delegate = self
            .delegate
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        if let Some(delegate) = delegate {
            self.notifier.post(move || f(delegate.as_ref()));
        }
    }
}

/// Merges `incoming` into `points` by identity, later entries replacing
/// earlier ones, and restores identity order.
fn merge_points(points: &mut Vec<ConsumerPoint>, incoming: Vec<ConsumerPoint>) {
    for point in incoming {
        match points.iter_mut().find(|p| p.identity() == point.identity()) {
            Some(existing) => *existing = point,
            None => points.push(point),
        }
    }
    points.sort_by_key(ConsumerPoint::identity);
}

fn format_systems(systems: &BTreeSet<u8>) -> String {
    if systems.is_empty() {
        return "none".to_string();
    }
    systems
        .iter()
        .map(u8::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

fn format_modules(identifiers: &[ModuleIdentifier]) -> String {
    identifiers
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

impl ComponentDiagnostics for ConsumerModel {
    fn diagnostics_log(&self) -> &Log {
        &self.log
    }
}

impl ConsumerComponentDelegate for ConsumerModel {
    fn replace_all_points(&self, points: Vec<ConsumerPoint>) {
        let mut state = self.write();
        state.points.clear();
        merge_points(&mut state.points, points);
        drop(state);
        self.notify(|delegate| delegate.points_changed(None));
    }

    fn points_changed(&self, points: Vec<ConsumerPoint>) {
        let single = match points.as_slice() {
            [point] => Some(point.identity()),
            _ => None,
        };
        let mut state = self.write();
        let before = state.points.len();
        merge_points(&mut state.points, points);
        // A single replaced point can be redrawn on its own.
        let index = single
            .filter(|_| state.points.len() == before)
            .and_then(|identity| state.points.iter().position(|p| p.identity() == identity));
        drop(state);
        self.notify(move |delegate| delegate.points_changed(index));
    }

    fn producer_status_changed(&self, status: ProducerStatus) {
        let index = upsert_status(&mut self.write().producers, status);
        self.notify(move |delegate| delegate.producers_changed(index));
    }

    fn discovered_system_numbers(&self, system_numbers: BTreeSet<u8>) {
        self.write().discovered_system_numbers = system_numbers;
        self.notify(|delegate| delegate.system_numbers_changed());
    }
}

impl Drop for ConsumerModel {
    fn drop(&mut self) {
        let started = self
            .state
            .get_mut()
            .map(|state| state.started)
            .unwrap_or_else(|e| e.into_inner().started);
        if started {
            self.component.stop();
        }
    }
}

impl std::fmt::Debug for ConsumerModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.read();
        f.debug_struct("ConsumerModel")
            .field("cid", &state.cid)
            .field("started", &state.started)
            .field("points", &state.points.len())
            .field("producers", &state.producers.len())
            .finish()
    }
}

//! Producer-side shared state: the points this tester transmits, the
//! consumers it has heard from, and the fades animating those points.
//!
//! Mutations hold the write side of the state lock for the local change and
//! the matching component call, so readers never see the two disagree.
//! Snapshots hold the read side.

use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};

use tracing::debug;
use uuid::Uuid;

use crate::{
    component::{
        ComponentDiagnostics, ComponentLogging, ProducerComponent, ProducerComponentDelegate,
        StartParams,
    },
    config::{FadeConfig, TesterConfig},
    fade::{Fade, FadeEngine, FadeEngineDelegate, FadePattern},
    log::{Log, LogCategory},
    model::{
        upsert_status, validate_priority, Address, ConsumerStatus, Module, ModuleIdentifier,
        Point, Priority,
    },
    notify::Notifier,
    ComponentError, Result, ValidationError,
};

/// View-side receiver of producer model changes, called on the model's
/// notifier thread. `None` means "reload everything".
pub trait ProducerModelDelegate: Send + Sync {
    fn state_changed(&self) {}
    fn consumers_changed(&self, _index: Option<usize>) {}
    fn points_changed(&self, _index: Option<usize>) {}
}

/// Descriptor of a fade the engine is running for a point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActiveFade {
    pub address: Address,
    pub priority: Priority,
    pub pattern: FadePattern,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UpdateOrigin {
    User,
    Fade,
}

struct ProducerState {
    cid: Uuid,
    name: String,
    interface: Option<String>,
    started: bool,
    logging: ComponentLogging,
    points: Vec<Point>,
    consumers: Vec<ConsumerStatus>,
    fades: Vec<ActiveFade>,
}

impl ProducerState {
    fn point_index(&self, address: Address, priority: Priority) -> Option<usize> {
        self.points
            .iter()
            .position(|point| point.key() == (address, priority))
    }
}

pub struct ProducerModel {
    state: RwLock<ProducerState>,
    component: Arc<dyn ProducerComponent>,
    engine: FadeEngine,
    fade_config: FadeConfig,
    /// Serialises fade bookkeeping so a key never ends up with two fades.
    fade_control: Mutex<()>,
    log: Log,
    notifier: Notifier,
    delegate: RwLock<Option<Arc<dyn ProducerModelDelegate>>>,
}

impl ProducerModel {
    pub fn new(
        component: Arc<dyn ProducerComponent>,
        config: &TesterConfig,
        log: Log,
    ) -> Result<Arc<Self>> {
        let engine = FadeEngine::new(config.fade.tick_interval())?;
        let model = Arc::new(Self {
            state: RwLock::new(ProducerState {
                cid: Uuid::new_v4(),
                name: config.producer.name.clone(),
                interface: None,
                started: false,
                logging: ComponentLogging::default(),
                points: Vec::new(),
                consumers: Vec::new(),
                fades: Vec::new(),
            }),
            component,
            engine,
            fade_config: config.fade.clone(),
            fade_control: Mutex::new(()),
            log,
            notifier: Notifier::new("producer")?,
            delegate: RwLock::new(None),
        });

        let weak = Arc::downgrade(&model);
        let delegate: Weak<dyn FadeEngineDelegate> = weak;
        model.engine.set_delegate(delegate);
        Ok(model)
    }

    pub fn set_delegate(&self, delegate: Option<Arc<dyn ProducerModelDelegate>>) {
        *self.delegate.write().unwrap_or_else(|e| e.into_inner()) = delegate;
    }

    pub fn log(&self) -> &Log {
        &self.log
    }

    // ---- lifecycle ----

    pub fn start(&self) {
        let mut state = self.write();
        if state.started {
            return;
        }
        let Some(interface) = state.interface.clone() else {
            self.log.add(
                LogCategory::Warning,
                "Select a network interface before starting the producer",
            );
            return;
        };

        let params = StartParams {
            cid: state.cid,
            name: state.name.clone(),
            interface,
        };
        if let Err(error) = self.component.start(&params) {
            self.log_error("Failed to start producer", &error);
            return;
        }
        state.started = true;
        // Started under the lock so a concurrent stop cannot be overtaken.
        self.engine.start();
        drop(state);

        self.log.add(
            LogCategory::Info,
            format!("Producer {} started on {}", params.cid, params.interface),
        );
        self.notify(|delegate| delegate.state_changed());
    }

    /// Stops transmission. The fade engine is halted before this returns, so
    /// no fade-driven update reaches the component afterwards.
    pub fn stop(&self) {
        // Outside the lock: a tick in flight may be waiting for it.
        self.engine.stop();

        let mut state = self.write();
        if !state.started {
            return;
        }
        self.component.stop();
        state.started = false;
        drop(state);
        // A start that held the lock while we waited has restarted the engine.
        self.engine.stop();

        self.log.add(LogCategory::Info, "Producer stopped");
        self.notify(|delegate| delegate.state_changed());
    }

    /// Stops, discards every point, consumer and fade, and takes a new
    /// component identifier. Safe to call on a model that never started.
    pub fn reset(&self) {
        let _fades = self.fade_control.lock().unwrap_or_else(|e| e.into_inner());
        self.engine.reset();

        let mut state = self.write();
        let was_started = state.started;
        if was_started {
            self.component.stop();
            state.started = false;
        }
        state.points.clear();
        state.consumers.clear();
        state.fades.clear();
        state.cid = Uuid::new_v4();
        let cid = state.cid;
        drop(state);
        if was_started {
            self.engine.stop();
        }

        self.log
            .add(LogCategory::Info, format!("Producer reset, new identifier {cid}"));
        self.notify(|delegate| {
            delegate.state_changed();
            delegate.points_changed(None);
            delegate.consumers_changed(None);
        });
    }

    /// Selects the network interface, restarting the component on it when
    /// the model is running.
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
                "Producer interface set to {}",
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

    // ---- points ----

    /// Adds a point. Returns false, leaving the model untouched, when the
    /// address or priority is invalid, the pair already exists, or the
    /// component rejects it.
    pub fn add_point(&self, address: Address, priority: Priority, name: impl Into<String>) -> bool {
        let name = name.into();
        let mut state = self.write();

        let validation = address
            .validate()
            .and_then(|()| validate_priority(priority))
            .and_then(|()| match state.point_index(address, priority) {
                Some(_) => Err(ValidationError::PointExists { address, priority }),
                None => Ok(()),
            });
        if let Err(error) = validation {
            self.log_error("Failed to add point", &error.into());
            return false;
        }
        if let Err(error) = self.component.add_point(address, priority, &name) {
            self.log_error("Failed to add point", &error);
            return false;
        }

        state.points.push(Point::new(address, priority, name.clone()));
        // The name belongs to the address; every priority row shows it.
        for point in state.points.iter_mut().filter(|p| p.address == address) {
            point.name.clone_from(&name);
        }
        state.points.sort_by_key(Point::key);
        drop(state);

        self.log.add(
            LogCategory::Info,
            format!("Added point {address} priority {priority} \"{name}\""),
        );
        self.notify(|delegate| delegate.points_changed(None));
        true
    }

    /// Removes a point, cancelling its fade before the component forgets it.
    pub fn remove_point(&self, address: Address, priority: Priority) {
        self.cancel_fade(address, priority);

        let mut state = self.write();
        if state.point_index(address, priority).is_none() {
            self.log_error(
                "Failed to remove point",
                &ValidationError::PointNotFound { address, priority }.into(),
            );
            return;
        }
        if let Err(error) = self.component.remove_points(address, priority) {
            self.log_error("Failed to remove point", &error);
            return;
        }
        state.points.retain(|point| point.key() != (address, priority));
        drop(state);

        self.log.add(
            LogCategory::Info,
            format!("Removed point {address} priority {priority}"),
        );
        self.notify(|delegate| delegate.points_changed(None));
    }

    /// Renames every point at `address`, whatever its priority.
    pub fn rename_point(&self, address: Address, name: impl Into<String>) {
        let name = name.into();
        let mut state = self.write();
        if !state.points.iter().any(|point| point.address == address) {
            self.log_error(
                "Failed to rename point",
                &ValidationError::AddressNotFound(address).into(),
            );
            return;
        }
        if let Err(error) = self.component.rename_points(address, &name) {
            self.log_error("Failed to rename point", &error);
            return;
        }
        for point in state.points.iter_mut().filter(|p| p.address == address) {
            point.name.clone_from(&name);
        }
        drop(state);

        self.log
            .add(LogCategory::Info, format!("Renamed {address} to \"{name}\""));
        self.notify(|delegate| delegate.points_changed(None));
    }

    // ---- modules ----

    /// Adds a single module. Velocity/acceleration modules need their base
    /// module to be present already.
    pub fn add_module(&self, module: Module, address: Address, priority: Priority) {
        let identifier = module.identifier();
        let mut state = self.write();
        let Some(index) = state.point_index(address, priority) else {
            self.log_error(
                "Failed to add module",
                &ValidationError::PointNotFound { address, priority }.into(),
            );
            return;
        };

        let point = &state.points[index];
        let validation = if point.has_module(identifier) {
            Err(ValidationError::ModuleExists {
                identifier,
                address,
                priority,
            })
        } else {
            match identifier.base() {
                Some(base) if !point.has_module(base) => Err(ValidationError::MissingBaseModule {
                    identifier,
                    base,
                    address,
                    priority,
                }),
                _ => Ok(()),
            }
        };
        if let Err(error) = validation {
            self.log_error("Failed to add module", &error.into());
            return;
        }
        if let Err(error) = self.component.add_module(&module, address, priority) {
            self.log_error("Failed to add module", &error);
            return;
        }
        state.points[index].modules.push(module);
        drop(state);

        self.log.add(
            LogCategory::Info,
            format!("Added {identifier} module to {address} priority {priority}"),
        );
        self.notify(move |delegate| delegate.points_changed(Some(index)));
    }

    /// Removes a module. Removing a base module also removes its
    /// velocity/acceleration module, which goes first. Nothing changes unless
    /// the component accepts both removals; a companion already removed is
    /// added back when the base removal fails.
    pub fn remove_module(&self, identifier: ModuleIdentifier, address: Address, priority: Priority) {
        let mut state = self.write();
        let Some(index) = state.point_index(address, priority) else {
            self.log_error(
                "Failed to remove module",
                &ValidationError::PointNotFound { address, priority }.into(),
            );
            return;
        };
        if !state.points[index].has_module(identifier) {
            self.log_error(
                "Failed to remove module",
                &ValidationError::ModuleNotFound {
                    identifier,
                    address,
                    priority,
                }
                .into(),
            );
            return;
        }

        let companion = identifier
            .dependent()
            .and_then(|dependent| state.points[index].module(dependent).copied());
        if let Some(companion) = &companion {
            if let Err(error) =
                self.component
                    .remove_module(companion.identifier(), address, priority)
            {
                self.log_error("Failed to remove module", &error);
                return;
            }
        }
        if let Err(error) = self.component.remove_module(identifier, address, priority) {
            self.log_error("Failed to remove module", &error);
            if let Some(companion) = &companion {
                if let Err(error) = self.component.add_module(companion, address, priority) {
                    self.log_error("Failed to restore module", &error);
                }
            }
            return;
        }

        for target in companion
            .map(|module| module.identifier())
            .into_iter()
            .chain(std::iter::once(identifier))
        {
            state.points[index].remove_module(target);
            self.log.add(
                LogCategory::Info,
                format!("Removed {target} module from {address} priority {priority}"),
            );
        }
        drop(state);

        self.notify(move |delegate| delegate.points_changed(Some(index)));
    }

    pub fn update_module(&self, module: Module, address: Address, priority: Priority) {
        let mut state = self.write();
        let updated =
            self.update_module_locked(&mut state, module, address, priority, UpdateOrigin::User);
        drop(state);

        if let Some(index) = updated {
            self.notify(move |delegate| delegate.points_changed(Some(index)));
        }
    }

    /// Shared by view edits and fade ticks. Fade updates are silent and leave
    /// the stored values alone, so stopping the fade can restore them.
    fn update_module_locked(
        &self,
        state: &mut ProducerState,
        module: Module,
        address: Address,
        priority: Priority,
        origin: UpdateOrigin,
    ) -> Option<usize> {
        let identifier = module.identifier();
        let user = origin == UpdateOrigin::User;

        let Some(index) = state.point_index(address, priority) else {
            if user {
                self.log_error(
                    "Failed to update module",
                    &ValidationError::PointNotFound { address, priority }.into(),
                );
            }
            return None;
        };
        if !state.points[index].has_module(identifier) {
            if user {
                self.log_error(
                    "Failed to update module",
                    &ValidationError::ModuleNotFound {
                        identifier,
                        address,
                        priority,
                    }
                    .into(),
                );
            }
            return None;
        }

        if let Err(error) = self.component.update_module(&module, address, priority) {
            if user {
                self.log_error("Failed to update module", &error);
            } else {
                debug!(%address, priority, %error, "fade update rejected");
            }
            return None;
        }
        if user {
            state.points[index].replace_module(module);
        }
        Some(index)
    }

    // ---- fades ----

    /// Starts animating a point, replacing any fade already running on it.
    pub fn start_fade(&self, address: Address, priority: Priority, pattern: FadePattern) {
        let _fades = self.fade_control.lock().unwrap_or_else(|e| e.into_inner());
        if self.read().point_index(address, priority).is_none() {
            self.log_error(
                "Failed to start fade",
                &ValidationError::PointNotFound { address, priority }.into(),
            );
            return;
        }

        self.engine.remove_fade(address, priority);
        self.engine.add_fade(Fade::with_config(
            address,
            priority,
            pattern,
            &self.fade_config,
        ));

        let mut state = self.write();
        state
            .fades
            .retain(|fade| (fade.address, fade.priority) != (address, priority));
        state.fades.push(ActiveFade {
            address,
            priority,
            pattern,
        });
        drop(state);

        self.log.add(
            LogCategory::Info,
            format!("Started {pattern} fade on {address} priority {priority}"),
        );
    }

    /// Stops a point's fade and sends its stored module values again.
    pub fn stop_fade(&self, address: Address, priority: Priority) {
        let Some(fade) = self.cancel_fade(address, priority) else {
            return;
        };

        let state = self.write();
        if let Some(index) = state.point_index(address, priority) {
            let base = fade.pattern.module_identifier();
            let point = &state.points[index];
            for identifier in std::iter::once(base).chain(base.dependent()) {
                let Some(module) = point.module(identifier) else {
                    continue;
                };
                if let Err(error) = self.component.update_module(module, address, priority) {
                    self.log_error("Failed to restore module", &error);
                }
            }
        }
        drop(state);

        self.log.add(
            LogCategory::Info,
            format!("Stopped fade on {address} priority {priority}"),
        );
    }

    /// Removes the fade for a key from the engine and the descriptor list.
    fn cancel_fade(&self, address: Address, priority: Priority) -> Option<ActiveFade> {
        let _fades = self.fade_control.lock().unwrap_or_else(|e| e.into_inner());
        self.engine.remove_fade(address, priority);

        let mut state = self.write();
        let index = state
            .fades
            .iter()
            .position(|fade| (fade.address, fade.priority) == (address, priority))?;
        Some(state.fades.remove(index))
    }

    pub fn active_fades(&self) -> Vec<ActiveFade> {
        self.read().fades.clone()
    }

    pub fn fade_engine(&self) -> &FadeEngine {
        &self.engine
    }

    // ---- snapshots ----

    pub fn points(&self) -> Vec<Point> {
        self.read().points.clone()
    }

    pub fn consumers(&self) -> Vec<ConsumerStatus> {
        self.read().consumers.clone()
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

    /// Waits until queued view notifications have been delivered.
    pub fn flush_notifications(&self) {
        self.notifier.flush();
    }

    // ---- helpers ----

    fn read(&self) -> RwLockReadGuard<'_, ProducerState> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, ProducerState> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }

    fn log_error(&self, context: &str, error: &ComponentError) {
        self.log
            .add(error.log_category(), format!("{context}: {error}"));
    }

    fn notify(&self, f: impl FnOnce(&dyn ProducerModelDelegate) + Send + 'static) {
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

impl FadeEngineDelegate for ProducerModel {
    fn fades_did_update(&self, fades: &[Fade]) {
        let mut state = self.write();
        if !state.started {
            return;
        }
        for fade in fades {
            let (base, companion) = fade.module_values();
            for module in [base, companion] {
                self.update_module_locked(
                    &mut state,
                    module,
                    fade.address(),
                    fade.priority(),
                    UpdateOrigin::Fade,
                );
            }
        }
    }
}

impl ComponentDiagnostics for ProducerModel {
    fn diagnostics_log(&self) -> &Log {
        &self.log
    }
}

impl ProducerComponentDelegate for ProducerModel {
    fn consumer_status_changed(&self, status: ConsumerStatus) {
        let index = upsert_status(&mut self.write().consumers, status);
        self.notify(move |delegate| delegate.consumers_changed(index));
    }
}

impl Drop for ProducerModel {
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

impl std::fmt::Debug for ProducerModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.read();
        f.debug_struct("ProducerModel")
            .field("cid", &state.cid)
            .field("started", &state.started)
            .field("points", &state.points.len())
            .field("consumers", &state.consumers.len())
            .field("fades", &state.fades.len())
            .finish()
    }
}

#[cfg(test)]
mod tests;

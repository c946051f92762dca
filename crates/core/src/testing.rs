//! Recording doubles for the protocol component and view delegates.

use std::{
    collections::BTreeSet,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    thread,
    time::Duration,
};

use crate::{
    component::{
        ComponentLogging, ComponentResult, ConsumerComponent, ProducerComponent, StartParams,
    },
    config::{LogConfig, TesterConfig},
    consumer::ConsumerModelDelegate,
    log::{Log, LogCategory},
    model::{Address, Module, ModuleIdentifier, Priority},
    producer::ProducerModelDelegate,
    ComponentError,
};

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Call {
    Start(String),
    Stop,
    UpdateName(String),
    SetLogging(ComponentLogging),
    AddPoint(Address, Priority, String),
    RemovePoints(Address, Priority),
    RenamePoints(Address, String),
    AddModule(Module, Address, Priority),
    RemoveModule(ModuleIdentifier, Address, Priority),
    UpdateModule(Module, Address, Priority),
    AddModuleTypes(Vec<ModuleIdentifier>),
    RemoveModuleTypes(Vec<ModuleIdentifier>),
    ObserveSystemNumbers(BTreeSet<u8>),
    RequestPointNames,
}

/// Records every call and fails the next fallible call, or one particular
/// call, on request.
#[derive(Default)]
pub(crate) struct MockComponent {
    calls: Mutex<Vec<Call>>,
    fail_next: Mutex<Option<ComponentError>>,
    fail_call: Mutex<Option<(Call, ComponentError)>>,
    start_delay: Mutex<Duration>,
    module_updates: AtomicUsize,
}

impl MockComponent {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn fail_next(&self, error: ComponentError) {
        *self.fail_next.lock().unwrap() = Some(error);
    }

    /// Fails the first call equal to `call`; every other call succeeds.
    pub(crate) fn fail_call(&self, call: Call, error: ComponentError) {
        *self.fail_call.lock().unwrap() = Some((call, error));
    }

    /// Makes `start` block for `delay` before it succeeds.
    pub(crate) fn delay_start(&self, delay: Duration) {
        *self.start_delay.lock().unwrap() = delay;
    }

    pub(crate) fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub(crate) fn module_updates(&self) -> usize {
        self.module_updates.load(Ordering::SeqCst)
    }

    fn record(&self, call: Call) -> ComponentResult {
        if matches!(call, Call::UpdateModule(..)) {
            self.module_updates.fetch_add(1, Ordering::SeqCst);
        }
        if let Some(error) = self.fail_next.lock().unwrap().take() {
            return Err(error);
        }
        {
            let mut fail_call = self.fail_call.lock().unwrap();
            if fail_call.as_ref().is_some_and(|(target, _)| *target == call) {
                if let Some((_, error)) = fail_call.take() {
                    return Err(error);
                }
            }
        }
        self.calls.lock().unwrap().push(call);
        Ok(())
    }

    fn record_infallible(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }
}

impl ProducerComponent for MockComponent {
    fn start(&self, params: &StartParams) -> ComponentResult {
        let delay = *self.start_delay.lock().unwrap();
        if !delay.is_zero() {
            thread::sleep(delay);
        }
        self.record(Call::Start(params.interface.clone()))
    }

    fn stop(&self) {
        self.record_infallible(Call::Stop);
    }

    fn update_name(&self, name: &str) {
        self.record_infallible(Call::UpdateName(name.to_string()));
    }

    fn set_logging(&self, logging: ComponentLogging) {
        self.record_infallible(Call::SetLogging(logging));
    }

    fn add_point(&self, address: Address, priority: Priority, name: &str) -> ComponentResult {
        self.record(Call::AddPoint(address, priority, name.to_string()))
    }

    fn remove_points(&self, address: Address, priority: Priority) -> ComponentResult {
        self.record(Call::RemovePoints(address, priority))
    }

    fn rename_points(&self, address: Address, name: &str) -> ComponentResult {
        self.record(Call::RenamePoints(address, name.to_string()))
    }

    fn add_module(&self, module: &Module, address: Address, priority: Priority) -> ComponentResult {
        self.record(Call::AddModule(*module, address, priority))
    }

    fn remove_module(
        &self,
        identifier: ModuleIdentifier,
        address: Address,
        priority: Priority,
    ) -> ComponentResult {
        self.record(Call::RemoveModule(identifier, address, priority))
    }

    fn update_module(
        &self,
        module: &Module,
        address: Address,
        priority: Priority,
    ) -> ComponentResult {
        self.record(Call::UpdateModule(*module, address, priority))
    }
}

impl ConsumerComponent for MockComponent {
    fn start(&self, params: &StartParams) -> ComponentResult {
        self.record(Call::Start(params.interface.clone()))
    }

    fn stop(&self) {
        self.record_infallible(Call::Stop);
    }

    fn update_name(&self, name: &str) {
        self.record_infallible(Call::UpdateName(name.to_string()));
    }

    fn set_logging(&self, logging: ComponentLogging) {
        self.record_infallible(Call::SetLogging(logging));
    }

    fn add_module_types(&self, identifiers: &[ModuleIdentifier]) {
        self.record_infallible(Call::AddModuleTypes(identifiers.to_vec()));
    }

    fn remove_module_types(&self, identifiers: &[ModuleIdentifier]) {
        self.record_infallible(Call::RemoveModuleTypes(identifiers.to_vec()));
    }

    fn observe_system_numbers(&self, system_numbers: &BTreeSet<u8>) {
        self.record_infallible(Call::ObserveSystemNumbers(system_numbers.clone()));
    }

    fn request_producer_point_names(&self) {
        self.record_infallible(Call::RequestPointNames);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Notification {
    State,
    Peers(Option<usize>),
    Points(Option<usize>),
    SystemNumbers,
}

#[derive(Default)]
pub(crate) struct RecordingDelegate {
    notifications: Mutex<Vec<Notification>>,
}

impl RecordingDelegate {
    pub(crate) fn take(&self) -> Vec<Notification> {
        std::mem::take(&mut *self.notifications.lock().unwrap())
    }

    fn push(&self, notification: Notification) {
        self.notifications.lock().unwrap().push(notification);
    }
}

impl ProducerModelDelegate for RecordingDelegate {
    fn state_changed(&self) {
        self.push(Notification::State);
    }

    fn consumers_changed(&self, index: Option<usize>) {
        self.push(Notification::Peers(index));
    }

    fn points_changed(&self, index: Option<usize>) {
        self.push(Notification::Points(index));
    }
}

impl ConsumerModelDelegate for RecordingDelegate {
    fn state_changed(&self) {
        self.push(Notification::State);
    }

    fn producers_changed(&self, index: Option<usize>) {
        self.push(Notification::Peers(index));
    }

    fn points_changed(&self, index: Option<usize>) {
        self.push(Notification::Points(index));
    }

    fn system_numbers_changed(&self) {
        self.push(Notification::SystemNumbers);
    }
}

pub(crate) fn test_log() -> Log {
    Log::new(&LogConfig::default()).unwrap()
}

/// Default configuration with a fast fade tick.
pub(crate) fn fast_config() -> TesterConfig {
    let mut config = TesterConfig::default();
    config.fade.tick_interval_ms = 5;
    config
}

pub(crate) fn count_category(log: &Log, category: LogCategory) -> usize {
    log.messages()
        .iter()
        .filter(|message| message.category == category)
        .count()
}

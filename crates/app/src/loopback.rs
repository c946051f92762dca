//! In-process stand-in for the protocol component.
//!
//! Both sides share one link table. Anything a remote peer would receive is
//! queued on a channel and delivered from a dedicated thread, so a model
//! never sees a callback while it is still inside one of its own calls.

use std::{
    collections::{BTreeMap, BTreeSet},
    net::{IpAddr, Ipv4Addr},
    sync::{Arc, Mutex, MutexGuard, RwLock, Weak},
    thread::{self, JoinHandle},
    time::Instant,
};

use crossbeam_channel::{unbounded, Receiver, Sender};
use otp_tester_core::{
    Address, ComponentDiagnostics, ComponentError, ComponentLogging, ComponentResult,
    ConsumerComponent, ConsumerComponentDelegate, ConsumerPoint, ConsumerStatus, Module,
    ModuleIdentifier, PeerState, Priority, ProducerComponent, ProducerComponentDelegate,
    ProducerStatus, StartParams, ValidationError,
};

const LOOPBACK_ADDRESS: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

enum Delivery {
    Points(Vec<ConsumerPoint>),
    AllPoints(Vec<ConsumerPoint>),
    Systems(BTreeSet<u8>),
    ProducerStatus(ProducerStatus),
    ConsumerStatus(ConsumerStatus),
    ProducerDebug(String),
    ConsumerDebug(String),
}

struct PointEntry {
    name: String,
    modules: Vec<Module>,
}

#[derive(Default)]
struct Link {
    producer: Option<StartParams>,
    consumer: Option<StartParams>,
    producer_logging: ComponentLogging,
    consumer_logging: ComponentLogging,
    points: BTreeMap<(Address, Priority), PointEntry>,
    observed: BTreeSet<u8>,
    module_types: Vec<ModuleIdentifier>,
}

impl Link {
    fn connected(&self) -> bool {
        self.producer.is_some() && self.consumer.is_some()
    }

    fn systems(&self) -> BTreeSet<u8> {
        self.points.keys().map(|(address, _)| address.system).collect()
    }

    /// What the consumer would receive for one point, if anything.
    fn visible(&self, key: (Address, Priority), sample_time: u64) -> Option<ConsumerPoint> {
        let producer = self.producer.as_ref()?;
        let entry = self.points.get(&key)?;
        if !self.observed.contains(&key.0.system) {
            return None;
        }
        let modules: Vec<Module> = entry
            .modules
            .iter()
            .filter(|module| self.module_types.contains(&module.identifier()))
            .copied()
            .collect();
        if modules.is_empty() {
            return None;
        }
        Some(ConsumerPoint {
            address: key.0,
            priority: key.1,
            name: entry.name.clone(),
            cid: producer.cid,
            sample_time,
            modules,
        })
    }

    fn snapshot(&self, sample_time: u64) -> Vec<ConsumerPoint> {
        self.points
            .keys()
            .filter_map(|key| self.visible(*key, sample_time))
            .collect()
    }

    fn producer_status(&self, state: PeerState) -> Option<ProducerStatus> {
        let producer = self.producer.as_ref()?;
        let mut module_identifiers: Vec<ModuleIdentifier> = self
            .points
            .values()
            .flat_map(|entry| entry.modules.iter().map(Module::identifier))
            .collect();
        module_identifiers.sort();
        module_identifiers.dedup();
        Some(ProducerStatus {
            cid: producer.cid,
            name: producer.name.clone(),
            ip_address: LOOPBACK_ADDRESS,
            state,
            sequence_errors: 0,
            module_identifiers,
        })
    }

    fn consumer_status(&self, state: PeerState) -> Option<ConsumerStatus> {
        let consumer = self.consumer.as_ref()?;
        Some(ConsumerStatus {
            cid: consumer.cid,
            name: consumer.name.clone(),
            ip_address: LOOPBACK_ADDRESS,
            state,
            sequence_errors: 0,
        })
    }

    /// Renames every point at `address` and returns their keys.
    fn rename(&mut self, address: Address, name: &str) -> Vec<(Address, Priority)> {
        let mut keys = Vec::new();
        for (key, entry) in self.points.iter_mut() {
            if key.0 == address {
                entry.name = name.to_string();
                keys.push(*key);
            }
        }
        keys
    }

    fn entry_mut(
        &mut self,
        address: Address,
        priority: Priority,
    ) -> Result<&mut PointEntry, ComponentError> {
        self.points
            .get_mut(&(address, priority))
            .ok_or(ComponentError::Validation(ValidationError::PointNotFound {
                address,
                priority,
            }))
    }
}

struct Shared {
    link: Mutex<Link>,
    epoch: Instant,
    tx: Sender<Delivery>,
    producer_delegate: RwLock<Option<Weak<dyn ProducerComponentDelegate>>>,
    consumer_delegate: RwLock<Option<Weak<dyn ConsumerComponentDelegate>>>,
}

impl Shared {
    fn link(&self) -> MutexGuard<'_, Link> {
        self.link.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn sample_time(&self) -> u64 {
        u64::try_from(self.epoch.elapsed().as_micros()).unwrap_or(u64::MAX)
    }

    fn send(&self, delivery: Delivery) {
        // The delivery thread only goes away with the last component.
        let _ = self.tx.send(delivery);
    }

    fn send_point(&self, link: &Link, key: (Address, Priority)) {
        if !link.connected() {
            return;
        }
        if let Some(point) = link.visible(key, self.sample_time()) {
            self.send(Delivery::Points(vec![point]));
        }
    }

    /// Pushes the full picture to the consumer: statuses, systems and points.
    fn resync(&self, link: &Link) {
        if !link.connected() {
            return;
        }
        if let Some(status) = link.producer_status(PeerState::Online) {
            self.send(Delivery::ProducerStatus(status));
        }
        if let Some(status) = link.consumer_status(PeerState::Online) {
            self.send(Delivery::ConsumerStatus(status));
        }
        self.send(Delivery::Systems(link.systems()));
        self.send(Delivery::AllPoints(link.snapshot(self.sample_time())));
    }

    fn producer_debug(&self, link: &Link, text: String) {
        if link.producer_logging.debug {
            self.send(Delivery::ProducerDebug(text));
        }
    }

    fn consumer_debug(&self, link: &Link, text: String) {
        if link.consumer_logging.debug {
            self.send(Delivery::ConsumerDebug(text));
        }
    }
}

/// Owner of the delivery thread and factory for both component halves.
pub struct Loopback {
    shared: Arc<Shared>,
}

impl Loopback {
    pub fn spawn() -> std::io::Result<(Self, JoinHandle<()>)> {
        let (tx, rx) = unbounded();
        let shared = Arc::new(Shared {
            link: Mutex::new(Link::default()),
            epoch: Instant::now(),
            tx,
            producer_delegate: RwLock::new(None),
            consumer_delegate: RwLock::new(None),
        });
        let weak = Arc::downgrade(&shared);
        let handle = thread::Builder::new()
            .name("loopback".into())
            .spawn(move || deliver(weak, rx))?;
        Ok((Self { shared }, handle))
    }

    pub fn producer(&self) -> Arc<LoopbackProducer> {
        Arc::new(LoopbackProducer {
            shared: Arc::clone(&self.shared),
        })
    }

    pub fn consumer(&self) -> Arc<LoopbackConsumer> {
        Arc::new(LoopbackConsumer {
            shared: Arc::clone(&self.shared),
        })
    }

    pub fn connect(
        &self,
        producer: Weak<dyn ProducerComponentDelegate>,
        consumer: Weak<dyn ConsumerComponentDelegate>,
    ) {
        *self
            .shared
            .producer_delegate
            .write()
            .unwrap_or_else(|e| e.into_inner()) = Some(producer);
        *self
            .shared
            .consumer_delegate
            .write()
            .unwrap_or_else(|e| e.into_inner()) = Some(consumer);
    }
}

fn deliver(shared: Weak<Shared>, rx: Receiver<Delivery>) {
    tracing::debug!("loopback delivery thread started");
    while let Ok(delivery) = rx.recv() {
        let Some(shared) = shared.upgrade() else {
            break;
        };
        let producer = shared
            .producer_delegate
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .and_then(Weak::upgrade);
        let consumer = shared
            .consumer_delegate
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .and_then(Weak::upgrade);
        drop(shared);

        match delivery {
            Delivery::Points(points) => {
                if let Some(consumer) = consumer {
                    consumer.points_changed(points);
                }
            }
            Delivery::AllPoints(points) => {
                if let Some(consumer) = consumer {
                    consumer.replace_all_points(points);
                }
            }
            Delivery::Systems(systems) => {
                if let Some(consumer) = consumer {
                    consumer.discovered_system_numbers(systems);
                }
            }
            Delivery::ProducerStatus(status) => {
                if let Some(consumer) = consumer {
                    consumer.producer_status_changed(status);
                }
            }
            Delivery::ConsumerStatus(status) => {
                if let Some(producer) = producer {
                    producer.consumer_status_changed(status);
                }
            }
            Delivery::ProducerDebug(text) => {
                if let Some(producer) = producer {
                    producer.debug_message(&text);
                }
            }
            Delivery::ConsumerDebug(text) => {
                if let Some(consumer) = consumer {
                    consumer.debug_message(&text);
                }
            }
        }
    }
    tracing::debug!("loopback delivery thread stopped");
}

pub struct LoopbackProducer {
    shared: Arc<Shared>,
}

impl ProducerComponent for LoopbackProducer {
    fn start(&self, params: &StartParams) -> ComponentResult {
        if params.interface.trim().is_empty() {
            return Err(ComponentError::Socket("no interface to bind".into()));
        }
        let mut link = self.shared.link();
        link.producer = Some(params.clone());
        tracing::debug!(cid = %params.cid, interface = %params.interface, "loopback producer up");
        self.shared.resync(&link);
        Ok(())
    }

    fn stop(&self) {
        let mut link = self.shared.link();
        if link.connected() {
            if let Some(status) = link.producer_status(PeerState::Offline) {
                self.shared.send(Delivery::ProducerStatus(status));
            }
            self.shared.send(Delivery::AllPoints(Vec::new()));
        }
        link.producer = None;
        tracing::debug!("loopback producer down");
    }

    fn update_name(&self, name: &str) {
        let mut link = self.shared.link();
        if let Some(producer) = link.producer.as_mut() {
            producer.name = name.to_string();
        }
        if link.connected() {
            if let Some(status) = link.producer_status(PeerState::Online) {
                self.shared.send(Delivery::ProducerStatus(status));
            }
        }
    }

    fn set_logging(&self, logging: ComponentLogging) {
        self.shared.link().producer_logging = logging;
    }

    fn add_point(&self, address: Address, priority: Priority, name: &str) -> ComponentResult {
        let mut link = self.shared.link();
        if link.points.contains_key(&(address, priority)) {
            return Err(ValidationError::PointExists { address, priority }.into());
        }
        link.points.insert(
            (address, priority),
            PointEntry {
                name: name.to_string(),
                modules: Vec::new(),
            },
        );
        // The name belongs to the address, so other priorities take it too.
        let renamed = link.rename(address, name);
        self.shared
            .producer_debug(&link, format!("Sending {address} priority {priority}"));
        if link.connected() {
            self.shared.send(Delivery::Systems(link.systems()));
        }
        for key in renamed {
            self.shared.send_point(&link, key);
        }
        Ok(())
    }

    fn remove_points(&self, address: Address, priority: Priority) -> ComponentResult {
        let mut link = self.shared.link();
        if link.points.remove(&(address, priority)).is_none() {
            return Err(ValidationError::PointNotFound { address, priority }.into());
        }
        self.shared
            .producer_debug(&link, format!("Stopped sending {address} priority {priority}"));
        if link.connected() {
            self.shared.send(Delivery::Systems(link.systems()));
            self.shared
                .send(Delivery::AllPoints(link.snapshot(self.shared.sample_time())));
        }
        Ok(())
    }

    fn rename_points(&self, address: Address, name: &str) -> ComponentResult {
        let mut link = self.shared.link();
        let keys = link.rename(address, name);
        if keys.is_empty() {
            return Err(ValidationError::AddressNotFound(address).into());
        }
        for key in keys {
            self.shared.send_point(&link, key);
        }
        Ok(())
    }

    fn add_module(&self, module: &Module, address: Address, priority: Priority) -> ComponentResult {
        let mut link = self.shared.link();
        let entry = link.entry_mut(address, priority)?;
        let identifier = module.identifier();
        if entry.modules.iter().any(|m| m.identifier() == identifier) {
            return Err(ValidationError::ModuleExists {
                identifier,
                address,
                priority,
            }
            .into());
        }
        entry.modules.push(*module);
        self.shared.send_point(&link, (address, priority));
        Ok(())
    }

    fn remove_module(
        &self,
        identifier: ModuleIdentifier,
        address: Address,
        priority: Priority,
    ) -> ComponentResult {
        let mut link = self.shared.link();
        let entry = link.entry_mut(address, priority)?;
        let before = entry.modules.len();
        entry.modules.retain(|m| m.identifier() != identifier);
        if entry.modules.len() == before {
            return Err(ValidationError::ModuleNotFound {
                identifier,
                address,
                priority,
            }
            .into());
        }
        if link.connected() {
            self.shared
                .send(Delivery::AllPoints(link.snapshot(self.shared.sample_time())));
        }
        Ok(())
    }

    fn update_module(
        &self,
        module: &Module,
        address: Address,
        priority: Priority,
    ) -> ComponentResult {
        let mut link = self.shared.link();
        let entry = link.entry_mut(address, priority)?;
        let identifier = module.identifier();
        let Some(slot) = entry.modules.iter_mut().find(|m| m.identifier() == identifier) else {
            return Err(ValidationError::ModuleNotFound {
                identifier,
                address,
                priority,
            }
            .into());
        };
        *slot = *module;
        self.shared.send_point(&link, (address, priority));
        Ok(())
    }
}

pub struct LoopbackConsumer {
    shared: Arc<Shared>,
}

impl ConsumerComponent for LoopbackConsumer {
    fn start(&self, params: &StartParams) -> ComponentResult {
        if params.interface.trim().is_empty() {
            return Err(ComponentError::Socket("no interface to bind".into()));
        }
        let mut link = self.shared.link();
        link.consumer = Some(params.clone());
        tracing::debug!(cid = %params.cid, interface = %params.interface, "loopback consumer up");
        self.shared.resync(&link);
        Ok(())
    }

    fn stop(&self) {
        let mut link = self.shared.link();
        if link.connected() {
            if let Some(status) = link.consumer_status(PeerState::Offline) {
                self.shared.send(Delivery::ConsumerStatus(status));
            }
        }
        link.consumer = None;
        tracing::debug!("loopback consumer down");
    }

    fn update_name(&self, name: &str) {
        let mut link = self.shared.link();
        if let Some(consumer) = link.consumer.as_mut() {
            consumer.name = name.to_string();
        }
        if link.connected() {
            if let Some(status) = link.consumer_status(PeerState::Online) {
                self.shared.send(Delivery::ConsumerStatus(status));
            }
        }
    }

    fn set_logging(&self, logging: ComponentLogging) {
        self.shared.link().consumer_logging = logging;
    }

    fn add_module_types(&self, identifiers: &[ModuleIdentifier]) {
        let mut link = self.shared.link();
        for identifier in identifiers {
            if !link.module_types.contains(identifier) {
                link.module_types.push(*identifier);
            }
        }
        self.shared
            .consumer_debug(&link, format!("Now requesting {} module types", link.module_types.len()));
        self.shared.resync(&link);
    }

    fn remove_module_types(&self, identifiers: &[ModuleIdentifier]) {
        let mut link = self.shared.link();
        link.module_types
            .retain(|identifier| !identifiers.contains(identifier));
        self.shared.resync(&link);
    }

    fn observe_system_numbers(&self, system_numbers: &BTreeSet<u8>) {
        let mut link = self.shared.link();
        link.observed = system_numbers.clone();
        self.shared.resync(&link);
    }

    fn request_producer_point_names(&self) {
        let link = self.shared.link();
        self.shared
            .consumer_debug(&link, "Requesting point names".to_string());
        self.shared.resync(&link);
    }
}

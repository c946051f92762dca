use std::{
    net::{IpAddr, Ipv4Addr},
    thread,
    time::{Duration, Instant},
};

use super::*;
use crate::{
    model::Xyz,
    testing::{
        count_category, fast_config, test_log, Call, MockComponent, Notification,
        RecordingDelegate,
    },
};

const ADDRESS: Address = Address::new(1, 1, 1);

fn producer() -> (Arc<ProducerModel>, Arc<MockComponent>) {
    let component = MockComponent::new();
    let model = ProducerModel::new(component.clone(), &fast_config(), test_log()).unwrap();
    (model, component)
}

fn started_producer() -> (Arc<ProducerModel>, Arc<MockComponent>) {
    let (model, component) = producer();
    model.set_interface(Some("lo0".to_string()));
    model.start();
    assert!(model.is_started());
    (model, component)
}

fn wait_until(mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(Instant::now() < deadline, "condition not reached in time");
        thread::sleep(Duration::from_millis(1));
    }
}

#[test]
fn renaming_an_address_renames_every_priority() {
    let (model, _) = producer();
    assert!(model.add_point(ADDRESS, 100, "A"));
    assert!(model.add_point(ADDRESS, 150, "B"));

    model.rename_point(ADDRESS, "C");

    let points = model.points();
    assert_eq!(points.len(), 2);
    assert!(points.iter().all(|point| point.name == "C"));
}

#[test]
fn adding_a_second_priority_renames_the_address() {
    let (model, _) = producer();
    model.add_point(ADDRESS, 100, "A");
    model.add_point(ADDRESS, 150, "B");
    model.add_point(Address::new(1, 1, 2), 100, "other");

    let names: Vec<_> = model.points().into_iter().map(|p| p.name).collect();
    assert_eq!(names, ["B", "B", "other"]);
}

#[test]
fn duplicate_point_is_rejected_and_logged() {
    let (model, component) = producer();
    assert!(model.add_point(ADDRESS, 100, "A"));

    assert!(!model.add_point(ADDRESS, 100, "again"));

    assert_eq!(model.points().len(), 1);
    assert_eq!(model.points()[0].name, "A");
    assert_eq!(count_category(model.log(), LogCategory::Validation), 1);
    assert_eq!(
        component
            .calls()
            .iter()
            .filter(|call| matches!(call, Call::AddPoint(..)))
            .count(),
        1
    );
}

#[test]
fn malformed_address_never_reaches_the_component() {
    let (model, component) = producer();

    assert!(!model.add_point(Address::new(201, 1, 1), 100, "A"));
    assert!(!model.add_point(ADDRESS, 250, "A"));

    assert!(model.points().is_empty());
    assert!(component.calls().is_empty());
    assert_eq!(count_category(model.log(), LogCategory::Validation), 2);
}

#[test]
fn component_failure_leaves_state_untouched() {
    let (model, component) = producer();
    model.add_point(ADDRESS, 100, "A");

    component.fail_next(ComponentError::Unknown("library exploded".into()));
    assert!(!model.add_point(ADDRESS, 150, "B"));
    component.fail_next(ComponentError::Validation(ValidationError::AddressNotFound(
        ADDRESS,
    )));
    model.rename_point(ADDRESS, "C");

    let points = model.points();
    assert_eq!(points.len(), 1);
    assert_eq!(points[0].name, "A");
    assert_eq!(count_category(model.log(), LogCategory::UnknownError), 1);
    assert_eq!(count_category(model.log(), LogCategory::Validation), 1);
}

#[test]
fn removing_a_base_module_cascades_to_its_companion() {
    let (model, component) = producer();
    model.add_point(ADDRESS, 100, "A");
    model.add_module(Module::default_for(ModuleIdentifier::Rotation), ADDRESS, 100);
    model.add_module(
        Module::default_for(ModuleIdentifier::RotationVelAccel),
        ADDRESS,
        100,
    );
    model.add_module(Module::default_for(ModuleIdentifier::Scale), ADDRESS, 100);

    model.remove_module(ModuleIdentifier::Rotation, ADDRESS, 100);

    let points = model.points();
    let point = &points[0];
    assert!(!point.has_module(ModuleIdentifier::Rotation));
    assert!(!point.has_module(ModuleIdentifier::RotationVelAccel));
    assert!(point.has_module(ModuleIdentifier::Scale));

    let removals: Vec<_> = component
        .calls()
        .into_iter()
        .filter(|call| matches!(call, Call::RemoveModule(..)))
        .collect();
    assert_eq!(
        removals,
        [
            Call::RemoveModule(ModuleIdentifier::RotationVelAccel, ADDRESS, 100),
            Call::RemoveModule(ModuleIdentifier::Rotation, ADDRESS, 100),
        ]
    );
}

#[test]
fn failed_base_removal_restores_the_companion() {
    let (model, component) = producer();
    model.add_point(ADDRESS, 100, "A");
    model.add_module(Module::default_for(ModuleIdentifier::Rotation), ADDRESS, 100);
    let companion = Module::RotationVelAccel {
        velocity: Xyz::splat(7),
        acceleration: Xyz::splat(-3),
    };
    model.add_module(companion, ADDRESS, 100);
    let before = model.points();
    component.fail_call(
        Call::RemoveModule(ModuleIdentifier::Rotation, ADDRESS, 100),
        ComponentError::Unknown("busy".into()),
    );

    model.remove_module(ModuleIdentifier::Rotation, ADDRESS, 100);

    assert_eq!(model.points(), before);
    assert_eq!(count_category(model.log(), LogCategory::UnknownError), 1);
    let calls = component.calls();
    assert_eq!(
        &calls[calls.len() - 2..],
        [
            Call::RemoveModule(ModuleIdentifier::RotationVelAccel, ADDRESS, 100),
            Call::AddModule(companion, ADDRESS, 100),
        ]
    );
}

#[test]
fn failed_companion_removal_leaves_both_modules() {
    let (model, component) = producer();
    model.add_point(ADDRESS, 100, "A");
    model.add_module(Module::default_for(ModuleIdentifier::Position), ADDRESS, 100);
    model.add_module(
        Module::default_for(ModuleIdentifier::PositionVelAccel),
        ADDRESS,
        100,
    );
    component.fail_call(
        Call::RemoveModule(ModuleIdentifier::PositionVelAccel, ADDRESS, 100),
        ComponentError::Unknown("busy".into()),
    );

    model.remove_module(ModuleIdentifier::Position, ADDRESS, 100);

    assert_eq!(model.points()[0].modules.len(), 2);
    assert!(!component
        .calls()
        .iter()
        .any(|call| matches!(call, Call::RemoveModule(ModuleIdentifier::Position, ..))));
}

#[test]
fn removing_a_companion_keeps_the_base() {
    let (model, _) = producer();
    model.add_point(ADDRESS, 100, "A");
    model.add_module(Module::default_for(ModuleIdentifier::Position), ADDRESS, 100);
    model.add_module(
        Module::default_for(ModuleIdentifier::PositionVelAccel),
        ADDRESS,
        100,
    );

    model.remove_module(ModuleIdentifier::PositionVelAccel, ADDRESS, 100);

    let points = model.points();
    let point = &points[0];
    assert!(point.has_module(ModuleIdentifier::Position));
    assert!(!point.has_module(ModuleIdentifier::PositionVelAccel));
}

#[test]
fn companion_module_requires_its_base() {
    let (model, component) = producer();
    model.add_point(ADDRESS, 100, "A");

    model.add_module(
        Module::default_for(ModuleIdentifier::PositionVelAccel),
        ADDRESS,
        100,
    );
    model.add_module(Module::default_for(ModuleIdentifier::Position), ADDRESS, 100);
    model.add_module(Module::default_for(ModuleIdentifier::Position), ADDRESS, 100);

    assert_eq!(model.points()[0].modules.len(), 1);
    assert_eq!(count_category(model.log(), LogCategory::Validation), 2);
    assert!(!component
        .calls()
        .iter()
        .any(|call| matches!(call, Call::AddModule(Module::PositionVelAccel { .. }, ..))));
}

#[test]
fn user_edits_are_stored_and_reported_by_row() {
    let (model, _) = producer();
    let delegate = Arc::new(RecordingDelegate::default());
    model.set_delegate(Some(delegate.clone() as Arc<dyn ProducerModelDelegate>));
    model.add_point(Address::new(1, 1, 2), 100, "first");
    model.add_point(ADDRESS, 100, "A");
    model.add_module(Module::default_for(ModuleIdentifier::Position), ADDRESS, 100);
    model.flush_notifications();
    delegate.take();

    let moved = Module::Position(Xyz::new(1, 2, 3));
    model.update_module(moved, ADDRESS, 100);
    model.update_module(moved, Address::new(9, 9, 9), 100);
    model.flush_notifications();

    assert_eq!(model.points()[0].module(ModuleIdentifier::Position), Some(&moved));
    assert_eq!(delegate.take(), [Notification::Points(Some(0))]);
    assert_eq!(count_category(model.log(), LogCategory::Validation), 1);
}

#[test]
fn starting_without_an_interface_is_a_logged_no_op() {
    let (model, component) = producer();

    model.start();

    assert!(!model.is_started());
    assert!(component.calls().is_empty());
    assert_eq!(count_category(model.log(), LogCategory::Warning), 1);
}

#[test]
fn socket_errors_on_start_leave_the_model_stopped() {
    let (model, component) = producer();
    model.set_interface(Some("en0".to_string()));
    component.fail_next(ComponentError::Socket("address in use".into()));

    model.start();

    assert!(!model.is_started());
    assert!(!model.fade_engine().is_running());
    assert_eq!(count_category(model.log(), LogCategory::SocketError), 1);
}

#[test]
fn changing_interface_restarts_a_running_producer() {
    let (model, component) = started_producer();

    model.set_interface(Some("en1".to_string()));

    assert!(model.is_started());
    let calls = component.calls();
    assert_eq!(
        calls,
        [
            Call::Start("lo0".to_string()),
            Call::Stop,
            Call::Start("en1".to_string())
        ]
    );
}

#[test]
fn starting_a_second_fade_replaces_the_first() {
    let (model, _) = producer();
    model.add_point(ADDRESS, 100, "A");

    model.start_fade(ADDRESS, 100, FadePattern::PositionForward);
    model.start_fade(ADDRESS, 100, FadePattern::RotateForward);

    let active = model.active_fades();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].pattern, FadePattern::RotateForward);

    let running = model.fade_engine().fades().unwrap();
    assert_eq!(running.len(), 1);
    assert_eq!(running[0].pattern(), FadePattern::RotateForward);
}

#[test]
fn fades_drive_the_component_without_touching_stored_values() {
    let (model, component) = started_producer();
    model.add_point(ADDRESS, 100, "A");
    let stored = Module::Position(Xyz::new(5, 6, 7));
    model.add_module(stored, ADDRESS, 100);

    model.start_fade(ADDRESS, 100, FadePattern::PositionBounce);
    wait_until(|| component.module_updates() >= 3);

    assert_eq!(model.points()[0].module(ModuleIdentifier::Position), Some(&stored));
    assert_eq!(count_category(model.log(), LogCategory::Validation), 0);

    model.stop_fade(ADDRESS, 100);
    assert!(model.active_fades().is_empty());
    let last = component.calls().last().cloned();
    assert_eq!(last, Some(Call::UpdateModule(stored, ADDRESS, 100)));
}

#[test]
fn fade_for_a_removed_point_is_silently_dropped() {
    let (model, component) = started_producer();
    model.add_point(ADDRESS, 100, "A");
    model.add_module(Module::default_for(ModuleIdentifier::Rotation), ADDRESS, 100);
    model.start_fade(ADDRESS, 100, FadePattern::RotateForward);
    wait_until(|| component.module_updates() >= 1);

    model.remove_point(ADDRESS, 100);
    let updates = component.module_updates();
    thread::sleep(Duration::from_millis(30));

    assert_eq!(component.module_updates(), updates);
    assert!(model.active_fades().is_empty());
    assert!(model.fade_engine().fades().unwrap().is_empty());
    assert_eq!(count_category(model.log(), LogCategory::Validation), 0);
}

#[test]
fn no_fade_update_arrives_after_stop_returns() {
    let (model, component) = started_producer();
    model.add_point(ADDRESS, 100, "A");
    model.add_module(Module::default_for(ModuleIdentifier::Position), ADDRESS, 100);
    model.start_fade(ADDRESS, 100, FadePattern::PositionForward);
    wait_until(|| component.module_updates() >= 2);

    model.stop();
    let updates = component.module_updates();
    thread::sleep(Duration::from_millis(50));

    assert_eq!(component.module_updates(), updates);
    assert!(!model.fade_engine().is_running());
    assert_eq!(model.active_fades().len(), 1);
}

#[test]
fn stop_during_a_slow_start_leaves_the_engine_halted() {
    let (model, component) = producer();
    model.set_interface(Some("lo0".to_string()));
    model.add_point(ADDRESS, 100, "A");
    model.add_module(Module::default_for(ModuleIdentifier::Position), ADDRESS, 100);
    model.start_fade(ADDRESS, 100, FadePattern::PositionForward);
    component.delay_start(Duration::from_millis(30));

    let starter = {
        let model = Arc::clone(&model);
        thread::spawn(move || model.start())
    };
    thread::sleep(Duration::from_millis(10));
    model.stop();
    starter.join().unwrap();

    assert!(!model.is_started());
    assert!(!model.fade_engine().is_running());
    let updates = component.module_updates();
    thread::sleep(Duration::from_millis(50));
    assert_eq!(component.module_updates(), updates);
}

#[test]
fn consumer_reports_are_upserted_by_identifier() {
    let (model, _) = producer();
    let delegate = Arc::new(RecordingDelegate::default());
    model.set_delegate(Some(delegate.clone() as Arc<dyn ProducerModelDelegate>));
    let cid = Uuid::new_v4();
    let status = |name: &str, sequence_errors| ConsumerStatus {
        cid,
        name: name.to_string(),
        ip_address: IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2)),
        state: crate::model::PeerState::Online,
        sequence_errors,
    };

    model.consumer_status_changed(status("desk", 0));
    model.consumer_status_changed(status("desk", 4));
    model.flush_notifications();

    let consumers = model.consumers();
    assert_eq!(consumers.len(), 1);
    assert_eq!(consumers[0].sequence_errors, 4);
    assert_eq!(
        delegate.take(),
        [Notification::Peers(None), Notification::Peers(Some(0))]
    );
}

#[test]
fn diagnostics_are_logged_by_category() {
    let (model, _) = producer();

    model.error_reported(&ComponentError::Protocol("bad vector".into()));
    model.sequence_error(Uuid::nil(), "out of order");
    model.debug_socket_message("joined multicast group");

    assert_eq!(count_category(model.log(), LogCategory::ProtocolError), 1);
    assert_eq!(count_category(model.log(), LogCategory::SequenceError), 1);
    assert_eq!(count_category(model.log(), LogCategory::DebugSocket), 1);
}

#[test]
fn reset_clears_everything_and_takes_a_new_identifier() {
    let (never_started, component) = producer();
    never_started.reset();
    assert!(component.calls().is_empty());

    let (model, component) = started_producer();
    model.add_point(ADDRESS, 100, "A");
    model.start_fade(ADDRESS, 100, FadePattern::RotateReverse);
    let cid = model.cid();

    model.reset();

    assert!(!model.is_started());
    assert!(model.points().is_empty());
    assert!(model.active_fades().is_empty());
    assert!(model.fade_engine().fades().unwrap().is_empty());
    assert_ne!(model.cid(), cid);
    assert_eq!(component.calls().last(), Some(&Call::Stop));
}

#[test]
fn readers_never_observe_a_half_renamed_address() {
    let (model, _) = producer();
    model.add_point(ADDRESS, 100, "even");
    model.add_point(ADDRESS, 150, "even");

    let writer = {
        let model = Arc::clone(&model);
        thread::spawn(move || {
            for i in 0..500 {
                let name = if i % 2 == 0 { "odd" } else { "even" };
                model.rename_point(ADDRESS, name);
            }
        })
    };
    let readers: Vec<_> = (0..4)
        .map(|_| {
            let model = Arc::clone(&model);
            thread::spawn(move || {
                for _ in 0..500 {
                    let points = model.points();
                    assert_eq!(points.len(), 2);
                    assert_eq!(points[0].name, points[1].name);
                }
            })
        })
        .collect();

    writer.join().unwrap();
    for reader in readers {
        reader.join().unwrap();
    }
}

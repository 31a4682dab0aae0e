//! Unit tests for bootstrap and the run loop.

use std::io;
use std::sync::Arc;

use mockall::mock;
use rstest::rstest;
use watcher_config::DiscoveryMode;

use crate::bootstrap::{StaticConfigLoader, bootstrap_with};
use crate::health::HealthReporter;
use crate::process::{LaunchError, RunOutcome, run_with, serve};
use crate::shutdown::{ShutdownError, ShutdownSignal};

use super::support::{FailingConfigLoader, HealthEvent, TestWorld};

mock! {
    Signal {}
    impl ShutdownSignal for Signal {
        fn wait(&self);
    }
}

fn reporter_of(world: &TestWorld) -> Arc<dyn HealthReporter> {
    Arc::clone(&world.reporter) as Arc<dyn HealthReporter>
}

#[rstest]
fn bootstrap_does_not_launch_plugins() {
    let world = TestWorld::new();
    world.add_file("a.watcher");
    let loader = StaticConfigLoader::new(world.config());

    let daemon =
        bootstrap_with(&loader, reporter_of(&world), world.parts()).expect("bootstrap succeeds");

    assert_eq!(daemon.config(), &world.config());
    assert!(daemon.host().list_packages().is_empty());
    assert_eq!(world.launcher.attempts(), 0);
    assert_eq!(
        world.reporter.events(),
        vec![HealthEvent::BootstrapStarting, HealthEvent::BootstrapSucceeded]
    );
}

#[rstest]
fn configuration_failures_are_reported() {
    let world = TestWorld::new();

    let error = bootstrap_with(&FailingConfigLoader, reporter_of(&world), world.parts())
        .expect_err("bootstrap should fail");

    let events = world.reporter.events();
    assert_eq!(events.len(), 2);
    assert_eq!(events[1], HealthEvent::BootstrapFailed(error.to_string()));
}

#[rstest]
fn catalog_mode_never_waits_for_a_signal() {
    let mut world = TestWorld::new();
    world.use_mode(DiscoveryMode::Catalog);
    world.add_file("a.watcher");
    let loader = StaticConfigLoader::new(world.config());
    let daemon =
        bootstrap_with(&loader, reporter_of(&world), world.parts()).expect("bootstrap succeeds");
    let mut signal = MockSignal::new();
    signal.expect_wait().times(0);

    let outcome = serve(&daemon, &signal).expect("run succeeds");

    assert!(
        matches!(outcome, RunOutcome::Catalogued { summary } if summary.failed == 1),
        "{outcome:?}"
    );
    assert!(
        world
            .reporter
            .events()
            .contains(&HealthEvent::CatalogEntry(String::from("a")))
    );
}

#[rstest]
fn active_mode_shuts_down_after_the_signal() {
    let world = TestWorld::new();
    world.add_file("a.watcher");
    world.add_file("b.watcher");
    let loader = StaticConfigLoader::new(world.config());
    let daemon =
        bootstrap_with(&loader, reporter_of(&world), world.parts()).expect("bootstrap succeeds");
    let mut signal = MockSignal::new();
    signal.expect_wait().times(1).return_const(());

    let outcome = serve(&daemon, &signal).expect("failed plugins do not fail the run");

    let RunOutcome::Stopped { summary, report } = outcome else {
        panic!("active mode should stop after a signal: {outcome:?}");
    };
    assert_eq!(summary.candidates, 2);
    assert_eq!(summary.failed, 2);
    assert_eq!(report.len(), 2);
    assert!(report.all_released());
    let events = world.reporter.events();
    assert!(events.contains(&HealthEvent::DiscoveryCompleted { ready: 0, failed: 2 }));
    assert_eq!(events.last(), Some(&HealthEvent::ShutdownCompleted(2)));
}

#[rstest]
fn unreadable_plugin_directory_fails_the_run() {
    let mut world = TestWorld::new();
    world.remove_plugin_dir();
    let loader = StaticConfigLoader::new(world.config());
    let daemon =
        bootstrap_with(&loader, reporter_of(&world), world.parts()).expect("bootstrap succeeds");
    let mut signal = MockSignal::new();
    signal.expect_wait().times(0);

    let error = serve(&daemon, &signal).expect_err("missing directory fails the run");

    assert!(matches!(error, LaunchError::Discovery { .. }), "{error}");
    assert!(
        world
            .reporter
            .events()
            .contains(&HealthEvent::DiscoveryFailed("discovery_io"))
    );
}

#[rstest]
fn signal_installation_failure_stops_before_discovery() {
    let world = TestWorld::new();
    world.add_file("a.watcher");
    let loader = StaticConfigLoader::new(world.config());

    let result = run_with(&loader, reporter_of(&world), world.parts(), || {
        Err::<MockSignal, _>(ShutdownError::Install {
            source: io::Error::other("signals unavailable"),
        })
    });

    assert!(matches!(result, Err(LaunchError::Signals(_))), "{result:?}");
    assert_eq!(world.launcher.attempts(), 0);
}

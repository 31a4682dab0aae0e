//! Crate-level integration and BDD tests.

use std::fs;
use std::sync::Arc;

use tempfile::TempDir;

use crate::channel::Connector;
use crate::extract::ArtifactExtractor;
use crate::host::{HostParts, HostSettings, PluginHost};
use crate::launcher::Launcher;
use crate::package::PackageState;
use crate::report::HostReporter;


use self::doubles::{FakeFleet, RecordingReporter};

#[test]
fn end_to_end_discovery_and_shutdown_with_fakes() {
    let dir = TempDir::new().expect("temp dir");
    fs::write(dir.path().join("disk.watcher"), b"").expect("write candidate");
    let fleet = FakeFleet::new();
    let reporter = Arc::new(RecordingReporter::default());
    let host = PluginHost::new(
        HostSettings {
            plugin_dir: dir.path().to_path_buf(),
            ..HostSettings::default()
        },
        HostParts {
            launcher: Arc::clone(&fleet) as Arc<dyn Launcher>,
            connector: Arc::clone(&fleet) as Arc<dyn Connector>,
            extractor: Arc::clone(&fleet) as Arc<dyn ArtifactExtractor>,
            reporter: Arc::clone(&reporter) as Arc<dyn HostReporter>,
        },
    );

    let summary = host.discover_configured().expect("discover");
    assert_eq!(summary.ready, 1);
    let path = dir.path().join("disk.watcher");
    assert!(host.probe(&path).expect("probe").is_healthy());

    let report = host.shutdown();

    assert!(report.all_released());
    assert_eq!(
        host.get_package(&path).map(|package| package.state),
        Some(PackageState::Terminated)
    );
    let events = reporter.events();
    assert_eq!(
        events.first().map(String::as_str),
        Some(format!("discovery_started {}", dir.path().display()).as_str())
    );
    assert!(events.contains(&String::from("package_ready disk.watcher")));
    assert!(events.contains(&String::from("discovery_finished ready=1 failed=0")));
    assert!(events.contains(&String::from("package_torn_down disk.watcher graceful")));
}

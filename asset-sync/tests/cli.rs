use assert_cmd::Command;
use predicates::prelude::*;
use std::fs::write;
use tempfile::NamedTempFile;

/// Creates a config file with one remote asset and the given extra sync settings.
fn create_config(sync_section: &str) -> NamedTempFile {
    let config = NamedTempFile::new().expect("Creating temp config file failed");
    let yaml = format!(
        "store:\n  url: \"http://127.0.0.1:9/api\"\n{sync_section}assets:\n  - id: \"42\"\n    url: \"ipfs://bafybeigdyrzt/42.png\"\n"
    );
    write(config.path(), yaml).expect("Writing temp config failed");
    config
}

#[test]
fn help_lists_subcommands() {
    let mut cmd = Command::cargo_bin("asset-sync").expect("Binary exists");
    cmd.arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("sync").and(predicate::str::contains("list")));
}

#[test]
fn sync_fails_for_missing_config_file() {
    let mut cmd = Command::cargo_bin("asset-sync").expect("Binary exists");
    cmd.arg("sync")
        .arg("--config")
        .arg("does-not-exist.yaml")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to read config file"));
}

#[test]
fn sync_rejects_oversized_chunks_before_contacting_store() {
    let config = create_config("sync:\n  chunk_size: 4194304\n");
    let mut cmd = Command::cargo_bin("asset-sync").expect("Binary exists");
    cmd.arg("sync")
        .arg("--config")
        .arg(config.path())
        .env("ASSET_STORE_TOKEN", "test-token")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invalid sync settings"));
}

#[test]
fn sync_requires_store_token() {
    let config = create_config("");
    let mut cmd = Command::cargo_bin("asset-sync").expect("Binary exists");
    cmd.arg("sync")
        .arg("--config")
        .arg(config.path())
        .env_remove("ASSET_STORE_TOKEN")
        .assert()
        .failure()
        .stderr(predicate::str::contains("ASSET_STORE_TOKEN missing"));
}

#[test]
fn list_retries_unreachable_store_before_failing() {
    let config = create_config("sync:\n  retry:\n    max_attempts: 2\n    base_delay_ms: 1\n");
    let mut cmd = Command::cargo_bin("asset-sync").expect("Binary exists");
    cmd.arg("list")
        .arg("--config")
        .arg(config.path())
        .env("ASSET_STORE_TOKEN", "test-token")
        .env("RUST_LOG", "info")
        .assert()
        .failure()
        .stderr(
            predicate::str::contains("[RETRY] Transient failure")
                .and(predicate::str::contains("Listing assets failed")),
        );
}

#[test]
fn list_rejects_invalid_retry_settings() {
    let config = create_config("sync:\n  retry:\n    max_attempts: 80\n");
    let mut cmd = Command::cargo_bin("asset-sync").expect("Binary exists");
    cmd.arg("list")
        .arg("--config")
        .arg(config.path())
        .env("ASSET_STORE_TOKEN", "test-token")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invalid sync settings"));
}

use std::sync::{Arc, Mutex};
use tracing_subscriber::prelude::*; // needed for .with()
use tracing_subscriber::{layer::Context, Layer, Registry};

/// Custom Layer to collect emitted event messages.
struct EventCollector {
    events: Arc<Mutex<Vec<String>>>,
}

impl<S> Layer<S> for EventCollector
where
    S: tracing::Subscriber,
{
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
        self.events.lock().unwrap().push(format!("{:?}", event));
    }
}

#[tokio::test]
async fn emits_trace_initialised_event() {
    let events = Arc::new(Mutex::new(Vec::new()));
    let collector = EventCollector {
        events: events.clone(),
    };
    let subscriber = Registry::default().with(collector);
    let _guard = tracing::subscriber::set_default(subscriber);

    use asset_sync::cli::{run, Cli, Commands};

    // A missing config still gets as far as the first trace event.
    let cli = Cli {
        command: Commands::List {
            config: std::path::PathBuf::from("dummy.yaml"),
        },
    };

    let result = run(cli).await;
    assert!(result.is_err());

    let event_msgs = events.lock().unwrap();
    assert!(
        event_msgs.iter().any(|msg| msg.contains("trace_initialised")),
        "Expected a 'trace_initialised' trace event, got: {:?}",
        event_msgs
    );
}

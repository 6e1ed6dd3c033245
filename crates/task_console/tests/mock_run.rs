use std::sync::Arc;

use task_console::config::{EnvConfig, ProfileChoice};
use task_console::console::{build_client, print_until_done, RunOutcome};
use task_stream::{ChannelObserver, TaskState};

fn mock_config() -> EnvConfig {
    EnvConfig {
        base_url: String::new(),
        profile: ProfileChoice::Mock,
        timeout: None,
        log_filter: "info".to_string(),
    }
}

#[tokio::test(start_paused = true)]
async fn mock_profile_prints_the_demo_run() {
    let (observer, mut events) = ChannelObserver::channel();
    let client = build_client(&mock_config(), Arc::new(observer)).expect("mock client");
    client
        .start_command("/index/query files")
        .await
        .expect("start");

    let mut out = Vec::new();
    let outcome = print_until_done(&mut events, &mut out).await.expect("print");
    let printed = String::from_utf8(out).expect("utf8");
    let lines: Vec<&str> = printed.lines().collect();

    assert_eq!(outcome, RunOutcome::Completed { has_error: false });
    assert!(lines.contains(&"Command: /index/query"));
    assert!(lines.contains(&"The index covers 42 files. Two were updated and one removed."));
    assert_eq!(lines.last().copied(), Some("[done] completed"));
    assert_eq!(client.task_state(), TaskState::Completed);
}

#[tokio::test(start_paused = true)]
async fn closing_the_client_abandons_the_printer() {
    let (observer, mut events) = ChannelObserver::channel();
    let client = build_client(&mock_config(), Arc::new(observer)).expect("mock client");
    client.start_command("go").await.expect("start");

    drop(client);
    let mut out = Vec::new();
    let outcome = print_until_done(&mut events, &mut out).await.expect("print");

    assert_eq!(outcome, RunOutcome::Abandoned);
}

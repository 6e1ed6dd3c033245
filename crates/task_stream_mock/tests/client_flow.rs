use std::sync::{Arc, Mutex, OnceLock, Weak};
use std::time::Duration;

use pretty_assertions::assert_eq;
use serde_json::json;
use task_stream::{
    ChannelObserver, ClientError, ClientEvent, ConnectionState, EventKind, EventStreamClient,
    Message, ReconnectPolicy, ServiceProfile, TaskObserver, TaskState, TransportError,
};
use task_stream_mock::{frames, ConnectionScript, ScriptStep, ScriptedTaskApi, ScriptedTransport};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::{sleep, timeout, Instant};

struct Harness {
    client: EventStreamClient,
    api: Arc<ScriptedTaskApi>,
    transport: Arc<ScriptedTransport>,
    events: UnboundedReceiver<ClientEvent>,
}

impl Harness {
    fn new(profile: ServiceProfile, scripts: Vec<ConnectionScript>) -> Self {
        Self::with_api(profile, scripts, ScriptedTaskApi::new())
    }

    fn with_api(profile: ServiceProfile, scripts: Vec<ConnectionScript>, api: ScriptedTaskApi) -> Self {
        let api = Arc::new(api);
        let transport = Arc::new(ScriptedTransport::new(scripts));
        let (observer, events) = ChannelObserver::channel();
        let client = EventStreamClient::new(
            profile,
            api.clone(),
            transport.clone(),
            Arc::new(observer),
        );
        Self {
            client,
            api,
            transport,
            events,
        }
    }

    async fn next_event(&mut self) -> Option<ClientEvent> {
        timeout(Duration::from_secs(60), self.events.recv())
            .await
            .ok()
            .flatten()
    }

    /// Everything up to and including the first terminal client event.
    async fn run_to_end(&mut self) -> Vec<ClientEvent> {
        let mut seen = Vec::new();
        while let Some(event) = self.next_event().await {
            let terminal = event.is_terminal();
            seen.push(event);
            if terminal {
                break;
            }
        }
        seen
    }

    async fn next_message(&mut self) -> Message {
        match self.next_event().await {
            Some(ClientEvent::Message(message)) => message,
            other => panic!("expected a message, got {other:?}"),
        }
    }

    fn assert_quiet(&mut self) {
        assert!(
            self.events.try_recv().is_err(),
            "no further client events expected"
        );
    }
}

fn finalized(events: &[ClientEvent]) -> Vec<&Message> {
    events
        .iter()
        .filter_map(|event| match event {
            ClientEvent::Message(message) if !message.is_streaming => Some(message),
            _ => None,
        })
        .collect()
}

fn completions(events: &[ClientEvent]) -> Vec<bool> {
    events
        .iter()
        .filter_map(|event| match event {
            ClientEvent::TaskComplete { has_error } => Some(*has_error),
            _ => None,
        })
        .collect()
}

#[tokio::test(start_paused = true)]
async fn streamed_run_then_result_then_completion() {
    let mut harness = Harness::new(
        ServiceProfile::auto_command(),
        vec![ConnectionScript::frames_then_hold([
            frames::stream("e1", "Hel", "content", 0),
            frames::stream("e2", "lo", "complete", 1),
            frames::result_text("e3", "done"),
            frames::completion("e4", "completed"),
        ])],
    );

    let handle = harness.client.start_command("/chat hi").await.expect("start");
    assert_eq!(harness.client.handle(), Some(handle));

    let events = harness.run_to_end().await;

    let done = finalized(&events);
    assert_eq!(done.len(), 3);
    assert_eq!(done[0].content, "Hello");
    assert_eq!(done[1].kind, EventKind::Result);
    assert_eq!(done[1].content, "done");
    assert_ne!(done[0].id, done[1].id);
    assert_eq!(done[2].kind, EventKind::Completion);
    assert_eq!(completions(&events), vec![false]);
    assert!(matches!(events.last(), Some(ClientEvent::TaskComplete { .. })));

    assert_eq!(harness.client.task_state(), TaskState::Completed);
    assert_eq!(harness.client.connection_state(), ConnectionState::Closed);
    assert_eq!(harness.client.handle(), None);
    assert_eq!(harness.api.started()[0].command, "/chat hi");
}

#[tokio::test(start_paused = true)]
async fn remote_error_completes_with_error_after_settling_delay() {
    let mut harness = Harness::new(
        ServiceProfile::auto_command(),
        vec![ConnectionScript::frames_then_hold([frames::error(
            "e1", "boom",
        )])],
    );
    harness.client.start_command("/index/build").await.expect("start");

    let message = harness.next_message().await;
    let message_at = Instant::now();
    assert_eq!(message.kind, EventKind::Error);
    assert_eq!(message.content, "boom");
    assert_eq!(harness.client.task_state(), TaskState::Completing { has_error: true });

    let next = harness.next_event().await;
    assert_eq!(next, Some(ClientEvent::TaskComplete { has_error: true }));
    assert!(message_at.elapsed() >= Duration::from_millis(300));
    assert_eq!(harness.client.task_state(), TaskState::Failed);

    sleep(Duration::from_secs(30)).await;
    harness.assert_quiet();
}

#[tokio::test(start_paused = true)]
async fn task_complete_fires_once_for_the_first_terminal_event() {
    let mut harness = Harness::new(
        ServiceProfile::auto_command(),
        vec![ConnectionScript::frames_then_hold([
            frames::error("e1", "first"),
            frames::completion("e2", "late completion"),
            frames::error("e3", "second"),
        ])],
    );
    harness.client.start_command("go").await.expect("start");

    let events = harness.run_to_end().await;

    assert_eq!(completions(&events), vec![true]);
    let contents: Vec<&str> = finalized(&events)
        .iter()
        .map(|message| message.content.as_str())
        .collect();
    assert_eq!(contents, vec!["first", "late completion", "second"]);

    sleep(Duration::from_secs(30)).await;
    harness.assert_quiet();
}

#[tokio::test(start_paused = true)]
async fn reconnect_after_two_failures_abandons_partial_stream() {
    let mut harness = Harness::new(
        ServiceProfile::agentic_edit(),
        vec![
            ConnectionScript::Steps(vec![
                ScriptStep::frame(frames::stream("e1", "Hel", "content", 0)),
                ScriptStep::drop_after(Duration::from_millis(10), "connection reset"),
            ]),
            ConnectionScript::Refuse("server restarting".to_owned()),
            ConnectionScript::frames_then_hold([
                frames::stream("e2", "again", "complete", 0),
                frames::completion("e3", "completed"),
            ]),
        ],
    );
    harness.client.start_command("edit").await.expect("start");

    let partial = harness.next_message().await;
    assert!(partial.is_streaming);
    assert_eq!(partial.content, "Hel");

    let events = harness.run_to_end().await;

    assert!(events
        .iter()
        .all(|event| !matches!(event, ClientEvent::ConnectionError(_))));
    let done = finalized(&events);
    assert_eq!(done.len(), 2);
    assert_eq!(done[0].content, "again");
    assert_ne!(done[0].id, partial.id);
    assert!(done.iter().all(|message| message.content != "Hel"));
    assert_eq!(completions(&events), vec![false]);
    assert_eq!(harness.transport.opens(), 3);
}

#[tokio::test(start_paused = true)]
async fn reconnect_budget_exhaustion_is_reported_once() {
    let mut harness = Harness::new(ServiceProfile::auto_command(), Vec::new());
    let started_at = Instant::now();
    harness.client.start_command("go").await.expect("start");

    let events = harness.run_to_end().await;

    assert_eq!(events.len(), 1);
    let ClientEvent::ConnectionError(error) = &events[0] else {
        panic!("expected a terminal connection error, got {events:?}");
    };
    assert_eq!(error.attempts, 5);
    assert!(matches!(error.last_error, TransportError::Connect(_)));
    assert_eq!(harness.transport.opens(), 6);
    assert!(started_at.elapsed() >= Duration::from_millis(5 * 3000));
    assert_eq!(harness.client.connection_state(), ConnectionState::GaveUp);
    assert_eq!(harness.client.task_state(), TaskState::Disconnected);
    assert_eq!(harness.client.handle(), None);

    sleep(Duration::from_secs(60)).await;
    assert_eq!(harness.transport.opens(), 6);
    harness.assert_quiet();
}

#[tokio::test(start_paused = true)]
async fn cancel_during_backoff_stops_reconnecting() {
    let mut harness = Harness::new(
        ServiceProfile::auto_command(),
        vec![
            ConnectionScript::Refuse("down".to_owned()),
            ConnectionScript::Refuse("still down".to_owned()),
            ConnectionScript::frames_then_hold([frames::completion("e1", "too late")]),
        ],
    );
    let handle = harness.client.start_command("go").await.expect("start");

    timeout(Duration::from_secs(30), async {
        while !matches!(
            harness.client.connection_state(),
            ConnectionState::Reconnecting { attempt: 2, .. }
        ) {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("second reconnect should be scheduled");

    harness.client.cancel().await.expect("cancel");

    assert_eq!(harness.client.connection_state(), ConnectionState::Closed);
    assert_eq!(harness.client.task_state(), TaskState::Cancelled);
    assert_eq!(harness.api.cancels(), vec![handle]);

    sleep(Duration::from_secs(60)).await;
    assert_eq!(harness.transport.opens(), 2);
    harness.assert_quiet();
}

#[tokio::test(start_paused = true)]
async fn cancel_mid_stream_suppresses_later_messages() {
    let mut harness = Harness::new(
        ServiceProfile::auto_command(),
        vec![ConnectionScript::Steps(vec![
            ScriptStep::frame(frames::stream("e1", "a", "content", 0)),
            ScriptStep::frame_after(Duration::from_secs(1), frames::stream("e2", "b", "content", 1)),
            ScriptStep::frame_after(Duration::from_secs(1), frames::completion("e3", "done")),
            ScriptStep::Hold,
        ])],
    );
    harness.client.start_command("go").await.expect("start");
    harness.next_message().await;

    harness.client.cancel().await.expect("cancel");
    assert!(harness.client.cancel().await.is_err());

    sleep(Duration::from_secs(10)).await;
    harness.assert_quiet();
    assert_eq!(harness.client.task_state(), TaskState::Cancelled);
}

#[tokio::test(start_paused = true)]
async fn close_while_settling_suppresses_task_complete() {
    let mut harness = Harness::new(
        ServiceProfile::auto_command(),
        vec![ConnectionScript::frames_then_hold([frames::completion(
            "e1", "done",
        )])],
    );
    harness.client.start_command("go").await.expect("start");

    let message = harness.next_message().await;
    assert!(message.is_terminal());
    assert!(harness.client.close());
    assert!(!harness.client.close());

    sleep(Duration::from_secs(5)).await;
    harness.assert_quiet();
    assert_eq!(harness.client.task_state(), TaskState::Cancelled);
    assert!(harness.api.cancels().is_empty());
}

#[tokio::test(start_paused = true)]
async fn stream_ending_while_settling_does_not_reconnect() {
    let mut harness = Harness::new(
        ServiceProfile::auto_command(),
        vec![ConnectionScript::Steps(vec![ScriptStep::frame(
            frames::completion("e1", "done"),
        )])],
    );
    harness.client.start_command("go").await.expect("start");

    let events = harness.run_to_end().await;

    assert_eq!(completions(&events), vec![false]);
    assert_eq!(harness.transport.opens(), 1);
    assert_eq!(harness.client.connection_state(), ConnectionState::Closed);
}

#[tokio::test(start_paused = true)]
async fn undecodable_frames_are_skipped_without_reconnecting() {
    let mut harness = Harness::new(
        ServiceProfile::auto_command(),
        vec![ConnectionScript::frames_then_hold([
            "{broken".to_owned(),
            r#"{"error":"queue read failed"}"#.to_owned(),
            frames::result_text("e1", "still here"),
            frames::completion("e2", "done"),
        ])],
    );
    harness.client.start_command("go").await.expect("start");

    let events = harness.run_to_end().await;

    let contents: Vec<&str> = finalized(&events)
        .iter()
        .map(|message| message.content.as_str())
        .collect();
    assert_eq!(contents, vec!["still here", "done"]);
    assert_eq!(harness.transport.opens(), 1);
}

#[tokio::test(start_paused = true)]
async fn ask_user_answer_is_submitted_against_the_live_handle() {
    let mut harness = Harness::new(
        ServiceProfile::auto_command(),
        vec![ConnectionScript::Steps(vec![
            ScriptStep::frame(frames::ask_user("e1", "Apply changes?", &["yes", "no"])),
            ScriptStep::frame_after(Duration::from_secs(1), frames::completion("e2", "applied")),
            ScriptStep::Hold,
        ])],
    );
    let handle = harness.client.start_command("go").await.expect("start");

    let prompt = harness.next_message().await;
    assert_eq!(prompt.kind, EventKind::AskUser);
    assert_eq!(prompt.options, Some(vec!["yes".to_owned(), "no".to_owned()]));
    harness
        .client
        .respond(&prompt.event_id, "yes")
        .await
        .expect("respond");

    harness.run_to_end().await;
    let late = harness.client.respond("e1", "no").await;

    assert_eq!(
        harness.api.responses(),
        vec![(handle, "e1".to_owned(), "yes".to_owned())]
    );
    assert!(matches!(late, Err(ClientError::NoActiveRun)));
}

#[tokio::test(start_paused = true)]
async fn failed_start_leaves_client_idle() {
    let mut harness = Harness::with_api(
        ServiceProfile::auto_command(),
        Vec::new(),
        ScriptedTaskApi::failing_start("no project loaded"),
    );

    let error = harness
        .client
        .start_command("go")
        .await
        .expect_err("start should fail");

    assert!(matches!(error, ClientError::Start(_)));
    assert!(error.to_string().contains("no project loaded"));
    assert_eq!(harness.client.task_state(), TaskState::Idle);
    assert_eq!(harness.transport.opens(), 0);
    harness.assert_quiet();
}

#[tokio::test(start_paused = true)]
async fn starting_a_new_run_force_closes_the_previous_one() {
    let mut harness = Harness::new(
        ServiceProfile::auto_command(),
        vec![
            ConnectionScript::Steps(vec![
                ScriptStep::frame(frames::stream("a1", "first run", "content", 0)),
                ScriptStep::frame_after(Duration::from_secs(1), frames::stream("a2", " late", "content", 1)),
                ScriptStep::Hold,
            ]),
            ConnectionScript::frames_then_hold([frames::completion("b1", "second run")]),
        ],
    );
    harness.client.start_command("one").await.expect("start");
    let first = harness.next_message().await;
    assert_eq!(first.content, "first run");

    let second = harness.client.start_command("two").await.expect("start");

    let events = harness.run_to_end().await;
    let contents: Vec<&str> = finalized(&events)
        .iter()
        .map(|message| message.content.as_str())
        .collect();
    assert_eq!(contents, vec!["second run"]);
    assert!(events.iter().all(|event| match event {
        ClientEvent::Message(message) => message.content != "first run late",
        _ => true,
    }));
    assert_eq!(second.as_str(), "mock-run-2");
    assert_eq!(harness.transport.opens(), 2);
}

#[tokio::test(start_paused = true)]
async fn remote_cancel_failure_still_closes_locally() {
    let mut harness = Harness::with_api(
        ServiceProfile::auto_command(),
        vec![ConnectionScript::frames_then_hold([frames::stream(
            "e1", "working", "content", 0,
        )])],
        ScriptedTaskApi::new().with_cancel_failure("already finished"),
    );
    harness.client.start_command("go").await.expect("start");
    harness.next_message().await;

    let result = harness.client.cancel().await;

    assert!(matches!(result, Err(ClientError::Cancel(_))));
    assert_eq!(harness.client.connection_state(), ConnectionState::Closed);
    assert_eq!(harness.client.handle(), None);
}

#[tokio::test(start_paused = true)]
async fn coding_profile_reports_result_summary_on_completion() {
    let completion = json!({
        "event_id": "e1",
        "event_type": "COMPLETION",
        "timestamp": 0,
        "content": {
            "success_code": 200,
            "success_message": "completed",
            "result": {"summary": "Edited 2 files"},
            "completion_time": 1.0
        }
    })
    .to_string();
    let mut harness = Harness::new(
        ServiceProfile::coding().with_reconnect(ReconnectPolicy::new(1, Duration::from_millis(100))),
        vec![ConnectionScript::frames_then_hold([completion])],
    );
    harness.client.start_command("write tests").await.expect("start");

    let message = harness.next_message().await;
    let message_at = Instant::now();
    assert_eq!(message.content, "Edited 2 files");
    assert!(message.id.starts_with("coding-"));

    assert_eq!(
        harness.next_event().await,
        Some(ClientEvent::TaskComplete { has_error: false })
    );
    assert!(message_at.elapsed() >= Duration::from_millis(300));
    assert!(message_at.elapsed() < Duration::from_millis(1000));
}

#[tokio::test(start_paused = true)]
async fn error_with_plain_text_details_still_ends_the_run() {
    let error = json!({
        "event_id": "e1",
        "event_type": "ERROR",
        "timestamp": 0,
        "content": {
            "error_code": 500,
            "error_message": "model unavailable",
            "details": "upstream returned 503"
        }
    })
    .to_string();
    let mut harness = Harness::new(
        ServiceProfile::auto_command(),
        vec![ConnectionScript::frames_then_hold([error])],
    );
    harness.client.start_command("go").await.expect("start");

    let message = harness.next_message().await;
    assert_eq!(message.kind, EventKind::Error);
    assert_eq!(message.content, "model unavailable");
    assert_eq!(
        message.metadata.as_ref().and_then(|metadata| metadata.get("details")),
        Some(&json!("upstream returned 503"))
    );

    assert_eq!(
        harness.next_event().await,
        Some(ClientEvent::TaskComplete { has_error: true })
    );
    assert_eq!(harness.client.task_state(), TaskState::Failed);
}

/// Closes its client from inside the first callback.
#[derive(Default)]
struct CloseOnFirstMessage {
    client: OnceLock<Weak<EventStreamClient>>,
    seen: Mutex<Vec<String>>,
}

impl TaskObserver for CloseOnFirstMessage {
    fn on_message(&self, message: Message) {
        let mut seen = self.seen.lock().expect("seen");
        seen.push(message.content);
        if seen.len() == 1 {
            if let Some(client) = self.client.get().and_then(Weak::upgrade) {
                client.close();
            }
        }
    }

    fn on_task_complete(&self, _has_error: bool) {
        self.seen.lock().expect("seen").push("<complete>".to_owned());
    }
}

#[tokio::test(start_paused = true)]
async fn closing_from_a_callback_stops_delivery_immediately() {
    let observer = Arc::new(CloseOnFirstMessage::default());
    let transport = Arc::new(ScriptedTransport::new(vec![ConnectionScript::frames_then_hold([
        frames::result_text("e1", "first"),
        frames::result_text("e2", "second"),
        frames::completion("e3", "done"),
    ])]));
    let client = Arc::new(EventStreamClient::new(
        ServiceProfile::auto_command(),
        Arc::new(ScriptedTaskApi::new()),
        transport,
        observer.clone(),
    ));
    observer
        .client
        .set(Arc::downgrade(&client))
        .expect("client set once");

    client.start_command("go").await.expect("start");
    sleep(Duration::from_secs(30)).await;

    assert_eq!(*observer.seen.lock().expect("seen"), vec!["first".to_owned()]);
    assert_eq!(client.task_state(), TaskState::Cancelled);
    assert_eq!(client.connection_state(), ConnectionState::Closed);
}

//! Activity state machine scenarios

use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use timelapser::activity::fsm::{ActivityStateMachine, CaptureCommand, MonitorState};
use timelapser::activity::ignore::IgnoreRuleSet;
use timelapser::activity::monitor::{ActivityListener, ActivityMonitor};
use timelapser::activity::status::{ActivityStatus, StatusKeys};

#[derive(Debug, Clone, PartialEq)]
enum Event {
    Started(Option<String>),
    Stopped,
}

#[derive(Default)]
struct Recorder {
    events: Mutex<Vec<Event>>,
}

impl Recorder {
    fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }
}

#[async_trait]
impl ActivityListener for Recorder {
    async fn activity_started(&self, file: Option<String>) {
        self.events.lock().unwrap().push(Event::Started(file));
    }

    async fn activity_stopped(&self) {
        self.events.lock().unwrap().push(Event::Stopped);
    }
}

fn monitor(patterns: &[&str]) -> (ActivityMonitor, Arc<Recorder>) {
    let recorder = Arc::new(Recorder::default());
    let monitor = ActivityMonitor::new(recorder.clone(), IgnoreRuleSet::new(patterns));
    (monitor, recorder)
}

#[tokio::test]
async fn test_stop_after_running() {
    let (monitor, recorder) = monitor(&[]);

    monitor.handle(&ActivityStatus::running("part_a.gcode")).await;
    monitor.handle(&ActivityStatus::stopped()).await;

    assert_eq!(
        recorder.events(),
        vec![Event::Started(Some("part_a.gcode".to_string())), Event::Stopped]
    );
    assert_eq!(monitor.state(), MonitorState::Idle);
    assert_eq!(monitor.current_file(), None);
}

#[tokio::test]
async fn test_ignored_file_while_idle_does_nothing() {
    let (monitor, recorder) = monitor(&["draft"]);

    monitor.handle(&ActivityStatus::running("draft_v2.txt")).await;

    assert!(recorder.events().is_empty());
    assert_eq!(monitor.state(), MonitorState::Ignored);

    // The ignored run ending is not a stop either
    monitor.handle(&ActivityStatus::stopped()).await;
    assert!(recorder.events().is_empty());
}

#[tokio::test]
async fn test_ignored_file_while_capturing_stops() {
    let (monitor, recorder) = monitor(&["^draft"]);

    monitor.handle(&ActivityStatus::running("final.txt")).await;
    monitor.handle(&ActivityStatus::running("draft_v3.txt")).await;

    assert_eq!(
        recorder.events(),
        vec![Event::Started(Some("final.txt".to_string())), Event::Stopped]
    );
    assert_eq!(monitor.state(), MonitorState::Ignored);
}

#[tokio::test]
async fn test_file_change_restarts_capture() {
    let (monitor, recorder) = monitor(&[]);

    monitor.handle(&ActivityStatus::running("a.txt")).await;
    monitor.handle(&ActivityStatus::running("a.txt")).await;
    monitor.handle(&ActivityStatus::running("b.txt")).await;

    assert_eq!(
        recorder.events(),
        vec![
            Event::Started(Some("a.txt".to_string())),
            Event::Stopped,
            Event::Started(Some("b.txt".to_string())),
        ]
    );
    assert_eq!(monitor.current_file().as_deref(), Some("b.txt"));
}

#[tokio::test]
async fn test_updated_patterns_apply_to_next_status() {
    let (monitor, recorder) = monitor(&[]);

    monitor.set_ignored_patterns(&["\\.tmp$".to_string()]);
    assert_eq!(monitor.ignored_patterns(), vec!["\\.tmp$".to_string()]);

    monitor.handle(&ActivityStatus::running("scratch.tmp")).await;
    assert!(recorder.events().is_empty());

    monitor.handle(&ActivityStatus::running("real.txt")).await;
    assert_eq!(recorder.events(), vec![Event::Started(Some("real.txt".to_string()))]);
}

/// The same sequence gives the same commands whichever transport parsed it
#[test]
fn test_transport_equivalence() {
    let keys = StatusKeys::default();
    let payloads = [
        serde_json::json!({"is_running": true, "current_file": "x.txt"}),
        serde_json::json!({"is_running": true, "current_file": "y.txt"}),
        serde_json::json!({"is_running": false}),
    ];
    let from_json: Vec<ActivityStatus> = payloads
        .iter()
        .map(|p| ActivityStatus::from_json(p, &keys))
        .collect();
    let direct = vec![
        ActivityStatus::running("x.txt"),
        ActivityStatus::running("y.txt"),
        ActivityStatus::stopped(),
    ];

    let rules = IgnoreRuleSet::default();
    let run = |statuses: &[ActivityStatus]| {
        let mut machine = ActivityStateMachine::new();
        statuses
            .iter()
            .flat_map(|s| machine.process(s, &rules))
            .collect::<Vec<_>>()
    };

    let expected = vec![
        CaptureCommand::Start {
            file: Some("x.txt".to_string()),
        },
        CaptureCommand::Stop,
        CaptureCommand::Start {
            file: Some("y.txt".to_string()),
        },
        CaptureCommand::Stop,
    ];
    assert_eq!(run(&from_json), expected);
    assert_eq!(run(&direct), expected);
}

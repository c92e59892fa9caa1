mod common;

use chrono::Utc;

use common::{par, seq, Event, Recorder};
use plan_autostart::config::FailurePolicy;
use plan_autostart::error::AutostartError;
use plan_autostart::queue::{resume_queue, start_queue, AutostartQueue};
use plan_autostart::types::{QueueState, QueueStatus, ScheduleGroup, TaskOutcome};

fn start(groups: Vec<ScheduleGroup>) -> (AutostartQueue, Recorder) {
    let recorder = Recorder::new();
    let queue = start_queue(groups, recorder.start_fn(), recorder.state_fn());
    (queue, recorder)
}

fn start_with(groups: Vec<ScheduleGroup>, policy: FailurePolicy) -> (AutostartQueue, Recorder) {
    let recorder = Recorder::new();
    let queue =
        AutostartQueue::start_with_policy(groups, policy, recorder.start_fn(), recorder.state_fn());
    (queue, recorder)
}

/// Answers every start with an immediate success until nothing new starts.
fn drive_to_completion(queue: &mut AutostartQueue, recorder: &Recorder) {
    let mut signalled = 0;
    loop {
        let started = recorder.started();
        if signalled == started.len() {
            break;
        }
        for id in &started[signalled..] {
            queue.on_task_terminal(id, TaskOutcome::Succeeded);
        }
        signalled = started.len();
    }
}

fn saved_state(
    status: QueueStatus,
    cursor: usize,
    groups: Vec<ScheduleGroup>,
    completed: &[&str],
) -> QueueState {
    QueueState {
        status,
        cursor,
        groups,
        completed_task_ids: completed.iter().map(|s| s.to_string()).collect(),
        updated_at: Utc::now(),
        paused_by_task_id: None,
        failed_task_ids: Vec::new(),
    }
}

// --- End to end ---

#[test]
fn sequential_then_parallel_batch_runs_to_completion() {
    let (mut queue, rec) = start(vec![seq(&["A", "B"]), par(&["C", "D"])]);
    assert_eq!(rec.started(), vec!["A"]);
    assert_eq!(queue.state().cursor, 0);

    queue.on_task_terminal("A", TaskOutcome::Succeeded);
    assert_eq!(rec.started(), vec!["A", "B"]);
    assert_eq!(queue.state().cursor, 0);

    queue.on_task_terminal("B", TaskOutcome::Succeeded);
    assert_eq!(queue.state().cursor, 1);
    assert_eq!(rec.started(), vec!["A", "B", "C", "D"]);

    queue.on_task_terminal("C", TaskOutcome::Succeeded);
    assert_eq!(queue.state().cursor, 1);
    assert!(!queue.is_completed());

    queue.on_task_terminal("D", TaskOutcome::Succeeded);
    assert_eq!(queue.state().cursor, 2);
    assert_eq!(queue.state().status, QueueStatus::Completed);
    assert!(queue.is_completed());
    assert_eq!(queue.state().completed_task_ids, vec!["A", "B", "C", "D"]);
}

#[test]
fn every_shape_runs_to_completion_with_each_task_once() {
    let shapes: Vec<Vec<ScheduleGroup>> = vec![
        vec![],
        vec![seq(&["a"])],
        vec![par(&["a"])],
        vec![seq(&["a", "b", "c"])],
        vec![par(&["a", "b", "c", "d"])],
        vec![par(&["a", "b"]), seq(&["c"]), par(&["d", "e", "f"])],
        vec![seq(&["a"]), seq(&["b"]), seq(&["c"]), par(&["d", "e"])],
    ];

    for groups in shapes {
        let mut expected: Vec<String> = groups
            .iter()
            .flat_map(|g| g.tasks.iter().map(|t| t.id.clone()))
            .collect();
        let group_count = groups.len();

        let (mut queue, rec) = start(groups);
        drive_to_completion(&mut queue, &rec);

        let state = queue.state();
        assert_eq!(state.status, QueueStatus::Completed);
        assert_eq!(state.cursor, group_count);

        let mut completed = state.completed_task_ids.clone();
        completed.sort();
        expected.sort();
        assert_eq!(completed, expected);

        let mut started = rec.started();
        started.sort();
        assert_eq!(started, expected, "each task started exactly once");
    }
}

// --- Group modes ---

#[test]
fn sequential_group_waits_for_each_task() {
    let (mut queue, rec) = start(vec![seq(&["a", "b", "c"])]);
    assert_eq!(rec.started(), vec!["a"]);

    queue.on_task_terminal("a", TaskOutcome::Succeeded);
    assert_eq!(rec.started(), vec!["a", "b"]);

    queue.on_task_terminal("b", TaskOutcome::Succeeded);
    assert_eq!(rec.started(), vec!["a", "b", "c"]);
}

#[test]
fn parallel_group_starts_everything_up_front() {
    let (_queue, rec) = start(vec![par(&["a", "b", "c", "d"])]);
    assert_eq!(rec.started(), vec!["a", "b", "c", "d"]);
}

#[test]
fn success_for_task_in_later_group_is_ignored() {
    // Signals only count for the current group.
    let (mut queue, rec) = start(vec![seq(&["a"]), seq(&["b"])]);
    queue.on_task_terminal("b", TaskOutcome::Succeeded);
    assert!(queue.state().completed_task_ids.is_empty());
    assert_eq!(rec.started(), vec!["a"]);
}

#[test]
fn early_success_within_sequential_group_skips_that_task() {
    // Completion is tracked per group, not per position: b finishing before a
    // counts, so b is never started once a is done.
    let (mut queue, rec) = start(vec![seq(&["a", "b", "c"])]);
    queue.on_task_terminal("b", TaskOutcome::Succeeded);
    assert_eq!(queue.state().completed_task_ids, vec!["b"]);
    assert_eq!(rec.started(), vec!["a"]);

    queue.on_task_terminal("a", TaskOutcome::Succeeded);
    assert_eq!(rec.started(), vec!["a", "c"]);

    queue.on_task_terminal("c", TaskOutcome::Succeeded);
    assert!(queue.is_completed());
}

#[test]
fn duplicate_success_signal_is_a_no_op() {
    let (mut queue, rec) = start(vec![par(&["a", "b"])]);
    queue.on_task_terminal("a", TaskOutcome::Succeeded);
    let events_before = rec.events().len();

    queue.on_task_terminal("a", TaskOutcome::Succeeded);
    assert_eq!(rec.events().len(), events_before);
    assert_eq!(queue.state().completed_task_ids, vec!["a"]);
}

#[test]
fn late_failure_for_completed_task_does_not_pause() {
    let (mut queue, rec) = start(vec![par(&["a", "b"])]);
    queue.on_task_terminal("a", TaskOutcome::Succeeded);
    let events_before = rec.events().len();

    queue.on_task_terminal("a", TaskOutcome::Failed);
    assert!(!queue.is_paused());
    assert!(queue.state().paused_by_task_id.is_none());
    assert_eq!(queue.state().completed_task_ids, vec!["a"]);
    assert_eq!(rec.events().len(), events_before);

    queue.on_task_terminal("b", TaskOutcome::Succeeded);
    assert!(queue.is_completed());
}

#[test]
fn unknown_task_signal_is_ignored() {
    let (mut queue, rec) = start(vec![seq(&["a"])]);
    let events_before = rec.events().len();
    queue.on_task_terminal("zzz", TaskOutcome::Failed);
    assert_eq!(rec.events().len(), events_before);
    assert!(!queue.is_paused());
}

// --- Pause / resume ---

#[test]
fn pause_records_completion_but_starts_nothing_until_resume() {
    let (mut queue, rec) = start(vec![seq(&["a", "b"])]);
    queue.pause(None);
    assert!(queue.is_paused());

    queue.on_task_terminal("a", TaskOutcome::Succeeded);
    assert_eq!(queue.state().completed_task_ids, vec!["a"]);
    assert_eq!(rec.started(), vec!["a"]);
    assert!(queue.is_paused());

    queue.resume();
    assert!(!queue.is_paused());
    assert_eq!(rec.started(), vec!["a", "b"]);
}

#[test]
fn pause_is_idempotent() {
    let (mut queue, rec) = start(vec![seq(&["a"])]);
    queue.pause(Some("a"));
    let events_before = rec.events().len();

    queue.pause(None);
    assert_eq!(rec.events().len(), events_before);
    assert_eq!(queue.state().paused_by_task_id.as_deref(), Some("a"));
}

#[test]
fn resume_when_running_or_completed_is_a_no_op() {
    let (mut queue, rec) = start(vec![seq(&["a"])]);
    let events_before = rec.events().len();
    queue.resume();
    assert_eq!(rec.events().len(), events_before);

    queue.on_task_terminal("a", TaskOutcome::Succeeded);
    assert!(queue.is_completed());
    let events_before = rec.events().len();
    queue.resume();
    queue.pause(None);
    assert_eq!(rec.events().len(), events_before);
    assert!(queue.is_completed());
}

#[test]
fn resume_advances_past_group_finished_while_paused() {
    let (mut queue, rec) = start(vec![par(&["a", "b"]), seq(&["c"])]);
    queue.pause(None);
    queue.on_task_terminal("a", TaskOutcome::Succeeded);
    queue.on_task_terminal("b", TaskOutcome::Succeeded);
    assert_eq!(queue.state().cursor, 0);

    queue.resume();
    assert_eq!(queue.state().cursor, 1);
    assert_eq!(rec.started(), vec!["a", "b", "c"]);
}

// --- Failure policy ---

#[test]
fn failure_pauses_queue_and_records_trigger() {
    let (mut queue, rec) = start(vec![seq(&["a", "b"])]);
    queue.on_task_terminal("a", TaskOutcome::Failed);

    assert!(queue.is_paused());
    assert_eq!(queue.state().paused_by_task_id.as_deref(), Some("a"));
    assert!(queue.state().completed_task_ids.is_empty());
    assert_eq!(rec.started(), vec!["a"]);
}

#[test]
fn resume_after_failure_retries_failed_task() {
    let (mut queue, rec) = start(vec![seq(&["a", "b"])]);
    queue.on_task_terminal("a", TaskOutcome::Failed);
    queue.resume();

    assert_eq!(rec.started(), vec!["a", "a"]);
    assert_eq!(queue.state().paused_by_task_id, None);
}

#[test]
fn parallel_failure_pauses_and_siblings_still_record() {
    let (mut queue, rec) = start(vec![par(&["a", "b"]), seq(&["c"])]);
    queue.on_task_terminal("a", TaskOutcome::Failed);
    queue.on_task_terminal("b", TaskOutcome::Succeeded);
    assert!(queue.is_paused());
    assert_eq!(queue.state().completed_task_ids, vec!["b"]);

    queue.resume();
    assert_eq!(rec.started(), vec!["a", "b", "a"]);

    queue.on_task_terminal("a", TaskOutcome::Succeeded);
    assert_eq!(rec.started(), vec!["a", "b", "a", "c"]);
}

#[test]
fn continue_policy_settles_failed_task_and_moves_on() {
    let (mut queue, rec) = start_with(vec![seq(&["a", "b"])], FailurePolicy::Continue);
    queue.on_task_terminal("a", TaskOutcome::Failed);

    assert!(!queue.is_paused());
    assert_eq!(queue.state().failed_task_ids, vec!["a"]);
    assert_eq!(rec.started(), vec!["a", "b"]);

    queue.on_task_terminal("b", TaskOutcome::Succeeded);
    assert!(queue.is_completed());
    assert_eq!(queue.state().completed_task_ids, vec!["b"]);
}

// --- State change hook ---

#[test]
fn state_is_reported_before_tasks_start() {
    let (mut queue, rec) = start(vec![seq(&["a"]), par(&["b", "c"])]);
    match rec.events().as_slice() {
        [Event::State(s), Event::Started(id)] => {
            assert_eq!(s.status, QueueStatus::Running);
            assert_eq!(s.cursor, 0);
            assert_eq!(id, "a");
        }
        other => panic!("unexpected events: {:?}", other),
    }

    rec.clear();
    queue.on_task_terminal("a", TaskOutcome::Succeeded);
    let events = rec.events();
    assert_eq!(events.len(), 3, "one state change, two starts: {:?}", events);
    match &events[0] {
        Event::State(s) => {
            assert_eq!(s.cursor, 1);
            assert_eq!(s.completed_task_ids, vec!["a"]);
        }
        other => panic!("expected state first, got {:?}", other),
    }
    assert_eq!(events[1], Event::Started("b".to_string()));
    assert_eq!(events[2], Event::Started("c".to_string()));
}

#[test]
fn get_state_matches_last_reported_state() {
    let (mut queue, rec) = start(vec![seq(&["a", "b"]), par(&["c"])]);
    assert_eq!(Some(queue.state().clone()), rec.last_state());

    queue.on_task_terminal("a", TaskOutcome::Succeeded);
    assert_eq!(Some(queue.state().clone()), rec.last_state());

    queue.pause(Some("b"));
    assert_eq!(Some(queue.state().clone()), rec.last_state());

    queue.on_task_terminal("b", TaskOutcome::Succeeded);
    assert_eq!(Some(queue.state().clone()), rec.last_state());

    queue.resume();
    assert_eq!(Some(queue.state().clone()), rec.last_state());
}

#[test]
fn empty_schedule_completes_immediately() {
    let (queue, rec) = start(vec![]);
    assert!(queue.is_completed());
    assert_eq!(queue.state().cursor, 0);
    assert!(rec.started().is_empty());
    assert_eq!(rec.states().len(), 1);
}

// --- Resume from saved state ---

#[test]
fn resume_running_state_skips_completed_tasks() {
    let groups = vec![seq(&["a", "b"]), par(&["c", "d"])];
    let saved = saved_state(QueueStatus::Running, 1, groups, &["a", "b", "c"]);
    let rec = Recorder::new();

    let queue = resume_queue(saved, vec![], rec.start_fn(), rec.state_fn()).unwrap();
    assert_eq!(rec.started(), vec!["d"]);
    assert_eq!(queue.state().cursor, 1);
}

#[test]
fn resume_paused_state_starts_nothing() {
    let saved = saved_state(QueueStatus::Paused, 0, vec![seq(&["a", "b"])], &[]);
    let rec = Recorder::new();

    let mut queue = resume_queue(saved, vec![], rec.start_fn(), rec.state_fn()).unwrap();
    assert!(queue.is_paused());
    assert!(rec.events().is_empty());

    queue.resume();
    assert_eq!(rec.started(), vec!["a"]);
}

#[test]
fn resume_without_saved_groups_fails() {
    let saved = saved_state(QueueStatus::Running, 0, vec![], &[]);
    let rec = Recorder::new();

    let err = resume_queue(saved, vec![], rec.start_fn(), rec.state_fn()).unwrap_err();
    assert!(matches!(err, AutostartError::NoSavedQueue));
    assert_eq!(err.to_string(), "no saved import queue found to resume");
}

#[test]
fn resume_without_saved_groups_uses_given_groups() {
    let saved = saved_state(QueueStatus::Running, 0, vec![], &[]);
    let rec = Recorder::new();

    let queue = resume_queue(saved, vec![seq(&["x"])], rec.start_fn(), rec.state_fn()).unwrap();
    assert_eq!(rec.started(), vec!["x"]);
    assert_eq!(queue.state().groups.len(), 1);
}

#[test]
fn resume_prefers_saved_groups() {
    let saved = saved_state(QueueStatus::Running, 0, vec![seq(&["a"])], &[]);
    let rec = Recorder::new();

    resume_queue(saved, vec![seq(&["other"])], rec.start_fn(), rec.state_fn()).unwrap();
    assert_eq!(rec.started(), vec!["a"]);
}

#[test]
fn resume_repairs_cursor_past_the_end() {
    let saved = saved_state(QueueStatus::Running, 7, vec![seq(&["a"])], &["a"]);
    let rec = Recorder::new();

    let queue = resume_queue(saved, vec![], rec.start_fn(), rec.state_fn()).unwrap();
    assert!(queue.is_completed());
    assert_eq!(queue.state().cursor, 1);
    assert_eq!(rec.states().len(), 1, "repair is reported once");
    assert!(rec.started().is_empty());
}

#[test]
fn resume_drops_completions_from_groups_not_yet_reached() {
    let groups = vec![seq(&["a"]), seq(&["b"]), seq(&["c"])];
    let saved = saved_state(QueueStatus::Running, 1, groups, &["a", "c", "ghost", "a"]);
    let rec = Recorder::new();

    let mut queue = resume_queue(saved, vec![], rec.start_fn(), rec.state_fn()).unwrap();
    assert_eq!(queue.state().completed_task_ids, vec!["a"]);
    assert_eq!(rec.started(), vec!["b"]);
    assert_eq!(rec.last_state().unwrap().completed_task_ids, vec!["a"]);

    queue.on_task_terminal("b", TaskOutcome::Succeeded);
    assert_eq!(rec.started(), vec!["b", "c"]);
}

#[test]
fn resume_completed_state_is_inert() {
    let saved = saved_state(QueueStatus::Completed, 1, vec![seq(&["a"])], &["a"]);
    let rec = Recorder::new();

    let queue = resume_queue(saved, vec![], rec.start_fn(), rec.state_fn()).unwrap();
    assert!(queue.is_completed());
    assert!(rec.events().is_empty());
}

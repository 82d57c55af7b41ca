use super::*;

use std::{collections::VecDeque, time::Duration};

use async_trait::async_trait;
use shared::domain::JOINT_COUNT;
use tokio::sync::{broadcast, mpsc};

/// Executor double that records submissions and hands the update/cancel
/// channels to the test so goal lifecycles can be scripted.
struct Submission {
    goal: TrajectoryGoal,
    update_tx: mpsc::Sender<GoalUpdate>,
    cancel_rx: mpsc::Receiver<()>,
}

#[derive(Clone, Default)]
struct ScriptedExecutor {
    submissions: Arc<tokio::sync::Mutex<VecDeque<Submission>>>,
}

impl ScriptedExecutor {
    async fn next_submission(&self) -> Submission {
        self.submissions
            .lock()
            .await
            .pop_front()
            .expect("no goal was submitted")
    }
}

#[async_trait]
impl MotionExecutor for ScriptedExecutor {
    async fn submit(&self, goal: TrajectoryGoal) -> anyhow::Result<GoalHandle> {
        let (update_tx, update_rx) = mpsc::channel(16);
        let (cancel_tx, cancel_rx) = mpsc::channel(1);
        let id = goal.id;
        self.submissions.lock().await.push_back(Submission {
            goal,
            update_tx,
            cancel_rx,
        });
        Ok(GoalHandle::new(id, cancel_tx, update_rx))
    }
}

struct FailingExecutor;

#[async_trait]
impl MotionExecutor for FailingExecutor {
    async fn submit(&self, _goal: TrajectoryGoal) -> anyhow::Result<GoalHandle> {
        anyhow::bail!("controller unavailable")
    }
}

struct Harness {
    coordinator: Coordinator,
    executor: ScriptedExecutor,
    events: broadcast::Receiver<Outbound>,
    _favorites_dir: tempfile::TempDir,
}

async fn harness() -> Harness {
    let dir = tempfile::tempdir().expect("tempdir");
    let favorites = FavoritesStore::open(dir.path().join("favorites.txt"))
        .await
        .expect("favorites store");
    let executor = ScriptedExecutor::default();
    let (events_tx, events_rx) = broadcast::channel(64);
    let coordinator = Coordinator::new(Arc::new(executor.clone()), favorites, events_tx);
    Harness {
        coordinator,
        executor,
        events: events_rx,
        _favorites_dir: dir,
    }
}

async fn next_event(rx: &mut broadcast::Receiver<Outbound>) -> Outbound {
    tokio::time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event bus closed")
}

/// Skips ahead until an event matching the predicate arrives.
async fn event_matching<F>(rx: &mut broadcast::Receiver<Outbound>, mut predicate: F) -> Outbound
where
    F: FnMut(&ServerEvent) -> bool,
{
    loop {
        let outbound = next_event(rx).await;
        if predicate(&outbound.event) {
            return outbound;
        }
    }
}

fn positions(value: f64) -> Vec<f64> {
    vec![value; JOINT_COUNT]
}

fn values13(value: f64, duration: f64) -> Vec<f64> {
    let mut values = positions(value);
    values.push(duration);
    values
}

#[tokio::test]
async fn update_joint_applies_and_echoes_to_peers_only() {
    let mut h = harness().await;
    let a = SessionId::new();
    let b = SessionId::new();

    h.coordinator
        .handle(
            a,
            ClientRequest::UpdateJoint {
                joint_index: 0,
                position: 0.5,
            },
        )
        .await;

    let snapshot = h.coordinator.snapshot().await;
    assert_eq!(snapshot.positions.get(0), Some(0.5));
    assert!(!snapshot.is_moving);

    let outbound = next_event(&mut h.events).await;
    assert_eq!(
        outbound.event,
        ServerEvent::JointUpdated {
            joint_index: 0,
            position: 0.5
        }
    );
    assert!(!outbound.delivers_to(a));
    assert!(outbound.delivers_to(b));
}

#[tokio::test]
async fn out_of_range_joint_update_is_silently_ignored() {
    let mut h = harness().await;
    let a = SessionId::new();

    h.coordinator
        .handle(
            a,
            ClientRequest::UpdateJoint {
                joint_index: JOINT_COUNT,
                position: 0.5,
            },
        )
        .await;

    assert_eq!(
        h.coordinator.snapshot().await.positions,
        JointVector::zeroed()
    );
    assert!(matches!(
        h.events.try_recv(),
        Err(broadcast::error::TryRecvError::Empty)
    ));
}

#[tokio::test]
async fn save_configuration_enforces_duration_bounds() {
    let mut h = harness().await;
    let a = SessionId::new();

    for bad in [0.0, -1.0, 61.0] {
        h.coordinator
            .handle(a, ClientRequest::SaveConfiguration { duration: bad })
            .await;
        let outbound = next_event(&mut h.events).await;
        assert!(
            matches!(outbound.event, ServerEvent::PoseError { .. }),
            "duration {bad} should be rejected"
        );
        assert!(outbound.delivers_to(a));
    }
    assert!(h.coordinator.pose_list().await.is_empty());

    for good in [0.1, 60.0] {
        h.coordinator
            .handle(a, ClientRequest::SaveConfiguration { duration: good })
            .await;
        let outbound = next_event(&mut h.events).await;
        assert!(matches!(
            outbound.event,
            ServerEvent::ConfigurationSaved { .. }
        ));
        // Every accepted list mutation re-broadcasts the shared list.
        let outbound = next_event(&mut h.events).await;
        assert!(matches!(outbound.event, ServerEvent::PoseList { .. }));
    }
    assert_eq!(h.coordinator.pose_list().await.len(), 2);
}

#[tokio::test]
async fn trajectory_offsets_accumulate_pose_durations() {
    let h = harness().await;
    let a = SessionId::new();

    h.coordinator
        .handle(
            a,
            ClientRequest::ExecuteTrajectory {
                trajectory_points: vec![
                    values13(0.1, 2.0),
                    values13(0.2, 3.0),
                    values13(0.3, 1.5),
                ],
            },
        )
        .await;

    let submission = h.executor.next_submission().await;
    let offsets: Vec<f64> = submission
        .goal
        .waypoints
        .iter()
        .map(|w| w.time_from_start_secs)
        .collect();
    assert_eq!(offsets, vec![2.0, 5.0, 6.5]);
}

#[tokio::test]
async fn move_rejects_wrong_position_count() {
    let mut h = harness().await;
    let a = SessionId::new();

    h.coordinator
        .handle(
            a,
            ClientRequest::MoveToPosition {
                positions: vec![0.5; JOINT_COUNT - 1],
                duration: 2.0,
            },
        )
        .await;

    let outbound = next_event(&mut h.events).await;
    assert!(matches!(outbound.event, ServerEvent::MovementError { .. }));
    assert!(outbound.delivers_to(a));
    assert!(!h.coordinator.snapshot().await.is_moving);
}

#[tokio::test]
async fn new_goal_preempts_and_stale_feedback_is_dropped() {
    let mut h = harness().await;
    let a = SessionId::new();

    h.coordinator
        .handle(
            a,
            ClientRequest::MoveToPosition {
                positions: positions(0.9),
                duration: 2.0,
            },
        )
        .await;
    let mut first = h.executor.next_submission().await;

    h.coordinator
        .handle(
            a,
            ClientRequest::MoveToPosition {
                positions: positions(0.25),
                duration: 2.0,
            },
        )
        .await;
    let second = h.executor.next_submission().await;

    // Admission canceled the superseded goal without waiting for an ack.
    assert!(first.cancel_rx.try_recv().is_ok());

    // Late feedback from the superseded goal must not overwrite state.
    first
        .update_tx
        .send(GoalUpdate::Feedback(JointVector([9.9; JOINT_COUNT])))
        .await
        .expect("send stale feedback");
    second
        .update_tx
        .send(GoalUpdate::Feedback(JointVector([0.1; JOINT_COUNT])))
        .await
        .expect("send live feedback");

    let outbound = event_matching(&mut h.events, |event| {
        matches!(event, ServerEvent::JointPositionsUpdate(_))
    })
    .await;
    assert_eq!(
        outbound.event,
        ServerEvent::JointPositionsUpdate(JointVector([0.1; JOINT_COUNT]))
    );

    second
        .update_tx
        .send(GoalUpdate::Succeeded)
        .await
        .expect("send success");
    let outbound = event_matching(&mut h.events, |event| {
        matches!(event, ServerEvent::MovementCompleted { .. })
    })
    .await;
    assert_eq!(
        outbound.event,
        ServerEvent::MovementCompleted {
            positions: JointVector([0.25; JOINT_COUNT]),
            success: true,
        }
    );

    let snapshot = h.coordinator.snapshot().await;
    assert!(!snapshot.is_moving);
    assert_eq!(snapshot.positions, JointVector([0.25; JOINT_COUNT]));
}

#[tokio::test]
async fn stop_while_idle_is_a_silent_noop() {
    let mut h = harness().await;
    let a = SessionId::new();

    h.coordinator.handle(a, ClientRequest::StopMovement).await;

    assert!(matches!(
        h.events.try_recv(),
        Err(broadcast::error::TryRecvError::Empty)
    ));
}

#[tokio::test]
async fn stop_transitions_to_idle_on_cancel_ack_not_before() {
    let mut h = harness().await;
    let a = SessionId::new();

    h.coordinator
        .handle(
            a,
            ClientRequest::MoveToPosition {
                positions: positions(0.5),
                duration: 2.0,
            },
        )
        .await;
    let mut submission = h.executor.next_submission().await;

    h.coordinator.handle(a, ClientRequest::StopMovement).await;
    assert!(submission.cancel_rx.try_recv().is_ok());
    // Cancellation is asynchronous: still moving until the executor acks.
    assert!(h.coordinator.snapshot().await.is_moving);

    submission
        .update_tx
        .send(GoalUpdate::Canceled)
        .await
        .expect("send cancel ack");

    let outbound = event_matching(&mut h.events, |event| {
        matches!(event, ServerEvent::MovementStopped)
    })
    .await;
    assert!(outbound.delivers_to(SessionId::new()));
    assert!(!h.coordinator.snapshot().await.is_moving);
}

#[tokio::test]
async fn abort_reports_error_and_keeps_last_feedback_positions() {
    let mut h = harness().await;
    let a = SessionId::new();

    h.coordinator
        .handle(
            a,
            ClientRequest::ExecuteTrajectory {
                trajectory_points: vec![values13(0.5, 2.0)],
            },
        )
        .await;
    let submission = h.executor.next_submission().await;

    submission
        .update_tx
        .send(GoalUpdate::Feedback(JointVector([0.2; JOINT_COUNT])))
        .await
        .expect("send feedback");
    submission
        .update_tx
        .send(GoalUpdate::Aborted("joint 3 stalled".into()))
        .await
        .expect("send abort");

    let outbound = event_matching(&mut h.events, |event| {
        matches!(event, ServerEvent::TrajectoryError { .. })
    })
    .await;
    match outbound.event {
        ServerEvent::TrajectoryError { error } => {
            assert!(error.message.contains("joint 3 stalled"));
        }
        other => panic!("unexpected event: {other:?}"),
    }

    let snapshot = h.coordinator.snapshot().await;
    assert!(!snapshot.is_moving);
    assert_eq!(snapshot.positions, JointVector([0.2; JOINT_COUNT]));
}

#[tokio::test]
async fn submission_failure_targets_requester_and_stays_idle() {
    let dir = tempfile::tempdir().expect("tempdir");
    let favorites = FavoritesStore::open(dir.path().join("favorites.txt"))
        .await
        .expect("favorites store");
    let (events_tx, mut events) = broadcast::channel(64);
    let coordinator = Coordinator::new(Arc::new(FailingExecutor), favorites, events_tx);
    let a = SessionId::new();
    let b = SessionId::new();

    coordinator
        .handle(
            a,
            ClientRequest::MoveToPosition {
                positions: positions(0.5),
                duration: 2.0,
            },
        )
        .await;

    let outbound = event_matching(&mut events, |event| {
        matches!(event, ServerEvent::MovementError { .. })
    })
    .await;
    assert!(outbound.delivers_to(a));
    assert!(!outbound.delivers_to(b));
    assert!(!coordinator.snapshot().await.is_moving);
}

#[tokio::test]
async fn slider_edit_then_move_scenario() {
    let mut h = harness().await;
    let a = SessionId::new();
    let b = SessionId::new();

    h.coordinator
        .handle(
            a,
            ClientRequest::UpdateJoint {
                joint_index: 0,
                position: 0.5,
            },
        )
        .await;
    let echo = next_event(&mut h.events).await;
    assert!(echo.delivers_to(b) && !echo.delivers_to(a));

    let mut target = vec![0.0; JOINT_COUNT];
    target[0] = 0.5;
    h.coordinator
        .handle(
            a,
            ClientRequest::MoveToPosition {
                positions: target.clone(),
                duration: 2.0,
            },
        )
        .await;
    let submission = h.executor.next_submission().await;
    submission
        .update_tx
        .send(GoalUpdate::Succeeded)
        .await
        .expect("send success");

    let done = event_matching(&mut h.events, |event| {
        matches!(event, ServerEvent::MovementCompleted { .. })
    })
    .await;
    // Executor-confirmed ground truth goes to everyone, sender included.
    assert!(done.delivers_to(a) && done.delivers_to(b));
    match done.event {
        ServerEvent::MovementCompleted { positions, success } => {
            assert!(success);
            assert_eq!(positions.as_slice(), target.as_slice());
        }
        other => panic!("unexpected event: {other:?}"),
    }
}

#[tokio::test]
async fn favorite_save_with_twelve_values_is_rejected() {
    let mut h = harness().await;
    let a = SessionId::new();

    h.coordinator
        .handle(
            a,
            ClientRequest::SaveFavoritePose {
                name: "Home".into(),
                values: positions(0.5),
            },
        )
        .await;

    let outbound = next_event(&mut h.events).await;
    assert!(matches!(
        outbound.event,
        ServerEvent::FavoritePoseError { .. }
    ));
    assert!(outbound.delivers_to(a));
}

#[tokio::test]
async fn favorites_round_trip_through_store() {
    let mut h = harness().await;
    let a = SessionId::new();

    h.coordinator
        .handle(
            a,
            ClientRequest::SaveFavoritePose {
                name: "Home".into(),
                values: values13(0.5, 2.0),
            },
        )
        .await;
    let saved = next_event(&mut h.events).await;
    assert!(matches!(saved.event, ServerEvent::FavoritePoseSaved { .. }));
    assert!(saved.delivers_to(SessionId::new()));

    h.coordinator
        .handle(a, ClientRequest::GetFavoritePoses)
        .await;
    let listed = event_matching(&mut h.events, |event| {
        matches!(event, ServerEvent::FavoritePoses { .. })
    })
    .await;
    match listed.event {
        ServerEvent::FavoritePoses { favorites } => {
            assert_eq!(favorites.len(), 1);
            assert_eq!(favorites[0].name, "Home");
            assert_eq!(favorites[0].pose.duration_secs, 2.0);
        }
        other => panic!("unexpected event: {other:?}"),
    }
}

#[tokio::test]
async fn rename_of_missing_favorite_is_silent_success() {
    let mut h = harness().await;
    let a = SessionId::new();

    h.coordinator
        .handle(
            a,
            ClientRequest::UpdateFavoritePoses {
                old_name: "Home".into(),
                new_name: "HomeV2".into(),
                values: values13(0.5, 2.0),
            },
        )
        .await;

    let outbound = next_event(&mut h.events).await;
    assert!(matches!(
        outbound.event,
        ServerEvent::FavoritePoseUpdated { .. }
    ));
}

#[tokio::test]
async fn export_import_round_trips_pose_list() {
    let mut h = harness().await;
    let a = SessionId::new();

    h.coordinator
        .handle(
            a,
            ClientRequest::UpdateJoint {
                joint_index: 2,
                position: 0.125,
            },
        )
        .await;
    h.coordinator
        .handle(a, ClientRequest::SaveConfiguration { duration: 2.0 })
        .await;
    h.coordinator
        .handle(a, ClientRequest::SaveConfiguration { duration: 3.5 })
        .await;

    let before = h.coordinator.pose_list().await;
    let exported = h.coordinator.export_poses().await;
    assert_eq!(exported.lines().count(), 2);

    h.coordinator
        .handle(a, ClientRequest::DeleteAllPoses)
        .await;
    assert!(h.coordinator.pose_list().await.is_empty());

    let imported = h
        .coordinator
        .import_poses(&exported)
        .await
        .expect("import");
    assert_eq!(imported, 2);
    assert_eq!(h.coordinator.pose_list().await, before);

    // Drain: one pose_list per mutation plus the config acks.
    while h.events.try_recv().is_ok() {}
}

#[tokio::test]
async fn pose_list_ops_reorder_and_delete() {
    let mut h = harness().await;
    let a = SessionId::new();

    for duration in [1.0, 2.0, 3.0] {
        h.coordinator
            .handle(a, ClientRequest::SaveConfiguration { duration })
            .await;
    }

    h.coordinator
        .handle(
            a,
            ClientRequest::ReorderPose {
                index: 0,
                direction: 1,
            },
        )
        .await;
    let durations: Vec<f64> = h
        .coordinator
        .pose_list()
        .await
        .iter()
        .map(|p| p.duration_secs)
        .collect();
    assert_eq!(durations, vec![2.0, 1.0, 3.0]);

    // Moving the first pose up falls off the list edge.
    h.coordinator
        .handle(
            a,
            ClientRequest::ReorderPose {
                index: 0,
                direction: -1,
            },
        )
        .await;
    let error = event_matching(&mut h.events, |event| {
        matches!(event, ServerEvent::PoseError { .. })
    })
    .await;
    assert!(error.delivers_to(a));

    h.coordinator
        .handle(a, ClientRequest::DeletePose { index: 1 })
        .await;
    let durations: Vec<f64> = h
        .coordinator
        .pose_list()
        .await
        .iter()
        .map(|p| p.duration_secs)
        .collect();
    assert_eq!(durations, vec![2.0, 3.0]);
}

//! Report Polling E2E Tests
//!
//! Runs real poll chains on worker threads against a scripted
//! [`MockTransport`]: a panel loads its simulation, an auto-run report polls
//! until completion, edits restart the chain, and stale chains are muted.
//!
//! # Running Tests
//!
//! ```sh
//! cargo test -p simform-runtime --test report_polling_e2e
//! ```
//!
//! # Invariants
//!
//! 1. **Running surfaces data**: a `running` response is delivered at once
//!    and the chain keeps polling
//! 2. **Only the current chain applies**: updates from a superseded chain
//!    are discarded, whatever their arrival order
//! 3. **Bad states end the chain**: an unknown state is a terminal failure
//! 4. **Restart on change only**: unchanged dependency values keep the chain

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Map, Value, json};
use simform_core::{EditSession, FormController, Schema};
use simform_runtime::{
    ApiClient, AutoRunReport, ClientConfig, MockTransport, ObserveOutcome, PollError,
    PollUpdate, Reply, ReportPoller, RetryPolicy, RunSimulationRequest, SimulationLoader,
};

const WAIT: Duration = Duration::from_secs(5);

// ============================================================================
// Fixtures
// ============================================================================

fn config() -> ClientConfig {
    ClientConfig::default()
        .with_app_name("srw")
        .with_poll_interval(Duration::from_millis(5))
        .with_retry(RetryPolicy {
            max_attempts: 2,
            initial_backoff: Duration::from_millis(1),
            multiplier: 2.0,
            max_backoff: Duration::from_millis(2),
        })
}

fn schema() -> Arc<Schema> {
    let schema = Schema::from_value(json!({
        "models": {
            "beamSettings": {
                "current": { "displayName": "Current", "type": "Float", "defaultValue": "0.1" },
                "species": { "displayName": "Species", "type": "String", "defaultValue": "e" }
            },
            "animation": {
                "frames": { "displayName": "Frames", "type": "Integer", "defaultValue": "10" }
            }
        },
        "views": [{
            "name": "beam",
            "basic": [
                { "layout": "fieldList", "fields": ["beamSettings.current", "beamSettings.species"] },
                { "layout": "autoRunReport", "report": "beamAnimation", "dependencies": ["animation.frames"] }
            ]
        }]
    }))
    .expect("schema compiles");
    Arc::new(schema)
}

fn script_bootstrap(mock: &MockTransport) {
    mock.on_get("/auth-guest-login/srw", [Reply::json(json!({}))]);
    mock.on_post("/simulation-list", [Reply::json(json!([{ "simulationId": "sim1" }]))]);
    mock.on_get(
        "/simulation/srw/sim1/0/source",
        [Reply::json(json!({
            "models": { "beamSettings": { "current": "0.5", "species": "p" } }
        }))],
    );
}

fn request(report: &str) -> RunSimulationRequest {
    RunSimulationRequest {
        models: Map::new(),
        force_run: false,
        report: report.to_string(),
        simulation_id: "sim1".to_string(),
        simulation_type: "srw".to_string(),
    }
}

fn poller(mock: &Arc<MockTransport>) -> ReportPoller {
    let api = ApiClient::new(Arc::<MockTransport>::clone(mock), "srw");
    ReportPoller::new(api, &config())
}

fn posted_bodies(mock: &MockTransport) -> Vec<Value> {
    mock.requests()
        .into_iter()
        .filter(|r| r.path == "/run-simulation")
        .filter_map(|r| match r.body {
            simform_runtime::Body::Json(v) => Some(v),
            _ => None,
        })
        .collect()
}

// ============================================================================
// Poller
// ============================================================================

#[test]
fn running_delivers_progress_then_completion() {
    let mock = Arc::new(MockTransport::new());
    mock.on_post(
        "/run-simulation",
        [
            Reply::json(json!({ "state": "pending" })),
            Reply::json(json!({ "state": "running", "frameCount": 2 })),
            Reply::json(json!({ "state": "completed", "frameCount": 10 })),
        ],
    );
    let mut poller = poller(&mock);
    let token = poller.start(request("beamAnimation"));

    let progress = poller.next_timeout(WAIT).expect("progress update");
    assert_eq!(progress.token, token);
    assert_eq!(
        progress.update,
        PollUpdate::Progress(json!({ "state": "running", "frameCount": 2 }))
    );

    let done = poller.next_timeout(WAIT).expect("completion");
    assert_eq!(
        done.update,
        PollUpdate::Completed(json!({ "state": "completed", "frameCount": 10 }))
    );
    assert!(!poller.is_polling());
    assert_eq!(mock.count("/run-simulation"), 3);
    assert!(poller.trace().verify_invariants().is_empty());
}

#[test]
fn superseded_chain_is_never_applied() {
    let mock = Arc::new(MockTransport::new());
    // The first chain's only response is slow; the second chain's is quick.
    mock.on_post(
        "/run-simulation",
        [
            Reply::json(json!({ "state": "completed", "v": "old" })).after(Duration::from_millis(150)),
            Reply::json(json!({ "state": "completed", "v": "new" })),
        ],
    );
    let mut poller = poller(&mock);
    let first = poller.start(request("r"));
    // Let the first worker pick up the slow reply.
    std::thread::sleep(Duration::from_millis(30));
    let second = poller.start(request("r"));
    assert!(first < second);

    let applied = poller.next_timeout(WAIT).expect("current chain result");
    assert_eq!(applied.token, second);
    assert_eq!(applied.update, PollUpdate::Completed(json!({ "state": "completed", "v": "new" })));

    // Nothing from the first chain ever comes through.
    std::thread::sleep(Duration::from_millis(200));
    assert!(poller.drain().is_empty());
    assert!(poller.trace().verify_invariants().is_empty());
}

#[test]
fn unexpected_state_is_a_terminal_failure() {
    let mock = Arc::new(MockTransport::new());
    mock.on_post("/run-simulation", [Reply::json(json!({ "state": "exploded" }))]);
    let mut poller = poller(&mock);
    poller.start(request("r"));

    let failed = poller.next_timeout(WAIT).expect("failure update");
    assert_eq!(
        failed.update,
        PollUpdate::Failed(PollError::UnexpectedState("exploded".into()))
    );
    assert!(!poller.is_polling());
    std::thread::sleep(Duration::from_millis(30));
    assert_eq!(mock.count("/run-simulation"), 1);
}

#[test]
fn transport_failures_exhaust_retries() {
    let mock = Arc::new(MockTransport::new());
    mock.on_post("/run-simulation", [Reply::raw(503, Vec::new())]);
    let mut poller = poller(&mock);
    poller.start(request("r"));

    let failed = poller.next_timeout(WAIT).expect("failure update");
    assert!(matches!(
        failed.update,
        PollUpdate::Failed(PollError::Transport { attempts: 2, .. })
    ));
}

#[test]
fn stop_silences_the_chain() {
    let mock = Arc::new(MockTransport::new());
    mock.on_post("/run-simulation", [Reply::json(json!({ "state": "running" }))]);
    let mut poller = poller(&mock);
    poller.start(request("r"));
    poller.next_timeout(WAIT).expect("first progress");
    poller.stop();

    std::thread::sleep(Duration::from_millis(50));
    assert!(poller.drain().is_empty());
    let settled = mock.count("/run-simulation");
    std::thread::sleep(Duration::from_millis(50));
    // The worker exited instead of polling forever.
    assert_eq!(mock.count("/run-simulation"), settled);
}

#[test]
fn clearing_the_trace_keeps_the_chain_running() {
    let mock = Arc::new(MockTransport::new());
    mock.on_post(
        "/run-simulation",
        [
            Reply::json(json!({ "state": "running", "frameCount": 1 })),
            Reply::json(json!({ "state": "completed", "frameCount": 2 })),
        ],
    );
    let mut poller = poller(&mock);
    let token = poller.start(request("r"));
    poller.next_timeout(WAIT).expect("progress");
    assert!(!poller.trace().is_empty());

    poller.clear_trace();
    assert!(poller.trace().is_empty());

    let done = poller.next_timeout(WAIT).expect("completion after clear");
    assert_eq!(done.token, token);
    assert!(matches!(done.update, PollUpdate::Completed(_)));
    assert!(poller.trace().contains_event_type(token, "applied"));
    assert!(poller.trace().verify_invariants().is_empty());
}

// ============================================================================
// Loaded panel with an auto-run report
// ============================================================================

#[test]
fn committed_edits_restart_the_report() {
    let mock = Arc::new(MockTransport::new());
    script_bootstrap(&mock);
    mock.on_post(
        "/run-simulation",
        [Reply::json(json!({ "state": "completed", "frames": [] }))],
    );
    let api = ApiClient::new(Arc::<MockTransport>::clone(&mock), "srw");

    let mut session = EditSession::new(schema());
    let info = SimulationLoader::new(api.clone(), RetryPolicy::none())
        .load(&mut session)
        .expect("simulation loads");

    let view = session.schema().view("beam").expect("view").clone();
    let mut reports = AutoRunReport::for_view(&api, &config(), &view).expect("reports");
    assert_eq!(reports.len(), 1);
    let report = &mut reports[0];
    assert_eq!(report.report(), "beamAnimation");

    let first = report.observe(&session, info.simulation_id()).expect("observe");
    assert!(matches!(first, ObserveOutcome::Restarted(_)));
    let done = report.next_timeout(WAIT).expect("report completes");
    assert!(matches!(done.update, PollUpdate::Completed(_)));

    // Edits that are not committed do not change canonical values.
    let mut controller = FormController::new();
    let current = controller.hook(&mut session, "beamSettings.current").expect("hook");
    controller
        .update_value(&mut session, &current, json!("0.75"))
        .expect("edit");
    assert_eq!(
        report.observe(&session, info.simulation_id()).expect("observe"),
        ObserveOutcome::Unchanged
    );

    controller.submit_changes(&mut session).expect("commit");
    let second = report.observe(&session, info.simulation_id()).expect("observe");
    assert!(matches!(second, ObserveOutcome::Restarted(_)));
    report.next_timeout(WAIT).expect("second completion");

    let bodies = posted_bodies(&mock);
    assert_eq!(bodies.len(), 2);
    assert_eq!(bodies[0]["models"]["beamSettings"]["current"], json!(0.5));
    assert_eq!(bodies[1]["models"]["beamSettings"]["current"], json!(0.75));
    assert_eq!(bodies[1]["report"], json!("beamAnimation"));
    assert_eq!(bodies[1]["simulationId"], json!("sim1"));
    assert_eq!(bodies[1]["simulationType"], json!("srw"));
    // Missing schema models were filled from defaults.
    assert_eq!(bodies[1]["models"]["animation"]["frames"], json!(10));
}

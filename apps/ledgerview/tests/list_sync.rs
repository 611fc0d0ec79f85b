//! End-to-end list synchronization against a scripted connection: the
//! client, its per-list sync states, and the selection stores wired the way
//! the binary wires them.

use std::sync::Arc;
use std::time::Duration;

use ledgerview::cache::GenerationAndCount;
use ledgerview::client::LedgerviewClient;
use ledgerview::config::Config;
use ledgerview::connection::mock::{MockConnection, ScriptedFetch};
use ledgerview::connection::Connection;
use ledgerview::model::{Candidate, CandidatesData, ListKind};
use ledgerview::protocol::StateDelta;
use ledgerview::sync::Window;

const TIMEOUT: Duration = Duration::from_secs(5);

fn test_config() -> Config {
    Config {
        viewport: 10,
        prefetch_margin: 10,
        ..Config::default()
    }
}

fn new_client(conn: &Arc<MockConnection>) -> LedgerviewClient {
    let connection: Arc<dyn Connection> = conn.clone();
    LedgerviewClient::new(connection, &test_config())
}

fn delta() -> StateDelta {
    StateDelta::default()
}

async fn step_until(
    client: &mut LedgerviewClient,
    mut cond: impl FnMut(&LedgerviewClient) -> bool,
) {
    tokio::time::timeout(TIMEOUT, async {
        while !cond(client) {
            let _ = client.step().await;
        }
    })
    .await
    .expect("timed out waiting for client condition");
}

async fn wait_for(mut cond: impl FnMut() -> bool) {
    tokio::time::timeout(TIMEOUT, async {
        while !cond() {
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("timed out waiting for condition");
}

async fn settle() {
    for _ in 0..8 {
        tokio::task::yield_now().await;
    }
}

#[tokio::test]
async fn empty_list_issues_no_fetch() {
    let conn = Arc::new(MockConnection::new());
    let mut client = new_client(&conn);

    conn.push_state(StateDelta {
        pending: Some(GenerationAndCount(1, 0)),
        ..delta()
    });
    step_until(&mut client, |c| c.pending().generation() == Some(1)).await;
    settle().await;
    assert!(conn.requests().is_empty());
}

#[tokio::test]
async fn window_fetch_fills_cache() {
    let conn = Arc::new(MockConnection::new());
    conn.set_generation(ListKind::Pending, 1);
    let mut client = new_client(&conn);

    conn.push_state(StateDelta {
        pending: Some(GenerationAndCount(1, 50)),
        ..delta()
    });
    step_until(&mut client, |c| c.pending().row(19).is_some()).await;

    let requests = conn.requests_for(ListKind::Pending);
    assert_eq!(requests.len(), 1);
    assert_eq!((requests[0].start, requests[0].end), (0, 20));
    assert!(client.pending().row(20).is_none());
}

#[tokio::test]
async fn reload_mid_fetch_discards_the_stale_response() {
    let conn = Arc::new(MockConnection::new());
    conn.script(ListKind::Pending, ScriptedFetch::Rows { generation: 1 });
    conn.script(ListKind::Pending, ScriptedFetch::Hold);
    conn.script(ListKind::Pending, ScriptedFetch::Hold);
    let mut client = new_client(&conn);

    // Fresh list: generation 1, the visible window fills normally.
    conn.push_state(StateDelta {
        pending: Some(GenerationAndCount(1, 50)),
        ..delta()
    });
    step_until(&mut client, |c| c.pending().row(0).is_some()).await;

    // Scrolling down requests the next range, which parks on the wire.
    client.pending_mut().on_window_change(Window::new(20, 30));
    wait_for(|| conn.held_count() == 1).await;

    // Reload before that fetch resolves: the cache clears and the window is
    // refetched under generation 2 (also parked).
    conn.push_state(StateDelta {
        pending: Some(GenerationAndCount(2, 50)),
        ..delta()
    });
    step_until(&mut client, |c| c.pending().generation() == Some(2)).await;
    wait_for(|| conn.held_count() == 2).await;
    assert!(client.pending().row(25).is_none());

    // The in-flight response arrives tagged with the dead generation and
    // must be discarded silently.
    assert!(conn.resolve_held(1));
    let _ = client.step().await;
    settle().await;
    client.pump_all();
    assert!(client.pending().row(25).is_none());
    assert_eq!(client.pending().generation(), Some(2));

    // The generation-2 response lands.
    assert!(conn.resolve_held(2));
    step_until(&mut client, |c| c.pending().row(25).is_some()).await;
    assert_eq!(client.pending().generation(), Some(2));
}

#[tokio::test]
async fn count_shrink_collapses_visible_range() {
    let conn = Arc::new(MockConnection::new());
    conn.set_generation(ListKind::Uncleared, 1);
    let mut client = new_client(&conn);

    conn.push_state(StateDelta {
        uncleared: Some(GenerationAndCount(1, 10)),
        ..delta()
    });
    step_until(&mut client, |c| c.uncleared().generation() == Some(1)).await;
    client.uncleared_mut().on_window_change(Window::new(7, 9));

    conn.set_generation(ListKind::Uncleared, 2);
    conn.push_state(StateDelta {
        uncleared: Some(GenerationAndCount(2, 3)),
        ..delta()
    });
    step_until(&mut client, |c| c.uncleared().generation() == Some(2)).await;
    assert!(client.uncleared().visible_range().start < 3);
}

#[tokio::test]
async fn candidates_are_fenced_to_their_pending_index() {
    let conn = Arc::new(MockConnection::new());
    let mut client = new_client(&conn);

    conn.push_state(StateDelta {
        pending: Some(GenerationAndCount(1, 10)),
        pending_index: Some(4),
        candidates_generation: Some(2),
        candidates: Some(CandidatesData {
            candidates: vec![Candidate::default(), Candidate::default()],
        }),
        ..delta()
    });
    step_until(&mut client, |c| c.session().candidates().is_some()).await;
    assert_eq!(client.session().candidates().unwrap().pending_index, 4);

    // A new pending index without candidates in the same delta: the old
    // candidates must read as unavailable, not be shown against index 5.
    conn.push_state(StateDelta {
        pending_index: Some(5),
        ..delta()
    });
    step_until(&mut client, |c| c.session().pending_index() == Some(5)).await;
    assert!(client.session().candidates().is_none());
}

#[tokio::test]
async fn candidate_selection_clears_on_new_generation() {
    let conn = Arc::new(MockConnection::new());
    let mut client = new_client(&conn);

    conn.push_state(StateDelta {
        pending: Some(GenerationAndCount(1, 10)),
        pending_index: Some(0),
        candidates_generation: Some(2),
        candidates: Some(CandidatesData {
            candidates: vec![Candidate::default(), Candidate::default(), Candidate::default()],
        }),
        ..delta()
    });
    step_until(&mut client, |c| c.session().candidates().is_some()).await;
    assert!(client.select_candidate(2));
    assert_eq!(client.candidate_selection().selected(), Some(2));

    conn.push_state(StateDelta {
        candidates_generation: Some(3),
        ..delta()
    });
    step_until(&mut client, |c| c.candidate_selection().selected().is_none()).await;
}

#[tokio::test]
async fn select_pending_skips_server_side_and_scrolls() {
    let conn = Arc::new(MockConnection::new());
    conn.set_generation(ListKind::Pending, 1);
    let mut client = new_client(&conn);

    conn.push_state(StateDelta {
        pending: Some(GenerationAndCount(1, 100)),
        ..delta()
    });
    step_until(&mut client, |c| c.pending().generation() == Some(1)).await;

    client.select_pending(42);
    wait_for(|| conn.skips() == vec![(ListKind::Pending, 42)]).await;
    assert!(client.pending().visible_range().contains(42));
    step_until(&mut client, |c| c.pending().row(42).is_some()).await;
}

#[tokio::test]
async fn server_pending_index_auto_scrolls() {
    let conn = Arc::new(MockConnection::new());
    conn.set_generation(ListKind::Pending, 1);
    let mut client = new_client(&conn);

    conn.push_state(StateDelta {
        pending: Some(GenerationAndCount(1, 200)),
        pending_index: Some(150),
        ..delta()
    });
    step_until(&mut client, |c| c.pending().row(150).is_some()).await;
    assert!(client.pending().visible_range().contains(150));
}

#[tokio::test]
async fn closed_connection_pauses_fetching_until_fresh_snapshot() {
    let conn = Arc::new(MockConnection::new());
    conn.set_closed(true);
    let mut client = new_client(&conn);

    conn.push_state(StateDelta {
        closed: Some(true),
        errors: Some(GenerationAndCount(1, 40)),
        ..delta()
    });
    step_until(&mut client, |c| c.session().closed()).await;
    settle().await;
    assert!(conn.requests().is_empty());

    // Reconnected: a fresh snapshot arrives and windowed fetching resumes.
    conn.set_closed(false);
    conn.set_generation(ListKind::Errors, 2);
    conn.push_state(StateDelta {
        closed: Some(false),
        errors: Some(GenerationAndCount(2, 40)),
        ..delta()
    });
    step_until(&mut client, |c| c.errors().row(0).is_some()).await;
    assert_eq!(client.errors().generation(), Some(2));
}

#[tokio::test]
async fn highlight_store_notifies_and_scrolls_via_client() {
    let conn = Arc::new(MockConnection::new());
    conn.set_generation(ListKind::Pending, 1);
    let mut client = new_client(&conn);

    conn.push_state(StateDelta {
        pending: Some(GenerationAndCount(1, 60)),
        ..delta()
    });
    step_until(&mut client, |c| c.pending().generation() == Some(1)).await;

    let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
    let sink = seen.clone();
    let store = client.pending_highlight();
    store.subscribe(Box::new(move |value: &Option<u64>| {
        sink.lock().push(*value);
    }));

    client.highlight_pending(55);
    assert_eq!(*seen.lock(), vec![Some(55)]);
    assert!(client.pending().visible_range().contains(55));
    step_until(&mut client, |c| c.pending().row(55).is_some()).await;
}

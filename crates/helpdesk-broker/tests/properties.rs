//! Ordering and exclusivity properties of the broker state machine.

use std::collections::HashSet;
use std::sync::Arc;

use helpdesk_broker::{BrokerConfig, Dispatcher, spawn};
use helpdesk_core::{BrokerError, ConnectionId, Role};
use proptest::prelude::*;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

type Inbox = mpsc::Receiver<Arc<String>>;

fn join(d: &mut Dispatcher, role: Role) -> (ConnectionId, Inbox) {
    let (tx, rx) = mpsc::channel(256);
    (d.connect(role, tx), rx)
}

fn drain(rx: &mut Inbox) -> Vec<Value> {
    let mut out = Vec::new();
    while let Ok(msg) = rx.try_recv() {
        out.push(serde_json::from_str(&msg).unwrap());
    }
    out
}

proptest! {
    #[test]
    fn waiting_line_matches_arrival_order(
        roles in proptest::collection::vec(any::<bool>(), 1..40),
    ) {
        let mut d = Dispatcher::new(None);
        let mut inboxes = Vec::new();
        let mut arrivals = Vec::new();
        for is_requester in roles {
            let role = if is_requester { Role::Requester } else { Role::Responder };
            let (id, rx) = join(&mut d, role);
            inboxes.push(rx);
            if is_requester {
                arrivals.push(id);
            }
            prop_assert_eq!(&d.roster().waiting, &arrivals);
        }
    }

    #[test]
    fn claims_bind_distinct_requesters_then_nothing_waiting(
        requesters in 0usize..12,
        responders in 1usize..12,
    ) {
        let mut d = Dispatcher::new(None);
        let mut inboxes = Vec::new();
        let mut queued = Vec::new();
        for _ in 0..requesters {
            let (id, rx) = join(&mut d, Role::Requester);
            queued.push(id);
            inboxes.push(rx);
        }
        let mut claimants = Vec::new();
        for _ in 0..responders {
            let (id, rx) = join(&mut d, Role::Responder);
            claimants.push(id);
            inboxes.push(rx);
        }

        let mut bound = Vec::new();
        for responder in &claimants {
            match d.claim(responder) {
                Ok(requester) => bound.push(requester),
                Err(err) => prop_assert_eq!(err, BrokerError::NothingWaiting),
            }
        }

        let expected = requesters.min(responders);
        prop_assert_eq!(bound.len(), expected);
        prop_assert_eq!(&bound[..], &queued[..expected]);
        let unique: HashSet<_> = bound.iter().collect();
        prop_assert_eq!(unique.len(), bound.len());
        prop_assert_eq!(d.stats().active_sessions, expected);
    }

    #[test]
    fn removing_waiting_requesters_keeps_relative_order(
        count in 1usize..30,
        leave in proptest::collection::vec(any::<bool>(), 30),
    ) {
        let mut d = Dispatcher::new(None);
        let mut inboxes = Vec::new();
        let mut ids = Vec::new();
        for _ in 0..count {
            let (id, rx) = join(&mut d, Role::Requester);
            ids.push(id);
            inboxes.push(rx);
        }
        let mut remaining = Vec::new();
        for (id, gone) in ids.iter().zip(&leave) {
            if *gone {
                d.disconnect(id);
            } else {
                remaining.push(id.clone());
            }
        }
        prop_assert_eq!(d.roster().waiting, remaining);
    }
}

#[test]
fn support_session_walkthrough() {
    let mut d = Dispatcher::new(None);
    let (r1, mut r1rx) = join(&mut d, Role::Requester);
    let (r2, _r2rx) = join(&mut d, Role::Requester);
    assert_eq!(d.roster().waiting, vec![r1.clone(), r2.clone()]);

    let (a, mut arx) = join(&mut d, Role::Responder);
    assert_eq!(d.claim(&a).unwrap(), r1);
    assert_eq!(d.roster().waiting, vec![r2.clone()]);

    let (b, mut brx) = join(&mut d, Role::Responder);
    assert_eq!(d.claim(&b).unwrap(), r2);
    assert!(d.roster().waiting.is_empty());

    let _ = drain(&mut r1rx);
    d.handle_text(&a, r#"{"type":"message","content":"hi"}"#);
    let got = r1rx.try_recv().unwrap();
    assert_eq!(
        got.as_str(),
        format!(r#"{{"type":"message","from":"{a}","content":"hi"}}"#)
    );

    let _ = drain(&mut arx);
    d.disconnect(&r1);
    let notices = drain(&mut arx);
    assert_eq!(notices[0]["connected"], false);
    assert_eq!(notices[0]["reason"], "counterpart_disconnected");
    assert!(d.counterpart_of(&a).is_none());

    // B would get ALREADY_BOUND while it still serves R2, since a responder
    // holds one session at a time. Dropping R2 first frees B so its claim
    // reaches the now empty line.
    let _ = drain(&mut brx);
    d.disconnect(&r2);
    let _ = drain(&mut brx);
    d.handle_text(&b, r#"{"type":"claim"}"#);
    let reply = drain(&mut brx);
    assert_eq!(reply[0]["error"], "NOTHING_WAITING");

    // A is eligible again once someone new arrives.
    let (r3, _r3rx) = join(&mut d, Role::Requester);
    assert_eq!(d.claim(&a).unwrap(), r3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_claims_through_the_event_loop() {
    const WAITING: usize = 8;
    const RESPONDERS: usize = 12;

    let cancel = CancellationToken::new();
    let (broker, _task) = spawn(BrokerConfig::default(), cancel.clone());

    let mut keep = Vec::new();
    for _ in 0..WAITING {
        let (tx, rx) = mpsc::channel(64);
        let _ = broker.connect(Role::Requester, tx).await.unwrap();
        keep.push(rx);
    }

    let mut tasks = Vec::new();
    for _ in 0..RESPONDERS {
        let broker = broker.clone();
        tasks.push(tokio::spawn(async move {
            let (tx, mut rx) = mpsc::channel(256);
            let id = broker.connect(Role::Responder, tx).await.unwrap();
            broker.frame(id, r#"{"type":"claim"}"#.into()).await.unwrap();
            // Round-trip through the loop so the claim has been applied.
            let _ = broker.stats().await.unwrap();
            let mut outcome = None;
            while let Ok(msg) = rx.try_recv() {
                let v: Value = serde_json::from_str(&msg).unwrap();
                if v["connected"] == true {
                    outcome = Some(Ok(v["counterpart"].as_str().unwrap().to_owned()));
                } else if v["error"] == "NOTHING_WAITING" {
                    outcome = Some(Err(()));
                }
            }
            outcome.unwrap()
        }));
    }

    let mut bound = HashSet::new();
    let mut empty = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(requester) => assert!(bound.insert(requester), "requester bound twice"),
            Err(()) => empty += 1,
        }
    }
    assert_eq!(bound.len(), WAITING);
    assert_eq!(empty, RESPONDERS - WAITING);
    assert_eq!(broker.stats().await.unwrap().active_sessions, WAITING);
    cancel.cancel();
}

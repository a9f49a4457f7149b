//! Calls, responses, retries and expiry.

use std::sync::Arc;
use std::time::{Duration, Instant};

use pithos_core::rpc::{CallFrame, ResponseFrame};
use pithos_core::{CallId, CallOrigin, CallPayload, CallTarget, Component, ResponsePayload, StoredObject};
use pithos_services::{Components, MemoryMetrics};
use pithosd::roles::StoringPeer;
use pithosd::{CallDispatcher, CallOptions, CallOutcome, Listener, Received, ResponseOutcome, RouteError};
use serde_json::json;

use crate::*;

fn storing_peer() -> StoringPeer {
    StoringPeer::new(Arc::new(MemoryMetrics::new()))
}

#[test]
fn test_call_is_retried_then_expires_once() {
    let listener = RecordingListener::default();
    let mut t = TestNode::new(Components::new());
    let start = Instant::now();
    let timeout = Duration::from_millis(100);

    let id = t
        .node
        .ping_node(
            taddr(7),
            CallOptions::default().with_timeout(timeout).with_retries(2),
            Listener::custom(listener.clone()),
            start,
        )
        .unwrap();

    t.node.poll_timeouts(start + timeout).unwrap();
    t.node.poll_timeouts(start + timeout * 2).unwrap();
    assert!(t.node.is_pending(id));
    t.node.poll_timeouts(start + timeout * 3).unwrap();
    t.node.poll_timeouts(start + timeout * 10).unwrap();

    let frames = t.transport.frames();
    assert_eq!(frames.len(), 3);
    for (dest, frame) in &frames {
        assert_eq!(*dest, addr(7));
        assert_eq!(
            *frame,
            Frame::Call(CallFrame {
                call_id: id,
                payload: CallPayload::Ping
            })
        );
    }
    assert_eq!(
        take(&listener.0),
        vec![CallEvent::Timeout(id, CallTarget::External(taddr(7)))]
    );
    assert!(!t.node.is_pending(id));
}

#[test]
fn test_response_reaches_listener_with_context_exactly_once() {
    let listener = RecordingListener::default();
    let mut t = TestNode::new(Components::new());
    let now = Instant::now();

    let id = t
        .node
        .issue_external_call(
            taddr(3),
            CallPayload::ObjectGet { name: "save1".into() },
            CallOptions::default().with_context(json!({ "attempt": "first" })),
            Listener::custom(listener.clone()),
            now,
        )
        .unwrap();

    let found = ResponsePayload::ObjectFound { object: None };
    let out = t.node.handle_response(id, found.clone(), now).unwrap();
    assert_eq!(out, ResponseOutcome::Delivered);
    let out = t.node.handle_response(id, found.clone(), now).unwrap();
    assert_eq!(out, ResponseOutcome::Unmatched);

    // A late timeout must not fire for an answered call.
    t.node.poll_timeouts(now + Duration::from_secs(60)).unwrap();

    assert_eq!(
        take(&listener.0),
        vec![CallEvent::Response(id, found, Some(json!({ "attempt": "first" })))]
    );
}

#[test]
fn test_cancelled_call_is_silent() {
    let listener = RecordingListener::default();
    let mut t = TestNode::new(Components::new());
    let now = Instant::now();

    let id = t
        .node
        .ping_node(taddr(3), CallOptions::default(), Listener::custom(listener.clone()), now)
        .unwrap();
    assert!(t.node.cancel_call(id));
    assert!(!t.node.cancel_call(id));

    t.node.poll_timeouts(now + Duration::from_secs(60)).unwrap();
    let out = t.node.handle_response(id, ResponsePayload::Pong, now).unwrap();
    assert_eq!(out, ResponseOutcome::Unmatched);
    assert_eq!(count(&listener.0), 0);
    assert_eq!(t.node.next_deadline(), None);
}

#[test]
fn test_default_listener_sends_non_ping_outcomes_to_dht_storage() {
    let dht = RecordingDht::default();
    let mut t = TestNode::new(Components::new().with_dht_storage(dht.clone()));
    let now = Instant::now();
    let options = CallOptions::default().with_timeout(Duration::from_millis(50));

    let answered = t
        .node
        .issue_external_call(
            taddr(4),
            CallPayload::ObjectGet { name: "a".into() },
            options.clone(),
            Listener::Default,
            now,
        )
        .unwrap();
    let lost = t
        .node
        .issue_external_call(
            taddr(4),
            CallPayload::ObjectGet { name: "b".into() },
            options,
            Listener::Default,
            now,
        )
        .unwrap();

    t.node
        .handle_response(answered, ResponsePayload::ObjectFound { object: None }, now)
        .unwrap();
    t.node.poll_timeouts(now + Duration::from_millis(50)).unwrap();

    assert_eq!(
        take(&dht.responses),
        vec![(answered, ResponsePayload::ObjectFound { object: None })]
    );
    assert_eq!(take(&dht.timeouts), vec![lost]);
}

#[test]
fn test_internal_put_is_answered_by_peer_logic() {
    let listener = RecordingListener::default();
    let mut t = TestNode::new(Components::new().with_peer_logic(storing_peer()));
    let now = Instant::now();
    let object = StoredObject::new("save1", 2048).unwrap();

    let put = t
        .node
        .issue_internal_call(
            Component::PeerLogic,
            CallPayload::ObjectPut { object: object.clone() },
            CallOptions::default(),
            Listener::custom(listener.clone()),
            now,
        )
        .unwrap();
    let get = t
        .node
        .issue_internal_call(
            Component::PeerLogic,
            CallPayload::ObjectGet { name: "save1".into() },
            CallOptions::default(),
            Listener::custom(listener.clone()),
            now,
        )
        .unwrap();
    // Nothing is applied until the node pumps.
    assert!(t.node.has_queued_work());
    t.node.pump(now).unwrap();

    assert_eq!(
        take(&listener.0),
        vec![
            CallEvent::Response(put, ResponsePayload::ObjectStored { name: "save1".into() }, None),
            CallEvent::Response(get, ResponsePayload::ObjectFound { object: Some(object) }, None),
        ]
    );
    assert_eq!(t.node.pending_calls(), 0);
    assert_eq!(count(&t.transport.0), 0);
}

#[test]
fn test_internal_call_to_missing_component_is_fatal() {
    let mut t = TestNode::new(Components::new());
    let now = Instant::now();
    t.node
        .issue_internal_call(
            Component::SuperPeer,
            CallPayload::Ping,
            CallOptions::default(),
            Listener::Default,
            now,
        )
        .unwrap();
    let err = t.node.pump(now).unwrap_err();
    assert!(matches!(err, RouteError::MissingSubComponent(Component::SuperPeer)));
}

#[test]
fn test_remote_call_is_answered_with_a_response_frame() {
    let mut t = TestNode::new(Components::new().with_peer_logic(storing_peer()));
    let call = Frame::Call(CallFrame {
        call_id: CallId(41),
        payload: CallPayload::ObjectGet { name: "missing".into() },
    });
    let datagram = wire::encode(&call).unwrap();

    let got = t
        .node
        .handle_datagram(addr(9), &datagram, Instant::now())
        .unwrap();
    assert!(matches!(got, Received::Call(CallOutcome::Handled(Component::PeerLogic))));
    t.node.pump(Instant::now()).unwrap();

    let frames = t.transport.frames();
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].0, addr(9));
    assert_eq!(
        frames[0].1,
        Frame::Response(ResponseFrame {
            call_id: CallId(41),
            payload: ResponsePayload::ObjectFound { object: None },
        })
    );
    // RPC traffic is not unit traffic.
    assert_eq!(t.node.snapshot().packets_sent, 0);
}

#[test]
fn test_remote_ping_is_answered_with_pong() {
    let mut t = TestNode::new(Components::new());
    let datagram = wire::encode(&Frame::Call(CallFrame {
        call_id: CallId(5),
        payload: CallPayload::Ping,
    }))
    .unwrap();

    let got = t.node.handle_datagram(addr(2), &datagram, Instant::now()).unwrap();
    assert!(matches!(got, Received::Call(CallOutcome::Answered)));
    t.node.pump(Instant::now()).unwrap();

    let frames = t.transport.frames();
    assert_eq!(
        frames[0].1,
        Frame::Response(ResponseFrame {
            call_id: CallId(5),
            payload: ResponsePayload::Pong,
        })
    );
}

#[test]
fn test_unhandled_remote_call_is_failed_back_to_caller() {
    let t = TestNode::new(Components::new());
    let mut node = t.node.with_dispatcher(CallDispatcher::new());
    let datagram = wire::encode(&Frame::Call(CallFrame {
        call_id: CallId(8),
        payload: CallPayload::Ping,
    }))
    .unwrap();

    node.handle_datagram(addr(2), &datagram, Instant::now()).unwrap();

    let frames = t.transport.frames();
    assert_eq!(frames.len(), 1);
    match &frames[0].1 {
        Frame::Response(ResponseFrame {
            call_id,
            payload: ResponsePayload::Failed { .. },
        }) => assert_eq!(*call_id, CallId(8)),
        other => panic!("expected a failed response, got {other:?}"),
    }
}

#[test]
fn test_response_datagram_completes_pending_call() {
    let listener = RecordingListener::default();
    let mut t = TestNode::new(Components::new());
    let now = Instant::now();
    let id = t
        .node
        .ping_node(taddr(6), CallOptions::default(), Listener::custom(listener.clone()), now)
        .unwrap();

    let reply = wire::encode(&Frame::Response(ResponseFrame {
        call_id: id,
        payload: ResponsePayload::Pong,
    }))
    .unwrap();
    let got = t.node.handle_datagram(addr(6), &reply, now).unwrap();
    assert!(matches!(got, Received::Response(ResponseOutcome::Delivered)));
    let got = t.node.handle_datagram(addr(6), &reply, now).unwrap();
    assert!(matches!(got, Received::Response(ResponseOutcome::Unmatched)));
    assert_eq!(take(&listener.0), vec![CallEvent::Response(id, ResponsePayload::Pong, None)]);
}

#[test]
fn test_calls_fail_while_underlay_bootstraps() {
    let mut t = TestNode::new(Components::new().with_peer_logic(storing_peer()));
    t.ready.set_ready(false);
    let now = Instant::now();

    let err = t
        .node
        .ping_node(taddr(2), CallOptions::default(), Listener::Default, now)
        .unwrap_err();
    assert!(matches!(err, RouteError::UnderlayNotReady));
    assert_eq!(t.node.pending_calls(), 0);

    let err = t
        .node
        .handle_call(pithos_core::InboundCall {
            call_id: CallId(1),
            origin: CallOrigin::External(taddr(2)),
            payload: CallPayload::ObjectGet { name: "x".into() },
        })
        .unwrap_err();
    assert!(matches!(err, RouteError::UnderlayNotReady));

    t.ready.set_ready(true);
    assert!(t
        .node
        .ping_node(taddr(2), CallOptions::default(), Listener::Default, now)
        .is_ok());
}

#[test]
fn test_remote_response_only_completes_calls_sent_to_that_peer() {
    let listener = RecordingListener::default();
    let mut t = TestNode::new(Components::new().with_dht_storage(RecordingDht::default()));
    let now = Instant::now();

    let internal = t
        .node
        .issue_internal_call(
            Component::DhtStorage,
            CallPayload::ObjectGet { name: "save1".into() },
            CallOptions::default(),
            Listener::custom(listener.clone()),
            now,
        )
        .unwrap();
    let external = t
        .node
        .ping_node(taddr(6), CallOptions::default(), Listener::custom(listener.clone()), now)
        .unwrap();

    let reply = |call_id| {
        wire::encode(&Frame::Response(ResponseFrame {
            call_id,
            payload: ResponsePayload::Pong,
        }))
        .unwrap()
    };

    // Neither an internal call nor a call to another peer can be answered
    // from the wire.
    let got = t.node.handle_datagram(addr(77), &reply(internal), now).unwrap();
    assert!(matches!(got, Received::Response(ResponseOutcome::Unmatched)));
    let got = t.node.handle_datagram(addr(77), &reply(external), now).unwrap();
    assert!(matches!(got, Received::Response(ResponseOutcome::Unmatched)));
    assert!(t.node.is_pending(internal));
    assert!(t.node.is_pending(external));
    assert_eq!(count(&listener.0), 0);

    let got = t.node.handle_datagram(addr(6), &reply(external), now).unwrap();
    assert!(matches!(got, Received::Response(ResponseOutcome::Delivered)));
    assert_eq!(
        take(&listener.0),
        vec![CallEvent::Response(external, ResponsePayload::Pong, None)]
    );
}

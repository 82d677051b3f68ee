//! Channel RPC, pub/sub, and lifecycle behavior over a loopback connection.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use bytes::Bytes;
use serde_json::{json, Value};

use wsmux_client::loopback::LoopbackConnection;
use wsmux_client::{ChannelState, ClientError, Data, Delivery, Envelope, Frame};
use wsmux_core::topics;

mod common;
use common::{harness, open_env, reply, Recorder};

fn last_text(conn: &LoopbackConnection) -> String {
    match conn.sent().last().cloned() {
        Some(Frame::Text(s)) => s,
        other => panic!("expected a text frame, got {other:?}"),
    }
}

#[test]
fn echo_invoke_and_reply() {
    let h = harness();
    let conn = h.connect();
    let demo = h.open_channel(&conn, "demo");

    let got = Recorder::<Value>::new();
    let sink = got.clone();
    demo.invoke("echo", json!({"msg": "hi"}))
        .register(move |v| sink.push(v));

    assert_eq!(
        last_text(&conn),
        r#"{"C":"demo","D":"{\"msg\":\"hi\"}","T":"echo","Q":null,"R":null,"I":null}"#
    );

    conn.deliver(&reply("demo", "echo", json!({"msg": "hi"}))).unwrap();
    assert_eq!(got.items(), vec![json!({"msg": "hi"})]);
    assert!(!demo.has_pending("echo"));
}

#[test]
fn raw_data_is_sent_unchanged() {
    let h = harness();
    let conn = h.connect();
    let demo = h.open_channel(&conn, "demo");

    demo.publish("Say", Data::Raw(r#"{"text":"yo"}"#.into()));
    let sent = conn.take_sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].topic, "say");
    assert_eq!(sent[0].data, r#"{"text":"yo"}"#);
}

#[test]
fn subscription_topics_are_case_insensitive() {
    let h = harness();
    let conn = h.connect();
    let chat = h.open_channel(&conn, "Chat");

    let got = Recorder::<Delivery>::new();
    let sink = got.clone();
    chat.subscribe("Foo", move |d| sink.push(d));

    conn.deliver_text(r#"{"C":"chat","T":"foo","D":"{\"n\":1}"}"#);
    conn.deliver_text(r#"{"C":"CHAT","T":"FOO","D":"{\"n\":2}"}"#);

    assert_eq!(
        got.items(),
        vec![Delivery::Json(json!({"n": 1})), Delivery::Json(json!({"n": 2}))]
    );
}

#[test]
fn later_invoke_replaces_pending_call() {
    let h = harness();
    let conn = h.connect();
    let ch = h.open_channel(&conn, "calc");

    let first = Recorder::<Value>::new();
    let second = Recorder::<Value>::new();
    let (a, b) = (first.clone(), second.clone());

    ch.invoke("x", json!(1)).register(move |v| a.push(v));
    ch.invoke("x", json!(2)).register(move |v| b.push(v));

    conn.deliver(&reply("calc", "x", json!(42))).unwrap();
    conn.deliver(&reply("calc", "x", json!(43))).unwrap();

    assert_eq!(first.len(), 0);
    assert_eq!(second.items(), vec![json!(42)]);
}

#[test]
fn pending_call_wins_over_subscription() {
    let h = harness();
    let conn = h.connect();
    let ch = h.open_channel(&conn, "calc");

    let pending = Recorder::<Value>::new();
    let subs = Recorder::<Delivery>::new();
    let (p, s) = (pending.clone(), subs.clone());

    ch.on("sum", move |d| s.push(d));
    ch.invoke("sum", json!([1, 2])).register(move |v| p.push(v));

    conn.deliver(&reply("calc", "sum", json!(3))).unwrap();
    assert_eq!(pending.items(), vec![json!(3)]);
    assert_eq!(subs.len(), 0);

    // Subscription stays registered for later messages.
    conn.deliver(&reply("calc", "sum", json!(7))).unwrap();
    assert_eq!(subs.items(), vec![Delivery::Json(json!(7))]);
}

#[test]
fn unmatched_topic_hits_on_message_once() {
    let h = harness();
    let conn = h.connect();
    let ch = h.open_channel(&conn, "news");

    let got = Recorder::<Envelope>::new();
    let sink = got.clone();
    ch.on_message(move |env| sink.push(env));

    conn.deliver(&reply("news", "breaking", json!({"id": 1}))).unwrap();
    let items = got.items();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].topic, "breaking");
}

#[test]
fn user_topics_are_rejected_until_open() {
    let h = harness();
    let conn = h.connect();
    let ch = h.client.channel("late");
    assert_eq!(ch.state(), ChannelState::Opening);

    let got = Recorder::<Delivery>::new();
    let sink = got.clone();
    ch.on("tick", move |d| sink.push(d));

    conn.deliver(&reply("late", "tick", json!(1))).unwrap();
    assert_eq!(got.len(), 0);

    let err = ch.dispatch(reply("late", "tick", json!(1))).unwrap_err();
    assert!(matches!(err, ClientError::InvalidState(_)));

    conn.deliver(&open_env("late", "ci-9", "pid-9")).unwrap();
    conn.deliver(&reply("late", "tick", json!(2))).unwrap();
    assert_eq!(got.items(), vec![Delivery::Json(json!(2))]);
}

#[test]
fn open_sets_state_and_connection_info() {
    let h = harness();
    let conn = h.connect();
    let ch = h.client.channel("chat");

    let infos = Recorder::<String>::new();
    let sink = infos.clone();
    ch.on_open(move |info| sink.push(info.connection_id));

    conn.deliver(&open_env("chat", "ci-77", "pid-77")).unwrap();

    assert_eq!(ch.state(), ChannelState::Open);
    assert_eq!(ch.connection_id().as_deref(), Some("ci-77"));
    assert_eq!(infos.items(), vec!["ci-77".to_string()]);
    assert_eq!(h.client.persistent_id().as_deref(), Some("pid-77"));
}

#[test]
fn open_with_null_ids_still_opens() {
    let h = harness();
    let conn = h.connect();
    let ch = h.client.channel("chat");

    conn.deliver_text(r#"{"C":"chat","D":"{\"CI\":\"ci-9\",\"PI\":null}","T":"2","Q":null,"R":null,"I":null}"#);

    assert_eq!(ch.state(), ChannelState::Open);
    assert_eq!(ch.connection_id().as_deref(), Some("ci-9"));
    assert_eq!(h.client.persistent_id(), None);
}

#[test]
fn open_rejected_unless_closed() {
    let h = harness();
    let conn = h.connect();
    let ch = h.open_channel(&conn, "chat");

    assert!(matches!(ch.open(), Err(ClientError::InvalidState(_))));

    ch.close(false);
    assert_eq!(ch.state(), ChannelState::Closed);
    conn.take_sent();

    ch.open().unwrap();
    assert_eq!(ch.state(), ChannelState::Opening);
    let sent = conn.take_sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].topic, topics::INIT);
}

#[test]
fn binary_messages_reach_subscribers_with_metadata() {
    let h = harness();
    let conn = h.connect();
    let files = h.open_channel(&conn, "files");

    let got = Recorder::<Delivery>::new();
    let sink = got.clone();
    files.on("upload", move |d| sink.push(d));

    let env = Envelope::with_binary(
        "files",
        "upload",
        Data::Value(json!({"name": "a.bin"})),
        Bytes::from_static(&[1, 2, 3, 4]),
    );
    conn.deliver(&env).unwrap();

    assert_eq!(
        got.items(),
        vec![Delivery::Binary {
            binary: Bytes::from_static(&[1, 2, 3, 4]),
            metadata: json!({"name": "a.bin"}),
        }]
    );
}

#[test]
fn binary_reply_resolves_pending_call_with_metadata() {
    let h = harness();
    let conn = h.connect();
    let files = h.open_channel(&conn, "files");

    let subscribed = Recorder::<Delivery>::new();
    let sub = subscribed.clone();
    files.on("fetch", move |d| sub.push(d));

    let replies = Recorder::<Value>::new();
    let sink = replies.clone();
    files
        .invoke("Fetch", json!({"name": "a.bin"}))
        .register(move |v| sink.push(v));

    let env = Envelope::with_binary(
        "files",
        "fetch",
        Data::Value(json!({"name": "a.bin", "size": 4})),
        Bytes::from_static(&[9, 8, 7, 6]),
    );
    conn.deliver(&env).unwrap();

    assert_eq!(replies.items(), vec![json!({"name": "a.bin", "size": 4})]);
    assert_eq!(subscribed.len(), 0);
    assert!(!files.has_pending("fetch"));
}

#[test]
fn invoke_binary_sends_binary_frame() {
    let h = harness();
    let conn = h.connect();
    let files = h.open_channel(&conn, "files");

    files.invoke_binary("Store", Bytes::from_static(b"payload"), json!({"size": 7}));

    assert!(matches!(conn.sent().last(), Some(Frame::Binary(_))));
    let sent = conn.take_sent();
    assert_eq!(sent[0].topic, "store");
    assert_eq!(sent[0].binary.as_deref(), Some(&b"payload"[..]));
    assert_eq!(sent[0].parse_data(), json!({"size": 7}));
}

#[test]
fn subscribe_always_resends() {
    let h = harness();
    let conn = h.connect();
    let ch = h.open_channel(&conn, "chat");

    ch.subscribe("Room", |_| {});
    ch.subscribe("room", |_| {});

    let sent = conn.take_sent();
    assert_eq!(sent.len(), 2);
    for env in &sent {
        assert_eq!(env.topic, topics::SUBSCRIBE);
        assert_eq!(env.parse_data(), json!({"T": "room", "A": false}));
    }
}

#[test]
fn unsubscribe_notifies_server_but_off_does_not() {
    let h = harness();
    let conn = h.connect();
    let ch = h.open_channel(&conn, "chat");

    ch.on("a", |_| {});
    ch.on("b", |_| {});
    conn.take_sent();

    ch.off("A");
    assert!(!ch.has_subscription("a"));
    assert!(conn.take_sent().is_empty());

    ch.unsubscribe("B");
    assert!(!ch.has_subscription("b"));
    let sent = conn.take_sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].topic, topics::UNSUBSCRIBE);
    assert_eq!(sent[0].parse_data(), json!({"T": "b", "A": false}));
}

#[test]
fn properties_use_reserved_prefixes() {
    let h = harness();
    let conn = h.connect();
    let ch = h.open_channel(&conn, "settings");

    ch.set_property("Volume", json!(11));
    let sent = conn.take_sent();
    assert_eq!(sent[0].topic, "set_volume");
    assert_eq!(sent[0].parse_data(), json!(11));

    let got = Recorder::<Value>::new();
    let sink = got.clone();
    ch.get_property("volume", move |v| sink.push(v));
    let sent = conn.take_sent();
    assert_eq!(sent[0].topic, "get_volume");

    conn.deliver(&reply("settings", "get_volume", json!(11))).unwrap();
    conn.deliver(&reply("settings", "get_volume", json!(12))).unwrap();
    assert_eq!(got.items(), vec![json!(11)]);
    assert!(!ch.has_subscription("get_volume"));
}

#[test]
fn local_close_sends_close_and_disposes() {
    let h = harness();
    let conn = h.connect();
    let ch = h.open_channel(&conn, "chat");

    let closes = Recorder::<()>::new();
    let sink = closes.clone();
    ch.on_close(move || sink.push(()));

    ch.close(true);
    let sent = conn.take_sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].topic, topics::CLOSE);
    assert_eq!(closes.len(), 1);
    assert!(ch.is_detached());
    assert!(h.client.channel_with("chat", false).is_none());

    // Orphaned handle: no traffic.
    ch.invoke("hello", json!(1));
    ch.subscribe("x", |_| {});
    assert!(conn.take_sent().is_empty());
}

#[test]
fn close_on_closed_channel_still_fires_on_close() {
    let h = harness();
    let conn = h.connect();
    let ch = h.client.channel("idle");
    conn.take_sent();

    let closes = Recorder::<()>::new();
    let sink = closes.clone();
    ch.on_close(move || sink.push(()));

    ch.close(false);
    assert!(conn.take_sent().is_empty());
    assert_eq!(closes.len(), 1);
}

#[test]
fn remote_close_marks_channel_closed() {
    let h = harness();
    let conn = h.connect();
    let ch = h.open_channel(&conn, "chat");

    let closes = Recorder::<()>::new();
    let sink = closes.clone();
    ch.on_close(move || sink.push(()));

    conn.deliver(&Envelope::control("chat", topics::CLOSE, Data::empty()))
        .unwrap();
    assert_eq!(ch.state(), ChannelState::Closed);
    assert_eq!(closes.len(), 1);
}

#[test]
fn ping_is_answered_with_pong() {
    let h = harness();
    let conn = h.connect();
    h.open_channel(&conn, "chat");

    conn.deliver(&Envelope::control("chat", topics::PING, Data::Raw("17".into())))
        .unwrap();
    let sent = conn.take_sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].topic, topics::PONG);
    assert_eq!(sent[0].data, "17");
}

#[tokio::test]
async fn reply_future_resolves() {
    let h = harness();
    let conn = h.connect();
    let ch = h.open_channel(&conn, "calc");

    let call = ch.invoke("sum", json!([2, 3]));
    let waiter = tokio::spawn(call.reply());
    tokio::task::yield_now().await;

    conn.deliver(&reply("calc", "sum", json!(5))).unwrap();
    assert_eq!(waiter.await.unwrap().unwrap(), json!(5));
}

#[tokio::test]
async fn replaced_reply_future_reports_superseded() {
    let h = harness();
    let conn = h.connect();
    let ch = h.open_channel(&conn, "calc");

    let first = tokio::spawn(ch.invoke("sum", json!(1)).reply());
    tokio::task::yield_now().await;

    let second = ch.invoke("sum", json!(2));
    let err = first.await.unwrap().unwrap_err();
    assert!(matches!(err, ClientError::CallSuperseded));

    let waiter = tokio::spawn(second.reply());
    tokio::task::yield_now().await;
    conn.deliver(&reply("calc", "sum", json!(2))).unwrap();
    assert_eq!(waiter.await.unwrap().unwrap(), json!(2));
}

use super::*;
use crate::methods::{MethodError, MethodResult};

const PATH: &str = "/com/example/Sender";
const IFACE: &str = "com.example.Sender";

async fn double(args: Vec<Value>) -> MethodResult {
    match args.first().and_then(Value::as_i64) {
        Some(n) => Ok(vec![Value::I64(n * 2)]),
        None => Err(MethodError::invalid_args("expected an integer")),
    }
}

#[tokio::test]
async fn test_unique_names_are_distinct() {
    let bus = MockBus::new();
    let a = bus.connect_peer(BusKind::Session).await.unwrap();
    let b = bus.connect_peer(BusKind::Session).await.unwrap();

    assert!(is_unique_name(a.name()));
    assert_ne!(a.name(), b.name());
    assert_eq!(bus.peer_count().await, 2);
}

#[tokio::test]
async fn test_fail_on_connect() {
    let bus = MockBus::new();
    bus.set_fail_on_connect(Some("no socket")).await;

    let result = bus.connect(BusKind::System).await;
    assert!(matches!(result, Err(Error::Connection(ref m)) if m == "no socket"));
}

#[tokio::test]
async fn test_request_name_do_not_queue() {
    let bus = MockBus::new();
    let a = bus.connect_peer(BusKind::Session).await.unwrap();
    let b = bus.connect_peer(BusKind::Session).await.unwrap();

    assert_eq!(a.request_name("com.example.App").await.unwrap(), NameReply::PrimaryOwner);
    assert_eq!(a.request_name("com.example.App").await.unwrap(), NameReply::AlreadyOwner);
    assert_eq!(b.request_name("com.example.App").await.unwrap(), NameReply::Exists);
    assert_eq!(
        bus.owner_of(BusKind::Session, "com.example.App").await.as_deref(),
        Some(a.name())
    );
}

#[tokio::test]
async fn test_buses_are_separate() {
    let bus = MockBus::new();
    let session = bus.connect_peer(BusKind::Session).await.unwrap();
    let system = bus.connect_peer(BusKind::System).await.unwrap();

    session.request_name("com.example.App").await.unwrap();
    assert_eq!(system.request_name("com.example.App").await.unwrap(), NameReply::PrimaryOwner);
}

#[tokio::test]
async fn test_request_unique_name_rejected() {
    let bus = MockBus::new();
    let a = bus.connect_peer(BusKind::Session).await.unwrap();

    let result = a.request_name(":1.99").await;
    assert!(matches!(result, Err(Error::InvalidArgument(_))));
}

#[tokio::test]
async fn test_signal_requires_match_rule() {
    let bus = MockBus::new();
    let emitter = bus.connect_peer(BusKind::Session).await.unwrap();
    let listener = bus.connect_peer(BusKind::Session).await.unwrap();
    let mut signals = listener.signals().await.unwrap();

    assert_eq!(emitter.emit_signal(PATH, IFACE, "StateChanged", vec![]).await, 0);

    listener
        .add_match(&MatchRule::for_sender(PATH, IFACE, emitter.name()))
        .await
        .unwrap();
    assert_eq!(
        emitter.emit_signal(PATH, IFACE, "StateChanged", vec![1i32.into()]).await,
        1
    );

    let received = signals.next().await.unwrap();
    assert_eq!(received.sender.as_deref(), Some(emitter.name()));
    assert_eq!(received.member, "StateChanged");
    assert_eq!(received.args, vec![Value::I32(1)]);
}

#[tokio::test]
async fn test_signal_matches_well_known_sender() {
    let bus = MockBus::new();
    let emitter = bus.connect_peer(BusKind::Session).await.unwrap();
    let listener = bus.connect_peer(BusKind::Session).await.unwrap();
    let mut signals = listener.signals().await.unwrap();

    listener
        .add_match(&MatchRule::for_sender(PATH, IFACE, "com.example.Sender"))
        .await
        .unwrap();
    assert_eq!(emitter.emit_signal(PATH, IFACE, "StateChanged", vec![]).await, 0);

    emitter.request_name("com.example.Sender").await.unwrap();
    assert_eq!(emitter.emit_signal(PATH, IFACE, "StateChanged", vec![]).await, 1);

    let received = signals.next().await.unwrap();
    assert_eq!(received.sender.as_deref(), Some(emitter.name()));
}

#[tokio::test]
async fn test_name_owner_changed_broadcast() {
    let bus = MockBus::new();
    let watcher = bus.connect_peer(BusKind::Session).await.unwrap();
    let owner = bus.connect_peer(BusKind::Session).await.unwrap();
    let mut signals = watcher.signals().await.unwrap();
    watcher
        .add_match(&MatchRule::name_owner_changed("com.example.Sender"))
        .await
        .unwrap();

    owner.request_name("com.example.Sender").await.unwrap();
    owner.disconnect().await;

    let acquired = signals.next().await.unwrap();
    assert_eq!(
        acquired.args,
        vec![Value::from("com.example.Sender"), Value::from(""), Value::from(owner.name())]
    );
    let released = signals.next().await.unwrap();
    assert_eq!(
        released.args,
        vec![Value::from("com.example.Sender"), Value::from(owner.name()), Value::from("")]
    );
    assert_eq!(bus.owner_of(BusKind::Session, "com.example.Sender").await, None);
}

#[tokio::test]
async fn test_inject_bypasses_rules() {
    let bus = MockBus::new();
    let listener = bus.connect_peer(BusKind::Session).await.unwrap();
    let mut signals = listener.signals().await.unwrap();

    assert!(bus.inject(listener.name(), RawSignal::new("Anything")).await);
    assert!(!bus.inject(":1.404", RawSignal::new("Anything")).await);
    assert_eq!(signals.next().await.unwrap().member, "Anything");
}

#[tokio::test]
async fn test_call_exported_method() {
    let bus = MockBus::new();
    let server = bus.connect_peer(BusKind::Session).await.unwrap();
    let client = bus.connect_peer(BusKind::Session).await.unwrap();

    server.request_name("com.example.Math").await.unwrap();
    server
        .export(
            MethodTable::new().method("Double", double),
            "/com/example/Math",
            "com.example.Math",
        )
        .await
        .unwrap();

    let call = MethodCall::new(
        "com.example.Math",
        "/com/example/Math",
        "com.example.Math",
        "Double",
    )
    .with_args(vec![Value::I32(21)]);
    assert_eq!(client.call(&call).await.unwrap(), vec![Value::I64(42)]);

    let by_unique = MethodCall { destination: server.name().to_string(), ..call };
    assert_eq!(client.call(&by_unique).await.unwrap(), vec![Value::I64(42)]);
}

#[tokio::test]
async fn test_call_error_names() {
    let bus = MockBus::new();
    let server = bus.connect_peer(BusKind::Session).await.unwrap();
    let client = bus.connect_peer(BusKind::Session).await.unwrap();
    server.request_name("com.example.Math").await.unwrap();
    server
        .export(
            MethodTable::new().method("Double", double),
            "/com/example/Math",
            "com.example.Math",
        )
        .await
        .unwrap();

    const MATH: &str = "com.example.Math";
    const MATH_PATH: &str = "/com/example/Math";
    let cases = [
        ("com.example.Nobody", MATH_PATH, MATH, "Double", error_names::SERVICE_UNKNOWN),
        (MATH, "/nope", MATH, "Double", error_names::UNKNOWN_OBJECT),
        (MATH, MATH_PATH, "com.example.Other", "Double", error_names::UNKNOWN_INTERFACE),
        (MATH, MATH_PATH, MATH, "Triple", error_names::UNKNOWN_METHOD),
        (MATH, MATH_PATH, MATH, "Double", error_names::INVALID_ARGS),
    ];

    for (destination, path, interface, method, expected) in cases {
        let err = client
            .call(&MethodCall::new(destination, path, interface, method))
            .await
            .unwrap_err();
        assert_eq!(
            err.remote_error_name(),
            Some(expected),
            "{}.{} on {}",
            interface,
            method,
            path
        );
    }
}

#[tokio::test]
async fn test_closed_connection_errors() {
    let bus = MockBus::new();
    let conn = bus.connect_peer(BusKind::Session).await.unwrap();
    conn.disconnect().await;

    assert!(matches!(conn.request_name("com.example.App").await, Err(Error::Connection(_))));
    assert!(matches!(conn.signals().await, Err(Error::Connection(_))));
    assert!(matches!(
        conn.add_match(&MatchRule::signals()).await,
        Err(Error::MatchRule { .. })
    ));
}

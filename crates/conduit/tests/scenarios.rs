//! End-to-end scenarios run over an in-memory `conduit-testkit` harness.

use std::sync::Arc;
use std::time::Duration;

use conduit_core::{CommanderEvent, CommanderHandle, DisconnectReason, HandlerTable};
use conduit_testkit::{build, build_with_handlers, handshaken};

struct EchoService;

/// S1: happy RPC. A bot sends a request, the service handler responds, and
/// the bot's callback observes the matching data.
#[tokio::test]
async fn s1_happy_rpc() {
    let mut table = HandlerTable::<EchoService>::new();
    table
        .register_request("echo", |commander, envelope, _service| {
            let data = envelope.data.clone();
            commander.response(&envelope, Some(data));
        })
        .unwrap();

    let harness = handshaken(build_with_handlers(table, EchoService)).await;

    let (_id, rx) = harness.bot.handle.fetch("echo", Some(b"hello".to_vec()));
    let response = tokio::time::timeout(Duration::from_secs(1), rx)
        .await
        .expect("should not hang")
        .unwrap();

    assert!(response.error.is_empty());
    assert_eq!(response.data, b"hello");
}

/// S2: timeout. A request with no registered handler on the service side
/// never gets a response; the bot's local timeout engine synthesizes one.
#[tokio::test]
async fn s2_timeout() {
    let harness = handshaken(build::<()>(())).await;

    let (_id, rx) = harness.bot.handle.fetch("nonexistent", None);
    let response = tokio::time::timeout(Duration::from_secs(1), rx)
        .await
        .expect("should not hang")
        .unwrap();

    assert_eq!(response.error, "timeout");
}

/// S3: service-side kick on silence. With no inbound traffic at all, the
/// service's pulse eventually fires, sending Kick(Timeout) before
/// disconnecting. The bot receives that Kick block before the transport
/// tears down, so it records the same reason rather than an unknown one.
#[tokio::test]
async fn s3_service_kicks_silent_bot() {
    let mut harness = handshaken(build::<()>(())).await;

    let service_event = tokio::time::timeout(Duration::from_secs(2), harness.service.next_event())
        .await
        .expect("service should disconnect")
        .unwrap();
    assert!(matches!(
        service_event,
        CommanderEvent::Disconnected(DisconnectReason::Timeout)
    ));

    let bot_event = tokio::time::timeout(Duration::from_secs(2), harness.bot.next_event())
        .await
        .expect("bot should also observe the disconnect")
        .unwrap();
    assert!(matches!(
        bot_event,
        CommanderEvent::Disconnected(DisconnectReason::Timeout)
    ));
}

/// S4: command fan-out. Multiple subscribers registered for the same
/// command name on the bot side all observe one inbound Command, invoked in
/// the order they were registered.
#[tokio::test]
async fn s4_command_fan_out() {
    let harness = handshaken(build::<()>(())).await;

    let order = Arc::new(std::sync::Mutex::new(Vec::new()));
    for i in 0..3u32 {
        let order = order.clone();
        harness.bot.handle.on("announce", move |_commander, _envelope| {
            order.lock().unwrap().push(i);
        });
    }

    harness.service.handle.command("announce", None);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
}

/// S5: bad handshake. A validator that always fails causes the service to
/// kick with reason Handshake instead of completing the handshake.
#[tokio::test]
async fn s5_bad_handshake_is_kicked() {
    use conduit_core::{Validator, VerifyOutcome};

    struct RejectAll;
    impl Validator for RejectAll {
        fn handshake(&self, _body: Option<&[u8]>) -> Vec<u8> {
            Vec::new()
        }
        fn verify_handshake(&self, _body: &[u8]) -> VerifyOutcome {
            VerifyOutcome::Failed
        }
        fn acknowledgement(&self, _body: &[u8]) -> Vec<u8> {
            Vec::new()
        }
        fn verify_acknowledgement(&self, _body: &[u8]) -> VerifyOutcome {
            VerifyOutcome::Failed
        }
    }

    let harness = conduit_testkit::build_with(
        HandlerTable::<()>::new(),
        (),
        Arc::new(RejectAll),
        Arc::new(conduit_core::DefaultJsonSerializer),
    );

    let mut bot = harness.bot;
    let mut service = harness.service;

    let service_event = tokio::time::timeout(Duration::from_secs(1), service.next_event())
        .await
        .expect("service should report disconnect")
        .unwrap();
    assert!(matches!(
        service_event,
        CommanderEvent::Disconnected(DisconnectReason::Handshake)
    ));

    // The bot never receives a valid acknowledgement either; it should not
    // report Ready.
    let bot_event = tokio::time::timeout(Duration::from_millis(500), bot.next_event()).await;
    assert!(bot_event.is_err() || !matches!(bot_event.unwrap(), Some(CommanderEvent::Ready)));
}

/// S6: server shutdown. Two clients connect to a real listening `Server`;
/// calling `Server::stop()` kicks both with `ServerDown` and the listener
/// task itself exits.
#[tokio::test]
async fn s6_server_shutdown_kicks_with_reason() {
    use conduit::{Client, Config, Server, ServiceHandler};
    use std::sync::Mutex;

    struct RecordingHandler {
        disconnects: Arc<Mutex<Vec<DisconnectReason>>>,
    }

    impl ServiceHandler<()> for RecordingHandler {
        fn on_disconnect(&self, _commander: &CommanderHandle<()>, reason: DisconnectReason) {
            self.disconnects.lock().unwrap().push(reason);
        }
    }

    let disconnects = Arc::new(Mutex::new(Vec::new()));
    let server = Arc::new(Server::new(
        Config {
            port: 0,
            ..Config::default()
        },
        HandlerTable::<()>::new(),
        (),
        RecordingHandler {
            disconnects: disconnects.clone(),
        },
    ));

    let serve_handle = tokio::spawn(server.clone().serve());
    let addr = server.local_addr().await;
    let client_config = Config {
        port: addr.port(),
        ..Config::default()
    };

    let mut client_a = Client::<()>::connect(&client_config).await.unwrap();
    assert!(client_a.ready().await);
    let mut client_b = Client::<()>::connect(&client_config).await.unwrap();
    assert!(client_b.ready().await);

    // Give the server a moment to register both connections before tearing
    // them down.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(server.live_connection_count(), 2);

    server.stop();

    let event_a = tokio::time::timeout(Duration::from_secs(1), client_a.next_event())
        .await
        .expect("client a should disconnect")
        .unwrap();
    let event_b = tokio::time::timeout(Duration::from_secs(1), client_b.next_event())
        .await
        .expect("client b should disconnect")
        .unwrap();
    assert!(matches!(
        event_a,
        CommanderEvent::Disconnected(DisconnectReason::ServerDown)
    ));
    assert!(matches!(
        event_b,
        CommanderEvent::Disconnected(DisconnectReason::ServerDown)
    ));

    tokio::time::timeout(Duration::from_secs(1), serve_handle)
        .await
        .expect("listener task should exit once stop() is called")
        .unwrap()
        .unwrap();

    // The server's own lifecycle task runs independently of the clients'
    // event streams; give it a moment to record both disconnects too.
    tokio::time::sleep(Duration::from_millis(50)).await;
    let recorded = disconnects.lock().unwrap();
    assert_eq!(recorded.len(), 2);
    assert!(recorded.iter().all(|r| *r == DisconnectReason::ServerDown));
}

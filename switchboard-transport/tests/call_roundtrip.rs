//! End-to-end call tests over real loopback TCP.
//!
//! Two channels, each listening on an ephemeral port, calling each other:
//! argument bytes must round-trip unchanged, identify must fire exactly
//! once per connection, and unknown endpoint names must fail the caller
//! while leaving the connection healthy.

mod common;

use std::time::Duration;

use serde::{Deserialize, Serialize};
use switchboard_transport::{
    CallError, ChannelConfig, ChannelEvent, SendOptions, json_endpoint,
};

use common::{listening_channel, run_local};

#[test]
fn test_echo_round_trip() {
    run_local(async {
        let a = listening_channel("server-a", ChannelConfig::local_network()).await;
        let b = listening_channel("server-b", ChannelConfig::local_network()).await;
        let mut a_events = a.events();
        let mut b_events = b.events();

        a.register_fn("echo", |call, response| {
            response.send(call.arg2.clone(), call.arg3.clone());
        });

        let response = b
            .send(
                SendOptions::to_host(a.host_port().to_string()),
                b"echo".to_vec(),
                b"k".to_vec(),
                b"v".to_vec(),
            )
            .await
            .expect("echo call should succeed");

        assert_eq!(response.arg1, b"k".to_vec());
        assert_eq!(response.arg2, b"v".to_vec());

        // Identify fired exactly once on each side.
        let mut a_identified = 0;
        while let Ok(event) = a_events.try_recv() {
            if let ChannelEvent::Identified { host_port } = event {
                assert_eq!(host_port, b.host_port());
                a_identified += 1;
            }
        }
        let mut b_identified = 0;
        while let Ok(event) = b_events.try_recv() {
            if let ChannelEvent::Identified { host_port } = event {
                assert_eq!(host_port, a.host_port());
                b_identified += 1;
            }
        }
        assert_eq!(a_identified, 1);
        assert_eq!(b_identified, 1);

        // Each registry holds exactly one connection for the other side.
        assert_eq!(a.peers().len(), 1);
        assert_eq!(b.peers().len(), 1);
        assert_eq!(a.peer_connections(&b.host_port()).len(), 1);
        assert_eq!(b.peer_connections(&a.host_port()).len(), 1);

        a.quit().await;
        b.quit().await;
    });
}

#[test]
fn test_args_round_trip_arbitrary_bytes() {
    run_local(async {
        let a = listening_channel("server-a", ChannelConfig::local_network()).await;
        let b = listening_channel("server-b", ChannelConfig::local_network()).await;

        a.register_fn("echo", |call, response| {
            response.send(call.arg2.clone(), call.arg3.clone());
        });

        let arg2: Vec<u8> = (0..=255u8).collect();
        let arg3 = vec![0x00, 0xFF, 0x7F, 0x80, 0x0A, 0x0D];
        let response = b
            .send(
                SendOptions::to_host(a.host_port().to_string()),
                b"echo".to_vec(),
                arg2.clone(),
                arg3.clone(),
            )
            .await
            .expect("echo call should succeed");

        assert_eq!(response.arg1, arg2);
        assert_eq!(response.arg2, arg3);

        a.quit().await;
        b.quit().await;
    });
}

#[test]
fn test_unknown_endpoint_fails_caller() {
    run_local(async {
        let a = listening_channel("server-a", ChannelConfig::local_network()).await;
        let b = listening_channel("server-b", ChannelConfig::local_network()).await;
        let mut a_events = a.events();

        let result = b
            .send(
                SendOptions::to_host(a.host_port().to_string()),
                b"missing".to_vec(),
                Vec::new(),
                Vec::new(),
            )
            .await;

        assert!(
            matches!(&result, Err(CallError::UnknownEndpoint { name }) if name == "missing"),
            "expected UnknownEndpoint, got {result:?}"
        );

        let mut saw_missing = false;
        while let Ok(event) = a_events.try_recv() {
            if let ChannelEvent::EndpointMissing { name } = event {
                assert_eq!(name, "missing");
                saw_missing = true;
            }
        }
        assert!(saw_missing, "server should emit the endpoint-missing event");

        // The connection survives a missed endpoint.
        let follow_up = b
            .send(
                SendOptions::to_host(a.host_port().to_string()),
                b"still-missing".to_vec(),
                Vec::new(),
                Vec::new(),
            )
            .await;
        assert!(matches!(follow_up, Err(CallError::UnknownEndpoint { .. })));
        assert_eq!(b.peer_connections(&a.host_port()).len(), 1);

        a.quit().await;
        b.quit().await;
    });
}

#[test]
fn test_responses_complete_out_of_order() {
    run_local(async {
        let a = listening_channel("server-a", ChannelConfig::local_network()).await;
        let b = listening_channel("server-b", ChannelConfig::local_network()).await;

        // Defer the first response until the second request has been
        // answered: completion order must not matter to the callers.
        let parked = std::rc::Rc::new(std::cell::RefCell::new(Vec::new()));
        let parked_clone = parked.clone();
        a.register_fn("park", move |_call, response| {
            parked_clone.borrow_mut().push(response);
        });
        a.register_fn("now", |call, response| {
            response.send(call.arg2.clone(), Vec::new());
        });
        let parked_release = parked.clone();
        a.register_fn("release", move |_call, response| {
            for waiting in parked_release.borrow_mut().drain(..) {
                waiting.send(b"late".to_vec(), Vec::new());
            }
            response.send(Vec::new(), Vec::new());
        });

        // Warm up the connection so every later call shares it and writes
        // stay ordered.
        b.send(
            SendOptions::to_host(a.host_port().to_string()),
            b"now".to_vec(),
            Vec::new(),
            Vec::new(),
        )
        .await
        .expect("warm-up call should succeed");

        let b_clone = b.clone();
        let a_host = a.host_port().to_string();
        let first = tokio::task::spawn_local(async move {
            b_clone
                .send(
                    SendOptions::to_host(a_host),
                    b"park".to_vec(),
                    Vec::new(),
                    Vec::new(),
                )
                .await
        });

        let second = b
            .send(
                SendOptions::to_host(a.host_port().to_string()),
                b"now".to_vec(),
                b"fast".to_vec(),
                Vec::new(),
            )
            .await
            .expect("second call should succeed");
        assert_eq!(second.arg1, b"fast".to_vec());

        b.send(
            SendOptions::to_host(a.host_port().to_string()),
            b"release".to_vec(),
            Vec::new(),
            Vec::new(),
        )
        .await
        .expect("release call should succeed");

        let first = first.await.expect("task").expect("parked call should succeed");
        assert_eq!(first.arg1, b"late".to_vec());

        a.quit().await;
        b.quit().await;
    });
}

#[test]
fn test_bidirectional_calls_share_one_connection() {
    run_local(async {
        let a = listening_channel("server-a", ChannelConfig::local_network()).await;
        let b = listening_channel("server-b", ChannelConfig::local_network()).await;

        a.register_fn("ping", |_call, response| {
            response.send(b"pong-from-a".to_vec(), Vec::new());
        });
        b.register_fn("ping", |_call, response| {
            response.send(b"pong-from-b".to_vec(), Vec::new());
        });

        // B dials A; A adopts the inbound connection under B's identity.
        let from_b = b
            .send(
                SendOptions::to_host(a.host_port().to_string()),
                b"ping".to_vec(),
                Vec::new(),
                Vec::new(),
            )
            .await
            .expect("b -> a call");
        assert_eq!(from_b.arg1, b"pong-from-a".to_vec());

        // A calls back over the adopted connection instead of dialing.
        let from_a = a
            .send(
                SendOptions::to_host(b.host_port().to_string()),
                b"ping".to_vec(),
                Vec::new(),
                Vec::new(),
            )
            .await
            .expect("a -> b call");
        assert_eq!(from_a.arg1, b"pong-from-b".to_vec());

        // Still exactly one connection on each side.
        assert_eq!(a.peers().len(), 1);
        assert_eq!(b.peers().len(), 1);

        a.quit().await;
        b.quit().await;
    });
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
struct AddRequest {
    a: i64,
    b: i64,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
struct AddResponse {
    sum: i64,
}

#[test]
fn test_json_typed_calls() {
    run_local(async {
        let a = listening_channel("server-a", ChannelConfig::local_network()).await;
        let b = listening_channel("server-b", ChannelConfig::local_network()).await;

        a.register(
            "add",
            json_endpoint(|req: AddRequest| Ok::<_, String>(AddResponse { sum: req.a + req.b })),
        );

        let response: AddResponse = b
            .call_json(
                SendOptions::to_host(a.host_port().to_string()).with_service("calculator"),
                "add",
                &AddRequest { a: 20, b: 22 },
            )
            .await
            .expect("typed call should succeed");
        assert_eq!(response, AddResponse { sum: 42 });

        a.quit().await;
        b.quit().await;
    });
}

#[test]
fn test_send_without_host_fails_fast() {
    run_local(async {
        let b = listening_channel("server-b", ChannelConfig::local_network()).await;

        let result = b
            .send(SendOptions::default(), b"echo".to_vec(), Vec::new(), Vec::new())
            .await;
        assert!(matches!(result, Err(CallError::InvalidArgument { .. })));

        let result = b
            .send(
                SendOptions::to_host("not-a-hostport"),
                b"echo".to_vec(),
                Vec::new(),
                Vec::new(),
            )
            .await;
        assert!(matches!(result, Err(CallError::InvalidArgument { .. })));

        b.quit().await;
    });
}

#[test]
fn test_register_overwrites_previous_handler() {
    run_local(async {
        let a = listening_channel("server-a", ChannelConfig::local_network()).await;
        let b = listening_channel("server-b", ChannelConfig::local_network()).await;

        a.register_fn("greet", |_call, response| {
            response.send(b"old".to_vec(), Vec::new());
        });
        a.register_fn("greet", |_call, response| {
            response.send(b"new".to_vec(), Vec::new());
        });

        let response = b
            .send(
                SendOptions::to_host(a.host_port().to_string()),
                b"greet".to_vec(),
                Vec::new(),
                Vec::new(),
            )
            .await
            .expect("call should succeed");
        assert_eq!(response.arg1, b"new".to_vec());

        a.quit().await;
        b.quit().await;
    });
}

#[test]
fn test_many_concurrent_calls_multiplex() {
    run_local(async {
        let a = listening_channel("server-a", ChannelConfig::local_network()).await;
        let b = listening_channel("server-b", ChannelConfig::local_network()).await;

        a.register_fn("echo", |call, response| {
            response.send(call.arg2.clone(), Vec::new());
        });

        let mut tasks = Vec::new();
        for i in 0..32u32 {
            let b = b.clone();
            let host = a.host_port().to_string();
            tasks.push(tokio::task::spawn_local(async move {
                let payload = format!("payload-{i}").into_bytes();
                let response = b
                    .send(
                        SendOptions::to_host(host).with_timeout(Duration::from_secs(2)),
                        b"echo".to_vec(),
                        payload.clone(),
                        Vec::new(),
                    )
                    .await
                    .expect("call should succeed");
                assert_eq!(response.arg1, payload);
            }));
        }
        for task in tasks {
            task.await.expect("task should finish");
        }

        // All calls shared the single outbound connection.
        assert_eq!(b.peer_connections(&a.host_port()).len(), 1);
        let conn = &b.peer_connections(&a.host_port())[0];
        assert_eq!(conn.out_pending(), 0);

        a.quit().await;
        b.quit().await;
    });
}

// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! End-to-end invocation tests over in-memory byte streams.

mod common;

use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use common::{decode_all, invocation_head, live_claims_for, public_key, sign_jwt, signed_headers, signing_key, types};
use relay_sdk::{
    ComponentDefinition, CryptoBackend, Endpoint, EndpointOptions, HandlerError, IdentityError,
    InvocationOutcome, JournalValueCodec, JournalValueCodecProvider, Message, MessageFlags,
    MessageType, Registry, SdkError, handler_fn,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::sync::Notify;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::layer::SubscriberExt;

const GREET: &str = "/invoke/Greeter/greet";

fn greeter() -> Registry {
    Registry::new()
        .with_component(ComponentDefinition::service("Greeter").handler(
            "greet",
            handler_fn(|_ctx, name| async move {
                let mut out = b"Hello, ".to_vec();
                out.extend_from_slice(&name);
                Ok(Bytes::from(out))
            }),
        ))
        .unwrap()
}

/// Request and response pipes: the test writes the request and reads the
/// response, the endpoint gets the other ends.
fn pipes() -> ((DuplexStream, DuplexStream), (DuplexStream, DuplexStream)) {
    let (req_tx, req_rx) = tokio::io::duplex(64 * 1024);
    let (resp_tx, resp_rx) = tokio::io::duplex(64 * 1024);
    ((req_tx, resp_rx), (req_rx, resp_tx))
}

async fn read_response(mut resp_rx: DuplexStream) -> Vec<Message> {
    let mut written = Vec::new();
    resp_rx.read_to_end(&mut written).await.unwrap();
    decode_all(&written)
}

#[tokio::test]
async fn test_signed_invocation_completes() {
    let key = signing_key(10);
    let endpoint = Endpoint::new(
        greeter(),
        EndpointOptions::new()
            .with_identity_key(public_key(&key))
            .with_crypto_backend(CryptoBackend::Ring),
    )
    .unwrap();
    let headers = signed_headers(&sign_jwt(&key, live_claims_for(GREET)));

    let ((mut req_tx, resp_rx), (req_rx, resp_tx)) = pipes();
    req_tx.write_all(&invocation_head(b"world")).await.unwrap();
    drop(req_tx);

    let outcome = endpoint.invoke(GREET, &headers, req_rx, resp_tx).await.unwrap();
    assert_eq!(outcome, InvocationOutcome::Completed);

    let messages = read_response(resp_rx).await;
    assert_eq!(types(&messages), vec![MessageType::Output, MessageType::End]);
    assert_eq!(&messages[0].payload()[..], b"Hello, world");
}

#[tokio::test]
async fn test_handler_messages_leave_in_program_order() {
    let registry = Registry::new()
        .with_component(ComponentDefinition::service("Steps").handler(
            "run",
            handler_fn(|ctx, input| async move {
                let custom = MessageType::custom(0xFC10)
                    .map_err(|e| HandlerError::new(e.to_string()))?;
                for step in ["one", "two", "three"] {
                    let sender = ctx.clone();
                    ctx.queue()
                        .enqueue_and_await(move || async move {
                            let message = Message::new(
                                custom,
                                MessageFlags::REQUIRES_ACK,
                                Bytes::from_static(step.as_bytes()),
                            )
                            .map_err(SdkError::from)?;
                            sender.send(message)
                        })
                        .await
                        .map_err(|e| HandlerError::new(e.to_string()))?;
                }
                let mut out = ctx.invocation_id().to_vec();
                out.push(b':');
                out.extend_from_slice(&input);
                Ok::<_, HandlerError>(Bytes::from(out))
            }),
        ))
        .unwrap();
    let endpoint = Endpoint::new(registry, EndpointOptions::new()).unwrap();

    let ((mut req_tx, resp_rx), (req_rx, resp_tx)) = pipes();
    req_tx.write_all(&invocation_head(b"go")).await.unwrap();

    let outcome = endpoint
        .invoke("/invoke/Steps/run", &Vec::<(String, String)>::new(), req_rx, resp_tx)
        .await
        .unwrap();
    assert_eq!(outcome, InvocationOutcome::Completed);

    let messages = read_response(resp_rx).await;
    let custom = MessageType::Custom(0xFC10);
    assert_eq!(
        types(&messages),
        vec![custom, custom, custom, MessageType::Output, MessageType::End]
    );
    let steps: Vec<&[u8]> = messages[..3].iter().map(|m| &m.payload()[..]).collect();
    assert_eq!(steps, vec![&b"one"[..], &b"two"[..], &b"three"[..]]);
    assert!(messages[0].flags().contains(MessageFlags::REQUIRES_ACK));
    assert_eq!(&messages[3].payload()[..], b"inv-1:go");
}

#[tokio::test]
async fn test_unauthenticated_request_never_reaches_handler() {
    let key = signing_key(11);
    let ran = Arc::new(AtomicBool::new(false));
    let registry = {
        let ran = Arc::clone(&ran);
        Registry::new()
            .with_component(ComponentDefinition::service("Greeter").handler(
                "greet",
                handler_fn(move |_ctx, input| {
                    ran.store(true, Ordering::SeqCst);
                    async move { Ok(input) }
                }),
            ))
            .unwrap()
    };
    let endpoint = Endpoint::new(
        registry,
        EndpointOptions::new().with_identity_key(public_key(&key)),
    )
    .unwrap();

    // No token at all.
    let ((mut req_tx, resp_rx), (req_rx, resp_tx)) = pipes();
    req_tx.write_all(&invocation_head(b"x")).await.unwrap();
    let err = endpoint
        .invoke(GREET, &Vec::<(String, String)>::new(), req_rx, resp_tx)
        .await
        .unwrap_err();
    assert!(matches!(err, SdkError::Identity(IdentityError::MissingIdentity)));
    assert_eq!(err.error_code(), "UNAUTHORIZED");
    assert!(read_response(resp_rx).await.is_empty());

    // Valid signature, but issued for another handler.
    let headers = signed_headers(&sign_jwt(&key, live_claims_for("/invoke/Greeter/other")));
    let ((mut req_tx, resp_rx), (req_rx, resp_tx)) = pipes();
    req_tx.write_all(&invocation_head(b"x")).await.unwrap();
    let err = endpoint.invoke(GREET, &headers, req_rx, resp_tx).await.unwrap_err();
    assert!(matches!(err, SdkError::Identity(IdentityError::InvalidClaims(_))));
    assert!(read_response(resp_rx).await.is_empty());

    assert!(!ran.load(Ordering::SeqCst));
}

#[tokio::test]
async fn test_unknown_target_is_rejected() {
    let endpoint = Endpoint::new(greeter(), EndpointOptions::new()).unwrap();
    for path in ["/invoke/Greeter/missing", "/invoke/Nobody/greet", "/discover"] {
        let (_client, (req_rx, resp_tx)) = pipes();
        let err = endpoint
            .invoke(path, &Vec::<(String, String)>::new(), req_rx, resp_tx)
            .await
            .unwrap_err();
        assert!(
            matches!(err, SdkError::UnknownTarget(_)),
            "path {} gave {:?}",
            path,
            err
        );
    }
}

#[tokio::test]
async fn test_handler_error_is_written_as_error_message() {
    let registry = Registry::new()
        .with_component(ComponentDefinition::virtual_object("Cart").handler(
            "checkout",
            handler_fn(|_ctx, _input| async move {
                Err::<Bytes, _>(HandlerError::with_code(409, "cart is empty"))
            }),
        ))
        .unwrap();
    let endpoint = Endpoint::new(registry, EndpointOptions::new()).unwrap();

    let ((mut req_tx, resp_rx), (req_rx, resp_tx)) = pipes();
    req_tx.write_all(&invocation_head(b"{}")).await.unwrap();
    drop(req_tx);

    let outcome = endpoint
        .invoke("/invoke/Cart/checkout", &Vec::<(String, String)>::new(), req_rx, resp_tx)
        .await
        .unwrap();
    let expected = HandlerError::with_code(409, "cart is empty");
    assert_eq!(outcome, InvocationOutcome::Failed(expected.clone()));

    let messages = read_response(resp_rx).await;
    assert_eq!(types(&messages), vec![MessageType::Error, MessageType::End]);
    let written: HandlerError = serde_json::from_slice(messages[0].payload()).unwrap();
    assert_eq!(written, expected);
}

#[tokio::test]
async fn test_handler_panic_becomes_error_message() {
    let registry = Registry::new()
        .with_component(ComponentDefinition::service("Boom").handler(
            "now",
            handler_fn(|_ctx, input| async move {
                if input.is_empty() {
                    panic!("no input");
                }
                Ok(input)
            }),
        ))
        .unwrap();
    let endpoint = Endpoint::new(registry, EndpointOptions::new()).unwrap();

    let ((mut req_tx, resp_rx), (req_rx, resp_tx)) = pipes();
    req_tx.write_all(&invocation_head(b"")).await.unwrap();
    drop(req_tx);

    let outcome = endpoint
        .invoke("/invoke/Boom/now", &Vec::<(String, String)>::new(), req_rx, resp_tx)
        .await
        .unwrap();
    match outcome {
        InvocationOutcome::Failed(error) => {
            assert_eq!(error.code, HandlerError::DEFAULT_CODE);
            assert_eq!(error.message, "handler panicked: no input");
        }
        other => panic!("expected failure, got {:?}", other),
    }
    let messages = read_response(resp_rx).await;
    assert_eq!(types(&messages), vec![MessageType::Error, MessageType::End]);
}

#[tokio::test]
async fn test_inbound_messages_reach_handler_in_order() {
    let registry = Registry::new()
        .with_component(ComponentDefinition::service("Collector").handler(
            "collect",
            handler_fn(|ctx, _input| async move {
                let mut seen = Vec::new();
                while let Some(message) = ctx.next_message().await? {
                    seen.push(String::from_utf8_lossy(message.payload()).into_owned());
                }
                Ok::<_, HandlerError>(Bytes::from(seen.join(",")))
            }),
        ))
        .unwrap();
    let endpoint = Endpoint::new(registry, EndpointOptions::new()).unwrap();

    let ((mut req_tx, resp_rx), (req_rx, resp_tx)) = pipes();
    let mut request = invocation_head(b"");
    for payload in ["a", "b", "c"] {
        let completion = Message::new(
            MessageType::Completion,
            MessageFlags::COMPLETED,
            Bytes::from_static(payload.as_bytes()),
        )
        .unwrap();
        request.extend_from_slice(&relay_protocol::encode(&completion));
    }
    req_tx.write_all(&request).await.unwrap();
    drop(req_tx);

    let outcome = endpoint
        .invoke("/invoke/Collector/collect", &Vec::<(String, String)>::new(), req_rx, resp_tx)
        .await
        .unwrap();
    assert_eq!(outcome, InvocationOutcome::Completed);
    let messages = read_response(resp_rx).await;
    assert_eq!(&messages[0].payload()[..], b"a,b,c");
}

#[tokio::test]
async fn test_shutdown_cancels_in_flight_invocation() {
    let started = Arc::new(Notify::new());
    let registry = {
        let started = Arc::clone(&started);
        Registry::new()
            .with_component(ComponentDefinition::service("Slow").handler(
                "wait",
                handler_fn(move |_ctx, _input| {
                    let started = Arc::clone(&started);
                    async move {
                        started.notify_one();
                        std::future::pending::<()>().await;
                        Ok(Bytes::new())
                    }
                }),
            ))
            .unwrap()
    };
    let endpoint = Endpoint::new(registry, EndpointOptions::new()).unwrap();

    let ((mut req_tx, resp_rx), (req_rx, resp_tx)) = pipes();
    req_tx.write_all(&invocation_head(b"")).await.unwrap();

    let task = {
        let endpoint = endpoint.clone();
        tokio::spawn(async move {
            let headers: Vec<(String, String)> = Vec::new();
            endpoint.invoke("/invoke/Slow/wait", &headers, req_rx, resp_tx).await
        })
    };

    tokio::time::timeout(Duration::from_secs(5), started.notified())
        .await
        .expect("handler should start");
    endpoint.shutdown();

    let result = tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .expect("invocation should stop after shutdown")
        .unwrap();
    assert!(matches!(result, Err(SdkError::Cancelled)));
    assert!(read_response(resp_rx).await.is_empty());

    // New invocations are refused.
    let ((mut req_tx, _resp_rx), (req_rx, resp_tx)) = pipes();
    req_tx.write_all(&invocation_head(b"")).await.unwrap();
    let err = endpoint
        .invoke("/invoke/Slow/wait", &Vec::<(String, String)>::new(), req_rx, resp_tx)
        .await
        .unwrap_err();
    assert!(matches!(err, SdkError::Cancelled));
}

struct PrefixCodec;

impl JournalValueCodec for PrefixCodec {
    fn encode(&self, value: Bytes) -> relay_sdk::Result<Bytes> {
        let mut out = b"enc:".to_vec();
        out.extend_from_slice(&value);
        Ok(Bytes::from(out))
    }

    fn decode(&self, value: Bytes) -> relay_sdk::Result<Bytes> {
        match value.strip_prefix(b"enc:") {
            Some(rest) => Ok(Bytes::copy_from_slice(rest)),
            None => Err(SdkError::JournalCodec("missing prefix".to_string())),
        }
    }
}

#[tokio::test]
async fn test_journal_codec_created_once_and_applied() {
    let created = Arc::new(AtomicUsize::new(0));
    let provider: Arc<dyn JournalValueCodecProvider> = {
        let created = Arc::clone(&created);
        Arc::new(move || -> relay_sdk::Result<Arc<dyn JournalValueCodec>> {
            created.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(PrefixCodec))
        })
    };
    let endpoint = Endpoint::new(
        greeter(),
        EndpointOptions::new().with_journal_value_codec_provider(provider),
    )
    .unwrap();

    for _ in 0..2 {
        let ((mut req_tx, resp_rx), (req_rx, resp_tx)) = pipes();
        req_tx.write_all(&invocation_head(b"enc:codec")).await.unwrap();
        drop(req_tx);
        endpoint
            .invoke(GREET, &Vec::<(String, String)>::new(), req_rx, resp_tx)
            .await
            .unwrap();
        let messages = read_response(resp_rx).await;
        assert_eq!(&messages[0].payload()[..], b"enc:Hello, codec");
    }
    assert_eq!(created.load(Ordering::SeqCst), 1);

    let ((mut req_tx, _resp_rx), (req_rx, resp_tx)) = pipes();
    req_tx.write_all(&invocation_head(b"plain")).await.unwrap();
    let err = endpoint
        .invoke(GREET, &Vec::<(String, String)>::new(), req_rx, resp_tx)
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), "JOURNAL_CODEC_ERROR");
}

#[test]
fn test_failing_codec_provider_aborts_construction() {
    let provider: Arc<dyn JournalValueCodecProvider> =
        Arc::new(|| -> relay_sdk::Result<Arc<dyn JournalValueCodec>> {
            Err(SdkError::JournalCodec("key material unavailable".to_string()))
        });
    let err = Endpoint::new(
        greeter(),
        EndpointOptions::new().with_journal_value_codec_provider(provider),
    )
    .unwrap_err();
    assert!(matches!(err, SdkError::JournalCodec(_)));
}

#[derive(Clone, Default)]
struct Capture(Arc<Mutex<Vec<u8>>>);

impl Capture {
    fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl io::Write for Capture {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for Capture {
    type Writer = Capture;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

#[tokio::test]
async fn test_logger_receives_endpoint_and_handler_events() {
    let capture = Capture::default();
    let dispatch = tracing::Dispatch::new(
        tracing_subscriber::registry().with(
            tracing_subscriber::fmt::layer()
                .with_writer(capture.clone())
                .with_ansi(false),
        ),
    );
    let registry = Registry::new()
        .with_component(ComponentDefinition::service("Greeter").handler(
            "greet",
            handler_fn(|_ctx, input| async move {
                tracing::info!("inside handler");
                Ok(input)
            }),
        ))
        .unwrap();
    let endpoint =
        Endpoint::new(registry, EndpointOptions::new().with_logger(dispatch)).unwrap();

    let ((mut req_tx, resp_rx), (req_rx, resp_tx)) = pipes();
    req_tx.write_all(&invocation_head(b"hi")).await.unwrap();
    drop(req_tx);
    endpoint
        .invoke(GREET, &Vec::<(String, String)>::new(), req_rx, resp_tx)
        .await
        .unwrap();
    read_response(resp_rx).await;

    let logs = capture.contents();
    assert!(logs.contains("Accepting requests without validating request signatures"));
    assert!(logs.contains("inside handler"));
    assert!(logs.contains("Invocation completed"));
}

//! End-to-end invocations through the host global scope.
//!
//! Each test plays the host: it builds host objects, invokes a global
//! callback and reads the settled promise, exactly as an embedding runtime
//! would.

mod common;

use std::io::{Cursor, Read, Write};
use std::sync::{mpsc, Arc, Mutex};
use std::thread;
use std::time::Duration;

use warpgrid_bridge::context::runtime_context_object;
use warpgrid_bridge::{
    fetch, pipe, BridgeConfig, HeaderMap, HostStreamReader, Request, Response,
};
use warpgrid_host_api::testing::chunk_stream;
use warpgrid_host_api::{Headers, HostFunction, HostValue, Object, Promise};

use common::{harness, harness_with, outcome};

fn request(method: &str, url: &str, body: impl Into<HostValue>) -> HostValue {
    let headers = Headers::new();
    headers.append("content-type", "text/plain").unwrap();
    Object::new()
        .with("method", method)
        .with("url", url)
        .with("headers", headers)
        .with("body", body)
        .into()
}

fn read_host_body(response: &HostValue) -> String {
    let stream = response.get("body").as_stream().expect("streamed body").clone();
    let mut body = String::new();
    HostStreamReader::new(stream).read_to_string(&mut body).unwrap();
    body
}

#[test]
fn echo_of_a_three_chunk_body() {
    let config = BridgeConfig {
        chunk_size: 4,
        ..BridgeConfig::default()
    };
    let h = harness_with(&config);
    let (seen_tx, seen_rx) = mpsc::channel();
    h.bridge
        .handle_request(move |mut req, _ctx| {
            let mut body = String::new();
            req.body_mut().read_to_string(&mut body)?;
            seen_tx.send(body.clone())?;
            let mut headers = HeaderMap::new();
            headers.insert("Content-Type", "text/plain");
            Ok(Response::streaming(200, headers, Cursor::new(body.into_bytes())))
        })
        .unwrap();
    h.bridge.ready().unwrap();

    let host = h.event_loop.handle();
    let body = chunk_stream(&host, ["abc", "def", "ghi"]);
    let response = outcome(&h.global.invoke("handleRequest", vec![request("POST", "/echo", body)]))
        .unwrap();

    assert_eq!(seen_rx.recv().unwrap(), "abcdefghi");
    assert_eq!(response.get("status").as_f64(), Some(200.0));
    assert_eq!(response.get("statusText").as_str(), Some("OK"));
    assert_eq!(
        response.get("headers").as_headers().unwrap().get("content-type").as_deref(),
        Some("text/plain")
    );
    assert_eq!(read_host_body(&response), "abcdefghi");
}

#[test]
fn untouched_request_body_is_passed_through() {
    let h = harness();
    h.bridge
        .handle_request(|req, _ctx| Ok(Response::new(200, HeaderMap::new(), req.into_body())))
        .unwrap();
    h.bridge.ready().unwrap();

    let host = h.event_loop.handle();
    let original = chunk_stream(&host, ["zero", "copy"]);
    let response = outcome(&h.global.invoke(
        "handleRequest",
        vec![request("PUT", "/mirror", original.clone())],
    ))
    .unwrap();

    let returned = response.get("body").as_stream().unwrap();
    assert!(returned.same_stream(&original));
    assert_eq!(read_host_body(&response), "zerocopy");
}

#[test]
fn piped_body_streams_while_the_producer_runs() {
    let h = harness();
    h.bridge
        .handle_request(|_req, _ctx| {
            let (reader, mut writer) = pipe();
            thread::spawn(move || -> std::io::Result<()> {
                for part in ["one ", "two ", "three"] {
                    writer.write_all(part.as_bytes())?;
                }
                writer.close();
                Ok(())
            });
            Ok(Response::streaming(200, HeaderMap::new(), reader))
        })
        .unwrap();
    h.bridge.ready().unwrap();

    let response = outcome(&h.global.invoke(
        "handleRequest",
        vec![request("GET", "/pipe", HostValue::Null)],
    ))
    .unwrap();
    assert_eq!(read_host_body(&response), "one two three");
}

#[test]
fn cancelling_a_piped_body_stops_the_producer() {
    let h = harness();
    let (stopped_tx, stopped_rx) = mpsc::channel();
    h.bridge
        .handle_request(move |_req, _ctx| {
            let (reader, mut writer) = pipe();
            let stopped_tx = stopped_tx.clone();
            thread::spawn(move || {
                let kind = loop {
                    if let Err(err) = writer.write(b"tick") {
                        break err.kind();
                    }
                    thread::sleep(Duration::from_millis(5));
                };
                let _ = stopped_tx.send(kind);
            });
            Ok(Response::streaming(200, HeaderMap::new(), reader))
        })
        .unwrap();
    h.bridge.ready().unwrap();

    let response = outcome(&h.global.invoke(
        "handleRequest",
        vec![request("GET", "/ticks", HostValue::Null)],
    ))
    .unwrap();
    let stream = response.get("body").as_stream().unwrap().clone();
    let mut body = HostStreamReader::new(stream);
    assert!(body.read_chunk().unwrap().is_some());
    body.close().unwrap();

    let kind = stopped_rx.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(kind, std::io::ErrorKind::BrokenPipe);
}

#[test]
fn handler_proxies_through_host_fetch() {
    let h = harness();
    h.bridge
        .handle_request(|req, ctx| {
            let upstream = format!("https://origin.internal{}", req.url());
            let response = fetch(&ctx, Request::empty("GET", upstream, HeaderMap::new()))?;
            Ok(Response::new(response.status(), HeaderMap::new(), response.into_body()))
        })
        .unwrap();
    h.bridge.ready().unwrap();

    let host = h.event_loop.handle();
    let origin = {
        let host = host.clone();
        HostFunction::new(move |args| {
            let url = args[0].get("url").as_str().unwrap_or_default().to_string();
            let response = Object::new()
                .with("status", 200u16)
                .with("body", chunk_stream(&host, ["from ".to_string(), url]));
            Ok(Promise::resolved(&host, response).into())
        })
    };
    let ctx = Object::new().with("env", Object::new()).with("fetch", origin);
    let response = outcome(&h.global.invoke(
        "handleRequest",
        vec![request("GET", "/assets/app.js", HostValue::Null), ctx.into()],
    ))
    .unwrap();

    assert_eq!(response.get("status").as_f64(), Some(200.0));
    assert_eq!(
        read_host_body(&response),
        "from https://origin.internal/assets/app.js"
    );
}

#[test]
fn completions_may_arrive_out_of_dispatch_order() {
    let h = harness();
    h.bridge
        .handle_request(|req, _ctx| {
            if req.url() == "/slow" {
                thread::sleep(Duration::from_millis(200));
            }
            Ok(Response::new(200, HeaderMap::new(), req.url().to_string()))
        })
        .unwrap();
    h.bridge.ready().unwrap();

    let order: Arc<Mutex<Vec<&'static str>>> = Arc::default();
    let (done_tx, done_rx) = mpsc::channel();
    for url in ["/slow", "/fast"] {
        let promise = h
            .global
            .invoke("handleRequest", vec![request("GET", url, HostValue::Null)]);
        let order = order.clone();
        let done_tx = done_tx.clone();
        promise.on_settle(move |result| {
            assert!(result.is_ok());
            order.lock().unwrap().push(url);
            done_tx.send(()).unwrap();
        });
    }
    for _ in 0..2 {
        done_rx.recv_timeout(Duration::from_secs(5)).unwrap();
    }
    assert_eq!(*order.lock().unwrap(), vec!["/fast", "/slow"]);
}

#[test]
fn bodyless_status_is_encoded_with_null_body() {
    let h = harness();
    h.bridge
        .handle_request(|_req, _ctx| Ok(Response::new(204, HeaderMap::new(), "dropped")))
        .unwrap();
    h.bridge.ready().unwrap();

    let response = outcome(&h.global.invoke(
        "handleRequest",
        vec![request("DELETE", "/item/7", HostValue::Null)],
    ))
    .unwrap();
    assert_eq!(response.get("statusText").as_str(), Some("No Content"));
    assert!(response.get("body").is_null());
}

#[test]
fn scheduled_handler_sees_the_environment() {
    let h = harness();
    let (tx, rx) = mpsc::channel();
    h.bridge
        .handle_scheduled(move |event, ctx| {
            tx.send((event.cron, ctx.var("REGION")))?;
            Ok(())
        })
        .unwrap();
    h.bridge.ready().unwrap();

    let event = Object::new()
        .with("cron", "0 * * * *")
        .with("scheduledTime", 1_700_000_000_000.0);
    let ctx = runtime_context_object(Object::new().with("REGION", "eu-west"), Object::new());
    let result = outcome(&h.global.invoke("runScheduler", vec![event.into(), ctx])).unwrap();

    assert!(result.is_undefined());
    let (cron, region) = rx.recv().unwrap();
    assert_eq!(cron, "0 * * * *");
    assert_eq!(region.as_deref(), Some("eu-west"));
}

#[test]
fn queue_batch_reaches_the_handler() {
    let h = harness();
    let (tx, rx) = mpsc::channel();
    h.bridge
        .handle_queue(move |batch, _ctx| {
            let bodies = batch
                .messages
                .iter()
                .map(|m| m.text_body().map(str::to_string))
                .collect::<Result<Vec<_>, _>>()?;
            tx.send((batch.queue, bodies))?;
            Ok(())
        })
        .unwrap();
    h.bridge.ready().unwrap();

    let batch: HostValue = serde_json::json!({
        "queue": "emails",
        "messages": [
            { "id": "1", "timestamp": 10, "attempts": 1, "body": "first" },
            { "id": "2", "timestamp": 20, "attempts": 3, "body": "second" }
        ]
    })
    .into();
    outcome(&h.global.invoke("handleQueueMessageBatch", vec![batch])).unwrap();

    let (queue, bodies) = rx.recv().unwrap();
    assert_eq!(queue, "emails");
    assert_eq!(bodies, vec!["first", "second"]);
}

#[test]
fn email_raw_message_is_streamed() {
    let h = harness();
    let (tx, rx) = mpsc::channel();
    h.bridge
        .handle_email(move |mut email, _ctx| {
            let mut raw = String::new();
            email.raw.read_to_string(&mut raw)?;
            tx.send((email.from, raw))?;
            Ok(())
        })
        .unwrap();
    h.bridge.ready().unwrap();

    let host = h.event_loop.handle();
    let email = Object::new()
        .with("from", "sender@example.com")
        .with("to", "inbox@example.com")
        .with("rawSize", 24.0)
        .with("raw", chunk_stream(&host, ["Subject: hi\r\n", "\r\nhello"]));
    outcome(&h.global.invoke("handleEmail", vec![email.into()])).unwrap();

    let (from, raw) = rx.recv().unwrap();
    assert_eq!(from, "sender@example.com");
    assert_eq!(raw, "Subject: hi\r\n\r\nhello");
}

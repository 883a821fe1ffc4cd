// tests/dispatch_wire.rs

use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};

use clusterq::engine::RuntimeEvent;
use clusterq::exec::{DispatchBackend, ExecutorOptions, HostWork, RealDispatchBackend};
use clusterq::hosts::PingOutcome;
use clusterq::model::JobId;
use clusterq::protocol::dispatch::{
    classify_dispatch_reply, parse_ping_reply, phone_home, ping_message, send_job,
};
use clusterq::protocol::{DispatchOutcome, ExchangeTimeouts, JobTicket};
use clusterq_test_utils::builders::{JobBuilder, SequenceBuilder};
use clusterq_test_utils::{init_tracing, with_timeout};

fn limits() -> ExchangeTimeouts {
    ExchangeTimeouts {
        connect: Duration::from_secs(2),
        reply: Duration::from_secs(2),
    }
}

fn ticket() -> JobTicket {
    let seq = SequenceBuilder::new(12, "alice")
        .name("render")
        .job(JobBuilder::new(3).jobtype("blender").argument("frame", "0042"))
        .build();
    JobTicket::from_job(&seq.jobs[&3], 1)
}

/// A single-connection host that answers the dispatch handshake with
/// `first` and `last`, and hands back the ticket text it received.
async fn fake_host(first: &'static str, last: &'static str) -> (String, oneshot::Receiver<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    let (tx, rx) = oneshot::channel();

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut reader = BufReader::new(stream);
        let mut line = String::new();
        reader.read_line(&mut line).await.unwrap();
        assert_eq!(line, "JOB\n");
        reader.get_mut().write_all(first.as_bytes()).await.unwrap();

        let mut body = String::new();
        loop {
            let mut line = String::new();
            if reader.read_line(&mut line).await.unwrap() == 0 {
                break;
            }
            body.push_str(&line);
            if line == "EOJ\n" {
                break;
            }
        }
        reader.get_mut().write_all(last.as_bytes()).await.unwrap();
        let _ = tx.send(body);
    });

    (addr, rx)
}

#[test]
fn ticket_carries_job_fields() {
    let t = ticket();
    assert_eq!(t.id(), JobId::new(12, 3));
    let text = t.encode();
    assert!(text.starts_with("snum 12\nnumber 3\n"));
    assert!(text.contains("seqname render\n"));
    assert!(text.contains("argument frame 0042\n"));
    assert!(text.ends_with("EOJ\n"));
    assert_eq!(JobTicket::decode(&text).unwrap(), t);
}

#[test]
fn ticket_without_terminator_is_rejected() {
    assert!(JobTicket::decode("snum 1\nnumber 2\n").is_err());
    assert!(JobTicket::decode("snum 1\nEOJ\n").is_err());
}

#[test]
fn reply_classification() {
    assert_eq!(classify_dispatch_reply("ACK"), DispatchOutcome::Accepted { pid: None });
    assert_eq!(classify_dispatch_reply("ACK 991\r"), DispatchOutcome::Accepted { pid: Some(991) });
    assert_eq!(
        classify_dispatch_reply("NAK no licence"),
        DispatchOutcome::Refused("no licence".into())
    );
    assert!(matches!(classify_dispatch_reply("???"), DispatchOutcome::Malformed(_)));

    assert_eq!(parse_ping_reply("ACK"), Some(None));
    assert_eq!(parse_ping_reply("ACK [hostname n1]"), Some(Some("[hostname n1]".into())));
    assert_eq!(parse_ping_reply("NAK"), None);

    assert_eq!(ping_message(&[]), "PHONEHOME");
    assert_eq!(ping_message(&[(JobId::new(4, 2), 100)]), "PHONEHOME 4 2 100");
}

#[tokio::test]
async fn accepted_dispatch_reports_pid() {
    let (addr, body) = fake_host("ACK\n", "ACK 321\n").await;
    let t = ticket();

    let outcome = with_timeout(send_job(&addr, &t, limits())).await;
    assert_eq!(outcome, DispatchOutcome::Accepted { pid: Some(321) });
    let received = with_timeout(body).await.unwrap();
    assert_eq!(JobTicket::decode(&received).unwrap(), t);
}

#[tokio::test]
async fn refused_dispatch() {
    let (addr, _body) = fake_host("ACK\n", "NAK busy\0").await;
    let outcome = with_timeout(send_job(&addr, &ticket(), limits())).await;
    assert_eq!(outcome, DispatchOutcome::Refused("busy".into()));
}

#[tokio::test]
async fn host_that_does_not_ack_the_start_marker() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut reader = BufReader::new(stream);
        let mut line = String::new();
        reader.read_line(&mut line).await.unwrap();
        reader.get_mut().write_all(b"GO AWAY\n").await.unwrap();
        let mut rest = String::new();
        let _ = reader.read_line(&mut rest).await;
    });

    let outcome = with_timeout(send_job(&addr, &ticket(), limits())).await;
    assert_eq!(outcome, DispatchOutcome::Malformed("GO AWAY".into()));
}

#[tokio::test]
async fn unreachable_host() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    drop(listener);

    let outcome = with_timeout(send_job(&addr, &ticket(), limits())).await;
    assert!(matches!(outcome, DispatchOutcome::Unreachable(_)), "{outcome:?}");
}

#[tokio::test]
async fn phone_home_returns_the_reply_line() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut reader = BufReader::new(stream);
        let mut line = String::new();
        reader.read_line(&mut line).await.unwrap();
        assert_eq!(line, "PHONEHOME 1 0 55\n");
        reader
            .get_mut()
            .write_all(b"ACK [hostname n1][load 0.50]\n")
            .await
            .unwrap();
    });

    let reply = with_timeout(phone_home(&addr, "PHONEHOME 1 0 55", limits())).await.unwrap();
    assert_eq!(parse_ping_reply(&reply), Some(Some("[hostname n1][load 0.50]".into())));
}

#[tokio::test]
async fn real_backend_reports_outcomes_to_the_runtime() {
    init_tracing();
    let (addr, _body) = fake_host("ACK\n", "ACK 5\n").await;
    let (rt_tx, mut rt_rx) = mpsc::channel(8);
    let options = ExecutorOptions {
        workers: 2,
        dispatch: limits(),
        ping: limits(),
    };
    let mut backend = RealDispatchBackend::new(rt_tx, options);

    let dead = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let dead_addr = dead.local_addr().unwrap().to_string();
    drop(dead);

    backend
        .submit(vec![
            HostWork::Dispatch {
                host: "n1".into(),
                address: addr,
                ticket: ticket(),
            },
            HostWork::Ping {
                host: "n2".into(),
                address: dead_addr,
                message: "PHONEHOME".into(),
            },
        ])
        .await
        .unwrap();

    let mut dispatched = None;
    let mut pinged = None;
    while dispatched.is_none() || pinged.is_none() {
        match with_timeout(rt_rx.recv()).await.expect("runtime event") {
            RuntimeEvent::DispatchFinished { job, host, outcome } => dispatched = Some((job, host, outcome)),
            RuntimeEvent::PingFinished { host, outcome } => pinged = Some((host, outcome)),
            other => panic!("unexpected event {other:?}"),
        }
    }

    assert_eq!(
        dispatched,
        Some((JobId::new(12, 3), "n1".to_string(), DispatchOutcome::Accepted { pid: Some(5) }))
    );
    let (host, outcome) = pinged.unwrap();
    assert_eq!(host, "n2");
    assert!(matches!(outcome, PingOutcome::Unreachable(_)));
}

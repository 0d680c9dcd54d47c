// tests/source_timeout.rs
// Failure modes of a real HTTP adapter against local one-shot servers.
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use solar_risk_monitor::ingest::providers::{http::build_client, kp_index::KpIndexProvider};
use solar_risk_monitor::ingest::types::{
    FetchError, RawPayload, SourceAdapter, SourceDescriptor, SourceKind,
};
use solar_risk_monitor::ingest::{acquire, fetch_bounded};

#[derive(Clone, Copy)]
enum Mode {
    Hang,
    Close,
    Respond(&'static str, &'static str),
}

async fn serve(mode: Mode) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        loop {
            let Ok((mut sock, _)) = listener.accept().await else { return };
            let mut buf = [0u8; 2048];
            let _ = sock.read(&mut buf).await;
            match mode {
                Mode::Hang => {
                    tokio::time::sleep(Duration::from_secs(30)).await;
                }
                Mode::Close => drop(sock),
                Mode::Respond(status, body) => {
                    let resp = format!(
                        "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                        body.len()
                    );
                    let _ = sock.write_all(resp.as_bytes()).await;
                    let _ = sock.shutdown().await;
                }
            }
        }
    });
    format!("http://{addr}/json/planetary_k_index_1m.json")
}

fn provider(name: &str, url: String, priority: u32, timeout: Duration) -> Box<dyn SourceAdapter> {
    let desc = SourceDescriptor {
        name: name.into(),
        kind: SourceKind::KpIndex,
        url_template: url,
        priority,
        timeout,
    };
    Box::new(KpIndexProvider::new(desc, build_client().unwrap()))
}

#[tokio::test]
async fn hung_server_times_out_within_bound() {
    let url = serve(Mode::Hang).await;
    let p = provider("hung", url, 0, Duration::from_millis(300));

    let t0 = Instant::now();
    let err = fetch_bounded(p.as_ref()).await.unwrap_err();
    assert!(matches!(err, FetchError::Timeout(_)), "got {err:?}");
    assert!(t0.elapsed() < Duration::from_secs(3));
}

#[tokio::test]
async fn closed_connection_is_unreachable() {
    let url = serve(Mode::Close).await;
    let p = provider("closed", url, 0, Duration::from_secs(2));
    let err = fetch_bounded(p.as_ref()).await.unwrap_err();
    assert!(matches!(err, FetchError::Unreachable(_)), "got {err:?}");
}

#[tokio::test]
async fn http_error_status_is_unreachable() {
    let url = serve(Mode::Respond("503 Service Unavailable", "{}")).await;
    let p = provider("503", url, 0, Duration::from_secs(2));
    let err = fetch_bounded(p.as_ref()).await.unwrap_err();
    assert!(matches!(err, FetchError::Unreachable(_)), "got {err:?}");
}

#[tokio::test]
async fn junk_body_is_malformed() {
    let url = serve(Mode::Respond("200 OK", "<html>maintenance</html>")).await;
    let p = provider("junk", url, 0, Duration::from_secs(2));
    let err = fetch_bounded(p.as_ref()).await.unwrap_err();
    assert!(matches!(err, FetchError::MalformedResponse(_)), "got {err:?}");
}

#[tokio::test]
async fn chain_skips_hung_source_and_uses_next() {
    let hung = serve(Mode::Hang).await;
    let good = serve(Mode::Respond(
        "200 OK",
        r#"[{"time_tag":"2025-05-10T18:00:00","kp_index":7,"estimated_kp":7.2}]"#,
    ))
    .await;

    let adapters = vec![
        provider("hung", hung, 0, Duration::from_millis(300)),
        provider("backup", good, 1, Duration::from_secs(2)),
    ];
    let t0 = Instant::now();
    let acq = acquire(&adapters, false).await;
    let raw = acq.raws.first().expect("backup answers");
    assert_eq!(raw.source, "backup");
    assert_eq!(raw.payload, RawPayload::Geomagnetic { kp: Some(7.2) });
    assert_eq!(acq.failures.len(), 1);
    assert!(matches!(acq.failures[0].1, FetchError::Timeout(_)));
    assert!(t0.elapsed() < Duration::from_secs(3));
}

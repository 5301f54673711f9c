use probe_sidecar::publisher::PublishBatch;
use probe_sidecar::{load_checks, run_publisher, HttpPublisher, LabelPair, ScraperManager};
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use url::Url;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const DEBUG_DUMP: &str = "Logs for the probe:\n\
ts=2020-05-01T10:00:00.123Z caller=main.go:10 module=http_ip4_1 level=info msg=\"Beginning probe\" probe=http\n\
ts=2020-05-01T10:00:00.456Z caller=http.go:20 module=http_ip4_1 level=info msg=\"Probe succeeded\"\n\
\n\
Metrics that would have been returned:\n\
# HELP probe_http_duration_seconds Duration of http request by phase\n\
# TYPE probe_http_duration_seconds gauge\n\
probe_http_duration_seconds{phase=\"connect\"} 0.01\n\
probe_http_duration_seconds{phase=\"transfer\"} 0.002\n\
# HELP probe_success Displays whether or not the probe was a success\n\
# TYPE probe_success gauge\n\
probe_success 1\n\
\n\
Module configuration:\n\
prober: http\n";

fn write_checks(json: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(json.as_bytes()).unwrap();
    file
}

async fn wait_for_push(server: &MockServer) -> PublishBatch {
    for _ in 0..100 {
        let requests = server.received_requests().await.unwrap_or_default();
        if let Some(request) = requests.first() {
            return serde_json::from_slice(&request.body).unwrap();
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("publisher never received a batch");
}

#[tokio::test]
async fn test_checks_file_to_publisher() {
    let provider = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/probe"))
        .and(query_param("target", "https://grafana.com/"))
        .and(query_param("module", "http_ip4_1"))
        .and(query_param("debug", "true"))
        .respond_with(ResponseTemplate::new(200).set_body_string(DEBUG_DUMP))
        .mount(&provider)
        .await;

    let publisher_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/push"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&publisher_server)
        .await;

    let checks_file = write_checks(
        r#"[
            {
                "id": 1,
                "frequency": 60000,
                "timeout": 2000,
                "labels": [{"name": "team", "value": "sre"}],
                "settings": {"http": {"url": "https://grafana.com/", "ipVersion": "V4"}}
            },
            {
                "id": 2,
                "enabled": false,
                "frequency": 60000,
                "settings": {"ping": {"hostname": "grafana.com"}}
            }
        ]"#,
    );
    let checks = load_checks(checks_file.path()).unwrap();
    assert_eq!(checks.len(), 2);

    let publisher =
        HttpPublisher::new(&publisher_server.uri(), "probe-1", Duration::from_secs(5)).unwrap();
    let (tx, rx) = mpsc::channel(8);
    let publisher_task = tokio::spawn(async move {
        run_publisher(rx, &publisher).await;
        publisher.metrics()
    });

    let manager = ScraperManager::new(
        "probe-1",
        Url::parse(&format!("{}/probe", provider.uri())).unwrap(),
        Arc::new(tx),
        1,
    );
    let mut started = 0;
    for check in checks {
        if manager.add_check(check).await.unwrap() {
            started += 1;
        }
    }
    assert_eq!(started, 1);
    assert!(manager.modules().await.contains_key("http_ip4_1"));

    let batch = wait_for_push(&publisher_server).await;
    assert_eq!(batch.metadata.probe, "probe-1");

    let series = batch.payload.metrics();
    let names: Vec<&str> = series.iter().map(|s| s.name()).collect();
    assert_eq!(
        names,
        vec!["probe_http_duration_seconds", "probe_http_duration_seconds", "probe_success"]
    );
    assert_eq!(series[0].label("phase"), Some("connect"));
    assert_eq!(series[0].label("label_team"), Some("sre"));
    assert_eq!(series[2].value(), Some(1.0));
    assert_eq!(
        series[2].labels,
        vec![
            LabelPair::new("__name__", "probe_success"),
            LabelPair::new("check_id", "1"),
            LabelPair::new("check_name", "http"),
            LabelPair::new("endpoint", "https://grafana.com/"),
            LabelPair::new("probe", "probe-1"),
            LabelPair::new("label_team", "sre"),
        ]
    );

    let streams = batch.payload.streams();
    assert_eq!(streams.len(), 2);
    assert!(streams[0].labels.contains(r#"level="info""#));
    assert!(streams[0].labels.contains(r#"label_team="sre""#));
    assert_eq!(streams[0].entries.len(), 1);
    assert_eq!(streams[0].entries[0].line, "msg=\"Beginning probe\" probe=http\n");
    assert_eq!(streams[1].entries[0].line, "msg=\"Probe succeeded\"\n");

    manager.shutdown().await;
    drop(manager);

    let metrics = tokio::time::timeout(Duration::from_secs(5), publisher_task)
        .await
        .unwrap()
        .unwrap();
    assert!(metrics.successes >= 1);
    assert_eq!(metrics.failures, 0);
}

#[tokio::test]
async fn test_failed_probe_is_still_published() {
    let provider = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            "Metrics that would have been returned:\n\
             # TYPE probe_dns_lookup_time_seconds gauge\n\
             probe_dns_lookup_time_seconds 0.003\n\
             # TYPE probe_success gauge\n\
             probe_success 0\n\
             # TYPE probe_duration_seconds gauge\n\
             probe_duration_seconds 0.004\n",
        ))
        .mount(&provider)
        .await;

    let checks_file = write_checks(
        r#"[{"id": 3, "frequency": 60000, "settings": {"ping": {"hostname": "nowhere.invalid"}}}]"#,
    );
    let checks = load_checks(checks_file.path()).unwrap();

    let (tx, mut rx) = mpsc::channel(8);
    let manager = ScraperManager::new(
        "probe-1",
        Url::parse(&format!("{}/probe", provider.uri())).unwrap(),
        Arc::new(tx),
        1,
    );
    for check in checks {
        assert!(manager.add_check(check).await.unwrap());
    }
    assert!(manager.modules().await.contains_key("icmp_ip6_3"));

    let payload = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .unwrap()
        .unwrap();

    // Conversion stops at the failing probe_success sample.
    let names: Vec<&str> = payload.metrics().iter().map(|s| s.name()).collect();
    assert_eq!(names, vec!["probe_dns_lookup_time_seconds", "probe_success"]);
    assert_eq!(payload.metrics()[1].value(), Some(0.0));

    manager.shutdown().await;
}

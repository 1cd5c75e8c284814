//! Consul 后端集成测试
//!
//! 默认使用 axum 实现的模拟 Consul（只实现用到的 agent 和 health 接口）。
//! 连接真实 Consul 的测试默认被忽略，需要使用
//! `cargo test --test consul_backend_test -- --ignored` 运行。
//!
//! 启动 Consul：
//! ```bash
//! docker run -d --name consul-test -p 8500:8500 hashicorp/consul:1.17 agent -dev -client=0.0.0.0
//! ```

use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, put};
use axum::{Json, Router};
use flare_discovery_client::{
    ConsulBackend, DiscoveryError, DiscoveryWatcher, HealthCheckConfig, HealthStatus,
    RegistryBackend, RegistryClient, RegistryConfig, ServiceEntry,
};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::time::{Duration, Instant, sleep, timeout};

/// 阻塞查询上注入的故障
#[derive(Debug, Clone, Copy)]
enum Fault {
    /// 返回 500
    ServerError,
    /// 正常返回但不带 X-Consul-Index
    MissingIndex,
}

/// 模拟 Consul 的共享状态
#[derive(Clone)]
struct MockConsul {
    health: watch::Sender<(u64, Value)>,
    registrations: Arc<Mutex<Vec<Value>>>,
    deregistrations: Arc<Mutex<Vec<String>>>,
    health_queries: Arc<Mutex<Vec<HashMap<String, String>>>>,
    queried_services: Arc<Mutex<Vec<String>>>,
    faults: Arc<Mutex<VecDeque<Fault>>>,
    omit_index: Arc<AtomicBool>,
}

impl MockConsul {
    fn new() -> Self {
        let (health, _) = watch::channel((1, json!([])));
        Self {
            health,
            registrations: Arc::new(Mutex::new(Vec::new())),
            deregistrations: Arc::new(Mutex::new(Vec::new())),
            health_queries: Arc::new(Mutex::new(Vec::new())),
            queried_services: Arc::new(Mutex::new(Vec::new())),
            faults: Arc::new(Mutex::new(VecDeque::new())),
            omit_index: Arc::new(AtomicBool::new(false)),
        }
    }

    /// 之后的阻塞查询依次返回这些故障
    fn push_faults(&self, faults: &[Fault]) {
        self.faults.lock().unwrap().extend(faults.iter().copied());
    }

    fn pending_faults(&self) -> usize {
        self.faults.lock().unwrap().len()
    }

    fn query_count(&self) -> usize {
        self.health_queries.lock().unwrap().len()
    }

    fn set_entries(&self, index: u64, entries: &[ServiceEntry]) {
        self.set_payload(index, serde_json::to_value(entries).unwrap());
    }

    fn set_payload(&self, index: u64, payload: Value) {
        self.health.send_replace((index, payload));
    }

    fn registrations(&self) -> Vec<Value> {
        self.registrations.lock().unwrap().clone()
    }

    fn deregistrations(&self) -> Vec<String> {
        self.deregistrations.lock().unwrap().clone()
    }

    fn blocking_queries(&self) -> usize {
        self.health_queries
            .lock()
            .unwrap()
            .iter()
            .filter(|q| q.contains_key("index"))
            .count()
    }
}

fn parse_wait(wait: Option<&String>) -> Duration {
    wait.and_then(|w| w.trim_end_matches('s').parse::<u64>().ok())
        .map(Duration::from_secs)
        .unwrap_or(Duration::from_secs(5))
}

async fn health_service(
    State(mock): State<MockConsul>,
    Path(name): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    mock.health_queries.lock().unwrap().push(params.clone());
    mock.queried_services.lock().unwrap().push(name);

    let requested = params
        .get("index")
        .and_then(|i| i.parse::<u64>().ok())
        .unwrap_or(0);

    if mock.omit_index.load(Ordering::SeqCst) {
        return Json(mock.health.borrow().1.clone()).into_response();
    }
    if requested > 0 {
        let fault = mock.faults.lock().unwrap().pop_front();
        match fault {
            Some(Fault::ServerError) => {
                return (StatusCode::INTERNAL_SERVER_ERROR, "rpc error").into_response();
            }
            Some(Fault::MissingIndex) => {
                return Json(mock.health.borrow().1.clone()).into_response();
            }
            None => {}
        }
    }

    let mut rx = mock.health.subscribe();
    // 阻塞到索引变化或 wait 超时
    if requested > 0 && rx.borrow().0 == requested {
        let _ = timeout(parse_wait(params.get("wait")), rx.changed()).await;
    }

    let (index, payload) = rx.borrow().clone();
    ([("X-Consul-Index", index.to_string())], Json(payload)).into_response()
}

async fn agent_register(State(mock): State<MockConsul>, Json(body): Json<Value>) -> StatusCode {
    mock.registrations.lock().unwrap().push(body);
    StatusCode::OK
}

async fn agent_deregister(State(mock): State<MockConsul>, Path(id): Path<String>) -> StatusCode {
    mock.deregistrations.lock().unwrap().push(id);
    StatusCode::OK
}

async fn start_mock_consul() -> (MockConsul, SocketAddr) {
    let mock = MockConsul::new();
    let app = Router::new()
        .route("/v1/health/service/{name}", get(health_service))
        .route("/v1/agent/service/register", put(agent_register))
        .route("/v1/agent/service/deregister/{id}", put(agent_deregister))
        .with_state(mock.clone());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (mock, addr)
}

fn registry_config(addr: SocketAddr) -> RegistryConfig {
    RegistryConfig {
        address: addr.to_string(),
        wait_secs: 1,
        retry_base_ms: 50,
        retry_max_ms: 200,
        ..RegistryConfig::default()
    }
}

fn healthy(id: &str, port: u16) -> ServiceEntry {
    ServiceEntry::new("user-service", id, "10.0.0.1", port).with_check(id, HealthStatus::Passing)
}

async fn wait_for_ids(watcher: &DiscoveryWatcher, expected: &[&str]) {
    for _ in 0..300 {
        let snapshot = watcher.snapshot().await;
        let ids: Vec<&str> = snapshot.ordered().iter().map(|a| a.id.as_str()).collect();
        if ids == expected {
            return;
        }
        sleep(Duration::from_millis(10)).await;
    }
    panic!("watcher never observed {:?}", expected);
}

#[tokio::test]
async fn test_register_sends_agent_payload() {
    let (mock, addr) = start_mock_consul().await;
    let backend = Arc::new(ConsulBackend::new(&registry_config(addr)).unwrap());
    let client = RegistryClient::new(backend, HealthCheckConfig::default().with_port(0));

    client
        .register("gateway", "gateway-1", "127.0.0.1", 9000)
        .await
        .expect("register");

    let registrations = mock.registrations();
    assert_eq!(registrations.len(), 1);
    let body = &registrations[0];
    assert_eq!(body["ID"], "gateway-1");
    assert_eq!(body["Name"], "gateway");
    assert_eq!(body["Address"], "127.0.0.1");
    assert_eq!(body["Port"], 9000);
    assert_eq!(body["Check"]["Timeout"], "3s");
    assert_eq!(body["Check"]["Interval"], "5s");
    assert_eq!(body["Check"]["TTL"], "10s");
    assert_eq!(body["Check"]["DeregisterCriticalServiceAfter"], "30s");

    // consul 会按这个地址探测
    let check_url = body["Check"]["HTTP"].as_str().unwrap().to_string();
    let resp = reqwest::get(&check_url).await.expect("health check");
    assert_eq!(resp.status(), reqwest::StatusCode::OK);
    assert_eq!(resp.text().await.unwrap(), "consulCheck");

    client.deregister().await.expect("deregister");
    assert_eq!(mock.deregistrations(), ["gateway-1"]);
}

#[tokio::test]
async fn test_register_against_unreachable_consul() {
    // 先占用再释放一个端口，保证没有服务在监听
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let backend = Arc::new(ConsulBackend::new(&registry_config(addr)).unwrap());
    let client = RegistryClient::new(backend.clone(), HealthCheckConfig::default().with_port(0));

    let err = client
        .register("gateway", "gateway-1", "127.0.0.1", 9000)
        .await
        .unwrap_err();
    assert!(matches!(err, DiscoveryError::RegistrationFailed { .. }));
    assert!(client.registration().await.is_none());

    let err = client.add_watcher("user-service").await.unwrap_err();
    assert!(matches!(err, DiscoveryError::SubscriptionFailed { .. }));
    assert!(client.watched_services().await.is_empty());
}

#[tokio::test]
async fn test_watch_follows_consul_index() {
    let (mock, addr) = start_mock_consul().await;
    mock.set_entries(5, &[healthy("a", 1), healthy("b", 2)]);

    let backend: Arc<dyn RegistryBackend> =
        Arc::new(ConsulBackend::new(&registry_config(addr)).unwrap());
    let watcher = DiscoveryWatcher::start(backend, "user-service")
        .await
        .expect("watch");
    wait_for_ids(&watcher, &["a", "b"]).await;

    // 等到后台的阻塞查询发出
    for _ in 0..100 {
        if mock.blocking_queries() > 0 {
            break;
        }
        sleep(Duration::from_millis(10)).await;
    }
    assert!(mock.blocking_queries() > 0);

    mock.set_entries(6, &[healthy("c", 3)]);
    wait_for_ids(&watcher, &["c"]).await;

    // 索引回退后重新从头查询
    mock.set_entries(2, &[healthy("a", 1), healthy("c", 3)]);
    wait_for_ids(&watcher, &["a", "c"]).await;

    mock.set_entries(3, &[healthy("d", 4)]);
    wait_for_ids(&watcher, &["d"]).await;

    assert!(watcher.is_running());
    watcher.shutdown().await;
}

#[tokio::test]
async fn test_watch_ignores_malformed_payload() {
    let (mock, addr) = start_mock_consul().await;
    mock.set_entries(5, &[healthy("a", 1)]);

    let backend: Arc<dyn RegistryBackend> =
        Arc::new(ConsulBackend::new(&registry_config(addr)).unwrap());
    let watcher = DiscoveryWatcher::start(backend, "user-service")
        .await
        .expect("watch");
    wait_for_ids(&watcher, &["a"]).await;

    mock.set_payload(6, json!({ "unexpected": true }));
    sleep(Duration::from_millis(200)).await;
    assert_eq!(watcher.round_select().await.unwrap().id, "a");

    mock.set_entries(7, &[healthy("b", 2)]);
    wait_for_ids(&watcher, &["b"]).await;
    watcher.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_stops_blocking_queries() {
    let (mock, addr) = start_mock_consul().await;
    mock.set_entries(5, &[healthy("a", 1)]);

    let backend: Arc<dyn RegistryBackend> =
        Arc::new(ConsulBackend::new(&registry_config(addr)).unwrap());
    let watcher = DiscoveryWatcher::start(backend, "user-service")
        .await
        .expect("watch");
    wait_for_ids(&watcher, &["a"]).await;
    watcher.shutdown().await;

    // 停止后再等一个 wait 周期，查询次数不再增长
    sleep(Duration::from_millis(100)).await;
    let before = mock.health_queries.lock().unwrap().len();
    sleep(Duration::from_millis(1500)).await;
    let after = mock.health_queries.lock().unwrap().len();
    assert_eq!(before, after);
}

#[tokio::test]
async fn test_watch_backs_off_on_query_errors_and_recovers() {
    let (mock, addr) = start_mock_consul().await;
    mock.set_entries(5, &[healthy("a", 1)]);

    // retry_base_ms = 50, retry_max_ms = 200
    let backend: Arc<dyn RegistryBackend> =
        Arc::new(ConsulBackend::new(&registry_config(addr)).unwrap());
    let watcher = DiscoveryWatcher::start(backend, "user-service")
        .await
        .expect("watch");
    wait_for_ids(&watcher, &["a"]).await;
    for _ in 0..100 {
        if mock.blocking_queries() > 0 {
            break;
        }
        sleep(Duration::from_millis(10)).await;
    }

    mock.push_faults(&[
        Fault::ServerError,
        Fault::MissingIndex,
        Fault::ServerError,
        Fault::MissingIndex,
    ]);
    let started = Instant::now();
    // 正在等待的阻塞查询正常返回，之后的四次查询依次失败
    mock.set_entries(6, &[healthy("b", 2)]);
    wait_for_ids(&watcher, &["b"]).await;

    for _ in 0..300 {
        if mock.pending_faults() == 0 {
            break;
        }
        sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(mock.pending_faults(), 0);
    // 第四次失败前至少退避了 50 + 100 + 200 ms
    assert!(started.elapsed() >= Duration::from_millis(300));

    // 失败期间快照保持不变
    assert_eq!(watcher.round_select().await.unwrap().id, "b");

    // 恢复后继续跟随索引，查询次数有界
    mock.set_entries(7, &[healthy("c", 3)]);
    wait_for_ids(&watcher, &["c"]).await;
    assert!(mock.query_count() <= 12, "{} queries", mock.query_count());
    assert!(watcher.is_running());
    watcher.shutdown().await;
}

#[tokio::test]
async fn test_missing_consul_index_does_not_spin() {
    let (mock, addr) = start_mock_consul().await;
    mock.set_entries(5, &[healthy("a", 1)]);
    mock.omit_index.store(true, Ordering::SeqCst);

    let config = RegistryConfig {
        wait_secs: 5,
        ..registry_config(addr)
    };
    let backend: Arc<dyn RegistryBackend> = Arc::new(ConsulBackend::new(&config).unwrap());
    let err = DiscoveryWatcher::start(backend.clone(), "user-service")
        .await
        .err()
        .expect("subscription without index must fail");
    assert!(matches!(err, DiscoveryError::SubscriptionFailed { .. }));
    assert!(err.to_string().contains("X-Consul-Index"));

    // 订阅建立后 consul 不再返回索引：按退避重试，而不是忙等
    mock.omit_index.store(false, Ordering::SeqCst);
    let watcher = DiscoveryWatcher::start(backend, "user-service")
        .await
        .expect("watch");
    wait_for_ids(&watcher, &["a"]).await;
    mock.omit_index.store(true, Ordering::SeqCst);
    mock.set_entries(6, &[healthy("b", 2)]);

    let before = mock.query_count();
    sleep(Duration::from_millis(500)).await;
    let during = mock.query_count() - before;
    assert!(during < 10, "{} queries in 500ms", during);

    mock.omit_index.store(false, Ordering::SeqCst);
    wait_for_ids(&watcher, &["b"]).await;
    watcher.shutdown().await;
}

#[tokio::test]
async fn test_service_name_is_path_encoded() {
    let (mock, addr) = start_mock_consul().await;
    mock.set_entries(5, &[healthy("a", 1)]);

    let backend: Arc<dyn RegistryBackend> =
        Arc::new(ConsulBackend::new(&registry_config(addr)).unwrap());
    let watcher = DiscoveryWatcher::start(backend, "user service/v2?dc=x")
        .await
        .expect("watch");
    wait_for_ids(&watcher, &["a"]).await;

    let names = mock.queried_services.lock().unwrap().clone();
    assert_eq!(names[0], "user service/v2?dc=x");
    watcher.shutdown().await;
}

/// Consul 地址，可通过环境变量 CONSUL_ADDR 覆盖
fn consul_addr() -> String {
    std::env::var("CONSUL_ADDR").unwrap_or_else(|_| "http://127.0.0.1:8500".to_string())
}

#[tokio::test]
#[ignore] // 需要运行中的 Consul
async fn test_live_consul_register_and_watch() {
    let config = RegistryConfig {
        address: consul_addr(),
        wait_secs: 5,
        ..RegistryConfig::default()
    };
    let backend = Arc::new(ConsulBackend::new(&config).unwrap());
    let client = RegistryClient::new(backend, HealthCheckConfig::default().with_port(0));

    client
        .register("flare-test", "flare-test-1", "127.0.0.1", 9000)
        .await
        .expect("register");
    client.add_watcher("flare-test").await.expect("watch");

    // Consul 第一次探测通过后实例才会出现在健康列表里
    let mut selected = None;
    for _ in 0..60 {
        if let Ok(info) = client.select("flare-test").await {
            selected = Some(info);
            break;
        }
        sleep(Duration::from_millis(500)).await;
    }
    let info = selected.expect("instance never became healthy");
    assert_eq!(info.id, "flare-test-1");
    assert_eq!(info.addr, "127.0.0.1:9000");

    client.deregister().await.expect("deregister");
    client.shutdown().await;
}

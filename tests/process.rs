//! Drives the real server over TCP with both providers stubbed by wiremock.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{Value, json};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use deskrelay::app::{self, AppState};
use deskrelay::config::{Config, Settings};
use deskrelay::server::Server;

struct Relay {
    addr: SocketAddr,
    upstream: MockServer,
    dir: tempfile::TempDir,
    http: reqwest::Client,
    stop: Option<oneshot::Sender<()>>,
}

impl Relay {
    async fn start() -> Self {
        let upstream = MockServer::start().await;
        let dir = tempfile::tempdir().unwrap();
        let prompt_path = dir.path().join("classify_prompt.txt");
        std::fs::write(&prompt_path, "organize the icons").unwrap();

        let config = Config::from_json(
            &json!({
                "apiKey": "sk-chat",
                "model": "chat-model",
                "temperature": 0.2,
                "apiEndpoint": format!("{}/v1/chat/completions", upstream.uri()),
                "qianwenAPIKey": "sk-image",
                "qianwenEndpoint": format!("{}/api/v1/generation", upstream.uri())
            })
            .to_string(),
        )
        .unwrap();
        let settings = Settings {
            prompt_path,
            image_dir: dir.path().to_owned(),
            upstream_timeout: Duration::from_secs(5),
        };
        let state = Arc::new(AppState::new(&config, &settings).unwrap());

        let server = Server::bind("127.0.0.1:0").await.unwrap();
        let addr = server.local_addr();
        let (stop, stopped) = oneshot::channel::<()>();
        tokio::spawn(async move {
            server
                .run_until(app::router(state), async {
                    let _ = stopped.await;
                })
                .await
                .unwrap();
        });

        Self {
            addr,
            upstream,
            dir,
            http: reqwest::Client::new(),
            stop: Some(stop),
        }
    }

    fn url(&self, p: &str) -> String {
        format!("http://{}{}", self.addr, p)
    }

    async fn post(&self, body: Value) -> reqwest::Response {
        self.http
            .post(self.url("/process"))
            .json(&body)
            .send()
            .await
            .unwrap()
    }
}

impl Drop for Relay {
    fn drop(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
    }
}

async fn chat_reply(upstream: &MockServer, content: &str) {
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(header("authorization", "Bearer sk-chat"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{"message": {"role": "assistant", "content": content}}]
        })))
        .mount(upstream)
        .await;
}

#[tokio::test]
async fn chat_round_trip() {
    let relay = Relay::start().await;
    chat_reply(&relay.upstream, "hello from the model").await;

    let res = relay
        .post(json!({"input": "hi there", "type": 0, "prompt": "be nice"}))
        .await;

    assert_eq!(res.status().as_u16(), 200);
    assert_eq!(
        res.headers()["content-type"].to_str().unwrap(),
        "application/json"
    );
    let body: Value = res.json().await.unwrap();
    assert_eq!(body, json!({"output": "hello from the model"}));
}

#[tokio::test]
async fn organize_keyword_sends_prompt_file() {
    let relay = Relay::start().await;
    chat_reply(&relay.upstream, "[]").await;

    let res = relay
        .post(json!({"input": "帮我整理一下桌面", "type": 0, "softwareLayout": "6*10"}))
        .await;
    assert_eq!(res.status().as_u16(), 200);

    let sent: Vec<Value> = relay
        .upstream
        .received_requests()
        .await
        .unwrap()
        .iter()
        .map(|r| serde_json::from_slice(&r.body).unwrap())
        .collect();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0]["messages"][1]["content"], "organize the icons");
}

#[tokio::test]
async fn wallpaper_keyword_generates_and_saves_image() {
    let relay = Relay::start().await;
    let image_url = format!("{}/oss/wallpaper.png", relay.upstream.uri());
    Mock::given(method("POST"))
        .and(path("/api/v1/generation"))
        .and(header("authorization", "Bearer sk-image"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "output": {
                "choices": [{"finish_reason": "stop",
                             "message": {"role": "assistant", "content": [{"image": image_url}]}}],
                "task_metric": {"TOTAL": 1, "SUCCEEDED": 1, "FAILED": 0}
            },
            "usage": {"width": 1920, "height": 1080, "image_count": 1},
            "request_id": "abc"
        })))
        .mount(&relay.upstream)
        .await;
    Mock::given(method("GET"))
        .and(path("/oss/wallpaper.png"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"\x89PNG".to_vec()))
        .mount(&relay.upstream)
        .await;

    let res = relay
        .post(json!({"input": "生成一张风景壁纸", "screenResolution": "1920*1080"}))
        .await;
    assert_eq!(res.status().as_u16(), 200);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["output"], image_url.as_str());

    let saved: Vec<_> = std::fs::read_dir(relay.dir.path())
        .unwrap()
        .filter_map(Result::ok)
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .filter(|n| n.starts_with("generated_image_"))
        .collect();
    assert_eq!(saved.len(), 1);
    assert!(saved[0].ends_with(".png"));
}

#[tokio::test]
async fn upstream_failure_is_500_and_server_survives() {
    let relay = Relay::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/generation"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .mount(&relay.upstream)
        .await;

    let res = relay.post(json!({"input": "来张图片", "type": 2})).await;
    assert_eq!(res.status().as_u16(), 500);
    let text = res.text().await.unwrap();
    assert!(text.starts_with("Error generating image:"), "{text}");

    chat_reply(&relay.upstream, "alive").await;
    let res = relay.post(json!({"input": "ping"})).await;
    assert_eq!(res.status().as_u16(), 200);
}

#[tokio::test]
async fn get_is_405() {
    let relay = Relay::start().await;
    let res = relay.http.get(relay.url("/process")).send().await.unwrap();
    assert_eq!(res.status().as_u16(), 405);
    assert_eq!(res.headers()["allow"].to_str().unwrap(), "POST");
    assert_eq!(res.text().await.unwrap(), "Method not allowed");
}

#[tokio::test]
async fn unknown_path_is_404() {
    let relay = Relay::start().await;
    let res = relay
        .http
        .post(relay.url("/elsewhere"))
        .body("{}")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status().as_u16(), 404);
}

#[tokio::test]
async fn malformed_json_is_400() {
    let relay = Relay::start().await;
    let res = relay
        .http
        .post(relay.url("/process"))
        .header("content-type", "application/json")
        .body("{\"input\": ")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status().as_u16(), 400);
    assert!(
        res.text()
            .await
            .unwrap()
            .starts_with("Error parsing request:")
    );
    assert!(
        relay
            .upstream
            .received_requests()
            .await
            .unwrap()
            .is_empty()
    );
}

#[tokio::test]
async fn keep_alive_serves_several_requests() {
    let relay = Relay::start().await;
    chat_reply(&relay.upstream, "again").await;

    for _ in 0..3 {
        let res = relay.post(json!({"input": "hello"})).await;
        assert_eq!(res.status().as_u16(), 200);
        let body: Value = res.json().await.unwrap();
        assert_eq!(body["output"], "again");
    }
}

async fn read_until_blank_line(stream: &mut TcpStream) -> String {
    let mut head = Vec::new();
    while !head.ends_with(b"\r\n\r\n") {
        let mut byte = [0u8; 1];
        assert_eq!(stream.read(&mut byte).await.unwrap(), 1, "connection closed early");
        head.push(byte[0]);
    }
    String::from_utf8(head).unwrap()
}

#[tokio::test]
async fn chunked_request_body_is_accepted() {
    let relay = Relay::start().await;
    chat_reply(&relay.upstream, "chunks ok").await;

    let mut stream = TcpStream::connect(relay.addr).await.unwrap();
    stream
        .write_all(
            b"POST /process HTTP/1.1\r\nHost: relay\r\nTransfer-Encoding: chunked\r\n\
              Connection: close\r\n\r\n\
              7\r\n{\"input\r\na\r\n\":\"hello\"}\r\n0\r\n\r\n",
        )
        .await
        .unwrap();

    let mut raw = String::new();
    stream.read_to_string(&mut raw).await.unwrap();
    assert!(raw.starts_with("HTTP/1.1 200 OK\r\n"), "{raw}");
    assert!(raw.ends_with(r#"{"output":"chunks ok"}"#), "{raw}");
}

#[tokio::test]
async fn gzip_transfer_coding_is_501_and_closes() {
    let relay = Relay::start().await;

    let mut stream = TcpStream::connect(relay.addr).await.unwrap();
    stream
        .write_all(b"POST /process HTTP/1.1\r\nTransfer-Encoding: gzip\r\n\r\n")
        .await
        .unwrap();

    let mut raw = String::new();
    stream.read_to_string(&mut raw).await.unwrap();
    assert!(raw.starts_with("HTTP/1.1 501 Not Implemented\r\n"), "{raw}");
    assert!(raw.contains("Connection: close\r\n"));
}

#[tokio::test]
async fn expect_continue_gets_interim_response() {
    let relay = Relay::start().await;
    chat_reply(&relay.upstream, "continued").await;

    let body = br#"{"input":"hello"}"#;
    let head = format!(
        "POST /process HTTP/1.1\r\nHost: relay\r\nExpect: 100-continue\r\n\
         Content-Length: {}\r\nConnection: close\r\n\r\n",
        body.len()
    );

    let mut stream = TcpStream::connect(relay.addr).await.unwrap();
    stream.write_all(head.as_bytes()).await.unwrap();

    let interim = tokio::time::timeout(Duration::from_secs(2), read_until_blank_line(&mut stream))
        .await
        .expect("no 100 Continue before the body was sent");
    assert_eq!(interim, "HTTP/1.1 100 Continue\r\n\r\n");

    stream.write_all(body).await.unwrap();
    let mut raw = String::new();
    stream.read_to_string(&mut raw).await.unwrap();
    assert!(raw.starts_with("HTTP/1.1 200 OK\r\n"), "{raw}");
    assert!(raw.ends_with(r#"{"output":"continued"}"#), "{raw}");
}

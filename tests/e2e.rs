//! End-to-end tests: real server on a loopback port, real HTTP client, and a
//! fake renderer shell script standing in for wkhtmltopdf.
//!
//! The fake renderer understands a few switches of its own:
//!
//! | Argument | Behaviour |
//! |----------|-----------|
//! | `-h`, `--help`, `-V`, `--version` | print a synopsis, exit 0 |
//! | `--echo-args` | write its full argument list, one per line, and stop |
//! | `--fail-late` | write some bytes, then exit 3 at the end |
//! | `--big` | write 2 000 000 zero bytes |
//! | `--flood` | write 200 000 000 zero bytes |
//! | `--sleep` | hang for 30 s |
//! | an existing file | copy it to the output |
//!
//! The last argument is the output target (`-` for stdout), and every
//! invocation leaves an `invoked` marker next to the script.
//!
//! Run with:
//!   cargo test --test e2e -- --nocapture

#![cfg(unix)]

use kwkhtmltopdf::client::{self, write_to_destination};
use kwkhtmltopdf::{plan_invocation, ClientError, Destination, OutputSink, ServerConfig};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;
use tokio::io::AsyncWriteExt;
use tokio::sync::oneshot;

// ── Test helpers ─────────────────────────────────────────────────────────────

const FAKE_RENDERER: &str = r#"#!/bin/sh
touch "$(dirname "$0")/invoked"
for a in "$@"; do
  case "$a" in
    -h|--help|-V|--version) echo "Synopsis: fake wkhtmltopdf $a"; exit 0 ;;
  esac
done
last=""
for a in "$@"; do last="$a"; done
emit() {
  if [ "$last" = "-" ]; then cat; else cat >> "$last"; fi
}
status=0
i=0
for a in "$@"; do
  i=$((i + 1))
  [ "$i" -eq "$#" ] && break
  case "$a" in
    --echo-args) printf '%s\n' "$@" | emit; exit 0 ;;
    --fail-late) printf 'partial-output' | emit; status=3 ;;
    --big) head -c 2000000 /dev/zero | emit ;;
    --flood) head -c 200000000 /dev/zero | emit ;;
    --sleep) exec sleep 30 ;;
    *) if [ -f "$a" ]; then emit < "$a"; fi ;;
  esac
done
exit $status
"#;

/// A running server plus the directories it works in.
struct Harness {
    url: String,
    renderer_dir: TempDir,
    workspace_root: TempDir,
    shutdown: Option<oneshot::Sender<()>>,
}

impl Harness {
    async fn start() -> Self {
        Self::start_with(|b| b).await
    }

    async fn start_with<F>(configure: F) -> Self
    where
        F: FnOnce(kwkhtmltopdf::ServerConfigBuilder) -> kwkhtmltopdf::ServerConfigBuilder,
    {
        let renderer_dir = tempfile::tempdir().unwrap();
        let script = renderer_dir.path().join("fake-wkhtmltopdf");
        std::fs::write(&script, FAKE_RENDERER).unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let workspace_root = tempfile::tempdir().unwrap();
        let builder = ServerConfig::builder()
            .renderer_bin(&script)
            .workspace_root(workspace_root.path())
            .resolve_client_names(false);
        let config = configure(builder).build().unwrap();

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = oneshot::channel::<()>();
        tokio::spawn(async move {
            kwkhtmltopdf::serve(listener, config, async {
                let _ = rx.await;
            })
            .await
            .unwrap();
        });

        Self {
            url: format!("http://{addr}/pdf"),
            renderer_dir,
            workspace_root,
            shutdown: Some(tx),
        }
    }

    fn renderer_invoked(&self) -> bool {
        self.renderer_dir.path().join("invoked").exists()
    }

    fn live_workspaces(&self) -> usize {
        std::fs::read_dir(self.workspace_root.path()).unwrap().count()
    }

    /// Workspaces are released as the body ends; allow the server a moment
    /// when the release races the client's last read.
    async fn assert_workspaces_removed(&self) {
        for _ in 0..50 {
            if self.live_workspaces() == 0 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("{} workspace(s) left behind", self.live_workspaces());
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

fn file_part(name: &str, body: &[u8]) -> reqwest::multipart::Part {
    reqwest::multipart::Part::bytes(body.to_vec()).file_name(name.to_string())
}

async fn post(url: &str, form: reqwest::multipart::Form) -> reqwest::Response {
    reqwest::Client::new()
        .post(url)
        .multipart(form)
        .send()
        .await
        .unwrap()
}

fn content_type(resp: &reqwest::Response) -> String {
    resp.headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string()
}

/// True when the response failed to deliver a complete body, either before
/// or after the status line.
async fn is_aborted(result: reqwest::Result<reqwest::Response>) -> bool {
    match result {
        Err(_) => true,
        Ok(resp) => {
            assert_eq!(resp.status(), 200);
            resp.bytes().await.is_err()
        }
    }
}

// ── Scenarios ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn renders_page_to_pdf_response() {
    let h = Harness::start().await;
    let form = reqwest::multipart::Form::new()
        .text("option", "--page-size")
        .text("option", "A4")
        .part("file", file_part("page.html", b"<html>hello</html>"));

    let resp = post(&h.url, form).await;

    assert_eq!(resp.status(), 200);
    assert_eq!(content_type(&resp), "application/pdf");
    assert_eq!(resp.bytes().await.unwrap(), &b"<html>hello</html>"[..]);
    h.assert_workspaces_removed().await;
}

#[tokio::test]
async fn arguments_keep_request_order() {
    let h = Harness::start().await;
    let form = reqwest::multipart::Form::new()
        .text("option", "--echo-args")
        .text("option", "--title")
        .text("option", "")
        .part("file", file_part("../../etc/cover.html", b"x"))
        .text("option", "--zoom");

    let body = post(&h.url, form).await.text().await.unwrap();
    let lines: Vec<&str> = body.lines().collect();

    assert_eq!(lines.len(), 6, "got {lines:?}");
    assert_eq!(&lines[..3], &["--echo-args", "--title", ""]);
    // Directory components are stripped; the file lives in the workspace.
    let stored = Path::new(lines[3]);
    assert_eq!(stored.file_name().unwrap(), "cover.html");
    assert!(stored.starts_with(h.workspace_root.path()), "got {stored:?}");
    assert_eq!(&lines[4..], &["--zoom", "-"]);
}

#[tokio::test]
async fn help_is_plain_text_without_output_target() {
    let h = Harness::start().await;
    let form = reqwest::multipart::Form::new().text("option", "-h");

    let resp = post(&h.url, form).await;

    assert_eq!(resp.status(), 200);
    assert_eq!(content_type(&resp), "text/plain");
    let text = resp.text().await.unwrap();
    assert_eq!(text, "Synopsis: fake wkhtmltopdf -h\n");
}

#[tokio::test]
async fn missing_renderer_is_500() {
    let h = Harness::start_with(|b| b.renderer_bin("/nonexistent/wkhtmltopdf")).await;
    let form = reqwest::multipart::Form::new().part("file", file_part("page.html", b"<p/>"));

    let resp = post(&h.url, form).await;

    assert_eq!(resp.status(), 500);
    assert_eq!(content_type(&resp), "text/plain; charset=utf-8");
    assert!(!resp.text().await.unwrap().is_empty());
    h.assert_workspaces_removed().await;
}

#[tokio::test]
async fn renderer_failure_after_output_aborts_connection() {
    let h = Harness::start().await;
    let form = reqwest::multipart::Form::new()
        .text("option", "--fail-late")
        .part("file", file_part("page.html", b"<p/>"));

    let result = reqwest::Client::new()
        .post(&h.url)
        .multipart(form)
        .send()
        .await;

    assert!(is_aborted(result).await, "truncated body must not look complete");
    h.assert_workspaces_removed().await;
}

#[tokio::test]
async fn unexpected_part_is_rejected_before_spawn() {
    let h = Harness::start().await;
    let form = reqwest::multipart::Form::new()
        .text("option", "--quiet")
        .text("options", "--grayscale");

    let resp = post(&h.url, form).await;

    assert_eq!(resp.status(), 400);
    assert!(resp.text().await.unwrap().contains("options"));
    assert!(!h.renderer_invoked());
    h.assert_workspaces_removed().await;
}

#[tokio::test]
async fn unknown_path_and_method() {
    let h = Harness::start().await;
    let base = h.url.trim_end_matches("/pdf").to_string();
    let http = reqwest::Client::new();

    let resp = http.post(format!("{base}/html")).send().await.unwrap();
    assert_eq!(resp.status(), 404);

    let resp = http.get(&h.url).send().await.unwrap();
    assert_eq!(resp.status(), 405);

    // The root path is an alias of /pdf.
    let form = reqwest::multipart::Form::new().text("option", "--version");
    let resp = http.post(format!("{base}/")).multipart(form).send().await.unwrap();
    assert_eq!(resp.status(), 200);
}

#[tokio::test]
async fn retries_produce_identical_bodies() {
    let h = Harness::start().await;
    let mut bodies = Vec::new();
    for _ in 0..3 {
        let form = reqwest::multipart::Form::new()
            .text("option", "--echo-args")
            .part("file", file_part("page.html", b"same"));
        let body = post(&h.url, form).await.text().await.unwrap();
        // Workspace paths differ per request; compare everything else.
        let normalised: Vec<String> = body
            .lines()
            .map(|l| match Path::new(l).file_name() {
                Some(name) if l.starts_with('/') => name.to_string_lossy().into_owned(),
                _ => l.to_string(),
            })
            .collect();
        bodies.push(normalised);
    }
    assert_eq!(bodies[0], bodies[1]);
    assert_eq!(bodies[1], bodies[2]);
    h.assert_workspaces_removed().await;
}

#[tokio::test]
async fn concurrent_requests_with_same_basename_stay_isolated() {
    let h = Harness::start().await;
    let mut tasks = Vec::new();
    for i in 0..8 {
        let url = h.url.clone();
        tasks.push(tokio::spawn(async move {
            let content = format!("<html>request {i}</html>");
            let form = reqwest::multipart::Form::new()
                .part("file", file_part("index.html", content.as_bytes()));
            let body = post(&url, form).await.text().await.unwrap();
            (content, body)
        }));
    }
    for task in tasks {
        let (sent, received) = task.await.unwrap();
        assert_eq!(sent, received);
    }
    h.assert_workspaces_removed().await;
}

#[tokio::test]
async fn large_output_is_relayed_without_deadlock() {
    let h = Harness::start().await;
    let form = reqwest::multipart::Form::new().text("option", "--big");

    let body = tokio::time::timeout(Duration::from_secs(30), async {
        post(&h.url, form).await.bytes().await.unwrap()
    })
    .await
    .expect("large render stalled");

    assert_eq!(body.len(), 2_000_000);
    assert!(body.iter().all(|&b| b == 0));
}

#[tokio::test]
async fn file_relay_mode() {
    let h = Harness::start_with(|b| b.output_sink(OutputSink::WorkspaceFile)).await;

    let form = reqwest::multipart::Form::new()
        .part("file", file_part("a.html", b"AAA"))
        .part("file", file_part("b.html", b"BBB"));
    let resp = post(&h.url, form).await;
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.bytes().await.unwrap(), &b"AAABBB"[..]);

    let form = reqwest::multipart::Form::new().text("option", "--big");
    let body = post(&h.url, form).await.bytes().await.unwrap();
    assert_eq!(body.len(), 2_000_000);

    // A failing renderer in file mode never sends a byte of the document.
    let form = reqwest::multipart::Form::new()
        .text("option", "--fail-late")
        .part("file", file_part("page.html", b"<p/>"));
    let result = reqwest::Client::new()
        .post(&h.url)
        .multipart(form)
        .send()
        .await;
    assert!(is_aborted(result).await);

    h.assert_workspaces_removed().await;
}

#[tokio::test]
async fn render_timeout_kills_renderer_and_aborts() {
    let h = Harness::start_with(|b| b.render_timeout(Duration::from_secs(1))).await;
    let form = reqwest::multipart::Form::new().text("option", "--sleep");

    let started = std::time::Instant::now();
    let result = reqwest::Client::new()
        .post(&h.url)
        .multipart(form)
        .send()
        .await;

    assert!(is_aborted(result).await);
    assert!(started.elapsed() < Duration::from_secs(20));
    h.assert_workspaces_removed().await;
}

#[tokio::test]
async fn render_timeout_holds_when_client_stops_reading() {
    let h = Harness::start_with(|b| b.render_timeout(Duration::from_secs(1))).await;
    let addr = h
        .url
        .trim_start_matches("http://")
        .trim_end_matches("/pdf")
        .to_string();

    let body = "--kwk\r\n\
                Content-Disposition: form-data; name=\"option\"\r\n\r\n\
                --flood\r\n\
                --kwk--\r\n";
    let request = format!(
        "POST /pdf HTTP/1.1\r\n\
         Host: {addr}\r\n\
         Content-Type: multipart/form-data; boundary=kwk\r\n\
         Content-Length: {}\r\n\r\n{body}",
        body.len()
    );

    // Send the request, then never read the response.
    let mut stream = tokio::net::TcpStream::connect(&addr).await.unwrap();
    stream.write_all(request.as_bytes()).await.unwrap();
    stream.flush().await.unwrap();

    tokio::time::sleep(Duration::from_secs(3)).await;
    assert!(h.renderer_invoked());
    h.assert_workspaces_removed().await;
    drop(stream);
}

// ── Client against the server ────────────────────────────────────────────────

fn write_input(dir: &Path, name: &str, body: &str) -> String {
    let path = dir.join(name);
    std::fs::write(&path, body).unwrap();
    path.to_string_lossy().into_owned()
}

#[tokio::test]
async fn client_round_trip_to_file() {
    let h = Harness::start().await;
    let dir = tempfile::tempdir().unwrap();
    let input = write_input(dir.path(), "report.html", "<h1>report</h1>");
    let output = dir.path().join("report.pdf");

    let args = vec![
        "--page-size".to_string(),
        "A4".to_string(),
        input,
        output.to_string_lossy().into_owned(),
    ];
    let plan = plan_invocation(&args).unwrap();
    assert_eq!(plan.destination, Destination::File(output.clone()));

    let http = reqwest::Client::new();
    let resp = client::post(&http, &h.url, &plan).await.unwrap();
    let written = write_to_destination(resp, &plan.destination).await.unwrap();

    assert_eq!(written, 15);
    assert_eq!(std::fs::read_to_string(&output).unwrap(), "<h1>report</h1>");
    h.assert_workspaces_removed().await;
}

#[tokio::test]
async fn client_reports_server_status() {
    let h = Harness::start_with(|b| b.renderer_bin("/nonexistent/wkhtmltopdf")).await;
    let plan = plan_invocation(&["--version".to_string()]).unwrap();

    let err = client::post(&reqwest::Client::new(), &h.url, &plan)
        .await
        .unwrap_err();

    match err {
        ClientError::ServerStatus { status, message } => {
            assert_eq!(status, 500);
            assert!(message.contains("/nonexistent/wkhtmltopdf"), "got {message}");
        }
        other => panic!("expected ServerStatus, got {other:?}"),
    }
}

#[tokio::test]
async fn client_leaves_no_file_after_truncation() {
    let h = Harness::start().await;
    let dir = tempfile::tempdir().unwrap();
    let input = write_input(dir.path(), "page.html", "<p>page</p>");
    let output: PathBuf = dir.path().join("out.pdf");

    let args = vec![
        "--fail-late".to_string(),
        input,
        output.to_string_lossy().into_owned(),
    ];
    let plan = plan_invocation(&args).unwrap();
    let http = reqwest::Client::new();

    let outcome = match client::post(&http, &h.url, &plan).await {
        Ok(resp) => write_to_destination(resp, &plan.destination).await,
        Err(e) => Err(e),
    };

    assert!(
        matches!(
            outcome,
            Err(ClientError::Truncated { .. }) | Err(ClientError::Request(_))
        ),
        "got {outcome:?}"
    );
    assert!(!output.exists());
    // Only the input remains; the temporary download was cleaned up.
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
}

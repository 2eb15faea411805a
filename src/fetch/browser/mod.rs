// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Headless Chromium for script-rendered pages
//!
//! One browser process per render, with a private profile directory inside
//! the request scope. Every network request the page makes is paused through
//! the DevTools `Fetch` domain and checked by the same [`UrlGuard`] as plain
//! HTTP; anything refused fails with `BlockedByClient`. Out-of-process
//! iframes and workers are auto-attached paused, get the same interception,
//! and only then are allowed to run.

pub mod cdp;
pub mod scroll;

pub use cdp::{CdpConnection, CdpEvent};
pub use scroll::{scroll_until_settled, ScrollPolicy, ScrollReport, ScrollablePage, StopReason};

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tempfile::TempDir;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use url::Url;

use super::guard::{SafeUrl, UrlGuard};
use crate::config::WebConfig;
use crate::errors::{ExtractError, Result};
use crate::sandbox::process::kill_group;
use crate::scope::RequestScope;

const CANDIDATE_BINARIES: &[&str] = &[
    "chromium",
    "chromium-browser",
    "google-chrome",
    "google-chrome-stable",
    "headless_shell",
];

const DEVTOOLS_BANNER: &str = "DevTools listening on ";

/// Runs before any page script; closes channels the Fetch domain cannot see
const PAGE_PRELUDE: &str = "(() => { \
    try { Object.defineProperty(window, 'WebSocket', { value: undefined }); } catch (e) {} \
    try { Object.defineProperty(window, 'RTCPeerConnection', { value: undefined }); } catch (e) {} \
    try { Object.defineProperty(window, 'webkitRTCPeerConnection', { value: undefined }); } catch (e) {} \
    try { Object.defineProperty(Navigator.prototype, 'serviceWorker', { get: () => undefined }); } catch (e) {} \
})();";

fn fetch_enable_params() -> Value {
    json!({ "patterns": [{ "urlPattern": "*" }] })
}

/// New child targets start paused until their interception is in place
fn auto_attach_params() -> Value {
    json!({ "autoAttach": true, "waitForDebuggerOnStart": true, "flatten": true })
}

/// Per-render settings taken from the request's fetch options
#[derive(Debug, Clone)]
pub struct RenderSettings {
    pub page_timeout: Duration,
    pub network_idle_timeout: Duration,
    pub max_redirects: usize,
    pub max_scroll_attempts: usize,
    pub max_html_bytes: u64,
}

#[derive(Debug, Clone)]
pub struct RenderedPage {
    pub final_url: Url,
    pub html: String,
    pub scroll: Option<ScrollReport>,
}

#[derive(Debug, Clone)]
pub struct BrowserRenderer {
    chromium_path: Option<PathBuf>,
    user_agent: String,
}

impl BrowserRenderer {
    pub fn new(config: &WebConfig) -> Self {
        Self {
            chromium_path: config.chromium_path.clone(),
            user_agent: config.user_agent.clone(),
        }
    }

    /// Configured binary, or the first known Chromium name on PATH
    pub fn binary(&self) -> Option<PathBuf> {
        if let Some(path) = &self.chromium_path {
            return path.is_file().then(|| path.clone());
        }
        let path_var = std::env::var_os("PATH")?;
        std::env::split_paths(&path_var)
            .flat_map(|dir| CANDIDATE_BINARIES.iter().map(move |name| dir.join(name)))
            .find(|candidate| candidate.is_file())
    }

    pub fn is_available(&self) -> bool {
        self.binary().is_some()
    }

    /// Load `target`, wait for the network to go idle, scroll, and return the DOM
    pub async fn render(
        &self,
        guard: &UrlGuard,
        target: &SafeUrl,
        settings: &RenderSettings,
        scope: &RequestScope,
    ) -> Result<RenderedPage> {
        let binary = self
            .binary()
            .ok_or_else(|| ExtractError::Internal("headless browser not installed".to_string()))?;
        let mut process = BrowserProcess::launch(&binary, &self.user_agent, settings.page_timeout, scope).await?;
        let outcome = process.render(guard, target, settings).await;
        process.shutdown().await;
        outcome
    }
}

/// What the request interceptor observed
#[derive(Debug, Default)]
struct Interception {
    document_requests: usize,
    blocked_document: Option<ExtractError>,
    blocked_total: usize,
}

/// A running browser; killed with its whole process group on drop
struct BrowserProcess {
    child: Child,
    pgid: Option<i32>,
    _profile: TempDir,
    conn: CdpConnection,
    events: Option<mpsc::UnboundedReceiver<CdpEvent>>,
    tasks: Vec<JoinHandle<()>>,
}

impl BrowserProcess {
    async fn launch(
        binary: &Path,
        user_agent: &str,
        startup_timeout: Duration,
        scope: &RequestScope,
    ) -> Result<Self> {
        scope.check_cancelled()?;
        let profile = scope.job_dir("browser-")?;
        let mut cmd = Command::new(binary);
        cmd.args([
            "--headless=new",
            "--remote-debugging-port=0",
            "--remote-debugging-address=127.0.0.1",
            "--no-first-run",
            "--no-default-browser-check",
            "--disable-gpu",
            "--disable-extensions",
            "--disable-background-networking",
            "--disable-component-update",
            "--disable-sync",
            "--disable-default-apps",
            "--mute-audio",
            "--no-proxy-server",
            "--force-webrtc-ip-handling-policy=disable_non_proxied_udp",
            "--disable-site-isolation-trials",
            "--disable-features=IsolateOrigins,site-per-process",
        ])
        .arg(format!("--user-data-dir={}", profile.path().display()))
        .arg(format!("--user-agent={}", user_agent))
        .arg("about:blank")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = cmd
            .spawn()
            .map_err(|e| ExtractError::Internal(format!("browser launch: {}", e)))?;
        let pgid = child.id().map(|pid| pid as i32);
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| ExtractError::Internal("browser stderr unavailable".to_string()))?;

        let mut lines = BufReader::new(stderr).lines();
        let ws_url = tokio::time::timeout(startup_timeout, async {
            while let Ok(Some(line)) = lines.next_line().await {
                if let Some(idx) = line.find(DEVTOOLS_BANNER) {
                    return Some(line[idx + DEVTOOLS_BANNER.len()..].trim().to_string());
                }
            }
            None
        })
        .await;
        let ws_url = match ws_url {
            Ok(Some(url)) => url,
            Ok(None) => {
                if let Some(pgid) = pgid {
                    kill_group(pgid);
                }
                return Err(ExtractError::Internal(
                    "browser exited before opening DevTools".to_string(),
                ));
            }
            Err(_) => {
                if let Some(pgid) = pgid {
                    kill_group(pgid);
                }
                return Err(ExtractError::Timeout("browser startup timed out".to_string()));
            }
        };
        debug!(ws = %ws_url, "browser started");

        // Keep draining stderr so the browser never blocks on a full pipe.
        let drain = tokio::spawn(async move {
            while let Ok(Some(line)) = lines.next_line().await {
                tracing::trace!(line = %line, "chromium");
            }
        });

        let (conn, events) = match CdpConnection::connect(&ws_url, startup_timeout).await {
            Ok(connected) => connected,
            Err(e) => {
                drain.abort();
                if let Some(pgid) = pgid {
                    kill_group(pgid);
                }
                return Err(e);
            }
        };
        Ok(Self {
            child,
            pgid,
            _profile: profile,
            conn,
            events: Some(events),
            tasks: vec![drain],
        })
    }

    async fn render(
        &mut self,
        guard: &UrlGuard,
        target: &SafeUrl,
        settings: &RenderSettings,
    ) -> Result<RenderedPage> {
        let created = self
            .conn
            .call("Target.createTarget", json!({ "url": "about:blank" }), None)
            .await?;
        let target_id = created["targetId"]
            .as_str()
            .ok_or_else(|| ExtractError::TransientIo("browser: no target id".to_string()))?
            .to_string();
        let attached = self
            .conn
            .call(
                "Target.attachToTarget",
                json!({ "targetId": target_id, "flatten": true }),
                None,
            )
            .await?;
        let session = attached["sessionId"]
            .as_str()
            .ok_or_else(|| ExtractError::TransientIo("browser: no session id".to_string()))?
            .to_string();

        let state = Arc::new(Mutex::new(Interception::default()));
        let (idle_tx, mut idle_rx) = watch::channel(None::<String>);
        let events = self
            .events
            .take()
            .ok_or_else(|| ExtractError::Internal("browser events already taken".to_string()))?;
        self.tasks.push(tokio::spawn(intercept(
            self.conn.clone(),
            guard.clone(),
            session.clone(),
            target_id.clone(),
            settings.max_redirects,
            events,
            state.clone(),
            idle_tx,
        )));

        let s = Some(session.as_str());
        self.conn.call("Fetch.enable", fetch_enable_params(), s).await?;
        self.conn
            .call("Target.setAutoAttach", auto_attach_params(), s)
            .await?;
        self.conn.call("Page.enable", json!({}), s).await?;
        self.conn
            .call("Page.setLifecycleEventsEnabled", json!({ "enabled": true }), s)
            .await?;
        self.conn
            .call(
                "Page.addScriptToEvaluateOnNewDocument",
                json!({ "source": PAGE_PRELUDE }),
                s,
            )
            .await?;

        info!(url = %target.url, "rendering page");
        let navigation = tokio::time::timeout(
            settings.page_timeout,
            self.conn
                .call("Page.navigate", json!({ "url": target.url.as_str() }), s),
        )
        .await
        .map_err(|_| ExtractError::TransientIo("page navigation timed out".to_string()))??;

        if let Some(error_text) = navigation["errorText"].as_str().filter(|t| !t.is_empty()) {
            if let Some(blocked) = state.lock().await.blocked_document.take() {
                return Err(blocked);
            }
            return Err(ExtractError::TransientIo(format!(
                "navigation failed: {}",
                error_text
            )));
        }

        let loader_id = navigation["loaderId"].as_str().unwrap_or_default().to_string();
        let went_idle = tokio::time::timeout(
            settings.network_idle_timeout,
            idle_rx.wait_for(|idle| idle.as_deref() == Some(loader_id.as_str())),
        )
        .await
        .map(|seen| seen.is_ok())
        .unwrap_or(false);
        if !went_idle {
            warn!(url = %target.url, "network did not go idle, continuing");
        }

        let page = CdpPage {
            conn: self.conn.clone(),
            session: session.clone(),
        };
        let scroll = if settings.max_scroll_attempts > 0 {
            let report =
                scroll_until_settled(&page, &ScrollPolicy::new(settings.max_scroll_attempts)).await?;
            debug!(?report, "scroll loop finished");
            Some(report)
        } else {
            None
        };

        if let Some(blocked) = state.lock().await.blocked_document.take() {
            return Err(blocked);
        }

        let html = self
            .conn
            .evaluate(
                &session,
                "document.documentElement ? document.documentElement.outerHTML : ''",
            )
            .await?
            .as_str()
            .unwrap_or_default()
            .to_string();
        if html.len() as u64 > settings.max_html_bytes {
            return Err(ExtractError::PolicyViolation(format!(
                "rendered page is {} bytes, limit is {}",
                html.len(),
                settings.max_html_bytes
            )));
        }
        let final_url = self
            .conn
            .evaluate(&session, "location.href")
            .await?
            .as_str()
            .and_then(|href| Url::parse(href).ok())
            .unwrap_or_else(|| target.url.clone());

        let blocked_total = state.lock().await.blocked_total;
        info!(url = %final_url, bytes = html.len(), blocked = blocked_total, "page rendered");
        Ok(RenderedPage {
            final_url,
            html,
            scroll,
        })
    }

    async fn shutdown(&mut self) {
        let _ = tokio::time::timeout(
            Duration::from_secs(2),
            self.conn.call("Browser.close", json!({}), None),
        )
        .await;
        self.conn.close();
        for task in self.tasks.drain(..) {
            task.abort();
        }
        if let Some(pgid) = self.pgid.take() {
            kill_group(pgid);
        }
        let _ = self.child.start_kill();
    }
}

impl Drop for BrowserProcess {
    fn drop(&mut self) {
        self.conn.close();
        for task in self.tasks.drain(..) {
            task.abort();
        }
        if let Some(pgid) = self.pgid.take() {
            kill_group(pgid);
        }
    }
}

/// Schemes that never reach the network
fn is_local_scheme(url: &str) -> bool {
    ["data:", "blob:", "about:"]
        .iter()
        .any(|scheme| url.starts_with(scheme))
}

#[allow(clippy::too_many_arguments)]
async fn intercept(
    conn: CdpConnection,
    guard: UrlGuard,
    session: String,
    main_frame: String,
    max_redirects: usize,
    mut events: mpsc::UnboundedReceiver<CdpEvent>,
    state: Arc<Mutex<Interception>>,
    idle_tx: watch::Sender<Option<String>>,
) {
    let mut sessions = InterceptedSessions::new(session.clone());
    while let Some(event) = events.recv().await {
        let Some(origin) = event.session_id.as_deref().filter(|s| sessions.covers(s)) else {
            continue;
        };
        let origin = origin.to_string();
        match event.method.as_str() {
            "Target.attachedToTarget" => {
                let Some(child) = sessions.on_attached(&event.params) else {
                    continue;
                };
                // A child that cannot be instrumented stays paused.
                match instrument_child(&conn, &child).await {
                    Ok(()) => debug!(kind = %child.kind, "child target intercepted"),
                    Err(e) => {
                        warn!(kind = %child.kind, error = %e, "child target left paused");
                        state.lock().await.blocked_total += 1;
                    }
                }
            }
            "Target.detachedFromTarget" => {
                sessions.on_detached(&event.params);
            }
            "Fetch.requestPaused" => {
                let params = &event.params;
                let Some(request_id) = params["requestId"].as_str() else {
                    continue;
                };
                let url = params["request"]["url"].as_str().unwrap_or_default();
                let is_main_document = origin == session
                    && params["resourceType"].as_str() == Some("Document")
                    && params["frameId"].as_str() == Some(main_frame.as_str());

                let mut verdict = if is_local_scheme(url) {
                    Ok(())
                } else {
                    guard.check(url).await.map(|_| ())
                };
                if is_main_document {
                    let mut st = state.lock().await;
                    st.document_requests += 1;
                    if verdict.is_ok() && st.document_requests > max_redirects + 1 {
                        verdict = Err(ExtractError::TransientIo(format!(
                            "more than {} redirects",
                            max_redirects
                        )));
                    }
                }

                let reply = match verdict {
                    Ok(()) => {
                        conn.call(
                            "Fetch.continueRequest",
                            json!({ "requestId": request_id }),
                            Some(&origin),
                        )
                        .await
                    }
                    Err(e) => {
                        debug!(url = %url, error = %e, "browser request blocked");
                        let mut st = state.lock().await;
                        st.blocked_total += 1;
                        if is_main_document && st.blocked_document.is_none() {
                            st.blocked_document = Some(e);
                        }
                        drop(st);
                        conn.call(
                            "Fetch.failRequest",
                            json!({ "requestId": request_id, "errorReason": "BlockedByClient" }),
                            Some(&origin),
                        )
                        .await
                    }
                };
                if let Err(e) = reply {
                    debug!(error = %e, "interception reply failed");
                }
            }
            "Page.lifecycleEvent" if origin == session => {
                if event.params["name"].as_str() == Some("networkIdle") {
                    let loader = event.params["loaderId"].as_str().map(str::to_string);
                    let _ = idle_tx.send(loader);
                }
            }
            _ => {}
        }
    }
}

/// A target auto-attached under the page: iframe, worker or service worker
#[derive(Debug, Clone, PartialEq, Eq)]
struct AttachedTarget {
    session: String,
    kind: String,
}

/// The page session plus every child session attached beneath it
#[derive(Debug)]
struct InterceptedSessions {
    page: String,
    children: HashSet<String>,
}

impl InterceptedSessions {
    fn new(page: String) -> Self {
        Self {
            page,
            children: HashSet::new(),
        }
    }

    fn covers(&self, session: &str) -> bool {
        session == self.page || self.children.contains(session)
    }

    fn on_attached(&mut self, params: &Value) -> Option<AttachedTarget> {
        let session = params["sessionId"].as_str()?.to_string();
        let kind = params["targetInfo"]["type"]
            .as_str()
            .unwrap_or("other")
            .to_string();
        self.children.insert(session.clone());
        Some(AttachedTarget { session, kind })
    }

    fn on_detached(&mut self, params: &Value) {
        if let Some(session) = params["sessionId"].as_str() {
            self.children.remove(session);
        }
    }
}

/// Route a paused child's requests through the guard, then let it run
async fn instrument_child(conn: &CdpConnection, child: &AttachedTarget) -> Result<()> {
    let s = Some(child.session.as_str());
    conn.call("Fetch.enable", fetch_enable_params(), s).await?;
    conn.call("Target.setAutoAttach", auto_attach_params(), s).await?;
    if child.kind == "iframe" {
        conn.call(
            "Page.addScriptToEvaluateOnNewDocument",
            json!({ "source": PAGE_PRELUDE }),
            s,
        )
        .await?;
    }
    conn.call("Runtime.runIfWaitingForDebugger", json!({}), s).await?;
    Ok(())
}

/// Scroll operations through `Runtime.evaluate`
struct CdpPage {
    conn: CdpConnection,
    session: String,
}

#[async_trait]
impl ScrollablePage for CdpPage {
    async fn scroll_height(&self) -> Result<u64> {
        let value: Value = self
            .conn
            .evaluate(
                &self.session,
                "Math.max(document.body ? document.body.scrollHeight : 0, \
                 document.documentElement ? document.documentElement.scrollHeight : 0)",
            )
            .await?;
        Ok(value.as_f64().map(|h| h.max(0.0) as u64).unwrap_or(0))
    }

    async fn scroll_to_bottom(&self) -> Result<()> {
        self.conn
            .evaluate(
                &self.session,
                "window.scrollTo(0, Math.max(document.body ? document.body.scrollHeight : 0, \
                 document.documentElement ? document.documentElement.scrollHeight : 0))",
            )
            .await?;
        Ok(())
    }
}

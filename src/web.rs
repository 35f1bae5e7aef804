use colored::*;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tracing::{debug, error};

use crate::error::{ErrorKind, ScribeError};
use crate::modes::OptimizationMode;
use crate::session::SessionState;
use crate::{validate_content, Optimizer, Progress};

pub type SharedSession = Arc<Mutex<SessionState>>;

const MAX_REQUEST_BYTES: usize = 256 * 1024;

/// Everything a connection handler needs.
#[derive(Clone)]
pub struct AppState {
    pub session: SharedSession,
    pub optimizer: Optimizer,
}

impl AppState {
    pub fn new(session: SessionState, optimizer: Optimizer) -> Self {
        AppState { session: Arc::new(Mutex::new(session)), optimizer }
    }
}

// ---------------------------------------------------------------------------
// Pages
// ---------------------------------------------------------------------------

const STYLE: &str = r#"<style>
*{box-sizing:border-box}body{margin:0;font-family:system-ui,sans-serif;background:#f6f7f9;color:#1f2328}
nav{display:flex;gap:16px;align-items:center;padding:12px 24px;background:#fff;border-bottom:1px solid #d0d7de}
nav b{margin-right:auto}nav a{color:#0969da;text-decoration:none}
main{padding:20px 24px}.row{display:grid;grid-template-columns:1fr 1fr;gap:16px}
textarea{width:100%;min-height:260px;padding:10px;font:inherit}
.panel{background:#fff;border:1px solid #d0d7de;border-radius:8px;padding:14px;white-space:pre-wrap}
.chip{display:inline-block;font-size:.75rem;padding:2px 8px;border-radius:10px;background:#ddf4ff;color:#0969da}
button{padding:6px 14px;border-radius:6px;border:1px solid #d0d7de;background:#fff;cursor:pointer}
button.primary{background:#1f883d;color:#fff;border-color:#1f883d}button:disabled{opacity:.5;cursor:not-allowed}
.muted{color:#656d76;font-size:.85rem}.err{color:#cf222e}
</style>"#;

pub const INDEX_HTML: &str = r##"<!DOCTYPE html>
<html lang="en"><head><meta charset="utf-8"><meta name="viewport" content="width=device-width, initial-scale=1">
<title>Flow Scribe - Content Editor</title>__STYLE__</head>
<body>
<nav><b>Flow Scribe</b><a href="/">Editor</a><a href="/history">History</a></nav>
<main>
  <div style="display:flex;gap:10px;align-items:end;margin-bottom:12px">
    <label>Mode <select id="mode"></select></label>
    <input id="custom" placeholder="Custom instruction" style="flex:1;display:none;padding:6px">
  </div>
  <div class="row">
    <div>
      <div class="muted"><span class="chip">Original Content</span> <span id="count">0</span> characters</div>
      <textarea id="original" placeholder="Enter your content here..."></textarea>
      <div style="margin-top:8px"><button class="primary" id="go">Optimize</button> <button id="copy-orig">Copy</button>
      <span id="msg" class="err"></span></div>
    </div>
    <div>
      <div class="muted"><span class="chip">Optimized Result</span> <span id="status"></span></div>
      <div class="panel" id="optimized" style="min-height:260px"></div>
      <div style="margin-top:8px"><button id="copy">Copy</button> <button class="primary" id="accept" disabled>Accept</button></div>
      <div class="panel muted" id="reasoning" style="margin-top:12px;display:none"></div>
    </div>
  </div>
</main>
<script>
const $=s=>document.querySelector(s);
let busy=false;
function render(st){
  $('#original').value=st.original;$('#count').textContent=st.original.length;
  $('#optimized').textContent=st.optimized;$('#mode').value=st.mode;
  $('#custom').value=st.custom_prompt;$('#custom').style.display=st.mode==='custom'?'':'none';
  $('#accept').disabled=!st.optimized||busy;
}
async function refresh(){render(await (await fetch('/api/state')).json())}
async function init(){
  const modes=await (await fetch('/api/modes')).json();
  $('#mode').innerHTML=modes.map(m=>`<option value="${m.name}" title="${m.description}">${m.name}</option>`).join('');
  await refresh();
}
$('#original').oninput=e=>{$('#count').textContent=e.target.value.length};
$('#mode').onchange=e=>{$('#custom').style.display=e.target.value==='custom'?'':'none'};
$('#go').onclick=()=>{
  const content=$('#original').value;
  if(content.trim().length<10){$('#msg').textContent='Please enter at least 10 characters';return}
  $('#msg').textContent='';busy=true;$('#go').disabled=true;$('#accept').disabled=true;
  $('#optimized').textContent='';$('#status').textContent='Optimizing...';
  const q=new URLSearchParams({content,mode:$('#mode').value,custom:$('#custom').value});
  const es=new EventSource('/api/optimize?'+q);
  es.onmessage=ev=>{
    if(ev.data==='[DONE]'){es.close();busy=false;$('#go').disabled=false;$('#status').textContent='';refresh();return}
    const m=JSON.parse(ev.data);
    if(m.type==='reasoning'&&m.data[0]){$('#reasoning').style.display='';$('#reasoning').textContent=m.data[0].reasoning;$('#status').textContent='Streaming...'}
    else if(m.type==='text'){$('#optimized').textContent=m.data}
    else if(m.type==='complete'){$('#optimized').textContent=m.data.text}
    else if(m.type==='error'){$('#msg').textContent='Failed to optimize content. Please try again. ('+m.data.message+')'}
  };
  es.onerror=()=>{es.close();busy=false;$('#go').disabled=false;$('#status').textContent=''};
};
$('#accept').onclick=async()=>{await fetch('/api/accept',{method:'POST'});$('#reasoning').style.display='none';refresh()};
$('#copy').onclick=()=>navigator.clipboard.writeText($('#optimized').textContent);
$('#copy-orig').onclick=()=>navigator.clipboard.writeText($('#original').value);
init();
</script>
</body></html>"##;

pub const HISTORY_HTML: &str = r##"<!DOCTYPE html>
<html lang="en"><head><meta charset="utf-8"><meta name="viewport" content="width=device-width, initial-scale=1">
<title>Flow Scribe - History</title>__STYLE__</head>
<body>
<nav><b>Flow Scribe</b><a href="/">Editor</a><a href="/history">History</a></nav>
<main>
  <div style="display:flex;justify-content:space-between;align-items:center">
    <h1>History</h1><button id="clear">Clear All</button>
  </div>
  <p id="empty" class="muted" style="display:none">You don't have any saved optimizations yet.</p>
  <div class="row"><div id="list"></div><div class="panel" id="detail">Select a history item to view details</div></div>
</main>
<script>
const $=s=>document.querySelector(s);
let items=[];
const esc=s=>s.replace(/[&<>"]/g,c=>({'&':'&amp;','<':'&lt;','>':'&gt;','"':'&quot;'}[c]));
const cut=s=>s.length<=120?s:s.slice(0,120)+'...';
function draw(){
  $('#empty').style.display=items.length?'none':'';$('#clear').style.display=items.length?'':'none';
  $('#list').innerHTML=items.map(i=>`<div class="panel" style="margin-bottom:10px">
    <span class="chip">${i.type}</span> <span class="muted">${new Date(i.timestamp).toLocaleString()}</span>
    <p>${esc(cut(i.original))}</p>
    <button onclick="view('${i.id}')">View</button> <button onclick="edit('${i.id}')">Edit</button>
    <button onclick="del('${i.id}')">Delete</button></div>`).join('');
}
async function load(){items=await (await fetch('/api/history')).json();draw()}
function view(id){const i=items.find(x=>x.id===id);if(!i)return;
  $('#detail').innerHTML=`<span class="chip">${i.type}</span><h3>Original Content:</h3>${esc(i.original)}<h3>Optimized Content:</h3>${esc(i.optimized)}`}
async function edit(id){await fetch('/api/history/load?id='+encodeURIComponent(id),{method:'POST'});location.href='/'}
async function del(id){await fetch('/api/history/delete?id='+encodeURIComponent(id),{method:'POST'});
  $('#detail').textContent='Select a history item to view details';load()}
$('#clear').onclick=async()=>{if(!confirm('Are you sure you want to delete all history items? This action cannot be undone.'))return;
  await fetch('/api/history/clear',{method:'POST'});load()};
load();
</script>
</body></html>"##;

pub const NOT_FOUND_HTML: &str = r##"<!DOCTYPE html>
<html lang="en"><head><meta charset="utf-8"><title>Flow Scribe - Not Found</title>__STYLE__</head>
<body><main style="text-align:center;padding-top:80px"><h1>404</h1>
<p class="muted">Oops! Page not found</p><a href="/">Return to Editor</a></main></body></html>"##;

fn page(template: &str) -> String {
    template.replace("__STYLE__", STYLE)
}

// ---------------------------------------------------------------------------
// Query-string helpers
// ---------------------------------------------------------------------------

fn hex_value(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

/// Percent-decoding for URL query values; multi-byte UTF-8 survives.
pub fn url_decode(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'+' => out.push(b' '),
            b'%' if i + 2 < bytes.len() => {
                match (hex_value(bytes[i + 1]), hex_value(bytes[i + 2])) {
                    (Some(hi), Some(lo)) => {
                        out.push((hi << 4) | lo);
                        i += 2;
                    }
                    _ => out.push(b'%'),
                }
            }
            b => out.push(b),
        }
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Parse query string into key-value pairs.
pub fn parse_query(query: &str) -> HashMap<String, String> {
    query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .filter_map(|pair| {
            let mut parts = pair.splitn(2, '=');
            let key = parts.next()?;
            let val = parts.next().unwrap_or("");
            Some((url_decode(key), url_decode(val)))
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Responses
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct HttpResponse {
    pub status: u16,
    pub content_type: &'static str,
    pub body: String,
}

impl HttpResponse {
    fn html(status: u16, body: String) -> Self {
        HttpResponse { status, content_type: "text/html; charset=utf-8", body }
    }

    fn json<T: Serialize>(status: u16, value: &T) -> Self {
        match serde_json::to_string(value) {
            Ok(body) => HttpResponse { status, content_type: "application/json", body },
            Err(e) => Self::error_message(500, &e.to_string()),
        }
    }

    fn error_message(status: u16, message: &str) -> Self {
        HttpResponse {
            status,
            content_type: "application/json",
            body: serde_json::json!({ "error": message }).to_string(),
        }
    }

    fn from_error(e: &ScribeError) -> Self {
        let status = match e.kind() {
            ErrorKind::Validation => 400,
            ErrorKind::Configuration => 500,
            ErrorKind::Transport => 502,
            ErrorKind::Persistence => 500,
        };
        Self::error_message(status, &e.to_string())
    }

    fn reason(&self) -> &'static str {
        match self.status {
            200 => "OK",
            400 => "Bad Request",
            404 => "Not Found",
            405 => "Method Not Allowed",
            502 => "Bad Gateway",
            _ => "Internal Server Error",
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        format!(
            "HTTP/1.1 {} {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            self.status,
            self.reason(),
            self.content_type,
            self.body.len(),
            self.body
        )
        .into_bytes()
    }
}

#[derive(Serialize)]
struct ModeInfo {
    name: &'static str,
    description: &'static str,
}

fn with_session<T>(state: &AppState, f: impl FnOnce(&mut SessionState) -> T) -> Result<T, HttpResponse> {
    match state.session.lock() {
        Ok(mut s) => Ok(f(&mut s)),
        Err(_) => Err(HttpResponse::error_message(500, "session lock poisoned")),
    }
}

fn query_id(query: &HashMap<String, String>) -> Result<&str, HttpResponse> {
    query
        .get("id")
        .map(String::as_str)
        .filter(|id| !id.is_empty())
        .ok_or_else(|| HttpResponse::error_message(400, "missing id"))
}

/// Every route except the streaming `/api/optimize`.
pub fn route(method: &str, path: &str, query: &HashMap<String, String>, state: &AppState) -> HttpResponse {
    let result = match (method, path) {
        ("GET", "/") => Ok(HttpResponse::html(200, page(INDEX_HTML))),
        ("GET", "/history") => Ok(HttpResponse::html(200, page(HISTORY_HTML))),
        ("GET", "/api/state") => with_session(state, |s| HttpResponse::json(200, &s.snapshot())),
        ("GET", "/api/history") => with_session(state, |s| HttpResponse::json(200, &s.history())),
        ("GET", "/api/modes") => {
            let modes: Vec<ModeInfo> = OptimizationMode::all()
                .into_iter()
                .map(|m| ModeInfo { name: m.name(), description: m.description() })
                .collect();
            Ok(HttpResponse::json(200, &modes))
        }
        ("POST", "/api/mode") => match query.get("mode").map(|m| OptimizationMode::from_str_loose(m)) {
            Some(Ok(mode)) => with_session(state, |s| {
                s.set_mode(mode, query.get("custom").cloned());
                HttpResponse::json(200, &s.snapshot())
            }),
            Some(Err(e)) => Err(HttpResponse::error_message(400, &e)),
            None => Err(HttpResponse::error_message(400, "missing mode")),
        },
        ("POST", "/api/accept") => with_session(state, |s| match s.accept_optimization() {
            Ok(entry) => HttpResponse::json(200, &serde_json::json!({ "entry": entry })),
            Err(e) => HttpResponse::from_error(&e),
        }),
        ("POST", "/api/history/delete") => query_id(query).and_then(|id| {
            with_session(state, |s| match s.delete_history_item(id) {
                Ok(true) => HttpResponse::json(200, &serde_json::json!({ "deleted": id })),
                Ok(false) => HttpResponse::error_message(404, "no such history entry"),
                Err(e) => HttpResponse::from_error(&e),
            })
        }),
        ("POST", "/api/history/clear") => with_session(state, |s| match s.clear_history() {
            Ok(n) => HttpResponse::json(200, &serde_json::json!({ "deleted": n })),
            Err(e) => HttpResponse::from_error(&e),
        }),
        ("POST", "/api/history/load") => query_id(query).and_then(|id| {
            with_session(state, |s| {
                if s.load_from_history(id).is_some() {
                    HttpResponse::json(200, &s.snapshot())
                } else {
                    HttpResponse::error_message(404, "no such history entry")
                }
            })
        }),
        (_, "/" | "/history" | "/api/state" | "/api/history" | "/api/modes" | "/api/mode" | "/api/accept"
            | "/api/history/delete" | "/api/history/clear" | "/api/history/load") => {
            Err(HttpResponse::error_message(405, "method not allowed"))
        }
        (_, p) if p.starts_with("/api/") => Err(HttpResponse::error_message(404, "not found")),
        _ => Ok(HttpResponse::html(404, page(NOT_FOUND_HTML))),
    };
    result.unwrap_or_else(|resp| resp)
}

// ---------------------------------------------------------------------------
// Server
// ---------------------------------------------------------------------------

struct Request {
    method: String,
    path: String,
    query: HashMap<String, String>,
}

async fn read_request(stream: &mut TcpStream) -> std::io::Result<Option<Request>> {
    let mut buf = Vec::with_capacity(4096);
    let mut chunk = [0u8; 4096];
    loop {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Ok(None);
        }
        buf.extend_from_slice(&chunk[..n]);

        let mut headers = [httparse::EMPTY_HEADER; 64];
        let mut req = httparse::Request::new(&mut headers);
        match req.parse(&buf) {
            Ok(httparse::Status::Complete(_)) => {
                let method = req.method.unwrap_or("GET").to_string();
                let target = req.path.unwrap_or("/");
                let (path, query) = target.split_once('?').unwrap_or((target, ""));
                return Ok(Some(Request {
                    method,
                    path: path.to_string(),
                    query: parse_query(query),
                }));
            }
            Ok(httparse::Status::Partial) if buf.len() < MAX_REQUEST_BYTES => continue,
            Ok(httparse::Status::Partial) => {
                return Err(std::io::Error::new(std::io::ErrorKind::InvalidData, "request too large"));
            }
            Err(e) => return Err(std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string())),
        }
    }
}

fn sse_data(json: &str) -> String {
    format!("data: {}\n\n", json)
}

fn error_event(e: &ScribeError) -> String {
    serde_json::json!({
        "type": "error",
        "data": { "kind": e.kind().to_string(), "message": e.to_string() }
    })
    .to_string()
}

/// `GET /api/optimize?content=..&mode=..&custom=..` as a server-sent event stream.
async fn stream_optimization(
    stream: &mut TcpStream,
    state: &AppState,
    query: &HashMap<String, String>,
) -> std::io::Result<()> {
    let headers = "HTTP/1.1 200 OK\r\nContent-Type: text/event-stream\r\nCache-Control: no-cache\r\nConnection: close\r\n\r\n";
    stream.write_all(headers.as_bytes()).await?;

    let content = query.get("content").cloned().unwrap_or_default();
    if let Err(e) = validate_content(&content) {
        stream.write_all(sse_data(&error_event(&e)).as_bytes()).await?;
        stream.write_all(b"data: [DONE]\n\n").await?;
        return Ok(());
    }

    let started = {
        let Ok(mut s) = state.session.lock() else {
            return Err(std::io::Error::other("session lock poisoned"));
        };
        let mode = query
            .get("mode")
            .and_then(|m| OptimizationMode::from_str_loose(m).ok())
            .unwrap_or(s.mode());
        s.set_mode(mode, query.get("custom").cloned());
        let custom = s.custom_for_request().map(str::to_string);
        (s.begin_optimization(&content), mode, custom)
    };
    let (generation, mode, custom) = started;

    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    let optimizer = state.optimizer.clone();
    let session = Arc::clone(&state.session);

    let task = tokio::spawn(async move {
        let progress_tx = tx.clone();
        let progress_session = Arc::clone(&session);
        let result = optimizer
            .optimize(&content, mode, custom.as_deref(), move |p: Progress| {
                if let Ok(mut s) = progress_session.lock() {
                    s.apply_progress(generation, &p);
                }
                if let Ok(json) = serde_json::to_string(&p) {
                    let _ = progress_tx.send(json);
                }
            })
            .await;
        if let Ok(mut s) = session.lock() {
            s.finish_optimization(generation, result.as_ref());
        }
        if let Err(e) = &result {
            let _ = tx.send(error_event(e));
        }
    });

    while let Some(json) = rx.recv().await {
        if stream.write_all(sse_data(&json).as_bytes()).await.is_err() {
            debug!(generation, "client went away mid-stream");
            break;
        }
    }
    let _ = task.await;
    let _ = stream.write_all(b"data: [DONE]\n\n").await;
    Ok(())
}

async fn handle_connection(mut stream: TcpStream, state: AppState) -> std::io::Result<()> {
    let Some(req) = read_request(&mut stream).await? else {
        return Ok(());
    };
    debug!(method = %req.method, path = %req.path, "request");

    if req.method == "GET" && req.path == "/api/optimize" {
        return stream_optimization(&mut stream, &state, &req.query).await;
    }

    let response = route(&req.method, &req.path, &req.query, &state);
    stream.write_all(&response.to_bytes()).await?;
    Ok(())
}

fn open_browser(url: &str) {
    #[cfg(target_os = "windows")]
    {
        let _ = std::process::Command::new("cmd").args(["/C", &format!("start {}", url)]).spawn();
    }
    #[cfg(target_os = "macos")]
    {
        let _ = std::process::Command::new("open").arg(url).spawn();
    }
    #[cfg(target_os = "linux")]
    {
        let _ = std::process::Command::new("xdg-open").arg(url).spawn();
    }
}

/// Start the web UI server and, unless told not to, open the browser.
pub async fn serve(port: u16, state: AppState, open: bool) -> std::io::Result<()> {
    let listener = TcpListener::bind(("127.0.0.1", port)).await?;
    let url = format!("http://localhost:{}", listener.local_addr()?.port());

    eprintln!("{}", format!("  Editor running at {}", url).bright_green());
    eprintln!("{}", "  Press Ctrl+C to stop.".bright_blue());
    if open {
        open_browser(&url);
    }

    loop {
        let (stream, addr) = listener.accept().await?;
        let state = state.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, state).await {
                error!(%addr, error = %e, "connection error");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ApiConfig;
    use crate::store::MemoryStore;

    fn state() -> AppState {
        AppState::new(
            SessionState::load(Box::new(MemoryStore::default())),
            Optimizer::new(ApiConfig::default()),
        )
    }

    fn q(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    fn seed_history(state: &AppState) -> String {
        let mut s = state.session.lock().unwrap();
        s.set_original("the original draft");
        s.set_optimized("the better draft");
        s.save_to_history().unwrap().unwrap().id
    }

    // -- url_decode / parse_query --

    #[test]
    fn test_url_decode_basic() {
        assert_eq!(url_decode("hello+world"), "hello world");
        assert_eq!(url_decode("hello%20world"), "hello world");
        assert_eq!(url_decode("a%26b"), "a&b");
        assert_eq!(url_decode("plain"), "plain");
        assert_eq!(url_decode(""), "");
    }

    #[test]
    fn test_url_decode_multibyte() {
        assert_eq!(url_decode("%E4%B8%96%E7%95%8C"), "世界");
        assert_eq!(url_decode("caf%C3%A9"), "café");
    }

    #[test]
    fn test_url_decode_malformed_percent_kept() {
        assert_eq!(url_decode("100%"), "100%");
        assert_eq!(url_decode("%zz"), "%zz");
        assert_eq!(url_decode("%4"), "%4");
    }

    #[test]
    fn test_parse_query() {
        let p = parse_query("content=Hello+there&mode=simplify&custom=");
        assert_eq!(p.get("content").map(String::as_str), Some("Hello there"));
        assert_eq!(p.get("mode").map(String::as_str), Some("simplify"));
        assert_eq!(p.get("custom").map(String::as_str), Some(""));
        assert!(parse_query("").is_empty());
    }

    // -- pages --

    #[test]
    fn test_pages_render_with_style() {
        let s = state();
        let editor = route("GET", "/", &q(&[]), &s);
        assert_eq!(editor.status, 200);
        assert!(editor.body.contains("<textarea"));
        assert!(!editor.body.contains("__STYLE__"));
        let history = route("GET", "/history", &q(&[]), &s);
        assert!(history.body.contains("Clear All"));
    }

    #[test]
    fn test_unknown_page_is_not_found() {
        let r = route("GET", "/nope", &q(&[]), &state());
        assert_eq!(r.status, 404);
        assert!(r.body.contains("Page not found"));
        let api = route("GET", "/api/nope", &q(&[]), &state());
        assert_eq!(api.status, 404);
        assert_eq!(api.content_type, "application/json");
    }

    #[test]
    fn test_wrong_method() {
        assert_eq!(route("GET", "/api/accept", &q(&[]), &state()).status, 405);
        assert_eq!(route("DELETE", "/", &q(&[]), &state()).status, 405);
    }

    // -- api --

    #[test]
    fn test_modes_endpoint_lists_all() {
        let r = route("GET", "/api/modes", &q(&[]), &state());
        let v: serde_json::Value = serde_json::from_str(&r.body).unwrap();
        assert_eq!(v.as_array().unwrap().len(), 6);
        assert_eq!(v[1]["name"], "simplify");
    }

    #[test]
    fn test_set_mode_endpoint() {
        let s = state();
        let r = route("POST", "/api/mode", &q(&[("mode", "custom"), ("custom", "Shorter")]), &s);
        assert_eq!(r.status, 200);
        let v: serde_json::Value = serde_json::from_str(&r.body).unwrap();
        assert_eq!(v["mode"], "custom");
        assert_eq!(v["custom_prompt"], "Shorter");
        assert_eq!(route("POST", "/api/mode", &q(&[("mode", "loud")]), &s).status, 400);
        assert_eq!(route("POST", "/api/mode", &q(&[]), &s).status, 400);
    }

    #[test]
    fn test_accept_endpoint() {
        let s = state();
        {
            let mut sess = s.session.lock().unwrap();
            sess.set_original("first version");
            sess.set_optimized("second version");
        }
        let r = route("POST", "/api/accept", &q(&[]), &s);
        let v: serde_json::Value = serde_json::from_str(&r.body).unwrap();
        assert_eq!(v["entry"]["optimized"], "second version");
        let sess = s.session.lock().unwrap();
        assert_eq!(sess.original(), "second version");
        assert_eq!(sess.optimized(), "");
    }

    #[test]
    fn test_accept_with_nothing_returns_null_entry() {
        let r = route("POST", "/api/accept", &q(&[]), &state());
        assert_eq!(r.status, 200);
        let v: serde_json::Value = serde_json::from_str(&r.body).unwrap();
        assert!(v["entry"].is_null());
    }

    #[test]
    fn test_history_endpoints() {
        let s = state();
        let id = seed_history(&s);

        let list = route("GET", "/api/history", &q(&[]), &s);
        let v: serde_json::Value = serde_json::from_str(&list.body).unwrap();
        assert_eq!(v[0]["id"], id.as_str());
        assert_eq!(v[0]["type"], "improve");

        let load = route("POST", "/api/history/load", &q(&[("id", &id)]), &s);
        assert_eq!(load.status, 200);
        assert_eq!(route("POST", "/api/history/load", &q(&[("id", "x")]), &s).status, 404);

        assert_eq!(route("POST", "/api/history/delete", &q(&[]), &s).status, 400);
        assert_eq!(route("POST", "/api/history/delete", &q(&[("id", &id)]), &s).status, 200);
        assert_eq!(route("POST", "/api/history/delete", &q(&[("id", &id)]), &s).status, 404);

        seed_history(&s);
        let clear = route("POST", "/api/history/clear", &q(&[]), &s);
        assert!(clear.body.contains("\"deleted\":1"));
    }

    #[test]
    fn test_response_bytes_have_length() {
        let r = HttpResponse::error_message(400, "bad");
        let raw = String::from_utf8(r.to_bytes()).unwrap();
        assert!(raw.starts_with("HTTP/1.1 400 Bad Request\r\n"));
        assert!(raw.contains(&format!("Content-Length: {}", r.body.len())));
    }

    #[test]
    fn test_error_event_shape() {
        let v: serde_json::Value =
            serde_json::from_str(&error_event(&ScribeError::ContentTooShort { len: 2 })).unwrap();
        assert_eq!(v["type"], "error");
        assert_eq!(v["data"]["kind"], "validation");
    }

    #[tokio::test]
    async fn test_server_answers_over_tcp() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let s = state();
        tokio::spawn(async move {
            let (conn, _) = listener.accept().await.unwrap();
            handle_connection(conn, s).await.unwrap();
        });

        let mut client = TcpStream::connect(addr).await.unwrap();
        client.write_all(b"GET /api/modes HTTP/1.1\r\nHost: x\r\n\r\n").await.unwrap();
        let mut resp = String::new();
        client.read_to_string(&mut resp).await.unwrap();
        assert!(resp.starts_with("HTTP/1.1 200 OK"));
        assert!(resp.contains("\"professional\""));
    }

    #[tokio::test]
    async fn test_optimize_stream_rejects_short_content() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let s = state();
        let check = s.clone();
        tokio::spawn(async move {
            let (conn, _) = listener.accept().await.unwrap();
            handle_connection(conn, s).await.unwrap();
        });

        let mut client = TcpStream::connect(addr).await.unwrap();
        client
            .write_all(b"GET /api/optimize?content=short HTTP/1.1\r\nHost: x\r\n\r\n")
            .await
            .unwrap();
        let mut resp = String::new();
        client.read_to_string(&mut resp).await.unwrap();
        assert!(resp.contains("text/event-stream"));
        assert!(resp.contains("\"validation\""));
        assert!(resp.trim_end().ends_with("data: [DONE]"));
        assert_eq!(check.session.lock().unwrap().generation(), 0);
    }

    #[test]
    fn test_accept_endpoint_refuses_mid_run() {
        let s = state();
        let g = {
            let mut sess = s.session.lock().unwrap();
            let g = sess.begin_optimization("the original draft");
            sess.apply_progress(g, &Progress::Text("Half".to_string()));
            g
        };
        let r = route("POST", "/api/accept", &q(&[]), &s);
        let v: serde_json::Value = serde_json::from_str(&r.body).unwrap();
        assert!(v["entry"].is_null());
        let sess = s.session.lock().unwrap();
        assert_eq!(sess.generation(), g);
        assert_eq!(sess.original(), "the original draft");
        assert!(sess.history().is_empty());
    }

    /// Minimal chat-completion endpoint: JSON for plain requests, SSE for
    /// `"stream": true`.
    async fn spawn_chat_endpoint() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/v1/chat/completions", listener.local_addr().unwrap());
        tokio::spawn(async move {
            loop {
                let Ok((mut conn, _)) = listener.accept().await else { break };
                tokio::spawn(async move {
                    let mut buf = Vec::new();
                    let mut chunk = [0u8; 4096];
                    let body_start = loop {
                        let n = conn.read(&mut chunk).await.unwrap();
                        if n == 0 {
                            return;
                        }
                        buf.extend_from_slice(&chunk[..n]);
                        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                            break pos + 4;
                        }
                    };
                    let head = String::from_utf8_lossy(&buf[..body_start]).to_lowercase();
                    let len: usize = head
                        .lines()
                        .find_map(|l| l.strip_prefix("content-length:"))
                        .and_then(|v| v.trim().parse().ok())
                        .unwrap_or(0);
                    while buf.len() < body_start + len {
                        let n = conn.read(&mut chunk).await.unwrap();
                        if n == 0 {
                            break;
                        }
                        buf.extend_from_slice(&chunk[..n]);
                    }
                    let req: serde_json::Value = serde_json::from_slice(&buf[body_start..]).unwrap();

                    let resp = if req["stream"] == true {
                        let mut body = String::new();
                        for piece in ["Short ", "and ", "clear."] {
                            let line = serde_json::json!({"choices": [{"delta": {"content": piece}}]});
                            body.push_str(&format!("data: {}\n\n", line));
                        }
                        body.push_str("data: [DONE]\n\n");
                        format!(
                            "HTTP/1.1 200 OK\r\nContent-Type: text/event-stream\r\nConnection: close\r\n\r\n{}",
                            body
                        )
                    } else {
                        let json = serde_json::json!({
                            "choices": [{"message": {"content": "Trim the filler."}}]
                        })
                        .to_string();
                        format!(
                            "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                            json.len(),
                            json
                        )
                    };
                    let _ = conn.write_all(resp.as_bytes()).await;
                    let _ = conn.shutdown().await;
                });
            }
        });
        url
    }

    #[tokio::test]
    async fn test_optimize_stream_event_order_and_final_state() {
        let api_url = spawn_chat_endpoint().await;
        let s = AppState::new(
            SessionState::load(Box::new(MemoryStore::default())),
            Optimizer::new(ApiConfig { url: api_url, api_key: Some("sk-test".to_string()), ..ApiConfig::default() }),
        );
        let check = s.clone();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (conn, _) = listener.accept().await.unwrap();
            handle_connection(conn, s).await.unwrap();
        });

        let mut client = TcpStream::connect(addr).await.unwrap();
        client
            .write_all(
                b"GET /api/optimize?content=We+are+going+to+utilize+the+methodology&mode=simplify HTTP/1.1\r\nHost: x\r\n\r\n",
            )
            .await
            .unwrap();
        let mut resp = String::new();
        client.read_to_string(&mut resp).await.unwrap();
        assert!(resp.contains("Connection: close"));

        let events: Vec<&str> = resp.lines().filter_map(|l| l.strip_prefix("data: ")).collect();
        assert_eq!(events.last(), Some(&"[DONE]"));
        let kinds: Vec<String> = events[..events.len() - 1]
            .iter()
            .map(|e| serde_json::from_str::<serde_json::Value>(e).unwrap()["type"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(kinds.first().map(String::as_str), Some("reasoning"));
        assert_eq!(kinds.last().map(String::as_str), Some("complete"));
        assert!(kinds[1..kinds.len() - 1].iter().all(|k| k == "text"));
        assert!(kinds.len() >= 3);

        let sess = check.session.lock().unwrap();
        assert_eq!(sess.generation(), 1);
        assert!(!sess.is_processing());
        assert!(!sess.is_streaming());
        assert_eq!(sess.mode(), OptimizationMode::Simplify);
        assert_eq!(sess.original(), "We are going to utilize the methodology");
        assert_eq!(sess.optimized(), "Short and clear.");
        assert_eq!(sess.modifications()[0].reasoning.as_deref(), Some("Trim the filler."));
    }
}

use std::net::SocketAddr;

use anyhow::{Context, Result};
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{Html, IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use serde_json::Value as JsonValue;
use tower_http::cors::CorsLayer;

use crate::{
    monitor::{Monitor, SaveError},
    normalizer::Metal,
    store::StorageResult,
    utils::now_ts,
};

#[derive(Clone)]
pub struct DashboardState {
    pub monitor: Monitor,
}

pub fn router(monitor: Monitor) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/api/snapshot", get(api_snapshot))
        .route("/api/refresh", post(api_refresh))
        .route("/api/save", post(api_save))
        .route("/api/history", get(api_history))
        .route("/api/predict", get(api_predict))
        .route("/api/reference", get(api_reference).post(api_set_reference))
        .layer(CorsLayer::permissive())
        .with_state(DashboardState { monitor })
}

pub async fn serve_dashboard(monitor: Monitor) -> Result<()> {
    let settings = monitor.settings().clone();
    let addr: SocketAddr = format!("{}:{}", settings.dashboard_host, settings.dashboard_port)
        .parse()
        .with_context(|| {
            format!(
                "dashboard addr {}:{}",
                settings.dashboard_host, settings.dashboard_port
            )
        })?;

    log::info!("dashboard.start url=http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router(monitor)).await?;
    Ok(())
}

async fn index(State(st): State<DashboardState>) -> impl IntoResponse {
    let s = st.monitor.settings();
    Html(render_index_html(&s.dashboard_host, s.dashboard_port, &s.domestic_ccy))
}

fn storage_error(e: impl std::fmt::Display) -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(serde_json::json!({"ok": false, "error": e.to_string()})),
    )
        .into_response()
}

fn snapshot_body(monitor: &Monitor) -> StorageResult<JsonValue> {
    let predictions = Metal::ALL
        .iter()
        .map(|m| monitor.predict(*m))
        .collect::<StorageResult<Vec<_>>>()?;
    Ok(serde_json::json!({
        "ts": now_ts(),
        "snapshot": &*monitor.snapshot(),
        "comparisons": monitor.comparisons(),
        "references": monitor.references(),
        "predictions": predictions,
    }))
}

fn snapshot_response(monitor: &Monitor) -> Response {
    match snapshot_body(monitor) {
        Ok(body) => Json(body).into_response(),
        Err(e) => {
            log::error!("dashboard.snapshot.error {}", e);
            storage_error(e)
        }
    }
}

async fn api_snapshot(State(st): State<DashboardState>) -> impl IntoResponse {
    snapshot_response(&st.monitor)
}

async fn api_refresh(State(st): State<DashboardState>) -> impl IntoResponse {
    st.monitor.refresh().await;
    snapshot_response(&st.monitor)
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ReferenceBody {
    gold_ref: Option<f64>,
    plat_ref: Option<f64>,
}

async fn api_save(
    State(st): State<DashboardState>,
    Json(b): Json<ReferenceBody>,
) -> impl IntoResponse {
    match st.monitor.save(b.gold_ref, b.plat_ref) {
        Ok(entry) => Json(serde_json::json!({"ok": true, "entry": entry})).into_response(),
        Err(SaveError::NoLivePrice(metal)) => (
            StatusCode::CONFLICT,
            Json(serde_json::json!({
                "ok": false,
                "error": format!("no live {metal} price, nothing recorded"),
                "metal": metal,
            })),
        )
            .into_response(),
        Err(SaveError::Storage(e)) => {
            log::error!("dashboard.save.error {}", e);
            storage_error(e)
        }
    }
}

async fn api_history(State(st): State<DashboardState>) -> impl IntoResponse {
    match st.monitor.history() {
        Ok(rows) => Json(rows).into_response(),
        Err(e) => storage_error(e),
    }
}

#[derive(Deserialize)]
struct PredictQ {
    metal: Option<String>,
}

async fn api_predict(
    State(st): State<DashboardState>,
    Query(q): Query<PredictQ>,
) -> impl IntoResponse {
    let metal = match q.metal.as_deref().unwrap_or("gold").parse::<Metal>() {
        Ok(m) => m,
        Err(e) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(serde_json::json!({"ok": false, "error": e})),
            )
                .into_response()
        }
    };
    match st.monitor.predict(metal) {
        Ok(p) => Json(p).into_response(),
        Err(e) => storage_error(e),
    }
}

async fn api_reference(State(st): State<DashboardState>) -> impl IntoResponse {
    Json(st.monitor.references())
}

async fn api_set_reference(
    State(st): State<DashboardState>,
    Json(b): Json<ReferenceBody>,
) -> impl IntoResponse {
    Json(st.monitor.set_references(b.gold_ref, b.plat_ref))
}

/// Inputs are inlined unescaped: the page is only served once `host` has bound
/// as an IP address, and `ccy` is validated as a 3-letter code at startup.
fn render_index_html(host: &str, port: u16, ccy: &str) -> String {
    // Single-file UI, no build step.
    format!(
        r#"<!doctype html>
<html lang="en">
  <head>
    <meta charset="utf-8" />
    <meta name="viewport" content="width=device-width, initial-scale=1" />
    <title>bullionwatch • Gold/Platinum spread monitor</title>
    <style>
      :root {{
        --bg: #0b1220;
        --panel: rgba(255,255,255,0.06);
        --stroke: rgba(255,255,255,0.12);
        --text: rgba(255,255,255,0.92);
        --muted: rgba(255,255,255,0.65);
        --good: #33d17a;
        --bad: #ff4d4d;
        --warn: #ffcc00;
      }}
      * {{ box-sizing: border-box; }}
      body {{
        margin: 0;
        font-family: ui-sans-serif, system-ui, -apple-system, Segoe UI, Roboto, Helvetica, Arial;
        color: var(--text);
        background: var(--bg);
      }}
      .wrap {{ max-width: 1180px; margin: 0 auto; padding: 22px 18px 42px; }}
      .topbar {{
        display: flex; align-items: center; justify-content: space-between; gap: 12px;
        padding: 14px 16px; border: 1px solid var(--stroke); border-radius: 16px;
      }}
      .title {{ font-weight: 800; }}
      .subtitle {{ color: var(--muted); font-size: 12px; margin-top: 2px; }}
      .grid {{ display: grid; gap: 14px; margin-top: 14px; grid-template-columns: repeat(2, 1fr); }}
      .card {{ border: 1px solid var(--stroke); border-radius: 16px; background: var(--panel); padding: 12px 14px; }}
      .card h3 {{ margin: 0 0 10px; font-size: 15px; }}
      .wide {{ grid-column: span 2; }}
      .row {{ display: flex; gap: 10px; align-items: center; flex-wrap: wrap; }}
      input {{ width: 120px; padding: 7px 8px; border-radius: 10px; border: 1px solid var(--stroke); background: rgba(255,255,255,0.05); color: var(--text); }}
      .btn {{
        cursor: pointer; padding: 8px 10px; border-radius: 10px; border: 1px solid var(--stroke);
        background: rgba(255,255,255,0.05); color: var(--text); font-weight: 700; font-size: 12px;
      }}
      table {{ width: 100%; border-collapse: collapse; }}
      th, td {{ padding: 8px 10px; border-bottom: 1px solid rgba(255,255,255,0.07); text-align: right; }}
      th:first-child, td:first-child {{ text-align: left; }}
      th {{ color: var(--muted); font-size: 12px; }}
      .good {{ color: var(--good); }}
      .bad {{ color: var(--bad); }}
      .warn {{ color: var(--warn); }}
      .mono {{ font-family: ui-monospace, SFMono-Regular, Menlo, Consolas, monospace; }}
      .small {{ font-size: 12px; color: var(--muted); }}
      #issues {{ white-space: pre-line; }}
    </style>
  </head>
  <body>
    <div class="wrap">
      <div class="topbar">
        <div>
          <div class="title">Gold / Platinum spread monitor</div>
          <div class="subtitle">Local: <span class="mono">{host}:{port}</span></div>
        </div>
        <div class="row">
          <span class="small" id="fxText">FX --</span>
          <button class="btn" id="refreshBtn">Refresh</button>
        </div>
      </div>

      <div class="grid">
        <div class="card wide">
          <h3>Domestic reference ({ccy}/g)</h3>
          <div class="row">
            <label>Gold <input id="goldRef" type="number" step="10" /></label>
            <label>Platinum <input id="platRef" type="number" step="10" /></label>
            <button class="btn" id="saveBtn">Save &amp; record</button>
            <span class="small" id="saveMsg"></span>
          </div>
        </div>

        <div class="card wide">
          <h3>Comparison</h3>
          <table>
            <thead><tr><th>Market</th><th>Metal</th><th>Quote</th><th>{ccy}/g</th><th>Reference</th><th>Spread</th></tr></thead>
            <tbody id="cmpRows"></tbody>
          </table>
        </div>

        <div class="card">
          <h3>Prediction (live + last recorded spread)</h3>
          <table><tbody id="predRows"></tbody></table>
        </div>

        <div class="card">
          <h3>Unavailable this cycle</h3>
          <div class="small mono" id="issues">--</div>
        </div>

        <div class="card wide">
          <h3>History</h3>
          <table>
            <thead><tr><th>Date</th><th>Time</th><th>FX</th><th>Gold ref</th><th>Gold spread</th><th>Plat ref</th><th>Plat spread</th></tr></thead>
            <tbody id="histRows"></tbody>
          </table>
        </div>
      </div>
    </div>

    <script>
      const fmt = (x, d = 0) => (x && x !== 0) ? Number(x).toLocaleString(undefined, {{ maximumFractionDigits: d, minimumFractionDigits: d }}) : "--";
      const signed = (x) => (x > 0 ? "+" : "") + Number(x).toLocaleString(undefined, {{ maximumFractionDigits: 0 }});

      async function getJson(url, opts) {{
        const r = await fetch(url, opts);
        if (!r.ok) throw new Error(`${{url}}: ${{r.status}} ${{await r.text()}}`);
        return r.json();
      }}

      function render(body) {{
        const s = body.snapshot || {{}};
        document.getElementById("fxText").textContent = s.fx_rate ? `USD ${{fmt(s.fx_rate, 2)}} • CNY ${{fmt(s.cny_rate, 2)}}` : "FX unavailable";
        const refs = body.references || {{}};
        const g = document.getElementById("goldRef"), p = document.getElementById("platRef");
        if (document.activeElement !== g) g.value = refs.gold ?? "";
        if (document.activeElement !== p) p.value = refs.platinum ?? "";

        const tb = document.getElementById("cmpRows");
        tb.innerHTML = "";
        for (const c of body.comparisons || []) {{
          const unit = c.market === "us" ? "$/oz" : "CNY/g";
          let spread = '<span class="warn">unavailable</span>';
          if (c.spread) {{
            const cls = c.spread.side === "premium" ? "bad" : "good";
            const lbl = c.spread.side === "premium" ? "premium" : "discount";
            spread = `<span class="${{cls}}">${{signed(c.spread.value)}} (${{lbl}})</span>`;
          }}
          const tr = document.createElement("tr");
          tr.innerHTML = `<td>${{c.market.toUpperCase()}}</td><td>${{c.metal}}</td><td>${{fmt(c.raw_quote, 2)}} ${{unit}}</td><td>${{fmt(c.price_per_gram)}}</td><td>${{fmt(c.reference)}}</td><td>${{spread}}</td>`;
          tb.appendChild(tr);
        }}

        const pr = document.getElementById("predRows");
        pr.innerHTML = "";
        for (const x of body.predictions || []) {{
          const tr = document.createElement("tr");
          tr.innerHTML = `<td>${{x.metal}}</td><td>${{fmt(x.live_price)}}</td><td>${{signed(x.latest_spread)}}</td><td><b>${{fmt(x.predicted)}}</b></td>`;
          pr.appendChild(tr);
        }}

        const issues = Object.entries(s.issues || {{}}).filter(([, v]) => v !== "source disabled");
        document.getElementById("issues").textContent = issues.length ? issues.map(([k, v]) => `${{k}}: ${{v}}`).join("\n") : "none";
      }}

      async function loadHistory() {{
        const rows = await getJson("/api/history");
        const tb = document.getElementById("histRows");
        tb.innerHTML = "";
        for (const r of rows) {{
          const tr = document.createElement("tr");
          const cls = (v) => v > 0 ? "bad" : "good";
          tr.innerHTML = `<td>${{r.date}}</td><td>${{r.time}}</td><td>${{r.fx_rate}}</td><td>${{fmt(r.ose_gold_ref)}}</td><td class="${{cls(r.gold_spread)}}">${{signed(r.gold_spread)}}</td><td>${{fmt(r.ose_plat_ref)}}</td><td class="${{cls(r.plat_spread)}}">${{signed(r.plat_spread)}}</td>`;
          tb.appendChild(tr);
        }}
      }}

      async function refresh(force) {{
        try {{
          render(await getJson(force ? "/api/refresh" : "/api/snapshot", {{ method: force ? "POST" : "GET" }}));
          await loadHistory();
        }} catch (e) {{
          document.getElementById("saveMsg").textContent = String(e.message || e);
        }}
      }}

      document.getElementById("refreshBtn").addEventListener("click", () => refresh(true));
      document.getElementById("saveBtn").addEventListener("click", async () => {{
        const msg = document.getElementById("saveMsg");
        try {{
          // Empty or non-numeric inputs keep the current reference.
          const num = (id) => {{
            const v = document.getElementById(id).value.trim();
            const n = Number(v);
            return v === "" || !Number.isFinite(n) ? null : n;
          }};
          const body = {{ gold_ref: num("goldRef"), plat_ref: num("platRef") }};
          const r = await getJson("/api/save", {{ method: "POST", headers: {{ "content-type": "application/json" }}, body: JSON.stringify(body) }});
          msg.textContent = `saved ${{r.entry.date}} ${{r.entry.time}}`;
          await refresh(false);
        }} catch (e) {{
          msg.textContent = String(e.message || e);
        }}
      }});
      refresh(false);
      setInterval(() => refresh(false), 5000);
    </script>
  </body>
</html>"#,
        host = host,
        port = port,
        ccy = ccy,
    )
}

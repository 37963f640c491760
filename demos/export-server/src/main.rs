//! Export relay server.
//!
//! Run with: cargo run -p export-server
//!
//! Then open http://localhost:3000 in your browser. Set
//! `EXPORT_RELAY_CONFIG` to a JSON file to change the bind address,
//! the worker mode or the export command.

mod config;

use std::sync::Arc;

use anyhow::Context;
use axum::{response::Html, routing::get};
use export_relay_transport::{RelayState, create_router};
use export_relay_worker::LocalWorker;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::{ServerConfig, WorkerMode};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let config = ServerConfig::load()?;

    let state = match config.worker {
        WorkerMode::Local => {
            tracing::info!(command = %config.local_worker.command, "Running exports locally");
            RelayState::with_worker(
                config.coordinator.clone(),
                Arc::new(LocalWorker::new(config.local_worker.clone())),
            )
        }
        WorkerMode::Agents => {
            tracing::info!("Running exports on connected agents");
            RelayState::with_agents(config.coordinator.clone())
        }
    };

    let app = create_router(state).route("/", get(index_handler));

    let listener = tokio::net::TcpListener::bind(&config.bind)
        .await
        .with_context(|| format!("Failed to bind {}", config.bind))?;
    tracing::info!("Server listening on http://{}", listener.local_addr()?);

    axum::serve(listener, app).await?;
    Ok(())
}

async fn index_handler() -> Html<&'static str> {
    Html(INDEX_HTML)
}

const INDEX_HTML: &str = r#"<!DOCTYPE html>
<html>
<head>
    <title>Export Relay</title>
    <style>
        body {
            margin: 0;
            padding: 20px;
            background: #1e1e1e;
            color: #d4d4d4;
            font-family: system-ui, sans-serif;
        }
        h1 { color: #fff; margin-bottom: 10px; }
        input, button { font-size: 14px; padding: 6px 10px; }
        .status { color: #888; font-size: 14px; margin-bottom: 10px; }
        .connected { color: #4a4; }
        .disconnected { color: #a44; }
        #log { font-family: Menlo, Monaco, "Courier New", monospace; white-space: pre-wrap; }
        .succeeded { color: #4a4; }
        .failed { color: #a44; }
        .running { color: #aa4; }
    </style>
</head>
<body>
    <h1>Export Relay</h1>
    <div class="status" id="status">Connecting...</div>
    <input id="target" placeholder="Target ID" />
    <button id="export">Export Logs</button>
    <button id="query">Status</button>
    <div id="log"></div>

    <script>
        const status = document.getElementById('status');
        const log = document.getElementById('log');
        const targetInput = document.getElementById('target');
        let ws;

        function append(text, cls) {
            const line = document.createElement('div');
            line.textContent = `${new Date().toLocaleTimeString()}  ${text}`;
            if (cls) line.className = cls;
            log.prepend(line);
        }

        function connect() {
            const protocol = window.location.protocol === 'https:' ? 'wss:' : 'ws:';
            ws = new WebSocket(`${protocol}//${window.location.host}/ws`);

            ws.onopen = () => {
                status.textContent = 'Connected';
                status.className = 'status connected';
            };

            ws.onclose = () => {
                status.textContent = 'Disconnected - reconnecting...';
                status.className = 'status disconnected';
                setTimeout(connect, 2000);
            };

            ws.onmessage = (event) => {
                const msg = JSON.parse(event.data);
                switch (msg.type) {
                    case 'export_result':
                        append(`${msg.target}: ${msg.message}`, msg.status);
                        break;
                    case 'status':
                        append(`${msg.target}: ${msg.status ? msg.status.state : 'never exported'}`);
                        break;
                    case 'error':
                        append(`Error: ${msg.message}`, 'failed');
                        break;
                }
            };
        }

        function send(type) {
            const target = targetInput.value.trim();
            if (!target) {
                append('Target ID is required', 'failed');
                return;
            }
            ws.send(JSON.stringify({ type, target }));
        }

        document.getElementById('export').onclick = () => send('trigger_export');
        document.getElementById('query').onclick = () => send('query_status');

        setInterval(() => {
            if (ws && ws.readyState === WebSocket.OPEN) {
                ws.send(JSON.stringify({ type: 'ping' }));
            }
        }, 30000);

        connect();
    </script>
</body>
</html>
"#;

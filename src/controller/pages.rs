//! Embedded pages. Both are static and drive the JSON API from the browser.

pub const WIZARD_HTML: &str = r#"<!DOCTYPE html>
<html>
<head>
    <meta charset="utf-8">
    <title>Bloom - Configuration</title>
    <style>
        body { font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', sans-serif; background: #f4f6f8; margin: 0; }
        main { max-width: 760px; margin: 40px auto; background: #fff; padding: 32px; border-radius: 8px; box-shadow: 0 2px 8px rgba(0,0,0,.08); }
        h1 { margin-top: 0; }
        label { display: block; margin-top: 16px; font-weight: 600; }
        input[type=text], textarea { width: 100%; padding: 8px; box-sizing: border-box; border: 1px solid #ccd; border-radius: 4px; }
        .row { display: flex; gap: 24px; margin-top: 16px; }
        .row label { margin-top: 0; font-weight: normal; }
        .actions { margin-top: 24px; display: flex; gap: 12px; }
        button { padding: 10px 18px; border: 0; border-radius: 4px; cursor: pointer; background: #2563eb; color: #fff; }
        button.secondary { background: #64748b; }
        #errors { color: #b91c1c; white-space: pre-line; margin-top: 16px; }
        #notice { color: #166534; margin-top: 16px; }
        #lastError { background: #fef2f2; border: 1px solid #fecaca; padding: 12px; border-radius: 4px; display: none; }
    </style>
</head>
<body>
<main>
    <h1>Bloom node configuration</h1>
    <div id="lastError"></div>
    <form id="config">
        <label>Domain <input type="text" name="DOMAIN" placeholder="cluster.example.com"></label>
        <div class="row">
            <label><input type="checkbox" name="FIRST_NODE" checked> First node</label>
            <label><input type="checkbox" name="CONTROL_PLANE"> Control plane</label>
            <label><input type="checkbox" name="GPU_NODE" checked> GPU node</label>
            <label><input type="checkbox" name="NO_DISKS_FOR_CLUSTER"> No disks for cluster</label>
        </div>
        <label>Server IP (joining nodes) <input type="text" name="SERVER_IP"></label>
        <label>Join token (joining nodes) <input type="text" name="JOIN_TOKEN"></label>
        <label>Cluster disks (comma separated) <input type="text" name="CLUSTER_DISKS"></label>
        <label>Disabled steps (comma separated) <input type="text" name="DISABLED_STEPS"></label>
        <label>Enabled steps (comma separated) <input type="text" name="ENABLED_STEPS"></label>
        <div class="actions">
            <button type="submit">Save and install</button>
            <button type="button" class="secondary" id="saveOnly">Save only</button>
        </div>
    </form>
    <div id="errors"></div>
    <div id="notice"></div>
</main>
<script>
const form = document.getElementById('config');

function collect() {
    const config = {};
    for (const el of form.elements) {
        if (!el.name) continue;
        if (el.type === 'checkbox') config[el.name] = el.checked;
        else if (el.value.trim() !== '') config[el.name] = el.value.trim();
    }
    return config;
}

function clientErrors(config) {
    const errors = [];
    if (!config.DOMAIN) errors.push('DOMAIN is required');
    if (!config.FIRST_NODE) {
        if (!config.SERVER_IP) errors.push('SERVER_IP is required when FIRST_NODE is false');
        if (!config.JOIN_TOKEN) errors.push('JOIN_TOKEN is required when FIRST_NODE is false');
    }
    if (config.DISABLED_STEPS && config.ENABLED_STEPS) {
        errors.push('invalid configuration: DISABLED_STEPS and ENABLED_STEPS cannot both be set');
    }
    return errors;
}

async function send(path, config) {
    document.getElementById('errors').textContent = '';
    document.getElementById('notice').textContent = '';
    const res = await fetch(path, {
        method: 'POST',
        headers: { 'Content-Type': 'application/json' },
        body: JSON.stringify(config),
    });
    const body = await res.json();
    if (!body.success) {
        const list = body.errors && body.errors.length ? body.errors : [body.error];
        document.getElementById('errors').textContent = list.join('\n');
        return false;
    }
    document.getElementById('notice').textContent = body.message;
    return true;
}

form.addEventListener('submit', async (e) => {
    e.preventDefault();
    const config = collect();
    const errors = clientErrors(config);
    if (errors.length) {
        document.getElementById('errors').textContent = errors.join('\n');
        await fetch('/api/validation-error', {
            method: 'POST',
            headers: { 'Content-Type': 'application/json' },
            body: JSON.stringify({ errors }),
        });
        return;
    }
    if (await send('/api/config', config)) {
        setTimeout(() => window.location.reload(), 500);
    }
});

document.getElementById('saveOnly').addEventListener('click', () => send('/api/config-only', collect()));

async function prefill() {
    const res = await fetch('/api/prefilled-config');
    const body = await res.json();
    if (!body.hasPrefilled) return;
    for (const [key, value] of Object.entries(body.config)) {
        const el = form.elements[key.toUpperCase()];
        if (!el) continue;
        if (el.type === 'checkbox') el.checked = value === true || value === 'true';
        else el.value = Array.isArray(value) ? value.join(',') : value;
    }
}

async function showLastError() {
    const res = await fetch('/api/error');
    const body = await res.json();
    if (!body.error) return;
    const box = document.getElementById('lastError');
    box.textContent = 'Previous run failed (' + body.errorType + '): ' + body.error;
    box.style.display = 'block';
}

prefill();
showLastError();
</script>
</body>
</html>
"#;

pub const DASHBOARD_HTML: &str = r#"<!DOCTYPE html>
<html>
<head>
    <meta charset="utf-8">
    <title>Bloom - Installation</title>
    <style>
        body { font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', sans-serif; background: #0f172a; color: #e2e8f0; margin: 0; }
        header { padding: 16px 24px; background: #1e293b; display: flex; justify-content: space-between; align-items: center; }
        .grid { display: grid; grid-template-columns: 360px 1fr; gap: 16px; padding: 16px 24px; }
        .panel { background: #1e293b; border-radius: 8px; padding: 16px; }
        .step { padding: 8px; border-left: 4px solid #475569; margin-bottom: 6px; }
        .step.running { border-color: #3b82f6; }
        .step.completed { border-color: #22c55e; }
        .step.failed { border-color: #ef4444; }
        .step.skipped { border-color: #a3a3a3; opacity: .7; }
        .step small { display: block; color: #94a3b8; }
        #logs { font-family: monospace; font-size: 12px; height: 70vh; overflow-y: auto; white-space: pre-wrap; }
        .log.error { color: #fca5a5; }
        .log.warn { color: #fcd34d; }
        .log.debug { color: #94a3b8; }
        #error { display: none; background: #7f1d1d; padding: 12px 24px; }
        button { padding: 8px 14px; border: 0; border-radius: 4px; background: #2563eb; color: #fff; cursor: pointer; }
    </style>
</head>
<body>
<header>
    <div><strong>Bloom</strong> <span id="status"></span></div>
    <button id="reconfigure" style="display:none">Reconfigure</button>
</header>
<div id="error"></div>
<div class="grid">
    <div class="panel"><h3>Steps</h3><div id="steps"></div><h3>Variables</h3><div id="variables"></div></div>
    <div class="panel"><h3>Logs</h3><div id="logs"></div></div>
</div>
<script>
async function getJson(path) {
    const res = await fetch(path);
    return res.json();
}

function renderSteps(steps) {
    const list = Object.values(steps).sort((a, b) => a.ordinal - b.ordinal);
    document.getElementById('steps').innerHTML = list.map(s => {
        const duration = s.duration_ms != null ? ' (' + (s.duration_ms / 1000).toFixed(1) + 's)' : '';
        const error = s.error ? '<small>' + s.error + '</small>' : '';
        return '<div class="step ' + s.status + '">' + s.ordinal + '. ' + s.name + duration +
            '<small>' + s.status + '</small>' + error + '</div>';
    }).join('');
}

function renderLogs(logs) {
    const el = document.getElementById('logs');
    const atBottom = el.scrollTop + el.clientHeight >= el.scrollHeight - 20;
    el.innerHTML = logs.map(l =>
        '<div class="log ' + l.level + '">' + l.timestamp.substring(11, 19) + ' [' + l.source + '] ' +
        l.message.replace(/</g, '&lt;') + '</div>').join('');
    if (atBottom) el.scrollTop = el.scrollHeight;
}

function renderVariables(vars) {
    document.getElementById('variables').innerHTML = Object.values(vars)
        .map(v => '<div>' + v.name + ': ' + v.value + '</div>').join('');
}

async function refresh() {
    try {
        const [phase, steps, logs, vars, err] = await Promise.all([
            getJson('/api/phase'), getJson('/api/steps'), getJson('/api/logs?limit=500'),
            getJson('/api/variables'), getJson('/api/error'),
        ]);
        if (phase.phase === 'collecting_config') { window.location.reload(); return; }
        document.getElementById('status').textContent = phase.phase.replace('_', ' ');
        document.getElementById('reconfigure').style.display =
            (phase.phase === 'failed' || phase.phase === 'completed') && !phase.oneShot ? 'inline-block' : 'none';
        const box = document.getElementById('error');
        if (err.error) {
            box.textContent = err.errorType + ' error: ' + err.error;
            box.style.display = 'block';
        } else {
            box.style.display = 'none';
        }
        renderSteps(steps);
        renderLogs(logs);
        renderVariables(vars);
    } catch (e) {
        document.getElementById('status').textContent = 'disconnected';
    }
}

document.getElementById('reconfigure').addEventListener('click', async () => {
    await fetch('/api/reconfigure', { method: 'POST' });
    window.location.reload();
});

refresh();
setInterval(refresh, 1000);
</script>
</body>
</html>
"#;

//! Sandboxed Lua 5.4 VM runtime for executing untrusted document content.
//!
//! Used by [`crate::connector_sandbox`]. Each run gets a fresh VM with the
//! dangerous standard libraries removed, `print` redirected into an
//! [`OutputBuffer`], and a small set of pure host APIs.
//!
//! # Host APIs
//!
//! | Module | Functions |
//! |--------|-----------|
//! | `json` | `parse`, `encode` |
//! | `log` | `info`, `warn`, `error`, `debug` |
//! | `base64` | `encode`, `decode` |
//! | `crypto` | `sha256`, `hmac_sha256` |
//!
//! # Sandboxing
//!
//! `os`, `io`, `debug`, `package`, `require`, `loadfile`, and `dofile` are
//! removed. There is no filesystem, network, or environment access.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use hmac::{Hmac, Mac};
use mlua::prelude::*;
use mlua::{DeserializeOptions, LuaSerdeExt, SerializeOptions};
use sha2::{Digest, Sha256};
use std::sync::{Arc, Mutex};

// ═══════════════════════════════════════════════════════════════════════
// Output capture
// ═══════════════════════════════════════════════════════════════════════

/// Captured `print` output, shared between the VM and the host.
///
/// Output past `max_bytes` is dropped and the buffer is marked truncated.
#[derive(Clone)]
pub(crate) struct OutputBuffer {
    inner: Arc<Mutex<CapturedOutput>>,
    max_bytes: usize,
}

#[derive(Default)]
struct CapturedOutput {
    text: String,
    truncated: bool,
}

impl OutputBuffer {
    pub(crate) fn new(max_bytes: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(CapturedOutput::default())),
            max_bytes,
        }
    }

    pub(crate) fn push_line(&self, line: &str) {
        let mut out = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if out.truncated {
            return;
        }
        if out.text.len() + line.len() + 1 > self.max_bytes {
            out.truncated = true;
            return;
        }
        out.text.push_str(line);
        out.text.push('\n');
    }

    /// Take the captured text and whether anything was dropped.
    pub(crate) fn take(&self) -> (String, bool) {
        let mut out = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        (std::mem::take(&mut out.text), out.truncated)
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Public helpers
// ═══════════════════════════════════════════════════════════════════════

/// Configure a fresh VM for running untrusted content.
///
/// # Arguments
///
/// * `lua`: the Lua VM instance to configure.
/// * `script_name`: logical name used in log fields (e.g. `"sandbox:report"`).
/// * `output`: buffer receiving everything the script prints.
pub(crate) fn register_all_host_apis(
    lua: &Lua,
    script_name: &str,
    output: &OutputBuffer,
) -> LuaResult<()> {
    sandbox_globals(lua)?;
    register_print(lua, output)?;
    register_json_api(lua)?;
    register_log_api(lua, script_name)?;
    register_base64_api(lua)?;
    register_crypto_api(lua)?;
    Ok(())
}

// ═══════════════════════════════════════════════════════════════════════
// Sandboxing
// ═══════════════════════════════════════════════════════════════════════

/// Remove dangerous standard library functions from the Lua globals.
pub(crate) fn sandbox_globals(lua: &Lua) -> LuaResult<()> {
    let globals = lua.globals();
    for name in ["os", "io", "loadfile", "dofile", "debug", "package", "require"] {
        globals.set(name, LuaValue::Nil)?;
    }
    Ok(())
}

// ═══════════════════════════════════════════════════════════════════════
// Host API: print
// ═══════════════════════════════════════════════════════════════════════

/// Replace `print` with a version that writes into `output`.
///
/// Arguments are converted with `tostring` and joined by tabs, matching
/// stock Lua.
fn register_print(lua: &Lua, output: &OutputBuffer) -> LuaResult<()> {
    let out = output.clone();
    let print = lua.create_function(move |lua, args: LuaMultiValue| {
        let tostring: LuaFunction = lua.globals().get("tostring")?;
        let mut parts = Vec::with_capacity(args.len());
        for value in args {
            parts.push(tostring.call::<String>(value)?);
        }
        out.push_line(&parts.join("\t"));
        Ok(())
    })?;
    lua.globals().set("print", print)?;
    Ok(())
}

// ═══════════════════════════════════════════════════════════════════════
// Host API: json
// ═══════════════════════════════════════════════════════════════════════

/// JSON `null` becomes `nil` so scripts can test fields with plain `if`.
fn from_json(lua: &Lua, value: &serde_json::Value) -> LuaResult<LuaValue> {
    let options = SerializeOptions::new()
        .serialize_none_to_null(false)
        .serialize_unit_to_null(false);
    lua.to_value_with(value, options)
}

/// Convert a script value to JSON. Functions, threads, and userdata
/// become `null` instead of failing the run.
pub(crate) fn to_json(lua: &Lua, value: LuaValue) -> LuaResult<serde_json::Value> {
    lua.from_value_with(value, DeserializeOptions::new().deny_unsupported_types(false))
}

fn host_error(api: &str, e: impl std::fmt::Display) -> mlua::Error {
    mlua::Error::RuntimeError(format!("{}: {}", api, e))
}

fn register_json_api(lua: &Lua) -> LuaResult<()> {
    let json = lua.create_table()?;
    json.set(
        "parse",
        lua.create_function(|lua, text: String| {
            let value: serde_json::Value =
                serde_json::from_str(&text).map_err(|e| host_error("json.parse", e))?;
            from_json(lua, &value)
        })?,
    )?;
    json.set(
        "encode",
        lua.create_function(|lua, value: LuaValue| Ok(to_json(lua, value)?.to_string()))?,
    )?;
    lua.globals().set("json", json)
}

// ═══════════════════════════════════════════════════════════════════════
// Host API: log
// ═══════════════════════════════════════════════════════════════════════

/// `log.debug/info/warn/error(msg)`, forwarded to `tracing` with the
/// script name attached.
fn register_log_api(lua: &Lua, script_name: &str) -> LuaResult<()> {
    let log = lua.create_table()?;
    for level in ["debug", "info", "warn", "error"] {
        let script = script_name.to_string();
        let emit = lua.create_function(move |_lua, msg: String| {
            match level {
                "debug" => tracing::debug!(target: "canvas_runtime::sandbox", %script, "{}", msg),
                "info" => tracing::info!(target: "canvas_runtime::sandbox", %script, "{}", msg),
                "warn" => tracing::warn!(target: "canvas_runtime::sandbox", %script, "{}", msg),
                _ => tracing::error!(target: "canvas_runtime::sandbox", %script, "{}", msg),
            }
            Ok(())
        })?;
        log.set(level, emit)?;
    }
    lua.globals().set("log", log)
}

// ═══════════════════════════════════════════════════════════════════════
// Host API: base64 and crypto
// ═══════════════════════════════════════════════════════════════════════

fn register_base64_api(lua: &Lua) -> LuaResult<()> {
    let b64 = lua.create_table()?;
    b64.set(
        "encode",
        lua.create_function(|_lua, data: LuaString| Ok(BASE64.encode(&data.as_bytes()[..])))?,
    )?;
    b64.set(
        "decode",
        lua.create_function(|lua, data: String| {
            let bytes = BASE64
                .decode(data.trim())
                .map_err(|e| host_error("base64.decode", e))?;
            lua.create_string(bytes)
        })?,
    )?;
    lua.globals().set("base64", b64)
}

fn register_crypto_api(lua: &Lua) -> LuaResult<()> {
    let crypto = lua.create_table()?;
    crypto.set(
        "sha256",
        lua.create_function(|_lua, data: LuaString| {
            Ok(hex::encode(Sha256::digest(&data.as_bytes()[..])))
        })?,
    )?;
    crypto.set(
        "hmac_sha256",
        lua.create_function(|_lua, (key, data): (LuaString, LuaString)| {
            let mut mac = Hmac::<Sha256>::new_from_slice(&key.as_bytes()[..])
                .map_err(|e| host_error("crypto.hmac_sha256", e))?;
            mac.update(&data.as_bytes()[..]);
            Ok(hex::encode(mac.finalize().into_bytes()))
        })?,
    )?;
    lua.globals().set("crypto", crypto)
}

//! Minimal language server used by end-to-end tests.
//!
//! Speaks framed JSON-RPC over stdio, `--socket=<port>` or `--pipe=<path>`,
//! answers `initialize` and `shutdown`, and exits on `exit`. Optional flags:
//!
//! - `--transcript=<path>` appends each received method to `path`.
//! - `--crash-after-ms=<ms>` (or `GPULSE_STUB_CRASH_AFTER_MS`) exits with
//!   status 3 once the delay elapses.

use std::env;
use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::PathBuf;
use std::time::Duration;

use gpulse_client::transport::{BoxedReader, BoxedWriter, FramedReader, FramedWriter};
use serde_json::{Value, json};
use tokio::net::TcpStream;

const CRASH_ENV: &str = "GPULSE_STUB_CRASH_AFTER_MS";
const CRASH_STATUS: u8 = 3;

enum Endpoint {
    Stdio,
    Socket(u16),
    Pipe(PathBuf),
}

struct Options {
    endpoint: Endpoint,
    transcript: Option<PathBuf>,
    crash_after: Option<Duration>,
}

impl Options {
    fn parse(args: impl IntoIterator<Item = String>) -> Result<Self, String> {
        let mut options = Self {
            endpoint: Endpoint::Stdio,
            transcript: None,
            crash_after: env::var(CRASH_ENV).ok().and_then(|ms| parse_millis(&ms)),
        };
        for arg in args {
            if let Some(port) = arg.strip_prefix("--socket=") {
                let port = port
                    .parse()
                    .map_err(|error| format!("invalid socket port '{port}': {error}"))?;
                options.endpoint = Endpoint::Socket(port);
            } else if let Some(path) = arg.strip_prefix("--pipe=") {
                options.endpoint = Endpoint::Pipe(PathBuf::from(path));
            } else if let Some(path) = arg.strip_prefix("--transcript=") {
                options.transcript = Some(PathBuf::from(path));
            } else if let Some(ms) = arg.strip_prefix("--crash-after-ms=") {
                options.crash_after = parse_millis(ms);
            }
        }
        Ok(options)
    }
}

fn parse_millis(value: &str) -> Option<Duration> {
    value.trim().parse().ok().map(Duration::from_millis)
}

async fn connect(endpoint: &Endpoint) -> io::Result<(BoxedReader, BoxedWriter)> {
    match endpoint {
        Endpoint::Stdio => Ok((Box::new(tokio::io::stdin()), Box::new(tokio::io::stdout()))),
        Endpoint::Socket(port) => {
            let (read, write) = TcpStream::connect(("127.0.0.1", *port)).await?.into_split();
            Ok((Box::new(read), Box::new(write)))
        }
        #[cfg(unix)]
        Endpoint::Pipe(path) => {
            let (read, write) = tokio::net::UnixStream::connect(path).await?.into_split();
            Ok((Box::new(read), Box::new(write)))
        }
        #[cfg(not(unix))]
        Endpoint::Pipe(_) => Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "pipes are only supported on unix",
        )),
    }
}

fn record(transcript: Option<&PathBuf>, method: &str) {
    let Some(path) = transcript else {
        return;
    };
    let written = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .and_then(|mut file| writeln!(file, "{method}"));
    if let Err(error) = written {
        writeln!(io::stderr(), "stub: failed to record {method}: {error}").ok();
    }
}

fn reply(id: &Value, method: &str) -> Value {
    let result = match method {
        "initialize" => json!({
            "capabilities": {"textDocumentSync": 1},
            "serverInfo": {"name": "gpulse-stub-server"}
        }),
        _ => Value::Null,
    };
    json!({"jsonrpc": "2.0", "id": id, "result": result})
}

async fn serve(options: &Options) -> Result<u8, String> {
    let (reader, writer) = connect(&options.endpoint)
        .await
        .map_err(|error| format!("failed to connect: {error}"))?;
    let mut reader = FramedReader::new(reader);
    let mut writer = FramedWriter::new(writer);
    let mut shutdown_requested = false;

    loop {
        let Some(payload) = reader.receive().await.map_err(|error| error.to_string())? else {
            return Ok(1);
        };
        let message: Value = serde_json::from_slice(&payload).map_err(|error| error.to_string())?;
        let Some(method) = message.get("method").and_then(Value::as_str) else {
            continue;
        };
        record(options.transcript.as_ref(), method);
        writeln!(io::stderr(), "stub: received {method}").ok();

        match message.get("id") {
            Some(id) if !id.is_null() => {
                shutdown_requested |= method == "shutdown";
                let response = reply(id, method);
                writer
                    .send(response.to_string().as_bytes())
                    .await
                    .map_err(|error| error.to_string())?;
            }
            _ if method == "exit" => return Ok(u8::from(!shutdown_requested)),
            _ if method == "initialized" => {
                let log = json!({
                    "jsonrpc": "2.0",
                    "method": "window/logMessage",
                    "params": {"type": 3, "message": "stub server ready"}
                });
                writer
                    .send(log.to_string().as_bytes())
                    .await
                    .map_err(|error| error.to_string())?;
            }
            _ => {}
        }
    }
}

// Exits explicitly: a pending blocking read of stdin would otherwise keep the
// runtime from shutting down.
#[tokio::main]
async fn main() {
    let code = match Options::parse(env::args().skip(1)) {
        Ok(options) => run(&options).await,
        Err(message) => {
            writeln!(io::stderr(), "stub: {message}").ok();
            2
        }
    };
    std::process::exit(i32::from(code));
}

async fn run(options: &Options) -> u8 {
    let crash = async {
        match options.crash_after {
            Some(delay) => tokio::time::sleep(delay).await,
            None => std::future::pending().await,
        }
    };

    tokio::select! {
        result = serve(options) => match result {
            Ok(code) => code,
            Err(message) => {
                writeln!(io::stderr(), "stub: {message}").ok();
                2
            }
        },
        () = crash => {
            writeln!(io::stderr(), "stub: crashing as requested").ok();
            CRASH_STATUS
        }
    }
}

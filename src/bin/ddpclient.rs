//! A command-line tool for communicating with a DDP server.
//!
//! Reads commands from stdin, one per line, and prints what the server sends back.
//! There is no prompt, so a file of commands can be piped in:
//!
//! ```sh
//! printf 'sub userList []\nmethod createUser ["Alice"]\n' \
//!     | cargo run --features cli --bin ddpclient -- ws://localhost:3000/websocket
//! ```

use std::fmt::Display;
use std::io::{self, Write as _};
use std::time::Duration;

use clap::Parser;
use ddp_client::ddp::{Client, Config, Event, Params};
use ddp_client::error::{Error, Kind};
use tokio::io::{AsyncBufReadExt as _, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing_subscriber::EnvFilter;

/// How long to keep printing events after end of input.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Parser)]
#[command(name = "ddpclient", version, about = "A command-line tool for communicating with a DDP server.")]
struct Args {
    /// DDP websocket endpoint to connect to, e.g. http://foo.meteor.com/sockjs/websocket
    ddp_endpoint: Option<String>,

    /// Print raw websocket data in addition to parsed results
    #[arg(long, alias = "print_raw", env = "DDP_PRINT_RAW")]
    print_raw: bool,

    /// Give up waiting for a method or sub after this many seconds
    #[arg(long, env = "DDP_TIMEOUT_SECS")]
    timeout_secs: Option<u64>,

    /// Protocol version to announce in the handshake
    #[arg(long)]
    ddp_version: Option<String>,
}

#[derive(Debug, PartialEq, Eq)]
enum Command<'line> {
    Connect(&'line str),
    Method { name: &'line str, params: &'line str },
    Sub { name: &'line str, params: &'line str },
    Help(Option<&'line str>),
    Unknown(&'line str),
}

impl<'line> Command<'line> {
    fn parse(line: &'line str) -> Self {
        let (verb, rest) = line.split_once(' ').unwrap_or((line, ""));
        let rest = rest.trim();
        let (name, params) = rest.split_once(' ').unwrap_or((rest, ""));

        match verb {
            "connect" => Self::Connect(rest),
            "method" => Self::Method { name, params },
            "sub" => Self::Sub { name, params },
            "help" | "?" => Self::Help((!rest.is_empty()).then_some(rest)),
            _ => Self::Unknown(line),
        }
    }
}

fn say<T: Display>(line: T) {
    let mut out = io::stdout().lock();
    _ = writeln!(out, "{line}");
}

fn help(topic: Option<&str>) {
    match topic {
        Some("connect") => {
            say("connect <websocket endpoint url>");
            say("  Connect to a DDP endpoint. For Meteor apps, the url is something like `http://foo.meteor.com/sockjs/websocket`");
        }
        Some("method") => {
            say("method <method name> <json array of parameters>");
            say("  Calls a remote method");
            say(r#"  Example: method createApp [{"name": "foo.meteor.com", "description": "bar"}]"#);
        }
        Some("sub") => {
            say("sub <subscription name> <json array of parameters>");
            say("  Subscribes to a remote dataset");
            say(r#"  Example: sub myApp ["foo.meteor.com"]"#);
        }
        Some(other) => say(format_args!("*** No help on {other}")),
        None => {
            say("Documented commands (type help <topic>):");
            say("connect  method  sub  help");
        }
    }
}

fn report(error: &Error) {
    match error.kind() {
        Kind::NotConnected => say("Connection closed. Use `connect` to establish one"),
        _ => say(format_args!("*** {error}")),
    }
}

async fn execute(client: &Client, command: Command<'_>) -> ddp_client::Result<()> {
    match command {
        Command::Connect(endpoint) => client.connect(endpoint).await,
        Command::Method { name, params } => {
            let params: Params = params.parse()?;
            client.method(name, params).await.map(drop)
        }
        Command::Sub { name, params } => {
            let params: Params = params.parse()?;
            client.sub(name, params).await.map(drop)
        }
        Command::Help(topic) => {
            help(topic);
            Ok(())
        }
        Command::Unknown(line) => {
            say(format_args!("*** Unknown syntax: {line}"));
            Ok(())
        }
    }
}

fn spawn_printer(mut events: mpsc::UnboundedReceiver<Event>) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            say(event);
        }
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    let args = Args::parse();

    let config = Config::builder()
        .verbose(args.print_raw)
        .maybe_request_timeout(args.timeout_secs.map(Duration::from_secs))
        .maybe_version(args.ddp_version)
        .build();
    let client = Client::new(config);
    let printer = spawn_printer(client.subscribe_events());

    if let Some(endpoint) = &args.ddp_endpoint {
        client.connect(endpoint).await?;
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        tracing::debug!(%line, "command");
        if let Err(e) = execute(&client, Command::parse(line)).await {
            report(&e);
        }
    }

    client.close().await;
    drop(client);
    if timeout(DRAIN_TIMEOUT, printer).await.is_err() {
        tracing::debug!("stopped printing with events still pending");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commands_split_name_from_json_params() {
        assert_eq!(
            Command::parse(r#"method createApp [{"name": "foo.meteor.com", "description": "bar"}]"#),
            Command::Method {
                name: "createApp",
                params: r#"[{"name": "foo.meteor.com", "description": "bar"}]"#,
            }
        );
        assert_eq!(
            Command::parse("sub userList []"),
            Command::Sub {
                name: "userList",
                params: "[]",
            }
        );
        assert_eq!(
            Command::parse("connect ws://localhost:3000/websocket"),
            Command::Connect("ws://localhost:3000/websocket")
        );
    }

    #[test]
    fn help_and_unknown_commands() {
        assert_eq!(Command::parse("help"), Command::Help(None));
        assert_eq!(Command::parse("help sub"), Command::Help(Some("sub")));
        assert_eq!(Command::parse("frobnicate 1"), Command::Unknown("frobnicate 1"));
    }

    #[test]
    fn missing_params_fail_to_parse() {
        let Command::Method { params, .. } = Command::parse("method ping") else {
            panic!("expected a method command");
        };
        assert_eq!(params.parse::<Params>().unwrap_err().kind(), Kind::InvalidParameters);
    }
}

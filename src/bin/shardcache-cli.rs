//! shardcache CLI Client
//!
//! Interactive command-line client speaking the binary protocol over TCP.

use clap::Parser;
use futures::{SinkExt, StreamExt};
use shardcache::protocol::{Frame, McCodec, Status};
use shardcache::storage::Cas;
use std::io::{self, Write};
use std::sync::atomic::{AtomicU32, Ordering};
use tokio::net::TcpStream;
use tokio_util::codec::Framed;

/// shardcache CLI - Interactive Client
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Server host
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    host: String,

    /// Server port
    #[arg(short, long, default_value_t = 5000)]
    port: u16,
}

static OPAQUE: AtomicU32 = AtomicU32::new(1);

fn next_opaque() -> u32 {
    OPAQUE.fetch_add(1, Ordering::Relaxed)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let addr = format!("{}:{}", args.host, args.port);

    println!("Connecting to shardcache at {}...", addr);

    let stream = TcpStream::connect(&addr).await?;
    let mut framed = Framed::new(stream, McCodec::new());

    println!("Connected! Type 'help' for available commands, 'quit' to exit.\n");

    loop {
        print!("shardcache> ");
        io::stdout().flush()?;

        let mut input = String::new();
        if io::stdin().read_line(&mut input)? == 0 {
            break;
        }
        let input = input.trim();

        if input.is_empty() {
            continue;
        }

        if input.eq_ignore_ascii_case("help") {
            print_help();
            continue;
        }

        if input.eq_ignore_ascii_case("quit") || input.eq_ignore_ascii_case("exit") {
            // the server closes without replying
            framed.send(Frame::quit(next_opaque())).await?;
            println!("Goodbye!");
            break;
        }

        let request = match parse_command(input) {
            Ok(request) => request,
            Err(e) => {
                eprintln!("Error: {}", e);
                continue;
            }
        };

        framed.send(request).await?;

        match framed.next().await {
            Some(Ok(response)) => println!("{}", describe(&response)),
            Some(Err(e)) => eprintln!("Error: {}", e),
            None => {
                eprintln!("Connection closed by server");
                break;
            }
        }
    }

    Ok(())
}

fn parse_command(input: &str) -> anyhow::Result<Frame> {
    let parts: Vec<&str> = input.split_whitespace().collect();

    if parts.is_empty() {
        anyhow::bail!("Empty command");
    }

    let cmd = parts[0].to_uppercase();

    match cmd.as_str() {
        "GET" => {
            if parts.len() < 2 {
                anyhow::bail!("GET requires a key: GET <key>");
            }
            Ok(Frame::get(parts[1].as_bytes(), next_opaque()))
        }

        "SET" => {
            if parts.len() < 3 {
                anyhow::bail!("SET requires key and value: SET <key> <value> [flags] [expire]");
            }
            let flags = match parts.get(3) {
                Some(flags) => flags.parse::<u32>()?,
                None => 0,
            };
            let expire = match parts.get(4) {
                Some(expire) => expire.parse::<u32>()?,
                None => 0,
            };
            Ok(Frame::set(
                parts[1].as_bytes(),
                parts[2].as_bytes(),
                flags,
                expire,
                Cas::default(),
                next_opaque(),
            ))
        }

        _ => anyhow::bail!("Unknown command: {}. Type 'help' for available commands.", cmd),
    }
}

fn describe(response: &Frame) -> String {
    match response.status() {
        Some(Status::Success) if response.header.extra_len > 0 => format!(
            "\"{}\" (flags={}, cas={})",
            String::from_utf8_lossy(response.value()),
            response.flags().unwrap_or_default(),
            response.header.cas.as_u64()
        ),
        Some(Status::Success) => format!("OK (cas={})", response.header.cas.as_u64()),
        Some(Status::NotFound) => "(nil)".to_string(),
        Some(status) => format!("(error) {}", status),
        None => format!("(error) unknown status {:#06x}", response.header.status),
    }
}

fn print_help() {
    println!(
        r#"
Available commands:

  GET <key>                          - Get value for key
  SET <key> <value> [flags] [expire] - Store a value

  help                               - Show this help
  quit / exit                        - Close the connection and exit

Examples:
  SET mykey myvalue
  SET mykey myvalue 42 0
  GET mykey
"#
    );
}

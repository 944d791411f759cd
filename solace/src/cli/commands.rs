//! CLI command execution.

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info};
use uuid::Uuid;

use crate::client::{Connection, ConversationView, EventFeed, ViewUpdate, FALLBACK};
use crate::config::Config;
use crate::server;

use super::args::{Cli, Commands};

/// Generate an anonymous user id (UUIDv7, time-ordered).
fn generate_user_id() -> String {
    Uuid::now_v7().to_string()
}

/// Execute the parsed CLI.
pub async fn execute(cli: Cli) -> Result<()> {
    let mut config = Config::load(cli.config.as_deref()).context("Failed to load configuration")?;

    match cli.command {
        Commands::Serve {
            port,
            host,
            upstream,
            model,
        } => {
            if let Some(port) = port {
                config.server.port = port;
            }
            if let Some(host) = host {
                config.server.host = host;
            }
            if let Some(upstream) = upstream {
                config.upstream.base_url = upstream;
            }
            if let Some(model) = model {
                config.upstream.model = model;
            }
            server::start_server(&config).await
        }
        Commands::Chat { user, server } => {
            let base = server.unwrap_or_else(|| default_server(&config));
            let user_id = user.unwrap_or_else(generate_user_id);
            chat(Connection::new(&base, user_id)).await
        }
        Commands::Clear { user, server } => {
            let base = server.unwrap_or_else(|| default_server(&config));
            Connection::new(&base, user).clear().await?;
            println!("Conversation cleared.");
            Ok(())
        }
        Commands::Config => {
            print!("{}", config.to_toml().context("Failed to render configuration")?);
            Ok(())
        }
    }
}

fn default_server(config: &Config) -> String {
    format!("http://{}:{}", config.server.host, config.server.port)
}

/// Interactive chat loop. `/1`.. picks a suggestion, `/quit` or EOF leaves.
async fn chat(connection: Connection) -> Result<()> {
    let mut feed = connection
        .subscribe()
        .await
        .context("Is the relay running? Start it with `solace serve`")?;
    info!(user = %connection.user_id(), "Connected");

    let mut view = ConversationView::open();
    print_opening(&view);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("Failed to read input")? else {
                    break;
                };
                let line = line.trim();
                if line == "/quit" {
                    break;
                }

                let outgoing = match line.strip_prefix('/').and_then(|n| n.parse::<usize>().ok()) {
                    Some(number) => view.suggestion(number.wrapping_sub(1)),
                    None => view.send(line),
                };
                if let Some(message) = outgoing {
                    submit(&connection, &mut view, &message).await;
                }
            }
            event = feed.recv() => {
                let Some(event) = event else {
                    println!("\n[connection closed by server]");
                    break;
                };
                render(view.apply(&event));
            }
        }
    }

    close(connection, view, feed).await
}

async fn submit(connection: &Connection, view: &mut ConversationView, message: &str) {
    if let Err(e) = connection.send(message).await {
        debug!(error = %e, "Submit failed");
        view.submit_failed();
        println!("solace> {FALLBACK}");
        return;
    }
    println!("solace is typing...");
}

fn render(update: ViewUpdate) {
    use std::io::Write;

    match update {
        ViewUpdate::Started(delta) => print!("solace> {delta}"),
        ViewUpdate::Delta(delta) => print!("{delta}"),
        ViewUpdate::Finished => println!(),
        ViewUpdate::Failed => println!("\nsolace> {FALLBACK}"),
        ViewUpdate::Ignored => {}
    }
    let _ = std::io::stdout().flush();
}

fn print_opening(view: &ConversationView) {
    for turn in view.transcript() {
        println!("solace> {}", turn.content);
    }
    if !view.suggestions().is_empty() {
        println!();
        for (i, suggestion) in view.suggestions().iter().enumerate() {
            println!("  /{}  {suggestion}", i + 1);
        }
    }
    println!("\nType a message, a suggestion number, or /quit to leave.\n");
}

/// Closing the chat forgets it on both ends.
async fn close(connection: Connection, mut view: ConversationView, feed: EventFeed) -> Result<()> {
    drop(feed);
    view.close();
    connection
        .clear()
        .await
        .context("Failed to clear conversation on server")?;
    println!("Conversation closed and cleared.");
    Ok(())
}

use anyhow::Result;
use console::style;
use dialoguer::{theme::ColorfulTheme, Confirm};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, warn};

use crate::cli::render::Renderer;
use crate::core::error::Visibility;
use crate::panel::Panel;

/// Control lines accepted by the dashboard on stdin.
#[derive(Debug, Clone, PartialEq)]
pub enum ControlCommand {
    Watch(String),
    Stop,
    AutoRefresh(bool),
    Refresh,
    Cpu(f64),
    Memory(u64),
    Clear,
    Start,
    Help,
    Quit,
}

pub const HELP: &str = "commands: watch <ns> | stop | auto on|off | refresh | cpu <cores> | memory <mb> | clear | start | help | quit";

impl ControlCommand {
    pub fn parse(line: &str) -> Result<Self, String> {
        let mut words = line.split_whitespace();
        let verb = words.next().unwrap_or_default().to_lowercase();
        let arg = words.next();

        match (verb.as_str(), arg) {
            ("watch", Some(ns)) => Ok(ControlCommand::Watch(ns.to_string())),
            ("watch", None) => Err("enter a namespace to watch".to_string()),
            ("stop", _) => Ok(ControlCommand::Stop),
            ("auto", Some("on")) => Ok(ControlCommand::AutoRefresh(true)),
            ("auto", Some("off")) => Ok(ControlCommand::AutoRefresh(false)),
            ("auto", _) => Err("usage: auto on|off".to_string()),
            ("refresh", _) => Ok(ControlCommand::Refresh),
            ("cpu", Some(value)) => value
                .parse()
                .map(ControlCommand::Cpu)
                .map_err(|_| format!("not a core count: {}", value)),
            ("memory", Some(value)) => value
                .parse()
                .map(ControlCommand::Memory)
                .map_err(|_| format!("not a memory size: {}", value)),
            ("clear", _) => Ok(ControlCommand::Clear),
            ("start", _) => Ok(ControlCommand::Start),
            ("help", _) | ("?", _) => Ok(ControlCommand::Help),
            ("quit", _) | ("exit", _) | ("q", _) => Ok(ControlCommand::Quit),
            ("", _) => Err(String::new()),
            (other, _) => Err(format!("unknown command: {} ({})", other, HELP)),
        }
    }
}

/// Runs the live dashboard until `quit`, Ctrl-C, or a closed stdin
/// followed by Ctrl-C.
pub async fn run_dashboard(panel: &Panel, watch: Option<String>, auto_refresh: bool) -> Result<()> {
    let mut rx = panel.subscribe();
    let renderer = tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => Renderer::print(&event),
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "renderer fell behind"),
                Err(RecvError::Closed) => break,
            }
        }
    });

    println!("{}", style(HELP).dim());
    // Failures are already on screen via the event stream.
    let _ = panel.start().await;
    if auto_refresh {
        panel.set_auto_refresh(true);
    }
    if let Some(ns) = watch {
        let _ = panel.watch(&ns).await;
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    loop {
        if !stdin_open {
            tokio::signal::ctrl_c().await?;
            break;
        }
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            line = lines.next_line() => match line {
                Ok(Some(line)) => match ControlCommand::parse(&line) {
                    Ok(ControlCommand::Quit) => break,
                    Ok(command) => apply(panel, command).await,
                    Err(message) if message.is_empty() => {}
                    Err(message) => eprintln!("{}", style(message).yellow()),
                },
                Ok(None) => {
                    debug!("stdin closed, waiting for Ctrl-C");
                    stdin_open = false;
                }
                Err(e) => {
                    warn!(error = %e, "stdin read failed");
                    stdin_open = false;
                }
            },
        }
    }

    panel.clear_page();
    // Let the renderer flush what clear_page published.
    tokio::task::yield_now().await;
    renderer.abort();
    Ok(())
}

async fn apply(panel: &Panel, command: ControlCommand) {
    match command {
        ControlCommand::Watch(ns) => {
            let _ = panel.watch(&ns).await;
        }
        ControlCommand::Stop => {
            panel.stop_watch();
        }
        ControlCommand::AutoRefresh(enabled) => panel.set_auto_refresh(enabled),
        ControlCommand::Refresh => {
            let _ = panel.refresh_environments(Visibility::Surfaced).await;
        }
        ControlCommand::Cpu(cores) => {
            panel.select_cpu(cores);
        }
        ControlCommand::Memory(mb) => {
            panel.select_memory(mb);
        }
        ControlCommand::Clear => panel.clear_page(),
        ControlCommand::Start => {
            let _ = panel.start().await;
        }
        ControlCommand::Help => println!("{}", HELP),
        ControlCommand::Quit => {}
    }
}

/// Asks before terminating; declining is not an error.
pub fn confirm_terminate(namespace: &str) -> Result<bool> {
    let confirmed = Confirm::with_theme(&ColorfulTheme::default())
        .with_prompt(format!("Terminate environment {}?", namespace))
        .default(false)
        .interact()?;
    Ok(confirmed)
}

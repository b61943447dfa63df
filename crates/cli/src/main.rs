use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use tether::config::{self, Config, ServerEndpoint};
use tether::coordinator::{LoadCoordinator, LoadEvent};
use tether::history;
use tether::llm::{ApiClient, ChatMessage, ChatOptions, ClientSettings};
use tether::prefs::Preferences;
use tether::state::ModelState;
use tether::view::ModelListView;

#[derive(Parser)]
#[command(name = "tether")]
#[command(about = "Tether CLI", long_about = None)]
struct Cli {
    /// Config file path (default: TETHER_CONFIG_PATH or ~/.tether/config.json)
    #[arg(long, short, value_name = "PATH", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show version
    Version,

    /// Create the configuration directory with a default config and preferences file.
    Init,

    /// Check whether the server responds and which model it has loaded.
    Status,

    /// List the server's models, marking the loaded one.
    Models,

    /// Load a model on the server (direct load endpoints, then force-load via a completion).
    Load {
        /// Model id as listed by `tether models`.
        model: String,
    },

    /// Unload the server's current model.
    Eject,

    /// Show or change the server endpoint (saved in preferences).
    Server {
        #[arg(long)]
        host: Option<String>,

        #[arg(long)]
        port: Option<u16>,
    },

    /// Show or hide the chat banner.
    Banner {
        #[arg(value_enum)]
        setting: Toggle,
    },

    /// Chat with the loaded model (interactive). `/exit` or `/quit` leaves.
    Chat {
        /// Continue the last conversation of a history export.
        #[arg(long, value_name = "PATH")]
        import: Option<PathBuf>,

        /// Write the conversation(s) to this file when the chat ends.
        #[arg(long, value_name = "PATH")]
        export: Option<PathBuf>,

        /// Wait for whole replies instead of streaming them.
        #[arg(long)]
        no_stream: bool,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Toggle {
    On,
    Off,
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();
    let config_path = cli.config;

    let result = match cli.command {
        Some(Commands::Version) => {
            println!("tether {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        Some(Commands::Init) => run_init(config_path),
        Some(Commands::Status) => run_status(config_path).await,
        Some(Commands::Models) => run_models(config_path).await,
        Some(Commands::Load { model }) => run_load(config_path, model).await,
        Some(Commands::Eject) => run_eject(config_path).await,
        Some(Commands::Server { host, port }) => run_server(config_path, host, port),
        Some(Commands::Banner { setting }) => run_banner(config_path, setting),
        Some(Commands::Chat {
            import,
            export,
            no_stream,
        }) => run_chat(config_path, import, export, !no_stream).await,
        None => {
            println!("Run with --help for usage");
            Ok(())
        }
    };

    if let Err(e) = result {
        log::error!("{:#}", e);
        std::process::exit(1);
    }
}

/// Loaded config, preferences and a client wired to the shared model state.
struct Session {
    config: Config,
    prefs: Preferences,
    client: ApiClient,
}

impl Session {
    fn open(config_path: Option<PathBuf>) -> anyhow::Result<Self> {
        let (config, path) = config::load_config(config_path)?;
        let prefs = Preferences::open(config::prefs_path(&path))?;
        let endpoint = config::resolve_endpoint(&config, &prefs);
        let state = ModelState::with_cached(prefs.loaded_model());
        let client = ApiClient::new(&endpoint, ClientSettings::from_config(&config), state);
        Ok(Self {
            config,
            prefs,
            client,
        })
    }

    /// Remember the loaded model for the next run.
    fn persist_state(&mut self) -> anyhow::Result<()> {
        let loaded = self.client.state().loaded_id();
        if self.prefs.loaded_model() != loaded.as_deref() {
            self.prefs.set_loaded_model(loaded.as_deref());
            self.prefs.save()?;
        }
        Ok(())
    }
}

fn run_init(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let path = config_path.unwrap_or_else(config::default_config_path);
    let dir = tether::init::init_config_dir(&path)?;
    println!("initialized configuration at {}", dir.display());
    Ok(())
}

async fn run_status(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let mut session = Session::open(config_path)?;
    let url = session.client.base_url().to_string();
    if !session.client.is_server_running().await {
        println!("server {}: not responding", url);
        return Ok(());
    }
    println!("server {}: running", url);
    let discovery = session.client.discover().await;
    match &discovery.loaded {
        Some(m) => println!("loaded: {} ({})", m.id, m.confidence.label()),
        None => println!("loaded: none"),
    }
    session.persist_state()
}

async fn run_models(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let mut session = Session::open(config_path)?;
    let discovery = session.client.discover().await;
    println!("{}", ModelListView::from_discovery(&discovery));
    session.persist_state()
}

/// Print coordinator events as they happen; ends after `Finished`.
fn spawn_event_printer(coordinator: &LoadCoordinator) -> tokio::task::JoinHandle<()> {
    let mut rx = coordinator.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = rx.recv().await {
            match event {
                LoadEvent::Started { model_id } => println!("loading {}...", model_id),
                LoadEvent::Succeeded { model_id } => println!("loaded {}", model_id),
                LoadEvent::Failed { message, .. } | LoadEvent::EjectFailed { message, .. } => {
                    eprintln!("{}", message)
                }
                LoadEvent::EjectStarted => println!("ejecting..."),
                LoadEvent::Ejected => println!("ejected"),
                LoadEvent::Finished => break,
            }
        }
    })
}

async fn run_load(config_path: Option<PathBuf>, model: String) -> anyhow::Result<()> {
    let mut session = Session::open(config_path)?;
    let coordinator =
        LoadCoordinator::new(session.client.clone(), session.config.load.error_revert());
    let printer = spawn_event_printer(&coordinator);
    let ok = coordinator.load(&model).await;
    let _ = printer.await;
    session.persist_state()?;
    if !ok {
        anyhow::bail!("load of {} failed", model);
    }
    Ok(())
}

async fn run_eject(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let mut session = Session::open(config_path)?;
    let coordinator =
        LoadCoordinator::new(session.client.clone(), session.config.load.error_revert());
    let printer = spawn_event_printer(&coordinator);
    let ok = coordinator.eject().await;
    let _ = printer.await;
    session.persist_state()?;
    if !ok {
        anyhow::bail!("eject failed");
    }
    Ok(())
}

fn run_server(
    config_path: Option<PathBuf>,
    host: Option<String>,
    port: Option<u16>,
) -> anyhow::Result<()> {
    let (config, path) = config::load_config(config_path)?;
    let mut prefs = Preferences::open(config::prefs_path(&path))?;
    let current = config::resolve_endpoint(&config, &prefs);
    if host.is_none() && port.is_none() {
        println!("{}", current.base_url());
        return Ok(());
    }
    let host = host
        .map(|h| h.trim().to_string())
        .filter(|h| !h.is_empty())
        .unwrap_or(current.host);
    let endpoint = ServerEndpoint::new(host, port.unwrap_or(current.port));
    prefs.set_server_endpoint(&endpoint);
    // A different server has a different model loaded.
    prefs.set_loaded_model(None);
    prefs.save()?;
    println!("server set to {}", endpoint.base_url());
    Ok(())
}

fn run_banner(config_path: Option<PathBuf>, setting: Toggle) -> anyhow::Result<()> {
    let (_, path) = config::load_config(config_path)?;
    let mut prefs = Preferences::open(config::prefs_path(&path))?;
    prefs.set_show_banner(matches!(setting, Toggle::On));
    prefs.save()?;
    Ok(())
}

async fn run_chat(
    config_path: Option<PathBuf>,
    import: Option<PathBuf>,
    export: Option<PathBuf>,
    stream: bool,
) -> anyhow::Result<()> {
    use std::io::{self, Write};

    let mut session = Session::open(config_path)?;
    let mut conversations = match &import {
        Some(path) => history::import_history(path)?,
        None => Vec::new(),
    };
    let mut current = conversations.pop().unwrap_or_default();

    // Confirms the server is there and fills in the loaded model for the banner.
    let discovery = session.client.discover().await;
    session.persist_state()?;
    if session.prefs.show_banner() {
        let model = discovery
            .loaded
            .as_ref()
            .map(|m| format!("{} ({})", m.id, m.confidence.label()))
            .unwrap_or_else(|| "none".to_string());
        println!("tether chat: {}  model: {}", session.client.base_url(), model);
        if !discovery.reachable {
            println!("server not responding; messages will fail until it is back");
        }
        if !current.messages.is_empty() {
            println!(
                "continuing {:?} ({} messages)",
                current.title.as_deref().unwrap_or("untitled"),
                current.messages.len()
            );
        }
    }

    let options = ChatOptions::from(&session.config.chat);
    let system_prompt = session.config.chat.system_prompt.clone();
    let stdin = io::stdin();
    let mut stdout = io::stdout();

    loop {
        write!(stdout, "> ")?;
        stdout.flush()?;
        let mut line = String::new();
        if stdin.read_line(&mut line)? == 0 {
            break;
        }
        let input = line.trim();
        if input.is_empty() {
            continue;
        }
        if input.eq_ignore_ascii_case("/exit") || input.eq_ignore_ascii_case("/quit") {
            break;
        }

        current.push(ChatMessage::user(input));
        let messages = current.request_messages(system_prompt.as_deref());
        let reply = if stream {
            print!("< ");
            stdout.flush()?;
            let mut on_chunk = |chunk: &str| {
                print!("{}", chunk);
                let _ = io::stdout().flush();
            };
            let reply = session
                .client
                .chat_stream(&messages, &options, &mut on_chunk)
                .await;
            println!();
            reply
        } else {
            let reply = session.client.chat(&messages, &options).await;
            if let Ok(ref text) = reply {
                println!("< {}", text.trim());
            }
            reply
        };
        match reply {
            Ok(text) => current.push(ChatMessage::assistant(text)),
            Err(e) => {
                // Drop the unanswered message so a retry does not send it twice.
                current.pop();
                eprintln!("chat error: {}", e);
            }
        }
    }

    if let Some(path) = export {
        if !current.messages.is_empty() {
            conversations.push(current);
        }
        if conversations.is_empty() {
            println!("nothing to export");
        } else {
            history::export_history(&path, &conversations)?;
            println!("exported {} conversation(s) to {}", conversations.len(), path.display());
        }
    }
    Ok(())
}

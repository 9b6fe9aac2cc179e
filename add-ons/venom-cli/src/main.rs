//! Venom terminal client
//!
//! Opens the conversation store, resolves the user (Firebase sign-in when
//! configured, the local identity otherwise) and runs a line-oriented chat over
//! the turn controller. With `--features native-audio` the microphone and
//! speaker are live and `/voice` records a spoken turn.

use anyhow::Context;
use std::path::Path;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use venom_core::{
    AuthSession, ChatSession, Conversation, CoreConfig, FirebaseAuth, Role, SledStore,
};
use venom_voice::{
    chat_from_settings, HttpTts, TextTurnController, TurnError, TurnState, VoiceSettings,
};

const HELP: &str = "\
Commands:
  <text>            send a message
  /voice            start recording (again to stop)
  /stop             stop the spoken reply
  /new [title]      start a conversation
  /list             list conversations
  /open <n|id>      switch conversation
  /rename <title>   rename the current conversation
  /delete           delete the current conversation
  /state            show the turn state
  /quit             exit";

/// The controller the client drives: voice when audio devices are compiled in.
#[derive(Clone)]
enum Driver {
    #[cfg_attr(feature = "native-audio", allow(dead_code))]
    Text(TextTurnController),
    #[cfg(feature = "native-audio")]
    Voice(venom_voice::TurnController),
}

impl Driver {
    fn subscribe(&self) -> watch::Receiver<TurnState> {
        match self {
            Driver::Text(c) => c.subscribe(),
            #[cfg(feature = "native-audio")]
            Driver::Voice(c) => c.subscribe(),
        }
    }

    fn state(&self) -> TurnState {
        match self {
            Driver::Text(c) => c.state(),
            #[cfg(feature = "native-audio")]
            Driver::Voice(c) => c.state(),
        }
    }

    async fn last_error(&self) -> Option<String> {
        match self {
            Driver::Text(c) => c.last_error().await,
            #[cfg(feature = "native-audio")]
            Driver::Voice(c) => c.last_error().await,
        }
    }

    async fn send_text(&self, text: &str) -> Result<(), TurnError> {
        match self {
            Driver::Text(c) => c.send_text(text).await,
            #[cfg(feature = "native-audio")]
            Driver::Voice(c) => c.send_text(text).await,
        }
    }

    async fn toggle_recording(&self) -> Result<(), TurnError> {
        match self {
            Driver::Text(_) => {
                println!("(voice input needs a build with --features native-audio)");
                Ok(())
            }
            #[cfg(feature = "native-audio")]
            Driver::Voice(c) => {
                if c.state() == TurnState::Recording {
                    c.stop_recording().await;
                    Ok(())
                } else {
                    c.start_recording().await
                }
            }
        }
    }

    async fn stop_speaking(&self) -> bool {
        match self {
            Driver::Text(c) => c.stop_speaking().await,
            #[cfg(feature = "native-audio")]
            Driver::Voice(c) => c.stop_speaking().await,
        }
    }

    async fn reset(&self) {
        match self {
            Driver::Text(c) => c.reset().await,
            #[cfg(feature = "native-audio")]
            Driver::Voice(c) => c.reset().await,
        }
    }

    async fn select_conversation(&self, id: &str) -> Result<Conversation, TurnError> {
        match self {
            Driver::Text(c) => c.select_conversation(id).await,
            #[cfg(feature = "native-audio")]
            Driver::Voice(c) => c.select_conversation(id).await,
        }
    }

    async fn create_conversation(
        &self,
        user_id: &str,
        title: Option<&str>,
    ) -> Result<Conversation, TurnError> {
        match self {
            Driver::Text(c) => c.create_conversation(user_id, title).await,
            #[cfg(feature = "native-audio")]
            Driver::Voice(c) => c.create_conversation(user_id, title).await,
        }
    }

    async fn delete_conversation(&self) -> Result<(), TurnError> {
        match self {
            Driver::Text(c) => c.delete_conversation().await,
            #[cfg(feature = "native-audio")]
            Driver::Voice(c) => c.delete_conversation().await,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = dotenvy::dotenv() {
        eprintln!("[venom] .env not loaded: {} (using system environment)", e);
    }

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = CoreConfig::load().context("load CoreConfig")?;
    let settings = VoiceSettings::load().context("load VoiceSettings")?;

    let store = Arc::new(
        SledStore::open_path(Path::new(&config.storage_path))
            .with_context(|| format!("open store at {}", config.storage_path))?,
    );
    let user_id = resolve_user(&config, store.clone()).await;

    let chat = Arc::new(ChatSession::new(store.clone()));
    let opened = chat.open_or_create(&user_id).await?;
    tracing::info!(
        user_id = %user_id,
        conversation = %opened.id,
        storage_path = %config.storage_path,
        "Venom client started"
    );

    let driver = build_driver(chat.clone(), settings)?;
    let printer = tokio::spawn(print_replies(chat.clone(), driver.subscribe()));

    println!("{}: {}", config.app_name, opened.title);
    println!("{}", HELP);
    print_messages(&chat.messages().await);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("CTRL-C received; shutting down");
                break;
            }
        };
        let Some(line) = line else { break };
        match handle(line.trim(), &driver, &chat, &user_id).await {
            Ok(true) => {}
            Ok(false) => break,
            Err(e) => println!("! {}", e),
        }
    }

    driver.reset().await;
    printer.abort();
    store.flush().await?;
    Ok(())
}

/// Signs in with `VENOM_EMAIL` / `VENOM_PASSWORD` when Firebase is configured.
async fn resolve_user(config: &CoreConfig, store: Arc<SledStore>) -> String {
    let Some(backend) = FirebaseAuth::from_config(config) else {
        return config.user_id.clone();
    };
    let (Some(email), Some(password)) = (
        venom_core::env_opt_string("VENOM_EMAIL"),
        venom_core::env_opt_string("VENOM_PASSWORD"),
    ) else {
        tracing::warn!("Firebase configured but VENOM_EMAIL/VENOM_PASSWORD unset; using local identity");
        return config.user_id.clone();
    };

    let auth = AuthSession::new(Arc::new(backend), store);
    let outcome = auth.sign_in(&email, &password).await;
    match auth.user().await {
        Some(user) if outcome.success => {
            tracing::info!(email = %email, "🔐 Signed in");
            user.uid
        }
        _ => {
            tracing::warn!(error = ?outcome.error, "sign-in failed; using local identity");
            config.user_id.clone()
        }
    }
}

#[cfg(feature = "native-audio")]
fn build_driver(chat: Arc<ChatSession>, settings: VoiceSettings) -> anyhow::Result<Driver> {
    use venom_voice::{CpalMicrophone, HttpStt, RodioOutput, TurnController, VoiceServices};

    let services = VoiceServices {
        stt: Arc::new(HttpStt::from_settings(&settings.services)?),
        llm: chat_from_settings(&settings.services)?,
        tts: Arc::new(HttpTts::from_settings(&settings.services)?),
    };
    let controller = TurnController::new(
        chat,
        services,
        Arc::new(CpalMicrophone::new()),
        Arc::new(RodioOutput::new()?),
        settings,
    );
    Ok(Driver::Voice(controller))
}

#[cfg(not(feature = "native-audio"))]
fn build_driver(chat: Arc<ChatSession>, settings: VoiceSettings) -> anyhow::Result<Driver> {
    let llm = chat_from_settings(&settings.services)?;
    let tts = Arc::new(HttpTts::from_settings(&settings.services)?);
    let output = Arc::new(venom_voice::NullOutput::new());
    Ok(Driver::Text(TextTurnController::new(
        chat, llm, tts, output, settings,
    )))
}

/// Runs one input line. Returns false to quit.
async fn handle(
    line: &str,
    driver: &Driver,
    chat: &ChatSession,
    user_id: &str,
) -> anyhow::Result<bool> {
    let (command, arg) = match line.split_once(' ') {
        Some((c, a)) => (c, a.trim()),
        None => (line, ""),
    };
    match command {
        "" => {}
        "/quit" | "/exit" => return Ok(false),
        "/help" => println!("{}", HELP),
        "/state" => {
            println!("state: {}", driver.state());
            if let Some(err) = driver.last_error().await {
                println!("last error: {}", err);
            }
        }
        "/voice" => driver.toggle_recording().await?,
        "/stop" => {
            if !driver.stop_speaking().await {
                println!("(nothing is playing)");
            }
        }
        "/new" => {
            let title = (!arg.is_empty()).then_some(arg);
            let conversation = driver.create_conversation(user_id, title).await?;
            println!("# {}", conversation.title);
        }
        "/list" => {
            let conversations = chat.fetch_conversations(user_id).await?;
            let current = chat.current_id().await;
            for (i, c) in conversations.iter().enumerate() {
                let marker = if current.as_deref() == Some(c.id.as_str()) { "*" } else { " " };
                println!(
                    "{}{:>3}. {}  ({} messages, {})",
                    marker,
                    i + 1,
                    c.title,
                    c.messages.len(),
                    c.created_at.format("%Y-%m-%d %H:%M")
                );
            }
        }
        "/open" => {
            let id = match arg.parse::<usize>() {
                Ok(n) if n > 0 => chat
                    .conversations()
                    .await
                    .get(n - 1)
                    .map(|c| c.id.clone())
                    .with_context(|| format!("no conversation #{}", n))?,
                _ => arg.to_string(),
            };
            let conversation = driver.select_conversation(&id).await?;
            println!("# {}", conversation.title);
            print_messages(&conversation.messages);
        }
        "/rename" => {
            anyhow::ensure!(!arg.is_empty(), "usage: /rename <title>");
            chat.rename_current(arg).await?;
        }
        "/delete" => {
            driver.delete_conversation().await?;
            println!("(deleted)");
        }
        other if other.starts_with('/') => println!("unknown command {}; try /help", other),
        _ => driver.send_text(line).await?,
    }
    Ok(true)
}

/// Prints messages appended to the current conversation as turns progress.
async fn print_replies(chat: Arc<ChatSession>, mut states: watch::Receiver<TurnState>) {
    let mut seen = (chat.current_id().await, chat.messages().await.len());
    while states.changed().await.is_ok() {
        let state = *states.borrow_and_update();
        let current = chat.current_id().await;
        let messages = chat.messages().await;
        if current != seen.0 {
            seen = (current, messages.len());
            continue;
        }
        if messages.len() > seen.1 {
            print_messages(&messages[seen.1..]);
            seen.1 = messages.len();
        }
        match state {
            TurnState::Recording => println!("(listening…)"),
            TurnState::Speaking => println!("(speaking… /stop to interrupt)"),
            _ => {}
        }
    }
}

fn print_messages(messages: &[venom_core::Message]) {
    for m in messages {
        let who = match m.role {
            Role::User => "you",
            Role::Assistant => "venom",
        };
        println!("{:>5}> {}", who, m.content);
    }
}

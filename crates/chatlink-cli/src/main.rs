use anyhow::Context;
use chatlink_bridge::{ChatBridge, Listener};
use chatlink_config::{Config, ConfigManager, CredentialStore};
use chatlink_core::{ChannelId, Chat, Media, Message, UserRef};
use chatlink_observability::Observability;
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use futures::StreamExt;
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};

/// How long `send` waits for the broker to echo the message back
const ECHO_WAIT: Duration = Duration::from_secs(5);
/// Upper bound for flushing DISCONNECT before the process exits
const CLOSE_WAIT: Duration = Duration::from_secs(5);

#[derive(Parser)]
#[command(name = "chatlink")]
#[command(about = "Terminal client for the chat broker")]
#[command(version)]
struct Cli {
    /// Enable debug mode
    #[arg(long, short, default_value = "false")]
    debug: bool,

    /// Config file path
    #[arg(long, env = "CHATLINK_CONFIG", default_value = "~/.chatlink/config.json")]
    config: String,

    /// Access token for this run only (not persisted)
    #[arg(long)]
    token: Option<String>,

    /// Print a Prometheus snapshot of the bridge metrics to stderr on exit
    #[arg(long, default_value = "false")]
    metrics: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 加入聊天并交互式收发消息
    Chat {
        /// 聊天 ID
        chat_id: String,
    },
    /// 发送单条消息
    Send {
        /// 聊天 ID
        chat_id: String,
        /// 消息内容
        message: String,
    },
    /// 只接收消息，Ctrl-C 退出
    Listen {
        /// 聊天 ID
        chat_id: String,
    },
    /// 保存访问令牌到本地
    Login {
        /// 访问令牌
        token: String,
    },
    /// 删除本地访问令牌
    Logout,
    /// 配置管理命令
    Config(ConfigArgs),
}

#[derive(Args, Clone)]
struct ConfigArgs {
    #[command(subcommand)]
    command: ConfigCommands,
}

#[derive(Subcommand, Clone)]
enum ConfigCommands {
    /// 获取配置值
    Get {
        /// 配置键 (如: broker.host, logging.level)
        key: String,
    },
    /// 设置配置值
    Set {
        /// 配置键 (如: broker.host, logging.level)
        key: String,
        /// 配置值
        value: String,
    },
    /// 初始化默认配置
    Init {
        /// 强制覆盖已有配置
        #[arg(long, default_value = "false")]
        force: bool,
    },
    /// 显示当前配置
    Show,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // 展开配置文件路径
    let config_path =
        chatlink_config::expand_tilde(&cli.config).unwrap_or_else(|| PathBuf::from(&cli.config));

    if cli.debug {
        eprintln!("{}", "[DEBUG] Debug mode enabled".dimmed());
        eprintln!("{}", format!("[DEBUG] Config path: {:?}", config_path).dimmed());
    }

    if let Commands::Config(args) = cli.command {
        return handle_config(args, config_path).await;
    }

    let manager = ConfigManager::load(&config_path).await?;
    let config = manager.get().read().await.clone();
    let observability = init_observability(&config, cli.debug)?;

    let credentials = CredentialStore::from_config(&config.credentials);
    if let Some(token) = cli.token {
        credentials.set_session_token(Some(token));
    }

    let result = match cli.command {
        Commands::Chat { chat_id } => {
            let bridge = build_bridge(&config, credentials);
            run_interactive_chat(&bridge, &chat_id).await
        }
        Commands::Send { chat_id, message } => {
            let bridge = build_bridge(&config, credentials);
            send_once(&bridge, &chat_id, &message).await
        }
        Commands::Listen { chat_id } => {
            let bridge = build_bridge(&config, credentials);
            listen(&bridge, &chat_id).await
        }
        Commands::Login { token } => {
            credentials.store_local(&token).await?;
            println!("{}", "✅ Token saved".green());
            Ok(())
        }
        Commands::Logout => {
            credentials.clear_local().await?;
            println!("{}", "✅ Token removed".green());
            Ok(())
        }
        Commands::Config(_) => Ok(()),
    };

    if cli.metrics {
        eprint!("{}", observability.render_metrics());
    }
    result
}

fn init_observability(config: &Config, debug: bool) -> anyhow::Result<Observability> {
    let level = if debug {
        "debug".to_string()
    } else {
        config.logging.level.to_string()
    };

    let mut observability_config = chatlink_observability::Config::default()
        .with_log_level(level)
        .with_json_format(config.logging.json)
        .with_stdout(debug);
    observability_config.app_name = "chatlink".to_string();

    if let Some(path) = config
        .logging
        .file
        .as_deref()
        .and_then(chatlink_config::expand_tilde)
    {
        observability_config = observability_config.with_log_file(path);
    }

    Ok(Observability::init(observability_config)?)
}

fn build_bridge(config: &Config, credentials: CredentialStore) -> ChatBridge {
    tracing::debug!(
        endpoint = %config.broker.endpoint(),
        framing = %config.broker.framing,
        "Using chat broker"
    );
    ChatBridge::from_config(config, credentials)
}

async fn handle_config(args: ConfigArgs, config_path: PathBuf) -> anyhow::Result<()> {
    match args.command {
        ConfigCommands::Get { key } => {
            let manager = ConfigManager::load(&config_path).await?;
            let config = manager.get().read().await.clone();

            match config.get_value(&key) {
                Some(value) => {
                    println!("{}", format!("{} = {}", key, value).green());
                }
                None => {
                    println!("{}", format!("❌ Key not found: {}", key).red());
                    std::process::exit(1);
                }
            }
        }
        ConfigCommands::Set { key, value } => {
            let manager = ConfigManager::load(&config_path).await?;

            if let Err(e) = manager.update(|config| config.set_value(&key, &value)).await {
                eprintln!("{}", format!("❌ Failed to set value: {}", e).red());
                std::process::exit(1);
            }
            println!("{}", format!("✅ Set {} = {}", key, value).green());
        }
        ConfigCommands::Init { force } => {
            if config_path.exists() && !force {
                println!("{}", format!("⚠️  Config already exists at {:?}", config_path).yellow());
                println!("{}", "Use --force to overwrite".dimmed());
                return Ok(());
            }

            // 初始化目录
            chatlink_config::init_chatlink_dirs().await?;

            let manager = ConfigManager::new(Config::default(), config_path.clone());
            manager.save().await?;

            println!("{}", format!("✅ Config initialized at {:?}", config_path).green());
            println!("{}", "You can edit this file to customize your settings".dimmed());
        }
        ConfigCommands::Show => {
            let manager = ConfigManager::load(&config_path).await?;
            let config = manager.get().read().await.clone();

            println!("{}", "📋 Current Configuration:".cyan().bold());
            println!();
            println!("{}", serde_json::to_string_pretty(&config)?);
            println!();
            println!("{}", format!("Endpoint: {}", config.broker.endpoint()).dimmed());
        }
    }

    Ok(())
}

async fn run_interactive_chat(bridge: &ChatBridge, chat_id: &str) -> anyhow::Result<()> {
    println!("{}", "💬 chatlink".cyan().bold());
    println!("{}", format!("Joining chat {} ...", chat_id).dimmed());

    bridge
        .init_chat(chat_id)
        .await
        .with_context(|| format!("Failed to join chat {}", chat_id))?;

    println!("{}", "Connected. Type 'exit' or 'quit' to leave".dimmed());
    println!();

    let printer = tokio::spawn(print_incoming(bridge.receiver()));
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    while let Some(line) = lines.next_line().await? {
        let input = line.trim();

        if input.eq_ignore_ascii_case("exit") || input.eq_ignore_ascii_case("quit") {
            break;
        }

        if input.is_empty() {
            continue;
        }

        // awaited so nothing typed before `quit` is still queued at exit
        if let Err(e) = bridge
            .send(&Message::outgoing(Chat::with_id(chat_id), input))
            .await
        {
            eprintln!("{}", format!("❌ Not sent: {}", e).red());
        }
    }

    printer.abort();
    close_chat(bridge, chat_id).await;
    println!("{}", "👋 Goodbye!".cyan());
    Ok(())
}

async fn send_once(bridge: &ChatBridge, chat_id: &str, text: &str) -> anyhow::Result<()> {
    bridge
        .init_chat(chat_id)
        .await
        .with_context(|| format!("Failed to join chat {}", chat_id))?;

    // attach before sending so the echo cannot be missed
    let echoes = bridge.receiver().stream();
    let message = Message::outgoing(Chat::with_id(chat_id), text);
    println!("{}", format!("🚀 Sending message: {}", text).cyan());
    bridge.send(&message).await?;

    let echoed = tokio::time::timeout(ECHO_WAIT, async {
        tokio::pin!(echoes);
        while let Some(received) = echoes.next().await {
            if is_echo_of(&received, &message) {
                return true;
            }
        }
        false
    })
    .await
    .unwrap_or(false);

    close_chat(bridge, chat_id).await;

    if echoed {
        println!("{}", "✅ Delivered".green());
    } else {
        println!("{}", "⚠️  Sent, but the broker did not echo it back".yellow());
    }
    Ok(())
}

async fn listen(bridge: &ChatBridge, chat_id: &str) -> anyhow::Result<()> {
    bridge
        .init_chat(chat_id)
        .await
        .with_context(|| format!("Failed to join chat {}", chat_id))?;
    println!("{}", format!("👂 Listening on chat {} (Ctrl-C to stop)", chat_id).cyan());

    tokio::select! {
        _ = print_incoming(bridge.receiver()) => {}
        _ = tokio::signal::ctrl_c() => {}
    }

    close_chat(bridge, chat_id).await;
    Ok(())
}

/// Leave and wait for DISCONNECT to go out before the runtime shuts down
async fn close_chat(bridge: &ChatBridge, chat_id: &str) {
    if tokio::time::timeout(CLOSE_WAIT, bridge.close_chat(ChannelId::from(chat_id)))
        .await
        .is_err()
    {
        tracing::warn!(chat_id, "Link did not close in time");
    }
}

async fn print_incoming(listener: Listener) {
    let messages = listener.stream();
    tokio::pin!(messages);
    while let Some(message) = messages.next().await {
        print_message(&message);
    }
}

fn print_message(message: &Message) {
    let text = message.text.as_deref().unwrap_or_default();

    if message.is_system() {
        println!("{}", format!("· {}", text).dimmed());
        return;
    }

    let author = message
        .user
        .as_ref()
        .and_then(UserRef::display_name)
        .unwrap_or_else(|| "unknown".to_string());
    let body = match message.media() {
        Media::Photo(url) => format!("[photo] {}", url),
        Media::Video(url) => format!("[video] {}", url),
        Media::Audio(url) => format!("[audio] {}", url),
        Media::Text => text.to_string(),
    };

    println!("{} {}", format!("{}:", author).green().bold(), body);
}

/// The broker may drop the client uid, so fall back to comparing text
fn is_echo_of(received: &Message, sent: &Message) -> bool {
    match (&received.uid, &sent.uid) {
        (Some(a), Some(b)) => a == b,
        _ => received.text == sent.text && received.channel_id() == sent.channel_id(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_parses_commands() {
        let cli = Cli::try_parse_from(["chatlink", "--token", "abc", "send", "42", "hello"]).unwrap();
        assert_eq!(cli.token.as_deref(), Some("abc"));
        assert!(matches!(
            cli.command,
            Commands::Send { ref chat_id, ref message } if chat_id == "42" && message == "hello"
        ));

        let cli = Cli::try_parse_from(["chatlink", "config", "set", "broker.host", "chat:80"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Config(ConfigArgs { command: ConfigCommands::Set { .. } })
        ));

        assert!(Cli::try_parse_from(["chatlink", "chat"]).is_err());

        let cli = Cli::try_parse_from(["chatlink", "--metrics", "listen", "42"]).unwrap();
        assert!(cli.metrics);
        assert!(matches!(cli.command, Commands::Listen { ref chat_id } if chat_id == "42"));
    }

    #[test]
    fn echo_matching() {
        let sent = Message::outgoing(Chat::with_id("42"), "hello");

        let mut echo = sent.clone();
        echo.id = Some("m1".into());
        assert!(is_echo_of(&echo, &sent));

        echo.uid = Some("other".to_string());
        assert!(!is_echo_of(&echo, &sent));

        echo.uid = None;
        assert!(is_echo_of(&echo, &sent));

        echo.chat = Some(Chat::with_id("43"));
        assert!(!is_echo_of(&echo, &sent));
    }
}

use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

use clap::{Args, Parser, Subcommand, ValueEnum};
use humtum::{
    Avatar, HumTum, HumTumConfig, HumTumError, MessageQuery, NewMessage, RelationshipAction, RequestResponse,
    StaticCredentials, SubscriptionHandlers,
};
use serde_json::{Map, Value};
use tracing_subscriber::EnvFilter;

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("missing tokens; pass --id-token/--access-token or set HUMTUM_ID_TOKEN/HUMTUM_ACCESS_TOKEN")]
    MissingTokens,
    #[error("{0}")]
    Api(String),
    #[error("client setup failed: {0}")]
    Setup(#[from] HumTumError),
    #[error("invalid JSON payload: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("invalid channel param `{0}`; expected key=value")]
    InvalidParam(String),
    #[error("could not read {path}: {source}")]
    ReadFile { path: String, source: std::io::Error },
    #[error("channel closed")]
    ChannelClosed,
}

#[derive(Parser, Debug)]
#[command(name = "humtum", about = "HumTum platform API and channel CLI")]
struct Cli {
    #[arg(long, env = "HUMTUM_BASE_URL")]
    base_url: Option<String>,

    #[arg(long, env = "HUMTUM_ID_TOKEN", hide_env_values = true)]
    id_token: Option<String>,

    #[arg(long, env = "HUMTUM_ACCESS_TOKEN", hide_env_values = true)]
    access_token: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show the signed-in user's profile.
    Whoami,
    /// Change the signed-in user's name and avatar.
    UpdateSelf {
        #[arg(long)]
        name: String,
        #[arg(long)]
        avatar: String,
    },
    User(UserCommand),
    App(AppCommand),
    Message(MessageCommand),
    /// Manage a relationship with another user inside an app.
    Rel {
        action: RelAction,
        app_id: String,
        user_id: String,
    },
    /// Print channel messages as JSON lines.
    Subscribe {
        channel: String,
        #[arg(long = "param", value_name = "KEY=VALUE")]
        params: Vec<String>,
        #[arg(long, help = "Exit after this many messages")]
        count: Option<usize>,
    },
}

#[derive(Args, Debug)]
struct UserCommand {
    #[command(subcommand)]
    command: UserSubcommand,
}

#[derive(Subcommand, Debug)]
enum UserSubcommand {
    Read { user_id: String },
    Search { query: String },
}

#[derive(Args, Debug)]
struct AppCommand {
    #[command(subcommand)]
    command: AppSubcommand,
}

#[derive(Subcommand, Debug)]
enum AppSubcommand {
    List,
    Search {
        query: String,
        #[arg(long, default_value_t = false)]
        public: bool,
    },
    Enroll {
        app_id: String,
    },
    Unenroll {
        app_id: String,
    },
    /// `GET /apps/{app}/{path}`, e.g. `friends` or `follower_requests`.
    Data {
        app_id: String,
        path: String,
        #[arg(long)]
        query: Option<String>,
    },
    User {
        app_id: String,
        user_id: String,
    },
}

#[derive(Args, Debug)]
struct MessageCommand {
    #[command(subcommand)]
    command: MessageSubcommand,
}

#[derive(Subcommand, Debug)]
enum MessageSubcommand {
    List {
        #[arg(long)]
        unread: Option<bool>,
    },
    Send {
        #[arg(long)]
        description: String,
        #[arg(long, default_value = "{}")]
        payload: String,
        #[arg(long = "target", required = true)]
        targets: Vec<String>,
    },
    Receive {
        message_id: String,
    },
}

#[derive(ValueEnum, Debug, Clone, Copy)]
enum RelAction {
    AddFriend,
    Unfriend,
    Follow,
    Unfollow,
    ApproveFriend,
    RejectFriend,
    ApproveFollow,
    RejectFollow,
}

impl RelAction {
    fn request(self) -> (RelationshipAction, Option<RequestResponse>) {
        match self {
            Self::AddFriend => (RelationshipAction::AddFriend, None),
            Self::Unfriend => (RelationshipAction::Unfriend, None),
            Self::Follow => (RelationshipAction::Follow, None),
            Self::Unfollow => (RelationshipAction::Unfollow, None),
            Self::ApproveFriend => (RelationshipAction::RespondToFriendRequest, Some(RequestResponse::Approve)),
            Self::RejectFriend => (RelationshipAction::RespondToFriendRequest, Some(RequestResponse::Reject)),
            Self::ApproveFollow => (RelationshipAction::RespondToFollowRequest, Some(RequestResponse::Approve)),
            Self::RejectFollow => (RelationshipAction::RespondToFollowRequest, Some(RequestResponse::Reject)),
        }
    }
}

/// Last error reported by the client, surfaced as the process exit error.
type LastError = Arc<Mutex<Option<String>>>;

#[tokio::main]
async fn main() -> Result<(), CliError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let (id_token, access_token) = match (cli.id_token, cli.access_token) {
        (Some(id), Some(access)) => (id, access),
        _ => return Err(CliError::MissingTokens),
    };

    let mut config = HumTumConfig::from_env()?;
    if let Some(base_url) = cli.base_url {
        config = config.with_base_url(base_url);
    }

    let last_error: LastError = Arc::new(Mutex::new(None));
    let sink = Arc::clone(&last_error);
    let humtum = HumTum::builder(Arc::new(StaticCredentials::new(id_token, access_token)))
        .config(config)
        .error_handler(move |e: &HumTumError| {
            tracing::debug!(error = %e, body = ?e.body(), "request failed");
            let detail = e.body().map_or_else(|| e.to_string(), |body| format!("{e}: {body}"));
            *sink.lock().unwrap_or_else(PoisonError::into_inner) = Some(detail);
        })
        .build()?;

    if let Command::Subscribe { channel, params, count } = cli.command {
        return run_subscribe(&humtum, &channel, &params, count, &last_error).await;
    }
    let result = run_api(&humtum, cli.command).await?;
    print_result(result, &last_error)
}

async fn run_api(humtum: &HumTum, command: Command) -> Result<Option<Value>, CliError> {
    let result = match command {
        Command::Whoami => humtum.get_self().await,
        Command::UpdateSelf { name, avatar } => {
            let avatar = read_avatar(&avatar).await?;
            humtum.update_self(&name, avatar).await
        }
        Command::User(user) => match user.command {
            UserSubcommand::Read { user_id } => humtum.get_user(&user_id).await,
            UserSubcommand::Search { query } => humtum.search_users(&query).await,
        },
        Command::App(app) => run_app(humtum, app).await,
        Command::Message(message) => run_message(humtum, message).await?,
        Command::Rel { action, app_id, user_id } => {
            let (action, response) = action.request();
            humtum
                .relationship_request(&app_id, &user_id, action, response)
                .await
        }
        Command::Subscribe { .. } => None,
    };
    Ok(result)
}

async fn run_app(humtum: &HumTum, app: AppCommand) -> Option<Value> {
    match app.command {
        AppSubcommand::List => humtum.get_my_apps().await,
        AppSubcommand::Search { query, public } => humtum.search_apps(&query, !public).await,
        AppSubcommand::Enroll { app_id } => humtum.enroll_in_app(&app_id).await,
        AppSubcommand::Unenroll { app_id } => humtum.unenroll_from_app(&app_id).await,
        AppSubcommand::Data { app_id, path, query: None } => humtum.get_app_data(&app_id, &path).await,
        AppSubcommand::Data { app_id, path, query: Some(query) } => {
            humtum.search_app_data(&app_id, &path, &query).await
        }
        AppSubcommand::User { app_id, user_id } => humtum.get_app_user(&app_id, &user_id).await,
    }
}

async fn run_message(humtum: &HumTum, message: MessageCommand) -> Result<Option<Value>, CliError> {
    let result = match message.command {
        MessageSubcommand::List { unread } => humtum.get_message(MessageQuery { unread }).await,
        MessageSubcommand::Send { description, payload, targets } => {
            let payload = serde_json::from_str::<Value>(&payload)?;
            let message = NewMessage { description, payload, targets };
            humtum.create_message(&message).await
        }
        MessageSubcommand::Receive { message_id } => humtum.receive_message(&message_id).await,
    };
    Ok(result)
}

async fn run_subscribe(
    humtum: &HumTum,
    channel: &str,
    params: &[String],
    count: Option<usize>,
    last_error: &LastError,
) -> Result<(), CliError> {
    let params = params
        .iter()
        .map(|raw| parse_param(raw))
        .collect::<Result<Map<String, Value>, CliError>>()?;

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<Value>();
    let handlers = SubscriptionHandlers::new()
        .on_connected(|| tracing::info!("subscribed"))
        .on_disconnected(|| tracing::warn!("channel disconnected"))
        .on_received(move |message| {
            if tx.send(message).is_err() {
                tracing::debug!("dropping message after exit");
            }
        });

    let Some(subscription) = humtum.subscribe_to_channel(channel, handlers, Some(params)) else {
        return Err(CliError::Api(take_error(last_error)));
    };
    tracing::debug!(identifier = subscription.identifier(), "waiting for messages");

    let mut seen = 0usize;
    while count.is_none_or(|limit| seen < limit) {
        let message = rx.recv().await.ok_or(CliError::ChannelClosed)?;
        println!("{}", serde_json::to_string(&message)?);
        seen += 1;
    }
    Ok(())
}

fn print_result(result: Option<Value>, last_error: &LastError) -> Result<(), CliError> {
    let Some(value) = result else {
        return Err(CliError::Api(take_error(last_error)));
    };
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}

fn take_error(last_error: &LastError) -> String {
    last_error
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .take()
        .unwrap_or_else(|| "request failed".to_owned())
}

fn parse_param(raw: &str) -> Result<(String, Value), CliError> {
    let Some((key, value)) = raw.split_once('=') else {
        return Err(CliError::InvalidParam(raw.to_owned()));
    };
    if key.is_empty() {
        return Err(CliError::InvalidParam(raw.to_owned()));
    }
    Ok((key.to_owned(), Value::String(value.to_owned())))
}

async fn read_avatar(path: &str) -> Result<Avatar, CliError> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|source| CliError::ReadFile { path: path.to_owned(), source })?;
    let file_name = Path::new(path)
        .file_name()
        .map_or_else(|| "avatar".to_owned(), |name| name.to_string_lossy().into_owned());
    Ok(Avatar { content_type: content_type_for(&file_name).map(str::to_owned), file_name, bytes })
}

fn content_type_for(file_name: &str) -> Option<&'static str> {
    let extension = Path::new(file_name).extension()?.to_str()?.to_ascii_lowercase();
    match extension.as_str() {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "gif" => Some("image/gif"),
        "webp" => Some("image/webp"),
        _ => None,
    }
}

#[cfg(test)]
#[path = "main_test.rs"]
mod tests;

//! Command-line interface parsing and dispatch.
//!
//! The CLI is the crate's stand-in for a rendering layer: it reads
//! snapshots, prints them, and forwards user intents into [`crate::core`]
//! unmodified. Which surface a command may enter is always decided by
//! [`crate::core::access::decide`] against the settled session.

pub mod chat;
pub mod verify;

use std::error::Error;
use std::io::{self, Write};
use std::sync::Arc;

use clap::{Parser, Subcommand};

use crate::api::{ChatApi, ChatBackend};
use crate::auth::{CredentialStore, FirebaseAuth, IdentityProvider};
use crate::core::access::{decide, AccessDecision, RouteKind};
use crate::core::client::TokenedClient;
use crate::core::config::Config;
use crate::core::conversation::ConversationSync;
use crate::core::session::SessionStore;
use crate::utils::logging::LoggingState;

#[derive(Parser)]
#[command(name = "palaver")]
#[command(about = "A terminal chat client for account-gated AI chat services")]
#[command(
    long_about = "Palaver is a terminal chat client for hosted AI chat services that keep \
conversations behind a user account.\n\n\
Configuration:\n\
  Palaver reads config.toml from the platform config directory. The chat\n\
  service URL and the identity provider's web API key can also be supplied\n\
  via PALAVER_API_BASE_URL and PALAVER_IDENTITY_API_KEY.\n\n\
Commands inside the chat surface:\n\
  /list             List stored conversations\n\
  /open <n|id>      Open a conversation by list number or id\n\
  /new              Start a new conversation\n\
  /delete <n|id>    Delete a conversation\n\
  /log [file]       Enable or toggle transcript logging\n\
  /logout           Sign out\n\
  /quit             Leave the chat"
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Override the chat service base URL
    #[arg(short = 'b', long, global = true, value_name = "URL")]
    pub base_url: Option<String>,

    /// Enable transcript logging to the specified file
    #[arg(short = 'l', long, global = true, value_name = "FILE")]
    pub log: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Sign in with email and password, or via a federated provider
    Login {
        /// Sign in through the federated provider handoff page
        #[arg(long)]
        federated: bool,
    },
    /// Create a password account
    Signup,
    /// Sign out and discard the stored session
    Logout,
    /// Start the chat interface (default)
    Chat,
}

pub(crate) fn prompt(label: &str) -> Result<String, Box<dyn Error>> {
    print!("{label}");
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin().read_line(&mut line)?;
    Ok(line.trim_end_matches(['\n', '\r']).to_string())
}

pub async fn run() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();
    let config = Config::load()?;

    let api_key = config.resolve_identity_api_key().ok_or(
        "No identity API key configured. Set identity_api_key in the config file \
         or the PALAVER_IDENTITY_API_KEY environment variable.",
    )?;
    let base_url = args
        .base_url
        .clone()
        .or_else(|| config.resolve_api_base_url())
        .ok_or(
            "No chat service URL configured. Set api_base_url in the config file \
             or the PALAVER_API_BASE_URL environment variable.",
        )?;

    let http = reqwest::Client::new();
    let firebase = Arc::new(FirebaseAuth::new(
        http.clone(),
        api_key,
        config.federated_sign_in_url.clone(),
        CredentialStore::new(),
    ));
    let identity: Arc<dyn IdentityProvider> = firebase.clone();
    let mut sessions = SessionStore::start(identity.clone());

    let client = TokenedClient::new(http, &base_url, identity.clone());
    let backend: Arc<dyn ChatBackend> = Arc::new(ChatApi::new(client));

    let mut logging = LoggingState::new(args.log.clone().or_else(|| config.log_file.clone()));

    match args.command.unwrap_or(Commands::Chat) {
        Commands::Login { federated } => {
            login(&mut sessions, &firebase, &identity, &backend, federated).await
        }
        Commands::Signup => signup(&mut sessions, &identity, &backend).await,
        Commands::Logout => {
            identity.sign_out().await?;
            println!("Signed out.");
            Ok(())
        }
        Commands::Chat => open_chat(&mut sessions, &identity, &backend, &mut logging).await,
    }
}

async fn open_chat(
    sessions: &mut SessionStore,
    identity: &Arc<dyn IdentityProvider>,
    backend: &Arc<dyn ChatBackend>,
    logging: &mut LoggingState,
) -> Result<(), Box<dyn Error>> {
    loop {
        let session = sessions.settled().await;
        match decide(&session, RouteKind::Chat, false) {
            AccessDecision::Allow => {
                let mut sync = ConversationSync::new(backend.clone());
                return chat::run_chat(&mut sync, identity, logging).await;
            }
            AccessDecision::RedirectToVerify => {
                let verified =
                    verify::run_verify(identity.clone(), backend.clone(), session.email()).await?;
                if !verified {
                    return Ok(());
                }
                // The reload that proved verification also refreshes the
                // session; wait for the snapshot to catch up, then re-decide.
                let mut rx = sessions.subscribe();
                let _ = rx
                    .wait_for(|session| !session.loading && session.is_email_verified())
                    .await;
            }
            AccessDecision::RedirectToLogin => {
                println!("Not signed in. Run `palaver login` first.");
                return Ok(());
            }
            AccessDecision::ShowLoading | AccessDecision::RedirectToHome => {
                // Settled sessions are never loading, and the chat route is
                // home; neither decision can be produced here.
                return Ok(());
            }
        }
    }
}

async fn login(
    sessions: &mut SessionStore,
    firebase: &Arc<FirebaseAuth>,
    identity: &Arc<dyn IdentityProvider>,
    backend: &Arc<dyn ChatBackend>,
    federated: bool,
) -> Result<(), Box<dyn Error>> {
    let session = sessions.settled().await;
    match decide(&session, RouteKind::Login, false) {
        AccessDecision::RedirectToHome => {
            println!(
                "Already signed in as {}.",
                session.email().unwrap_or("an existing account")
            );
            return Ok(());
        }
        AccessDecision::RedirectToVerify => {
            verify::run_verify(identity.clone(), backend.clone(), session.email()).await?;
            return Ok(());
        }
        _ => {}
    }

    if federated {
        let redirect = identity.sign_in_with_federated_redirect().await?;
        println!("Open this page in your browser and finish signing in:");
        println!("  {}", redirect.auth_url);
        let credential = prompt("Paste the sign-in credential shown by the page: ")?;
        let user = firebase
            .sign_in_with_idp_credential("google.com", credential.trim())
            .await?;
        println!(
            "Signed in as {}.",
            user.email.as_deref().unwrap_or(user.uid.as_str())
        );
        return Ok(());
    }

    let email = prompt("Email: ")?;
    let password = prompt("Password: ")?;
    let user = identity
        .sign_in_with_password(email.trim(), password.trim())
        .await?;

    if user.has_password_provider() && !user.email_verified {
        // Nudge the mailbox again before routing to the verification surface.
        if let Err(err) = identity.send_verification_email().await {
            tracing::warn!("could not resend verification email: {err}");
        }
        println!("Your email is not verified yet. A new verification email has been sent.");
        verify::run_verify(identity.clone(), backend.clone(), user.email.as_deref()).await?;
        return Ok(());
    }

    println!(
        "Signed in as {}.",
        user.email.as_deref().unwrap_or(user.uid.as_str())
    );
    Ok(())
}

async fn signup(
    sessions: &mut SessionStore,
    identity: &Arc<dyn IdentityProvider>,
    backend: &Arc<dyn ChatBackend>,
) -> Result<(), Box<dyn Error>> {
    let session = sessions.settled().await;
    if decide(&session, RouteKind::Login, false) == AccessDecision::RedirectToHome {
        println!(
            "Already signed in as {}. Sign out first to create another account.",
            session.email().unwrap_or("an existing account")
        );
        return Ok(());
    }

    let email = prompt("Email: ")?;
    let password = prompt("Password: ")?;
    let user = identity
        .sign_up_with_password(email.trim(), password.trim())
        .await?;
    if let Err(err) = identity.send_verification_email().await {
        tracing::warn!("could not send verification email: {err}");
    }
    println!("Account created! A verification email has been sent.");
    verify::run_verify(identity.clone(), backend.clone(), user.email.as_deref()).await?;
    Ok(())
}

use std::path::PathBuf;

use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};

use roadlink_auth::{
    GuardDecision, Restoration, Session, SignInForm, SignUpForm, SignedUp, post_sign_in_target,
};
use roadlink_client::Client;
use roadlink_core::Language;
use roadlink_onboarding::{DriverProfileForm, Submission};

const PASSWORD_ENV: &str = "ROADLINK_PASSWORD";

#[derive(Parser)]
#[command(name = "roadlink")]
#[command(about = "Roadlink client session tools", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the persisted session
    Status,

    /// Sign in with email and password
    SignIn {
        #[arg(long)]
        email: String,
        /// Password (defaults to $ROADLINK_PASSWORD)
        #[arg(long)]
        password: Option<String>,
        /// Path that sent the user to sign-in
        #[arg(long)]
        redirect: Option<String>,
    },

    /// Create a customer account
    SignUp {
        #[arg(long)]
        email: String,
        /// Password (defaults to $ROADLINK_PASSWORD)
        #[arg(long)]
        password: Option<String>,
    },

    /// Sign out and forget the persisted credential
    SignOut,

    /// Decide whether the current session may open a path
    Check { path: String },

    /// Show or set the interface language
    Lang {
        /// `en` or `ar`; omit to show the current choice
        language: Option<String>,
        /// Forget the stored choice
        #[arg(long)]
        reset: bool,
    },

    /// Submit a driver profile from a JSON file
    Onboard {
        #[arg(long)]
        form: PathBuf,
    },

    /// Follow session changes until interrupted
    Watch,
}

#[tokio::main]
async fn main() -> Result<()> {
    roadlink_observability::init();

    let cli = Cli::parse();
    let client = Client::from_env().context("failed to configure client")?;

    match cli.command {
        Commands::Status => {
            report_restoration(client.auth.restore().await);
            print_session(&client.store().snapshot());
            let lang = client.language.load();
            println!("language: {lang} ({})", lang.direction().as_str());
        }

        Commands::SignIn {
            email,
            password,
            redirect,
        } => {
            let form = SignInForm {
                email,
                password: password_or_env(password)?,
            };
            let signed_in = client.auth.sign_in(&form).await?;
            if signed_in.role.is_fallback() {
                println!("note: role unavailable, using {}", signed_in.session.role);
            }
            print_session(&client.store().snapshot());
            println!("continue to {}", post_sign_in_target(redirect.as_deref()));
        }

        Commands::SignUp { email, password } => {
            let password = password_or_env(password)?;
            let form = SignUpForm {
                email,
                confirm_password: password.clone(),
                password,
            };
            match client.auth.sign_up(&form).await? {
                SignedUp::SignedIn(_) => print_session(&client.store().snapshot()),
                SignedUp::ConfirmationRequired { email } => {
                    println!("check {email} for a confirmation link");
                }
            }
        }

        Commands::SignOut => {
            report_restoration(client.auth.restore().await);
            client.auth.sign_out().await?;
            println!("signed out");
        }

        Commands::Check { path } => {
            report_restoration(client.auth.restore().await);
            match client.guard.check_store(&path, client.store()) {
                GuardDecision::Allow => println!("allow {path}"),
                GuardDecision::Redirect(r) => println!("redirect {}", r.location()),
            }
        }

        Commands::Lang { language, reset } => {
            if reset {
                client.language.reset()?;
            } else if let Some(raw) = language {
                let lang: Language = raw.parse()?;
                client.language.set(lang)?;
            }
            let lang = client.language.load();
            println!("{lang} ({})", lang.direction().as_str());
        }

        Commands::Onboard { form } => {
            let raw = std::fs::read_to_string(&form)
                .with_context(|| format!("failed to read {}", form.display()))?;
            let form: DriverProfileForm =
                serde_json::from_str(&raw).context("driver profile is not valid JSON")?;

            let today = chrono::Local::now().date_naive();
            match client.onboarding.submit(&form, today).await? {
                Submission::Registered(record) => {
                    println!("driver registered: {}", record.user_id);
                }
                Submission::AwaitingConfirmation { email } => {
                    println!("check {email} for a confirmation link, then submit again");
                }
            }
        }

        Commands::Watch => {
            let mut changes = client.store().subscribe();
            let mut listener = client.auth.start_listener();
            report_restoration(client.auth.restore().await);
            let mut refresher = client.auth.start_refresher();
            print_session(&changes.borrow_and_update());

            loop {
                tokio::select! {
                    changed = changes.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        print_session(&changes.borrow_and_update());
                    }
                    _ = tokio::signal::ctrl_c() => break,
                }
            }
            refresher.shutdown().await;
            listener.shutdown().await;
        }
    }

    Ok(())
}

fn password_or_env(password: Option<String>) -> Result<String> {
    password
        .or_else(|| std::env::var(PASSWORD_ENV).ok())
        .ok_or_else(|| anyhow!("pass --password or set {PASSWORD_ENV}"))
}

fn report_restoration(outcome: Restoration) {
    match outcome {
        Restoration::Rejected(err) => eprintln!("stored session discarded: {err}"),
        Restoration::Restored(resolution) if resolution.is_fallback() => {
            eprintln!("role unavailable; continuing as {}", resolution.role());
        }
        _ => {}
    }
}

fn print_session(session: &Session) {
    match session.authenticated() {
        Some(s) => println!(
            "signed in as {} ({}), role {}",
            s.identity.email, s.identity.user_id, s.role
        ),
        None => println!("signed out"),
    }
}

//! Snipvault CLI - password-protected snippets
//!
//! Seals and opens standalone blob files, and manages a local snippet store
//! whose protected entries are sealed with scrypt and NaCl secretbox.

use clap::{Parser, Subcommand};
use std::error::Error as StdError;
use std::io;
use std::path::{Path, PathBuf};
use std::process;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use snipvault::controller::{
    AlwaysConfirm, Confirm, Controller, NeverConfirm, OpenOutcome, Protection, SaveOutcome,
    SaveRequest, Selection, Unlock,
};
use snipvault::editor::{BufferEditor, Editor};
use snipvault::error::{ErrorKind, Result, VaultError};
use snipvault::file_ops;
use snipvault::password::{LinePasswordPrompt, Password, PasswordPrompt, TerminalPasswordPrompt};
use snipvault::secretcrypt::{KdfParams, MAX_LOG_N, MIN_SEAL_LOG_N};
use snipvault::store::{Credential, FileStore, SnippetId};

#[derive(Parser)]
#[command(name = "snipvault")]
#[command(version)]
#[command(about = "Password-protected text snippets.", long_about = None)]
struct Cli {
    /// Read passwords from stdin, one per line, instead of from the terminal
    #[arg(long, global = true)]
    password_stdin: bool,

    /// Path to the snippet store
    #[arg(long, global = true, env = "SNIPVAULT_STORE", default_value = "snippets.json")]
    store: PathBuf,

    /// Credential presented to the snippet store
    #[arg(
        long,
        global = true,
        env = "SNIPVAULT_TOKEN",
        default_value = "local",
        hide_env_values = true
    )]
    token: String,

    /// scrypt cost exponent for new seals (N = 2^log_n)
    #[arg(
        long,
        global = true,
        env = "SNIPVAULT_KDF_LOG_N",
        default_value_t = KdfParams::DEFAULT.log_n,
        value_parser = clap::value_parser!(u8).range(i64::from(MIN_SEAL_LOG_N)..=i64::from(MAX_LOG_N)),
        hide = true
    )]
    kdf_log_n: u8,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, global = true, env = "SNIPVAULT_LOG", default_value = "warn")]
    log_level: tracing::Level,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Seal a text file into a blob file
    #[command(alias = "e")]
    Seal {
        /// Path to the text file to seal
        #[arg(short, long, value_name = "FILE")]
        input: PathBuf,

        /// Path to the file to write the blob to
        #[arg(short, long, value_name = "FILE")]
        output: PathBuf,
    },

    /// Open a blob file
    #[command(alias = "d")]
    Open {
        /// Path to the blob file
        #[arg(short, long, value_name = "FILE")]
        input: PathBuf,

        /// Path to the file to write the text to
        #[arg(short, long, value_name = "FILE")]
        output: PathBuf,
    },

    /// Replace a blob file with new content, while validating
    /// that the password is not accidentally changed.
    Reseal {
        /// Path to the new text
        #[arg(short, long, value_name = "FILE")]
        input: PathBuf,

        /// Path to the existing blob file
        #[arg(short, long, value_name = "FILE")]
        output: PathBuf,
    },

    /// Save a text file as a named snippet
    Save {
        #[arg(short, long)]
        name: String,

        /// Path to the snippet text
        #[arg(short, long, value_name = "FILE")]
        input: PathBuf,

        #[arg(short, long)]
        language: Option<String>,

        /// Seal the snippet with a password (asked twice)
        #[arg(long)]
        protect: bool,

        /// Overwrite an existing snippet with the same name
        #[arg(short, long)]
        yes: bool,
    },

    /// Write a snippet's text to a file, asking for its password if protected
    Show {
        #[arg(short, long)]
        name: String,

        /// Path to the file to write the text to
        #[arg(short, long, value_name = "FILE")]
        output: PathBuf,
    },

    /// Replace a snippet's text; protected snippets keep their password
    Update {
        #[arg(short, long)]
        name: String,

        /// Path to the new text
        #[arg(short, long, value_name = "FILE")]
        input: PathBuf,
    },

    /// List stored snippets
    #[command(alias = "ls")]
    List,

    /// Delete a snippet
    Delete {
        #[arg(short, long)]
        name: String,

        /// Do not ask; required when stdin is not interactive
        #[arg(short, long)]
        yes: bool,
    },
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.log_level);

    if let Err(e) = run(cli) {
        eprintln!("Error: {}", render_error(&e));
        process::exit(1);
    }
}

fn init_logging(log_level: tracing::Level) {
    let env_filter = EnvFilter::builder()
        .with_default_directive(log_level.into())
        .from_env_lossy();

    let stderr_layer = tracing_subscriber::fmt::layer()
        .compact()
        .with_writer(io::stderr)
        .with_filter(env_filter);

    tracing_subscriber::registry().with(stderr_layer).init();
}

fn run(cli: Cli) -> Result<()> {
    let kdf = KdfParams::new(cli.kdf_log_n, KdfParams::DEFAULT.r, KdfParams::DEFAULT.p)?;
    let mut prompt = get_password_prompt(cli.password_stdin);

    match cli.command {
        Commands::Seal { input, output } => {
            let password = require_password(&mut *prompt, "Password")?;
            file_ops::seal_file(&input, &output, &password, &kdf)
        }
        Commands::Open { input, output } => {
            let password = require_password(&mut *prompt, "Password")?;
            file_ops::open_file(&input, &output, &password, &kdf)
        }
        Commands::Reseal { input, output } => {
            let password = require_password(&mut *prompt, "Password")?;
            file_ops::reseal_file(&input, &output, &password, &kdf)
        }
        Commands::Save {
            name,
            input,
            language,
            protect,
            yes,
        } => {
            let text = file_ops::read_text(&input)?;
            let mut controller = open_controller(&cli.store, &cli.token, kdf)?;
            controller.editor_mut().set_text(&text)?;

            let protection = if protect {
                Protection::Password {
                    password: require_password(&mut *prompt, "Password")?,
                    confirmation: require_password(&mut *prompt, "Confirm password")?,
                }
            } else {
                Protection::None
            };
            let request = SaveRequest {
                name: name.clone(),
                language,
                protection,
            };
            match controller.save(request, &mut *confirmer(yes))? {
                SaveOutcome::Saved { id, protected } => {
                    let kind = if protected { "protected" } else { "plain" };
                    println!("saved {} snippet {:?} ({})", kind, name, id);
                    Ok(())
                }
                SaveOutcome::Declined => Err(VaultError::invalid_input(
                    ErrorKind::Conflict,
                    format!("snippet {:?} already exists; pass --yes to overwrite it", name),
                )),
                SaveOutcome::Cancelled => {
                    Err(VaultError::invalid_input(ErrorKind::Io, "save cancelled"))
                }
            }
        }
        Commands::Show { name, output } => {
            let mut controller = open_controller(&cli.store, &cli.token, kdf)?;
            let id = lookup(&controller, &name)?;
            match controller.open_with_prompt(id, &mut *prompt, &mut NeverConfirm)? {
                OpenOutcome::Loaded(_) | OpenOutcome::Unlocked(_) => {
                    let text = controller.editor().get_text()?;
                    file_ops::write_file_secure(&output, text.as_bytes())
                }
                OpenOutcome::Cancelled | OpenOutcome::Declined => Err(VaultError::wrong_key()),
            }
        }
        Commands::Update { name, input } => {
            let text = file_ops::read_text(&input)?;
            let mut controller = open_controller(&cli.store, &cli.token, kdf)?;
            let id = lookup(&controller, &name)?;
            update_snippet(&mut controller, id, &name, &text, &mut *prompt)
        }
        Commands::List => {
            let controller = open_controller(&cli.store, &cli.token, kdf)?;
            for summary in controller.list()? {
                println!(
                    "{}\t{}\t{}\t{}",
                    if summary.protected { "locked" } else { "plain" },
                    summary.updated_at.format("%Y-%m-%d %H:%M"),
                    summary.language,
                    summary.name
                );
            }
            Ok(())
        }
        Commands::Delete { name, yes } => {
            let mut controller = open_controller(&cli.store, &cli.token, kdf)?;
            let id = lookup(&controller, &name)?;
            if !controller.delete(id, &mut *confirmer(yes))? {
                return Err(VaultError::invalid_input(
                    ErrorKind::Io,
                    "not deleted; pass --yes to confirm",
                ));
            }
            println!("deleted snippet {:?}", name);
            Ok(())
        }
    }
}

/// Protected snippets are unlocked with one password and re-sealed with it,
/// so an update never changes the password.
fn update_snippet(
    controller: &mut Controller<FileStore, BufferEditor>,
    id: SnippetId,
    name: &str,
    text: &str,
    prompt: &mut dyn PasswordPrompt,
) -> Result<()> {
    match controller.select(id, &mut NeverConfirm)? {
        Selection::Loaded(_) => {
            controller.editor_mut().set_text(text)?;
            controller.mark_edited();
            let request = SaveRequest {
                name: name.to_string(),
                language: None,
                protection: Protection::None,
            };
            controller.save(request, &mut NeverConfirm)?;
        }
        Selection::Locked(_) => {
            let password = require_password(prompt, "Password")?;
            if controller.unlock(password)? == Unlock::WrongKey {
                return Err(VaultError::wrong_key());
            }
            controller.editor_mut().set_text(text)?;
            controller.mark_edited();
            controller.reseal()?;
        }
        Selection::Declined => {}
    }
    println!("updated snippet {:?}", name);
    Ok(())
}

fn open_controller(
    store_path: &Path,
    token: &str,
    kdf: KdfParams,
) -> Result<Controller<FileStore, BufferEditor>> {
    let credential = Credential::new(token);
    let store = FileStore::open(store_path, credential.clone())?;
    Ok(Controller::new(store, BufferEditor::new(), credential).with_kdf(kdf))
}

fn lookup(controller: &Controller<FileStore, BufferEditor>, name: &str) -> Result<SnippetId> {
    controller
        .find_by_name(name)?
        .map(|summary| summary.id)
        .ok_or_else(|| {
            VaultError::invalid_input(ErrorKind::NotFound, format!("no snippet named {:?}", name))
        })
}

fn require_password(prompt: &mut dyn PasswordPrompt, label: &str) -> Result<Password> {
    prompt.prompt(label)?.ok_or_else(|| {
        VaultError::invalid_input(ErrorKind::PasswordUnavailable, "no password given")
    })
}

fn confirmer(yes: bool) -> Box<dyn Confirm> {
    if yes {
        Box::new(AlwaysConfirm)
    } else {
        Box::new(NeverConfirm)
    }
}

fn get_password_prompt(use_stdin: bool) -> Box<dyn PasswordPrompt> {
    if use_stdin {
        Box::new(LinePasswordPrompt::new(Box::new(io::stdin().lock())))
    } else {
        Box::new(TerminalPasswordPrompt::new())
    }
}

/// The message followed by its causes, e.g. "failed to save snippet: ...".
fn render_error(err: &VaultError) -> String {
    let mut rendered = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        rendered.push_str(": ");
        rendered.push_str(&cause.to_string());
        source = cause.source();
    }
    rendered
}

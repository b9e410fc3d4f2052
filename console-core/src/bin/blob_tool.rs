use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use console_core::config::transport_key;
use console_core::security::{CredentialBlob, CredentialCipher, IvMode, TransportCipher};

/// Encrypt or inspect credential blobs by hand.
#[derive(Parser)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Passphrase (falls back to WALLET_PASSWORD)
    #[arg(short, long, global = true)]
    password: Option<String>,

    /// Use the transport key instead of the operator passphrase
    #[arg(long, global = true)]
    transport: bool,

    /// IV mode for passphrase blobs; transport blobs always use the fixed IV
    #[arg(long, value_enum, default_value_t = Mode::Fixed, global = true)]
    iv: Mode,
}

#[derive(Subcommand)]
enum Command {
    /// Single-layer encrypt
    Encrypt { text: String },
    /// Single-layer decrypt
    Decrypt { blob: String },
    /// Two-layer at-rest seal
    Seal { text: String },
    /// Open a two-layer seal
    Open { blob: String },
}

#[derive(Clone, Copy, ValueEnum)]
enum Mode {
    Fixed,
    Random,
}

impl From<Mode> for IvMode {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::Fixed => IvMode::Fixed,
            Mode::Random => IvMode::Random,
        }
    }
}

fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let args = Args::parse();
    let cipher = CredentialCipher::new(args.iv.into());

    if args.transport {
        let transport = TransportCipher::new(transport_key());
        match args.command {
            Command::Encrypt { text } => println!("{}", transport.encrypt(&text)),
            Command::Decrypt { blob } => {
                let plain = transport
                    .decrypt(&CredentialBlob::new(blob))
                    .context("decryption failed")?;
                println!("{}", plain);
            }
            Command::Seal { .. } | Command::Open { .. } => {
                anyhow::bail!("seal/open use the operator passphrase, drop --transport")
            }
        }
        return Ok(());
    }

    let password = args
        .password
        .or_else(|| std::env::var("WALLET_PASSWORD").ok())
        .context("Password not provided (--password or WALLET_PASSWORD)")?;

    match args.command {
        Command::Encrypt { text } => println!("{}", cipher.encrypt(&text, &password)),
        Command::Seal { text } => println!("{}", cipher.seal(&text, &password)),
        Command::Decrypt { blob } => {
            let plain = cipher
                .decrypt(&CredentialBlob::new(blob), &password)
                .context("decryption failed")?;
            println!("{}", plain);
        }
        Command::Open { blob } => {
            let plain = cipher
                .open(&CredentialBlob::new(blob), &password)
                .context("decryption failed")?;
            println!("{}", plain);
        }
    }

    Ok(())
}

//! Murmur command-line tools.
//!
//! # Usage
//!
//! ```bash
//! # Pick a PBKDF2 iteration count costing about one second on this machine
//! murmur calibrate --target-ms 1000
//!
//! # Seal and reopen a file under a password
//! MURMUR_PASSWORD=hunter2 murmur seal --input notes.txt --output notes.sealed
//! MURMUR_PASSWORD=hunter2 murmur open --input notes.sealed --output notes.txt
//!
//! # Exchange messages between two simulated contacts through a directory
//! murmur simulate --dir /tmp/murmur --messages 50 --message-size 512
//! ```

#![allow(clippy::print_stdout, reason = "Command output goes to stdout")]

use std::{fs, path::PathBuf, sync::Arc};

use clap::{Parser, Subcommand};
use murmur_crypto::{CryptoConfig, CryptoEngine, Role, SecureRandom, derive_master_secret};
use murmur_sync::{
    IncomingSimplexConnection, MemorySyncStorage, OutgoingSimplexConnection, ReadOutcome,
    WriteOutcome,
};
use murmur_transport::{
    ContactId, FilePlugin, FilePluginConfig, MemoryTagRecogniser, SimplexPlugin, TransportIndex,
};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};
use zeroize::Zeroizing;

/// Murmur transport security tools
#[derive(Parser, Debug)]
#[command(name = "murmur")]
#[command(about = "Murmur transport security tools")]
#[command(version)]
struct Args {
    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Calibrate the password key derivation cost
    Calibrate {
        /// Target cost in milliseconds
        #[arg(long, default_value = "500")]
        target_ms: u64,
    },

    /// Encrypt a file under a password
    Seal {
        /// Plaintext file
        #[arg(short, long)]
        input: PathBuf,

        /// Sealed output file
        #[arg(short, long)]
        output: PathBuf,

        /// Password
        #[arg(long, env = "MURMUR_PASSWORD", hide_env_values = true)]
        password: Zeroizing<String>,

        /// Key derivation cost in milliseconds
        #[arg(long, default_value = "500")]
        target_ms: u64,
    },

    /// Decrypt a sealed file
    Open {
        /// Sealed file
        #[arg(short, long)]
        input: PathBuf,

        /// Plaintext output file
        #[arg(short, long)]
        output: PathBuf,

        /// Password
        #[arg(long, env = "MURMUR_PASSWORD", hide_env_values = true)]
        password: Zeroizing<String>,
    },

    /// Send messages between two simulated contacts over a directory
    Simulate {
        /// Directory standing in for the shared medium
        #[arg(long)]
        dir: PathBuf,

        /// Messages to send
        #[arg(long, default_value = "20")]
        messages: usize,

        /// Size of each message in bytes
        #[arg(long, default_value = "256")]
        message_size: usize,

        /// Bytes each connection file may carry
        #[arg(long, default_value = "65536")]
        capacity: u64,
    },
}

const ALICE: ContactId = ContactId(1);
const BOB: ContactId = ContactId(2);
const TRANSPORT: TransportIndex = TransportIndex(0);

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    match args.command {
        Command::Calibrate { target_ms } => {
            let engine = engine(CryptoConfig::default());
            let iterations = engine.choose_iteration_count(target_ms);
            tracing::info!(target_ms, iterations, "calibrated");
            println!("{iterations}");
        },
        Command::Seal { input, output, password, target_ms } => {
            let engine = engine(CryptoConfig { pbkdf_target_millis: target_ms, ..Default::default() });
            let plaintext = fs::read(&input)?;
            let sealed = engine.encrypt_with_password(&plaintext, &password)?;
            fs::write(&output, &sealed)?;
            println!("sealed {} bytes into {}", plaintext.len(), output.display());
        },
        Command::Open { input, output, password } => {
            let engine = engine(CryptoConfig::default());
            let sealed = fs::read(&input)?;
            let plaintext = engine
                .decrypt_with_password(&sealed, &password)
                .ok_or("wrong password or corrupted data")?;
            fs::write(&output, &plaintext)?;
            println!("opened {} bytes into {}", plaintext.len(), output.display());
        },
        Command::Simulate { dir, messages, message_size, capacity } => {
            simulate(dir, messages, message_size, capacity)?;
        },
    }

    Ok(())
}

fn engine(config: CryptoConfig) -> CryptoEngine {
    CryptoEngine::new(Arc::new(SecureRandom::from_platform()), config)
}

/// Alice and Bob agree a root secret, Alice queues messages, and connection
/// files carry them to Bob until Alice's queue is empty. Bob then answers with
/// one connection of acks.
fn simulate(
    dir: PathBuf,
    messages: usize,
    message_size: usize,
    capacity: u64,
) -> Result<(), Box<dyn std::error::Error>> {
    let engine = engine(CryptoConfig::default());

    let alice_keys = engine.generate_agreement_key_pair();
    let bob_keys = engine.generate_agreement_key_pair();
    let alice_root = derive_master_secret(bob_keys.public_key_bytes(), &alice_keys, true)?;
    let bob_root = derive_master_secret(alice_keys.public_key_bytes(), &bob_keys, false)?;
    if alice_root != bob_root {
        return Err("key agreement produced different secrets".into());
    }

    let alice = MemorySyncStorage::new();
    alice.add_contact(BOB, &alice_root, Role::Alice, &[TRANSPORT])?;
    let alice_recogniser = MemoryTagRecogniser::new();
    alice.expect_incoming(&alice_recogniser)?;

    let bob = MemorySyncStorage::new();
    bob.add_contact(ALICE, &bob_root, Role::Bob, &[TRANSPORT])?;
    let bob_recogniser = MemoryTagRecogniser::new();
    bob.expect_incoming(&bob_recogniser)?;

    for _ in 0..messages {
        let mut message = vec![0u8; message_size];
        engine.random().fill_bytes(&mut message);
        alice.queue_message(BOB, message)?;
    }

    let plugin = FilePlugin::new(FilePluginConfig { capacity, ..FilePluginConfig::new(&dir) });
    plugin.start()?;

    let mut connections = 0;
    while alice.queued_messages(BOB) > 0 {
        let Some(mut writer) = plugin.create_writer(BOB)? else {
            return Err("file transport is not running".into());
        };
        let outcome =
            OutgoingSimplexConnection::new(&alice, writer.as_mut(), BOB, TRANSPORT).write()?;
        match outcome {
            WriteOutcome::Completed { records_written: 0, .. } => {
                return Err("message too large for one connection".into());
            },
            WriteOutcome::Completed { bytes_written, records_written } => {
                connections += 1;
                println!("alice -> bob: {records_written} records in {bytes_written} bytes");
            },
            WriteOutcome::Aborted(reason) => {
                return Err(format!("connection aborted: {reason:?}").into());
            },
        }
    }

    let received = read_all(&plugin, &bob_recogniser, &bob)?;
    println!(
        "bob read {received} of {connections} connections, {} messages",
        bob.received_messages(ALICE).len()
    );

    let Some(mut writer) = plugin.create_writer(ALICE)? else {
        return Err("file transport is not running".into());
    };
    OutgoingSimplexConnection::new(&bob, writer.as_mut(), ALICE, TRANSPORT).write()?;
    read_all(&plugin, &alice_recogniser, &alice)?;
    println!("alice has {} batches awaiting acks", alice.outstanding_batches(BOB));

    plugin.stop()?;
    Ok(())
}

/// Read every connection file addressed to the owner of `recogniser`.
fn read_all(
    plugin: &FilePlugin,
    recogniser: &MemoryTagRecogniser,
    storage: &MemorySyncStorage,
) -> Result<usize, Box<dyn std::error::Error>> {
    let mut read = 0;
    for mut reader in plugin.poll()? {
        let outcome = IncomingSimplexConnection::new(recogniser, storage, reader.as_mut()).read()?;
        if let ReadOutcome::Completed { contact, records_read } = outcome {
            tracing::debug!(%contact, records_read, "connection file read");
            read += 1;
        }
    }
    Ok(read)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn password_is_held_in_erasing_buffer() {
        let args = Args::try_parse_from([
            "murmur",
            "open",
            "--input",
            "notes.sealed",
            "--output",
            "notes.txt",
            "--password",
            "hunter2",
        ])
        .unwrap();

        let Command::Open { password, .. } = args.command else {
            panic!("expected the open command");
        };
        let password: Zeroizing<String> = password;
        assert_eq!(password.as_str(), "hunter2");
    }
}

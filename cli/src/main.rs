//! Command-line front end for `pivcard`: enumerate readers, inspect a
//! token's slot catalog, sign data through a slot, and seal/unseal ECDH box
//! envelopes.

use std::{
    fs,
    io::{self, Read, Write},
    path::PathBuf,
};

use clap::{Parser, Subcommand};
use log::error;
use pivcard::{
    ecdh_box,
    piv::{AlgorithmId, SlotId},
    reader, Error, ErrorKind, Result, YubiKey,
};
use termcolor::{ColorChoice, ColorSpec, StandardStream, WriteColor};

#[derive(Parser)]
#[command(name = "pivcard", about = "PIV smartcard and ECDH box utility")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List attached readers and their PIV tokens.
    List,
    /// Print the slot catalog of a single token.
    Slots {
        /// GUID prefix (hex) identifying the token; first token if omitted.
        #[arg(long)]
        guid: Option<String>,
    },
    /// Sign `data` (read from stdin if `--data` is omitted) through a slot.
    Sign {
        #[arg(long)]
        guid: Option<String>,
        #[arg(long, value_parser = parse_slot)]
        slot: SlotId,
        #[arg(long, value_parser = parse_algorithm)]
        algorithm: AlgorithmId,
        #[arg(long)]
        data: Option<String>,
    },
    /// Seal stdin to a token's public key, writing the box to stdout.
    Seal {
        #[arg(long)]
        guid: Option<String>,
        #[arg(long, value_parser = parse_slot, default_value = "9d")]
        slot: SlotId,
        #[arg(long, default_value = "chacha20-poly1305")]
        cipher: String,
        #[arg(long, default_value = "sha512")]
        kdf: String,
    },
    /// Unseal a box file through the holding token, writing plaintext to
    /// stdout.
    Unseal {
        /// Path to the encoded box.
        #[arg(long)]
        input: PathBuf,
    },
}

fn parse_slot(s: &str) -> Result<SlotId> {
    let byte = u8::from_str_radix(s.trim_start_matches("0x"), 16)
        .map_err(|_| Error::new(ErrorKind::ArgumentError))?;
    SlotId::from_byte(byte)
}

fn parse_algorithm(s: &str) -> Result<AlgorithmId> {
    match s {
        "rsa1024" => Ok(AlgorithmId::Rsa1024),
        "rsa2048" => Ok(AlgorithmId::Rsa2048),
        "eccp256" => Ok(AlgorithmId::EccP256),
        "eccp384" => Ok(AlgorithmId::EccP384),
        _ => Err(Error::new(ErrorKind::ArgumentError)),
    }
}

fn parse_guid_prefix(guid: &Option<String>) -> Result<Vec<u8>> {
    let Some(hex_str) = guid else {
        return Ok(Vec::new());
    };
    decode_hex(hex_str)
}

fn open_token(guid: &Option<String>) -> Result<YubiKey> {
    let prefix = parse_guid_prefix(guid)?;
    reader::find_by_guid(&prefix)
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let cli = Cli::parse();
    if let Err(e) = run(cli) {
        error!("{e}");
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::List => cmd_list(),
        Command::Slots { guid } => cmd_slots(&guid),
        Command::Sign { guid, slot, algorithm, data } => cmd_sign(&guid, slot, algorithm, data),
        Command::Seal { guid, slot, cipher, kdf } => cmd_seal(&guid, slot, cipher, kdf),
        Command::Unseal { input } => cmd_unseal(&input),
    }
}

fn cmd_list() -> Result<()> {
    let mut stdout = StandardStream::stdout(ColorChoice::Auto);
    for token in reader::enumerate()? {
        stdout.set_color(ColorSpec::new().set_bold(true))?;
        write!(stdout, "{}", token.reader_name())?;
        stdout.reset()?;
        let guid = token
            .guid()
            .map(|g| hex_string(&g))
            .unwrap_or_else(|| "-".to_owned());
        let serial = token
            .serial()
            .map(|s| s.to_string())
            .unwrap_or_else(|| "-".to_owned());
        writeln!(stdout, "  guid={guid} serial={serial} ykpiv={}", token.is_ykpiv())?;
    }
    Ok(())
}

fn cmd_slots(guid: &Option<String>) -> Result<()> {
    let mut token = open_token(guid)?;
    let slots = token.read_all_certs()?;
    for slot in slots {
        println!(
            "{:?} algorithm={:?} subject={} pin={} touch={}",
            slot.id,
            slot.algorithm,
            slot.subject.as_deref().unwrap_or("-"),
            slot.auth.pin,
            slot.auth.touch,
        );
    }
    Ok(())
}

fn cmd_sign(guid: &Option<String>, slot: SlotId, algorithm: AlgorithmId, data: Option<String>) -> Result<()> {
    let mut token = open_token(guid)?;
    let data = match data {
        Some(s) => s.into_bytes(),
        None => {
            let mut buf = Vec::new();
            io::stdin().read_to_end(&mut buf)?;
            buf
        }
    };
    let mut hash_alg = None;
    let signature = token.sign(slot, algorithm, &data, &mut hash_alg)?;
    println!("{}", hex_string(&signature));
    Ok(())
}

fn cmd_seal(guid: &Option<String>, slot: SlotId, cipher: String, kdf: String) -> Result<()> {
    let mut token = open_token(guid)?;
    let mut plaintext = Vec::new();
    io::stdin().read_to_end(&mut plaintext)?;

    let opts = ecdh_box::SealOptions {
        cipher_name: cipher,
        kdf_name: kdf,
        ..ecdh_box::SealOptions::default()
    };
    let sealed = ecdh_box::seal_to_token(&mut token, slot, &plaintext, &opts)?;
    let encoded = ecdh_box::encode_auto(&sealed)?;
    io::stdout().write_all(&encoded)?;
    Ok(())
}

fn cmd_unseal(input: &PathBuf) -> Result<()> {
    let buf = fs::read(input)?;
    let sealed = ecdh_box::decode(&buf)?;

    let mut tokens = reader::enumerate()?;
    let idx = ecdh_box::find_recipient_token(&mut tokens, &sealed)?;
    let slot = sealed.slot.unwrap_or(SlotId::KeyManagement);
    let algorithm = ecdh_box::algorithm_for_curve(sealed.recipient.curve);
    let plaintext = ecdh_box::open_online(&mut tokens[idx], &sealed, slot, algorithm)?;

    io::stdout().write_all(&plaintext)?;
    Ok(())
}

fn decode_hex(s: &str) -> Result<Vec<u8>> {
    hex::mixed::decode_vec(s).map_err(|_| Error::new(ErrorKind::ArgumentError))
}

fn hex_string(bytes: &[u8]) -> String {
    hex::lower::encode_string(bytes)
}

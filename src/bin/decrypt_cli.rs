use std::io::Read;
use std::sync::Arc;
use std::time::Duration;
use anyhow::{bail, Context, Result};
use paysys::network::crypt::{parse_hex_key, CipherKey};
use paysys::network::governor::Governor;
use paysys::network::throttle::BreakerLimits;
use paysys::resolver::learned::LearnedKeyStore;
use paysys::resolver::KeyResolver;
use paysys::servers::paysys::credentials;
use paysys::servers::paysys::packet::decode;

const USAGE: &str =
    "Usage: decrypt_cli [--key HEX]... [--learned FILE [--user NAME]] [--deadline-ms N] [FRAME_HEX | -]";

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_ansi(std::io::IsTerminal::is_terminal(&std::io::stderr()))
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let mut extra_keys: Vec<CipherKey> = Vec::new();
    let mut claimed: Option<String> = None;
    let mut learned_path: Option<String> = None;
    let mut deadline_ms: u64 = 5000;
    let mut frame_hex: Option<String> = None;

    let args: Vec<String> = std::env::args().collect();
    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--help" | "--h" | "--?" | "/?" => {
                println!("{}", USAGE);
                return Ok(());
            }
            "--key" | "--user" | "--learned" | "--deadline-ms" if i + 1 >= args.len() => {
                bail!("{} requires an argument", args[i]);
            }
            "--key" => {
                i += 1;
                let key = parse_hex_key(&args[i]).with_context(|| format!("invalid key: {}", args[i]))?;
                extra_keys.push(key);
            }
            "--user" => {
                i += 1;
                claimed = Some(args[i].clone());
            }
            "--learned" => {
                i += 1;
                learned_path = Some(args[i].clone());
            }
            "--deadline-ms" => {
                i += 1;
                deadline_ms = args[i].parse().with_context(|| format!("invalid deadline: {}", args[i]))?;
            }
            other => frame_hex = Some(other.to_string()),
        }
        i += 1;
    }

    if claimed.is_some() && learned_path.is_none() {
        bail!("--user only selects a key from a --learned file");
    }

    let frame_hex = match frame_hex.as_deref() {
        None | Some("-") => {
            let mut s = String::new();
            std::io::stdin().read_to_string(&mut s).context("Cannot read frame from stdin")?;
            s
        }
        Some(h) => h.to_string(),
    };
    let cleaned: String = frame_hex.chars().filter(|c| !c.is_whitespace()).collect();
    let raw = hex::decode(&cleaned).context("frame is not valid hex")?;

    let frame = decode(&raw).with_context(|| format!("cannot decode {}-byte frame", raw.len()))?;
    println!("kind:     {:?} (tag 0x{:04X}, {} bytes)", frame.kind, frame.type_tag, raw.len());
    if let Some(key) = frame.correlation_key {
        println!("corr key: {}", key);
    }

    let learned = match &learned_path {
        Some(path) => {
            let store = LearnedKeyStore::read_only(path);
            println!("learned:  {} keys from {}", store.len(), path);
            store
        }
        None => LearnedKeyStore::in_memory(),
    };
    let resolver = KeyResolver::new(
        Arc::new(learned),
        &extra_keys,
        Arc::new(Governor::new(BreakerLimits::default())),
    );
    let res = match resolver.resolve_blocking(&frame.body, claimed.as_deref(), Duration::from_millis(deadline_ms)) {
        Ok(res) => res,
        Err(e) => {
            println!("key:      not resolved ({:?}, best score {})", e.reason, e.best_score);
            return Ok(());
        }
    };

    println!("key:      {}", hex::encode_upper(res.key));
    println!("stage:    {}", res.matched_via);
    println!("score:    {}", res.score);
    match credentials::extract(&res.plaintext) {
        Some(c) => {
            println!("username: {}", c.username);
            println!("password: {}", c.password);
            println!("method:   {:?}", c.method);
        }
        None => println!("credentials: none found"),
    }
    if let Some(ip) = credentials::client_address(&res.plaintext) {
        println!("client:   {}", ip);
    }
    Ok(())
}

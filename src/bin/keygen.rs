//! Pre-shared key generation tool.
//!
//! Writes a fresh 32-byte key as 64 hex characters. Every participant of a
//! bus loads the same file via `--psk-file`.

use clap::Parser;
use rand::RngCore;
use rand::rngs::OsRng;
use std::fs;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "keygen", version, about = "Generate a secure-bus pre-shared key")]
struct Args {
    /// Output file for the hex-encoded key
    #[arg(short, long, default_value = "bus.psk")]
    output: PathBuf,
}

fn main() {
    let args = Args::parse();

    let mut key = [0u8; 32];
    OsRng.fill_bytes(&mut key);

    fs::write(&args.output, format!("{}\n", hex::encode(key))).expect("Failed to write key file");

    // Keep the key out of other users' reach (Unix only)
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut perms = fs::metadata(&args.output)
            .expect("Failed to stat key file")
            .permissions();
        perms.set_mode(0o600);
        fs::set_permissions(&args.output, perms).expect("Failed to set key file permissions");
    }

    println!("PSK written to {}", args.output.display());
}

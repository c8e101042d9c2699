use aar::archive::{Archive, ArchiveOptions};
use aar::crypto::Key;
use aar::standalone::{decrypt_path, encrypt_path};
use aar::Error;
use clap::{Parser, Subcommand};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Component, Path, PathBuf};

#[derive(Parser)]
#[command(name = "aar", about = "Encrypted record archive CLI")]
struct Cli {
    /// AES-256 key encoded with base64
    #[arg(short, long, global = true, env = "AAR_KEY", hide_env_values = true)]
    key: Option<String>,
    /// Archive filename
    #[arg(short, long, global = true, env = "AAR_ARCHIVE")]
    archive: Option<PathBuf>,
    /// Cipher passes; must match the value the archive was created with
    #[arg(long, global = true, default_value = "1")]
    passes: usize,
    /// Increase log verbosity (-v info, -vv debug)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a random key, creating the archive if one is given
    New,
    /// List records
    List {
        /// Show offsets, spans, nonces and checksums
        #[arg(short, long)]
        long: bool,
        /// Emit JSON instead of a table
        #[arg(long, conflicts_with = "long")]
        json: bool,
    },
    /// Insert a file as a new record
    Ingest {
        file: PathBuf,
        /// Description stored with the record (defaults to the file name)
        description: Option<String>,
        /// Insert before this record index instead of appending
        #[arg(long)]
        at: Option<usize>,
    },
    /// Extract records (all when no index is given)
    Extract {
        indices: Vec<usize>,
        #[arg(short = 'C', long, default_value = ".")]
        output_dir: PathBuf,
    },
    /// Remove a record
    Delete {
        index: usize,
    },
    /// Change a record's description
    Rename {
        index:       usize,
        description: String,
    },
    /// Check every payload checksum
    Verify,
    /// Encrypt files in place without adding them to an archive
    Encrypt {
        #[arg(required = true, num_args = 1..)]
        files: Vec<PathBuf>,
    },
    /// Decrypt files produced by `encrypt`
    Decrypt {
        #[arg(required = true, num_args = 1..)]
        files: Vec<PathBuf>,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let opts = ArchiveOptions { passes: cli.passes, ..ArchiveOptions::default() };

    match cli.command {

        // ── New ──────────────────────────────────────────────────────────────
        Commands::New => {
            let key = match &cli.key {
                Some(text) => Key::from_base64(text)?,
                None       => Key::generate()?,
            };
            if let Some(path) = &cli.archive {
                Archive::create(path, &key, opts)?;
                eprintln!("Created: {}", path.display());
            }
            println!("{}", key.to_base64());
        }

        // ── Encrypt / Decrypt ────────────────────────────────────────────────
        Commands::Encrypt { files } => {
            let key = require_key(&cli.key)?;
            let failed = for_each_file(&files, "Encrypting", |path| {
                let name = path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
                encrypt_path(path, &name, &key, &opts).map(|_| ())
            });
            finish(failed)?;
        }
        Commands::Decrypt { files } => {
            let key = require_key(&cli.key)?;
            let failed = for_each_file(&files, "Decrypting", |path| {
                decrypt_path(path, &key, &opts).map(|_| ())
            });
            finish(failed)?;
        }

        // ── Archive commands ─────────────────────────────────────────────────
        command => {
            let key = require_key(&cli.key)?;
            let path = cli.archive.as_ref().ok_or("No archive filename given (--archive)")?;
            let mut ar = Archive::open(path, &key, opts)?;
            run_archive_command(&mut ar, command)?;
        }
    }

    Ok(())
}

fn run_archive_command(ar: &mut Archive, command: Commands) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        Commands::List { long, json } => {
            if json {
                println!("{}", serde_json::to_string_pretty(&ar.list()?)?);
            } else if long {
                println!("{:>5} {:>12} {:>12} {:>10} {:>10}  {:<32}  Description",
                         "Index", "Offset", "Size", "Span", "CRC32", "Nonce");
                for e in ar.entries()? {
                    println!("{:>5} {:>12} {:>12} {:>10} {:>10}  {:<32}  {}",
                        e.index, e.offset, e.payload_length(), e.span(),
                        format!("{:08x}", e.header.payload_checksum),
                        hex::encode(e.header.nonce), e.header.description);
                }
            } else {
                for e in ar.list()? {
                    println!("{:<5} {}", e.index, e.description);
                }
            }
        }

        Commands::Ingest { file, description, at } => {
            let description = match description {
                Some(d) => d,
                None => file.file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .ok_or("Please supply a description for the record")?,
            };
            let source = File::open(&file)?;
            let entry = match at {
                Some(index) => ar.insert(index, &description, source)?,
                None        => ar.append(&description, source)?,
            };
            println!("  ingested {} as {} '{}'", file.display(), entry.index, description);
        }

        Commands::Extract { indices, output_dir } => {
            let entries = ar.list()?;
            let selected: Vec<_> = if indices.is_empty() {
                entries
            } else {
                indices.iter()
                    .map(|&i| entries.get(i).cloned().ok_or(Error::NotFound(format!("record {i}"))))
                    .collect::<Result<_, _>>()?
            };
            for e in selected {
                let rel = safe_relative_path(&e.description)
                    .ok_or_else(|| format!("Refusing to extract unsafe path '{}'", e.description))?;
                let dest = output_dir.join(rel);
                if let Some(parent) = dest.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                match write_payload(ar, e.index, File::create(&dest)?) {
                    Ok(_) => println!("  extracted {}", dest.display()),
                    Err(err @ Error::PayloadChecksumMismatch { .. }) => {
                        eprintln!("  extracted {} with errors: {err}", dest.display());
                    }
                    Err(err) => return Err(err.into()),
                }
            }
        }

        Commands::Delete { index } => {
            let removed = ar.delete(index)?;
            println!("  deleted {} '{}'", index, removed.header.description);
        }

        Commands::Rename { index, description } => {
            let entry = ar.rename(index, &description)?;
            println!("  renamed {} to '{}'", index, entry.header.description);
        }

        Commands::Verify => {
            let failed = ar.verify()?;
            if failed.is_empty() {
                println!("All records verified.");
            } else {
                for i in &failed {
                    eprintln!("  record {i} failed its payload checksum");
                }
                return Err(format!("{} record(s) corrupt", failed.len()).into());
            }
        }

        Commands::New | Commands::Encrypt { .. } | Commands::Decrypt { .. } => {
            return Err("not an archive command".into());
        }
    }
    Ok(())
}

// ── helpers ──────────────────────────────────────────────────────────────────

/// Decode record `index` into `out`.  The buffer is flushed before the
/// decode result is reported, so a failed final write is never lost.
fn write_payload<W: Write>(ar: &mut Archive, index: usize, out: W) -> aar::Result<()> {
    let mut sink = BufWriter::new(out);
    let result = ar.read_payload(index, &mut sink);
    sink.flush()?;
    result.map(|_| ())
}

fn require_key(key: &Option<String>) -> Result<Key, Box<dyn std::error::Error>> {
    let text = key.as_deref().ok_or("No key given (--key or AAR_KEY)")?;
    Ok(Key::from_base64(text)?)
}

/// Run `op` on every path, reporting failures without stopping.
fn for_each_file<F>(files: &[PathBuf], verb: &str, mut op: F) -> usize
where
    F: FnMut(&Path) -> aar::Result<()>,
{
    let mut failed = 0;
    for path in files {
        eprintln!("{verb} '{}' ...", path.display());
        match op(path) {
            Ok(()) => {}
            Err(e @ Error::PayloadChecksumMismatch { .. }) => {
                eprintln!("  done, but the result is damaged: {e}");
                failed += 1;
            }
            Err(e) if e.is_structural() => {
                eprintln!("  skipped: {e}");
                failed += 1;
            }
            Err(e) => {
                eprintln!("  failed: {e}");
                failed += 1;
            }
        }
    }
    failed
}

fn finish(failed: usize) -> Result<(), Box<dyn std::error::Error>> {
    if failed > 0 {
        return Err(format!("{failed} file(s) failed").into());
    }
    Ok(())
}

/// Accept only plain relative paths so a description cannot escape the
/// output directory.
fn safe_relative_path(description: &str) -> Option<&Path> {
    let path = Path::new(description);
    let plain = path.components().all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
    (plain && path.components().next().is_some()).then_some(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use aar::crypto::KEY_SIZE;
    use std::io;
    use tempfile::NamedTempFile;

    struct FlushFails;

    impl Write for FlushFails {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Err(io::Error::new(io::ErrorKind::Other, "device full"))
        }
    }

    fn archive_with(payload: &[u8]) -> (NamedTempFile, Archive) {
        let file = NamedTempFile::new().unwrap();
        let key = Key::new([0x2B; KEY_SIZE]);
        let mut ar = Archive::create_in(file.reopen().unwrap(), &key, ArchiveOptions::default()).unwrap();
        ar.append("out.bin", payload).unwrap();
        (file, ar)
    }

    #[test]
    fn write_payload_delivers_every_byte() {
        let payload: Vec<u8> = (0..10_000u32).map(|i| (i % 253) as u8).collect();
        let (_file, mut ar) = archive_with(&payload);
        let dest = NamedTempFile::new().unwrap();
        write_payload(&mut ar, 0, dest.reopen().unwrap()).unwrap();
        assert_eq!(std::fs::read(dest.path()).unwrap(), payload);
    }

    #[test]
    fn write_payload_reports_failed_flush() {
        let (_file, mut ar) = archive_with(b"short payload");
        let err = write_payload(&mut ar, 0, FlushFails).unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn unsafe_descriptions_are_refused() {
        assert!(safe_relative_path("dir/file.txt").is_some());
        assert!(safe_relative_path("/etc/passwd").is_none());
        assert!(safe_relative_path("../up.txt").is_none());
        assert!(safe_relative_path("a/../../b").is_none());
        assert!(safe_relative_path("").is_none());
    }
}

//! stb-settings - load, dump and verify receiver settings

// Use mimalloc for faster memory allocation (Linux, macOS)
#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};

use stb_settings::config::SaveOptions;
use stb_settings::lamedb::LamedbVersion;
use stb_settings::{adapter, archive, Error, Result};

#[derive(Debug, Parser)]
#[clap(name = "stb-settings")]
#[clap(about = "Reads Enigma2 and Neutrino settings, dumps them as JSON and checks that they write back unchanged", long_about = None)]
#[clap(version)]
struct Cli {
    #[clap(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Print the loaded settings and load diagnostics as JSON.
    Dump {
        /// Settings directory or archive
        path: PathBuf,
    },
    /// Load, write into a temporary directory and compare byte by byte.{n}
    /// Exits non-zero when any written file differs from its input.
    Verify {
        /// Settings directory or archive
        path: PathBuf,

        /// lamedb version to read and write
        #[clap(long, default_value_t = 4, value_parser = clap::value_parser!(u8).range(4..=5))]
        lamedb_version: u8,
    },
}

fn dump(path: &Path) -> Result<ExitCode> {
    let (model, diagnostics) = adapter::open(path, LamedbVersion::V4)?;
    let value = serde_json::json!({
        "model": model,
        "diagnostics": diagnostics,
    });
    let text = serde_json::to_string_pretty(&value).map_err(|e| Error::format(path.display().to_string(), e.to_string()))?;
    println!("{}", text);
    Ok(ExitCode::SUCCESS)
}

fn verify(path: &Path, version: LamedbVersion) -> Result<ExitCode> {
    let extracted = if path.is_dir() {
        None
    } else {
        Some(archive::extract(path)?)
    };
    let input = match &extracted {
        Some(dir) => archive::settings_root(dir.path()),
        None => path.to_path_buf(),
    };

    let (mut model, diagnostics) = adapter::open(&input, version)?;
    let out = tempfile::tempdir().map_err(|e| Error::io(std::env::temp_dir(), e))?;
    let options = SaveOptions {
        lamedb_version: version,
        backup_before_save: false,
        ..SaveOptions::default()
    };
    let report = adapter::save(out.path(), &mut model, &options)?;

    let mut differing = 0;
    for name in &report.written {
        let emitted = fs::read(out.path().join(name)).map_err(|e| Error::io(out.path().join(name), e))?;
        match fs::read(input.join(name)) {
            Ok(original) if original == emitted => {}
            Ok(_) => {
                println!("differs: {}", name);
                differing += 1;
            }
            Err(_) => {
                println!("new: {}", name);
                differing += 1;
            }
        }
    }
    println!(
        "{} files written, {} differ, {} diagnostics",
        report.written.len(),
        differing,
        diagnostics.len()
    );
    Ok(if differing == 0 {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let result = match &cli.command {
        Commands::Dump { path } => dump(path),
        Commands::Verify {
            path,
            lamedb_version,
        } => {
            let version = LamedbVersion::from_number(*lamedb_version).unwrap_or(LamedbVersion::V4);
            verify(path, version)
        }
    };
    match result {
        Ok(code) => code,
        Err(e) => {
            log::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

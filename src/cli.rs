//! Command line arguments.

use clap::Parser;
use s3reg_config::Overrides;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "s3reg", version, about = "Terraform provider registry served from an S3 bucket")]
pub struct Args {
    /// Configuration file (TOML, YAML or JSON).
    #[arg(long, env = "S3REG_CONFIG")]
    pub config: Option<PathBuf>,

    /// Bucket holding the provider objects.
    #[arg(short = 'b', long)]
    pub bucket_name: Option<String>,

    /// Public host name used in download URLs.
    #[arg(short = 'H', long)]
    pub hostname: Option<String>,

    /// Port to listen on.
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Log level or filter directive (`RUST_LOG` takes precedence).
    #[arg(short = 'l', long = "loglevel")]
    pub log_level: Option<String>,
}

impl Args {
    pub fn overrides(&self) -> Overrides {
        Overrides {
            hostname: self.hostname.clone(),
            bucket: self.bucket_name.clone(),
            port: self.port,
            log_level: self.log_level.clone(),
        }
    }
}

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::metadata::{PKG_DESCRIPTION, PKG_NAME, PKG_VERSION};
use crate::storage::ProgramStore;

pub const DEFAULT_PORT: u16 = 5000;
pub const DEFAULT_DATA_DIR: &str = "data";

#[derive(Parser, Debug, Clone)]
#[command(name = PKG_NAME)]
#[command(version = PKG_VERSION)]
#[command(about = PKG_DESCRIPTION, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Start the programs REST API
    Serve(ServeArguments),
    /// Create the data file if it does not exist yet
    Init(StoreArguments),
    /// Print the stored programs
    List(ListArguments),
    /// Print version information
    Version,
}

#[derive(Args, Debug, Clone)]
pub struct StoreArguments {
    /// Directory holding programs.json, relative to the working directory
    #[arg(long, default_value = DEFAULT_DATA_DIR)]
    pub data_dir: PathBuf,
}

impl StoreArguments {
    pub fn store(&self) -> ProgramStore {
        ProgramStore::in_dir(&self.data_dir)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.data_dir.as_os_str().is_empty() {
            return Err("--data-dir cannot be empty".to_string());
        }
        Ok(())
    }
}

#[derive(Args, Debug, Clone)]
pub struct ServeArguments {
    /// Port to listen on
    #[arg(long, env = "PORT", default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Interface to bind
    #[arg(long, default_value_t = IpAddr::V4(Ipv4Addr::UNSPECIFIED))]
    pub host: IpAddr,

    #[command(flatten)]
    pub store: StoreArguments,
}

impl ServeArguments {
    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    pub fn validate(&self) -> Result<(), String> {
        self.store.validate()
    }
}

#[derive(Args, Debug, Clone)]
pub struct ListArguments {
    #[command(flatten)]
    pub store: StoreArguments,

    /// Print the raw JSON array instead of a summary table
    #[arg(long, default_value_t = false)]
    pub json: bool,
}

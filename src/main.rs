use bounty_programs::{
    cli::{Cli, Command, ListArguments},
    error::{ServiceError, ServiceResult},
    metadata::{PKG_NAME, PKG_VERSION},
    server,
    types::ProgramStatus,
};
use clap::Parser;
use colored::Colorize;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> ServiceResult<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    match Cli::parse().command {
        Command::Serve(args) => {
            tracing::info!("Starting {PKG_NAME} v{PKG_VERSION}");
            server::start_server(args).await
        }
        Command::Init(args) => {
            args.validate().map_err(ServiceError::Config)?;
            let store = args.store();
            store.initialize()?;
            println!("Program store ready at {}", store.path().display());
            Ok(())
        }
        Command::List(args) => print_programs(&args),
        Command::Version => {
            println!("{PKG_NAME} {PKG_VERSION}");
            Ok(())
        }
    }
}

fn print_programs(args: &ListArguments) -> ServiceResult<()> {
    args.store.validate().map_err(ServiceError::Config)?;
    let store = args.store.store();
    let programs = store.list();

    if args.json {
        println!("{}", serde_json::to_string_pretty(&programs)?);
        return Ok(());
    }

    if programs.is_empty() {
        println!("No programs found in {}", store.path().display());
        return Ok(());
    }

    for program in &programs {
        let status = match program.status {
            ProgramStatus::Active => program.status.to_string().green(),
            ProgramStatus::Closed => program.status.to_string().red(),
        };
        println!(
            "{}  {:<6}  {}  (reports: {}, bounties: {})",
            program.id.dimmed(),
            status,
            program.name.bold(),
            program.reports,
            program.bounties
        );
    }
    Ok(())
}

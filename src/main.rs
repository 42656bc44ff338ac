use std::process::ExitCode;

use anyhow::Context as _;
use clap::Parser as _;

#[tokio::main]
async fn main() -> ExitCode {
    if let Err(err) = try_main().await {
        eprintln!("{err:#}");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

async fn try_main() -> anyhow::Result<()> {
    technote::logging::init().context("init logging")?;

    let cli = technote::cli::Cli::parse();
    tracing::debug!(?cli, "parsed cli");

    match cli.command {
        technote::cli::Command::Build(args) => {
            technote::pipeline::run(args).await.context("build")?;
        }
        technote::cli::Command::Qna {
            command: technote::cli::QnaCommand::Process(args),
        } => {
            technote::qna::process(args).await.context("qna process")?;
        }
        technote::cli::Command::Toc {
            command: technote::cli::TocCommand::Create(args),
        } => {
            technote::toc::create(args).await.context("toc create")?;
        }
        technote::cli::Command::Write(args) => {
            technote::writer::write(args).await.context("write")?;
        }
        technote::cli::Command::Publish(args) => {
            technote::publish::run(args).await.context("publish")?;
        }
    }

    Ok(())
}

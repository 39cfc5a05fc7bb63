//! Implementation of the `dump-*` commands for generated files.

use std::io::Write;

use dbb_config::{DbbConfig, DockerContext, Template};
use tokio::io::AsyncWriteExt;

/// Print the resolved configuration.
pub fn config(config: &DbbConfig) -> anyhow::Result<()> {
    println!("{}", config.dump()?);
    Ok(())
}

pub fn dockerfile(config: &DbbConfig) -> anyhow::Result<()> {
    print_template(config, Template::Dockerfile)
}

pub fn deb_control(config: &DbbConfig) -> anyhow::Result<()> {
    print_template(config, Template::DebControl)
}

fn print_template(config: &DbbConfig, template: Template) -> anyhow::Result<()> {
    let rendered = template.render(config)?;
    let mut stdout = std::io::stdout().lock();
    stdout.write_all(rendered.as_bytes())?;
    stdout.flush()?;
    Ok(())
}

/// Write the raw build context archive to stdout.
pub async fn context(config: DbbConfig) -> anyhow::Result<()> {
    let archive = DockerContext::new(config).archive()?;
    let mut stdout = tokio::io::stdout();
    stdout.write_all(&archive).await?;
    stdout.flush().await?;
    Ok(())
}

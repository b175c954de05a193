use crate::account::Account;
use crate::client::Client;
use crate::error::{Error, Result};
use std::path::Path;

pub async fn execute(
    client: &Client,
    account: &mut Account,
    name: &str,
    shell: Option<String>,
    path: Option<&Path>,
) -> Result<()> {
    let shell = match shell {
        Some(shell) => shell,
        None => match std::env::var("SHELL") {
            Ok(shell) if !shell.is_empty() => Path::new(&shell)
                .file_name()
                .and_then(|name| name.to_str())
                .unwrap_or_default()
                .to_string(),
            _ => {
                return Err(Error::Config(
                    "Shell was not specified. Either use --shell or set SHELL".to_string(),
                ))
            }
        },
    };
    tracing::debug!("Shell: {shell}");

    let source_text = client
        .get_source_command(account, &shell, name, path)
        .await?;
    println!("{source_text}");
    Ok(())
}

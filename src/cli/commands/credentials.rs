use crate::account::Account;
use crate::client::Client;
use crate::error::Result;
use std::path::Path;

pub async fn execute(
    client: &Client,
    account: &mut Account,
    name: &str,
    path: Option<&Path>,
) -> Result<()> {
    let dir = client
        .download_cluster_credentials(account, name, path)
        .await?;
    println!("Credentials written to \"{}\"", dir.display());
    Ok(())
}

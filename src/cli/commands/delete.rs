use crate::account::Account;
use crate::client::Client;
use crate::console;
use crate::error::Result;
use tokio_util::sync::CancellationToken;

pub async fn execute(
    client: &Client,
    account: &mut Account,
    name: &str,
    wait: bool,
    cancel: CancellationToken,
) -> Result<()> {
    let cluster = client.delete_cluster(account, name, wait, &cancel).await?;
    console::write_cluster(&cluster);
    Ok(())
}

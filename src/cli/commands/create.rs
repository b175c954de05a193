use crate::account::Account;
use crate::client::Client;
use crate::console;
use crate::error::Result;
use tokio_util::sync::CancellationToken;

pub async fn execute(
    client: &Client,
    account: &mut Account,
    name: &str,
    template: &str,
    nodes: i64,
    wait: bool,
    cancel: CancellationToken,
) -> Result<()> {
    let cluster = client
        .create_cluster(account, name, template, nodes, wait, &cancel)
        .await?;
    console::write_cluster(&cluster);
    Ok(())
}

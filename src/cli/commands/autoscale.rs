use crate::account::Account;
use crate::client::Client;
use crate::console;
use crate::error::Result;

pub async fn execute(
    client: &Client,
    account: &mut Account,
    name: &str,
    enabled: bool,
) -> Result<()> {
    let cluster = client.set_auto_scale(account, name, enabled).await?;
    console::write_cluster(&cluster);
    Ok(())
}

use crate::account::Account;
use crate::client::Client;
use crate::console;
use crate::error::Result;

pub async fn execute(client: &Client, account: &mut Account) -> Result<()> {
    let templates = client.list_cluster_templates(account).await?;
    console::write_templates(&templates);
    Ok(())
}
